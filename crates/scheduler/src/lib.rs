//! Dependency-aware execution of cached computation blocks.
//!
//! A [`Scheduler`] owns a registry of blocks (one user function plus its
//! bound arguments, output [`Target`](blockflow_store::Target) and
//! dependency edges). On [`Scheduler::execute`] it selects what needs to
//! run, closes that set over the dependency graph, asks before
//! overwriting existing output and runs the result on a bounded worker
//! pool, streaming each block's output to its record file.

pub mod args;
pub mod block;
pub mod deferred;
pub mod executor;
pub mod metrics;
pub mod output;
pub mod params;
pub mod progress;
pub mod resolver;
pub mod runner;
pub mod slurm;
pub mod terminal;
pub mod types;

pub use args::{Command, RunArgs};
pub use block::{Cache, FnRef, IntoDependencies};
pub use deferred::{BlockContext, SeedSource};
pub use output::{BlockOutput, IntoBlockOutput, RecordStream, StreamItem};
pub use params::{Instance, Parameter};
pub use runner::Scheduler;
pub use terminal::{AutoConfirm, ConfirmDelete, TerminalPrompt};
pub use types::{ExecutionError, RunOutcome, RunSummary};

pub use blockflow_core::{Arg, Args, FlowConfig, FlowError, Records, Value};
pub use blockflow_store::RecordSet;
