use std::any::Any;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::metrics::RunMetrics;

/// A block function failed or panicked.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("Cached function '{block}' failed: {message}")]
pub struct ExecutionError {
    pub block: String,
    pub message: String,
    /// Full error chain (and backtrace, when captured) for the log.
    pub trace: String,
}

impl ExecutionError {
    pub fn from_error(block: &str, err: &anyhow::Error) -> Self {
        Self {
            block: block.to_string(),
            message: format!("{err:#}"),
            trace: format!("{err:?}"),
        }
    }

    pub fn from_panic(block: &str, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self {
            block: block.to_string(),
            trace: format!("panicked: {message}"),
            message: format!("panicked: {message}"),
        }
    }
}

/// What happened during one execution pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Blocks handed to a worker, successful or not.
    pub executed: usize,
    /// Successful blocks in completion order.
    pub completed: Vec<String>,
    pub failures: Vec<ExecutionError>,
    /// Blocks never started because a dependency never completed.
    pub blocked: Vec<String>,
    pub elapsed: Duration,
    pub metrics: RunMetrics,
}

impl RunSummary {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.blocked.is_empty()
    }

    /// Process exit status: 1 when anything failed or was left blocked.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Result of [`Scheduler::execute`](crate::Scheduler::execute).
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Registered names were listed; nothing ran.
    Displayed,
    /// Stale record files were removed.
    Cleaned { removed: Vec<PathBuf> },
    /// Output of the named blocks was removed.
    Deleted { removed: Vec<PathBuf> },
    /// The user declined a confirmation. Nothing was touched.
    Aborted,
    /// A batch script was written instead of running locally.
    BatchScript {
        sbatch: PathBuf,
        lookup: PathBuf,
        jobs: usize,
    },
    Ran(RunSummary),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Ran(summary) => summary.exit_code(),
            _ => 0,
        }
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Ran(summary) => Some(summary),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_reflects_failures_and_blocked() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.exit_code(), 0);

        summary.blocked.push("b".into());
        assert_eq!(summary.exit_code(), 1);

        let summary = RunSummary {
            failures: vec![ExecutionError::from_error("a", &anyhow::anyhow!("boom"))],
            ..Default::default()
        };
        assert_eq!(RunOutcome::Ran(summary).exit_code(), 1);
        assert_eq!(RunOutcome::Aborted.exit_code(), 0);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = ExecutionError::from_panic("a", Box::new("index out of range"));
        assert_eq!(err.message, "panicked: index out of range");
        assert_eq!(err.to_string(), "Cached function 'a' failed: panicked: index out of range");

        let err = ExecutionError::from_panic("a", Box::new(String::from("owned")));
        assert_eq!(err.message, "panicked: owned");
    }

    #[test]
    fn error_chain_is_kept() {
        let err = anyhow::anyhow!("disk full").context("writing x");
        let exec = ExecutionError::from_error("a", &err);
        assert_eq!(exec.message, "writing x: disk full");
    }
}
