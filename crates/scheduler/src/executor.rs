//! Runs one block on a worker and routes its output to disk.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use blockflow_core::Records;
use blockflow_store::{StreamingCache, Target};
use tracing::{debug, warn};

use crate::deferred::{DeferredFunction, SeedSource};
use crate::output::{BlockOutput, RecordStream, StreamItem};
use crate::progress::ProgressBoard;
use crate::types::ExecutionError;

/// Streaming cache limits for one run.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub bytes: u64,
    pub time: Duration,
}

/// Everything a worker needs to run one block, owned so it can cross
/// into the pool.
pub struct BlockJob {
    pub name: String,
    pub function: DeferredFunction,
    pub target: Target,
    /// Family members store their arguments next to their output.
    pub record_args: bool,
    pub cache: CacheSettings,
    pub seed: SeedSource,
    pub board: Arc<ProgressBoard>,
}

/// Run a block. Errors and panics come back as [`ExecutionError`]; the
/// output is committed only on success.
pub fn run_block(job: &BlockJob) -> Result<(), ExecutionError> {
    match panic::catch_unwind(AssertUnwindSafe(|| execute(job))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ExecutionError::from_error(&job.name, &err)),
        Err(payload) => Err(ExecutionError::from_panic(&job.name, payload)),
    }
}

fn execute(job: &BlockJob) -> anyhow::Result<()> {
    if job.record_args {
        let written = job
            .target
            .write_args(job.function.args())
            .context("writing instance arguments")?;
        debug!(block = %job.name, written, "instance arguments stored");
    }

    let output = job
        .function
        .call(&job.name, &job.seed, Arc::clone(&job.board))?;
    debug!(block = %job.name, kind = output.kind(), "block returned");

    match output {
        BlockOutput::Empty => job.target.write(&Records::new())?,
        BlockOutput::RecordSet(records) => job.target.write(&records)?,
        BlockOutput::RecordStream(stream) => drain_stream(job, stream)?,
    }

    job.target.commit()?;
    Ok(())
}

/// Feed a stream through the streaming cache. Whatever was buffered is
/// flushed even when the stream fails or panics part way.
fn drain_stream(job: &BlockJob, stream: RecordStream) -> anyhow::Result<()> {
    let mut cache = StreamingCache::new(&job.target, job.cache.bytes, job.cache.time);
    let mut wrote_once = false;

    let drained = panic::catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<()> {
        for item in stream {
            match item? {
                StreamItem::Records(records) => cache.add_records(records)?,
                StreamItem::Once(records) => {
                    job.target.write(&records)?;
                    wrote_once = true;
                }
            }
        }
        Ok(())
    }));

    let flushed = cache.flush();
    match drained {
        Ok(Ok(())) => flushed?,
        Ok(Err(err)) => {
            if let Err(flush_err) = flushed {
                warn!(block = %job.name, error = %flush_err, "flush after failure failed");
            }
            return Err(err);
        }
        Err(payload) => {
            if let Err(flush_err) = flushed {
                warn!(block = %job.name, error = %flush_err, "flush after panic failed");
            }
            panic::resume_unwind(payload);
        }
    }

    debug!(
        block = %job.name,
        rows = cache.rows_written(),
        flushes = cache.flush_count(),
        "stream drained"
    );

    if cache.is_unused() && !wrote_once {
        job.target.write(&Records::new())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_core::{Arg, Args, Value};
    use blockflow_store::TargetStatus;

    use crate::deferred::{erase, BlockContext, BlockFn};

    fn job(dir: &std::path::Path, func: BlockFn, args: Args, record_args: bool) -> BlockJob {
        BlockJob {
            name: "blk".to_string(),
            function: DeferredFunction::new(func, args),
            target: Target::for_block(dir, "test", "blk", "rec"),
            record_args,
            cache: CacheSettings {
                bytes: 40,
                time: Duration::from_secs(300),
            },
            seed: SeedSource::Fixed(0),
            board: Arc::new(ProgressBoard::hidden()),
        }
    }

    #[test]
    fn none_writes_an_empty_complete_target() {
        let dir = tempfile::tempdir().unwrap();
        let j = job(dir.path(), erase(|_: &mut BlockContext| Ok(None::<Records>)), Args::new(), false);
        run_block(&j).unwrap();

        assert!(j.target.exists());
        assert_eq!(j.target.status().unwrap(), TargetStatus::Complete);
        assert!(j.target.load().unwrap().is_empty());
    }

    #[test]
    fn record_set_is_written_and_committed() {
        let dir = tempfile::tempdir().unwrap();
        let j = job(
            dir.path(),
            erase(|_: &mut BlockContext| Ok(Records::new().with("x", 2))),
            Args::new(),
            false,
        );
        run_block(&j).unwrap();
        let loaded = j.target.load().unwrap();
        assert_eq!(loaded["x"], Value::Int(2));
        assert!(loaded.is_complete());
    }

    #[test]
    fn stream_with_once_summary() {
        let dir = tempfile::tempdir().unwrap();
        let func = erase(|_: &mut BlockContext| {
            let samples = (0..12).map(|i| StreamItem::Records(Records::new().with("x", i as f64)));
            let summary = std::iter::once(StreamItem::Once(Records::new().with("mean", 5.5)));
            Ok(BlockOutput::stream(samples.chain(summary)))
        });
        let j = job(dir.path(), func, Args::new(), false);
        run_block(&j).unwrap();

        let loaded = j.target.load().unwrap();
        assert_eq!(loaded["x"].len(), 12);
        assert_eq!(loaded["mean"], Value::Float(5.5));
        assert!(loaded.is_complete());
    }

    #[test]
    fn empty_stream_still_counts_as_done() {
        let dir = tempfile::tempdir().unwrap();
        let func = erase(|_: &mut BlockContext| Ok(BlockOutput::stream(Vec::<Records>::new())));
        let j = job(dir.path(), func, Args::new(), false);
        run_block(&j).unwrap();
        assert!(j.target.exists());
        assert!(j.target.is_complete());
    }

    #[test]
    fn failing_stream_keeps_flushed_rows_uncommitted() {
        let dir = tempfile::tempdir().unwrap();
        let func = erase(|_: &mut BlockContext| {
            let items = (0..8).map(|i| {
                if i < 7 {
                    Ok(Records::new().with("x", i as f64))
                } else {
                    Err(anyhow::anyhow!("diverged at step {i}"))
                }
            });
            Ok(BlockOutput::try_stream(items))
        });
        let j = job(dir.path(), func, Args::new(), false);
        let err = run_block(&j).unwrap_err();

        assert_eq!(err.block, "blk");
        assert!(err.message.contains("diverged at step 7"));
        assert_eq!(j.target.status().unwrap(), TargetStatus::Partial);
        let loaded = j.target.load().unwrap();
        assert_eq!(loaded["x"].len(), 7);
        assert!(!loaded.is_complete());
    }

    #[test]
    fn panicking_stream_is_flushed_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let func = erase(|_: &mut BlockContext| {
            let items = (0..4).map(|i| {
                if i == 3 {
                    panic!("bad state");
                }
                Records::new().with("x", i)
            });
            Ok(BlockOutput::stream(items))
        });
        let j = job(dir.path(), func, Args::new(), false);
        let err = run_block(&j).unwrap_err();

        assert_eq!(err.message, "panicked: bad state");
        assert_eq!(j.target.load().unwrap()["x"].len(), 3);
        assert!(!j.target.is_complete());
    }

    #[test]
    fn function_error_leaves_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let func = erase(|_: &mut BlockContext| -> anyhow::Result<Records> {
            anyhow::bail!("no convergence")
        });
        let j = job(dir.path(), func, Args::new(), false);
        let err = run_block(&j).unwrap_err();
        assert_eq!(err.message, "no convergence");
        assert!(!j.target.exists());
    }

    #[test]
    fn instance_arguments_are_stored_except_opaque() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = Args::new();
        args.insert("x".into(), 3.into());
        args.insert("model".into(), Arg::opaque(String::from("in memory only")));
        let func = erase(|ctx: &mut BlockContext| {
            let model = ctx.opaque::<String>("model")?.clone();
            Ok(Records::new().with("model_len", model.len()))
        });
        let j = job(dir.path(), func, args, true);
        run_block(&j).unwrap();

        let loaded = j.target.load().unwrap();
        let stored = loaded.args().unwrap();
        assert_eq!(stored["x"], Value::Int(3));
        assert!(!stored.contains("model"));
        assert_eq!(loaded["model_len"], Value::Int(14));
    }
}
