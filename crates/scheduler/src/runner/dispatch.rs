use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use blockflow_core::{logging, FlowError};
use blockflow_notify::templating::DEFAULT_SUMMARY_TEMPLATE;
use blockflow_notify::RunReport;
use clap::Parser;
use indexmap::IndexSet;
use tracing::{debug, error, info, warn};

use crate::args::{Command, RunArgs};
use crate::deferred::SeedSource;
use crate::executor::{self, BlockJob, CacheSettings};
use crate::progress::ProgressBoard;
use crate::resolver;
use crate::slurm::{self, BatchJob};
use crate::terminal;
use crate::types::{ExecutionError, RunOutcome, RunSummary};

use super::Scheduler;

/// Posted by a worker when its block returns.
struct Completion {
    name: String,
    elapsed: Duration,
    result: Result<(), ExecutionError>,
}

/// Per-run settings shared by every job.
struct RunContext {
    cache: CacheSettings,
    seed: SeedSource,
    board: Arc<ProgressBoard>,
    total: usize,
}

impl Scheduler {
    /// Parse the process arguments, log to `{dirpath}/{script}.log`, run,
    /// and wait for notification delivery. Returns the exit status.
    pub fn execute_from_env(&mut self) -> anyhow::Result<i32> {
        let args = RunArgs::parse();
        logging::init(&self.dirpath.join(format!("{}.log", self.script)))?;
        self.config.log_summary();

        let outcome = self.execute(args)?;
        self.wait_for_notifications();
        Ok(outcome.exit_code())
    }

    /// One full pass: select, resolve, confirm, then run (or write a batch
    /// script), summarise, notify and run the at-end callables.
    pub fn execute(&mut self, args: RunArgs) -> Result<RunOutcome, FlowError> {
        let started = Instant::now();

        match &args.command {
            Some(Command::Display) => {
                self.display()?;
                return Ok(RunOutcome::Displayed);
            }
            Some(Command::Clean) => return self.clean(args.force),
            _ => {}
        }
        if let Some(names) = &args.delete {
            return self.delete(names, args.force);
        }
        if args.at_end {
            let summary = RunSummary {
                failures: self.run_at_end()?,
                elapsed: started.elapsed(),
                ..Default::default()
            };
            return Ok(RunOutcome::Ran(summary));
        }

        let mut requested = self.select(&args)?;
        self.resolve(&mut requested, &args)?;

        if !self.confirm_overwrite(&requested, args.force)? {
            terminal::abort_message()?;
            info!("run aborted at overwrite confirmation");
            return Ok(RunOutcome::Aborted);
        }

        if let Some(Command::Slurm {
            time,
            memory,
            partition,
            no_submit,
        }) = &args.command
        {
            return self.write_batch(
                &requested,
                time.as_deref(),
                *memory,
                partition.as_deref(),
                *no_submit,
            );
        }

        let mut summary = self.dispatch(requested, &args)?;
        summary.elapsed = started.elapsed();
        terminal::summary_message(&summary)?;
        info!(
            executed = summary.executed,
            failures = summary.failure_count(),
            blocked = summary.blocked.len(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run finished"
        );

        if summary.executed > 0 {
            self.notify(&summary, &args);
        }
        if !args.no_at_end {
            let at_end_failures = self.run_at_end()?;
            summary.failures.extend(at_end_failures);
        }
        Ok(RunOutcome::Ran(summary))
    }

    /// Join notification threads still sending.
    pub fn wait_for_notifications(&mut self) {
        for handle in self.notifications.drain(..) {
            match handle.join() {
                Ok(results) => {
                    for result in results.iter().filter(|r| !r.success) {
                        warn!(
                            channel = %result.channel,
                            error = result.error.as_deref().unwrap_or("unknown"),
                            "notification not delivered"
                        );
                    }
                }
                Err(_) => warn!("notification thread panicked"),
            }
        }
    }

    fn run_context(&self, args: &RunArgs, total: usize) -> Result<RunContext, FlowError> {
        let cache_time = args.cache_time.unwrap_or(self.config.storage.cache_time);
        let time = Duration::try_from_secs_f64(cache_time)
            .map_err(|_| FlowError::Config(format!("invalid cache time {cache_time}")))?;
        let mininterval = args
            .mininterval
            .unwrap_or(self.config.execution.progress_mininterval_ms);

        Ok(RunContext {
            cache: CacheSettings {
                bytes: self.config.storage.cache_size_bytes()?,
                time,
            },
            seed: args.seed.map(SeedSource::Fixed).unwrap_or(self.seed),
            board: Arc::new(ProgressBoard::new(Duration::from_millis(mininterval))),
            total,
        })
    }

    fn job_for(&self, name: &str, ctx: &RunContext) -> Result<BlockJob, FlowError> {
        let block = self
            .blocks
            .get(name)
            .ok_or_else(|| FlowError::UnknownBlock(name.to_string()))?;
        Ok(BlockJob {
            name: name.to_string(),
            function: block.function.clone(),
            target: block.target.clone(),
            record_args: block.family.is_some(),
            cache: ctx.cache,
            seed: ctx.seed,
            board: Arc::clone(&ctx.board),
        })
    }

    /// Run the requested blocks, each once its dependencies completed.
    fn dispatch(&mut self, requested: IndexSet<String>, args: &RunArgs) -> Result<RunSummary, FlowError> {
        let mut summary = RunSummary::default();
        let mut remaining: Vec<String> = requested.into_iter().collect();
        if remaining.is_empty() {
            info!("nothing to run");
            return Ok(summary);
        }

        let ctx = self.run_context(args, remaining.len())?;
        let processes = args
            .processes
            .filter(|&n| n > 0)
            .unwrap_or_else(|| self.config.execution.resolved_processes());
        let width = if args.debug {
            1
        } else {
            processes.min(remaining.len()).max(1)
        };

        terminal::run_message(remaining.len(), width)?;
        info!(blocks = remaining.len(), workers = width, debug = args.debug, "dispatching");

        if args.debug {
            self.run_inline(&mut remaining, &ctx, &mut summary)?;
        } else {
            self.run_pool(&mut remaining, &ctx, width, &mut summary)?;
        }

        if !remaining.is_empty() {
            warn!(blocked = ?remaining, "blocks never became ready");
        }
        summary.blocked = remaining;
        Ok(summary)
    }

    /// Take the next ready block out of `remaining`, in insertion order.
    fn take_ready(&self, remaining: &mut Vec<String>) -> Option<String> {
        let index = remaining
            .iter()
            .position(|name| resolver::is_ready(&self.blocks, name))?;
        Some(remaining.remove(index))
    }

    fn run_pool(
        &mut self,
        remaining: &mut Vec<String>,
        ctx: &RunContext,
        width: usize,
        summary: &mut RunSummary,
    ) -> Result<(), FlowError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .thread_name(|i| format!("blockflow-worker-{i}"))
            .build()
            .map_err(|e| FlowError::Other(format!("failed to build worker pool: {e}")))?;
        let poll = Duration::from_millis(self.config.execution.poll_interval_ms.max(1));

        let (tx, rx) = mpsc::channel::<Completion>();
        let mut in_flight: IndexSet<String> = IndexSet::new();

        loop {
            while let Some(name) = self.take_ready(remaining) {
                let job = self.job_for(&name, ctx)?;
                let tx = tx.clone();
                debug!(block = %name, "submitted");
                pool.spawn(move || {
                    let started = Instant::now();
                    let result = executor::run_block(&job);
                    // the coordinator outlives every job
                    let _ = tx.send(Completion {
                        name: job.name,
                        elapsed: started.elapsed(),
                        result,
                    });
                });
                in_flight.insert(name);
            }
            summary.metrics.observe_in_flight(in_flight.len());

            if in_flight.is_empty() {
                break;
            }

            match rx.recv_timeout(poll) {
                Ok(done) => {
                    in_flight.shift_remove(&done.name);
                    self.record(done, ctx, summary);
                    while let Ok(done) = rx.try_recv() {
                        in_flight.shift_remove(&done.name);
                        self.record(done, ctx, summary);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    /// Same readiness loop on the calling thread.
    fn run_inline(
        &mut self,
        remaining: &mut Vec<String>,
        ctx: &RunContext,
        summary: &mut RunSummary,
    ) -> Result<(), FlowError> {
        while let Some(name) = self.take_ready(remaining) {
            let job = self.job_for(&name, ctx)?;
            summary.metrics.observe_in_flight(1);
            let started = Instant::now();
            let result = executor::run_block(&job);
            let done = Completion {
                name,
                elapsed: started.elapsed(),
                result,
            };
            self.record(done, ctx, summary);
        }
        Ok(())
    }

    fn record(&mut self, done: Completion, ctx: &RunContext, summary: &mut RunSummary) {
        summary.executed += 1;
        let success = done.result.is_ok();

        match done.result {
            Ok(()) => {
                let group = match self.blocks.get_mut(&done.name) {
                    Some(block) => {
                        block.complete = true;
                        block.family.clone().unwrap_or_else(|| done.name.clone())
                    }
                    None => done.name.clone(),
                };
                summary.metrics.record_execution(&group, &done.name, done.elapsed);
                info!(
                    block = %done.name,
                    duration_ms = done.elapsed.as_millis() as u64,
                    "block completed"
                );
                summary.completed.push(done.name.clone());
            }
            Err(err) => {
                error!(block = %err.block, trace = %err.trace, "{err}");
                summary.failures.push(err);
            }
        }

        report_finished(&mut io::stdout(), summary.executed, ctx.total, &done.name, success);
    }

    /// Run at-end callables in registration order. A failing callable is
    /// logged and reported; the rest still run.
    fn run_at_end(&self) -> Result<Vec<ExecutionError>, FlowError> {
        if self.at_end.is_empty() {
            return Ok(Vec::new());
        }
        terminal::at_end_message()?;

        let mut failures = Vec::new();
        for (name, at_end) in &self.at_end {
            debug!(at_end = %name, "running");
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (at_end.func)(self)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(ExecutionError::from_error(name, &err)),
                Err(payload) => Some(ExecutionError::from_panic(name, payload)),
            };
            if let Some(err) = failure {
                error!(at_end = %name, trace = %err.trace, "{err}");
                failures.push(err);
            }
        }
        Ok(failures)
    }

    /// Fire-and-forget end-of-run notification.
    fn notify(&mut self, summary: &RunSummary, args: &RunArgs) {
        if self.dispatcher.is_empty() {
            debug!("no notification channel configured");
            return;
        }
        let report = RunReport::new(
            &self.script,
            summary.executed,
            summary.elapsed.as_secs_f64(),
            summary.failure_count(),
        );
        let notification = match report.to_notification(DEFAULT_SUMMARY_TEMPLATE) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "could not render run notification");
                return;
            }
        };

        let delay = args.notify_delay.unwrap_or(self.config.notifications.delay);
        let delay = Duration::try_from_secs_f64(delay).unwrap_or_default();
        if let Some(handle) = self.dispatcher.send_detached(notification, delay) {
            self.notifications.push(handle);
        }
    }

    fn write_batch(
        &self,
        requested: &IndexSet<String>,
        time: Option<&str>,
        memory: Option<f64>,
        partition: Option<&str>,
        no_submit: bool,
    ) -> Result<RunOutcome, FlowError> {
        let blocks: Vec<String> = requested.iter().cloned().collect();
        let executable = std::env::current_exe()?;
        let executable = executable.display().to_string();
        let time = time.unwrap_or(&self.config.slurm.time);

        let job = BatchJob {
            script: &self.script,
            executable: &executable,
            blocks: &blocks,
            time,
            memory: memory.unwrap_or(self.config.slurm.memory),
            partition: partition.unwrap_or(&self.config.slurm.partition),
        };
        let hours = slurm::wall_time(time)?;
        let (sbatch, lookup, text) = slurm::create_batch(&self.dirpath, &job)?;
        terminal::slurm_message(&sbatch, &text, hours, blocks.len())?;

        let submitted = !no_submit && self.prompt.confirm_submit(&sbatch)?;
        if submitted {
            slurm::submit(&sbatch)?;
        }
        terminal::slurm_submitted(submitted)?;

        Ok(RunOutcome::BatchScript {
            sbatch,
            lookup,
            jobs: blocks.len(),
        })
    }
}

/// The status line is best effort: a closed or broken stdout never stops
/// dispatch.
fn report_finished(out: &mut impl Write, position: usize, total: usize, name: &str, success: bool) {
    if let Err(e) = terminal::block_finished(out, position, total, name, success) {
        warn!(block = %name, error = %e, "could not report block on the terminal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn broken_terminal_does_not_stop_reporting() {
        assert!(terminal::block_finished(&mut ClosedPipe, 1, 3, "A", true).is_err());
        report_finished(&mut ClosedPipe, 1, 3, "A", true);
        report_finished(&mut ClosedPipe, 2, 3, "B", false);
    }
}
