use clap::{Parser, Subcommand};

/// Run the cached functions of this script.
///
/// With no flags, only blocks without complete output run.
#[derive(Parser, Debug, Clone, Default)]
#[command(about = "Run, rerun or inspect the cached functions of this script")]
pub struct RunArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Rerun the named blocks or families (everything when no names are given)
    #[arg(short, long, num_args = 0.., value_name = "NAME", conflicts_with = "delete", global = true)]
    pub rerun: Option<Vec<String>>,

    /// Delete output of the named blocks or families (all when no names are given)
    #[arg(short, long, num_args = 0.., value_name = "NAME", global = true)]
    pub delete: Option<Vec<String>>,

    /// Leave these blocks or families out of the run
    #[arg(short, long, num_args = 1.., value_name = "NAME", global = true)]
    pub exclude: Vec<String>,

    /// Overwrite or delete without asking
    #[arg(short, long, global = true)]
    pub force: bool,

    /// Only run the at-end functions
    #[arg(long, conflicts_with = "no_at_end", global = true)]
    pub at_end: bool,

    /// Skip the at-end functions
    #[arg(long, global = true)]
    pub no_at_end: bool,

    /// Worker count (default: available parallelism)
    #[arg(short, long, global = true)]
    pub processes: Option<usize>,

    /// Seconds between forced streaming cache flushes
    #[arg(long, alias = "cache_time", value_name = "SECONDS", global = true)]
    pub cache_time: Option<f64>,

    /// Do not rerun dependents of the rerun blocks
    #[arg(long, global = true)]
    pub no_deps: bool,

    /// Run blocks one at a time on this thread
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimum interval between progress updates, in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    pub mininterval: Option<u64>,

    /// Seconds to wait before sending the end-of-run notification
    #[arg(long, value_name = "SECONDS", global = true)]
    pub notify_delay: Option<f64>,

    /// Fixed random seed (default: OS entropy per block)
    #[arg(long, global = true)]
    pub seed: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List cached functions, instance families and at-end functions
    Display,
    /// Delete record files that no longer belong to any cached function
    Clean,
    /// Write a Slurm batch script for the selected blocks instead of running them
    Slurm {
        /// Maximum run-time, {hours}:{minutes}:{seconds}
        #[arg(short, long)]
        time: Option<String>,
        /// Memory per CPU in GB
        #[arg(short, long)]
        memory: Option<f64>,
        #[arg(long)]
        partition: Option<String>,
        /// Write the script without offering to submit it
        #[arg(long)]
        no_submit: bool,
    },
}

impl RunArgs {
    /// Names given to `--rerun`, when some were given.
    pub fn rerun_names(&self) -> Option<&[String]> {
        self.rerun.as_deref().filter(|names| !names.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_rerun_means_everything() {
        let args = RunArgs::parse_from(["sim", "-r"]);
        assert_eq!(args.rerun, Some(vec![]));
        assert!(args.rerun_names().is_none());

        let args = RunArgs::parse_from(["sim"]);
        assert_eq!(args.rerun, None);
    }

    #[test]
    fn named_rerun_and_exclude() {
        let args = RunArgs::parse_from(["sim", "--rerun", "a", "sweep", "-e", "sweep-2", "--no-deps"]);
        assert_eq!(args.rerun_names().unwrap(), ["a", "sweep"]);
        assert_eq!(args.exclude, vec!["sweep-2"]);
        assert!(args.no_deps);
    }

    #[test]
    fn underscore_cache_time_alias() {
        let args = RunArgs::parse_from(["sim", "--cache_time", "30"]);
        assert_eq!(args.cache_time, Some(30.0));
        let args = RunArgs::parse_from(["sim", "--cache-time", "5"]);
        assert_eq!(args.cache_time, Some(5.0));
    }

    #[test]
    fn subcommands() {
        let args = RunArgs::parse_from(["sim", "slurm", "-t", "2:30", "--no-submit"]);
        assert_eq!(
            args.command,
            Some(Command::Slurm {
                time: Some("2:30".into()),
                memory: None,
                partition: None,
                no_submit: true,
            })
        );
        assert_eq!(RunArgs::parse_from(["sim", "display"]).command, Some(Command::Display));
    }

    #[test]
    fn run_flags_follow_the_subcommand() {
        let args = RunArgs::parse_from(["sim", "slurm", "-r", "sweep", "-f", "-p", "2", "-m", "3"]);
        assert_eq!(args.rerun_names().unwrap(), ["sweep"]);
        assert!(args.force);
        assert_eq!(args.processes, Some(2));
        assert!(matches!(args.command, Some(Command::Slurm { memory: Some(m), .. }) if m == 3.0));

        let args = RunArgs::parse_from(["sim", "display", "--no-deps"]);
        assert!(args.no_deps);
    }

    #[test]
    fn rerun_conflicts_with_delete() {
        assert!(RunArgs::try_parse_from(["sim", "-r", "a", "-d", "b"]).is_err());
    }
}
