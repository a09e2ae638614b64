//! Batch-script generation for running the selected blocks on a Slurm
//! cluster, one task per block.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use blockflow_core::FlowError;
use tracing::info;

const SBATCH_TEMPLATE: &str = r#"#!/bin/sh

#SBATCH --job-name={{ script }}
#SBATCH --partition={{ partition }}
#SBATCH --ntasks={{ ntasks }}
#SBATCH --time={{ time }}
#SBATCH --mem-per-cpu={{ mem_in_mb }}

ulimit -u 10000
srun="srun --exclusive -N1 -n1"
parallel="parallel --delay .2 -j $SLURM_NTASKS --joblog {{ joblog }} --resume"

$parallel "$srun {{ executable }} -r {1} -p 1 --no-deps --force --no-at-end --mininterval 60000 > {{ output_dir }}/out_{1}.txt 2> {{ output_dir }}/out_{1}.err" :::: {{ lookup }}
"#;

/// Batch job parameters.
#[derive(Debug, Clone)]
pub struct BatchJob<'a> {
    pub script: &'a str,
    pub executable: &'a str,
    pub blocks: &'a [String],
    /// `{hours}:{minutes}:{seconds}`, any part may be omitted.
    pub time: &'a str,
    /// Memory per CPU in GB.
    pub memory: f64,
    pub partition: &'a str,
}

/// Normalise a run-time string to `HH:MM:SS`.
///
/// `15` -> `15:00:00`, `2:30:5` -> `02:30:05`, `:30` -> `00:30:00`,
/// `::30` -> `00:00:30`.
pub fn format_time(time: &str) -> String {
    let mut parts = time.split(':');
    let mut field = || format!("{:0>2}", parts.next().unwrap_or(""));
    let (hours, minutes, seconds) = (field(), field(), field());
    format!("{hours}:{minutes}:{seconds}")
}

/// Wall time in hours for a run-time string.
pub fn wall_time(time: &str) -> Result<f64, FlowError> {
    let invalid = || FlowError::Config(format!("invalid run-time '{time}'"));
    let mut hours = 0.0;
    for (part, scale) in time.split(':').zip([1.0, 60.0, 3600.0]) {
        if part.is_empty() {
            continue;
        }
        let value: u64 = part.trim().parse().map_err(|_| invalid())?;
        hours += value as f64 / scale;
    }
    if time.split(':').count() > 3 {
        return Err(invalid());
    }
    Ok(hours)
}

/// Write `{script}-lookup.txt`, one block name per line.
pub fn write_lookup(dir: &Path, script: &str, blocks: &[String]) -> Result<PathBuf, FlowError> {
    let path = dir.join(format!("{script}-lookup.txt"));
    let mut content = blocks.join("\n");
    content.push('\n');
    fs::write(&path, content)?;
    Ok(path)
}

/// Render the sbatch script body.
pub fn render_sbatch(job: &BatchJob<'_>, lookup: &Path, output_dir: &Path) -> Result<String, FlowError> {
    let env = minijinja::Environment::new();
    let ctx = minijinja::context! {
        script => job.script,
        partition => job.partition,
        ntasks => job.blocks.len(),
        time => format_time(job.time),
        mem_in_mb => (job.memory * 1000.0) as u64,
        joblog => output_dir.join(format!("{}_runtask.log", job.script)).display().to_string(),
        executable => job.executable,
        output_dir => output_dir.display().to_string(),
        lookup => lookup.display().to_string(),
    };
    env.render_str(SBATCH_TEMPLATE, ctx)
        .map_err(|e| FlowError::Other(format!("sbatch template: {e}")))
}

/// Write the lookup file, the output directory and `{script}.sbatch`.
/// Returns `(sbatch path, lookup path, script text)`.
pub fn create_batch(dir: &Path, job: &BatchJob<'_>) -> Result<(PathBuf, PathBuf, String), FlowError> {
    let lookup = write_lookup(dir, job.script, job.blocks)?;
    let output_dir = dir.join(format!("{}_output", job.script));
    fs::create_dir_all(&output_dir)?;

    let text = render_sbatch(job, &lookup, &output_dir)?;
    let sbatch = dir.join(format!("{}.sbatch", job.script));
    fs::write(&sbatch, &text)?;
    info!(path = %sbatch.display(), tasks = job.blocks.len(), "sbatch file written");
    Ok((sbatch, lookup, text))
}

/// Hand the script to `sbatch`.
pub fn submit(sbatch: &Path) -> Result<(), FlowError> {
    let status = Command::new("sbatch").arg(sbatch).status()?;
    if !status.success() {
        return Err(FlowError::Other(format!("sbatch exited with {status}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_strings_are_padded() {
        assert_eq!(format_time("15"), "15:00:00");
        assert_eq!(format_time("2:30:5"), "02:30:05");
        assert_eq!(format_time(":30"), "00:30:00");
        assert_eq!(format_time("::30"), "00:00:30");
        assert_eq!(format_time("36"), "36:00:00");
    }

    #[test]
    fn wall_time_in_hours() {
        assert_eq!(wall_time("36").unwrap(), 36.0);
        assert_eq!(wall_time("1:30").unwrap(), 1.5);
        assert!((wall_time("0:0:36").unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(wall_time(":30").unwrap(), 0.5);
        assert!(wall_time("x").is_err());
        assert!(wall_time("1:2:3:4").is_err());
    }

    #[test]
    fn batch_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = vec!["a".to_string(), "sweep-0".to_string()];
        let job = BatchJob {
            script: "sim",
            executable: "/opt/sim",
            blocks: &blocks,
            time: "2:30",
            memory: 2.0,
            partition: "broadwl",
        };
        let (sbatch, lookup, text) = create_batch(dir.path(), &job).unwrap();

        assert_eq!(fs::read_to_string(&lookup).unwrap(), "a\nsweep-0\n");
        assert!(sbatch.ends_with("sim.sbatch"));
        assert!(text.contains("#SBATCH --ntasks=2"));
        assert!(text.contains("#SBATCH --time=02:30:00"));
        assert!(text.contains("#SBATCH --mem-per-cpu=2000"));
        assert!(text.contains("$srun /opt/sim -r {1} -p 1 --no-deps --force --no-at-end"));
        assert!(dir.path().join("sim_output").is_dir());
    }
}
