use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crossterm::{
    execute,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};

use crate::types::RunSummary;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const NOTICE: Color = Color::Yellow;
    const PASS: Color = Color::Green;
    const FAIL: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
}

/// Asks before destructive or outward-facing steps.
pub trait ConfirmDelete {
    /// Approve deletion of the listed files.
    fn confirm_delete(&self, paths: &[PathBuf]) -> io::Result<bool>;

    /// Approve submitting a generated batch script.
    fn confirm_submit(&self, _sbatch: &Path) -> io::Result<bool> {
        Ok(false)
    }
}

/// Interactive yes/no prompt on stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn ask(question: &str) -> io::Result<bool> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::NOTICE),
            SetAttribute(Attribute::Bold),
            Print(question),
            SetAttribute(Attribute::Reset),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim() == "y")
    }
}

impl ConfirmDelete for TerminalPrompt {
    fn confirm_delete(&self, paths: &[PathBuf]) -> io::Result<bool> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::NOTICE),
            SetAttribute(Attribute::Bold),
            Print("The following cached data will be deleted:\n"),
            SetAttribute(Attribute::Reset),
            ResetColor,
        )?;
        for path in paths {
            execute!(stdout, Print(format!("{}\n", path.display())))?;
        }
        execute!(stdout, Print("\n"))?;

        let answer = Self::ask("Continue with job? (y/n) ")?;
        execute!(stdout, Print("\n"))?;
        Ok(answer)
    }

    fn confirm_submit(&self, _sbatch: &Path) -> io::Result<bool> {
        Self::ask("\nSubmit Slurm job? (y/n) ")
    }
}

/// Fixed answer, for `--force` and tests.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl ConfirmDelete for AutoConfirm {
    fn confirm_delete(&self, _paths: &[PathBuf]) -> io::Result<bool> {
        Ok(self.0)
    }

    fn confirm_submit(&self, _sbatch: &Path) -> io::Result<bool> {
        Ok(self.0)
    }
}

/// One row of the `display` listing.
#[derive(Debug, Clone)]
pub struct Listing<'a> {
    pub name: &'a str,
    pub doc: Option<&'a str>,
    /// Instance labels, for families.
    pub instances: Option<Vec<&'a str>>,
    pub gathered: &'a [String],
}

fn headline(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    execute!(
        stdout,
        SetForegroundColor(Colors::NOTICE),
        SetAttribute(Attribute::Bold),
        Print(text),
        SetAttribute(Attribute::Reset),
        ResetColor,
    )?;
    stdout.flush()
}

fn notice(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    execute!(
        stdout,
        SetForegroundColor(Colors::NOTICE),
        Print(text),
        ResetColor,
    )?;
    stdout.flush()
}

pub fn abort_message() -> io::Result<()> {
    headline("Aborting...\n")
}

pub fn at_end_message() -> io::Result<()> {
    notice("Running at-end functions\n")
}

pub fn run_message(jobs: usize, workers: usize) -> io::Result<()> {
    notice("Running cached functions")?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        SetForegroundColor(Colors::DIM),
        Print(format!(" ({jobs} blocks, {workers} workers)\n")),
        ResetColor,
    )?;
    stdout.flush()
}

/// `(3/10) sweep-a  PASS`
pub fn block_finished(
    out: &mut impl Write,
    position: usize,
    total: usize,
    name: &str,
    success: bool,
) -> io::Result<()> {
    let (color, word) = if success {
        (Colors::PASS, "PASS")
    } else {
        (Colors::FAIL, "FAIL")
    };
    execute!(
        out,
        SetForegroundColor(color),
        Print(format!("({position}/{total}) {name}  ")),
        SetAttribute(Attribute::Bold),
        Print(word),
        SetAttribute(Attribute::Reset),
        ResetColor,
        Print("\n"),
    )?;
    out.flush()
}

pub fn summary_line(executed: usize, failures: usize) -> String {
    let runs = if executed == 1 { "run" } else { "runs" };
    let fails = if failures == 1 { "failure" } else { "failures" };
    format!("{executed} {runs}, {failures} {fails}")
}

pub fn summary_message(summary: &RunSummary) -> io::Result<()> {
    notice("\nExecution summary\n")?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        Print(format!(
            "    {}\n",
            summary_line(summary.executed, summary.failure_count())
        )),
    )?;
    if !summary.blocked.is_empty() {
        execute!(
            stdout,
            SetForegroundColor(Colors::FAIL),
            Print(format!(
                "    blocked by failed dependencies: {}\n",
                summary.blocked.join(", ")
            )),
            ResetColor,
        )?;
    }
    execute!(stdout, Print("\n"))?;
    stdout.flush()
}

pub fn display_message(
    blocks: &[Listing<'_>],
    families: &[Listing<'_>],
    at_end: &[Listing<'_>],
) -> io::Result<()> {
    headline("cached functions:\n")?;
    let mut stdout = io::stdout();
    for entry in blocks.iter().chain(families) {
        execute!(
            stdout,
            Print("    "),
            SetForegroundColor(Colors::NOTICE),
            Print(entry.name),
            ResetColor,
            Print(format!(" -- {}\n", entry.doc.unwrap_or(""))),
        )?;
        if let Some(instances) = &entry.instances {
            execute!(
                stdout,
                Print(format!(
                    "      [{} instances] {}\n",
                    instances.len(),
                    instances.join(" ")
                )),
            )?;
        }
        if !entry.gathered.is_empty() {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print(format!("      gather: {}\n", entry.gathered.join(", "))),
                ResetColor,
            )?;
        }
    }

    headline("\nat-end functions:\n")?;
    for entry in at_end {
        execute!(
            stdout,
            Print("    "),
            SetForegroundColor(Colors::NOTICE),
            Print(entry.name),
            ResetColor,
            Print(format!(" -- {}\n", entry.doc.unwrap_or(""))),
        )?;
    }
    stdout.flush()
}

pub fn slurm_message(
    sbatch: &Path,
    script_text: &str,
    wall_time_hours: f64,
    jobs: usize,
) -> io::Result<()> {
    headline("sbatch file\n")?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        SetForegroundColor(Colors::DIM),
        Print(format!("{}\n", sbatch.display())),
        ResetColor,
        Print(script_text),
    )?;
    headline("\nSlurm job\n")?;
    execute!(
        stdout,
        Print(format!("    Number of tasks: {jobs}\n")),
        Print(format!("    Max wall-time: {wall_time_hours:.2} hours\n")),
        Print(format!(
            "    Max CPU-hour usage: {:.2} hours\n",
            jobs as f64 * wall_time_hours
        )),
    )?;
    stdout.flush()
}

pub fn slurm_submitted(submitted: bool) -> io::Result<()> {
    if submitted {
        headline("\nSlurm job submitted\n")
    } else {
        headline("\nNot submitting Slurm job\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_pluralises() {
        assert_eq!(summary_line(1, 0), "1 run, 0 failures");
        assert_eq!(summary_line(3, 1), "3 runs, 1 failure");
    }

    #[test]
    fn finished_line_names_block_and_outcome() {
        let mut out = Vec::new();
        block_finished(&mut out, 3, 10, "sweep-a", false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("(3/10) sweep-a"));
        assert!(text.contains("FAIL"));
    }

    #[test]
    fn auto_confirm_answers_both_questions() {
        let yes = AutoConfirm(true);
        assert!(yes.confirm_delete(&[PathBuf::from("a.rec")]).unwrap());
        assert!(yes.confirm_submit(Path::new("x.sbatch")).unwrap());
        assert!(!AutoConfirm(false).confirm_delete(&[]).unwrap());
    }
}
