//! Progress reporting for long block loops.
//!
//! A [`ProgressBoard`] is created per run and shared with every worker
//! through an `Arc`. Each [`Progress`] iterator claims a position on the
//! board and writes one status line per update, so lines from concurrent
//! blocks never interleave.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};

const BAR_WIDTH: usize = 30;

#[derive(Debug, Default)]
struct BoardState {
    next_position: usize,
    updates: usize,
}

/// Run-wide bookkeeping for progress positions.
#[derive(Debug)]
pub struct ProgressBoard {
    mininterval: Duration,
    visible: bool,
    state: Mutex<BoardState>,
}

impl ProgressBoard {
    pub fn new(mininterval: Duration) -> Self {
        Self {
            mininterval,
            visible: true,
            state: Mutex::new(BoardState::default()),
        }
    }

    /// A board that counts updates without writing to the terminal.
    pub fn hidden() -> Self {
        Self {
            mininterval: Duration::ZERO,
            visible: false,
            state: Mutex::new(BoardState::default()),
        }
    }

    pub fn mininterval(&self) -> Duration {
        self.mininterval
    }

    /// Total status lines emitted so far.
    pub fn updates(&self) -> usize {
        self.state.lock().map(|s| s.updates).unwrap_or(0)
    }

    fn claim_position(&self) -> usize {
        match self.state.lock() {
            Ok(mut state) => {
                let position = state.next_position;
                state.next_position += 1;
                position
            }
            Err(_) => 0,
        }
    }

    fn emit(&self, position: usize, line: &str, finished: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.updates += 1;
        tracing::trace!(position, "{line}");

        if self.visible {
            let color = if finished { Color::Green } else { Color::DarkGrey };
            let mut stderr = io::stderr();
            // Written under the board lock so concurrent lines stay whole.
            let _ = execute!(
                stderr,
                SetForegroundColor(color),
                Print(format!("[{position}] {line}\n")),
                ResetColor,
            );
            let _ = stderr.flush();
        }
    }
}

/// Iterator adapter that reports rate and time remaining on a board.
pub struct Progress<I> {
    iter: I,
    board: Arc<ProgressBoard>,
    position: usize,
    desc: String,
    total: usize,
    count: usize,
    start: Instant,
    last_emit: Instant,
}

impl<I: ExactSizeIterator> Progress<I> {
    pub fn new(iter: I, desc: impl Into<String>, board: Arc<ProgressBoard>) -> Self {
        let position = board.claim_position();
        let now = Instant::now();
        Self {
            total: iter.len(),
            iter,
            board,
            position,
            desc: desc.into(),
            count: 0,
            start: now,
            last_emit: now,
        }
    }
}

impl<I> Progress<I> {
    pub fn count(&self) -> usize {
        self.count
    }

    fn report(&mut self) {
        let line = render_line(&self.desc, self.count, self.total, self.start.elapsed());
        self.board.emit(self.position, &line, self.count == self.total);
        self.last_emit = Instant::now();
    }
}

impl<I: Iterator> Iterator for Progress<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let item = self.iter.next()?;
        self.count += 1;
        if self.count == self.total || self.last_emit.elapsed() >= self.board.mininterval {
            self.report();
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

/// `mm:ss`, or `h:mm:ss` past one hour.
pub fn format_seconds(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// `desc:  40%|############                  | 4/10 [00:02<00:03, 2.00it/s]`
pub fn render_line(desc: &str, count: usize, total: usize, elapsed: Duration) -> String {
    let fraction = if total == 0 { 1.0 } else { count as f64 / total as f64 };
    let filled = ((fraction * BAR_WIDTH as f64) as usize).min(BAR_WIDTH);
    let bar = format!("{}{}", "#".repeat(filled), " ".repeat(BAR_WIDTH - filled));

    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { count as f64 / secs } else { 0.0 };
    let left = if rate > 0.0 {
        format_seconds(total.saturating_sub(count) as f64 / rate)
    } else {
        "?".to_string()
    };
    let rate_str = if rate >= 1.0 || rate == 0.0 {
        format!("{rate:.2}it/s")
    } else {
        format!("{:.2}s/it", 1.0 / rate)
    };

    format!(
        "{desc}: {:>3}%|{bar}| {count}/{total} [{}<{left}, {rate_str}]",
        (fraction * 100.0).round() as u32,
        format_seconds(secs),
    )
}
