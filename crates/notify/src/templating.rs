//! Minijinja rendering of the end-of-run summary.
//!
//! Templates are arbitrary strings, so a fresh [`minijinja::Environment`]
//! is created per render call.

use std::collections::HashMap;

use crate::traits::{Notification, NotifyError};

/// Default body: a fixed-width block shown as code in chat clients.
pub const DEFAULT_SUMMARY_TEMPLATE: &str = "`Simulation finished:
    filename___{{ script }}
    status_____{{ status }}
    host_______{{ host }}
    njobs______{{ jobs }}
    runtime____{{ elapsed_secs | duration }}
    date_______{{ date }}`
";

/// Facts about one finished run, exposed to templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunReport {
    pub script: String,
    pub jobs: usize,
    pub failures: usize,
    pub elapsed_secs: f64,
    pub host: String,
    pub date: String,
    /// `"success"` or `"{failures}/{jobs} failures"`.
    pub status: String,
}

impl RunReport {
    pub fn new(script: &str, jobs: usize, elapsed_secs: f64, failures: usize) -> Self {
        let status = if failures > 0 {
            format!("{failures}/{jobs} failures")
        } else {
            "success".to_string()
        };
        Self {
            script: script.to_string(),
            jobs,
            failures,
            elapsed_secs,
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            date: chrono::Local::now().format("%H:%M %d-%m-%Y").to_string(),
            status,
        }
    }

    /// Render into a deliverable notification.
    pub fn to_notification(&self, template: &str) -> Result<Notification, NotifyError> {
        let body = render(template, self)?;
        Ok(Notification {
            subject: format!("{} finished ({})", self.script, self.status),
            body,
            metadata: HashMap::from([
                ("script".to_string(), self.script.clone()),
                ("failures".to_string(), self.failures.to_string()),
            ]),
        })
    }
}

fn build_env() -> minijinja::Environment<'static> {
    let mut env = minijinja::Environment::new();
    env.add_filter("duration", duration_filter);
    env
}

/// Render a template string against a run report.
pub fn render(template_str: &str, report: &RunReport) -> Result<String, NotifyError> {
    build_env()
        .render_str(template_str, report)
        .map_err(|e| NotifyError::Template(e.to_string()))
}

fn duration_filter(secs: f64) -> String {
    format_duration(secs)
}

/// Human-readable run time: `"1 hr 2 mins"`, `"5 mins 3 secs"`, `"42 secs"`.
///
/// Seconds are dropped once both hours and minutes are shown.
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours} {}", if hours == 1 { "hr" } else { "hrs" }));
    }
    if minutes > 0 {
        parts.push(format!("{minutes} {}", if minutes == 1 { "min" } else { "mins" }));
    }
    if !(hours > 0 && minutes > 0) {
        parts.push(format!("{seconds} {}", if seconds == 1 { "sec" } else { "secs" }));
    }
    parts.join(" ")
}
