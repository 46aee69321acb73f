// Output formatting and display for CLI

use crate::process::{DetailedReport, DetailedStatus, ProcessStatus};
use chrono::{DateTime, Local, Utc};
use colored::*;
use std::collections::BTreeMap;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print the name → status map
pub fn print_status_table(status: &BTreeMap<String, ProcessStatus>) {
    if status.is_empty() {
        println!("{}", "No processes are supervised".yellow());
        return;
    }

    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Status")]
        status: String,
    }

    let rows: Vec<StatusRow> = status
        .iter()
        .map(|(name, status)| StatusRow {
            name: truncate(name, 30),
            status: format_status_colored(*status),
        })
        .collect();

    print_table(Table::new(rows), status.len());
}

/// Print the detailed report, one row per process
pub fn print_detailed_table(report: &DetailedReport) {
    println!(
        "\n{} {}",
        "Monitor uptime:".bold(),
        format_duration(&Duration::from_secs(report.monitor_uptime_secs))
    );

    if report.processes.is_empty() {
        println!("{}", "No processes are supervised".yellow());
        return;
    }

    let rows: Vec<DetailedRow> = report
        .processes
        .iter()
        .map(|(name, details)| DetailedRow::new(name, details, Utc::now()))
        .collect();

    print_table(Table::new(rows), report.processes.len());
}

#[derive(Tabled)]
struct DetailedRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Uptime")]
    uptime: String,
    #[tabled(rename = "Restarts")]
    restarts: String,
    #[tabled(rename = "Last Check")]
    last_check: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

impl DetailedRow {
    fn new(name: &str, details: &DetailedStatus, now: DateTime<Utc>) -> Self {
        let live = details.status.has_live_process();
        Self {
            name: truncate(name, 20),
            status: format_status_colored(details.status),
            pid: details
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            cpu: format!("{:.1}%", details.cpu_percent),
            memory: format_memory(details.memory_mb),
            uptime: match details.start_time {
                Some(started) if live => {
                    format_duration(&(now - started).to_std().unwrap_or_default())
                }
                _ => "-".to_string(),
            },
            restarts: details.restart_count.to_string(),
            last_check: details
                .last_health_check
                .map(|at| {
                    let local: DateTime<Local> = at.into();
                    local.format("%H:%M:%S").to_string()
                })
                .unwrap_or_else(|| "-".to_string()),
            enabled: if details.enabled {
                "yes".green().to_string()
            } else {
                "no".bright_black().to_string()
            },
            last_error: details
                .last_error
                .as_deref()
                .map(|e| truncate(e, 40))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn print_table(mut table: Table, count: usize) {
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} process(es)", count).dimmed().italic()
    );
}

/// Format a process status with color coding
fn format_status_colored(status: ProcessStatus) -> String {
    match status {
        ProcessStatus::Running => status.to_string().green().to_string(),
        ProcessStatus::Starting => status.to_string().yellow().to_string(),
        ProcessStatus::Restarting => status.to_string().yellow().to_string(),
        ProcessStatus::Unhealthy => status.to_string().red().to_string(),
        ProcessStatus::Stopped => status.to_string().bright_black().to_string(),
        ProcessStatus::Failed => status.to_string().red().bold().to_string(),
    }
}

/// Two most significant units, e.g. `1h 5m`
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();
    let ((major, major_unit), (minor, minor_unit)) = match secs {
        0..=59 => return format!("{}s", secs),
        60..=3599 => ((secs / 60, "m"), (secs % 60, "s")),
        3600..=86399 => ((secs / 3600, "h"), (secs % 3600 / 60, "m")),
        _ => ((secs / 86400, "d"), (secs % 86400 / 3600, "h")),
    };

    if minor > 0 {
        format!("{}{} {}{}", major, major_unit, minor, minor_unit)
    } else {
        format!("{}{}", major, major_unit)
    }
}

/// Memory is sampled in whole megabytes
fn format_memory(mb: u64) -> String {
    if mb < 1024 {
        format!("{}MB", mb)
    } else {
        format!("{:.2}GB", mb as f64 / 1024.0)
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
