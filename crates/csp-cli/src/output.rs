// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI output formatting with colors and styling.
//!
//! Respects NO_COLOR and FORCE_COLOR environment variables.
//! Colors are automatically disabled when output is piped.

use colored::{ColoredString, Colorize};

/// Initialize color support based on environment.
/// Call once at startup.
pub fn init() {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

pub fn heading(title: &str) -> String {
    format!("{} {} {}", "===".dimmed(), title.bold(), "===".dimmed())
}

pub fn key(name: &str) -> ColoredString {
    format!("{:>12}", name).cyan()
}

pub fn value(v: impl std::fmt::Display) -> ColoredString {
    v.to_string().bold()
}

pub fn status_ok() -> ColoredString {
    "✓".green()
}

pub fn dropped(v: impl std::fmt::Display) -> ColoredString {
    v.to_string().yellow().strikethrough()
}

/// Horizontal bar `width` cells wide, filled to `fraction`.
pub fn bar(fraction: f64, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!(
        "{}{}",
        "█".repeat(filled).green(),
        "░".repeat(width - filled).dimmed()
    )
}

pub fn stats_line(stats: &csp_rt::PoolStats) -> String {
    format!(
        "{} workers={} spawned={} completed={} cancelled={} panicked={}",
        "pool".dimmed(),
        stats.workers,
        stats.spawned,
        stats.completed,
        stats.cancelled,
        stats.panicked
    )
}
