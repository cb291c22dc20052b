//! Colored terminal rendering of supervisor events.
//!
//! This module is the console sink used by the binary: it prints classified
//! output in category colors and reports lifecycle changes.

use std::io::{self, Write};

use chrono::{DateTime, Local, Utc};
use owo_colors::OwoColorize;

use crate::console::{ClassifiedLine, LineOrigin, OutputCategory};
use crate::supervisor::{ShutdownOutcome, SupervisorEvent, SupervisorState};

/// Format a timestamp for the console gutter.
fn timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Paint text in the color for its category.
#[must_use]
pub fn paint(text: &str, category: OutputCategory) -> String {
    match category {
        OutputCategory::Error => text.red().to_string(),
        OutputCategory::Warning => text.yellow().to_string(),
        OutputCategory::Info => text.cyan().to_string(),
        OutputCategory::PlayerJoin => text.bright_green().to_string(),
        OutputCategory::PlayerLeave => text.truecolor(255, 165, 0).to_string(),
        OutputCategory::Normal => text.to_string(),
    }
}

/// Render one line for the terminal.
///
/// Output read from the server is passed through as-is, since chunks carry
/// their own line breaks. Echoes and notices are single lines.
#[must_use]
pub fn format_line(line: &ClassifiedLine, raw_mode: bool) -> String {
    if raw_mode {
        return match line.origin {
            LineOrigin::Stdout | LineOrigin::Stderr => line.text.clone(),
            LineOrigin::Echo | LineOrigin::Supervisor => format!("{}\n", line.text),
        };
    }

    match line.origin {
        LineOrigin::Stdout | LineOrigin::Stderr => paint(&line.text, line.category),
        LineOrigin::Echo => format!("{}\n", line.text.cyan()),
        LineOrigin::Supervisor => {
            let text = match line.category {
                OutputCategory::Info => line.text.green().to_string(),
                category => paint(&line.text, category),
            };
            format!(
                "{} {} {}\n",
                timestamp(line.received_at).dimmed(),
                "[CONSOLE]".blue().bold(),
                text
            )
        }
    }
}

/// Print a classified line.
pub fn print_line(line: &ClassifiedLine, raw_mode: bool) {
    print!("{}", format_line(line, raw_mode));
    let _ = io::stdout().flush();
}

/// Print a state transition.
pub fn print_state_change(from: SupervisorState, to: SupervisorState) {
    tracing::debug!(%from, %to, "Rendering state change");
    let label = match to {
        SupervisorState::Running => to.to_string().green().to_string(),
        SupervisorState::Crashed => to.to_string().red().bold().to_string(),
        SupervisorState::Stopping => to.to_string().yellow().to_string(),
        SupervisorState::Starting | SupervisorState::Stopped => to.to_string(),
    };
    eprintln!("{} {} -> {}", "[STATE]".magenta().bold(), from, label);
}

/// Print the outcome of a shutdown.
pub fn print_shutdown_outcome(outcome: ShutdownOutcome) {
    if outcome.forced {
        eprintln!(
            "{} {}",
            "[SHUTDOWN]".magenta().bold(),
            "server did not stop in time and was killed".red()
        );
    } else {
        eprintln!("{} {}", "[SHUTDOWN]".magenta().bold(), "clean".green());
    }
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}

/// Print an event as a single JSON line.
pub fn print_json(event: &SupervisorEvent) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
    }
    let _ = io::stdout().flush();
}

/// Render any supervisor event.
pub fn print_event(event: &SupervisorEvent, raw_mode: bool) {
    match event {
        SupervisorEvent::Output(line) => print_line(line, raw_mode),
        SupervisorEvent::StateChanged { from, to } => print_state_change(*from, *to),
        SupervisorEvent::Exited { code, expected } => {
            tracing::debug!(?code, expected, "Server exit rendered");
        }
    }
}
