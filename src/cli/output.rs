//! CLI output formatting

use crate::{
    core::{ExecutionStatus, RunState},
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
    report::RunReport,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub use console::style;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "x ");

/// Progress bar over the steps of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Render progress and events on the console
///
/// Step lines are printed above the bar; the bar goes away when the run ends.
pub fn render_event(progress: &ProgressBar, event: &ExecutionEvent) {
    match event {
        ExecutionEvent::StepStarted { step_id, .. } => progress.set_message(step_id.clone()),
        ExecutionEvent::StepSucceeded { .. } | ExecutionEvent::StepFailed { .. } => {
            progress.inc(1);
            progress.println(format_execution_event(event));
        }
        ExecutionEvent::PipelineFinished { .. } => {
            progress.finish_and_clear();
            println!("{}", format_execution_event(event));
        }
        _ => progress.println(format_execution_event(event)),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        ExecutionStatus::Rejected => style("REJECTED").magenta().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Cancelled => STOP,
        ExecutionStatus::Running => SPINNER,
        _ => WARN,
    };

    let mut line = format!(
        "{}{} - {} - {} ({}/{}) - {}",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.completed_steps,
        summary.total_steps,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    );
    if let Some(step) = &summary.failing_step {
        line.push_str(&format!(" at {}", style(step).red()));
    }
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{}Starting pipeline {} ({}, {} steps)",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(execution_id)).dim(),
            total_steps
        ),
        ExecutionEvent::PipelineRejected { reason, .. } => {
            format!("{}Configuration rejected: {}", WARN, style(reason).magenta())
        }
        ExecutionEvent::StepStarted {
            step_id,
            step_index,
            total_steps,
        } => format!(
            "{}{} ({}/{})",
            SPINNER,
            style(step_id).cyan(),
            step_index + 1,
            total_steps
        ),
        ExecutionEvent::StepSucceeded { step_id, duration } => format!(
            "{}{} {}",
            CHECK,
            style(step_id).green(),
            style(format_duration(*duration)).dim()
        ),
        ExecutionEvent::StepFailed { step_id, cause, fatal } => {
            let suffix = if *fatal { "" } else { " (not fatal, continuing)" };
            format!(
                "{}{}: {}{}",
                CROSS,
                style(step_id).red(),
                style(cause).dim(),
                suffix
            )
        }
        ExecutionEvent::StepCancelled { step_id } => {
            format!("{}{} cancelled", STOP, style(step_id).yellow())
        }
        ExecutionEvent::PipelineFinished { execution_id, state } => {
            let status_str = match state {
                RunState::Succeeded => format!("completed {}", style("successfully").green()),
                RunState::Failed { step_id, .. } => {
                    format!("{} at step {}", style("failed").red(), style(step_id).bold())
                }
                RunState::Cancelled { .. } => style("was cancelled").yellow().to_string(),
                RunState::Rejected { .. } => style("was rejected").magenta().to_string(),
                other => format!("ended in {}", other.status()),
            };
            format!(
                "{}Pipeline ({}) {}",
                INFO,
                style(short_id(execution_id)).dim(),
                status_str
            )
        }
    }
}

/// Last lines of a failing step's output, for the final summary
pub fn format_failure_output(report: &RunReport, max_lines: usize) -> Option<String> {
    let step = report.failing_step.as_ref()?;
    let log = report.steps.iter().find(|s| &s.step_id == step)?;
    let text = if log.stderr.text.trim().is_empty() {
        &log.stdout.text
    } else {
        &log.stderr.text
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(format_output(text, max_lines))
}

/// Keep only the last `max_lines` lines of output
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.trim_end().to_string()
    } else {
        format!(
            "{}\n{}",
            style(format!("... ({} earlier lines)", lines.len() - max_lines)).dim(),
            lines[lines.len() - max_lines..].join("\n")
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
