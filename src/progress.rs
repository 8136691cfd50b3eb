//! Progress indicators for the tierform CLI

use colored::Colorize;
use declarative::{Address, ApplyResult, ProgressCallback};
use hostboot::{Step, StepObserver, StepStatus};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";

fn bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn result_symbol(result: &ApplyResult) -> colored::ColoredString {
    match result {
        ApplyResult::Created | ApplyResult::Modified | ApplyResult::Replaced => "✓".green(),
        ApplyResult::Removed => "-".red(),
        ApplyResult::Failed { .. } => "✗".red(),
        ApplyResult::Skipped { .. } => "⊘".dimmed(),
    }
}

/// Plan execution progress: one bar across all actions, one line per result
pub struct ApplyProgress {
    pb: ProgressBar,
    quiet: bool,
}

impl ApplyProgress {
    pub fn new(total: usize, quiet: bool) -> Self {
        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            bar(total as u64)
        };
        Self { pb, quiet }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_level_start(&mut self, level: usize, count: usize) {
        log::debug!("Level {level}: {count} actions");
        // Undrawn until the confirmation prompt has been answered
        if !self.quiet {
            self.pb.enable_steady_tick(Duration::from_millis(120));
        }
    }

    fn on_action_start(&mut self, address: &Address, description: &str) {
        self.pb.set_message(format!("{description} {address}"));
    }

    fn on_action_complete(&mut self, address: &Address, result: &ApplyResult) {
        self.pb.inc(1);
        if self.quiet {
            return;
        }
        let detail = match result {
            ApplyResult::Created => "created".to_string(),
            ApplyResult::Modified => "updated".to_string(),
            ApplyResult::Replaced => "replaced".to_string(),
            ApplyResult::Removed => "destroyed".to_string(),
            ApplyResult::Failed { error } => error.red().to_string(),
            ApplyResult::Skipped { reason } => reason.dimmed().to_string(),
        };
        self.pb.suspend(|| {
            println!("  {} {} {}", result_symbol(result), address, detail);
        });
    }

    fn on_level_complete(&mut self) {}
}

/// Bootstrap step progress: a numbered line per step, a spinner while it runs
#[derive(Default)]
pub struct BootProgress {
    current: Option<ProgressBar>,
}

impl BootProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepObserver for BootProgress {
    fn on_step_start(&mut self, index: usize, total: usize, step: &Step) {
        let label = format!("[{}/{}]", index + 1, total).blue().bold();
        self.current = Some(spinner(&format!("{label} {}", step.description)));
    }

    fn on_step_complete(&mut self, step: &Step, status: &StepStatus) {
        if let Some(pb) = self.current.take() {
            pb.finish_and_clear();
        }
        match status {
            StepStatus::Completed { note } => println!(
                "  {} {}{}",
                "✓".green(),
                step.description,
                note.as_deref()
                    .map(|n| format!(" ({n})").dimmed().to_string())
                    .unwrap_or_default()
            ),
            StepStatus::Tolerated { message } => println!(
                "  {} {} {}",
                "⚠".yellow(),
                step.description,
                format!("(ignored: {message})").dimmed()
            ),
            StepStatus::Failed { message } => {
                println!("  {} {} {}", "✗".red(), step.description, message.red());
            }
        }
    }
}
