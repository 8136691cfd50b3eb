//! Plan display

use crate::ui;
use colored::{ColoredString, Colorize};
use declarative::{Action, FieldChange, Plan, PlannedValue, display_value};
use serde_json::Value;

const RULE: &str = "─────────────────────────────────────────────────────";

/// Fields whose values never reach the terminal
const SENSITIVE: [&str; 3] = ["password", "db_password", "secret_key"];

fn is_sensitive(field: &str) -> bool {
    SENSITIVE.contains(&field)
}

/// Mask the value of a `key = value` line when the key is sensitive
pub fn redact_line(line: &str) -> String {
    match line.split_once('=') {
        Some((key, _)) if is_sensitive(key.trim()) => {
            let newline = if line.ends_with('\n') { "\n" } else { "" };
            format!("{} = (sensitive){newline}", key.trim_end())
        }
        _ => line.to_string(),
    }
}

fn symbol(action: &Action) -> ColoredString {
    let marker = action.symbol();
    match action {
        Action::Create => marker.green(),
        Action::Update { .. } | Action::Replace { .. } => marker.yellow(),
        Action::Destroy => marker.red(),
    }
}

/// Display a plan in the box layout
pub fn display_plan(plan: &Plan, verbose: bool) {
    if plan.is_empty() {
        println!();
        println!(
            "  {} No changes. Infrastructure matches the configuration.",
            "✓".green()
        );
        return;
    }

    println!();
    println!("┌─ {} ─────────────────────────────────────────┐", "Plan".bold());
    println!("│");

    for (level, actions) in plan.levels() {
        println!("│ {}", format!("Level {level}").bold());
        for planned in actions {
            println!(
                "│   {} {} {}",
                symbol(&planned.action),
                ui::pad(&planned.address.to_string(), 34),
                planned.action.verb().dimmed()
            );
            for change in planned.action.changes() {
                display_change(change, verbose);
            }
        }
        println!("│");
    }

    if verbose && !plan.unchanged.is_empty() {
        println!("│ {}", "Unchanged".bold());
        for address in &plan.unchanged {
            println!("│   {} {}", "○".dimmed(), address.to_string().dimmed());
        }
        println!("│");
    }

    let summary = plan.summary();
    println!("├{RULE}┤");
    println!(
        "│ Plan: {} to create, {} to update, {} to replace, {} to destroy",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.replace.to_string().yellow(),
        summary.destroy.to_string().red()
    );
    println!("└{RULE}┘");
}

fn display_change(change: &FieldChange, verbose: bool) {
    if is_sensitive(&change.field) {
        println!("│       {} {}: {}", "~".yellow(), change.field, "(sensitive)".dimmed());
        return;
    }

    let before = change.before.as_ref();
    let multiline = |v: Option<&Value>| v.and_then(Value::as_str).is_some_and(|s| s.contains('\n'));

    if let (PlannedValue::Known(Value::String(after)), Some(Value::String(old))) =
        (&change.after, before)
        && (old.contains('\n') || after.contains('\n'))
    {
        println!("│       {} {}", "~".yellow(), change.field);
        if verbose {
            text_diff(old, after);
        }
        return;
    }

    let old = match before {
        None => "(none)".to_string(),
        Some(_) if multiline(before) => "(multi-line)".to_string(),
        Some(v) => ui::truncate(&display_value(v), 40),
    };
    let new = match &change.after {
        PlannedValue::Known(Value::String(s)) if s.contains('\n') => "(multi-line)".to_string(),
        other => ui::truncate(&other.to_string(), 40),
    };
    println!(
        "│       {} {}: {} → {}",
        "~".yellow(),
        change.field,
        old.dimmed(),
        new
    );
}

/// Line diff of a multi-line value such as a rendered payload; returns
/// whether anything differed
pub fn text_diff(old: &str, new: &str) -> bool {
    let diff = similar::TextDiff::from_lines(old, new);
    let mut has_changes = false;
    for change in diff.iter_all_changes() {
        let line = redact_line(&change.to_string());
        match change.tag() {
            similar::ChangeTag::Delete => {
                has_changes = true;
                print!("│         {}", format!("- {line}").red());
            }
            similar::ChangeTag::Insert => {
                has_changes = true;
                print!("│         {}", format!("+ {line}").green());
            }
            similar::ChangeTag::Equal => {}
        }
    }
    has_changes
}

/// Print the apply summary
pub fn print_summary(summary: &declarative::ExecuteSummary) {
    println!();
    if summary.is_success() {
        println!("  {} Apply complete!", "✓".green().bold());
    } else {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} resources updated", summary.modified);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.removed > 0 {
        println!("    • {} resources destroyed", summary.removed);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}
