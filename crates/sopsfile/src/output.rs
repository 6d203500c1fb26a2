//! Terminal output utilities

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sopsfile_provider::PlanAction;

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a header
pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", style(key).dim(), value);
}

/// Print one planned change
pub fn planned(action: PlanAction, resource: &str, description: &str) {
    let symbol = match action {
        PlanAction::Create => style("+").green().bold(),
        PlanAction::Replace => style("~").yellow().bold(),
        PlanAction::Delete => style("-").red().bold(),
        PlanAction::NoOp => style("=").dim(),
    };
    println!("  {} {} {}", symbol, style(resource).bold(), style(description).dim());
}

/// Create a spinner
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let template = ProgressStyle::with_template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(template.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
