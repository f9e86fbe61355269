//! Terminal output helpers.

use colored::Colorize;
use moresh_client::SessionState;

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Key-value display: "  Label:       value".
pub fn kv(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value);
}

pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

pub fn error(msg: &str) {
    println!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Hint line: "  hint: message" in dimmed text.
pub fn hint(msg: &str) {
    println!("  {} {}", "hint:".dimmed(), msg.dimmed());
}

/// Status or diagnostic text from the session.
pub fn status(msg: &str) {
    println!("  {}", msg.dimmed());
}

pub fn state(state: SessionState) {
    let label = state.to_string();
    let label = match state {
        SessionState::Established => label.bright_green(),
        SessionState::Failed => label.bright_red(),
        SessionState::Closed => label.yellow(),
        _ => label.cyan(),
    };
    println!("  {} {}", "state:".dimmed(), label);
}

pub fn local_line(text: &str) {
    println!("{} {}", "you>".bright_cyan().bold(), text);
}

pub fn remote_line(who: &str, text: &str) {
    println!("{} {}", format!("{who}>").bright_magenta().bold(), text);
}

pub fn typing(who: &str) {
    println!("  {}", format!("{who} is typing...").dimmed().italic());
}
