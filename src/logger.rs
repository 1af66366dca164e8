use std::io::Write;

use chrono::Local;
use crossterm::style::Stylize;

use crate::state::{LogLevel, LogLine, RunState, MAX_LOGS};

pub fn log(state: &mut RunState, level: LogLevel, msg: impl Into<String>) {
    if state.logs.len() >= MAX_LOGS {
        state.logs.pop_front();
    }

    let line = LogLine {
        level,
        text: msg.into(),
        at: Local::now(),
    };

    if state.echo {
        echo(&line);
    }

    state.logs.push_back(line);
}

/// Log a message followed by `key=value` pairs.
pub fn log_fields(
    state: &mut RunState,
    level: LogLevel,
    msg: impl Into<String>,
    fields: &[(&str, &str)],
) {
    let mut text = msg.into();
    for (k, v) in fields {
        text.push(' ');
        text.push_str(k);
        text.push('=');
        if v.contains(char::is_whitespace) {
            text.push_str(&format!("{v:?}"));
        } else {
            text.push_str(v);
        }
    }
    log(state, level, text);
}

fn echo(line: &LogLine) {
    let tag = match line.level {
        LogLevel::Info => "INFO".cyan(),
        LogLevel::Success => "OK".green(),
        LogLevel::Warn => "WARN".yellow(),
        LogLevel::Error => "ERROR".red(),
    };

    let mut err = std::io::stderr().lock();
    let _ = writeln!(
        err,
        "{} [{}] {}",
        line.at.format("%Y-%m-%d %H:%M:%S"),
        tag,
        line.text
    );
}
