//! IPC bridge: stdin reader and stdout event emitter.
//!
//! A blocking stdin reader thread sends deserialized commands through an
//! mpsc channel. Events go out as JSON lines on stdout.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{InterviewCommand, InterviewEvent};

/// Emit an `InterviewEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &InterviewEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Pipe may be closed.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

pub fn emit_error(message: &str) {
    emit_event(&InterviewEvent::Error {
        message: message.to_string(),
    });
}

/// Accept `{"type": ...}` in place of `{"command": ...}`.
fn normalize_command_json(input: &str) -> String {
    if let Ok(mut obj) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(input)
    {
        if !obj.contains_key("command") {
            if let Some(type_val) = obj.remove("type") {
                obj.insert("command".to_string(), type_val);
                if let Ok(json) = serde_json::to_string(&obj) {
                    return json;
                }
            }
        }
    }
    input.to_string()
}

/// Parse one stdin line. `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<InterviewCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&normalize_command_json(trimmed)).map(Some)
}

/// Spawn a blocking thread that reads JSON lines from stdin and forwards
/// commands through the returned channel.
///
/// The thread exits when stdin is closed (host gone) or on a read error.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<InterviewCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            let text = match line {
                Ok(text) => text,
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            };
            match parse_command(&text) {
                Ok(Some(cmd)) => {
                    debug!(?cmd, "Received command");
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Invalid JSON command: {} (input: {})", e, text.trim());
                    emit_error(&format!("Invalid JSON command: {}", e));
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_field_is_accepted_as_command() {
        let cmd = parse_command(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(cmd, Some(InterviewCommand::Ping {})));
    }

    #[test]
    fn test_command_field_wins_over_type() {
        let cmd = parse_command(r#"{"command":"end_session","type":"ping"}"#).unwrap();
        assert!(matches!(cmd, Some(InterviewCommand::EndSession {})));
    }

    #[test]
    fn test_blank_and_invalid_lines() {
        assert!(parse_command("   ").unwrap().is_none());
        assert!(parse_command("{not json").is_err());
    }
}
