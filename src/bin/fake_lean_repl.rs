//! A stand-in Lean REPL for integration tests: speaks the same newline-JSON
//! wire protocol as the real interpreter (§6 of SPEC_FULL.md) without linking
//! Lean. Driven entirely by the `cmd` text of each request:
//!
//! - `cmd` containing `CRASH` — exits immediately without responding.
//! - `cmd` containing `SLEEP:<secs>` — sleeps before responding, to exercise
//!   send timeouts.
//! - `cmd` containing `STDERR:<msg>` — writes `<msg>` to stderr before
//!   responding, to exercise `InterpreterError`.
//! - `cmd` containing `FAIL_IMPORT` — responds with a fatal `error`-severity
//!   message, to exercise header-eval failure.
//! - `cmd` starting with `#check` — responds with the canonical `Nat : Type`
//!   info message used by the "trivial check" scenario.
//! - anything else — responds with just an incrementing `env` id.
//!
//! `env` increments once per successfully handled command, starting at 0,
//! matching the real interpreter's "first command produces env 0" contract.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::{Value, json};

fn main() {
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    let mut env_counter: i64 = -1;

    while let Some(raw) = read_frame(&mut reader) {
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            break;
        };
        let cmd = value.get("cmd").and_then(Value::as_str).unwrap_or_default();

        if cmd.contains("CRASH") {
            std::process::exit(1);
        }

        if let Some(secs) = extract_after(cmd, "SLEEP:") {
            if let Ok(secs) = secs.parse::<f64>() {
                std::thread::sleep(Duration::from_secs_f64(secs));
            }
        }

        if let Some(msg) = extract_after(cmd, "STDERR:") {
            eprintln!("{msg}");
        }

        env_counter += 1;

        let response = if cmd.contains("FAIL_IMPORT") {
            json!({
                "messages": [{
                    "severity": "error",
                    "pos": {"line": 1, "column": 0},
                    "data": "unknown package",
                }],
                "error": "import failed",
            })
        } else if cmd.trim_start().starts_with("#check") {
            json!({
                "env": env_counter,
                "messages": [{
                    "severity": "info",
                    "pos": {"line": 1, "column": 0},
                    "endPos": {"line": 1, "column": 6},
                    "data": "Nat : Type",
                }],
            })
        } else {
            json!({ "env": env_counter })
        };

        let encoded = serde_json::to_string(&response).expect("response serializes");
        if write!(writer, "{encoded}\n\n").is_err() {
            break;
        }
        if writer.flush().is_err() {
            break;
        }
    }
}

/// Reads one request frame: lines up to and including the blank-line
/// terminator, concatenated. Returns `None` on EOF with no data buffered.
fn read_frame(reader: &mut impl BufRead) -> Option<String> {
    let mut acc = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).ok()?;
        if n == 0 {
            return if acc.is_empty() { None } else { Some(acc) };
        }
        if line.trim().is_empty() {
            break;
        }
        acc.push_str(&line);
    }
    Some(acc)
}

fn extract_after<'a>(haystack: &'a str, marker: &str) -> Option<&'a str> {
    let idx = haystack.find(marker)? + marker.len();
    let rest = &haystack[idx..];
    Some(rest.split(|c: char| c.is_whitespace()).next().unwrap_or(rest))
}
