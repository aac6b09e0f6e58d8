//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is an EscalationRequest. Output lines are either:
//! - An EscalationOutcome (accepted or exhausted)
//! - An ErrorOutput (when input validation fails)
//!
//! Logs go to stderr (`RUST_LOG`, default `info`).

use std::io::{self, Write};

use escalation_engine::types::ErrorOutput;
use escalation_engine::{Engine, EscalationRequest};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let engine = match Engine::from_env() {
    Ok(e) => e,
    Err(e) => {
      let _ = writeln!(io::stderr(), "escalation-engine: {}", e);
      std::process::exit(1);
    }
  };

  // One request at a time, in input order.
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  loop {
    let line = match lines.next_line().await {
      Ok(Some(l)) => l,
      Ok(None) => break,
      Err(e) => {
        let _ = writeln!(io::stderr(), "escalation-engine: read error: {}", e);
        std::process::exit(1);
      }
    };

    // Skip blank lines.
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let req: EscalationRequest = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        let err = ErrorOutput::new(format!("json parse: {}", e));
        let _ = serde_json::to_writer(&mut out, &err);
        let _ = writeln!(out);
        let _ = out.flush();
        continue;
      }
    };

    match engine.handle(&req).await {
      Ok(outcome) => {
        let _ = serde_json::to_writer(&mut out, &outcome);
      }
      Err(e) => {
        let _ = serde_json::to_writer(&mut out, &ErrorOutput::from_error(&e));
      }
    }
    let _ = writeln!(out);
    // One request may take a full acceptance window; emit each result as it lands.
    let _ = out.flush();
  }

  let _ = out.flush();
}
