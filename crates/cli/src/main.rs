// SPDX-License-Identifier: MIT

//! Evidence export/verify CLI: a thin `clap` binary over
//! `dar_storage::evidence`. Input to `export` is a pair of NDJSON dumps
//! (events and ledger rows) in the same record shape the archive itself
//! stores them in — whatever wrote the live event log and ledger is
//! responsible for producing that dump; this binary never talks to a live
//! store directly.

use clap::{Parser, Subcommand};
use dar_core::JobId;
use dar_storage::event_log::StoredEvent;
use dar_storage::evidence;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dar", about = "Durable agent runtime evidence tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Package a job's event log and ledger rows into a verifiable archive.
    Export {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        events: PathBuf,
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Verify a previously exported archive; exits non-zero on any failure.
    Verify {
        archive: PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Evidence(#[from] evidence::EvidenceError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

/// Runs the requested subcommand; `Ok(true)` means success (exit 0),
/// `Ok(false)` means a verification failure (exit non-zero).
fn run(cli: Cli) -> Result<bool, CliError> {
    match cli.command {
        Command::Export { job_id, events, ledger, out } => {
            let job_id = JobId::from_string(job_id);
            let events = read_ndjson::<StoredEvent>(&events)?;
            let ledger = read_ndjson(&ledger)?;
            let now_epoch_ms = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
            evidence::export(&out, &job_id, &events, &ledger, now_epoch_ms)?;
            println!("wrote {}", out.display());
            Ok(true)
        }
        Command::Verify { archive } => {
            let report = evidence::verify(&archive)?;
            if report.ok {
                println!("OK: {} is a valid evidence archive", archive.display());
                Ok(true)
            } else {
                for failure in &report.failures {
                    eprintln!("FAIL: {failure}");
                }
                Ok(false)
            }
        }
    }
}

fn read_ndjson<T: for<'de> serde::Deserialize<'de>>(path: &PathBuf) -> Result<Vec<T>, CliError> {
    let text = std::fs::read_to_string(path)?;
    text.lines().filter(|l| !l.is_empty()).map(|line| serde_json::from_str(line).map_err(CliError::from)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_then_verify_round_trips_through_the_cli_entry_points() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = JobId::from_string("job-cli-1");

        let events_path = dir.path().join("events.ndjson");
        let event = dar_core::Event::JobCreated { id: job_id.clone(), agent_id: "a".into(), tenant_id: "t".into(), goal: "g".into(), required_capabilities: vec![] };
        let payload = serde_json::to_value(&event).unwrap();
        let hash = dar_core::hash::event_hash(job_id.as_str(), event.type_tag(), &payload, "2026-01-01T00:00:00Z", "");
        let stored = StoredEvent { id: "evt-1".into(), job_id: job_id.clone(), version: 1, event, created_at_rfc3339: "2026-01-01T00:00:00Z".into(), prev_hash: "".into(), hash };
        std::fs::write(&events_path, format!("{}\n", serde_json::to_string(&stored).unwrap())).unwrap();

        let ledger_path = dir.path().join("ledger.ndjson");
        std::fs::write(&ledger_path, "").unwrap();

        let out_path = dir.path().join("evidence.zip");
        let exported = run(Cli {
            command: Command::Export { job_id: job_id.to_string(), events: events_path, ledger: ledger_path, out: out_path.clone() },
        })
        .unwrap();
        assert!(exported);

        let verified = run(Cli { command: Command::Verify { archive: out_path } }).unwrap();
        assert!(verified);
    }
}
