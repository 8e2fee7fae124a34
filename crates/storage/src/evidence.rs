// SPDX-License-Identifier: MIT

//! Evidence export/verify: a bit-exact, independently verifiable
//! archive of a job's event log and invocation ledger.
//!
//! The archive is a ZIP with `manifest.json`, `events.ndjson`,
//! `ledger.ndjson`, `metadata.json`, `proof.json`. Verification rehashes the
//! chain and cross-checks every successful tool invocation against a
//! committed ledger row, independent of whatever produced the archive.

use crate::event_log::StoredEvent;
use dar_core::invocation::{InvocationRecord, InvocationStatus};
use dar_core::{Event, JobId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

const SCHEMA_VERSION: &str = "2.0";
const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("file hash mismatch for {0}")]
    FileHashMismatch(String),
    #[error("hash chain invalid at event index {0}")]
    HashChainInvalid(usize),
    #[error("root hash does not match last event hash")]
    RootHashMismatch,
    #[error("tool invocation {idempotency_key} has no committed ledger row")]
    MissingLedgerRow { idempotency_key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub job_id: String,
    pub exported_at_epoch_ms: u64,
    pub event_count: usize,
    pub ledger_count: usize,
    pub first_event_hash: String,
    pub last_event_hash: String,
    pub file_sha256: HashMap<String, String>,
    pub runtime_version: String,
    pub schema_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub root_hash: String,
    pub chain_validated: bool,
    pub ledger_validated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub job_id: String,
    pub exported_at_epoch_ms: u64,
}

/// Export a job's events and ledger rows into a ZIP archive at `path`.
pub fn export(
    path: &Path,
    job_id: &JobId,
    events: &[StoredEvent],
    ledger: &[InvocationRecord],
    now_epoch_ms: u64,
) -> Result<(), EvidenceError> {
    let events_ndjson = to_ndjson(events)?;
    let ledger_ndjson = to_ndjson(ledger)?;
    let metadata = Metadata { job_id: job_id.to_string(), exported_at_epoch_ms: now_epoch_ms };
    let metadata_json = serde_json::to_vec_pretty(&metadata)?;

    let first_event_hash = events.first().map(|e| e.hash.clone()).unwrap_or_default();
    let last_event_hash = events.last().map(|e| e.hash.clone()).unwrap_or_default();
    let proof = Proof { root_hash: last_event_hash.clone(), chain_validated: true, ledger_validated: true };
    let proof_json = serde_json::to_vec_pretty(&proof)?;

    let mut file_sha256 = HashMap::new();
    file_sha256.insert("events.ndjson".to_string(), dar_core::hash::hash_bytes(events_ndjson.as_bytes()));
    file_sha256.insert("ledger.ndjson".to_string(), dar_core::hash::hash_bytes(ledger_ndjson.as_bytes()));
    file_sha256.insert("metadata.json".to_string(), dar_core::hash::hash_bytes(&metadata_json));
    file_sha256.insert("proof.json".to_string(), dar_core::hash::hash_bytes(&proof_json));

    let manifest = Manifest {
        version: SCHEMA_VERSION.to_string(),
        job_id: job_id.to_string(),
        exported_at_epoch_ms: now_epoch_ms,
        event_count: events.len(),
        ledger_count: ledger.len(),
        first_event_hash,
        last_event_hash,
        file_sha256,
        runtime_version: RUNTIME_VERSION.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest)?;

    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("manifest.json", options)?;
    zip.write_all(&manifest_json)?;
    zip.start_file("events.ndjson", options)?;
    zip.write_all(events_ndjson.as_bytes())?;
    zip.start_file("ledger.ndjson", options)?;
    zip.write_all(ledger_ndjson.as_bytes())?;
    zip.start_file("metadata.json", options)?;
    zip.write_all(&metadata_json)?;
    zip.start_file("proof.json", options)?;
    zip.write_all(&proof_json)?;
    zip.finish()?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub ok: bool,
    pub failures: Vec<String>,
}

/// Verify a previously exported archive: file hashes, hash chain, and that
/// every successful tool invocation has a matching committed ledger row.
pub fn verify(path: &Path) -> Result<VerifyReport, EvidenceError> {
    let file = std::fs::File::open(path)?;
    let mut zip = zip::ZipArchive::new(file)?;

    let manifest: Manifest = read_json(&mut zip, "manifest.json")?;
    let events_bytes = read_bytes(&mut zip, "events.ndjson")?;
    let ledger_bytes = read_bytes(&mut zip, "ledger.ndjson")?;
    let metadata_bytes = read_bytes(&mut zip, "metadata.json")?;
    let proof_bytes = read_bytes(&mut zip, "proof.json")?;

    let mut failures = Vec::new();

    for (name, bytes) in [
        ("events.ndjson", &events_bytes),
        ("ledger.ndjson", &ledger_bytes),
        ("metadata.json", &metadata_bytes),
        ("proof.json", &proof_bytes),
    ] {
        let actual = dar_core::hash::hash_bytes(bytes);
        match manifest.file_sha256.get(name) {
            Some(expected) if expected == &actual => {}
            _ => failures.push(format!("file hash mismatch: {name}")),
        }
    }

    let events: Vec<StoredEvent> = from_ndjson(&events_bytes)?;
    let ledger: Vec<InvocationRecord> = from_ndjson(&ledger_bytes)?;
    let proof: Proof = serde_json::from_slice(&proof_bytes)?;

    let mut prev_hash = String::new();
    for (idx, event) in events.iter().enumerate() {
        if event.prev_hash != prev_hash {
            failures.push(format!("hash chain invalid at event index {idx}"));
            break;
        }
        if !event.verify() {
            failures.push(format!("hash chain invalid at event index {idx}"));
            break;
        }
        prev_hash = event.hash.clone();
    }

    let last_hash = events.last().map(|e| e.hash.clone()).unwrap_or_default();
    if proof.root_hash != last_hash {
        failures.push("root hash does not match last event hash".to_string());
    }

    let committed: std::collections::HashSet<(String, String)> = ledger
        .iter()
        .filter(|r| r.committed && matches!(r.status, InvocationStatus::Success | InvocationStatus::Confirmed))
        .map(|r| (r.tool_name.clone(), r.idempotency_key.clone()))
        .collect();

    for event in &events {
        if let Event::ToolInvocationFinished { idempotency_key, outcome: dar_core::InvocationOutcome::Success, .. } = &event.event {
            let has_row = committed.iter().any(|(_, key)| key == idempotency_key);
            if !has_row {
                failures.push(format!("tool invocation {idempotency_key} has no committed ledger row"));
            }
        }
    }

    Ok(VerifyReport { ok: failures.is_empty(), failures })
}

fn to_ndjson<T: Serialize>(items: &[T]) -> Result<String, EvidenceError> {
    let mut out = String::new();
    for item in items {
        out.push_str(&serde_json::to_string(item)?);
        out.push('\n');
    }
    Ok(out)
}

fn from_ndjson<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<Vec<T>, EvidenceError> {
    let text = String::from_utf8_lossy(bytes);
    text.lines().filter(|l| !l.is_empty()).map(|line| serde_json::from_str(line).map_err(EvidenceError::from)).collect()
}

fn read_bytes<R: Read + std::io::Seek>(zip: &mut zip::ZipArchive<R>, name: &str) -> Result<Vec<u8>, EvidenceError> {
    let mut file = zip.by_name(name)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

fn read_json<R: Read + std::io::Seek, T: for<'de> Deserialize<'de>>(zip: &mut zip::ZipArchive<R>, name: &str) -> Result<T, EvidenceError> {
    let bytes = read_bytes(zip, name)?;
    Ok(serde_json::from_slice(&bytes)?)
}
