//! Append-only audit log with hash chaining.
//!
//! Events are written as JSON Lines, one event per line, to a file opened in
//! append mode. Each event carries `hash_prev` + `hash_self` (SHA-256 over
//! canonical JSON without `hash_self`), so history rewrites are detectable:
//! the storage layer offers no update or delete operation, and the chain
//! proves that none happened out of band. An in-memory index over the same
//! events serves `get` / `query` / `stats` without re-reading the file.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use tg_schemas::canonical::canonical_json;
use tg_schemas::{sha256_hex, ErrorKind};

pub mod events;

pub use events::EventType;

// ---------------------------------------------------------------------------
// AuditEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub correlation_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub data: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Hash over canonical JSON of the event WITHOUT `hash_self` (avoids
/// self-reference).
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String, AuditError> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let canonical = canonical_json(&clone).map_err(|e| AuditError::Serialize(e.to_string()))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit event serialization failed: {0}")]
    Serialize(String),
    #[error("audit log corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("audit backup failed verification: {0}")]
    BackupUnverified(String),
}

impl AuditError {
    /// Storage failures are fatal for the operation that triggered them: the
    /// caller must not proceed with a side effect whose audit write failed.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

// ---------------------------------------------------------------------------
// Query filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Option<Vec<EventType>>,
    pub correlation_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl EventFilter {
    pub fn for_correlation(correlation_id: Uuid) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Self::default()
        }
    }

    fn matches(&self, ev: &AuditEvent) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&ev.event_type) {
                return false;
            }
        }
        if let Some(cid) = self.correlation_id {
            if ev.correlation_id != cid {
                return false;
            }
        }
        if let Some(from) = self.from {
            if ev.ts_utc < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if ev.ts_utc > to {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Inner {
    last_hash: Option<String>,
    seq: u64,
    events: Vec<AuditEvent>,
    by_id: HashMap<Uuid, usize>,
}

/// Append-only event store. One exclusive writer; queries clone out of the
/// in-memory index, so readers never observe a partially appended event.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl AuditLog {
    /// Open (or create) the log at `path`. An existing file is replayed to
    /// restore the chain head and the query index; a corrupt file refuses to
    /// open rather than silently extending a broken chain.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut events = Vec::new();
        let mut by_id = HashMap::new();
        let mut last_hash = None;

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            match verify_hash_chain_str(&content)? {
                VerifyResult::Broken { line, reason } => {
                    return Err(AuditError::Corrupt { line, reason });
                }
                VerifyResult::Valid { .. } => {}
            }
            for (i, line) in content.lines().enumerate() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let ev: AuditEvent =
                    serde_json::from_str(trimmed).map_err(|e| AuditError::Corrupt {
                        line: i + 1,
                        reason: e.to_string(),
                    })?;
                last_hash = ev.hash_self.clone();
                by_id.insert(ev.event_id, events.len());
                events.push(ev);
            }
        }

        let seq = events.len() as u64;
        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                last_hash,
                seq,
                events,
                by_id,
            }),
        })
    }

    /// Append one event. Durable (flushed and synced) before returning.
    /// When `correlation_id` is `None`, a fresh one is generated and carried
    /// on the returned event.
    pub fn append(
        &self,
        event_type: EventType,
        correlation_id: Option<Uuid>,
        data: Value,
    ) -> Result<AuditEvent, AuditError> {
        let mut inner = self.inner.lock().expect("audit lock poisoned");

        let mut ev = AuditEvent {
            event_id: Uuid::new_v4(),
            event_type,
            correlation_id: correlation_id.unwrap_or_else(Uuid::new_v4),
            ts_utc: Utc::now(),
            data,
            hash_prev: inner.last_hash.clone(),
            hash_self: None,
        };
        let self_hash = compute_event_hash(&ev)?;
        ev.hash_self = Some(self_hash.clone());

        let line = canonical_json(&ev).map_err(|e| AuditError::Serialize(e.to_string()))?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
        f.flush()?;
        f.sync_data()?;

        inner.last_hash = Some(self_hash);
        inner.seq += 1;
        let idx = inner.events.len();
        inner.by_id.insert(ev.event_id, idx);
        inner.events.push(ev.clone());

        debug!(event_type = %ev.event_type, correlation_id = %ev.correlation_id, "audit append");
        Ok(ev)
    }

    pub fn get(&self, event_id: Uuid) -> Option<AuditEvent> {
        let inner = self.inner.lock().expect("audit lock poisoned");
        inner
            .by_id
            .get(&event_id)
            .map(|&idx| inner.events[idx].clone())
    }

    /// Filtered query in append order, with offset/limit applied after
    /// filtering.
    pub fn query(&self, filter: &EventFilter) -> Vec<AuditEvent> {
        let inner = self.inner.lock().expect("audit lock poisoned");
        let iter = inner.events.iter().filter(|ev| filter.matches(ev));
        let iter = iter.skip(filter.offset);
        match filter.limit {
            Some(limit) => iter.take(limit).cloned().collect(),
            None => iter.cloned().collect(),
        }
    }

    /// Count per event type.
    pub fn stats(&self) -> std::collections::BTreeMap<String, u64> {
        let inner = self.inner.lock().expect("audit lock poisoned");
        let mut out = std::collections::BTreeMap::new();
        for ev in &inner.events {
            *out.entry(ev.event_type.as_str().to_string()).or_insert(0) += 1;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("audit lock poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writability probe for health reporting.
    pub fn is_writable(&self) -> bool {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .is_ok()
    }

    /// Idempotent backup: copy the log to `dest` and verify the copy's hash
    /// chain. Re-running against the same destination just overwrites it with
    /// an identical (or extended) verified copy.
    pub fn backup_to(&self, dest: impl AsRef<Path>) -> Result<BackupReport, AuditError> {
        let dest = dest.as_ref().to_path_buf();
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        // Hold the writer lock so the copy is a prefix-consistent snapshot.
        let _inner = self.inner.lock().expect("audit lock poisoned");
        let content = if self.path.exists() {
            fs::read_to_string(&self.path)?
        } else {
            String::new()
        };
        fs::write(&dest, &content)?;

        match verify_hash_chain_str(&content)? {
            VerifyResult::Valid { lines } => Ok(BackupReport {
                path: dest,
                events: lines,
            }),
            VerifyResult::Broken { line, reason } => Err(AuditError::BackupUnverified(format!(
                "chain broken at line {line}: {reason}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub path: PathBuf,
    pub events: usize,
}

// ---------------------------------------------------------------------------
// Chain verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult, AuditError> {
    let content = fs::read_to_string(path.as_ref())?;
    verify_hash_chain_str(&content)
}

/// Verify chain integrity of JSONL content: each `hash_prev` must equal the
/// previous `hash_self`, and each `hash_self` must recompute.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult, AuditError> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let ev: AuditEvent = match serde_json::from_str(trimmed) {
            Ok(ev) => ev,
            Err(e) => {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("unparseable event: {e}"),
                })
            }
        };
        line_count += 1;

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        if let Some(ref claimed) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_temp() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("events.jsonl")).unwrap();
        (dir, log)
    }

    #[test]
    fn append_generates_correlation_id_when_absent() {
        let (_dir, log) = open_temp();
        let ev = log
            .append(EventType::OrderProposed, None, json!({"q": 1}))
            .unwrap();
        assert_ne!(ev.correlation_id, Uuid::nil());
    }

    #[test]
    fn query_by_correlation_preserves_append_order() {
        let (_dir, log) = open_temp();
        let cid = Uuid::new_v4();
        for i in 0..5 {
            log.append(EventType::OrderProposed, Some(cid), json!({"i": i}))
                .unwrap();
        }
        // Interleave an unrelated correlation.
        log.append(EventType::ToolCalled, None, json!({})).unwrap();

        let got = log.query(&EventFilter::for_correlation(cid));
        assert_eq!(got.len(), 5);
        for (i, ev) in got.iter().enumerate() {
            assert_eq!(ev.data["i"], i);
        }
    }

    #[test]
    fn query_filters_by_type_with_limit_and_offset() {
        let (_dir, log) = open_temp();
        for _ in 0..4 {
            log.append(EventType::ToolCalled, None, json!({})).unwrap();
            log.append(EventType::ToolRejected, None, json!({})).unwrap();
        }
        let filter = EventFilter {
            event_types: Some(vec![EventType::ToolRejected]),
            limit: Some(2),
            offset: 1,
            ..EventFilter::default()
        };
        let got = log.query(&filter);
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|e| e.event_type == EventType::ToolRejected));
    }

    #[test]
    fn stats_counts_per_type() {
        let (_dir, log) = open_temp();
        log.append(EventType::ToolCalled, None, json!({})).unwrap();
        log.append(EventType::ToolCalled, None, json!({})).unwrap();
        log.append(EventType::OrderFilled, None, json!({})).unwrap();
        let stats = log.stats();
        assert_eq!(stats["TOOL_CALLED"], 2);
        assert_eq!(stats["ORDER_FILLED"], 1);
    }

    #[test]
    fn reopen_restores_chain_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let first_id;
        {
            let log = AuditLog::open(&path).unwrap();
            first_id = log
                .append(EventType::OrderProposed, None, json!({"n": 1}))
                .unwrap()
                .event_id;
            log.append(EventType::OrderSimulated, None, json!({"n": 2}))
                .unwrap();
        }
        let log = AuditLog::open(&path).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.get(first_id).is_some());

        // Appending after reopen keeps the chain valid.
        log.append(EventType::OrderFilled, None, json!({"n": 3}))
            .unwrap();
        assert_eq!(
            verify_hash_chain(&path).unwrap(),
            VerifyResult::Valid { lines: 3 }
        );
    }

    #[test]
    fn backup_is_idempotent_and_verified() {
        let (dir, log) = open_temp();
        for i in 0..3 {
            log.append(EventType::ToolCalled, None, json!({"i": i}))
                .unwrap();
        }
        let dest = dir.path().join("backup/events.jsonl");
        let first = log.backup_to(&dest).unwrap();
        let second = log.backup_to(&dest).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.events, 3);
    }
}
