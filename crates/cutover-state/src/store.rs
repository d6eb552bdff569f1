//! AuditStore: redb-backed append-only history for cutover.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing and rehearsal runs).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use cutover_core::{HealthVerdict, RolloutRecord, SwitchRecord};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe audit store backed by redb.
#[derive(Clone)]
pub struct AuditStore {
    db: Arc<Database>,
}

impl AuditStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
            }
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "audit store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory audit store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SWITCHES).map_err(map_err!(Table))?;
        txn.open_table(VERDICTS).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Switch records ─────────────────────────────────────────────

    /// Append a switch record. Returns its sequence number.
    pub fn append_switch(&self, record: &SwitchRecord) -> StateResult<u64> {
        let seq = self.append(SWITCHES, &record.service, record)?;
        debug!(service = %record.service, seq, from = %record.from, to = %record.to, "switch recorded");
        Ok(seq)
    }

    /// All switch records for a service, oldest first.
    pub fn list_switches(&self, service: &str) -> StateResult<Vec<SwitchRecord>> {
        self.list(SWITCHES, service)
    }

    /// The most recent switch record for a service.
    pub fn last_switch(&self, service: &str) -> StateResult<Option<SwitchRecord>> {
        self.last(SWITCHES, service)
    }

    // ── Verdicts ───────────────────────────────────────────────────

    /// Append a readiness verdict for a service.
    pub fn append_verdict(&self, service: &str, verdict: &HealthVerdict) -> StateResult<u64> {
        let seq = self.append(VERDICTS, service, verdict)?;
        debug!(%service, seq, environment = %verdict.environment, passed = verdict.passed, "verdict recorded");
        Ok(seq)
    }

    /// All verdicts for a service, oldest first.
    pub fn list_verdicts(&self, service: &str) -> StateResult<Vec<HealthVerdict>> {
        self.list(VERDICTS, service)
    }

    /// The most recent verdict for a service.
    pub fn last_verdict(&self, service: &str) -> StateResult<Option<HealthVerdict>> {
        self.last(VERDICTS, service)
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Append a rollout outcome.
    pub fn append_rollout(&self, record: &RolloutRecord) -> StateResult<u64> {
        let seq = self.append(ROLLOUTS, &record.service, record)?;
        debug!(service = %record.service, seq, outcome = %record.outcome, "rollout recorded");
        Ok(seq)
    }

    /// All rollout outcomes for a service, oldest first.
    pub fn list_rollouts(&self, service: &str) -> StateResult<Vec<RolloutRecord>> {
        self.list(ROLLOUTS, service)
    }

    /// The most recent rollout outcome for a service.
    pub fn last_rollout(&self, service: &str) -> StateResult<Option<RolloutRecord>> {
        self.last(ROLLOUTS, service)
    }

    /// Every service key that has any switch or rollout history.
    pub fn services(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let mut services = BTreeSet::new();
        for def in [SWITCHES, ROLLOUTS, VERDICTS] {
            let table = txn.open_table(def).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if let Some((service, _)) = key.value().rsplit_once(KEY_SEPARATOR) {
                    services.insert(service.to_string());
                }
            }
        }
        Ok(services.into_iter().collect())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn append<T: Serialize>(&self, def: JsonTable, service: &str, value: &T) -> StateResult<u64> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            seq = next_seq(&table, service)?;
            let key = entry_key(service, seq);
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(seq)
    }

    fn list<T: DeserializeOwned>(&self, def: JsonTable, service: &str) -> StateResult<Vec<T>> {
        let (start, end) = service_bounds(service);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    fn last<T: DeserializeOwned>(&self, def: JsonTable, service: &str) -> StateResult<Option<T>> {
        let (start, end) = service_bounds(service);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut range = table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?;
        match range.next_back() {
            Some(entry) => {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

/// Next free sequence number for `service`, read inside the write
/// transaction so concurrent appends cannot collide.
fn next_seq(table: &Table<'_, &'static str, &'static [u8]>, service: &str) -> StateResult<u64> {
    let (start, end) = service_bounds(service);
    let mut range = table
        .range(start.as_str()..end.as_str())
        .map_err(map_err!(Read))?;
    match range.next_back() {
        Some(entry) => {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let seq = key
                .value()
                .rsplit_once(KEY_SEPARATOR)
                .and_then(|(_, seq)| seq.parse::<u64>().ok())
                .ok_or_else(|| StateError::Read(format!("malformed key {:?}", key.value())))?;
            Ok(seq + 1)
        }
        None => Ok(0),
    }
}

/// Half-open key range covering every entry of `service`.
fn service_bounds(service: &str) -> (String, String) {
    let start = service_prefix(service);
    // '$' sorts immediately after the '#' separator.
    let end = format!("{service}$");
    (start, end)
}
