//! redb table definitions for the audit store.
//!
//! Every table uses `&str` keys of the form `{service}#{sequence:020}` and
//! `&[u8]` values holding JSON.

use redb::TableDefinition;

/// Applied selector changes (`SwitchRecord`).
pub const SWITCHES: TableDefinition<&str, &[u8]> = TableDefinition::new("switches");

/// Readiness verdicts (`HealthVerdict`), one per gate poll cycle.
pub const VERDICTS: TableDefinition<&str, &[u8]> = TableDefinition::new("verdicts");

/// Rollout outcomes (`RolloutRecord`), one per promote invocation.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Separator between the service key and the sequence number.
pub const KEY_SEPARATOR: char = '#';

/// Build the key for entry `seq` of `service`.
pub fn entry_key(service: &str, seq: u64) -> String {
    format!("{service}{KEY_SEPARATOR}{seq:020}")
}

/// Prefix shared by every entry of `service`.
pub fn service_prefix(service: &str) -> String {
    format!("{service}{KEY_SEPARATOR}")
}
