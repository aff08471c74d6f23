// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted dead-letter records.

use crate::{StoreResult, lock};
use chrono::DateTime;
use chrono::Utc;
use relay_core::{DeadLetter, DeadLetterReason};
use rusqlite::{Connection, named_params};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Handle to the dead-letter store.
#[derive(Clone)]
pub struct DeadLetterStore {
    conn: Arc<Mutex<Connection>>,
}

impl DeadLetterStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Persist one dead-letter record.
    pub fn insert(&self, record: &DeadLetter) -> StoreResult<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO dead_letters
                (endpoint_hash, message_id, reason, envelope, failed_at)
             VALUES (:endpoint_hash, :message_id, :reason, :envelope, :failed_at)",
            named_params! {
                ":endpoint_hash": record.endpoint_hash as i64,
                ":message_id": record.message_id.to_string(),
                ":reason": record.reason.as_str(),
                ":envelope": serde_json::to_string(&record.envelope)?,
                ":failed_at": record.failed_at.to_rfc3339(),
            },
        )?;
        Ok(())
    }

    /// List records, optionally filtered by the target subscriber's hash.
    /// Newest first.
    pub fn list(&self, endpoint_hash: Option<u64>) -> StoreResult<Vec<DeadLetter>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT endpoint_hash, message_id, reason, envelope, failed_at
             FROM dead_letters
             WHERE (:hash IS NULL OR endpoint_hash = :hash)
             ORDER BY seq DESC",
        )?;
        let raws: Vec<(i64, String, String, String, String)> = stmt
            .query_map(
                named_params! { ":hash": endpoint_hash.map(|h| h as i64) },
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        let mut out = Vec::with_capacity(raws.len());
        for (hash, message_id, reason, envelope, failed_at) in raws {
            out.push(DeadLetter {
                endpoint_hash: hash as u64,
                message_id: message_id.parse().map_err(|_| {
                    crate::StoreError::IntegrityCheckFailed("bad message id".into())
                })?,
                reason: DeadLetterReason::parse(&reason).ok_or_else(|| {
                    crate::StoreError::IntegrityCheckFailed(format!("unknown reason '{reason}'"))
                })?,
                envelope: serde_json::from_str(&envelope)?,
                failed_at: DateTime::parse_from_rfc3339(&failed_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| {
                        crate::StoreError::IntegrityCheckFailed("bad failed_at".into())
                    })?,
            });
        }
        Ok(out)
    }

    /// Count of records grouped by reason string.
    pub fn counts_by_reason(&self) -> StoreResult<BTreeMap<String, u64>> {
        let conn = lock(&self.conn);
        let mut stmt =
            conn.prepare("SELECT reason, COUNT(*) FROM dead_letters GROUP BY reason")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts.into_iter().map(|(r, n)| (r, n as u64)).collect())
    }

    /// Total number of records.
    pub fn count(&self) -> StoreResult<u64> {
        let conn = lock(&self.conn);
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use relay_core::{Budget, BudgetOverrides, Envelope};

    fn dead_letter(reason: DeadLetterReason, endpoint_hash: u64) -> DeadLetter {
        let now = Utc::now();
        let envelope = Envelope::assign(
            "relay.agent.a",
            "relay.human.console",
            None,
            serde_json::json!({}),
            Budget::normalize(&BudgetOverrides::default(), now),
            None,
            now,
        );
        DeadLetter {
            endpoint_hash,
            message_id: envelope.id,
            reason,
            envelope,
            failed_at: now,
        }
    }

    #[test]
    fn insert_then_list_roundtrips() {
        let store = Store::open_in_memory().unwrap();
        let dls = store.dead_letters();
        let record = dead_letter(DeadLetterReason::CycleDetected, 7);
        dls.insert(&record).unwrap();

        let all = dls.list(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message_id, record.message_id);
        assert_eq!(all[0].reason, DeadLetterReason::CycleDetected);
        assert_eq!(all[0].envelope.subject, "relay.agent.a");
    }

    #[test]
    fn list_filters_by_endpoint_hash() {
        let store = Store::open_in_memory().unwrap();
        let dls = store.dead_letters();
        dls.insert(&dead_letter(DeadLetterReason::HopLimit, 1)).unwrap();
        dls.insert(&dead_letter(DeadLetterReason::TtlExpired, 2)).unwrap();
        dls.insert(&dead_letter(DeadLetterReason::HopLimit, 1)).unwrap();

        let hits = dls.list(Some(1)).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|d| d.endpoint_hash == 1));
    }

    #[test]
    fn counts_grouped_by_reason() {
        let store = Store::open_in_memory().unwrap();
        let dls = store.dead_letters();
        dls.insert(&dead_letter(DeadLetterReason::HopLimit, 1)).unwrap();
        dls.insert(&dead_letter(DeadLetterReason::HopLimit, 2)).unwrap();
        dls.insert(&dead_letter(DeadLetterReason::PublishFailed, 3)).unwrap();

        let counts = dls.counts_by_reason().unwrap();
        assert_eq!(counts["hop_limit"], 2);
        assert_eq!(counts["publish_failed"], 1);
        assert_eq!(dls.count().unwrap(), 3);
    }

    #[test]
    fn large_hashes_survive_the_i64_bridge() {
        let store = Store::open_in_memory().unwrap();
        let dls = store.dead_letters();
        let hash = u64::MAX - 3;
        dls.insert(&dead_letter(DeadLetterReason::CycleDetected, hash))
            .unwrap();
        let hits = dls.list(Some(hash)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].endpoint_hash, hash);
    }
}
