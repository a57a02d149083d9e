//! Append-only conflict audit trail using redb.
//!
//! # Table design
//!
//! `RECORDS` uses a 24-byte composite key:
//! ```text
//! [ recorded_at_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Byte ordering equals recording order, so a plain table scan returns the
//! trail chronologically. Records are only ever inserted.
//!
//! Two index tables share every write transaction with `RECORDS`:
//! - `RECORD_IDS`: uuid bytes → record key
//! - `OPEN_BY_ENTITY`: entity id → key of its open record
//!
//! An entity has at most one open record (awaiting review and not yet
//! settled), so both checks in [`ConflictLog::append`] are point lookups.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use super::ConflictRecord;
use crate::error::{EagleError, Result};

/// Key: 24-byte composite (recorded_at_ms big-endian ++ uuid bytes)
/// Value: JSON-encoded ConflictRecord
const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("conflict_records");
const RECORD_IDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("conflict_record_ids");
const OPEN_BY_ENTITY: TableDefinition<&str, &[u8]> = TableDefinition::new("conflict_open_by_entity");

fn record_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn db_err(e: impl std::fmt::Display) -> EagleError {
    EagleError::AuditLog(e.to_string())
}

fn decode<T: ReadableTable<&'static [u8], &'static [u8]>>(table: &T) -> Result<Vec<ConflictRecord>> {
    let mut records = Vec::new();
    for entry in table.iter().map_err(db_err)? {
        let (_, v) = entry.map_err(db_err)?;
        records.push(serde_json::from_slice(v.value())?);
    }
    Ok(records)
}

fn lookup<T: ReadableTable<&'static [u8], &'static [u8]>>(
    table: &T,
    key: &[u8],
) -> Result<Option<ConflictRecord>> {
    match table.get(key).map_err(db_err)? {
        Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
        None => Ok(None),
    }
}

fn record_key_for<T: ReadableTable<&'static [u8], &'static [u8]>>(
    ids: &T,
    id: Uuid,
) -> Result<Vec<u8>> {
    ids.get(id.as_bytes().as_slice())
        .map_err(db_err)?
        .map(|v| v.value().to_vec())
        .ok_or_else(|| EagleError::ConflictNotFound(id.to_string()))
}

pub struct ConflictLog {
    db: Database,
}

impl ConflictLog {
    /// Open or create the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(RECORDS).map_err(db_err)?;
        wt.open_table(RECORD_IDS).map_err(db_err)?;
        wt.open_table(OPEN_BY_ENTITY).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Append a record.
    ///
    /// Fails with `ConflictAlreadyOpen` when the entity already has an open
    /// record, unless `record` is the settlement of that open record.
    pub fn append(&self, record: &ConflictRecord) -> Result<()> {
        let key = record_key(record.recorded_at, record.id);
        let value = serde_json::to_vec(record)?;
        let entity = record.entity_id.as_str();

        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut records = wt.open_table(RECORDS).map_err(db_err)?;
            let mut ids = wt.open_table(RECORD_IDS).map_err(db_err)?;
            let mut open = wt.open_table(OPEN_BY_ENTITY).map_err(db_err)?;

            let open_key = open
                .get(entity)
                .map_err(db_err)?
                .map(|v| v.value().to_vec());

            match record.settles {
                Some(target) => {
                    let target_key = record_key_for(&ids, target)?;
                    let target_rec = lookup(&records, &target_key)?
                        .ok_or_else(|| EagleError::ConflictNotFound(target.to_string()))?;
                    if target_rec.entity_id != record.entity_id {
                        return Err(EagleError::InvalidConflict(format!(
                            "settlement for '{}' references a record for '{}'",
                            record.entity_id, target_rec.entity_id
                        )));
                    }
                    if open_key.as_deref() != Some(target_key.as_slice()) {
                        return Err(EagleError::InvalidConflict(format!(
                            "record {target} is not awaiting review"
                        )));
                    }
                    open.remove(entity).map_err(db_err)?;
                }
                None if open_key.is_some() => {
                    return Err(EagleError::ConflictAlreadyOpen(record.entity_id.clone()));
                }
                None => {}
            }

            records
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
            ids.insert(record.id.as_bytes().as_slice(), key.as_slice())
                .map_err(db_err)?;
            if record.requires_review && record.settles.is_none() {
                open.insert(entity, key.as_slice()).map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;

        tracing::debug!(
            id = %record.id,
            entity = %record.entity_id,
            requires_review = record.requires_review,
            "conflict record appended"
        );
        Ok(())
    }

    /// The whole trail, oldest first.
    pub fn list_all(&self) -> Result<Vec<ConflictRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RECORDS).map_err(db_err)?;
        decode(&table)
    }

    /// Records still awaiting a settlement, oldest first.
    pub fn open_records(&self) -> Result<Vec<ConflictRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let records = rt.open_table(RECORDS).map_err(db_err)?;
        let open = rt.open_table(OPEN_BY_ENTITY).map_err(db_err)?;

        let mut keys = Vec::new();
        for entry in open.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            keys.push(v.value().to_vec());
        }
        keys.sort();

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(rec) = lookup(&records, &key)? {
                out.push(rec);
            }
        }
        Ok(out)
    }

    pub fn get(&self, id: Uuid) -> Result<ConflictRecord> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let records = rt.open_table(RECORDS).map_err(db_err)?;
        let ids = rt.open_table(RECORD_IDS).map_err(db_err)?;
        let key = record_key_for(&ids, id)?;
        lookup(&records, &key)?.ok_or_else(|| EagleError::ConflictNotFound(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{Candidate, Conflict, ConflictPolicy, Stamp, Strategy};
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, ConflictLog) {
        let dir = TempDir::new().unwrap();
        let log = ConflictLog::open(&dir.path().join(".eagle/conflicts.redb")).unwrap();
        (dir, log)
    }

    fn conflict(entity: &str) -> Conflict {
        let now = Utc::now();
        Conflict {
            entity_id: entity.into(),
            category: None,
            candidates: vec![
                Candidate {
                    region: "us-east-1".into(),
                    value: json!(1),
                    timestamp: now - Duration::seconds(5),
                    ttl_remaining_seconds: None,
                },
                Candidate {
                    region: "us-west-2".into(),
                    value: json!(2),
                    timestamp: now,
                    ttl_remaining_seconds: None,
                },
            ],
        }
    }

    fn stamp(at: DateTime<Utc>) -> Stamp {
        Stamp::new(Uuid::new_v4(), at)
    }

    fn record(entity: &str, strategy: Strategy, at: DateTime<Utc>) -> ConflictRecord {
        ConflictPolicy::default()
            .resolve_with(&conflict(entity), strategy, "us-east-1", stamp(at))
            .unwrap()
    }

    #[test]
    fn list_is_chronological() {
        let (_dir, log) = open_tmp();
        let now = Utc::now();
        let later = record("a", Strategy::LastWriteWins, now + Duration::seconds(1));
        let earlier = record("b", Strategy::LastWriteWins, now);
        log.append(&later).unwrap();
        log.append(&earlier).unwrap();

        let all = log.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, earlier.id);
        assert_eq!(all[1], later);
        assert_eq!(log.get(later.id).unwrap(), later);
    }

    #[test]
    fn one_open_record_per_entity() {
        let (_dir, log) = open_tmp();
        let now = Utc::now();
        let open = record("order:7", Strategy::ImmutableAppendOnly, now);
        log.append(&open).unwrap();

        let again = record("order:7", Strategy::ImmutableAppendOnly, now + Duration::seconds(1));
        assert!(matches!(
            log.append(&again),
            Err(EagleError::ConflictAlreadyOpen(_))
        ));
        let resolved = record("order:7", Strategy::LastWriteWins, now + Duration::seconds(1));
        assert!(log.append(&resolved).is_err());

        // Other entities are unaffected.
        log.append(&record("order:8", Strategy::ImmutableAppendOnly, now))
            .unwrap();
        assert_eq!(log.open_records().unwrap().len(), 2);
    }

    #[test]
    fn settlement_closes_open_record() {
        let (_dir, log) = open_tmp();
        let now = Utc::now();
        let open = record("order:7", Strategy::ImmutableAppendOnly, now);
        log.append(&open).unwrap();

        let settled =
            ConflictRecord::settlement(&open, "us-west-2", stamp(now + Duration::seconds(1))).unwrap();
        log.append(&settled).unwrap();
        assert!(log.open_records().unwrap().is_empty());

        // Both entries stay in the trail.
        assert_eq!(log.list_all().unwrap().len(), 2);

        // A second settlement of the same record is refused.
        let twice =
            ConflictRecord::settlement(&open, "us-east-1", stamp(now + Duration::seconds(2))).unwrap();
        assert!(log.append(&twice).is_err());

        // The entity can conflict again.
        log.append(&record(
            "order:7",
            Strategy::ImmutableAppendOnly,
            now + Duration::seconds(3),
        ))
        .unwrap();
    }

    #[test]
    fn settlement_of_unknown_record_fails() {
        let (_dir, log) = open_tmp();
        let now = Utc::now();
        let open = record("order:7", Strategy::ImmutableAppendOnly, now);
        let settled = ConflictRecord::settlement(&open, "us-west-2", stamp(now)).unwrap();
        assert!(matches!(
            log.append(&settled),
            Err(EagleError::ConflictNotFound(_))
        ));
        assert!(matches!(
            log.get(Uuid::new_v4()),
            Err(EagleError::ConflictNotFound(_))
        ));
    }

    #[test]
    fn reopening_keeps_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conflicts.redb");
        let rec = record("k", Strategy::LastWriteWins, Utc::now());
        {
            let log = ConflictLog::open(&path).unwrap();
            log.append(&rec).unwrap();
        }
        let log = ConflictLog::open(&path).unwrap();
        assert_eq!(log.list_all().unwrap(), vec![rec]);
    }

    #[test]
    fn open_index_survives_reopen_and_tracks_many_entities() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conflicts.redb");
        let now = Utc::now();
        let open = record("order:1", Strategy::ImmutableAppendOnly, now);
        {
            let log = ConflictLog::open(&path).unwrap();
            log.append(&open).unwrap();
            for n in 2..50 {
                let at = now + Duration::milliseconds(n);
                log.append(&record(&format!("order:{n}"), Strategy::LastWriteWins, at))
                    .unwrap();
            }
        }

        let log = ConflictLog::open(&path).unwrap();
        let again = record("order:1", Strategy::ImmutableAppendOnly, now + Duration::seconds(1));
        assert!(matches!(
            log.append(&again),
            Err(EagleError::ConflictAlreadyOpen(_))
        ));
        assert_eq!(log.open_records().unwrap(), vec![open.clone()]);

        let settled =
            ConflictRecord::settlement(&open, "us-east-1", stamp(now + Duration::seconds(2))).unwrap();
        log.append(&settled).unwrap();
        assert!(log.open_records().unwrap().is_empty());
        assert_eq!(log.get(settled.id).unwrap(), settled);
        assert_eq!(log.list_all().unwrap().len(), 50);
    }
}
