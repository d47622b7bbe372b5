//! Append-only access log and identity directory.

use crate::db;
use crate::error::StorageError;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use turnstile_core::{
    AccessEvent, AccessLog, EventKind, IdentityId, LastEvent, Profile, ProfileDirectory, StoreError,
    TIMESTAMP_FORMAT,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fields supplied when registering a new identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub age: u32,
}

/// One access-log row joined with the identity's name, if known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub identity: Option<IdentityId>,
    pub recorded_at: String,
    pub kind: String,
    pub confidence: Option<f64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub identity: Option<IdentityId>,
    /// Inclusive.
    pub from: Option<NaiveDate>,
    /// Inclusive.
    pub to: Option<NaiveDate>,
    /// Newest rows only.
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub active_identities: u64,
    pub events_today: u64,
    /// Entries, exits and legacy grants.
    pub permitted: u64,
    pub denied: u64,
    pub unknown: u64,
}

const LOG_ENTRY_COLUMNS: &str = "al.id, al.identity_id, al.recorded_at, al.kind, al.confidence,
                                 i.first_name, i.last_name, i.role";

fn log_entry(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        identity: row.get(1)?,
        recorded_at: row.get(2)?,
        kind: row.get(3)?,
        confidence: row.get(4)?,
        first_name: row.get(5)?,
        last_name: row.get(6)?,
        role: row.get(7)?,
    })
}

fn profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        role: row.get(3)?,
        age: row.get(4)?,
        registered_at: row.get(5)?,
        photo_count: row.get(6)?,
        active: row.get(7)?,
    })
}

const PROFILE_COLUMNS: &str =
    "id, first_name, last_name, role, age, registered_at, photo_count, active";

/// SQLite-backed access log and identity directory.
pub struct SqliteAccessLog {
    conn: Connection,
}

impl SqliteAccessLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            conn: db::open(path.as_ref())?,
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: db::open_in_memory()?,
        })
    }

    fn insert_event(&self, event: &AccessEvent) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO access_log (identity_id, recorded_at, kind, confidence)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.identity,
                event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                event.kind.as_str(),
                event.confidence.map(f64::from),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Latest matching row by append order. Rows are never updated, so the
    /// highest id is the latest write even when a stored timestamp is garbled.
    fn latest_event(
        &self,
        identity: IdentityId,
        kinds: &[EventKind],
    ) -> Result<Option<LastEvent>, StorageError> {
        if kinds.is_empty() {
            return Ok(None);
        }
        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            "SELECT kind, recorded_at FROM access_log
             WHERE identity_id = ? AND kind IN ({placeholders})
             ORDER BY id DESC
             LIMIT 1"
        );
        let mut values = vec![Value::Integer(identity)];
        values.extend(kinds.iter().map(|k| Value::Text(k.as_str().to_string())));

        let row = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| {
                let kind: String = row.get(0)?;
                let recorded_at: String = row.get(1)?;
                Ok((kind, recorded_at))
            })
            .optional()?;

        Ok(row.and_then(|(kind, recorded_at)| match kind.parse::<EventKind>() {
            Ok(kind) => Some(LastEvent { kind, recorded_at }),
            Err(e) => {
                tracing::warn!(identity, error = %e, "unreadable event kind in access log");
                None
            }
        }))
    }

    // --- Identity directory ---

    pub fn add_identity(&self, new: &NewIdentity, now: NaiveDateTime) -> Result<IdentityId, StorageError> {
        let result = self.conn.execute(
            "INSERT INTO identities (first_name, last_name, role, age, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.first_name,
                new.last_name,
                new.role,
                new.age,
                now.format(TIMESTAMP_FORMAT).to_string(),
            ],
        );
        match result {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                tracing::info!(id, first_name = %new.first_name, last_name = %new.last_name, "identity added");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StorageError::DuplicateIdentity {
                    first_name: new.first_name.clone(),
                    last_name: new.last_name.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_identity(&self, id: IdentityId) -> Result<Option<Profile>, StorageError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM identities WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![id], profile).optional()?)
    }

    pub fn list_identities(&self, active_only: bool) -> Result<Vec<Profile>, StorageError> {
        let filter = if active_only { "WHERE active = 1" } else { "" };
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM identities {filter} ORDER BY last_name, first_name"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], profile)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_photo_count(&self, id: IdentityId, photo_count: u32) -> Result<(), StorageError> {
        let n = self.conn.execute(
            "UPDATE identities SET photo_count = ?1 WHERE id = ?2",
            params![photo_count, id],
        )?;
        if n == 0 {
            return Err(StorageError::IdentityNotFound(id));
        }
        Ok(())
    }

    /// Soft delete: the identity stays in the directory and history, but
    /// recognitions of it are denied.
    pub fn deactivate(&self, id: IdentityId) -> Result<(), StorageError> {
        let n = self
            .conn
            .execute("UPDATE identities SET active = 0 WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StorageError::IdentityNotFound(id));
        }
        tracing::info!(id, "identity deactivated");
        Ok(())
    }

    /// Remove the identity and every access-log row that names it.
    pub fn delete_permanently(&mut self, id: IdentityId) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM access_log WHERE identity_id = ?1", params![id])?;
        let n = tx.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StorageError::IdentityNotFound(id));
        }
        tx.commit()?;
        tracing::info!(id, "identity permanently deleted");
        Ok(())
    }

    // --- Reports ---

    pub fn recent_events(&self, limit: u32) -> Result<Vec<LogEntry>, StorageError> {
        let sql = format!(
            "SELECT {LOG_ENTRY_COLUMNS}
             FROM access_log al
             LEFT JOIN identities i ON al.identity_id = i.id
             ORDER BY al.id DESC
             LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], log_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Events matching `filter`, newest first.
    pub fn events(&self, filter: &EventFilter) -> Result<Vec<LogEntry>, StorageError> {
        let mut sql = format!(
            "SELECT {LOG_ENTRY_COLUMNS}
             FROM access_log al
             LEFT JOIN identities i ON al.identity_id = i.id
             WHERE 1 = 1"
        );
        let mut values = Vec::new();
        if let Some(identity) = filter.identity {
            sql.push_str(" AND al.identity_id = ?");
            values.push(Value::Integer(identity));
        }
        if let Some(from) = filter.from {
            sql.push_str(" AND date(al.recorded_at) >= date(?)");
            values.push(Value::Text(from.format(DATE_FORMAT).to_string()));
        }
        if let Some(to) = filter.to {
            sql.push_str(" AND date(al.recorded_at) <= date(?)");
            values.push(Value::Text(to.format(DATE_FORMAT).to_string()));
        }
        sql.push_str(" ORDER BY al.id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::from(limit)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), log_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn statistics(&self, today: NaiveDate) -> Result<Statistics, StorageError> {
        let active_identities: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM identities WHERE active = 1", [], |r| r.get(0))?;
        let events_today: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM access_log WHERE date(recorded_at) = date(?1)",
            params![today.format(DATE_FORMAT).to_string()],
            |r| r.get(0),
        )?;

        let mut stats = Statistics {
            active_identities: active_identities as u64,
            events_today: events_today as u64,
            permitted: 0,
            denied: 0,
            unknown: 0,
        };

        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM access_log GROUP BY kind")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (kind, count) = row?;
            let count = count as u64;
            match kind.parse::<EventKind>() {
                Ok(EventKind::Entry | EventKind::Exit | EventKind::Permitted) => stats.permitted += count,
                Ok(EventKind::Denied) => stats.denied += count,
                Ok(EventKind::Unknown) => stats.unknown += count,
                Err(e) => tracing::warn!(error = %e, count, "uncounted access log rows"),
            }
        }
        Ok(stats)
    }

    /// Identities whose last entry/exit on `date` is an entry, i.e. who never
    /// clocked out that day.
    pub fn open_entries(&self, date: NaiveDate) -> Result<Vec<LogEntry>, StorageError> {
        let sql = format!(
            "SELECT {LOG_ENTRY_COLUMNS}
             FROM access_log al
             JOIN (
                 SELECT identity_id, MAX(id) AS last_id
                 FROM access_log
                 WHERE date(recorded_at) = date(?1)
                   AND kind IN ('entry', 'exit', 'permitted')
                 GROUP BY identity_id
             ) t ON al.id = t.last_id
             JOIN identities i ON i.id = al.identity_id
             WHERE al.kind IN ('entry', 'permitted')
             ORDER BY i.last_name, i.first_name"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], log_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl AccessLog for SqliteAccessLog {
    fn append(&mut self, event: &AccessEvent) -> Result<(), StoreError> {
        self.insert_event(event)?;
        Ok(())
    }

    fn last_event_for(
        &self,
        identity: IdentityId,
        kinds: &[EventKind],
    ) -> Result<Option<LastEvent>, StoreError> {
        Ok(self.latest_event(identity, kinds)?)
    }
}

impl ProfileDirectory for SqliteAccessLog {
    fn profile(&self, identity: IdentityId) -> Result<Option<Profile>, StoreError> {
        Ok(self.get_identity(identity)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn person(first: &str, last: &str) -> NewIdentity {
        NewIdentity {
            first_name: first.into(),
            last_name: last.into(),
            role: "Technician".into(),
            age: 40,
        }
    }

    fn event(identity: Option<IdentityId>, kind: EventKind, ts: &str) -> AccessEvent {
        AccessEvent {
            identity,
            kind,
            timestamp: at(ts),
            confidence: Some(0.8),
        }
    }

    #[test]
    fn test_append_then_last_event_for() {
        let mut log = SqliteAccessLog::open_in_memory().unwrap();
        assert_eq!(log.last_event_for(42, &EventKind::PRESENCE).unwrap(), None);

        log.append(&event(Some(42), EventKind::Entry, "2024-01-10 08:00:00")).unwrap();
        log.append(&event(Some(42), EventKind::Denied, "2024-01-10 08:01:00")).unwrap();
        log.append(&event(Some(7), EventKind::Exit, "2024-01-10 08:02:00")).unwrap();

        let last = log.last_event_for(42, &EventKind::PRESENCE).unwrap().unwrap();
        assert_eq!(last.kind, EventKind::Entry);
        assert_eq!(last.recorded_at, "2024-01-10 08:00:00");

        let denied = log.last_event_for(42, &[EventKind::Denied]).unwrap().unwrap();
        assert_eq!(denied.recorded_at, "2024-01-10 08:01:00");

        assert_eq!(log.last_event_for(42, &[]).unwrap(), None);
    }

    #[test]
    fn test_last_event_is_by_append_order_even_if_garbled() {
        let mut log = SqliteAccessLog::open_in_memory().unwrap();
        log.append(&event(Some(1), EventKind::Entry, "2024-01-10 08:00:00")).unwrap();
        log.conn
            .execute(
                "INSERT INTO access_log (identity_id, recorded_at, kind, confidence)
                 VALUES (1, 'not a date', 'exit', 0.9)",
                [],
            )
            .unwrap();
        let last = log.last_event_for(1, &EventKind::PRESENCE).unwrap().unwrap();
        assert_eq!(last.kind, EventKind::Exit);
        assert_eq!(last.recorded_at, "not a date");
    }

    #[test]
    fn test_identity_directory() {
        let mut log = SqliteAccessLog::open_in_memory().unwrap();
        let now = at("2024-01-01 09:00:00");
        let ana = log.add_identity(&person("Ana", "Ruiz"), now).unwrap();
        let bo = log.add_identity(&person("Bo", "Andersen"), now).unwrap();

        let err = log.add_identity(&person("Ana", "Ruiz"), now).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateIdentity { .. }));

        let p = log.profile(ana).unwrap().unwrap();
        assert_eq!(p.display_name(), "Ana Ruiz");
        assert!(p.active);
        assert_eq!(p.registered_at, "2024-01-01 09:00:00");

        log.set_photo_count(ana, 50).unwrap();
        assert_eq!(log.get_identity(ana).unwrap().unwrap().photo_count, 50);

        let names: Vec<String> = log
            .list_identities(true)
            .unwrap()
            .iter()
            .map(|p| p.last_name.clone())
            .collect();
        assert_eq!(names, vec!["Andersen", "Ruiz"]);

        log.deactivate(bo).unwrap();
        assert_eq!(log.list_identities(true).unwrap().len(), 1);
        assert_eq!(log.list_identities(false).unwrap().len(), 2);
        assert!(!log.get_identity(bo).unwrap().unwrap().active);

        log.append(&event(Some(ana), EventKind::Entry, "2024-01-10 08:00:00")).unwrap();
        log.delete_permanently(ana).unwrap();
        assert!(log.get_identity(ana).unwrap().is_none());
        assert!(log.last_event_for(ana, &EventKind::PRESENCE).unwrap().is_none());

        assert!(matches!(log.deactivate(999), Err(StorageError::IdentityNotFound(999))));
        assert!(matches!(log.delete_permanently(999), Err(StorageError::IdentityNotFound(999))));
    }

    #[test]
    fn test_reports() {
        let mut log = SqliteAccessLog::open_in_memory().unwrap();
        let now = at("2024-01-01 09:00:00");
        let ana = log.add_identity(&person("Ana", "Ruiz"), now).unwrap();
        let bo = log.add_identity(&person("Bo", "Andersen"), now).unwrap();

        log.append(&event(Some(ana), EventKind::Entry, "2024-01-09 08:00:00")).unwrap();
        log.append(&event(Some(ana), EventKind::Exit, "2024-01-09 17:00:00")).unwrap();
        log.append(&event(Some(ana), EventKind::Entry, "2024-01-10 08:00:00")).unwrap();
        log.append(&event(Some(bo), EventKind::Entry, "2024-01-10 08:10:00")).unwrap();
        log.append(&event(Some(bo), EventKind::Exit, "2024-01-10 16:00:00")).unwrap();
        log.append(&event(None, EventKind::Unknown, "2024-01-10 12:00:00")).unwrap();
        log.append(&event(Some(bo), EventKind::Denied, "2024-01-10 18:00:00")).unwrap();

        let recent = log.recent_events(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, "denied");
        assert_eq!(recent[1].kind, "unknown");
        assert_eq!(recent[1].first_name, None);

        let ana_today = log
            .events(&EventFilter {
                identity: Some(ana),
                from: Some(day("2024-01-10")),
                to: Some(day("2024-01-10")),
                limit: None,
            })
            .unwrap();
        assert_eq!(ana_today.len(), 1);
        assert_eq!(ana_today[0].first_name.as_deref(), Some("Ana"));
        assert_eq!(log.events(&EventFilter::default()).unwrap().len(), 7);

        let bo_latest = log
            .events(&EventFilter {
                identity: Some(bo),
                limit: Some(2),
                ..EventFilter::default()
            })
            .unwrap();
        let kinds: Vec<&str> = bo_latest.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["denied", "exit"]);

        let stats = log.statistics(day("2024-01-10")).unwrap();
        assert_eq!(
            stats,
            Statistics {
                active_identities: 2,
                events_today: 5,
                permitted: 5,
                denied: 1,
                unknown: 1,
            }
        );

        let open = log.open_entries(day("2024-01-10")).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].identity, Some(ana));
        assert!(log.open_entries(day("2024-01-09")).unwrap().is_empty());
    }
}
