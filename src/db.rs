use crate::clustering::{records_from_pairs, NameRecord, RunOutcome};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Alias type written for clusters confirmed from a clustering run
pub const FUZZY_ALIAS_TYPE: &str = "fuzzy";

/// One leader as the record store holds it
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LeaderRow {
    pub name: String,
    pub lead_count: u64,
}

/// Turn store rows into engine records, rejecting duplicate names
pub fn leader_records(rows: &[LeaderRow]) -> crate::error::Result<Vec<NameRecord>> {
    records_from_pairs(rows.iter().map(|row| (row.name.as_str(), row.lead_count)))
}

/// Kind recorded when a clustering run's aliases are saved
pub const CLUSTER_CONFIRMED: &str = "cluster_confirmed";

/// One entry in a leader's audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LeaderEvent {
    pub event_id: String,
    pub recorded_at: DateTime<Utc>,
    pub kind: String,
    /// Canonical name of the leader the event is about
    pub leader: String,
    pub details: serde_json::Value,
    pub source: String,
}

impl LeaderEvent {
    pub fn new(kind: &str, leader: &str, details: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            recorded_at: Utc::now(),
            kind: kind.to_string(),
            leader: leader.to_string(),
            details,
            source: format!("leader-clusters {}", crate::VERSION),
        }
    }

    /// A cluster whose `new_aliases` were just written to the store
    pub fn cluster_confirmed(cluster: &NameRecord, new_aliases: &[&str]) -> Self {
        Self::new(
            CLUSTER_CONFIRMED,
            &cluster.canonical_name,
            serde_json::json!({
                "key": cluster.key,
                "weight": cluster.weight,
                "members": cluster.provenance.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
                "new_aliases": new_aliases,
            }),
        )
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leaders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            lead_count INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leader_name_aliases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            leader_id INTEGER NOT NULL REFERENCES leaders(id),
            name TEXT NOT NULL,
            alias TEXT NOT NULL,
            type TEXT NOT NULL,
            UNIQUE(name, alias)
        )",
        [],
    )?;

    // Audit trail, keyed by canonical leader name
    conn.execute(
        "CREATE TABLE IF NOT EXISTS leader_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            recorded_at TEXT NOT NULL,
            kind TEXT NOT NULL,
            leader TEXT NOT NULL,
            details TEXT NOT NULL,
            source TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_aliases_leader ON leader_name_aliases(leader_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_leader ON leader_events(leader)",
        [],
    )?;

    Ok(())
}

/// Read `name,lead_count` rows from a CSV file
pub fn load_csv(csv_path: &Path) -> Result<Vec<LeaderRow>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let row: LeaderRow = result
            .with_context(|| format!("Failed to deserialize leader on data row {}", line + 1))?;
        rows.push(row);
    }

    Ok(rows)
}

/// Insert leaders, skipping names already in the store. The batch itself
/// must not repeat a name, and every count must fit SQLite's INTEGER;
/// either problem rejects the whole batch before anything is written.
pub fn insert_leaders(conn: &Connection, rows: &[LeaderRow]) -> Result<usize> {
    leader_records(rows).context("Import batch rejected")?;

    let counts = rows
        .iter()
        .map(|row| {
            i64::try_from(row.lead_count).with_context(|| {
                format!(
                    "Lead count {} for {:?} is too large to store",
                    row.lead_count, row.name
                )
            })
        })
        .collect::<Result<Vec<i64>>>()?;

    let mut inserted = 0;
    let mut existing = 0;

    for (row, lead_count) in rows.iter().zip(counts) {
        let result = conn.execute(
            "INSERT INTO leaders (name, lead_count) VALUES (?1, ?2)",
            params![row.name, lead_count],
        );

        match result {
            Ok(_) => inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                warn!("Leader {:?} already stored; keeping the stored count", row.name);
                existing += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(inserted, existing, "Imported leaders");

    Ok(inserted)
}

/// All leaders in insertion order
pub fn load_leaders(conn: &Connection) -> Result<Vec<LeaderRow>> {
    let mut stmt = conn.prepare("SELECT name, lead_count FROM leaders ORDER BY id")?;

    let rows = stmt
        .query_map([], |row| {
            let lead_count: i64 = row.get(1)?;
            Ok(LeaderRow {
                name: row.get(0)?,
                lead_count: lead_count.max(0) as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn leader_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM leaders", [], |row| row.get(0))?;
    Ok(count)
}

/// Persist every multi-name cluster as aliases of its canonical leader.
/// Runs in one transaction; returns the number of alias rows written.
/// A cluster gets an audit event only when it added at least one alias,
/// so saving the same outcome twice leaves the trail unchanged.
pub fn save_clusters(conn: &mut Connection, outcome: &RunOutcome) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut written = 0;

    for cluster in outcome.multi_member_clusters() {
        let leader_id: i64 = tx
            .query_row(
                "SELECT id FROM leaders WHERE name = ?1",
                params![cluster.canonical_name],
                |row| row.get(0),
            )
            .optional()?
            .with_context(|| {
                format!("Canonical leader {:?} is not in the store", cluster.canonical_name)
            })?;

        let mut new_aliases = Vec::new();
        for member in &cluster.provenance {
            if member.name == cluster.canonical_name {
                continue;
            }
            let changed = tx.execute(
                "INSERT OR IGNORE INTO leader_name_aliases (leader_id, name, alias, type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![leader_id, cluster.canonical_name, member.name, FUZZY_ALIAS_TYPE],
            )?;
            if changed > 0 {
                new_aliases.push(member.name.as_str());
            }
        }

        if new_aliases.is_empty() {
            debug!(leader = %cluster.canonical_name, "Cluster already saved");
            continue;
        }

        written += new_aliases.len();
        record_event(&tx, &LeaderEvent::cluster_confirmed(cluster, &new_aliases))?;
    }

    tx.commit()?;
    info!(aliases = written, "Saved clusters");

    Ok(written)
}

/// Aliases recorded for a canonical leader name
pub fn get_aliases(conn: &Connection, name: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT alias FROM leader_name_aliases WHERE name = ?1 ORDER BY id",
    )?;

    let aliases = stmt
        .query_map(params![name], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(aliases)
}

pub fn record_event(conn: &Connection, event: &LeaderEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO leader_events (event_id, recorded_at, kind, leader, details, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.recorded_at.to_rfc3339(),
            event.kind,
            event.leader,
            serde_json::to_string(&event.details)?,
            event.source,
        ],
    )?;

    Ok(())
}

/// Audit trail for one canonical leader, oldest first
pub fn leader_history(conn: &Connection, leader: &str) -> Result<Vec<LeaderEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, recorded_at, kind, leader, details, source
         FROM leader_events
         WHERE leader = ?1
         ORDER BY id",
    )?;

    let events = stmt
        .query_map(params![leader], |row| {
            let recorded_at: String = row.get(1)?;
            let details: String = row.get(4)?;

            Ok(LeaderEvent {
                event_id: row.get(0)?,
                recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                    .map_err(|e| conversion_error(1, e))?
                    .with_timezone(&Utc),
                kind: row.get(2)?,
                leader: row.get(3)?,
                details: serde_json::from_str(&details).map_err(|e| conversion_error(4, e))?,
                source: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::ClusterEngine;
    use std::io::Write;

    fn leader(name: &str, lead_count: u64) -> LeaderRow {
        LeaderRow {
            name: name.to_string(),
            lead_count,
        }
    }

    fn store_with(rows: &[LeaderRow]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_leaders(&conn, rows).unwrap();
        conn
    }

    #[test]
    fn test_import_skips_existing_names() {
        let conn = store_with(&[leader("Ann Lee", 3), leader("Bo Day", 1)]);

        let inserted = insert_leaders(&conn, &[leader("Ann Lee", 9), leader("Cy Moss", 2)]).unwrap();

        assert_eq!(inserted, 1, "Only the new name should be inserted");
        assert_eq!(leader_count(&conn).unwrap(), 3);
    }

    #[test]
    fn test_load_leaders_in_insertion_order() {
        let conn = store_with(&[leader("Cy Moss", 2), leader("Ann Lee", 3)]);

        let rows = load_leaders(&conn).unwrap();

        assert_eq!(rows, vec![leader("Cy Moss", 2), leader("Ann Lee", 3)]);
    }

    #[test]
    fn test_load_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,lead_count").unwrap();
        writeln!(file, "\"Smith, John\",10").unwrap();
        writeln!(file, "Jane Doe,1").unwrap();

        let rows = load_csv(file.path()).unwrap();

        assert_eq!(rows, vec![leader("Smith, John", 10), leader("Jane Doe", 1)]);
    }

    #[test]
    fn test_load_csv_bad_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,lead_count").unwrap();
        writeln!(file, "Jane Doe,lots").unwrap();

        let err = load_csv(file.path()).unwrap_err();
        assert!(err.to_string().contains("data row 1"));
    }

    #[test]
    fn test_leader_records_reject_duplicates() {
        let rows = vec![leader("Ann Lee", 1), leader("Ann Lee", 2)];
        assert!(leader_records(&rows).is_err());
    }

    #[test]
    fn test_import_rejects_repeated_name_in_batch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,lead_count").unwrap();
        writeln!(file, "Ann Lee,3").unwrap();
        writeln!(file, "Bo Day,1").unwrap();
        writeln!(file, "Ann Lee,9").unwrap();

        let rows = load_csv(file.path()).unwrap();
        let conn = store_with(&[]);

        let err = insert_leaders(&conn, &rows).unwrap_err();
        assert!(format!("{:#}", err).contains("Ann Lee"));
        assert_eq!(leader_count(&conn).unwrap(), 0, "Nothing should be written");
    }

    #[test]
    fn test_import_rejects_count_too_large_to_store() {
        let conn = store_with(&[]);

        let err = insert_leaders(&conn, &[leader("Bo Day", 2), leader("Ann Lee", u64::MAX)])
            .unwrap_err();

        assert!(err.to_string().contains("Ann Lee"));
        assert_eq!(leader_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_largest_storable_count_round_trips() {
        let big = i64::MAX as u64;
        let conn = store_with(&[leader("Ann Lee", big)]);

        assert_eq!(load_leaders(&conn).unwrap(), vec![leader("Ann Lee", big)]);
    }

    #[test]
    fn test_save_clusters_writes_aliases_and_events() {
        let rows = vec![leader("Mary Ann", 5), leader("Mary-Ann", 1), leader("Bo Day", 2)];
        let mut conn = store_with(&rows);

        let engine = ClusterEngine::with_default_rules().unwrap();
        let outcome = engine.run(leader_records(&rows).unwrap()).unwrap();

        let written = save_clusters(&mut conn, &outcome).unwrap();
        assert_eq!(written, 1);
        assert_eq!(get_aliases(&conn, "Mary Ann").unwrap(), vec!["Mary-Ann".to_string()]);

        let history = leader_history(&conn, "Mary Ann").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, CLUSTER_CONFIRMED);
        assert_eq!(history[0].details["weight"], 6);
        assert_eq!(history[0].details["new_aliases"], serde_json::json!(["Mary-Ann"]));
        assert!(leader_history(&conn, "Bo Day").unwrap().is_empty());
    }

    #[test]
    fn test_saving_twice_adds_nothing() {
        let rows = vec![leader("Mary Ann", 5), leader("Mary-Ann", 1)];
        let mut conn = store_with(&rows);

        let engine = ClusterEngine::with_default_rules().unwrap();
        let outcome = engine.run(leader_records(&rows).unwrap()).unwrap();

        assert_eq!(save_clusters(&mut conn, &outcome).unwrap(), 1);
        assert_eq!(save_clusters(&mut conn, &outcome).unwrap(), 0);

        assert_eq!(get_aliases(&conn, "Mary Ann").unwrap().len(), 1);
        assert_eq!(leader_history(&conn, "Mary Ann").unwrap().len(), 1);
    }

    #[test]
    fn test_save_clusters_needs_canonical_leader() {
        let mut conn = store_with(&[leader("Bo Day", 2)]);

        let engine = ClusterEngine::with_default_rules().unwrap();
        let records =
            leader_records(&[leader("Mary Ann", 5), leader("Mary-Ann", 1)]).unwrap();
        let outcome = engine.run(records).unwrap();

        let err = save_clusters(&mut conn, &outcome).unwrap_err();
        assert!(err.to_string().contains("not in the store"));
        assert!(get_aliases(&conn, "Mary Ann").unwrap().is_empty());
        assert!(leader_history(&conn, "Mary Ann").unwrap().is_empty());
    }

    #[test]
    fn test_leader_history_oldest_first() {
        let conn = store_with(&[]);

        for (leader, n) in [("Ann Lee", 1), ("Bo Day", 0), ("Ann Lee", 2)] {
            let event = LeaderEvent::new("note", leader, serde_json::json!({ "n": n }));
            record_event(&conn, &event).unwrap();
        }

        let history = leader_history(&conn, "Ann Lee").unwrap();

        let order: Vec<i64> = history.iter().map(|e| e.details["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![1, 2]);
        assert!(history[0].source.starts_with("leader-clusters"));
    }
}
