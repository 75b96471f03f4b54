use crate::domain::{Severity, Source, StateCode, Violation};
use crate::error::{Result, TrackerError};
use crate::pipeline::run::{RunStatus, RunSummary};
use crate::storage::{GroupBy, PageRequest, UpsertOutcome, ViolationFilter, ViolationStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/001_create_violations.sql");

const VIOLATION_COLUMNS: &str = "id, source, source_id, facility_name, location, state, county, \
     latitude, longitude, violation_type, description, severity, date, penalty_amount, \
     raw_payload, first_seen_at, updated_at";

/// SQLite-backed store. All access goes through one connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    // fixed width so text comparison orders chronologically
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn store_err(context: &str, e: impl std::fmt::Display) -> TrackerError {
    TrackerError::Store(format!("{context}: {e}"))
}

/// Escape LIKE wildcards and wrap in `%...%`
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Lowercased name and description; search matches against this column
/// because SQLite's `lower()` only folds ASCII.
fn search_text(violation: &Violation) -> String {
    let mut text = violation.facility_name.to_lowercase();
    if let Some(description) = &violation.description {
        text.push('\n');
        text.push_str(&description.to_lowercase());
    }
    text
}

/// Column values as read back, before conversion into domain types
struct StoredViolation {
    id: String,
    source: String,
    source_id: String,
    facility_name: String,
    location: Option<String>,
    state: Option<String>,
    county: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    violation_type: Option<String>,
    description: Option<String>,
    severity: String,
    date: Option<String>,
    penalty_amount: Option<f64>,
    raw_payload: String,
    first_seen_at: String,
    updated_at: String,
}

impl StoredViolation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source: row.get(1)?,
            source_id: row.get(2)?,
            facility_name: row.get(3)?,
            location: row.get(4)?,
            state: row.get(5)?,
            county: row.get(6)?,
            latitude: row.get(7)?,
            longitude: row.get(8)?,
            violation_type: row.get(9)?,
            description: row.get(10)?,
            severity: row.get(11)?,
            date: row.get(12)?,
            penalty_amount: row.get(13)?,
            raw_payload: row.get(14)?,
            first_seen_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_violation(self) -> Result<Violation> {
        let parse_ts = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| store_err("bad timestamp", e))
        };
        Ok(Violation {
            id: Uuid::parse_str(&self.id).map_err(|e| store_err("bad id", e))?,
            source: self.source.parse::<Source>().map_err(|e| store_err("bad source", e))?,
            source_id: self.source_id,
            facility_name: self.facility_name,
            location: self.location,
            state: match self.state {
                Some(code) => Some(
                    StateCode::parse(&code)
                        .ok_or_else(|| store_err("bad state", &code))?,
                ),
                None => None,
            },
            county: self.county,
            latitude: self.latitude,
            longitude: self.longitude,
            violation_type: self.violation_type,
            description: self.description,
            severity: Severity::parse(&self.severity)
                .ok_or_else(|| store_err("bad severity", &self.severity))?,
            date: match self.date {
                Some(d) => Some(
                    NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|e| store_err("bad date", e))?,
                ),
                None => None,
            },
            penalty_amount: self.penalty_amount,
            raw_payload: serde_json::from_str(&self.raw_payload)?,
            first_seen_at: parse_ts(&self.first_seen_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        info!("Opened violation store at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?.execute_batch(MIGRATION)?;
        debug!("violation store schema is current");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TrackerError::Store("connection mutex poisoned".into()))
    }

    fn where_clause(filter: &ViolationFilter) -> (String, Vec<SqlValue>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(search) = &filter.search {
            clauses.push("search_text LIKE ? ESCAPE '\\'");
            values.push(SqlValue::Text(like_pattern(search)));
        }
        if let Some(state) = &filter.state {
            clauses.push("state = ?");
            values.push(SqlValue::Text(state.as_str().to_string()));
        }
        if let Some(source) = filter.source {
            clauses.push("source = ?");
            values.push(SqlValue::Text(source.as_str().to_string()));
        }
        if let Some(severity) = filter.severity {
            clauses.push("severity = ?");
            values.push(SqlValue::Text(severity.as_str().to_string()));
        }
        if let Some(kind) = &filter.violation_type {
            clauses.push("lower(coalesce(violation_type, '')) LIKE ? ESCAPE '\\'");
            values.push(SqlValue::Text(like_pattern(kind)));
        }
        if let Some(from) = filter.date_from {
            clauses.push("date >= ?");
            values.push(SqlValue::Text(from.to_string()));
        }
        if let Some(to) = filter.date_to {
            clauses.push("date <= ?");
            values.push(SqlValue::Text(to.to_string()));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

#[async_trait]
impl ViolationStore for SqliteStore {
    async fn upsert(&self, violation: &Violation) -> Result<UpsertOutcome> {
        let fingerprint = violation.fingerprint();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT fingerprint FROM violations WHERE id = ?1",
                params![violation.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let state = violation.state.as_ref().map(|s| s.as_str().to_string());
        let date = violation.date.map(|d| d.to_string());
        let payload = serde_json::to_string(&violation.raw_payload)?;
        let search_text = search_text(violation);

        let outcome = match existing {
            Some(stored) if stored == fingerprint => UpsertOutcome::Unchanged,
            Some(_) => {
                // first_seen_at stays as inserted
                tx.execute(
                    "UPDATE violations SET source = ?2, source_id = ?3, facility_name = ?4,
                         location = ?5, state = ?6, county = ?7, latitude = ?8, longitude = ?9,
                         violation_type = ?10, description = ?11, severity = ?12, date = ?13,
                         penalty_amount = ?14, raw_payload = ?15, fingerprint = ?16, updated_at = ?17,
                         search_text = ?18
                     WHERE id = ?1",
                    params![
                        violation.id.to_string(),
                        violation.source.as_str(),
                        violation.source_id,
                        violation.facility_name,
                        violation.location,
                        state,
                        violation.county,
                        violation.latitude,
                        violation.longitude,
                        violation.violation_type,
                        violation.description,
                        violation.severity.as_str(),
                        date,
                        violation.penalty_amount,
                        payload,
                        fingerprint,
                        timestamp(&violation.updated_at),
                        search_text,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    "INSERT INTO violations (id, source, source_id, facility_name, location, state,
                         county, latitude, longitude, violation_type, description, severity, date,
                         penalty_amount, raw_payload, fingerprint, first_seen_at, updated_at, search_text)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                    params![
                        violation.id.to_string(),
                        violation.source.as_str(),
                        violation.source_id,
                        violation.facility_name,
                        violation.location,
                        state,
                        violation.county,
                        violation.latitude,
                        violation.longitude,
                        violation.violation_type,
                        violation.description,
                        violation.severity.as_str(),
                        date,
                        violation.penalty_amount,
                        payload,
                        fingerprint,
                        timestamp(&violation.first_seen_at),
                        timestamp(&violation.updated_at),
                        search_text,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Violation>> {
        let conn = self.lock()?;
        let stored = conn
            .query_row(
                &format!("SELECT {VIOLATION_COLUMNS} FROM violations WHERE id = ?1"),
                params![id.to_string()],
                StoredViolation::from_row,
            )
            .optional()?;
        stored.map(StoredViolation::into_violation).transpose()
    }

    async fn query(&self, filter: &ViolationFilter, page: PageRequest) -> Result<(Vec<Violation>, u64)> {
        let (where_sql, mut values) = Self::where_clause(filter);
        let conn = self.lock()?;

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM violations{where_sql}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(SqlValue::Integer(page.per_page as i64));
        values.push(SqlValue::Integer(page.offset() as i64));
        let mut stmt = conn.prepare(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM violations{where_sql}
             ORDER BY (date IS NULL), date DESC, id ASC
             LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), StoredViolation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let violations = rows
            .into_iter()
            .map(StoredViolation::into_violation)
            .collect::<Result<Vec<_>>>()?;
        Ok((violations, total.max(0) as u64))
    }

    async fn aggregate_counts(&self, group_by: GroupBy) -> Result<Vec<(String, u64)>> {
        let column = match group_by {
            GroupBy::State => "state",
            GroupBy::Severity => "severity",
            GroupBy::Source => "source",
        };
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {column}, COUNT(*) FROM violations
             WHERE {column} IS NOT NULL
             GROUP BY {column}
             ORDER BY COUNT(*) DESC, {column} ASC"
        ))?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    async fn total_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM violations", [], |row| row.get(0))?;
        Ok(total.max(0) as u64)
    }

    async fn begin_run(&self, run: &RunSummary, lease_timeout: chrono::Duration) -> Result<()> {
        let cutoff = timestamp(&(run.started_at - lease_timeout));
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let active: Option<String> = tx
            .query_row(
                "SELECT run_id FROM ingest_runs
                 WHERE status = 'running' AND started_at > ?1
                 ORDER BY started_at DESC LIMIT 1",
                params![cutoff],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(active) = active {
            return Err(TrackerError::RunInProgress(format!(
                "run {active} holds the ingestion lease"
            )));
        }

        let expired = tx.execute(
            "UPDATE ingest_runs SET status = 'failed', finished_at = ?2
             WHERE status = 'running' AND started_at <= ?1",
            params![cutoff, timestamp(&run.started_at)],
        )?;
        if expired > 0 {
            warn!(expired, "marked runs with expired leases as failed");
        }

        tx.execute(
            "INSERT INTO ingest_runs (run_id, status, full_refresh, started_at, finished_at, summary)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![
                run.run_id.to_string(),
                RunStatus::Running.as_str(),
                run.full_refresh,
                timestamp(&run.started_at),
                serde_json::to_string(run)?,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn finish_run(&self, run: &RunSummary) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE ingest_runs SET status = ?2, finished_at = ?3, summary = ?4 WHERE run_id = ?1",
            params![
                run.run_id.to_string(),
                run.status.as_str(),
                run.finished_at.as_ref().map(timestamp),
                serde_json::to_string(run)?,
            ],
        )?;
        if updated == 0 {
            return Err(TrackerError::NotFound(format!("ingest run {}", run.run_id)));
        }
        Ok(())
    }

    async fn recent_runs(&self, limit: u32) -> Result<Vec<RunSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT summary, status FROM ingest_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(summary, status)| {
                let mut run: RunSummary = serde_json::from_str(&summary)?;
                // lease expiry rewrites the status column only
                if let Some(status) = RunStatus::parse(&status) {
                    run.status = status;
                }
                Ok(run)
            })
            .collect()
    }

    async fn source_cursor(&self, adapter: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let cursor = conn
            .query_row(
                "SELECT cursor FROM source_cursors WHERE adapter = ?1",
                params![adapter],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor)
    }

    async fn set_source_cursor(&self, adapter: &str, cursor: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO source_cursors (adapter, cursor, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(adapter) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at",
            params![adapter, cursor, timestamp(&Utc::now())],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::violation_id;
    use crate::pipeline::run::RunContext;
    use serde_json::json;

    fn violation(source_id: &str, state: &str, severity: Severity, date: Option<&str>) -> Violation {
        let now = Utc::now();
        Violation {
            id: violation_id(Source::Seed, source_id),
            source: Source::Seed,
            source_id: source_id.to_string(),
            facility_name: format!("Facility {source_id}"),
            location: None,
            state: StateCode::parse(state),
            county: None,
            latitude: None,
            longitude: None,
            violation_type: Some("Clean Water Act - CAFO".to_string()),
            description: Some("Lagoon overflow 100% of capacity".to_string()),
            severity,
            date: date.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()),
            penalty_amount: None,
            raw_payload: json!({"id": source_id}),
            first_seen_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_reports_insert_update_unchanged() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut v = violation("a", "AR", Severity::High, Some("2023-01-01"));

        assert_eq!(store.upsert(&v).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&v).await.unwrap(), UpsertOutcome::Unchanged);

        let first_seen = v.first_seen_at;
        v.severity = Severity::Medium;
        v.first_seen_at = first_seen + chrono::Duration::days(1);
        v.updated_at = v.first_seen_at;
        assert_eq!(store.upsert(&v).await.unwrap(), UpsertOutcome::Updated);

        let stored = store.get(v.id).await.unwrap().unwrap();
        assert_eq!(stored.severity, Severity::Medium);
        assert_eq!(timestamp(&stored.first_seen_at), timestamp(&first_seen));
        assert_eq!(store.total_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn query_orders_by_date_with_nulls_last() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, date) in [("n1", None), ("d1", Some("2021-05-01")), ("d2", Some("2023-05-01")), ("n2", None)] {
            store.upsert(&violation(id, "TX", Severity::Low, date)).await.unwrap();
        }
        let (rows, total) = store
            .query(&ViolationFilter::default(), PageRequest { page: 1, per_page: 10 })
            .await
            .unwrap();
        assert_eq!(total, 4);
        let ids: Vec<_> = rows.iter().map(|v| v.source_id.as_str()).collect();
        assert_eq!(&ids[..2], &["d2", "d1"]);
        assert!(rows[2].id < rows[3].id);
    }

    #[tokio::test]
    async fn filters_compose_and_escape_wildcards() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&violation("a", "TX", Severity::High, Some("2023-01-01"))).await.unwrap();
        store.upsert(&violation("b", "TX", Severity::Low, Some("2023-02-01"))).await.unwrap();
        store.upsert(&violation("c", "AR", Severity::High, None)).await.unwrap();

        let filter = ViolationFilter {
            state: StateCode::parse("TX"),
            severity: Some(Severity::High),
            ..ViolationFilter::default()
        };
        let (rows, total) = store.query(&filter, PageRequest { page: 1, per_page: 50 }).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].source_id, "a");

        let search = |s: &str| ViolationFilter {
            search: Some(s.to_string()),
            ..ViolationFilter::default()
        };
        let (_, total) = store.query(&search("LAGOON"), PageRequest { page: 1, per_page: 50 }).await.unwrap();
        assert_eq!(total, 3);
        let (_, total) = store.query(&search("100%"), PageRequest { page: 1, per_page: 50 }).await.unwrap();
        assert_eq!(total, 3);
        let (_, total) = store.query(&search("1_0"), PageRequest { page: 1, per_page: 50 }).await.unwrap();
        assert_eq!(total, 0);

        let dated = ViolationFilter {
            date_from: NaiveDate::from_ymd_opt(2023, 1, 15),
            ..ViolationFilter::default()
        };
        let (rows, _) = store.query(&dated, PageRequest { page: 1, per_page: 50 }).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_id, "b");
    }

    #[tokio::test]
    async fn search_folds_non_ascii_case() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut v = violation("fr", "VT", Severity::Low, None);
        v.facility_name = "Élevage Dupré Farms".to_string();
        v.description = Some("ÉCOULEMENT near the creek".to_string());
        store.upsert(&v).await.unwrap();
        store.upsert(&violation("other", "VT", Severity::Low, None)).await.unwrap();

        for needle in ["élevage", "ÉLEVAGE", "Élevage Dupré", "dupré", "écoulement"] {
            let filter = ViolationFilter {
                search: Some(needle.to_string()),
                ..ViolationFilter::default()
            };
            let (rows, total) = store.query(&filter, PageRequest { page: 1, per_page: 50 }).await.unwrap();
            assert_eq!(total, 1, "{needle}");
            assert_eq!(rows[0].source_id, "fr");
        }

        // renamed records are searchable under the new name only
        v.facility_name = "Ørsted Égg Ranch".to_string();
        v.updated_at = Utc::now();
        assert_eq!(store.upsert(&v).await.unwrap(), UpsertOutcome::Updated);
        let by = |s: &str| ViolationFilter {
            search: Some(s.to_string()),
            ..ViolationFilter::default()
        };
        let (_, total) = store.query(&by("ørsted égg"), PageRequest { page: 1, per_page: 50 }).await.unwrap();
        assert_eq!(total, 1);
        let (_, total) = store.query(&by("élevage"), PageRequest { page: 1, per_page: 50 }).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn aggregates_skip_null_states() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&violation("a", "TX", Severity::High, None)).await.unwrap();
        store.upsert(&violation("b", "TX", Severity::Low, None)).await.unwrap();
        store.upsert(&violation("c", "AR", Severity::High, None)).await.unwrap();
        let mut no_state = violation("d", "", Severity::Medium, None);
        no_state.state = None;
        store.upsert(&no_state).await.unwrap();

        let by_state = store.aggregate_counts(GroupBy::State).await.unwrap();
        assert_eq!(by_state, vec![("TX".to_string(), 2), ("AR".to_string(), 1)]);
        let by_severity = store.aggregate_counts(GroupBy::Severity).await.unwrap();
        assert_eq!(by_severity[0], ("High".to_string(), 2));
    }

    #[tokio::test]
    async fn run_lease_blocks_until_finished() {
        let store = SqliteStore::open_in_memory().unwrap();
        let lease = chrono::Duration::minutes(30);

        let first = RunSummary::started(&RunContext::new(false));
        store.begin_run(&first, lease).await.unwrap();

        let second = RunSummary::started(&RunContext::new(false));
        let err = store.begin_run(&second, lease).await.unwrap_err();
        assert_eq!(err.kind(), "run_in_progress");

        let mut done = first.clone();
        done.status = RunStatus::Completed;
        done.finished_at = Some(Utc::now());
        store.finish_run(&done).await.unwrap();

        let third = RunSummary::started(&RunContext::new(true));
        store.begin_run(&third, lease).await.unwrap();

        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().any(|r| r.run_id == first.run_id && r.status == RunStatus::Completed));
    }

    #[tokio::test]
    async fn expired_lease_does_not_block() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut stale = RunSummary::started(&RunContext::new(false));
        stale.started_at = Utc::now() - chrono::Duration::hours(2);
        store.begin_run(&stale, chrono::Duration::minutes(30)).await.unwrap();

        let fresh = RunSummary::started(&RunContext::new(false));
        store.begin_run(&fresh, chrono::Duration::minutes(30)).await.unwrap();

        let runs = store.recent_runs(10).await.unwrap();
        let stale_row = runs.iter().find(|r| r.run_id == stale.run_id).unwrap();
        assert_eq!(stale_row.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn cursors_round_trip_through_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("v.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.source_cursor("openfda").await.unwrap(), None);
            store.set_source_cursor("openfda", "20240101").await.unwrap();
            store.set_source_cursor("openfda", "20240301").await.unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.source_cursor("openfda").await.unwrap().as_deref(),
            Some("20240301")
        );
    }
}
