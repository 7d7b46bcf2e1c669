use crate::entry::{CacheEntry, CacheStore, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tierline_core::{BackendDescriptor, RelevanceRecord, Tier};
use tierline_telemetry::{AuditError, AuditSink, DispatchOutcome, DispatchRecord};

/// SQLite-backed persistence for cache entries, relevance records, backend
/// state, and the dispatch log
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn parse_time(key: &str, column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("{}: {}", column, e),
        })
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                backend TEXT NOT NULL DEFAULT '',
                resources TEXT NOT NULL DEFAULT '[]'
            );
            CREATE TABLE IF NOT EXISTS relevance (
                resource_id TEXT PRIMARY KEY,
                score REAL NOT NULL,
                tier TEXT NOT NULL,
                last_access TEXT NOT NULL,
                access_count INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS backends (
                tier_id TEXT PRIMARY KEY,
                cost_weight REAL NOT NULL,
                base_cost_weight REAL NOT NULL,
                capability_ceiling INTEGER NOT NULL,
                is_healthy INTEGER NOT NULL,
                consecutive_failures INTEGER NOT NULL,
                last_probe TEXT
            );
            CREATE TABLE IF NOT EXISTS dispatch_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                backend_tier TEXT NOT NULL,
                intent TEXT NOT NULL,
                complexity INTEGER NOT NULL,
                fast_path INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                outcome TEXT NOT NULL,
                cost REAL NOT NULL DEFAULT 0,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_dispatch_tier ON dispatch_log(backend_tier);
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the persisted relevance table with `records`
    pub fn save_relevance(&self, records: &[RelevanceRecord]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM relevance", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO relevance
                 (resource_id, score, tier, last_access, access_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.resource_id,
                    r.score,
                    r.tier.as_str(),
                    r.last_access.to_rfc3339(),
                    r.access_count.min(i64::MAX as u64) as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Persisted relevance records. Undecodable rows are skipped.
    pub fn load_relevance(&self) -> Result<Vec<RelevanceRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT resource_id, score, tier, last_access, access_count
             FROM relevance ORDER BY resource_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (resource_id, score, tier, last_access, access_count) = row?;
            match parse_time(&resource_id, "last_access", &last_access) {
                Ok(last_access) => records.push(RelevanceRecord {
                    tier: Tier::parse(&tier).unwrap_or(Tier::Cold),
                    resource_id,
                    score,
                    last_access,
                    access_count: access_count.max(0) as u64,
                }),
                Err(e) => tracing::warn!(error = %e, "skipping relevance row"),
            }
        }
        Ok(records)
    }

    pub fn save_backends(&self, backends: &[BackendDescriptor]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO backends
                 (tier_id, cost_weight, base_cost_weight, capability_ceiling, is_healthy,
                  consecutive_failures, last_probe)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for b in backends {
                stmt.execute(params![
                    b.tier_id,
                    b.cost_weight,
                    b.base_cost_weight,
                    b.capability_ceiling,
                    b.is_healthy,
                    b.consecutive_failures,
                    b.last_probe.map(|t| t.to_rfc3339()),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_backends(&self) -> Result<Vec<BackendDescriptor>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT tier_id, cost_weight, base_cost_weight, capability_ceiling, is_healthy,
                    consecutive_failures, last_probe
             FROM backends ORDER BY tier_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                BackendDescriptor {
                    tier_id: row.get(0)?,
                    cost_weight: row.get(1)?,
                    base_cost_weight: row.get(2)?,
                    capability_ceiling: row.get(3)?,
                    is_healthy: row.get(4)?,
                    consecutive_failures: row.get(5)?,
                    last_probe: None,
                },
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut backends = Vec::new();
        for row in rows {
            let (mut backend, last_probe) = row?;
            if let Some(raw) = last_probe {
                match parse_time(&backend.tier_id, "last_probe", &raw) {
                    Ok(t) => backend.last_probe = Some(t),
                    Err(e) => tracing::warn!(error = %e, "ignoring last_probe"),
                }
            }
            backends.push(backend);
        }
        Ok(backends)
    }

    fn decode_entry(
        key: String,
        payload: Vec<u8>,
        created_at: String,
        expires_at: String,
        hit_count: i64,
        backend: String,
        resources: String,
    ) -> Result<CacheEntry, StoreError> {
        let created_at = parse_time(&key, "created_at", &created_at)?;
        let expires_at = parse_time(&key, "expires_at", &expires_at)?;
        let resources: Vec<String> =
            serde_json::from_str(&resources).map_err(|e| StoreError::Corrupt {
                key: key.clone(),
                reason: format!("resources: {}", e),
            })?;
        Ok(CacheEntry {
            key,
            payload,
            created_at,
            expires_at,
            hit_count: hit_count.max(0) as u64,
            backend,
            resources,
        })
    }

    fn read_entries(
        &self,
        key: Option<&str>,
    ) -> Result<Vec<Result<CacheEntry, StoreError>>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, payload, created_at, expires_at, hit_count, backend, resources
             FROM cache_entries WHERE ?1 IS NULL OR key = ?1",
        )?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, payload, created_at, expires_at, hit_count, backend, resources) = row?;
            entries.push(Self::decode_entry(
                key, payload, created_at, expires_at, hit_count, backend, resources,
            ));
        }
        Ok(entries)
    }

    /// Write a raw row, bypassing encoding. Used to exercise corrupt-row
    /// handling.
    #[doc(hidden)]
    pub fn put_raw(
        &self,
        key: &str,
        created_at: &str,
        expires_at: &str,
        resources: &str,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO cache_entries
             (key, payload, created_at, expires_at, hit_count, backend, resources)
             VALUES (?1, x'00', ?2, ?3, 0, '', ?4)",
            params![key, created_at, expires_at, resources],
        )?;
        Ok(())
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.read_entries(Some(key))?.into_iter().next().transpose()
    }

    fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let resources = serde_json::to_string(&entry.resources)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO cache_entries
             (key, payload, created_at, expires_at, hit_count, backend, resources)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.key,
                entry.payload,
                entry.created_at.to_rfc3339(),
                entry.expires_at.to_rfc3339(),
                entry.hit_count.min(i64::MAX as u64) as i64,
                entry.backend,
                resources,
            ],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn()
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn record_hit(&self, key: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE cache_entries SET hit_count = hit_count + 1 WHERE key = ?1",
            params![key],
        )?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM cache_entries ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let mut entries = Vec::new();
        for entry in self.read_entries(None)? {
            match entry {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "skipping cache row"),
            }
        }
        Ok(entries)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

impl AuditSink for SqliteStore {
    fn append(&self, record: &DispatchRecord) -> Result<(), AuditError> {
        self.conn()
            .execute(
                "INSERT INTO dispatch_log
                 (request_id, backend_tier, intent, complexity, fast_path, started_at,
                  finished_at, outcome, cost, latency_ms, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.request_id,
                    record.backend_tier,
                    record.intent,
                    record.complexity,
                    record.fast_path,
                    record.started_at.to_rfc3339(),
                    record.finished_at.to_rfc3339(),
                    record.outcome.as_str(),
                    record.cost,
                    record.latency_ms().min(i64::MAX as u64) as i64,
                    record.reason,
                ],
            )
            .map_err(|e| AuditError::Backend(e.to_string()))?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<DispatchRecord>, AuditError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT request_id, backend_tier, intent, complexity, fast_path, started_at,
                        finished_at, outcome, cost, reason
                 FROM dispatch_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| AuditError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit.min(i64::MAX as usize) as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, f64>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })
            .map_err(|e| AuditError::Backend(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let (
                request_id,
                backend_tier,
                intent,
                complexity,
                fast_path,
                started,
                finished,
                outcome,
                cost,
                reason,
            ) = row.map_err(|e| AuditError::Backend(e.to_string()))?;
            let started_at = parse_time(&request_id, "started_at", &started);
            let finished_at = parse_time(&request_id, "finished_at", &finished);
            let (Ok(started_at), Ok(finished_at), Some(outcome)) =
                (started_at, finished_at, DispatchOutcome::parse(&outcome))
            else {
                tracing::warn!(request_id = %request_id, "skipping undecodable dispatch row");
                continue;
            };
            records.push(DispatchRecord {
                request_id,
                backend_tier,
                intent,
                complexity,
                fast_path,
                started_at,
                finished_at,
                outcome,
                cost,
                reason,
            });
        }
        records.reverse();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::new(
            key,
            b"payload".to_vec(),
            "tier1",
            vec!["src/auth.rs".to_string()],
            Duration::seconds(300),
            Utc::now(),
        )
    }

    fn dispatch(request_id: &str, outcome: DispatchOutcome) -> DispatchRecord {
        let now = Utc::now();
        DispatchRecord {
            request_id: request_id.to_string(),
            backend_tier: "tier0".to_string(),
            intent: "bugfix".to_string(),
            complexity: 3,
            fast_path: false,
            started_at: now,
            finished_at: now + Duration::milliseconds(40),
            outcome,
            cost: 0.01,
            reason: None,
        }
    }

    #[test]
    fn test_cache_roundtrip_and_hits() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(entry("bug fix login")).unwrap();
        store.record_hit("bug fix login").unwrap();
        store.record_hit("bug fix login").unwrap();

        let got = store.get("bug fix login").unwrap().unwrap();
        assert_eq!(got.payload, b"payload");
        assert_eq!(got.hit_count, 2);
        assert_eq!(got.resources, vec!["src/auth.rs"]);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_put_supersedes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(entry("k")).unwrap();
        let mut newer = entry("k");
        newer.payload = b"newer".to_vec();
        newer.backend = "tier2".to_string();
        store.put(newer).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        let got = store.get("k").unwrap().unwrap();
        assert_eq!(got.payload, b"newer");
        assert_eq!(got.backend, "tier2");
    }

    #[test]
    fn test_corrupt_row_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .put_raw("bad", "not a timestamp", "2025-01-01T00:00:00Z", "[]")
            .unwrap();
        store.put(entry("good")).unwrap();

        assert!(matches!(store.get("bad"), Err(StoreError::Corrupt { .. })));
        assert_eq!(store.entries().unwrap().len(), 1);
        assert_eq!(store.keys().unwrap(), vec!["bad", "good"]);
        assert!(store.remove("bad").unwrap());
        assert!(!store.remove("bad").unwrap());
    }

    #[test]
    fn test_relevance_persistence_replaces_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = |id: &str, score: f64| RelevanceRecord {
            resource_id: id.to_string(),
            score,
            tier: Tier::Warm,
            last_access: Utc::now(),
            access_count: 3,
        };
        store
            .save_relevance(&[record("a", 0.5), record("b", 0.9)])
            .unwrap();
        store.save_relevance(&[record("b", 0.7)]).unwrap();

        let loaded = store.load_relevance().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].resource_id, "b");
        assert!((loaded[0].score - 0.7).abs() < 1e-12);
        assert_eq!(loaded[0].access_count, 3);
    }

    #[test]
    fn test_backend_persistence() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut tier0 = BackendDescriptor::new("tier0", 1.0, 3);
        tier0.is_healthy = false;
        tier0.consecutive_failures = 5;
        tier0.cost_weight = 1.1;
        tier0.last_probe = Some(Utc::now());
        store
            .save_backends(&[tier0.clone(), BackendDescriptor::new("tier1", 5.0, 7)])
            .unwrap();

        let loaded = store.load_backends().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].tier_id, "tier0");
        assert!(!loaded[0].is_healthy);
        assert_eq!(loaded[0].consecutive_failures, 5);
        assert_eq!(loaded[0].base_cost_weight, 1.0);
        assert_eq!(loaded[0].cost_weight, 1.1);
        assert!(loaded[0].last_probe.is_some());
        assert!(loaded[1].is_healthy);
    }

    #[test]
    fn test_dispatch_log_tail_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .append(&dispatch(&format!("r{}", i), DispatchOutcome::Success))
                .unwrap();
        }
        store
            .append(&dispatch("r5", DispatchOutcome::Timeout))
            .unwrap();

        let tail = store.recent(3).unwrap();
        let ids: Vec<&str> = tail.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r4", "r5"]);
        assert_eq!(tail[2].outcome, DispatchOutcome::Timeout);
        assert_eq!(tail[0].latency_ms(), 40);
    }

    #[test]
    fn test_reopen_file_keeps_state() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested").join("tierline.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(entry("persisted")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get("persisted").unwrap().is_some());
    }
}
