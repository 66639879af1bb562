//! Staleness store
//!
//! SQLite-backed cache of three facts: the group-to-course map snapshot, the
//! per-user debounce records, and the singleton full-sync rate-limit record.
//! Every holder opens its own [`SyncCache`] handle to the same database file;
//! WAL mode lets the handles interleave. Expiries are absolute UTC
//! milliseconds computed at write time and compared strictly on read, and a
//! missing row always reads as stale/due.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::registry::RegistryApi;

pub mod panel;

pub use panel::PanelSourceMap;

const PANEL_SOURCE_TABLE: &str =
    "CREATE TABLE panel_source (id INTEGER PRIMARY KEY CHECK (id = 1), expires_at INTEGER NOT NULL, map_json TEXT NOT NULL)";
const USER_SYNC_TABLE: &str =
    "CREATE TABLE user_sync (external_id INTEGER PRIMARY KEY, expires_at INTEGER NOT NULL)";
const FULL_SYNC_TABLE: &str =
    "CREATE TABLE full_sync (id INTEGER PRIMARY KEY CHECK (id = 1), expires_at INTEGER NOT NULL)";

const PANEL_SOURCE_UPSERT: &str = r#"
    INSERT INTO panel_source (id, expires_at, map_json) VALUES (1, ?1, ?2)
    ON CONFLICT(id) DO UPDATE SET expires_at = excluded.expires_at, map_json = excluded.map_json
"#;
const USER_SYNC_UPSERT: &str = r#"
    INSERT INTO user_sync (external_id, expires_at) VALUES (?1, ?2)
    ON CONFLICT(external_id) DO UPDATE SET expires_at = excluded.expires_at
"#;
const FULL_SYNC_UPSERT: &str = r#"
    INSERT INTO full_sync (id, expires_at) VALUES (1, ?1)
    ON CONFLICT(id) DO UPDATE SET expires_at = excluded.expires_at
"#;

struct CachedPanel {
    expires_at: i64,
    map: PanelSourceMap,
}

/// One handle to the staleness database.
pub struct SyncCache {
    conn: Connection,
    config: BridgeConfig,
    cached_panel: Option<CachedPanel>,
}

impl SyncCache {
    /// Open (and create, if absent) the staleness database.
    pub fn open(config: &BridgeConfig) -> Result<Self> {
        let conn = Connection::open(&config.cache_db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn,
            config: config.clone(),
            cached_panel: None,
        })
    }

    /// The current group-to-course map. Served from memory or the database
    /// while fresh; a stale or missing snapshot triggers one synchronous
    /// rebuild from the registry.
    pub fn panel_source_map(&mut self, registry: &dyn RegistryApi) -> Result<PanelSourceMap> {
        let now = Utc::now().timestamp_millis();
        if let Some(cached) = &self.cached_panel {
            if cached.expires_at > now {
                return Ok(cached.map.clone());
            }
        }
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT expires_at, map_json FROM panel_source WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((expires_at, map_json)) = row {
            if expires_at > now {
                let map = PanelSourceMap::from_json_str(&map_json)?;
                self.cached_panel = Some(CachedPanel {
                    expires_at,
                    map: map.clone(),
                });
                return Ok(map);
            }
        }
        self.rebuild_panel_source_map(registry)
    }

    /// Rebuild the map from the registry and replace the snapshot row.
    pub fn rebuild_panel_source_map(
        &mut self,
        registry: &dyn RegistryApi,
    ) -> Result<PanelSourceMap> {
        debug!("refreshing group-to-course map");
        let map = panel::build_panel_source_map(registry, &self.config.registry)?;
        let expires_at =
            Utc::now().timestamp_millis() + self.config.panel_ttl().num_milliseconds();
        self.conn.execute(
            PANEL_SOURCE_UPSERT,
            params![expires_at, map.to_json_string()?],
        )?;
        self.cached_panel = Some(CachedPanel {
            expires_at,
            map: map.clone(),
        });
        Ok(map)
    }

    /// True when the user has no record or the record's expiry has passed.
    pub fn is_user_stale(&self, external_id: i64) -> Result<bool> {
        let expires_at: Option<i64> = self
            .conn
            .query_row(
                "SELECT expires_at FROM user_sync WHERE external_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match expires_at {
            None => true,
            Some(expires_at) => Utc::now().timestamp_millis() > expires_at,
        })
    }

    /// Record a completed user sync; debounces re-syncs for the user TTL.
    pub fn mark_user_synced(&self, external_id: i64) -> Result<()> {
        let expires_at =
            Utc::now().timestamp_millis() + self.config.user_ttl().num_milliseconds();
        self.conn
            .execute(USER_SYNC_UPSERT, params![external_id, expires_at])?;
        Ok(())
    }

    /// True when no full sync has run or the minimum interval has elapsed.
    pub fn is_full_sync_due(&self) -> Result<bool> {
        let expires_at: Option<i64> = self
            .conn
            .query_row(
                "SELECT expires_at FROM full_sync WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match expires_at {
            None => true,
            Some(expires_at) => Utc::now().timestamp_millis() > expires_at,
        })
    }

    /// Suppress further full syncs for the configured minimum interval.
    /// Called only once the fan-out has been fully enqueued, so an
    /// interrupted fan-out does not suppress the next attempt.
    pub fn mark_full_sync_started(&self) -> Result<()> {
        let expires_at =
            Utc::now().timestamp_millis() + self.config.full_sync_interval().num_milliseconds();
        self.conn.execute(FULL_SYNC_UPSERT, params![expires_at])?;
        Ok(())
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    for (table, create_sql) in [
        ("panel_source", PANEL_SOURCE_TABLE),
        ("user_sync", USER_SYNC_TABLE),
        ("full_sync", FULL_SYNC_TABLE),
    ] {
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            debug!(table, "creating table");
            conn.execute(create_sql, [])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::testutil::MockRegistry;
    use std::sync::atomic::Ordering;

    fn registry() -> MockRegistry {
        MockRegistry::new()
            .with_admin_group("G1")
            .with_mapping("G1", "C10,C11")
    }

    fn cache_with(dir: &tempfile::TempDir, config: BridgeConfig) -> (SyncCache, BridgeConfig) {
        let config = {
            let mut c = config;
            c.cache_db_path = dir.path().join("cache.sqlite");
            c.registry = registry().config();
            c
        };
        (SyncCache::open(&config).unwrap(), config)
    }

    #[test]
    fn test_schema_created_and_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let (_, config) = cache_with(&dir, BridgeConfig::default());
        // second open must not fail on existing tables
        SyncCache::open(&config).unwrap();
    }

    #[test]
    fn test_user_staleness_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_with(&dir, BridgeConfig::default());
        assert!(cache.is_user_stale(1001).unwrap());
        cache.mark_user_synced(1001).unwrap();
        assert!(!cache.is_user_stale(1001).unwrap());
        assert!(cache.is_user_stale(1002).unwrap());
    }

    #[test]
    fn test_user_record_expires_after_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::builder().user_cache_time(0).build();
        let (cache, _) = cache_with(&dir, config);
        cache.mark_user_synced(1001).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.is_user_stale(1001).unwrap());
    }

    #[test]
    fn test_full_sync_due_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_with(&dir, BridgeConfig::default());
        assert!(cache.is_full_sync_due().unwrap());
        cache.mark_full_sync_started().unwrap();
        assert!(!cache.is_full_sync_due().unwrap());
    }

    #[test]
    fn test_full_sync_due_after_interval_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::builder().full_sync_interval(0).build();
        let (cache, _) = cache_with(&dir, config);
        cache.mark_full_sync_started().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.is_full_sync_due().unwrap());
    }

    #[test]
    fn test_panel_map_rebuilt_exactly_once_while_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cache, _) = cache_with(&dir, BridgeConfig::default());
        let registry = registry();
        let map = cache.panel_source_map(&registry).unwrap();
        assert!(map.contains_group("G1"));
        let calls_after_rebuild = registry.calls.load(Ordering::SeqCst);
        assert!(calls_after_rebuild > 0);
        // fresh snapshot, no further registry traffic
        cache.panel_source_map(&registry).unwrap();
        assert_eq!(registry.calls.load(Ordering::SeqCst), calls_after_rebuild);
    }

    #[test]
    fn test_expired_panel_map_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        // zero TTL minus the write-time guard puts the expiry in the past
        let config = BridgeConfig::builder().panel_cache_time(0).build();
        let (mut cache, _) = cache_with(&dir, config);
        let registry = registry();
        cache.panel_source_map(&registry).unwrap();
        let first = registry.calls.load(Ordering::SeqCst);
        cache.panel_source_map(&registry).unwrap();
        assert!(registry.calls.load(Ordering::SeqCst) > first);
    }

    #[test]
    fn test_panel_snapshot_shared_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let (mut writer, config) = cache_with(&dir, BridgeConfig::default());
        let registry = registry();
        writer.panel_source_map(&registry).unwrap();
        let writes = registry.calls.load(Ordering::SeqCst);

        let mut reader = SyncCache::open(&config).unwrap();
        let map = reader.panel_source_map(&registry).unwrap();
        assert!(map.contains_group("G1"));
        assert_eq!(registry.calls.load(Ordering::SeqCst), writes);
    }
}
