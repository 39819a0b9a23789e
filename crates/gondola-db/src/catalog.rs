use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Utc};
use gondola_core::{AssetKey, Sha256Hash, UpdateId};
use rusqlite::{params, Connection, OptionalExtension};
use url::Url;

use crate::{AssetEntity, DbError, DbResult, UpdateEntity, UpdateStatus};

/// File name of the catalog database inside the updates directory.
pub const DB_FILE_NAME: &str = "expo-updates.db";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS updates (
    id TEXT PRIMARY KEY NOT NULL,
    commit_time INTEGER NOT NULL,
    runtime_version TEXT NOT NULL,
    scope_key TEXT NOT NULL,
    manifest TEXT NOT NULL,
    manifest_filters TEXT NOT NULL DEFAULT '{}',
    status INTEGER NOT NULL,
    failed_launch_count INTEGER NOT NULL DEFAULT 0,
    successful_launch_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_updates_scope ON updates(scope_key);
CREATE INDEX IF NOT EXISTS idx_updates_commit_time ON updates(commit_time);

CREATE TABLE IF NOT EXISTS assets (
    key TEXT PRIMARY KEY NOT NULL,
    type TEXT,
    url TEXT,
    expected_hash TEXT NOT NULL,
    downloaded_at INTEGER,
    embedded_asset_filename TEXT,
    marked_for_deletion INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS updates_assets (
    update_id TEXT NOT NULL REFERENCES updates(id) ON DELETE CASCADE,
    asset_key TEXT NOT NULL REFERENCES assets(key),
    is_launch_asset INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (update_id, asset_key)
);

CREATE TABLE IF NOT EXISTS json_data (
    key TEXT NOT NULL,
    scope_key TEXT NOT NULL,
    value TEXT NOT NULL,
    last_updated INTEGER NOT NULL,
    PRIMARY KEY (key, scope_key)
);
"#;

const UPDATE_COLUMNS: &str = "id, commit_time, runtime_version, scope_key, manifest, \
     manifest_filters, status, failed_launch_count, successful_launch_count, last_accessed_at";

const ASSET_COLUMNS: &str =
    "key, type, url, expected_hash, downloaded_at, embedded_asset_filename, marked_for_deletion";

struct RawUpdate {
    id: String,
    commit_time: i64,
    runtime_version: String,
    scope_key: String,
    manifest: String,
    manifest_filters: String,
    status: i64,
    failed_launch_count: i64,
    successful_launch_count: i64,
    last_accessed_at: i64,
}

impl RawUpdate {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            commit_time: row.get(1)?,
            runtime_version: row.get(2)?,
            scope_key: row.get(3)?,
            manifest: row.get(4)?,
            manifest_filters: row.get(5)?,
            status: row.get(6)?,
            failed_launch_count: row.get(7)?,
            successful_launch_count: row.get(8)?,
            last_accessed_at: row.get(9)?,
        })
    }

    fn into_entity(self) -> DbResult<UpdateEntity> {
        Ok(UpdateEntity {
            id: UpdateId::parse(&self.id)?,
            commit_time: millis_to_datetime(self.commit_time)?,
            runtime_version: self.runtime_version,
            scope_key: self.scope_key,
            manifest: serde_json::from_str(&self.manifest)?,
            manifest_filters: serde_json::from_str(&self.manifest_filters)?,
            status: UpdateStatus::from_i64(self.status)?,
            failed_launch_count: self.failed_launch_count.max(0) as u32,
            successful_launch_count: self.successful_launch_count.max(0) as u32,
            last_accessed_at: millis_to_datetime(self.last_accessed_at)?,
        })
    }
}

struct RawAsset {
    key: String,
    asset_type: Option<String>,
    url: Option<String>,
    expected_hash: String,
    downloaded_at: Option<i64>,
    embedded_asset_filename: Option<String>,
    marked_for_deletion: i64,
}

impl RawAsset {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            asset_type: row.get(1)?,
            url: row.get(2)?,
            expected_hash: row.get(3)?,
            downloaded_at: row.get(4)?,
            embedded_asset_filename: row.get(5)?,
            marked_for_deletion: row.get(6)?,
        })
    }

    fn into_entity(self) -> DbResult<AssetEntity> {
        let url = match self.url {
            Some(raw) => Some(Url::parse(&raw).map_err(|_| DbError::InvalidUrl(raw))?),
            None => None,
        };
        Ok(AssetEntity {
            key: AssetKey::parse(&self.key)?,
            asset_type: self.asset_type,
            url,
            expected_hash: Sha256Hash::parse_hex(&self.expected_hash)?,
            downloaded_at: self.downloaded_at.map(millis_to_datetime).transpose()?,
            embedded_asset_filename: self.embedded_asset_filename,
            marked_for_deletion: self.marked_for_deletion != 0,
        })
    }
}

fn millis_to_datetime(ms: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(DbError::InvalidTimestamp(ms))
}

/// Synchronous catalog over one SQLite connection.
///
/// Not thread-safe by itself; production code reaches it through
/// [`DatabaseHandle`](crate::DatabaseHandle), which confines it to a
/// single worker thread.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    // ── updates ─────────────────────────────────────────────────────────

    /// Insert a new update row; returns false when the id already exists.
    pub fn insert_update(&self, update: &UpdateEntity) -> DbResult<bool> {
        let changed = self.conn.execute(
            &format!(
                "INSERT INTO updates ({UPDATE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(id) DO NOTHING"
            ),
            params![
                update.id.to_string(),
                update.commit_time.timestamp_millis(),
                update.runtime_version,
                update.scope_key,
                update.manifest.to_string(),
                serde_json::to_string(&update.manifest_filters)?,
                update.status.as_i64(),
                i64::from(update.failed_launch_count),
                i64::from(update.successful_launch_count),
                update.last_accessed_at.timestamp_millis(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn update_by_id(&self, id: &UpdateId) -> DbResult<Option<UpdateEntity>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {UPDATE_COLUMNS} FROM updates WHERE id = ?1"),
                params![id.to_string()],
                RawUpdate::from_row,
            )
            .optional()?;
        raw.map(RawUpdate::into_entity).transpose()
    }

    fn updates_where(&self, clause: &str, scope_key: &str) -> DbResult<Vec<UpdateEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {UPDATE_COLUMNS} FROM updates WHERE scope_key = ?1 {clause} \
             ORDER BY commit_time ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![scope_key], RawUpdate::from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.into_entity()?);
        }
        Ok(out)
    }

    pub fn all_updates(&self, scope_key: &str) -> DbResult<Vec<UpdateEntity>> {
        self.updates_where("", scope_key)
    }

    /// Updates the selection policy may consider: everything not `Pending`.
    pub fn launch_candidates(&self, scope_key: &str) -> DbResult<Vec<UpdateEntity>> {
        self.updates_where(
            &format!("AND status != {}", UpdateStatus::Pending.as_i64()),
            scope_key,
        )
    }

    pub fn set_update_status(&self, id: &UpdateId, status: UpdateStatus) -> DbResult<()> {
        self.conn.execute(
            "UPDATE updates SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_i64()],
        )?;
        Ok(())
    }

    /// Counters only ever move up; there is no decrement statement.
    pub fn increment_failed_launch_count(&self, id: &UpdateId) -> DbResult<()> {
        self.conn.execute(
            "UPDATE updates SET failed_launch_count = failed_launch_count + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    pub fn increment_successful_launch_count(&self, id: &UpdateId) -> DbResult<()> {
        self.conn.execute(
            "UPDATE updates SET successful_launch_count = successful_launch_count + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_update_accessed(&self, id: &UpdateId, at: DateTime<Utc>) -> DbResult<()> {
        self.conn.execute(
            "UPDATE updates SET last_accessed_at = ?2 WHERE id = ?1",
            params![id.to_string(), at.timestamp_millis()],
        )?;
        Ok(())
    }

    // ── loader commit ───────────────────────────────────────────────────

    /// Persist a fully downloaded update in one transaction: the update
    /// row (born `Pending`), its asset rows, the links, and the final
    /// flip to `Ready`. Re-running over the same data converges on the
    /// same rows.
    pub fn commit_update_with_assets(
        &self,
        update: &UpdateEntity,
        assets: &[(AssetEntity, bool)],
    ) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO updates ({UPDATE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(id) DO NOTHING"
            ),
            params![
                update.id.to_string(),
                update.commit_time.timestamp_millis(),
                update.runtime_version,
                update.scope_key,
                update.manifest.to_string(),
                serde_json::to_string(&update.manifest_filters)?,
                UpdateStatus::Pending.as_i64(),
                0i64,
                0i64,
                update.last_accessed_at.timestamp_millis(),
            ],
        )?;

        {
            let mut insert_asset = tx.prepare(&format!(
                "INSERT INTO assets ({ASSET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(key) DO UPDATE SET \
                   downloaded_at = COALESCE(excluded.downloaded_at, assets.downloaded_at), \
                   marked_for_deletion = 0"
            ))?;
            let mut link = tx.prepare(
                "INSERT INTO updates_assets (update_id, asset_key, is_launch_asset) \
                 VALUES (?1, ?2, ?3) ON CONFLICT(update_id, asset_key) DO NOTHING",
            )?;
            for (asset, is_launch) in assets {
                insert_asset.execute(params![
                    asset.key.as_str(),
                    asset.asset_type,
                    asset.url.as_ref().map(Url::to_string),
                    asset.expected_hash.to_hex(),
                    asset.downloaded_at.map(|t| t.timestamp_millis()),
                    asset.embedded_asset_filename,
                    i64::from(asset.marked_for_deletion),
                ])?;
                link.execute(params![
                    update.id.to_string(),
                    asset.key.as_str(),
                    i64::from(*is_launch),
                ])?;
            }
        }

        // Embedded rows keep their status; everything else becomes Ready.
        tx.execute(
            "UPDATE updates SET status = ?2 WHERE id = ?1 AND status != ?3",
            params![
                update.id.to_string(),
                UpdateStatus::Ready.as_i64(),
                UpdateStatus::Embedded.as_i64(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ── assets ──────────────────────────────────────────────────────────

    pub fn assets_for_update(&self, id: &UpdateId) -> DbResult<Vec<AssetEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets \
             JOIN updates_assets ON updates_assets.asset_key = assets.key \
             WHERE updates_assets.update_id = ?1"
        ))?;
        let rows = stmt.query_map(params![id.to_string()], RawAsset::from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.into_entity()?);
        }
        Ok(out)
    }

    pub fn launch_asset_for_update(&self, id: &UpdateId) -> DbResult<Option<AssetEntity>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ASSET_COLUMNS} FROM assets \
                     JOIN updates_assets ON updates_assets.asset_key = assets.key \
                     WHERE updates_assets.update_id = ?1 AND updates_assets.is_launch_asset = 1"
                ),
                params![id.to_string()],
                RawAsset::from_row,
            )
            .optional()?;
        raw.map(RawAsset::into_entity).transpose()
    }

    // ── reaper ──────────────────────────────────────────────────────────

    /// Delete update rows; link rows go with them via `ON DELETE CASCADE`.
    pub fn delete_updates(&self, ids: &[UpdateId]) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM updates WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete asset rows no update references anymore, returning them so
    /// the caller can unlink the files. Embedded assets are never touched.
    pub fn delete_orphaned_assets(&self) -> DbResult<Vec<AssetEntity>> {
        const ORPHAN_CLAUSE: &str = "embedded_asset_filename IS NULL \
             AND key NOT IN (SELECT asset_key FROM updates_assets)";

        let tx = self.conn.unchecked_transaction()?;
        let mut orphans = Vec::new();
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ASSET_COLUMNS} FROM assets WHERE {ORPHAN_CLAUSE}"
            ))?;
            let rows = stmt.query_map([], RawAsset::from_row)?;
            for raw in rows {
                orphans.push(raw?.into_entity()?);
            }
            tx.execute(&format!("DELETE FROM assets WHERE {ORPHAN_CLAUSE}"), [])?;
        }
        tx.commit()?;
        Ok(orphans)
    }

    /// Drop every update, link and asset row. On-disk asset files are
    /// intentionally kept: they are content-addressed and may be
    /// re-referenced after a build change.
    pub fn clear_all_updates(&self) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM updates_assets", [])?;
        tx.execute("DELETE FROM updates", [])?;
        tx.execute("DELETE FROM assets", [])?;
        tx.commit()?;
        Ok(())
    }

    // ── json data ───────────────────────────────────────────────────────

    pub fn json_value(&self, key: &str, scope_key: &str) -> DbResult<Option<serde_json::Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM json_data WHERE key = ?1 AND scope_key = ?2",
                params![key, scope_key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).map_err(DbError::from))
            .transpose()
    }

    pub fn set_json_value(
        &self,
        key: &str,
        scope_key: &str,
        value: &serde_json::Value,
    ) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO json_data (key, scope_key, value, last_updated) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(key, scope_key) DO UPDATE SET \
               value = excluded.value, last_updated = excluded.last_updated",
            params![
                key,
                scope_key,
                value.to_string(),
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Read a stored JSON object as a string map; absent or non-object
    /// values yield an empty map.
    pub fn string_map(&self, key: &str, scope_key: &str) -> DbResult<BTreeMap<String, String>> {
        let Some(value) = self.json_value(key, scope_key)? else {
            return Ok(BTreeMap::new());
        };
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    pub fn set_string_map(
        &self,
        key: &str,
        scope_key: &str,
        map: &BTreeMap<String, String>,
    ) -> DbResult<()> {
        self.set_json_value(key, scope_key, &serde_json::to_value(map)?)
    }

    /// Read-modify-write of one entry in the extra-params map. `None`
    /// removes the entry.
    pub fn set_extra_param(
        &self,
        scope_key: &str,
        name: &str,
        value: Option<&str>,
    ) -> DbResult<()> {
        let mut params_map = self.string_map(keys::EXTRA_PARAMS, scope_key)?;
        match value {
            Some(v) => params_map.insert(name.to_string(), v.to_string()),
            None => params_map.remove(name),
        };
        self.set_string_map(keys::EXTRA_PARAMS, scope_key, &params_map)
    }

    pub fn extra_params(&self, scope_key: &str) -> DbResult<BTreeMap<String, String>> {
        self.string_map(keys::EXTRA_PARAMS, scope_key)
    }
}

/// Well-known `json_data` keys.
pub mod keys {
    /// Headers the server asked the client to echo on future requests.
    pub const SERVER_DEFINED_HEADERS: &str = "serverDefinedHeaders";
    /// Manifest filters from the most recent server response.
    pub const MANIFEST_FILTERS: &str = "manifestFilters";
    /// Host-settable key/value pairs sent with update requests.
    pub const EXTRA_PARAMS: &str = "extraParams";
    /// Fingerprint of the binary the catalog was written by.
    pub const BUILD_DATA: &str = "buildData";
}
