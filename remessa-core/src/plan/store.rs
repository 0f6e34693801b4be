use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::sqlite::configure_connection;

use super::models::Plan;
use super::{PlanError, PlanResult};

/// The store holds a single active plan; the key exists so that a later
/// schema can hold one record per marketplace profile.
const RECORD_KEY: &str = "active";

const PLAN_SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS plan_record (
    record_key  TEXT PRIMARY KEY,
    payload     TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    saved_at    TEXT
);";

#[derive(Debug, Clone)]
pub struct SqlitePlanStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqlitePlanStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqlitePlanStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> PlanResult<SqlitePlanStore> {
        let path = self.path.ok_or(PlanError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqlitePlanStore { path, flags })
    }
}

/// Persists the active split plan across navigations and sessions.
#[derive(Debug, Clone)]
pub struct SqlitePlanStore {
    path: PathBuf,
    flags: OpenFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanCompatibility {
    Match,
    Drifted { stored: String, current: String },
}

impl SqlitePlanStore {
    pub fn builder() -> SqlitePlanStoreBuilder {
        SqlitePlanStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> PlanResult<Self> {
        SqlitePlanStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> PlanResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            PlanError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| PlanError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> PlanResult<()> {
        let conn = self.open()?;
        conn.execute_batch(PLAN_SCHEMA)?;
        Ok(())
    }

    pub fn save(&self, plan: &Plan) -> PlanResult<()> {
        let payload = serde_json::to_string(plan)?;
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO plan_record (record_key, payload, fingerprint, saved_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(record_key) DO UPDATE SET
                 payload = excluded.payload,
                 fingerprint = excluded.fingerprint,
                 saved_at = excluded.saved_at",
            params![
                RECORD_KEY,
                payload,
                plan.fingerprint,
                Utc::now().to_rfc3339()
            ],
        )?;
        info!(target: "plan.store", plan_id = %plan.plan_id, "plan persisted");
        Ok(())
    }

    /// A payload that no longer deserializes is treated as absent: the
    /// record is dropped so the next planning run starts clean.
    pub fn load(&self) -> PlanResult<Option<Plan>> {
        let conn = self.open()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM plan_record WHERE record_key = ?1",
                params![RECORD_KEY],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        match serde_json::from_str::<Plan>(&payload) {
            Ok(plan) => Ok(Some(plan)),
            Err(err) => {
                warn!(target: "plan.store", error = %err, "corrupt plan record, clearing");
                drop(conn);
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn clear(&self) -> PlanResult<()> {
        let conn = self.open()?;
        conn.execute(
            "DELETE FROM plan_record WHERE record_key = ?1",
            params![RECORD_KEY],
        )?;
        Ok(())
    }

    pub fn stored_fingerprint(&self) -> PlanResult<Option<String>> {
        let conn = self.open()?;
        let fingerprint = conn
            .query_row(
                "SELECT fingerprint FROM plan_record WHERE record_key = ?1",
                params![RECORD_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fingerprint)
    }

    /// Compares the persisted plan's fingerprint against a freshly
    /// computed one. `None` means no plan is stored. A drifted result is
    /// surfaced to the caller; the store never resolves it on its own.
    pub fn drift_check(&self, current: &str) -> PlanResult<Option<PlanCompatibility>> {
        let Some(stored) = self.stored_fingerprint()? else {
            return Ok(None);
        };
        if stored == current {
            Ok(Some(PlanCompatibility::Match))
        } else {
            Ok(Some(PlanCompatibility::Drifted {
                stored,
                current: current.to_string(),
            }))
        }
    }
}
