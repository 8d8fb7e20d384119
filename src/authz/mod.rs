//! AuthZ oracle: maps session tokens to admin identity and agent
//! credentials to agent name, and owns the small relational store behind
//! `/agents`, `/login`, `/logout`. Grounded in
//! `original_source/sutserver/db.go`'s schema and prepared-statement set.
//! No task state lives here; the dispatcher core never touches this
//! module except through the [`AuthZ`] trait.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use rand::RngCore;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{DispatchError, Result};

/// Identity facts the dispatch fabric needs from the persisted store.
/// Policy beyond "does this credential map to something" is out of scope.
#[async_trait]
pub trait AuthZ: Send + Sync {
    /// Admin bearer token (as passed to `/login`) is a recognised account.
    async fn check_admin_token(&self, token: &str) -> Result<bool>;
    /// Creates a session for a valid admin token, returning its id.
    async fn init_session(&self, token: &str) -> Result<String>;
    async fn check_session(&self, session_id: &str) -> Result<bool>;
    async fn kill_session(&self, session_id: &str) -> Result<()>;

    async fn add_admin(&self, token: &str) -> Result<()>;
    async fn remove_admin(&self, token: &str) -> Result<()>;

    async fn agent_exists(&self, name: &str) -> Result<bool>;
    async fn check_agent_hwid(&self, hwid: &str) -> Result<bool>;
    async fn agent_name_for_hwid(&self, hwid: &str) -> Result<String>;
    async fn list_agents(&self) -> Result<Vec<String>>;
    async fn add_agent(&self, name: &str, hwid: &str) -> Result<()>;
    async fn remove_agent(&self, name: &str) -> Result<()>;
    /// Renames an agent in the store. Rejects if `new_name` already exists.
    async fn rename_agent(&self, old_name: &str, new_name: &str) -> Result<()>;

    async fn self_reg_enabled(&self) -> Result<bool>;
    async fn set_self_reg_enabled(&self, enabled: bool) -> Result<()>;
}

/// `rusqlite`-backed implementation. `Connection` is `Send` but not
/// `Sync`, so it's wrapped behind a blocking `Mutex` and every call runs
/// on a `spawn_blocking` thread rather than the async runtime's workers.
pub struct SqliteAuthZ {
    conn: Arc<StdMutex<Connection>>,
}

impl SqliteAuthZ {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(DispatchError::Storage)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS admins (
                 token TEXT PRIMARY KEY NOT NULL
             );
             CREATE TABLE IF NOT EXISTS agents (
                 name TEXT PRIMARY KEY NOT NULL,
                 hwid TEXT UNIQUE NOT NULL
             );
             CREATE TABLE IF NOT EXISTS sessions (
                 sessionId TEXT PRIMARY KEY NOT NULL
             );
             CREATE TABLE IF NOT EXISTS settings (
                 key TEXT PRIMARY KEY NOT NULL,
                 value TEXT NOT NULL
             );",
        )
        .map_err(DispatchError::Storage)?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sqlite connection mutex poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| DispatchError::Internal(anyhow::anyhow!(e)))?
        .map_err(DispatchError::Storage)
    }
}

#[async_trait]
impl AuthZ for SqliteAuthZ {
    async fn check_admin_token(&self, token: &str) -> Result<bool> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT() FROM admins WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )?;
            Ok(count == 1)
        })
        .await
    }

    async fn init_session(&self, token: &str) -> Result<String> {
        if !self.check_admin_token(token).await? {
            return Err(DispatchError::Unauthorized);
        }
        let mut raw = [0u8; crate::constants::SESSION_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        let sid = hex::encode(raw);
        let insert_sid = sid.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions VALUES (?1)",
                params![insert_sid],
            )?;
            Ok(())
        })
        .await?;
        Ok(sid)
    }

    async fn check_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT() FROM sessions WHERE sessionId = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(count == 1)
        })
        .await
    }

    async fn kill_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM sessions WHERE sessionId = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn add_admin(&self, token: &str) -> Result<()> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            conn.execute("INSERT OR IGNORE INTO admins VALUES (?1)", params![token])?;
            Ok(())
        })
        .await
    }

    async fn remove_admin(&self, token: &str) -> Result<()> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM admins WHERE token = ?1", params![token])?;
            Ok(())
        })
        .await
    }

    async fn agent_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT() FROM agents WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            Ok(count == 1)
        })
        .await
    }

    async fn check_agent_hwid(&self, hwid: &str) -> Result<bool> {
        let hwid = hwid.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT() FROM agents WHERE hwid = ?1",
                params![hwid],
                |row| row.get(0),
            )?;
            Ok(count == 1)
        })
        .await
    }

    async fn agent_name_for_hwid(&self, hwid: &str) -> Result<String> {
        let hwid = hwid.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT name FROM agents WHERE hwid = ?1",
                params![hwid],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn list_agents(&self) -> Result<Vec<String>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT name FROM agents")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
    }

    async fn add_agent(&self, name: &str, hwid: &str) -> Result<()> {
        let name = name.to_string();
        let hwid = hwid.to_string();
        self.with_conn(move |conn| {
            conn.execute("INSERT INTO agents VALUES (?1, ?2)", params![name, hwid])?;
            Ok(())
        })
        .await
    }

    async fn remove_agent(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM agents WHERE name = ?1", params![name])?;
            Ok(())
        })
        .await
    }

    async fn rename_agent(&self, old_name: &str, new_name: &str) -> Result<()> {
        if self.agent_exists(new_name).await? {
            return Err(DispatchError::Validation(format!(
                "agent {new_name} already exists"
            )));
        }
        let old_name = old_name.to_string();
        let new_name = new_name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE agents SET name = ?1 WHERE name = ?2",
                params![new_name, old_name],
            )?;
            Ok(())
        })
        .await?;
        debug!("renamed agent in authz store");
        Ok(())
    }

    async fn self_reg_enabled(&self) -> Result<bool> {
        self.with_conn(move |conn| {
            let value: rusqlite::Result<String> = conn.query_row(
                "SELECT value FROM settings WHERE key = 'self_reg'",
                [],
                |row| row.get(0),
            );
            Ok(matches!(value, Ok(v) if v == "1"))
        })
        .await
    }

    async fn set_self_reg_enabled(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "1" } else { "0" };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings VALUES ('self_reg', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![value],
            )?;
            Ok(())
        })
        .await
    }
}
