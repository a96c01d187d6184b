//! Durable state: users/authorization, the usage ledger, and per-(user, chat)
//! conversation history.
//!
//! SQLite behind a mutex-guarded connection. Every operation is a single short
//! statement (or one implicit transaction), so concurrent callers serialize per
//! call and never observe a partially applied write.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    config::PricingTable,
    domain::{ChatScope, ConversationTurn, Role, UserId, UserRecord, UsageTotals},
    Result,
};

pub struct Store {
    conn: Mutex<Connection>,
    pricing: PricingTable,
}

impl Store {
    /// Open (or create) the database at `path`, run schema init, and seed the
    /// root admin. Seeding is an upsert, so reopening is idempotent and a
    /// demoted admin row is always restored.
    pub fn open(path: &Path, pricing: PricingTable, admin_user_id: i64) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                is_authorized INTEGER NOT NULL DEFAULT 0,
                is_admin INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_active TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS usage_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_usage_log_user
                ON usage_log(user_id);

            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_turns_scope
                ON turns(user_id, chat_id, id);

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        conn.execute(
            "INSERT INTO users (user_id, is_authorized, is_admin, created_at, last_active)
             VALUES (?1, 1, 1, ?2, ?2)
             ON CONFLICT(user_id) DO UPDATE SET is_authorized = 1, is_admin = 1",
            params![admin_user_id, now()],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            pricing,
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // === Users / authorization ===

    /// Create the user on first contact, or refresh display fields and
    /// last-active. `authorized` only seeds the flag on insert; on an
    /// existing row neither `is_authorized` nor `is_admin` is touched
    /// (flag flips go through authorize/deauthorize).
    pub fn upsert_user(
        &self,
        user_id: UserId,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
        authorized: bool,
    ) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO users (user_id, username, first_name, last_name, is_authorized, created_at, last_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                 username = excluded.username,
                 first_name = excluded.first_name,
                 last_name = excluded.last_name,
                 last_active = excluded.last_active",
            params![user_id.0, username, first_name, last_name, authorized as i32, now()],
        )?;
        Ok(())
    }

    /// False for ids the store has never seen; lookups never create rows.
    pub fn is_authorized(&self, user_id: UserId) -> Result<bool> {
        self.flag(user_id, "is_authorized")
    }

    pub fn is_admin(&self, user_id: UserId) -> Result<bool> {
        self.flag(user_id, "is_admin")
    }

    fn flag(&self, user_id: UserId, column: &str) -> Result<bool> {
        // Column name is one of two compile-time constants, not user input.
        let conn = self.lock_conn();
        let v: Option<i64> = conn
            .query_row(
                &format!("SELECT {column} FROM users WHERE user_id = ?1"),
                params![user_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v == Some(1))
    }

    /// Idempotent. The root-admin exemption for deauthorize is policy and lives
    /// in the admin command handler, not here.
    pub fn authorize(&self, user_id: UserId) -> Result<()> {
        self.set_authorized(user_id, true)
    }

    pub fn deauthorize(&self, user_id: UserId) -> Result<()> {
        self.set_authorized(user_id, false)
    }

    fn set_authorized(&self, user_id: UserId, value: bool) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE users SET is_authorized = ?2 WHERE user_id = ?1",
            params![user_id.0, value as i32],
        )?;
        Ok(())
    }

    /// All users, newest-created first.
    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, username, first_name, last_name, is_authorized, is_admin, created_at
             FROM users
             ORDER BY created_at DESC, user_id DESC",
        )?;
        let users = stmt
            .query_map([], |row| {
                Ok(UserRecord {
                    user_id: UserId(row.get(0)?),
                    username: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                    is_authorized: row.get::<_, i64>(4)? != 0,
                    is_admin: row.get::<_, i64>(5)? != 0,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn user_exists(&self, user_id: UserId) -> Result<bool> {
        let conn = self.lock_conn();
        let v: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM users WHERE user_id = ?1",
                params![user_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v.is_some())
    }

    // === Usage ledger ===

    /// Persist one model invocation and return its computed cost so the caller
    /// can report it without a second query.
    pub fn log_usage(
        &self,
        user_id: UserId,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<f64> {
        let cost = self.pricing.cost(model, input_tokens, output_tokens);
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO usage_log (user_id, model, input_tokens, output_tokens, cost_usd, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id.0,
                model,
                input_tokens as i64,
                output_tokens as i64,
                cost,
                now()
            ],
        )?;
        Ok(cost)
    }

    pub fn total_usage(&self) -> Result<UsageTotals> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0), COALESCE(SUM(cost_usd), 0.0)
             FROM usage_log",
            [],
            totals_from_row,
        )
        .map_err(Into::into)
    }

    pub fn user_usage(&self, user_id: UserId) -> Result<UsageTotals> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0), COALESCE(SUM(cost_usd), 0.0)
             FROM usage_log
             WHERE user_id = ?1",
            params![user_id.0],
            totals_from_row,
        )
        .map_err(Into::into)
    }

    // === Conversation turns ===

    pub fn append_turn(
        &self,
        user_id: UserId,
        scope: ChatScope,
        role: Role,
        content: &str,
    ) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO turns (user_id, chat_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id.0, scope.0, role.as_str(), content, now()],
        )?;
        Ok(())
    }

    /// The most recent `limit` turns for a scope, returned oldest-first so the
    /// slice is ready to replay as model context. Rows with a malformed role
    /// are skipped rather than forwarded to the model.
    pub fn recent_turns(
        &self,
        user_id: UserId,
        scope: ChatScope,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at
             FROM turns
             WHERE user_id = ?1 AND chat_id = ?2
             ORDER BY id DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![user_id.0, scope.0, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut turns: Vec<ConversationTurn> = rows
            .into_iter()
            .filter_map(|(role, content, created_at)| {
                Role::parse(&role).map(|role| ConversationTurn {
                    role,
                    content,
                    created_at,
                })
            })
            .collect();
        turns.reverse();
        Ok(turns)
    }

    /// Irreversibly delete all turns for one (user, chat) scope.
    pub fn clear_turns(&self, user_id: UserId, scope: ChatScope) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM turns WHERE user_id = ?1 AND chat_id = ?2",
            params![user_id.0, scope.0],
        )?;
        Ok(())
    }

    // === Settings ===

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn totals_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UsageTotals, rusqlite::Error> {
    Ok(UsageTotals {
        total_requests: row.get::<_, i64>(0)? as u64,
        total_input_tokens: row.get::<_, i64>(1)? as u64,
        total_output_tokens: row.get::<_, i64>(2)? as u64,
        total_cost: row.get(3)?,
    })
}

fn now() -> String {
    Utc::now().to_rfc3339()
}
