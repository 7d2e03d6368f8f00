//! Postgres-backed stores.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate(constraint)` |
//! | Database (other) | any | `Backend` |
//! | PoolTimedOut / PoolClosed / Io | n/a | `Transient` |
//! | Other | n/a | `Backend` |
//!
//! ## Concurrency
//!
//! `record_login_failure` and `record_login_success` lock the user row
//! (`SELECT ... FOR UPDATE`) inside a transaction, so concurrent attempts
//! serialize: no increment is lost and a success never clears a lock it did
//! not see.
//! Session deactivation is a conditional `UPDATE ... WHERE is_active`, which
//! makes it idempotent under races.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use ctms_auth::{
    AuditAction, AuditFilter, AuditRecord, FailureOutcome, LockoutPolicy, PasswordDigest, Role,
    Session, SessionToken, SuccessOutcome, User, register_success,
};
use ctms_core::{AuditRecordId, SessionId, UserId};

use super::{AuditStore, CredentialStore, SessionStore, StoreError};

/// Tables used by the three stores. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                    UUID PRIMARY KEY,
    username              TEXT NOT NULL UNIQUE,
    email                 TEXT NOT NULL UNIQUE,
    password_hash         TEXT NOT NULL,
    salt                  TEXT NOT NULL,
    role                  TEXT NOT NULL,
    full_name             TEXT NOT NULL,
    is_active             BOOLEAN NOT NULL DEFAULT TRUE,
    created_at            TIMESTAMPTZ NOT NULL,
    updated_at            TIMESTAMPTZ NOT NULL,
    last_login            TIMESTAMPTZ,
    failed_login_attempts INTEGER NOT NULL DEFAULT 0 CHECK (failed_login_attempts >= 0),
    locked_until          TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS user_sessions (
    id            UUID PRIMARY KEY,
    user_id       UUID NOT NULL REFERENCES users(id),
    session_token TEXT NOT NULL UNIQUE,
    created_at    TIMESTAMPTZ NOT NULL,
    expires_at    TIMESTAMPTZ NOT NULL,
    is_active     BOOLEAN NOT NULL DEFAULT TRUE,
    ip_address    TEXT,
    user_agent    TEXT
);

CREATE INDEX IF NOT EXISTS user_sessions_user_idx ON user_sessions (user_id) WHERE is_active;

CREATE TABLE IF NOT EXISTS audit_log (
    id          UUID PRIMARY KEY,
    user_id     UUID,
    action      TEXT NOT NULL,
    resource    TEXT,
    resource_id TEXT,
    details     TEXT,
    ip_address  TEXT,
    timestamp   TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS audit_log_timestamp_idx ON audit_log (timestamp DESC);
"#;

/// Apply [`SCHEMA`] to the pool's database.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unique").to_string();
                return StoreError::Duplicate(constraint);
            }
            StoreError::Backend(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Transient(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Transient(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Transient(format!("io error in {}: {}", operation, e)),
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Backend(format!("sqlx error in {}: {}", operation, other)),
    }
}

fn decode_err(operation: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("decode error in {}: {}", operation, detail))
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, username, email, password_hash, salt, role, full_name, is_active, \
     created_at, updated_at, last_login, failed_login_attempts, locked_until";

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let op = "user_from_row";
    let get = |e: sqlx::Error| map_sqlx_error(op, e);

    let role: String = row.try_get("role").map_err(get)?;
    let role = role.parse::<Role>().map_err(|e| decode_err(op, e))?;
    let attempts: i32 = row.try_get("failed_login_attempts").map_err(get)?;

    Ok(User {
        id: UserId::from_uuid(row.try_get::<Uuid, _>("id").map_err(get)?),
        username: row.try_get("username").map_err(get)?,
        email: row.try_get("email").map_err(get)?,
        password_hash: row.try_get("password_hash").map_err(get)?,
        salt: row.try_get("salt").map_err(get)?,
        role,
        full_name: row.try_get("full_name").map_err(get)?,
        is_active: row.try_get("is_active").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
        last_login: row.try_get("last_login").map_err(get)?,
        failed_login_attempts: u32::try_from(attempts).map_err(|e| decode_err(op, e))?,
        locked_until: row.try_get("locked_until").map_err(get)?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("session_from_row", e);
    Ok(Session {
        id: SessionId::from_uuid(row.try_get::<Uuid, _>("id").map_err(get)?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(get)?),
        session_token: SessionToken::from_string(row.try_get::<String, _>("session_token").map_err(get)?),
        created_at: row.try_get("created_at").map_err(get)?,
        expires_at: row.try_get("expires_at").map_err(get)?,
        is_active: row.try_get("is_active").map_err(get)?,
        ip_address: row.try_get("ip_address").map_err(get)?,
        user_agent: row.try_get("user_agent").map_err(get)?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditRecord, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("audit_from_row", e);
    let action: String = row.try_get("action").map_err(get)?;
    let Ok(action) = action.parse::<AuditAction>();
    Ok(AuditRecord {
        id: AuditRecordId::from_uuid(row.try_get::<Uuid, _>("id").map_err(get)?),
        user_id: row
            .try_get::<Option<Uuid>, _>("user_id")
            .map_err(get)?
            .map(UserId::from_uuid),
        action,
        resource: row.try_get("resource").map_err(get)?,
        resource_id: row.try_get("resource_id").map_err(get)?,
        details: row.try_get("details").map_err(get)?,
        ip_address: row.try_get("ip_address").map_err(get)?,
        timestamp: row.try_get("timestamp").map_err(get)?,
    })
}

fn attempts_column(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn find_one(&self, operation: &str, column: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Open a transaction and lock the user row for the rest of it.
    async fn lock_row(
        &self,
        operation: &str,
        id: UserId,
    ) -> Result<(sqlx::Transaction<'static, sqlx::Postgres>, User), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .ok_or(StoreError::NotFound)?;

        let user = user_from_row(&row)?;
        Ok((tx, user))
    }

    /// Run an `UPDATE ... WHERE id = $1 RETURNING *` and map a missing row to `NotFound`.
    async fn update_returning<'q>(
        &self,
        operation: &str,
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<User, StoreError> {
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .ok_or(StoreError::NotFound)?;
        user_from_row(&row)
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self, user), fields(user_id = %user.id, username = %user.username), err)]
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, email, password_hash, salt, role, full_name, is_active,
                created_at, updated_at, last_login, failed_login_attempts, locked_until
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.salt)
        .bind(user.role.as_str())
        .bind(&user.full_name)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.last_login)
        .bind(attempts_column(user.failed_login_attempts))
        .bind(user.locked_until)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_user", e))?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_one("find_by_username", "username", username).await
    }

    #[instrument(skip(self), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_one("find_by_email", "email", email).await
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_users", e))?;
        rows.iter().map(user_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn count_users(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_users", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn update_role(&self, id: UserId, role: Role, at: DateTime<Utc>) -> Result<User, StoreError> {
        let sql = format!("UPDATE users SET role = $2, updated_at = $3 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let query = sqlx::query(&sql).bind(*id.as_uuid()).bind(role.as_str()).bind(at);
        self.update_returning("update_role", query).await
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn set_active(&self, id: UserId, active: bool, at: DateTime<Utc>) -> Result<User, StoreError> {
        let sql =
            format!("UPDATE users SET is_active = $2, updated_at = $3 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let query = sqlx::query(&sql).bind(*id.as_uuid()).bind(active).bind(at);
        self.update_returning("set_active", query).await
    }

    #[instrument(skip(self, email, full_name), fields(user_id = %id), err)]
    async fn update_profile(
        &self,
        id: UserId,
        email: Option<&str>,
        full_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let sql = format!(
            "UPDATE users SET email = COALESCE($2, email), full_name = COALESCE($3, full_name), \
             updated_at = $4 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .bind(email.map(str::to_string))
            .bind(full_name.map(str::to_string))
            .bind(at);
        self.update_returning("update_profile", query).await
    }

    #[instrument(skip(self, digest), fields(user_id = %id), err)]
    async fn set_password(
        &self,
        id: UserId,
        digest: &PasswordDigest,
        at: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let sql = format!(
            "UPDATE users SET password_hash = $2, salt = $3, updated_at = $4 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .bind(digest.hash.clone())
            .bind(digest.salt.clone())
            .bind(at);
        self.update_returning("set_password", query).await
    }

    #[instrument(skip(self, digest), fields(user_id = %id), err)]
    async fn reset_password(
        &self,
        id: UserId,
        digest: &PasswordDigest,
        at: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let sql = format!(
            "UPDATE users SET password_hash = $2, salt = $3, failed_login_attempts = 0, locked_until = NULL, \
             updated_at = $4 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .bind(digest.hash.clone())
            .bind(digest.salt.clone())
            .bind(at);
        self.update_returning("reset_password", query).await
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn record_login_success(
        &self,
        id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(User, SuccessOutcome), StoreError> {
        let (mut tx, mut user) = self.lock_row("record_login_success", id).await?;
        let outcome = register_success(&mut user, at);

        if outcome == SuccessOutcome::Cleared {
            sqlx::query(
                "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, last_login = $2, \
                 updated_at = $2 WHERE id = $1",
            )
            .bind(id.as_uuid())
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("record_login_success", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("record_login_success", e))?;

        Ok((user, outcome))
    }

    #[instrument(skip(self, policy), fields(user_id = %id), err)]
    async fn record_login_failure(
        &self,
        id: UserId,
        policy: &LockoutPolicy,
        at: DateTime<Utc>,
    ) -> Result<(User, FailureOutcome), StoreError> {
        let (mut tx, mut user) = self.lock_row("record_login_failure", id).await?;
        let outcome = policy.apply_failure(&mut user, at);

        sqlx::query(
            "UPDATE users SET failed_login_attempts = $2, locked_until = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(attempts_column(user.failed_login_attempts))
        .bind(user.locked_until)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("record_login_failure", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("record_login_failure", e))?;

        Ok((user, outcome))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn clear_lockout(&self, id: UserId, at: DateTime<Utc>) -> Result<User, StoreError> {
        let sql = format!(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, updated_at = $2 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let query = sqlx::query(&sql).bind(*id.as_uuid()).bind(at);
        self.update_returning("clear_lockout", query).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

const SESSION_COLUMNS: &str =
    "id, user_id, session_token, created_at, expires_at, is_active, ip_address, user_agent";

#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(skip(self, session), fields(session_id = %session.id, user_id = %session.user_id), err)]
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_sessions (
                id, user_id, session_token, created_at, expires_at, is_active, ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_uuid())
        .bind(session.session_token.as_str())
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.is_active)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<Session>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE session_token = $1");
        let row = sqlx::query(&sql)
            .bind(token.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_token", e))?;
        row.as_ref().map(session_from_row).transpose()
    }

    #[instrument(skip_all, err)]
    async fn deactivate(&self, token: &SessionToken) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = FALSE WHERE session_token = $1 AND is_active",
        )
        .bind(token.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_session", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, except), fields(user_id = %user_id), err)]
    async fn deactivate_all_for_user(
        &self,
        user_id: UserId,
        except: Option<&SessionToken>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions SET is_active = FALSE
            WHERE user_id = $1 AND is_active
              AND ($2::TEXT IS NULL OR session_token <> $2)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(except.map(|t| t.as_str().to_string()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_all_for_user", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_active_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions \
             WHERE user_id = $1 AND is_active AND expires_at > $2 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(now)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_active_for_user", e))?;
        rows.iter().map(session_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = FALSE WHERE is_active AND expires_at <= $1",
        )
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_expired", e))?;
        Ok(result.rows_affected())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PostgresAuditStore {
    pool: Arc<PgPool>,
}

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    #[instrument(skip(self, record), fields(action = %record.action.as_str()), err)]
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, user_id, action, resource, resource_id, details, ip_address, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.user_id.map(|id| *id.as_uuid()))
        .bind(record.action.as_str())
        .bind(&record.resource)
        .bind(&record.resource_id)
        .bind(&record.details)
        .bind(&record.ip_address)
        .bind(record.timestamp)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        Ok(())
    }

    #[instrument(skip(self, filter), err)]
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, action, resource, resource_id, details, ip_address, timestamp
            FROM audit_log
            WHERE ($1::UUID IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR action = $2)
              AND ($3::TEXT IS NULL OR resource = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR timestamp >= $4)
              AND ($5::TIMESTAMPTZ IS NULL OR timestamp < $5)
            ORDER BY timestamp DESC, id DESC
            LIMIT $6
            "#,
        )
        .bind(filter.user_id.map(|id| *id.as_uuid()))
        .bind(filter.action.as_ref().map(|a| a.as_str().to_string()))
        .bind(filter.resource.clone())
        .bind(filter.from)
        .bind(filter.to)
        .bind(i64::try_from(filter.effective_limit()).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_audit", e))?;
        rows.iter().map(audit_from_row).collect()
    }
}
