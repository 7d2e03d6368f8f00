//! Session lifecycle on top of a [`SessionStore`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

use ctms_auth::{AuthError, Session, SessionToken, User, validate_session};
use ctms_core::UserId;

use crate::store::{CredentialStore, SessionStore};

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            sessions,
            credentials,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[instrument(skip(self, user_agent), fields(user_id = %user_id), err)]
    pub async fn create_session(
        &self,
        user_id: UserId,
        ip_address: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let session = Session::issue(user_id, ip_address, user_agent, now, self.ttl);
        self.sessions.insert(session.clone()).await?;
        Ok(session)
    }

    /// Resolve a token to its live session and owner.
    ///
    /// An expired session is marked inactive on the way out. That write is
    /// idempotent, so concurrent validations of the same expired token all
    /// report `ExpiredSession` and leave it inactive.
    #[instrument(skip_all, err)]
    pub async fn validate(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<(Session, User), AuthError> {
        let session = self
            .sessions
            .find_by_token(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if let Err(e) = validate_session(&session, now) {
            if e == AuthError::ExpiredSession && session.is_active {
                if let Err(store_err) = self.sessions.deactivate(token).await {
                    tracing::warn!(
                        session_id = %session.id,
                        error = %store_err,
                        "failed to mark expired session inactive"
                    );
                }
            }
            return Err(e);
        }

        let user = self
            .credentials
            .find_by_id(session.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        Ok((session, user))
    }

    /// Raw lookup with no validity checks.
    pub async fn lookup(&self, token: &SessionToken) -> Result<Option<Session>, AuthError> {
        Ok(self.sessions.find_by_token(token).await?)
    }

    /// Returns `true` if this call deactivated the session.
    #[instrument(skip_all, err)]
    pub async fn revoke(&self, token: &SessionToken) -> Result<bool, AuthError> {
        Ok(self.sessions.deactivate(token).await?)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, AuthError> {
        Ok(self.sessions.deactivate_all_for_user(user_id, None).await?)
    }

    #[instrument(skip(self, keep), fields(user_id = %user_id), err)]
    pub async fn revoke_all_except(
        &self,
        user_id: UserId,
        keep: &SessionToken,
    ) -> Result<u64, AuthError> {
        Ok(self.sessions.deactivate_all_for_user(user_id, Some(keep)).await?)
    }

    pub async fn list_active_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AuthError> {
        Ok(self.sessions.list_active_for_user(user_id, now).await?)
    }

    #[instrument(skip(self), err)]
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let swept = self.sessions.deactivate_expired(now).await?;
        if swept > 0 {
            tracing::info!(swept, "expired sessions deactivated");
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryCredentialStore, InMemorySessionStore};
    use chrono::TimeZone;
    use ctms_auth::Role;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    async fn setup() -> (SessionManager, Arc<InMemoryCredentialStore>, User) {
        let creds = Arc::new(InMemoryCredentialStore::new());
        let user = User {
            id: UserId::new(),
            username: "dave".into(),
            email: "dave@x.com".into(),
            password_hash: "00".into(),
            salt: "00".into(),
            role: Role::Secretary,
            full_name: "Dave".into(),
            is_active: true,
            created_at: t0(),
            updated_at: t0(),
            last_login: None,
            failed_login_attempts: 0,
            locked_until: None,
        };
        creds.create_user(user.clone()).await.unwrap();
        let manager = SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            creds.clone(),
            Duration::hours(1),
        );
        (manager, creds, user)
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let (manager, _, _) = setup().await;
        let err = manager.validate(&SessionToken::generate(), t0()).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidToken);
    }

    #[tokio::test]
    async fn expiry_is_absolute_and_sticky() {
        let (manager, _, user) = setup().await;
        let session = manager.create_session(user.id, None, None, t0()).await.unwrap();
        let token = session.session_token;

        let (_, owner) = manager.validate(&token, t0() + Duration::minutes(59)).await.unwrap();
        assert_eq!(owner.id, user.id);

        let at_expiry = t0() + Duration::hours(1);
        assert_eq!(manager.validate(&token, at_expiry).await.unwrap_err(), AuthError::ExpiredSession);
        assert_eq!(manager.validate(&token, at_expiry).await.unwrap_err(), AuthError::ExpiredSession);
        assert!(manager.list_active_for_user(user.id, t0()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deactivated_owner_fails_validation() {
        let (manager, creds, user) = setup().await;
        let session = manager.create_session(user.id, None, None, t0()).await.unwrap();
        creds.set_active(user.id, false, t0()).await.unwrap();

        let err = manager.validate(&session.session_token, t0()).await.unwrap_err();
        assert_eq!(err, AuthError::AccountInactive);
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let (manager, _, user) = setup().await;
        let session = manager.create_session(user.id, None, None, t0()).await.unwrap();
        assert!(manager.revoke(&session.session_token).await.unwrap());
        assert!(!manager.revoke(&session.session_token).await.unwrap());
        assert_eq!(
            manager.validate(&session.session_token, t0()).await.unwrap_err(),
            AuthError::InvalidToken
        );
    }
}
