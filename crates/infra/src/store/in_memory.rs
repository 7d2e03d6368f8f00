//! In-memory stores for tests/dev.
//!
//! Each store keeps its rows behind one `RwLock`; every read-modify-write runs
//! under the write guard, which is what makes lockout increments and session
//! deactivation atomic here.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ctms_auth::{
    AuditFilter, AuditRecord, FailureOutcome, LockoutPolicy, PasswordDigest, Role, Session,
    SessionToken, SuccessOutcome, User, clear_lockout, register_success,
};
use ctms_core::UserId;

use super::{AuditStore, CredentialStore, SessionStore, StoreError};

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<F>(&self, id: UserId, f: F) -> Result<User, StoreError>
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        f(user);
        Ok(user.clone())
    }

    fn find<P>(&self, pred: P) -> Result<Option<User>, StoreError>
    where
        P: Fn(&User) -> bool,
    {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.values().find(|u| pred(u)).cloned())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;

        if users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate("username".to_string()));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email".to_string()));
        }
        if users.contains_key(&user.id) {
            return Err(StoreError::Duplicate("id".to_string()));
        }

        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find(|u| u.username == username)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find(|u| u.email == email)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.len() as u64)
    }

    async fn update_role(&self, id: UserId, role: Role, at: DateTime<Utc>) -> Result<User, StoreError> {
        self.mutate(id, |u| {
            u.role = role;
            u.updated_at = at;
        })
    }

    async fn set_active(&self, id: UserId, active: bool, at: DateTime<Utc>) -> Result<User, StoreError> {
        self.mutate(id, |u| {
            u.is_active = active;
            u.updated_at = at;
        })
    }

    async fn update_profile(
        &self,
        id: UserId,
        email: Option<&str>,
        full_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        if !users.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if let Some(email) = email {
            if users.values().any(|u| u.id != id && u.email == email) {
                return Err(StoreError::Duplicate("email".to_string()));
            }
        }

        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(email) = email {
            user.email = email.to_string();
        }
        if let Some(full_name) = full_name {
            user.full_name = full_name.to_string();
        }
        user.updated_at = at;
        Ok(user.clone())
    }

    async fn set_password(
        &self,
        id: UserId,
        digest: &PasswordDigest,
        at: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        self.mutate(id, |u| {
            u.password_hash = digest.hash.clone();
            u.salt = digest.salt.clone();
            u.updated_at = at;
        })
    }

    async fn reset_password(
        &self,
        id: UserId,
        digest: &PasswordDigest,
        at: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        self.mutate(id, |u| {
            u.password_hash = digest.hash.clone();
            u.salt = digest.salt.clone();
            clear_lockout(u, at);
        })
    }

    async fn record_login_success(
        &self,
        id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(User, SuccessOutcome), StoreError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        let outcome = register_success(user, at);
        Ok((user.clone(), outcome))
    }

    async fn record_login_failure(
        &self,
        id: UserId,
        policy: &LockoutPolicy,
        at: DateTime<Utc>,
    ) -> Result<(User, FailureOutcome), StoreError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        let outcome = policy.apply_failure(user, at);
        Ok((user.clone(), outcome))
    }

    async fn clear_lockout(&self, id: UserId, at: DateTime<Utc>) -> Result<User, StoreError> {
        self.mutate(id, |u| clear_lockout(u, at))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionToken, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        if sessions.contains_key(&session.session_token) {
            return Err(StoreError::Duplicate("session_token".to_string()));
        }
        sessions.insert(session.session_token.clone(), session);
        Ok(())
    }

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        Ok(sessions.get(token).cloned())
    }

    async fn deactivate(&self, token: &SessionToken) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        match sessions.get_mut(token) {
            Some(s) if s.is_active => {
                s.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_all_for_user(
        &self,
        user_id: UserId,
        except: Option<&SessionToken>,
    ) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let mut count = 0;
        for s in sessions.values_mut() {
            if s.user_id != user_id || !s.is_active || Some(&s.session_token) == except {
                continue;
            }
            s.is_active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn list_active_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        let mut active: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active && !s.is_expired(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let mut count = 0;
        for s in sessions.values_mut().filter(|s| s.is_active && s.is_expired(now)) {
            s.is_active = false;
            count += 1;
        }
        Ok(count)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in insertion order.
    pub fn all(&self) -> Vec<AuditRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.push(record);
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut matched: Vec<AuditRecord> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        matched.truncate(filter.effective_limit());
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ctms_auth::{AuditAction, NewAuditRecord};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap()
    }

    fn user(name: &str) -> User {
        User {
            id: UserId::new(),
            username: name.to_string(),
            email: format!("{name}@x.com"),
            password_hash: "00".to_string(),
            salt: "00".to_string(),
            role: Role::Member,
            full_name: name.to_string(),
            is_active: true,
            created_at: t0(),
            updated_at: t0(),
            last_login: None,
            failed_login_attempts: 0,
            locked_until: None,
        }
    }

    #[tokio::test]
    async fn duplicate_username_or_email_writes_nothing() {
        let store = InMemoryCredentialStore::new();
        store.create_user(user("alice")).await.unwrap();

        let mut dup_name = user("alice");
        dup_name.email = "other@x.com".to_string();
        assert_eq!(
            store.create_user(dup_name).await.unwrap_err(),
            StoreError::Duplicate("username".to_string())
        );

        let mut dup_email = user("bob");
        dup_email.email = "alice@x.com".to_string();
        assert_eq!(
            store.create_user(dup_email).await.unwrap_err(),
            StoreError::Duplicate("email".to_string())
        );

        assert_eq!(store.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mutations_bump_updated_at() {
        let store = InMemoryCredentialStore::new();
        let u = store.create_user(user("carol")).await.unwrap();
        let later = t0() + Duration::minutes(3);
        let updated = store.update_role(u.id, Role::Treasurer, later).await.unwrap();
        assert_eq!(updated.role, Role::Treasurer);
        assert_eq!(updated.updated_at, later);
    }

    #[tokio::test]
    async fn mutating_unknown_user_is_not_found() {
        let store = InMemoryCredentialStore::new();
        assert_eq!(
            store.set_active(UserId::new(), false, t0()).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn profile_update_rejects_an_email_held_by_another_user() {
        let store = InMemoryCredentialStore::new();
        let alice = store.create_user(user("alice")).await.unwrap();
        store.create_user(user("bob")).await.unwrap();

        let err = store
            .update_profile(alice.id, Some("bob@x.com"), Some("Alice B"), t0())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate("email".to_string()));
        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.full_name, "alice");

        let kept = store
            .update_profile(alice.id, Some("alice@x.com"), None, t0())
            .await
            .unwrap();
        assert_eq!(kept.email, "alice@x.com");
    }

    #[tokio::test]
    async fn success_write_rechecks_the_lock() {
        let store = InMemoryCredentialStore::new();
        let u = store.create_user(user("dana")).await.unwrap();
        let policy = LockoutPolicy::default();
        for _ in 0..5 {
            store.record_login_failure(u.id, &policy, t0()).await.unwrap();
        }

        let (stored, outcome) = store.record_login_success(u.id, t0()).await.unwrap();
        assert!(matches!(outcome, SuccessOutcome::Locked { .. }));
        assert_eq!(stored.failed_login_attempts, 5);
        assert!(stored.locked_until.is_some());
    }

    #[tokio::test]
    async fn deactivate_reports_only_the_first_flip() {
        let store = InMemorySessionStore::new();
        let s = Session::issue(UserId::new(), None, None, t0(), Duration::hours(1));
        let token = s.session_token.clone();
        store.insert(s).await.unwrap();

        assert!(store.deactivate(&token).await.unwrap());
        assert!(!store.deactivate(&token).await.unwrap());
        assert!(!store.deactivate(&SessionToken::generate()).await.unwrap());
    }

    #[tokio::test]
    async fn deactivate_all_spares_the_excepted_token() {
        let store = InMemorySessionStore::new();
        let uid = UserId::new();
        let keep = Session::issue(uid, None, None, t0(), Duration::hours(1));
        let keep_token = keep.session_token.clone();
        store.insert(keep).await.unwrap();
        store.insert(Session::issue(uid, None, None, t0(), Duration::hours(1))).await.unwrap();
        store.insert(Session::issue(uid, None, None, t0(), Duration::hours(1))).await.unwrap();
        store.insert(Session::issue(UserId::new(), None, None, t0(), Duration::hours(1))).await.unwrap();

        let revoked = store.deactivate_all_for_user(uid, Some(&keep_token)).await.unwrap();
        assert_eq!(revoked, 2);
        let active = store.list_active_for_user(uid, t0()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_token, keep_token);
    }

    #[tokio::test]
    async fn sweep_only_touches_expired_sessions() {
        let store = InMemorySessionStore::new();
        let uid = UserId::new();
        store.insert(Session::issue(uid, None, None, t0(), Duration::minutes(5))).await.unwrap();
        store.insert(Session::issue(uid, None, None, t0(), Duration::hours(5))).await.unwrap();

        let swept = store.deactivate_expired(t0() + Duration::minutes(5)).await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(store.deactivate_expired(t0() + Duration::minutes(5)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn audit_query_is_newest_first_and_limited() {
        let store = InMemoryAuditStore::new();
        for i in 0..5 {
            let rec = NewAuditRecord::new(None, AuditAction::PageAccess)
                .details(format!("visit {i}"))
                .into_record(t0() + Duration::seconds(i));
            store.append(rec).await.unwrap();
        }

        let filter = AuditFilter {
            limit: Some(2),
            ..Default::default()
        };
        let got = store.query(&filter).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].details.as_deref(), Some("visit 4"));
        assert_eq!(got[1].details.as_deref(), Some("visit 3"));
    }
}
