//! Security entry points.
//!
//! `AuthService` is the only thing the transport layer talks to. Each entry
//! point takes the session token and the clock explicitly, and each
//! security-relevant call writes exactly one audit record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ctms_auth::user::validate_password;
use ctms_auth::{
    Action, AuditAction, AuditFilter, AuditRecord, AuthError, AuthorizationExplanation,
    FailureOutcome, NewAuditRecord, NewUser, PasswordDigest, PasswordHasher, Permission,
    Principal, ProfileUpdate, RbacRegistry, Resource, Role, Session, SessionToken, SuccessOutcome,
    User, explain_authorization, generate_temporary_password, is_locked, normalize_identity,
    require,
};
use ctms_core::UserId;

use crate::audit_logger::AuditLogger;
use crate::config::AuthConfig;
use crate::session_manager::SessionManager;
use crate::store::{
    AuditStore, CredentialStore, InMemoryAuditStore, InMemoryCredentialStore,
    InMemorySessionStore, SessionStore,
};

pub const BOOTSTRAP_ADMIN_USERNAME: &str = "admin";
pub const BOOTSTRAP_ADMIN_EMAIL: &str = "admin@church.local";
pub const BOOTSTRAP_ADMIN_FULL_NAME: &str = "System Administrator";

const AUTH_RESOURCE: &str = "auth";
const USERS_RESOURCE: &str = "users";

/// Successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginSuccess {
    pub session_token: SessionToken,
    pub expires_at: DateTime<Utc>,
    pub user: Principal,
}

/// Account creation input as received from an administrator.
#[derive(Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub full_name: String,
}

impl std::fmt::Debug for CreateUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUserRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    sessions: SessionManager,
    audit: AuditLogger,
    hasher: PasswordHasher,
    config: AuthConfig,
    /// Verified against on every path that rejects before checking the real
    /// hash, so each login attempt costs one PBKDF2 run.
    decoy: PasswordDigest,
}

impl AuthService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditStore>,
        config: AuthConfig,
    ) -> Result<Self, AuthError> {
        let hasher = PasswordHasher::new(config.pbkdf2_iterations)?;
        let decoy = hasher.hash(&generate_temporary_password(), None);

        Ok(Self {
            sessions: SessionManager::new(sessions, credentials.clone(), config.session_ttl),
            credentials,
            audit: AuditLogger::new(audit),
            hasher,
            config,
            decoy,
        })
    }

    /// Service wired to fresh in-memory stores (dev/test).
    pub fn in_memory(config: AuthConfig) -> Result<Self, AuthError> {
        Self::new(
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryAuditStore::new()),
            config,
        )
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.sessions
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Core entry points
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify credentials and open a session.
    ///
    /// Order: lookup, lock check, active check, password. A login against a
    /// live lock still counts as a failure but never extends the lock.
    #[instrument(skip(self, password, user_agent), fields(username = %username), err)]
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LoginSuccess, AuthError> {
        let username = normalize_identity(username);

        let found = match self.credentials.find_by_username(&username).await {
            Ok(found) => found,
            Err(e) => return Err(self.login_not_recorded(None, e.into(), ip_address, now).await),
        };

        let Some(user) = found else {
            self.burn_decoy(password);
            self.audit
                .record(
                    NewAuditRecord::new(None, AuditAction::LoginFailed)
                        .resource(AUTH_RESOURCE)
                        .details(format!("Unknown username '{username}'"))
                        .ip_address(ip_address),
                    now,
                )
                .await;
            return Err(AuthError::InvalidCredentials);
        };

        if is_locked(&user, now) {
            self.burn_decoy(password);
            return Err(self.reject_locked(user.id, ip_address, now).await);
        }

        if !user.is_active {
            self.burn_decoy(password);
            self.audit
                .record(
                    NewAuditRecord::new(Some(user.id), AuditAction::LoginFailed)
                        .resource(AUTH_RESOURCE)
                        .details("Account is deactivated")
                        .ip_address(ip_address),
                    now,
                )
                .await;
            return Err(AuthError::AccountInactive);
        }

        if !self.hasher.verify(password, &user.password_hash, &user.salt) {
            let outcome = match self
                .credentials
                .record_login_failure(user.id, &self.config.lockout, now)
                .await
            {
                Ok((_, outcome)) => outcome,
                Err(e) => {
                    let e = self.login_not_recorded(Some(user.id), e.into(), ip_address, now).await;
                    return Err(e);
                }
            };
            let details = match outcome {
                FailureOutcome::LockedNow { attempts, until } => {
                    tracing::warn!(user_id = %user.id, attempts, %until, "account locked");
                    format!("Invalid password (attempt {attempts}); account locked until {until}")
                }
                FailureOutcome::Counted { attempts } | FailureOutcome::AlreadyLocked { attempts, .. } => {
                    format!("Invalid password (attempt {attempts})")
                }
            };
            self.audit
                .record(
                    NewAuditRecord::new(Some(user.id), AuditAction::LoginFailed)
                        .resource(AUTH_RESOURCE)
                        .details(details)
                        .ip_address(ip_address),
                    now,
                )
                .await;
            return Err(AuthError::InvalidCredentials);
        }

        // The lock is re-checked on the row itself: a concurrent failure may
        // have locked the account since the lookup above.
        let user = match self.credentials.record_login_success(user.id, now).await {
            Ok((user, SuccessOutcome::Cleared)) => user,
            Ok((_, SuccessOutcome::Locked { .. })) => {
                return Err(self.reject_locked(user.id, ip_address, now).await);
            }
            Err(e) => {
                let e = self.login_not_recorded(Some(user.id), e.into(), ip_address, now).await;
                return Err(e);
            }
        };

        let session = match self
            .sessions
            .create_session(
                user.id,
                ip_address.map(str::to_string),
                user_agent.map(str::to_string),
                now,
            )
            .await
        {
            Ok(session) => session,
            Err(e) => return Err(self.login_not_recorded(Some(user.id), e, ip_address, now).await),
        };

        self.audit
            .record(
                NewAuditRecord::new(Some(user.id), AuditAction::LoginSuccess)
                    .resource(AUTH_RESOURCE)
                    .resource_id(session.id)
                    .details("User logged in successfully")
                    .ip_address(ip_address),
                now,
            )
            .await;
        tracing::info!(user_id = %user.id, role = %user.role, "login succeeded");

        Ok(LoginSuccess {
            session_token: session.session_token,
            expires_at: session.expires_at,
            user: Principal::from(&user),
        })
    }

    /// Resolve the token and check `resource.action` against the RBAC table.
    ///
    /// Unknown resource or action names are denied. Grants and denials are
    /// both audited, with distinct actions.
    #[instrument(skip(self, token), err)]
    pub async fn authorize(
        &self,
        token: &SessionToken,
        resource: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthError> {
        let requested = format!("{resource}.{action}");

        let user = match self.sessions.validate(token, now).await {
            Ok((_, user)) => user,
            Err(e) => {
                let owner = self.session_owner(token).await;
                self.audit_denied(owner, None, resource, &requested, e.code(), now)
                    .await;
                return Err(e);
            }
        };

        let permission = match (resource.parse::<Resource>(), action.parse::<Action>()) {
            (Ok(resource), Ok(action)) => Permission::new(resource, action),
            _ => {
                self.audit_denied(
                    Some(user.id),
                    Some(user.role),
                    resource,
                    &requested,
                    "unknown permission",
                    now,
                )
                .await;
                return Err(AuthError::UnknownPermission(requested));
            }
        };

        if let Err(e) = require(user.role, permission) {
            self.audit_denied(
                Some(user.id),
                Some(user.role),
                resource,
                &requested,
                "role lacks permission",
                now,
            )
            .await;
            return Err(e);
        }

        self.audit_granted(&user, permission, now).await;
        Ok(Principal::from(&user))
    }

    /// End a session. Unknown or already-ended tokens succeed silently.
    #[instrument(skip_all, err)]
    pub async fn logout(&self, token: &SessionToken, now: DateTime<Utc>) -> Result<(), AuthError> {
        let Some(session) = self.sessions.lookup(token).await? else {
            return Ok(());
        };

        if self.sessions.revoke(token).await? {
            self.audit
                .record(
                    NewAuditRecord::new(Some(session.user_id), AuditAction::Logout)
                        .resource(AUTH_RESOURCE)
                        .resource_id(session.id)
                        .details("User logged out"),
                    now,
                )
                .await;
        }
        Ok(())
    }

    /// Change the caller's password and end every other session they hold.
    ///
    /// A wrong current password does not count toward lockout. Other sessions
    /// are revoked before the new hash is written, so a store failure leaves
    /// the old password in place and the call can simply be retried.
    #[instrument(skip(self, token, old_password, new_password), err)]
    pub async fn change_password(
        &self,
        token: &SessionToken,
        old_password: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let (_, user) = match self.sessions.validate(token, now).await {
            Ok(resolved) => resolved,
            Err(e) => {
                let owner = self.session_owner(token).await;
                self.audit_password_change_failed(owner, e.code(), now).await;
                return Err(e);
            }
        };

        if !self.hasher.verify(old_password, &user.password_hash, &user.salt) {
            self.audit_password_change_failed(Some(user.id), "Current password is incorrect", now)
                .await;
            return Err(AuthError::InvalidCredentials);
        }

        if let Err(e) = validate_password(new_password, self.config.min_password_len) {
            let e = AuthError::from(e);
            self.audit_password_change_failed(Some(user.id), &e.public_message(), now)
                .await;
            return Err(e);
        }

        let revoked = match self.sessions.revoke_all_except(user.id, token).await {
            Ok(revoked) => revoked,
            Err(e) => {
                self.audit_password_change_failed(Some(user.id), e.code(), now).await;
                return Err(e);
            }
        };

        let digest = self.hasher.hash(new_password, None);
        if let Err(e) = self.credentials.set_password(user.id, &digest, now).await {
            let e = AuthError::from(e);
            self.audit_password_change_failed(Some(user.id), e.code(), now).await;
            return Err(e);
        }

        self.audit
            .record(
                NewAuditRecord::new(Some(user.id), AuditAction::PasswordChanged)
                    .resource(USERS_RESOURCE)
                    .resource_id(user.id)
                    .details(format!("Password changed; {revoked} other session(s) revoked")),
                now,
            )
            .await;
        Ok(())
    }

    /// Resolve a token without an authorization check or audit record.
    pub async fn whoami(&self, token: &SessionToken, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let (_, user) = self.sessions.validate(token, now).await?;
        Ok(Principal::from(&user))
    }

    /// The caller's live sessions, newest first.
    pub async fn active_sessions(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AuthError> {
        let (_, user) = self.sessions.validate(token, now).await?;
        self.sessions.list_active_for_user(user.id, now).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, token, request), fields(username = %request.username), err)]
    pub async fn create_user(
        &self,
        token: &SessionToken,
        request: CreateUserRequest,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let actor = self
            .guard(token, Permission::new(Resource::Users, Action::Create), now)
            .await?;
        self.provision_user(Some(actor.id), request, now).await
    }

    /// Create an account without an authorization check (bootstrap and seeding).
    #[instrument(skip(self, request), fields(username = %request.username), err)]
    pub async fn provision_user(
        &self,
        actor: Option<UserId>,
        request: CreateUserRequest,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let new_user = NewUser::parse(
            &request.username,
            &request.email,
            &request.password,
            request.role,
            &request.full_name,
            self.config.min_password_len,
        )?;

        let digest = self.hasher.hash(&new_user.password, None);
        let user = User {
            id: UserId::new(),
            username: new_user.username,
            email: new_user.email,
            password_hash: digest.hash,
            salt: digest.salt,
            role: new_user.role,
            full_name: new_user.full_name,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login: None,
            failed_login_attempts: 0,
            locked_until: None,
        };

        let user = self.credentials.create_user(user).await?;

        self.audit
            .record(
                NewAuditRecord::new(actor, AuditAction::UserCreated)
                    .resource(USERS_RESOURCE)
                    .resource_id(user.id)
                    .details(format!("Created user '{}' with role '{}'", user.username, user.role)),
                now,
            )
            .await;
        tracing::info!(user_id = %user.id, role = %user.role, "user created");
        Ok(user)
    }

    #[instrument(skip(self, token), fields(target = %user_id), err)]
    pub async fn change_role(
        &self,
        token: &SessionToken,
        user_id: UserId,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let actor = self
            .guard(token, Permission::new(Resource::Users, Action::Update), now)
            .await?;
        if actor.id == user_id {
            return Err(AuthError::Validation("You cannot change your own role".to_string()));
        }

        let before = self.find_user(user_id).await?;
        let user = self.credentials.update_role(user_id, role, now).await?;

        self.audit
            .record(
                NewAuditRecord::new(Some(actor.id), AuditAction::RoleChanged)
                    .resource(USERS_RESOURCE)
                    .resource_id(user.id)
                    .details(format!(
                        "Changed role of '{}' from '{}' to '{}'",
                        user.username, before.role, user.role
                    )),
                now,
            )
            .await;
        Ok(user)
    }

    /// Edit an account's email and/or full name.
    #[instrument(skip(self, token, email, full_name), fields(target = %user_id), err)]
    pub async fn update_profile(
        &self,
        token: &SessionToken,
        user_id: UserId,
        email: Option<&str>,
        full_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let actor = self
            .guard(token, Permission::new(Resource::Users, Action::Update), now)
            .await?;
        let update = ProfileUpdate::parse(email, full_name)?;

        let user = self
            .credentials
            .update_profile(user_id, update.email.as_deref(), update.full_name.as_deref(), now)
            .await?;

        let mut changed = Vec::new();
        if update.email.is_some() {
            changed.push("email");
        }
        if update.full_name.is_some() {
            changed.push("full_name");
        }
        self.audit
            .record(
                NewAuditRecord::new(Some(actor.id), AuditAction::UserUpdated)
                    .resource(USERS_RESOURCE)
                    .resource_id(user.id)
                    .details(format!("Updated {} of '{}'", changed.join(", "), user.username)),
                now,
            )
            .await;
        Ok(user)
    }

    /// Activate or deactivate an account. Deactivation ends all of its sessions.
    #[instrument(skip(self, token), fields(target = %user_id), err)]
    pub async fn set_user_active(
        &self,
        token: &SessionToken,
        user_id: UserId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let actor = self
            .guard(token, Permission::new(Resource::Users, Action::Update), now)
            .await?;
        if actor.id == user_id && !active {
            return Err(AuthError::Validation(
                "You cannot deactivate your own account".to_string(),
            ));
        }

        let user = self.credentials.set_active(user_id, active, now).await?;
        let revoked = if active {
            0
        } else {
            self.sessions.revoke_all_for_user(user_id).await?
        };

        let state = if active { "activated" } else { "deactivated" };
        self.audit
            .record(
                NewAuditRecord::new(Some(actor.id), AuditAction::UserStatusChanged)
                    .resource(USERS_RESOURCE)
                    .resource_id(user.id)
                    .details(format!(
                        "User '{}' {state}; {revoked} session(s) revoked",
                        user.username
                    )),
                now,
            )
            .await;
        Ok(user)
    }

    #[instrument(skip(self, token), fields(target = %user_id), err)]
    pub async fn unlock_user(
        &self,
        token: &SessionToken,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let actor = self
            .guard(token, Permission::new(Resource::Users, Action::Update), now)
            .await?;
        let user = self.credentials.clear_lockout(user_id, now).await?;

        self.audit
            .record(
                NewAuditRecord::new(Some(actor.id), AuditAction::AccountUnlocked)
                    .resource(USERS_RESOURCE)
                    .resource_id(user.id)
                    .details(format!("Unlocked account '{}'", user.username)),
                now,
            )
            .await;
        Ok(user)
    }

    /// Replace the target's password with a random temporary one, clear any
    /// lock and end their sessions. Returns the temporary password.
    ///
    /// Sessions go first; the password and unlock are then one store write.
    #[instrument(skip(self, token), fields(target = %user_id), err)]
    pub async fn reset_password(
        &self,
        token: &SessionToken,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let actor = self
            .guard(token, Permission::new(Resource::Users, Action::Update), now)
            .await?;

        let revoked = self.sessions.revoke_all_for_user(user_id).await?;
        let temporary = generate_temporary_password();
        let digest = self.hasher.hash(&temporary, None);
        let user = self.credentials.reset_password(user_id, &digest, now).await?;

        self.audit
            .record(
                NewAuditRecord::new(Some(actor.id), AuditAction::PasswordReset)
                    .resource(USERS_RESOURCE)
                    .resource_id(user.id)
                    .details(format!(
                        "Password reset for user '{}'; {revoked} session(s) revoked",
                        user.username
                    )),
                now,
            )
            .await;
        Ok(temporary)
    }

    #[instrument(skip(self, token), err)]
    pub async fn list_users(&self, token: &SessionToken, now: DateTime<Utc>) -> Result<Vec<User>, AuthError> {
        let permission = Permission::new(Resource::Users, Action::View);
        let actor = self.guard(token, permission, now).await?;
        let users = self.credentials.list_users().await?;
        self.audit_granted(&actor, permission, now).await;
        Ok(users)
    }

    #[instrument(skip(self, token, filter), err)]
    pub async fn audit_log(
        &self,
        token: &SessionToken,
        filter: &AuditFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, AuthError> {
        let permission = Permission::new(Resource::AuditLog, Action::View);
        let actor = self.guard(token, permission, now).await?;
        let records = self.audit.query(filter).await?;
        self.audit_granted(&actor, permission, now).await;
        Ok(records)
    }

    /// RBAC table overview for admin tooling.
    pub async fn rbac_registry(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<RbacRegistry, AuthError> {
        self.guard(token, Permission::new(Resource::Users, Action::View), now)
            .await?;
        Ok(RbacRegistry::build())
    }

    pub async fn explain(
        &self,
        token: &SessionToken,
        role: Role,
        permission: Permission,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationExplanation, AuthError> {
        self.guard(token, Permission::new(Resource::Users, Action::View), now)
            .await?;
        Ok(explain_authorization(role, permission))
    }

    /// Log a business event on behalf of the session's user.
    ///
    /// Any authenticated role may record events; the acting user is always
    /// taken from the session, never from the entry. Security actions are
    /// reserved and rejected with `Validation`.
    #[instrument(skip(self, token, entry), fields(action = %entry.action.as_str()), err)]
    pub async fn record_event(
        &self,
        token: &SessionToken,
        mut entry: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let (_, user) = self.sessions.validate(token, now).await?;

        if !entry.action.is_caller_recordable() {
            let action = entry.action.as_str().to_string();
            tracing::warn!(user_id = %user.id, action = %action, "rejected reserved audit action");
            self.audit
                .record(
                    NewAuditRecord::new(Some(user.id), AuditAction::AccessDenied)
                        .resource(Resource::AuditLog.as_str())
                        .details(format!("Rejected attempt to record reserved action '{action}'")),
                    now,
                )
                .await;
            return Err(AuthError::Validation(format!(
                "'{action}' is reserved for security events"
            )));
        }

        entry.user_id = Some(user.id);
        self.audit.record(entry, now).await;
        Ok(())
    }

    /// Create the default administrator when no account exists yet.
    #[instrument(skip(self), err)]
    pub async fn bootstrap_admin(&self, now: DateTime<Utc>) -> Result<Option<User>, AuthError> {
        if self.credentials.count_users().await? > 0 {
            return Ok(None);
        }

        let request = CreateUserRequest {
            username: BOOTSTRAP_ADMIN_USERNAME.to_string(),
            email: BOOTSTRAP_ADMIN_EMAIL.to_string(),
            password: self.config.bootstrap_admin_password.clone(),
            role: Role::Admin,
            full_name: BOOTSTRAP_ADMIN_FULL_NAME.to_string(),
        };
        let user = self.provision_user(None, request, now).await?;
        tracing::warn!(username = %user.username, "created default admin account; change its password");
        Ok(Some(user))
    }

    pub async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        self.sessions.sweep_expired(now).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve the actor and require `permission`, auditing only denials.
    async fn guard(
        &self,
        token: &SessionToken,
        permission: Permission,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let resource = permission.resource.as_str();
        let requested = permission.to_string();

        let user = match self.sessions.validate(token, now).await {
            Ok((_, user)) => user,
            Err(e) => {
                let owner = self.session_owner(token).await;
                self.audit_denied(owner, None, resource, &requested, e.code(), now)
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = require(user.role, permission) {
            self.audit_denied(
                Some(user.id),
                Some(user.role),
                resource,
                &requested,
                "role lacks permission",
                now,
            )
            .await;
            return Err(e);
        }
        Ok(user)
    }

    /// Owner of the session row behind `token`, valid or not.
    async fn session_owner(&self, token: &SessionToken) -> Option<UserId> {
        match self.sessions.lookup(token).await {
            Ok(session) => session.map(|s| s.user_id),
            Err(e) => {
                tracing::warn!(error = %e, "session owner lookup failed");
                None
            }
        }
    }

    fn burn_decoy(&self, password: &str) {
        let _ = self.hasher.verify(password, &self.decoy.hash, &self.decoy.salt);
    }

    /// Count an attempt against a live lock (without extending it) and audit it.
    async fn reject_locked(
        &self,
        user_id: UserId,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> AuthError {
        let (user, outcome) = match self
            .credentials
            .record_login_failure(user_id, &self.config.lockout, now)
            .await
        {
            Ok(counted) => counted,
            Err(e) => return self.login_not_recorded(Some(user_id), e.into(), ip_address, now).await,
        };
        let until = match outcome {
            FailureOutcome::AlreadyLocked { until, .. } | FailureOutcome::LockedNow { until, .. } => until,
            FailureOutcome::Counted { .. } => user.locked_until.unwrap_or(now),
        };
        tracing::warn!(user_id = %user.id, %until, "login attempt against locked account");
        self.audit
            .record(
                NewAuditRecord::new(Some(user.id), AuditAction::LoginLocked)
                    .resource(AUTH_RESOURCE)
                    .details(format!(
                        "Login attempt while locked (attempt {})",
                        user.failed_login_attempts
                    ))
                    .ip_address(ip_address),
                now,
            )
            .await;
        AuthError::AccountLocked { until }
    }

    /// Audit a login that failed on a store write, then hand the error back.
    async fn login_not_recorded(
        &self,
        user_id: Option<UserId>,
        error: AuthError,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> AuthError {
        self.audit
            .record(
                NewAuditRecord::new(user_id, AuditAction::LoginFailed)
                    .resource(AUTH_RESOURCE)
                    .details(format!("Login could not be completed: {}", error.code()))
                    .ip_address(ip_address),
                now,
            )
            .await;
        error
    }

    async fn find_user(&self, user_id: UserId) -> Result<User, AuthError> {
        self.credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn audit_granted(&self, user: &User, permission: Permission, now: DateTime<Utc>) {
        self.audit
            .record(
                NewAuditRecord::new(Some(user.id), AuditAction::AccessGranted)
                    .resource(permission.resource.as_str())
                    .details(format!("Role '{}' granted '{permission}'", user.role)),
                now,
            )
            .await;
    }

    async fn audit_denied(
        &self,
        user_id: Option<UserId>,
        role: Option<Role>,
        resource: &str,
        requested: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        let details = match role {
            Some(role) => format!("Role '{role}' denied '{requested}': {reason}"),
            None => format!("Denied '{requested}': {reason}"),
        };
        tracing::info!(requested, reason, "access denied");
        self.audit
            .record(
                NewAuditRecord::new(user_id, AuditAction::AccessDenied)
                    .resource(resource)
                    .details(details),
                now,
            )
            .await;
    }

    async fn audit_password_change_failed(&self, user_id: Option<UserId>, reason: &str, now: DateTime<Utc>) {
        self.audit
            .record(
                NewAuditRecord::new(user_id, AuditAction::PasswordChangeFailed)
                    .resource(USERS_RESOURCE)
                    .details(reason.to_string()),
                now,
            )
            .await;
    }
}
