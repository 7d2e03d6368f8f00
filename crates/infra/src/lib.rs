//! Infrastructure layer: stores, session lifecycle, audit writer, config and
//! the `AuthService` entry points.

pub mod audit_logger;
pub mod auth_service;
pub mod config;
pub mod retry;
pub mod session_manager;
pub mod store;


pub use audit_logger::AuditLogger;
pub use auth_service::{AuthService, CreateUserRequest, LoginSuccess};
pub use config::{AppConfig, AuthConfig, ConfigError};
pub use retry::retry_transient;
pub use session_manager::SessionManager;
pub use store::{AuditStore, CredentialStore, SessionStore, StoreError};
