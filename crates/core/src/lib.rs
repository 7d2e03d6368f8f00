//! `ctms-core`: shared building blocks for the CTMS auth workspace.
//!
//! Identifiers and the input-validation error live here so that every other
//! crate agrees on them without depending on storage or transport.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{AuditRecordId, SessionId, UserId};
