//! Best-effort audit writer.
//!
//! A failed append never fails the operation being audited; it is downgraded
//! to a warning so authentication stays available when the audit table is not.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use ctms_auth::{AuditFilter, AuditRecord, AuthError, NewAuditRecord};

use crate::store::AuditStore;

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append one record stamped at `at`.
    pub async fn record(&self, entry: NewAuditRecord, at: DateTime<Utc>) {
        let record = entry.into_record(at);
        let action = record.action.as_str().to_string();
        let user_id = record.user_id;

        if let Err(e) = self.store.append(record).await {
            tracing::warn!(
                action = %action,
                user_id = ?user_id,
                error = %e,
                "audit write failed; continuing without audit record"
            );
        }
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuthError> {
        self.store.query(filter).await.map_err(AuthError::from)
    }
}
