use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

/// A gateway session created for a checkout whose order was never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedSession {
    pub session_id: String,
    pub user_id: Uuid,
    #[schema(value_type = String)]
    pub total_price: Decimal,
    pub currency: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Registry of orphaned sessions awaiting manual reconciliation.
#[derive(Debug, Default)]
pub struct OrphanedSessions {
    entries: DashMap<String, OrphanedSession>,
}

impl OrphanedSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, session: OrphanedSession) {
        warn!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            reason = %session.reason,
            "checkout session orphaned"
        );
        self.entries.insert(session.session_id.clone(), session);
    }

    /// Oldest first
    pub fn list(&self) -> Vec<OrphanedSession> {
        let mut sessions: Vec<_> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        sessions
    }

    pub fn resolve(&self, session_id: &str) -> Option<OrphanedSession> {
        self.entries.remove(session_id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
