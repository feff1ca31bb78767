use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::semantic::MatchResult;

/// Context of one analysis request, as handed to `record_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEvent {
    pub client_address: Option<String>,
    pub user_agent: Option<String>,
    pub latency_ms: u64,
    pub top_match_id: u64,
    pub top_match_score: f32,
}

impl AnalysisEvent {
    /// Build an event from a ranking. Returns `None` when nothing matched.
    pub fn from_matches(
        client_address: Option<String>,
        user_agent: Option<String>,
        latency_ms: u64,
        matches: &[MatchResult],
    ) -> Option<Self> {
        let top = matches.first()?;
        Some(Self {
            client_address,
            user_agent,
            latency_ms,
            top_match_id: top.entity.id,
            top_match_score: top.similarity,
        })
    }
}

/// A persisted audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub client_address: Option<String>,
    pub user_agent: Option<String>,
    pub latency_ms: u64,
    pub top_match_id: u64,
    pub top_match_score: f32,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_event(event: AnalysisEvent) -> Self {
        Self {
            id: rusty_ulid::generate_ulid_string(),
            client_address: event.client_address,
            user_agent: event.user_agent,
            latency_ms: event.latency_ms,
            top_match_id: event.top_match_id,
            top_match_score: event.top_match_score,
            created_at: Utc::now(),
        }
    }
}
