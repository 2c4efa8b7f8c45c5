//! Audit query support

use crate::error::{AuditError, Result};
use crate::event::{AuditEvent, AuditEventType};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default page size
pub const DEFAULT_LIMIT: usize = 100;

/// Largest page a caller may request
pub const MAX_LIMIT: usize = 1000;

/// Query for audit events.
///
/// Results are always ordered by ascending `seq`. Pagination is cursor based:
/// the cursor is the `seq` of the last event the caller has already seen.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Filter by event type
    pub event_type: Option<AuditEventType>,

    /// Filter by actor ID
    pub actor_id: Option<String>,

    /// Filter by intent or plan id
    pub subject: Option<String>,

    /// Filter by time range start (inclusive)
    pub from: Option<DateTime<Utc>>,

    /// Filter by time range end (exclusive)
    pub to: Option<DateTime<Utc>>,

    /// Only return events with `seq` greater than this
    pub cursor: Option<u64>,

    /// Maximum number of results
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Create a new query builder
    pub fn builder() -> AuditQueryBuilder {
        AuditQueryBuilder::default()
    }

    /// Reject out-of-range pagination
    pub fn validate(&self) -> Result<()> {
        match self.limit {
            Some(limit) if limit == 0 || limit > MAX_LIMIT => Err(AuditError::InvalidQuery(
                format!("limit must be between 1 and {}", MAX_LIMIT),
            )),
            _ => Ok(()),
        }
    }

    /// Check if an event matches the filters (pagination aside)
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(ref event_type) = self.event_type {
            if &event.event_type != event_type {
                return false;
            }
        }

        if let Some(ref actor_id) = self.actor_id {
            if &event.actor.id != actor_id {
                return false;
            }
        }

        if let Some(ref subject) = self.subject {
            if event.subject.as_ref() != Some(subject) {
                return false;
            }
        }

        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }

        if let Some(to) = self.to {
            if event.timestamp >= to {
                return false;
            }
        }

        true
    }

    /// Apply the query to events already ordered by `seq`
    pub fn apply(&self, events: &[AuditEvent]) -> AuditPage {
        let cursor = self.cursor.unwrap_or(0);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

        // seq starts at 1 and is contiguous, so the cursor doubles as an index
        let start = (cursor as usize).min(events.len());
        let mut matching = events[start..]
            .iter()
            .filter(|e| e.seq > cursor && self.matches(e));

        let page: Vec<AuditEvent> = matching.by_ref().take(limit).cloned().collect();
        let has_more = matching.next().is_some();

        let next_cursor = if has_more {
            page.last().map(|e| e.seq)
        } else {
            None
        };

        AuditPage {
            events: page,
            next_cursor,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub events: Vec<AuditEvent>,
    /// Cursor for the next page, if more matching events exist
    pub next_cursor: Option<u64>,
}

/// Builder for audit queries
#[derive(Debug, Default)]
pub struct AuditQueryBuilder {
    query: AuditQuery,
}

impl AuditQueryBuilder {
    /// Filter by event type
    pub fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.query.event_type = Some(event_type);
        self
    }

    /// Filter by actor ID
    pub fn actor_id(mut self, id: impl Into<String>) -> Self {
        self.query.actor_id = Some(id.into());
        self
    }

    /// Filter by subject
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.query.subject = Some(subject.into());
        self
    }

    /// Filter by time range start
    pub fn from(mut self, time: DateTime<Utc>) -> Self {
        self.query.from = Some(time);
        self
    }

    /// Filter by time range end
    pub fn to(mut self, time: DateTime<Utc>) -> Self {
        self.query.to = Some(time);
        self
    }

    /// Resume after `seq`
    pub fn cursor(mut self, seq: u64) -> Self {
        self.query.cursor = Some(seq);
        self
    }

    /// Set limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Build the query
    pub fn build(self) -> AuditQuery {
        self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditActor;
    use crate::integrity::IntegrityChain;

    fn events(types: &[(AuditEventType, &str)]) -> Vec<AuditEvent> {
        let mut chain = IntegrityChain::new();
        types
            .iter()
            .map(|(event_type, actor)| {
                let event = AuditEvent::builder(event_type.clone())
                    .actor(AuditActor::system(*actor))
                    .subject(format!("plan-{}", chain.next_seq() % 2))
                    .build()
                    .unwrap()
                    .finalize(chain.next_seq(), chain.previous_hash());
                chain.update(&event);
                event
            })
            .collect()
    }

    #[test]
    fn test_query_by_type() {
        let all = events(&[
            (AuditEventType::IntentReceived, "gateway"),
            (AuditEventType::PlanApproved, "alice"),
            (AuditEventType::IntentReceived, "gateway"),
        ]);

        let query = AuditQuery::builder()
            .event_type(AuditEventType::IntentReceived)
            .build();

        let page = query.apply(&all);
        assert_eq!(page.events.len(), 2);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_query_by_actor_and_subject() {
        let all = events(&[
            (AuditEventType::PlanApproved, "alice"),
            (AuditEventType::PlanApproved, "bob"),
            (AuditEventType::PlanResumed, "alice"),
        ]);

        let by_actor = AuditQuery::builder().actor_id("alice").build();
        assert_eq!(by_actor.apply(&all).events.len(), 2);

        let by_subject = AuditQuery::builder().subject("plan-1").build();
        let page = by_subject.apply(&all);
        assert_eq!(page.events.len(), 2);
        assert!(page.events.iter().all(|e| e.seq % 2 == 1));
    }

    #[test]
    fn test_cursor_pagination() {
        let all = events(&vec![(AuditEventType::PlanSubmitted, "composer"); 10]);

        let first = AuditQuery::builder().limit(4).build().apply(&all);
        assert_eq!(
            first.events.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(first.next_cursor, Some(4));

        let second = AuditQuery::builder()
            .cursor(4)
            .limit(4)
            .build()
            .apply(&all);
        assert_eq!(second.events[0].seq, 5);
        assert_eq!(second.next_cursor, Some(8));

        let last = AuditQuery::builder()
            .cursor(8)
            .limit(4)
            .build()
            .apply(&all);
        assert_eq!(last.events.len(), 2);
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn test_cursor_past_end() {
        let all = events(&[(AuditEventType::HaltEngaged, "ops")]);
        let page = AuditQuery::builder().cursor(50).build().apply(&all);
        assert!(page.events.is_empty());
    }

    #[test]
    fn test_limit_validation() {
        assert!(AuditQuery::builder().limit(0).build().validate().is_err());
        assert!(AuditQuery::builder().limit(1001).build().validate().is_err());
        assert!(AuditQuery::builder().limit(1000).build().validate().is_ok());
        assert!(AuditQuery::default().validate().is_ok());
    }
}
