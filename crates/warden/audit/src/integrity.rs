//! Integrity verification for audit chains

use crate::event::AuditEvent;
use serde::Serialize;

/// Tracks the head of the hash chain and the next sequence number
#[derive(Debug, Clone, Default)]
pub struct IntegrityChain {
    last_hash: Option<String>,
    last_seq: u64,
}

impl IntegrityChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a chain from persisted state
    pub fn from_state(last_hash: Option<String>, last_seq: u64) -> Self {
        Self {
            last_hash,
            last_seq,
        }
    }

    /// Hash the next event must link to
    pub fn previous_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    /// Sequence number for the next event
    pub fn next_seq(&self) -> u64 {
        self.last_seq + 1
    }

    /// Advance the chain past `event`
    pub fn update(&mut self, event: &AuditEvent) {
        self.last_hash = Some(event.event_hash.clone());
        self.last_seq = event.seq;
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn head_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }
}

/// Verifies stored events against their hashes and links
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Verify a single event's hash
    pub fn verify_event(event: &AuditEvent) -> bool {
        event.compute_hash() == event.event_hash
    }

    /// Verify a contiguous run of events, oldest first
    pub fn verify_chain(events: &[AuditEvent]) -> ChainVerification {
        let mut result = ChainVerification {
            valid: true,
            total_events: events.len(),
            verified_events: 0,
            first_invalid_seq: None,
            error_message: None,
        };

        for (i, event) in events.iter().enumerate() {
            if !Self::verify_event(event) {
                result.fail(event.seq, format!("event {} has invalid hash", event.seq));
                return result;
            }

            if i > 0 {
                let prev = &events[i - 1];
                if event.seq != prev.seq + 1 {
                    result.fail(
                        event.seq,
                        format!(
                            "sequence gap: event {} follows event {}",
                            event.seq, prev.seq
                        ),
                    );
                    return result;
                }
                if event.previous_hash.as_deref() != Some(prev.event_hash.as_str()) {
                    result.fail(
                        event.seq,
                        format!(
                            "event {} has broken chain link (expected prev: {}, got: {:?})",
                            event.seq, prev.event_hash, event.previous_hash
                        ),
                    );
                    return result;
                }
            } else if event.seq == 1 && event.previous_hash.is_some() {
                result.fail(event.seq, "genesis event carries a previous hash".to_string());
                return result;
            }

            result.verified_events = i + 1;
        }

        result
    }
}

/// Result of chain verification
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_events: usize,
    pub verified_events: usize,
    pub first_invalid_seq: Option<u64>,
    pub error_message: Option<String>,
}

impl ChainVerification {
    fn fail(&mut self, seq: u64, message: String) {
        self.valid = false;
        self.first_invalid_seq = Some(seq);
        self.error_message = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AuditActor, AuditEventType};

    fn build_chain(len: usize) -> Vec<AuditEvent> {
        let mut chain = IntegrityChain::new();
        (0..len)
            .map(|i| {
                let event = AuditEvent::builder(AuditEventType::PlanSubmitted)
                    .actor(AuditActor::system("test"))
                    .field("index", i)
                    .build()
                    .unwrap()
                    .finalize(chain.next_seq(), chain.previous_hash());
                chain.update(&event);
                event
            })
            .collect()
    }

    #[test]
    fn test_integrity_chain() {
        let mut chain = IntegrityChain::new();
        assert!(chain.previous_hash().is_none());
        assert_eq!(chain.next_seq(), 1);

        let events = build_chain(2);
        chain.update(&events[0]);
        assert_eq!(chain.head_hash(), Some(events[0].event_hash.as_str()));
        chain.update(&events[1]);
        assert_eq!(chain.last_seq(), 2);
        assert_eq!(chain.next_seq(), 3);
    }

    #[test]
    fn test_verify_chain() {
        let events = build_chain(5);
        let result = IntegrityVerifier::verify_chain(&events);

        assert!(result.valid);
        assert_eq!(result.total_events, 5);
        assert_eq!(result.verified_events, 5);
    }

    #[test]
    fn test_detects_tampered_payload() {
        let mut events = build_chain(3);
        events[1].payload["index"] = serde_json::json!(42);

        let result = IntegrityVerifier::verify_chain(&events);
        assert!(!result.valid);
        assert_eq!(result.first_invalid_seq, Some(2));
        assert_eq!(result.verified_events, 1);
    }

    #[test]
    fn test_detects_removed_event() {
        let mut events = build_chain(4);
        events.remove(2);

        let result = IntegrityVerifier::verify_chain(&events);
        assert!(!result.valid);
        assert_eq!(result.first_invalid_seq, Some(4));
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let result = IntegrityVerifier::verify_chain(&[]);
        assert!(result.valid);
        assert_eq!(result.total_events, 0);
    }
}
