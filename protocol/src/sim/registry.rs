//! Shared bookkeeping of issued challenges.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::ledger::LedgerError;
use crate::verification::ChallengeResponse;

struct IssuedChallenge {
    expected_response: String,
    bound_to: Option<Uuid>,
}

/// Challenges issued by the verifier, bound to the first operation that
/// presents them.
///
/// Every step of that operation may present the same challenge again; any
/// other operation gets "already consumed".
#[derive(Default)]
pub struct ChallengeRegistry {
    issued: Mutex<HashMap<String, IssuedChallenge>>,
}

impl ChallengeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly issued challenge.
    pub fn issue(&self, challenge_id: impl Into<String>, expected_response: impl Into<String>) {
        self.issued.lock().insert(
            challenge_id.into(),
            IssuedChallenge {
                expected_response: expected_response.into(),
                bound_to: None,
            },
        );
    }

    /// Check `challenge` for `operation_id`, binding it on first use.
    pub fn consume(
        &self,
        operation_id: Uuid,
        challenge: &ChallengeResponse,
    ) -> Result<(), LedgerError> {
        if challenge.is_empty() {
            return Err(rejected("challenge response required"));
        }

        let mut issued = self.issued.lock();
        let Some(entry) = issued.get_mut(challenge.challenge_id()) else {
            return Err(rejected("unknown challenge"));
        };
        if entry.expected_response != challenge.response() {
            return Err(rejected("invalid challenge response"));
        }
        match entry.bound_to {
            Some(bound) if bound != operation_id => Err(rejected("challenge already consumed")),
            Some(_) => Ok(()),
            None => {
                entry.bound_to = Some(operation_id);
                Ok(())
            }
        }
    }

    /// Number of challenges issued so far.
    pub fn issued_count(&self) -> usize {
        self.issued.lock().len()
    }
}

fn rejected(reason: &str) -> LedgerError {
    LedgerError::Rejected {
        reason: reason.to_string(),
        revert_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_binds_to_first_operation() {
        let registry = ChallengeRegistry::new();
        registry.issue("c-1", "resp");
        let op_a = Uuid::new_v4();
        let op_b = Uuid::new_v4();

        let challenge = ChallengeResponse::new("c-1", "resp");
        assert!(registry.consume(op_a, &challenge).is_ok());
        // Second step of the same operation.
        assert!(registry.consume(op_a, &challenge).is_ok());
        // Replay under another operation.
        assert_eq!(
            registry.consume(op_b, &challenge),
            Err(rejected("challenge already consumed"))
        );
    }

    #[test]
    fn wrong_or_missing_challenges_rejected() {
        let registry = ChallengeRegistry::new();
        registry.issue("c-1", "resp");
        let op = Uuid::new_v4();

        assert!(registry.consume(op, &ChallengeResponse::none()).is_err());
        assert!(registry
            .consume(op, &ChallengeResponse::new("c-2", "resp"))
            .is_err());
        assert!(registry
            .consume(op, &ChallengeResponse::new("c-1", "nope"))
            .is_err());
        assert_eq!(registry.issued_count(), 1);
    }
}
