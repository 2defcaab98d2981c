//! Outstanding oracle requests.
//!
//! Every decryption request is recorded here under the id the oracle returned and removed
//! exactly once when its delivery is accepted. A removed id is indistinguishable from one that
//! never existed, so replays fail with [`LedgerError::InvalidRequest`].

use std::collections::HashMap;

use fhe_oracle::types::RequestId;

use crate::errors::LedgerError;
use crate::models::PendingTarget;

#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<RequestId, PendingTarget>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh request. The oracle owns id uniqueness; a collision means it broke that
    /// contract and is refused rather than overwriting a live entry.
    pub fn insert(&mut self, request_id: RequestId, target: PendingTarget) -> Result<(), LedgerError> {
        if self.entries.contains_key(&request_id) {
            return Err(LedgerError::Internal(format!("oracle reused request id {request_id}")));
        }
        self.entries.insert(request_id, target);
        Ok(())
    }

    pub fn peek(&self, request_id: &RequestId) -> Result<PendingTarget, LedgerError> {
        self.entries
            .get(request_id)
            .copied()
            .ok_or(LedgerError::InvalidRequest(*request_id))
    }

    pub fn consume(&mut self, request_id: &RequestId) -> Result<PendingTarget, LedgerError> {
        self.entries
            .remove(request_id)
            .ok_or(LedgerError::InvalidRequest(*request_id))
    }

    /// Drop a request nobody will wait for anymore (operator reissue).
    pub fn retire(&mut self, request_id: &RequestId) -> Option<PendingTarget> {
        self.entries.remove(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_consumed_exactly_once() {
        let mut pending = PendingRequests::new();
        let id = RequestId::new();
        pending.insert(id, PendingTarget::Case(1)).unwrap();

        assert_eq!(pending.peek(&id).unwrap(), PendingTarget::Case(1));
        assert_eq!(pending.consume(&id).unwrap(), PendingTarget::Case(1));
        assert!(matches!(pending.consume(&id), Err(LedgerError::InvalidRequest(r)) if r == id));
        assert!(matches!(pending.peek(&id), Err(LedgerError::InvalidRequest(_))));
        assert!(pending.is_empty());
    }

    #[test]
    fn duplicate_request_id_does_not_overwrite() {
        let mut pending = PendingRequests::new();
        let id = RequestId::new();
        pending.insert(id, PendingTarget::Case(1)).unwrap();

        assert!(matches!(pending.insert(id, PendingTarget::Case(2)), Err(LedgerError::Internal(_))));
        assert_eq!(pending.peek(&id).unwrap(), PendingTarget::Case(1));
    }

    #[test]
    fn retired_request_cannot_be_consumed() {
        let mut pending = PendingRequests::new();
        let id = RequestId::new();
        pending.insert(id, PendingTarget::Case(7)).unwrap();

        assert_eq!(pending.retire(&id), Some(PendingTarget::Case(7)));
        assert_eq!(pending.retire(&id), None);
        assert!(pending.consume(&id).is_err());
    }
}
