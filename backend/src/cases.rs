//! Case table and the one-shot analysis state machine.
//!
//! `Submitted -> AnalysisRequested -> Analyzed`, never backwards. Records live in an arena
//! indexed by `id - 1`; ids are handed out sequentially and never reused.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fhe_oracle::types::{CiphertextHandle, RequestId};

use crate::errors::LedgerError;
use crate::models::{CaseCleartext, CaseId, CaseRecord, CaseState, CourtId, DecryptedProjection};

#[derive(Debug, Default)]
pub struct CaseBook {
    records: Vec<CaseRecord>,
    projections: Vec<DecryptedProjection>,
    in_flight: HashMap<CaseId, RequestId>,
}

impl CaseBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(
        &mut self,
        court: &CourtId,
        encrypted_charge: CiphertextHandle,
        encrypted_sentence: CiphertextHandle,
        encrypted_judge_id: CiphertextHandle,
        submitted_at: DateTime<Utc>,
    ) -> CaseId {
        let id = self.records.len() as CaseId + 1;
        self.records.push(CaseRecord {
            id,
            encrypted_charge,
            encrypted_sentence,
            encrypted_judge_id,
            submitted_at,
            submitted_by: court.clone(),
            state: CaseState::Submitted,
        });
        self.projections.push(DecryptedProjection::default());
        id
    }

    pub fn record(&self, case_id: CaseId) -> Result<&CaseRecord, LedgerError> {
        slot(case_id)
            .and_then(|i| self.records.get(i))
            .ok_or_else(|| LedgerError::NotFound(format!("case {case_id}")))
    }

    pub fn projection(&self, case_id: CaseId) -> Result<&DecryptedProjection, LedgerError> {
        slot(case_id)
            .and_then(|i| self.projections.get(i))
            .ok_or_else(|| LedgerError::NotFound(format!("case {case_id}")))
    }

    pub fn projections(&self) -> &[DecryptedProjection] {
        &self.projections
    }

    pub fn in_flight(&self, case_id: CaseId) -> Option<RequestId> {
        self.in_flight.get(&case_id).copied()
    }

    /// Checks that `caller` may open an analysis request for `case_id` right now.
    pub fn ensure_requestable(&self, caller: &CourtId, case_id: CaseId) -> Result<&CaseRecord, LedgerError> {
        let record = self.record(case_id)?;
        ensure_submitter(record, caller)?;
        match record.state {
            CaseState::Analyzed => Err(LedgerError::AlreadyAnalyzed(case_id)),
            CaseState::AnalysisRequested => Err(LedgerError::AnalysisPending {
                case_id,
                request_id: self
                    .in_flight(case_id)
                    .ok_or_else(|| LedgerError::Internal(format!("case {case_id} requested without a request id")))?,
            }),
            CaseState::Submitted => Ok(record),
        }
    }

    /// Checks that `caller` may replace the in-flight request of `case_id`; returns it.
    pub fn ensure_reissuable(&self, caller: &CourtId, case_id: CaseId) -> Result<(&CaseRecord, RequestId), LedgerError> {
        let record = self.record(case_id)?;
        ensure_submitter(record, caller)?;
        match record.state {
            CaseState::Analyzed => Err(LedgerError::AlreadyAnalyzed(case_id)),
            CaseState::Submitted => Err(LedgerError::NotPending(case_id)),
            CaseState::AnalysisRequested => {
                let previous = self.in_flight(case_id).ok_or(LedgerError::NotPending(case_id))?;
                Ok((record, previous))
            }
        }
    }

    pub fn ensure_not_analyzed(&self, case_id: CaseId) -> Result<(), LedgerError> {
        if self.projection(case_id)?.analyzed {
            return Err(LedgerError::AlreadyAnalyzed(case_id));
        }
        Ok(())
    }

    /// `Submitted | AnalysisRequested -> AnalysisRequested`, remembering the live request.
    pub fn mark_requested(&mut self, case_id: CaseId, request_id: RequestId) -> Result<(), LedgerError> {
        let record = self.record_mut(case_id)?;
        if record.state == CaseState::Analyzed {
            return Err(LedgerError::AlreadyAnalyzed(case_id));
        }
        record.state = CaseState::AnalysisRequested;
        self.in_flight.insert(case_id, request_id);
        Ok(())
    }

    /// `AnalysisRequested -> Analyzed`, writing the projection.
    pub fn mark_analyzed(&mut self, case_id: CaseId, cleartext: &CaseCleartext) -> Result<(), LedgerError> {
        let record = self.record_mut(case_id)?;
        match record.state {
            CaseState::Analyzed => return Err(LedgerError::AlreadyAnalyzed(case_id)),
            CaseState::Submitted => return Err(LedgerError::NotPending(case_id)),
            CaseState::AnalysisRequested => record.state = CaseState::Analyzed,
        }
        self.in_flight.remove(&case_id);

        let projection = self.projection_mut(case_id)?;
        projection.charge = cleartext.charge.clone();
        projection.sentence_months = cleartext.sentence_months;
        projection.judge_id = cleartext.judge_id.clone();
        projection.analyzed = true;
        Ok(())
    }

    pub fn case_count(&self) -> usize {
        self.records.len()
    }

    pub fn analyzed_count(&self) -> usize {
        self.records.iter().filter(|r| r.state == CaseState::Analyzed).count()
    }

    fn record_mut(&mut self, case_id: CaseId) -> Result<&mut CaseRecord, LedgerError> {
        slot(case_id)
            .and_then(|i| self.records.get_mut(i))
            .ok_or_else(|| LedgerError::NotFound(format!("case {case_id}")))
    }

    fn projection_mut(&mut self, case_id: CaseId) -> Result<&mut DecryptedProjection, LedgerError> {
        slot(case_id)
            .and_then(|i| self.projections.get_mut(i))
            .ok_or_else(|| LedgerError::NotFound(format!("case {case_id}")))
    }
}

fn slot(case_id: CaseId) -> Option<usize> {
    case_id.checked_sub(1).and_then(|i| usize::try_from(i).ok())
}

fn ensure_submitter(record: &CaseRecord, caller: &CourtId) -> Result<(), LedgerError> {
    if &record.submitted_by != caller {
        return Err(LedgerError::Unauthorized(format!(
            "court {caller} did not submit case {}",
            record.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn court() -> CourtId {
        CourtId::new("district-7")
    }

    fn book_with_case() -> (CaseBook, CaseId) {
        let mut book = CaseBook::new();
        let id = book.submit(
            &court(),
            CiphertextHandle::random(),
            CiphertextHandle::random(),
            CiphertextHandle::random(),
            Utc::now(),
        );
        (book, id)
    }

    fn cleartext() -> CaseCleartext {
        CaseCleartext {
            charge: "Theft".into(),
            sentence_months: 12,
            judge_id: "Judge_A".into(),
        }
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let (mut book, first) = book_with_case();
        let second = book.submit(
            &court(),
            CiphertextHandle::random(),
            CiphertextHandle::random(),
            CiphertextHandle::random(),
            Utc::now(),
        );
        assert_eq!((first, second), (1, 2));
        assert_eq!(book.case_count(), 2);
        assert!(matches!(book.record(0), Err(LedgerError::NotFound(_))));
        assert!(matches!(book.record(3), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn fresh_case_has_empty_projection() {
        let (book, id) = book_with_case();
        assert_eq!(book.record(id).unwrap().state, CaseState::Submitted);
        assert_eq!(book.projection(id).unwrap(), &DecryptedProjection::default());
    }

    #[test]
    fn state_machine_moves_forward_only() {
        let (mut book, id) = book_with_case();
        assert!(matches!(book.mark_analyzed(id, &cleartext()), Err(LedgerError::NotPending(_))));

        let request = RequestId::new();
        book.ensure_requestable(&court(), id).unwrap();
        book.mark_requested(id, request).unwrap();
        assert!(matches!(
            book.ensure_requestable(&court(), id),
            Err(LedgerError::AnalysisPending { request_id, .. }) if request_id == request
        ));

        book.mark_analyzed(id, &cleartext()).unwrap();
        let projection = book.projection(id).unwrap();
        assert!(projection.analyzed);
        assert_eq!(projection.sentence_months, 12);
        assert_eq!(book.record(id).unwrap().state, CaseState::Analyzed);
        assert_eq!(book.in_flight(id), None);

        assert!(matches!(book.ensure_requestable(&court(), id), Err(LedgerError::AlreadyAnalyzed(_))));
        assert!(matches!(book.mark_requested(id, RequestId::new()), Err(LedgerError::AlreadyAnalyzed(_))));
        assert!(matches!(book.mark_analyzed(id, &cleartext()), Err(LedgerError::AlreadyAnalyzed(_))));
        assert_eq!(book.analyzed_count(), 1);
    }

    #[test]
    fn only_submitting_court_may_request() {
        let (book, id) = book_with_case();
        let other = CourtId::new("district-9");
        assert!(matches!(book.ensure_requestable(&other, id), Err(LedgerError::Unauthorized(_))));
        assert!(matches!(book.ensure_reissuable(&other, id), Err(LedgerError::Unauthorized(_))));
    }

    #[test]
    fn reissue_requires_a_request_in_flight() {
        let (mut book, id) = book_with_case();
        assert!(matches!(book.ensure_reissuable(&court(), id), Err(LedgerError::NotPending(_))));

        let request = RequestId::new();
        book.mark_requested(id, request).unwrap();
        let (_, previous) = book.ensure_reissuable(&court(), id).unwrap();
        assert_eq!(previous, request);
    }
}
