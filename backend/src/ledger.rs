//! The encrypted case ledger and its oracle protocol.
//!
//! `request_*` and `finalize*` are separate entry points: a request records what is pending and
//! returns at once, the matching finalize arrives whenever the oracle delivers. Lock order is
//! always `pending`, then `cases`, then the aggregation locks. A case finalize advances its judge
//! counter inside the same critical section, so the two commit together.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use fhe_oracle::fhe::HomomorphicOps;
use fhe_oracle::oracle::{DecryptionOracle, Delivery, ProofVerifier};
use fhe_oracle::types::{CiphertextHandle, RequestId};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregation::AggregationEngine;
use crate::cases::CaseBook;
use crate::errors::{poisoned, LedgerError};
use crate::events::{LedgerEvent, EVENT_BUS_CAPACITY};
use crate::models::{
    CaseCleartext, CaseId, CaseState, ChargeStats, CourtId, DecryptedJudgeStats, DecryptedProjection,
    JudgeAccumulator, JudgeDisparity, PendingTarget,
};
use crate::pending::PendingRequests;
use crate::query::QueryEngine;

/// What a delivery resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    CaseAnalyzed(CaseId),
    JudgeStats(DecryptedJudgeStats),
}

pub struct SentencingLedger {
    oracle: Arc<dyn DecryptionOracle>,
    verifier: Arc<dyn ProofVerifier>,
    pending: Mutex<PendingRequests>,
    cases: Mutex<CaseBook>,
    aggregation: AggregationEngine,
    events: broadcast::Sender<LedgerEvent>,
}

impl SentencingLedger {
    pub fn new(
        fhe: Arc<dyn HomomorphicOps>,
        oracle: Arc<dyn DecryptionOracle>,
        verifier: Arc<dyn ProofVerifier>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            aggregation: AggregationEngine::new(fhe, oracle.clone(), verifier.clone()),
            oracle,
            verifier,
            pending: Mutex::new(PendingRequests::new()),
            cases: Mutex::new(CaseBook::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub fn submit(
        &self,
        caller: &CourtId,
        encrypted_charge: CiphertextHandle,
        encrypted_sentence: CiphertextHandle,
        encrypted_judge_id: CiphertextHandle,
    ) -> Result<CaseId, LedgerError> {
        let at = Utc::now();
        let case_id = self
            .cases()?
            .submit(caller, encrypted_charge, encrypted_sentence, encrypted_judge_id, at);

        info!(case_id, court = %caller, "case submitted");
        self.emit(LedgerEvent::CaseSubmitted { case_id, at });
        Ok(case_id)
    }

    /// Send the case's three handles to the oracle.
    ///
    /// A second request while one is in flight is refused with `AnalysisPending`; a lost
    /// delivery is recovered with [`Self::reissue_analysis`].
    pub fn request_analysis(&self, caller: &CourtId, case_id: CaseId) -> Result<RequestId, LedgerError> {
        let mut pending = self.pending()?;
        let mut cases = self.cases()?;

        let handles = cases.ensure_requestable(caller, case_id)?.handles();
        let request_id = self.oracle.request_decryption(&handles)?;
        pending.insert(request_id, PendingTarget::Case(case_id))?;
        cases.mark_requested(case_id, request_id)?;
        drop(cases);
        drop(pending);

        info!(case_id, %request_id, "analysis requested");
        self.emit(LedgerEvent::AnalysisRequested { case_id, request_id });
        Ok(request_id)
    }

    /// Operator recovery for a delivery that never arrived: retire the in-flight request and
    /// issue a fresh one. The case stays `AnalysisRequested`.
    pub fn reissue_analysis(&self, caller: &CourtId, case_id: CaseId) -> Result<RequestId, LedgerError> {
        let mut pending = self.pending()?;
        let mut cases = self.cases()?;

        let (record, previous) = cases.ensure_reissuable(caller, case_id)?;
        let handles = record.handles();
        let request_id = self.oracle.request_decryption(&handles)?;
        pending.insert(request_id, PendingTarget::Case(case_id))?;
        pending.retire(&previous);
        cases.mark_requested(case_id, request_id)?;
        drop(cases);
        drop(pending);

        warn!(case_id, %previous, %request_id, "analysis request reissued");
        self.emit(LedgerEvent::AnalysisReissued { case_id, previous, request_id });
        Ok(request_id)
    }

    /// Oracle callback for a case analysis. Fail-closed: nothing is written unless the proof
    /// verifies, the cleartext decodes and the judge counter can be advanced.
    pub fn finalize(&self, request_id: RequestId, cleartext: &[u8], proof: &[u8]) -> Result<CaseId, LedgerError> {
        let case_id = {
            let mut pending = self.pending()?;
            let case_id = match pending.peek(&request_id)? {
                PendingTarget::Case(case_id) => case_id,
                PendingTarget::Judge(_) => return Err(LedgerError::InvalidRequest(request_id)),
            };
            let mut cases = self.cases()?;
            cases.ensure_not_analyzed(case_id)?;

            if let Err(e) = self.verifier.verify(&request_id, cleartext, proof) {
                warn!(case_id, %request_id, error = %e, "rejecting analysis with invalid proof");
                return Err(LedgerError::ProofInvalid(request_id));
            }
            let decoded = CaseCleartext::decode(cleartext).inspect_err(|e| {
                warn!(case_id, %request_id, error = %e, "rejecting undecodable analysis");
            })?;

            self.aggregation
                .on_case_analyzed(&decoded.judge_id, || {
                    cases.mark_analyzed(case_id, &decoded)?;
                    pending.consume(&request_id).map(|_| ())
                })
                .inspect_err(|e| {
                    warn!(case_id, %request_id, error = %e, "analysis left uncommitted");
                })?;
            case_id
        };

        info!(case_id, %request_id, "case analyzed");
        self.emit(LedgerEvent::CaseAnalyzed { case_id });
        Ok(case_id)
    }

    /// Plaintext projection of a case. Unanalyzed cases yield the empty projection.
    pub fn get_case(&self, case_id: CaseId) -> Result<DecryptedProjection, LedgerError> {
        Ok(self.cases()?.projection(case_id)?.clone())
    }

    pub fn case_state(&self, case_id: CaseId) -> Result<CaseState, LedgerError> {
        Ok(self.cases()?.record(case_id)?.state)
    }

    pub fn case_count(&self) -> Result<usize, LedgerError> {
        Ok(self.cases()?.case_count())
    }

    pub fn analyzed_count(&self) -> Result<usize, LedgerError> {
        Ok(self.cases()?.analyzed_count())
    }

    pub fn pending_count(&self) -> Result<usize, LedgerError> {
        Ok(self.pending()?.len())
    }

    pub fn get_judge_accumulator_handle(&self, judge_id: &str) -> Result<CiphertextHandle, LedgerError> {
        self.aggregation.accumulator_handle(judge_id)
    }

    pub fn judge_accumulator(&self, judge_id: &str) -> Result<JudgeAccumulator, LedgerError> {
        self.aggregation.accumulator(judge_id)
    }

    pub fn request_judge_stats_decryption(&self, judge_id: &str) -> Result<RequestId, LedgerError> {
        let mut pending = self.pending()?;
        let request_id = self.aggregation.request_stats_decryption(&mut pending, judge_id)?;
        drop(pending);

        self.emit(LedgerEvent::JudgeStatsRequested {
            judge_id: judge_id.to_string(),
            request_id,
        });
        Ok(request_id)
    }

    pub fn finalize_stats(
        &self,
        request_id: RequestId,
        cleartext: &[u8],
        proof: &[u8],
    ) -> Result<DecryptedJudgeStats, LedgerError> {
        let stats = {
            let mut pending = self.pending()?;
            self.aggregation.finalize_stats(&mut pending, request_id, cleartext, proof)?
        };
        self.emit(LedgerEvent::JudgeStatsDecrypted { stats: stats.clone() });
        Ok(stats)
    }

    /// Latest revealed count for `judge_id`.
    pub fn judge_stats(&self, judge_id: &str) -> Result<DecryptedJudgeStats, LedgerError> {
        self.aggregation
            .decrypted_stats(judge_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("decrypted stats for judge {judge_id}")))
    }

    pub fn judges(&self) -> Result<Vec<String>, LedgerError> {
        self.aggregation.judges()
    }

    pub fn stats_by_charge(&self, charge: &str) -> Result<ChargeStats, LedgerError> {
        let cases = self.cases()?;
        Ok(QueryEngine::new(cases.projections()).stats_by_charge(charge))
    }

    pub fn disparities_by_judge(&self, charge: &str, judge_ids: &[String]) -> Result<Vec<JudgeDisparity>, LedgerError> {
        let cases = self.cases()?;
        Ok(QueryEngine::new(cases.projections()).disparities_by_judge(charge, judge_ids))
    }

    /// Route a delivery to the finalize matching its pending target.
    pub fn handle_delivery(&self, delivery: Delivery) -> Result<DeliveryOutcome, LedgerError> {
        let target = self.pending()?.peek(&delivery.request_id)?;
        match target {
            PendingTarget::Case(_) => self
                .finalize(delivery.request_id, &delivery.cleartext, &delivery.proof)
                .map(DeliveryOutcome::CaseAnalyzed),
            PendingTarget::Judge(_) => self
                .finalize_stats(delivery.request_id, &delivery.cleartext, &delivery.proof)
                .map(DeliveryOutcome::JudgeStats),
        }
    }

    fn pending(&self) -> Result<MutexGuard<'_, PendingRequests>, LedgerError> {
        self.pending.lock().map_err(poisoned)
    }

    fn cases(&self) -> Result<MutexGuard<'_, CaseBook>, LedgerError> {
        self.cases.lock().map_err(poisoned)
    }

    fn emit(&self, event: LedgerEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}

/// Background job: feed oracle deliveries into the ledger as they arrive.
pub fn spawn_delivery_worker(
    ledger: Arc<SentencingLedger>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delivery) = deliveries.recv().await {
            let request_id = delivery.request_id;
            match ledger.handle_delivery(delivery) {
                Ok(outcome) => debug!(%request_id, ?outcome, "delivery accepted"),
                Err(e) => warn!(%request_id, error = %e, "delivery rejected"),
            }
        }
        info!("oracle delivery channel closed; worker exiting");
    })
}
