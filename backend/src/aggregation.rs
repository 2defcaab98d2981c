//! Per-judge homomorphic case counters.
//!
//! Each judge gets one encrypted counter, created at encrypted zero the first time an analyzed
//! case names that judge and bumped by encrypted one for every further analyzed case. Counters
//! are only ever decrypted on demand through the oracle.
//!
//! Pending decryptions are tracked by [`JudgeKey`] rather than the judge string, so the index
//! keeps both directions and resolving a delivery is a single map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::PoseidonSponge;
use ark_crypto_primitives::sponge::CryptographicSponge;
use ark_serialize::CanonicalSerialize;
use chrono::Utc;
use fhe_oracle::constants::{poseidon_config, JUDGE_KEY_DOMAIN};
use fhe_oracle::fhe::HomomorphicOps;
use fhe_oracle::oracle::{DecryptionOracle, ProofVerifier};
use fhe_oracle::types::{decode_cleartext, CiphertextHandle, Plaintext, RequestId};
use tracing::{debug, info, warn};

use crate::errors::{poisoned, LedgerError};
use crate::models::{DecryptedJudgeStats, JudgeAccumulator, JudgeKey, PendingTarget};
use crate::pending::PendingRequests;

/// Derive the reverse-lookup key for `judge_id`: Poseidon over a domain tag and the id bytes.
pub fn judge_key(judge_id: &str) -> Result<JudgeKey, LedgerError> {
    let mut sponge = PoseidonSponge::<Fr>::new(poseidon_config());
    sponge.absorb(&JUDGE_KEY_DOMAIN.to_vec());
    sponge.absorb(&judge_id.as_bytes().to_vec());
    let digest: Fr = sponge.squeeze_field_elements::<Fr>(1)[0];

    let mut bytes = Vec::with_capacity(32);
    digest
        .serialize_compressed(&mut bytes)
        .map_err(|e| LedgerError::Internal(format!("judge key serialization: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LedgerError::Internal("judge key is not 32 bytes".to_string()))?;
    Ok(JudgeKey(bytes))
}

/// Bidirectional judge id <-> key map plus first-seen order. Append-only.
#[derive(Debug, Default)]
pub struct JudgeIndex {
    by_key: HashMap<JudgeKey, String>,
    by_judge: HashMap<String, JudgeKey>,
    order: Vec<String>,
}

impl JudgeIndex {
    /// Returns false if the judge was already indexed.
    pub fn insert(&mut self, judge_id: &str, key: JudgeKey) -> bool {
        if self.by_judge.contains_key(judge_id) {
            return false;
        }
        self.by_key.insert(key, judge_id.to_string());
        self.by_judge.insert(judge_id.to_string(), key);
        self.order.push(judge_id.to_string());
        true
    }

    pub fn resolve(&self, key: &JudgeKey) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    pub fn key_of(&self, judge_id: &str) -> Option<JudgeKey> {
        self.by_judge.get(judge_id).copied()
    }

    pub fn judges(&self) -> &[String] {
        &self.order
    }
}

pub struct AggregationEngine {
    fhe: Arc<dyn HomomorphicOps>,
    oracle: Arc<dyn DecryptionOracle>,
    verifier: Arc<dyn ProofVerifier>,
    accumulators: RwLock<HashMap<String, Arc<Mutex<JudgeAccumulator>>>>,
    index: RwLock<JudgeIndex>,
    decrypted: RwLock<HashMap<String, DecryptedJudgeStats>>,
    /// Encrypted `1`, created on first use and shared by every increment.
    one: OnceLock<CiphertextHandle>,
    /// Counter handles handed to the oracle and not yet finalized; these must outlive their
    /// replacement until the delivery arrives.
    in_flight: Mutex<HashMap<RequestId, CiphertextHandle>>,
}

impl AggregationEngine {
    pub fn new(
        fhe: Arc<dyn HomomorphicOps>,
        oracle: Arc<dyn DecryptionOracle>,
        verifier: Arc<dyn ProofVerifier>,
    ) -> Self {
        Self {
            fhe,
            oracle,
            verifier,
            accumulators: RwLock::new(HashMap::new()),
            index: RwLock::new(JudgeIndex::default()),
            decrypted: RwLock::new(HashMap::new()),
            one: OnceLock::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Count one more analyzed case for `judge_id`, committing the case itself through `commit`.
    ///
    /// The new encrypted count is computed first; `commit` runs only once everything fallible on
    /// the aggregation side has succeeded, and the counter is swapped in only if `commit` succeeds.
    /// Either both the case and its judge counter move forward or neither does.
    pub fn on_case_analyzed<F>(&self, judge_id: &str, commit: F) -> Result<(), LedgerError>
    where
        F: FnOnce() -> Result<(), LedgerError>,
    {
        let one = self.one()?;

        let existing = self.accumulators.read().map_err(poisoned)?.get(judge_id).cloned();
        if let Some(existing) = existing {
            return self.bump(&existing, &one, commit);
        }

        let key = judge_key(judge_id)?;
        let mut accumulators = self.accumulators.write().map_err(poisoned)?;
        // Another finalize may have created it between the read and write locks.
        if let Some(existing) = accumulators.get(judge_id).cloned() {
            drop(accumulators);
            return self.bump(&existing, &one, commit);
        }
        let mut index = self.index.write().map_err(poisoned)?;

        let zero = self.fhe.trivial_encrypt(0)?;
        let first = self.fhe.add(&zero, &one);
        self.release(&zero);
        let first = first?;

        if let Err(e) = commit() {
            self.release(&first);
            return Err(e);
        }
        accumulators.insert(
            judge_id.to_string(),
            Arc::new(Mutex::new(JudgeAccumulator {
                judge_id: judge_id.to_string(),
                encrypted_count: first,
            })),
        );
        index.insert(judge_id, key);

        info!(judge_id, "judge accumulator created");
        Ok(())
    }

    fn bump<F>(&self, accumulator: &Mutex<JudgeAccumulator>, one: &CiphertextHandle, commit: F) -> Result<(), LedgerError>
    where
        F: FnOnce() -> Result<(), LedgerError>,
    {
        let mut acc = accumulator.lock().map_err(poisoned)?;
        let next = self.fhe.add(&acc.encrypted_count, one)?;

        if let Err(e) = commit() {
            self.release(&next);
            return Err(e);
        }
        let previous = std::mem::replace(&mut acc.encrypted_count, next);
        debug!(judge_id = %acc.judge_id, "judge accumulator incremented");
        drop(acc);

        if !self.is_in_flight(&previous) {
            self.release(&previous);
        }
        Ok(())
    }

    /// Ask the oracle to decrypt `judge_id`'s counter. The caller holds the pending-request lock
    /// so the delivery cannot overtake the insert below.
    pub fn request_stats_decryption(
        &self,
        pending: &mut PendingRequests,
        judge_id: &str,
    ) -> Result<RequestId, LedgerError> {
        let handle = self.accumulator_handle(judge_id)?;
        let key = self
            .index
            .read()
            .map_err(poisoned)?
            .key_of(judge_id)
            .ok_or_else(|| LedgerError::Internal(format!("judge {judge_id} has an accumulator but no index entry")))?;

        let mut in_flight = self.in_flight.lock().map_err(poisoned)?;
        let request_id = self.oracle.request_decryption(&[handle])?;
        pending.insert(request_id, PendingTarget::Judge(key))?;
        in_flight.insert(request_id, handle);
        drop(in_flight);

        info!(judge_id, %request_id, "judge stats decryption requested");
        Ok(request_id)
    }

    /// Accept the oracle's answer for a judge counter and store the decrypted count.
    pub fn finalize_stats(
        &self,
        pending: &mut PendingRequests,
        request_id: RequestId,
        cleartext: &[u8],
        proof: &[u8],
    ) -> Result<DecryptedJudgeStats, LedgerError> {
        let key = match pending.peek(&request_id)? {
            PendingTarget::Judge(key) => key,
            PendingTarget::Case(_) => return Err(LedgerError::InvalidRequest(request_id)),
        };
        let judge_id = self
            .index
            .read()
            .map_err(poisoned)?
            .resolve(&key)
            .map(str::to_string)
            .ok_or_else(|| LedgerError::NotFound(format!("judge for key {key:?}")))?;

        if let Err(e) = self.verifier.verify(&request_id, cleartext, proof) {
            warn!(%request_id, %judge_id, error = %e, "rejecting judge stats with invalid proof");
            return Err(LedgerError::ProofInvalid(request_id));
        }
        let case_count = decode_count(cleartext)?;

        let mut decrypted = self.decrypted.write().map_err(poisoned)?;
        let mut in_flight = self.in_flight.lock().map_err(poisoned)?;
        pending.consume(&request_id)?;
        let stats = DecryptedJudgeStats {
            judge_id: judge_id.clone(),
            case_count,
            request_id,
            decrypted_at: Utc::now(),
        };
        decrypted.insert(judge_id.clone(), stats.clone());
        drop(decrypted);

        // The counter may have moved on while this decryption was out; free the old handle once
        // nothing else is waiting on it.
        if let Some(handle) = in_flight.remove(&request_id) {
            let still_waited_on = in_flight.values().any(|h| *h == handle);
            drop(in_flight);
            if !still_waited_on && self.accumulator_handle(&judge_id).ok() != Some(handle) {
                self.release(&handle);
            }
        }

        info!(%judge_id, case_count, %request_id, "judge stats decrypted");
        Ok(stats)
    }

    pub fn accumulator(&self, judge_id: &str) -> Result<JudgeAccumulator, LedgerError> {
        let accumulator = self.existing(judge_id)?;
        let acc = accumulator.lock().map_err(poisoned)?;
        Ok(acc.clone())
    }

    pub fn accumulator_handle(&self, judge_id: &str) -> Result<CiphertextHandle, LedgerError> {
        Ok(self.accumulator(judge_id)?.encrypted_count)
    }

    /// Most recent decrypted count for `judge_id`, if one was ever revealed.
    pub fn decrypted_stats(&self, judge_id: &str) -> Result<Option<DecryptedJudgeStats>, LedgerError> {
        Ok(self.decrypted.read().map_err(poisoned)?.get(judge_id).cloned())
    }

    /// Judges in first-seen order.
    pub fn judges(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self.index.read().map_err(poisoned)?.judges().to_vec())
    }

    fn existing(&self, judge_id: &str) -> Result<Arc<Mutex<JudgeAccumulator>>, LedgerError> {
        self.accumulators
            .read()
            .map_err(poisoned)?
            .get(judge_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("accumulator for judge {judge_id}")))
    }

    fn one(&self) -> Result<CiphertextHandle, LedgerError> {
        if let Some(one) = self.one.get() {
            return Ok(*one);
        }
        let fresh = self.fhe.trivial_encrypt(1)?;
        if self.one.set(fresh).is_err() {
            self.release(&fresh);
        }
        self.one
            .get()
            .copied()
            .ok_or_else(|| LedgerError::Internal("encrypted one unavailable".to_string()))
    }

    fn is_in_flight(&self, handle: &CiphertextHandle) -> bool {
        match self.in_flight.lock() {
            Ok(in_flight) => in_flight.values().any(|h| h == handle),
            // Unknown: keep the handle rather than free one the oracle may still read.
            Err(_) => true,
        }
    }

    /// Drop a ciphertext nothing references any more. Failure only leaks the handle.
    fn release(&self, handle: &CiphertextHandle) {
        if let Err(e) = self.fhe.release(handle) {
            warn!(%handle, error = %e, "failed to release ciphertext");
        }
    }
}

fn decode_count(cleartext: &[u8]) -> Result<u64, LedgerError> {
    let values = decode_cleartext(cleartext).map_err(|e| LedgerError::DecodeError(format!("{e}")))?;
    match values.as_slice() {
        [Plaintext::Uint(count)] => Ok(*count),
        other => Err(LedgerError::DecodeError(format!(
            "expected a single uint count, got {} value(s)",
            other.len()
        ))),
    }
}
