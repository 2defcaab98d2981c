use chrono::{DateTime, Utc};
use fhe_oracle::types::{decode_cleartext, CiphertextHandle, Plaintext, RequestId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::LedgerError;

/// Sequential case identifier, starting at 1.
pub type CaseId = u64;

/// Identity of a submitting court. Only the court that submitted a case may request its analysis.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourtId(String);

impl CourtId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CourtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Submitted,
    AnalysisRequested,
    Analyzed,
}

/// Encrypted case as held by the ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: CaseId,
    pub encrypted_charge: CiphertextHandle,
    pub encrypted_sentence: CiphertextHandle,
    pub encrypted_judge_id: CiphertextHandle,
    pub submitted_at: DateTime<Utc>,
    pub submitted_by: CourtId,
    pub state: CaseState,
}

impl CaseRecord {
    /// Handles in the order the oracle decrypts them: charge, sentence, judge.
    pub fn handles(&self) -> [CiphertextHandle; 3] {
        [self.encrypted_charge, self.encrypted_sentence, self.encrypted_judge_id]
    }
}

/// Plaintext view of a case. Empty until the case is analyzed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedProjection {
    pub charge: String,
    pub sentence_months: u32,
    pub judge_id: String,
    pub analyzed: bool,
}

/// Cleartext of one case analysis, decoded from the oracle's payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseCleartext {
    pub charge: String,
    pub sentence_months: u32,
    pub judge_id: String,
}

impl CaseCleartext {
    /// Expects exactly `[text, uint, text]`.
    pub fn decode(bytes: &[u8]) -> Result<Self, LedgerError> {
        let values = decode_cleartext(bytes).map_err(|e| LedgerError::DecodeError(format!("{e}")))?;
        match values.as_slice() {
            [Plaintext::Text(charge), Plaintext::Uint(months), Plaintext::Text(judge_id)] => {
                let sentence_months = u32::try_from(*months)
                    .map_err(|_| LedgerError::DecodeError(format!("sentence of {months} months out of range")))?;
                Ok(Self {
                    charge: charge.clone(),
                    sentence_months,
                    judge_id: judge_id.clone(),
                })
            }
            other => Err(LedgerError::DecodeError(format!(
                "expected [text, uint, text], got {} value(s)",
                other.len()
            ))),
        }
    }
}

/// Reverse-lookup key for a judge; what pending aggregate requests are tracked by.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JudgeKey(pub [u8; 32]);

impl fmt::Debug for JudgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JudgeKey({})", hex::encode(self.0))
    }
}

/// What an outstanding oracle request will resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingTarget {
    Case(CaseId),
    Judge(JudgeKey),
}

/// Homomorphic running count of analyzed cases for one judge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeAccumulator {
    pub judge_id: String,
    pub encrypted_count: CiphertextHandle,
}

/// Decrypted accumulator value as of the request that revealed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedJudgeStats {
    pub judge_id: String,
    pub case_count: u64,
    pub request_id: RequestId,
    pub decrypted_at: DateTime<Utc>,
}

/// Sentence statistics for one charge. `min`/`max` are `None` when no analyzed case matches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeStats {
    pub charge: String,
    pub avg: u64,
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub count: u64,
}

impl ChargeStats {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeDisparity {
    pub judge_id: String,
    pub avg_sentence: u64,
}

// ---------------------------------------------------------------------------------------------
// HTTP request/response bodies
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptInputsRequest {
    pub values: Vec<Plaintext>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptInputsResponse {
    pub handles: Vec<CiphertextHandle>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitCaseRequest {
    pub encrypted_charge: CiphertextHandle,
    pub encrypted_sentence: CiphertextHandle,
    pub encrypted_judge_id: CiphertextHandle,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitCaseResponse {
    pub case_id: CaseId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseGetResponse {
    pub case_id: CaseId,
    pub state: CaseState,
    #[serde(flatten)]
    pub projection: DecryptedProjection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecryptionRequestedResponse {
    pub request_id: RequestId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccumulatorResponse {
    pub judge_id: String,
    pub encrypted_count: CiphertextHandle,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisparitiesRequest {
    pub charge: String,
    pub judge_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisparitiesResponse {
    pub charge: String,
    pub disparities: Vec<JudgeDisparity>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OracleCallbackRequest {
    pub request_id: RequestId,
    pub cleartext_b64: String,
    pub proof_b64: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OracleCallbackResponse {
    CaseAnalyzed { case_id: CaseId },
    JudgeStats { stats: DecryptedJudgeStats },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OracleKeyResponse {
    pub curve: String,
    pub scheme: String,
    pub vk_hex: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventListResponse {
    pub run_id: Uuid,
    pub offset: u64,
    pub limit: u64,
    pub events: Vec<StoredEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredEvent {
    pub seq: u64,
    pub kind: String,
    pub case_id: Option<CaseId>,
    pub judge_id: Option<String>,
    pub request_id: Option<String>,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeedRequest {
    /// Number of synthetic cases to submit and analyze.
    pub count: Option<u64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeedResponse {
    pub accepted: u64,
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhe_oracle::types::encode_cleartext;

    #[test]
    fn case_cleartext_decodes_expected_shape() {
        let bytes = encode_cleartext(&[
            Plaintext::Text("Theft".into()),
            Plaintext::Uint(24),
            Plaintext::Text("Judge_A".into()),
        ])
        .unwrap();
        let decoded = CaseCleartext::decode(&bytes).unwrap();
        assert_eq!(decoded.charge, "Theft");
        assert_eq!(decoded.sentence_months, 24);
        assert_eq!(decoded.judge_id, "Judge_A");
    }

    #[test]
    fn case_cleartext_rejects_wrong_shapes() {
        let swapped = encode_cleartext(&[
            Plaintext::Uint(24),
            Plaintext::Text("Theft".into()),
            Plaintext::Text("Judge_A".into()),
        ])
        .unwrap();
        let short = encode_cleartext(&[Plaintext::Uint(3)]).unwrap();
        let huge = encode_cleartext(&[
            Plaintext::Text("Theft".into()),
            Plaintext::Uint(u64::from(u32::MAX) + 1),
            Plaintext::Text("Judge_A".into()),
        ])
        .unwrap();

        for bytes in [swapped, short, huge, b"{".to_vec()] {
            assert!(matches!(CaseCleartext::decode(&bytes), Err(LedgerError::DecodeError(_))));
        }
    }
}
