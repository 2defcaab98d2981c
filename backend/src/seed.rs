use crate::errors::ApiError;
use crate::models::{CaseId, CourtId};
use crate::state::AppState;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::{info, warn};

/// Charges the synthetic docket draws from, with the inclusive sentence range (months) for each.
pub const SYNTHETIC_CHARGES: [(&str, u32, u32); 5] = [
    ("Theft", 3, 36),
    ("Fraud", 12, 96),
    ("Assault", 6, 72),
    ("Burglary", 12, 60),
    ("Drug Possession", 1, 24),
];

pub const SYNTHETIC_JUDGES: [&str; 5] = ["Judge_A", "Judge_B", "Judge_C", "Judge_D", "Judge_E"];

/// Court that owns seeded cases.
pub const SEED_COURT: &str = "synthetic-court";

/// Plaintext of one generated case, before encryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticCase {
    pub charge: &'static str,
    pub sentence_months: u32,
    pub judge_id: &'static str,
}

fn gen_case(rng: &mut ChaCha20Rng) -> SyntheticCase {
    let (charge, min, max) = SYNTHETIC_CHARGES[(rng.next_u32() as usize) % SYNTHETIC_CHARGES.len()];
    let sentence_months = min + rng.next_u32() % (max - min + 1);
    let judge_id = SYNTHETIC_JUDGES[(rng.next_u32() as usize) % SYNTHETIC_JUDGES.len()];

    SyntheticCase {
        charge,
        sentence_months,
        judge_id,
    }
}

/// Derive the docket RNG seed from a user-facing seed number.
fn docket_seed(seed: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[0..8].copy_from_slice(b"SENTENCE");
    out[8..16].copy_from_slice(&seed.to_le_bytes());
    out[16..].copy_from_slice(&[0x5a; 16]);
    out
}

/// Deterministic synthetic docket: the same `(seed, count)` always yields the same cases.
pub fn generate_cases(seed: u64, count: usize) -> Vec<SyntheticCase> {
    let mut rng = ChaCha20Rng::from_seed(docket_seed(seed));
    (0..count).map(|_| gen_case(&mut rng)).collect()
}

/// Encrypt, submit and request analysis for a synthetic docket.
///
/// Plaintext only ever reaches the coprocessor; the ledger sees handles.
pub fn seed_cases(state: &AppState, seed: u64, count: usize) -> Result<Vec<CaseId>, ApiError> {
    let court = CourtId::new(SEED_COURT);
    let mut ids = Vec::with_capacity(count);

    for case in generate_cases(seed, count) {
        let charge = state.fhe.encrypt_text(case.charge).map_err(|_| ApiError::Internal)?;
        let sentence = state
            .fhe
            .encrypt_uint(u64::from(case.sentence_months))
            .map_err(|_| ApiError::Internal)?;
        let judge = state.fhe.encrypt_text(case.judge_id).map_err(|_| ApiError::Internal)?;

        let case_id = state.ledger.submit(&court, charge, sentence, judge)?;
        state.ledger.request_analysis(&court, case_id)?;
        ids.push(case_id);
    }

    Ok(ids)
}

/// Background job wrapper around [`seed_cases`]. Encryption and submission are blocking work, so
/// they run on the blocking pool.
pub async fn seed_in_background(state: AppState, seed: u64, count: usize) -> Result<Vec<CaseId>, ApiError> {
    info!(seed, count, "seeding synthetic docket");
    let seeded = tokio::task::spawn_blocking(move || seed_cases(&state, seed, count))
        .await
        .map_err(|e| {
            warn!(seed, error = %e, "seeding task panicked");
            ApiError::Internal
        })?;

    match &seeded {
        Ok(ids) => info!(seed, submitted = ids.len(), "synthetic docket submitted"),
        Err(e) => warn!(seed, error = %e, "synthetic docket seeding failed"),
    }
    seeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use fhe_oracle::oracle::SigningKey;

    #[test]
    fn docket_is_reproducible_and_in_range() {
        let a = generate_cases(42, 200);
        assert_eq!(a, generate_cases(42, 200));
        assert_ne!(a, generate_cases(43, 200));

        for case in &a {
            let (_, min, max) = SYNTHETIC_CHARGES
                .iter()
                .find(|(c, _, _)| *c == case.charge)
                .copied()
                .unwrap();
            assert!((min..=max).contains(&case.sentence_months));
            assert!(SYNTHETIC_JUDGES.contains(&case.judge_id));
        }
    }

    #[tokio::test]
    async fn background_seeding_submits_the_whole_docket() {
        let db = db::connect("sqlite::memory:", 1).await.unwrap();
        let key = SigningKey::generate(&mut ChaCha20Rng::from_seed([4u8; 32]));
        let (state, _deliveries) = AppState::new(db, Config::default(), key);

        let ids = seed_in_background(state.clone(), 7, 20).await.unwrap();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
        assert_eq!(state.ledger.case_count().unwrap(), 20);
        assert_eq!(state.ledger.pending_count().unwrap(), 20);
    }
}
