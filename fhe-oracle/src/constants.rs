//! Crate-wide constants shared by the handle vault, the oracle signer and ledger hosts.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{find_poseidon_ark_and_mds, PoseidonConfig};
use ark_ff::PrimeField;
use std::sync::OnceLock;

/// Byte length of a serialized ciphertext handle.
pub const HANDLE_LEN: usize = 32;

/// Domain separator prefixed to every message the oracle signs.
pub const PROOF_DOMAIN: &[u8] = b"sentencing-ledger/decryption-proof/v1";

/// Domain separator for judge reverse-lookup keys.
pub const JUDGE_KEY_DOMAIN: &[u8] = b"sentencing-ledger/judge-key/v1";

// Poseidon sponge configuration.
//
// Width-3 sponge (rate=2, capacity=1) with the usual round counts for that width. Used for judge
// key derivation.
pub const POSEIDON_RATE: usize = 2;
pub const POSEIDON_CAPACITY: usize = 1;

pub const POSEIDON_FULL_ROUNDS: usize = 8;
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;

/// Poseidon S-box exponent (alpha).
pub const POSEIDON_ALPHA: u64 = 5;

static POSEIDON_CONFIG: OnceLock<PoseidonConfig<Fr>> = OnceLock::new();

/// Poseidon parameters for BN254::Fr, derived once per process.
///
/// Every ledger host must agree on these constants, so they are derived rather than configured.
pub fn poseidon_config() -> &'static PoseidonConfig<Fr> {
    POSEIDON_CONFIG.get_or_init(derive_poseidon_config)
}

fn derive_poseidon_config() -> PoseidonConfig<Fr> {
    let prime_bits = Fr::MODULUS_BIT_SIZE as u64;

    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        prime_bits,
        POSEIDON_RATE,
        POSEIDON_FULL_ROUNDS as u64,
        POSEIDON_PARTIAL_ROUNDS as u64,
        0,
    );

    PoseidonConfig::new(
        POSEIDON_FULL_ROUNDS,
        POSEIDON_PARTIAL_ROUNDS,
        POSEIDON_ALPHA,
        mds,
        ark,
        POSEIDON_RATE,
        POSEIDON_CAPACITY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_derived_once() {
        let a = poseidon_config();
        let b = poseidon_config();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.full_rounds, POSEIDON_FULL_ROUNDS);
        assert_eq!(a.partial_rounds, POSEIDON_PARTIAL_ROUNDS);
        assert_eq!(a.rate, POSEIDON_RATE);
    }
}
