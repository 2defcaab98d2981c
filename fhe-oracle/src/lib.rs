//! Cryptographic collaborators of the sentencing ledger.
//!
//! This crate contains:
//! - Ciphertext handles and the cleartext codec oracles speak.
//! - The homomorphic capability interface plus an in-process reference coprocessor.
//! - The decryption oracle contract, its Ed25519 proof verifier, and an in-process reference oracle.

pub mod constants;
pub mod fhe;
pub mod oracle;
pub mod types;
