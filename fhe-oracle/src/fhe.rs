//! Homomorphic capability interface and the in-process reference coprocessor.
//!
//! Ledgers never see plaintext: they hold [`CiphertextHandle`]s and combine them through
//! [`HomomorphicOps`]. A production deployment plugs a real FHE coprocessor in behind the trait.
//! [`LocalFhe`] keeps the values in a process-local vault so the protocol can run end-to-end in
//! development and tests. Only the [`crate::oracle::LocalOracle`] reads the vault back.

use crate::types::{CiphertextHandle, Plaintext};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FheError {
    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(CiphertextHandle),

    #[error("operand type mismatch: {0}")]
    TypeMismatch(String),

    #[error("homomorphic addition overflowed")]
    Overflow,

    #[error("ciphertext vault unavailable")]
    VaultUnavailable,
}

/// Operations an FHE backend must offer on encrypted values.
pub trait HomomorphicOps: Send + Sync {
    /// Encrypt a public constant (e.g. the zero an accumulator starts from).
    fn trivial_encrypt(&self, value: u64) -> Result<CiphertextHandle, FheError>;

    /// Encrypted `lhs + rhs`.
    fn add(&self, lhs: &CiphertextHandle, rhs: &CiphertextHandle) -> Result<CiphertextHandle, FheError>;

    /// Encrypted `1` if both operands hold the same value, encrypted `0` otherwise.
    fn equals(&self, lhs: &CiphertextHandle, rhs: &CiphertextHandle) -> Result<CiphertextHandle, FheError>;

    /// Drop a ciphertext the caller no longer references. Releasing an unknown handle fails with
    /// `UnknownHandle`.
    fn release(&self, handle: &CiphertextHandle) -> Result<(), FheError>;
}

/// Reference coprocessor backed by an in-memory vault.
#[derive(Debug, Default)]
pub struct LocalFhe {
    vault: Mutex<HashMap<CiphertextHandle, Plaintext>>,
}

impl LocalFhe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client-side encryption stand-in: store `value` and hand back a fresh handle.
    pub fn encrypt(&self, value: Plaintext) -> Result<CiphertextHandle, FheError> {
        let mut vault = self.vault()?;
        let mut handle = CiphertextHandle::random();
        while vault.contains_key(&handle) {
            handle = CiphertextHandle::random();
        }
        vault.insert(handle, value);
        Ok(handle)
    }

    pub fn encrypt_text(&self, value: impl Into<String>) -> Result<CiphertextHandle, FheError> {
        self.encrypt(Plaintext::Text(value.into()))
    }

    pub fn encrypt_uint(&self, value: u64) -> Result<CiphertextHandle, FheError> {
        self.encrypt(Plaintext::Uint(value))
    }

    pub fn len(&self) -> Result<usize, FheError> {
        Ok(self.vault()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, FheError> {
        Ok(self.vault()?.is_empty())
    }

    pub(crate) fn reveal(&self, handle: &CiphertextHandle) -> Result<Plaintext, FheError> {
        self.vault()?
            .get(handle)
            .cloned()
            .ok_or(FheError::UnknownHandle(*handle))
    }

    fn vault(&self) -> Result<MutexGuard<'_, HashMap<CiphertextHandle, Plaintext>>, FheError> {
        self.vault.lock().map_err(|_| FheError::VaultUnavailable)
    }

    fn uint_operands(&self, lhs: &CiphertextHandle, rhs: &CiphertextHandle) -> Result<(u64, u64), FheError> {
        let a = self.reveal(lhs)?;
        let b = self.reveal(rhs)?;
        match (a.as_uint(), b.as_uint()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(FheError::TypeMismatch("add expects two unsigned operands".to_string())),
        }
    }
}

impl HomomorphicOps for LocalFhe {
    fn trivial_encrypt(&self, value: u64) -> Result<CiphertextHandle, FheError> {
        self.encrypt_uint(value)
    }

    fn add(&self, lhs: &CiphertextHandle, rhs: &CiphertextHandle) -> Result<CiphertextHandle, FheError> {
        let (a, b) = self.uint_operands(lhs, rhs)?;
        let sum = a.checked_add(b).ok_or(FheError::Overflow)?;
        self.encrypt_uint(sum)
    }

    fn equals(&self, lhs: &CiphertextHandle, rhs: &CiphertextHandle) -> Result<CiphertextHandle, FheError> {
        let a = self.reveal(lhs)?;
        let b = self.reveal(rhs)?;
        let same = match (&a, &b) {
            (Plaintext::Uint(x), Plaintext::Uint(y)) => x == y,
            (Plaintext::Text(x), Plaintext::Text(y)) => x == y,
            _ => return Err(FheError::TypeMismatch("equals expects operands of one type".to_string())),
        };
        self.encrypt_uint(u64::from(same))
    }

    fn release(&self, handle: &CiphertextHandle) -> Result<(), FheError> {
        self.vault()?
            .remove(handle)
            .map(|_| ())
            .ok_or(FheError::UnknownHandle(*handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_produces_a_new_handle_with_the_sum() {
        let fhe = LocalFhe::new();
        let a = fhe.encrypt_uint(2).unwrap();
        let b = fhe.encrypt_uint(40).unwrap();

        let sum = fhe.add(&a, &b).unwrap();
        assert_ne!(sum, a);
        assert_ne!(sum, b);
        assert_eq!(fhe.reveal(&sum).unwrap(), Plaintext::Uint(42));
        assert_eq!(fhe.reveal(&a).unwrap(), Plaintext::Uint(2));
    }

    #[test]
    fn equals_compares_text_and_rejects_mixed_types() {
        let fhe = LocalFhe::new();
        let a = fhe.encrypt_text("Judge_A").unwrap();
        let b = fhe.encrypt_text("Judge_A").unwrap();
        let c = fhe.encrypt_text("Judge_B").unwrap();
        let n = fhe.encrypt_uint(1).unwrap();

        let ab = fhe.equals(&a, &b).unwrap();
        let ac = fhe.equals(&a, &c).unwrap();
        assert_eq!(fhe.reveal(&ab).unwrap(), Plaintext::Uint(1));
        assert_eq!(fhe.reveal(&ac).unwrap(), Plaintext::Uint(0));
        assert!(matches!(fhe.equals(&a, &n), Err(FheError::TypeMismatch(_))));
    }

    #[test]
    fn unknown_handles_and_text_addition_fail() {
        let fhe = LocalFhe::new();
        let known = fhe.encrypt_uint(1).unwrap();
        let text = fhe.encrypt_text("Theft").unwrap();
        let stranger = CiphertextHandle::random();

        assert!(matches!(fhe.add(&known, &stranger), Err(FheError::UnknownHandle(h)) if h == stranger));
        assert!(matches!(fhe.add(&known, &text), Err(FheError::TypeMismatch(_))));
    }

    #[test]
    fn released_handles_leave_the_vault() {
        let fhe = LocalFhe::new();
        let a = fhe.encrypt_uint(7).unwrap();
        let b = fhe.encrypt_uint(8).unwrap();
        assert_eq!(fhe.len().unwrap(), 2);

        fhe.release(&a).unwrap();
        assert_eq!(fhe.len().unwrap(), 1);
        assert!(matches!(fhe.reveal(&a), Err(FheError::UnknownHandle(_))));
        assert!(matches!(fhe.release(&a), Err(FheError::UnknownHandle(_))));
        assert_eq!(fhe.reveal(&b).unwrap(), Plaintext::Uint(8));
    }

    #[test]
    fn addition_overflow_is_reported() {
        let fhe = LocalFhe::new();
        let max = fhe.trivial_encrypt(u64::MAX).unwrap();
        let one = fhe.trivial_encrypt(1).unwrap();
        assert!(matches!(fhe.add(&max, &one), Err(FheError::Overflow)));
    }
}
