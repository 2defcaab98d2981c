use crate::config::Config;
use crate::db::Db;
use crate::errors::ApiError;
use crate::events::spawn_event_recorder;
use crate::ledger::{spawn_delivery_worker, SentencingLedger};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use fhe_oracle::fhe::LocalFhe;
use fhe_oracle::oracle::{Delivery, LocalOracle, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<Config>,
    pub ledger: Arc<SentencingLedger>,
    /// Reference coprocessor; stands in for client-side encryption on `/api/v1/ciphertexts`.
    pub fhe: Arc<LocalFhe>,
    pub oracle_key: VerifyingKey,
    /// Identifies this process's ledger. Cases and counters live in memory, so persisted rows
    /// are only meaningful next to the run that wrote them.
    pub run_id: Uuid,
}

impl AppState {
    /// Wire the ledger to the reference coprocessor and oracle. The returned receiver carries the
    /// oracle's deliveries; hand it to [`AppState::start_workers`].
    pub fn new(db: Db, config: Config, oracle_key: SigningKey) -> (Self, UnboundedReceiver<Delivery>) {
        let fhe = Arc::new(LocalFhe::new());
        let (oracle, deliveries) = LocalOracle::new(fhe.clone(), oracle_key);
        let verifier = Arc::new(oracle.verifier());
        let oracle_key = *verifier.key();

        let ledger = Arc::new(SentencingLedger::new(fhe.clone(), Arc::new(oracle), verifier));

        let state = Self {
            db,
            config: Arc::new(config),
            ledger,
            fhe,
            oracle_key,
            run_id: Uuid::new_v4(),
        };
        tracing::info!(run_id = %state.run_id, "ledger run started");
        (state, deliveries)
    }

    /// Start the delivery worker and the event recorder.
    pub fn start_workers(&self, deliveries: UnboundedReceiver<Delivery>) -> Vec<JoinHandle<()>> {
        let recorder = spawn_event_recorder(self.db.clone(), self.run_id, self.ledger.subscribe());
        let worker = spawn_delivery_worker(self.ledger.clone(), deliveries);
        vec![recorder, worker]
    }
}

/// Load the oracle signing key from `keys_dir`, generating and storing one on first start.
pub async fn load_or_create_oracle_key(keys_dir: PathBuf) -> Result<SigningKey, ApiError> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&keys_dir).map_err(|_| ApiError::Internal)?;
        let sk_path = keys_dir.join("oracle_sk.bin");

        if sk_path.exists() {
            let sk_bytes = std::fs::read(&sk_path).map_err(|_| ApiError::Internal)?;
            let sk_bytes = <[u8; 32]>::try_from(sk_bytes.as_slice()).map_err(|_| ApiError::Internal)?;
            return Ok(SigningKey::from_bytes(&sk_bytes));
        }

        // IMPORTANT: single-party key for development; a threshold oracle replaces this.
        let mut rng = OsRng;
        let key = SigningKey::generate(&mut rng);
        std::fs::write(&sk_path, key.to_bytes()).map_err(|_| ApiError::Internal)?;

        tracing::info!(path = %sk_path.display(), "generated oracle signing key");
        Ok::<SigningKey, ApiError>(key)
    })
    .await
    .map_err(|_| ApiError::Internal)?
}
