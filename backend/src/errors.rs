use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use fhe_oracle::fhe::FheError;
use fhe_oracle::oracle::OracleError;
use fhe_oracle::types::RequestId;
use serde::Serialize;
use thiserror::Error;

use crate::models::CaseId;

/// Failures of ledger, aggregation and query operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("case {0} is already analyzed")]
    AlreadyAnalyzed(CaseId),

    #[error("case {case_id} already has analysis request {request_id} in flight")]
    AnalysisPending { case_id: CaseId, request_id: RequestId },

    #[error("case {0} has no analysis request in flight")]
    NotPending(CaseId),

    #[error("unknown or already consumed request {0}")]
    InvalidRequest(RequestId),

    #[error("decryption proof for request {0} failed verification")]
    ProofInvalid(RequestId),

    #[error("cleartext does not match the expected schema: {0}")]
    DecodeError(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("oracle request failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("homomorphic operation failed: {0}")]
    Fhe(#[from] FheError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub(crate) fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Internal("ledger lock poisoned".to_string())
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("internal error")]
    Internal,
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => ApiError::NotFound(err.to_string()),
            LedgerError::AlreadyAnalyzed(_) | LedgerError::AnalysisPending { .. } | LedgerError::NotPending(_) => {
                ApiError::Conflict(err.to_string())
            }
            LedgerError::InvalidRequest(_) => ApiError::Conflict(err.to_string()),
            LedgerError::ProofInvalid(_) | LedgerError::DecodeError(_) => ApiError::Unprocessable(err.to_string()),
            LedgerError::Unauthorized(_) => ApiError::Forbidden(err.to_string()),
            LedgerError::Oracle(OracleError::EmptyRequest | OracleError::MalformedHandle(_)) => {
                ApiError::BadRequest(err.to_string())
            }
            LedgerError::Oracle(_) | LedgerError::Fhe(_) | LedgerError::Internal(_) => {
                tracing::error!(error = %err, "ledger failure");
                ApiError::Internal
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        (status, Json(ErrorBody { error: msg })).into_response()
    }
}
