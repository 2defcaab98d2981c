use crate::db;
use crate::errors::ApiError;
use crate::ledger::DeliveryOutcome;
use crate::models::*;
use crate::seed::seed_in_background;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use fhe_oracle::oracle::Delivery;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Header naming the calling court on court-scoped routes.
pub const COURT_HEADER: &str = "X-COURT-ID";

const MAX_SEED_CASES: u64 = 10_000;

#[derive(Debug, serde::Deserialize)]
pub struct ListEventsParams {
    pub run_id: Option<Uuid>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

/// Selects an earlier run's persisted rows; absent means the live ledger.
#[derive(Debug, serde::Deserialize)]
pub struct RunParams {
    pub run_id: Option<Uuid>,
}

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/v1/ciphertexts", post(encrypt_inputs))
        .route("/api/v1/cases", post(submit_case))
        .route("/api/v1/cases/:id/analysis", post(request_analysis))
        .route("/api/v1/cases/:id/analysis/reissue", post(reissue_analysis))
        .route("/api/v1/judges/:judge_id/stats", post(request_judge_stats))
        .route("/api/v1/demo/seed", post(seed_demo))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/cases/:id", get(get_case))
        .route("/api/v1/judges/:judge_id/accumulator", get(get_accumulator))
        .route("/api/v1/judges/:judge_id/stats", get(get_judge_stats))
        .route("/api/v1/stats/charges/:charge", get(stats_by_charge))
        .route("/api/v1/stats/disparities", post(disparities))
        .route("/api/v1/oracle/callback", post(oracle_callback))
        .route("/api/v1/oracle/key", get(get_oracle_key))
        .route("/api/v1/events", get(list_events))
        .merge(protected_routes)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(provided_key) = headers.get("X-API-KEY") {
        if provided_key == state.config.api_key.as_str() {
            return Ok(next.run(request).await);
        }
    }

    tracing::warn!("unauthorized access attempt");
    Err(ApiError::Unauthorized)
}

fn court_from(headers: &HeaderMap) -> Result<CourtId, ApiError> {
    let value = headers
        .get(COURT_HEADER)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {COURT_HEADER} header")))?;
    let court = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("invalid {COURT_HEADER} header")))?
        .trim();
    if court.is_empty() {
        return Err(ApiError::BadRequest(format!("empty {COURT_HEADER} header")));
    }
    Ok(CourtId::new(court))
}

async fn encrypt_inputs(
    State(state): State<AppState>,
    Json(req): Json<EncryptInputsRequest>,
) -> Result<Json<EncryptInputsResponse>, ApiError> {
    if req.values.is_empty() {
        return Err(ApiError::BadRequest("values must not be empty".to_string()));
    }

    let handles = req
        .values
        .into_iter()
        .map(|v| state.fhe.encrypt(v))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ApiError::Internal)?;

    Ok(Json(EncryptInputsResponse { handles }))
}

async fn submit_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubmitCaseRequest>,
) -> Result<Json<SubmitCaseResponse>, ApiError> {
    let court = court_from(&headers)?;
    let case_id = state.ledger.submit(
        &court,
        req.encrypted_charge,
        req.encrypted_sentence,
        req.encrypted_judge_id,
    )?;
    Ok(Json(SubmitCaseResponse { case_id }))
}

async fn get_case(State(state): State<AppState>, Path(id): Path<CaseId>) -> Result<Json<CaseGetResponse>, ApiError> {
    let state_now = state.ledger.case_state(id)?;
    let projection = state.ledger.get_case(id)?;
    Ok(Json(CaseGetResponse {
        case_id: id,
        state: state_now,
        projection,
    }))
}

async fn request_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<CaseId>,
) -> Result<Json<DecryptionRequestedResponse>, ApiError> {
    let court = court_from(&headers)?;
    let request_id = state.ledger.request_analysis(&court, id)?;
    Ok(Json(DecryptionRequestedResponse { request_id }))
}

async fn reissue_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<CaseId>,
) -> Result<Json<DecryptionRequestedResponse>, ApiError> {
    let court = court_from(&headers)?;
    let request_id = state.ledger.reissue_analysis(&court, id)?;
    Ok(Json(DecryptionRequestedResponse { request_id }))
}

async fn get_accumulator(
    State(state): State<AppState>,
    Path(judge_id): Path<String>,
) -> Result<Json<AccumulatorResponse>, ApiError> {
    let encrypted_count = state.ledger.get_judge_accumulator_handle(&judge_id)?;
    Ok(Json(AccumulatorResponse {
        judge_id,
        encrypted_count,
    }))
}

async fn request_judge_stats(
    State(state): State<AppState>,
    Path(judge_id): Path<String>,
) -> Result<Json<DecryptionRequestedResponse>, ApiError> {
    let request_id = state.ledger.request_judge_stats_decryption(&judge_id)?;
    Ok(Json(DecryptionRequestedResponse { request_id }))
}

async fn get_judge_stats(
    State(state): State<AppState>,
    Path(judge_id): Path<String>,
    Query(params): Query<RunParams>,
) -> Result<Json<DecryptedJudgeStats>, ApiError> {
    match params.run_id {
        Some(run_id) if run_id != state.run_id => {
            let Some(stats) = db::get_judge_stats(&state.db, run_id, &judge_id).await? else {
                return Err(ApiError::NotFound(format!("no decrypted stats for judge {judge_id} in run {run_id}")));
            };
            Ok(Json(stats))
        }
        _ => Ok(Json(state.ledger.judge_stats(&judge_id)?)),
    }
}

async fn stats_by_charge(
    State(state): State<AppState>,
    Path(charge): Path<String>,
) -> Result<Json<ChargeStats>, ApiError> {
    Ok(Json(state.ledger.stats_by_charge(&charge)?))
}

async fn disparities(
    State(state): State<AppState>,
    Json(req): Json<DisparitiesRequest>,
) -> Result<Json<DisparitiesResponse>, ApiError> {
    let disparities = state.ledger.disparities_by_judge(&req.charge, &req.judge_ids)?;
    Ok(Json(DisparitiesResponse {
        charge: req.charge,
        disparities,
    }))
}

/// Delivery endpoint for an out-of-process oracle. Unauthenticated: the proof is the credential.
async fn oracle_callback(
    State(state): State<AppState>,
    Json(req): Json<OracleCallbackRequest>,
) -> Result<Json<OracleCallbackResponse>, ApiError> {
    let b64 = base64::engine::general_purpose::STANDARD;

    let cleartext = b64
        .decode(req.cleartext_b64)
        .map_err(|_| ApiError::BadRequest("invalid cleartext_b64".to_string()))?;
    let proof = b64
        .decode(req.proof_b64)
        .map_err(|_| ApiError::BadRequest("invalid proof_b64".to_string()))?;

    let outcome = state.ledger.handle_delivery(Delivery {
        request_id: req.request_id,
        cleartext,
        proof,
    })?;

    Ok(Json(match outcome {
        DeliveryOutcome::CaseAnalyzed(case_id) => OracleCallbackResponse::CaseAnalyzed { case_id },
        DeliveryOutcome::JudgeStats(stats) => OracleCallbackResponse::JudgeStats { stats },
    }))
}

async fn get_oracle_key(State(state): State<AppState>) -> Result<Json<OracleKeyResponse>, ApiError> {
    Ok(Json(OracleKeyResponse {
        curve: "curve25519".to_string(),
        scheme: "ed25519".to_string(),
        vk_hex: hex::encode(state.oracle_key.to_bytes()),
    }))
}

async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsParams>,
) -> Result<Json<EventListResponse>, ApiError> {
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(50).min(500);
    let run_id = params.run_id.unwrap_or(state.run_id);

    let events = db::list_events(&state.db, run_id, offset, limit).await?;
    Ok(Json(EventListResponse {
        run_id,
        offset,
        limit,
        events,
    }))
}

async fn seed_demo(State(state): State<AppState>, Json(req): Json<SeedRequest>) -> Result<Json<SeedResponse>, ApiError> {
    let count = req.count.unwrap_or(100);
    if count == 0 || count > MAX_SEED_CASES {
        return Err(ApiError::BadRequest(format!("count must be within 1..={MAX_SEED_CASES}")));
    }
    let seed = req.seed.unwrap_or(0);

    tokio::spawn(seed_in_background(state, seed, count as usize));

    Ok(Json(SeedResponse { accepted: count, seed }))
}
