//! Ledger notifications and their persistence.

use chrono::{DateTime, Utc};
use fhe_oracle::types::RequestId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, Db};
use crate::models::{CaseId, DecryptedJudgeStats};

/// Capacity of the in-process event bus. Slow subscribers lose the oldest events.
pub const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    CaseSubmitted { case_id: CaseId, at: DateTime<Utc> },
    AnalysisRequested { case_id: CaseId, request_id: RequestId },
    AnalysisReissued { case_id: CaseId, previous: RequestId, request_id: RequestId },
    CaseAnalyzed { case_id: CaseId },
    JudgeStatsRequested { judge_id: String, request_id: RequestId },
    JudgeStatsDecrypted { stats: DecryptedJudgeStats },
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::CaseSubmitted { .. } => "case_submitted",
            LedgerEvent::AnalysisRequested { .. } => "analysis_requested",
            LedgerEvent::AnalysisReissued { .. } => "analysis_reissued",
            LedgerEvent::CaseAnalyzed { .. } => "case_analyzed",
            LedgerEvent::JudgeStatsRequested { .. } => "judge_stats_requested",
            LedgerEvent::JudgeStatsDecrypted { .. } => "judge_stats_decrypted",
        }
    }

    pub fn case_id(&self) -> Option<CaseId> {
        match self {
            LedgerEvent::CaseSubmitted { case_id, .. }
            | LedgerEvent::AnalysisRequested { case_id, .. }
            | LedgerEvent::AnalysisReissued { case_id, .. }
            | LedgerEvent::CaseAnalyzed { case_id } => Some(*case_id),
            LedgerEvent::JudgeStatsRequested { .. } | LedgerEvent::JudgeStatsDecrypted { .. } => None,
        }
    }

    pub fn judge_id(&self) -> Option<&str> {
        match self {
            LedgerEvent::JudgeStatsRequested { judge_id, .. } => Some(judge_id),
            LedgerEvent::JudgeStatsDecrypted { stats } => Some(&stats.judge_id),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            LedgerEvent::AnalysisRequested { request_id, .. }
            | LedgerEvent::AnalysisReissued { request_id, .. }
            | LedgerEvent::JudgeStatsRequested { request_id, .. } => Some(*request_id),
            LedgerEvent::JudgeStatsDecrypted { stats } => Some(stats.request_id),
            LedgerEvent::CaseSubmitted { .. } | LedgerEvent::CaseAnalyzed { .. } => None,
        }
    }
}

/// Background job: append every ledger event to the database under `run_id`; decrypted judge
/// counts also land in `judge_stats`.
pub fn spawn_event_recorder(db: Db, run_id: Uuid, mut events: broadcast::Receiver<LedgerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = record(&db, run_id, &event).await {
                        warn!(kind = event.kind(), error = %e, "failed to persist ledger event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event recorder lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("event bus closed; recorder exiting");
    })
}

async fn record(db: &Db, run_id: Uuid, event: &LedgerEvent) -> Result<(), crate::errors::ApiError> {
    db::insert_event(db, run_id, event).await?;
    if let LedgerEvent::JudgeStatsDecrypted { stats } = event {
        db::upsert_judge_stats(db, run_id, stats).await?;
    }
    Ok(())
}
