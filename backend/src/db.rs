use crate::errors::ApiError;
use crate::events::LedgerEvent;
use crate::models::{DecryptedJudgeStats, StoredEvent};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use uuid::Uuid;

pub type Db = Pool<Sqlite>;

pub async fn connect(db_url: &str, max_connections: u32) -> Result<Db, ApiError> {
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .map_err(|_| ApiError::Internal)
}

pub async fn init_schema(db: &Db) -> Result<(), ApiError> {
    // Case contents never reach this database: only the event log and revealed aggregates.
    // Every row is scoped to the run that wrote it; the ledger itself does not survive restarts.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS ledger_events (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id TEXT NOT NULL,
  kind TEXT NOT NULL,
  case_id INTEGER,
  judge_id TEXT,
  request_id TEXT,
  payload_json TEXT NOT NULL,
  recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ledger_events_run ON ledger_events (run_id, seq);

CREATE TABLE IF NOT EXISTS judge_stats (
  run_id TEXT NOT NULL,
  judge_id TEXT NOT NULL,
  case_count INTEGER NOT NULL,
  request_id TEXT NOT NULL,
  decrypted_at TEXT NOT NULL,
  PRIMARY KEY (run_id, judge_id)
);
"#,
    )
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

pub async fn insert_event(db: &Db, run_id: Uuid, event: &LedgerEvent) -> Result<(), ApiError> {
    let payload_json = serde_json::to_string(event).map_err(|_| ApiError::Internal)?;

    sqlx::query(
        r#"INSERT INTO ledger_events (run_id, kind, case_id, judge_id, request_id, payload_json, recorded_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(run_id.to_string())
    .bind(event.kind())
    .bind(event.case_id().map(|id| id as i64))
    .bind(event.judge_id())
    .bind(event.request_id().map(|id| id.to_string()))
    .bind(payload_json)
    .bind(Utc::now().to_rfc3339())
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

pub async fn list_events(db: &Db, run_id: Uuid, offset: u64, limit: u64) -> Result<Vec<StoredEvent>, ApiError> {
    let rows = sqlx::query(
        r#"SELECT seq, kind, case_id, judge_id, request_id, payload_json, recorded_at
           FROM ledger_events
           WHERE run_id = ?
           ORDER BY seq
           LIMIT ? OFFSET ?"#,
    )
    .bind(run_id.to_string())
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let seq: i64 = row.get(0);
        let kind: String = row.get(1);
        let case_id: Option<i64> = row.get(2);
        let judge_id: Option<String> = row.get(3);
        let request_id: Option<String> = row.get(4);
        let payload_json: String = row.get(5);
        let recorded_at: String = row.get(6);

        out.push(StoredEvent {
            seq: seq as u64,
            kind,
            case_id: case_id.map(|id| id as u64),
            judge_id,
            request_id,
            payload: serde_json::from_str(&payload_json).map_err(|_| ApiError::Internal)?,
            recorded_at: parse_timestamp(&recorded_at)?,
        });
    }

    Ok(out)
}

pub async fn upsert_judge_stats(db: &Db, run_id: Uuid, stats: &DecryptedJudgeStats) -> Result<(), ApiError> {
    sqlx::query(
        r#"INSERT OR REPLACE INTO judge_stats (run_id, judge_id, case_count, request_id, decrypted_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(run_id.to_string())
    .bind(&stats.judge_id)
    .bind(stats.case_count as i64)
    .bind(stats.request_id.to_string())
    .bind(stats.decrypted_at.to_rfc3339())
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

pub async fn get_judge_stats(db: &Db, run_id: Uuid, judge_id: &str) -> Result<Option<DecryptedJudgeStats>, ApiError> {
    let row = sqlx::query(
        r#"SELECT judge_id, case_count, request_id, decrypted_at
           FROM judge_stats WHERE run_id = ? AND judge_id = ?"#,
    )
    .bind(run_id.to_string())
    .bind(judge_id)
    .fetch_optional(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    let Some(row) = row else { return Ok(None); };

    let judge_id: String = row.get(0);
    let case_count: i64 = row.get(1);
    let request_id: String = row.get(2);
    let decrypted_at: String = row.get(3);

    Ok(Some(DecryptedJudgeStats {
        judge_id,
        case_count: case_count as u64,
        request_id: request_id.parse().map_err(|_| ApiError::Internal)?,
        decrypted_at: parse_timestamp(&decrypted_at)?,
    }))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ApiError> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|_| ApiError::Internal)?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhe_oracle::types::RequestId;

    async fn memory_db() -> Db {
        let db = connect("sqlite::memory:", 1).await.unwrap();
        init_schema(&db).await.unwrap();
        db
    }

    #[tokio::test]
    async fn events_are_listed_in_append_order() {
        let db = memory_db().await;
        let run = Uuid::new_v4();
        let request_id = RequestId::new();
        insert_event(&db, run, &LedgerEvent::CaseSubmitted { case_id: 1, at: Utc::now() }).await.unwrap();
        insert_event(&db, run, &LedgerEvent::AnalysisRequested { case_id: 1, request_id }).await.unwrap();

        let events = list_events(&db, run, 0, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "case_submitted");
        assert_eq!(events[1].kind, "analysis_requested");
        assert_eq!(events[1].case_id, Some(1));
        assert_eq!(events[1].request_id, Some(request_id.to_string()));
        assert_eq!(events[1].payload["kind"], "analysis_requested");

        assert_eq!(list_events(&db, run, 1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn runs_do_not_share_events_or_stats() {
        let db = memory_db().await;
        let (earlier, current) = (Uuid::new_v4(), Uuid::new_v4());

        // Case ids restart with every run.
        insert_event(&db, earlier, &LedgerEvent::CaseAnalyzed { case_id: 1 }).await.unwrap();
        insert_event(&db, current, &LedgerEvent::CaseSubmitted { case_id: 1, at: Utc::now() }).await.unwrap();

        let events = list_events(&db, current, 0, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "case_submitted");

        let stats = DecryptedJudgeStats {
            judge_id: "Judge_A".into(),
            case_count: 7,
            request_id: RequestId::new(),
            decrypted_at: Utc::now(),
        };
        upsert_judge_stats(&db, earlier, &stats).await.unwrap();
        assert!(get_judge_stats(&db, current, "Judge_A").await.unwrap().is_none());
        assert_eq!(get_judge_stats(&db, earlier, "Judge_A").await.unwrap().unwrap().case_count, 7);
    }

    #[tokio::test]
    async fn judge_stats_keep_the_latest_reveal() {
        let db = memory_db().await;
        let run = Uuid::new_v4();
        assert!(get_judge_stats(&db, run, "Judge_A").await.unwrap().is_none());

        let first = DecryptedJudgeStats {
            judge_id: "Judge_A".into(),
            case_count: 2,
            request_id: RequestId::new(),
            decrypted_at: Utc::now(),
        };
        let second = DecryptedJudgeStats { case_count: 5, request_id: RequestId::new(), ..first.clone() };
        upsert_judge_stats(&db, run, &first).await.unwrap();
        upsert_judge_stats(&db, run, &second).await.unwrap();

        let stored = get_judge_stats(&db, run, "Judge_A").await.unwrap().unwrap();
        assert_eq!(stored.case_count, 5);
        assert_eq!(stored.request_id, second.request_id);
    }
}
