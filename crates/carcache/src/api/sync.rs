use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::sync_run_status::SyncType;
use crate::repository::MergeReport;
use crate::sync::{StartPage, SyncError, SyncSnapshot};

use super::AppState;
use super::errors::ApiError;

/// Body of `POST /sync/start`. Every field is optional; `{}` starts a full
/// run from page 1.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(rename = "type")]
    pub sync_type: Option<SyncType>,
    pub from_page: Option<u32>,
    /// Continue the last failed run instead of starting over.
    pub resume: bool,
}

impl StartRequest {
    fn start_page(&self) -> StartPage {
        match (self.resume, self.from_page) {
            (true, _) => StartPage::Resume,
            (false, Some(page)) => StartPage::Page(page.max(1)),
            (false, None) => StartPage::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub run_id: Uuid,
    pub stream: String,
    pub sync_type: SyncType,
    pub start_page: u32,
    pub resumed: bool,
}

/// Body of `POST /sync/reset`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResetRequest {
    pub reason: Option<String>,
}

/// Body of `POST /sync/merge`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeRequest {
    /// Run to merge; the stream's last completed run when absent.
    pub run_id: Option<Uuid>,
    /// Overrides the server's staging purge setting.
    pub purge_staging: Option<bool>,
}

/// `POST /sync/start`: claim the stream, then drive the run in the background.
pub async fn start_sync(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let mut options = state.sync_defaults.clone();
    if let Some(sync_type) = request.sync_type {
        options.sync_type = sync_type;
    }
    options.start = request.start_page();

    let claim = state.orchestrator.start(&options).await?;
    let response = StartResponse {
        run_id: claim.run_id,
        stream: claim.stream.clone(),
        sync_type: claim.sync_type,
        start_page: claim.start_page,
        resumed: claim.resumed,
    };

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let run_id = claim.run_id;
        match orchestrator.drive(claim, &options).await {
            Ok(outcome) => tracing::info!(
                %run_id,
                status = %outcome.status,
                records = outcome.records_processed,
                incomplete = outcome.incomplete,
                "Background sync finished"
            ),
            Err(SyncError::Cancelled { resume_page, .. }) => {
                tracing::warn!(%run_id, resume_page, "Background sync cancelled")
            }
            Err(e) => tracing::error!(%run_id, error = %e, "Background sync failed"),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `GET /sync/status`
pub async fn sync_status(State(state): State<AppState>) -> Result<Json<SyncSnapshot>, ApiError> {
    let stream = &state.sync_defaults.stream;
    let row = state
        .orchestrator
        .store()
        .get(stream)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sync stream '{stream}' has never run")))?;
    Ok(Json(SyncSnapshot::from_status(row, Utc::now())))
}

/// `POST /sync/reset`
pub async fn reset_sync(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<SyncSnapshot>, ApiError> {
    let reason = request
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Reset by operator".to_string());
    let row = state
        .orchestrator
        .store()
        .reset(&state.sync_defaults.stream, &reason)
        .await?;
    tracing::warn!(stream = %row.stream, %reason, "Sync reset");
    Ok(Json(SyncSnapshot::from_status(row, Utc::now())))
}

/// `POST /sync/merge`: replay the merge of a finished run.
pub async fn merge_sync(
    State(state): State<AppState>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<MergeReport>, ApiError> {
    let purge = request
        .purge_staging
        .unwrap_or(state.sync_defaults.purge_staging);
    let report = state
        .orchestrator
        .replay_merge(&state.sync_defaults.stream, request.run_id, purge)
        .await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_parsing() {
        let request: StartRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.sync_type, None);
        assert_eq!(request.start_page(), StartPage::Page(1));

        let request: StartRequest =
            serde_json::from_str(r#"{"type": "incremental", "fromPage": 40}"#).unwrap();
        assert_eq!(request.sync_type, Some(SyncType::Incremental));
        assert_eq!(request.start_page(), StartPage::Page(40));

        let request: StartRequest =
            serde_json::from_str(r#"{"fromPage": 0, "resume": true}"#).unwrap();
        assert_eq!(request.start_page(), StartPage::Resume);
    }

    #[test]
    fn test_merge_request_parsing() {
        let request: MergeRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.run_id, None);
        assert_eq!(request.purge_staging, None);

        let request: MergeRequest = serde_json::from_str(
            r#"{"runId": "6c1f3f0e-52b4-4c8e-9a57-0d2e8b43a1c9", "purgeStaging": false}"#,
        )
        .unwrap();
        assert!(request.run_id.is_some());
        assert_eq!(request.purge_staging, Some(false));
    }

    #[test]
    fn test_start_request_rejects_unknown_type() {
        assert!(serde_json::from_str::<StartRequest>(r#"{"type": "partial"}"#).is_err());
    }
}
