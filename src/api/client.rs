//! REST calls against the rooms service.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::models::{RoomRecord, SessionId};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait RoomsService: Send + Sync {
    /// One-shot status fetch used to seed a session view.
    async fn fetch_status(&self, session_id: SessionId) -> SyncResult<RoomRecord>;

    /// Registers this client as a participant. Idempotent on the server.
    async fn join(&self, session_id: SessionId) -> SyncResult<()>;

    /// Creator-only. `Conflict` means the session is already starting or live.
    async fn start(&self, session_id: SessionId) -> SyncResult<()>;

    async fn invite(&self, session_id: SessionId, friend_id: &str) -> SyncResult<()>;
}

/// FastAPI-style `{"detail": "..."}` error body.
#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

pub struct RoomsClient {
    client: Client,
    base: String,
    auth_token: Option<String>,
}

impl RoomsClient {
    pub fn new(client: Client, api_base: &Url, auth_token: Option<String>) -> Self {
        Self {
            client,
            base: api_base.as_str().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.timeout(REQUEST_TIMEOUT);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(&self, builder: RequestBuilder) -> SyncResult<Response> {
        let response = self.request(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.detail)
            .unwrap_or_else(|_| status.to_string());
        Err(error_for_status(status, detail))
    }

    async fn post(&self, path: &str) -> SyncResult<()> {
        let url = format!("{}{}", self.base, path);
        self.execute(self.client.post(url)).await?;
        Ok(())
    }
}

fn error_for_status(status: StatusCode, detail: String) -> SyncError {
    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::AccessDenied(detail),
        StatusCode::CONFLICT => SyncError::Conflict,
        _ => SyncError::Network(format!("{status}: {detail}")),
    }
}

#[async_trait]
impl RoomsService for RoomsClient {
    async fn fetch_status(&self, session_id: SessionId) -> SyncResult<RoomRecord> {
        let url = format!("{}/rooms/{}", self.base, session_id);
        let response = self.execute(self.client.get(url)).await?;
        let record: RoomRecord = response.json().await?;
        log_info!("room {} status {:?}", session_id, record.status);
        Ok(record)
    }

    async fn join(&self, session_id: SessionId) -> SyncResult<()> {
        self.post(&format!("/rooms/{session_id}/join")).await
    }

    async fn start(&self, session_id: SessionId) -> SyncResult<()> {
        match self.post(&format!("/private-rooms/{session_id}/start")).await {
            Err(SyncError::Conflict) => {
                log_warn!("room {} already starting or live", session_id);
                Err(SyncError::Conflict)
            }
            other => other,
        }
    }

    async fn invite(&self, session_id: SessionId, friend_id: &str) -> SyncResult<()> {
        self.post(&format!("/private-rooms/{session_id}/invite/{friend_id}"))
            .await
    }
}
