//! Client side of the playlist advisory service. The service is optional and
//! unreliable: every failure mode ends in the built-in default plan.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::time::Duration;

use crate::{
    playlist::{default_playlist, NoiseKind, Playlist},
    settings::AdvisorySettings,
    timer::{Phase, TimerSnapshot},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Signals sent to the advisory service.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdvisoryContext {
    pub phase: Phase,
    pub elapsed_minutes: f64,
    pub remaining_minutes: f64,
    pub completed_work_sessions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground_activity: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl AdvisoryContext {
    pub fn from_snapshot(snapshot: &TimerSnapshot, foreground_activity: Option<String>) -> Self {
        let elapsed_ms = snapshot.phase_total_ms.saturating_sub(snapshot.remaining_ms);
        Self {
            phase: snapshot.phase,
            elapsed_minutes: elapsed_ms as f64 / 60_000.0,
            remaining_minutes: snapshot.remaining_ms as f64 / 60_000.0,
            completed_work_sessions: snapshot.completed_work_sessions,
            foreground_activity,
            requested_at: Utc::now(),
        }
    }

    pub fn remaining_seconds(&self) -> u32 {
        (self.remaining_minutes * 60.0).round().max(0.0) as u32
    }
}

pub trait AdvisoryClient: Send + Sync {
    fn get_playlist<'a>(&'a self, context: &'a AdvisoryContext) -> BoxFuture<'a, Result<Playlist>>;
}

/// POSTs the context as JSON and expects a playlist JSON body back.
pub struct HttpAdvisoryClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAdvisoryClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build advisory http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_settings(settings: &AdvisorySettings) -> Option<Self> {
        let endpoint = settings.endpoint.as_deref()?.trim();
        if endpoint.is_empty() {
            return None;
        }
        match Self::new(endpoint, settings.timeout()) {
            Ok(client) => Some(client),
            Err(err) => {
                log_warn!("advisory client disabled: {err:#}");
                None
            }
        }
    }

    async fn fetch(&self, context: &AdvisoryContext) -> Result<Playlist> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(context)
            .send()
            .await
            .with_context(|| format!("advisory request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            bail!("advisory service answered {status}");
        }

        let body = response
            .text()
            .await
            .context("failed to read advisory response")?;
        serde_json::from_str(&body).context("malformed advisory playlist")
    }
}

impl AdvisoryClient for HttpAdvisoryClient {
    fn get_playlist<'a>(&'a self, context: &'a AdvisoryContext) -> BoxFuture<'a, Result<Playlist>> {
        Box::pin(self.fetch(context))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanOrigin {
    Advisory,
    Default,
}

/// Rejects plans that cannot be played and repairs the rest.
pub fn validate_playlist(playlist: Playlist) -> Result<Playlist> {
    if playlist.is_empty() {
        bail!("advisory playlist has no segments");
    }
    let playlist = playlist.normalized();
    if playlist.total_duration_seconds == 0 {
        bail!("advisory playlist has zero duration");
    }
    Ok(playlist)
}

/// Asks `client` for a plan within `timeout`. Any error, timeout or malformed
/// plan yields the default plan for the context's remaining time.
pub async fn fetch_or_default(
    client: Option<&dyn AdvisoryClient>,
    context: &AdvisoryContext,
    timeout: Duration,
    default_kinds: [NoiseKind; 3],
) -> (Playlist, PlanOrigin) {
    let fallback = || default_playlist(context.remaining_seconds(), default_kinds);

    let Some(client) = client else {
        return (fallback(), PlanOrigin::Default);
    };

    let outcome = tokio::time::timeout(timeout, client.get_playlist(context)).await;
    let failure = match outcome {
        Ok(Ok(playlist)) => match validate_playlist(playlist) {
            Ok(playlist) => {
                log_info!(
                    "advisory plan: {} segments, {}s",
                    playlist.len(),
                    playlist.total_duration_seconds
                );
                return (playlist, PlanOrigin::Advisory);
            }
            Err(err) => err,
        },
        Ok(Err(err)) => err,
        Err(_) => anyhow::anyhow!("advisory service timed out after {}s", timeout.as_secs()),
    };

    log_warn!("using default playlist: {failure:#}");
    (fallback(), PlanOrigin::Default)
}
