use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ReportPayload, ReportSink};
use crate::chart::RenderError;
use crate::config::{BlueskyCredentials, ENDORSE_SPEED_THRESHOLD_KPH};

const DEFAULT_SERVICE: &str = "https://bsky.social";

#[derive(Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "accessJwt")]
    access_jwt: String,
    did: String,
}

#[derive(Deserialize)]
struct UploadBlobResponse {
    blob: Value,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
    cid: String,
}

/// Posts the report with the chart image to Bluesky over XRPC.
///
/// Sink-local policy: posts about sessions at or above
/// `ENDORSE_SPEED_THRESHOLD_KPH` get a self-like, and a like failure
/// is logged but never fails the delivery.
pub struct BlueskySink {
    client: reqwest::Client,
    service: String,
    access_jwt: String,
    did: String,
}

impl BlueskySink {
    pub async fn login(credentials: &BlueskyCredentials) -> Result<Self> {
        Self::login_to(DEFAULT_SERVICE, credentials).await
    }

    pub async fn login_to(service: &str, credentials: &BlueskyCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("buswatch/0.1.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let session: CreateSessionResponse = client
            .post(format!("{}/xrpc/com.atproto.server.createSession", service))
            .json(&json!({
                "identifier": credentials.username,
                "password": credentials.password,
            }))
            .send()
            .await
            .context("bluesky login request")?
            .error_for_status()
            .context("bluesky login rejected")?
            .json()
            .await
            .context("bluesky login response")?;

        info!("bluesky sink logged in as {}", session.did);
        Ok(BlueskySink {
            client,
            service: service.to_string(),
            access_jwt: session.access_jwt,
            did: session.did,
        })
    }

    fn alt_text(payload: &ReportPayload) -> String {
        let session = &payload.session;
        format!(
            "Speed curve of bus {} ({} vehicle {}). {} data points.",
            session.line,
            session.operator_name,
            session.key.vehicle,
            session.observations.len()
        )
    }

    fn should_endorse(max_speed: f64) -> bool {
        max_speed >= ENDORSE_SPEED_THRESHOLD_KPH
    }

    async fn create_record(&self, collection: &str, record: Value) -> Result<CreateRecordResponse> {
        let response = self
            .client
            .post(format!("{}/xrpc/com.atproto.repo.createRecord", self.service))
            .bearer_auth(&self.access_jwt)
            .json(&json!({
                "repo": self.did,
                "collection": collection,
                "record": record,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    fn now_rfc3339() -> String {
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

#[async_trait]
impl ReportSink for BlueskySink {
    fn name(&self) -> &'static str {
        "bluesky"
    }

    async fn deliver(&self, payload: &ReportPayload) -> Result<()> {
        let upload: UploadBlobResponse = self
            .client
            .post(format!("{}/xrpc/com.atproto.repo.uploadBlob", self.service))
            .bearer_auth(&self.access_jwt)
            .header("content-type", "image/png")
            .body(payload.chart_png.clone())
            .send()
            .await
            .context("uploading chart image")?
            .error_for_status()
            .context("chart image upload rejected")?
            .json()
            .await
            .context("chart image upload response")?;

        let post = self
            .create_record(
                "app.bsky.feed.post",
                json!({
                    "$type": "app.bsky.feed.post",
                    "text": payload.message,
                    "createdAt": Self::now_rfc3339(),
                    "embed": {
                        "$type": "app.bsky.embed.images",
                        "images": [{
                            "image": upload.blob,
                            "alt": Self::alt_text(payload),
                        }],
                    },
                }),
            )
            .await
            .context("creating post")?;

        let max_speed = payload
            .session
            .max_speed_observation()
            .map(|o| o.speed)
            .unwrap_or(0.0);
        if Self::should_endorse(max_speed) {
            let like = self
                .create_record(
                    "app.bsky.feed.like",
                    json!({
                        "$type": "app.bsky.feed.like",
                        "subject": { "uri": post.uri, "cid": post.cid },
                        "createdAt": Self::now_rfc3339(),
                    }),
                )
                .await;
            if let Err(like_error) = like {
                warn!("failed to like post {}: {:#}", post.uri, like_error);
            }
        }

        Ok(())
    }

    fn handles_failure_notice(&self) -> bool {
        true
    }

    async fn deliver_failure_notice(&self, message: &str, _error: &RenderError) -> Result<()> {
        self.create_record(
            "app.bsky.feed.post",
            json!({
                "$type": "app.bsky.feed.post",
                "text": format!("{} (Chart rendering failed. 🪲)", message),
                "createdAt": Self::now_rfc3339(),
            }),
        )
        .await
        .context("posting failure notice")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Observation, Session, SessionKey};

    #[test]
    fn test_like_threshold() {
        assert!(!BlueskySink::should_endorse(49.9));
        assert!(BlueskySink::should_endorse(50.0));
        assert!(BlueskySink::should_endorse(61.2));
    }

    #[test]
    fn test_alt_text() {
        let payload = ReportPayload {
            message: String::new(),
            chart_png: Vec::new(),
            session: Session {
                key: SessionKey {
                    operator: 22,
                    vehicle: 1172,
                },
                start_time: "18:06".to_string(),
                operator_name: "Nobina Finland Oy",
                line: "69".to_string(),
                observations: vec![
                    Observation {
                        timestamp: 1,
                        latitude: 60.2456,
                        longitude: 24.9927,
                        speed: 20.0,
                        heading: 90.0,
                        acceleration: 0.2,
                        schedule_offset: 0,
                        gps: true,
                        doors_open: false,
                    };
                    14
                ],
                doors_open_since: None,
            },
        };
        assert_eq!(
            BlueskySink::alt_text(&payload),
            "Speed curve of bus 69 (Nobina Finland Oy vehicle 1172). 14 data points."
        );
    }
}
