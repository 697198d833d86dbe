use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};

use super::{ReportPayload, ReportSink};

/// Persists every chart PNG under a local directory, one file per
/// finalized session.
pub struct DiskSink {
    output_dir: PathBuf,
}

impl DiskSink {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        DiskSink {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    fn file_name(payload: &ReportPayload) -> String {
        let session = &payload.session;
        let last_timestamp = session
            .last_timestamp()
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        format!(
            "{}_{}_{}.png",
            sanitize_line(&session.line),
            session.key.vehicle,
            last_timestamp
        )
    }
}

/// Replace every run of filesystem-hostile characters with one
/// underscore.
fn sanitize_line(line: &str) -> String {
    let mut sanitized = String::with_capacity(line.len());
    let mut in_run = false;
    for c in line.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
            sanitized.push(c);
            in_run = false;
        } else if !in_run {
            sanitized.push('_');
            in_run = true;
        }
    }
    sanitized
}

#[async_trait]
impl ReportSink for DiskSink {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn deliver(&self, payload: &ReportPayload) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("creating {}", self.output_dir.display()))?;

        let path: PathBuf = self.output_dir.join(Self::file_name(payload));
        tokio::fs::write(&path, &payload.chart_png)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!("saved chart to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Observation, Session, SessionKey};

    fn payload() -> ReportPayload {
        ReportPayload {
            message: "msg".to_string(),
            chart_png: vec![0x89, 0x50, 0x4e, 0x47],
            session: Session {
                key: SessionKey {
                    operator: 22,
                    vehicle: 1172,
                },
                start_time: "18:06".to_string(),
                operator_name: "Nobina Finland Oy",
                line: "69B/x".to_string(),
                observations: vec![Observation {
                    timestamp: 1_710_000_000,
                    latitude: 60.2456,
                    longitude: 24.9927,
                    speed: 20.0,
                    heading: 90.0,
                    acceleration: 0.2,
                    schedule_offset: 0,
                    gps: true,
                    doors_open: false,
                }],
                doors_open_since: None,
            },
        }
    }

    #[test]
    fn test_sanitize_line() {
        assert_eq!(sanitize_line("69"), "69");
        assert_eq!(sanitize_line("69B/x"), "69B_x");
        assert_eq!(sanitize_line("a  b??c"), "a_b_c");
    }

    #[test]
    fn test_file_name_derivation() {
        assert_eq!(DiskSink::file_name(&payload()), "69B_x_1172_1710000000.png");
    }

    #[tokio::test]
    async fn test_deliver_writes_png() {
        let dir = std::env::temp_dir().join(format!("buswatch-disk-test-{}", std::process::id()));
        let sink = DiskSink::new(&dir);

        sink.deliver(&payload()).await.unwrap();

        let written = tokio::fs::read(dir.join("69B_x_1172_1710000000.png"))
            .await
            .unwrap();
        assert_eq!(written, vec![0x89, 0x50, 0x4e, 0x47]);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
