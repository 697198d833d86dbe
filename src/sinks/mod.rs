use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::future::join_all;
use log::{error, info};
use std::sync::Arc;

use crate::chart::RenderError;
use crate::registry::Session;

pub mod bluesky;
pub mod disk;
pub mod sqlite;

pub use bluesky::BlueskySink;
pub use disk::DiskSink;
pub use sqlite::SqliteSink;

/// Everything a sink gets for one finalized session.
pub struct ReportPayload {
    pub message: String,
    pub chart_png: Vec<u8>,
    pub session: Session,
}

/// A delivery target for finalized reports.
///
/// `deliver_failure_notice` is the degraded path taken when chart
/// rendering failed; sinks that have nothing useful to do without an
/// image leave `handles_failure_notice` at false and are skipped.
#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, payload: &ReportPayload) -> Result<()>;

    fn handles_failure_notice(&self) -> bool {
        false
    }

    async fn deliver_failure_notice(&self, _message: &str, _error: &RenderError) -> Result<()> {
        Ok(())
    }
}

/// Ordered collection of sinks with per-sink failure isolation: one
/// failing or hung sink never prevents the others from being attempted.
pub struct SinkFanout {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl SinkFanout {
    /// Zero sinks means every future report would be dropped silently,
    /// so that is a startup error, not a tolerated runtime condition.
    pub fn new(sinks: Vec<Arc<dyn ReportSink>>) -> Result<Self> {
        if sinks.is_empty() {
            bail!("no output sinks configured");
        }
        info!(
            "sink fan-out ready: {}",
            sinks
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(SinkFanout { sinks })
    }

    pub async fn deliver(&self, payload: &ReportPayload) {
        let deliveries = self.sinks.iter().map(|sink| async move {
            if let Err(error) = sink.deliver(payload).await {
                error!("sink {} failed to deliver: {:#}", sink.name(), error);
            }
        });
        join_all(deliveries).await;
    }

    pub async fn deliver_failure_notice(&self, message: &str, render_error: &RenderError) {
        let deliveries = self
            .sinks
            .iter()
            .filter(|sink| sink.handles_failure_notice())
            .map(|sink| async move {
                if let Err(error) = sink.deliver_failure_notice(message, render_error).await {
                    error!(
                        "sink {} failed to deliver failure notice: {:#}",
                        sink.name(),
                        error
                    );
                }
            });
        join_all(deliveries).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionKey;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        name: &'static str,
        fail: bool,
        delivered: AtomicUsize,
        notices: AtomicUsize,
    }

    impl CountingSink {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(CountingSink {
                name,
                fail,
                delivered: AtomicUsize::new(0),
                notices: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ReportSink for CountingSink {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn deliver(&self, _payload: &ReportPayload) -> Result<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("boom"));
            }
            Ok(())
        }

        fn handles_failure_notice(&self) -> bool {
            true
        }

        async fn deliver_failure_notice(&self, _m: &str, _e: &RenderError) -> Result<()> {
            self.notices.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn payload() -> ReportPayload {
        ReportPayload {
            message: "Line 69 - departure 18:06.".to_string(),
            chart_png: vec![1, 2, 3],
            session: Session {
                key: SessionKey {
                    operator: 22,
                    vehicle: 1172,
                },
                start_time: "18:06".to_string(),
                operator_name: "Nobina Finland Oy",
                line: "69".to_string(),
                observations: Vec::new(),
                doors_open_since: None,
            },
        }
    }

    #[test]
    fn test_zero_sinks_is_fatal() {
        assert!(SinkFanout::new(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let bad = CountingSink::new("bad", true);
        let good = CountingSink::new("good", false);
        let fanout =
            SinkFanout::new(vec![bad.clone() as Arc<dyn ReportSink>, good.clone() as _]).unwrap();

        fanout.deliver(&payload()).await;

        assert_eq!(bad.delivered.load(Ordering::SeqCst), 1);
        assert_eq!(good.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_notice_reaches_capable_sinks() {
        let sink = CountingSink::new("capable", false);
        let fanout = SinkFanout::new(vec![sink.clone() as Arc<dyn ReportSink>]).unwrap();

        fanout
            .deliver_failure_notice("message", &RenderError::EmptyImage)
            .await;

        assert_eq!(sink.notices.load(Ordering::SeqCst), 1);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 0);
    }
}
