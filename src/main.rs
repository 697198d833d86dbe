use anyhow::Result;
use clap::Parser;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use buswatch::chart::{ChartRenderer, QuickChartRenderer};
use buswatch::config::{self, BlueskyCredentials};
use buswatch::feed;
use buswatch::registry::{IngestOutcome, SessionRegistry};
use buswatch::report;
use buswatch::sinks::{BlueskySink, DiskSink, ReportSink, SinkFanout, SqliteSink};
use buswatch::telemetry::{self, EventKind, TelemetryEvent};

#[derive(Parser, Debug)]
#[command(name = "buswatch")]
#[command(about = "Reports speeding buses transiting a fixed observation zone", long_about = None)]
struct Args {
    /// Directory for chart PNGs; empty string disables the disk sink
    #[arg(long, default_value = "charts")]
    output_dir: String,

    /// SQLite database path; empty string disables the sqlite sink
    #[arg(long, default_value = "data/buswatch.db")]
    db_path: String,

    /// Chart rendering service endpoint
    #[arg(long, default_value = "https://quickchart.io/chart")]
    chart_url: String,

    /// Finalize a vehicle after this many seconds without observations
    #[arg(long, default_value_t = config::BYGONE_VEHICLE_THRESHOLD_SECS)]
    bygone_threshold: i64,

    /// Registry sweep period in milliseconds
    #[arg(long, default_value_t = config::SWEEP_INTERVAL_MS)]
    sweep_interval_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut sinks: Vec<Arc<dyn ReportSink>> = Vec::new();
    match BlueskyCredentials::from_env() {
        Some(credentials) => {
            sinks.push(Arc::new(BlueskySink::login(&credentials).await?));
        }
        None => info!("BLUESKY_USERNAME/BLUESKY_PASSWORD not set, social sink disabled"),
    }
    if !args.output_dir.is_empty() {
        sinks.push(Arc::new(DiskSink::new(&args.output_dir)));
    }
    if !args.db_path.is_empty() {
        sinks.push(Arc::new(SqliteSink::new(&args.db_path)));
    }
    // Zero sinks would silently drop every report; refuse to start.
    let fanout = Arc::new(SinkFanout::new(sinks)?);

    let renderer: Arc<dyn ChartRenderer> = Arc::new(QuickChartRenderer::new(&args.chart_url));

    // Transport collaborator: decoded telemetry arrives as NDJSON
    // envelopes on stdin, e.g. from an MQTT subscriber piped in.
    let (tx, rx) = mpsc::channel::<(EventKind, TelemetryEvent)>(500);
    tokio::spawn(feed::feed_loop(
        tokio::io::BufReader::new(tokio::io::stdin()),
        tx,
    ));

    run_engine(
        rx,
        renderer,
        fanout,
        args.bygone_threshold,
        args.sweep_interval_ms,
    )
    .await;
    Ok(())
}

/// The one loop that owns the session registry. Inbound events and
/// sweep ticks are multiplexed here, so registry mutations never
/// interleave; finalization is the only work that spans a suspension
/// point and it runs on sessions already removed from the registry.
async fn run_engine(
    mut rx: mpsc::Receiver<(EventKind, TelemetryEvent)>,
    renderer: Arc<dyn ChartRenderer>,
    fanout: Arc<SinkFanout>,
    bygone_threshold: i64,
    sweep_interval_ms: u64,
) {
    let mut registry = SessionRegistry::new();
    let mut sweep = interval(Duration::from_millis(sweep_interval_ms));
    let mut accepted = 0u64;
    let mut finalizations: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    info!(
        "engine running: sweep every {} ms, bygone threshold {} s",
        sweep_interval_ms, bygone_threshold
    );

    loop {
        tokio::select! {
            inbound = rx.recv() => {
                match inbound {
                    Some((kind, event)) => {
                        if registry.ingest(kind, &event) == IngestOutcome::Accepted {
                            accepted += 1;
                            debug!(
                                "line {:>4}: {} {} km/h; vehicle {}",
                                event.line,
                                report::compass_direction(event.heading).arrow,
                                telemetry::mps_to_kph(event.speed_mps),
                                event.vehicle
                            );
                            if accepted % 100 == 0 {
                                info!(
                                    "{} events accepted, {} sessions in progress",
                                    accepted,
                                    registry.len()
                                );
                            }
                        }
                    }
                    None => {
                        info!("feed channel closed, stopping engine");
                        break;
                    }
                }
            }
            _ = sweep.tick() => {
                finalizations.retain(|handle| !handle.is_finished());
                let now = chrono::Utc::now().timestamp();
                for session in registry.take_bygone(now, bygone_threshold) {
                    info!(
                        "line {} vehicle {} left the zone, finalizing ({} observations)",
                        session.line,
                        session.key.vehicle,
                        session.observations.len()
                    );
                    finalizations.push(tokio::spawn(report::finalize_session(
                        session,
                        renderer.clone(),
                        fanout.clone(),
                    )));
                }
            }
        }
    }

    // No cancellation: in-flight finalizations run to completion
    // before the engine stops.
    for handle in finalizations {
        let _ = handle.await;
    }
    info!("engine stopped");
}
