use chrono::{Local, LocalResult, TimeZone};
use log::{error, info, warn};
use std::sync::Arc;

use crate::chart::ChartRenderer;
use crate::config::{MIN_OBSERVATIONS, SPEED_LIMIT_KPH};
use crate::registry::{Observation, Session};
use crate::series::build_series;
use crate::sinks::{ReportPayload, SinkFanout};

/// One entry of the ordered speed classification table: inclusive
/// upper bound plus a description generator.
struct SpeedTier {
    bound: f64,
    describe: fn(f64) -> String,
}

fn describe_no_data(speed: f64) -> String {
    format!("No measurement data. {}", speed_emotion(speed))
}

fn describe_no_speeding(speed: f64) -> String {
    format!("No speeding. {}", speed_emotion(speed))
}

fn describe_at_limit(speed: f64) -> String {
    format!(
        "Stayed approximately at the speed limit. {}",
        speed_emotion(speed)
    )
}

fn describe_speeding(speed: f64) -> String {
    let excess = ((speed - SPEED_LIMIT_KPH) * 10.0).round() / 10.0;
    let percentage = (100.0 * (speed / SPEED_LIMIT_KPH - 1.0)).round();
    format!(
        "Top speeding {} km/h over ({}%), that is {} km/h in a {} zone! {}",
        excess,
        percentage,
        speed,
        SPEED_LIMIT_KPH,
        speed_emotion(speed)
    )
}

// Ascending bounds; the final tier is unbounded so a match is
// guaranteed.
const SPEED_TIERS: [SpeedTier; 4] = [
    SpeedTier {
        bound: 0.0,
        describe: describe_no_data,
    },
    SpeedTier {
        bound: 30.0,
        describe: describe_no_speeding,
    },
    SpeedTier {
        bound: 33.0,
        describe: describe_at_limit,
    },
    SpeedTier {
        bound: f64::INFINITY,
        describe: describe_speeding,
    },
];

/// Mood grading carried over into every tier description.
fn speed_emotion(speed: f64) -> &'static str {
    if speed <= 0.0 {
        "🐛"
    } else if speed <= 30.0 {
        "😊"
    } else if speed <= 33.0 {
        "🙂"
    } else if speed <= 34.5 {
        "🙁"
    } else if speed <= 36.0 {
        "☹️"
    } else if speed <= 40.0 {
        "😠"
    } else if speed <= 45.0 {
        "😡"
    } else if speed <= 50.0 {
        "😡😡"
    } else if speed <= 60.0 {
        "😡😡😡"
    } else {
        "😡😡😡😡"
    }
}

/// First tier whose bound is at or above the observed speed.
pub fn classify_speed(speed: f64) -> String {
    let tier = SPEED_TIERS
        .iter()
        .find(|tier| speed <= tier.bound)
        .unwrap_or(&SPEED_TIERS[SPEED_TIERS.len() - 1]);
    (tier.describe)(speed)
}

/// Arrow and description of one compass sector.
pub struct DirectionInfo {
    pub arrow: &'static str,
    pub description: &'static str,
}

// 45 degree sectors; the trailing entry catches headings within 22.5
// degrees below 360 wrapping back to north.
const DIRECTIONS: [DirectionInfo; 9] = [
    DirectionInfo { arrow: "↑", description: "north" },
    DirectionInfo { arrow: "↗", description: "north-east" },
    DirectionInfo { arrow: "→", description: "east" },
    DirectionInfo { arrow: "↘", description: "south-east" },
    DirectionInfo { arrow: "↓", description: "south" },
    DirectionInfo { arrow: "↙", description: "south-west" },
    DirectionInfo { arrow: "←", description: "west" },
    DirectionInfo { arrow: "↖", description: "north-west" },
    DirectionInfo { arrow: "↑", description: "north" },
];

/// Map a compass heading (0-360) to its sector.
pub fn compass_direction(heading: f64) -> &'static DirectionInfo {
    let sector = ((heading.rem_euclid(360.0) + 22.5) / 45.0).floor() as usize;
    &DIRECTIONS[sector.min(DIRECTIONS.len() - 1)]
}

fn hh_mm(timestamp: i64) -> String {
    match Local.timestamp_opt(timestamp, 0) {
        LocalResult::Single(datetime) => datetime.format("%H:%M").to_string(),
        _ => format!("+{}s", timestamp),
    }
}

/// Compose the report message for one finalized session. The compass
/// direction is only meaningful while the vehicle was actually moving.
pub fn compose_message(session: &Session, max: &Observation) -> String {
    let description = classify_speed(max.speed);
    let clock = hh_mm(max.timestamp);
    if max.speed > 0.0 {
        let direction = compass_direction(max.heading);
        format!(
            "Line {} - departure {}. Passed Eskolantie heading {} at {}. {}",
            session.line, session.start_time, direction.description, clock, description
        )
    } else {
        format!(
            "Line {} - departure {}. Passed Eskolantie at {}. {}",
            session.line, session.start_time, clock, description
        )
    }
}

/// Terminal processing of a session judged inactive.
///
/// The session is already out of the registry when this runs; a new
/// session may legitimately start accumulating under the same key
/// while the chart renders and the sinks deliver.
pub async fn finalize_session(
    session: Session,
    renderer: Arc<dyn ChartRenderer>,
    fanout: Arc<SinkFanout>,
) {
    if session.observations.len() < MIN_OBSERVATIONS {
        warn!(
            "line {} vehicle {} got only {} observations, skipping report",
            session.line,
            session.key.vehicle,
            session.observations.len()
        );
        return;
    }

    // Non-empty by the guard above.
    let max = match session.max_speed_observation() {
        Some(observation) => observation.clone(),
        None => return,
    };
    info!(
        "line {} vehicle {}: max observed speed {} km/h at {}",
        session.line, session.key.vehicle, max.speed, max.timestamp
    );

    let message = compose_message(&session, &max);
    let series = build_series(&session.observations);

    match renderer.render(&session, &series).await {
        Ok(chart_png) => {
            info!("reporting: {}", message);
            let payload = ReportPayload {
                message,
                chart_png,
                session,
            };
            fanout.deliver(&payload).await;
        }
        Err(render_error) => {
            error!(
                "chart rendering failed for line {}: {}",
                session.line, render_error
            );
            fanout.deliver_failure_notice(&message, &render_error).await;
        }
    }
}
