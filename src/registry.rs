use geo::{Contains, Coord, Rect};
use log::{debug, info};
use std::collections::HashMap;

use crate::config;
use crate::telemetry::{mps_to_kph, EventKind, TelemetryEvent};

/// Identity of a vehicle inside the zone. At most one in-progress
/// session exists per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub operator: u32,
    pub vehicle: u32,
}

/// One normalized, accepted position sample. Append-only, never
/// mutated after insertion.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// km/h, one decimal
    pub speed: f64,
    pub heading: f64,
    pub acceleration: f64,
    pub schedule_offset: i64,
    pub gps: bool,
    pub doors_open: bool,
}

/// In-progress accumulation of observations for one vehicle currently
/// inside the observation zone.
#[derive(Clone, Debug)]
pub struct Session {
    pub key: SessionKey,
    pub start_time: String,
    pub operator_name: &'static str,
    pub line: String,
    pub observations: Vec<Observation>,
    /// Set while the doors are open; not an observation.
    pub doors_open_since: Option<i64>,
}

impl Session {
    fn new(key: SessionKey, event: &TelemetryEvent) -> Self {
        Session {
            key,
            start_time: event.start_time.clone(),
            operator_name: config::operator_name(event.operator),
            line: event.line.clone(),
            observations: Vec::new(),
            doors_open_since: None,
        }
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.observations.last().map(|o| o.timestamp)
    }

    /// The observation with the highest speed, keeping the first one
    /// on ties.
    pub fn max_speed_observation(&self) -> Option<&Observation> {
        let mut max: Option<&Observation> = None;
        for observation in &self.observations {
            match max {
                Some(current) if observation.speed <= current.speed => {}
                _ => max = Some(observation),
            }
        }
        max
    }
}

/// Outcome of feeding one telemetry record to the registry, for
/// logging only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    OutsideZone,
    AccelerationOutlier,
    MissingCoordinates,
}

/// The process-wide vehicle → session map. Owned by the engine loop;
/// all mutation happens on that one logical thread, so no locking.
pub struct SessionRegistry {
    sessions: HashMap<SessionKey, Session>,
    zone: Rect<f64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: HashMap::new(),
            zone: config::observation_zone(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.get(key)
    }

    /// Validate and apply one inbound record.
    ///
    /// Position samples outside the observation zone or with an
    /// implausible acceleration are discarded without touching the
    /// registry. Door events carry no coordinates and skip both gates;
    /// they only move the transient door marker. The first accepted
    /// event of any subtype creates the session.
    pub fn ingest(&mut self, kind: EventKind, event: &TelemetryEvent) -> IngestOutcome {
        let key = SessionKey {
            operator: event.operator,
            vehicle: event.vehicle,
        };

        match kind {
            EventKind::Position => {
                let (lat, lon) = match (event.latitude, event.longitude) {
                    (Some(lat), Some(lon)) => (lat, lon),
                    _ => {
                        debug!("line {}: position sample without coordinates", event.line);
                        return IngestOutcome::MissingCoordinates;
                    }
                };

                // The subscribed topics are coarser than the zone.
                if !self.zone.contains(&Coord { x: lon, y: lat }) {
                    debug!(
                        "line {} vehicle {}: ({:.6}, {:.6}) outside zone",
                        event.line, event.vehicle, lat, lon
                    );
                    return IngestOutcome::OutsideZone;
                }

                if event.acceleration.abs() > config::ACCELERATION_OUTLIER_THRESHOLD {
                    info!(
                        "line {} vehicle {}: acceleration outlier {:.2} m/s^2, sample dropped",
                        event.line, event.vehicle, event.acceleration
                    );
                    return IngestOutcome::AccelerationOutlier;
                }

                let session = self
                    .sessions
                    .entry(key)
                    .or_insert_with(|| Session::new(key, event));
                let doors_open = session.doors_open_since.is_some();
                session.observations.push(Observation {
                    timestamp: event.timestamp,
                    latitude: lat,
                    longitude: lon,
                    speed: mps_to_kph(event.speed_mps),
                    heading: event.heading,
                    acceleration: event.acceleration,
                    schedule_offset: event.schedule_offset,
                    gps: event.has_gps_fix(),
                    doors_open,
                });
                IngestOutcome::Accepted
            }
            EventKind::DoorOpen => {
                let session = self
                    .sessions
                    .entry(key)
                    .or_insert_with(|| Session::new(key, event));
                session.doors_open_since = Some(event.timestamp);
                IngestOutcome::Accepted
            }
            EventKind::DoorClose => {
                let session = self
                    .sessions
                    .entry(key)
                    .or_insert_with(|| Session::new(key, event));
                session.doors_open_since = None;
                IngestOutcome::Accepted
            }
        }
    }

    /// Remove and return every session whose last observation is older
    /// than `threshold_secs`. Sessions without observations yet are not
    /// eligible for timeout. Removal happens here, synchronously,
    /// before the caller hands the session to any asynchronous work, so
    /// a session can never be finalized twice.
    pub fn take_bygone(&mut self, now: i64, threshold_secs: i64) -> Vec<Session> {
        let bygone: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter_map(|(key, session)| {
                let last = session.last_timestamp()?;
                if now - last > threshold_secs {
                    Some(*key)
                } else {
                    None
                }
            })
            .collect();

        bygone
            .into_iter()
            .filter_map(|key| self.sessions.remove(&key))
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
