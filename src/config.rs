use geo::{Coord, Rect};
use std::env;

/// Speed limit of the observed zone in km/h.
pub const SPEED_LIMIT_KPH: f64 = 30.0;

/// Finalize a session once this many seconds have passed since its
/// last observation.
pub const BYGONE_VEHICLE_THRESHOLD_SECS: i64 = 25;

/// How often the registry is swept for bygone vehicles, in milliseconds.
pub const SWEEP_INTERVAL_MS: u64 = 2000;

/// Sessions with fewer observations than this are dropped at finalization.
/// Filters out vehicles that only clipped the edge of the zone.
pub const MIN_OBSERVATIONS: usize = 10;

/// Absolute accelerations above this (m/s^2) are treated as sensor noise
/// and the sample is discarded.
pub const ACCELERATION_OUTLIER_THRESHOLD: f64 = 1.5;

/// A social post gets a self-like above this max speed (km/h).
/// Sink-local policy, see `sinks::bluesky`.
pub const ENDORSE_SPEED_THRESHOLD_KPH: f64 = 50.0;

// Observation zone around Eskolantie. The subscribed geohash cells are
// coarser than this, so every position sample is re-checked against it.
const BBOX_TOP_LAT: f64 = 60.247617;
const BBOX_LEFT_LON: f64 = 24.990907;
const BBOX_BOTTOM_LAT: f64 = 60.243575;
const BBOX_RIGHT_LON: f64 = 24.994711;

/// Bounding box of the observation zone, x = longitude, y = latitude.
pub fn observation_zone() -> Rect<f64> {
    Rect::new(
        Coord {
            x: BBOX_LEFT_LON,
            y: BBOX_BOTTOM_LAT,
        },
        Coord {
            x: BBOX_RIGHT_LON,
            y: BBOX_TOP_LAT,
        },
    )
}

/// Operator registry, from the HSL realtime API documentation.
const OPERATORS: &[(u32, &str)] = &[
    (6, "Oy Pohjolan Liikenne Ab"),
    (12, "Helsingin Bussiliikenne Oy"),
    (17, "Tammelundin Liikenne Oy"),
    (18, "Oy Pohjolan Liikenne Ab"),
    (20, "Bus Travel Åbergin Linja Oy"),
    (21, "Bus Travel Oy Reissu Ruoti"),
    (22, "Nobina Finland Oy"),
    (30, "Savonlinja Oy"),
    (36, "Nurmijärven Linja Oy"),
    (40, "HKL-Raitioliikenne"),
    (47, "Taksikuljetus Oy"),
    (50, "HKL-Metroliikenne"),
    (51, "Korsisaari Oy"),
    (54, "V-S Bussipalvelut Oy"),
    (58, "Koillisen Liikennepalvelut Oy"),
    (59, "Tilausliikenne Nikkanen Oy"),
    (60, "Suomenlinnan Liikenne Oy"),
    (89, "Metropolia"),
    (90, "VR Oy"),
    (195, "Siuntio"),
];

/// Resolve an operator code to a display name, "N/A" when unknown.
pub fn operator_name(code: u32) -> &'static str {
    OPERATORS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or("N/A")
}

/// Credentials for the social sink, read from the environment.
#[derive(Clone)]
pub struct BlueskyCredentials {
    pub username: String,
    pub password: String,
}

impl BlueskyCredentials {
    /// Returns None when either variable is missing, so the caller can
    /// decide whether running without the social sink is acceptable.
    pub fn from_env() -> Option<Self> {
        let username = env::var("BLUESKY_USERNAME").ok()?;
        let password = env::var("BLUESKY_PASSWORD").ok()?;
        Some(BlueskyCredentials { username, password })
    }
}
