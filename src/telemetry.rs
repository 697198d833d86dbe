use serde::Deserialize;

/// Subtype of an inbound telemetry record, taken from the one-key
/// envelope the feed wraps every payload in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Position,
    DoorOpen,
    DoorClose,
}

impl EventKind {
    pub fn from_envelope_key(key: &str) -> Option<Self> {
        match key {
            "VP" => Some(EventKind::Position),
            "DOO" => Some(EventKind::DoorOpen),
            "DOC" => Some(EventKind::DoorClose),
            _ => None,
        }
    }
}

/// One decoded vehicle telemetry record.
///
/// Field names on the wire follow the HSL high-frequency-positioning
/// payload: `desi` line designation, `oper`/`veh` vehicle identity,
/// `tsi` whole-second unix timestamp, `spd` speed in m/s, `hdg`
/// compass heading, `dl` offset from schedule in seconds (positive =
/// ahead of timetable), `loc` location source.
#[derive(Clone, Debug, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "desi")]
    pub line: String,
    #[serde(rename = "oper")]
    pub operator: u32,
    #[serde(rename = "veh")]
    pub vehicle: u32,
    #[serde(rename = "tsi")]
    pub timestamp: i64,
    #[serde(rename = "spd", default)]
    pub speed_mps: f64,
    #[serde(rename = "hdg", default)]
    pub heading: f64,
    #[serde(rename = "lat", default)]
    pub latitude: Option<f64>,
    #[serde(rename = "long", default)]
    pub longitude: Option<f64>,
    #[serde(rename = "acc", default)]
    pub acceleration: f64,
    #[serde(rename = "dl", default)]
    pub schedule_offset: i64,
    #[serde(rename = "loc", default)]
    pub location_source: String,
    #[serde(rename = "start", default)]
    pub start_time: String,
    #[serde(rename = "route", default)]
    pub route: String,
}

impl TelemetryEvent {
    /// Whether the sample came from an actual GPS fix rather than
    /// odometry or dead reckoning.
    pub fn has_gps_fix(&self) -> bool {
        self.location_source == "GPS"
    }
}

/// Converts meters per second to kilometers per hour, rounded to one
/// decimal (half away from zero on the scaled value).
pub fn mps_to_kph(mps: f64) -> f64 {
    (mps * 3.6 * 10.0).round() / 10.0
}

/// Decode one feed payload. Undecodable payloads yield None and are
/// dropped by the caller without further ceremony.
pub fn decode_envelope(payload: &str) -> Option<(EventKind, TelemetryEvent)> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let object = value.as_object()?;
    let (key, body) = object.iter().next()?;
    let kind = EventKind::from_envelope_key(key)?;
    let event: TelemetryEvent = serde_json::from_value(body.clone()).ok()?;
    Some((kind, event))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_VP: &str = r#"{"VP":{"desi":"69","dir":"1","oper":22,"veh":1172,
        "tst":"2024-03-09T16:20:15.000Z","tsi":1710000015,"spd":8.61,"hdg":92,
        "lat":60.245617,"long":24.992907,"acc":0.53,"dl":-45,"odo":4662,
        "oday":"2024-03-09","start":"18:06","loc":"GPS","stop":null,"route":"1069"}}"#;

    #[test]
    fn test_decode_position_envelope() {
        let (kind, event) = decode_envelope(SAMPLE_VP).unwrap();
        assert_eq!(kind, EventKind::Position);
        assert_eq!(event.line, "69");
        assert_eq!(event.operator, 22);
        assert_eq!(event.vehicle, 1172);
        assert_eq!(event.timestamp, 1710000015);
        assert_eq!(event.latitude, Some(60.245617));
        assert_eq!(event.schedule_offset, -45);
        assert!(event.has_gps_fix());
    }

    #[test]
    fn test_decode_door_envelope() {
        let payload = r#"{"DOO":{"desi":"69","oper":22,"veh":1172,"tsi":1710000020,
            "drst":1,"start":"18:06"}}"#;
        let (kind, event) = decode_envelope(payload).unwrap();
        assert_eq!(kind, EventKind::DoorOpen);
        assert_eq!(event.latitude, None);
        assert_eq!(event.speed_mps, 0.0);
    }

    #[test]
    fn test_decode_garbage_is_none() {
        assert!(decode_envelope("not json").is_none());
        assert!(decode_envelope("{}").is_none());
        assert!(decode_envelope(r#"{"XYZ":{"oper":1}}"#).is_none());
        assert!(decode_envelope(r#"{"VP":{"spd":"fast"}}"#).is_none());
    }

    #[test]
    fn test_mps_to_kph_rounding() {
        assert_eq!(mps_to_kph(8.61), 31.0);
        assert_eq!(mps_to_kph(9.1), 32.8);
        assert_eq!(mps_to_kph(0.0), 0.0);
        // 2.625 * 3.6 = 9.45 exactly, rounds half away from zero
        assert_eq!(mps_to_kph(2.625), 9.5);
    }
}
