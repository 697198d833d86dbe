use chrono::{Local, LocalResult, TimeZone};

use crate::registry::Observation;

// Chart.js style rgba tags consumed by the chart collaborator.
pub const COLOR_VERY_LATE: &str = "rgba(234, 15, 23, 1)";
pub const COLOR_LATE: &str = "rgba(255, 159, 64, 1)";
pub const COLOR_ON_TIME: &str = "rgba(0, 38, 255, 1)";
pub const COLOR_EARLY: &str = "rgba(75, 192, 92, 1)";
pub const COLOR_GAP: &str = "transparent";

/// Four parallel, equal-length sequences at one-second resolution,
/// derived from a session's observations when it is finalized and
/// consumed immediately by the chart collaborator. Seconds with no
/// real observation get a labeled slot with a missing value, so the
/// rendered time axis stays evenly spaced.
#[derive(Clone, Debug, Default)]
pub struct GapFilledSeries {
    pub labels: Vec<String>,
    pub values: Vec<Option<f64>>,
    pub colors: Vec<&'static str>,
    pub doors: Vec<bool>,
}

impl GapFilledSeries {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn push_observation(&mut self, observation: &Observation) {
        self.labels.push(hh_mm_ss(observation.timestamp));
        self.values.push(Some(observation.speed));
        self.colors
            .push(adherence_color(observation.schedule_offset));
        self.doors.push(observation.doors_open);
    }

    fn push_gap(&mut self, timestamp: i64) {
        self.labels.push(hh_mm_ss(timestamp));
        self.values.push(None);
        self.colors.push(COLOR_GAP);
        self.doors.push(false);
    }
}

/// Schedule-adherence color for a real sample. Offset is signed
/// seconds relative to the timetable, positive = ahead.
pub fn adherence_color(offset_secs: i64) -> &'static str {
    if offset_secs < -180 {
        COLOR_VERY_LATE
    } else if offset_secs < -60 {
        COLOR_LATE
    } else if offset_secs < 60 {
        COLOR_ON_TIME
    } else {
        COLOR_EARLY
    }
}

/// Local clock time label for a whole-second unix timestamp.
pub fn hh_mm_ss(timestamp: i64) -> String {
    match Local.timestamp_opt(timestamp, 0) {
        LocalResult::Single(datetime) => datetime.format("%H:%M:%S").to_string(),
        _ => format!("+{}s", timestamp),
    }
}

/// Build the gap-filled display series from timestamp-ascending
/// observations.
///
/// Every observation contributes its own label/value/color/door slot.
/// When consecutive observations are more than one second apart, one
/// slot per missing second is synthesized strictly in between: derived
/// clock label, missing value, transparent color, doors closed. The
/// final observation is emitted with no trailing synthesis.
pub fn build_series(observations: &[Observation]) -> GapFilledSeries {
    let mut series = GapFilledSeries::default();

    for (index, observation) in observations.iter().enumerate() {
        series.push_observation(observation);

        if let Some(next) = observations.get(index + 1) {
            let mut missing = observation.timestamp + 1;
            while missing < next.timestamp {
                series.push_gap(missing);
                missing += 1;
            }
        }
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(timestamp: i64, speed: f64) -> Observation {
        Observation {
            timestamp,
            latitude: 60.2456,
            longitude: 24.9927,
            speed,
            heading: 90.0,
            acceleration: 0.2,
            schedule_offset: 0,
            gps: true,
            doors_open: false,
        }
    }

    #[test]
    fn test_identity_no_gaps() {
        let observations: Vec<Observation> = (0..5)
            .map(|i| observation(1_710_000_000 + i, i as f64 * 2.0))
            .collect();
        let series = build_series(&observations);

        assert_eq!(series.len(), 5);
        for (index, obs) in observations.iter().enumerate() {
            assert_eq!(series.labels[index], hh_mm_ss(obs.timestamp));
            assert_eq!(series.values[index], Some(obs.speed));
            assert_eq!(series.colors[index], COLOR_ON_TIME);
            assert!(!series.doors[index]);
        }
    }

    #[test]
    fn test_single_second_gap() {
        let observations = vec![
            observation(1, 10.0),
            observation(3, 12.0),
            observation(4, 14.0),
        ];
        let series = build_series(&observations);

        assert_eq!(series.len(), 4);
        assert_eq!(series.values[0], Some(10.0));
        assert_eq!(series.values[1], None);
        assert_eq!(series.colors[1], COLOR_GAP);
        assert_eq!(series.labels[1], hh_mm_ss(2));
        assert_eq!(series.values[2], Some(12.0));
        assert_eq!(series.values[3], Some(14.0));
    }

    #[test]
    fn test_multi_second_gap() {
        let observations = vec![
            observation(1, 10.0),
            observation(7, 12.0),
            observation(8, 14.0),
        ];
        let series = build_series(&observations);

        assert_eq!(series.len(), 8);
        for index in 1..=5 {
            assert_eq!(series.values[index], None, "second {}", index + 1);
            assert_eq!(series.labels[index], hh_mm_ss(1 + index as i64));
        }
        assert_eq!(series.values[6], Some(12.0));
        assert_eq!(series.values[7], Some(14.0));
    }

    #[test]
    fn test_multiple_gaps() {
        let observations = vec![
            observation(1, 10.0),
            observation(5, 12.0),
            observation(6, 14.0),
            observation(9, 16.0),
        ];
        let series = build_series(&observations);

        assert_eq!(series.len(), 9);
        let synthesized: Vec<usize> = series
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect();
        // Missing seconds 2-4 and 7-8.
        assert_eq!(synthesized, vec![1, 2, 3, 6, 7]);
        assert_eq!(series.values[0], Some(10.0));
        assert_eq!(series.values[4], Some(12.0));
        assert_eq!(series.values[5], Some(14.0));
        assert_eq!(series.values[8], Some(16.0));
    }

    #[test]
    fn test_no_trailing_synthesis() {
        let series = build_series(&[observation(10, 5.0)]);
        assert_eq!(series.len(), 1);
        assert_eq!(series.values[0], Some(5.0));
    }

    #[test]
    fn test_door_flag_carried_for_real_samples() {
        let mut open = observation(1, 0.0);
        open.doors_open = true;
        let series = build_series(&[open, observation(4, 3.0)]);

        assert_eq!(series.doors, vec![true, false, false, false]);
    }

    #[test]
    fn test_adherence_color_boundaries() {
        assert_eq!(adherence_color(-181), COLOR_VERY_LATE);
        assert_eq!(adherence_color(-180), COLOR_LATE);
        assert_eq!(adherence_color(-61), COLOR_LATE);
        assert_eq!(adherence_color(-60), COLOR_ON_TIME);
        assert_eq!(adherence_color(0), COLOR_ON_TIME);
        assert_eq!(adherence_color(59), COLOR_ON_TIME);
        assert_eq!(adherence_color(60), COLOR_EARLY);
    }
}
