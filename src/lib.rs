pub mod chart;
pub mod config;
pub mod feed;
pub mod registry;
pub mod report;
pub mod series;
pub mod sinks;
pub mod telemetry;

pub use registry::{Observation, Session, SessionKey, SessionRegistry};
pub use series::{build_series, GapFilledSeries};
pub use telemetry::{EventKind, TelemetryEvent};
