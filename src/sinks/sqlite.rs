use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{ReportPayload, ReportSink};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS buses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    line TEXT NOT NULL,
    operator_code INTEGER NOT NULL,
    operator_name TEXT NOT NULL,
    vehicle_number INTEGER NOT NULL,
    start_time TEXT,
    observation_count INTEGER NOT NULL,
    max_speed_kph REAL NOT NULL,
    first_observed_at INTEGER,
    last_observed_at INTEGER,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bus_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    speed_kph REAL NOT NULL,
    direction REAL NOT NULL,
    acceleration REAL NOT NULL,
    offset_from_schedule INTEGER NOT NULL,
    gps INTEGER NOT NULL,
    doors_open INTEGER NOT NULL,
    FOREIGN KEY (bus_id) REFERENCES buses(id) ON DELETE CASCADE
);
";

struct SqliteState {
    init_attempted: bool,
    connection: Option<Connection>,
}

/// Embedded structured storage: one summary row per finalized session
/// and one detail row per observation. Open and write failures are
/// logged and swallowed; this sink never fails a finalization.
pub struct SqliteSink {
    db_path: PathBuf,
    state: Mutex<SqliteState>,
}

impl SqliteSink {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        SqliteSink {
            db_path: db_path.as_ref().to_path_buf(),
            state: Mutex::new(SqliteState {
                init_attempted: false,
                connection: None,
            }),
        }
    }

    /// Open the database on first use. Attempted once; a failed open
    /// turns every later delivery into a logged no-op.
    fn ensure_init(&self, state: &mut SqliteState) {
        if state.init_attempted {
            return;
        }
        state.init_attempted = true;

        match self.open_database() {
            Ok(connection) => {
                info!("sqlite sink opened {}", self.db_path.display());
                state.connection = Some(connection);
            }
            Err(open_error) => {
                error!(
                    "sqlite sink failed to open {}: {:#}",
                    self.db_path.display(),
                    open_error
                );
            }
        }
    }

    fn open_database(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let connection = Connection::open(&self.db_path)?;
        connection.pragma_update(None, "journal_mode", "DELETE")?;
        connection.pragma_update(None, "synchronous", "NORMAL")?;
        connection.execute_batch(SCHEMA)?;
        Ok(connection)
    }

    fn persist(connection: &mut Connection, payload: &ReportPayload) -> rusqlite::Result<()> {
        let session = &payload.session;
        let max_speed = session
            .max_speed_observation()
            .map(|o| o.speed)
            .unwrap_or(0.0);

        let tx = connection.transaction()?;
        tx.execute(
            "INSERT INTO buses (
                line, operator_code, operator_name, vehicle_number, start_time,
                observation_count, max_speed_kph, first_observed_at, last_observed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.line,
                session.key.operator,
                session.operator_name,
                session.key.vehicle,
                session.start_time,
                session.observations.len() as i64,
                max_speed,
                session.observations.first().map(|o| o.timestamp),
                session.last_timestamp(),
            ],
        )?;
        let bus_id = tx.last_insert_rowid();

        for observation in &session.observations {
            tx.execute(
                "INSERT INTO observations (
                    bus_id, timestamp, latitude, longitude, speed_kph, direction,
                    acceleration, offset_from_schedule, gps, doors_open
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    bus_id,
                    observation.timestamp,
                    observation.latitude,
                    observation.longitude,
                    observation.speed,
                    observation.heading,
                    observation.acceleration,
                    observation.schedule_offset,
                    observation.gps,
                    observation.doors_open,
                ],
            )?;
        }
        tx.commit()
    }
}

#[async_trait]
impl ReportSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn deliver(&self, payload: &ReportPayload) -> Result<()> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.ensure_init(&mut state);

        if let Some(connection) = state.connection.as_mut() {
            if let Err(write_error) = Self::persist(connection, payload) {
                error!("sqlite sink failed to persist data: {}", write_error);
            }
        }
        Ok(())
    }
}
