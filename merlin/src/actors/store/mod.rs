//! Relational store of flight records, one SQLite table keyed by mawb.

mod config;
pub mod message;

use std::io;

pub use config::Config;
use rusqlite::{Connection, OptionalExtension as _, Row, params};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::{
    actors::store::message::{GetMessage, InsertMessage, Message, SaveMessage},
    record::{FlightRecord, Mawb, timestamp},
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flight_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mawb TEXT NOT NULL UNIQUE,
    flight_number TEXT,
    scheduled_arrival_time TEXT,
    actual_arrival_time TEXT,
    flight_origin TEXT,
    flight_destination TEXT,
    pcs_awb INTEGER,
    pcs_received INTEGER,
    gross_weight REAL,
    commodity_type TEXT,
    discrepancy INTEGER NOT NULL DEFAULT 0,
    bt_number TEXT,
    timestamp_start TEXT,
    trolley_staff_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const COLUMNS: &str = "mawb, flight_number, scheduled_arrival_time, actual_arrival_time, \
    flight_origin, flight_destination, pcs_awb, pcs_received, gross_weight, commodity_type, \
    discrepancy, bt_number, timestamp_start, trolley_staff_id, created_at, updated_at";

pub struct Actor {
    conn: Connection,
}

#[async_trait::async_trait]
impl actman::Actor for Actor {
    type Message = Message;

    async fn run(mut self, mut state: actman::State<Self>) {
        loop {
            tokio::select! {
                Some(message) = state.message_receiver.recv() => {
                    self.handle_message(message)
                }
                Some(ctrl) = state.control_receiver.recv() => {
                    match ctrl {
                        actman::Control::Shutdown => {
                            info!("Store actor received shutdown control.");
                            return;
                        },
                    }
                }
                else => {
                    warn!("All channels closed, terminating store actor.");
                    return;
                }
            }
        }
    }
}

impl Actor {
    pub fn new(config: &Config) -> Result<Self, Error> {
        config.create_dirs()?;
        let conn = Connection::open(&config.db_path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened record store at {:?}", config.db_path);
        Ok(Self { conn })
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Get { msg, reply_sender } => self.handle_get_message(msg, reply_sender),
            Message::Insert { msg, reply_sender } => self.handle_insert_message(msg, reply_sender),
            Message::Save { msg, reply_sender } => self.handle_save_message(msg, reply_sender),
            Message::Count { reply_sender } => self.handle_count_message(reply_sender),
        }
    }

    fn handle_get_message(
        &self,
        GetMessage { mawb }: GetMessage,
        reply_sender: oneshot::Sender<Result<Option<FlightRecord>, Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.get(&mawb)
                    .inspect_err(|e| error!("Failed to handle get message: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_insert_message(
        &mut self,
        msg: InsertMessage,
        reply_sender: oneshot::Sender<Result<FlightRecord, Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.handle_insert_message_inner(msg)
                    .inspect_err(|e| error!("Failed to handle insert message: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_insert_message_inner(
        &mut self,
        InsertMessage { record }: InsertMessage,
    ) -> Result<FlightRecord, Error> {
        if self.get(&record.mawb)?.is_some() {
            return Err(Error::Duplicate(record.mawb));
        }
        self.save(record)
    }

    fn handle_save_message(
        &mut self,
        SaveMessage { record }: SaveMessage,
        reply_sender: oneshot::Sender<Result<FlightRecord, Error>>,
    ) {
        let _ = reply_sender
            .send(
                self.save(record)
                    .inspect_err(|e| error!("Failed to handle save message: {e:?}")),
            )
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn handle_count_message(&self, reply_sender: oneshot::Sender<Result<usize, Error>>) {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM flight_records", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count as usize)
            .map_err(Error::from)
            .inspect_err(|e| error!("Failed to count records: {e:?}"));
        let _ = reply_sender
            .send(count)
            .inspect_err(|_| error!("Failed to send reply"));
    }

    fn get(&self, mawb: &Mawb) -> Result<Option<FlightRecord>, Error> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM flight_records WHERE mawb = ?1"),
                params![mawb.as_str()],
                record_from_row,
            )
            .optional()?)
    }

    /// Upserts on mawb. `created_at` is kept from the first insert.
    fn save(&mut self, mut record: FlightRecord) -> Result<FlightRecord, Error> {
        if record.mawb.is_empty() {
            return Err(Error::EmptyMawb);
        }
        let now = timestamp::now();
        record.refresh_discrepancy();
        self.conn.execute(
            &format!(
                "INSERT INTO flight_records ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
                 ON CONFLICT(mawb) DO UPDATE SET
                    flight_number = excluded.flight_number,
                    scheduled_arrival_time = excluded.scheduled_arrival_time,
                    actual_arrival_time = excluded.actual_arrival_time,
                    flight_origin = excluded.flight_origin,
                    flight_destination = excluded.flight_destination,
                    pcs_awb = excluded.pcs_awb,
                    pcs_received = excluded.pcs_received,
                    gross_weight = excluded.gross_weight,
                    commodity_type = excluded.commodity_type,
                    discrepancy = excluded.discrepancy,
                    bt_number = excluded.bt_number,
                    timestamp_start = excluded.timestamp_start,
                    trolley_staff_id = excluded.trolley_staff_id,
                    updated_at = excluded.updated_at"
            ),
            params![
                record.mawb.as_str(),
                record.flight_number,
                record.scheduled_arrival_time.as_ref().map(timestamp::format),
                record.actual_arrival_time.as_ref().map(timestamp::format),
                record.flight_origin,
                record.flight_destination,
                record.pcs_awb,
                record.pcs_received,
                record.gross_weight,
                record.commodity_type,
                record.discrepancy,
                record.bt_number,
                record.timestamp_start.as_ref().map(timestamp::format),
                record.trolley_staff_id,
                timestamp::format(&now),
            ],
        )?;
        debug!("Saved record {}", record.mawb);
        self.get(&record.mawb)?
            .ok_or_else(|| Error::Vanished(record.mawb.clone()))
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FlightRecord> {
    let datetime = |index: usize| -> rusqlite::Result<_> {
        Ok(row
            .get::<_, Option<String>>(index)?
            .as_deref()
            .and_then(timestamp::parse))
    };
    Ok(FlightRecord {
        mawb: row.get::<_, String>(0)?.into(),
        flight_number: row.get(1)?,
        scheduled_arrival_time: datetime(2)?,
        actual_arrival_time: datetime(3)?,
        flight_origin: row.get(4)?,
        flight_destination: row.get(5)?,
        pcs_awb: row.get(6)?,
        pcs_received: row.get(7)?,
        gross_weight: row.get(8)?,
        commodity_type: row.get(9)?,
        discrepancy: row.get(10)?,
        bt_number: row.get(11)?,
        timestamp_start: datetime(12)?,
        trolley_staff_id: row.get(13)?,
        created_at: datetime(14)?,
        updated_at: datetime(15)?,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {message}: {cause}")]
    IO { message: String, cause: io::Error },
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("flight record with this mawb already exists: {0}")]
    Duplicate(Mawb),
    #[error("mawb must not be empty")]
    EmptyMawb,
    #[error("record {0} disappeared right after being saved")]
    Vanished(Mawb),
}
