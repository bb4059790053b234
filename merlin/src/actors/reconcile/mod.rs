//! Keeps the record store and the spreadsheet mirror in step.
//!
//! All operations of one process go through this actor, so they never
//! interleave. Writers in other processes still race with it on the sheet;
//! the last write wins.

pub mod merge;
pub mod message;

use std::{collections::HashSet, sync::Arc, time::Duration};

use actman::Handle;
use rand::{SeedableRng as _, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::{
    actors::{
        reconcile::{
            merge::{Merged, PartialUpdate},
            message::{
                CreateMessage, MawbsByFlightMessage, Message, PopulateMessage, ReconcileMessage,
                SuggestField, SuggestMessage,
            },
        },
        store::{
            self,
            message::{GetMessage, InsertMessage, SaveMessage},
        },
    },
    command::Status,
    feeds,
    record::{FlightRecord, Mawb, timestamp},
    sheet::{
        self, Color, HEADER_ROWS, SheetRow, Spreadsheet, column,
        row::DISCREPANCY_YES,
    },
};

pub const DEFAULT_POPULATE_COUNT: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pause between appended rows while populating, to stay under the
    /// spreadsheet's write quota.
    #[serde(with = "humantime_serde")]
    pub populate_throttle: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            populate_throttle: Duration::from_millis(250),
        }
    }
}

/// Outcome of the spreadsheet half of an operation whose store half
/// committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SheetSync {
    Synced,
    /// The stores may now disagree until the next successful write.
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciled {
    pub record: FlightRecord,
    pub sheet: SheetSync,
}

pub struct Actor {
    config: Config,
    store_handle: Handle<store::Actor>,
    sheet: Arc<dyn Spreadsheet>,
    rng: StdRng,
}

#[async_trait::async_trait]
impl actman::Actor for Actor {
    type Message = Message;

    async fn run(mut self, mut state: actman::State<Self>) {
        loop {
            tokio::select! {
                Some(message) = state.message_receiver.recv() => {
                    self.handle_message(message).await
                }
                Some(ctrl) = state.control_receiver.recv() => {
                    match ctrl {
                        actman::Control::Shutdown => {
                            info!("Reconcile actor received shutdown control.");
                            return;
                        },
                    }
                }
                else => {
                    warn!("All channels closed, terminating reconcile actor.");
                    return;
                }
            }
        }
    }
}

impl Actor {
    pub fn new(
        config: &Config,
        store_handle: Handle<store::Actor>,
        sheet: Arc<dyn Spreadsheet>,
    ) -> Self {
        Self {
            config: config.clone(),
            store_handle,
            sheet,
            rng: StdRng::from_entropy(),
        }
    }

    async fn handle_message(&mut self, message: Message) {
        match message {
            Message::Reconcile { msg, reply_sender } => {
                let result = self
                    .handle_reconcile_message(msg)
                    .await
                    .inspect_err(|e| error!("Failed to handle reconcile message: {e}"));
                reply(reply_sender, result);
            }
            Message::Create { msg, reply_sender } => {
                let result = self
                    .handle_create_message(msg)
                    .await
                    .inspect_err(|e| error!("Failed to handle create message: {e}"));
                reply(reply_sender, result);
            }
            Message::MergeFeeds { reply_sender } => {
                let result = self
                    .handle_merge_feeds_message()
                    .await
                    .inspect_err(|e| error!("Failed to merge feeds: {e}"));
                reply(reply_sender, result);
            }
            Message::Suggest { msg, reply_sender } => {
                let result = self
                    .handle_suggest_message(msg)
                    .await
                    .inspect_err(|e| error!("Failed to handle suggest message: {e}"));
                reply(reply_sender, result);
            }
            Message::MawbsByFlight { msg, reply_sender } => {
                let result = self
                    .handle_mawbs_by_flight_message(msg)
                    .await
                    .inspect_err(|e| error!("Failed to handle mawbs-by-flight message: {e}"));
                reply(reply_sender, result);
            }
            Message::Populate { msg, reply_sender } => {
                let result = self
                    .handle_populate_message(msg)
                    .await
                    .inspect_err(|e| error!("Failed to populate sheet: {e}"));
                reply(reply_sender, result);
            }
            Message::Status { reply_sender } => {
                let result = self
                    .handle_status_message()
                    .await
                    .inspect_err(|e| error!("Failed to collect status: {e}"));
                reply(reply_sender, result);
            }
        }
    }

    async fn handle_reconcile_message(
        &mut self,
        ReconcileMessage { mawb, update }: ReconcileMessage,
    ) -> Result<Reconciled, Error> {
        let mawb: Mawb = mawb.as_str().trim().into();
        if mawb.is_empty() {
            return Err(Error::Validation("mawb is required".to_string()));
        }
        let update = update.normalized();

        let stored = self
            .store_request::<Option<FlightRecord>>(GetMessage { mawb: mawb.clone() }.into())
            .await?;

        let values = match self.sheet.values().await {
            Ok(values) => Ok(values),
            // Without the stored row the sheet is the only place left to look.
            Err(e) if stored.is_none() => return Err(e.into()),
            Err(e) => Err(e),
        };
        let existing = values
            .as_ref()
            .ok()
            .and_then(|values| find_row(values, &mawb));

        let base = match (stored, &existing) {
            (Some(record), _) => record,
            (None, Some((row_index, row))) => {
                info!("Materializing {mawb} from orphan sheet row {row_index}");
                row.to_record()
            }
            (None, None) => return Err(Error::NotFound(mawb)),
        };

        let Merged { record, row } = merge::merge(
            base,
            existing.as_ref().map(|(_, row)| row),
            &update,
            timestamp::now(),
        );
        let record = self
            .store_request::<FlightRecord>(SaveMessage { record }.into())
            .await?;
        info!(
            "Saved {} (pcs_received: {:?}, bt_number: {:?}, discrepancy: {})",
            record.mawb, record.pcs_received, record.bt_number, record.discrepancy
        );

        let sheet = match values {
            Ok(_) => {
                let row_index = existing.map(|(row_index, _)| row_index);
                self.sync_row(row_index, &row).await
            }
            Err(e) => {
                error!("Skipping sheet write for {mawb}: sheet could not be read: {e}");
                SheetSync::Degraded {
                    reason: e.to_string(),
                }
            }
        };
        Ok(Reconciled { record, sheet })
    }

    async fn handle_create_message(
        &mut self,
        CreateMessage { record }: CreateMessage,
    ) -> Result<Reconciled, Error> {
        if record.mawb.is_empty() {
            return Err(Error::Validation("mawb is required".to_string()));
        }
        let mawb = record.mawb.clone();
        match self
            .store_request::<FlightRecord>(InsertMessage { record }.into())
            .await
        {
            Ok(record) => info!("Created record {}", record.mawb),
            Err(store::Error::Duplicate(_)) => {
                return Err(Error::Validation(
                    "flight record with this mawb already exists.".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }
        self.handle_reconcile_message(ReconcileMessage {
            mawb,
            update: PartialUpdate::default(),
        })
        .await
    }

    async fn handle_merge_feeds_message(&mut self) -> Result<Reconciled, Error> {
        let now = timestamp::now();
        let flight = feeds::redwatch(&mut self.rng, now);
        let manifest = feeds::smartkargo(&mut self.rng, now);
        info!(
            "Merging feeds: flight {} with manifest {}",
            flight.flight_number, manifest.mawb
        );
        self.handle_create_message(CreateMessage {
            record: feeds::merge(flight, manifest),
        })
        .await
    }

    async fn handle_suggest_message(
        &self,
        SuggestMessage { field, query }: SuggestMessage,
    ) -> Result<Vec<String>, Error> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(vec![]);
        }
        let column = match field {
            SuggestField::Mawb => column::MAWB,
            SuggestField::FlightNumber => column::FLIGHT_NUMBER,
        };

        let values = self.sheet.values().await?;
        let mut seen = HashSet::new();
        Ok(data_rows(&values)
            .filter_map(|(_, cells)| cells.get(column))
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty() && cell.to_lowercase().contains(&query))
            .filter(|cell| seen.insert(cell.to_string()))
            .map(str::to_string)
            .collect())
    }

    async fn handle_mawbs_by_flight_message(
        &self,
        MawbsByFlightMessage { flight }: MawbsByFlightMessage,
    ) -> Result<Vec<Mawb>, Error> {
        let flight = flight.trim();
        if flight.is_empty() {
            return Ok(vec![]);
        }
        let values = self.sheet.values().await?;
        Ok(data_rows(&values)
            .filter(|(_, cells)| {
                cells
                    .get(column::FLIGHT_NUMBER)
                    .is_some_and(|cell| cell.trim() == flight)
            })
            .filter_map(|(_, cells)| cells.get(column::MAWB))
            .map(|cell| Mawb::from(cell.trim()))
            .filter(|mawb| !mawb.is_empty())
            .collect())
    }

    async fn handle_populate_message(
        &mut self,
        PopulateMessage { count }: PopulateMessage,
    ) -> Result<usize, Error> {
        self.sheet.clear_data_rows().await?;
        info!("Cleared sheet data rows, populating {count} dummy rows");
        for i in 0..count {
            if i > 0 && !self.config.populate_throttle.is_zero() {
                tokio::time::sleep(self.config.populate_throttle).await;
            }
            let row = feeds::dummy_row(&mut self.rng, timestamp::now());
            self.sheet.append_row(row.to_cells()).await?;
            info!(
                "Added dummy row {} (pcs_awb: {:?})",
                row.mawb, row.pcs_awb
            );
        }
        Ok(count)
    }

    async fn handle_status_message(&self) -> Result<Status, Error> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.store_handle
            .send(store::message::Message::Count { reply_sender })
            .await;
        let record_count = reply_receiver.await.expect("store actor must exist")?;
        Ok(Status {
            record_count,
            sheet_connected: self.sheet.is_connected().await,
        })
    }

    async fn store_request<T>(
        &self,
        (message, reply_receiver): (
            store::message::Message,
            oneshot::Receiver<Result<T, store::Error>>,
        ),
    ) -> Result<T, store::Error> {
        self.store_handle.send(message).await;
        reply_receiver.await.expect("store actor must exist")
    }

    /// Writes the row in place (or appends it) and recolors the sheet.
    /// Failures are reported, not returned: the store write already
    /// committed.
    async fn sync_row(&self, row_index: Option<usize>, row: &SheetRow) -> SheetSync {
        let result = async {
            match row_index {
                Some(row_index) => {
                    self.sheet.update_row(row_index, row.to_cells()).await?;
                    info!("Updated sheet row {row_index} for {}", row.mawb);
                }
                None => {
                    self.sheet.append_row(row.to_cells()).await?;
                    info!("Appended sheet row for {}", row.mawb);
                }
            }
            self.recolor().await
        }
        .await;
        match result {
            Ok(()) => SheetSync::Synced,
            Err(e) => {
                error!("Sheet is out of step for {}: {e}", row.mawb);
                SheetSync::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Paints every data row red or white by its discrepancy cell.
    async fn recolor(&self) -> Result<(), sheet::Error> {
        let values = self.sheet.values().await?;
        let backgrounds: Vec<(usize, Color)> = data_rows(&values)
            .map(|(row_index, cells)| {
                let discrepant = cells
                    .get(column::DISCREPANCY)
                    .is_some_and(|cell| cell.trim() == DISCREPANCY_YES);
                let color = if discrepant {
                    Color::DISCREPANCY_RED
                } else {
                    Color::WHITE
                };
                (row_index, color)
            })
            .collect();
        let red = backgrounds
            .iter()
            .filter(|(_, color)| *color == Color::DISCREPANCY_RED)
            .count();
        let total = backgrounds.len();
        self.sheet.set_row_backgrounds(backgrounds).await?;
        info!("Recolored {total} sheet rows ({red} with discrepancy)");
        Ok(())
    }
}

/// Data rows with their 1-based sheet row index.
fn data_rows(values: &[Vec<String>]) -> impl Iterator<Item = (usize, &Vec<String>)> {
    values
        .iter()
        .enumerate()
        .skip(HEADER_ROWS)
        .map(|(i, cells)| (i + 1, cells))
}

fn find_row(values: &[Vec<String>], mawb: &Mawb) -> Option<(usize, SheetRow)> {
    data_rows(values)
        .find(|(_, cells)| {
            cells
                .get(column::MAWB)
                .is_some_and(|cell| cell.trim() == mawb.as_str())
        })
        .map(|(row_index, cells)| (row_index, SheetRow::from_cells(cells)))
}

fn reply<T>(reply_sender: oneshot::Sender<Result<T, Error>>, result: Result<T, Error>) {
    let _ = reply_sender
        .send(result)
        .inspect_err(|_| error!("Failed to send reply"));
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("MAWB {0} not found in records")]
    NotFound(Mawb),
    #[error("Spreadsheet error: {0}")]
    Sheet(#[from] sheet::Error),
    #[error("Store error: {0}")]
    Store(#[from] store::Error),
}

#[cfg(test)]
mod tests {
    use actman::Runner;
    use tempfile::TempDir;

    use super::*;
    use crate::sheet::MemorySheet;

    struct Fixture {
        runner: Runner,
        handle: Handle<Actor>,
        sheet: Arc<MemorySheet>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut runner = Runner::new();
        let store_handle = runner.run(
            store::Actor::new(&store::Config {
                db_path: dir.path().join("merlin.sqlite3"),
            })
            .unwrap(),
        );
        let sheet = Arc::new(MemorySheet::new());
        let handle = runner.run(Actor::new(
            &Config {
                populate_throttle: Duration::ZERO,
            },
            store_handle,
            sheet.clone(),
        ));
        Fixture {
            runner,
            handle,
            sheet,
            _dir: dir,
        }
    }

    async fn request<T>(
        handle: &Handle<Actor>,
        (message, reply_receiver): (Message, oneshot::Receiver<Result<T, Error>>),
    ) -> Result<T, Error> {
        handle.send(message).await;
        reply_receiver.await.unwrap()
    }

    fn sheet_row(flight: &str, mawb: &str) -> Vec<String> {
        SheetRow {
            flight_number: Some(flight.into()),
            mawb: mawb.into(),
            pcs_awb: Some(10),
            ..SheetRow::default()
        }
        .to_cells()
    }

    #[test_log::test(tokio::test)]
    async fn create_rejects_duplicate_mawb() {
        let fixture = fixture();
        let record = FlightRecord {
            pcs_awb: Some(10),
            ..FlightRecord::new("MAWB1000".into())
        };

        let created = request(
            &fixture.handle,
            CreateMessage {
                record: record.clone(),
            }
            .into(),
        )
        .await
        .unwrap();
        assert_eq!(created.sheet, SheetSync::Synced);
        assert_eq!(fixture.sheet.data_row_count(), 1);
        assert_eq!(fixture.sheet.background(3), Some(Color::WHITE));

        let Error::Validation(message) =
            request(&fixture.handle, CreateMessage { record }.into())
                .await
                .unwrap_err()
        else {
            panic!("expected a validation error");
        };
        assert_eq!(message, "flight record with this mawb already exists.");
        assert_eq!(fixture.sheet.data_row_count(), 1);

        fixture.runner.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn merge_feeds_mirrors_new_record() {
        let fixture = fixture();
        let (reply_sender, reply_receiver) = oneshot::channel();
        fixture
            .handle
            .send(Message::MergeFeeds { reply_sender })
            .await;
        let reconciled = reply_receiver.await.unwrap().unwrap();
        assert!(reconciled.record.flight_number.unwrap().starts_with("RW"));
        assert_eq!(reconciled.record.pcs_received, None);

        let row = SheetRow::from_cells(&fixture.sheet.row(3).unwrap());
        assert_eq!(row.mawb, reconciled.record.mawb);
        assert!(!row.discrepancy);

        fixture.runner.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn suggestions_are_deduplicated_substring_matches() {
        let fixture = fixture();
        fixture.sheet.push_row(sheet_row("SQ321", "MAWB1001"));
        fixture.sheet.push_row(sheet_row("SQ321", "MAWB1002"));
        fixture.sheet.push_row(sheet_row("CX100", "mawb2001"));

        let mut flights = request(
            &fixture.handle,
            SuggestMessage {
                field: SuggestField::FlightNumber,
                query: "sq3".into(),
            }
            .into(),
        )
        .await
        .unwrap();
        flights.sort();
        assert_eq!(flights, vec!["SQ321".to_string()]);

        let mut mawbs = request(
            &fixture.handle,
            SuggestMessage {
                field: SuggestField::Mawb,
                query: "MAWB".into(),
            }
            .into(),
        )
        .await
        .unwrap();
        mawbs.sort();
        assert_eq!(mawbs, vec!["MAWB1001", "MAWB1002", "mawb2001"]);

        // Header cells never match.
        let headers = request(
            &fixture.handle,
            SuggestMessage {
                field: SuggestField::Mawb,
                query: "MAWB".into(),
            }
            .into(),
        )
        .await
        .unwrap();
        assert!(!headers.contains(&"MAWB".to_string()));

        let reads = fixture.sheet.read_count();
        let empty = request(
            &fixture.handle,
            SuggestMessage {
                field: SuggestField::Mawb,
                query: "   ".into(),
            }
            .into(),
        )
        .await
        .unwrap();
        assert!(empty.is_empty());
        assert_eq!(fixture.sheet.read_count(), reads);

        fixture.runner.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn mawbs_by_flight_in_sheet_order() {
        let fixture = fixture();
        fixture.sheet.push_row(sheet_row("SQ321", "MAWB1002"));
        fixture.sheet.push_row(sheet_row("SQ3210", "MAWB9999"));
        fixture.sheet.push_row(sheet_row("SQ321", "MAWB1001"));

        let mawbs = request(
            &fixture.handle,
            MawbsByFlightMessage {
                flight: "SQ321".into(),
            }
            .into(),
        )
        .await
        .unwrap();
        assert_eq!(mawbs, vec![Mawb::from("MAWB1002"), Mawb::from("MAWB1001")]);

        fixture.runner.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn populate_replaces_data_rows() {
        let fixture = fixture();
        fixture.sheet.push_row(sheet_row("SQ321", "MAWB1001"));

        let count = request(&fixture.handle, PopulateMessage { count: 5 }.into())
            .await
            .unwrap();
        assert_eq!(count, 5);
        assert_eq!(fixture.sheet.data_row_count(), 5);
        for row_index in 3..8 {
            let row = SheetRow::from_cells(&fixture.sheet.row(row_index).unwrap());
            assert_ne!(row.mawb, "MAWB1001");
            assert_eq!(row.pcs_received, None);
            assert!(!row.discrepancy);
        }
        assert_eq!(fixture.sheet.values().await.unwrap()[1], sheet::column_row());

        fixture.runner.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn status_counts_records() {
        let fixture = fixture();
        let (reply_sender, reply_receiver) = oneshot::channel();
        fixture.handle.send(Message::Status { reply_sender }).await;
        let status = reply_receiver.await.unwrap().unwrap();
        assert_eq!(status.record_count, 0);
        assert!(status.sheet_connected);

        fixture.runner.shutdown().await;
    }
}
