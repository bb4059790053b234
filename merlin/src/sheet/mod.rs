//! The spreadsheet mirror: a 17-column worksheet with a two-row header.

pub mod google;
pub mod memory;
pub mod row;

use serde::{Deserialize, Serialize};

pub use crate::sheet::{google::GoogleSheets, memory::MemorySheet, row::SheetRow};

pub const COLUMN_COUNT: usize = 17;
/// Rows 1 and 2 hold the headers; data starts at row 3 (1-based).
pub const HEADER_ROWS: usize = 2;
pub const FIRST_DATA_ROW: usize = HEADER_ROWS + 1;
pub const LAST_COLUMN: char = 'Q';

pub const COLUMN_HEADERS: [&str; COLUMN_COUNT] = [
    "Flight #",
    "Scheduled Arrival Time",
    "Actual Arrival Time",
    "MAWB",
    "Flight Origin",
    "Flight Destination",
    "No. of Pcs (AWB)",
    "Gross Weight",
    "Commodity Type",
    "BT Number",
    "Timestamp Handover",
    "Trolley Staff ID",
    "No. of Pcs (Received)",
    "Discrepancy",
    "Checker ID",
    "Team Name",
    "Timestamp Breakdown (CPCS)",
];

/// Category headers of row 1 and the 0-based, end-exclusive column span each
/// one is merged over.
pub const CATEGORY_HEADERS: [(&str, usize, usize); 3] = [
    ("AWB Information", column::FLIGHT_NUMBER, column::BT_NUMBER),
    ("Towing", column::BT_NUMBER, column::PCS_RECEIVED),
    ("Breakdown", column::PCS_RECEIVED, COLUMN_COUNT),
];

pub mod column {
    pub const FLIGHT_NUMBER: usize = 0;
    pub const SCHEDULED_ARRIVAL_TIME: usize = 1;
    pub const ACTUAL_ARRIVAL_TIME: usize = 2;
    pub const MAWB: usize = 3;
    pub const FLIGHT_ORIGIN: usize = 4;
    pub const FLIGHT_DESTINATION: usize = 5;
    pub const PCS_AWB: usize = 6;
    pub const GROSS_WEIGHT: usize = 7;
    pub const COMMODITY_TYPE: usize = 8;
    pub const BT_NUMBER: usize = 9;
    pub const TIMESTAMP_HANDOVER: usize = 10;
    pub const TROLLEY_STAFF_ID: usize = 11;
    pub const PCS_RECEIVED: usize = 12;
    pub const DISCREPANCY: usize = 13;
    pub const CHECKER_ID: usize = 14;
    pub const TEAM_NAME: usize = 15;
    pub const BREAKDOWN_TIMESTAMP: usize = 16;
}

/// Cell contents of row 1.
pub fn category_row() -> Vec<String> {
    let mut cells = vec![String::new(); COLUMN_COUNT];
    for (title, start, _) in CATEGORY_HEADERS {
        cells[start] = title.to_string();
    }
    cells
}

pub fn column_row() -> Vec<String> {
    COLUMN_HEADERS.iter().map(|header| header.to_string()).collect()
}

/// Whether the first two rows already carry the expected headers.
pub fn has_layout(values: &[Vec<String>]) -> bool {
    let matches = |row: Option<&Vec<String>>, expected: Vec<String>| {
        row.is_some_and(|row| {
            expected
                .iter()
                .enumerate()
                .all(|(i, cell)| row.get(i).map(String::as_str).unwrap_or("") == cell)
        })
    };
    matches(values.first(), category_row()) && matches(values.get(1), column_row())
}

/// A1 range of a whole data row, e.g. `A3:Q3`.
pub fn row_range(row_index: usize) -> String {
    format!("A{row_index}:{LAST_COLUMN}{row_index}")
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl Color {
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);
    pub const DISCREPANCY_RED: Self = Self::rgb(1.0, 0.8, 0.8);
    pub const CATEGORY_GREY: Self = Self::rgb(0.9, 0.9, 0.9);
    pub const HEADER_GREY: Self = Self::rgb(0.95, 0.95, 0.95);

    pub const fn rgb(red: f32, green: f32, blue: f32) -> Self {
        Self { red, green, blue }
    }
}

/// Operations the reconciler needs from a worksheet.
///
/// Row indexes are 1-based like A1 notation, so the first data row is
/// [`FIRST_DATA_ROW`].
#[async_trait::async_trait]
pub trait Spreadsheet: Send + Sync {
    /// All cell values including the two header rows.
    async fn values(&self) -> Result<Vec<Vec<String>>, Error>;

    async fn update_row(&self, row_index: usize, cells: Vec<String>) -> Result<(), Error>;

    async fn append_row(&self, cells: Vec<String>) -> Result<(), Error>;

    /// Sets the background of whole rows, one request for all of them.
    async fn set_row_backgrounds(&self, rows: Vec<(usize, Color)>) -> Result<(), Error>;

    /// Deletes every data row and keeps the headers.
    async fn clear_data_rows(&self) -> Result<(), Error>;

    /// Whether a session with the backing service is currently established.
    async fn is_connected(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Spreadsheet request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Spreadsheet responded {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Spreadsheet rejected the credentials: {0}")]
    Unauthorized(String),
    #[error("Unexpected spreadsheet response: {0}")]
    Parse(String),
    #[error("No access token: {0}")]
    MissingToken(String),
    #[error("IO error: {message}: {cause}")]
    IO {
        message: String,
        cause: std::io::Error,
    },
    #[error("Spreadsheet unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Whether the session should be discarded and re-established.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Unauthorized(_) | Self::MissingToken(_) | Self::IO { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rows() {
        let categories = category_row();
        assert_eq!(categories[0], "AWB Information");
        assert_eq!(categories[column::BT_NUMBER], "Towing");
        assert_eq!(categories[column::PCS_RECEIVED], "Breakdown");
        assert_eq!(categories.iter().filter(|c| !c.is_empty()).count(), 3);

        let columns = column_row();
        assert_eq!(columns[column::MAWB], "MAWB");
        assert_eq!(columns[column::DISCREPANCY], "Discrepancy");
        assert_eq!(columns[column::BREAKDOWN_TIMESTAMP], "Timestamp Breakdown (CPCS)");
    }

    #[test]
    fn layout_detection() {
        assert!(!has_layout(&[]));
        assert!(has_layout(&[category_row(), column_row()]));
        let mut stale = column_row();
        stale.truncate(12);
        assert!(!has_layout(&[category_row(), stale]));
    }

    #[test]
    fn ranges() {
        assert_eq!(row_range(3), "A3:Q3");
        assert_eq!(row_range(120), "A120:Q120");
    }
}
