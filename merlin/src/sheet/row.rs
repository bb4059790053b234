//! Conversion between [`SheetRow`] and the 17 string cells of a worksheet row.

use chrono::NaiveDateTime;
use tracing::warn;

use crate::{
    record::{FlightRecord, Mawb, timestamp},
    sheet::{COLUMN_COUNT, column},
};

/// One data row of the dashboard worksheet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetRow {
    pub flight_number: Option<String>,
    pub scheduled_arrival_time: Option<NaiveDateTime>,
    pub actual_arrival_time: Option<NaiveDateTime>,
    pub mawb: Mawb,
    pub flight_origin: Option<String>,
    pub flight_destination: Option<String>,
    pub pcs_awb: Option<i64>,
    pub gross_weight: Option<f64>,
    pub commodity_type: Option<String>,
    pub bt_number: Option<String>,
    pub timestamp_handover: Option<NaiveDateTime>,
    pub trolley_staff_id: Option<String>,
    pub pcs_received: Option<i64>,
    pub discrepancy: bool,
    pub checker_id: Option<String>,
    pub team_name: Option<String>,
    pub breakdown_timestamp: Option<NaiveDateTime>,
}

impl SheetRow {
    /// Decodes a row of cells. Unparsable cells degrade to `None`.
    pub fn from_cells(cells: &[String]) -> Self {
        let cell = |index: usize| cells.get(index).map(String::as_str).unwrap_or("");
        Self {
            flight_number: text(cell(column::FLIGHT_NUMBER)),
            scheduled_arrival_time: datetime(
                cell(column::SCHEDULED_ARRIVAL_TIME),
                "Scheduled Arrival Time",
            ),
            actual_arrival_time: datetime(cell(column::ACTUAL_ARRIVAL_TIME), "Actual Arrival Time"),
            mawb: cell(column::MAWB).trim().into(),
            flight_origin: text(cell(column::FLIGHT_ORIGIN)),
            flight_destination: text(cell(column::FLIGHT_DESTINATION)),
            pcs_awb: integer(cell(column::PCS_AWB), "No. of Pcs (AWB)"),
            gross_weight: float(cell(column::GROSS_WEIGHT), "Gross Weight"),
            commodity_type: text(cell(column::COMMODITY_TYPE)),
            bt_number: text(cell(column::BT_NUMBER)),
            timestamp_handover: datetime(cell(column::TIMESTAMP_HANDOVER), "Timestamp Handover"),
            trolley_staff_id: text(cell(column::TROLLEY_STAFF_ID)),
            pcs_received: integer(cell(column::PCS_RECEIVED), "No. of Pcs (Received)"),
            discrepancy: cell(column::DISCREPANCY).trim() == DISCREPANCY_YES,
            checker_id: text(cell(column::CHECKER_ID)),
            team_name: text(cell(column::TEAM_NAME)),
            breakdown_timestamp: datetime(
                cell(column::BREAKDOWN_TIMESTAMP),
                "Timestamp Breakdown (CPCS)",
            ),
        }
    }

    pub fn to_cells(&self) -> Vec<String> {
        let mut cells = vec![String::new(); COLUMN_COUNT];
        cells[column::FLIGHT_NUMBER] = opt_text(&self.flight_number);
        cells[column::SCHEDULED_ARRIVAL_TIME] = opt_datetime(&self.scheduled_arrival_time);
        cells[column::ACTUAL_ARRIVAL_TIME] = opt_datetime(&self.actual_arrival_time);
        cells[column::MAWB] = self.mawb.as_str().to_string();
        cells[column::FLIGHT_ORIGIN] = opt_text(&self.flight_origin);
        cells[column::FLIGHT_DESTINATION] = opt_text(&self.flight_destination);
        cells[column::PCS_AWB] = opt_number(&self.pcs_awb);
        cells[column::GROSS_WEIGHT] = opt_number(&self.gross_weight);
        cells[column::COMMODITY_TYPE] = opt_text(&self.commodity_type);
        cells[column::BT_NUMBER] = opt_text(&self.bt_number);
        cells[column::TIMESTAMP_HANDOVER] = opt_datetime(&self.timestamp_handover);
        cells[column::TROLLEY_STAFF_ID] = opt_text(&self.trolley_staff_id);
        cells[column::PCS_RECEIVED] = opt_number(&self.pcs_received);
        cells[column::DISCREPANCY] = discrepancy_cell(self.discrepancy).to_string();
        cells[column::CHECKER_ID] = opt_text(&self.checker_id);
        cells[column::TEAM_NAME] = opt_text(&self.team_name);
        cells[column::BREAKDOWN_TIMESTAMP] = opt_datetime(&self.breakdown_timestamp);
        cells
    }

    /// Synthesizes a relational row from an orphan sheet row.
    pub fn to_record(&self) -> FlightRecord {
        let mut record = FlightRecord {
            mawb: self.mawb.clone(),
            flight_number: self.flight_number.clone(),
            scheduled_arrival_time: self.scheduled_arrival_time,
            actual_arrival_time: self.actual_arrival_time,
            flight_origin: self.flight_origin.clone(),
            flight_destination: self.flight_destination.clone(),
            pcs_awb: self.pcs_awb,
            pcs_received: self.pcs_received,
            gross_weight: self.gross_weight,
            commodity_type: self.commodity_type.clone(),
            discrepancy: false,
            bt_number: self.bt_number.clone(),
            timestamp_start: self.timestamp_handover,
            trolley_staff_id: self.trolley_staff_id.clone(),
            created_at: None,
            updated_at: None,
        };
        record.refresh_discrepancy();
        record
    }
}

pub const DISCREPANCY_YES: &str = "Yes";
pub const DISCREPANCY_NO: &str = "No";

pub fn discrepancy_cell(discrepancy: bool) -> &'static str {
    if discrepancy {
        DISCREPANCY_YES
    } else {
        DISCREPANCY_NO
    }
}

fn text(cell: &str) -> Option<String> {
    let cell = cell.trim();
    (!cell.is_empty()).then(|| cell.to_string())
}

fn integer(cell: &str, header: &str) -> Option<i64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    // Sheets may hand back a whole number rendered as "12.0".
    cell.parse::<i64>()
        .ok()
        .or_else(|| {
            cell.parse::<f64>()
                .ok()
                .filter(|value| value.fract() == 0.0)
                // 2^63 itself would saturate to i64::MAX.
                .filter(|value| (i64::MIN as f64..i64::MAX as f64).contains(value))
                .map(|value| value as i64)
        })
        .or_else(|| {
            warn!("could not parse {header}: {cell:?}");
            None
        })
}

fn float(cell: &str, header: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().or_else(|| {
        warn!("could not parse {header}: {cell:?}");
        None
    })
}

fn datetime(cell: &str, header: &str) -> Option<NaiveDateTime> {
    if cell.trim().is_empty() {
        return None;
    }
    timestamp::parse(cell).or_else(|| {
        warn!("could not parse {header}: {cell:?}");
        None
    })
}

fn opt_text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn opt_number<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn opt_datetime(value: &Option<NaiveDateTime>) -> String {
    value.as_ref().map(timestamp::format).unwrap_or_default()
}
