//! Field-group merge of a partial update against the stored record and the
//! existing sheet row.
//!
//! Each writer owns a disjoint group of fields (checker: received pieces and
//! checker identity, trolley staff: towing, feeds: AWB information). A group
//! the update does not carry is carried over from where it already lives.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{record::FlightRecord, sheet::SheetRow};

/// Fields an update may carry. `None` and empty strings mean "not carried".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialUpdate {
    #[serde(default)]
    pub pcs_received: Option<i64>,
    #[serde(default)]
    pub bt_number: Option<String>,
    #[serde(default)]
    pub timestamp_start: Option<NaiveDateTime>,
    #[serde(default)]
    pub trolley_staff_id: Option<String>,
    #[serde(default)]
    pub checker_id: Option<String>,
    #[serde(default)]
    pub team_name: Option<String>,
}

impl PartialUpdate {
    pub fn received(pcs_received: i64) -> Self {
        Self {
            pcs_received: Some(pcs_received),
            ..Default::default()
        }
    }

    pub fn towing(
        bt_number: impl Into<String>,
        timestamp_start: NaiveDateTime,
        trolley_staff_id: Option<String>,
    ) -> Self {
        Self {
            bt_number: Some(bt_number.into()),
            timestamp_start: Some(timestamp_start),
            trolley_staff_id,
            ..Default::default()
        }
    }

    /// Drops blank strings so they count as absent.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.bt_number,
            &mut self.trolley_staff_id,
            &mut self.checker_id,
            &mut self.team_name,
        ] {
            *field = field
                .take()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
        }
        self
    }

    pub fn has_towing(&self) -> bool {
        self.bt_number.is_some() || self.timestamp_start.is_some() || self.trolley_staff_id.is_some()
    }

    pub fn has_checker(&self) -> bool {
        self.checker_id.is_some() || self.team_name.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub record: FlightRecord,
    pub row: SheetRow,
}

/// Merges `update` into `record`, the current relational row (stored, or
/// synthesized from an orphan sheet row), and renders the sheet row.
pub fn merge(
    mut record: FlightRecord,
    existing: Option<&SheetRow>,
    update: &PartialUpdate,
    now: NaiveDateTime,
) -> Merged {
    match update.pcs_received {
        Some(pcs_received) => record.pcs_received = Some(pcs_received),
        None => {
            if record.pcs_received.is_none() {
                record.pcs_received = existing.and_then(|row| row.pcs_received);
            }
            debug!("{}: no new piece count, keeping {:?}", record.mawb, record.pcs_received);
        }
    }

    if update.has_towing() {
        if let Some(bt_number) = &update.bt_number {
            record.bt_number = Some(bt_number.clone());
        }
        if let Some(timestamp_start) = update.timestamp_start {
            record.timestamp_start = Some(timestamp_start);
        }
        if let Some(trolley_staff_id) = &update.trolley_staff_id {
            record.trolley_staff_id = Some(trolley_staff_id.clone());
        }
    }
    record.refresh_discrepancy();

    let (bt_number, timestamp_handover, trolley_staff_id) = match existing {
        Some(row) if !update.has_towing() => {
            debug!("{}: keeping towing fields of the sheet row", record.mawb);
            (
                row.bt_number.clone(),
                row.timestamp_handover,
                row.trolley_staff_id.clone(),
            )
        }
        _ => (
            record.bt_number.clone(),
            record.timestamp_start,
            record.trolley_staff_id.clone(),
        ),
    };

    // A checker field left out of a checker update is cleared.
    let (checker_id, team_name) = match existing {
        Some(row) if !update.has_checker() => {
            debug!("{}: keeping checker fields of the sheet row", record.mawb);
            (row.checker_id.clone(), row.team_name.clone())
        }
        _ => (update.checker_id.clone(), update.team_name.clone()),
    };

    let breakdown_timestamp = if update.pcs_received.is_some() {
        Some(now)
    } else {
        existing
            .and_then(|row| row.breakdown_timestamp)
            .or_else(|| record.pcs_received.map(|_| now))
    };

    let row = SheetRow {
        flight_number: record.flight_number.clone(),
        scheduled_arrival_time: record.scheduled_arrival_time,
        actual_arrival_time: record.actual_arrival_time,
        mawb: record.mawb.clone(),
        flight_origin: record.flight_origin.clone(),
        flight_destination: record.flight_destination.clone(),
        pcs_awb: record.pcs_awb,
        gross_weight: record.gross_weight,
        commodity_type: record.commodity_type.clone(),
        bt_number,
        timestamp_handover,
        trolley_staff_id,
        pcs_received: record.pcs_received,
        discrepancy: record.discrepancy,
        checker_id,
        team_name,
        breakdown_timestamp,
    };
    Merged { record, row }
}
