use std::fmt::{self, Display, Formatter};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Master Air Waybill number, the unique key of a shipment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Mawb(String);

impl From<String> for Mawb {
    fn from(mawb: String) -> Self {
        Self(mawb)
    }
}

impl From<&str> for Mawb {
    fn from(mawb: &str) -> Self {
        mawb.to_string().into()
    }
}

impl PartialEq<&str> for Mawb {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Display for Mawb {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Mawb {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FlightRecord {
    pub mawb: Mawb,
    pub flight_number: Option<String>,
    pub scheduled_arrival_time: Option<NaiveDateTime>,
    pub actual_arrival_time: Option<NaiveDateTime>,
    pub flight_origin: Option<String>,
    pub flight_destination: Option<String>,
    pub pcs_awb: Option<i64>,
    pub pcs_received: Option<i64>,
    pub gross_weight: Option<f64>,
    pub commodity_type: Option<String>,
    pub discrepancy: bool,
    pub bt_number: Option<String>,
    pub timestamp_start: Option<NaiveDateTime>,
    pub trolley_staff_id: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl FlightRecord {
    pub fn new(mawb: Mawb) -> Self {
        Self {
            mawb,
            ..Default::default()
        }
    }

    /// Recomputes the derived `discrepancy` flag from the piece counts.
    pub fn refresh_discrepancy(&mut self) {
        self.discrepancy = has_discrepancy(self.pcs_awb, self.pcs_received);
    }
}

/// A shipment is discrepant only when both counts are known and differ.
pub fn has_discrepancy(pcs_awb: Option<i64>, pcs_received: Option<i64>) -> bool {
    matches!((pcs_awb, pcs_received), (Some(awb), Some(received)) if awb != received)
}

/// Text form of timestamps shared by the store and the spreadsheet.
pub mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, Timelike as _};

    const SECONDS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
    const MICROS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

    /// Formats `YYYY-MM-DDTHH:MM:SS`, with microseconds only when non-zero.
    pub fn format(value: &NaiveDateTime) -> String {
        if value.nanosecond() == 0 {
            value.format(SECONDS_FORMAT).to_string()
        } else {
            value.format(MICROS_FORMAT).to_string()
        }
    }

    pub fn parse(text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M"))
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|dt| dt.with_timezone(&Local).naive_local())
            })
    }

    /// Current local wall-clock time, truncated to microseconds.
    pub fn now() -> NaiveDateTime {
        let now = Local::now().naive_local();
        now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn discrepancy_requires_both_counts() {
        assert!(!has_discrepancy(None, None));
        assert!(!has_discrepancy(Some(100), None));
        assert!(!has_discrepancy(None, Some(100)));
        assert!(!has_discrepancy(Some(100), Some(100)));
        assert!(has_discrepancy(Some(100), Some(95)));
    }

    #[test]
    fn refresh_discrepancy_tracks_counts() {
        let mut record = FlightRecord::new("MAWB1234".into());
        record.pcs_awb = Some(100);
        record.pcs_received = Some(95);
        record.refresh_discrepancy();
        assert!(record.discrepancy);

        record.pcs_received = Some(100);
        record.refresh_discrepancy();
        assert!(!record.discrepancy);
    }

    #[test]
    fn timestamp_text_form() {
        let whole = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(10, 15, 0)
            .unwrap();
        assert_eq!(timestamp::format(&whole), "2025-03-01T10:15:00");

        let fractional = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_micro_opt(10, 15, 0, 120_000)
            .unwrap();
        assert_eq!(timestamp::format(&fractional), "2025-03-01T10:15:00.120000");
        assert_eq!(
            timestamp::parse("2025-03-01T10:15:00.120000"),
            Some(fractional)
        );
        assert_eq!(timestamp::parse("2025-03-01 10:15:00"), Some(whole));
    }

    #[test]
    fn timestamp_parse_degrades_to_none() {
        assert_eq!(timestamp::parse(""), None);
        assert_eq!(timestamp::parse("yesterday"), None);
        assert_eq!(timestamp::parse("2025-13-45T99:00:00"), None);
    }

    #[test]
    fn mawb_compares_with_str() {
        let mawb = Mawb::from("MAWB0001");
        assert_eq!(mawb, "MAWB0001");
        assert!(!mawb.is_empty());
        assert!(Mawb::from("  ").is_empty());
    }
}
