//! Mock upstream feeds and the dummy rows used to seed the dashboard.
//!
//! Every generator takes the RNG and the current time from the caller.

use chrono::{Duration, NaiveDateTime};
use rand::{Rng, seq::SliceRandom as _};
use serde::{Deserialize, Serialize};

use crate::{
    record::{FlightRecord, Mawb},
    sheet::SheetRow,
};

const SMARTKARGO_ORIGINS: [&str; 4] = ["JFK", "LAX", "ORD", "ATL"];
const SMARTKARGO_DESTINATIONS: [&str; 4] = ["LHR", "CDG", "FRA", "DXB"];
const SMARTKARGO_COMMODITIES: [&str; 4] = ["Electronics", "Clothing", "Automobile", "Pharma"];

const DUMMY_AIRLINES: [&str; 10] = ["SQ", "CX", "BA", "UA", "EK", "LH", "QF", "SU", "TR", "KE"];
const DUMMY_AIRPORTS: [&str; 10] = [
    "SIN", "HKG", "LHR", "JFK", "DXB", "FRA", "SYD", "DME", "BKK", "ICN",
];
const DUMMY_COMMODITIES: [&str; 10] = [
    "Electronics",
    "Apparel",
    "Perishables",
    "Medical Supplies",
    "Auto Parts",
    "Machinery",
    "Chemicals",
    "Textiles",
    "Documents",
    "General Cargo",
];
const DUMMY_DAYS_BACK: i64 = 7;

/// Flight schedule as reported by RedWatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedWatchFlight {
    pub flight_number: String,
    pub scheduled_arrival_time: NaiveDateTime,
}

/// Arrival and manifest data as reported by SmartKargo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartKargoManifest {
    pub actual_arrival_time: NaiveDateTime,
    pub mawb: Mawb,
    pub flight_origin: String,
    pub flight_destination: String,
    pub pcs_awb: i64,
    pub gross_weight: f64,
    pub commodity_type: String,
}

pub fn redwatch<R: Rng + ?Sized>(rng: &mut R, now: NaiveDateTime) -> RedWatchFlight {
    RedWatchFlight {
        flight_number: format!("RW{}{}", now.format("%H%M"), rng.gen_range(100..=999)),
        scheduled_arrival_time: now + Duration::minutes(rng.gen_range(30..=120)),
    }
}

pub fn smartkargo<R: Rng + ?Sized>(rng: &mut R, now: NaiveDateTime) -> SmartKargoManifest {
    SmartKargoManifest {
        actual_arrival_time: now + Duration::minutes(rng.gen_range(20..=100)),
        mawb: format!("MAWB{}", rng.gen_range(1000..=9999)).into(),
        flight_origin: pick(rng, &SMARTKARGO_ORIGINS),
        flight_destination: pick(rng, &SMARTKARGO_DESTINATIONS),
        pcs_awb: rng.gen_range(50..=300),
        gross_weight: round2(rng.gen_range(1000.0..=5000.0)),
        commodity_type: pick(rng, &SMARTKARGO_COMMODITIES),
    }
}

/// Unions both feeds into the payload of a new record. Nothing has been
/// received yet, so `pcs_received` stays unset.
pub fn merge(flight: RedWatchFlight, manifest: SmartKargoManifest) -> FlightRecord {
    let mut record = FlightRecord {
        flight_number: Some(flight.flight_number),
        scheduled_arrival_time: Some(flight.scheduled_arrival_time),
        actual_arrival_time: Some(manifest.actual_arrival_time),
        flight_origin: Some(manifest.flight_origin),
        flight_destination: Some(manifest.flight_destination),
        pcs_awb: Some(manifest.pcs_awb),
        gross_weight: Some(manifest.gross_weight),
        commodity_type: Some(manifest.commodity_type),
        ..FlightRecord::new(manifest.mawb)
    };
    record.refresh_discrepancy();
    record
}

/// A plausible past arrival with empty towing and breakdown columns.
pub fn dummy_row<R: Rng + ?Sized>(rng: &mut R, now: NaiveDateTime) -> SheetRow {
    let scheduled = now
        - Duration::days(rng.gen_range(0..=DUMMY_DAYS_BACK))
        - Duration::seconds(rng.gen_range(0..=86_400));
    let actual = scheduled + Duration::minutes(rng.gen_range(-60..=120));

    let origin = pick(rng, &DUMMY_AIRPORTS);
    let destinations: Vec<&str> = DUMMY_AIRPORTS
        .iter()
        .copied()
        .filter(|airport| *airport != origin)
        .collect();

    SheetRow {
        flight_number: Some(format!(
            "{}{}",
            pick(rng, &DUMMY_AIRLINES),
            rng.gen_range(100..=999)
        )),
        scheduled_arrival_time: Some(scheduled),
        actual_arrival_time: Some(actual),
        mawb: format!("MAWB{:04}", rng.gen_range(0..=9999)).into(),
        flight_origin: Some(origin),
        flight_destination: Some(pick(rng, &destinations)),
        pcs_awb: Some(rng.gen_range(1..=100)),
        gross_weight: Some(round2(rng.gen_range(10.0..=2000.0))),
        commodity_type: Some(pick(rng, &DUMMY_COMMODITIES)),
        discrepancy: false,
        ..SheetRow::default()
    }
}

fn pick<R: Rng + ?Sized>(rng: &mut R, choices: &[&str]) -> String {
    choices.choose(rng).copied().unwrap_or_default().to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng as _, rngs::StdRng};

    use super::*;
    use crate::record::timestamp;

    fn now() -> NaiveDateTime {
        timestamp::parse("2025-03-01T14:05:30").unwrap()
    }

    #[test]
    fn redwatch_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let flight = redwatch(&mut rng, now());
            assert!(flight.flight_number.starts_with("RW1405"));
            assert_eq!(flight.flight_number.len(), "RW1405".len() + 3);
            let ahead = flight.scheduled_arrival_time - now();
            assert!((30..=120).contains(&ahead.num_minutes()));
        }
    }

    #[test]
    fn smartkargo_shape() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..50 {
            let manifest = smartkargo(&mut rng, now());
            let ahead = manifest.actual_arrival_time - now();
            assert!((20..=100).contains(&ahead.num_minutes()));
            let digits: u32 = manifest.mawb.as_str()["MAWB".len()..].parse().unwrap();
            assert!((1000..=9999).contains(&digits));
            assert!(SMARTKARGO_ORIGINS.contains(&manifest.flight_origin.as_str()));
            assert!(SMARTKARGO_DESTINATIONS.contains(&manifest.flight_destination.as_str()));
            assert!((50..=300).contains(&manifest.pcs_awb));
            assert!((1000.0..=5000.0).contains(&manifest.gross_weight));
            assert_eq!(round2(manifest.gross_weight), manifest.gross_weight);
            assert!(SMARTKARGO_COMMODITIES.contains(&manifest.commodity_type.as_str()));
        }
    }

    #[test]
    fn merged_record_has_nothing_received() {
        let mut rng = StdRng::seed_from_u64(3);
        let flight = redwatch(&mut rng, now());
        let manifest = smartkargo(&mut rng, now());
        let record = merge(flight.clone(), manifest.clone());
        assert_eq!(record.mawb, manifest.mawb);
        assert_eq!(record.flight_number, Some(flight.flight_number));
        assert_eq!(record.pcs_awb, Some(manifest.pcs_awb));
        assert_eq!(record.pcs_received, None);
        assert!(!record.discrepancy);
        assert_eq!(record.bt_number, None);
    }

    #[test]
    fn dummy_rows() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..100 {
            let row = dummy_row(&mut rng, now());
            assert_ne!(row.flight_origin, row.flight_destination);
            let scheduled = row.scheduled_arrival_time.unwrap();
            assert!(scheduled <= now());
            assert!(now() - scheduled <= Duration::days(DUMMY_DAYS_BACK + 1));
            let delay = row.actual_arrival_time.unwrap() - scheduled;
            assert!((-60..=120).contains(&delay.num_minutes()));
            assert_eq!(row.mawb.as_str().len(), "MAWB".len() + 4);
            assert!((1..=100).contains(&row.pcs_awb.unwrap()));
            assert!(DUMMY_AIRLINES.contains(&&row.flight_number.as_deref().unwrap()[..2]));
            assert_eq!(row.pcs_received, None);
            assert_eq!(row.bt_number, None);
            assert!(!row.discrepancy);
        }
    }
}
