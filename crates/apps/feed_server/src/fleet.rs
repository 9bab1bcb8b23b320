//! Known vessel positions and the per-subscription query over them.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use foundation::LonLat;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use streaming::{Feature, ServerMessage};

/// Last position report for one vessel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRecord {
    pub mmsi: u64,
    #[serde(default)]
    pub ship_name: Option<String>,
    pub lon: f64,
    pub lat: f64,
    /// AIS TrueHeading; 511 means not available and is passed through as-is.
    #[serde(default)]
    pub heading: Option<f64>,
    /// Unix seconds of the report. Records without one never go stale.
    #[serde(default)]
    pub time_utc: Option<u64>,
}

impl TargetRecord {
    fn feature(&self) -> Feature {
        let mut properties = Map::new();
        if let Some(heading) = self.heading {
            properties.insert("heading".into(), Value::from(heading));
        }
        properties.insert("mmsi".into(), Value::from(self.mmsi));
        if let Some(name) = &self.ship_name {
            properties.insert("shipName".into(), Value::from(name.clone()));
        }
        if let Some(t) = self.time_utc {
            properties.insert("timeUtc".into(), Value::from(t));
        }
        Feature::point(LonLat::new(self.lon, self.lat), properties)
    }
}

/// Axis-aligned box built from two corners given in any order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxFilter {
    min_lon: f64,
    max_lon: f64,
    min_lat: f64,
    max_lat: f64,
}

impl BoxFilter {
    pub fn from_corners(corners: [[f64; 2]; 2]) -> Self {
        let [[lon1, lat1], [lon2, lat2]] = corners;
        Self {
            min_lon: lon1.min(lon2),
            max_lon: lon1.max(lon2),
            min_lat: lat1.min(lat2),
            max_lat: lat1.max(lat2),
        }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

/// Latest report per MMSI, shared between the ingest task and every socket.
#[derive(Debug, Default)]
pub struct Fleet {
    records: RwLock<BTreeMap<u64, TargetRecord>>,
}

impl Fleet {
    pub fn new(records: Vec<TargetRecord>) -> Self {
        let fleet = Self::default();
        for record in records {
            fleet.upsert(record);
        }
        fleet
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw).map(Self::new)
    }

    /// A handful of vessels off the US north-east coast.
    pub fn demo() -> Self {
        let vessel = |mmsi, name: &str, lon, lat, heading| TargetRecord {
            mmsi,
            ship_name: Some(name.to_string()),
            lon,
            lat,
            heading,
            time_utc: None,
        };
        Self::new(vec![
            vessel(366999712, "NANTUCKET LIGHT", -70.1, 41.2, Some(90.0)),
            vessel(367123450, "CAPE COD PILOT", -70.6, 41.7, Some(212.0)),
            vessel(338765432, "BLOCK ISLAND", -71.5, 41.1, Some(511.0)),
            vessel(316001234, "ATLANTIC SPIRIT", -69.2, 39.6, None),
            vessel(636019876, "GULF TRADER", -74.0, 40.4, Some(45.0)),
        ])
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Replaces the vessel's last report; true when the MMSI is new.
    pub fn upsert(&self, record: TargetRecord) -> bool {
        self.records.write().insert(record.mmsi, record).is_none()
    }

    /// Records inside `area` reported within `max_age_s` of `now_s`, by MMSI.
    /// A zero `max_age_s` disables the age check.
    pub fn query(&self, area: BoxFilter, now_s: u64, max_age_s: u64) -> Vec<TargetRecord> {
        self.records
            .read()
            .values()
            .filter(|r| area.contains(r.lon, r.lat))
            .filter(|r| match r.time_utc {
                Some(t) if max_age_s > 0 => now_s.saturating_sub(t) <= max_age_s,
                _ => true,
            })
            .cloned()
            .collect()
    }

    pub fn collection(&self, area: BoxFilter, now_s: u64, max_age_s: u64) -> ServerMessage {
        ServerMessage::FeatureCollection {
            features: self
                .query(area, now_s, max_age_s)
                .iter()
                .map(TargetRecord::feature)
                .collect(),
        }
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn mmsis(records: Vec<TargetRecord>) -> Vec<u64> {
        records.iter().map(|r| r.mmsi).collect()
    }

    #[test]
    fn box_accepts_corners_in_any_order() {
        let a = BoxFilter::from_corners([[-72.0, 44.0], [-68.0, 38.0]]);
        let b = BoxFilter::from_corners([[-68.0, 38.0], [-72.0, 44.0]]);
        assert_eq!(a, b);
        assert!(a.contains(-70.0, 40.0));
        assert!(a.contains(-72.0, 38.0));
        assert!(!a.contains(-74.0, 40.4));
    }

    #[test]
    fn demo_fleet_filtered_by_region() {
        let fleet = Fleet::demo();
        let wide = BoxFilter::from_corners([[-72.0, 44.0], [-68.0, 38.0]]);
        assert_eq!(
            mmsis(fleet.query(wide, 0, 120)),
            vec![316001234, 338765432, 366999712, 367123450]
        );
        let narrow = BoxFilter::from_corners([[-71.0, 42.0], [-69.0, 39.0]]);
        assert_eq!(mmsis(fleet.query(narrow, 0, 120)), vec![316001234, 366999712, 367123450]);
    }

    #[test]
    fn stale_reports_are_left_out() {
        let fleet = Fleet::from_json(
            r#"[
                {"mmsi": 1, "lon": -70.0, "lat": 40.0, "timeUtc": 1000},
                {"mmsi": 2, "lon": -70.0, "lat": 40.0, "timeUtc": 1100},
                {"mmsi": 3, "lon": -70.0, "lat": 40.0}
            ]"#,
        )
        .unwrap();
        let area = BoxFilter::from_corners([[-71.0, 41.0], [-69.0, 39.0]]);
        assert_eq!(mmsis(fleet.query(area, 1200, 120)), vec![2, 3]);
        assert_eq!(mmsis(fleet.query(area, 1200, 0)), vec![1, 2, 3]);
    }

    #[test]
    fn collection_is_decodable_geojson() {
        let fleet = Fleet::demo();
        let area = BoxFilter::from_corners([[-71.0, 42.0], [-69.0, 39.0]]);
        let text = serde_json::to_string(&fleet.collection(area, 0, 0)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(
            value["features"][1],
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [-70.1, 41.2] },
                "properties": {
                    "heading": 90.0,
                    "mmsi": 366999712,
                    "shipName": "NANTUCKET LIGHT"
                }
            })
        );

        let decoded = streaming::decode_snapshot(&text).unwrap();
        assert_eq!(decoded.targets.len(), 3);
        assert_eq!(decoded.skipped, 0);
    }

    #[test]
    fn upsert_moves_vessel_in_and_out_of_view() {
        let fleet = Fleet::demo();
        let narrow = BoxFilter::from_corners([[-71.0, 42.0], [-69.0, 39.0]]);
        let moved = TargetRecord {
            mmsi: 636019876,
            ship_name: Some("GULF TRADER".into()),
            lon: -70.0,
            lat: 40.0,
            heading: Some(60.0),
            time_utc: Some(1_000),
        };
        assert!(!fleet.upsert(moved.clone()));
        assert_eq!(fleet.len(), 5);
        let in_view = fleet.query(narrow, 1_010, 120);
        assert!(in_view.contains(&moved));

        assert!(fleet.upsert(TargetRecord {
            mmsi: 1,
            lon: -70.0,
            lat: 40.0,
            ship_name: None,
            heading: None,
            time_utc: Some(1_000),
        }));
        assert_eq!(fleet.len(), 6);
        // Both fresh reports age out together.
        assert_eq!(
            mmsis(fleet.query(narrow, 2_000, 120)),
            vec![316001234, 366999712, 367123450]
        );
    }
}
