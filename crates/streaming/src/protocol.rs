//! Wire format for the live AIS feed.
//!
//! - Subscription requests (client → server), one per established connection
//! - Entity snapshots as GeoJSON FeatureCollections (server → client)
//!
//! Messages are JSON text frames. Anything the client does not recognise is
//! reported as a [`DecodeError`] and dropped by the caller.

use foundation::{Generation, LonLat, TargetId, Viewport};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::target::Target;

/// Type tag of the only server message kind the client consumes.
pub const FEATURE_COLLECTION: &str = "FeatureCollection";

/// AIS "heading not available".
const HEADING_NOT_AVAILABLE: f64 = 511.0;

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Scope the feed to a bounding box given as two `[lon, lat]` corners.
    Subscribe {
        #[serde(rename = "boundingBox")]
        bounding_box: [[f64; 2]; 2],
    },
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    FeatureCollection { features: Vec<Feature> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_tag")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Geometry,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Map<String, Value>,
}

fn feature_tag() -> String {
    "Feature".to_string()
}

/// GeoJSON allows `"properties": null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Map<String, Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

impl Feature {
    pub fn point(position: LonLat, properties: Map<String, Value>) -> Self {
        Self {
            kind: feature_tag(),
            id: None,
            geometry: Geometry {
                kind: "Point".to_string(),
                coordinates: vec![position.lon, position.lat],
            },
            properties,
        }
    }
}

/// A subscription scoped to one viewport, built fresh for each connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub generation: Generation,
    pub viewport: Viewport,
}

impl SubscriptionRequest {
    pub fn new(generation: Generation, viewport: Viewport) -> Self {
        Self {
            generation,
            viewport,
        }
    }

    pub fn message(&self) -> ClientMessage {
        ClientMessage::Subscribe {
            bounding_box: self.viewport.to_array(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.message())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Malformed(String),
    #[error("message has no type tag")]
    MissingType,
    #[error("unrecognised message type {0:?}")]
    UnknownType(String),
    #[error("invalid FeatureCollection: {0}")]
    InvalidCollection(String),
}

/// Targets decoded from one FeatureCollection.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSnapshot {
    pub targets: Vec<Target>,
    /// Features dropped because they had no usable position or identifier.
    pub skipped: usize,
}

/// Decodes a server text frame into a snapshot.
///
/// A missing or non-array `features` drops the whole message; individual
/// features without a valid point geometry or identifier are skipped.
pub fn decode_snapshot(raw: &str) -> Result<DecodedSnapshot, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
        None => return Err(DecodeError::MissingType),
    };
    if kind != FEATURE_COLLECTION {
        return Err(DecodeError::UnknownType(kind.to_string()));
    }

    let features = match value.get("features") {
        Some(Value::Array(features)) => features,
        Some(_) => {
            return Err(DecodeError::InvalidCollection(
                "features is not an array".into(),
            ));
        }
        None => return Err(DecodeError::InvalidCollection("missing features".into())),
    };

    let mut targets = Vec::with_capacity(features.len());
    let mut skipped = 0;
    for raw_feature in features {
        match Feature::deserialize(raw_feature)
            .ok()
            .and_then(target_from_feature)
        {
            Some(target) => targets.push(target),
            None => skipped += 1,
        }
    }

    Ok(DecodedSnapshot { targets, skipped })
}

fn target_from_feature(feature: Feature) -> Option<Target> {
    if feature.geometry.kind != "Point" || !(2..=3).contains(&feature.geometry.coordinates.len()) {
        return None;
    }
    let position = LonLat::new(
        feature.geometry.coordinates[0],
        feature.geometry.coordinates[1],
    );
    position.validate().ok()?;

    let id = feature
        .id
        .as_ref()
        .and_then(id_from_value)
        .or_else(|| feature.properties.get("mmsi").and_then(id_from_value))?;

    let heading = feature
        .properties
        .get("heading")
        .and_then(Value::as_f64)
        .and_then(normalize_heading);

    Some(Target {
        id,
        position,
        heading,
        properties: feature.properties,
    })
}

fn id_from_value(value: &Value) -> Option<TargetId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(TargetId::new(s.clone())),
        Value::Number(n) => Some(TargetId::new(n.to_string())),
        _ => None,
    }
}

fn normalize_heading(deg: f64) -> Option<f64> {
    if !deg.is_finite() || deg == HEADING_NOT_AVAILABLE || !(0.0..=360.0).contains(&deg) {
        return None;
    }
    Some(deg % 360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn subscribe_wire_shape() {
        let viewport = Viewport::from_array([[-71.0, 42.0], [-69.0, 39.0]]).unwrap();
        let req = SubscriptionRequest::new(Generation::new(3), viewport);
        let encoded: Value = serde_json::from_str(&req.encode().unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({ "type": "subscribe", "boundingBox": [[-71.0, 42.0], [-69.0, 39.0]] })
        );
    }

    #[test]
    fn decodes_feature_collection() {
        let raw = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [-70.5, 41.2] },
                "properties": { "heading": 90, "mmsi": 366999712, "shipName": "EVER FORWARD" }
            }]
        })
        .to_string();

        let decoded = decode_snapshot(&raw).expect("decode");
        assert_eq!(decoded.skipped, 0);
        assert_eq!(decoded.targets.len(), 1);
        let t = &decoded.targets[0];
        assert_eq!(t.id.as_str(), "366999712");
        assert_eq!(t.heading, Some(90.0));
        assert_eq!(t.position, LonLat::new(-70.5, 41.2));
        assert_eq!(t.properties["shipName"], json!("EVER FORWARD"));
    }

    #[test]
    fn empty_collection_is_valid() {
        let decoded = decode_snapshot(r#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        assert!(decoded.targets.is_empty());
    }

    #[test]
    fn rejects_other_messages() {
        assert!(matches!(
            decode_snapshot("not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert_eq!(
            decode_snapshot(r#"{"type":"ping"}"#),
            Err(DecodeError::UnknownType("ping".into()))
        );
        assert_eq!(
            decode_snapshot(r#"{"status":"subscribed"}"#),
            Err(DecodeError::MissingType)
        );
        assert!(matches!(
            decode_snapshot(r#"{"type":"FeatureCollection"}"#),
            Err(DecodeError::InvalidCollection(_))
        ));
        assert!(matches!(
            decode_snapshot(r#"{"type":"FeatureCollection","features":{}}"#),
            Err(DecodeError::InvalidCollection(_))
        ));
    }

    #[test]
    fn skips_unusable_features() {
        let raw = json!({
            "type": "FeatureCollection",
            "features": [
                { "geometry": { "type": "Point", "coordinates": [-70.0, 41.0] }, "properties": {} },
                { "geometry": { "type": "LineString", "coordinates": [] }, "properties": { "mmsi": 1 } },
                { "geometry": { "type": "Point", "coordinates": [200.0, 41.0] }, "properties": { "mmsi": 2 } },
                { "properties": { "mmsi": 3 } },
                { "id": "abc", "geometry": { "type": "Point", "coordinates": [-70.0, 41.0] } }
            ]
        })
        .to_string();

        let decoded = decode_snapshot(&raw).unwrap();
        assert_eq!(decoded.skipped, 4);
        assert_eq!(decoded.targets.len(), 1);
        assert_eq!(decoded.targets[0].id.as_str(), "abc");
        assert_eq!(decoded.targets[0].heading, None);
    }

    #[test]
    fn null_properties_fall_back_to_feature_id() {
        let raw = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "id": 366999712,
                "geometry": { "type": "Point", "coordinates": [-70.0, 40.0] },
                "properties": null
            }]
        })
        .to_string();
        let decoded = decode_snapshot(&raw).unwrap();
        assert_eq!(decoded.skipped, 0);
        assert_eq!(decoded.targets[0].id.as_str(), "366999712");
        assert_eq!(decoded.targets[0].heading, None);
        assert!(decoded.targets[0].properties.is_empty());
    }

    #[test]
    fn heading_not_available_is_none() {
        assert_eq!(normalize_heading(511.0), None);
        assert_eq!(normalize_heading(-1.0), None);
        assert_eq!(normalize_heading(360.0), Some(0.0));
        assert_eq!(normalize_heading(359.5), Some(359.5));
    }

    #[test]
    fn server_message_encodes_with_type_tag() {
        let mut props = Map::new();
        props.insert("mmsi".into(), json!(7));
        let msg = ServerMessage::FeatureCollection {
            features: vec![Feature::point(LonLat::new(1.0, 2.0), props)],
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], json!("FeatureCollection"));
        assert_eq!(v["features"][0]["type"], json!("Feature"));
        assert_eq!(v["features"][0]["geometry"]["coordinates"], json!([1.0, 2.0]));

        let decoded = decode_snapshot(&v.to_string()).unwrap();
        assert_eq!(decoded.targets[0].id.as_str(), "7");
    }
}
