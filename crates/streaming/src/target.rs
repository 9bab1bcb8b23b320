use foundation::{Generation, LonLat, TargetId};
use serde_json::{Map, Value};

/// One tracked vessel as last reported by the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub id: TargetId,
    pub position: LonLat,
    /// True heading in degrees `[0, 360)`, `None` when not reported.
    pub heading: Option<f64>,
    /// Remaining display attributes (ship name, report time, ...).
    pub properties: Map<String, Value>,
}

/// The complete set of targets for the subscribed region.
///
/// `revision` is assigned by the store: 0 means nothing has been received
/// yet, which is different from a received snapshot that happens to be empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub revision: u64,
    pub generation: Generation,
    pub targets: Vec<Target>,
}

impl Snapshot {
    pub fn new(generation: Generation, targets: Vec<Target>) -> Self {
        Self {
            revision: 0,
            generation,
            targets,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.revision == 0
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
