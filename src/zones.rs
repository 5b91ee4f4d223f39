//! Monitored zones ("chairs") and per-frame zone matching.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::detect::{BoundingBox, Detection};

/// Zone identifier. JSON numbers and strings are both accepted; numbers are kept in
/// their JSON text form so `1` stays `"1"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl<'de> Deserialize<'de> for ZoneId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(serde_json::Number),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Ok(ZoneId(n.to_string())),
            RawId::Text(s) => Ok(ZoneId(s)),
        }
    }
}

/// Axis-aligned monitored rectangle in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Zone {
    pub fn new(id: impl Into<String>, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            id: ZoneId::new(id),
            x,
            y,
            width,
            height,
        }
    }

    pub fn rect(&self) -> BoundingBox {
        BoundingBox::new(self.x, self.y, self.width, self.height)
    }

    fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(anyhow!("zone id must not be empty"));
        }
        for (name, value) in [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ] {
            if !value.is_finite() {
                return Err(anyhow!("zone {}: {} must be a finite number", self.id, name));
            }
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(anyhow!(
                "zone {}: width and height must be greater than zero (got {}x{})",
                self.id,
                self.width,
                self.height
            ));
        }
        Ok(())
    }
}

/// Parse and validate the zone array `[{id, x, y, width, height}, ...]`.
pub fn parse_zones(json: &str) -> Result<Vec<Zone>> {
    let zones: Vec<Zone> =
        serde_json::from_str(json).map_err(|e| anyhow!("invalid zone JSON: {}", e))?;
    validate_zones(&zones)?;
    Ok(zones)
}

pub fn validate_zones(zones: &[Zone]) -> Result<()> {
    if zones.is_empty() {
        return Err(anyhow!("no zones provided"));
    }
    let mut seen = HashSet::new();
    for zone in zones {
        zone.validate()?;
        if !seen.insert(zone.id.clone()) {
            return Err(anyhow!("duplicate zone id {}", zone.id));
        }
    }
    Ok(())
}

/// Per-frame presence signal, one entry per zone in configured order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZonePresence {
    entries: Vec<(ZoneId, bool)>,
}

impl ZonePresence {
    pub fn get(&self, id: &ZoneId) -> Option<bool> {
        self.entries
            .iter()
            .find(|(zone_id, _)| zone_id == id)
            .map(|(_, present)| *present)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ZoneId, bool)> {
        self.entries.iter().map(|(id, present)| (id, *present))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn occupied_count(&self) -> usize {
        self.entries.iter().filter(|(_, present)| *present).count()
    }
}

/// Assigns each box to the first zone (in configured order) it overlaps or touches.
#[derive(Clone, Debug)]
pub struct ZoneMatcher {
    zones: Vec<Zone>,
}

impl ZoneMatcher {
    pub fn new(zones: Vec<Zone>) -> Result<Self> {
        validate_zones(&zones)?;
        Ok(Self { zones })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Index of the zone a box is assigned to, if any.
    pub fn assign(&self, bbox: &BoundingBox) -> Option<usize> {
        self.zones
            .iter()
            .position(|zone| zone.rect().touches_or_overlaps(bbox))
    }

    pub fn match_boxes(&self, boxes: &[Detection]) -> ZonePresence {
        let mut present = vec![false; self.zones.len()];
        for det in boxes {
            if let Some(idx) = self.assign(&det.bbox) {
                present[idx] = true;
            }
        }
        ZonePresence {
            entries: self
                .zones
                .iter()
                .zip(present)
                .map(|(zone, present)| (zone.id.clone(), present))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ObjectClass;

    fn person(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, y, w, h),
            confidence: 0.9,
            class: ObjectClass::Person,
        }
    }

    fn two_chairs() -> ZoneMatcher {
        ZoneMatcher::new(vec![
            Zone::new("1", 0.0, 0.0, 100.0, 100.0),
            Zone::new("2", 50.0, 0.0, 100.0, 100.0),
        ])
        .unwrap()
    }

    #[test]
    fn parses_numeric_and_string_ids() {
        let zones = parse_zones(
            r#"[{"id": 1, "x": 0, "y": 0, "width": 10, "height": 10},
                {"id": "desk-b", "x": 20, "y": 0, "width": 10.5, "height": 10}]"#,
        )
        .unwrap();
        assert_eq!(zones[0].id.as_str(), "1");
        assert_eq!(zones[1].id.as_str(), "desk-b");
        assert_eq!(zones[1].width, 10.5);
    }

    #[test]
    fn rejects_empty_and_invalid_zone_sets() {
        assert!(parse_zones("[]").is_err());
        assert!(parse_zones("not json").is_err());
        assert!(parse_zones(r#"[{"id": 1, "x": 0, "y": 0, "width": 0, "height": 10}]"#).is_err());
        assert!(parse_zones(
            r#"[{"id": 1, "x": 0, "y": 0, "width": 5, "height": 5},
                {"id": 1, "x": 9, "y": 9, "width": 5, "height": 5}]"#
        )
        .is_err());
    }

    #[test]
    fn box_inside_zone_overlaps() {
        let matcher = two_chairs();
        let presence = matcher.match_boxes(&[person(10.0, 10.0, 20.0, 20.0)]);
        assert_eq!(presence.get(&ZoneId::from("1")), Some(true));
        assert_eq!(presence.get(&ZoneId::from("2")), Some(false));
    }

    #[test]
    fn box_crossing_boundary_overlaps() {
        let matcher = ZoneMatcher::new(vec![Zone::new("1", 100.0, 100.0, 50.0, 50.0)]).unwrap();
        let presence = matcher.match_boxes(&[person(90.0, 90.0, 11.0, 11.0)]);
        assert_eq!(presence.get(&ZoneId::from("1")), Some(true));
    }

    #[test]
    fn disjoint_box_does_not_overlap() {
        let matcher = ZoneMatcher::new(vec![Zone::new("1", 100.0, 100.0, 50.0, 50.0)]).unwrap();
        let presence = matcher.match_boxes(&[
            person(0.0, 0.0, 10.0, 10.0),
            person(89.0, 100.0, 10.0, 10.0),
        ]);
        assert_eq!(presence.get(&ZoneId::from("1")), Some(false));
        assert_eq!(presence.occupied_count(), 0);
    }

    #[test]
    fn box_touching_zone_edge_counts_as_present() {
        let matcher = ZoneMatcher::new(vec![Zone::new("1", 100.0, 100.0, 50.0, 50.0)]).unwrap();
        // right edge at x=100 meets the zone's left edge
        let presence = matcher.match_boxes(&[person(90.0, 100.0, 10.0, 10.0)]);
        assert_eq!(presence.get(&ZoneId::from("1")), Some(true));

        // bottom-right corner at (100, 100)
        let presence = matcher.match_boxes(&[person(90.0, 90.0, 10.0, 10.0)]);
        assert_eq!(presence.get(&ZoneId::from("1")), Some(true));
    }

    #[test]
    fn box_counts_for_first_overlapping_zone_only() {
        let matcher = two_chairs();
        // overlaps both zones; zone "1" comes first
        let presence = matcher.match_boxes(&[person(60.0, 10.0, 20.0, 20.0)]);
        assert_eq!(presence.get(&ZoneId::from("1")), Some(true));
        assert_eq!(presence.get(&ZoneId::from("2")), Some(false));
    }

    #[test]
    fn every_zone_has_an_entry() {
        let matcher = two_chairs();
        let presence = matcher.match_boxes(&[]);
        assert_eq!(presence.len(), 2);
        assert!(presence.iter().all(|(_, present)| !present));
    }
}
