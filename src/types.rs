use geo::bounding_rect::BoundingRect;
use geo::{MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const ALL_DISTRICTS: &str = "all";

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    Missing,
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Number(n) => write!(f, "{}", n),
            AttrValue::Missing => Ok(()),
        }
    }
}

impl AttrValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Text(s) => s.trim().parse().ok(),
            AttrValue::Missing => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Point,
    Area,
}

// Always canonical lon/lat
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Point<f64>),
    Area(MultiPolygon<f64>),
}

impl Shape {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Shape::Point(_) => GeometryKind::Point,
            Shape::Area(_) => GeometryKind::Area,
        }
    }

    fn envelope(&self) -> Option<AABB<[f64; 2]>> {
        match self {
            Shape::Point(p) => Some(AABB::from_point([p.x(), p.y()])),
            Shape::Area(mp) => mp.bounding_rect().map(|rect| {
                AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
    pub shape: Shape,
    pub attributes: HashMap<String, AttrValue>,
}

impl GeoRecord {
    pub fn attr(&self, key: &str) -> &AttrValue {
        self.attributes.get(key).unwrap_or(&AttrValue::Missing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetId {
    RiskVeryHigh,
    RiskHigh,
    Accidents,
    Stores,
    ElderWelfare,
    SubwayEntrances,
    BusStops,
    Intersections,
    Crosswalks,
    Parks,
    Markets,
    ElderZones,
}

impl DatasetId {
    // Layer composition keeps this order within each geometry group.
    pub const ALL: [DatasetId; 12] = [
        DatasetId::RiskVeryHigh,
        DatasetId::RiskHigh,
        DatasetId::Accidents,
        DatasetId::Stores,
        DatasetId::ElderWelfare,
        DatasetId::SubwayEntrances,
        DatasetId::BusStops,
        DatasetId::Intersections,
        DatasetId::Crosswalks,
        DatasetId::Parks,
        DatasetId::Markets,
        DatasetId::ElderZones,
    ];

    pub fn key(self) -> &'static str {
        match self {
            DatasetId::RiskVeryHigh => "risk_very_high",
            DatasetId::RiskHigh => "risk_high",
            DatasetId::Accidents => "accidents",
            DatasetId::Stores => "stores",
            DatasetId::ElderWelfare => "elder_welfare",
            DatasetId::SubwayEntrances => "subway_entrances",
            DatasetId::BusStops => "bus_stops",
            DatasetId::Intersections => "intersections",
            DatasetId::Crosswalks => "crosswalks",
            DatasetId::Parks => "parks",
            DatasetId::Markets => "markets",
            DatasetId::ElderZones => "elder_zones",
        }
    }
}

// Wrapper for RTree indexing
#[derive(Debug, Clone)]
pub struct RecordIndex {
    pub position: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for RecordIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct Dataset {
    pub id: DatasetId,
    pub kind: GeometryKind,
    pub records: Vec<GeoRecord>,
    pub index: RTree<RecordIndex>,
}

impl Dataset {
    pub fn new(id: DatasetId, kind: GeometryKind, records: Vec<GeoRecord>) -> Self {
        debug_assert!(records.iter().all(|r| r.shape.kind() == kind));
        let items: Vec<RecordIndex> = records
            .iter()
            .enumerate()
            .filter_map(|(position, record)| {
                record
                    .shape
                    .envelope()
                    .map(|aabb| RecordIndex { position, aabb })
            })
            .collect();

        Dataset {
            id,
            kind,
            records,
            index: RTree::bulk_load(items),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("records", &self.records.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct District {
    pub code: String,
    pub name: String,
    pub boundary: MultiPolygon<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistrictSelector {
    All,
    Named(String),
}

impl DistrictSelector {
    pub fn parse(value: &str) -> Self {
        if value == ALL_DISTRICTS {
            DistrictSelector::All
        } else {
            DistrictSelector::Named(value.to_string())
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, DistrictSelector::All)
    }
}

impl fmt::Display for DistrictSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistrictSelector::All => f.write_str(ALL_DISTRICTS),
            DistrictSelector::Named(name) => f.write_str(name),
        }
    }
}
