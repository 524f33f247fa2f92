use crate::data::Registry;
use crate::districts::DistrictIndex;
use crate::error::UnknownDistrictError;
use crate::types::{Dataset, DatasetId, DistrictSelector, GeoRecord, Shape};
use geo::algorithm::contains::Contains;
use geo::bounding_rect::BoundingRect;
use geo::MultiPolygon;
use rayon::prelude::*;
use rstar::AABB;
use std::collections::BTreeMap;

/// Per-dataset sub-collections borrowed from the registry, in dataset order.
pub type Filtered<'a> = BTreeMap<DatasetId, Vec<&'a GeoRecord>>;

pub fn filter<'a>(
    registry: &'a Registry,
    districts: &DistrictIndex,
    selector: &DistrictSelector,
) -> Result<Filtered<'a>, UnknownDistrictError> {
    match selector {
        DistrictSelector::All => Ok(registry
            .iter()
            .map(|dataset| (dataset.id, dataset.records.iter().collect()))
            .collect()),
        DistrictSelector::Named(name) => {
            let district = districts.get(name)?;
            Ok(registry
                .iter()
                .map(|dataset| (dataset.id, within(dataset, &district.boundary)))
                .collect())
        }
    }
}

/// Records lying wholly inside `boundary`. Boundary-touching records are excluded.
pub fn within<'a>(dataset: &'a Dataset, boundary: &MultiPolygon<f64>) -> Vec<&'a GeoRecord> {
    let Some(rect) = boundary.bounding_rect() else {
        return Vec::new();
    };
    let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

    // A contained record's envelope lies inside the boundary's envelope.
    let mut candidates: Vec<usize> = dataset
        .index
        .locate_in_envelope(&envelope)
        .map(|item| item.position)
        .collect();
    candidates.sort_unstable();

    candidates
        .par_iter()
        .filter_map(|&position| {
            let record = &dataset.records[position];
            shape_within(&record.shape, boundary).then_some(record)
        })
        .collect()
}

fn shape_within(shape: &Shape, boundary: &MultiPolygon<f64>) -> bool {
    match shape {
        Shape::Point(point) => boundary.contains(point),
        Shape::Area(area) => boundary.contains(area),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttrValue, District, GeometryKind};
    use geo::{polygon, Point};
    use std::collections::HashMap;

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]])
    }

    fn point(id: &str, x: f64, y: f64) -> GeoRecord {
        GeoRecord {
            shape: Shape::Point(Point::new(x, y)),
            attributes: HashMap::from([("id".to_string(), AttrValue::Text(id.to_string()))]),
        }
    }

    fn area(id: &str, mp: MultiPolygon<f64>) -> GeoRecord {
        GeoRecord {
            shape: Shape::Area(mp),
            attributes: HashMap::from([("id".to_string(), AttrValue::Text(id.to_string()))]),
        }
    }

    fn ids(records: &[&GeoRecord]) -> Vec<String> {
        records.iter().map(|r| r.attr("id").to_string()).collect()
    }

    fn fixture() -> (Registry, DistrictIndex) {
        let accidents = Dataset::new(
            DatasetId::Accidents,
            GeometryKind::Point,
            vec![
                point("west-in", 0.5, 0.5),
                point("east-in", 3.5, 0.5),
                point("outside", 9.0, 9.0),
                point("west-in-2", 1.5, 1.5),
                point("on-edge", 2.0, 1.0),
            ],
        );
        let parks = Dataset::new(
            DatasetId::Parks,
            GeometryKind::Area,
            vec![
                area("inside", square(0.25, 0.25, 0.5)),
                area("straddling", square(1.5, 0.5, 1.0)),
            ],
        );
        let districts = DistrictIndex::from_districts([
            District {
                code: "11110".into(),
                name: "서구".into(),
                boundary: square(0.0, 0.0, 2.0),
            },
            District {
                code: "11140".into(),
                name: "동구".into(),
                boundary: square(2.0, 0.0, 2.0),
            },
        ]);
        (Registry::from_datasets([accidents, parks]), districts)
    }

    #[test]
    fn all_is_identity() {
        let (registry, districts) = fixture();
        let filtered = filter(&registry, &districts, &DistrictSelector::All).unwrap();

        for dataset in registry.iter() {
            let got = &filtered[&dataset.id];
            assert_eq!(got.len(), dataset.len());
            assert!(got.iter().zip(&dataset.records).all(|(a, b)| std::ptr::eq(*a, b)));
        }
    }

    #[test]
    fn named_district_keeps_only_contained_records() {
        let (registry, districts) = fixture();
        let filtered = filter(&registry, &districts, &DistrictSelector::Named("서구".into())).unwrap();

        assert_eq!(ids(&filtered[&DatasetId::Accidents]), vec!["west-in", "west-in-2"]);
        assert_eq!(ids(&filtered[&DatasetId::Parks]), vec!["inside"]);

        let boundary = &districts.get("서구").unwrap().boundary;
        for records in filtered.values() {
            assert!(records.iter().all(|r| shape_within(&r.shape, boundary)));
        }
    }

    #[test]
    fn boundary_points_belong_to_no_district() {
        let (registry, districts) = fixture();
        let mut seen = Vec::new();
        for name in districts.names() {
            let filtered =
                filter(&registry, &districts, &DistrictSelector::Named(name.to_string())).unwrap();
            seen.extend(ids(&filtered[&DatasetId::Accidents]));
        }
        seen.sort();
        assert_eq!(seen, vec!["east-in", "west-in", "west-in-2"]);
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let (registry, districts) = fixture();
        let filtered = filter(&registry, &districts, &DistrictSelector::Named("동구".into())).unwrap();
        assert!(filtered[&DatasetId::Parks].is_empty());
        assert_eq!(ids(&filtered[&DatasetId::Accidents]), vec!["east-in"]);
    }

    #[test]
    fn unknown_district_is_an_error() {
        let (registry, districts) = fixture();
        let err = filter(&registry, &districts, &DistrictSelector::Named("없는구".into())).unwrap_err();
        assert_eq!(err, UnknownDistrictError("없는구".into()));
    }

    #[test]
    fn repeated_filtering_is_deterministic() {
        let (registry, districts) = fixture();
        let selector = DistrictSelector::Named("서구".into());
        let first = filter(&registry, &districts, &selector).unwrap();
        let second = filter(&registry, &districts, &selector).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.get(DatasetId::Accidents).unwrap().len(), 5);
    }
}
