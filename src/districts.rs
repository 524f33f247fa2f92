use crate::config::DistrictSourceConfig;
use crate::crs::Reprojector;
use crate::dbf::{self, encoding_for_label};
use crate::error::{LoadError, UnknownDistrictError};
use crate::types::{AttrValue, District, ALL_DISTRICTS};
use geo::MultiPolygon;
use geojson::GeoJson;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

const LABEL: &str = "districts";

pub const ALL_DISTRICTS_LABEL: &str = "전체";

#[derive(Debug, Clone, Default)]
pub struct DistrictIndex {
    districts: Vec<District>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SelectorOption {
    pub label: String,
    pub value: String,
}

impl DistrictIndex {
    pub fn load(source: &DistrictSourceConfig, path: &Path) -> Result<Self, LoadError> {
        info!("Loading districts from {:?}...", path);

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .ok_or_else(|| LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            })?;

        let rows = match extension.as_str() {
            "shp" => read_shapefile(source, path)?,
            "json" | "geojson" => read_geojson(source, path)?,
            _ => {
                return Err(LoadError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        let reprojector = Reprojector::to_canonical(&source.crs)?;
        let mut index = DistrictIndex::default();
        for (code, name, boundary) in rows {
            if !code.starts_with(&source.region_prefix) {
                continue;
            }
            index.insert(District {
                code,
                name,
                boundary: reprojector.multi_polygon(boundary)?,
            });
        }

        if index.districts.is_empty() {
            return Err(LoadError::NoDistricts {
                prefix: source.region_prefix.clone(),
                path: path.to_path_buf(),
            });
        }

        info!("Loaded {} districts", index.districts.len());
        Ok(index)
    }

    pub fn from_districts(districts: impl IntoIterator<Item = District>) -> Self {
        let mut index = DistrictIndex::default();
        for district in districts {
            index.insert(district);
        }
        index
    }

    // Rows sharing a display name merge into one boundary.
    fn insert(&mut self, district: District) {
        match self.districts.iter_mut().find(|d| d.name == district.name) {
            Some(existing) => existing.boundary.0.extend(district.boundary.0),
            None => self.districts.push(district),
        }
    }

    pub fn get(&self, name: &str) -> Result<&District, UnknownDistrictError> {
        self.districts
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| UnknownDistrictError(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.districts.iter().map(|d| d.name.as_str())
    }

    pub fn options(&self) -> Vec<SelectorOption> {
        std::iter::once(SelectorOption {
            label: ALL_DISTRICTS_LABEL.to_string(),
            value: ALL_DISTRICTS.to_string(),
        })
        .chain(self.names().map(|name| SelectorOption {
            label: name.to_string(),
            value: name.to_string(),
        }))
        .collect()
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }
}

type Row = (String, String, MultiPolygon<f64>);

fn attr_string(value: &AttrValue) -> Option<String> {
    match value {
        AttrValue::Missing => None,
        other => Some(other.to_string()),
    }
}

fn read_shapefile(source: &DistrictSourceConfig, path: &Path) -> Result<Vec<Row>, LoadError> {
    let encoding = encoding_for_label(&source.encoding)?;
    let (shapes, table) = dbf::read_shapefile(LABEL, path, encoding)?;

    let column_idx = |name: &str| {
        table.column(name).ok_or_else(|| LoadError::MissingColumn {
            dataset: LABEL,
            path: path.with_extension("dbf"),
            column: name.to_string(),
        })
    };
    let code_idx = column_idx(source.code_column.as_str())?;
    let name_idx = column_idx(source.name_column.as_str())?;

    let mut rows = Vec::new();
    for (i, shape) in shapes.into_iter().enumerate() {
        let Some(code) = attr_string(table.value(i, code_idx)) else {
            continue;
        };
        let Some(name) = attr_string(table.value(i, name_idx)) else {
            continue;
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => MultiPolygon::from(polygon),
            shapefile::Shape::PolygonM(polygon) => MultiPolygon::from(polygon),
            shapefile::Shape::PolygonZ(polygon) => MultiPolygon::from(polygon),
            shapefile::Shape::NullShape => continue,
            _ => {
                return Err(LoadError::UnexpectedGeometry {
                    dataset: LABEL,
                    row: i + 1,
                    expected: "polygon",
                })
            }
        };

        rows.push((code, name, geometry));
    }

    Ok(rows)
}

fn read_geojson(source: &DistrictSourceConfig, path: &Path) -> Result<Vec<Row>, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::Io {
        dataset: LABEL,
        path: path.to_path_buf(),
        source: e,
    })?;
    let geojson_err = |message: String| LoadError::GeoJson {
        dataset: LABEL,
        path: path.to_path_buf(),
        message,
    };

    let geojson = GeoJson::from_reader(BufReader::new(file)).map_err(|e| geojson_err(e.to_string()))?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(geojson_err("districts must be a FeatureCollection".to_string())),
    };

    let mut rows = Vec::new();
    for (i, feature) in collection.features.into_iter().enumerate() {
        let property = |key: &str| match feature.properties.as_ref().and_then(|p| p.get(key)) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let (Some(code), Some(name)) = (
            property(source.code_column.as_str()),
            property(source.name_column.as_str()),
        ) else {
            continue;
        };

        let geometry = match feature.geometry {
            Some(geometry) => {
                let value: geo::Geometry<f64> = geometry
                    .value
                    .try_into()
                    .map_err(|e: geojson::Error| geojson_err(e.to_string()))?;
                match value {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        return Err(LoadError::UnexpectedGeometry {
                            dataset: LABEL,
                            row: i + 1,
                            expected: "polygon",
                        })
                    }
                }
            }
            None => continue,
        };

        rows.push((code, name, geometry));
    }

    Ok(rows)
}
