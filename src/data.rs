use crate::config::{InputConfig, RISK_SOURCE_KEY};
use crate::crs::Reprojector;
use crate::dbf::{self, encoding_for_label};
use crate::error::LoadError;
use crate::types::{AttrValue, Dataset, DatasetId, GeoRecord, GeometryKind, Shape};
use csv::ReaderBuilder;
use geo::{Geometry, MultiPolygon, Point};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use wkt::TryFromWkt;

#[derive(Debug, Clone, Copy)]
pub enum GeometryEncoding {
    Columns { x: &'static str, y: &'static str },
    Wkt { column: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub struct SourceSpec {
    pub id: DatasetId,
    pub file: &'static str,
    pub crs: &'static str,
    pub geometry: GeometryEncoding,
    pub kind: GeometryKind,
    pub columns: &'static [&'static str],
}

const LON_LAT: GeometryEncoding = GeometryEncoding::Columns { x: "longitude", y: "latitude" };
const XY: GeometryEncoding = GeometryEncoding::Columns { x: "X좌표", y: "Y좌표" };
const WKT_GEOMETRY: GeometryEncoding = GeometryEncoding::Wkt { column: "geometry" };

pub const CSV_SOURCES: [SourceSpec; 10] = [
    SourceSpec {
        id: DatasetId::Accidents,
        file: "acdnt_df2.csv",
        crs: "EPSG:4326",
        geometry: LON_LAT,
        kind: GeometryKind::Point,
        columns: &["acdnt_no", "acdnt_dd_dc", "acdnt_gae_dc"],
    },
    SourceSpec {
        id: DatasetId::Stores,
        file: "상가필터링.csv",
        crs: "EPSG:4326",
        geometry: GeometryEncoding::Columns { x: "경도", y: "위도" },
        kind: GeometryKind::Point,
        columns: &["상호명", "상권업종대분류명", "상권업종중분류명"],
    },
    SourceSpec {
        id: DatasetId::ElderWelfare,
        file: "welfare2_df5.csv",
        crs: "EPSG:4326",
        geometry: LON_LAT,
        kind: GeometryKind::Point,
        columns: &["시설코드", "시설명", "시설_중분류"],
    },
    SourceSpec {
        id: DatasetId::SubwayEntrances,
        file: "subway_df.csv",
        crs: "EPSG:4326",
        geometry: WKT_GEOMETRY,
        kind: GeometryKind::Point,
        columns: &["ENTRC_NO"],
    },
    SourceSpec {
        id: DatasetId::BusStops,
        file: "busstop_df.csv",
        crs: "EPSG:4326",
        geometry: XY,
        kind: GeometryKind::Point,
        columns: &["정류소명", "정류소타입"],
    },
    SourceSpec {
        id: DatasetId::Intersections,
        file: "crossroad_df.csv",
        crs: "EPSG:5186",
        geometry: XY,
        kind: GeometryKind::Point,
        columns: &["교차로관리번호", "교차로명칭"],
    },
    SourceSpec {
        id: DatasetId::Crosswalks,
        file: "crosswalk_df.csv",
        crs: "EPSG:5186",
        geometry: XY,
        kind: GeometryKind::Point,
        columns: &["횡단보도관리번호"],
    },
    SourceSpec {
        id: DatasetId::Parks,
        file: "park_df.csv",
        crs: "EPSG:4326",
        geometry: WKT_GEOMETRY,
        kind: GeometryKind::Area,
        columns: &["LABEL"],
    },
    SourceSpec {
        id: DatasetId::Markets,
        file: "local_market_df.csv",
        crs: "EPSG:4326",
        geometry: WKT_GEOMETRY,
        kind: GeometryKind::Area,
        columns: &["TRDAR_CD_N"],
    },
    SourceSpec {
        id: DatasetId::ElderZones,
        file: "prtz_df3.csv",
        crs: "EPSG:4326",
        geometry: WKT_GEOMETRY,
        kind: GeometryKind::Area,
        columns: &["CONTS_NAME_EXT"],
    },
];

pub const RISK_FILE: &str = "사고위험도/points_사고위험도.shp";
pub const RISK_CRS: &str = "EPSG:5179";
pub const RISK_TIER_COLUMN: &str = "사고위험등";
pub const RISK_SCORE_COLUMN: &str = "사고발생_";
pub const RISK_ENCODING: &str = "cp949";

#[derive(Debug)]
pub struct Registry {
    datasets: BTreeMap<DatasetId, Dataset>,
}

impl Registry {
    pub fn load(input: &InputConfig) -> Result<Self, LoadError> {
        info!("Loading {} tabular sources...", CSV_SOURCES.len());

        // Each worker builds its own Reprojector; nothing is shared across threads.
        let mut datasets: Vec<Dataset> = CSV_SOURCES
            .par_iter()
            .map(|spec| {
                let (path, crs) = source_location(input, spec.id.key(), spec.file, spec.crs);
                load_csv_source(spec, &path, &crs)
            })
            .collect::<Result<_, _>>()?;

        let (path, crs) = source_location(input, RISK_SOURCE_KEY, RISK_FILE, RISK_CRS);
        let encoding = input
            .source(RISK_SOURCE_KEY)
            .and_then(|o| o.encoding.as_deref())
            .unwrap_or(RISK_ENCODING);
        let (very_high, high) = load_risk_scores(&path, &crs, encoding_for_label(encoding)?)?;
        datasets.push(very_high);
        datasets.push(high);

        for dataset in &datasets {
            info!("Loaded {} records for {}", dataset.len(), dataset.id.key());
        }

        Ok(Registry::from_datasets(datasets))
    }

    pub fn from_datasets(datasets: impl IntoIterator<Item = Dataset>) -> Self {
        Registry {
            datasets: datasets.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    pub fn get(&self, id: DatasetId) -> Option<&Dataset> {
        self.datasets.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }
}

fn source_location(
    input: &InputConfig,
    key: &str,
    default_file: &str,
    default_crs: &str,
) -> (PathBuf, String) {
    let overrides = input.source(key);
    let file = overrides
        .and_then(|o| o.path.clone())
        .unwrap_or_else(|| PathBuf::from(default_file));
    let crs = overrides
        .and_then(|o| o.crs.clone())
        .unwrap_or_else(|| default_crs.to_string());
    (input.resolve(&file), crs)
}

pub fn load_csv_source(spec: &SourceSpec, path: &Path, crs: &str) -> Result<Dataset, LoadError> {
    let label = spec.id.key();
    let file = File::open(path).map_err(|source| LoadError::Io {
        dataset: label,
        path: path.to_path_buf(),
        source,
    })?;
    let csv_err = |source: csv::Error| LoadError::Csv {
        dataset: label,
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = rdr.headers().map_err(csv_err)?.clone();

    let column_idx = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| LoadError::MissingColumn {
                dataset: label,
                path: path.to_path_buf(),
                column: name.to_string(),
            })
    };

    let attr_indices: Vec<(&'static str, usize)> = spec
        .columns
        .iter()
        .map(|&c| column_idx(c).map(|i| (c, i)))
        .collect::<Result<_, _>>()?;

    #[derive(Clone, Copy)]
    enum Geom {
        Columns { x: usize, y: usize },
        Wkt(usize),
    }
    let geom = match spec.geometry {
        GeometryEncoding::Columns { x, y } => Geom::Columns {
            x: column_idx(x)?,
            y: column_idx(y)?,
        },
        GeometryEncoding::Wkt { column } => Geom::Wkt(column_idx(column)?),
    };

    let reprojector = Reprojector::to_canonical(crs)?;
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (i, result) in rdr.records().enumerate() {
        let row = i + 1;
        let record = result.map_err(csv_err)?;

        let shape = match geom {
            Geom::Columns { x: xi, y: yi } => {
                let raw_x = record.get(xi).unwrap_or("").trim();
                let raw_y = record.get(yi).unwrap_or("").trim();
                if raw_x.is_empty() || raw_y.is_empty() {
                    skipped += 1;
                    continue;
                }
                let x = parse_coordinate(label, &headers[xi], row, raw_x)?;
                let y = parse_coordinate(label, &headers[yi], row, raw_y)?;
                Shape::Point(reprojector.point(Point::new(x, y))?)
            }
            Geom::Wkt(idx) => {
                let raw = record.get(idx).unwrap_or("").trim();
                if raw.is_empty() {
                    skipped += 1;
                    continue;
                }
                let geometry = Geometry::<f64>::try_from_wkt_str(raw).map_err(|e| {
                    LoadError::BadGeometry {
                        dataset: label,
                        row,
                        message: e.to_string(),
                    }
                })?;
                let shape = shape_of_kind(label, row, spec.kind, geometry)?;
                reproject_shape(&reprojector, shape)?
            }
        };

        let attributes = attr_indices
            .iter()
            .map(|&(name, idx)| {
                let value = match record.get(idx).map(str::trim) {
                    Some(v) if !v.is_empty() => AttrValue::Text(v.to_string()),
                    _ => AttrValue::Missing,
                };
                (name.to_string(), value)
            })
            .collect();

        records.push(GeoRecord { shape, attributes });
    }

    if skipped > 0 {
        warn!("{}: skipped {} rows without geometry", label, skipped);
    }

    Ok(Dataset::new(spec.id, spec.kind, records))
}

fn parse_coordinate(label: &'static str, column: &str, row: usize, raw: &str) -> Result<f64, LoadError> {
    raw.parse::<f64>().map_err(|_| LoadError::BadCoordinate {
        dataset: label,
        column: column.to_string(),
        row,
        value: raw.to_string(),
    })
}

fn shape_of_kind(
    label: &'static str,
    row: usize,
    kind: GeometryKind,
    geometry: Geometry<f64>,
) -> Result<Shape, LoadError> {
    let shape = match (kind, geometry) {
        (GeometryKind::Point, Geometry::Point(p)) => Some(Shape::Point(p)),
        (GeometryKind::Point, Geometry::MultiPoint(mp)) if mp.0.len() == 1 => {
            mp.0.into_iter().next().map(Shape::Point)
        }
        (GeometryKind::Area, Geometry::Polygon(p)) => Some(Shape::Area(MultiPolygon::new(vec![p]))),
        (GeometryKind::Area, Geometry::MultiPolygon(mp)) => Some(Shape::Area(mp)),
        _ => None,
    };

    shape.ok_or(LoadError::UnexpectedGeometry {
        dataset: label,
        row,
        expected: match kind {
            GeometryKind::Point => "point",
            GeometryKind::Area => "polygon",
        },
    })
}

fn reproject_shape(reprojector: &Reprojector, shape: Shape) -> Result<Shape, LoadError> {
    match shape {
        Shape::Point(p) => reprojector.point(p).map(Shape::Point),
        Shape::Area(mp) => reprojector.multi_polygon(mp).map(Shape::Area),
    }
}

/// Loads the risk-score points and splits them into tier 4 and tier 3.
pub fn load_risk_scores(
    path: &Path,
    crs: &str,
    encoding: &'static encoding_rs::Encoding,
) -> Result<(Dataset, Dataset), LoadError> {
    const LABEL: &str = "risk_scores";

    let (shapes, table) = dbf::read_shapefile(LABEL, path, encoding)?;
    let column_idx = |name: &str| {
        table.column(name).ok_or_else(|| LoadError::MissingColumn {
            dataset: LABEL,
            path: path.with_extension("dbf"),
            column: name.to_string(),
        })
    };
    let tier_idx = column_idx(RISK_TIER_COLUMN)?;
    let score_idx = column_idx(RISK_SCORE_COLUMN)?;

    let reprojector = Reprojector::to_canonical(crs)?;
    let mut very_high = Vec::new();
    let mut high = Vec::new();

    for (i, shape) in shapes.into_iter().enumerate() {
        let point = match shape {
            shapefile::Shape::Point(p) => Point::new(p.x, p.y),
            shapefile::Shape::PointM(p) => Point::new(p.x, p.y),
            shapefile::Shape::PointZ(p) => Point::new(p.x, p.y),
            shapefile::Shape::NullShape => continue,
            _ => {
                return Err(LoadError::UnexpectedGeometry {
                    dataset: LABEL,
                    row: i + 1,
                    expected: "point",
                })
            }
        };

        let tier = table.value(i, tier_idx);
        let target = match tier.as_number().map(|t| t.round() as i64) {
            Some(4) => &mut very_high,
            Some(3) => &mut high,
            _ => continue,
        };

        let attributes = HashMap::from([
            (RISK_TIER_COLUMN.to_string(), tier.clone()),
            (RISK_SCORE_COLUMN.to_string(), table.value(i, score_idx).clone()),
        ]);
        target.push(GeoRecord {
            shape: Shape::Point(reprojector.point(point)?),
            attributes,
        });
    }

    Ok((
        Dataset::new(DatasetId::RiskVeryHigh, GeometryKind::Point, very_high),
        Dataset::new(DatasetId::RiskHigh, GeometryKind::Point, high),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbf::fixtures::{write_points, write_table};
    use approx::assert_abs_diff_eq;
    use std::fs;

    const ORIGIN_5179: (f64, f64) = (1_000_000.0, 2_000_000.0);

    fn write_risk_source(path: &Path, rows: &[(Option<(f64, f64)>, &str, &str)]) {
        let points: Vec<_> = rows.iter().map(|r| r.0).collect();
        write_points(path, &points);
        write_table(
            &path.with_extension("dbf"),
            encoding_rs::EUC_KR,
            &[(RISK_TIER_COLUMN, b'N', 4), (RISK_SCORE_COLUMN, b'N', 12)],
            &rows.iter().map(|r| vec![r.1, r.2]).collect::<Vec<_>>(),
        );
    }

    fn spec(id: DatasetId) -> &'static SourceSpec {
        CSV_SOURCES.iter().find(|s| s.id == id).unwrap()
    }

    #[test]
    fn every_csv_dataset_has_a_source() {
        let mut ids: Vec<DatasetId> = CSV_SOURCES.iter().map(|s| s.id).collect();
        ids.push(DatasetId::RiskVeryHigh);
        ids.push(DatasetId::RiskHigh);
        ids.sort();
        let mut all = DatasetId::ALL.to_vec();
        all.sort();
        assert_eq!(ids, all);
    }

    #[test]
    fn loads_points_from_coordinate_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acdnt.csv");
        fs::write(
            &path,
            "acdnt_no,acdnt_dd_dc,acdnt_gae_dc,latitude,longitude,extra\n\
             0012,2021-03-01,차대사람,37.50,127.00,x\n\
             0013,2021-03-02,차대차,,,x\n\
             0014,2021-03-03,차량단독,37.54,127.04,x\n",
        )
        .unwrap();

        let dataset = load_csv_source(spec(DatasetId::Accidents), &path, "EPSG:4326").unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.kind, GeometryKind::Point);

        let first = &dataset.records[0];
        assert_eq!(first.shape, Shape::Point(Point::new(127.00, 37.50)));
        assert_eq!(first.attr("acdnt_no"), &AttrValue::Text("0012".to_string()));
        assert!(!first.attributes.contains_key("extra"));
        assert!(!first.attributes.contains_key("latitude"));
    }

    #[test]
    fn loads_polygons_from_wkt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("park.csv");
        fs::write(
            &path,
            "LABEL,geometry\n\
             남산공원,\"POLYGON ((126.98 37.55, 126.99 37.55, 126.99 37.56, 126.98 37.55))\"\n\
             둘,\"MULTIPOLYGON (((127.0 37.5, 127.1 37.5, 127.1 37.6, 127.0 37.5)))\"\n",
        )
        .unwrap();

        let dataset = load_csv_source(spec(DatasetId::Parks), &path, "EPSG:4326").unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset.records.iter().all(|r| r.shape.kind() == GeometryKind::Area));
        assert_eq!(dataset.records[0].attr("LABEL"), &AttrValue::Text("남산공원".to_string()));
    }

    #[test]
    fn wrong_geometry_kind_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subway.csv");
        fs::write(
            &path,
            "ENTRC_NO,geometry\n1,\"POLYGON ((0 0, 1 0, 1 1, 0 0))\"\n",
        )
        .unwrap();

        let err = load_csv_source(spec(DatasetId::SubwayEntrances), &path, "EPSG:4326").unwrap_err();
        assert!(matches!(err, LoadError::UnexpectedGeometry { row: 1, .. }));
    }

    #[test]
    fn missing_column_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crosswalk.csv");
        fs::write(&path, "X좌표,Y좌표\n200000,550000\n").unwrap();

        let err = load_csv_source(spec(DatasetId::Crosswalks), &path, "EPSG:4326").unwrap_err();
        match err {
            LoadError::MissingColumn { column, .. } => assert_eq!(column, "횡단보도관리번호"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_csv_source(
            spec(DatasetId::BusStops),
            &dir.path().join("nope.csv"),
            "EPSG:4326",
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Io { dataset: "bus_stops", .. }));
    }

    #[test]
    fn unparsable_coordinate_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.csv");
        fs::write(&path, "정류소명,정류소타입,X좌표,Y좌표\n시청,중앙,abc,37.5\n").unwrap();

        let err = load_csv_source(spec(DatasetId::BusStops), &path, "EPSG:4326").unwrap_err();
        assert!(matches!(err, LoadError::BadCoordinate { row: 1, .. }));
    }

    #[test]
    fn risk_scores_split_into_top_two_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.shp");
        write_risk_source(
            &path,
            &[
                (Some(ORIGIN_5179), "4", "0.9731"),
                (Some(ORIGIN_5179), "3", "0.5"),
                (None, "4", "0.8"),
                (Some(ORIGIN_5179), "2", "0.2"),
                (Some(ORIGIN_5179), "", ""),
            ],
        );

        let (very_high, high) = load_risk_scores(&path, RISK_CRS, encoding_rs::EUC_KR).unwrap();
        assert_eq!(very_high.id, DatasetId::RiskVeryHigh);
        assert_eq!(very_high.len(), 1);
        assert_eq!(high.len(), 1);

        let record = &very_high.records[0];
        assert_eq!(record.attr(RISK_TIER_COLUMN), &AttrValue::Number(4.0));
        assert_eq!(record.attr(RISK_SCORE_COLUMN), &AttrValue::Number(0.9731));
        match &record.shape {
            Shape::Point(p) => {
                assert_abs_diff_eq!(p.x(), 127.5, epsilon = 1e-6);
                assert_abs_diff_eq!(p.y(), 38.0, epsilon = 1e-6);
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn risk_columns_are_checked_before_any_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.shp");
        write_points(&path, &[]);
        write_table(
            &path.with_extension("dbf"),
            encoding_rs::EUC_KR,
            &[("SIG_CD", b'C', 5)],
            &[],
        );

        let err = load_risk_scores(&path, RISK_CRS, encoding_rs::EUC_KR).unwrap_err();
        match err {
            LoadError::MissingColumn { column, .. } => assert_eq!(column, RISK_TIER_COLUMN),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_attribute_table_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.shp");
        write_points(&path, &[Some(ORIGIN_5179)]);

        let err = load_risk_scores(&path, RISK_CRS, encoding_rs::EUC_KR).unwrap_err();
        assert!(matches!(err, LoadError::Dbase { dataset: "risk_scores", .. }));
    }

    #[test]
    fn registry_loads_every_source_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let headers = [
            ("acdnt_df2.csv", "acdnt_no,acdnt_dd_dc,acdnt_gae_dc,latitude,longitude\n1,2021-01-01,차대사람,37.5,127.0\n"),
            ("상가필터링.csv", "상호명,상권업종대분류명,상권업종중분류명,경도,위도\n"),
            ("welfare2_df5.csv", "시설코드,시설명,시설_중분류,latitude,longitude\n"),
            ("subway_df.csv", "ENTRC_NO,geometry\n"),
            ("busstop_df.csv", "정류소명,정류소타입,X좌표,Y좌표\n"),
            ("crossroad_df.csv", "교차로관리번호,교차로명칭,X좌표,Y좌표\n"),
            ("park_df.csv", "LABEL,geometry\n"),
            ("local_market_df.csv", "TRDAR_CD_N,geometry\n"),
            ("prtz_df3.csv", "CONTS_NAME_EXT,geometry\n"),
        ];
        for (file, content) in headers {
            fs::write(root.join(file), content).unwrap();
        }
        fs::create_dir_all(root.join("custom")).unwrap();
        fs::write(
            root.join("custom/cw.csv"),
            "횡단보도관리번호,X좌표,Y좌표\nCW-1,127.01,37.51\n",
        )
        .unwrap();
        fs::create_dir_all(root.join("risk")).unwrap();
        write_risk_source(&root.join("risk/points.shp"), &[(Some((127.0, 37.5)), "4", "1.0")]);

        let input: InputConfig = toml::from_str(&format!(
            r#"
            data_dir = '{}'
            [districts]
            path = "sig.shp"
            [sources.crosswalks]
            path = "custom/cw.csv"
            crs = "EPSG:4326"
            [sources.risk_scores]
            path = "risk/points.shp"
            crs = "EPSG:4326"
            encoding = "euc-kr"
            "#,
            root.display()
        ))
        .unwrap();

        let registry = Registry::load(&input).unwrap();
        assert_eq!(registry.iter().count(), DatasetId::ALL.len());
        assert_eq!(registry.get(DatasetId::Accidents).unwrap().len(), 1);
        assert_eq!(registry.get(DatasetId::RiskHigh).unwrap().len(), 0);

        let crosswalk = &registry.get(DatasetId::Crosswalks).unwrap().records[0];
        assert_eq!(crosswalk.shape, Shape::Point(Point::new(127.01, 37.51)));
        let risk = &registry.get(DatasetId::RiskVeryHigh).unwrap().records[0];
        assert_eq!(risk.shape, Shape::Point(Point::new(127.0, 37.5)));
    }
}
