use crate::data::RISK_SCORE_COLUMN;
use crate::filter::Filtered;
use crate::types::{DatasetId, GeoRecord, GeometryKind, Shape};
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
    pub color: &'static str,
    pub size: f64,
    pub opacity: f64,
    pub line_width: f64,
}

const fn marker(color: &'static str, size: f64) -> Style {
    Style {
        color,
        size,
        opacity: 1.0,
        line_width: 0.0,
    }
}

const fn region(color: &'static str, opacity: f64) -> Style {
    Style {
        color,
        size: 0.0,
        opacity,
        line_width: 1.0,
    }
}

pub type HoverFn = fn(&GeoRecord) -> String;

#[derive(Debug, Clone, Copy)]
pub struct LayerSpec {
    pub dataset: DatasetId,
    pub kind: GeometryKind,
    pub legend: &'static str,
    pub default_visible: bool,
    pub style: Style,
    // None disables hover
    pub hover: Option<HoverFn>,
}

pub static LAYER_SPECS: [LayerSpec; 12] = [
    LayerSpec {
        dataset: DatasetId::RiskVeryHigh,
        kind: GeometryKind::Point,
        legend: "사고위험도_매우높음",
        default_visible: true,
        style: marker("red", 20.0),
        hover: Some(hover_risk_very_high),
    },
    LayerSpec {
        dataset: DatasetId::RiskHigh,
        kind: GeometryKind::Point,
        legend: "사고위험도_높음",
        default_visible: false,
        style: marker("orange", 10.0),
        hover: Some(hover_risk_high),
    },
    LayerSpec {
        dataset: DatasetId::Accidents,
        kind: GeometryKind::Point,
        legend: "교통사고",
        default_visible: false,
        style: marker("brown", 5.0),
        hover: Some(hover_accident),
    },
    LayerSpec {
        dataset: DatasetId::Stores,
        kind: GeometryKind::Point,
        legend: "상가정보",
        default_visible: false,
        style: marker("blue", 5.0),
        hover: Some(hover_store),
    },
    LayerSpec {
        dataset: DatasetId::ElderWelfare,
        kind: GeometryKind::Point,
        legend: "노인복지시설",
        default_visible: false,
        style: marker("royalblue", 5.0),
        hover: Some(hover_welfare),
    },
    LayerSpec {
        dataset: DatasetId::SubwayEntrances,
        kind: GeometryKind::Point,
        legend: "지하철출입구",
        default_visible: false,
        style: marker("black", 5.0),
        hover: Some(hover_subway),
    },
    LayerSpec {
        dataset: DatasetId::BusStops,
        kind: GeometryKind::Point,
        legend: "버스정류장",
        default_visible: false,
        style: marker("dimgray", 5.0),
        hover: Some(hover_bus_stop),
    },
    LayerSpec {
        dataset: DatasetId::Intersections,
        kind: GeometryKind::Point,
        legend: "교차로",
        default_visible: false,
        style: marker("green", 5.0),
        hover: Some(hover_intersection),
    },
    LayerSpec {
        dataset: DatasetId::Crosswalks,
        kind: GeometryKind::Point,
        legend: "횡단보도",
        default_visible: false,
        style: marker("seagreen", 5.0),
        hover: Some(hover_crosswalk),
    },
    LayerSpec {
        dataset: DatasetId::Parks,
        kind: GeometryKind::Area,
        legend: "도시공원",
        default_visible: true,
        style: region("green", 0.4),
        hover: None,
    },
    LayerSpec {
        dataset: DatasetId::Markets,
        kind: GeometryKind::Area,
        legend: "전통시장",
        default_visible: true,
        style: region("yellow", 0.5),
        hover: None,
    },
    LayerSpec {
        dataset: DatasetId::ElderZones,
        kind: GeometryKind::Area,
        legend: "노인보호구역",
        default_visible: true,
        style: region("purple", 0.7),
        hover: Some(hover_elder_zone),
    },
];

pub fn spec_for(dataset: DatasetId) -> &'static LayerSpec {
    // LAYER_SPECS is declared in DatasetId::ALL order.
    &LAYER_SPECS[dataset as usize]
}

fn text(record: &GeoRecord, key: &str) -> String {
    record.attr(key).to_string()
}

fn score(record: &GeoRecord) -> String {
    record
        .attr(RISK_SCORE_COLUMN)
        .as_number()
        .map(|s| format!("{:.2}", s))
        .unwrap_or_else(|| "-".to_string())
}

fn hover_risk_very_high(r: &GeoRecord) -> String {
    format!("위험도: 매우높음<br>점수: {}", score(r))
}

fn hover_risk_high(r: &GeoRecord) -> String {
    format!("위험도: 높음<br>점수: {}", score(r))
}

fn hover_accident(r: &GeoRecord) -> String {
    format!(
        "사고번호: {}<br>발생일자: {}<br>사고유형: {}",
        text(r, "acdnt_no"),
        text(r, "acdnt_dd_dc"),
        text(r, "acdnt_gae_dc")
    )
}

fn hover_store(r: &GeoRecord) -> String {
    format!(
        "상호명: {}<br>상권업종(대): {}<br>상권업종(중): {}",
        text(r, "상호명"),
        text(r, "상권업종대분류명"),
        text(r, "상권업종중분류명")
    )
}

fn hover_welfare(r: &GeoRecord) -> String {
    format!(
        "시설번호: {}<br>시설명: {}<br>시설유형: {}",
        text(r, "시설코드"),
        text(r, "시설명"),
        text(r, "시설_중분류")
    )
}

fn hover_subway(r: &GeoRecord) -> String {
    format!("출구번호: {}", text(r, "ENTRC_NO"))
}

fn hover_bus_stop(r: &GeoRecord) -> String {
    format!(
        "정류소명: {}<br>정류소유형: {}",
        text(r, "정류소명"),
        text(r, "정류소타입")
    )
}

fn hover_intersection(r: &GeoRecord) -> String {
    format!(
        "관리번호: {}<br>교차로명: {}",
        text(r, "교차로관리번호"),
        text(r, "교차로명칭")
    )
}

fn hover_crosswalk(r: &GeoRecord) -> String {
    format!("관리번호: {}", text(r, "횡단보도관리번호"))
}

fn hover_elder_zone(r: &GeoRecord) -> String {
    text(r, "CONTS_NAME_EXT")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Features {
    Markers {
        lat: Vec<f64>,
        lon: Vec<f64>,
        hover: Vec<String>,
    },
    Regions {
        collection: FeatureCollection,
        locations: Vec<String>,
        hover: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub dataset: DatasetId,
    pub name: &'static str,
    pub kind: GeometryKind,
    pub visible: bool,
    pub style: Style,
    pub hover_enabled: bool,
    pub features: Features,
}

impl Layer {
    pub fn len(&self) -> usize {
        match &self.features {
            Features::Markers { lat, .. } => lat.len(),
            Features::Regions { locations, .. } => locations.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_trace(&self) -> Value {
        let visible = if self.visible {
            json!(true)
        } else {
            json!("legendonly")
        };
        let hoverinfo = if self.hover_enabled { "text" } else { "none" };

        match &self.features {
            Features::Markers { lat, lon, hover } => json!({
                "type": "scattermapbox",
                "mode": "markers",
                "lat": lat,
                "lon": lon,
                "marker": {
                    "size": self.style.size,
                    "color": self.style.color,
                    "opacity": self.style.opacity,
                },
                "hovertext": hover,
                "hoverinfo": hoverinfo,
                "name": self.name,
                "visible": visible,
            }),
            Features::Regions {
                collection,
                locations,
                hover,
            } => json!({
                "type": "choroplethmapbox",
                "geojson": collection,
                "locations": locations,
                "z": vec![1; locations.len()],
                "colorscale": [[0, self.style.color], [1, self.style.color]],
                "showscale": false,
                "marker": {
                    "opacity": self.style.opacity,
                    "line": { "width": self.style.line_width },
                },
                "hovertext": hover,
                "hoverinfo": hoverinfo,
                "name": self.name,
                "showlegend": true,
                "visible": visible,
            }),
        }
    }
}

/// Builds one layer from a filtered record slice. An empty slice yields an empty layer.
pub fn build(dataset: DatasetId, records: &[&GeoRecord]) -> Layer {
    let spec = spec_for(dataset);
    let hover = |r: &GeoRecord| spec.hover.map(|f| f(r)).unwrap_or_default();

    let features = match spec.kind {
        GeometryKind::Point => {
            let points: Vec<_> = records
                .iter()
                .copied()
                .filter_map(|r| match &r.shape {
                    Shape::Point(p) => Some((p, hover(r))),
                    Shape::Area(_) => None,
                })
                .collect();
            Features::Markers {
                lat: points.iter().map(|(p, _)| p.y()).collect(),
                lon: points.iter().map(|(p, _)| p.x()).collect(),
                hover: points.into_iter().map(|(_, h)| h).collect(),
            }
        }
        GeometryKind::Area => {
            let mut features = Vec::with_capacity(records.len());
            let mut hovers = Vec::with_capacity(records.len());
            for (position, record) in records.iter().copied().enumerate() {
                if let Shape::Area(mp) = &record.shape {
                    features.push(Feature {
                        bbox: None,
                        geometry: Some(geojson::Geometry::new(geojson::Value::from(mp))),
                        id: Some(Id::String(position.to_string())),
                        properties: None,
                        foreign_members: None,
                    });
                    hovers.push(hover(record));
                }
            }
            let locations = features
                .iter()
                .filter_map(|f| match &f.id {
                    Some(Id::String(id)) => Some(id.clone()),
                    _ => None,
                })
                .collect();
            Features::Regions {
                collection: FeatureCollection {
                    bbox: None,
                    features,
                    foreign_members: None,
                },
                locations,
                hover: hovers,
            }
        }
    };

    Layer {
        dataset,
        name: spec.legend,
        kind: spec.kind,
        visible: spec.default_visible,
        style: spec.style,
        hover_enabled: spec.hover.is_some(),
        features,
    }
}

pub fn build_all(filtered: &Filtered<'_>) -> Vec<Layer> {
    LAYER_SPECS
        .iter()
        .map(|spec| {
            let records = filtered.get(&spec.dataset).map(Vec::as_slice).unwrap_or(&[]);
            build(spec.dataset, records)
        })
        .collect()
}
