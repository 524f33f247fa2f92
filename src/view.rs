use crate::config::ViewConfig;
use crate::layers::Layer;
use crate::types::{DatasetId, DistrictSelector, GeoRecord, GeometryKind, Shape};
use serde::Serialize;
use serde_json::{json, Value};

pub const TILELESS_STYLE: &str = "white-bg";

pub const DISTRICT_FORCED_VISIBLE: [DatasetId; 2] = [DatasetId::RiskVeryHigh, DatasetId::RiskHigh];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    // area layers first, then points
    pub layers: Vec<Layer>,
    pub center: Center,
    pub zoom: f64,
    pub map_style: String,
    pub access_token: Option<String>,
    pub show_legend: bool,
}

/// Mean lat/lon of the point records, or `None` when there are none.
pub fn compute_center(records: &[&GeoRecord]) -> Option<Center> {
    let (count, lat_sum, lon_sum) = records
        .iter()
        .filter_map(|r| match &r.shape {
            Shape::Point(p) => Some(p),
            Shape::Area(_) => None,
        })
        .fold((0usize, 0.0, 0.0), |(n, lat, lon), p| (n + 1, lat + p.y(), lon + p.x()));

    (count > 0).then(|| Center {
        lat: lat_sum / count as f64,
        lon: lon_sum / count as f64,
    })
}

pub fn compose(
    mut layers: Vec<Layer>,
    selector: &DistrictSelector,
    accidents: &[&GeoRecord],
    config: &ViewConfig,
    access_token: Option<&str>,
) -> View {
    let [lat, lon] = config.fallback_center;
    let center = compute_center(accidents).unwrap_or(Center { lat, lon });

    let zoom = if selector.is_all() {
        config.base_zoom
    } else {
        for layer in layers.iter_mut() {
            if DISTRICT_FORCED_VISIBLE.contains(&layer.dataset) {
                layer.visible = true;
            }
        }
        config.district_zoom
    };

    // Stable sort keeps declaration order inside each group.
    layers.sort_by_key(|layer| match layer.kind {
        GeometryKind::Area => 0,
        GeometryKind::Point => 1,
    });

    let (map_style, access_token) = match access_token {
        Some(token) => (config.map_style.clone(), Some(token.to_string())),
        None => (TILELESS_STYLE.to_string(), None),
    };

    View {
        layers,
        center,
        zoom,
        map_style,
        access_token,
        show_legend: true,
    }
}

impl View {
    pub fn layer(&self, dataset: DatasetId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.dataset == dataset)
    }

    pub fn to_figure(&self) -> Value {
        let mut mapbox = json!({
            "style": self.map_style,
            "zoom": self.zoom,
            "center": self.center,
        });
        if let Some(token) = &self.access_token {
            mapbox["accesstoken"] = json!(token);
        }

        json!({
            "data": self.layers.iter().map(Layer::to_trace).collect::<Vec<_>>(),
            "layout": {
                "mapbox": mapbox,
                "showlegend": self.show_legend,
                "margin": { "r": 0, "t": 30, "l": 0, "b": 0 },
                "autosize": true,
            },
        })
    }
}
