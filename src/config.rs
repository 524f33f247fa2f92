use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default)]
    pub data_dir: PathBuf,
    pub districts: DistrictSourceConfig,
    // Keyed by dataset key. Both risk tiers share the `risk_scores` entry.
    #[serde(default)]
    pub sources: HashMap<String, SourceOverride>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceOverride {
    pub path: Option<PathBuf>,
    pub crs: Option<String>,
    // Shapefile sources only
    pub encoding: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DistrictSourceConfig {
    pub path: PathBuf,
    #[serde(default = "default_district_crs")]
    pub crs: String,
    #[serde(default = "default_code_column")]
    pub code_column: String,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    // `11` = Seoul
    #[serde(default = "default_region_prefix")]
    pub region_prefix: String,
    #[serde(default = "default_dbf_encoding")]
    pub encoding: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ViewConfig {
    pub title: String,
    pub base_zoom: f64,
    pub district_zoom: f64,
    // [lat, lon]
    pub fallback_center: [f64; 2],
    pub map_style: String,
    pub access_token: Option<String>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            title: "서울시 노인 보행자 교통사고 위험 지도".to_string(),
            base_zoom: 11.0,
            district_zoom: 13.0,
            fallback_center: [37.5665, 126.9780],
            map_style: "mapbox://styles/mapbox/light-v11".to_string(),
            access_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8050,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub export_html: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            export_html: PathBuf::from("output/dashboard.html"),
        }
    }
}

fn default_district_crs() -> String {
    "EPSG:5179".to_string()
}

fn default_code_column() -> String {
    "SIG_CD".to_string()
}

fn default_name_column() -> String {
    "SIG_KOR_NM".to_string()
}

fn default_region_prefix() -> String {
    "11".to_string()
}

pub fn default_dbf_encoding() -> String {
    "cp949".to_string()
}

pub const RISK_SOURCE_KEY: &str = "risk_scores";

// Checked in order. The lowercase key is what older `.env` setups export.
pub const TOKEN_ENV_KEYS: [&str; 2] = ["MAPBOX_ACCESS_TOKEN", "mapbox_accesstoken"];

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    pub fn access_token(&self) -> Option<String> {
        self.token_from(|key| std::env::var(key).ok())
    }

    // Empty values count as absent at every level.
    fn token_from(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        TOKEN_ENV_KEYS
            .iter()
            .filter_map(|key| env(*key))
            .chain(self.view.access_token.clone())
            .find(|token| !token.trim().is_empty())
    }
}

impl InputConfig {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn source(&self, key: &str) -> Option<&SourceOverride> {
        self.sources.get(key)
    }
}
