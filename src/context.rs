use crate::config::{AppConfig, ViewConfig};
use crate::data::Registry;
use crate::districts::DistrictIndex;
use crate::error::{LoadError, UnknownDistrictError};
use crate::filter::filter;
use crate::layers::build_all;
use crate::types::{DatasetId, DistrictSelector};
use crate::view::{compose, View};
use tracing::{debug, info, warn};

pub struct AppContext {
    pub registry: Registry,
    pub districts: DistrictIndex,
    pub view: ViewConfig,
    pub access_token: Option<String>,
}

impl AppContext {
    pub fn load(config: &AppConfig) -> Result<Self, LoadError> {
        let districts_path = config.input.resolve(&config.input.districts.path);
        let districts = DistrictIndex::load(&config.input.districts, &districts_path)?;
        let registry = Registry::load(&config.input)?;

        let access_token = config.access_token();
        if access_token.is_none() {
            warn!("No map-tile access token configured; rendering without background tiles");
        }

        info!("Context ready: {} districts", districts.len());
        Ok(AppContext {
            registry,
            districts,
            view: config.view.clone(),
            access_token,
        })
    }

    pub fn render(&self, selector: &DistrictSelector) -> Result<View, UnknownDistrictError> {
        let filtered = filter(&self.registry, &self.districts, selector)?;
        let accidents = filtered
            .get(&DatasetId::Accidents)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        debug!(
            "Rendering '{}': {} accidents in view",
            selector,
            accidents.len()
        );

        let layers = build_all(&filtered);
        Ok(compose(
            layers,
            selector,
            accidents,
            &self.view,
            self.access_token.as_deref(),
        ))
    }
}
