use std::path::PathBuf;
use thiserror::Error;

/// Failure while loading a source at startup. Always fatal.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{dataset}: failed to open {path:?}: {source}")]
    Io {
        dataset: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{dataset}: malformed CSV in {path:?}: {source}")]
    Csv {
        dataset: &'static str,
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{dataset}: failed to read shapefile {path:?}: {source}")]
    Shapefile {
        dataset: &'static str,
        path: PathBuf,
        #[source]
        source: shapefile::Error,
    },

    #[error("{dataset}: failed to read attribute table {path:?}: {source}")]
    Dbase {
        dataset: &'static str,
        path: PathBuf,
        #[source]
        source: crate::dbf::DbfError,
    },

    #[error("{dataset}: {path:?} has {records} records for {shapes} shapes")]
    AttributeMismatch {
        dataset: &'static str,
        path: PathBuf,
        shapes: usize,
        records: usize,
    },

    #[error("unknown text encoding '{label}'")]
    UnknownEncoding { label: String },

    #[error("{dataset}: failed to parse GeoJSON {path:?}: {message}")]
    GeoJson {
        dataset: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error("{dataset}: required column '{column}' not found in {path:?}")]
    MissingColumn {
        dataset: &'static str,
        path: PathBuf,
        column: String,
    },

    #[error("{dataset}: bad coordinate '{value}' in column '{column}' (row {row})")]
    BadCoordinate {
        dataset: &'static str,
        column: String,
        row: usize,
        value: String,
    },

    #[error("{dataset}: malformed geometry at row {row}: {message}")]
    BadGeometry {
        dataset: &'static str,
        row: usize,
        message: String,
    },

    #[error("{dataset}: expected {expected} geometry at row {row}")]
    UnexpectedGeometry {
        dataset: &'static str,
        row: usize,
        expected: &'static str,
    },

    #[error("cannot reproject {from} -> {to}: {message}")]
    Projection {
        from: String,
        to: String,
        message: String,
    },

    #[error("no districts matched region prefix '{prefix}' in {path:?}")]
    NoDistricts { prefix: String, path: PathBuf },

    #[error("unsupported geometry format for {path:?}")]
    UnsupportedFormat { path: PathBuf },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown district '{0}'")]
pub struct UnknownDistrictError(pub String);
