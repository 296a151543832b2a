//! Fatal errors: anything here aborts the whole command. Per-entry problems are values, see
//! [`crate::report::SyncProblem`].

use std::fmt;
use std::io;
use std::path::PathBuf;

use sumac_api::ApiError;
use thiserror::Error;

use crate::notify::NotifyError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find the config file at {}", .0.display())]
    NotFound(PathBuf),
    #[error("could not read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("could not determine the platform config directory")]
    NoConfigDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    Project,
    User,
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKind::Project => f.write_str("project"),
            MapKind::User => f.write_str("user"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Zero mappings almost always means a broken credential or a renamed custom field.
    #[error("unable to populate the {0} map: no Redmine {0}s carry a Harvest id")]
    EmptyMap(MapKind),
    #[error("remote call failed: {0}")]
    Api(#[from] ApiError),
    #[error("invalid date range `{0}`, expected YYYYMMDD or FROM:TO")]
    InvalidRange(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}
