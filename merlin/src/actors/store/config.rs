use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actors::store::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub db_path: PathBuf,
}

impl Config {
    pub(crate) fn create_dirs(&self) -> Result<(), Error> {
        let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        std::fs::create_dir_all(parent).map_err(|cause| Error::IO {
            message: format!("Failed to create database directory {parent:?}"),
            cause,
        })?;
        info!("Created (or checked) database dir: {parent:?}");
        Ok(())
    }
}
