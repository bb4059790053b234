use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    actors::{reconcile, rest, store},
    sheet::{self, GoogleSheets, MemorySheet, Spreadsheet, google},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: store::Config,
    pub sheet: SheetConfig,
    #[serde(default)]
    pub rest: rest::Config,
    /// Interval of the background feed merge. Disabled when `None`.
    #[serde(default, with = "humantime_serde")]
    pub merge_interval: Option<Duration>,
    #[serde(default)]
    pub reconcile: reconcile::Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum SheetConfig {
    Google(google::Config),
    /// A worksheet that lives and dies with the process.
    Memory,
}

impl SheetConfig {
    pub fn connect(&self) -> Result<Arc<dyn Spreadsheet>, sheet::Error> {
        Ok(match self {
            Self::Google(config) => {
                info!(
                    "Using Google spreadsheet {} / {}",
                    config.spreadsheet_id, config.worksheet
                );
                Arc::new(GoogleSheets::new(config.clone())?)
            }
            Self::Memory => {
                info!("Using an in-memory spreadsheet");
                Arc::new(MemorySheet::new())
            }
        })
    }
}
