//! Configuration schema definitions.

use serde::{Deserialize, Serialize};

mod schema_logging;
mod schema_store;

pub use schema_logging::*;
pub use schema_store::*;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Expand `~` in every configured path.
    pub fn expand_paths(mut self) -> Self {
        self.store.data_dir = crate::ConfigLoader::expand_pathbuf(&self.store.data_dir);
        self.logging.log_dir = self
            .logging
            .log_dir
            .as_deref()
            .map(crate::ConfigLoader::expand_pathbuf);
        self
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
