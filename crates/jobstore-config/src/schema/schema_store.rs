//! Durable store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directory (under `data_dir`) that holds the jobs file.
pub const JOB_SUBDIR: &str = "job";

/// Configuration of the persistent job registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// State directory. The jobs file lives in `{data_dir}/job/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Name of the durable jobs file.
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Number of dirty operations that trigger a background flush.
    #[serde(default = "default_max_ops_before_write")]
    pub max_ops_before_write: u32,

    /// Size of the uid range owned by one user partition.
    #[serde(default = "default_per_user_range")]
    pub per_user_range: u32,
}

impl StoreConfig {
    /// Config rooted at an explicit state directory, other fields defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Directory containing the jobs file.
    pub fn job_dir(&self) -> PathBuf {
        self.data_dir.join(JOB_SUBDIR)
    }

    /// Full path of the durable jobs file.
    pub fn jobs_file(&self) -> PathBuf {
        self.job_dir().join(&self.file_name)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".jobstore"))
        .unwrap_or_else(|| PathBuf::from(".jobstore"))
}

fn default_file_name() -> String {
    "jobs.xml".to_string()
}

fn default_max_ops_before_write() -> u32 {
    1
}

fn default_per_user_range() -> u32 {
    100_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            file_name: default_file_name(),
            max_ops_before_write: default_max_ops_before_write(),
            per_user_range: default_per_user_range(),
        }
    }
}
