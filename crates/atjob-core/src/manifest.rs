//! Job manifests: the TOML documents users `apply`.
//!
//! ```toml
//! [[jobs]]
//! namespace = "default"   # optional
//! name      = "say-hi"
//! command   = "echo hi"
//! schedule  = "2030-01-01T09:00:00Z"
//! ```

use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::error::{AtjobError, Result};
use crate::job::ScheduledJob;
use crate::meta::DEFAULT_NAMESPACE;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub jobs: Vec<ManifestJob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestJob {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub command: String,
    pub schedule: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Manifest {
    pub fn from_file(path: &str) -> Result<Self> {
        if !std::path::Path::new(path).exists() {
            return Err(AtjobError::Manifest(format!("{path}: no such file")));
        }
        Self::from_figment(Figment::from(Toml::file(path)))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Self::from_figment(Figment::from(Toml::string(s)))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| AtjobError::Manifest(e.to_string()))
    }

    /// Convert every entry into an unsaved [`ScheduledJob`].
    ///
    /// The schedule string is not validated here; a malformed schedule is
    /// accepted and surfaces as a reconcile error, like any other edit.
    pub fn into_jobs(self) -> Vec<ScheduledJob> {
        self.jobs
            .into_iter()
            .map(|j| ScheduledJob::new(j.namespace, j.name, j.command, j.schedule))
            .collect()
    }
}
