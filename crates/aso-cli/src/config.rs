//! CLI configuration file

use anyhow::{Context, Result};
use aso_core::OrchestratorConfig;
use aso_http::HttpBackendConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// `[orchestrator]` and `[backend]` tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct CliConfig {
    pub(crate) orchestrator: OrchestratorConfig,
    pub(crate) backend: HttpBackendConfig,
}

impl CliConfig {
    pub(crate) fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("malformed config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, or use defaults when none is given
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&input).with_context(|| format!("loading {}", path.display()))
    }

    /// Apply command-line overrides, then re-check
    pub(crate) fn with_overrides(
        mut self,
        base_url: Option<String>,
        poll_interval_ms: Option<u64>,
    ) -> Result<Self> {
        if let Some(base_url) = base_url {
            self.backend.base_url = base_url;
        }
        if let Some(ms) = poll_interval_ms {
            self.orchestrator = self.orchestrator.with_poll_interval(Duration::from_millis(ms));
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        self.orchestrator.validate().context("[orchestrator]")?;
        self.backend.validate().context("[backend]")?;
        Ok(())
    }
}
