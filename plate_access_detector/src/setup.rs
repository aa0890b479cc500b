//! Process setup shared by the binaries: logging, configuration, registry,
//! profiling and the metrics dump.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use plate_access::config::{self, AppConfig, OutputConfig, ProfilingConfig, RegistryConfig};
use plate_access::{metrics, SqliteRegistry};
use pyroscope::pyroscope::PyroscopeAgentRunning;
use pyroscope::PyroscopeAgent;
use pyroscope_pprofrs::{pprof_backend, PprofConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load and validate the configuration. A missing file means defaults.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    load_config_with(path, |_| {})
}

/// Like [`load_config`], validating only once `overrides` are applied.
pub fn load_config_with(path: &Path, overrides: impl FnOnce(&mut AppConfig)) -> Result<AppConfig> {
    let mut config = if path.exists() {
        info!("Loading configuration from {}", path.display());
        config::load_config(path)
            .with_context(|| format!("Cannot load configuration {}", path.display()))?
    } else {
        warn!("No configuration at {}, using defaults", path.display());
        AppConfig::default()
    };
    overrides(&mut config);
    config.validate()?;
    Ok(config)
}

pub fn open_registry(config: &RegistryConfig) -> Result<Arc<SqliteRegistry>> {
    let registry = SqliteRegistry::open(&config.database_path, config.timeout())?;
    info!("Permission registry at {}", config.database_path.display());
    Ok(Arc::new(registry))
}

/// Running profiler, if one is configured.
pub struct Profiler {
    agent: PyroscopeAgent<PyroscopeAgentRunning>,
}

impl Profiler {
    pub fn start(config: &ProfilingConfig) -> Result<Option<Self>> {
        let Some(url) = config.server_url.as_ref() else {
            return Ok(None);
        };
        let agent = PyroscopeAgent::builder(url.as_str(), config.application_name.as_str())
            .backend(pprof_backend(
                PprofConfig::new().sample_rate(config.sample_rate),
            ))
            .build()?;
        let agent = agent.start()?;
        info!("Profiling to {} as {}", url, config.application_name);
        Ok(Some(Self { agent }))
    }

    pub fn stop(self) -> Result<()> {
        let ready = self.agent.stop()?;
        ready.shutdown();
        Ok(())
    }
}

/// Write the Prometheus text dump when a path is configured.
pub fn write_metrics(config: &OutputConfig) -> Result<()> {
    let Some(path) = config.metrics_path.as_ref() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, metrics::render())
        .with_context(|| format!("Cannot write metrics to {}", path.display()))?;
    info!("Metrics written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/plate_access.toml")).unwrap();
        assert_eq!(config.source.fps, 20);
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[source]\nkind = \"video\"").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[source]\nkind = \"video\"").unwrap();

        let config = load_config_with(file.path(), |config| {
            config.source.path = Some("clips/gate.mp4".into());
        })
        .unwrap();
        assert_eq!(config.source.path, Some("clips/gate.mp4".into()));
    }

    #[test]
    fn test_profiler_off_without_server() {
        assert!(Profiler::start(&ProfilingConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_metrics_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.prom");
        metrics::count_outcome(metrics::OUTCOME_REJECTED);

        write_metrics(&OutputConfig {
            metrics_path: Some(path.clone()),
            ..OutputConfig::default()
        })
        .unwrap();
        let dump = std::fs::read_to_string(path).unwrap();
        assert!(dump.contains("plate_reads_total"));
    }
}
