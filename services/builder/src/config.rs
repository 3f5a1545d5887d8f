//! Runtime configuration for the kiln binary.

use std::str::FromStr;

use anyhow::{bail, Result};

/// Which cloud implementation a build talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The in-memory cloud from `kiln-cloud`.
    Simulated,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simulated" | "sim" => Ok(Backend::Simulated),
            other => bail!("unsupported backend `{other}` (available: simulated)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => bail!("unsupported log format `{other}` (expected text or json)"),
        }
    }
}

/// kiln runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    pub log_format: LogFormat,

    pub backend: Backend,

    /// Region used when the build template does not name one.
    pub region: Option<String>,

    /// Project used when the build template does not name one.
    pub project_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = get("KILN_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_format = match get("KILN_LOG_FORMAT") {
            Some(s) => s.parse()?,
            None => LogFormat::default(),
        };

        let backend = get("KILN_BACKEND")
            .unwrap_or_else(|| "simulated".to_string())
            .parse()?;

        let region = get("KILN_REGION").filter(|s| !s.is_empty());
        let project_id = get("KILN_PROJECT_ID").filter(|s| !s.is_empty());

        Ok(Self {
            log_level,
            log_format,
            backend,
            region,
            project_id,
        })
    }
}
