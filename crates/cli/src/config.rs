use anyhow::Context;
use config::{Config, ConfigError, Environment, File};
use engine::Settings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const BASE_CONFIG: &str = "netmon_config.yaml";
pub const PRODUCTION_CONFIG: &str = "production_config.yaml";
pub const LOCAL_CONFIG: &str = ".netmon_config.yaml";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Probe targets and engine tunables. Secrets never serialise back out.
    pub settings: Settings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the compact text format.
    pub json: bool,
    pub show_time: bool,
    pub show_location: bool,
    pub levels: LoggingLevelsConfig,
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            show_time: true,
            show_location: false,
            levels: LoggingLevelsConfig::default(),
            redaction: RedactionConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingLevelsConfig {
    pub debug: bool,
    pub info: bool,
    pub warning: bool,
    pub error: bool,
}

impl Default for LoggingLevelsConfig {
    fn default() -> Self {
        Self {
            debug: false,
            info: true,
            warning: true,
            error: true,
        }
    }
}

impl LoggingLevelsConfig {
    /// The most verbose enabled level, as an `EnvFilter` directive.
    pub fn directive(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.info {
            "info"
        } else if self.warning {
            "warn"
        } else if self.error {
            "error"
        } else {
            "off"
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedactionConfig {
    #[serde(default = "true_default")]
    pub enabled: bool,
    #[serde(default = "default_patterns")]
    pub patterns: Vec<RedactionPattern>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: default_patterns(),
        }
    }
}

fn true_default() -> bool {
    true
}

fn default_patterns() -> Vec<RedactionPattern> {
    vec![RedactionPattern {
        name: "password".to_string(),
        regex: r"(?i)(password\s*[=:]\s*)\S+".to_string(),
        placeholder: "${1}[REDACTED]".to_string(),
    }]
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedactionPattern {
    pub name: String,
    pub regex: String,
    pub placeholder: String,
}

/// Resolve a config file next to the CLI manifest, falling back to the
/// repo-root layout when run from the workspace root.
fn locate(file_name: &str) -> PathBuf {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let beside_manifest = Path::new(&manifest_dir).join(file_name);
    if beside_manifest.exists() {
        beside_manifest
    } else {
        Path::new("crates").join("cli").join(file_name)
    }
}

/// Layer the config files and `NETMON__*` environment overrides.
///
/// `base` replaces the shipped `netmon_config.yaml` when given.
pub fn load_config(base: Option<&Path>) -> anyhow::Result<AppConfig> {
    let base_path = base
        .map(Path::to_path_buf)
        .unwrap_or_else(|| locate(BASE_CONFIG));

    let raw = Config::builder()
        .add_source(File::from(base_path.clone()).required(true))
        .add_source(File::from(locate(PRODUCTION_CONFIG)).required(false))
        .add_source(File::from(locate(LOCAL_CONFIG)).required(false))
        // NETMON__DATABASE__PASSWORD=... maps to database.password
        .add_source(
            Environment::with_prefix("NETMON")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("services"),
        )
        .build()
        .with_context(|| format!("failed to load configuration from {}", base_path.display()))?;

    let logging = match raw.get::<LoggingConfig>("logging") {
        Ok(logging) => logging,
        Err(ConfigError::NotFound(_)) => LoggingConfig::default(),
        Err(e) => return Err(e).context("invalid logging section"),
    };
    let settings: Settings = raw
        .try_deserialize()
        .context("invalid health-check settings")?;

    Ok(AppConfig { settings, logging })
}
