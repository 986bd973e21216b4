use config::Config as eConfig;
use serde::Deserialize;
use serde_derive::Serialize;

/// Contains all settings for a GeOFF run
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub app: App,
    pub problem: ProblemSettings,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    #[serde(default)]
    pub rl: RlSettings,
}

/// General configuration settings
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Config {
    #[serde(default = "default_false")]
    pub tui: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub log_out: Option<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tui: default_false(),
            log_level: default_log_level(),
            log_out: None,
            workers: default_workers(),
        }
    }
}

/// The application trims are attributed to
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct App {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for App {
    fn default() -> Self {
        App {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ProblemSettings {
    pub id: String,
    /// Cycle times for problems that are optimized per skeleton point
    #[serde(default)]
    pub skeleton_points: Vec<f64>,
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct OptimizerSettings {
    #[serde(default = "default_optimizer")]
    pub name: String,
    #[serde(default = "default_maxfun")]
    pub maxfun: u64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_delta_if_zero")]
    pub delta_if_zero: f64,
    #[serde(default = "default_delta_if_nonzero")]
    pub delta_if_nonzero: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings {
            name: default_optimizer(),
            maxfun: default_maxfun(),
            tolerance: default_tolerance(),
            delta_if_zero: default_delta_if_zero(),
            delta_if_nonzero: default_delta_if_nonzero(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct RlSettings {
    #[serde(default = "default_num_episodes")]
    pub num_episodes: u64,
    /// Zero takes the limit from the environment's metadata
    #[serde(default)]
    pub time_limit: u64,
    #[serde(default = "default_total_timesteps")]
    pub total_timesteps: u64,
}

impl Default for RlSettings {
    fn default() -> Self {
        RlSettings {
            num_episodes: default_num_episodes(),
            time_limit: 0,
            total_timesteps: default_total_timesteps(),
        }
    }
}

/// Read the settings file at `path`, with `GEOFF_` environment variables
/// taking precedence, e.g. `GEOFF_OPTIMIZER__MAXFUN=20`.
pub fn read_settings(path: &str) -> Result<Settings, config::ConfigError> {
    let parsed = eConfig::builder()
        .add_source(config::File::with_name(path).format(config::FileFormat::Toml))
        .add_source(
            config::Environment::with_prefix("GEOFF")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    parsed.try_deserialize()
}

impl Settings {
    /// Dump the resolved settings as JSON.
    pub fn write(&self, path: &str) -> eyre::Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }
}

// *********************************
// Default values for deserializing
// *********************************
fn default_false() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_app_name() -> String {
    "GeOFF".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_optimizer() -> String {
    "Nelder-Mead".to_string()
}

fn default_maxfun() -> u64 {
    100
}

fn default_tolerance() -> f64 {
    0.05
}

fn default_delta_if_zero() -> f64 {
    0.001
}

fn default_delta_if_nonzero() -> f64 {
    0.05
}

fn default_num_episodes() -> u64 {
    1
}

fn default_total_timesteps() -> u64 {
    300
}
