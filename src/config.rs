use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Path to the JSON snapshot exported by the persistence layer
    #[serde(default = "default_store_path")]
    pub path: String,
    /// How often to re-read the snapshot file (0 = never)
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrustConfig {
    /// Damping factor for the power iteration (0.0 - 1.0)
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// Iteration ceiling; hitting it logs a convergence warning
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// L1 convergence tolerance
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// How many invite candidates to suggest
    #[serde(default = "default_invite_limit")]
    pub invite_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_address")]
    pub address: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            reload_interval_secs: default_reload_interval(),
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            damping: default_damping(),
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { invite_limit: default_invite_limit() }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            address: default_web_address(),
            port: default_web_port(),
        }
    }
}

// Default value functions
fn default_store_path() -> String { "data/snapshot.json".to_string() }
fn default_reload_interval() -> u64 { 30 }
fn default_damping() -> f64 { 0.85 }
fn default_max_iter() -> usize { 50 }
fn default_tolerance() -> f64 { 1e-10 }
fn default_invite_limit() -> usize { 5 }
fn default_web_address() -> String { "0.0.0.0".to_string() }
fn default_web_port() -> u16 { 8080 }

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))?;
        Ok(config)
    }
}
