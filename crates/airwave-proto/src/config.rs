use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::eq::{EqGains, EqPreset};
use super::error::Locale;
use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Local stream proxy the media backend is pointed at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

/// Outbound fetch settings shared by every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Pass-through prefix every outbound fetch is routed through.  A `{url}`
    /// placeholder is replaced by the encoded target; otherwise the encoded
    /// target is appended.  `None` fetches directly.
    #[serde(default)]
    pub fetch_prefix: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Station list sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Mirror pool for the generic list provider, tried in random order.
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<String>,
    /// One generic provider per query path, each resolved against the pool.
    #[serde(default = "default_list_queries")]
    pub list_queries: Vec<String>,
    /// URL (https://) or local file path of the curated station list.
    #[serde(default = "default_curated_source")]
    pub curated_source: String,
    #[serde(default = "default_catalog_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_metadata_timeout")]
    pub fetch_timeout_secs: u64,
    /// Mirror status lookup, `{id}` is replaced by the station id.  Empty
    /// disables it.
    #[serde(default = "default_status_path")]
    pub status_path: String,
    /// Read the in-band ICY `StreamTitle` when the status lookup has no
    /// current track.
    #[serde(default = "default_icy_titles")]
    pub icy_titles: bool,
    /// IANA zone the program schedules are written in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold_secs: u64,
    #[serde(default = "default_max_recoveries")]
    pub max_recoveries: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_spectrum_fps")]
    pub spectrum_fps: u32,
    /// Publish spectrum frames while playing.
    #[serde(default = "default_visualizer")]
    pub visualizer: bool,
    /// Decode a PCM copy of the stream into the analyzer with ffmpeg.
    #[serde(default = "default_pcm_tap")]
    pub pcm_tap: bool,
    #[serde(default)]
    pub eq_preset: EqPreset,
    #[serde(default)]
    pub custom_eq: EqGains,
    #[serde(default)]
    pub locale: Locale,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_proxy_port(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            fetch_prefix: None,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            mirrors: default_mirrors(),
            list_queries: default_list_queries(),
            curated_source: default_curated_source(),
            timeout_secs: default_catalog_timeout(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_metadata_timeout(),
            status_path: default_status_path(),
            icy_titles: default_icy_titles(),
            timezone: default_timezone(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            watchdog_interval_secs: default_watchdog_interval(),
            stall_threshold_secs: default_stall_threshold(),
            max_recoveries: default_max_recoveries(),
            connect_timeout_secs: default_connect_timeout(),
            spectrum_fps: default_spectrum_fps(),
            visualizer: default_visualizer(),
            pcm_tap: default_pcm_tap(),
            eq_preset: EqPreset::default(),
            custom_eq: EqGains::default(),
            locale: Locale::default(),
        }
    }
}

impl CatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl MetadataConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl PlaybackConfig {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn spectrum_period(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.spectrum_fps.clamp(1, 120)))
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_proxy_port() -> u16 {
    8990
}

fn default_user_agent() -> String {
    concat!("airwave/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_mirrors() -> Vec<String> {
    [
        "https://de1.api.radio-browser.info",
        "https://de2.api.radio-browser.info",
        "https://nl1.api.radio-browser.info",
        "https://at1.api.radio-browser.info",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_list_queries() -> Vec<String> {
    vec![
        "/json/stations/bycountrycodeexact/IL?hidebroken=true&limit=500".to_string(),
        "/json/stations/bylanguageexact/hebrew?hidebroken=true&limit=500".to_string(),
    ]
}

fn default_curated_source() -> String {
    platform::config_dir()
        .join("curated.json")
        .display()
        .to_string()
}

fn default_catalog_timeout() -> u64 {
    8
}

fn default_poll_interval() -> u64 {
    20
}

fn default_metadata_timeout() -> u64 {
    5
}

fn default_status_path() -> String {
    String::new()
}

fn default_icy_titles() -> bool {
    true
}

fn default_timezone() -> String {
    "Asia/Jerusalem".to_string()
}

fn default_volume() -> f32 {
    0.5
}

fn default_watchdog_interval() -> u64 {
    3
}

fn default_stall_threshold() -> u64 {
    7
}

fn default_max_recoveries() -> u32 {
    3
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_spectrum_fps() -> u32 {
    30
}

fn default_visualizer() -> bool {
    true
}

fn default_pcm_tap() -> bool {
    true
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8989);
        assert_eq!(config.proxy.port, 8990);
        assert!(config.network.fetch_prefix.is_none());
        assert_eq!(config.catalog.timeout(), Duration::from_secs(8));
        assert!(config.catalog.mirrors.iter().all(|m| m.starts_with("https://")));
        assert!(config.catalog.curated_source.ends_with("curated.json"));
        assert_eq!(config.metadata.poll_interval(), Duration::from_secs(20));
        assert_eq!(config.playback.stall_threshold(), Duration::from_secs(7));
        assert_eq!(config.playback.max_recoveries, 3);
        assert_eq!(config.playback.locale, Locale::He);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [network]
            fetch_prefix = "https://relay.example/?u={url}"

            [playback]
            eq_preset = "rock"
            locale = "en"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.network.fetch_prefix.as_deref(),
            Some("https://relay.example/?u={url}")
        );
        assert_eq!(config.playback.eq_preset, EqPreset::Rock);
        assert_eq!(config.playback.locale, Locale::En);
        assert_eq!(config.playback.watchdog_interval(), Duration::from_secs(3));
        assert_eq!(config.metadata.timezone, "Asia/Jerusalem");
    }

    #[test]
    fn test_spectrum_period_is_bounded() {
        let mut p = PlaybackConfig::default();
        assert_eq!(p.spectrum_period(), Duration::from_millis(33));
        p.spectrum_fps = 0;
        assert_eq!(p.spectrum_period(), Duration::from_millis(1000));
    }
}
