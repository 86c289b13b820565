use crate::domain::telemetry::ChannelKind;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE: &str = "config/telemetry";
const ENV_PREFIX: &str = "RACE_TELEMETRY";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub parser: ParserSettings,
    pub links: LinkSettings,
    pub track: TrackSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ParserSettings {
    /// Data lines parsed between two yields.
    pub chunk_size: usize,
    /// Pause between chunks so other tasks get a turn.
    pub yield_delay_ms: u64,
    /// Per-record size used for the memory estimate.
    pub average_record_bytes: usize,
}

impl ParserSettings {
    pub fn yield_delay(&self) -> Duration {
        Duration::from_millis(self.yield_delay_ms)
    }
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            yield_delay_ms: 10,
            average_record_bytes: 512,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LinkSettings {
    /// Reconnect delay unit; attempt `n` waits `n * base_delay_ms`.
    pub base_delay_ms: u64,
    pub max_attempts: u32,
    pub sensor_url: String,
    pub realtime_url: String,
    pub history_url: String,
    pub status_url: String,
}

impl LinkSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn url_template(&self, kind: ChannelKind) -> &str {
        match kind {
            ChannelKind::Sensor => &self.sensor_url,
            ChannelKind::Realtime => &self.realtime_url,
            ChannelKind::History => &self.history_url,
            ChannelKind::Status => &self.status_url,
        }
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_attempts: 5,
            sensor_url: "ws://localhost:8080/ws".to_string(),
            realtime_url: "ws://localhost:8080/ws/realtime?loggerId=${loggerId}".to_string(),
            history_url: "ws://localhost:8080/ws/history?loggerId=${loggerId}".to_string(),
            status_url: "ws://localhost:8080/ws/status".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrackSettings {
    pub width: f64,
    pub height: f64,
    pub margin: f64,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            margin: 50.0,
        }
    }
}

/// Load `config/telemetry.*` (optional) layered with `RACE_TELEMETRY__*` variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    build_settings(config::File::with_name(CONFIG_FILE).required(false))
}

/// Load settings from an explicit file; the file must exist.
pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    build_settings(config::File::from(path).required(true))
}

fn build_settings<S>(file: S) -> anyhow::Result<Settings>
where
    S: config::Source + Send + Sync + 'static,
{
    let settings = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace template variables in a URL or query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_query() {
        let mut vars = HashMap::new();
        vars.insert("loggerId".to_string(), "LOG-7".to_string());
        vars.insert("race".to_string(), "12".to_string());

        let url = "ws://track.local/ws/history?loggerId=${loggerId}&race=${race}";
        let result = prepare_query(url, &vars);

        assert_eq!(result, "ws://track.local/ws/history?loggerId=LOG-7&race=12");
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.parser.chunk_size, 1000);
        assert_eq!(settings.parser.yield_delay(), Duration::from_millis(10));
        assert_eq!(settings.links.max_attempts, 5);
        assert_eq!(settings.links.base_delay(), Duration::from_secs(1));
        assert!(settings.links.url_template(ChannelKind::Realtime).contains("${loggerId}"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(
                "[links]\nmax_attempts = 3\n[parser]\nchunk_size = 250\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.links.max_attempts, 3);
        assert_eq!(settings.links.base_delay_ms, 1000);
        assert_eq!(settings.parser.chunk_size, 250);
        assert_eq!(settings.track.width, 800.0);
    }
}
