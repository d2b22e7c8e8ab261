//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Values parsed but are not usable together
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Working area layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Root of the working area
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Holds rescaled copies (defaults to `<work_dir>/prepared`)
    pub prepared_dir: Option<PathBuf>,
    /// Holds band files and per-run loop directories (defaults to `<work_dir>/sliced`)
    pub sliced_dir: Option<PathBuf>,
    /// Holds finished archives (defaults to `<work_dir>/archives`)
    pub archive_dir: Option<PathBuf>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            prepared_dir: None,
            sliced_dir: None,
            archive_dir: None,
        }
    }
}

impl PathsConfig {
    pub fn prepared(&self) -> PathBuf {
        self.prepared_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("prepared"))
    }

    pub fn sliced(&self) -> PathBuf {
        self.sliced_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("sliced"))
    }

    pub fn archives(&self) -> PathBuf {
        self.archive_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("archives"))
    }
}

/// Explicit tool locations. Unset entries fall back to `FFMPEG_BIN` /
/// `FFPROBE_BIN` and then to a PATH lookup.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ToolsConfig {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

/// Video re-encode and slicing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodeConfig {
    /// x264 constant-quality factor
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// x264 preset
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Width every clip is normalized to before slicing
    #[serde(default = "default_canonical_width")]
    pub canonical_width: u32,
    /// Number of vertical bands
    #[serde(default = "default_parts")]
    pub parts: u32,
}

fn default_crf() -> u8 {
    18
}

fn default_preset() -> String {
    "slow".to_string()
}

fn default_canonical_width() -> u32 {
    750
}

fn default_parts() -> u32 {
    5
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            crf: default_crf(),
            preset: default_preset(),
            canonical_width: default_canonical_width(),
            parts: default_parts(),
        }
    }
}

impl EncodeConfig {
    /// Width of a single band
    pub fn band_width(&self) -> u32 {
        self.canonical_width / self.parts.max(1)
    }
}

/// Loop image rendering settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderConfig {
    /// Frames per second sampled from each band
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Output width; absent keeps the band width
    pub width: Option<u32>,
}

fn default_frame_rate() -> u32 {
    15
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            width: None,
        }
    }
}

/// Language used for submitter-facing messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ru,
}

impl std::str::FromStr for Language {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "ru" | "russian" => Ok(Language::Ru),
            _ => Err(()),
        }
    }
}

/// Run-level behavior
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineConfig {
    /// Keep the downloaded upload after a successful run
    #[serde(default)]
    pub keep_uploads: bool,
    /// Keep the archive after it was delivered to the submitter
    #[serde(default)]
    pub keep_archives: bool,
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SHOWCASE_WORK_DIR -> paths.work_dir
    /// - SHOWCASE_LANGUAGE -> pipeline.language
    /// - SAVE_UPLOADS -> pipeline.keep_uploads
    /// - KEEP_ARCHIVES -> pipeline.keep_archives
    /// - RENDER_FRAME_RATE -> render.frame_rate
    /// - LOG_LEVEL -> logging.level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SHOWCASE_WORK_DIR") {
            if !val.trim().is_empty() {
                self.paths.work_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("SHOWCASE_LANGUAGE") {
            if let Ok(language) = val.parse::<Language>() {
                self.pipeline.language = language;
            }
        }

        if let Ok(val) = env::var("SAVE_UPLOADS") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.pipeline.keep_uploads = true,
                "false" | "0" | "no" => self.pipeline.keep_uploads = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("KEEP_ARCHIVES") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.pipeline.keep_archives = true,
                "false" | "0" | "no" => self.pipeline.keep_archives = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("RENDER_FRAME_RATE") {
            if let Ok(rate) = val.parse::<u32>() {
                self.render.frame_rate = rate;
            }
        }

        if let Ok(val) = env::var("LOG_LEVEL") {
            if !val.trim().is_empty() {
                self.logging.level = val.trim().to_lowercase();
            }
        }
    }

    /// Check that the values can drive a pipeline run
    pub fn validate(&self) -> Result<(), ConfigError> {
        let encode = &self.encode;
        if encode.parts == 0 {
            return Err(ConfigError::Invalid("encode.parts must be at least 1".to_string()));
        }
        if encode.canonical_width == 0 || encode.canonical_width % encode.parts != 0 {
            return Err(ConfigError::Invalid(format!(
                "encode.canonical_width ({}) must be a positive multiple of encode.parts ({})",
                encode.canonical_width, encode.parts
            )));
        }
        if self.render.frame_rate == 0 {
            return Err(ConfigError::Invalid("render.frame_rate must be positive".to_string()));
        }
        if self.render.width == Some(0) {
            return Err(ConfigError::Invalid("render.width must be positive when set".to_string()));
        }
        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("SHOWCASE_WORK_DIR");
        env::remove_var("SHOWCASE_LANGUAGE");
        env::remove_var("SAVE_UPLOADS");
        env::remove_var("KEEP_ARCHIVES");
        env::remove_var("RENDER_FRAME_RATE");
        env::remove_var("LOG_LEVEL");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            crf in 0u8..52,
            parts in 1u32..10,
            band in 10u32..300,
            frame_rate in 1u32..60,
            width in proptest::option::of(16u32..800),
            keep_uploads in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[paths]
work_dir = "/srv/showcase"

[encode]
crf = {}
preset = "medium"
canonical_width = {}
parts = {}

[render]
frame_rate = {}
{}

[pipeline]
keep_uploads = {}
language = "ru"
"#,
                crf,
                band * parts,
                parts,
                frame_rate,
                width.map(|w| format!("width = {}", w)).unwrap_or_default(),
                keep_uploads,
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(&config.paths.work_dir, &PathBuf::from("/srv/showcase"));
            prop_assert_eq!(config.encode.crf, crf);
            prop_assert_eq!(config.encode.preset.as_str(), "medium");
            prop_assert_eq!(config.encode.band_width(), band);
            prop_assert_eq!(config.render.frame_rate, frame_rate);
            prop_assert_eq!(config.render.width, width);
            prop_assert_eq!(config.pipeline.keep_uploads, keep_uploads);
            prop_assert_eq!(config.pipeline.language, Language::Ru);
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_width_with_remainder_is_rejected(
            parts in 2u32..10,
            band in 10u32..300,
            remainder in 1u32..10,
        ) {
            prop_assume!(remainder < parts);
            let mut config = Config::default();
            config.encode.parts = parts;
            config.encode.canonical_width = band * parts + remainder;

            prop_assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }

        #[test]
        fn prop_env_overrides_frame_rate(
            initial in 1u32..30,
            override_rate in 1u32..60,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::parse_toml(&format!("[render]\nframe_rate = {}\n", initial))
                .expect("Valid TOML");

            env::set_var("RENDER_FRAME_RATE", override_rate.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.render.frame_rate, override_rate);
        }

        #[test]
        fn prop_env_overrides_keep_uploads(
            initial in proptest::bool::ANY,
            override_keep in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::parse_toml(&format!("[pipeline]\nkeep_uploads = {}\n", initial))
                .expect("Valid TOML");

            env::set_var("SAVE_UPLOADS", if override_keep { "1" } else { "0" });
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.pipeline.keep_uploads, override_keep);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.paths.work_dir, PathBuf::from("work"));
        assert_eq!(config.paths.prepared(), PathBuf::from("work/prepared"));
        assert_eq!(config.paths.sliced(), PathBuf::from("work/sliced"));
        assert_eq!(config.paths.archives(), PathBuf::from("work/archives"));
        assert_eq!(config.tools, ToolsConfig::default());
        assert_eq!(config.encode.crf, 18);
        assert_eq!(config.encode.preset, "slow");
        assert_eq!(config.encode.canonical_width, 750);
        assert_eq!(config.encode.parts, 5);
        assert_eq!(config.encode.band_width(), 150);
        assert_eq!(config.render.frame_rate, 15);
        assert_eq!(config.render.width, None);
        assert!(!config.pipeline.keep_uploads);
        assert!(!config.pipeline.keep_archives);
        assert_eq!(config.pipeline.language, Language::En);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_directories_win_over_work_dir() {
        let toml_str = r#"
[paths]
work_dir = "/data"
sliced_dir = "/fast/sliced"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.paths.prepared(), PathBuf::from("/data/prepared"));
        assert_eq!(config.paths.sliced(), PathBuf::from("/fast/sliced"));
        assert_eq!(config.paths.archives(), PathBuf::from("/data/archives"));
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("SHOWCASE_LANGUAGE", "klingon");
        env::set_var("SAVE_UPLOADS", "maybe");
        env::set_var("KEEP_ARCHIVES", "sometimes");
        env::set_var("RENDER_FRAME_RATE", "fast");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_overrides_work_dir_and_language() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("SHOWCASE_WORK_DIR", "/var/lib/showcase");
        env::set_var("SHOWCASE_LANGUAGE", "RU");
        env::set_var("LOG_LEVEL", "DEBUG");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.paths.work_dir, PathBuf::from("/var/lib/showcase"));
        assert_eq!(config.pipeline.language, Language::Ru);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_keep_archives_from_toml_and_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::parse_toml("[pipeline]\nkeep_archives = true\n").expect("Valid TOML");
        assert!(config.pipeline.keep_archives);

        env::set_var("KEEP_ARCHIVES", "no");
        config.apply_env_overrides();
        clear_env_vars();

        assert!(!config.pipeline.keep_archives);
    }

    #[test]
    fn test_zero_frame_rate_is_rejected() {
        let config = Config::parse_toml("[render]\nframe_rate = 0\n").expect("Valid TOML");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
