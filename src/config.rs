use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StumpcamConfig {
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub upload: UploadConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Root directory for all managed files
    #[serde(default = "default_storage_root")]
    pub root: String,

    /// Cache area for short-lived session files, relative to `root`
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Durable area for promoted assets, relative to `root`
    #[serde(default = "default_durable_dir")]
    pub durable_dir: String,

    /// Promote the reference image and reuse it across sessions
    #[serde(default = "default_persist_reference")]
    pub persist_reference: bool,

    /// Delete cached inputs once an upload succeeds
    #[serde(default = "default_discard_inputs_on_success")]
    pub discard_inputs_on_success: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Recording is force-stopped after this many seconds
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,

    /// Quality hint passed to the recorder (e.g. "720p", "1080p")
    #[serde(default = "default_quality_hint")]
    pub quality_hint: String,

    /// Camera facing used for new captures
    #[serde(default)]
    pub facing: CameraFacing,

    /// Video capture additionally requires microphone access
    #[serde(default = "default_require_microphone")]
    pub require_microphone: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadConfig {
    /// Processing endpoint receiving the multipart upload
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Allow the single reference-as-video fallback transmission
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,

    /// Error body substrings that mark a failure as transient
    #[serde(default = "default_retry_signatures")]
    pub retry_signatures: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Log every published status message at debug level
    #[serde(default = "default_verbose_status")]
    pub verbose_status: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraFacing {
    #[default]
    Back,
    Front,
}

impl CameraFacing {
    pub fn toggled(self) -> Self {
        match self {
            CameraFacing::Back => CameraFacing::Front,
            CameraFacing::Front => CameraFacing::Back,
        }
    }
}

impl StorageConfig {
    pub fn cache_path(&self) -> PathBuf {
        Path::new(&self.root).join(&self.cache_dir)
    }

    pub fn durable_path(&self) -> PathBuf {
        Path::new(&self.root).join(&self.durable_dir)
    }
}

impl StumpcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("stumpcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("storage.root", default_storage_root())?
            .set_default("storage.cache_dir", default_cache_dir())?
            .set_default("storage.durable_dir", default_durable_dir())?
            .set_default("storage.persist_reference", default_persist_reference())?
            .set_default(
                "storage.discard_inputs_on_success",
                default_discard_inputs_on_success(),
            )?
            .set_default(
                "capture.max_duration_seconds",
                default_max_duration_seconds(),
            )?
            .set_default("capture.quality_hint", default_quality_hint())?
            .set_default("capture.facing", "Back")?
            .set_default("capture.require_microphone", default_require_microphone())?
            .set_default("upload.endpoint", default_endpoint())?
            .set_default("upload.timeout_seconds", default_timeout_seconds())?
            .set_default("upload.fallback_enabled", default_fallback_enabled())?
            .set_default("upload.retry_signatures", default_retry_signatures())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.verbose_status", default_verbose_status())?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Self::environment())
            .build()?;

        let config: StumpcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// STUMPCAM__UPLOAD__ENDPOINT=... style overrides. List values are comma
    /// separated, e.g. STUMPCAM__UPLOAD__RETRY_SIGNATURES=addWeighted,arithm.cpp
    fn environment() -> Environment {
        Environment::with_prefix("STUMPCAM")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("upload.retry_signatures")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.upload.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Message(format!(
                "Upload endpoint must be an http(s) URL, got '{}'",
                self.upload.endpoint
            )));
        }

        if self.upload.timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Upload timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.upload.retry_signatures.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::Message(
                "Upload retry_signatures must not contain empty strings".to_string(),
            ));
        }

        if self.capture.max_duration_seconds == 0 {
            return Err(ConfigError::Message(
                "Capture max_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.storage.root.is_empty() {
            return Err(ConfigError::Message(
                "Storage root cannot be empty".to_string(),
            ));
        }

        let cache = self.storage.cache_path();
        let durable = self.storage.durable_path();
        if cache.starts_with(&durable) || durable.starts_with(&cache) {
            return Err(ConfigError::Message(format!(
                "Storage cache area ({}) and durable area ({}) must not overlap",
                cache.display(),
                durable.display()
            )));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for StumpcamConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                root: default_storage_root(),
                cache_dir: default_cache_dir(),
                durable_dir: default_durable_dir(),
                persist_reference: default_persist_reference(),
                discard_inputs_on_success: default_discard_inputs_on_success(),
            },
            capture: CaptureConfig {
                max_duration_seconds: default_max_duration_seconds(),
                quality_hint: default_quality_hint(),
                facing: CameraFacing::default(),
                require_microphone: default_require_microphone(),
            },
            upload: UploadConfig {
                endpoint: default_endpoint(),
                timeout_seconds: default_timeout_seconds(),
                fallback_enabled: default_fallback_enabled(),
                retry_signatures: default_retry_signatures(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                verbose_status: default_verbose_status(),
            },
        }
    }
}

// Default value functions
fn default_storage_root() -> String {
    "./stumpcam-data".to_string()
}
fn default_cache_dir() -> String {
    "cache".to_string()
}
fn default_durable_dir() -> String {
    "media".to_string()
}
fn default_persist_reference() -> bool {
    false
}
fn default_discard_inputs_on_success() -> bool {
    false
}

fn default_max_duration_seconds() -> u64 {
    60
}
fn default_quality_hint() -> String {
    "720p".to_string()
}
fn default_require_microphone() -> bool {
    false
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8000/finalResult".to_string()
}
fn default_timeout_seconds() -> u64 {
    120
}
fn default_fallback_enabled() -> bool {
    true
}
fn default_retry_signatures() -> Vec<String> {
    vec![
        "addWeighted".to_string(),
        "arithm.cpp".to_string(),
        "Assertion failed".to_string(),
    ]
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_verbose_status() -> bool {
    false
}
