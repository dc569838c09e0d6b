use rollcall_core::EngineSettings;
use std::path::PathBuf;

const DEFAULT_MODEL_DIR: &str = "/usr/share/rollcall/models";

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite attendance ledger.
    pub db_path: PathBuf,
    /// Path to the known-template JSON artifact.
    pub templates_path: PathBuf,
    /// Maximum Euclidean distance (exclusive) for a match.
    pub match_tolerance: f32,
    /// Seconds a processed face is skipped before being reprocessed.
    pub cooldown_secs: u64,
    /// Hours after a mark during which the student is not marked again.
    pub suppression_hours: u64,
    /// Frame scale factor applied before analysis.
    pub downsample: f32,
    /// Deadline in milliseconds for each analyzer and ledger call.
    pub external_timeout_ms: u64,
    /// Cooldown cache size above which expired entries are pruned.
    pub cooldown_cache_limit: usize,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());

        Self {
            model_dir: path("ROLLCALL_MODEL_DIR", PathBuf::from(DEFAULT_MODEL_DIR)),
            db_path: path("ROLLCALL_DB_PATH", data_dir.join("ledger.db")),
            templates_path: path("ROLLCALL_TEMPLATES_PATH", data_dir.join("templates.json")),
            match_tolerance: parsed("ROLLCALL_MATCH_TOLERANCE")
                .filter(|v| *v > 0.0)
                .map_or(0.6, |v| v as f32),
            cooldown_secs: env_u64(&lookup, "ROLLCALL_COOLDOWN_SECS", 300),
            suppression_hours: env_u64(&lookup, "ROLLCALL_SUPPRESSION_HOURS", 8),
            downsample: parsed("ROLLCALL_DOWNSAMPLE")
                .filter(|v| *v > 0.0 && *v <= 1.0)
                .map_or(0.25, |v| v as f32),
            external_timeout_ms: env_u64(&lookup, "ROLLCALL_EXTERNAL_TIMEOUT_MS", 5000),
            cooldown_cache_limit: lookup("ROLLCALL_COOLDOWN_CACHE_LIMIT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(4096),
            session_bus: lookup("ROLLCALL_SESSION_BUS").is_some_and(|v| v == "1"),
        }
    }

    /// Engine tunables derived from this configuration.
    ///
    /// Windows too large to represent fall back to the defaults.
    pub fn settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        let cooldown = i64::try_from(self.cooldown_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds);
        let suppression = i64::try_from(self.suppression_hours)
            .ok()
            .and_then(chrono::Duration::try_hours);
        if cooldown.is_none() || suppression.is_none() {
            tracing::warn!(
                cooldown_secs = self.cooldown_secs,
                suppression_hours = self.suppression_hours,
                "window out of range, using default"
            );
        }

        EngineSettings {
            tolerance: self.match_tolerance,
            cooldown: cooldown.unwrap_or(defaults.cooldown),
            suppression: suppression.unwrap_or(defaults.suppression),
            downsample: self.downsample,
            external_timeout: std::time::Duration::from_millis(self.external_timeout_ms),
            cooldown_cache_limit: self.cooldown_cache_limit,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_vision::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_vision::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn env_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
