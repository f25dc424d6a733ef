use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Suffix appended to the binary path to form the backup path.
pub const BACKUP_SUFFIX: &str = ".stable";

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".aegis.toml";

/// Top-level configuration loaded from `.aegis.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AegisConfig {
    pub build: BuildConfig,
    pub watch: WatchConfig,
    pub safety_net: SafetyNetConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Shell command run from `watch.root`.
    pub cmd: String,
    /// Path of the executable the command produces, relative to `watch.root`.
    pub bin: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub root: PathBuf,
    /// Directory base names skipped during the initial walk.
    pub exclude_dir: Vec<String>,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyNetConfig {
    /// How long a challenger must stay alive to be promoted.
    pub probation_ms: u64,
    /// How long a stopping process gets between SIGTERM and SIGKILL.
    pub grace_ms: u64,
}

// --- Default implementations ---

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cmd: "go build -o ./tmp/app .".to_string(),
            bin: PathBuf::from("./tmp/app"),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            exclude_dir: vec!["tmp".to_string(), "vendor".to_string(), ".git".to_string()],
            debounce_ms: 500,
        }
    }
}

impl Default for SafetyNetConfig {
    fn default() -> Self {
        Self {
            probation_ms: 2500,
            grace_ms: 2000,
        }
    }
}

impl AegisConfig {
    /// Directory the build runs in and the application starts in.
    pub fn root(&self) -> &Path {
        &self.watch.root
    }

    /// The built binary, resolved against the watch root when relative.
    pub fn bin_path(&self) -> PathBuf {
        if self.build.bin.is_absolute() {
            self.build.bin.clone()
        } else {
            self.watch.root.join(&self.build.bin)
        }
    }

    /// The backup slot next to the binary (`<bin>.stable`).
    pub fn backup_path(&self) -> PathBuf {
        let mut path = self.bin_path().into_os_string();
        path.push(BACKUP_SUFFIX);
        PathBuf::from(path)
    }

    pub fn probation(&self) -> Duration {
        Duration::from_millis(self.safety_net.probation_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.safety_net.grace_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    AlreadyExists { path: PathBuf },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
            ConfigError::AlreadyExists { path } => {
                write!(f, "{} already exists (use --force to overwrite)", path.display())
            }
            ConfigError::Write { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::AlreadyExists { .. } => None,
            ConfigError::Write { source, .. } => Some(source),
        }
    }
}

/// Load and parse a config file.
pub fn load(path: &Path) -> Result<AegisConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Content written by `aegis init`.
pub const DEFAULT_CONFIG: &str = "\
# .aegis.toml

# Command that builds your application.
[build]
# Run from the 'watch.root' directory.
cmd = \"go build -o ./tmp/app .\"

# The binary the command above produces, relative to 'watch.root'.
bin = \"./tmp/app\"

[watch]
# Directory to watch and to run the build in.
root = \".\"
# Directory names to ignore (matched by name at any depth).
exclude_dir = [\"tmp\", \"vendor\", \".git\"]
# Quiet period after the last write before a rebuild starts.
debounce_ms = 500

# The crash-proof safety net.
[safety_net]
# How long a fresh build must stay up before it is considered stable.
probation_ms = 2500
# How long a stopping process gets between SIGTERM and SIGKILL.
grace_ms = 2000
";

/// Write the default config file.
/// Returns an error if the file exists and `force` is false.
pub fn write_default(path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    std::fs::write(path, DEFAULT_CONFIG).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}
