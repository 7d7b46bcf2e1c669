//! Path resolution for config, store, and audit files

use std::path::PathBuf;

/// Environment variable that overrides the state directory.
pub const HOME_ENV: &str = "TIERLINE_HOME";

/// Resolves standard paths under the tierline state directory
#[derive(Debug, Clone)]
pub struct Paths {
    pub home: PathBuf,
}

impl Paths {
    /// Resolve from `$TIERLINE_HOME`, falling back to `~/.tierline`
    pub fn new() -> std::io::Result<Self> {
        if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_home(dir));
        }

        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "home directory not found")
        })?;

        Ok(Self::with_home(home.join(".tierline")))
    }

    /// Use an explicit state directory
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.json")
    }

    /// SQLite database holding cache entries, relevance, backends, and the dispatch log
    pub fn store_file(&self) -> PathBuf {
        self.home.join("tierline.db")
    }

    pub fn telemetry_dir(&self) -> PathBuf {
        self.home.join("telemetry")
    }

    /// Append-only dispatch log used when the audit target is JSONL
    pub fn dispatch_log_file(&self) -> PathBuf {
        self.telemetry_dir().join("dispatch.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_with_home_layout() {
        let paths = Paths::with_home("/tmp/tl");
        assert!(paths.config_file().ends_with("tl/config.json"));
        assert!(paths.store_file().ends_with("tl/tierline.db"));
        assert!(paths.dispatch_log_file().ends_with("tl/telemetry/dispatch.jsonl"));
    }

    #[test]
    #[serial]
    fn test_env_override() {
        let temp = tempfile::TempDir::new().unwrap();
        std::env::set_var(HOME_ENV, temp.path());
        let paths = Paths::new().unwrap();
        std::env::remove_var(HOME_ENV);

        assert_eq!(paths.home, temp.path());
    }

    #[test]
    #[serial]
    fn test_default_home() {
        std::env::remove_var(HOME_ENV);
        let paths = Paths::new().unwrap();
        assert!(paths.home.ends_with(".tierline"));
    }
}
