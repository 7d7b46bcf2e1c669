use tierline_core::Config;
use tierline_store::SqliteStore;
use tierline_telemetry::Paths;

pub fn run(paths: &Paths, force: bool) -> anyhow::Result<()> {
    let config_path = paths.config_file();

    if config_path.exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    } else {
        let json = serde_json::to_string_pretty(&Config::new())?;
        tierline_telemetry::atomic_write(&config_path, json.as_bytes())?;
        println!("✓ Wrote default config to {}", config_path.display());
    }

    let store_path = paths.store_file();
    SqliteStore::open(&store_path)?;
    println!("✓ State database at {}", store_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_home(temp.path());

        run(&paths, false).unwrap();
        let config = Config::load(&paths.config_file()).unwrap();
        assert_eq!(config.backends.len(), 3);
        assert!(paths.store_file().exists());
    }

    #[test]
    fn test_init_keeps_existing_config_without_force() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_home(temp.path());
        std::fs::write(paths.config_file(), "{\"custom\": true}").unwrap();

        run(&paths, false).unwrap();
        let content = std::fs::read_to_string(paths.config_file()).unwrap();
        assert_eq!(content, "{\"custom\": true}");

        run(&paths, true).unwrap();
        assert!(Config::load(&paths.config_file()).is_ok());
    }
}
