use super::Workspace;
use tierline_learn::HealthMonitor;
use tierline_telemetry::Paths;

/// Print the saved health of each configured backend without starting a router
pub fn run(paths: &Paths) -> anyhow::Result<()> {
    let workspace = Workspace::open(paths)?;
    let monitor = HealthMonitor::new(
        workspace.config.health.clone(),
        workspace.config.descriptors(),
    );
    monitor.restore(&workspace.db.load_backends()?);

    let snapshot = monitor.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    let unhealthy: Vec<_> = snapshot
        .iter()
        .filter(|d| !d.is_healthy)
        .map(|d| d.tier_id.as_str())
        .collect();
    if !unhealthy.is_empty() {
        tracing::warn!(tiers = ?unhealthy, "unhealthy backends");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierline_core::Config;
    use tierline_store::SqliteStore;

    #[test]
    fn test_health_reads_saved_state() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_home(temp.path());

        let mut backends = Config::new().descriptors();
        backends[0].is_healthy = false;
        backends[0].consecutive_failures = 5;
        SqliteStore::open(&paths.store_file())
            .unwrap()
            .save_backends(&backends)
            .unwrap();

        assert!(run(&paths).is_ok());
    }
}
