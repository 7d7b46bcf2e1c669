use super::Workspace;
use tierline_telemetry::Paths;

pub async fn run(paths: &Paths) -> anyhow::Result<()> {
    let workspace = Workspace::open(paths)?;
    let router = workspace.router()?;
    let status = router.status();
    router.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
