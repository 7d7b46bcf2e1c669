use super::Workspace;
use tierline_telemetry::Paths;

pub async fn run(paths: &Paths, resource_id: &str) -> anyhow::Result<()> {
    let workspace = Workspace::open(paths)?;
    let router = workspace.router()?;
    let result = router.invalidate(resource_id);
    workspace.close(router).await?;

    let invalidation = result?;
    println!("{}", serde_json::to_string_pretty(&invalidation)?);
    Ok(())
}
