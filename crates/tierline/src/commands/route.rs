use super::Workspace;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tierline_core::{Request, RouteError};
use tierline_router::{RouteResponse, Router};
use tierline_telemetry::{append_jsonl_all, read_jsonl, Paths};
use tokio::task::JoinSet;

pub enum Input {
    Text(String),
    /// JSONL file of [`BatchRequest`]
    Batch(PathBuf),
}

/// One line of a batch file
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub min_capability: Option<u8>,
}

impl BatchRequest {
    fn into_request(self, shared: &[String], min_capability: Option<u8>) -> Request {
        let mut request = Request::new(self.text)
            .with_resources(shared.iter().cloned().chain(self.resources));
        if let Some(id) = self.id {
            request = request.with_id(id);
        }
        if let Some(min) = self.min_capability.or(min_capability) {
            request = request.with_min_capability(min);
        }
        request
    }
}

pub async fn run(
    paths: &Paths,
    input: Input,
    resources: Vec<String>,
    min_capability: Option<u8>,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let workspace = Workspace::open(paths)?;
    let router = workspace.router()?;

    let requests: Vec<Request> = match input {
        Input::Text(text) => vec![BatchRequest {
            id: None,
            text,
            resources: Vec::new(),
            min_capability: None,
        }
        .into_request(&resources, min_capability)],
        Input::Batch(file) => {
            let batch: Vec<BatchRequest> = read_jsonl(&file)?;
            if batch.is_empty() {
                anyhow::bail!("no requests in {}", file.display());
            }
            batch
                .into_iter()
                .map(|b| b.into_request(&resources, min_capability))
                .collect()
        }
    };

    let single = requests.len() == 1;
    let results = route_all(&router, requests).await;
    workspace.close(router).await?;

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    let lines = results
        .iter()
        .map(|(request_id, result)| render(request_id, result))
        .collect::<anyhow::Result<Vec<_>>>()?;

    match out {
        Some(path) => append_jsonl_all(path, &lines)?,
        None if single => {
            for line in &lines {
                println!("{}", serde_json::to_string_pretty(line)?);
            }
        }
        None => {
            for line in &lines {
                println!("{}", serde_json::to_string(line)?);
            }
        }
    }

    if let Some(path) = out {
        println!(
            "✓ Routed {} request(s), {} failed, results in {}",
            results.len(),
            failed,
            path.display()
        );
    }
    if single && failed > 0 {
        anyhow::bail!("request failed");
    }
    Ok(())
}

/// Route every request concurrently, keeping input order in the result
async fn route_all(
    router: &Router,
    requests: Vec<Request>,
) -> Vec<(String, Result<RouteResponse, RouteError>)> {
    let ids: Vec<String> = requests.iter().map(|r| r.id.clone()).collect();
    let mut slots: Vec<Option<Result<RouteResponse, RouteError>>> =
        (0..requests.len()).map(|_| None).collect();

    let mut set = JoinSet::new();
    for (index, request) in requests.into_iter().enumerate() {
        let router = router.clone();
        set.spawn(async move { (index, router.route(request).await) });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => tracing::error!(error = %e, "route task panicked"),
        }
    }

    ids.into_iter()
        .zip(slots)
        .map(|(id, slot)| (id, slot.unwrap_or(Err(RouteError::Cancelled))))
        .collect()
}

fn render(request_id: &str, result: &Result<RouteResponse, RouteError>) -> anyhow::Result<Value> {
    Ok(match result {
        Ok(response) => serde_json::to_value(response)?,
        Err(e) => json!({
            "request_id": request_id,
            "error": e.to_string(),
            "tiers_attempted": e.attempted_tiers(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_line_defaults() {
        let line: BatchRequest = serde_json::from_str(r#"{"text": "lint the crate"}"#).unwrap();
        let request = line.into_request(&["Cargo.toml".to_string()], Some(4));
        assert_eq!(request.text, "lint the crate");
        assert_eq!(request.resources, vec!["Cargo.toml"]);
        assert_eq!(request.hints.min_capability, Some(4));
    }

    #[test]
    fn test_batch_line_overrides() {
        let line: BatchRequest = serde_json::from_str(
            r#"{"id": "req-7", "text": "x", "resources": ["a.rs"], "min_capability": 9}"#,
        )
        .unwrap();
        let request = line.into_request(&[], Some(2));
        assert_eq!(request.id, "req-7");
        assert_eq!(request.resources, vec!["a.rs"]);
        assert_eq!(request.hints.min_capability, Some(9));
    }

    #[test]
    fn test_render_error_line() {
        let err = RouteError::BackendTimeout {
            tier: "tier1".to_string(),
            timeout_ms: 50,
        };
        let line = render("req-1", &Err(err)).unwrap();
        assert_eq!(line["request_id"], "req-1");
        assert_eq!(line["tiers_attempted"][0], "tier1");
    }
}
