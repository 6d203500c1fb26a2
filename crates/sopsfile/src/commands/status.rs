//! Status command

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Serialize;

use super::Workspace;
use crate::cli::StatusArgs;
use crate::output;

/// Status of one resource
#[derive(Debug, Serialize)]
struct ResourceStatus {
    resource: String,
    filename: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

pub async fn run(args: StatusArgs, config: Option<&Utf8Path>) -> Result<()> {
    let workspace = Workspace::load(config)?;
    let mut rows = Vec::new();

    for (name, declared) in workspace.manifest.resources() {
        let row = match workspace.state.get(name) {
            None => ResourceStatus {
                resource: name.to_string(),
                filename: declared.filename.clone(),
                status: "not created",
                id: None,
            },
            Some(state) => {
                let current = workspace
                    .resource(name, declared)
                    .read(state)
                    .await
                    .with_context(|| format!("Failed to read {}", name))?;
                ResourceStatus {
                    resource: name.to_string(),
                    filename: state.filename.clone(),
                    status: if current.is_some() { "in sync" } else { "missing or modified" },
                    id: Some(state.id.clone()),
                }
            }
        };
        rows.push(row);
    }

    for (name, state) in workspace.orphans() {
        rows.push(ResourceStatus {
            resource: name,
            filename: state.filename,
            status: "no longer declared",
            id: Some(state.id),
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    output::header("Resource status");
    if rows.is_empty() {
        output::info("No resources declared");
    }
    for row in &rows {
        println!();
        output::kv("resource", &row.resource);
        output::kv("filename", &row.filename);
        output::kv("status", row.status);
        if let Some(id) = &row.id {
            output::kv("id", id);
        }
    }
    output::kv("state", workspace.state.path().as_str());

    let drifted = rows.iter().filter(|r| r.status == "missing or modified").count();
    if drifted > 0 {
        output::warning(&format!("{} resource(s) need apply", drifted));
    }

    Ok(())
}
