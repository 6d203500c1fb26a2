//! Apply command

use anyhow::{Context, Result};
use camino::Utf8Path;
use sopsfile_core::FileResourceConfig;
use sopsfile_provider::PlanAction;

use super::{selected, Workspace};
use crate::cli::ApplyArgs;
use crate::output;

pub async fn run(args: ApplyArgs, config: Option<&Utf8Path>) -> Result<()> {
    let mut workspace = Workspace::load(config)?;
    workspace.check_targets(&args.targets)?;

    output::header(&format!("Applying {}", workspace.manifest.manifest_path));

    let declared: Vec<(String, FileResourceConfig)> = workspace
        .manifest
        .resources()
        .filter(|(name, _)| selected(&args.targets, name))
        .map(|(name, resource)| (name.to_string(), resource.clone()))
        .collect();

    let (mut changed, mut unchanged, mut removed) = (0, 0, 0);

    for (name, resource_config) in &declared {
        let resource = workspace.resource(name, resource_config);
        let prior = workspace.state.get(name).cloned();

        let planned = resource
            .plan(prior.as_ref())
            .await
            .with_context(|| format!("Failed to plan {}", name))?;
        if planned.action == PlanAction::NoOp && !args.force {
            output::planned(planned.action, name, &planned.description);
            unchanged += 1;
            continue;
        }

        let spinner = output::spinner(&format!("Encrypting {}...", name));
        let result = resource.create().await;
        spinner.finish_and_clear();

        let state = match result {
            Ok(state) => state,
            Err(e) => {
                workspace.state.save()?;
                return Err(e).with_context(|| format!("Failed to apply {}", name));
            }
        };

        output::success(&format!("{} encrypted to {}", name, state.filename));
        output::kv("id", &state.id);
        workspace.state.insert(name.clone(), state);
        workspace.state.save()?;

        // The previous file goes only once its replacement is written
        if let Some(prior) = prior {
            let previous = workspace.recorded(name, &prior);
            if previous.target_path() != resource.target_path() {
                previous
                    .delete(&prior)
                    .await
                    .with_context(|| format!("Failed to remove previous file of {}", name))?;
                output::info(&format!("Removed previous file {}", prior.filename));
            }
        }
        changed += 1;
    }

    for (name, state) in workspace.orphans() {
        if !selected(&args.targets, &name) {
            continue;
        }
        workspace
            .recorded(&name, &state)
            .delete(&state)
            .await
            .with_context(|| format!("Failed to remove {}", name))?;
        workspace.state.remove(&name);
        workspace.state.save()?;
        output::success(&format!("Removed {} ({})", name, state.filename));
        removed += 1;
    }

    output::info(&format!(
        "{} encrypted, {} unchanged, {} removed",
        changed, unchanged, removed
    ));
    Ok(())
}
