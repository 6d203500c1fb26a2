//! Plan command

use anyhow::{Context, Result};
use camino::Utf8Path;
use sopsfile_provider::{PlanAction, PlannedAction};

use super::{selected, Workspace};
use crate::cli::PlanArgs;
use crate::output;

pub async fn run(args: PlanArgs, config: Option<&Utf8Path>) -> Result<()> {
    let workspace = Workspace::load(config)?;
    workspace.check_targets(&args.targets)?;

    let mut actions = Vec::new();
    for (name, declared) in workspace.manifest.resources() {
        if !selected(&args.targets, name) {
            continue;
        }
        let planned = workspace
            .resource(name, declared)
            .plan(workspace.state.get(name))
            .await
            .with_context(|| format!("Failed to plan {}", name))?;
        actions.push(planned);
    }

    for (name, state) in workspace.orphans() {
        if selected(&args.targets, &name) {
            actions.push(PlannedAction {
                action: PlanAction::Delete,
                resource: name,
                description: format!("remove {}", state.filename),
            });
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
        return Ok(());
    }

    output::header(&format!("Plan for {}", workspace.manifest.manifest_path));
    for planned in &actions {
        output::planned(planned.action, &planned.resource, &planned.description);
    }

    let count = |action: PlanAction| actions.iter().filter(|a| a.action == action).count();
    let (create, replace, delete) = (
        count(PlanAction::Create),
        count(PlanAction::Replace),
        count(PlanAction::Delete),
    );
    if create + replace + delete == 0 {
        output::success("No changes");
    } else {
        output::info(&format!(
            "{} to create, {} to replace, {} to delete",
            create, replace, delete
        ));
    }

    Ok(())
}
