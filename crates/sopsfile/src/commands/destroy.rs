//! Destroy command

use anyhow::{Context, Result};
use camino::Utf8Path;

use super::{selected, Workspace};
use crate::cli::DestroyArgs;
use crate::output;

pub async fn run(args: DestroyArgs, config: Option<&Utf8Path>) -> Result<()> {
    let mut workspace = Workspace::load(config)?;
    workspace.check_targets(&args.targets)?;

    let recorded: Vec<_> = workspace
        .state
        .resources()
        .iter()
        .filter(|(name, _)| selected(&args.targets, name))
        .map(|(name, state)| (name.clone(), state.clone()))
        .collect();

    if recorded.is_empty() {
        output::info("Nothing to destroy");
        return Ok(());
    }

    output::header(&format!("Destroying {} resource(s)", recorded.len()));

    for (name, state) in recorded {
        workspace
            .recorded(&name, &state)
            .delete(&state)
            .await
            .with_context(|| format!("Failed to destroy {}", name))?;
        workspace.state.remove(&name);
        workspace.state.save()?;
        output::success(&format!("Removed {} ({})", name, state.filename));
    }

    Ok(())
}
