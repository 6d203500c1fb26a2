//! Validate command

use anyhow::{Context, Result};
use camino::Utf8Path;
use sopsfile_core::{EncryptionConfig, Manifest};
use sopsfile_provider::{input_format, resolve_master_keys};

use crate::cli::ValidateArgs;
use crate::output;

pub fn run(args: ValidateArgs, config: Option<&Utf8Path>) -> Result<()> {
    let manifest = Manifest::load(config).context("Failed to load manifest")?;
    manifest.validate()?;

    output::header(&format!("Validating {}", manifest.manifest_path));

    for (name, resource) in manifest.resources() {
        let effective = EncryptionConfig::merge(manifest.provider(), resource)?;
        let format = input_format(&resource.filename, resource.input_type.as_deref())
            .with_context(|| format!("{}: invalid input_type", name))?;

        output::success(name);
        output::kv("filename", &resource.filename);
        output::kv("format", format.as_str());
        output::kv("provider", &effective.provider);

        if !args.skip_keys {
            let keys = resolve_master_keys(&effective).with_context(|| format!("{}: invalid keys", name))?;
            output::kv("keys", &keys.len().to_string());
        }
    }

    output::success("Manifest is valid");
    Ok(())
}
