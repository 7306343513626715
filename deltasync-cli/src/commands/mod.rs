//! CLI subcommands.

pub mod check;
pub mod update;

pub use check::CheckArgs;
pub use update::UpdateArgs;

use deltasync::{ManifestSource, UpdateDescriptor, Url};

use crate::error::CliError;

/// Build the manifest source from `--url` / `--descriptor`.
pub fn manifest_source(
    url: Option<String>,
    descriptor: Option<String>,
) -> Result<ManifestSource, CliError> {
    if let Some(url) = url {
        let parsed = Url::parse(&url)
            .map_err(|e| CliError::InvalidSource(format!("{}: {}", url, e)))?;
        return Ok(ManifestSource::Url(parsed));
    }
    if let Some(raw) = descriptor {
        return Ok(ManifestSource::Descriptor(UpdateDescriptor::parse(&raw)?));
    }
    Err(CliError::InvalidSource(
        "pass --url or --descriptor".to_string(),
    ))
}
