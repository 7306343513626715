//! `deltasync check` - report whether an update is published.

use std::path::PathBuf;

use clap::Args;
use console::style;
use deltasync::{DeltaRevisioner, RevisionEvent};

use super::manifest_source;
use crate::error::CliError;

#[derive(Args)]
pub struct CheckArgs {
    /// The currently installed file.
    pub file: PathBuf,

    /// Manifest (control file) URL.
    #[arg(long)]
    pub url: Option<String>,

    /// Embedded update descriptor (e.g. "zsync|http://...").
    #[arg(long)]
    pub descriptor: Option<String>,
}

pub fn run(args: CheckArgs) -> Result<(), CliError> {
    let source = manifest_source(args.url, args.descriptor)?;

    let (revisioner, events) = DeltaRevisioner::new();
    revisioner.set_seed_file(&args.file);
    revisioner.set_manifest_source(source);
    revisioner.check_for_update();

    for event in events {
        match event {
            RevisionEvent::UpdateAvailable { available, local } => {
                if available {
                    println!(
                        "{} update available for {}",
                        style("●").green(),
                        local.path.display()
                    );
                } else {
                    println!(
                        "{} {} is up to date",
                        style("✓").green(),
                        local.path.display()
                    );
                }
                return Ok(());
            }
            RevisionEvent::Error(error) => return Err(error.into()),
            _ => {}
        }
    }
    Err(CliError::ChannelClosed)
}
