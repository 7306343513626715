//! `deltasync update` - rebuild the newest version in place.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use deltasync::{DeltaRevisioner, RevisionEvent};

use super::manifest_source;
use crate::error::CliError;

#[derive(Args)]
pub struct UpdateArgs {
    /// The currently installed file, used as the seed.
    pub file: PathBuf,

    /// Manifest (control file) URL.
    #[arg(long)]
    pub url: Option<String>,

    /// Embedded update descriptor (e.g. "zsync|http://...").
    #[arg(long)]
    pub descriptor: Option<String>,

    /// Directory the new version is written to (defaults to the seed's
    /// directory).
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Concurrent range downloads.
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Worker threads for the seed scan.
    #[arg(long, default_value_t = 1)]
    pub scan_shards: usize,
}

pub fn run(args: UpdateArgs) -> Result<(), CliError> {
    let source = manifest_source(args.url, args.descriptor)?;

    let (revisioner, events) = DeltaRevisioner::new();
    revisioner.set_seed_file(&args.file);
    revisioner.set_manifest_source(source);
    revisioner.set_concurrency(args.concurrency);
    revisioner.set_scan_shards(args.scan_shards);
    if let Some(dir) = args.output_dir {
        revisioner.set_output_directory(dir);
    }

    let revisioner = Arc::new(revisioner);
    let cancel_target = Arc::clone(&revisioner);
    ctrlc::set_handler(move || {
        eprintln!("\ninterrupt received, canceling...");
        cancel_target.cancel();
    })
    .expect("Failed to install Ctrl-C handler");

    let bar = ProgressBar::hidden();
    bar.set_style(
        ProgressStyle::with_template("{msg:>12} [{bar:40}] {bytes}/{total_bytes} {prefix}")
            .expect("static progress template is valid")
            .progress_chars("=> "),
    );

    revisioner.start();

    for event in events {
        match event {
            RevisionEvent::Started => debug!("session started"),
            RevisionEvent::StateChanged(state) => {
                bar.set_message(state.to_string());
            }
            RevisionEvent::Progress(progress) => {
                if bar.is_hidden() {
                    bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                }
                bar.set_length(progress.bytes_total);
                bar.set_position(progress.bytes_received.min(progress.bytes_total));
                bar.set_prefix(format!("{:.1} {}", progress.speed, progress.unit));
            }
            RevisionEvent::Finished { target, old_path } => {
                bar.finish_and_clear();
                println!(
                    "{} updated {} -> {}",
                    style("✓").green(),
                    old_path.display(),
                    target.path.display()
                );
                println!("  sha1: {}", target.sha1);
                return Ok(());
            }
            RevisionEvent::Canceled => {
                bar.abandon();
                println!("update canceled");
                return Ok(());
            }
            RevisionEvent::Error(error) => {
                bar.abandon();
                return Err(error.into());
            }
            RevisionEvent::UpdateAvailable { .. } => {}
        }
    }
    Err(CliError::ChannelClosed)
}
