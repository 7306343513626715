//! The session worker: one thread driving the phase pipeline.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use url::Url;

use super::events::RevisionEvent;
use super::state::RevisionState;
use super::Shared;
use crate::cancel::CancelFlag;
use crate::checksum::sha1_hex_file;
use crate::control::Manifest;
use crate::descriptor::{LocalFileInfo, ManifestSource, UpdateDescriptor};
use crate::error::RevisionError;
use crate::matcher::{scan_sharded, ScanOutcome, ScanStatus, Scanner};
use crate::reconstruct::{FinishedFile, Reconstructor};
use crate::transfer::{
    ByteRange, DownloadOutcome, HttpTransport, ProgressReport, RangeDownloader, SpeedMeter,
};

/// What the caller asked the session to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SessionMode {
    /// Stop after comparing hashes and report availability.
    Check,
    /// Run the full pipeline.
    Update,
}

/// Inputs of one session, validated before the worker spawns.
#[derive(Clone)]
pub(super) struct ResolvedConfig {
    pub seed_path: PathBuf,
    pub source: ManifestSource,
    pub output_dir: Option<PathBuf>,
    pub local_info: Option<LocalFileInfo>,
    pub concurrency: usize,
    pub scan_shards: usize,
}

/// Terminal result of a session.
enum Outcome {
    UpdateAvailable {
        available: bool,
        local: LocalFileInfo,
    },
    AlreadyCurrent {
        local: LocalFileInfo,
    },
    Updated {
        target: FinishedFile,
        old_path: PathBuf,
    },
    Canceled,
    Failed(RevisionError),
}

/// Session entry point; runs on its own thread.
pub(super) fn run(
    shared: Arc<Shared>,
    transport: Arc<dyn HttpTransport>,
    events: Sender<RevisionEvent>,
    config: ResolvedConfig,
    cancel: CancelFlag,
    mode: SessionMode,
) {
    let outcome = pipeline(&shared, &transport, &events, &config, &cancel, mode);

    // Set the terminal state first, then deliver the terminal event;
    // by the time a caller sees the notification the machine is back
    // in a resting state and `clear` + `start` are safe.
    let (state, event) = match outcome {
        Outcome::UpdateAvailable { available, local } => (
            if available {
                RevisionState::Idle
            } else {
                RevisionState::NoUpdateNeeded
            },
            RevisionEvent::UpdateAvailable { available, local },
        ),
        Outcome::AlreadyCurrent { local } => (
            RevisionState::Finished,
            RevisionEvent::Finished {
                target: FinishedFile {
                    path: local.path.clone(),
                    sha1: local.sha1,
                },
                old_path: local.path,
            },
        ),
        Outcome::Updated { target, old_path } => (
            RevisionState::Finished,
            RevisionEvent::Finished { target, old_path },
        ),
        Outcome::Canceled => (RevisionState::Canceled, RevisionEvent::Canceled),
        Outcome::Failed(error) => (RevisionState::Errored, RevisionEvent::Error(error)),
    };

    set_state(&shared, &events, state);
    let _ = events.send(event);
}

fn pipeline(
    shared: &Shared,
    transport: &Arc<dyn HttpTransport>,
    events: &Sender<RevisionEvent>,
    config: &ResolvedConfig,
    cancel: &CancelFlag,
    mode: SessionMode,
) -> Outcome {
    if mode == SessionMode::Update {
        let _ = events.send(RevisionEvent::Started);
    }

    set_state(shared, events, RevisionState::FetchingInfo);
    let local = match local_file_info(config) {
        Ok(local) => local,
        Err(error) => return Outcome::Failed(error),
    };
    if cancel.is_canceled() {
        return Outcome::Canceled;
    }

    set_state(shared, events, RevisionState::FetchingManifest);
    let manifest_url = match resolve_source(&config.source) {
        Ok(url) => url,
        Err(error) => return Outcome::Failed(error),
    };
    let control_bytes = match transport.get(manifest_url.as_str()) {
        Ok(bytes) => bytes,
        Err(error) => return Outcome::Failed(error.into()),
    };
    let manifest = match Manifest::parse(&control_bytes, Some(&manifest_url)) {
        Ok(manifest) => manifest,
        Err(error) => return Outcome::Failed(error.into()),
    };
    debug!(
        filename = manifest.filename(),
        blocks = manifest.block_count(),
        block_size = manifest.block_size(),
        "manifest parsed"
    );
    if cancel.is_canceled() {
        return Outcome::Canceled;
    }

    set_state(shared, events, RevisionState::ComparingHashes);
    let available = local.sha1 != manifest.sha1();
    if mode == SessionMode::Check {
        return Outcome::UpdateAvailable { available, local };
    }
    if !available {
        info!(path = %local.path.display(), "local file already matches the target");
        return Outcome::AlreadyCurrent { local };
    }

    set_state(shared, events, RevisionState::Matching);
    let output_dir = config
        .output_dir
        .clone()
        .or_else(|| config.seed_path.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let writer = match Reconstructor::create(
        &output_dir,
        manifest.filename(),
        manifest.length(),
        manifest.sha1(),
    ) {
        Ok(writer) => writer,
        Err(error) => return Outcome::Failed(error.into()),
    };

    let scan = match run_scan(&manifest, config, &writer, cancel, events, local.length) {
        Ok(Some(scan)) => scan,
        Ok(None) => return Outcome::Canceled,
        Err(error) => return Outcome::Failed(error),
    };
    writer.account(scan.matched_bytes);
    info!(
        matched_blocks = scan.matched_blocks,
        required_ranges = scan.required.len(),
        "seed scan complete"
    );
    if cancel.is_canceled() {
        return Outcome::Canceled;
    }

    set_state(shared, events, RevisionState::Downloading);
    let required_total: u64 = scan.required.iter().map(ByteRange::len).sum();
    let downloader =
        RangeDownloader::new(Arc::clone(transport)).with_concurrency(config.concurrency);
    let on_progress = |report: ProgressReport| {
        let _ = events.send(RevisionEvent::Progress(report));
    };
    match downloader.download(
        manifest.url().as_str(),
        &scan.required,
        &writer,
        scan.matched_bytes,
        manifest.length(),
        cancel,
        &on_progress,
    ) {
        Err(error) => return Outcome::Failed(error.into()),
        Ok(DownloadOutcome::Canceled) => return Outcome::Canceled,
        Ok(DownloadOutcome::Completed(summary)) => {
            if summary.full_fallback {
                // One sequential stream satisfied every range.
                writer.account(writer.remaining());
            } else {
                writer.account(required_total);
            }
        }
    }
    if cancel.is_canceled() {
        return Outcome::Canceled;
    }

    set_state(shared, events, RevisionState::Reconstructing);
    match writer.finalize(Some(&config.seed_path)) {
        Ok(target) => Outcome::Updated {
            target,
            old_path: config.seed_path.clone(),
        },
        Err(error) => Outcome::Failed(error.into()),
    }
}

/// Scan the seed for reusable blocks, or declare everything missing
/// for seeds shorter than one block.
fn run_scan(
    manifest: &Manifest,
    config: &ResolvedConfig,
    writer: &Reconstructor,
    cancel: &CancelFlag,
    events: &Sender<RevisionEvent>,
    seed_length: u64,
) -> Result<Option<ScanOutcome>, RevisionError> {
    if seed_length < u64::from(manifest.block_size()) {
        debug!("seed shorter than one block, skipping scan");
        return Ok(Some(ScanOutcome {
            required: vec![ByteRange::new(0, manifest.length())],
            matched_blocks: 0,
            matched_bytes: 0,
        }));
    }

    if config.scan_shards > 1 {
        let (status, outcome) = scan_sharded(
            manifest,
            &config.seed_path,
            config.scan_shards,
            writer,
            cancel,
        )?;
        return Ok((status == ScanStatus::Completed).then_some(outcome));
    }

    let seed = File::open(&config.seed_path).map_err(|source| {
        RevisionError::SeedFileNotReadable {
            path: config.seed_path.clone(),
            source,
        }
    })?;

    let mut meter = SpeedMeter::new();
    let length = manifest.length();
    let mut scanner = Scanner::new(manifest);
    let status = scanner.scan(seed, writer, cancel, &mut |matched_bytes| {
        meter.record(matched_bytes, Instant::now());
        let _ = events.send(RevisionEvent::Progress(ProgressReport::new(
            matched_bytes,
            length,
            meter.bytes_per_sec(),
        )));
    })?;

    Ok((status == ScanStatus::Completed).then(|| scanner.finish()))
}

/// Read (or adopt) the seed's identity.
fn local_file_info(config: &ResolvedConfig) -> Result<LocalFileInfo, RevisionError> {
    if let Some(info) = &config.local_info {
        return Ok(info.clone());
    }

    let metadata =
        fs::metadata(&config.seed_path).map_err(|source| RevisionError::SeedFileNotReadable {
            path: config.seed_path.clone(),
            source,
        })?;
    let sha1 = sha1_hex_file(&config.seed_path).map_err(|source| {
        RevisionError::SeedFileNotReadable {
            path: config.seed_path.clone(),
            source,
        }
    })?;

    Ok(LocalFileInfo {
        path: config.seed_path.clone(),
        sha1,
        length: metadata.len(),
    })
}

/// Turn the configured manifest source into a fetchable URL.
fn resolve_source(source: &ManifestSource) -> Result<Url, RevisionError> {
    match source {
        ManifestSource::Url(url) => Ok(url.clone()),
        ManifestSource::Descriptor(UpdateDescriptor::Zsync { url }) => {
            Url::parse(url).map_err(|_| RevisionError::InvalidManifestUrl { url: url.clone() })
        }
        ManifestSource::Descriptor(descriptor) => Err(RevisionError::UnresolvedDescriptor {
            transport: descriptor.transport().to_string(),
        }),
    }
}

/// Move the machine to `state` and notify listeners.
fn set_state(shared: &Shared, events: &Sender<RevisionEvent>, state: RevisionState) {
    {
        let mut machine = shared.machine.lock().expect("state machine lock poisoned");
        machine.state = state;
    }
    let _ = events.send(RevisionEvent::StateChanged(state));
}
