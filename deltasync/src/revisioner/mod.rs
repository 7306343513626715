//! The delta revisioner: top-level state machine.
//!
//! A [`DeltaRevisioner`] composes the whole pipeline (manifest fetch
//! and parse, hash comparison, seed scan, range download, and
//! reconstruction) behind four operations: `start`,
//! `check_for_update`, `cancel`, and `clear`. Exactly one session runs
//! at a time; invoking `start`/`check_for_update`/`clear` while a
//! session is active is a debounced no-op, not an error and not a
//! queue. Results arrive asynchronously on the event channel handed
//! out at construction.

mod events;
mod state;
mod worker;

pub use events::RevisionEvent;
pub use state::RevisionState;

use std::fs::File;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

use crate::cancel::CancelFlag;
use crate::descriptor::{LocalFileInfo, ManifestSource};
use crate::error::RevisionError;
use crate::transfer::{HttpTransport, ReqwestTransport};
use worker::{ResolvedConfig, SessionMode};

/// Default fan-out for range downloads.
const DEFAULT_CONCURRENCY: usize = 4;

/// Caller-configurable inputs, persisted across sessions.
#[derive(Clone, Default)]
struct Settings {
    seed_path: Option<PathBuf>,
    source: Option<ManifestSource>,
    output_dir: Option<PathBuf>,
    local_info: Option<LocalFileInfo>,
    concurrency: usize,
    scan_shards: usize,
}

/// One attempt's live handles.
struct Session {
    cancel: CancelFlag,
    worker: Option<JoinHandle<()>>,
}

/// State shared between the API surface and the session worker.
pub(crate) struct Shared {
    pub(crate) machine: Mutex<Machine>,
}

pub(crate) struct Machine {
    pub(crate) state: RevisionState,
    session: Option<Session>,
    settings: Settings,
}

/// Drives delta updates of one file.
///
/// Construction hands back the receiving end of the event channel;
/// every notification of every session goes there, ending in exactly
/// one terminal event per session (`Finished`, `Canceled`, or
/// `Error`).
pub struct DeltaRevisioner {
    shared: Arc<Shared>,
    transport: Arc<dyn HttpTransport>,
    events: Sender<RevisionEvent>,
}

impl DeltaRevisioner {
    /// Revisioner talking to real servers over HTTP.
    pub fn new() -> (Self, Receiver<RevisionEvent>) {
        Self::with_transport(Arc::new(ReqwestTransport::new()))
    }

    /// Revisioner with a custom transport (tests, proxies).
    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> (Self, Receiver<RevisionEvent>) {
        let (events, receiver) = mpsc::channel();
        let revisioner = Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(Machine {
                    state: RevisionState::Idle,
                    session: None,
                    settings: Settings {
                        concurrency: DEFAULT_CONCURRENCY,
                        scan_shards: 1,
                        ..Settings::default()
                    },
                }),
            }),
            transport,
            events,
        };
        (revisioner, receiver)
    }

    /// Set the seed file (the currently installed version).
    pub fn set_seed_file(&self, path: impl Into<PathBuf>) {
        self.update_settings(|s| s.seed_path = Some(path.into()));
    }

    /// Set where the manifest comes from: a URL or a parsed descriptor.
    pub fn set_manifest_source(&self, source: impl Into<ManifestSource>) {
        self.update_settings(|s| s.source = Some(source.into()));
    }

    /// Set the directory the reconstructed file is written to.
    /// Defaults to the seed file's directory.
    pub fn set_output_directory(&self, dir: impl Into<PathBuf>) {
        self.update_settings(|s| s.output_dir = Some(dir.into()));
    }

    /// Supply the seed's identity from an external inspector, skipping
    /// the hashing pass of `FetchingInfo`.
    pub fn set_local_file_info(&self, info: LocalFileInfo) {
        self.update_settings(|s| s.local_info = Some(info));
    }

    /// Set the range-download fan-out (minimum 1).
    pub fn set_concurrency(&self, concurrency: usize) {
        self.update_settings(|s| s.concurrency = concurrency.max(1));
    }

    /// Shard the seed scan over this many worker threads (minimum 1).
    pub fn set_scan_shards(&self, shards: usize) {
        self.update_settings(|s| s.scan_shards = shards.max(1));
    }

    /// Current state of the machine.
    pub fn state(&self) -> RevisionState {
        self.lock_machine().state
    }

    /// Run the full update pipeline.
    pub fn start(&self) {
        self.launch(SessionMode::Update);
    }

    /// Compare local and remote hashes only; stops before any block
    /// data is downloaded.
    pub fn check_for_update(&self) {
        self.launch(SessionMode::Check);
    }

    /// Request cancellation of the active session.
    ///
    /// Meaningful once a session exists; the session unwinds
    /// cooperatively and emits exactly one `Canceled` event, after
    /// which `clear` + `start` work immediately.
    pub fn cancel(&self) {
        let machine = self.lock_machine();
        if machine.state.is_resting() {
            return;
        }
        if let Some(session) = &machine.session {
            debug!("cancel requested");
            session.cancel.cancel();
        }
    }

    /// Discard the finished session and return to `Idle`. Debounced
    /// while a session is active.
    pub fn clear(&self) {
        let old = {
            let mut machine = self.lock_machine();
            if !machine.state.is_resting() {
                debug!(state = %machine.state, "clear debounced, session active");
                return;
            }
            machine.state = RevisionState::Idle;
            machine.session.take()
        };
        join_session(old);
    }

    fn update_settings(&self, apply: impl FnOnce(&mut Settings)) {
        let mut machine = self.lock_machine();
        if !machine.state.is_resting() {
            debug!(state = %machine.state, "setting change debounced, session active");
            return;
        }
        apply(&mut machine.settings);
    }

    fn lock_machine(&self) -> std::sync::MutexGuard<'_, Machine> {
        self.shared.machine.lock().expect("state machine lock poisoned")
    }

    fn launch(&self, mode: SessionMode) {
        let (config, cancel, old_session) = {
            let mut machine = self.lock_machine();
            if !machine.state.is_resting() {
                debug!(state = %machine.state, "start debounced, session active");
                return;
            }

            let config = match validate_settings(&machine.settings) {
                Ok(config) => config,
                Err(error) => {
                    // Input errors are reported immediately; no
                    // session is created.
                    machine.state = RevisionState::Errored;
                    let old = machine.session.take();
                    drop(machine);
                    join_session(old);
                    let _ = self.events.send(RevisionEvent::Error(error));
                    return;
                }
            };

            let cancel = CancelFlag::new();
            machine.state = RevisionState::FetchingInfo;
            let old = machine.session.replace(Session {
                cancel: cancel.clone(),
                worker: None,
            });
            (config, cancel, old)
        };
        join_session(old_session);

        let shared = Arc::clone(&self.shared);
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let worker_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("deltasync-session".to_string())
            .spawn(move || worker::run(shared, transport, events, config, worker_cancel, mode))
            .expect("Failed to spawn session worker");

        let mut machine = self.lock_machine();
        if let Some(session) = machine.session.as_mut() {
            session.worker = Some(handle);
        }
    }
}

impl Drop for DeltaRevisioner {
    fn drop(&mut self) {
        // Let an in-flight session unwind instead of abandoning its
        // thread mid-write.
        self.cancel();
        let old = self.lock_machine().session.take();
        join_session(old);
    }
}

/// Wait for a previous session's worker to finish unwinding.
fn join_session(session: Option<Session>) {
    if let Some(mut session) = session {
        if let Some(handle) = session.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Check the inputs a session needs; input errors are terminal before
/// any work starts.
fn validate_settings(settings: &Settings) -> Result<ResolvedConfig, RevisionError> {
    let seed_path = settings
        .seed_path
        .clone()
        .ok_or(RevisionError::NoSeedFile)?;
    let source = settings
        .source
        .clone()
        .ok_or(RevisionError::NoManifestSource)?;

    if !seed_path.exists() {
        return Err(RevisionError::SeedFileNotFound { path: seed_path });
    }
    if let Err(source) = File::open(&seed_path) {
        return Err(RevisionError::SeedFileNotReadable {
            path: seed_path,
            source,
        });
    }

    Ok(ResolvedConfig {
        seed_path,
        source,
        output_dir: settings.output_dir.clone(),
        local_info: settings.local_info.clone(),
        concurrency: settings.concurrency,
        scan_shards: settings.scan_shards,
    })
}
