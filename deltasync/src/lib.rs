//! DeltaSync - incremental binary updates over plain HTTP
//!
//! This library rebuilds a new version of a large single-file bundle
//! from whatever the old version already contains, downloading only
//! the byte ranges that actually changed. No specialized server is
//! needed: a small control file describes the target as fixed-size
//! blocks with weak and strong checksums, the old file is scanned
//! locally with a rolling checksum to find reusable blocks, and the
//! rest arrives via ordinary HTTP range requests.
//!
//! The top-level entry point is [`DeltaRevisioner`]:
//!
//! ```no_run
//! use deltasync::{DeltaRevisioner, RevisionEvent};
//! use url::Url;
//!
//! let (revisioner, events) = DeltaRevisioner::new();
//! revisioner.set_seed_file("/opt/app/app.bin");
//! revisioner.set_manifest_source(
//!     Url::parse("https://example.com/app.bin.zsync").unwrap(),
//! );
//! revisioner.start();
//!
//! for event in events {
//!     match event {
//!         RevisionEvent::Progress(p) => {
//!             println!("{}% ({:.1} {})", p.percent, p.speed, p.unit)
//!         }
//!         RevisionEvent::Finished { target, .. } => {
//!             println!("updated: {}", target.path.display());
//!             break;
//!         }
//!         RevisionEvent::Error(e) => {
//!             eprintln!("update failed: {}", e);
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod cancel;
pub mod checksum;
pub mod control;
pub mod descriptor;
pub mod error;
pub mod matcher;
pub mod reconstruct;
pub mod revisioner;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testutil;

pub use cancel::CancelFlag;
pub use control::{ControlError, Manifest};
pub use descriptor::{DescriptorError, LocalFileInfo, ManifestSource, UpdateDescriptor};
pub use error::RevisionError;
pub use reconstruct::FinishedFile;
pub use revisioner::{DeltaRevisioner, RevisionEvent, RevisionState};
pub use transfer::{HttpTransport, ProgressReport, ReqwestTransport};

// Re-exported so callers can name manifest URLs without adding the
// crate themselves.
pub use url::Url;
