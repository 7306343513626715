//! Update descriptor and local-file interface types.
//!
//! These are the shapes exchanged with the collaborators outside this
//! engine: the inspector that extracts the embedded update descriptor
//! from an application bundle, and the resolvers that turn vendor
//! descriptors into concrete manifest URLs. The engine consumes the
//! results; it performs no vendor API lookups itself.

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

/// A parsed embedded update descriptor.
///
/// The wire form is pipe-delimited, e.g.
/// `zsync|http://example.com/app.bin.zsync` or
/// `gh-releases-zsync|owner|repo|latest|app-*.bin.zsync`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateDescriptor {
    /// A direct manifest URL.
    Zsync { url: String },

    /// A GitHub release asset, matched by glob; resolved to a URL by
    /// an external collaborator.
    GhReleasesZsync {
        owner: String,
        repo: String,
        tag: String,
        filename_glob: String,
    },

    /// A Bintray package, matched by glob; resolved to a URL by an
    /// external collaborator.
    BintrayZsync {
        owner: String,
        repo: String,
        package: String,
        filename_glob: String,
    },
}

/// Errors raised while parsing an embedded descriptor string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// The descriptor string is empty.
    #[error("empty update descriptor")]
    Empty,

    /// The transport tag is not one this engine knows.
    #[error("unsupported transport {0:?}")]
    UnsupportedTransport(String),

    /// The descriptor has the wrong number of fields for its
    /// transport.
    #[error("malformed update descriptor {0:?}")]
    Malformed(String),
}

impl UpdateDescriptor {
    /// Parse the pipe-delimited descriptor embedded in a bundle.
    pub fn parse(raw: &str) -> Result<Self, DescriptorError> {
        let raw = raw.trim_end_matches('\0').trim();
        if raw.is_empty() {
            return Err(DescriptorError::Empty);
        }

        let fields: Vec<&str> = raw.split('|').collect();
        match fields[0] {
            "zsync" => match fields.as_slice() {
                ["zsync", url] => Ok(Self::Zsync {
                    url: (*url).to_string(),
                }),
                _ => Err(DescriptorError::Malformed(raw.to_string())),
            },
            "gh-releases-zsync" => match fields.as_slice() {
                ["gh-releases-zsync", owner, repo, tag, glob] => Ok(Self::GhReleasesZsync {
                    owner: (*owner).to_string(),
                    repo: (*repo).to_string(),
                    tag: (*tag).to_string(),
                    filename_glob: (*glob).to_string(),
                }),
                _ => Err(DescriptorError::Malformed(raw.to_string())),
            },
            "bintray-zsync" => match fields.as_slice() {
                ["bintray-zsync", owner, repo, package, glob] => Ok(Self::BintrayZsync {
                    owner: (*owner).to_string(),
                    repo: (*repo).to_string(),
                    package: (*package).to_string(),
                    filename_glob: (*glob).to_string(),
                }),
                _ => Err(DescriptorError::Malformed(raw.to_string())),
            },
            other => Err(DescriptorError::UnsupportedTransport(other.to_string())),
        }
    }

    /// The transport tag of this descriptor.
    pub fn transport(&self) -> &'static str {
        match self {
            Self::Zsync { .. } => "zsync",
            Self::GhReleasesZsync { .. } => "gh-releases-zsync",
            Self::BintrayZsync { .. } => "bintray-zsync",
        }
    }
}

/// Where the manifest comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManifestSource {
    /// A final manifest URL, ready to fetch.
    Url(Url),
    /// A parsed descriptor. Only the `zsync` transport carries its URL
    /// inline; the vendor transports must be resolved externally
    /// before a session can start.
    Descriptor(UpdateDescriptor),
}

impl From<Url> for ManifestSource {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

impl From<UpdateDescriptor> for ManifestSource {
    fn from(descriptor: UpdateDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

/// What an external inspector knows about the currently installed
/// bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFileInfo {
    /// Absolute path of the installed file.
    pub path: PathBuf,
    /// Its whole-file SHA-1, lowercase hex.
    pub sha1: String,
    /// Its length in bytes.
    pub length: u64,
}
