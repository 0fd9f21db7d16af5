//! Pull container images from a Docker Registry V2 / OCI Distribution
//! registry into an OCI image layout directory.
//!
//! For every image reference the pipeline obtains a pull token, resolves
//! the manifest (following multi-arch indexes to the configured platform),
//! and stores the concrete manifest, its config and its layers under
//! `blobs/sha256/<hex>`.
//!
//! ```no_run
//! use ocipull::{Config, Layout, Puller};
//!
//! let puller = Puller::new(Config::default())?;
//! let mut layout = Layout::create("./out")?;
//! puller.pull(&mut layout, "alpine:3.18", |msg| eprintln!("{msg}"))?;
//! # Ok::<(), ocipull::Error>(())
//! ```

#![allow(clippy::missing_docs_in_private_items)]

pub mod auth;
mod config;
pub mod digest;
pub mod layout;
pub mod manifest;
pub mod reference;
pub mod registry;
pub mod transport;

use tracing::info;

pub use config::{Config, DEFAULT_ARCH, DEFAULT_TIMEOUT};
pub use digest::Digest;
pub use layout::Layout;
use layout::{ANNOTATION_IMAGE_NAME, ANNOTATION_REF_NAME};
use manifest::{Descriptor, ParsedManifest};
pub use reference::{Identifier, Reference};
use registry::Session;
pub use transport::{CancelToken, HttpTransport, Response, Transport};

/// Result type for ocipull operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from pulling an image.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The image reference string could not be parsed.
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// A digest was not of the form `sha256:<64 hex>`.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// The token service refused or returned an unusable response.
    #[error("auth failed: {0}")]
    Auth(String),

    /// The manifest endpoint returned a non-success status.
    #[error("manifest fetch failed: {0}")]
    ManifestFetch(String),

    /// `schemaVersion` was neither 1 nor 2.
    #[error("unknown manifest schema version: {}", .0.map_or_else(|| "missing".to_owned(), |v| v.to_string()))]
    UnknownSchemaVersion(Option<u64>),

    /// A schema 2 document declared a media type this tool cannot handle.
    #[error("unsupported manifest media type: {0:?}")]
    UnsupportedMediaType(String),

    /// No image index entry matched the target platform.
    #[error("no manifest for platform {arch}{}", .variant.as_deref().map(|v| format!("/{v}")).unwrap_or_default())]
    PlatformNotFound {
        /// Target architecture.
        arch: String,
        /// Target variant, if one was required.
        variant: Option<String>,
    },

    /// A blob could not be downloaded or written.
    #[error("blob {digest} download failed: {reason}")]
    BlobDownload {
        /// Blob digest.
        digest: String,
        /// Underlying cause.
        reason: String,
    },

    /// Downloaded content did not match its expected digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest.
        expected: String,
        /// Computed digest.
        actual: String,
    },

    /// The pull was cancelled through its [`CancelToken`].
    #[error("cancelled")]
    Cancelled,

    /// Connection-level HTTP failure (DNS, TLS, timeout, proxy).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result of a successful image pull.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PullResult {
    /// Canonical image reference.
    pub reference: Reference,
    /// Descriptor added to `index.json`; `None` for schema 1 images.
    pub manifest: Option<Descriptor>,
    /// Downloaded blobs in download order (config first for schema 2).
    pub blobs: Vec<Digest>,
}

/// Pulls images into an OCI layout over a single injected transport.
pub struct Puller {
    transport: Box<dyn Transport>,
    config: Config,
    cancel: CancelToken,
}

impl Puller {
    /// Creates a puller using an HTTP transport built from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let cancel = CancelToken::new();
        let transport = HttpTransport::new(&config, cancel.clone())?;
        Ok(Self {
            transport: Box::new(transport),
            config,
            cancel,
        })
    }

    /// Creates a puller over a caller-supplied transport.
    pub fn with_transport(config: Config, transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Token that aborts in-flight and future pulls when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pulls one image into `layout`.
    ///
    /// Steps run strictly in order and the first error aborts the image:
    /// token → manifest resolution → manifest blob → config → layers.
    /// `on_status` is called with human-readable progress messages.
    pub fn pull(
        &self,
        layout: &mut Layout,
        image: &str,
        on_status: impl Fn(&str),
    ) -> Result<PullResult> {
        self.cancel.check()?;
        let reference = Reference::parse(image)?;
        let verify = self.config.verify_digests;
        info!(%reference, "pulling image");

        // 1. Pull token.
        let token = auth::fetch_token(self.transport.as_ref(), &reference)?;
        let session = Session::new(self.transport.as_ref(), &reference, token);

        // 2. Resolve to a single-platform manifest.
        on_status(&format!("Resolving {reference}..."));
        let resolved = session.resolve(&self.config.platform(), verify)?;

        let mut blobs = Vec::new();
        let manifest = match &resolved.manifest {
            ParsedManifest::V1(v1) => {
                // 3a. Schema 1: layers only, one download per blobSum.
                let total = v1.fs_layers.len();
                on_status(&format!("Downloading {reference} ({total} layers)..."));
                for (i, layer) in v1.fs_layers.iter().enumerate() {
                    on_status(&format!("Pulling layer {}/{total}: {}", i + 1, layer.blob_sum.short()));
                    session.fetch_blob(&layer.blob_sum, layout, verify, &self.cancel)?;
                    blobs.push(layer.blob_sum.clone());
                }
                None
            }
            ParsedManifest::Image {
                media_type,
                manifest,
            } => {
                // 3b. Store the manifest from the exact bytes received.
                layout.write_blob_bytes(&resolved.digest, &resolved.raw, verify)?;

                // 4. Config blob.
                on_status(&format!("Pulling config {}", manifest.config.digest.short()));
                session.fetch_blob(&manifest.config.digest, layout, verify, &self.cancel)?;
                blobs.push(manifest.config.digest.clone());

                // 5. Layer blobs, in manifest order.
                let total = manifest.layers.len();
                for (i, layer) in manifest.layers.iter().enumerate() {
                    on_status(&format!("Pulling layer {}/{total}: {}", i + 1, layer.digest.short()));
                    session.fetch_blob(&layer.digest, layout, verify, &self.cancel)?;
                    blobs.push(layer.digest.clone());
                }

                // 6. Record in index.json.
                let mut descriptor = Descriptor::new(
                    media_type.clone(),
                    resolved.digest.clone(),
                    Some(resolved.raw.len() as u64),
                );
                descriptor.platform.clone_from(&resolved.platform);
                descriptor
                    .annotations
                    .insert(ANNOTATION_REF_NAME.to_owned(), reference.reference_str());
                descriptor
                    .annotations
                    .insert(ANNOTATION_IMAGE_NAME.to_owned(), reference.to_string());
                layout.add_manifest(descriptor.clone())?;
                Some(descriptor)
            }
            ParsedManifest::Index { media_type, .. } => {
                return Err(Error::UnsupportedMediaType(media_type.clone()));
            }
        };

        info!(%reference, digest = %resolved.digest, blobs = blobs.len(), "pull complete");
        on_status("Done.");
        Ok(PullResult {
            reference,
            manifest,
            blobs,
        })
    }
}

impl std::fmt::Debug for Puller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Puller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
