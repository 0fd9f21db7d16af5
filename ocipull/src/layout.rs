//! OCI image layout on disk.
//!
//! ```text
//! <root>/oci-layout
//! <root>/index.json
//! <root>/blobs/sha256/<hex>
//! ```
//!
//! Blobs are content-addressed: a file's name is the hex digest of its
//! exact bytes. Writes go to a hidden `.partial` file in the same directory
//! and are renamed into place only once complete and verified, so a
//! `blobs/sha256/<hex>` path never holds a truncated or mismatched blob.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest as _, Sha256};
use tracing::{debug, warn};

use crate::manifest::{Descriptor, OCI_INDEX};
use crate::transport::CancelToken;
use crate::{Digest, Error, Result};

const OCI_LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const BLOBS_DIR: &str = "blobs";

/// Fixed content of the `oci-layout` marker.
const OCI_LAYOUT: &[u8] = br#"{"imageLayoutVersion":"1.0.0"}"#;

/// Copy buffer size; cancellation is checked once per chunk.
const CHUNK: usize = 64 * 1024;

/// Annotation holding the tag (or digest) an index entry was pulled as.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";
/// Annotation containerd uses for the full image name on import.
pub const ANNOTATION_IMAGE_NAME: &str = "io.containerd.image.name";

/// Top-level `index.json` document.
#[derive(Serialize)]
struct Index<'a> {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "mediaType")]
    media_type: &'static str,
    manifests: &'a [Descriptor],
}

/// An OCI image layout directory being populated by one run.
#[derive(Debug)]
pub struct Layout {
    root: PathBuf,
    manifests: Vec<Descriptor>,
}

impl Layout {
    /// Creates `root` and `blobs/sha256`, and writes the `oci-layout` marker
    /// and an empty `index.json`.
    ///
    /// Existing files are overwritten, never merged, so an `index.json` left
    /// by a previous run never lists manifests this run did not pull.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(BLOBS_DIR).join(crate::digest::SHA256))?;
        fs::write(root.join(OCI_LAYOUT_FILE), OCI_LAYOUT)?;
        let layout = Self {
            root,
            manifests: Vec::new(),
        };
        layout.write_index()?;
        debug!(root = %layout.root.display(), "initialized OCI layout");
        Ok(layout)
    }

    /// Layout root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob with the given digest.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blob_dir(digest).join(digest.hex())
    }

    /// Returns `true` if the blob file exists.
    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Manifests recorded in `index.json` so far.
    pub fn manifests(&self) -> &[Descriptor] {
        &self.manifests
    }

    fn blob_dir(&self, digest: &Digest) -> PathBuf {
        self.root.join(BLOBS_DIR).join(digest.algorithm())
    }

    /// Streams `reader` into the blob file for `digest`.
    ///
    /// The bytes are stored exactly as read. With `verify`, the sha256 of
    /// the stream must equal `digest` or the blob is discarded with
    /// [`Error::DigestMismatch`]. Returns the number of bytes written.
    pub fn write_blob(
        &self,
        digest: &Digest,
        reader: &mut dyn Read,
        verify: bool,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let dir = self.blob_dir(digest);
        let partial = dir.join(format!(".{}.partial", digest.hex()));

        let written = match copy_hashed(reader, &partial, cancel) {
            Ok((_, actual)) if verify && actual != *digest => {
                Err(Error::DigestMismatch {
                    expected: digest.to_string(),
                    actual: actual.to_string(),
                })
            }
            Ok((written, _)) => fs::rename(&partial, self.blob_path(digest))
                .map(|()| written)
                .map_err(Error::from),
            Err(e) => Err(e),
        };

        match written {
            Ok(written) => {
                debug!(%digest, bytes = written, "stored blob");
                Ok(written)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&partial) {
                    if rm.kind() != io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %rm, "failed to remove partial blob");
                    }
                }
                Err(e)
            }
        }
    }

    /// Stores an in-memory blob (a manifest) byte for byte.
    pub fn write_blob_bytes(&self, digest: &Digest, bytes: &[u8], verify: bool) -> Result<u64> {
        let mut reader = bytes;
        self.write_blob(digest, &mut reader, verify, &CancelToken::new())
    }

    /// Records a resolved manifest and rewrites `index.json`.
    ///
    /// An entry carrying the same image-name annotation replaces the earlier
    /// one, so a reference pulled twice in one run is listed once.
    pub fn add_manifest(&mut self, descriptor: Descriptor) -> Result<()> {
        let name = descriptor.annotations.get(ANNOTATION_IMAGE_NAME).cloned();
        if name.is_some() {
            self.manifests
                .retain(|m| m.annotations.get(ANNOTATION_IMAGE_NAME) != name.as_ref());
        }
        self.manifests.push(descriptor);
        self.write_index()
    }

    fn write_index(&self) -> Result<()> {
        let index = Index {
            schema_version: 2,
            media_type: OCI_INDEX,
            manifests: &self.manifests,
        };
        let data = serde_json::to_vec(&index)?;
        fs::write(self.root.join(INDEX_FILE), data)?;
        Ok(())
    }
}

/// Copies `reader` into a new file at `path`, hashing as it goes.
fn copy_hashed(reader: &mut dyn Read, path: &Path, cancel: &CancelToken) -> Result<(u64, Digest)> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    let mut written = 0u64;

    loop {
        cancel.check()?;
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
        written += n as u64;
    }

    out.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;
    Ok((written, Digest::from_hasher(hasher)))
}
