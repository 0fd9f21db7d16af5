//! Registry V2 / OCI Distribution client for one repository.
//!
//! A [`Session`] holds the pull token for a single image reference and
//! performs the manifest and blob requests for it.

use tracing::{debug, info};

use crate::layout::Layout;
use crate::manifest::{ACCEPT_MANIFEST, ParsedManifest, Platform, PlatformSelector, schema_version};
use crate::transport::{CancelToken, Response, Transport};
use crate::{Digest, Error, Reference, Result};

/// Limit on index-within-index nesting.
const MAX_INDEX_DEPTH: usize = 4;

/// A manifest exactly as the registry returned it.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct FetchedManifest {
    /// Raw response body.
    pub raw: Vec<u8>,
    /// Media type from the `Content-Type` header.
    pub content_type: Option<String>,
}

/// Outcome of manifest resolution: a concrete, single-platform manifest.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Resolved {
    /// Raw bytes of the concrete manifest; these, not a re-encoding, are
    /// what gets stored under its digest.
    pub raw: Vec<u8>,
    /// Digest of `raw`.
    pub digest: Digest,
    /// Parsed concrete manifest (schema 1 or schema 2 image manifest).
    pub manifest: ParsedManifest,
    /// Platform of the index entry that led here, if any.
    pub platform: Option<Platform>,
}

/// Authenticated view of one repository on one registry.
pub struct Session<'a> {
    transport: &'a dyn Transport,
    reference: &'a Reference,
    token: Option<String>,
}

impl<'a> Session<'a> {
    /// Creates a session, using `token` as the bearer credential if present.
    pub fn new(transport: &'a dyn Transport, reference: &'a Reference, token: Option<String>) -> Self {
        Self {
            transport,
            reference,
            token,
        }
    }

    /// Fetches the manifest for a tag or digest.
    pub fn fetch_manifest(&self, reference: &str) -> Result<FetchedManifest> {
        let url = format!(
            "{}/{}/manifests/{reference}",
            self.reference.api_base(),
            self.reference.repository
        );
        let resp = self.get(&url, Some(ACCEPT_MANIFEST))?;
        if !resp.is_success() {
            return Err(Error::ManifestFetch(format!(
                "{}:{reference}: HTTP {}",
                self.reference.repository,
                resp.status()
            )));
        }
        let content_type = resp.content_type().map(str::to_owned);
        let raw = resp
            .read_to_vec()
            .map_err(|e| Error::ManifestFetch(format!("reading manifest {reference}: {e}")))?;
        debug!(reference, bytes = raw.len(), content_type = ?content_type, "fetched manifest");
        Ok(FetchedManifest { raw, content_type })
    }

    /// Resolves the session's reference down to a single-platform manifest.
    ///
    /// Indexes are followed by selecting the first entry matching `platform`
    /// and fetching it by digest; schema 1 and schema 2 image manifests are
    /// terminal. Whenever a schema 2 document was requested by digest, the
    /// raw bytes must hash to that digest (with `verify`). Schema 1
    /// manifests are exempt.
    pub fn resolve(&self, platform: &PlatformSelector, verify: bool) -> Result<Resolved> {
        let mut target = self.reference.reference_str();
        let mut pinned = match &self.reference.identifier {
            crate::Identifier::Digest(d) => Some(d.clone()),
            crate::Identifier::Tag(_) => None,
        };
        let mut selected: Option<Platform> = None;

        for depth in 0..=MAX_INDEX_DEPTH {
            let fetched = self.fetch_manifest(&target)?;
            let digest = Digest::of(&fetched.raw);
            if let Some(expected) = pinned.as_ref().filter(|_| verify) {
                // A signed schema 1 manifest is addressed by the digest of
                // its payload without signatures, not of the bytes served.
                if *expected != digest && schema_version(&fetched.raw) != Some(1) {
                    return Err(Error::DigestMismatch {
                        expected: expected.to_string(),
                        actual: digest.to_string(),
                    });
                }
            }

            let parsed = ParsedManifest::parse(&fetched.raw, fetched.content_type.as_deref())?;
            debug!(%digest, kind = parsed.kind(), depth, "classified manifest");

            let index = match parsed {
                ParsedManifest::Index { index, .. } => index,
                concrete => {
                    return Ok(Resolved {
                        raw: fetched.raw,
                        digest,
                        manifest: concrete,
                        platform: selected,
                    });
                }
            };

            let entry = platform.select(&index)?;
            info!(
                repository = %self.reference.repository,
                arch = %platform.architecture,
                digest = %entry.digest,
                "selected platform manifest"
            );
            target = entry.digest.to_string();
            pinned = Some(entry.digest.clone());
            selected.clone_from(&entry.platform);
        }

        Err(Error::ManifestFetch(format!(
            "{}: image index nested deeper than {MAX_INDEX_DEPTH} levels",
            self.reference
        )))
    }

    /// Downloads a blob into `layout`, streaming it straight to disk.
    ///
    /// Transport, status and I/O failures become [`Error::BlobDownload`];
    /// digest mismatches and cancellation keep their own variants.
    pub fn fetch_blob(
        &self,
        digest: &Digest,
        layout: &Layout,
        verify: bool,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let url = format!(
            "{}/{}/blobs/{digest}",
            self.reference.api_base(),
            self.reference.repository
        );
        let blob_err = |reason: String| Error::BlobDownload {
            digest: digest.to_string(),
            reason,
        };

        let resp = self.get(&url, None).map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            other => blob_err(other.to_string()),
        })?;
        if !resp.is_success() {
            return Err(blob_err(format!("HTTP {}", resp.status())));
        }

        let mut body = resp.into_reader();
        layout
            .write_blob(digest, &mut body, verify, cancel)
            .map_err(|e| match e {
                Error::Io(io) => blob_err(io.to_string()),
                other => other,
            })
    }

    fn get(&self, url: &str, accept: Option<&str>) -> Result<Response> {
        let auth = self.token.as_ref().map(|t| format!("Bearer {t}"));
        let mut headers = Vec::with_capacity(2);
        if let Some(accept) = accept {
            headers.push(("Accept", accept));
        }
        if let Some(auth) = auth.as_deref() {
            headers.push(("Authorization", auth));
        }
        self.transport.get(url, &headers)
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("reference", &self.reference)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}
