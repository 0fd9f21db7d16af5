//! Manifest documents and schema dispatch.
//!
//! A manifest is classified by its `schemaVersion` and `mediaType` alone,
//! read from a small header first; the raw bytes are then deserialized
//! straight into the matching concrete type. Nothing is decoded into a
//! generic map or re-encoded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Digest, Error, Result};

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list, schema 2.
pub const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker image manifest, schema 1.
pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";

/// `Accept` header for manifest requests, most specific first.
pub const ACCEPT_MANIFEST: &str = "\
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.oci.image.index.v1+json, \
    application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.docker.distribution.manifest.v1+json";

/// Content descriptor for a config, layer, or index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(rename = "mediaType", default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    /// Content digest.
    pub digest: Digest,
    /// Size in bytes, when the registry declared it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Platform, present on image index entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Creates a descriptor without platform or annotations.
    pub fn new(media_type: impl Into<String>, digest: Digest, size: Option<u64>) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            platform: None,
            annotations: BTreeMap::new(),
        }
    }
}

/// Platform of an image index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Platform {
    /// CPU architecture (e.g., `amd64`, `arm64`).
    pub architecture: String,
    /// Operating system.
    #[serde(default)]
    pub os: String,
    /// Architecture variant (e.g., `v7`, `v8`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Chooses one entry of an image index.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PlatformSelector {
    /// Required architecture.
    pub architecture: String,
    /// Required variant; `None` accepts any.
    pub variant: Option<String>,
}

impl PlatformSelector {
    /// Returns `true` if `platform` satisfies this selector.
    pub fn matches(&self, platform: &Platform) -> bool {
        platform.architecture == self.architecture
            && self
                .variant
                .as_ref()
                .is_none_or(|v| platform.variant.as_ref() == Some(v))
    }

    /// Returns the first entry of `index` whose platform matches.
    pub fn select<'a>(&self, index: &'a ImageIndex) -> Result<&'a Descriptor> {
        index
            .manifests
            .iter()
            .find(|m| m.platform.as_ref().is_some_and(|p| self.matches(p)))
            .ok_or_else(|| Error::PlatformNotFound {
                arch: self.architecture.clone(),
                variant: self.variant.clone(),
            })
    }
}

/// Single-platform image manifest (Docker schema 2 or OCI).
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct ImageManifest {
    /// Image configuration blob.
    pub config: Descriptor,
    /// Layer blobs, base layer first.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// Multi-platform image index / manifest list.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct ImageIndex {
    /// Platform-specific manifests.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

/// Legacy Docker schema 1 manifest.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct SchemaV1Manifest {
    /// Layer references in the order the registry emitted them.
    #[serde(rename = "fsLayers", default)]
    pub fs_layers: Vec<FsLayer>,
    /// Per-layer history; kept opaque.
    #[serde(default)]
    pub history: Vec<V1History>,
}

/// One layer reference in a schema 1 manifest.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct FsLayer {
    /// Layer digest.
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

/// One history entry in a schema 1 manifest.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct V1History {
    /// Serialized legacy image config; not interpreted.
    #[serde(rename = "v1Compatibility", default)]
    pub v1_compatibility: String,
}

/// A manifest classified by schema version and media type.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ParsedManifest {
    /// Schema 1 manifest; always terminal.
    V1(SchemaV1Manifest),
    /// Schema 2 single-platform manifest.
    Image {
        /// Effective media type (Docker V2 or OCI).
        media_type: String,
        /// Parsed manifest.
        manifest: ImageManifest,
    },
    /// Schema 2 index / manifest list.
    Index {
        /// Effective media type (Docker list or OCI index).
        media_type: String,
        /// Parsed index.
        index: ImageIndex,
    },
}

/// The two fields that decide how a manifest is parsed.
#[derive(Deserialize)]
struct Header {
    #[serde(rename = "schemaVersion", default)]
    schema_version: Option<u64>,
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
}

/// Reads only the `schemaVersion` of a manifest; `None` if it is absent or
/// the document is not JSON.
pub fn schema_version(raw: &[u8]) -> Option<u64> {
    serde_json::from_slice::<Header>(raw).ok()?.schema_version
}

impl ParsedManifest {
    /// Classifies and parses raw manifest bytes.
    ///
    /// `content_type` is the registry's `Content-Type` header; it is only
    /// consulted when a schema 2 document omits `mediaType`.
    pub fn parse(raw: &[u8], content_type: Option<&str>) -> Result<Self> {
        let header: Header = serde_json::from_slice(raw)?;
        match header.schema_version {
            Some(1) => Ok(Self::V1(serde_json::from_slice(raw)?)),
            Some(2) => {
                let media_type = header
                    .media_type
                    .filter(|m| !m.is_empty())
                    .or_else(|| content_type.map(str::to_owned))
                    .unwrap_or_default();
                match media_type.as_str() {
                    OCI_INDEX | DOCKER_MANIFEST_LIST => Ok(Self::Index {
                        index: serde_json::from_slice(raw)?,
                        media_type,
                    }),
                    OCI_MANIFEST | DOCKER_MANIFEST_V2 => Ok(Self::Image {
                        manifest: serde_json::from_slice(raw)?,
                        media_type,
                    }),
                    _ => Err(Error::UnsupportedMediaType(media_type)),
                }
            }
            other => Err(Error::UnknownSchemaVersion(other)),
        }
    }

    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::V1(_) => "schema1",
            Self::Image { .. } => "manifest",
            Self::Index { .. } => "index",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(n: u8) -> String {
        format!("sha256:{}", format!("{n:02x}").repeat(32))
    }

    fn index_json(media_type: &str) -> String {
        format!(
            r#"{{
  "schemaVersion": 2,
  "mediaType": "{media_type}",
  "manifests": [
    {{"mediaType": "{OCI_MANIFEST}", "digest": "{}", "size": 100,
      "platform": {{"architecture": "arm", "os": "linux", "variant": "v7"}}}},
    {{"mediaType": "{OCI_MANIFEST}", "digest": "{}", "size": 200,
      "platform": {{"architecture": "arm64", "os": "linux", "variant": "v8"}}}},
    {{"mediaType": "{OCI_MANIFEST}", "digest": "{}", "size": 300,
      "platform": {{"architecture": "amd64", "os": "linux"}}}},
    {{"mediaType": "{OCI_MANIFEST}", "digest": "{}", "size": 400,
      "platform": {{"architecture": "amd64", "os": "windows"}}}}
  ]
}}"#,
            digest(1),
            digest(2),
            digest(3),
            digest(4)
        )
    }

    fn parse_index(raw: &str) -> ImageIndex {
        match ParsedManifest::parse(raw.as_bytes(), None).unwrap() {
            ParsedManifest::Index { index, .. } => index,
            other => panic!("expected index, got {}", other.kind()),
        }
    }

    #[test]
    fn parses_manifest_list_and_oci_index() {
        for mt in [DOCKER_MANIFEST_LIST, OCI_INDEX] {
            let index = parse_index(&index_json(mt));
            assert_eq!(index.manifests.len(), 4);
        }
    }

    #[test]
    fn parses_v2_manifest() {
        let raw = format!(
            r#"{{"schemaVersion":2,"mediaType":"{DOCKER_MANIFEST_V2}",
                "config":{{"mediaType":"application/vnd.docker.container.image.v1+json","digest":"{}","size":7}},
                "layers":[{{"mediaType":"application/vnd.docker.image.rootfs.diff.tar.gzip","digest":"{}","size":9}}]}}"#,
            digest(9),
            digest(10)
        );
        match ParsedManifest::parse(raw.as_bytes(), None).unwrap() {
            ParsedManifest::Image {
                media_type,
                manifest,
            } => {
                assert_eq!(media_type, DOCKER_MANIFEST_V2);
                assert_eq!(manifest.config.digest.to_string(), digest(9));
                assert_eq!(manifest.layers.len(), 1);
                assert_eq!(manifest.layers[0].size, Some(9));
            }
            other => panic!("expected manifest, got {}", other.kind()),
        }
    }

    #[test]
    fn parses_v1_in_document_order() {
        let raw = format!(
            r#"{{"schemaVersion":1,"name":"library/busybox","tag":"1",
                "fsLayers":[{{"blobSum":"{}"}},{{"blobSum":"{}"}},{{"blobSum":"{}"}}],
                "history":[{{"v1Compatibility":"{{}}"}},{{"v1Compatibility":"{{}}"}},{{"v1Compatibility":"{{}}"}}]}}"#,
            digest(3),
            digest(1),
            digest(3)
        );
        match ParsedManifest::parse(raw.as_bytes(), None).unwrap() {
            ParsedManifest::V1(m) => {
                let sums: Vec<String> = m.fs_layers.iter().map(|l| l.blob_sum.to_string()).collect();
                assert_eq!(sums, [digest(3), digest(1), digest(3)]);
                assert_eq!(m.history.len(), 3);
            }
            other => panic!("expected schema1, got {}", other.kind()),
        }
    }

    #[test]
    fn reads_schema_version_only() {
        assert_eq!(schema_version(br#"{"schemaVersion":1,"fsLayers":"junk"}"#), Some(1));
        assert_eq!(schema_version(br#"{"mediaType":"x"}"#), None);
        assert_eq!(schema_version(b"not json"), None);
    }

    #[test]
    fn unknown_schema_version() {
        let err = ParsedManifest::parse(br#"{"schemaVersion":3}"#, None).unwrap_err();
        assert!(matches!(err, Error::UnknownSchemaVersion(Some(3))));
        let err = ParsedManifest::parse(br#"{"layers":[]}"#, None).unwrap_err();
        assert!(matches!(err, Error::UnknownSchemaVersion(None)));
    }

    #[test]
    fn unsupported_media_type() {
        let raw = br#"{"schemaVersion":2,"mediaType":"application/vnd.cncf.helm.config.v1+json"}"#;
        let err = ParsedManifest::parse(raw, None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType(m) if m.contains("helm")));
    }

    #[test]
    fn shape_is_never_used_to_guess_the_variant() {
        // Looks like an index, but the declared media type says otherwise.
        let raw = br#"{"schemaVersion":2,"mediaType":"application/json","manifests":[]}"#;
        assert!(matches!(
            ParsedManifest::parse(raw, None),
            Err(Error::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn missing_media_type_falls_back_to_content_type() {
        let raw = format!(
            r#"{{"schemaVersion":2,"manifests":[{{"digest":"{}","platform":{{"architecture":"amd64","os":"linux"}}}}]}}"#,
            digest(5)
        );
        assert!(matches!(
            ParsedManifest::parse(raw.as_bytes(), Some(OCI_INDEX)),
            Ok(ParsedManifest::Index { .. })
        ));
        assert!(matches!(
            ParsedManifest::parse(raw.as_bytes(), None),
            Err(Error::UnsupportedMediaType(m)) if m.is_empty()
        ));
    }

    #[test]
    fn selects_first_matching_architecture() {
        let index = parse_index(&index_json(OCI_INDEX));
        let amd64 = PlatformSelector {
            architecture: "amd64".into(),
            variant: None,
        };
        let entry = amd64.select(&index).unwrap();
        assert_eq!(entry.digest.to_string(), digest(3));
        assert_eq!(entry.size, Some(300));
    }

    #[test]
    fn variant_narrows_selection() {
        let index = parse_index(&index_json(OCI_INDEX));
        let arm64 = PlatformSelector {
            architecture: "arm64".into(),
            variant: Some("v8".into()),
        };
        assert_eq!(arm64.select(&index).unwrap().digest.to_string(), digest(2));

        let arm_v6 = PlatformSelector {
            architecture: "arm".into(),
            variant: Some("v6".into()),
        };
        assert!(matches!(
            arm_v6.select(&index),
            Err(Error::PlatformNotFound { .. })
        ));
    }

    #[test]
    fn no_matching_platform() {
        let index = parse_index(&index_json(DOCKER_MANIFEST_LIST));
        let riscv = PlatformSelector {
            architecture: "riscv64".into(),
            variant: None,
        };
        let err = riscv.select(&index).unwrap_err();
        assert!(matches!(err, Error::PlatformNotFound { arch, .. } if arch == "riscv64"));
    }

    #[test]
    fn descriptor_serializes_in_oci_form() {
        let d: Digest = digest(7).parse().unwrap();
        let desc = Descriptor::new(OCI_MANIFEST, d, Some(42));
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"mediaType": OCI_MANIFEST, "digest": digest(7), "size": 42})
        );
    }
}
