//! Image reference parsing.
//!
//! Handles Docker-style image references:
//! - `alpine` → `docker.io/library/alpine:latest`
//! - `alpine:3.18` → `docker.io/library/alpine:3.18`
//! - `ghcr.io/org/app:v1` → `ghcr.io/org/app:v1`
//! - `alpine@sha256:…` → `docker.io/library/alpine@sha256:…`

use std::fmt;

use crate::Digest;

const DEFAULT_REGISTRY: &str = "docker.io";
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
const DEFAULT_TAG: &str = "latest";
const OFFICIAL_REPO_PREFIX: &str = "library";

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Reference {
    /// Registry hostname (e.g., `docker.io`, `ghcr.io`).
    pub registry: String,
    /// Repository path (e.g., `library/alpine`, `org/app`).
    pub repository: String,
    /// Image identifier (tag or digest).
    pub identifier: Identifier,
}

/// Tag or digest identifier for an image.
///
/// Exactly one of the two is authoritative for a resolution step.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Identifier {
    /// Named tag (e.g., `latest`, `3.18`).
    Tag(String),
    /// Content digest.
    Digest(Digest),
}

/// Token service for a registry that hands out anonymous pull tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct TokenEndpoint {
    /// Token realm URL.
    pub realm: &'static str,
    /// `service` query parameter.
    pub service: &'static str,
}

impl Reference {
    /// Parses an image reference string.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let invalid = |why: &str| crate::Error::InvalidReference(format!("{input:?}: {why}"));

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty reference"));
        }

        // Split off @digest
        let (name, digest) = match trimmed.split_once('@') {
            Some((n, d)) => {
                let digest = d
                    .parse::<Digest>()
                    .map_err(|_| invalid("invalid digest"))?;
                (n, Some(digest))
            }
            None => (trimmed, None),
        };

        // Split registry from repository
        let (registry, repo_with_tag) = match name.split_once('/') {
            Some((first, rest)) if is_registry(first) => (first.to_owned(), rest.to_owned()),
            _ => (DEFAULT_REGISTRY.to_owned(), name.to_owned()),
        };

        // A tag can only follow the last path segment, never a registry port.
        let last_slash = repo_with_tag.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match repo_with_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (
                    repo_with_tag[..split].to_owned(),
                    Some(repo_with_tag[split + 1..].to_owned()),
                )
            }
            None => (repo_with_tag, None),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository name"));
        }
        if tag.as_deref() == Some("") {
            return Err(invalid("empty tag"));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("{OFFICIAL_REPO_PREFIX}/{repository}")
        } else {
            repository
        };

        // A digest pins the content; any tag alongside it is informational only.
        let identifier = match digest {
            Some(d) => Identifier::Digest(d),
            None => Identifier::Tag(tag.unwrap_or_else(|| DEFAULT_TAG.to_owned())),
        };

        Ok(Self {
            registry,
            repository,
            identifier,
        })
    }

    /// Returns the registry API base URL.
    pub fn api_base(&self) -> String {
        let host = match self.registry.as_str() {
            DEFAULT_REGISTRY => DOCKER_HUB_API_HOST,
            other => other,
        };
        format!("https://{host}/v2")
    }

    /// Returns the tag or digest string for API requests.
    pub fn reference_str(&self) -> String {
        match &self.identifier {
            Identifier::Tag(t) => t.clone(),
            Identifier::Digest(d) => d.to_string(),
        }
    }

    /// Returns the token service for registries with anonymous bearer auth.
    ///
    /// `None` means the registry is pulled without an `Authorization` header.
    pub fn token_endpoint(&self) -> Option<TokenEndpoint> {
        match self.registry.as_str() {
            DEFAULT_REGISTRY => Some(TokenEndpoint {
                realm: "https://auth.docker.io/token",
                service: "registry.docker.io",
            }),
            "ghcr.io" => Some(TokenEndpoint {
                realm: "https://ghcr.io/token",
                service: "ghcr.io",
            }),
            _ => None,
        }
    }
}

/// Returns `true` if the string looks like a registry hostname.
fn is_registry(s: &str) -> bool {
    s.contains('.') || s.contains(':') || s == "localhost"
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match &self.identifier {
            Identifier::Tag(t) => write!(f, ":{t}"),
            Identifier::Digest(d) => write!(f, "@{d}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parse_simple() {
        let r = Reference::parse("alpine").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.identifier, Identifier::Tag("latest".into()));
    }

    #[test]
    fn parse_with_tag() {
        let r = Reference::parse("alpine:3.18").unwrap();
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.identifier, Identifier::Tag("3.18".into()));
        assert_eq!(r.reference_str(), "3.18");
    }

    #[test]
    fn parse_user_repo() {
        let r = Reference::parse("myuser/myapp:v1").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "myuser/myapp");
        assert_eq!(r.identifier, Identifier::Tag("v1".into()));
    }

    #[test]
    fn parse_custom_registry() {
        let r = Reference::parse("ghcr.io/org/app:latest").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.api_base(), "https://ghcr.io/v2");
    }

    #[test]
    fn parse_localhost_port() {
        let r = Reference::parse("localhost:5000/test:v1").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "test");
        assert_eq!(r.identifier, Identifier::Tag("v1".into()));
        assert!(r.token_endpoint().is_none());
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let r = Reference::parse("localhost:5000/test").unwrap();
        assert_eq!(r.repository, "test");
        assert_eq!(r.identifier, Identifier::Tag("latest".into()));
    }

    #[test]
    fn parse_digest() {
        let r = Reference::parse(&format!("alpine@{DIGEST}")).unwrap();
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.reference_str(), DIGEST);
        assert!(matches!(r.identifier, Identifier::Digest(_)));
    }

    #[test]
    fn digest_wins_over_tag() {
        let r = Reference::parse(&format!("alpine:3.18@{DIGEST}")).unwrap();
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.reference_str(), DIGEST);
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "   ", "alpine:", "alpine@sha256:abc", ":tag", "a//b"] {
            assert!(
                matches!(Reference::parse(bad), Err(crate::Error::InvalidReference(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn docker_hub_endpoints() {
        let r = Reference::parse("alpine").unwrap();
        assert_eq!(r.api_base(), "https://registry-1.docker.io/v2");
        let ep = r.token_endpoint().unwrap();
        assert_eq!(ep.realm, "https://auth.docker.io/token");
        assert_eq!(ep.service, "registry.docker.io");
    }

    #[test]
    fn display_roundtrip() {
        let r = Reference::parse("ghcr.io/org/app:v2").unwrap();
        assert_eq!(r.to_string(), "ghcr.io/org/app:v2");
        let r = Reference::parse("nginx").unwrap();
        assert_eq!(r.to_string(), "docker.io/library/nginx:latest");
    }
}
