//! Pull configuration, built once and injected into every component.

use std::time::Duration;

use crate::manifest::PlatformSelector;

/// Architecture selected from multi-arch indexes unless overridden.
pub const DEFAULT_ARCH: &str = "amd64";

/// Deadline for connecting and receiving response headers unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for a pull run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Target architecture (`TARGETARCH`).
    pub arch: String,
    /// Optional architecture variant (e.g., `v8` for `arm64`).
    pub variant: Option<String>,
    /// Proxy URL for all outbound requests (`HTTP_PROXY`).
    pub proxy: Option<String>,
    /// Deadline for connecting and for receiving the response headers.
    /// Body downloads are not bounded by it. `None` disables the deadline.
    pub timeout: Option<Duration>,
    /// Verify every blob against its digest before it is kept.
    pub verify_digests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            arch: DEFAULT_ARCH.to_owned(),
            variant: None,
            proxy: None,
            timeout: Some(DEFAULT_TIMEOUT),
            verify_digests: true,
        }
    }
}

impl Config {
    /// Sets the target architecture.
    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Sets the target architecture variant.
    #[must_use]
    pub fn with_variant(mut self, variant: Option<String>) -> Self {
        self.variant = variant;
        self
    }

    /// Routes all requests through `proxy`.
    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.is_empty());
        self
    }

    /// Sets the connect and response-header deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables or disables digest verification.
    #[must_use]
    pub fn with_verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    /// Platform used to pick an entry from an image index.
    pub fn platform(&self) -> PlatformSelector {
        PlatformSelector {
            architecture: self.arch.clone(),
            variant: self.variant.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.arch, "amd64");
        assert!(c.variant.is_none());
        assert!(c.proxy.is_none());
        assert_eq!(c.timeout, Some(Duration::from_secs(300)));
        assert!(c.verify_digests);
    }

    #[test]
    fn empty_proxy_is_ignored() {
        let c = Config::default().with_proxy(Some(String::new()));
        assert!(c.proxy.is_none());
    }

    #[test]
    fn platform_follows_arch_and_variant() {
        let p = Config::default()
            .with_arch("arm64")
            .with_variant(Some("v8".into()))
            .platform();
        assert_eq!(p.architecture, "arm64");
        assert_eq!(p.variant.as_deref(), Some("v8"));
    }
}
