//! CLI for pulling container images into an OCI image layout.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ocipull::{Config, Layout, Puller};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ocipull",
    version,
    about = "Pull container images from a registry into an OCI image layout"
)]
struct Cli {
    /// Output directory for the OCI image layout.
    output: PathBuf,

    /// Image references (e.g., alpine:3.18, ghcr.io/org/app@sha256:...).
    #[arg(required = true, num_args = 1..)]
    images: Vec<String>,

    /// Architecture to select from multi-arch images.
    #[arg(long, env = "TARGETARCH", default_value = ocipull::DEFAULT_ARCH)]
    arch: String,

    /// Architecture variant to select (e.g., v8).
    #[arg(long, env = "TARGETVARIANT")]
    variant: Option<String>,

    /// Proxy URL for all registry requests.
    #[arg(long, env = "HTTP_PROXY")]
    proxy: Option<String>,

    /// Seconds to wait for a connection or response headers (0 disables it).
    #[arg(long, env = "OCIPULL_TIMEOUT", default_value_t = ocipull::DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,

    /// Keep blobs even when their content does not match the digest.
    #[arg(long)]
    no_verify: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let timeout = (self.timeout > 0).then(|| Duration::from_secs(self.timeout));
        Config::default()
            .with_arch(self.arch.clone())
            .with_variant(self.variant.clone().filter(|v| !v.is_empty()))
            .with_proxy(self.proxy.clone())
            .with_timeout(timeout)
            .with_verify_digests(!self.no_verify)
    }

    fn run(self) -> Result<()> {
        let puller = Puller::new(self.config())?;

        #[cfg(unix)]
        install_signal_handlers(&puller.cancel_token())?;

        let mut layout = Layout::create(&self.output).with_context(|| {
            format!("failed to initialize {}", self.output.display())
        })?;

        tracing::debug!(output = %self.output.display(), images = self.images.len(), "starting pull");
        for image in &self.images {
            puller
                .pull(&mut layout, image, |msg| eprintln!("{msg}"))
                .with_context(|| format!("failed to process image {image}"))?;
        }

        let dir = self.output.display();
        println!("Download of images into '{dir}' complete.");
        println!("Use something like the following to load the result into a containerd instance:");
        println!("  tar -cC '{dir}' . | nerdctl load");
        Ok(())
    }
}

/// First termination signal cancels the pull; a second one exits immediately.
#[cfg(unix)]
fn install_signal_handlers(cancel: &ocipull::CancelToken) -> Result<()> {
    for &signal in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register_conditional_shutdown(signal, 130, cancel.flag())
            .and_then(|_| signal_hook::flag::register(signal, cancel.flag()))
            .context("failed to install signal handler")?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = Cli::parse().run() {
        eprintln!("ocipull: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn requires_output_and_image() {
        assert!(Cli::try_parse_from(["ocipull", "./out"]).is_err());
        let cli = Cli::try_parse_from(["ocipull", "./out", "alpine:3.18", "busybox"]).unwrap();
        assert_eq!(cli.output, PathBuf::from("./out"));
        assert_eq!(cli.images, ["alpine:3.18", "busybox"]);
    }

    #[test]
    fn flags_map_to_config() {
        let cli = Cli::try_parse_from([
            "ocipull",
            "--arch",
            "arm64",
            "--variant",
            "v8",
            "--proxy",
            "http://proxy.local:3128",
            "--timeout",
            "0",
            "--no-verify",
            "./out",
            "alpine",
        ])
        .unwrap();
        let config = cli.config();
        assert_eq!(config.arch, "arm64");
        assert_eq!(config.variant.as_deref(), Some("v8"));
        assert_eq!(config.proxy.as_deref(), Some("http://proxy.local:3128"));
        assert!(config.timeout.is_none());
        assert!(!config.verify_digests);
    }
}
