//! Anonymous bearer tokens scoped to `pull`.

use serde::Deserialize;
use tracing::debug;

use crate::transport::Transport;
use crate::{Error, Reference, Result};

/// Bearer token response from a registry auth endpoint.
///
/// Docker Hub sends `token`; some services only send the OAuth2-style
/// `access_token`.
#[derive(Deserialize)]
struct TokenResp {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Fetches a pull-scoped token for `reference`'s repository.
///
/// Returns `Ok(None)` for registries pulled without authentication.
pub fn fetch_token(transport: &dyn Transport, reference: &Reference) -> Result<Option<String>> {
    let Some(endpoint) = reference.token_endpoint() else {
        debug!(registry = %reference.registry, "no token service, pulling anonymously");
        return Ok(None);
    };

    let url = format!(
        "{}?service={}&scope=repository:{}:pull",
        endpoint.realm, endpoint.service, reference.repository
    );
    let resp = transport.get(&url, &[]).map_err(|e| match e {
        Error::Cancelled => Error::Cancelled,
        other => Error::Auth(format!("token endpoint unreachable: {other}")),
    })?;
    if !resp.is_success() {
        return Err(Error::Auth(format!(
            "token endpoint returned HTTP {}",
            resp.status()
        )));
    }

    let body = resp
        .read_to_vec()
        .map_err(|e| Error::Auth(format!("reading token response: {e}")))?;
    let parsed: TokenResp = serde_json::from_slice(&body)
        .map_err(|e| Error::Auth(format!("malformed token response: {e}")))?;

    let token = parsed
        .token
        .or(parsed.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Auth("token response has no token".into()))?;

    debug!(repository = %reference.repository, "obtained pull token");
    Ok(Some(token))
}
