//! Shared HTTP client construction for metadata probes.
//!
//! Keeps probe networking consistent on timeouts, user-agent, redirects and
//! compression.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::warn;

use super::ExtractError;
use crate::user_agent;

/// Redirect hops followed before a probe gives up.
const MAX_REDIRECTS: usize = 10;

/// Builds the probe client.
///
/// # Errors
///
/// Returns [`ExtractError::Backend`] when client construction fails.
pub fn build_probe_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, ExtractError> {
    match try_build_client(connect_timeout, read_timeout, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // Some sandboxed environments panic when querying system proxy
            // settings; retry with env proxies only.
            warn!("probe client hit system proxy panic; using env-proxy fallback builder");
            match try_build_client(connect_timeout, read_timeout, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Panic) => Err(ExtractError::backend(
                    "http",
                    "HTTP client construction panicked",
                )),
                Err(BuildClientFailure::Build(error)) => Err(ExtractError::backend(
                    "http",
                    format!("HTTP client construction failed: {error}"),
                )),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(ExtractError::backend(
            "http",
            format!("HTTP client construction failed: {error}"),
        )),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    connect_timeout: Duration,
    read_timeout: Duration,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(connect_timeout, read_timeout);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(connect_timeout: Duration, read_timeout: Duration) -> ClientBuilder {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .user_agent(user_agent::default_user_agent())
        .gzip(true)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    for (scheme, names) in [
        ("https", ["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        ("http", ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
    ] {
        let Some(proxy) = find_first_proxy_var(&names) else {
            continue;
        };
        let resolved = if scheme == "https" {
            Proxy::https(&proxy)
        } else {
            Proxy::http(&proxy)
        };
        if let Ok(resolved) = resolved {
            builder = builder.proxy(resolved);
        }
    }
    builder
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
