use std::time::Duration;

use anyhow::{Context, Result};

const USER_AGENT: &str = concat!("hotswap/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest client with the shared user agent and optional proxy.
///
/// `timeout` bounds the whole request; pass `None` for long-lived streaming
/// downloads and rely on a connect timeout only.
pub fn build_client(timeout: Option<Duration>, proxy_url: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10));

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = proxy_url {
        log::info!("Using proxy for update traffic: {}", redact_proxy(proxy_url));
        let proxy = reqwest::Proxy::all(proxy_url)
            .with_context(|| format!("Invalid proxy URL: {}", redact_proxy(proxy_url)))?;
        builder = builder.proxy(proxy);
    }

    builder.build().context("Failed to build HTTP client")
}

// Credentials in a proxy URL must never reach the logs.
fn redact_proxy(proxy_url: &str) -> String {
    match proxy_url.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((_, host)) => format!("{}://***@{}", scheme, host),
            None => proxy_url.to_string(),
        },
        None => proxy_url.to_string(),
    }
}
