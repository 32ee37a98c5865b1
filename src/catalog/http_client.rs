//! HTTP client shared by the catalog adapters: timeouts, user agent,
//! compression and proxy discovery.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Proxy};
use tracing::warn;

use super::{CatalogError, SourceTag};
use crate::user_agent;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 30;

const HTTPS_PROXY_VARS: [&str; 4] = ["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"];
const HTTP_PROXY_VARS: [&str; 4] = ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"];

/// Connect and total-request timeouts for catalog queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogTimeouts {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for CatalogTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

/// Builds the client for `catalog`.
///
/// System proxy lookup panics in some sandboxes; when it does the client is
/// rebuilt with proxies taken from the environment only.
///
/// # Errors
///
/// Returns [`CatalogError::Setup`] when no client can be built.
pub(crate) fn build_catalog_http_client(
    catalog: SourceTag,
    timeouts: CatalogTimeouts,
) -> Result<Client, CatalogError> {
    let setup_error = |reason: String| CatalogError::Setup { catalog, reason };

    let attempt = |env_proxies_only: bool| {
        catch_unwind(AssertUnwindSafe(move || {
            let mut builder = Client::builder()
                .connect_timeout(Duration::from_secs(timeouts.connect_timeout_secs))
                .timeout(Duration::from_secs(timeouts.read_timeout_secs))
                .user_agent(user_agent::catalog_user_agent())
                .gzip(true);
            if env_proxies_only {
                builder = with_env_proxies(builder.no_proxy());
            }
            builder.build()
        }))
    };

    let built = match attempt(false) {
        Ok(built) => built,
        Err(_) => {
            warn!(%catalog, "system proxy lookup panicked; retrying with environment proxies");
            attempt(true)
                .map_err(|_| setup_error("HTTP client construction panicked".to_string()))?
        }
    };
    built.map_err(|error| setup_error(format!("HTTP client construction failed: {error}")))
}

pub(crate) fn with_env_proxies(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = first_env_value(&HTTPS_PROXY_VARS)
        && let Ok(proxy) = Proxy::https(&proxy)
    {
        builder = builder.proxy(proxy);
    }
    if let Some(proxy) = first_env_value(&HTTP_PROXY_VARS)
        && let Ok(proxy) = Proxy::http(&proxy)
    {
        builder = builder.proxy(proxy);
    }
    builder
}

fn first_env_value(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
