use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING};
use reqwest::{redirect, Client};

pub const APP_USER_AGENT: &str = "LuyumiLauncher/0.1.0";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const API_TIMEOUT_SECS: u64 = 10;

/// Shared client for the download engine.
///
/// Redirects are not followed automatically; the downloader walks them itself
/// so that every hop restarts the body stream and counts against its bound.
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    default_headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .redirect(redirect::Policy::none())
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
}

/// Client for small JSON endpoints, which may follow redirects on their own.
pub fn build_api_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(APP_USER_AGENT)
        .redirect(redirect::Policy::limited(5))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(API_TIMEOUT_SECS))
        .build()
}
