use super::{HttpResponse, HttpTransport};
use crate::error::{ProbeError, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// [`HttpTransport`] on top of `reqwest`'s blocking client.
///
/// Must be built and used outside of an async runtime.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|e| classify(e, timeout))?;
        read_response(response, timeout)
    }

    fn post_json(&self, url: &str, body: &[u8], timeout: Duration) -> Result<HttpResponse> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .timeout(timeout)
            .send()
            .map_err(|e| classify(e, timeout))?;
        read_response(response, timeout)
    }
}

fn read_response(response: Response, timeout: Duration) -> Result<HttpResponse> {
    let status = response.status().as_u16();
    let body = response.text().map_err(|e| classify(e, timeout))?;
    Ok(HttpResponse { status, body })
}

fn classify(err: reqwest::Error, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        err.into()
    }
}
