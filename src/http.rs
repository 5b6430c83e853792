//! HTTP transport.
//!
//! | Route        | Body                  | Reply                   |
//! |--------------|-----------------------|-------------------------|
//! | `POST /step` | action payload (JSON) | response payload        |
//! | `POST /quit` | empty                 | `204 No Content`        |
//!
//! Payloads are the same bytes the pipe transport frames, sent as
//! `application/octet-stream`.

use std::time::Duration;

use bytes::Bytes;
use log::{info, warn};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use crate::error::TransportError;
use crate::transport::Transport;

pub const STEP_PATH: &str = "/step";
pub const QUIT_PATH: &str = "/quit";
pub const CONTENT_TYPE_PAYLOAD: &str = "application/octet-stream";

/// Timeout for the best-effort `/quit` on close.
const QUIT_TIMEOUT: Duration = Duration::from_millis(500);

pub struct HttpTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
    failed: bool,
    closed: bool,
}

impl HttpTransport {
    /// `base_url` such as `http://127.0.0.1:8200`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("[http] engine at {}", base_url);
        Ok(Self {
            client,
            base_url,
            timeout,
            failed: false,
            closed: false,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fail(&mut self, err: TransportError) -> TransportError {
        warn!("[http] transport failed: {}", err);
        self.failed = true;
        err
    }
}

impl Transport for HttpTransport {
    fn round_trip(&mut self, payload: &[u8]) -> Result<Bytes, TransportError> {
        if self.failed || self.closed {
            return Err(TransportError::Closed);
        }
        let sent = self
            .client
            .post(format!("{}{}", self.base_url, STEP_PATH))
            .header(CONTENT_TYPE, CONTENT_TYPE_PAYLOAD)
            .body(payload.to_vec())
            .send();
        let response = match sent {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(self.fail(TransportError::Timeout(self.timeout))),
            Err(e) => return Err(self.fail(TransportError::Http(e.to_string()))),
        };
        let status = response.status();
        if !status.is_success() {
            return Err(self.fail(TransportError::Status(status.as_u16())));
        }
        match response.bytes() {
            Ok(body) => Ok(body),
            Err(e) if e.is_timeout() => Err(self.fail(TransportError::Timeout(self.timeout))),
            Err(e) => Err(self.fail(TransportError::Http(e.to_string()))),
        }
    }

    fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) || self.failed {
            return;
        }
        let quit = self
            .client
            .post(format!("{}{}", self.base_url, QUIT_PATH))
            .timeout(QUIT_TIMEOUT)
            .send();
        if let Err(e) = quit {
            warn!("[http] quit not delivered: {}", e);
        }
    }

    fn is_failed(&self) -> bool {
        self.failed
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
