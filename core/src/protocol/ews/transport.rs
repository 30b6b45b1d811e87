/*
 * transport.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tagliacarte, a cross-platform email client.
 *
 * Tagliacarte is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tagliacarte is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tagliacarte.  If not, see <http://www.gnu.org/licenses/>.
 */

//! What the executor needs from the rest of the client: an HTTP transport and a session
//! lifecycle. Both are implemented by the account/service layer.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::config::ProtocolConfig;
use crate::protocol::ews::error::EwsError;
use crate::protocol::ews::policy::RetryPolicy;
use crate::protocol::ews::response::{Headers, Response};

/// Why the transport could not produce a response.
#[derive(Debug, Error)]
pub enum SendError {
    /// Connection refused/reset, chunked-encoding failure or timeout. Retried like a 503.
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),
    /// TLS verification or handshake failure. Persistent, so never retried.
    #[error("TLS error: {0}")]
    Tls(String),
    /// The OAuth access token expired. Credentials are refreshed and the request resent.
    #[error("OAuth token expired: {0}")]
    TokenExpired(String),
    /// The auth layer expected `WWW-Authenticate` on a 401 and found none.
    #[error("authentication headers missing from response")]
    MissingAuthHeader,
}

/// A connection/credential context. Owned by the caller; replaced only through `Protocol`.
pub trait Session: Send + Sync {
    fn session_id(&self) -> u64;
    /// Human-readable auth type, for logging.
    fn auth(&self) -> &str;
}

/// One logical POST. The executor may send it several times and to several URLs.
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
    /// Follow redirects that change scheme or host. Same-origin redirects are always followed.
    pub allow_redirects: bool,
    /// Ask the transport to stream the response body instead of buffering it.
    pub stream: bool,
    /// Per-attempt timeout; `ProtocolConfig::timeout` if None.
    pub timeout: Option<Duration>,
}

impl PostRequest {
    pub fn new(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            headers: Headers::new(),
            body: body.into(),
            allow_redirects: false,
            stream: false,
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = allow;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The protocol instance a request runs against: transport, session pool, retry policy and
/// configuration. One instance is shared by all concurrent requests to the same server.
pub trait Protocol: Sync {
    type Session: Session;

    fn config(&self) -> &ProtocolConfig;

    fn retry_policy(&self) -> &RetryPolicy;

    /// Send one POST to `url` with redirects disabled. Must not follow redirects itself.
    fn post(
        &self,
        session: &Self::Session,
        url: &str,
        request: &PostRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<Response, SendError>> + Send;

    /// Replace a session that may have gone stale (e.g. after a long back-off). On failure the
    /// old session is handed back with the error so it can be retired.
    fn renew_session(
        &self,
        session: Self::Session,
    ) -> impl Future<Output = Result<Self::Session, (Self::Session, EwsError)>> + Send;

    /// Replace a session whose credentials expired. On failure the old session is handed
    /// back with the error.
    fn refresh_credentials(
        &self,
        session: Self::Session,
    ) -> impl Future<Output = Result<Self::Session, (Self::Session, EwsError)>> + Send;

    /// Discard a session implicated in a failure so it is never reused.
    fn retire_session(&self, session: Self::Session);
}
