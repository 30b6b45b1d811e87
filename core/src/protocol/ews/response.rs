/*
 * response.rs
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

//! HTTP response as seen by the EWS executor: status, URL, headers, body, redirect history.
//!
//! The body is either fully buffered or a channel of chunks fed by the transport while the
//! response streams in. Dropping or closing a streamed body closes the channel, which tells
//! the transport to release the connection.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

/// Header set a placeholder carries when the OAuth token expired before a response arrived.
pub const TOKEN_EXPIRED_HEADER: &str = "TokenExpiredError";

/// HTTP headers. Order is preserved; name lookup is case-insensitive per HTTP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add or replace a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
        self
    }

    /// Add a header, keeping existing values of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (n, v) in iter {
            headers.append(n, v);
        }
        headers
    }
}

/// Response body.
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Fully buffered.
    Full(Bytes),
    /// Chunks pushed by the transport as they arrive. The channel closing marks the end.
    Streaming(mpsc::Receiver<io::Result<Bytes>>),
}

impl Body {
    /// Next chunk of the body, or None at the end. A buffered body is returned as one chunk.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match self {
            Body::Empty => Ok(None),
            Body::Full(_) => match std::mem::take(self) {
                Body::Full(data) if !data.is_empty() => Ok(Some(data)),
                _ => Ok(None),
            },
            Body::Streaming(rx) => match rx.recv().await {
                Some(Ok(chunk)) => Ok(Some(chunk)),
                Some(Err(e)) => {
                    self.close();
                    Err(e)
                }
                None => {
                    *self = Body::Empty;
                    Ok(None)
                }
            },
        }
    }

    /// Release the body. For a streamed body this closes the channel so the producer stops.
    pub fn close(&mut self) {
        if let Body::Streaming(rx) = self {
            rx.close();
        }
        *self = Body::Empty;
    }
}

/// Why an attempt produced no real response. Carried by placeholder responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Connection refused or reset, chunked-encoding failure, or timeout.
    Connection(String),
    /// The OAuth access token expired before the request could be sent.
    TokenExpired(String),
    /// The server's 401 lacked the authentication headers the auth layer needs.
    MissingAuthHeader,
}

/// An HTTP response, or a placeholder standing in for one that was never obtained.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    /// URL the response came from.
    pub url: String,
    pub headers: Headers,
    /// Headers of the request that produced this response.
    pub request_headers: Headers,
    /// URLs of responses that redirected to this one, oldest first.
    pub history: Vec<String>,
    /// Set on placeholders only.
    pub failure: Option<AttemptFailure>,
    body: Body,
}

impl Response {
    pub fn new(status: u16, url: impl Into<String>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: Headers::new(),
            request_headers: Headers::new(),
            history: Vec::new(),
            failure: None,
            body: Body::Empty,
        }
    }

    /// Placeholder for an attempt that produced no response: status 401 for an expired token,
    /// 503 otherwise, so the retry logic treats it like a server outage.
    pub fn placeholder(url: impl Into<String>, request_headers: Headers, failure: AttemptFailure) -> Self {
        let mut response = Self::new(503, url);
        response.request_headers = request_headers;
        if let AttemptFailure::TokenExpired(msg) = &failure {
            response.status = 401;
            response.headers.insert(TOKEN_EXPIRED_HEADER, msg.clone());
        }
        response.failure = Some(failure);
        response
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, data: impl Into<Bytes>) -> Self {
        self.body = Body::Full(data.into());
        self
    }

    pub fn with_stream(mut self, rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        self.body = Body::Streaming(rx);
        self
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.failure.is_some()
    }

    /// The body if it is already buffered. Never reads from the network.
    pub fn buffered_content(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Full(data) => Some(data),
            _ => None,
        }
    }

    /// The whole body, reading a streamed body to the end and buffering it first.
    pub async fn content(&mut self) -> io::Result<Bytes> {
        if let Body::Streaming(_) = self.body {
            let mut buf = BytesMut::new();
            while let Some(chunk) = self.body.next_chunk().await? {
                buf.extend_from_slice(&chunk);
            }
            self.body = Body::Full(buf.freeze());
        }
        Ok(self.buffered_content().cloned().unwrap_or_default())
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Release the body and the connection behind it.
    pub fn close(&mut self) {
        self.body.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut h: Headers = [("Connection", "close"), ("X-CasErrorCode", "x")].into_iter().collect();
        assert_eq!(h.get("connection"), Some("close"));
        assert_eq!(h.get("x-caserrorcode"), Some("x"));
        h.insert("CONNECTION", "keep-alive");
        assert_eq!(h.get("Connection"), Some("keep-alive"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn placeholders() {
        let r = Response::placeholder("https://h/ews", Headers::new(), AttemptFailure::Connection("reset".into()));
        assert_eq!(r.status, 503);
        assert!(r.is_placeholder());
        let r = Response::placeholder("https://h/ews", Headers::new(), AttemptFailure::TokenExpired("expired".into()));
        assert_eq!(r.status, 401);
        assert_eq!(r.headers.get(TOKEN_EXPIRED_HEADER), Some("expired"));
    }

    #[tokio::test]
    async fn content_buffers_a_streamed_body() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"<?xml"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b" version='1.0'?>"))).await.unwrap();
        drop(tx);
        let mut r = Response::new(500, "https://h/ews").with_stream(rx);
        assert!(r.buffered_content().is_none());
        assert_eq!(&r.content().await.unwrap()[..], b"<?xml version='1.0'?>");
        assert_eq!(&r.content().await.unwrap()[..], b"<?xml version='1.0'?>");
    }

    #[tokio::test]
    async fn close_releases_the_producer() {
        let (tx, rx) = mpsc::channel(1);
        let mut r = Response::new(200, "https://h/ews").with_stream(rx);
        r.close();
        assert!(tx.is_closed());
    }
}
