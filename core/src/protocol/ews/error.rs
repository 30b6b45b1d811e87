/*
 * error.rs
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

//! EWS transport errors. Callers only ever see these; raw transport failures are either
//! recovered by retrying or mapped to one of them.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::xml::XmlError;

#[derive(Debug, Error)]
pub enum EwsError {
    /// Unrecoverable transport failure: TLS error, bad or looping redirect, too many
    /// redirects, or an unclassified non-200 response.
    #[error("{0}")]
    Transport(String),

    /// Total time spent waiting for the server exceeded the retry policy's maximum.
    #[error("Max timeout reached (gave up after {total_wait:?} with status code {status} on {url})")]
    RateLimit {
        url: String,
        status: u16,
        total_wait: Duration,
    },

    /// The server redirected across scheme or host and the request only allows relative
    /// redirects. The caller may retry against `url`.
    #[error("redirect to {url} requires a new request")]
    Redirect { url: String },

    /// The client access server reported an `X-CasErrorCode`.
    #[error("CAS error: {cas_error} (HTTP {status})")]
    Cas { cas_error: String, status: u16 },

    /// Login failed under a fail-fast policy.
    #[error("{0}")]
    Unauthorized(String),

    /// The server rejected the requested schema version.
    #[error("{0}")]
    SchemaVersion(String),

    /// The element to stream from was not in the response. `data` holds the bytes read.
    #[error("The element to be streamed from was not found ({} bytes read)", .data.len())]
    ElementNotFound { data: Bytes },

    /// Malformed XML where a complete document was required.
    #[error("XML parse error: {0}")]
    DocumentParse(#[from] XmlError),

    #[error("invalid base64 content: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// Reading a response body failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
