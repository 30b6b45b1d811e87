/*
 * mod.rs
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

//! Exchange Web Services transport.
//!
//! Turns a rate-limited, redirect-prone EWS endpoint into a dependable request/response
//! channel, and turns a streamed response body into either a sequence of SOAP envelopes
//! or the decoded bytes of one large base64 element.
//!
//! - `executor::execute` POSTs one request: waits out any server-imposed cool-down, retries
//!   with doubling waits on recoverable failures, refreshes expired credentials, follows
//!   redirects by hand (automatic redirects would turn the POST into a GET) and classifies
//!   the final failure.
//! - `splitter` yields complete envelopes from a byte stream holding several of them.
//! - `decoder` runs the push tokenizer over the body and base64-decodes the character
//!   content of one element in 4-byte aligned steps.
//!
//! The HTTP transport itself and the session lifecycle are supplied by the caller through
//! the `Protocol` trait.

pub mod decoder;
pub mod error;
pub mod executor;
pub mod policy;
pub mod redirect;
pub mod response;
pub mod source;
pub mod splitter;
pub mod transport;

pub use decoder::{decode_element_stream, ElementStream, StreamingBase64Decoder};
pub use error::EwsError;
pub use executor::execute;
pub use policy::RetryPolicy;
pub use redirect::{get_redirect_url, split_url};
pub use response::{AttemptFailure, Body, Headers, Response};
pub use source::ByteSource;
pub use splitter::{split_documents, DocumentSplitter, DocumentStream, Documents};
pub use transport::{PostRequest, Protocol, SendError, Session};
