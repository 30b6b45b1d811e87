/*
 * decoder.rs
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

//! Streaming base64 decoder for one element of an XML response (e.g. the content of a large
//! attachment), without building the document tree.
//!
//! The push tokenizer runs over the body chunk by chunk. While it is inside the target
//! element, character data is appended to a pending buffer; after every chunk the longest
//! prefix of the buffer whose length is a multiple of 4 is decoded and handed out, and the
//! remaining 0-3 characters wait for the next chunk. At the end any remainder is padded with
//! `=` before decoding, since some servers omit the padding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Buf, Bytes, BytesMut};

use crate::config::ProtocolConfig;
use crate::protocol::ews::error::EwsError;
use crate::protocol::ews::response::Response;
use crate::protocol::ews::source::ByteSource;
use crate::xml::{ExpandedName, XmlContentHandler, XmlTokenizer};

/// Tracks whether the tokenizer is inside the target element and collects its text.
struct TargetElement {
    namespace: Option<String>,
    local_name: String,
    inside: bool,
    found: bool,
    pending: BytesMut,
}

impl TargetElement {
    fn matches(&self, name: &ExpandedName<'_>) -> bool {
        name.local_name == self.local_name && name.namespace == self.namespace.as_deref()
    }
}

impl XmlContentHandler for TargetElement {
    fn start_element(&mut self, name: ExpandedName<'_>) {
        if self.matches(&name) {
            self.inside = true;
            self.found = true;
        }
    }

    fn end_element(&mut self, name: ExpandedName<'_>) {
        if self.matches(&name) {
            self.inside = false;
        }
    }

    fn characters(&mut self, text: &str) {
        if !self.inside {
            return;
        }
        // Line breaks and indentation are not part of the encoded data
        self.pending
            .extend(text.bytes().filter(|b| !b.is_ascii_whitespace()));
    }
}

/// Push-model decoder: feed raw body bytes with `receive()`, then call `finish()`.
pub struct StreamingBase64Decoder {
    tokenizer: XmlTokenizer,
    target: TargetElement,
    buf: BytesMut,
    /// Raw bytes seen before the element was found, for diagnostics.
    collected: BytesMut,
}

impl StreamingBase64Decoder {
    /// Decode the content of the element `element_name` in `namespace` (None for no namespace).
    pub fn new(namespace: Option<&str>, element_name: &str) -> Self {
        Self {
            tokenizer: XmlTokenizer::new(),
            target: TargetElement {
                namespace: namespace.map(str::to_string),
                local_name: element_name.to_string(),
                inside: false,
                found: false,
                pending: BytesMut::new(),
            },
            buf: BytesMut::new(),
            collected: BytesMut::new(),
        }
    }

    /// True once the start tag of the target element has been seen.
    pub fn element_found(&self) -> bool {
        self.target.found
    }

    /// Feed the next chunk of the body. Returns the bytes decoded so far, if any.
    pub fn receive(&mut self, chunk: &[u8]) -> Result<Option<Bytes>, EwsError> {
        if !self.target.found {
            self.collected.extend_from_slice(chunk);
        }
        self.buf.extend_from_slice(chunk);
        self.tokenizer.receive(&mut self.buf, &mut self.target)?;
        if self.target.found && !self.collected.is_empty() {
            self.collected = BytesMut::new();
        }
        self.decode_aligned()
    }

    /// Signal the end of the body. Returns the last decoded bytes.
    ///
    /// Fails with `ElementNotFound` (carrying the bytes read) if the element never appeared;
    /// an element that was present but empty decodes to nothing.
    pub fn finish(&mut self) -> Result<Option<Bytes>, EwsError> {
        let closed = self.tokenizer.close(&mut self.buf, &mut self.target);
        if !self.target.found {
            let data = std::mem::take(&mut self.collected).freeze();
            return Err(EwsError::ElementNotFound { data });
        }
        closed?;
        let aligned = self.decode_aligned()?;
        let rest = self.decode_remainder()?;
        Ok(match (aligned, rest) {
            (Some(a), Some(r)) => {
                let mut out = BytesMut::from(&a[..]);
                out.extend_from_slice(&r);
                Some(out.freeze())
            }
            (a, r) => a.or(r),
        })
    }

    /// Decode the longest multiple-of-4 prefix of the pending text.
    fn decode_aligned(&mut self) -> Result<Option<Bytes>, EwsError> {
        let pending = &mut self.target.pending;
        let n = pending.len() - pending.len() % 4;
        if n == 0 {
            return Ok(None);
        }
        let decoded = BASE64.decode(&pending[..n])?;
        pending.advance(n);
        Ok(Some(Bytes::from(decoded)))
    }

    /// Decode the final 1-3 characters, adding the padding the server left out.
    fn decode_remainder(&mut self) -> Result<Option<Bytes>, EwsError> {
        let rest = self.target.pending.split();
        if rest.iter().all(|&b| b == b'=') {
            return Ok(None);
        }
        let decoded = safe_b64decode(&rest)?;
        Ok(if decoded.is_empty() { None } else { Some(Bytes::from(decoded)) })
    }
}

/// Base64-decode `data`, first padding it to a multiple of 4 with `=`.
pub fn safe_b64decode(data: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    let overflow = data.len() % 4;
    if overflow == 0 {
        return BASE64.decode(data);
    }
    let mut padded = Vec::with_capacity(data.len() + 4 - overflow);
    padded.extend_from_slice(data);
    padded.resize(data.len() + 4 - overflow, b'=');
    BASE64.decode(&padded)
}

/// Decoded content of one element of a response body, produced as the body streams in.
pub struct ElementStream {
    source: ByteSource,
    decoder: StreamingBase64Decoder,
    chunk_size: usize,
    done: bool,
}

impl ElementStream {
    pub fn new(
        response: Response,
        config: &ProtocolConfig,
        namespace: Option<&str>,
        element_name: &str,
    ) -> Self {
        Self::with_chunk_size(response, namespace, element_name, config.stream_chunk_size)
    }

    pub fn with_chunk_size(
        response: Response,
        namespace: Option<&str>,
        element_name: &str,
        chunk_size: usize,
    ) -> Self {
        Self {
            source: ByteSource::from_response(response),
            decoder: StreamingBase64Decoder::new(namespace, element_name),
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    /// The next run of decoded bytes, or None at the end. The body is closed at the end, on
    /// the first error, and when the stream is dropped before the end.
    pub async fn next(&mut self) -> Option<Result<Bytes, EwsError>> {
        loop {
            if self.done {
                return None;
            }
            let result = match self.source.read_available(self.chunk_size).await {
                Ok(chunk) if chunk.is_empty() => {
                    self.finish();
                    self.decoder.finish()
                }
                Ok(chunk) => self.decoder.receive(&chunk),
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(Some(data)) => return Some(Ok(data)),
                Ok(None) => continue,
                Err(e) => {
                    self.finish();
                    return Some(Err(e));
                }
            }
        }
    }

    /// Read and decode the rest of the element into one buffer.
    pub async fn collect(mut self) -> Result<Vec<u8>, EwsError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Stop early and release the body.
    pub fn close(&mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.done = true;
        self.source.close();
    }
}

/// Stream the base64-decoded content of `element_name` (in `namespace`) out of `response`,
/// feeding the tokenizer at most `config.stream_chunk_size` bytes at a time.
pub fn decode_element_stream(
    response: Response,
    config: &ProtocolConfig,
    namespace: Option<&str>,
    element_name: &str,
) -> ElementStream {
    ElementStream::new(response, config, namespace, element_name)
}
