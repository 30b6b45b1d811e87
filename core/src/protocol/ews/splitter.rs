/*
 * splitter.rs
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

//! Splits a byte stream holding one or more back-to-back XML documents (typically streamed
//! SOAP envelopes) into complete documents.
//!
//! This is a byte scanner, not a parser. Outside a document it looks for a start tag whose
//! name is the root tag; inside, it collects bytes until a tag ending in `/<root>>` closes the
//! document. Each completed document is emitted with an XML declaration prepended and the
//! scanner returns to looking for the next start tag. A document still open when the
//! stream ends is never emitted.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::config::ProtocolConfig;
use crate::protocol::ews::error::EwsError;
use crate::protocol::ews::response::Response;
use crate::protocol::ews::source::ByteSource;

/// Declaration prepended to every emitted document.
pub const XML_DECLARATION: &[u8] = b"<?xml version='1.0' encoding='utf-8'?>\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Looking for `<`.
    Outside,
    /// Reading a tag that may open a document.
    StartTag,
    /// Collecting document bytes.
    Inside,
    /// Reading a tag inside the document that may close it.
    Tag,
}

/// Push-model document splitter. Feed bytes with `receive()`.
pub struct DocumentSplitter {
    root_tag: Vec<u8>,
    end_token: Vec<u8>,
    state: State,
    tag: Vec<u8>,
    document: BytesMut,
    /// Inside the attributes of the root start tag.
    in_root_tag: bool,
}

impl DocumentSplitter {
    pub fn new(root_tag: &str) -> Self {
        Self {
            root_tag: root_tag.as_bytes().to_vec(),
            end_token: format!("/{}>", root_tag).into_bytes(),
            state: State::Outside,
            tag: Vec::new(),
            document: BytesMut::new(),
            in_root_tag: false,
        }
    }

    /// True while a document has been opened but not yet closed.
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Inside | State::Tag)
    }

    /// Discard any partial document and start looking for a new one.
    pub fn reset(&mut self) {
        self.state = State::Outside;
        self.tag.clear();
        self.document.clear();
        self.in_root_tag = false;
    }

    /// Scan `data` and return the documents it completed, in order.
    pub fn receive(&mut self, data: &[u8]) -> Vec<Bytes> {
        let mut out = Vec::new();
        for &b in data {
            match self.state {
                State::Outside => {
                    if b == b'<' {
                        self.tag.clear();
                        self.tag.push(b);
                        self.state = State::StartTag;
                    }
                }
                State::StartTag => {
                    if b == b'<' {
                        // Not a tag after all; this `<` may start the one we want
                        self.tag.clear();
                        self.tag.push(b);
                        continue;
                    }
                    self.tag.push(b);
                    if b.is_ascii_whitespace() || b == b'>' {
                        self.start_tag_complete(&mut out);
                    } else if self.tag.len() > self.root_tag.len() + 2 {
                        // Name already longer than the root tag (plus `<` and `/`)
                        self.tag.clear();
                        self.state = State::Outside;
                    }
                }
                State::Inside => {
                    if b == b'<' {
                        self.tag.clear();
                        self.tag.push(b);
                        self.state = State::Tag;
                    } else {
                        self.document.extend_from_slice(&[b]);
                        if self.in_root_tag && b == b'>' {
                            self.in_root_tag = false;
                            // `<Envelope attr="..."/>`
                            if self.document.ends_with(b"/>") {
                                out.push(self.emit());
                            }
                        }
                    }
                }
                State::Tag => {
                    self.tag.push(b);
                    if b == b'>' {
                        self.document.extend_from_slice(&self.tag);
                        self.tag.clear();
                        if self.document.ends_with(&self.end_token) {
                            out.push(self.emit());
                        } else {
                            self.state = State::Inside;
                        }
                    }
                }
            }
        }
        out
    }

    fn start_tag_complete(&mut self, out: &mut Vec<Bytes>) {
        let name = &self.tag[1..self.tag.len() - 1];
        let self_closing = name.last() == Some(&b'/');
        let name = if self_closing { &name[..name.len() - 1] } else { name };
        if name != self.root_tag.as_slice() {
            self.tag.clear();
            self.state = State::Outside;
            return;
        }
        self.document.clear();
        self.document.extend_from_slice(&self.tag);
        self.tag.clear();
        if self_closing {
            out.push(self.emit());
        } else {
            self.in_root_tag = self.document.last() != Some(&b'>');
            self.state = State::Inside;
        }
    }

    fn emit(&mut self) -> Bytes {
        let mut doc = BytesMut::with_capacity(XML_DECLARATION.len() + self.document.len());
        doc.extend_from_slice(XML_DECLARATION);
        doc.extend_from_slice(&self.document);
        self.document.clear();
        self.state = State::Outside;
        doc.freeze()
    }
}

/// Lazy iterator of documents over an iterator of byte chunks. See `split_documents`.
pub struct Documents<I> {
    chunks: I,
    splitter: DocumentSplitter,
    ready: VecDeque<Bytes>,
}

impl<I, C> Iterator for Documents<I>
where
    I: Iterator<Item = C>,
    C: AsRef<[u8]>,
{
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        loop {
            if let Some(doc) = self.ready.pop_front() {
                return Some(doc);
            }
            let chunk = self.chunks.next()?;
            self.ready.extend(self.splitter.receive(chunk.as_ref()));
        }
    }
}

/// Split the byte chunks produced by `chunks` into complete documents rooted at `root_tag`.
/// Chunks are pulled only as needed to produce the next document.
pub fn split_documents<I, C>(chunks: I, root_tag: &str) -> Documents<I::IntoIter>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    Documents {
        chunks: chunks.into_iter(),
        splitter: DocumentSplitter::new(root_tag),
        ready: VecDeque::new(),
    }
}

/// Documents read from a (usually streamed) response body.
pub struct DocumentStream {
    source: ByteSource,
    splitter: DocumentSplitter,
    ready: VecDeque<Bytes>,
    chunk_size: usize,
}

impl DocumentStream {
    /// Read `response` in pieces of at most `config.stream_chunk_size` bytes.
    pub fn new(response: Response, config: &ProtocolConfig, root_tag: &str) -> Self {
        Self::with_chunk_size(response, root_tag, config.stream_chunk_size)
    }

    pub fn with_chunk_size(response: Response, root_tag: &str, chunk_size: usize) -> Self {
        Self {
            source: ByteSource::from_response(response),
            splitter: DocumentSplitter::new(root_tag),
            ready: VecDeque::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// The next complete document, or None once the body is exhausted. Documents are
    /// yielded as soon as their last byte arrives. The body is closed when it ends or fails,
    /// and when the stream is dropped.
    pub async fn next(&mut self) -> Option<Result<Bytes, EwsError>> {
        loop {
            if let Some(doc) = self.ready.pop_front() {
                return Some(Ok(doc));
            }
            if self.source.is_closed() {
                return None;
            }
            match self.source.read_available(self.chunk_size).await {
                Ok(chunk) if chunk.is_empty() => {
                    if self.splitter.is_open() {
                        tracing::debug!("response ended inside a document; dropping it");
                    }
                    self.source.close();
                    return None;
                }
                Ok(chunk) => self.ready.extend(self.splitter.receive(&chunk)),
                Err(e) => {
                    self.source.close();
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO: &[u8] = b"<Envelope a=\"1\">body1</Envelope><Envelope a=\"2\">body2</Envelope>";

    #[test]
    fn two_back_to_back_documents() {
        let docs: Vec<Bytes> = split_documents([TWO], "Envelope").collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(&docs[0][..], b"<?xml version='1.0' encoding='utf-8'?>\n<Envelope a=\"1\">body1</Envelope>");
        assert_eq!(&docs[1][..], b"<?xml version='1.0' encoding='utf-8'?>\n<Envelope a=\"2\">body2</Envelope>");
        for doc in &docs {
            crate::xml::ensure_well_formed(doc).unwrap();
        }
    }

    #[test]
    fn byte_at_a_time_gives_same_documents() {
        let whole: Vec<Bytes> = split_documents([TWO], "Envelope").collect();
        let split: Vec<Bytes> = split_documents(TWO.chunks(1), "Envelope").collect();
        assert_eq!(whole, split);
    }

    #[test]
    fn prolog_and_nested_markup() {
        let input: &[u8] = b"<?xml version=\"1.0\"?>\r\n<s:Envelope xmlns:s=\"urn:s\"><s:Body><m:X a='b'>t</m:X></s:Body></s:Envelope>";
        let docs: Vec<Bytes> = split_documents(input.chunks(7), "s:Envelope").collect();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].ends_with(b"<s:Body><m:X a='b'>t</m:X></s:Body></s:Envelope>"));
        assert!(docs[0].starts_with(XML_DECLARATION));
    }

    #[test]
    fn unterminated_document_is_dropped() {
        let input: &[u8] = b"<Envelope a=\"1\">one</Envelope><Envelope a=\"2\">tw";
        let docs: Vec<Bytes> = split_documents([input], "Envelope").collect();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn other_root_tags_are_ignored() {
        let input: &[u8] = b"<Other x=\"1\">junk</Other><EnvelopeX y=\"2\"/><Envelope>ok</Envelope>";
        let docs: Vec<Bytes> = split_documents([input], "Envelope").collect();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].ends_with(b"<Envelope>ok</Envelope>"));
    }

    #[test]
    fn self_closing_root_is_a_document() {
        let mut splitter = DocumentSplitter::new("Envelope");
        let docs = splitter.receive(b"<Envelope/>");
        assert_eq!(docs.len(), 1);
        assert!(!splitter.is_open());

        let docs = splitter.receive(b"<Envelope xmlns=\"urn:x\"/><Envelope>b</Envelope>");
        assert_eq!(docs.len(), 2);
        assert!(docs[0].ends_with(b"<Envelope xmlns=\"urn:x\"/>"));
    }

    #[test]
    fn pulls_chunks_lazily() {
        let mut pulled = 0;
        let chunks = [&TWO[..40], &TWO[40..]].into_iter().inspect(|_| pulled += 1);
        let mut docs = split_documents(chunks, "Envelope");
        assert!(docs.next().is_some());
        drop(docs);
        assert_eq!(pulled, 1);
    }
}
