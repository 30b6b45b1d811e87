/*
 * tokenizer.rs
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

//! Push-model, namespace-aware XML tokenizer: feed bytes via `receive()`, get events on a handler.
//!
//! # Buffer management contract
//!
//! Markup (start tags, end tags, comments, processing instructions, CDATA sections) is
//! consumed only when the whole token is in the buffer; otherwise zero bytes are consumed
//! and the caller appends more data before the next `receive()`. Character data is delivered
//! eagerly up to the last position that cannot be the middle of an entity reference or a
//! UTF-8 sequence, so text nodes of any size pass through in constant memory.
//!
//! DTDs are rejected outright; there is no entity expansion beyond the predefined and
//! numeric character references.

use bytes::{Buf, BytesMut};
use quick_xml::escape::unescape;

use crate::xml::error::XmlError;
use crate::xml::handler::{ExpandedName, XmlContentHandler};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
const BOM: &[u8] = &[0xef, 0xbb, 0xbf];
const COMMENT_OPEN: &[u8] = b"<!--";
const CDATA_OPEN: &[u8] = b"<![CDATA[";
/// Longest entity reference we are prepared to hold back across chunks (`&#x10FFFF;` is 10).
const MAX_ENTITY_LEN: usize = 32;

/// One open element: its qualified name as written and the namespace bindings it declared.
struct OpenElement {
    qname: String,
    bindings: Vec<(String, String)>,
}

/// Push-model XML tokenizer. Push bytes with `receive()`; call `close()` at end of input.
pub struct XmlTokenizer {
    bom_checked: bool,
    closed: bool,
    seen_root: bool,
    stack: Vec<OpenElement>,
}

impl Default for XmlTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlTokenizer {
    pub fn new() -> Self {
        Self {
            bom_checked: false,
            closed: false,
            seen_root: false,
            stack: Vec::new(),
        }
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Push bytes into the tokenizer. Complete tokens are consumed from the front of `buf` and
    /// reported to `handler`; an incomplete trailing token is left in `buf`.
    pub fn receive<H: XmlContentHandler + ?Sized>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), XmlError> {
        if self.closed {
            return Err(XmlError::new("cannot receive after close"));
        }
        if buf.is_empty() {
            return Ok(());
        }
        if !self.bom_checked {
            if buf.starts_with(BOM) {
                buf.advance(BOM.len());
            } else if buf.len() < BOM.len() && BOM.starts_with(&buf[..]) {
                // Might be a partial BOM; wait for more data
                return Ok(());
            }
            self.bom_checked = true;
        }
        while !buf.is_empty() {
            match self.parse_one(buf, handler)? {
                Some(n) => buf.advance(n),
                None => return Ok(()),
            }
        }
        Ok(())
    }

    /// Signal end of input. Whatever is still in `buf` must now form complete tokens, and the
    /// document must have a root element with every element closed.
    pub fn close<H: XmlContentHandler + ?Sized>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), XmlError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        while !buf.is_empty() {
            match self.parse_one(buf, handler)? {
                Some(n) => buf.advance(n),
                None => return Err(XmlError::new("unexpected end of document inside markup")),
            }
        }
        if !self.seen_root {
            return Err(XmlError::new("no root element found"));
        }
        if let Some(open) = self.stack.last() {
            return Err(XmlError::new(format!("unclosed element <{}>", open.qname)));
        }
        Ok(())
    }

    /// Reset for tokenizing a new document.
    pub fn reset(&mut self) {
        self.bom_checked = false;
        self.closed = false;
        self.seen_root = false;
        self.stack.clear();
    }

    /// Parse one token from the front of `data`. Returns bytes consumed, or None if need more data.
    fn parse_one<H: XmlContentHandler + ?Sized>(
        &mut self,
        data: &[u8],
        handler: &mut H,
    ) -> Result<Option<usize>, XmlError> {
        if data[0] != b'<' {
            return self.parse_text(data, handler);
        }
        if data.len() < 2 {
            return Ok(None);
        }
        match data[1] {
            // XML declaration or processing instruction: skipped
            b'?' => Ok(find(data, b"?>", 2).map(|i| i + 2)),
            b'!' => self.parse_bang(data, handler),
            b'/' => self.parse_end_tag(data, handler),
            _ => self.parse_start_tag(data, handler),
        }
    }

    fn parse_bang<H: XmlContentHandler + ?Sized>(
        &mut self,
        data: &[u8],
        handler: &mut H,
    ) -> Result<Option<usize>, XmlError> {
        if data.starts_with(COMMENT_OPEN) {
            return Ok(find(data, b"-->", COMMENT_OPEN.len()).map(|i| i + 3));
        }
        if data.starts_with(CDATA_OPEN) {
            let Some(end) = find(data, b"]]>", CDATA_OPEN.len()) else {
                return Ok(None);
            };
            if self.stack.is_empty() {
                return Err(XmlError::new("CDATA section outside root element"));
            }
            let text = std::str::from_utf8(&data[CDATA_OPEN.len()..end])
                .map_err(|_| XmlError::new("invalid UTF-8 in CDATA section"))?;
            if !text.is_empty() {
                handler.characters(text);
            }
            return Ok(Some(end + 3));
        }
        let n = data.len();
        if COMMENT_OPEN.starts_with(&data[..n.min(COMMENT_OPEN.len())])
            || CDATA_OPEN.starts_with(&data[..n.min(CDATA_OPEN.len())])
        {
            return Ok(None);
        }
        Err(XmlError::new("DTDs and entity declarations are not allowed"))
    }

    fn parse_start_tag<H: XmlContentHandler + ?Sized>(
        &mut self,
        data: &[u8],
        handler: &mut H,
    ) -> Result<Option<usize>, XmlError> {
        let Some(end) = find_tag_end(data) else {
            return Ok(None);
        };
        let mut inner = &data[1..end];
        let empty = inner.last() == Some(&b'/');
        if empty {
            inner = &inner[..inner.len() - 1];
        }
        let inner = std::str::from_utf8(inner).map_err(|_| XmlError::new("invalid UTF-8 in start tag"))?;
        let name_end = inner.find(is_xml_whitespace).unwrap_or(inner.len());
        let qname = &inner[..name_end];
        if qname.is_empty() {
            return Err(XmlError::new("empty element name"));
        }
        if self.stack.is_empty() && self.seen_root {
            return Err(XmlError::new(format!("junk after document element: <{}>", qname)));
        }
        let bindings = parse_namespace_declarations(&inner[name_end..])?;
        self.stack.push(OpenElement {
            qname: qname.to_string(),
            bindings,
        });
        self.seen_root = true;

        let (prefix, local_name) = split_qname(qname);
        let namespace = self.resolve(prefix)?;
        handler.start_element(ExpandedName::new(namespace, local_name));
        if empty {
            handler.end_element(ExpandedName::new(namespace, local_name));
            self.stack.pop();
        }
        Ok(Some(end + 1))
    }

    fn parse_end_tag<H: XmlContentHandler + ?Sized>(
        &mut self,
        data: &[u8],
        handler: &mut H,
    ) -> Result<Option<usize>, XmlError> {
        let Some(end) = data.iter().position(|&b| b == b'>') else {
            return Ok(None);
        };
        let qname = std::str::from_utf8(&data[2..end])
            .map_err(|_| XmlError::new("invalid UTF-8 in end tag"))?
            .trim_end_matches(is_xml_whitespace);
        match self.stack.last() {
            None => return Err(XmlError::new(format!("unexpected end tag </{}>", qname))),
            Some(open) if open.qname != qname => {
                return Err(XmlError::new(format!(
                    "mismatched end tag: expected </{}>, found </{}>",
                    open.qname, qname
                )));
            }
            Some(_) => {}
        }
        let (prefix, local_name) = split_qname(qname);
        let namespace = self.resolve(prefix)?;
        handler.end_element(ExpandedName::new(namespace, local_name));
        self.stack.pop();
        Ok(Some(end + 1))
    }

    fn parse_text<H: XmlContentHandler + ?Sized>(
        &mut self,
        data: &[u8],
        handler: &mut H,
    ) -> Result<Option<usize>, XmlError> {
        let (end, complete) = match data.iter().position(|&b| b == b'<') {
            Some(i) => (i, true),
            None => (data.len(), self.closed),
        };
        let mut safe = end;
        if !complete {
            if let Some(amp) = data[..end].iter().rposition(|&b| b == b'&') {
                if !data[amp..end].contains(&b';') {
                    if end - amp > MAX_ENTITY_LEN {
                        return Err(XmlError::new("unterminated entity reference"));
                    }
                    safe = amp;
                }
            }
            safe = match std::str::from_utf8(&data[..safe]) {
                Ok(_) => safe,
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(_) => return Err(XmlError::new("invalid UTF-8 in character data")),
            };
            if safe == 0 {
                return Ok(None);
            }
        }
        let raw = std::str::from_utf8(&data[..safe])
            .map_err(|_| XmlError::new("invalid UTF-8 in character data"))?;
        if self.stack.is_empty() {
            if raw.trim_matches(is_xml_whitespace).is_empty() {
                return Ok(Some(safe));
            }
            return Err(XmlError::new("character data outside root element"));
        }
        let text = unescape(raw).map_err(|e| XmlError::new(format!("invalid reference in character data: {}", e)))?;
        handler.characters(&text);
        Ok(Some(safe))
    }

    /// Namespace URI bound to `prefix` in the current scope. The empty prefix is the default
    /// namespace; `xmlns=""` undeclares it.
    fn resolve(&self, prefix: &str) -> Result<Option<&str>, XmlError> {
        if prefix == "xml" {
            return Ok(Some(XML_NAMESPACE));
        }
        for open in self.stack.iter().rev() {
            if let Some((_, uri)) = open.bindings.iter().rev().find(|(p, _)| p == prefix) {
                return Ok(if uri.is_empty() { None } else { Some(uri.as_str()) });
            }
        }
        if prefix.is_empty() {
            Ok(None)
        } else {
            Err(XmlError::new(format!("unbound namespace prefix: {}", prefix)))
        }
    }
}

fn is_xml_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Index of the first occurrence of `needle` in `data` at or after `from`.
fn find(data: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if data.len() < from + needle.len() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Index of the `>` closing the tag that starts at data[0], skipping `>` inside quoted values.
fn find_tag_end(data: &[u8]) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in data.iter().enumerate().skip(1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn split_qname(qname: &str) -> (&str, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (prefix, local),
        None => ("", qname),
    }
}

/// Parse the attribute list of a start tag, keeping only `xmlns` / `xmlns:p` declarations.
fn parse_namespace_declarations(attrs: &str) -> Result<Vec<(String, String)>, XmlError> {
    let mut out = Vec::new();
    let mut rest = attrs.trim_start_matches(is_xml_whitespace);
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| XmlError::new(format!("attribute without value: {}", rest)))?;
        let name = rest[..eq].trim_end_matches(is_xml_whitespace);
        let after = rest[eq + 1..].trim_start_matches(is_xml_whitespace);
        let quote = after
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| XmlError::new(format!("unquoted value for attribute {}", name)))?;
        let close = after[1..]
            .find(quote)
            .ok_or_else(|| XmlError::new(format!("unterminated value for attribute {}", name)))?
            + 1;
        let value = &after[1..close];
        let prefix = if name == "xmlns" {
            Some("")
        } else {
            name.strip_prefix("xmlns:")
        };
        if let Some(prefix) = prefix {
            let uri = unescape(value).map_err(|e| XmlError::new(format!("invalid namespace URI: {}", e)))?;
            out.push((prefix.to_string(), uri.into_owned()));
        }
        rest = after[close + 1..].trim_start_matches(is_xml_whitespace);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl XmlContentHandler for Recorder {
        fn start_element(&mut self, name: ExpandedName<'_>) {
            self.events.push(format!("start {{{}}}{}", name.namespace.unwrap_or(""), name.local_name));
        }
        fn end_element(&mut self, name: ExpandedName<'_>) {
            self.events.push(format!("end {{{}}}{}", name.namespace.unwrap_or(""), name.local_name));
        }
        fn characters(&mut self, text: &str) {
            // Merge adjacent text so assertions do not depend on chunking
            if let Some(last) = self.events.last_mut() {
                if let Some(prev) = last.strip_prefix("text ") {
                    *last = format!("text {}{}", prev, text);
                    return;
                }
            }
            self.events.push(format!("text {}", text));
        }
    }

    fn tokenize_in_chunks(input: &[u8], chunk: usize) -> Result<Vec<String>, XmlError> {
        let mut tokenizer = XmlTokenizer::new();
        let mut rec = Recorder::default();
        let mut buf = BytesMut::new();
        for part in input.chunks(chunk) {
            buf.extend_from_slice(part);
            tokenizer.receive(&mut buf, &mut rec)?;
        }
        tokenizer.close(&mut buf, &mut rec)?;
        Ok(rec.events)
    }

    const SOAP: &[u8] = b"<?xml version=\"1.0\" encoding=\"utf-8\"?>\
<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\">\
<s:Body><m:Resp xmlns:m=\"urn:m\" xmlns=\"urn:t\"><Content>a &amp; b</Content><!-- note --></m:Resp></s:Body>\
</s:Envelope>";

    #[test]
    fn resolves_prefixed_and_default_namespaces() {
        let events = tokenize_in_chunks(SOAP, SOAP.len()).unwrap();
        assert_eq!(
            events,
            vec![
                "start {http://schemas.xmlsoap.org/soap/envelope/}Envelope",
                "start {http://schemas.xmlsoap.org/soap/envelope/}Body",
                "start {urn:m}Resp",
                "start {urn:t}Content",
                "text a & b",
                "end {urn:t}Content",
                "end {urn:m}Resp",
                "end {http://schemas.xmlsoap.org/soap/envelope/}Body",
                "end {http://schemas.xmlsoap.org/soap/envelope/}Envelope",
            ]
        );
    }

    #[test]
    fn byte_at_a_time_matches_whole_input() {
        let whole = tokenize_in_chunks(SOAP, SOAP.len()).unwrap();
        let split = tokenize_in_chunks(SOAP, 1).unwrap();
        assert_eq!(whole, split);
    }

    #[test]
    fn quoted_gt_in_attribute_does_not_end_tag() {
        let events = tokenize_in_chunks(b"<a x=\"1>2\" y='>'><b/></a>", 3).unwrap();
        assert_eq!(events, vec!["start {}a", "start {}b", "end {}b", "end {}a"]);
    }

    #[test]
    fn cdata_and_character_references() {
        let events = tokenize_in_chunks(b"<a><![CDATA[<raw>]]>&#65;&#x42;&lt;</a>", 2).unwrap();
        assert_eq!(events, vec!["start {}a", "text <raw>AB<", "end {}a"]);
    }

    #[test]
    fn multibyte_text_split_across_chunks() {
        let input = "<a>caf\u{e9} \u{1f600}</a>".as_bytes();
        let events = tokenize_in_chunks(input, 1).unwrap();
        assert_eq!(events, vec!["start {}a", "text caf\u{e9} \u{1f600}", "end {}a"]);
    }

    #[test]
    fn large_text_is_delivered_before_end_tag_arrives() {
        let mut tokenizer = XmlTokenizer::new();
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&b"<a>QUJD"[..]);
        tokenizer.receive(&mut buf, &mut rec).unwrap();
        assert!(buf.is_empty());
        assert_eq!(rec.events, vec!["start {}a", "text QUJD"]);
    }

    #[test]
    fn partial_entity_is_held_back() {
        let mut tokenizer = XmlTokenizer::new();
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&b"<a>x&am"[..]);
        tokenizer.receive(&mut buf, &mut rec).unwrap();
        assert_eq!(&buf[..], b"&am");
        buf.extend_from_slice(b"p;y</a>");
        tokenizer.receive(&mut buf, &mut rec).unwrap();
        tokenizer.close(&mut buf, &mut rec).unwrap();
        assert_eq!(rec.events, vec!["start {}a", "text x&y", "end {}a"]);
    }

    #[test]
    fn bom_is_skipped() {
        let events = tokenize_in_chunks(b"\xef\xbb\xbf<a/>", 1).unwrap();
        assert_eq!(events, vec!["start {}a", "end {}a"]);
    }

    #[test]
    fn doctype_is_rejected() {
        let err = tokenize_in_chunks(b"<!DOCTYPE a [<!ENTITY x \"y\">]><a/>", 64).unwrap_err();
        assert!(err.message().contains("DTD"));
    }

    #[test]
    fn mismatched_end_tag_is_an_error() {
        let err = tokenize_in_chunks(b"<a><b></a>", 64).unwrap_err();
        assert!(err.message().contains("mismatched"));
    }

    #[test]
    fn unbound_prefix_is_an_error() {
        let err = tokenize_in_chunks(b"<x:a/>", 64).unwrap_err();
        assert!(err.message().contains("unbound"));
    }

    #[test]
    fn truncated_document_fails_on_close() {
        let err = tokenize_in_chunks(b"<a><b>text", 64).unwrap_err();
        assert!(err.message().contains("unclosed"));
        let err = tokenize_in_chunks(b"", 64).unwrap_err();
        assert!(err.message().contains("no root"));
    }
}
