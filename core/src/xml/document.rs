/*
 * document.rs
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

//! Whole-document checks: the fast "looks like XML" test used on error responses, and a full
//! well-formedness pass with quick_xml for callers that need a complete tree.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::xml::error::XmlError;

const BOM_UTF8: &[u8] = &[0xef, 0xbb, 0xbf];
const XML_PREFIX: &[u8] = b"<?xml";
/// Bytes of context shown on each side of a parse error.
const EXCERPT_RADIUS: usize = 20;

/// Strip a leading UTF-8 byte order mark, which Exchange servers sometimes send.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(BOM_UTF8).unwrap_or(data)
}

/// Lightweight test whether `data` is an XML document: it starts with `<?xml`, optionally
/// after a BOM. Fast rather than correct.
pub fn is_xml(data: &[u8]) -> bool {
    strip_bom(data).starts_with(XML_PREFIX)
}

/// Parse the whole document and fail on the first well-formedness error. The error message
/// includes the offending text around the error position.
pub fn ensure_well_formed(data: &[u8]) -> Result<(), XmlError> {
    let data = strip_bom(data);
    let mut reader = Reader::from_reader(data);
    let mut depth: usize = 0;
    let mut seen_root = false;
    loop {
        match reader.read_event() {
            Err(e) => {
                let pos = reader.buffer_position() as usize;
                return Err(XmlError::new(format!(
                    "{} at position {}\nOffending text: [...]{}[...]",
                    e,
                    pos,
                    excerpt(data, pos)
                )));
            }
            Ok(Event::Start(_)) => {
                depth += 1;
                seen_root = true;
            }
            Ok(Event::Empty(_)) => seen_root = true,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::DocType(_)) => {
                return Err(XmlError::new("DTDs and entity declarations are not allowed"));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
        }
    }
    if !seen_root {
        let shown = String::from_utf8_lossy(&data[..data.len().min(2 * EXCERPT_RADIUS)]);
        return Err(XmlError::new(format!("No root element found: {:?}", shown)));
    }
    if depth != 0 {
        return Err(XmlError::new("unexpected end of document: unclosed element"));
    }
    Ok(())
}

fn excerpt(data: &[u8], pos: usize) -> String {
    let pos = pos.min(data.len());
    let start = pos.saturating_sub(EXCERPT_RADIUS);
    let end = (pos + EXCERPT_RADIUS).min(data.len());
    String::from_utf8_lossy(&data[start..end]).into_owned()
}
