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

//! XML support for the EWS transport.
//!
//! The streaming paths use the in-tree push tokenizer (`XmlTokenizer`), which follows the
//! same buffer contract as the JSON parser: only complete tokens are consumed, partial
//! tokens stay in the caller's `BytesMut` until more data arrives. Character data is the
//! exception: it is delivered as soon as it is unambiguous, so a multi-megabyte text node
//! never has to be held in memory. Whole-document checks use quick_xml.

mod document;
mod error;
mod handler;
mod tokenizer;

pub use document::{ensure_well_formed, is_xml, strip_bom};
pub use error::XmlError;
pub use handler::{ExpandedName, XmlContentHandler};
pub use tokenizer::XmlTokenizer;
