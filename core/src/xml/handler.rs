/*
 * handler.rs
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

//! Content handler for XML tokenizer events.

/// Namespace-resolved element name. `namespace` is `None` for elements in no namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandedName<'a> {
    pub namespace: Option<&'a str>,
    pub local_name: &'a str,
}

impl<'a> ExpandedName<'a> {
    pub fn new(namespace: Option<&'a str>, local_name: &'a str) -> Self {
        Self { namespace, local_name }
    }
}

/// Handler for tokenizer events. Names and text are only valid for the duration of the call.
///
/// Text inside one element may arrive in several `characters` calls; the split points depend
/// on how the input was chunked.
pub trait XmlContentHandler {
    fn start_element(&mut self, name: ExpandedName<'_>);
    fn end_element(&mut self, name: ExpandedName<'_>);
    fn characters(&mut self, text: &str);
}
