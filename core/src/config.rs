/*
 * config.rs
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

//! Protocol configuration: request timeout, retry and redirect limits, streaming chunk size.
//! Defaults match what Exchange deployments tolerate; an XML override can be loaded from the
//! account configuration with quick_xml:
//!
//! ```xml
//! <protocol>
//!   <timeout>120</timeout>
//!   <retry-wait>10</retry-wait>
//!   <max-redirects>10</max-redirects>
//!   <stream-chunk-size>65536</stream-chunk-size>
//! </protocol>
//! ```
//!
//! Durations are in seconds. Unknown elements are ignored.

use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Initial wait before retrying a failed request. Doubled on every retry.
pub const RETRY_WAIT: Duration = Duration::from_secs(10);
/// Maximum number of redirects followed for one request.
pub const MAX_REDIRECTS: u32 = 10;
/// Bytes read from a streamed response body per tokenizer feed.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Error loading a protocol configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("invalid text in configuration: {0}")]
    Text(String),
    #[error("invalid value for <{element}>: {value}")]
    InvalidValue { element: String, value: String },
}

/// Per-protocol settings consumed by the request executor and the streaming decoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub timeout: Duration,
    pub retry_wait: Duration,
    pub max_redirects: u32,
    pub stream_chunk_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry_wait: RETRY_WAIT,
            max_redirects: MAX_REDIRECTS,
            stream_chunk_size: STREAM_CHUNK_SIZE,
        }
    }
}

impl ProtocolConfig {
    /// Parse a `<protocol>` element. Missing settings keep their defaults.
    pub fn from_xml(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut element_name = Vec::<u8>::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Eof => break,
                Event::Start(e) => {
                    element_name.clear();
                    element_name.extend_from_slice(e.name().as_ref());
                }
                Event::Text(e) => {
                    if element_name.is_empty() {
                        continue;
                    }
                    let text = e
                        .unescape()
                        .map_err(|e| ConfigError::Text(e.to_string()))?
                        .trim()
                        .to_string();
                    config.apply(&element_name, &text)?;
                    element_name.clear();
                }
                Event::End(_) => element_name.clear(),
                _ => {}
            }
            buf.clear();
        }
        Ok(config)
    }

    fn apply(&mut self, element: &[u8], text: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            element: String::from_utf8_lossy(element).into_owned(),
            value: text.to_string(),
        };
        match element {
            b"timeout" => self.timeout = Duration::from_secs(text.parse().map_err(|_| invalid())?),
            b"retry-wait" => self.retry_wait = Duration::from_secs(text.parse().map_err(|_| invalid())?),
            b"max-redirects" => self.max_redirects = text.parse().map_err(|_| invalid())?,
            b"stream-chunk-size" => {
                let size: usize = text.parse().map_err(|_| invalid())?;
                if size == 0 {
                    return Err(invalid());
                }
                self.stream_chunk_size = size;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ProtocolConfig::default();
        assert_eq!(c.timeout, Duration::from_secs(120));
        assert_eq!(c.retry_wait, Duration::from_secs(10));
        assert_eq!(c.max_redirects, 10);
        assert_eq!(c.stream_chunk_size, 65536);
    }

    #[test]
    fn from_xml_overrides_some_settings() {
        let c = ProtocolConfig::from_xml(
            "<protocol><timeout> 30 </timeout><max-redirects>3</max-redirects><colour>red</colour></protocol>",
        )
        .unwrap();
        assert_eq!(c.timeout, Duration::from_secs(30));
        assert_eq!(c.max_redirects, 3);
        assert_eq!(c.retry_wait, RETRY_WAIT);
    }

    #[test]
    fn from_xml_rejects_bad_numbers() {
        let err = ProtocolConfig::from_xml("<protocol><retry-wait>soon</retry-wait></protocol>").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref element, .. } if element == "retry-wait"));
        assert!(ProtocolConfig::from_xml("<protocol><stream-chunk-size>0</stream-chunk-size></protocol>").is_err());
    }
}
