/*
 * source.rs
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

//! Forward-only reader over a response body.
//!
//! The transport delivers chunks of whatever size the network produced; parsers want to ask
//! for "up to N bytes". `ByteSource` bridges the two, stashing any surplus from the last
//! chunk for the next read. It never seeks and never holds more than one read's worth of
//! data beyond what the caller asked for.

use std::io;

use bytes::{Bytes, BytesMut};

use crate::protocol::ews::response::{Body, Response};

pub struct ByteSource {
    body: Body,
    stash: BytesMut,
    position: u64,
    exhausted: bool,
    closed: bool,
    /// Read error held back until the stashed bytes before it have been handed out.
    error: Option<io::Error>,
}

impl ByteSource {
    pub fn new(body: Body) -> Self {
        Self {
            body,
            stash: BytesMut::new(),
            position: 0,
            exhausted: false,
            closed: false,
            error: None,
        }
    }

    pub fn from_response(response: Response) -> Self {
        Self::new(response.into_body())
    }

    /// Read up to `size` bytes. Returns fewer only at the end of the body or before a read
    /// error; an empty result means the body is exhausted.
    pub async fn read(&mut self, size: usize) -> io::Result<Bytes> {
        self.check_readable()?;
        while !self.exhausted && self.stash.len() < size {
            if !self.fill().await? {
                break;
            }
        }
        Ok(self.take(size))
    }

    /// Read up to `max` bytes of whatever has arrived, waiting only when nothing is buffered.
    /// An empty result means the body is exhausted.
    pub async fn read_available(&mut self, max: usize) -> io::Result<Bytes> {
        self.check_readable()?;
        if self.stash.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.take(max))
    }

    /// Read everything that is left.
    pub async fn read_to_end(&mut self) -> io::Result<Bytes> {
        self.check_readable()?;
        while !self.exhausted {
            if !self.fill().await? {
                break;
            }
        }
        Ok(self.take(self.stash.len()))
    }

    fn check_readable(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "read from a closed source"));
        }
        if self.stash.is_empty() {
            if let Some(e) = self.error.take() {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Pull one chunk into the stash. Returns false if a read error was held back because
    /// stashed bytes come first; with nothing stashed the error is returned directly.
    async fn fill(&mut self) -> io::Result<bool> {
        match self.body.next_chunk().await {
            Ok(Some(chunk)) => {
                self.stash.extend_from_slice(&chunk);
                Ok(true)
            }
            Ok(None) => {
                self.exhausted = true;
                Ok(true)
            }
            Err(e) if self.stash.is_empty() => Err(e),
            Err(e) => {
                self.error = Some(e);
                Ok(false)
            }
        }
    }

    fn take(&mut self, max: usize) -> Bytes {
        let n = max.min(self.stash.len());
        self.position += n as u64;
        self.stash.split_to(n).freeze()
    }

    /// Number of bytes handed out so far.
    pub fn tell(&self) -> u64 {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop reading and release the underlying body. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.body.close();
            self.stash.clear();
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn streaming(chunks: &[&'static [u8]]) -> (Body, mpsc::Sender<io::Result<Bytes>>) {
        let (tx, rx) = mpsc::channel(chunks.len() + 1);
        for c in chunks {
            tx.try_send(Ok(Bytes::from_static(c))).unwrap();
        }
        (Body::Streaming(rx), tx)
    }

    #[tokio::test]
    async fn reads_span_chunk_boundaries() {
        let (body, tx) = streaming(&[&b"abc"[..], &b"defgh"[..], &b"ij"[..]]);
        drop(tx);
        let mut src = ByteSource::new(body);
        assert_eq!(&src.read(4).await.unwrap()[..], b"abcd");
        assert_eq!(&src.read(2).await.unwrap()[..], b"ef");
        assert_eq!(src.tell(), 6);
        assert_eq!(&src.read(10).await.unwrap()[..], b"ghij");
        assert!(src.read(10).await.unwrap().is_empty());
        assert_eq!(src.tell(), 10);
    }

    #[tokio::test]
    async fn buffered_body_reads_like_a_stream() {
        let mut src = ByteSource::new(Body::Full(Bytes::from_static(b"hello world")));
        assert_eq!(&src.read(5).await.unwrap()[..], b"hello");
        assert_eq!(&src.read_to_end().await.unwrap()[..], b" world");
    }

    #[tokio::test]
    async fn close_stops_producer_and_further_reads() {
        let (body, tx) = streaming(&[&b"abc"[..]]);
        let mut src = ByteSource::new(body);
        assert_eq!(&src.read(2).await.unwrap()[..], b"ab");
        src.close();
        assert!(tx.is_closed());
        assert!(src.read(1).await.is_err());
    }

    #[tokio::test]
    async fn producer_error_is_surfaced() {
        let (body, tx) = streaming(&[&b"abc"[..]]);
        tx.try_send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))).unwrap();
        let mut src = ByteSource::new(body);
        assert_eq!(&src.read(100).await.unwrap()[..], b"abc");
        let err = src.read(100).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn read_available_does_not_wait_for_a_full_read() {
        let (body, tx) = streaming(&[&b"abc"[..]]);
        let mut src = ByteSource::new(body);
        assert_eq!(&src.read_available(1024).await.unwrap()[..], b"abc");
        tx.try_send(Ok(Bytes::from_static(b"defg"))).unwrap();
        assert_eq!(&src.read_available(3).await.unwrap()[..], b"def");
        assert_eq!(&src.read_available(3).await.unwrap()[..], b"g");
        drop(tx);
        assert!(src.read_available(3).await.unwrap().is_empty());
        assert_eq!(src.tell(), 7);
    }

    #[tokio::test]
    async fn error_without_stashed_bytes_is_immediate() {
        let (body, tx) = streaming(&[]);
        tx.try_send(Err(io::Error::new(io::ErrorKind::UnexpectedEof, "chunked"))).unwrap();
        let mut src = ByteSource::new(body);
        assert!(src.read_available(10).await.is_err());
    }
}
