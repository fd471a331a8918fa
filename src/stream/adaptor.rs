//! Narrow body roles for synchronous pull calls.
//!
//! `read_response_body`, `send_request_body` and friends drive a socket's
//! state machine with one of these in place of the handler's body callbacks.
//! Asking an adaptor for the role it does not play is `NotSupported`.

use crate::error::{Error, Flow, Result};

/// Where body bytes come from or go to during one state machine pass.
pub enum Body<'a, 'b> {
    /// The socket's handler supplies and receives body bytes.
    Handler,
    /// Body bytes come from a caller-provided slice.
    Produce(&'a mut SliceProducer<'b>),
    /// Body bytes are copied into a caller-provided slice.
    Consume(&'a mut SliceConsumer<'b>),
}

/// Offers the bytes of a slice as request or response body.
#[derive(Debug)]
pub struct SliceProducer<'a> {
    data: &'a [u8],
    produced: usize,
}

impl<'a> SliceProducer<'a> {
    /// An empty slice ends the body.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, produced: 0 }
    }

    pub fn produced(&self) -> usize {
        self.produced
    }

    /// `(Success, 0)` ends the body; `Break` once the slice is used up.
    pub fn offer(&self) -> (Flow, u64) {
        if self.data.is_empty() {
            return (Flow::Success, 0);
        }
        let remaining = self.data.len() - self.produced;
        if remaining == 0 {
            return (Flow::Break, 0);
        }
        (Flow::Success, remaining as u64)
    }

    pub fn produce(&mut self, out: &mut [u8]) -> Result<Flow> {
        let remaining = &self.data[self.produced..];
        if out.len() > remaining.len() {
            return Err(Error::InvalidArgument);
        }
        out.copy_from_slice(&remaining[..out.len()]);
        self.produced += out.len();
        Ok(Flow::Success)
    }
}

/// Copies offered body bytes into a slice and remembers the last offer size.
#[derive(Debug)]
pub struct SliceConsumer<'a> {
    out: &'a mut [u8],
    consumed: usize,
    offered: Option<u64>,
}

impl<'a> SliceConsumer<'a> {
    /// An empty slice only records how many bytes are on offer.
    pub fn new(out: &'a mut [u8]) -> Self {
        Self {
            out,
            consumed: 0,
            offered: None,
        }
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Size of the most recent offer, `Some(0)` at end of body.
    pub fn offered(&self) -> Option<u64> {
        self.offered
    }

    pub fn consume(&mut self, chunk: &[u8]) -> (Flow, usize) {
        self.offered = Some(chunk.len() as u64);
        if chunk.is_empty() {
            return (Flow::Success, 0);
        }
        let space = self.out.len() - self.consumed;
        if space == 0 {
            return (Flow::Break, 0);
        }
        let n = space.min(chunk.len());
        self.out[self.consumed..self.consumed + n].copy_from_slice(&chunk[..n]);
        self.consumed += n;
        (Flow::Success, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_breaks_when_exhausted() {
        let mut producer = SliceProducer::new(b"abcdef");
        assert_eq!(producer.offer(), (Flow::Success, 6));
        let mut out = [0u8; 4];
        producer.produce(&mut out).unwrap();
        assert_eq!(&out, b"abcd");
        assert_eq!(producer.offer(), (Flow::Success, 2));
        assert!(producer.produce(&mut [0u8; 3]).is_err());
        producer.produce(&mut out[..2]).unwrap();
        assert_eq!(producer.offer(), (Flow::Break, 0));
        assert_eq!(SliceProducer::new(b"").offer(), (Flow::Success, 0));
    }

    #[test]
    fn consumer_records_offers_and_fills() {
        let mut empty: [u8; 0] = [];
        let mut peek = SliceConsumer::new(&mut empty);
        assert_eq!(peek.consume(b"hello"), (Flow::Break, 0));
        assert_eq!(peek.offered(), Some(5));

        let mut out = [0u8; 3];
        let mut consumer = SliceConsumer::new(&mut out);
        assert_eq!(consumer.consume(b"hello"), (Flow::Success, 3));
        assert_eq!(consumer.consume(b"lo"), (Flow::Break, 0));
        assert_eq!(consumer.consume(b""), (Flow::Success, 0));
        assert_eq!(consumer.consumed(), 3);
        assert_eq!(&out, b"hel");
    }
}
