//! Send/receive buffers for the TCP-like transport (§4.4, §4.5).
//!
//! `SendBuffer` tracks three byte offsets into an append-only body:
//! `base_seq` (oldest unacknowledged byte), `next_seq` (next byte to send)
//! and `last_seq` (end of buffered data). `ReceiveBuffer` collects
//! out-of-order chunks and reports which byte ranges are already filled so
//! the connection can compute cumulative ACKs and gaps.

use std::ops::Range;

use crate::range;

/// Sender-side byte buffer (§4.4).
pub struct SendBuffer {
    data: Vec<u8>,
    base_seq: i64,
    next_seq: i64,
}

impl SendBuffer {
    pub fn new(base_seq: i64) -> Self {
        SendBuffer {
            data: Vec::new(),
            base_seq,
            next_seq: base_seq,
        }
    }

    pub fn base_seq(&self) -> i64 {
        self.base_seq
    }

    pub fn next_seq(&self) -> i64 {
        self.next_seq
    }

    pub fn last_seq(&self) -> i64 {
        self.base_seq + self.data.len() as i64
    }

    /// Append application bytes to the buffer, extending `last_seq`.
    pub fn put(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Number of unsent buffered bytes.
    pub fn unsent(&self) -> i64 {
        self.last_seq() - self.next_seq
    }

    /// Read up to `max_len` unsent bytes starting at `next_seq`, without
    /// advancing it; returns `(sequence, bytes)`.
    pub fn peek(&self, max_len: usize) -> (i64, Vec<u8>) {
        let start = (self.next_seq - self.base_seq) as usize;
        let end = (start + max_len).min(self.data.len());
        (self.next_seq, self.data[start..end].to_vec())
    }

    /// Advance `next_seq` by `n` bytes after a successful send.
    pub fn advance(&mut self, n: i64) {
        self.next_seq += n;
    }

    /// Acknowledge all bytes up to (not including) `ack`, sliding the
    /// window and dropping acknowledged bytes from the buffer. Rewinds
    /// `next_seq` if it had raced ahead of a lower cumulative ack (should
    /// not normally happen, but keeps the invariant `base_seq <= next_seq`).
    pub fn slide(&mut self, ack: i64) {
        if ack <= self.base_seq {
            return;
        }
        let advance = (ack - self.base_seq).min(self.data.len() as i64) as usize;
        self.data.drain(0..advance);
        self.base_seq += advance as i64;
        if self.next_seq < self.base_seq {
            self.next_seq = self.base_seq;
        }
    }

    /// Resend (retransmit) is just re-peeking from `base_seq`: roll
    /// `next_seq` back to the oldest unacknowledged byte.
    pub fn resend_from_base(&mut self) {
        self.next_seq = self.base_seq;
    }

    /// Treat the first `size` bytes past `base_seq` as already in flight
    /// without marking them newly sent, so the normal send loop doesn't
    /// re-emit a segment a fast retransmit already put on the wire.
    pub fn skip(&mut self, size: i64) {
        let target = self.base_seq + size;
        if self.next_seq < target {
            self.next_seq = target;
        }
    }

    /// Peek up to `max_len` bytes starting at an arbitrary already-sent
    /// `seq`, without moving `next_seq`. Used by fast retransmit, which
    /// resends only the presumed-lost segment rather than rewinding the
    /// whole window.
    pub fn peek_from(&self, seq: i64, max_len: usize) -> Vec<u8> {
        if seq < self.base_seq || seq > self.last_seq() {
            return Vec::new();
        }
        let start = (seq - self.base_seq) as usize;
        let end = (start + max_len).min(self.data.len());
        self.data[start..end].to_vec()
    }
}

/// A single out-of-order chunk received by [`ReceiveBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence: i64,
    pub body: Vec<u8>,
}

/// Receiver-side reassembly buffer (§4.5). Stores arbitrary out-of-order
/// chunks keyed by byte range and reports the covered ranges via
/// [`range::merge`], so the connection can compute the cumulative ACK
/// (the end of the contiguous range covering `base_seq`) and any gaps.
/// `put` discards bytes already delivered and trims a chunk's prefix
/// against `base_seq`, so stored chunks never straddle it.
#[derive(Default)]
pub struct ReceiveBuffer {
    chunks: Vec<Chunk>,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        ReceiveBuffer { chunks: Vec::new() }
    }

    /// Store a chunk, ignoring exact duplicates, bytes already delivered to
    /// the app (`sequence + body.len() <= base_seq`), and trimming the
    /// prefix of a chunk that straddles `base_seq`. After insertion, chunks
    /// are re-sorted and trimmed against each other so no two stored chunks
    /// overlap — a chunk can never straddle the delivered boundary and
    /// silently zero-fill part of [`ReceiveBuffer::get`]'s output.
    pub fn put(&mut self, sequence: i64, body: Vec<u8>, base_seq: i64) {
        if body.is_empty() {
            return;
        }
        let end = sequence + body.len() as i64;
        if end <= base_seq {
            return;
        }
        let (sequence, body) = if sequence < base_seq {
            let trim = (base_seq - sequence) as usize;
            (base_seq, body[trim..].to_vec())
        } else {
            (sequence, body)
        };
        if self.chunks.iter().any(|c| c.sequence == sequence && c.body == body) {
            return;
        }
        self.chunks.push(Chunk { sequence, body });
        self.normalize();
    }

    /// Re-sort stored chunks and trim each one's prefix against the
    /// coverage already established by earlier (lower-sequence) chunks, so
    /// overlapping chunks never straddle each other's boundary.
    fn normalize(&mut self) {
        self.chunks.sort_by_key(|c| c.sequence);
        let mut covered_until = i64::MIN;
        let mut result = Vec::with_capacity(self.chunks.len());
        for chunk in self.chunks.drain(..) {
            let mut sequence = chunk.sequence;
            let mut body = chunk.body;
            if sequence < covered_until {
                let trim = (covered_until - sequence) as usize;
                if trim >= body.len() {
                    continue;
                }
                body = body[trim..].to_vec();
                sequence = covered_until;
            }
            covered_until = covered_until.max(sequence + body.len() as i64);
            result.push(Chunk { sequence, body });
        }
        self.chunks = result;
    }

    /// Disjoint, sorted byte ranges covered by received chunks.
    pub fn get_ranges(&self) -> Vec<Range<i64>> {
        range::merge(self.chunks.iter().map(|c| c.sequence..c.sequence + c.body.len() as i64))
    }

    /// The cumulative ACK value: the end of the contiguous range covering
    /// `base_seq`, or `base_seq` itself if nothing contiguous has arrived
    /// yet.
    pub fn cumulative_ack(&self, base_seq: i64) -> i64 {
        self.get_ranges()
            .into_iter()
            .find(|r| r.contains(&base_seq))
            .map(|r| r.end.max(base_seq))
            .unwrap_or(base_seq)
    }

    /// Drain and return in-order bytes starting at `base_seq`, up to the
    /// first gap, removing the corresponding chunks.
    pub fn get(&mut self, base_seq: i64) -> Vec<u8> {
        let ack = self.cumulative_ack(base_seq);
        if ack <= base_seq {
            return Vec::new();
        }
        let mut out = vec![0u8; (ack - base_seq) as usize];
        self.chunks.retain(|c| {
            let start = c.sequence;
            let end = c.sequence + c.body.len() as i64;
            if start >= base_seq && end <= ack {
                let offset = (start - base_seq) as usize;
                out[offset..offset + c.body.len()].copy_from_slice(&c.body);
                false
            } else {
                true
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_buffer_peek_advance_slide() {
        let mut sb = SendBuffer::new(0);
        sb.put(b"hello world");
        let (seq, bytes) = sb.peek(5);
        assert_eq!(seq, 0);
        assert_eq!(bytes, b"hello");
        sb.advance(5);
        assert_eq!(sb.next_seq(), 5);
        sb.slide(5);
        assert_eq!(sb.base_seq(), 5);
        assert_eq!(sb.unsent(), 6);
    }

    #[test]
    fn send_buffer_resend_rewinds_next_seq() {
        let mut sb = SendBuffer::new(0);
        sb.put(b"abcdef");
        sb.advance(6);
        sb.resend_from_base();
        assert_eq!(sb.next_seq(), 0);
    }

    #[test]
    fn receive_buffer_cumulative_ack_stops_at_gap() {
        let mut rb = ReceiveBuffer::new();
        rb.put(0, b"abc".to_vec(), 0);
        rb.put(6, b"ghi".to_vec(), 0);
        assert_eq!(rb.cumulative_ack(0), 3);
        rb.put(3, b"def".to_vec(), 0);
        assert_eq!(rb.cumulative_ack(0), 9);
    }

    #[test]
    fn receive_buffer_get_drains_contiguous_prefix() {
        let mut rb = ReceiveBuffer::new();
        rb.put(0, b"abc".to_vec(), 0);
        rb.put(3, b"def".to_vec(), 0);
        rb.put(10, b"xyz".to_vec(), 0);
        let data = rb.get(0);
        assert_eq!(data, b"abcdef");
        // the gap-following chunk at 10 should remain
        assert_eq!(rb.get_ranges(), vec![10..13]);
    }

    #[test]
    fn receive_buffer_put_ignores_bytes_already_delivered() {
        let mut rb = ReceiveBuffer::new();
        // base_seq is 10: a retransmission of 0..10 is entirely stale.
        rb.put(0, b"0123456789".to_vec(), 10);
        assert!(rb.get_ranges().is_empty());
    }

    #[test]
    fn receive_buffer_put_trims_prefix_straddling_base_seq() {
        let mut rb = ReceiveBuffer::new();
        // base_seq is 5: only the "56789" tail of this retransmission is new.
        rb.put(0, b"0123456789".to_vec(), 5);
        assert_eq!(rb.get_ranges(), vec![5..10]);
        assert_eq!(rb.get(5), b"56789".to_vec());
    }

    #[test]
    fn receive_buffer_get_does_not_zero_fill_straddling_retransmission() {
        let mut rb = ReceiveBuffer::new();
        rb.put(0, b"abc".to_vec(), 0);
        assert_eq!(rb.get(0), b"abc".to_vec());
        // base_seq has advanced to 3. A retransmission overlapping the
        // already-delivered prefix must not corrupt the new bytes with
        // zero-fill for the part already accounted for.
        rb.put(0, b"abcdef".to_vec(), 3);
        assert_eq!(rb.get(3), b"def".to_vec());
    }

    #[test]
    fn receive_buffer_cumulative_ack_skips_stale_range_below_base_seq() {
        let mut rb = ReceiveBuffer::new();
        rb.put(0, b"abc".to_vec(), 0);
        assert_eq!(rb.get(0), b"abc".to_vec());
        // base_seq is now 3; a gap-filling chunk straddles it.
        rb.put(2, b"cdefgh".to_vec(), 3);
        assert_eq!(rb.cumulative_ack(3), 9);
    }
}
