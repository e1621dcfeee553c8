//! MJPEG frame demultiplexer.
//!
//! Cameras deliver MJPEG as one endless byte stream, and transport chunk
//! boundaries have nothing to do with frame boundaries. The demuxer
//! accumulates bytes and cuts out every `SOI .. EOI` span it finds.

use crate::CoreResult;

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt, stream};
use tracing::{debug, warn};

/// JPEG start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Buffer ceiling before unframed input is discarded (2 MiB).
pub const DEFAULT_MAX_FRAME_BUFFER: usize = 2 * 1024 * 1024;

/// Push parser that turns arbitrary chunks into complete JPEG frames.
///
/// # Memory
///
/// The buffer never holds more than `max_buffer` bytes plus one chunk. When
/// it grows past the ceiling without yielding a frame (corrupt or non-JPEG
/// input) it is cleared and scanning resumes with the next chunk.
pub struct MjpegDemuxer {
    buffer: BytesMut,
    max_buffer: usize,
    /// Offset where the next EOI search resumes. Avoids rescanning a large
    /// partial frame on every small chunk.
    eoi_scan_from: usize,
    frames_emitted: u64,
    overflow_resets: u64,
}

impl MjpegDemuxer {
    /// Demuxer with the default buffer ceiling.
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_FRAME_BUFFER)
    }

    /// Demuxer with a custom buffer ceiling.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_buffer,
            eoi_scan_from: 0,
            frames_emitted: 0,
            overflow_resets: 0,
        }
    }

    /// Append bytes from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Cut the next complete frame out of the buffer, if one is available.
    ///
    /// Call repeatedly after each `push` until it returns `None`; a single
    /// chunk may complete several frames.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let Some(start) = find_marker(&self.buffer, &SOI, 0) else {
            // No frame in progress. Keep a trailing 0xFF, it may be the first
            // half of a start marker split across chunks.
            let keep = usize::from(self.buffer.last() == Some(&SOI[0]));
            let discard = self.buffer.len() - keep;
            self.buffer.advance(discard);
            self.eoi_scan_from = 0;
            return None;
        };

        if start > 0 {
            self.buffer.advance(start);
            self.eoi_scan_from = 0;
        }

        let scan_from = self.eoi_scan_from.max(SOI.len());
        if let Some(end) = find_marker(&self.buffer, &EOI, scan_from) {
            let frame = self.buffer.split_to(end + EOI.len()).freeze();
            self.eoi_scan_from = 0;
            self.frames_emitted += 1;
            return Some(frame);
        }

        if self.buffer.len() > self.max_buffer {
            warn!(
                buffered = self.buffer.len(),
                max_buffer = self.max_buffer,
                "No frame boundary within buffer ceiling, discarding"
            );
            self.buffer.clear();
            self.eoi_scan_from = 0;
            self.overflow_resets += 1;
            return None;
        }

        // Resume one byte early: the last byte may be the 0xFF of an EOI.
        self.eoi_scan_from = self.buffer.len().saturating_sub(1);
        None
    }

    /// Bytes currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Frames emitted so far.
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Times the buffer was discarded for exceeding the ceiling.
    pub fn overflow_resets(&self) -> u64 {
        self.overflow_resets
    }

    /// Drop all buffered bytes, e.g. before reading from a new connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.eoi_scan_from = 0;
    }
}

impl Default for MjpegDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + marker.len() {
        return None;
    }
    haystack[from..]
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|pos| pos + from)
}

/// Adapt a byte stream into a lazy stream of frames.
///
/// The result ends when the input ends, and ends after yielding the first
/// transport error. It never completes on its own while bytes keep coming.
pub fn demux_stream<S>(input: S, max_buffer: usize) -> impl Stream<Item = CoreResult<Bytes>> + Send
where
    S: Stream<Item = CoreResult<Bytes>> + Send + Unpin,
{
    let state = (input, MjpegDemuxer::with_max_buffer(max_buffer), false);

    stream::unfold(state, |(mut input, mut demuxer, finished)| async move {
        if finished {
            return None;
        }
        loop {
            if let Some(frame) = demuxer.next_frame() {
                return Some((Ok(frame), (input, demuxer, false)));
            }
            match input.next().await {
                Some(Ok(chunk)) => demuxer.push(&chunk),
                Some(Err(e)) => return Some((Err(e), (input, demuxer, true))),
                None => {
                    debug!(
                        frames = demuxer.frames_emitted(),
                        leftover = demuxer.buffered(),
                        "Byte stream ended"
                    );
                    return None;
                }
            }
        }
    })
}
