use crate::{CoreResult, EOI, MjpegDemuxer, RelayError, SOI, UpstreamErrorKind, demux_stream};

use bytes::Bytes;
use futures::{StreamExt, stream};

fn jpeg(payload: &[u8]) -> Vec<u8> {
    let mut frame = SOI.to_vec();
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&EOI);
    frame
}

fn drain(demuxer: &mut MjpegDemuxer) -> Vec<Bytes> {
    std::iter::from_fn(|| demuxer.next_frame()).collect()
}

/// WHAT: Frames surrounded by padding survive one-byte chunking
/// WHY: Transport chunk boundaries are unrelated to frame boundaries
#[test]
fn given_padded_frames_when_fed_one_byte_at_a_time_then_all_frames_in_order() {
    // Given: Three frames with multipart headers between them
    let frames = [jpeg(b"first"), jpeg(b"second frame"), jpeg(&[0x00, 0xFF, 0x01, 0xFF])];
    let mut wire = b"--FRAME\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
    for frame in &frames {
        wire.extend_from_slice(frame);
        wire.extend_from_slice(b"\r\n--FRAME\r\nContent-Type: image/jpeg\r\n\r\n");
    }
    let mut demuxer = MjpegDemuxer::new();

    // When
    let mut out = Vec::new();
    for byte in &wire {
        demuxer.push(std::slice::from_ref(byte));
        out.extend(drain(&mut demuxer));
    }

    // Then
    assert_eq!(out.len(), frames.len());
    for (got, want) in out.iter().zip(frames.iter()) {
        assert_eq!(got.as_ref(), want.as_slice());
    }
    assert_eq!(demuxer.frames_emitted(), 3);
}

/// WHAT: One chunk holding several frames yields them all
/// WHY: Fast cameras deliver many small frames per read
#[test]
fn given_chunk_with_many_frames_when_draining_then_each_frame_emitted() {
    // Given
    let mut chunk = Vec::new();
    for i in 0..5u8 {
        chunk.extend_from_slice(&jpeg(&[i; 10]));
    }
    let mut demuxer = MjpegDemuxer::new();

    // When
    demuxer.push(&chunk);
    let frames = drain(&mut demuxer);

    // Then
    assert_eq!(frames.len(), 5);
    assert_eq!(frames[4][2], 4);
    assert_eq!(demuxer.buffered(), 0);
}

/// WHAT: A buffer past its ceiling is discarded and parsing recovers
/// WHY: Corrupt input must not grow memory
#[test]
fn given_unterminated_frame_beyond_ceiling_when_parsing_then_reset_and_recover() {
    // Given: A 64-byte ceiling and a start marker followed by junk
    let mut demuxer = MjpegDemuxer::with_max_buffer(64);
    let mut junk = SOI.to_vec();
    junk.extend_from_slice(&[0x11; 100]);

    // When
    demuxer.push(&junk);
    let overflowed = drain(&mut demuxer);
    demuxer.push(&jpeg(b"ok"));
    let recovered = drain(&mut demuxer);

    // Then
    assert!(overflowed.is_empty());
    assert_eq!(demuxer.overflow_resets(), 1);
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].as_ref(), jpeg(b"ok").as_slice());
}

/// WHAT: Bytes before any start marker are dropped, except a split marker
/// WHY: The buffer must stay small while waiting for the first frame
#[test]
fn given_noise_ending_in_marker_half_when_parsing_then_half_kept() {
    // Given
    let mut demuxer = MjpegDemuxer::new();

    // When: Noise whose last byte is the first half of SOI
    demuxer.push(&[0x01, 0x02, 0x03, 0xFF]);
    let none = demuxer.next_frame();
    demuxer.push(&[0xD8, b'x', 0xFF, 0xD9]);
    let frame = demuxer.next_frame();

    // Then
    assert!(none.is_none());
    assert_eq!(frame.as_deref(), Some(&[0xFF, 0xD8, b'x', 0xFF, 0xD9][..]));
}

/// WHAT: The frame stream adapter yields frames then ends after an error
/// WHY: The supervisor treats the error as a failed connection
#[tokio::test]
async fn given_byte_stream_with_error_when_demuxing_then_frames_then_error_then_end() {
    // Given
    let mut whole = jpeg(b"a");
    whole.extend_from_slice(&jpeg(b"b"));
    let (left, right) = whole.split_at(3);
    let chunks: Vec<CoreResult<Bytes>> = vec![
        Ok(Bytes::copy_from_slice(left)),
        Ok(Bytes::copy_from_slice(right)),
        Err(RelayError::upstream(UpstreamErrorKind::Reset, "gone")),
        Ok(Bytes::from(jpeg(b"never"))),
    ];

    // When
    let items: Vec<CoreResult<Bytes>> = demux_stream(stream::iter(chunks), 1024).collect().await;

    // Then
    assert_eq!(items.len(), 3);
    assert!(items[0].is_ok());
    assert!(items[1].is_ok());
    assert!(items[2].is_err());
}
