mod demuxer;
mod multipart;
mod source;
mod supervisor;
mod upstream;

pub use {
    demuxer::{DEFAULT_MAX_FRAME_BUFFER, EOI, MjpegDemuxer, SOI, demux_stream},
    multipart::{MJPEG_BOUNDARY, encode_part, mjpeg_content_type},
    source::{FrameSource, HttpFrameSource},
    supervisor::{
        Action, ConnectionMachine, ConnectionState, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP,
        DEFAULT_MAX_FAILURES, StreamEvent, StreamSupervisor, SupervisorConfig, SupervisorHandle,
        backoff_delay,
    },
    upstream::{
        ByteStream, FetchConfig, FetchMethod, MAX_RELAY_CHUNK, UpstreamClient, UpstreamResponse,
        cap_chunks, retry_delay,
    },
};
