use bytes::{BufMut, Bytes, BytesMut};

/// Boundary token used by the local restream endpoint.
pub const MJPEG_BOUNDARY: &str = "FRAME";

/// `Content-Type` header value for a restreamed MJPEG response.
pub fn mjpeg_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}")
}

/// Wrap one JPEG frame as a multipart part.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}
