use crate::{
    CoreResult, RelayError, UpstreamErrorKind,
    stream::upstream::{ByteStream, classify_reqwest_error},
};

use std::{future::Future, panic::Location, time::Duration};

use error_location::ErrorLocation;
use futures::StreamExt;
use reqwest::{Client, redirect};
use tracing::debug;
use url::Url;

/// Transport that yields raw MJPEG bytes, reopened on every connection
/// attempt.
pub trait FrameSource: Send + Sync + 'static {
    /// Open a new connection and return its byte stream.
    fn connect(&self) -> impl Future<Output = CoreResult<ByteStream>> + Send;
}

/// HTTP MJPEG source, e.g. a camera's `/stream.mjpg`.
///
/// The URL comes from operator configuration and is not passed through the
/// SSRF guard.
pub struct HttpFrameSource {
    client: Client,
    url: Url,
}

impl HttpFrameSource {
    /// Source for `url` with the given connect deadline.
    #[track_caller]
    pub fn new(url: &str, connect_timeout: Duration) -> CoreResult<Self> {
        let url = Url::parse(url).map_err(|e| RelayError::InvalidUrl {
            reason: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(redirect::Policy::limited(3))
            .build()
            .map_err(|e| RelayError::upstream(UpstreamErrorKind::Connect, e.to_string()))?;

        Ok(Self { client, url })
    }

    /// The source URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl FrameSource for HttpFrameSource {
    fn connect(&self) -> impl Future<Output = CoreResult<ByteStream>> + Send {
        let request = self.client.get(self.url.clone());
        let url = self.url.clone();
        async move {
            let response = request
                .send()
                .await
                .map_err(|e| RelayError::upstream(classify_reqwest_error(&e), e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(RelayError::upstream(
                    UpstreamErrorKind::Status(status.as_u16()),
                    format!("camera source answered {status}"),
                ));
            }

            debug!(%url, %status, "Camera source connected");

            Ok(response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| RelayError::upstream(classify_reqwest_error(&e), e.to_string())))
                .boxed())
        }
    }
}
