use crate::server::CameraFeed;

use cam_relay_core::{
    ByteStream, ConnectionState, CoreResult, EOI, FrameSource, SOI, SupervisorConfig,
};

use std::{future::Future, time::Duration};

use bytes::Bytes;
use futures::{StreamExt, stream};
use tokio::time::timeout;

/// Emits the same JPEG every `every` until dropped.
pub(crate) struct TickingSource {
    pub(crate) every: Duration,
}

pub(crate) fn jpeg() -> Bytes {
    let mut frame = SOI.to_vec();
    frame.extend_from_slice(b"pixels");
    frame.extend_from_slice(&EOI);
    Bytes::from(frame)
}

impl FrameSource for TickingSource {
    fn connect(&self) -> impl Future<Output = CoreResult<ByteStream>> + Send {
        let every = self.every;
        let frames = stream::unfold((), move |()| async move {
            tokio::time::sleep(every).await;
            Some((Ok(jpeg()), ()))
        })
        .boxed();
        async move { Ok(frames) }
    }
}

/// WHAT: Every subscriber receives demultiplexed frames
/// WHY: The encoder and browser viewers share one camera connection
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_running_feed_when_subscribing_then_frames_fan_out() {
    // Given
    let source = TickingSource {
        every: Duration::from_millis(10),
    };
    let (feed, pump) = CameraFeed::spawn(source, SupervisorConfig::default());
    let mut first = feed.subscribe();
    let mut second = feed.subscribe();

    // When
    let a = timeout(Duration::from_secs(5), first.recv()).await.unwrap().unwrap();
    let b = timeout(Duration::from_secs(5), second.recv()).await.unwrap().unwrap();

    // Then
    assert_eq!(a, jpeg());
    assert_eq!(b, jpeg());
    assert_eq!(feed.viewers(), 2);
    assert_eq!(feed.state(), ConnectionState::Streaming);

    feed.disconnect();
    assert!(timeout(Duration::from_secs(5), pump).await.is_ok());
}

/// WHAT: Disconnecting ends the stream for viewers
/// WHY: Shutdown must not leave restream responses hanging
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_feed_when_disconnected_then_viewers_see_end() {
    // Given
    let source = TickingSource {
        every: Duration::from_millis(10),
    };
    let (feed, pump) = CameraFeed::spawn(source, SupervisorConfig::default());
    let mut viewer = feed.subscribe();
    timeout(Duration::from_secs(5), viewer.recv()).await.unwrap().unwrap();

    // When
    feed.disconnect();
    timeout(Duration::from_secs(5), pump).await.unwrap().unwrap();
    drop(feed);

    // Then: Buffered frames drain, then the channel reports closed
    let ended = timeout(Duration::from_secs(5), async {
        loop {
            if let Err(tokio::sync::broadcast::error::RecvError::Closed) = viewer.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}
