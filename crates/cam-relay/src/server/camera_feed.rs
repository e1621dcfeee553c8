use cam_relay_core::{
    ConnectionState, FrameSource, StreamSupervisor, SupervisorConfig, SupervisorHandle,
};

use std::sync::Arc;

use bytes::Bytes;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info};

/// Frames buffered per viewer before the slowest one starts skipping.
pub const FEED_CAPACITY: usize = 16;

/// One supervised camera connection fanned out to any number of viewers.
#[derive(Clone)]
pub struct CameraFeed {
    frames: broadcast::Sender<Bytes>,
    supervisor: Arc<SupervisorHandle>,
}

impl CameraFeed {
    /// Start supervising `source` and pump its frames into the fan-out.
    /// The returned task ends once the supervisor stops.
    pub fn spawn<S: FrameSource>(source: S, config: SupervisorConfig) -> (Self, JoinHandle<()>) {
        let (supervisor, mut frame_rx) = StreamSupervisor::spawn(source, config);
        let (frames, _) = broadcast::channel(FEED_CAPACITY);

        let sender = frames.clone();
        let pump = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                // No viewers is not an error; the frame is simply dropped.
                let _ = sender.send(frame);
            }
            debug!("Camera feed pump finished");
        });

        let feed = Self {
            frames,
            supervisor: Arc::new(supervisor),
        };
        (feed, pump)
    }

    /// Subscribe a new viewer. A feed that gave up is retried on demand.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        if self.state() == ConnectionState::FailedPermanently {
            info!("Viewer connected to a failed feed, forcing reconnect");
            self.supervisor.force_reconnect();
        }
        self.frames.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Number of connected viewers.
    pub fn viewers(&self) -> usize {
        self.frames.receiver_count()
    }

    /// Stop the supervisor. Viewers see the stream end.
    pub fn disconnect(&self) {
        self.supervisor.disconnect();
    }
}
