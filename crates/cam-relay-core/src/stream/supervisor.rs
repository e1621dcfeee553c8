//! Reconnection supervisor for a single camera connection.
//!
//! The state machine ([`ConnectionMachine`]) is pure: it maps named events
//! to the next state and an action. The driver ([`StreamSupervisor`]) owns
//! one control loop per connection that performs those actions (connect,
//! wait out a backoff, read frames) and feeds the results back as events.
//! Nothing is captured across attempts except the machine itself.

use crate::{
    CoreResult,
    stream::{demuxer::demux_stream, source::FrameSource, upstream::ByteStream},
};

use std::{
    future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Sleep, error::Elapsed, sleep, timeout},
};
use tracing::{debug, info, warn};

/// Consecutive failures tolerated before giving up.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// First reconnect delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Reconnect delay ceiling.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Connection lifecycle as seen by a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, not started.
    Idle,
    /// Opening the transport.
    Connecting,
    /// Transport open, frames flowing.
    Streaming,
    /// Waiting out a backoff before the next attempt.
    Reconnecting,
    /// Gave up after too many consecutive failures. Only a forced reconnect
    /// leaves this state.
    FailedPermanently,
    /// Disconnected by the viewer. Terminal.
    Ended,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Viewer opened the stream.
    Start,
    /// Transport connected.
    Connected,
    /// A complete frame was demultiplexed.
    Frame,
    /// Connect or read failed, or the transport ended.
    Error,
    /// No bytes within the read deadline.
    Timeout,
    /// Backoff timer fired.
    BackoffElapsed,
    /// Viewer asked for an immediate retry.
    ForceReconnect,
    /// Viewer disconnected.
    Cancel,
}

/// What the driver must do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing new; keep waiting on the current phase.
    None,
    /// Drop any current transport and connect now.
    Connect,
    /// Drop the transport and wait this long before connecting.
    ScheduleReconnect(Duration),
    /// Drop the transport and wait for a forced reconnect.
    GiveUp,
    /// Tear everything down.
    Stop,
}

/// Supervisor tuning.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Consecutive failures before `FailedPermanently`.
    pub max_failures: u32,
    /// First reconnect delay.
    pub backoff_base: Duration,
    /// Reconnect delay ceiling.
    pub backoff_cap: Duration,
    /// Longest silence tolerated on an open transport.
    pub read_timeout: Duration,
    /// Demuxer buffer ceiling.
    pub max_frame_buffer: usize,
    /// Frames queued for the viewer before new ones are dropped.
    pub frame_queue: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            read_timeout: Duration::from_secs(10),
            max_frame_buffer: crate::stream::DEFAULT_MAX_FRAME_BUFFER,
            frame_queue: 8,
        }
    }
}

/// Exponential backoff: `base * 2^(failures - 1)`, capped.
pub fn backoff_delay(failures: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(cap)
}

/// Pure connection state machine.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    failures: u32,
    config: SupervisorConfig,
}

impl ConnectionMachine {
    /// Machine in `Idle`.
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            failures: 0,
            config,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last frame or forced reconnect.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Apply one event.
    pub fn handle(&mut self, event: StreamEvent) -> Action {
        use ConnectionState::*;

        if self.state == Ended {
            return Action::None;
        }

        match event {
            StreamEvent::Cancel => {
                self.state = Ended;
                Action::Stop
            }
            StreamEvent::ForceReconnect => {
                self.failures = 0;
                self.state = Connecting;
                Action::Connect
            }
            StreamEvent::Start => match self.state {
                Idle => {
                    self.state = Connecting;
                    Action::Connect
                }
                _ => Action::None,
            },
            StreamEvent::Connected => match self.state {
                Connecting => {
                    self.state = Streaming;
                    Action::None
                }
                _ => Action::None,
            },
            StreamEvent::Frame => {
                if self.state == Streaming {
                    self.failures = 0;
                }
                Action::None
            }
            StreamEvent::Error | StreamEvent::Timeout => match self.state {
                Connecting | Streaming => {
                    self.failures += 1;
                    if self.failures >= self.config.max_failures {
                        self.state = FailedPermanently;
                        Action::GiveUp
                    } else {
                        self.state = Reconnecting;
                        Action::ScheduleReconnect(backoff_delay(
                            self.failures,
                            self.config.backoff_base,
                            self.config.backoff_cap,
                        ))
                    }
                }
                _ => Action::None,
            },
            StreamEvent::BackoffElapsed => match self.state {
                Reconnecting => {
                    self.state = Connecting;
                    Action::Connect
                }
                _ => Action::None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Control {
    ForceReconnect,
    Disconnect,
}

/// Viewer-side handle to a running supervisor.
///
/// Dropping the handle disconnects.
pub struct SupervisorHandle {
    alive: Arc<AtomicBool>,
    control_tx: mpsc::UnboundedSender<Control>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Latest published state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver for state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether the supervisor still accepts work.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Reset the failure counter and connect immediately, abandoning any
    /// pending backoff or in-flight read.
    pub fn force_reconnect(&self) {
        if self.is_alive() {
            let _ = self.control_tx.send(Control::ForceReconnect);
        }
    }

    /// Stop for good. No frame is delivered and no reconnect is attempted
    /// after this returns.
    pub fn disconnect(&self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.control_tx.send(Control::Disconnect);
    }

    /// Disconnect and wait for the control loop to exit.
    pub async fn shutdown(mut self) {
        self.disconnect();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = ?e, "Supervisor task did not exit cleanly");
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Spawns one control loop per connection.
pub struct StreamSupervisor;

impl StreamSupervisor {
    /// Start supervising `source`. Returns the control handle and the frame
    /// receiver. When the viewer falls behind, new frames are dropped rather
    /// than queued without bound.
    pub fn spawn<S: FrameSource>(
        source: S,
        config: SupervisorConfig,
    ) -> (SupervisorHandle, mpsc::Receiver<Bytes>) {
        let alive = Arc::new(AtomicBool::new(true));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue.max(1));

        let driver = Driver {
            source,
            config,
            machine: ConnectionMachine::new(config),
            alive: Arc::clone(&alive),
            control_rx,
            state_tx,
            frame_tx,
        };
        let task = tokio::spawn(driver.run());

        let handle = SupervisorHandle {
            alive,
            control_tx,
            state_rx,
            task: Some(task),
        };

        (handle, frame_rx)
    }
}

type FrameStream = Pin<Box<dyn Stream<Item = CoreResult<Bytes>> + Send>>;

type ReadOutcome = Result<Option<CoreResult<Bytes>>, Elapsed>;

enum Wake {
    Control(Option<Control>),
    BackoffElapsed,
    Read(ReadOutcome),
}

async fn wait_backoff(timer: Option<&mut Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => future::pending().await,
    }
}

async fn read_next(frames: Option<&mut FrameStream>, limit: Duration) -> ReadOutcome {
    match frames {
        Some(frames) => timeout(limit, frames.next()).await,
        None => future::pending().await,
    }
}

struct Driver<S> {
    source: S,
    config: SupervisorConfig,
    machine: ConnectionMachine,
    alive: Arc<AtomicBool>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    state_tx: watch::Sender<ConnectionState>,
    frame_tx: mpsc::Sender<Bytes>,
}

impl<S: FrameSource> Driver<S> {
    async fn run(mut self) {
        let mut frames: Option<FrameStream> = None;
        let mut backoff: Option<Pin<Box<Sleep>>> = None;
        let mut action = self.machine.handle(StreamEvent::Start);

        loop {
            self.publish();

            match action {
                Action::Stop => break,
                Action::Connect => {
                    frames = None;
                    backoff = None;
                    action = match self.connect().await {
                        Ok(bytes) => {
                            frames = Some(Box::pin(demux_stream(bytes, self.config.max_frame_buffer)));
                            self.machine.handle(StreamEvent::Connected)
                        }
                        Err(event) => self.machine.handle(event),
                    };
                    continue;
                }
                Action::ScheduleReconnect(delay) => {
                    frames = None;
                    if !self.is_alive() {
                        action = self.machine.handle(StreamEvent::Cancel);
                        continue;
                    }
                    info!(
                        delay_ms = delay.as_millis(),
                        failures = self.machine.failures(),
                        "Reconnect scheduled"
                    );
                    backoff = Some(Box::pin(sleep(delay)));
                }
                Action::GiveUp => {
                    frames = None;
                    backoff = None;
                    warn!(failures = self.machine.failures(), "Giving up on camera stream");
                }
                Action::None => {}
            }

            let read_timeout = self.config.read_timeout;
            let wake = tokio::select! {
                biased;
                control = self.control_rx.recv() => Wake::Control(control),
                _ = wait_backoff(backoff.as_mut()) => Wake::BackoffElapsed,
                item = read_next(frames.as_mut(), read_timeout) => Wake::Read(item),
            };

            let event = match wake {
                Wake::Control(Some(Control::ForceReconnect)) => {
                    info!("Forced reconnect");
                    StreamEvent::ForceReconnect
                }
                Wake::Control(Some(Control::Disconnect)) | Wake::Control(None) => StreamEvent::Cancel,
                Wake::BackoffElapsed => {
                    backoff = None;
                    StreamEvent::BackoffElapsed
                }
                Wake::Read(Err(_)) => {
                    warn!(timeout_ms = read_timeout.as_millis(), "Camera stream stalled");
                    StreamEvent::Timeout
                }
                Wake::Read(Ok(Some(Ok(frame)))) => self.emit(frame),
                Wake::Read(Ok(Some(Err(e)))) => {
                    warn!(error = %e, "Camera stream read failed");
                    StreamEvent::Error
                }
                Wake::Read(Ok(None)) => {
                    warn!("Camera stream ended unexpectedly");
                    StreamEvent::Error
                }
            };

            action = self.machine.handle(event);
        }

        self.alive.store(false, Ordering::Release);
        self.publish();
        debug!("Supervisor stopped");
    }

    /// Connect, abandoning the attempt if the viewer cancels or forces a
    /// fresh one meanwhile.
    async fn connect(&mut self) -> Result<ByteStream, StreamEvent> {
        if !self.is_alive() {
            return Err(StreamEvent::Cancel);
        }

        tokio::select! {
            biased;
            control = self.control_rx.recv() => match control {
                Some(Control::ForceReconnect) => Err(StreamEvent::ForceReconnect),
                Some(Control::Disconnect) | None => Err(StreamEvent::Cancel),
            },
            result = self.source.connect() => match result {
                Ok(bytes) => {
                    info!("Camera stream connected");
                    Ok(bytes)
                }
                Err(e) => {
                    warn!(error = %e, "Camera stream connect failed");
                    Err(StreamEvent::Error)
                }
            },
        }
    }

    fn emit(&self, frame: Bytes) -> StreamEvent {
        if !self.is_alive() {
            return StreamEvent::Cancel;
        }
        match self.frame_tx.try_send(frame) {
            Ok(()) => StreamEvent::Frame,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Viewer behind, frame dropped");
                StreamEvent::Frame
            }
            Err(mpsc::error::TrySendError::Closed(_)) => StreamEvent::Cancel,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn publish(&self) {
        self.state_tx.send_if_modified(|state| {
            let next = self.machine.state();
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }
}
