//! In-memory fakes for driving the session without a shell or network.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use shell_bridge_core::{
    CollaboratorError, MetricsSnapshot, OutputPoll, ScreenshotProducer, TelemetryProducer,
    Terminal, TerminalError,
};
use shell_bridge_transport::{
    ChannelError, ConnectError, ConnectStage, Connection, Connector, FrameSink, FrameSource,
    Message,
};
use tokio::{sync::mpsc, time::Instant};

/// Fake terminal whose output is scripted and whose input is recorded.
#[derive(Default)]
pub struct FakeTerminal {
    input: Mutex<Vec<u8>>,
    output: Mutex<VecDeque<Vec<u8>>>,
    size: Mutex<(u16, u16)>,
    resizes: AtomicUsize,
    exited: AtomicBool,
    terminated: AtomicBool,
}

impl FakeTerminal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            size: Mutex::new((80, 24)),
            ..Self::default()
        })
    }

    /// Queue bytes as if the shell printed them.
    pub fn push_output(&self, data: &[u8]) {
        self.output.lock().unwrap().push_back(data.to_vec());
    }

    /// Simulate the shell process exiting.
    pub fn exit(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    /// Everything written to the shell so far.
    pub fn input(&self) -> Vec<u8> {
        self.input.lock().unwrap().clone()
    }

    pub fn resize_calls(&self) -> usize {
        self.resizes.load(Ordering::SeqCst)
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Terminal for FakeTerminal {
    fn write_input(&self, data: &[u8]) -> Result<(), TerminalError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(TerminalError::Closed);
        }
        self.input.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        self.resizes.fetch_add(1, Ordering::SeqCst);
        if cols == 0 || rows == 0 {
            return Err(TerminalError::ResizeFailed("zero geometry".to_string()));
        }
        *self.size.lock().unwrap() = (cols, rows);
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap()
    }

    /// Reports end of stream once the shell is gone and its output drained.
    fn poll_output(&self) -> OutputPoll {
        match self.output.lock().unwrap().pop_front() {
            Some(chunk) => OutputPoll::Data(chunk),
            None if self.is_alive() => OutputPoll::Empty,
            None => OutputPoll::Closed,
        }
    }

    fn is_alive(&self) -> bool {
        !self.exited.load(Ordering::SeqCst) && !self.terminated.load(Ordering::SeqCst)
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Sink that records every frame, optionally failing after `n` sends.
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<String>>>,
    fail_after: Option<usize>,
    closed: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(sends: usize) -> Self {
        Self {
            fail_after: Some(sends),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| Message::decode(f).expect("frame is a whole message"))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        let mut frames = self.frames.lock().unwrap();
        if self.fail_after.is_some_and(|n| frames.len() >= n) {
            return Err(ChannelError::SendFailed("broken pipe".to_string()));
        }
        frames.push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Sink whose peer never acknowledges a write or a close.
#[derive(Clone, Default)]
pub struct StalledSink {
    writes: Arc<AtomicUsize>,
    close_started: Arc<AtomicBool>,
}

impl StalledSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes_started(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn close_started(&self) -> bool {
        self.close_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for StalledSink {
    async fn send_text(&mut self, _text: String) -> Result<(), ChannelError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn close(&mut self) {
        self.close_started.store(true, Ordering::SeqCst);
        std::future::pending::<()>().await;
    }
}

/// Source fed from a test-held sender. Dropping the sender closes it.
pub struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<Result<String, ChannelError>>,
}

impl ScriptedSource {
    pub fn new() -> (mpsc::UnboundedSender<Result<String, ChannelError>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_text(&mut self) -> Result<String, ChannelError> {
        self.rx.recv().await.unwrap_or(Err(ChannelError::Closed))
    }
}

/// Connector that plays back a script of outcomes, then refuses.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Option<Connection>>>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue one failing attempt.
    pub fn fail(&self) {
        self.script.lock().unwrap().push_back(None);
    }

    /// Queue one successful attempt.
    pub fn succeed(&self, connection: Connection) {
        self.script.lock().unwrap().push_back(Some(connection));
    }

    /// When each attempt was made.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Connection, ConnectError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let next = self.script.lock().unwrap().pop_front().flatten();
        next.ok_or_else(|| ConnectError::new(ConnectStage::Connect, "connection refused"))
    }
}

pub struct FixedTelemetry {
    pub snapshot: MetricsSnapshot,
    pub samples: AtomicUsize,
}

impl FixedTelemetry {
    pub fn new(snapshot: MetricsSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            samples: AtomicUsize::new(0),
        })
    }
}

impl TelemetryProducer for FixedTelemetry {
    fn sample(&self) -> MetricsSnapshot {
        self.samples.fetch_add(1, Ordering::SeqCst);
        self.snapshot
    }
}

pub struct StaticScreenshot(pub Option<Vec<u8>>);

impl ScreenshotProducer for StaticScreenshot {
    fn capture(&self) -> Result<Vec<u8>, CollaboratorError> {
        self.0.clone().ok_or(CollaboratorError::Unsupported)
    }
}
