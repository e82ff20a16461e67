use crate::config::SessionConfig;
use crate::correlator::Correlator;
use crate::error::{Result, YeelightError};
use crate::event::{DeviceEvent, EventSender};
use crate::lock;
use crate::protocol::{Command, CommandResult, Notification, WireMessage};
use crate::sync::{apply_notification, apply_properties, CORE_PROPERTIES};
use crate::types::{Device, DeviceId, Status};
use serde_json::Value;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

/// Lines buffered between the reader worker and the processing loop
const READ_QUEUE: usize = 64;

/// Longest line accepted from a device
const MAX_LINE: usize = 64 * 1024;

/// Consecutive socket errors after which the reader treats the stream as closed
const MAX_READ_FAILURES: usize = 8;

/// How long `close` waits for the processing loop before aborting it
const STOP_GRACE: Duration = Duration::from_millis(500);

/// What the reader worker hands to the processing loop
#[derive(Debug)]
enum ReadUnit {
    Line(String),
    /// Read or decode failure; reading may continue
    Failed(io::Error),
    /// End of stream
    Closed,
}

/// Why a processing loop cycle woke up
enum Wake {
    Stop,
    Reattached,
    WriteFailed,
    Read(Option<ReadUnit>),
    Refresh,
    HeartbeatExpired,
}

/// Heartbeat query in flight
struct Heartbeat {
    id: u32,
    deadline: Instant,
}

struct LoopHandle {
    stop_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    device: Mutex<Device>,
    config: SessionConfig,
    correlator: Correlator,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    /// Serializes connects so two reconnects never race
    connecting: tokio::sync::Mutex<()>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// Reader attached by the last connect, not yet picked up by the loop
    fresh_reader: Mutex<Option<mpsc::Receiver<ReadUnit>>>,
    reattached: Notify,
    /// Raised by a failed write so the processing loop reconnects
    write_failed: Notify,
    processing: Mutex<Option<LoopHandle>>,
}

/// Live connection and protocol state machine for one device
///
/// A `Session` is cheap to clone; clones share the same connection.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use yeelight_lan::{event_channel, Session};
///
/// # async fn run(device: yeelight_lan::Device) -> yeelight_lan::Result<()> {
/// let (events, mut rx) = event_channel();
/// let session = Session::new(device);
/// session.listen(events).await?;
///
/// let id = session.toggle().await?;
/// let result = session.wait_result(id, Duration::from_secs(2)).await?;
/// println!("toggle answered: {:?}", result);
///
/// while let Some(event) = rx.recv().await {
///     println!("{:?}", event);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create a session for a discovered device with default timings
    pub fn new(device: Device) -> Self {
        Self::with_config(device, SessionConfig::default())
    }

    /// Create a session with explicit timings
    pub fn with_config(device: Device, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                device: Mutex::new(device),
                config,
                correlator: Correlator::new(),
                writer: tokio::sync::Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
                reader_task: Mutex::new(None),
                fresh_reader: Mutex::new(None),
                reattached: Notify::new(),
                write_failed: Notify::new(),
                processing: Mutex::new(None),
            }),
        }
    }

    /// Get the device id
    pub fn id(&self) -> DeviceId {
        lock(&self.inner.device).id.clone()
    }

    /// Get a snapshot of the device state
    pub fn device(&self) -> Device {
        lock(&self.inner.device).clone()
    }

    /// Get the connectivity status
    pub fn status(&self) -> Status {
        lock(&self.inner.device).status
    }

    /// Get the session's timings
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Number of sent commands still waiting for a result
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Check whether a stream to the device is open
    pub async fn is_connected(&self) -> bool {
        self.inner.writer.lock().await.is_some()
    }

    /// Check whether the processing loop is running
    pub fn is_listening(&self) -> bool {
        lock(&self.inner.processing)
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    fn set_status(&self, status: Status) {
        lock(&self.inner.device).status = status;
    }

    fn touch(&self) {
        lock(&self.inner.device).last_seen = Some(std::time::Instant::now());
    }

    /// Open a stream to the device, replacing any prior one
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.connecting.lock().await;

        if let Err(e) = self.release().await {
            tracing::debug!("Error closing previous stream: {}", e);
        }

        let (id, address) = {
            let mut device = lock(&self.inner.device);
            device.status = Status::Connecting;
            (device.id.clone(), device.address.clone())
        };
        tracing::info!("Connecting to {} at {}", id, address);

        let stream = match timeout(self.inner.config.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_status(Status::Offline);
                return Err(e.into());
            }
            Err(_) => {
                self.set_status(Status::Offline);
                return Err(YeelightError::Timeout);
            }
        };

        let (read_half, write_half) = stream.into_split();
        *self.inner.writer.lock().await = Some(write_half);

        // Publish the new reader before the old one goes away
        let (tx, rx) = mpsc::channel(READ_QUEUE);
        *lock(&self.inner.fresh_reader) = Some(rx);
        let task = tokio::spawn(read_lines(read_half, tx));
        let previous = lock(&self.inner.reader_task).replace(task);
        if let Some(old) = previous {
            old.abort();
        }
        self.inner.reattached.notify_one();

        {
            let mut device = lock(&self.inner.device);
            device.status = Status::Online;
            device.last_seen = Some(std::time::Instant::now());
        }
        tracing::info!("Connected to {}", id);
        Ok(())
    }

    /// Drop the reader and shut the write half down
    async fn release(&self) -> Result<()> {
        let task = lock(&self.inner.reader_task).take();
        if let Some(task) = task {
            task.abort();
        }
        lock(&self.inner.fresh_reader).take();

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(())
    }

    /// Stop the processing loop and release the stream.
    ///
    /// Calling this on a closed session is harmless. An error from shutting the
    /// socket down is returned, but the session is `Offline` either way.
    pub async fn close(&self) -> Result<()> {
        self.stop_processing().await;
        let released = self.release().await;
        self.inner.correlator.clear();
        self.set_status(Status::Offline);
        tracing::info!("Closed session for {}", self.id());
        released
    }

    /// Stop the processing loop, returning whether one had been started
    async fn stop_processing(&self) -> bool {
        let handle = lock(&self.inner.processing).take();
        let Some(LoopHandle { stop_tx, mut task }) = handle else {
            return false;
        };

        let _ = stop_tx.send(());
        if timeout(STOP_GRACE, &mut task).await.is_err() {
            tracing::warn!("Processing loop did not stop in time, aborting");
            task.abort();
        }
        true
    }

    /// Connect if needed and start the processing loop.
    ///
    /// Every result and notification read from the device is forwarded to
    /// `events` once. A loop already running for this session is replaced.
    pub async fn listen(&self, events: EventSender) -> Result<()> {
        // The previous loop took the reader with it
        let restarted = self.stop_processing().await;
        if restarted || !self.is_connected().await {
            self.connect().await?;
        }

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let session = self.clone();
        let task = tokio::spawn(async move { session.run(events, stop_rx).await });
        *lock(&self.inner.processing) = Some(LoopHandle { stop_tx, task });
        Ok(())
    }

    /// Send a command without waiting for its result.
    ///
    /// Returns the request id to pass to [`wait_result`](Self::wait_result).
    /// A failed write drops the stream and triggers one managed reconnect: the
    /// processing loop runs it when listening, otherwise it happens here before
    /// the write error is returned.
    pub async fn send_command(&self, method: &str, params: Vec<Value>) -> Result<u32> {
        if !lock(&self.inner.device).supports(method) {
            return Err(YeelightError::UnsupportedCommand(method.to_string()));
        }

        match self.write_command(method, params).await {
            Err(YeelightError::Io(e)) => {
                tracing::warn!("Write to {} failed: {}", self.id(), e);
                if self.is_listening() {
                    self.inner.write_failed.notify_one();
                } else {
                    self.managed_reconnect("write failed").await;
                }
                Err(YeelightError::Io(e))
            }
            other => other,
        }
    }

    /// Wait up to `limit` for the result of a sent command
    pub async fn wait_result(&self, id: u32, limit: Duration) -> Result<CommandResult> {
        self.inner.correlator.wait(id, limit).await
    }

    /// Send a command and wait for its result; an error body becomes [`YeelightError::Device`]
    pub async fn call(&self, method: &str, params: Vec<Value>, limit: Duration) -> Result<CommandResult> {
        let id = self.send_command(method, params).await?;
        self.wait_result(id, limit).await?.into_result()
    }

    async fn write_command(&self, method: &str, params: Vec<Value>) -> Result<u32> {
        let mut writer = self.inner.writer.lock().await;
        let stream = writer.as_mut().ok_or(YeelightError::NotConnected)?;

        let correlator = &self.inner.correlator;
        correlator.prune(self.inner.config.result_retention);

        let id = correlator.next_id();
        let frame = Command::new(id, method, params.clone()).to_frame()?;
        correlator.register(id, method, params);

        tracing::debug!("Sending: {}", String::from_utf8_lossy(&frame).trim_end());
        if let Err(e) = stream.write_all(&frame).await {
            correlator.forget(id);
            *writer = None;
            return Err(e.into());
        }
        Ok(id)
    }

    /// Processing loop: the single consumer of the reader's output
    async fn run(self, events: EventSender, mut stop_rx: broadcast::Receiver<()>) {
        let device_id = self.id();
        let interval = self.inner.config.refresh_interval;
        let mut reader: Option<mpsc::Receiver<ReadUnit>> = None;
        let mut refresh_at = Instant::now() + interval;
        let mut heartbeat: Option<Heartbeat> = None;

        tracing::debug!("Processing loop started for {}", device_id);

        loop {
            let fresh = lock(&self.inner.fresh_reader).take();
            if let Some(fresh) = fresh {
                reader = Some(fresh);
                refresh_at = Instant::now() + interval;
            }

            let heartbeat_deadline = heartbeat.as_ref().map_or(refresh_at, |h| h.deadline);

            let wake = tokio::select! {
                biased;
                _ = stop_rx.recv() => Wake::Stop,
                _ = self.inner.reattached.notified() => Wake::Reattached,
                _ = self.inner.write_failed.notified() => Wake::WriteFailed,
                unit = next_unit(&mut reader) => Wake::Read(unit),
                _ = sleep_until(heartbeat_deadline), if heartbeat.is_some() => Wake::HeartbeatExpired,
                _ = sleep_until(refresh_at), if heartbeat.is_none() => Wake::Refresh,
            };

            let reconnect_reason = match wake {
                Wake::Stop => {
                    tracing::info!("Processing loop for {} stopped", device_id);
                    break;
                }
                Wake::Reattached => continue,
                Wake::WriteFailed => {
                    // Another path may have reconnected already
                    if self.is_connected().await {
                        continue;
                    }
                    "write failed"
                }
                Wake::Read(Some(ReadUnit::Line(text))) => {
                    refresh_at = Instant::now() + interval;
                    self.touch();
                    self.handle_line(&text, &events, &mut heartbeat);
                    continue;
                }
                Wake::Read(Some(ReadUnit::Failed(e))) => {
                    tracing::warn!("Read error from {}: {}", device_id, e);
                    continue;
                }
                Wake::Read(Some(ReadUnit::Closed)) => "stream closed",
                Wake::Read(None) => {
                    // Replaced by a connect that has not been picked up yet
                    let replaced = lock(&self.inner.fresh_reader).is_some();
                    if replaced {
                        continue;
                    }
                    "reader stopped"
                }
                Wake::Refresh => {
                    refresh_at = Instant::now() + interval;
                    match self.start_heartbeat().await {
                        Ok(Some(hb)) => {
                            heartbeat = Some(hb);
                            continue;
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!("Heartbeat to {} failed: {}", device_id, e);
                            "heartbeat not sent"
                        }
                    }
                }
                Wake::HeartbeatExpired => {
                    if let Some(hb) = heartbeat.take() {
                        self.inner.correlator.forget(hb.id);
                    }
                    "heartbeat timed out"
                }
            };

            heartbeat = None;
            reader = None;
            if !self.managed_reconnect(reconnect_reason).await {
                break;
            }
        }

        tracing::debug!("Processing loop exited for {}", device_id);
    }

    /// Try to reconnect once. On failure the session goes `Offline`.
    async fn managed_reconnect(&self, reason: &str) -> bool {
        let device_id = self.id();
        tracing::warn!("{}: {}, reconnecting", device_id, reason);

        match self.connect().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Reconnect to {} failed: {}", device_id, e);
                if let Err(e) = self.release().await {
                    tracing::debug!("Error releasing stream for {}: {}", device_id, e);
                }
                self.inner.correlator.clear();
                self.set_status(Status::Offline);
                false
            }
        }
    }

    async fn start_heartbeat(&self) -> Result<Option<Heartbeat>> {
        if !lock(&self.inner.device).supports("get_prop") {
            tracing::debug!("{} does not support get_prop, skipping heartbeat", self.id());
            return Ok(None);
        }

        self.set_status(Status::Refreshing);
        let params = CORE_PROPERTIES.iter().map(|p| Value::from(*p)).collect();
        let id = self.write_command("get_prop", params).await?;
        Ok(Some(Heartbeat {
            id,
            deadline: Instant::now() + self.inner.config.heartbeat_timeout,
        }))
    }

    fn handle_line(&self, text: &str, events: &EventSender, heartbeat: &mut Option<Heartbeat>) {
        if text.trim().is_empty() {
            return;
        }
        tracing::debug!("Received: {}", text.trim_end());

        match WireMessage::parse(text) {
            Ok(WireMessage::Result(result)) => self.handle_result(result, events, heartbeat),
            Ok(WireMessage::Notification(notification)) => self.handle_notification(notification, events),
            Ok(WireMessage::Command(command)) => {
                tracing::warn!("Ignoring command {} sent by device", command.method);
            }
            Err(e) => tracing::warn!("Unparseable message from {}: {}", self.id(), e),
        }
    }

    fn handle_result(&self, result: CommandResult, events: &EventSender, heartbeat: &mut Option<Heartbeat>) {
        let Some(claim) = self.inner.correlator.claim(result.id) else {
            return;
        };

        let is_heartbeat = heartbeat.as_ref().is_some_and(|hb| hb.id == result.id);
        {
            let mut device = lock(&self.inner.device);
            if is_heartbeat {
                if let Some(values) = &result.result {
                    apply_properties(&mut device, CORE_PROPERTIES, values);
                }
                device.status = Status::Online;
            } else if claim.call.method == "set_name" && result.is_ok() {
                if let Some(name) = claim.call.params.first().and_then(Value::as_str) {
                    device.name = name.to_string();
                }
            }
        }

        let device_id = self.id();
        let call = claim.deliver(result.clone());
        if is_heartbeat {
            *heartbeat = None;
            self.inner.correlator.forget(call.id);
        }

        forward(events, DeviceEvent::Result { device_id, result });
    }

    fn handle_notification(&self, notification: Notification, events: &EventSender) {
        let device_id = {
            let mut device = lock(&self.inner.device);
            apply_notification(&mut device, &notification);
            device.id.clone()
        };

        forward(
            events,
            DeviceEvent::Notification {
                device_id,
                notification,
            },
        );
    }
}

fn forward(events: &EventSender, event: DeviceEvent) {
    if events.send(event).is_err() {
        tracing::debug!("Event receiver dropped");
    }
}

/// Next unit from the current reader; never resolves while detached
async fn next_unit(reader: &mut Option<mpsc::Receiver<ReadUnit>>) -> Option<ReadUnit> {
    match reader {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Reader worker: forwards each `\n`-terminated line until the stream ends.
///
/// Undecodable and oversized lines are reported and skipped. Socket errors are
/// reported and reading continues; after [`MAX_READ_FAILURES`] in a row the
/// stream counts as closed.
async fn read_lines(read_half: OwnedReadHalf, tx: mpsc::Sender<ReadUnit>) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    let mut failures = 0;
    let mut oversized = false;

    loop {
        buf.clear();
        let read = (&mut reader).take(MAX_LINE as u64).read_until(b'\n', &mut buf).await;
        let complete = buf.ends_with(b"\n");

        let unit = match read {
            Ok(0) => ReadUnit::Closed,
            Ok(_) if !complete && buf.len() >= MAX_LINE => {
                failures = 0;
                if oversized {
                    continue;
                }
                oversized = true;
                ReadUnit::Failed(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line longer than {} bytes", MAX_LINE),
                ))
            }
            Ok(_) if oversized => {
                // Tail of a line already reported
                failures = 0;
                oversized = !complete;
                continue;
            }
            Ok(_) => {
                failures = 0;
                match String::from_utf8(std::mem::take(&mut buf)) {
                    Ok(line) => ReadUnit::Line(line),
                    Err(e) => ReadUnit::Failed(io::Error::new(io::ErrorKind::InvalidData, e)),
                }
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_READ_FAILURES {
                    tracing::warn!("Giving up on stream after {} read errors: {}", failures, e);
                    ReadUnit::Closed
                } else {
                    ReadUnit::Failed(e)
                }
            }
        };

        let last = matches!(unit, ReadUnit::Closed);
        if tx.send(unit).await.is_err() || last {
            break;
        }
    }
}
