/*!
Connection lifecycle and streaming loop.

[`ConnectionManager`] connects to the camera with bounded retries, then runs
a single blocking loop: read a chunk, reassemble complete units, decode each
one and hand it to the caller's handler before reading again. The handler's
return value decides whether streaming continues.

```text
Disconnected -> Connecting -> Connected -> Streaming -> Stopped
                    |
                    +-> Failed (retries exhausted, error returned)
```

Only the connect phase is retried. Once streaming, any end of the stream
(handler stop, peer close, transport error, cancellation) ends the whole
operation with a [`StopReason`] rather than an error, and the connection is
closed exactly once on every exit path.
*/

use crate::reassembly::StreamReassembler;
use crate::source::{ByteSource, Connector, ReadOutcome};
use shared::{Result, SharedError, WireFormat};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Span};

/// Default read buffer size per chunk
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Connect retry and idle behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay between connect attempts
    pub retry_delay: Duration,
    /// Sleep after an empty read before reading again
    pub idle_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
            idle_backoff: Duration::from_millis(10),
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Stopped,
    Failed,
}

/// Why streaming ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The handler returned `false`
    HandlerStopped,
    /// The peer closed the connection
    EndOfStream,
    /// The transport failed mid-stream
    TransportError(String),
    /// The running flag was cleared
    Cancelled,
}

/// Outcome of a streaming session
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub units_delivered: u64,
    pub invalid_units: u64,
    pub bytes_received: u64,
    /// Bytes of an incomplete unit left in the buffer at shutdown
    pub trailing_bytes: usize,
    pub duration: Duration,
    pub stop_reason: StopReason,
}

/// Closes the wrapped source exactly once, on drop at the latest, and marks
/// the owning manager `Stopped`
struct ConnectionGuard<'a, S: ByteSource> {
    source: S,
    state: &'a mut ConnectionState,
    closed: bool,
}

impl<'a, S: ByteSource> ConnectionGuard<'a, S> {
    fn new(source: S, state: &'a mut ConnectionState) -> Self {
        *state = ConnectionState::Streaming;
        Self {
            source,
            state,
            closed: false,
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.close();
            *self.state = ConnectionState::Stopped;
        }
    }
}

impl<S: ByteSource> Drop for ConnectionGuard<'_, S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drives one camera connection for one wire format
pub struct ConnectionManager<C: Connector, W: WireFormat> {
    format: W,
    connector: C,
    policy: RetryPolicy,
    unit_size: NonZeroUsize,
    read_chunk_size: usize,
    state: ConnectionState,
    attempts: u32,
    running: Arc<AtomicBool>,
    span: Span,
}

impl<C: Connector, W: WireFormat> ConnectionManager<C, W> {
    /// Create a manager for `format`, opening connections with `connector`
    pub fn new(format: W, connector: C) -> Result<Self> {
        let unit_size = NonZeroUsize::new(format.unit_size())
            .ok_or_else(|| SharedError::config("unit size must be positive"))?;
        let (host, port) = format.endpoint();
        let addr = format!("{}:{}", host, port);
        let span = info_span!("capture", wire_format = format.name(), addr = %addr);

        Ok(Self {
            format,
            connector,
            policy: RetryPolicy::default(),
            unit_size,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            state: ConnectionState::Disconnected,
            attempts: 0,
            running: Arc::new(AtomicBool::new(true)),
            span,
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Log under `span` instead of the manager's own span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Get a reference to the running flag for external control
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connect attempts made by the last [`Self::connect`]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Open a connection, retrying up to `max_retries` times.
    ///
    /// Returns the last connect error once every attempt has failed.
    pub fn connect(&mut self) -> Result<C::Source> {
        let span = self.span.clone();
        let _enter = span.enter();

        let (host, port) = self.format.endpoint();
        let addr = format!("{}:{}", host, port);
        let total_attempts = self.policy.max_retries.saturating_add(1);

        self.state = ConnectionState::Connecting;
        self.attempts = 0;

        let mut last_error = None;
        for attempt in 1..=total_attempts {
            if !self.running.load(Ordering::SeqCst) {
                info!("🛑 Stop requested while connecting");
                self.state = ConnectionState::Failed;
                return Err(SharedError::Cancelled);
            }

            self.attempts = attempt;
            info!("🔌 Connecting to {} (attempt {}/{})", addr, attempt, total_attempts);

            match self.connector.connect(host, port) {
                Ok(source) => {
                    info!("✅ Connected to {}", addr);
                    self.state = ConnectionState::Connected;
                    return Ok(source);
                }
                Err(e) => {
                    warn!("Connect attempt {} to {} failed: {}", attempt, addr, e);
                    last_error = Some(e);
                    if attempt < total_attempts {
                        thread::sleep(self.policy.retry_delay);
                    }
                }
            }
        }

        error!("❌ Giving up on {} after {} attempts", addr, self.attempts);
        self.state = ConnectionState::Failed;
        Err(SharedError::Connection {
            addr,
            attempts: self.attempts,
            source: last_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "no connect attempt made")
            }),
        })
    }

    /// Stream from an open source until something stops it
    pub fn stream<F>(&mut self, source: C::Source, mut handler: F) -> StreamSummary
    where
        F: FnMut(W::Decoded) -> bool,
    {
        let span = self.span.clone();
        let _enter = span.enter();

        let mut connection = ConnectionGuard::new(source, &mut self.state);
        let mut reassembler = StreamReassembler::new(self.unit_size);
        let mut buffer = vec![0u8; self.read_chunk_size];
        let mut units_delivered = 0u64;
        let mut invalid_units = 0u64;
        let start_time = Instant::now();

        info!(
            "📡 Streaming {} units of {} bytes",
            self.format.name(),
            self.unit_size
        );

        let stop_reason = 'stream: loop {
            if !self.running.load(Ordering::SeqCst) {
                break StopReason::Cancelled;
            }

            match connection.source.read_chunk(&mut buffer) {
                ReadOutcome::Data(n) => {
                    let n = n.min(buffer.len());
                    for unit in reassembler.feed(&buffer[..n]) {
                        let decoded = self.format.decode(&unit);
                        units_delivered += 1;

                        if !W::is_valid(&decoded) {
                            invalid_units += 1;
                            debug!("Invalid {} #{}", self.format.name(), units_delivered);
                        }

                        if !handler(decoded) {
                            break 'stream StopReason::HandlerStopped;
                        }
                    }
                }
                ReadOutcome::Idle => thread::sleep(self.policy.idle_backoff),
                ReadOutcome::EndOfStream => break StopReason::EndOfStream,
                ReadOutcome::TransportError(e) => break StopReason::TransportError(e.to_string()),
            }
        };

        connection.close();

        match &stop_reason {
            StopReason::HandlerStopped => info!("🛑 Handler requested stop"),
            StopReason::EndOfStream => info!("Connection closed by peer"),
            StopReason::Cancelled => info!("🛑 Stop requested"),
            StopReason::TransportError(e) => warn!("⚠️ Transport error, stopping: {}", e),
        }

        let stats = reassembler.stats();
        if stats.pending_bytes > 0 {
            let pending = reassembler.pending();
            warn!(
                "⚠️ Incomplete {} at shutdown: {} bytes",
                self.format.name(),
                stats.pending_bytes
            );
            debug!("Trailing bytes start with {}", hex::encode(&pending[..pending.len().min(16)]));
        }

        let elapsed = start_time.elapsed();
        info!("📈 Capture final stats:");
        info!("   Units: {} delivered, {} reassembled", units_delivered, stats.units_emitted);
        info!("   Invalid: {}", invalid_units);
        info!("   Bytes: {:.1} KB", stats.bytes_received as f64 / 1024.0);
        info!("   Duration: {:.1}s", elapsed.as_secs_f64());

        StreamSummary {
            units_delivered,
            invalid_units,
            bytes_received: stats.bytes_received,
            trailing_bytes: stats.pending_bytes,
            duration: elapsed,
            stop_reason,
        }
    }

    /// Connect, then stream until stopped.
    ///
    /// Only connect failures are returned as errors.
    pub fn run<F>(&mut self, handler: F) -> Result<StreamSummary>
    where
        F: FnMut(W::Decoded) -> bool,
    {
        let source = self.connect()?;
        Ok(self.stream(source, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SyntheticConnector, SyntheticSource};
    use shared::{
        encode_frame, DecodedFrame, ImageMatrix, PacketBuilder, ParsedPacket, StreamConfig,
        StructuredPacketConfig,
    };
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    enum Step {
        Data(Vec<u8>),
        Idle,
        Fail,
    }

    /// Replays a fixed script, then reports end-of-stream
    struct ScriptedSource {
        steps: VecDeque<Step>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>, closes: Arc<AtomicUsize>) -> Self {
            Self {
                steps: steps.into(),
                closes,
            }
        }
    }

    impl ByteSource for ScriptedSource {
        fn read_chunk(&mut self, buf: &mut [u8]) -> ReadOutcome {
            match self.steps.pop_front() {
                Some(Step::Data(mut data)) => {
                    if data.len() > buf.len() {
                        let rest = data.split_off(buf.len());
                        self.steps.push_front(Step::Data(rest));
                    }
                    buf[..data.len()].copy_from_slice(&data);
                    ReadOutcome::Data(data.len())
                }
                Some(Step::Idle) => ReadOutcome::Idle,
                Some(Step::Fail) => ReadOutcome::TransportError(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "reset by peer",
                )),
                None => ReadOutcome::EndOfStream,
            }
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn small_config() -> StreamConfig {
        StreamConfig::new("127.0.0.1", 3333, 3, 2, 2, 2).unwrap()
    }

    fn image(seed: u16) -> ImageMatrix<u16> {
        ImageMatrix::new(3, 2, (0..6).map(|i| seed * 10 + i).collect()).unwrap()
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::ZERO,
            idle_backoff: Duration::ZERO,
        }
    }

    /// Connector that serves one scripted source per call
    fn scripted(
        steps: Vec<Step>,
        closes: Arc<AtomicUsize>,
    ) -> impl FnMut(&str, u16) -> io::Result<ScriptedSource> {
        let mut steps = Some(steps);
        move |_host: &str, _port: u16| {
            let steps = steps.take().unwrap_or_default();
            Ok(ScriptedSource::new(steps, Arc::clone(&closes)))
        }
    }

    #[test]
    fn test_connect_retries_then_succeeds() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut calls = 0;
        let connector = move |_host: &str, _port: u16| {
            calls += 1;
            if calls <= 2 {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            } else {
                Ok(ScriptedSource::new(Vec::new(), Arc::clone(&closes)))
            }
        };

        let mut manager = ConnectionManager::new(small_config(), connector)
            .unwrap()
            .with_retry_policy(fast_policy(5));

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        let source = manager.connect();
        assert!(source.is_ok());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.attempts(), 3);
    }

    #[test]
    fn test_connect_exhausts_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let connector = move |_host: &str, _port: u16| -> io::Result<ScriptedSource> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        };

        let mut manager = ConnectionManager::new(small_config(), connector)
            .unwrap()
            .with_retry_policy(fast_policy(2));

        let result = manager.run(|_frame: DecodedFrame| true);
        match result {
            Err(SharedError::Connection { attempts, addr, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(addr, "127.0.0.1:3333");
            }
            other => panic!("expected connection error, got {:?}", other.map(|s| s.stop_reason)),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_partial_frame_then_end_of_stream() {
        let config = small_config();
        let first = encode_frame(&image(1), &config).unwrap();
        let second = encode_frame(&image(2), &config).unwrap();

        let mut tail = first[5..].to_vec();
        tail.extend_from_slice(&second);
        let steps = vec![Step::Data(first[..5].to_vec()), Step::Data(tail)];

        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager = ConnectionManager::new(config, scripted(steps, Arc::clone(&closes)))
            .unwrap()
            .with_retry_policy(fast_policy(0));

        let mut received = Vec::new();
        let summary = manager
            .run(|frame: DecodedFrame| {
                received.push(frame);
                true
            })
            .unwrap();

        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|f| f.is_valid));
        assert_eq!(received[0].raw, Some(image(1)));
        assert_eq!(received[1].raw, Some(image(2)));
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(summary.units_delivered, 2);
        assert_eq!(summary.trailing_bytes, 0);
        assert_eq!(manager.state(), ConnectionState::Stopped);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_false_stops_streaming() {
        let config = small_config();
        let mut data = Vec::new();
        for seed in 0..3 {
            data.extend(encode_frame(&image(seed), &config).unwrap());
        }

        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager =
            ConnectionManager::new(config, scripted(vec![Step::Data(data)], Arc::clone(&closes)))
                .unwrap();

        let mut calls = 0;
        let summary = manager
            .run(|_frame: DecodedFrame| {
                calls += 1;
                false
            })
            .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(summary.stop_reason, StopReason::HandlerStopped);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_reads_and_transport_error() {
        let config = small_config();
        let frame = encode_frame(&image(4), &config).unwrap();
        let steps = vec![
            Step::Idle,
            Step::Data(frame),
            Step::Idle,
            Step::Data(vec![0u8; 3]),
            Step::Fail,
        ];

        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager = ConnectionManager::new(config, scripted(steps, Arc::clone(&closes)))
            .unwrap()
            .with_retry_policy(fast_policy(0));

        let mut frames = 0;
        let summary = manager
            .run(|_frame: DecodedFrame| {
                frames += 1;
                true
            })
            .unwrap();

        assert_eq!(frames, 1);
        assert!(matches!(summary.stop_reason, StopReason::TransportError(_)));
        assert_eq!(summary.trailing_bytes, 3);
        assert_eq!(manager.state(), ConnectionState::Stopped);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_small_read_buffer_still_reassembles() {
        let config = small_config();
        let frame = encode_frame(&image(7), &config).unwrap();

        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager =
            ConnectionManager::new(config, scripted(vec![Step::Data(frame)], Arc::clone(&closes)))
                .unwrap()
                .with_read_chunk_size(3);

        let mut received = Vec::new();
        manager
            .run(|frame: DecodedFrame| {
                received.push(frame.raw);
                true
            })
            .unwrap();

        assert_eq!(received, vec![Some(image(7))]);
    }

    #[test]
    fn test_cancelled_before_streaming() {
        let config = small_config();
        let frame = encode_frame(&image(1), &config).unwrap();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager =
            ConnectionManager::new(config, scripted(vec![Step::Data(frame)], Arc::clone(&closes)))
                .unwrap();

        let source = manager.connect().unwrap();
        manager.running_flag().store(false, Ordering::SeqCst);

        let summary = manager.stream(source, |_frame: DecodedFrame| true);
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.units_delivered, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_while_connecting() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager =
            ConnectionManager::new(small_config(), scripted(Vec::new(), closes)).unwrap();
        manager.running_flag().store(false, Ordering::SeqCst);

        assert!(matches!(manager.connect(), Err(SharedError::Cancelled)));
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_connection_closed_when_handler_panics() {
        let config = small_config();
        let frame = encode_frame(&image(1), &config).unwrap();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager =
            ConnectionManager::new(config, scripted(vec![Step::Data(frame)], Arc::clone(&closes)))
                .unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            manager.run(|_frame: DecodedFrame| -> bool { panic!("handler failure") })
        }));

        assert!(result.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Stopped);
    }

    #[test]
    fn test_structured_packets_stream() {
        let config = StructuredPacketConfig::new("127.0.0.1", 3333, 3, 2, 200).unwrap();
        let mut data = PacketBuilder::new(image(1)).build(&config).unwrap();
        data.extend(
            PacketBuilder::new(image(2))
                .payload_len_field("0000")
                .build(&config)
                .unwrap(),
        );
        let steps = vec![Step::Data(data[..150].to_vec()), Step::Data(data[150..].to_vec())];

        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager = ConnectionManager::new(config, scripted(steps, Arc::clone(&closes)))
            .unwrap()
            .with_span(tracing::info_span!("camera", id = 2));

        let mut packets: Vec<ParsedPacket> = Vec::new();
        let summary = manager
            .run(|packet: ParsedPacket| {
                packets.push(packet);
                true
            })
            .unwrap();

        assert_eq!(packets.len(), 2);
        assert!(packets[0].is_valid);
        assert!(!packets[1].is_valid);
        assert_eq!(packets[1].thermal_image, Some(image(2)));
        assert_eq!(summary.invalid_units, 1);
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    }

    #[test]
    fn test_synthetic_pipeline() {
        let config = StreamConfig::new("127.0.0.1", 3333, 16, 12, 160, 160).unwrap();
        let source = SyntheticSource::frames(config.clone(), Duration::ZERO, Some(4));
        let mut manager = ConnectionManager::new(config, SyntheticConnector::new(source))
            .unwrap()
            .with_retry_policy(fast_policy(0));

        let mut valid = 0;
        let summary = manager
            .run(|frame: DecodedFrame| {
                if frame.is_valid {
                    valid += 1;
                }
                true
            })
            .unwrap();

        assert_eq!(valid, 4);
        assert_eq!(summary.units_delivered, 4);
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    }
}
