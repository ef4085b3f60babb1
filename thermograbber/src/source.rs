/*!
Byte sources feeding the capture loop.

A [`Connector`] opens a [`ByteSource`]; the capture loop then pulls chunks
from it until it reports end-of-stream or a transport error. Two sources are
provided: a TCP client for the real camera and a synthetic generator for
running the pipeline without hardware.
*/

use shared::{encode_frame, ImageMatrix, PacketBuilder, StreamConfig, StructuredPacketConfig};
use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Outcome of a single read from a [`ByteSource`]
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes were written to the front of the buffer
    Data(usize),
    /// Nothing available yet, connection still open
    Idle,
    /// The peer closed the connection
    EndOfStream,
    /// The transport failed
    TransportError(io::Error),
}

/// A connected stream of bytes
pub trait ByteSource {
    /// Read whatever is available into `buf` (which is never empty)
    fn read_chunk(&mut self, buf: &mut [u8]) -> ReadOutcome;

    /// Release the connection. Called exactly once by the capture loop.
    fn close(&mut self);
}

/// Opens byte sources
pub trait Connector {
    type Source: ByteSource;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<Self::Source>;
}

/// Any `FnMut(host, port) -> io::Result<S>` can act as a connector
impl<F, S> Connector for F
where
    F: FnMut(&str, u16) -> io::Result<S>,
    S: ByteSource,
{
    type Source = S;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<S> {
        self(host, port)
    }
}

/// TCP client connector for the camera
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
    /// Read poll interval; a read that times out counts as an empty read
    pub read_timeout: Option<Duration>,
    pub recv_buffer_size: Option<usize>,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_millis(100)),
            recv_buffer_size: Some(1024 * 1024),
        }
    }
}

impl TcpConnector {
    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_nodelay(true)?;

        if let Some(size) = self.recv_buffer_size {
            let sock_ref = socket2::SockRef::from(stream);
            sock_ref.set_recv_buffer_size(size)?;
            debug!("📊 Socket receive buffer set to {} bytes", size);
        }

        Ok(())
    }
}

impl Connector for TcpConnector {
    type Source = TcpSource;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<TcpSource> {
        let mut last_error = None;

        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    self.configure(&stream)?;
                    info!("🔌 Connected to {}", addr);
                    return Ok(TcpSource { stream, peer: addr });
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                ErrorKind::AddrNotAvailable,
                format!("no addresses resolved for {}:{}", host, port),
            )
        }))
    }
}

/// A connected TCP stream
pub struct TcpSource {
    stream: TcpStream,
    peer: SocketAddr,
}

impl ByteSource for TcpSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> ReadOutcome {
        match self.stream.read(buf) {
            Ok(0) => ReadOutcome::EndOfStream,
            Ok(n) => ReadOutcome::Data(n),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                ReadOutcome::Idle
            }
            Err(e) => ReadOutcome::TransportError(e),
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Shutdown of {} reported: {}", self.peer, e);
        }
        info!("🔌 Closed connection to {}", self.peer);
    }
}

/// Chunk sizes the synthetic source cycles through, so units straddle reads
const SYNTHETIC_CHUNK_PATTERN: [usize; 5] = [1000, 3333, 17, 4096, 1];

type UnitGenerator = Box<dyn FnMut(u64) -> shared::Result<Vec<u8>>>;

/// Generates camera-shaped traffic without hardware
pub struct SyntheticSource {
    generate: UnitGenerator,
    pending: Vec<u8>,
    cursor: usize,
    chunk_index: usize,
    units_generated: u64,
    max_units: Option<u64>,
    interval: Duration,
    last_unit: Option<Instant>,
}

impl SyntheticSource {
    /// Raw frames for `config`, one every `interval`
    pub fn frames(config: StreamConfig, interval: Duration, max_units: Option<u64>) -> Self {
        let generate = move |n: u64| {
            encode_frame(&synthetic_image(config.width(), config.height(), n), &config)
        };
        Self::with_generator(Box::new(generate), interval, max_units)
    }

    /// Structured packets for `config`, one every `interval`
    pub fn packets(
        config: StructuredPacketConfig,
        interval: Duration,
        max_units: Option<u64>,
    ) -> Self {
        let generate = move |n: u64| {
            let image = synthetic_image(config.width(), config.height(), n);
            PacketBuilder::new(image)
                .checksum_field(&format!("{:04X}", n & 0xFFFF))
                .build(&config)
        };
        Self::with_generator(Box::new(generate), interval, max_units)
    }

    fn with_generator(generate: UnitGenerator, interval: Duration, max_units: Option<u64>) -> Self {
        Self {
            generate,
            pending: Vec::new(),
            cursor: 0,
            chunk_index: 0,
            units_generated: 0,
            max_units,
            interval,
            last_unit: None,
        }
    }
}

impl ByteSource for SyntheticSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> ReadOutcome {
        if self.cursor >= self.pending.len() {
            if self.max_units.is_some_and(|max| self.units_generated >= max) {
                return ReadOutcome::EndOfStream;
            }
            if self.last_unit.is_some_and(|last| last.elapsed() < self.interval) {
                return ReadOutcome::Idle;
            }

            match (self.generate)(self.units_generated) {
                Ok(unit) => self.pending = unit,
                Err(e) => {
                    return ReadOutcome::TransportError(io::Error::new(ErrorKind::InvalidData, e))
                }
            }
            self.cursor = 0;
            self.units_generated += 1;
            self.last_unit = Some(Instant::now());

            if self.units_generated % 10 == 0 {
                info!("🧪 Generated {} synthetic units", self.units_generated);
            }
        }

        let chunk = SYNTHETIC_CHUNK_PATTERN[self.chunk_index % SYNTHETIC_CHUNK_PATTERN.len()];
        self.chunk_index += 1;

        let n = chunk.min(buf.len()).min(self.pending.len() - self.cursor);
        buf[..n].copy_from_slice(&self.pending[self.cursor..self.cursor + n]);
        self.cursor += n;

        ReadOutcome::Data(n)
    }

    fn close(&mut self) {
        info!("🧪 Synthetic source closed after {} units", self.units_generated);
    }
}

/// Connector that hands out one prepared [`SyntheticSource`]
pub struct SyntheticConnector {
    source: Option<SyntheticSource>,
}

impl SyntheticConnector {
    pub fn new(source: SyntheticSource) -> Self {
        Self {
            source: Some(source),
        }
    }
}

impl Connector for SyntheticConnector {
    type Source = SyntheticSource;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<SyntheticSource> {
        info!("🧪 Using synthetic source instead of {}:{}", host, port);
        self.source
            .take()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "synthetic source already used"))
    }
}

/// A room-temperature scene (deci-Kelvin) with a hot spot drifting across it
pub fn synthetic_image(width: usize, height: usize, n: u64) -> ImageMatrix<u16> {
    const BACKGROUND_DK: u16 = 2931; // 20 C

    let mut image = ImageMatrix::filled(width, height, BACKGROUND_DK);
    let spot_col = (n as usize) % width.max(1);
    let spot_row = height / 2;

    for row in 0..height {
        for col in 0..width {
            let gradient = (row * 3) as u16;
            let dr = row.abs_diff(spot_row);
            let dc = col.abs_diff(spot_col);
            let dist_sq = (dr * dr + dc * dc) as u16;
            let spot = 150u16.saturating_sub(dist_sq.saturating_mul(6));
            image.set(row, col, BACKGROUND_DK + gradient + spot);
        }
    }

    image
}
