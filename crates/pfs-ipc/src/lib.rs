//! # pfs-ipc
//!
//! Request/response protocol spoken with the ProxyFS metadata daemon.
//!
//! Every call writes one fixed [`RequestHeader`], reads one fixed
//! [`ResponseHeader`], then reads `payload_size` bytes of payload. All
//! integer fields are little-endian u64.
//!
//! Only the calls the read path needs live here: `READPLAN` and `STAT`.

mod plan;

pub use plan::{RangeMapping, ReadPlan};

use std::io::{self, Read, Write};

use pfs_config::{log_ipc_debug, log_ipc_warn};
use thiserror::Error;
use tracing::instrument;

/// Operation code for a read plan request
pub const OP_READPLAN: u64 = 1;
/// Operation code for a stat request
pub const OP_STAT: u64 = 2;

/// Largest payload the client accepts from the daemon
pub const MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// Errors that can occur talking to the metadata daemon
#[derive(Error, Debug)]
pub enum IpcError {
    /// Socket read/write failed. `fatal` means the connection is unusable.
    #[error("transport error (fatal: {fatal}): {source}")]
    Transport {
        #[source]
        source: io::Error,
        fatal: bool,
    },

    #[error("metadata service returned error code {code}")]
    Remote { code: u64 },

    #[error("success response carried an empty payload")]
    EmptyPayload,

    #[error("payload of {size} bytes exceeds the {max} byte limit", max = MAX_PAYLOAD_SIZE)]
    PayloadTooLarge { size: u64 },

    #[error("payload truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("object path is not NUL-terminated")]
    UnterminatedPath,

    #[error("object path is not valid UTF-8")]
    InvalidPath,

    #[error("{0} unexpected bytes after the last record")]
    TrailingBytes(usize),

    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    #[error("not connected to the metadata service")]
    Disconnected,
}

impl IpcError {
    fn transport(source: io::Error) -> Self {
        let fatal = is_connection_fatal(&source);
        IpcError::Transport { source, fatal }
    }

    /// Malformed response (the daemon answered, but not sensibly).
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            IpcError::EmptyPayload
                | IpcError::PayloadTooLarge { .. }
                | IpcError::Truncated { .. }
                | IpcError::UnterminatedPath
                | IpcError::InvalidPath
                | IpcError::TrailingBytes(_)
                | IpcError::Malformed(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, IpcError::Transport { fatal: true, .. })
    }

    /// The stream is no longer aligned on a response boundary.
    fn poisons_connection(&self) -> bool {
        self.is_fatal() || matches!(self, IpcError::PayloadTooLarge { .. })
    }
}

pub type Result<T> = std::result::Result<T, IpcError>;

/// Transport errors after which the connection cannot be reused.
pub fn is_connection_fatal(e: &io::Error) -> bool {
    if let Some(code) = e.raw_os_error() {
        if code == libc::EPIPE || code == libc::ENODEV || code == libc::EBADF {
            return true;
        }
    }
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// Fixed request record.
///
/// ```text
/// offset  field     size
///  0      op        8
///  8      mount_id  8
/// 16      inode     8
/// 24      offset    8
/// 32      length    8
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub op: u64,
    pub mount_id: u64,
    pub inode: u64,
    pub offset: u64,
    pub length: u64,
}

impl RequestHeader {
    pub const SIZE: usize = 40;

    pub fn read_plan(mount_id: u64, inode: u64, offset: u64, length: u64) -> Self {
        Self {
            op: OP_READPLAN,
            mount_id,
            inode,
            offset,
            length,
        }
    }

    pub fn stat(mount_id: u64, inode: u64) -> Self {
        Self {
            op: OP_STAT,
            mount_id,
            inode,
            offset: 0,
            length: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        for (slot, v) in buf.chunks_exact_mut(8).zip([
            self.op,
            self.mount_id,
            self.inode,
            self.offset,
            self.length,
        ]) {
            slot.copy_from_slice(&v.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        let f = |i: usize| read_u64(&buf[i * 8..i * 8 + 8]);
        Self {
            op: f(0),
            mount_id: f(1),
            inode: f(2),
            offset: f(3),
            length: f(4),
        }
    }
}

/// Fixed response record: `error` then `payload_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub error: u64,
    pub payload_size: u64,
}

impl ResponseHeader {
    pub const SIZE: usize = 16;

    pub fn ok(payload_size: u64) -> Self {
        Self {
            error: 0,
            payload_size,
        }
    }

    pub fn err(code: u64) -> Self {
        Self {
            error: code,
            payload_size: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..8].copy_from_slice(&self.error.to_le_bytes());
        buf[8..].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            error: read_u64(&buf[..8]),
            payload_size: read_u64(&buf[8..]),
        }
    }
}

/// Attributes returned by `STAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub size: u64,
    /// Seconds since Unix epoch
    pub mtime: u64,
    pub mode: u32,
}

impl FileStat {
    pub const SIZE: usize = 24;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.mtime.to_le_bytes());
        buf[16..].copy_from_slice(&u64::from(self.mode).to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::SIZE {
            return Err(IpcError::Truncated {
                needed: Self::SIZE,
                available: payload.len(),
            });
        }
        if payload.len() > Self::SIZE {
            return Err(IpcError::TrailingBytes(payload.len() - Self::SIZE));
        }
        Ok(Self {
            size: read_u64(&payload[..8]),
            mtime: read_u64(&payload[8..16]),
            mode: read_u64(&payload[16..]) as u32,
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

/// Send one request and return the success payload.
fn call<S: Read + Write>(conn: &mut S, header: &RequestHeader) -> Result<Vec<u8>> {
    conn.write_all(&header.to_bytes())
        .map_err(IpcError::transport)?;
    conn.flush().map_err(IpcError::transport)?;

    let mut resp_buf = [0u8; ResponseHeader::SIZE];
    conn.read_exact(&mut resp_buf)
        .map_err(IpcError::transport)?;
    let resp = ResponseHeader::from_bytes(&resp_buf);

    if resp.payload_size > MAX_PAYLOAD_SIZE {
        return Err(IpcError::PayloadTooLarge {
            size: resp.payload_size,
        });
    }
    if resp.error != 0 {
        // Skip any error body so the next response starts on a header.
        drain(conn, resp.payload_size)?;
        return Err(IpcError::Remote { code: resp.error });
    }
    if resp.payload_size == 0 {
        return Err(IpcError::EmptyPayload);
    }

    let mut payload = vec![0u8; resp.payload_size as usize];
    conn.read_exact(&mut payload)
        .map_err(IpcError::transport)?;
    Ok(payload)
}

fn drain<S: Read>(conn: &mut S, len: u64) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let skipped = io::copy(&mut conn.by_ref().take(len), &mut io::sink())
        .map_err(IpcError::transport)?;
    if skipped < len {
        return Err(IpcError::transport(io::Error::from(
            io::ErrorKind::UnexpectedEof,
        )));
    }
    Ok(())
}

/// Fetch and decode the read plan for `[offset, offset + length)` of `inode`.
#[instrument(skip(conn), level = "debug")]
pub fn fetch_plan<S: Read + Write>(
    conn: &mut S,
    mount_id: u64,
    inode: u64,
    offset: u64,
    length: u64,
) -> Result<ReadPlan> {
    let header = RequestHeader::read_plan(mount_id, inode, offset, length);
    let payload = call(conn, &header)?;
    let plan = ReadPlan::decode(&payload, inode, offset)?;
    log_ipc_debug!(
        "Read plan decoded",
        inode = inode,
        file_size = plan.file_size,
        ranges = plan.ranges.len()
    );
    Ok(plan)
}

/// Fetch file attributes of `inode`.
#[instrument(skip(conn), level = "debug")]
pub fn fetch_stat<S: Read + Write>(conn: &mut S, mount_id: u64, inode: u64) -> Result<FileStat> {
    let payload = call(conn, &RequestHeader::stat(mount_id, inode))?;
    FileStat::decode(&payload)
}

/// The metadata calls the read path depends on.
pub trait MetadataService {
    /// Read plan for `[offset, offset + length)` of `inode`.
    fn read_plan(&mut self, inode: u64, offset: u64, length: u64) -> Result<ReadPlan>;

    fn stat(&mut self, inode: u64) -> Result<FileStat>;
}

/// Opens a fresh connection to the daemon.
pub type Connector<S> = Box<dyn FnMut() -> io::Result<S> + Send>;

/// Metadata daemon client over a byte stream.
///
/// Reconnect policy: when a call fails in a way that leaves the stream
/// unusable (fatal transport error, oversized payload), the stream is
/// dropped. If a connector is configured the client reconnects and resends
/// the whole request, at most `reconnect_attempts` times per call. Every
/// other error is returned as is.
pub struct MetadataClient<S> {
    stream: Option<S>,
    connector: Option<Connector<S>>,
    mount_id: u64,
    reconnect_attempts: u32,
}

impl<S: Read + Write> MetadataClient<S> {
    /// Client over an already connected stream, without reconnect.
    pub fn new(stream: S, mount_id: u64) -> Self {
        Self {
            stream: Some(stream),
            connector: None,
            mount_id,
            reconnect_attempts: 0,
        }
    }

    /// Client that connects through `connector` now and on fatal errors.
    pub fn with_connector(
        mut connector: Connector<S>,
        mount_id: u64,
        reconnect_attempts: u32,
    ) -> Result<Self> {
        let stream = connector().map_err(IpcError::transport)?;
        Ok(Self {
            stream: Some(stream),
            connector: Some(connector),
            mount_id,
            reconnect_attempts,
        })
    }

    pub fn mount_id(&self) -> u64 {
        self.mount_id
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn reconnect(&mut self) -> Result<()> {
        let connector = self.connector.as_mut().ok_or(IpcError::Disconnected)?;
        let stream = connector().map_err(IpcError::transport)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn with_stream<T>(&mut self, mut op: impl FnMut(&mut S, u64) -> Result<T>) -> Result<T> {
        let mut reconnects = 0;
        loop {
            if self.stream.is_none() {
                self.reconnect()?;
            }
            let mount_id = self.mount_id;
            let stream = self.stream.as_mut().ok_or(IpcError::Disconnected)?;

            match op(stream, mount_id) {
                Err(e) if e.poisons_connection() => {
                    self.stream = None;
                    if self.connector.is_none() || reconnects >= self.reconnect_attempts {
                        return Err(e);
                    }
                    reconnects += 1;
                    log_ipc_warn!(
                        "Metadata connection lost, reconnecting",
                        attempt = reconnects,
                        error = tracing::field::display(&e)
                    );
                }
                other => return other,
            }
        }
    }
}

#[cfg(unix)]
impl MetadataClient<std::os::unix::net::UnixStream> {
    /// Connect to the daemon's Unix socket with the given reconnect budget.
    pub fn connect_unix(
        socket: impl Into<std::path::PathBuf>,
        mount_id: u64,
        reconnect_attempts: u32,
    ) -> Result<Self> {
        let socket = socket.into();
        let connector: Connector<_> =
            Box::new(move || std::os::unix::net::UnixStream::connect(&socket));
        Self::with_connector(connector, mount_id, reconnect_attempts)
    }
}

impl<S: Read + Write> MetadataService for MetadataClient<S> {
    fn read_plan(&mut self, inode: u64, offset: u64, length: u64) -> Result<ReadPlan> {
        self.with_stream(|s, mount_id| fetch_plan(s, mount_id, inode, offset, length))
    }

    fn stat(&mut self, inode: u64) -> Result<FileStat> {
        self.with_stream(|s, mount_id| fetch_stat(s, mount_id, inode))
    }
}
