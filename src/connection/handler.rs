//! Connection Handler
//!
//! Each client gets its own handler task. The task runs in a loop:
//! it reads bytes, decodes every complete request in the buffer, executes
//! each one, and writes the reply.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! accept ──> read chunk ──> decode all complete requests ──> reply to each
//!               ▲                                                │
//!               └────────────────────────────────────────────────┘
//!
//! zero-length read  -> close
//! protocol error    -> "-ERR Protocol error: ..." then close
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes build up in a `BytesMut`. TCP is a stream protocol, so one
//! read may hold half a request or several. Consumed bytes are split off the
//! front, and any partial request stays until the next read.

use crate::commands::CommandHandler;
use crate::protocol::parser::{MAX_BULK_SIZE, MAX_HEADER_LINE};
use crate::protocol::{Command, ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

/// Bytes requested from the socket per read.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Largest request we are willing to buffer: one maximal bulk string plus
/// one header line of at most [`MAX_HEADER_LINE`] bytes. An unterminated
/// header fails in the parser long before this is reached.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + MAX_HEADER_LINE;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent bytes that are not a valid request. The client has
    /// already been sent an error reply.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The client closed the stream in the middle of a request
    #[error("unexpected end of stream with {0} bytes buffered")]
    UnexpectedEof(usize),

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Handles a single client connection.
///
/// Generic over the stream so it runs the same on a `TcpStream` or an
/// in-memory mock.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,
    addr: SocketAddr,
    buffer: BytesMut,
    command_handler: CommandHandler,
    parser: RespParser,
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Runs the connection until the client disconnects or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        self.stats.connection_opened();
        debug!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => debug!(client = %self.addr, error = %e, "Connection closed with error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(command) = self.next_command().await? {
                let response = self.command_handler.execute(command);
                self.stats.command_processed();
                self.send_response(&response).await?;
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Decodes the next complete request from the buffer, if there is one.
    ///
    /// A malformed request gets a protocol error reply before the error is
    /// returned.
    async fn next_command(&mut self) -> Result<Option<Command>, ConnectionError> {
        match self.parser.parse_command(&self.buffer) {
            Ok(Some((command, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(command))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Protocol error");
                let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                self.send_response(&reply).await?;
                Err(e.into())
            }
        }
    }

    /// Reads one chunk into the buffer. Returns `false` on a clean close.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            warn!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = self.stream.get_mut().read(&mut chunk).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Ok(false)
            } else {
                Err(ConnectionError::UnexpectedEof(self.buffer.len()))
            };
        }

        self.buffer.extend_from_slice(&chunk[..n]);
        self.stats.record_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(true)
    }

    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.record_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Serves one client to completion.
///
/// Errors are logged here; a failing connection never affects any other.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::Protocol(_) | ConnectionError::UnexpectedEof(_) => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => info!(client = %addr, error = %e, "Connection ended with error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Keyspace;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn command_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(Keyspace::new()))
    }

    #[tokio::test]
    async fn test_ping_pong_mock() {
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let stats = Arc::new(ConnectionStats::new());
        let handler =
            ConnectionHandler::new(stream, test_addr(), command_handler(), Arc::clone(&stats));

        handler.run().await.unwrap();
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_request_split_across_reads() {
        let stream = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$3\r\nf")
            .read(b"oo\r\n$3\r\nbar\r\n*2\r\n$3\r\nGET")
            .write(b"+OK\r\n")
            .read(b"\r\n$3\r\nfoo\r\n")
            .write(b"$3\r\nbar\r\n")
            .build();

        let handler = ConnectionHandler::new(stream, test_addr(), command_handler(), Arc::default());
        handler.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_pipelined_requests_in_one_read() {
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n")
            .write(b"+PONG\r\n")
            .write(b"$2\r\nhi\r\n")
            .build();

        let handler = ConnectionHandler::new(stream, test_addr(), command_handler(), Arc::default());
        handler.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection_open() {
        let stream = Builder::new()
            .read(b"*2\r\n$3\r\nFOO\r\n$3\r\nbar\r\n")
            .write(b"-ERR unknown command 'FOO', with args beginning with: 'bar' \r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let handler = ConnectionHandler::new(stream, test_addr(), command_handler(), Arc::default());
        handler.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_protocol_error_closes_connection() {
        let stream = Builder::new()
            .read(b"PING\r\n")
            .write(b"-ERR Protocol error: expected '*', got 'P'\r\n")
            .build();

        let handler = ConnectionHandler::new(stream, test_addr(), command_handler(), Arc::default());
        let result = handler.run().await;
        assert!(matches!(result, Err(ConnectionError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_endless_header_line_closes_connection() {
        let mut header = b"*".to_vec();
        header.resize(1 + MAX_HEADER_LINE + 2, b'1');

        let stream = Builder::new()
            .read(&header)
            .write(b"-ERR Protocol error: too big mbulk count string\r\n")
            .build();

        let handler = ConnectionHandler::new(stream, test_addr(), command_handler(), Arc::default());
        let result = handler.run().await;
        assert!(matches!(result, Err(ConnectionError::Protocol(ParseError::Protocol(_)))));
    }

    #[tokio::test]
    async fn test_eof_with_partial_request() {
        let stream = Builder::new().read(b"*1\r\n$4\r\nPI").build();

        let handler = ConnectionHandler::new(stream, test_addr(), command_handler(), Arc::default());
        let result = handler.run().await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof(10))));
    }

    #[tokio::test]
    async fn test_set_get_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = command_handler();
        let stats = Arc::new(ConnectionStats::new());

        let server_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            let (stream, client_addr) = listener.accept().await.unwrap();
            handle_connection(stream, client_addr, handler, server_stats).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$5\r\ncinde\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$5\r\ncinde\r\n");

        drop(client);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 2);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
