// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The UACP connection manager. Owns the socket, performs the HEL / ACK handshake and
//! provides atomic send and receive of whole framed chunks. The manager is written to
//! withstand concurrent access by always resolving to a clean state - the state word is
//! advanced with compare-and-swap so concurrent connects and closes cannot interleave
//! into anything other than connected or closed.

use std::{
    io::{self, Cursor},
    sync::atomic::{AtomicU32, Ordering},
    sync::Arc,
};

use byteorder::{ByteOrder, LittleEndian};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::core::comms::{
    error::Error,
    tcp_types::{
        AcknowledgeMessage, ErrorMessage, HelloMessage, MessageChunking, MessageHeader,
        MessageType, HANDSHAKE_MAX_SIZE, MESSAGE_HEADER_LEN,
    },
};
use crate::types::{encoding::*, status_code::StatusCode};

/// Anything that can carry UACP traffic - a TCP stream by default, but the dial function
/// makes the transport pluggable.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> IoStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Dials the peer and returns a duplex byte stream. The dial should abort when the
/// deadline is reached.
pub type DialFn = Arc<
    dyn Fn(Option<Instant>) -> BoxFuture<'static, io::Result<Box<dyn IoStream>>> + Send + Sync,
>;

/// How long the default TCP dial waits before giving up when the caller supplies no
/// tighter deadline.
pub const DEFAULT_DIAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Returns a [`DialFn`] that opens a TCP connection to `address`.
pub fn tcp_dial(address: String) -> DialFn {
    Arc::new(move |deadline| {
        let address = address.clone();
        Box::pin(async move {
            let dial_deadline = match deadline {
                Some(deadline) => deadline.min(Instant::now() + DEFAULT_DIAL_TIMEOUT),
                None => Instant::now() + DEFAULT_DIAL_TIMEOUT,
            };
            let stream = tokio::time::timeout_at(dial_deadline, TcpStream::connect(&address))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "dial timed out"))??;
            let stream: Box<dyn IoStream> = Box::new(stream);
            Ok(stream)
        })
    })
}

/// Runs a future against an optional deadline, turning deadline exhaustion into a local
/// `BadTimeout`. A deadline at or before now fails immediately.
pub(crate) async fn with_deadline<F, T>(deadline: Option<Instant>, future: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, future).await {
            Ok(result) => result,
            Err(_) => Err(Error::local(StatusCode::BadTimeout, "local deadline reached")),
        },
        None => future.await,
    }
}

fn wrap_io_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            Error::local(StatusCode::BadTimeout, err.to_string())
        }
        _ => Error::local(StatusCode::BadTcpInternalError, err.to_string()),
    }
}

const CONN_STATE_NIL: u32 = 0;
const CONN_STATE_CONNECTING: u32 = 1;
const CONN_STATE_CONNECTED: u32 = 2;
const CONN_STATE_CLOSING: u32 = 3;
const CONN_STATE_CLOSED: u32 = 4;

pub struct ConnectionManager {
    dial: DialFn,
    endpoint_url: String,
    /// The chunking announced in HEL, replaced by the negotiated values after the first
    /// successful handshake.
    chunking: parking_lot::RwLock<MessageChunking>,
    decoding_options: DecodingOptions,
    state: AtomicU32,
    // The two halves of the connection are guarded separately so a caller can read while
    // another writes. When both are needed, lock the reader first.
    reader: tokio::sync::Mutex<Option<ReadHalf<Box<dyn IoStream>>>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<Box<dyn IoStream>>>>,
}

impl ConnectionManager {
    pub fn new(
        dial: DialFn,
        endpoint_url: &str,
        chunking: MessageChunking,
        decoding_options: DecodingOptions,
    ) -> ConnectionManager {
        ConnectionManager {
            dial,
            endpoint_url: endpoint_url.to_string(),
            chunking: parking_lot::RwLock::new(chunking),
            decoding_options,
            state: AtomicU32::new(CONN_STATE_NIL),
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
        }
    }

    /// The message chunking agreed during handshake, or `None` if the manager has never
    /// been connected.
    pub fn chunking(&self) -> Option<MessageChunking> {
        if self.state.load(Ordering::SeqCst) < CONN_STATE_CONNECTED {
            None
        } else {
            Some(*trace_read_lock!(self.chunking))
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CONN_STATE_CONNECTED
    }

    /// Establishes the UACP connection and performs the initial handshake. The manager
    /// moves to connected only when the initial state is nil (never connected) or closed;
    /// otherwise this is a no-op. It is safe to call `connect` multiple times
    /// sequentially, and concurrent connects and closes resolve to either connected or
    /// closed, never anything in between.
    pub async fn connect(&self, deadline: Option<Instant>) -> Result<(), Error> {
        // Move state to connecting or return. The fallback state on a failed first run is
        // nil rather than closed so a later connect is still treated as the first.
        let first_run = if self
            .state
            .compare_exchange(
                CONN_STATE_NIL,
                CONN_STATE_CONNECTING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            true
        } else if self
            .state
            .compare_exchange(
                CONN_STATE_CLOSED,
                CONN_STATE_CONNECTING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            false
        } else {
            return Ok(());
        };

        let result = self.connect_inner(first_run, deadline).await;
        let next_state = match &result {
            Ok(()) => CONN_STATE_CONNECTED,
            Err(_) if first_run => CONN_STATE_NIL,
            Err(_) => CONN_STATE_CLOSED,
        };
        if self
            .state
            .compare_exchange(
                CONN_STATE_CONNECTING,
                next_state,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            panic!("inconsistent connection state leaving connect");
        }
        result
    }

    async fn connect_inner(&self, first_run: bool, deadline: Option<Instant>) -> Result<(), Error> {
        let mut stream = with_deadline(deadline, async {
            (self.dial)(deadline).await.map_err(|err| {
                error!("Could not connect to {}, {:?}", self.endpoint_url, err);
                Error::local(StatusCode::BadConnectionRejected, err.to_string())
            })
        })
        .await?;

        let negotiated = match self.handshake(&mut stream, deadline).await {
            Ok(negotiated) => negotiated,
            Err(err) => {
                let _ = stream.shutdown().await;
                return Err(err);
            }
        };

        if !first_run && negotiated != *trace_read_lock!(self.chunking) {
            // When re-establishing a closed connection the negotiated chunking may not
            // change, since buffers and limits were sized from the original values.
            error!("Re-negotiated chunking differs from the original connection");
            let _ = stream.shutdown().await;
            return Err(Error::local(
                StatusCode::BadConnectionClosed,
                "negotiated chunking changed across reconnect",
            ));
        }
        *trace_write_lock!(self.chunking) = negotiated;

        // Replace the halves under both locks; send and receive fail fast while the
        // connection is down
        let (read, write) = tokio::io::split(stream);
        {
            let mut reader = self.reader.lock().await;
            let mut writer = self.writer.lock().await;
            *reader = Some(read);
            *writer = Some(write);
        }
        Ok(())
    }

    async fn handshake(
        &self,
        stream: &mut Box<dyn IoStream>,
        deadline: Option<Instant>,
    ) -> Result<MessageChunking, Error> {
        let hello = HelloMessage::new(&self.endpoint_url, *trace_read_lock!(self.chunking));
        let hello_bytes = hello.encode_to_vec();

        with_deadline(deadline, async {
            debug!(">>> HEL {}", self.endpoint_url);
            stream.write_all(&hello_bytes).await.map_err(|err| {
                Error::local(StatusCode::BadRequestInterrupted, err.to_string())
            })?;

            // Receive exactly one frame of at most the handshake size
            let mut data = vec![0u8; HANDSHAKE_MAX_SIZE];
            stream
                .read_exact(&mut data[..MESSAGE_HEADER_LEN])
                .await
                .map_err(|err| {
                    Error::local(StatusCode::BadRequestInterrupted, err.to_string())
                })?;
            let message_size = LittleEndian::read_u32(&data[4..8]) as usize;
            if message_size < MESSAGE_HEADER_LEN || message_size > HANDSHAKE_MAX_SIZE {
                return Err(Error::local(
                    StatusCode::BadTcpInternalError,
                    format!("illegal handshake message size {}", message_size),
                ));
            }
            stream
                .read_exact(&mut data[MESSAGE_HEADER_LEN..message_size])
                .await
                .map_err(|err| {
                    Error::local(StatusCode::BadRequestInterrupted, err.to_string())
                })?;

            let mut stream = Cursor::new(&data[..message_size]);
            match MessageHeader::message_type(&data[0..4]) {
                MessageType::Acknowledge => {
                    let ack =
                        AcknowledgeMessage::decode(&mut stream, &self.decoding_options)
                            .map_err(Error::from)?;
                    debug!("<<< ACK {:?}", ack.chunking);
                    if !ack.chunking.is_valid_buffer_sizes() {
                        return Err(Error::local(
                            StatusCode::BadConnectionRejected,
                            "ACK buffer sizes below the 8192 byte minimum",
                        ));
                    }
                    Ok(ack.chunking)
                }
                MessageType::Error => {
                    let msg = ErrorMessage::decode(&mut stream, &self.decoding_options)
                        .map_err(Error::from)?;
                    Err(Error::remote(
                        StatusCode::from_bits_truncate(msg.error),
                        msg.reason.as_ref(),
                    ))
                }
                _ => Err(Error::local(
                    StatusCode::BadTcpMessageTypeInvalid,
                    "only ACK and ERR messages allowed during handshake",
                )),
            }
        })
        .await
    }

    /// Writes one framed chunk to the connection. If the size field in the header is zero
    /// it is set from the chunk length; a non-zero size larger than the chunk is an error,
    /// and a smaller one truncates the send to the declared size. It is safe to call this
    /// method concurrently.
    pub async fn send_chunk(&self, chunk: &mut [u8], deadline: Option<Instant>) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(|| {
            Error::local(StatusCode::BadConnectionClosed, "connection is not open")
        })?;

        if chunk.len() < MESSAGE_HEADER_LEN {
            return Err(Error::local(
                StatusCode::BadTcpInternalError,
                "chunk is smaller than a message header",
            ));
        }
        let declared = LittleEndian::read_u32(&chunk[4..8]) as usize;
        let send_len = if declared == 0 {
            let len = chunk.len() as u32;
            LittleEndian::write_u32(&mut chunk[4..8], len);
            chunk.len()
        } else if declared > chunk.len() {
            return Err(Error::local(
                StatusCode::BadTcpInternalError,
                "size in header larger than chunk byte size",
            ));
        } else {
            declared
        };

        with_deadline(deadline, async {
            writer
                .write_all(&chunk[..send_len])
                .await
                .map_err(wrap_io_error)
        })
        .await
    }

    /// Reads one whole framed chunk into `buffer` as an atomic operation and returns its
    /// size. Secure channel messages (OPN, CLO, MSG) pass through; handshake types are
    /// rejected and an ERR message is raised as a remote error. It is safe to call this
    /// method concurrently.
    pub async fn recv_chunk(
        &self,
        buffer: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<usize, Error> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or_else(|| {
            Error::local(StatusCode::BadConnectionClosed, "connection is not open")
        })?;

        with_deadline(deadline, async {
            reader
                .read_exact(&mut buffer[..MESSAGE_HEADER_LEN])
                .await
                .map_err(wrap_io_error)?;
            let message_size = LittleEndian::read_u32(&buffer[4..8]) as usize;
            if message_size > buffer.len() {
                return Err(Error::local(
                    StatusCode::BadTcpMessageTooLarge,
                    format!(
                        "message size {} exceeds receive buffer size {}",
                        message_size,
                        buffer.len()
                    ),
                ));
            }
            if message_size < MESSAGE_HEADER_LEN {
                return Err(Error::local(
                    StatusCode::BadTcpInternalError,
                    format!("illegal message size {}", message_size),
                ));
            }
            reader
                .read_exact(&mut buffer[MESSAGE_HEADER_LEN..message_size])
                .await
                .map_err(wrap_io_error)?;

            match &buffer[0..3] {
                b"OPN" | b"CLO" | b"MSG" => {
                    // Legal secure channel message type, pass along
                    Ok(message_size)
                }
                b"HEL" | b"ACK" | b"RHE" => Err(Error::local(
                    StatusCode::BadTcpMessageTypeInvalid,
                    "message type HEL, ACK and RHE only allowed during handshake",
                )),
                b"ERR" => {
                    let mut stream = Cursor::new(&buffer[..message_size]);
                    let msg = ErrorMessage::decode(&mut stream, &self.decoding_options)
                        .map_err(Error::from)?;
                    Err(Error::remote(
                        StatusCode::from_bits_truncate(msg.error),
                        msg.reason.as_ref(),
                    ))
                }
                other => Err(Error::local(
                    StatusCode::BadTcpMessageTypeInvalid,
                    format!("illegal message type {:?}", other),
                )),
            }
        })
        .await
    }

    /// Closes the connection and moves the manager to closed, only when the original
    /// state is connected, otherwise this is a no-op. It is therefore safe to call
    /// `close` multiple times.
    pub async fn close(&self) -> Result<(), Error> {
        if self
            .state
            .compare_exchange(
                CONN_STATE_CONNECTED,
                CONN_STATE_CLOSING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }
        // Shut the write half down; a reader blocked in recv_chunk unblocks on the EOF
        // or reset that follows
        {
            let mut writer = self.writer.lock().await;
            if let Some(mut write) = writer.take() {
                let _ = write.shutdown().await;
            }
        }
        if self
            .state
            .compare_exchange(
                CONN_STATE_CLOSING,
                CONN_STATE_CLOSED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            panic!("inconsistent connection state leaving close");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::core::comms::tcp_types::MIN_CHUNK_SIZE;

    /// A dial fn that hands out the streams in the order given, one per connect.
    fn canned_dial(streams: Vec<DuplexStream>) -> DialFn {
        let streams = Arc::new(parking_lot::Mutex::new(
            streams.into_iter().collect::<Vec<_>>(),
        ));
        Arc::new(move |_deadline| {
            let streams = streams.clone();
            Box::pin(async move {
                let mut streams = streams.lock();
                if streams.is_empty() {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no stream"))
                } else {
                    let stream: Box<dyn IoStream> = Box::new(streams.remove(0));
                    Ok(stream)
                }
            })
        })
    }

    fn new_manager(streams: Vec<DuplexStream>) -> ConnectionManager {
        ConnectionManager::new(
            canned_dial(streams),
            "opc.tcp://localhost:4840/",
            MessageChunking::default(),
            DecodingOptions::test(),
        )
    }

    /// Reads the HEL from the server side and answers with the given message bytes.
    async fn answer_hello(server: &mut DuplexStream, response: Vec<u8>) -> HelloMessage {
        let mut header = [0u8; MESSAGE_HEADER_LEN];
        server.read_exact(&mut header).await.unwrap();
        let size = LittleEndian::read_u32(&header[4..8]) as usize;
        let mut body = vec![0u8; size - MESSAGE_HEADER_LEN];
        server.read_exact(&mut body).await.unwrap();
        let mut data = header.to_vec();
        data.extend_from_slice(&body);
        let hello =
            HelloMessage::decode(&mut Cursor::new(data), &DecodingOptions::test()).unwrap();
        server.write_all(&response).await.unwrap();
        hello
    }

    #[tokio::test]
    async fn connect_handshake_adopts_ack_chunking() {
        let (client, mut server) = tokio::io::duplex(HANDSHAKE_MAX_SIZE);
        let manager = new_manager(vec![client]);

        let ack_chunking = MessageChunking {
            receive_buffer_size: MIN_CHUNK_SIZE as u32,
            send_buffer_size: MIN_CHUNK_SIZE as u32,
            max_message_size: 1024 * 1024,
            max_chunk_count: 16,
        };
        let server_task = tokio::spawn(async move {
            let hello =
                answer_hello(&mut server, AcknowledgeMessage::new(ack_chunking).encode_to_vec())
                    .await;
            assert_eq!(hello.endpoint_url.as_ref(), "opc.tcp://localhost:4840/");
            server
        });

        manager.connect(None).await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(manager.chunking(), Some(ack_chunking));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn connect_rejects_small_ack_buffers() {
        let (client, mut server) = tokio::io::duplex(HANDSHAKE_MAX_SIZE);
        let manager = new_manager(vec![client]);

        let ack_chunking = MessageChunking {
            receive_buffer_size: 8191,
            send_buffer_size: MIN_CHUNK_SIZE as u32,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        tokio::spawn(async move {
            answer_hello(&mut server, AcknowledgeMessage::new(ack_chunking).encode_to_vec())
                .await;
            server
        });

        let err = manager.connect(None).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadConnectionRejected);
        assert!(!manager.is_connected());
        // A failed first connect falls back to the never-connected state
        assert!(manager.chunking().is_none());
    }

    #[tokio::test]
    async fn connect_surfaces_remote_error() {
        let (client, mut server) = tokio::io::duplex(HANDSHAKE_MAX_SIZE);
        let manager = new_manager(vec![client]);

        tokio::spawn(async move {
            answer_hello(
                &mut server,
                ErrorMessage::from_status_code(StatusCode::BadTcpServerTooBusy).encode_to_vec(),
            )
            .await;
            server
        });

        let err = manager.connect(None).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadTcpServerTooBusy);
        assert_eq!(err.origin(), crate::core::comms::error::Origin::Remote);
    }

    #[tokio::test]
    async fn connect_rejects_non_handshake_reply() {
        let (client, mut server) = tokio::io::duplex(HANDSHAKE_MAX_SIZE);
        let manager = new_manager(vec![client]);

        tokio::spawn(async move {
            // An OPN chunk is not a legal handshake response
            let mut chunk = b"OPNF".to_vec();
            chunk.extend_from_slice(&12u32.to_le_bytes());
            chunk.extend_from_slice(&0u32.to_le_bytes());
            answer_hello(&mut server, chunk).await;
            server
        });

        let err = manager.connect(None).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadTcpMessageTypeInvalid);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_deadline_in_past_times_out() {
        let (client, _server) = tokio::io::duplex(HANDSHAKE_MAX_SIZE);
        let manager = new_manager(vec![client]);
        // The server never answers; a deadline at now must fail immediately
        let err = manager.connect(Some(Instant::now())).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadTimeout);
    }

    async fn connected_manager() -> (ConnectionManager, DuplexStream) {
        let (client, mut server) = tokio::io::duplex(HANDSHAKE_MAX_SIZE);
        let manager = new_manager(vec![client]);
        let server_task = tokio::spawn(async move {
            answer_hello(
                &mut server,
                AcknowledgeMessage::new(MessageChunking::default()).encode_to_vec(),
            )
            .await;
            server
        });
        manager.connect(None).await.unwrap();
        let server = server_task.await.unwrap();
        (manager, server)
    }

    #[tokio::test]
    async fn send_chunk_sets_zero_size_from_length() {
        let (manager, mut server) = connected_manager().await;

        let mut chunk = b"MSGF".to_vec();
        chunk.extend_from_slice(&0u32.to_le_bytes());
        chunk.extend_from_slice(&[0xAA; 4]);
        manager.send_chunk(&mut chunk, None).await.unwrap();
        assert_eq!(LittleEndian::read_u32(&chunk[4..8]), 12);

        let mut received = [0u8; 12];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..], &chunk[..]);
    }

    #[tokio::test]
    async fn send_chunk_rejects_oversized_header() {
        let (manager, _server) = connected_manager().await;
        let mut chunk = b"MSGF".to_vec();
        chunk.extend_from_slice(&100u32.to_le_bytes());
        let err = manager.send_chunk(&mut chunk, None).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadTcpInternalError);
    }

    #[tokio::test]
    async fn recv_chunk_passes_secure_messages() {
        let (manager, mut server) = connected_manager().await;

        let mut chunk = b"MSGF".to_vec();
        chunk.extend_from_slice(&16u32.to_le_bytes());
        chunk.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        server.write_all(&chunk).await.unwrap();

        let mut buffer = vec![0u8; 64];
        let size = manager.recv_chunk(&mut buffer, None).await.unwrap();
        assert_eq!(size, 16);
        assert_eq!(&buffer[..16], &chunk[..]);
    }

    #[tokio::test]
    async fn recv_chunk_rejects_too_large_message() {
        let (manager, mut server) = connected_manager().await;

        let mut chunk = b"MSGF".to_vec();
        chunk.extend_from_slice(&4096u32.to_le_bytes());
        server.write_all(&chunk).await.unwrap();

        let mut buffer = vec![0u8; 64];
        let err = manager.recv_chunk(&mut buffer, None).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadTcpMessageTooLarge);
    }

    #[tokio::test]
    async fn recv_chunk_rejects_handshake_types() {
        let (manager, mut server) = connected_manager().await;

        let hello = HelloMessage::new("opc.tcp://x/", MessageChunking::default());
        server.write_all(&hello.encode_to_vec()).await.unwrap();

        let mut buffer = vec![0u8; HANDSHAKE_MAX_SIZE];
        let err = manager.recv_chunk(&mut buffer, None).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadTcpMessageTypeInvalid);
    }

    #[tokio::test]
    async fn recv_chunk_surfaces_remote_error() {
        let (manager, mut server) = connected_manager().await;

        let error = ErrorMessage::from_status_code(StatusCode::BadSecureChannelClosed);
        server.write_all(&error.encode_to_vec()).await.unwrap();

        let mut buffer = vec![0u8; 256];
        let err = manager.recv_chunk(&mut buffer, None).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadSecureChannelClosed);
        assert_eq!(err.origin(), crate::core::comms::error::Origin::Remote);
    }

    #[tokio::test]
    async fn reconnect_requires_identical_chunking() {
        let (client1, mut server1) = tokio::io::duplex(HANDSHAKE_MAX_SIZE);
        let (client2, mut server2) = tokio::io::duplex(HANDSHAKE_MAX_SIZE);
        let manager = new_manager(vec![client1, client2]);

        let first = MessageChunking::default();
        tokio::spawn(async move {
            answer_hello(&mut server1, AcknowledgeMessage::new(first).encode_to_vec()).await;
            server1
        });
        manager.connect(None).await.unwrap();
        manager.close().await.unwrap();
        assert!(!manager.is_connected());

        // The second ACK negotiates different values, which must be refused
        let second = MessageChunking {
            max_chunk_count: 5,
            ..MessageChunking::default()
        };
        tokio::spawn(async move {
            answer_hello(&mut server2, AcknowledgeMessage::new(second).encode_to_vec()).await;
            server2
        });
        let err = manager.connect(None).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadConnectionClosed);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (manager, _server) = connected_manager().await;
        manager.close().await.unwrap();
        manager.close().await.unwrap();
        assert!(!manager.is_connected());
        // Closed managers fail sends fast
        let mut chunk = b"MSGF".to_vec();
        chunk.extend_from_slice(&0u32.to_le_bytes());
        let err = manager.send_chunk(&mut chunk, None).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadConnectionClosed);
        drop(_server);
    }

    #[tokio::test]
    async fn connect_while_connected_is_noop() {
        let (manager, _server) = connected_manager().await;
        // No second stream is available, so this would fail if it actually dialed
        manager.connect(None).await.unwrap();
        assert!(manager.is_connected());
    }
}
