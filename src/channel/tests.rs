// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Secure channel tests against a scripted peer on an in-memory duplex stream.

use std::{
    io::{self, Cursor},
    sync::atomic::Ordering,
    sync::Arc,
    time::Duration,
};

use byteorder::{ByteOrder, LittleEndian};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::Instant;

use super::*;
use crate::core::comms::{
    conn_mgr::{DialFn, IoStream},
    error::Origin,
    security_header::{
        AbortChunkBody, AsymmetricSecurityHeader, MessageIsFinalType, SecureMessageHeader,
        SequenceHeader, SymmetricSecurityHeader, SECURE_MESSAGE_HEADER_SIZE,
    },
    tcp_types::{AcknowledgeMessage, HelloMessage, MessageChunking, MESSAGE_HEADER_LEN},
};
use crate::types::{
    encoding::{BinaryEncoder, DecodingOptions},
    node_id::NodeId,
    service_types::*,
    status_code::StatusCode,
    DateTime, UAString,
};

fn canned_dial(streams: Vec<DuplexStream>) -> DialFn {
    let streams = Arc::new(parking_lot::Mutex::new(streams));
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

/// One parsed chunk as seen by the scripted peer.
struct ReceivedChunk {
    header: SecureMessageHeader,
    token_id: Option<u32>,
    sequence_header: SequenceHeader,
    body: Vec<u8>,
}

/// The server end of the wire, scripted by each test.
struct MockServer {
    stream: DuplexStream,
    decoding_options: DecodingOptions,
    channel_id: u32,
    token_id: u32,
    send_sequence_number: u32,
}

impl MockServer {
    fn new(stream: DuplexStream) -> MockServer {
        MockServer {
            stream,
            decoding_options: DecodingOptions::default(),
            channel_id: 5,
            token_id: 1,
            send_sequence_number: 0,
        }
    }

    /// Reads the client's HEL and replies with an ACK carrying `chunking`.
    async fn handshake(&mut self, chunking: MessageChunking) -> HelloMessage {
        let data = self.read_frame().await;
        let hello =
            HelloMessage::decode(&mut Cursor::new(data), &self.decoding_options).unwrap();
        let ack = AcknowledgeMessage::new(chunking);
        self.stream.write_all(&ack.encode_to_vec()).await.unwrap();
        hello
    }

    /// Reads one raw frame - header plus body - off the wire.
    async fn read_frame(&mut self) -> Vec<u8> {
        let mut header = [0u8; MESSAGE_HEADER_LEN];
        self.stream.read_exact(&mut header).await.unwrap();
        let size = LittleEndian::read_u32(&header[4..8]) as usize;
        let mut data = header.to_vec();
        data.resize(size, 0);
        self.stream
            .read_exact(&mut data[MESSAGE_HEADER_LEN..])
            .await
            .unwrap();
        data
    }

    /// Reads and parses one secure channel chunk.
    async fn read_chunk(&mut self) -> ReceivedChunk {
        let data = self.read_frame().await;
        let mut stream = Cursor::new(&data[..]);
        let header =
            SecureMessageHeader::decode(&mut stream, &self.decoding_options).unwrap();
        let token_id = match header.message_type {
            MessageChunkType::Message => {
                Some(
                    SymmetricSecurityHeader::decode(&mut stream, &self.decoding_options)
                        .unwrap()
                        .token_id,
                )
            }
            _ => {
                let _ = AsymmetricSecurityHeader::decode(&mut stream, &self.decoding_options)
                    .unwrap();
                None
            }
        };
        let sequence_header =
            SequenceHeader::decode(&mut stream, &self.decoding_options).unwrap();
        let body = data[stream.position() as usize..].to_vec();
        ReceivedChunk {
            header,
            token_id,
            sequence_header,
            body,
        }
    }

    fn next_sequence_number(&mut self) -> u32 {
        self.send_sequence_number += 1;
        self.send_sequence_number
    }

    /// Writes one chunk with the given flag and payload bytes.
    async fn write_chunk(
        &mut self,
        message_type: MessageChunkType,
        is_final: MessageIsFinalType,
        sequence_number: u32,
        request_id: u32,
        payload: &[u8],
    ) {
        let security_header = match message_type {
            MessageChunkType::Message => SecurityHeader::Symmetric(SymmetricSecurityHeader {
                token_id: self.token_id,
            }),
            _ => SecurityHeader::Asymmetric(AsymmetricSecurityHeader::none()),
        };
        let message_size = SECURE_MESSAGE_HEADER_SIZE
            + security_header.byte_len()
            + 8
            + payload.len();
        let mut chunk = Cursor::new(Vec::with_capacity(message_size));
        SecureMessageHeader {
            message_type,
            is_final,
            message_size: message_size as u32,
            secure_channel_id: self.channel_id,
        }
        .encode(&mut chunk)
        .unwrap();
        security_header.encode(&mut chunk).unwrap();
        SequenceHeader {
            sequence_number,
            request_id,
        }
        .encode(&mut chunk)
        .unwrap();
        std::io::Write::write_all(&mut chunk, payload).unwrap();
        self.stream.write_all(chunk.get_ref()).await.unwrap();
    }

    /// Reads the client's OPN request and issues (or renews) a token.
    async fn handle_open(&mut self) -> OpenSecureChannelRequest {
        let chunk = self.read_chunk().await;
        assert_eq!(
            chunk.header.message_type,
            MessageChunkType::OpenSecureChannel
        );
        assert_eq!(chunk.header.is_final, MessageIsFinalType::Final);

        let mut stream = Cursor::new(&chunk.body[..]);
        let node_id = NodeId::decode(&mut stream, &self.decoding_options).unwrap();
        assert_eq!(
            node_id.as_object_id().unwrap(),
            ObjectId::OpenSecureChannelRequest_Encoding_DefaultBinary
        );
        let request =
            OpenSecureChannelRequest::decode(&mut stream, &self.decoding_options).unwrap();

        let response = OpenSecureChannelResponse {
            response_header: ResponseHeader {
                timestamp: DateTime::now(),
                request_handle: request.request_header.request_handle,
                ..Default::default()
            },
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id: self.channel_id,
                token_id: self.token_id,
                created_at: DateTime::now(),
                revised_lifetime: 600_000,
            },
            server_nonce: ByteString::null(),
        };
        let mut payload = Cursor::new(Vec::new());
        NodeId::from(ObjectId::OpenSecureChannelResponse_Encoding_DefaultBinary)
            .encode(&mut payload)
            .unwrap();
        response.encode(&mut payload).unwrap();
        let sequence_number = self.next_sequence_number();
        self.write_chunk(
            MessageChunkType::OpenSecureChannel,
            MessageIsFinalType::Final,
            sequence_number,
            chunk.sequence_header.request_id,
            payload.get_ref(),
        )
        .await;
        request
    }

    /// Replies to a MSG request with a response body split across `chunk_sizes`.
    async fn send_response(&mut self, request_id: u32, node_id: &NodeId, body: &[u8]) {
        self.send_response_chunks(request_id, node_id, body, &[usize::MAX]).await;
    }

    async fn send_response_chunks(
        &mut self,
        request_id: u32,
        node_id: &NodeId,
        body: &[u8],
        chunk_sizes: &[usize],
    ) {
        let mut payload = Cursor::new(Vec::new());
        node_id.encode(&mut payload).unwrap();
        std::io::Write::write_all(&mut payload, body).unwrap();
        let payload = payload.into_inner();

        let mut offset: usize = 0;
        for (i, chunk_size) in chunk_sizes.iter().enumerate() {
            let end = payload.len().min(offset.saturating_add(*chunk_size));
            let is_final = if i == chunk_sizes.len() - 1 {
                assert_eq!(end, payload.len(), "chunk sizes must cover the payload");
                MessageIsFinalType::Final
            } else {
                MessageIsFinalType::Intermediate
            };
            let sequence_number = self.next_sequence_number();
            self.write_chunk(
                MessageChunkType::Message,
                is_final,
                sequence_number,
                request_id,
                &payload[offset..end],
            )
            .await;
            offset = end;
        }
    }
}

/// Connects a channel against a scripted peer that completes the handshake and the first
/// open, then hands the server back for the test body.
async fn connected_channel(
    chunking: MessageChunking,
) -> (Arc<SecureChannel>, MockServer) {
    let (client, server) = tokio::io::duplex(1024 * 256);
    let connector = Connector {
        dial: canned_dial(vec![client]),
        security: ChannelSecurity::none(),
        chunking,
        buffering: MessageBuffering::default(),
        timeouts: ChannelTimeouts::default(),
    };
    let server_task = tokio::spawn(async move {
        let mut server = MockServer::new(server);
        server.handshake(chunking).await;
        let request = server.handle_open().await;
        assert_eq!(request.request_type, SecurityTokenRequestType::Issue);
        assert_eq!(request.security_mode, MessageSecurityMode::None);
        server
    });
    let channel = connector.connect("opc.tcp://localhost:4840/").await.unwrap();
    let server = server_task.await.unwrap();
    (channel, server)
}

fn test_request_node_id() -> NodeId {
    NodeId::new(0, 631u32)
}

fn test_response_node_id() -> NodeId {
    NodeId::new(0, 634u32)
}

#[tokio::test]
async fn connect_opens_channel_and_adopts_token() {
    let (channel, _server) = connected_channel(MessageChunking::default()).await;
    let token = channel.security_token();
    assert_eq!(token.channel_id, 5);
    assert_eq!(token.token_id, 1);
    assert_eq!(token.revised_lifetime, 600_000);
}

#[tokio::test]
async fn send_receives_own_response() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    let server_task = tokio::spawn(async move {
        let chunk = server.read_chunk().await;
        assert_eq!(chunk.header.message_type, MessageChunkType::Message);
        assert_eq!(chunk.header.secure_channel_id, 5);
        assert_eq!(chunk.token_id, Some(1));
        // The client's OPN used sequence number 1
        assert_eq!(chunk.sequence_header.sequence_number, 2);
        server
            .send_response(
                chunk.sequence_header.request_id,
                &test_response_node_id(),
                b"response body",
            )
            .await;
        server
    });

    let response = channel
        .send(test_request_node_id(), b"request body", None)
        .await
        .unwrap();
    assert_eq!(response.node_id.node_id, test_response_node_id());
    assert_eq!(response.body, b"response body");
    server_task.await.unwrap();
}

#[tokio::test]
async fn chunked_response_is_reassembled() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    let body: Vec<u8> = (0..1000u32).flat_map(|v| v.to_le_bytes()).collect();
    let expected = body.clone();
    let server_task = tokio::spawn(async move {
        let chunk = server.read_chunk().await;
        server
            .send_response_chunks(
                chunk.sequence_header.request_id,
                &test_response_node_id(),
                &body,
                &[1000, 1000, usize::MAX],
            )
            .await;
        server
    });

    let response = channel
        .send(test_request_node_id(), b"request", None)
        .await
        .unwrap();
    assert_eq!(response.body, expected);
    server_task.await.unwrap();
}

#[tokio::test]
async fn large_request_is_chunked() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    // Three chunks worth of request body at the default 64 KiB send buffer
    let body = vec![0x5Au8; 150_000];
    let expected = body.clone();
    let server_task = tokio::spawn(async move {
        let mut payload = Vec::new();
        let mut flags = Vec::new();
        let mut last_sequence_number = 1;
        let request_id = loop {
            let chunk = server.read_chunk().await;
            assert_eq!(
                chunk.sequence_header.sequence_number,
                last_sequence_number + 1
            );
            last_sequence_number = chunk.sequence_header.sequence_number;
            flags.push(chunk.header.is_final);
            payload.extend_from_slice(&chunk.body);
            if chunk.header.is_final == MessageIsFinalType::Final {
                break chunk.sequence_header.request_id;
            }
        };
        assert_eq!(flags.len(), 3);
        assert_eq!(flags[0], MessageIsFinalType::Intermediate);
        assert_eq!(flags[1], MessageIsFinalType::Intermediate);
        assert_eq!(flags[2], MessageIsFinalType::Final);
        // The payload starts with the request node id
        let mut stream = Cursor::new(&payload[..]);
        let node_id = NodeId::decode(&mut stream, &DecodingOptions::default()).unwrap();
        assert_eq!(node_id, test_request_node_id());
        assert_eq!(&payload[stream.position() as usize..], &expected[..]);

        server
            .send_response(request_id, &test_response_node_id(), b"ok")
            .await;
        server
    });

    let response = channel
        .send(test_request_node_id(), &body, None)
        .await
        .unwrap();
    assert_eq!(response.body, b"ok");
    server_task.await.unwrap();
}

#[tokio::test]
async fn send_aborts_when_chunk_budget_runs_out() {
    let chunking = MessageChunking {
        max_chunk_count: 2,
        ..MessageChunking::default()
    };
    let (channel, mut server) = connected_channel(chunking).await;

    let server_task = tokio::spawn(async move {
        // Two data chunks, then the abort chunk replaces the third
        let first = server.read_chunk().await;
        assert_eq!(first.header.is_final, MessageIsFinalType::Intermediate);
        let second = server.read_chunk().await;
        assert_eq!(second.header.is_final, MessageIsFinalType::Intermediate);
        let third = server.read_chunk().await;
        assert_eq!(third.header.is_final, MessageIsFinalType::FinalError);
        let abort =
            AbortChunkBody::decode(&mut Cursor::new(&third.body[..]), &DecodingOptions::default())
                .unwrap();
        assert_eq!(abort.status, StatusCode::BadTcpMessageTooLarge.bits());
        assert!(abort.reason.as_ref().contains("maximum number of chunks"));
        server
    });

    // Needs more than two chunks at 64 KiB each
    let body = vec![0u8; 200_000];
    let err = channel
        .send(test_request_node_id(), &body, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::BadTcpMessageTooLarge);
    server_task.await.unwrap();
}

#[tokio::test]
async fn abort_chunk_from_peer_fails_the_request() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    let server_task = tokio::spawn(async move {
        let chunk = server.read_chunk().await;
        let abort = AbortChunkBody {
            status: StatusCode::BadResponseTooLarge.bits(),
            reason: UAString::from("response abandoned"),
        };
        let sequence_number = server.next_sequence_number();
        server
            .write_chunk(
                MessageChunkType::Message,
                MessageIsFinalType::FinalError,
                sequence_number,
                chunk.sequence_header.request_id,
                &abort.encode_to_vec(),
            )
            .await;
        server
    });

    let err = channel
        .send(test_request_node_id(), b"request", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::BadResponseTooLarge);
    assert_eq!(err.origin(), Origin::Remote);
    assert_eq!(err.reason(), Some("response abandoned"));
    server_task.await.unwrap();
}

#[tokio::test]
async fn invalid_sequence_number_fails_pending_requests() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    let server_task = tokio::spawn(async move {
        let chunk = server.read_chunk().await;
        // Skip ahead in the sequence space; the receiver must refuse the chunk
        server
            .write_chunk(
                MessageChunkType::Message,
                MessageIsFinalType::Final,
                99,
                chunk.sequence_header.request_id,
                &test_response_node_id().encode_to_vec(),
            )
            .await;
        server
    });

    let err = channel
        .send(test_request_node_id(), b"request", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::BadRequestInterrupted);
    server_task.await.unwrap();
}

#[tokio::test]
async fn mismatched_channel_id_fails_pending_requests() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    let server_task = tokio::spawn(async move {
        let chunk = server.read_chunk().await;
        server.channel_id = 99;
        let sequence_number = server.next_sequence_number();
        server
            .write_chunk(
                MessageChunkType::Message,
                MessageIsFinalType::Final,
                sequence_number,
                chunk.sequence_header.request_id,
                &test_response_node_id().encode_to_vec(),
            )
            .await;
        server
    });

    let err = channel
        .send(test_request_node_id(), b"request", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::BadRequestInterrupted);
    server_task.await.unwrap();
}

#[tokio::test]
async fn concurrent_sends_each_get_their_own_response() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    let server_task = tokio::spawn(async move {
        let first = server.read_chunk().await;
        let second = server.read_chunk().await;
        assert_ne!(
            first.sequence_header.request_id,
            second.sequence_header.request_id
        );
        // Answer in reverse order; responses must still reach the right caller
        for chunk in [second, first] {
            let mut stream = Cursor::new(&chunk.body[..]);
            let _ = NodeId::decode(&mut stream, &DecodingOptions::default()).unwrap();
            let mut echo = b"echo:".to_vec();
            echo.extend_from_slice(&chunk.body[stream.position() as usize..]);
            server
                .send_response(
                    chunk.sequence_header.request_id,
                    &test_response_node_id(),
                    &echo,
                )
                .await;
        }
        server
    });

    let (a, b) = tokio::join!(
        channel.send(test_request_node_id(), b"alpha", None),
        channel.send(test_request_node_id(), b"beta", None),
    );
    assert_eq!(a.unwrap().body, b"echo:alpha");
    assert_eq!(b.unwrap().body, b"echo:beta");
    server_task.await.unwrap();
}

#[tokio::test]
async fn stale_chunks_after_cancellation_are_discarded() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    // The server sits on the first request until after the deadline
    let first_chunk = tokio::spawn(async move {
        let chunk = server.read_chunk().await;
        (server, chunk)
    });

    let deadline = Some(Instant::now() + Duration::from_millis(100));
    let err = channel
        .send(test_request_node_id(), b"will time out", deadline)
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::BadTimeout);

    let (mut server, stale) = first_chunk.await.unwrap();
    let stale_request_id = stale.sequence_header.request_id;

    let server_task = tokio::spawn(async move {
        // Deliver the response for the cancelled request; nobody is listening and the
        // receiver must discard it without disturbing the sequence stream
        server
            .send_response(stale_request_id, &test_response_node_id(), b"too late")
            .await;
        // Then serve the next request normally
        let chunk = server.read_chunk().await;
        assert_ne!(chunk.sequence_header.request_id, stale_request_id);
        server
            .send_response(chunk.sequence_header.request_id, &test_response_node_id(), b"fresh")
            .await;
        server
    });

    let response = channel
        .send(test_request_node_id(), b"second", None)
        .await
        .unwrap();
    assert_eq!(response.body, b"fresh");
    server_task.await.unwrap();
}

#[tokio::test]
async fn sequence_numbers_wrap_only_on_open() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    // Pretend both directions are nearly out of sequence numbers
    channel.send_state.lock().await.last_sequence_number = u32::MAX - 100;
    channel
        .recv_state
        .last_sequence_number
        .store(u32::MAX - 50, Ordering::SeqCst);
    server.send_sequence_number = 700 - 1;

    let server_task = tokio::spawn(async move {
        let chunk = server.read_chunk().await;
        assert_eq!(
            chunk.header.message_type,
            MessageChunkType::OpenSecureChannel
        );
        // The renew request restarted the outbound numbering
        assert_eq!(chunk.sequence_header.sequence_number, 1024);
        let mut stream = Cursor::new(&chunk.body[..]);
        let _ = NodeId::decode(&mut stream, &DecodingOptions::default()).unwrap();
        let request =
            OpenSecureChannelRequest::decode(&mut stream, &DecodingOptions::default()).unwrap();
        assert_eq!(request.request_type, SecurityTokenRequestType::Renew);

        // Renewals rotate the token id; the wrapped inbound sequence number must be
        // accepted because this is an OPN chunk
        server.token_id = 2;
        let response = OpenSecureChannelResponse {
            response_header: ResponseHeader {
                timestamp: DateTime::now(),
                request_handle: request.request_header.request_handle,
                ..Default::default()
            },
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id: server.channel_id,
                token_id: server.token_id,
                created_at: DateTime::now(),
                revised_lifetime: 600_000,
            },
            server_nonce: ByteString::null(),
        };
        let mut payload = Cursor::new(Vec::new());
        NodeId::from(ObjectId::OpenSecureChannelResponse_Encoding_DefaultBinary)
            .encode(&mut payload)
            .unwrap();
        response.encode(&mut payload).unwrap();
        let sequence_number = server.next_sequence_number();
        assert_eq!(sequence_number, 700);
        server
            .write_chunk(
                MessageChunkType::OpenSecureChannel,
                MessageIsFinalType::Final,
                sequence_number,
                chunk.sequence_header.request_id,
                payload.get_ref(),
            )
            .await;
        server
    });

    let deadline = Some(Instant::now() + Duration::from_secs(5));
    channel.open(deadline).await.unwrap();
    let token = channel.security_token();
    // Channel id is adopted on first open only; the token id rotates on renew
    assert_eq!(token.channel_id, 5);
    assert_eq!(token.token_id, 2);
    server_task.await.unwrap();
}

#[tokio::test]
async fn open_service_fault_is_surfaced() {
    let (client, server) = tokio::io::duplex(1024 * 256);
    let connector = Connector::new(canned_dial(vec![client]), ChannelSecurity::none());
    let server_task = tokio::spawn(async move {
        let mut server = MockServer::new(server);
        server.handshake(MessageChunking::default()).await;
        let chunk = server.read_chunk().await;
        let fault = ServiceFault {
            response_header: ResponseHeader {
                timestamp: DateTime::now(),
                service_result: StatusCode::BadSecurityPolicyRejected,
                ..Default::default()
            },
        };
        let mut payload = Cursor::new(Vec::new());
        NodeId::from(ObjectId::ServiceFault_Encoding_DefaultBinary)
            .encode(&mut payload)
            .unwrap();
        fault.encode(&mut payload).unwrap();
        let sequence_number = server.next_sequence_number();
        server
            .write_chunk(
                MessageChunkType::OpenSecureChannel,
                MessageIsFinalType::Final,
                sequence_number,
                chunk.sequence_header.request_id,
                payload.get_ref(),
            )
            .await;
    });

    let err = connector
        .connect("opc.tcp://localhost:4840/")
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::BadSecurityPolicyRejected);
    assert_eq!(err.origin(), Origin::Remote);
    server_task.await.unwrap();
}

#[tokio::test]
async fn sign_mode_is_not_implemented() {
    let (client, _server) = tokio::io::duplex(1024);
    let mut security = ChannelSecurity::none();
    security.security_mode = MessageSecurityMode::Sign;
    let err = Connector::new(canned_dial(vec![client]), security)
        .connect("opc.tcp://localhost:4840/")
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::BadNotImplemented);
}

#[tokio::test]
async fn close_sends_clo_and_closes_connection() {
    let (channel, mut server) = connected_channel(MessageChunking::default()).await;

    let server_task = tokio::spawn(async move {
        let chunk = server.read_chunk().await;
        assert_eq!(
            chunk.header.message_type,
            MessageChunkType::CloseSecureChannel
        );
        let mut stream = Cursor::new(&chunk.body[..]);
        let node_id = NodeId::decode(&mut stream, &DecodingOptions::default()).unwrap();
        assert_eq!(
            node_id.as_object_id().unwrap(),
            ObjectId::CloseSecureChannelRequest_Encoding_DefaultBinary
        );
        server
    });

    channel.close().await.unwrap();
    server_task.await.unwrap();

    let err = channel
        .send(test_request_node_id(), b"after close", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::BadConnectionClosed);
}
