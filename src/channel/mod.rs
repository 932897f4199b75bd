// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The secure channel - the layer above UACP that opens a cryptographic session (token +
//! channel id), multiplexes concurrent request / response pairs by request id, splits
//! outbound messages into chunks and reassembles inbound ones, and enforces sequence
//! number ordering.
//!
//! Only `MessageSecurityMode::None` is implemented; configuring signing or encryption is
//! rejected up front with `BadNotImplemented`.

mod pool;
mod recv;
mod send;

#[cfg(test)]
mod tests;

use std::{
    io::Cursor,
    sync::atomic::{AtomicU32, Ordering},
    sync::Arc,
    time::Duration,
};

use tokio::time::Instant;

use crate::core::comms::{
    conn_mgr::{tcp_dial, ConnectionManager, DialFn},
    error::Error,
    security_header::{
        AsymmetricSecurityHeader, MessageChunkType, SecurityHeader, SecurityPolicy,
        SymmetricSecurityHeader,
    },
    tcp_types::{MessageChunking, MAX_MESSAGE_STRING_LEN},
};
use crate::types::{
    encoding::{BinaryEncoder, DecodingOptions},
    node_id::ExpandedNodeId,
    service_types::{
        ChannelSecurityToken, CloseSecureChannelRequest, MessageSecurityMode, ObjectId,
        OpenSecureChannelRequest, OpenSecureChannelResponse, RequestHeader,
        SecurityTokenRequestType, ServiceFault,
    },
    status_code::StatusCode,
    ByteString,
};

use self::{
    recv::RecvState,
    send::{OutgoingMessage, SendState},
};

/// Sequence numbers may wrap only when the current number exceeds this threshold.
pub(crate) const SEQUENCE_NUMBER_WRAP: u32 = u32::MAX - 1024;
/// The sequence number an OPN message restarts at after a wrap.
pub(crate) const SEQUENCE_NUMBER_RESTART: u32 = 1024;

/// How many buffers and queues the receive side of a channel sets up. Most users should
/// use the defaults; fine tuning may be relevant when many requests run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageBuffering {
    /// How many receive buffers are available. This bounds how far the receiver can read
    /// ahead of the listeners.
    pub recv_buffer_count: usize,
    /// How many send operations can concurrently wait for a reply.
    pub recv_queue_count: usize,
}

impl Default for MessageBuffering {
    fn default() -> Self {
        MessageBuffering {
            recv_buffer_count: 4,
            recv_queue_count: 24,
        }
    }
}

/// Timeouts used when connecting and renewing a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimeouts {
    /// How long the entire connection process (UACP dial, handshake and secure channel
    /// open) may last before giving up.
    pub connect_timeout: Duration,
    /// How long the client asks a security token to stay valid. The server may respond
    /// with a revised lifetime; the channel renews itself at 75% of that.
    pub request_lifetime: Duration,
}

impl Default for ChannelTimeouts {
    fn default() -> Self {
        ChannelTimeouts {
            connect_timeout: Duration::from_secs(10),
            request_lifetime: Duration::from_secs(3600),
        }
    }
}

/// The security settings requested when opening a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSecurity {
    pub security_header: AsymmetricSecurityHeader,
    pub security_mode: MessageSecurityMode,
}

impl Default for ChannelSecurity {
    fn default() -> Self {
        Self::none()
    }
}

impl ChannelSecurity {
    pub fn none() -> ChannelSecurity {
        ChannelSecurity {
            security_header: AsymmetricSecurityHeader::none(),
            security_mode: MessageSecurityMode::None,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self.security_mode {
            MessageSecurityMode::None => {
                if self.security_header.security_policy_uri.as_ref() == SecurityPolicy::None.to_uri()
                {
                    Ok(())
                } else {
                    Err(Error::local_no_reason(StatusCode::BadSecurityPolicyRejected))
                }
            }
            MessageSecurityMode::Sign | MessageSecurityMode::SignAndEncrypt => Err(
                Error::local(StatusCode::BadNotImplemented, "signing is not implemented"),
            ),
            MessageSecurityMode::Invalid => {
                Err(Error::local_no_reason(StatusCode::BadSecurityPolicyRejected))
            }
        }
    }
}

/// Advanced configuration for establishing a secure channel over an arbitrary duplex
/// stream. Multiple channels may be created from the same connector.
#[derive(Clone)]
pub struct Connector {
    /// Used when connecting or re-connecting the underlying UACP. Required.
    pub dial: DialFn,
    /// The security to request when opening a channel.
    pub security: ChannelSecurity,
    /// The chunking announced in the first handshake. Tune to trade memory for
    /// throughput.
    pub chunking: MessageChunking,
    /// How many buffers and queues to set up for receive operations.
    pub buffering: MessageBuffering,
    pub timeouts: ChannelTimeouts,
}

impl Connector {
    pub fn new(dial: DialFn, security: ChannelSecurity) -> Connector {
        Connector {
            dial,
            security,
            chunking: MessageChunking::default(),
            buffering: MessageBuffering::default(),
            timeouts: ChannelTimeouts::default(),
        }
    }

    /// Establishes the UACP connection, opens the secure channel and starts its receiver
    /// and renewal tasks.
    pub async fn connect(self, endpoint_url: &str) -> Result<Arc<SecureChannel>, Error> {
        if endpoint_url.len() > MAX_MESSAGE_STRING_LEN {
            return Err(Error::local(
                StatusCode::BadInvalidArgument,
                format!(
                    "endpoint URL may not be more than {} bytes",
                    MAX_MESSAGE_STRING_LEN
                ),
            ));
        }
        self.security.validate()?;

        let deadline = if self.timeouts.connect_timeout > Duration::ZERO {
            Some(Instant::now() + self.timeouts.connect_timeout)
        } else {
            None
        };

        let decoding_options = DecodingOptions {
            max_message_size: self.chunking.max_message_size as usize,
            max_chunk_count: self.chunking.max_chunk_count as usize,
            ..Default::default()
        };
        let conn_mgr = Arc::new(ConnectionManager::new(
            self.dial,
            endpoint_url,
            self.chunking,
            decoding_options.clone(),
        ));
        conn_mgr.connect(deadline).await?;
        let chunking = conn_mgr.chunking().ok_or_else(|| {
            Error::local_no_reason(StatusCode::BadInternalError)
        })?;

        let token = Arc::new(parking_lot::Mutex::new(ChannelSecurityToken::default()));
        let recv_state = RecvState::new(
            conn_mgr.clone(),
            chunking,
            &self.buffering,
            token.clone(),
            decoding_options.clone(),
        );
        let channel = Arc::new(SecureChannel {
            conn_mgr: conn_mgr.clone(),
            send_state: tokio::sync::Mutex::new(SendState::new(conn_mgr, chunking)),
            recv_state: recv_state.clone(),
            security: self.security,
            token,
            timeouts: self.timeouts,
            decoding_options,
            request_handle: AtomicU32::new(1),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });

        // The receiver task reads from the socket for the lifetime of the channel
        let receiver = tokio::spawn(async move {
            let err = recv_state.run().await;
            debug!("secure channel receiver exited: {}", err);
        });
        trace_lock!(channel.tasks).push(receiver);

        if let Err(err) = channel.open(deadline).await {
            let _ = channel.shutdown().await;
            return Err(err);
        }
        SecureChannel::spawn_renewal(&channel);
        Ok(channel)
    }
}

/// A reassembled response - the node id naming the response type and the concatenated
/// payload of all its chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub node_id: ExpandedNodeId,
    pub body: Vec<u8>,
}

impl Response {
    /// A reader over the response body, positioned at the first byte after the node id.
    pub fn body_stream(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.body)
    }
}

/// A client side secure channel in `MessageSecurityMode::None`.
///
/// The channel owns a connection manager, a sender guarded by a channel wide mutex and a
/// receiver task that fans incoming chunks out to the pending requests. Requests run
/// concurrently; each allocates a receive queue, sends its chunks and awaits its own
/// response.
pub struct SecureChannel {
    conn_mgr: Arc<ConnectionManager>,
    send_state: tokio::sync::Mutex<SendState>,
    recv_state: Arc<RecvState>,
    security: ChannelSecurity,
    /// The channel's security token. Read on every send and receive, mutated only while
    /// an open or renew response is adopted.
    token: Arc<parking_lot::Mutex<ChannelSecurityToken>>,
    timeouts: ChannelTimeouts,
    decoding_options: DecodingOptions,
    request_handle: AtomicU32,
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel").finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Connects a secure channel over TCP using default settings.
    pub async fn connect_tcp(
        address: &str,
        endpoint_url: &str,
        security: ChannelSecurity,
    ) -> Result<Arc<SecureChannel>, Error> {
        Connector::new(tcp_dial(address.to_string()), security)
            .connect(endpoint_url)
            .await
    }

    /// The current security token. Zero ids mean the channel has not opened yet.
    pub fn security_token(&self) -> ChannelSecurityToken {
        trace_lock!(self.token).clone()
    }

    fn next_request_handle(&self) -> u32 {
        self.request_handle.fetch_add(1, Ordering::SeqCst)
    }

    fn make_request_header(&self, deadline: Option<Instant>) -> RequestHeader {
        let timeout_hint = deadline
            .map(|deadline| {
                deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis()
                    .min(u32::MAX as u128) as u32
            })
            .unwrap_or(0);
        RequestHeader::new(self.next_request_handle(), timeout_hint)
    }

    /// Issues or renews the channel's security token. Issue is used while no channel id
    /// is known, renew afterwards.
    async fn open(&self, deadline: Option<Instant>) -> Result<(), Error> {
        let mut handle = self.recv_state.allocate_queue(deadline).await?;

        let (channel_id, request_type) = {
            let token = trace_lock!(self.token);
            let request_type = if token.channel_id == 0 {
                SecurityTokenRequestType::Issue
            } else {
                SecurityTokenRequestType::Renew
            };
            (token.channel_id, request_type)
        };
        trace!("open secure channel ({:?})", request_type);

        let request = OpenSecureChannelRequest {
            request_header: self.make_request_header(deadline),
            client_protocol_version: 0,
            request_type,
            security_mode: self.security.security_mode,
            client_nonce: ByteString::null(),
            requested_lifetime: self
                .timeouts
                .request_lifetime
                .as_millis()
                .min(u32::MAX as u128) as u32,
        };
        let mut body = Cursor::new(Vec::with_capacity(request.byte_len()));
        request.encode(&mut body).map_err(Error::from)?;
        let node_id =
            ExpandedNodeId::from(ObjectId::OpenSecureChannelRequest_Encoding_DefaultBinary);

        {
            let mut send_state = self.send_state.lock().await;
            send_state
                .send_message(
                    OutgoingMessage {
                        message_type: MessageChunkType::OpenSecureChannel,
                        channel_id,
                        request_id: handle.request_id(),
                        security_header: SecurityHeader::Asymmetric(
                            self.security.security_header.clone(),
                        ),
                        node_id: &node_id,
                        body: body.get_ref(),
                    },
                    deadline,
                )
                .await?;
        }

        let response = handle
            .wait_for_response(MessageChunkType::OpenSecureChannel, deadline)
            .await?;
        match response.node_id.node_id.as_object_id() {
            Ok(ObjectId::OpenSecureChannelResponse_Encoding_DefaultBinary) => {
                let response = OpenSecureChannelResponse::decode(
                    &mut response.body_stream(),
                    &self.decoding_options,
                )
                .map_err(Error::from)?;
                let mut token = trace_lock!(self.token);
                // The channel id is adopted on the first open only; renewals rotate the
                // token id and lifetime
                if token.channel_id == 0 {
                    token.channel_id = response.security_token.channel_id;
                }
                token.token_id = response.security_token.token_id;
                token.created_at = response.security_token.created_at;
                token.revised_lifetime = response.security_token.revised_lifetime;
                debug!(
                    "secure channel {} open with token {} for {} ms",
                    token.channel_id, token.token_id, token.revised_lifetime
                );
                Ok(())
            }
            Ok(ObjectId::ServiceFault_Encoding_DefaultBinary) => {
                let fault =
                    ServiceFault::decode(&mut response.body_stream(), &self.decoding_options)
                        .map_err(Error::from)?;
                Err(Error::remote(
                    fault.response_header.service_result,
                    "open secure channel service fault",
                ))
            }
            _ => Err(Error::local(
                StatusCode::BadUnknownResponse,
                format!("unexpected response node id {}", response.node_id),
            )),
        }
    }

    /// Sends a request body under `node_id` and returns the peer's response. The request
    /// is chunked as needed; the response is reassembled from its chunks. Concurrent
    /// calls each receive their own response.
    pub async fn send(
        &self,
        node_id: impl Into<ExpandedNodeId>,
        body: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Response, Error> {
        let node_id = node_id.into();
        let mut handle = self.recv_state.allocate_queue(deadline).await?;

        let (channel_id, token_id) = {
            let token = trace_lock!(self.token);
            (token.channel_id, token.token_id)
        };

        {
            let mut send_state = self.send_state.lock().await;
            send_state
                .send_message(
                    OutgoingMessage {
                        message_type: MessageChunkType::Message,
                        channel_id,
                        request_id: handle.request_id(),
                        security_header: SecurityHeader::Symmetric(SymmetricSecurityHeader {
                            token_id,
                        }),
                        node_id: &node_id,
                        body,
                    },
                    deadline,
                )
                .await?;
        }

        handle
            .wait_for_response(MessageChunkType::Message, deadline)
            .await
    }

    /// Closes the channel - sends a best effort CloseSecureChannel (the server does not
    /// respond to it), stops the background tasks and closes the connection.
    pub async fn close(&self) -> Result<(), Error> {
        let deadline = Some(Instant::now() + Duration::from_secs(5));
        if let Ok(handle) = self.recv_state.allocate_queue(deadline).await {
            let request = CloseSecureChannelRequest {
                request_header: self.make_request_header(deadline),
            };
            let mut body = Cursor::new(Vec::with_capacity(request.byte_len()));
            if request.encode(&mut body).is_ok() {
                let (channel_id, _) = {
                    let token = trace_lock!(self.token);
                    (token.channel_id, token.token_id)
                };
                let node_id = ExpandedNodeId::from(
                    ObjectId::CloseSecureChannelRequest_Encoding_DefaultBinary,
                );
                let mut send_state = self.send_state.lock().await;
                if let Err(err) = send_state
                    .send_message(
                        OutgoingMessage {
                            message_type: MessageChunkType::CloseSecureChannel,
                            channel_id,
                            request_id: handle.request_id(),
                            security_header: SecurityHeader::Asymmetric(
                                self.security.security_header.clone(),
                            ),
                            node_id: &node_id,
                            body: body.get_ref(),
                        },
                        deadline,
                    )
                    .await
                {
                    debug!("close secure channel request failed: {}", err);
                }
            }
        }
        self.shutdown().await
    }

    async fn shutdown(&self) -> Result<(), Error> {
        let tasks = {
            let mut tasks = trace_lock!(self.tasks);
            tasks.drain(..).collect::<Vec<_>>()
        };
        for task in tasks {
            task.abort();
        }
        self.conn_mgr.close().await
    }

    /// Starts the task that renews the security token at 75% of its revised lifetime.
    fn spawn_renewal(channel: &Arc<SecureChannel>) {
        let weak = Arc::downgrade(channel);
        let task = tokio::spawn(async move {
            loop {
                let lifetime = {
                    let Some(channel) = weak.upgrade() else {
                        break;
                    };
                    let token = trace_lock!(channel.token);
                    token.revised_lifetime as u64
                };
                if lifetime == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(lifetime * 3 / 4)).await;

                let Some(channel) = weak.upgrade() else {
                    break;
                };
                let deadline = Some(Instant::now() + channel.timeouts.connect_timeout);
                match channel.open(deadline).await {
                    Ok(()) => debug!("secure channel renewed"),
                    Err(err) => {
                        warn!("secure channel renewal failed: {}", err);
                        break;
                    }
                }
            }
        });
        trace_lock!(channel.tasks).push(task);
    }
}
