// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The receive half of a secure channel. A single receiver task reads whole chunks from
//! the connection manager, validates the secure headers and sequence numbers and routes
//! each chunk to the queue of the request it belongs to by the low bits of its request id.
//!
//! Request ids encode their own routing: the top 16 bits are a per channel monotonic
//! counter incremented per allocation, bit 15 marks an id as invalid, and bits 0..15 index
//! the queue slot. A queue slot is returned to the pool only after its event queue has
//! drained, which makes release exactly-once even under concurrent cancellation, and means
//! stale chunks for a cancelled request are discarded without ever reaching a listener.

use std::{
    io::Cursor,
    sync::atomic::{AtomicU32, Ordering},
    sync::Arc,
    time::Duration,
};

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::channel::{
    pool::{BufferPool, PooledBuffer, SlotPool},
    MessageBuffering, Response, SEQUENCE_NUMBER_RESTART, SEQUENCE_NUMBER_WRAP,
};
use crate::core::comms::{
    conn_mgr::{with_deadline, ConnectionManager},
    error::Error,
    security_header::{
        AbortChunkBody, AsymmetricSecurityHeader, MessageChunkType, MessageIsFinalType,
        SecureMessageHeader, SequenceHeader, SymmetricSecurityHeader,
    },
    tcp_types::MessageChunking,
};
use crate::types::{
    encoding::{BinaryEncoder, DecodingOptions},
    node_id::ExpandedNodeId,
    service_types::ChannelSecurityToken,
    status_code::StatusCode,
};

/// Bits 0..15 of a request id index the queue slot.
pub(crate) const QUEUE_INDEX_MASK: u32 = 0x0000_7FFF;
/// Bit 15 marks a request id that no listener will ever wait on.
pub(crate) const REQUEST_ID_INVALID: u32 = 0x0000_8000;
/// The monotonic counter lives in the top 16 bits and advances by one per allocation.
pub(crate) const MONOTONIC_INCREMENT: u32 = 0x0001_0000;
/// The queue index mask bounds how many receive queues a channel may have.
pub(crate) const MAX_RECV_QUEUES: usize = 0x7FFF;

/// How long the receiver will wait to hand a chunk to a listener before it closes the
/// queue and discards the chunk.
const ROUTE_TIMEOUT: Duration = Duration::from_secs(5);

/// A slice of a pooled receive buffer holding one chunk's payload. The buffer returns to
/// the pool when the slice is dropped.
pub(crate) struct BodySlice {
    buffer: PooledBuffer,
    start: usize,
    end: usize,
}

impl BodySlice {
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[self.start..self.end]
    }
}

/// A notification about one received chunk, delivered to the listener of its request id.
pub(crate) struct RecvEvent {
    pub message_type: MessageChunkType,
    pub is_final: MessageIsFinalType,
    /// The chunk payload, or the error carried by an aborted-final chunk.
    pub payload: Result<BodySlice, Error>,
}

/// One routing slot. `request_id` states who is listening (if anyone) and gates the
/// exactly-once release of the slot; the sender half of the event queue is dropped to
/// close the queue.
struct RecvQueue {
    request_id: AtomicU32,
    sender: parking_lot::Mutex<Option<mpsc::Sender<RecvEvent>>>,
}

pub(crate) struct RecvState {
    conn_mgr: Arc<ConnectionManager>,
    pub(crate) decoding_options: DecodingOptions,
    max_chunk_count: u32,
    buffers: Arc<BufferPool>,
    event_queue_depth: usize,
    queues: Vec<RecvQueue>,
    slots: SlotPool,
    monotonic_request_id: AtomicU32,
    pub(crate) last_sequence_number: AtomicU32,
    last_request_id: AtomicU32,
    token: Arc<parking_lot::Mutex<ChannelSecurityToken>>,
}

impl RecvState {
    pub fn new(
        conn_mgr: Arc<ConnectionManager>,
        chunking: MessageChunking,
        buffering: &MessageBuffering,
        token: Arc<parking_lot::Mutex<ChannelSecurityToken>>,
        decoding_options: DecodingOptions,
    ) -> Arc<RecvState> {
        assert!(
            buffering.recv_queue_count > 0 && buffering.recv_queue_count <= MAX_RECV_QUEUES,
            "receive queue count must be in 1..={}",
            MAX_RECV_QUEUES
        );
        assert!(buffering.recv_buffer_count > 0, "receive buffer count may not be 0");
        let queues = (0..buffering.recv_queue_count)
            .map(|_| RecvQueue {
                request_id: AtomicU32::new(REQUEST_ID_INVALID),
                sender: parking_lot::Mutex::new(None),
            })
            .collect();
        Arc::new(RecvState {
            conn_mgr,
            decoding_options,
            max_chunk_count: chunking.max_chunk_count,
            buffers: BufferPool::new(
                buffering.recv_buffer_count,
                chunking.receive_buffer_size as usize,
            ),
            event_queue_depth: buffering.recv_buffer_count,
            queues,
            slots: SlotPool::new(buffering.recv_queue_count),
            monotonic_request_id: AtomicU32::new(0),
            last_sequence_number: AtomicU32::new(0),
            last_request_id: AtomicU32::new(REQUEST_ID_INVALID),
            token,
        })
    }

    /// Waits for a receive queue to be free or the deadline to be reached. On success the
    /// queue is assigned a fresh request id to be used when sending the request and
    /// waiting for its response. The returned handle frees the queue when dropped.
    pub async fn allocate_queue(
        self: &Arc<Self>,
        deadline: Option<Instant>,
    ) -> Result<RequestHandle, Error> {
        let index = self.slots.acquire(deadline).await?;
        let request_id = self
            .monotonic_request_id
            .fetch_add(MONOTONIC_INCREMENT, Ordering::SeqCst)
            .wrapping_add(MONOTONIC_INCREMENT)
            | index as u32;
        let (sender, receiver) = mpsc::channel(self.event_queue_depth);
        self.queues[index].request_id.store(request_id, Ordering::SeqCst);
        *trace_lock!(self.queues[index].sender) = Some(sender);
        Ok(RequestHandle {
            state: self.clone(),
            request_id,
            events: Some(receiver),
        })
    }

    /// Frees the queue behind `request_id`. Only the first call for a given id takes
    /// effect; the slot returns to the pool once the event queue has drained and all its
    /// buffers are back in their pool.
    fn cancel_queue(self: &Arc<Self>, request_id: u32, events: mpsc::Receiver<RecvEvent>) {
        let index = (request_id & QUEUE_INDEX_MASK) as usize;
        if index >= self.queues.len() {
            return;
        }
        if self.queues[index]
            .request_id
            .compare_exchange(
                request_id,
                request_id | REQUEST_ID_INVALID,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }
        // No new events can arrive once the sender is gone
        trace_lock!(self.queues[index].sender).take();

        let state = self.clone();
        let mut events = events;
        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::spawn(async move {
                while events.recv().await.is_some() {}
                state.slots.release(index);
            });
        } else {
            // Dropped outside the runtime; the sender is gone so nothing more can arrive
            while events.try_recv().is_ok() {}
            state.slots.release(index);
        }
    }

    /// Runs until an error that requires reconnection of the UACP occurs. On final close
    /// of a secure channel the returned error may be ignored.
    pub async fn run(self: Arc<Self>) -> Error {
        loop {
            match self.next_event().await {
                Ok((request_id, event)) => self.route_event(request_id, event).await,
                Err(err) => {
                    error!("receiver closing connection: {}", err);
                    let _ = self.conn_mgr.close().await;
                    self.close_all_queues();
                    return err;
                }
            }
        }
    }

    /// Receives exactly one chunk, decodes and validates its headers and returns it with
    /// its request id for routing. Errors returned here are protocol violations that
    /// close the connection.
    async fn next_event(&self) -> Result<(u32, RecvEvent), Error> {
        // Pop a free receive buffer; blocks if every buffer is held by an undelivered
        // chunk or a listener
        let mut buffer = self.buffers.acquire().await;
        let message_size = self.conn_mgr.recv_chunk(&mut buffer, None).await?;

        let (header, sequence_header, body_start) = {
            let mut stream = Cursor::new(&buffer[..message_size]);
            let header = SecureMessageHeader::decode(&mut stream, &self.decoding_options)
                .map_err(Error::from)?;
            match header.message_type {
                MessageChunkType::OpenSecureChannel | MessageChunkType::CloseSecureChannel => {
                    AsymmetricSecurityHeader::decode(&mut stream, &self.decoding_options)
                        .map_err(Error::from)?;
                }
                MessageChunkType::Message => {
                    SymmetricSecurityHeader::decode(&mut stream, &self.decoding_options)
                        .map_err(Error::from)?;
                }
            }
            let sequence_header = SequenceHeader::decode(&mut stream, &self.decoding_options)
                .map_err(Error::from)?;
            (header, sequence_header, stream.position() as usize)
        };

        // Sequence numbers must follow on from the last chunk, except that an OPN chunk
        // may wrap to the start of the numbering space once the last number is beyond
        // the wrap threshold
        let last = self.last_sequence_number.load(Ordering::SeqCst);
        let sequence_number = sequence_header.sequence_number;
        let followed = sequence_number == last.wrapping_add(1);
        let wrapped = header.message_type.is_open_secure_channel()
            && last > SEQUENCE_NUMBER_WRAP
            && sequence_number >= 1
            && sequence_number <= SEQUENCE_NUMBER_RESTART;
        if !followed && !wrapped {
            return Err(Error::local(
                StatusCode::BadSequenceNumberInvalid,
                format!(
                    "got sequence number {}, expected {}",
                    sequence_number,
                    last.wrapping_add(1)
                ),
            ));
        }
        self.last_sequence_number.store(sequence_number, Ordering::SeqCst);

        // The channel id, once known, must match
        let channel_id = trace_lock!(self.token).channel_id;
        if channel_id != 0 && header.secure_channel_id != channel_id {
            return Err(Error::local(
                StatusCode::BadTcpSecureChannelUnknown,
                format!(
                    "unexpected secure channel ID {} in response",
                    header.secure_channel_id
                ),
            ));
        }

        // All chunks between an intermediate chunk and its final chunk must share one
        // request id
        let last_request = self.last_request_id.load(Ordering::SeqCst);
        if last_request & REQUEST_ID_INVALID == 0 && sequence_header.request_id != last_request {
            return Err(Error::local(
                StatusCode::BadUnknownResponse,
                "got new request ID after an intermediate chunk",
            ));
        }
        self.last_request_id.store(
            match header.is_final {
                MessageIsFinalType::Intermediate => sequence_header.request_id,
                _ => sequence_header.request_id | REQUEST_ID_INVALID,
            },
            Ordering::SeqCst,
        );

        let payload = match header.is_final {
            MessageIsFinalType::FinalError => {
                let mut stream = Cursor::new(&buffer[body_start..message_size]);
                let abort = AbortChunkBody::decode(&mut stream, &self.decoding_options)
                    .map_err(Error::from)?;
                // The buffer frees itself on drop
                Err(Error::remote(
                    StatusCode::from_bits_truncate(abort.status),
                    abort.reason.as_ref(),
                ))
            }
            _ => Ok(BodySlice {
                buffer,
                start: body_start,
                end: message_size,
            }),
        };
        Ok((
            sequence_header.request_id,
            RecvEvent {
                message_type: header.message_type,
                is_final: header.is_final,
                payload,
            },
        ))
    }

    /// Attempts to deliver `event` on the right queue, closing it on final chunks or when
    /// routing fails.
    async fn route_event(&self, request_id: u32, event: RecvEvent) {
        let index = (request_id & QUEUE_INDEX_MASK) as usize;
        if index >= self.queues.len() {
            debug!(
                "discarding chunk for request ID {} with an out of range queue index",
                request_id
            );
            return;
        }
        if self.queues[index].request_id.load(Ordering::SeqCst) != request_id {
            // The queue was cancelled, possibly after a timeout, and may have been
            // reassigned to a new request id already
            debug!("discarding chunk for request ID {} due to no listener", request_id);
            return;
        }
        let sender = trace_lock!(self.queues[index].sender).clone();
        let Some(sender) = sender else {
            debug!("discarding chunk for request ID {} due to closed queue", request_id);
            return;
        };

        let close_queue = event.is_final.is_final();
        let delivered = sender.send_timeout(event, ROUTE_TIMEOUT).await.is_ok();
        if !delivered {
            debug!(
                "gave up routing a chunk for request ID {} after {:?}",
                request_id, ROUTE_TIMEOUT
            );
        }
        if close_queue || !delivered {
            trace_lock!(self.queues[index].sender).take();
        }
    }

    /// Closes every open queue so listeners fail fast once the connection is gone.
    fn close_all_queues(&self) {
        for queue in &self.queues {
            trace_lock!(queue.sender).take();
        }
    }
}

/// An allocated receive queue bound to a request id. Dropping the handle cancels the
/// request: stale chunks are drained in the background and the queue slot is released
/// exactly once.
pub(crate) struct RequestHandle {
    state: Arc<RecvState>,
    request_id: u32,
    events: Option<mpsc::Receiver<RecvEvent>>,
}

impl RequestHandle {
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Waits for all chunks of the response, validating each against the expected message
    /// type, and reassembles the payload. The first chunk's payload begins with the
    /// response node id; subsequent chunks continue the payload byte stream.
    pub async fn wait_for_response(
        &mut self,
        expected_type: MessageChunkType,
        deadline: Option<Instant>,
    ) -> Result<Response, Error> {
        let state = self.state.clone();
        let events = self.events.as_mut().ok_or_else(|| {
            Error::local(StatusCode::BadInternalError, "response already consumed")
        })?;

        let mut node_id: Option<ExpandedNodeId> = None;
        let mut body = Vec::new();
        let mut chunk_count: u32 = 0;
        loop {
            let event = with_deadline(deadline, async { Ok(events.recv().await) }).await?;
            let Some(event) = event else {
                return Err(Error::local(
                    StatusCode::BadRequestInterrupted,
                    "response queue closed before the final chunk",
                ));
            };
            chunk_count += 1;
            if state.max_chunk_count != 0 && chunk_count > state.max_chunk_count {
                return Err(Error::local(
                    StatusCode::BadResponseTooLarge,
                    format!("response exceeds {} chunks", state.max_chunk_count),
                ));
            }
            if event.message_type != expected_type {
                let _ = state.conn_mgr.close().await;
                return Err(Error::local(
                    StatusCode::BadTcpMessageTypeInvalid,
                    format!("unexpected message type {} in response", event.message_type),
                ));
            }

            let is_final = event.is_final;
            let slice = event.payload?;
            let bytes = slice.bytes();
            if node_id.is_none() {
                let mut stream = Cursor::new(bytes);
                let decoded = ExpandedNodeId::decode(&mut stream, &state.decoding_options)
                    .map_err(|err| {
                        Error::local(
                            StatusCode::BadUnknownResponse,
                            format!("could not decode response node id: {}", err),
                        )
                    })?;
                let position = stream.position() as usize;
                body.extend_from_slice(&bytes[position..]);
                node_id = Some(decoded);
            } else {
                body.extend_from_slice(bytes);
            }
            // Hand the buffer back before waiting for the next chunk
            drop(slice);

            if is_final == MessageIsFinalType::Final {
                break;
            }
        }

        Ok(Response {
            node_id: node_id.ok_or_else(|| {
                Error::local(StatusCode::BadUnknownResponse, "empty response")
            })?,
            body,
        })
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        if let Some(events) = self.events.take() {
            self.state.cancel_queue(self.request_id, events);
        }
    }
}
