// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Bounded pools for the receive side of a channel. Receive buffers are owned by the pool
//! and loaned out as [`PooledBuffer`] handles that return themselves on drop, which makes
//! release idempotent on every code path including errors and cancellation. Queue slots
//! use the same semaphore discipline with plain indices.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use tokio::time::Instant;

use crate::core::comms::{conn_mgr::with_deadline, error::Error};

pub(crate) struct BufferPool {
    free: parking_lot::Mutex<Vec<Vec<u8>>>,
    available: tokio::sync::Semaphore,
}

impl BufferPool {
    pub fn new(count: usize, buffer_size: usize) -> Arc<BufferPool> {
        Arc::new(BufferPool {
            free: parking_lot::Mutex::new(
                (0..count).map(|_| vec![0u8; buffer_size]).collect(),
            ),
            available: tokio::sync::Semaphore::new(count),
        })
    }

    /// Takes a free buffer, waiting for one to be returned when all are loaned out.
    pub async fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let permit = self
            .available
            .acquire()
            .await
            .expect("buffer pool semaphore closed");
        permit.forget();
        let data = {
            let mut free = trace_lock!(self.free);
            free.pop().expect("buffer pool out of sync with its semaphore")
        };
        PooledBuffer {
            pool: self.clone(),
            data: Some(data),
        }
    }

    fn release(&self, data: Vec<u8>) {
        {
            let mut free = trace_lock!(self.free);
            free.push(data);
        }
        self.available.add_permits(1);
    }
}

/// A buffer on loan from a [`BufferPool`]. Returns itself to the pool when dropped.
pub(crate) struct PooledBuffer {
    pool: Arc<BufferPool>,
    data: Option<Vec<u8>>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}

/// A pool of queue slot indices in `0..count`.
pub(crate) struct SlotPool {
    free: parking_lot::Mutex<Vec<usize>>,
    available: tokio::sync::Semaphore,
}

impl SlotPool {
    pub fn new(count: usize) -> SlotPool {
        SlotPool {
            free: parking_lot::Mutex::new((0..count).rev().collect()),
            available: tokio::sync::Semaphore::new(count),
        }
    }

    /// Takes a free slot index, or times out with `BadTimeout` at the deadline.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<usize, Error> {
        with_deadline(deadline, async {
            let permit = self
                .available
                .acquire()
                .await
                .expect("slot pool semaphore closed");
            permit.forget();
            let mut free = trace_lock!(self.free);
            Ok(free.pop().expect("slot pool out of sync with its semaphore"))
        })
        .await
    }

    pub fn release(&self, index: usize) {
        {
            let mut free = trace_lock!(self.free);
            free.push(index);
        }
        self.available.add_permits(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::status_code::StatusCode;
    use std::time::Duration;

    #[tokio::test]
    async fn buffers_return_on_drop() {
        let pool = BufferPool::new(2, 16);
        let a = pool.acquire().await;
        let _b = pool.acquire().await;
        assert_eq!(a.len(), 16);
        // Pool is empty; dropping a buffer makes it available again
        drop(a);
        let c = pool.acquire().await;
        assert_eq!(c.len(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn slot_acquire_times_out() {
        let pool = SlotPool::new(1);
        let first = pool.acquire(None).await.unwrap();
        assert_eq!(first, 0);
        let deadline = Some(Instant::now() + Duration::from_millis(50));
        let err = pool.acquire(deadline).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::BadTimeout);
        pool.release(first);
        assert_eq!(pool.acquire(None).await.unwrap(), 0);
    }
}
