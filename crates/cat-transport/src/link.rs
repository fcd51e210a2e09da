//! Shared, serialized access to the rig
//!
//! The rig answers strictly in order, so a query and its reply must never be
//! interleaved with another task's traffic. [`CatLink`] wraps the single
//! transport in one async mutex; batteries take a [`CatSession`] to hold the
//! lock across many exchanges.
//!
//! Steady-state I/O failures are logged and reported as "no data". Only the
//! initial open is allowed to fail hard.

use std::sync::Arc;
use std::time::Duration;

use cat_codec::{decode_reply, encode_query};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::transport::Transport;

/// Default time to wait for one reply line
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Cloneable handle to the one transport talking to the rig
#[derive(Clone)]
pub struct CatLink {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    read_timeout: Duration,
    description: Arc<str>,
}

impl CatLink {
    /// Wrap a transport with the default read timeout
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_read_timeout(transport, DEFAULT_READ_TIMEOUT)
    }

    /// Wrap a transport with a custom read timeout
    pub fn with_read_timeout(transport: Box<dyn Transport>, read_timeout: Duration) -> Self {
        let description = transport.describe().into();
        Self {
            transport: Arc::new(Mutex::new(transport)),
            read_timeout,
            description,
        }
    }

    /// Description of the underlying transport
    pub fn describe(&self) -> &str {
        &self.description
    }

    /// Take the lock for a sequence of exchanges
    pub async fn session(&self) -> CatSession<'_> {
        CatSession {
            transport: self.transport.lock().await,
            read_timeout: self.read_timeout,
        }
    }

    /// Write one frame
    pub async fn send(&self, frame: &[u8]) {
        self.session().await.send(frame).await;
    }

    /// Query a two-letter code and return the decoded reply
    pub async fn query(&self, code: &str) -> String {
        self.session().await.query(code).await
    }

    /// Close the transport
    pub async fn close(&self) {
        if let Err(e) = self.transport.lock().await.close().await {
            warn!("Failed to close {}: {}", self.description, e);
        }
    }
}

impl std::fmt::Debug for CatLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatLink")
            .field("transport", &self.description)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

/// Exclusive access to the rig for the lifetime of the guard
pub struct CatSession<'a> {
    transport: MutexGuard<'a, Box<dyn Transport>>,
    read_timeout: Duration,
}

impl CatSession<'_> {
    /// Write one frame; returns false if the write failed
    pub async fn send(&mut self, frame: &[u8]) -> bool {
        match self.transport.write(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Serial write failed: {}", e);
                false
            }
        }
    }

    /// Write a frame and read exactly one reply line
    ///
    /// Returns an empty string on timeout or I/O failure.
    pub async fn exchange(&mut self, frame: &[u8]) -> String {
        if !self.send(frame).await {
            return String::new();
        }
        match self.transport.read_line(self.read_timeout).await {
            Ok(raw) => decode_reply(&raw),
            Err(e) => {
                warn!("Serial read failed: {}", e);
                String::new()
            }
        }
    }

    /// Query a two-letter code
    pub async fn query(&mut self, code: &str) -> String {
        self.exchange(&encode_query(code)).await
    }
}
