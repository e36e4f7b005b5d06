//! Device link abstraction and serial transport.
//!
//! The rest of the crate talks to the device through [`LinkHandle`], a
//! cloneable handle over an optional [`DeviceLink`]. While no link is
//! attached every send is a logged no-op and every read yields nothing, so
//! registry and session operations degrade gracefully instead of failing
//! when the device is unplugged.
//!
//! [`SerialLink`] is the production transport: it wraps the `serialport`
//! crate and runs the blocking I/O on Tokio's blocking executor. Reads are
//! bounded by an explicit settle window rather than sleep-then-poll; the
//! call returns whatever complete lines arrived within the window.
//!
//! [`MockLink`] records sent frames and replays scripted reply lines for
//! tests.

use async_trait::async_trait;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::AppResult;

/// A line-oriented duplex stream to the device.
///
/// Implementations must already be open; connection management happens at
/// construction time.
#[async_trait]
pub trait DeviceLink: Send {
    /// Writes one newline-terminated command frame.
    async fn write_line(&mut self, line: &str) -> AppResult<()>;

    /// Collects the complete reply lines that arrive within the settle
    /// window. An empty result is normal when the device stays silent.
    async fn read_lines(&mut self, settle: Duration) -> AppResult<Vec<String>>;
}

/// Shared handle to the (possibly absent) device link.
///
/// All entry points funnel through one control flow, so the inner mutex is
/// uncontended in practice; it exists so the sampling task and the
/// registry can share one link without a dedicated I/O thread.
#[derive(Clone)]
pub struct LinkHandle {
    inner: Arc<Mutex<Option<Box<dyn DeviceLink>>>>,
}

impl LinkHandle {
    /// Creates a handle with no attached link.
    pub fn disconnected() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a handle over an open link.
    pub fn new(link: Box<dyn DeviceLink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(link))),
        }
    }

    /// Attaches an open link, replacing any previous one.
    pub async fn attach(&self, link: Box<dyn DeviceLink>) {
        *self.inner.lock().await = Some(link);
    }

    /// Detaches and drops the current link, if any.
    pub async fn detach(&self) {
        *self.inner.lock().await = None;
    }

    /// Whether a link is currently attached.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Sends one command frame.
    ///
    /// With no link attached this is a no-op that reports the condition;
    /// write failures are logged and swallowed the same way. Returns
    /// whether the frame actually went out.
    pub async fn send(&self, frame: &str) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(link) => match link.write_line(frame).await {
                Ok(()) => {
                    debug!("Sent command: {}", frame);
                    true
                }
                Err(e) => {
                    warn!("Failed to send '{}': {}", frame, e);
                    false
                }
            },
            None => {
                warn!("Device link not open; dropping command: {}", frame);
                false
            }
        }
    }

    /// Reads the reply lines that arrive within the settle window, logging
    /// each one. Yields nothing when no link is attached.
    pub async fn read_lines(&self, settle: Duration) -> Vec<String> {
        let mut guard = self.inner.lock().await;
        let Some(link) = guard.as_mut() else {
            return Vec::new();
        };
        match link.read_lines(settle).await {
            Ok(lines) => {
                for line in &lines {
                    debug!("Device: {}", line);
                }
                lines
            }
            Err(e) => {
                warn!("Failed to read from device link: {}", e);
                Vec::new()
            }
        }
    }
}

// ============================================================================
// Serial transport
// ============================================================================

#[cfg(feature = "instrument_serial")]
mod serial_enabled {
    use super::*;
    use serialport::SerialPort;
    use std::io::{Read, Write};
    use std::time::Instant;

    /// Internal per-read timeout on the port; the overall bound is the
    /// settle window passed to [`DeviceLink::read_lines`].
    const PORT_READ_TIMEOUT: Duration = Duration::from_millis(50);

    /// Serial transport for the device command link.
    ///
    /// Blocking serial I/O runs on Tokio's blocking executor behind an
    /// `Arc<Mutex<..>>`, so the handle stays cheap to clone and safe to
    /// share with the sampling task.
    pub struct SerialLink {
        port_name: String,
        port: Arc<Mutex<Box<dyn SerialPort>>>,
    }

    impl SerialLink {
        /// Opens the named port at the given baud rate.
        pub fn open(port_name: &str, baud_rate: u32) -> AppResult<Self> {
            let port = serialport::new(port_name, baud_rate)
                .timeout(PORT_READ_TIMEOUT)
                .open()?;
            debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);
            Ok(Self {
                port_name: port_name.to_string(),
                port: Arc::new(Mutex::new(port)),
            })
        }

        /// Port this link was opened on.
        pub fn port_name(&self) -> &str {
            &self.port_name
        }
    }

    #[async_trait]
    impl DeviceLink for SerialLink {
        async fn write_line(&mut self, line: &str) -> AppResult<()> {
            let port = self.port.clone();
            let frame = format!("{line}\n");
            tokio::task::spawn_blocking(move || -> AppResult<()> {
                let mut guard = port.blocking_lock();
                guard.write_all(frame.as_bytes())?;
                guard.flush()?;
                Ok(())
            })
            .await
            .map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("serial write task panicked: {e}"),
                )
            })?
        }

        async fn read_lines(&mut self, settle: Duration) -> AppResult<Vec<String>> {
            let port = self.port.clone();
            tokio::task::spawn_blocking(move || -> AppResult<Vec<String>> {
                let mut guard = port.blocking_lock();
                let start = Instant::now();
                let mut pending = String::new();
                let mut lines = Vec::new();
                let mut buf = [0u8; 256];

                while start.elapsed() < settle {
                    match guard.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                            while let Some(pos) = pending.find('\n') {
                                let line = pending[..pos].trim_end_matches('\r').to_string();
                                pending.drain(..=pos);
                                if !line.is_empty() {
                                    lines.push(line);
                                }
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(lines)
            })
            .await
            .map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("serial read task panicked: {e}"),
                )
            })?
        }
    }
}

#[cfg(feature = "instrument_serial")]
pub use serial_enabled::SerialLink;

// ============================================================================
// Mock transport for tests
// ============================================================================

/// In-memory link that records sent frames and replays scripted replies.
pub struct MockLink {
    sent: Arc<std::sync::Mutex<Vec<String>>>,
    replies: Arc<std::sync::Mutex<VecDeque<String>>>,
}

impl MockLink {
    /// Creates an empty mock link.
    pub fn new() -> Self {
        Self {
            sent: Arc::new(std::sync::Mutex::new(Vec::new())),
            replies: Arc::new(std::sync::Mutex::new(VecDeque::new())),
        }
    }

    /// Shared view of every frame sent so far, in order.
    pub fn sent_log(&self) -> Arc<std::sync::Mutex<Vec<String>>> {
        self.sent.clone()
    }

    /// Shared handle for queueing reply lines from the test body.
    pub fn reply_queue(&self) -> Arc<std::sync::Mutex<VecDeque<String>>> {
        self.replies.clone()
    }

    /// Queues one reply line for the next read.
    pub fn push_reply(&self, line: &str) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(line.to_string());
        }
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceLink for MockLink {
    async fn write_line(&mut self, line: &str) -> AppResult<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(line.to_string());
        }
        Ok(())
    }

    async fn read_lines(&mut self, _settle: Duration) -> AppResult<Vec<String>> {
        let mut out = Vec::new();
        if let Ok(mut q) = self.replies.lock() {
            out.extend(q.drain(..));
        }
        Ok(out)
    }
}
