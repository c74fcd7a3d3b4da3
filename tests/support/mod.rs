//! Helpers shared by the integration suites.

#![allow(dead_code)]

use amqp_resilience_connection::{ConnectionConfig, ConnectionConfigBuilder, ConnectionManager};
use amqp_resilience_testkit::MemoryBroker;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

/// Connection config with short delays, so recovery tests run fast.
pub fn fast_config(name: &str) -> ConnectionConfigBuilder {
    ConnectionConfig::builder()
        .name(name)
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(100))
}

/// Connects a manager to `broker`, panicking on failure.
pub async fn connected(broker: &MemoryBroker, name: &str) -> ConnectionManager {
    ConnectionManager::connect(Arc::new(broker.clone()), fast_config(name).build())
        .await
        .expect("memory broker is reachable")
}

/// Polls `condition` until it holds, panicking after five seconds.
///
/// Sleeping between polls lets spawned recovery tasks run, and advances a
/// paused clock.
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// In-memory sink for formatted log lines.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Installs a subscriber writing into a new capture for the current thread.
    ///
    /// Logging stops reaching the capture once the guard is dropped.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// Returns every captured line.
    pub fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Counts captured lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
