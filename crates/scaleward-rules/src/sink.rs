//! OutputSink: routes text produced by rule code to the log stream.
//!
//! A bounded multi-producer channel with one background consumer. Writers
//! are cheap to clone and are handed to every evaluation; the consumer
//! forwards each non-empty, trimmed line under the `scaleward::usercode`
//! tracing target.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Tracing target for text emitted by rule code.
pub const USERCODE_TARGET: &str = "scaleward::usercode";

/// Default channel capacity. Small, but non-zero so a terminated
/// evaluation never deadlocks on its last lines.
pub const DEFAULT_CAPACITY: usize = 64;

type Forward = Arc<dyn Fn(&str) + Send + Sync>;

/// The consumer side of the output channel.
pub struct OutputSink {
    tx: mpsc::Sender<String>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Producer handle given to evaluations.
#[derive(Clone)]
pub struct SinkWriter {
    tx: mpsc::Sender<String>,
}

impl OutputSink {
    /// Start the consumer with the default capacity, forwarding to tracing.
    pub fn start() -> Self {
        Self::start_with(DEFAULT_CAPACITY, |line| {
            info!(target: USERCODE_TARGET, "{line}");
        })
    }

    /// Start the consumer with a custom capacity and line handler.
    pub fn start_with(capacity: usize, forward: impl Fn(&str) + Send + Sync + 'static) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let forward: Forward = Arc::new(forward);
        let handle = tokio::spawn(run_sink_loop(rx, forward, shutdown_rx));
        debug!(capacity, "output sink started");
        Self {
            tx,
            shutdown_tx,
            handle,
        }
    }

    pub fn writer(&self) -> SinkWriter {
        SinkWriter {
            tx: self.tx.clone(),
        }
    }

    /// Close the channel and wait for the consumer to drain what is queued.
    /// Writers that outlive the sink have their text dropped.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        drop(self.tx);
        if let Err(e) = self.handle.await {
            debug!(error = %e, "output sink task ended abnormally");
        }
        debug!("output sink stopped");
    }
}

impl SinkWriter {
    /// Enqueue text, waiting for channel capacity.
    pub async fn write(&self, text: impl Into<String>) {
        if self.tx.send(text.into()).await.is_err() {
            debug!("output sink closed, dropping text");
        }
    }

    /// Enqueue text from a plain OS thread. Must not be called from inside
    /// an async task.
    pub fn write_blocking(&self, text: impl Into<String>) {
        if self.tx.blocking_send(text.into()).is_err() {
            debug!("output sink closed, dropping text");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn forward_lines(forward: &Forward, text: &str) {
    for line in text.lines() {
        let line = line.trim();
        if !line.is_empty() {
            forward(line);
        }
    }
}

async fn run_sink_loop(
    mut rx: mpsc::Receiver<String>,
    forward: Forward,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(text) => forward_lines(&forward, &text),
                None => break,
            },
            _ = shutdown.changed() => {
                rx.close();
                while let Some(text) = rx.recv().await {
                    forward_lines(&forward, &text);
                }
                break;
            }
        }
    }
    debug!("output sink loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting_sink(capacity: usize) -> (OutputSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink = OutputSink::start_with(capacity, move |line| {
            captured.lock().unwrap().push(line.to_string());
        });
        (sink, lines)
    }

    #[tokio::test]
    async fn forwards_trimmed_non_empty_lines() {
        let (sink, lines) = collecting_sink(8);
        let writer = sink.writer();
        writer.write("  first  \n\n second\n").await;
        writer.write("   ").await;
        writer.write("third").await;
        sink.stop().await;
        assert_eq!(*lines.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn blocking_writers_from_threads() {
        let (sink, lines) = collecting_sink(2);
        let writer = sink.writer();
        let worker = std::thread::spawn(move || {
            for i in 0..10 {
                writer.write_blocking(format!("line {i}"));
            }
        });
        tokio::task::spawn_blocking(move || worker.join().unwrap())
            .await
            .unwrap();
        sink.stop().await;
        assert_eq!(lines.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn writes_after_stop_are_dropped() {
        let (sink, lines) = collecting_sink(4);
        let writer = sink.writer();
        sink.stop().await;
        assert!(writer.is_closed());
        writer.write("late").await;
        assert!(lines.lock().unwrap().is_empty());
    }
}
