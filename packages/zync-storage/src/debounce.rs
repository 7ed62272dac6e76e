//! Debounced whole-snapshot flushing.
//!
//! Every mutation marks the owner dirty. A background task waits for a quiet period of `delay`
//! after the most recent mark and then runs the flush callback once. A mark that arrives inside the
//! window restarts it. A failed flush leaves the owner dirty so the next mark retries it.

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot};

use crate::BoxFuture;

/// Writes the current snapshot and reports whether it reached the store.
pub type FlushFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

enum Signal {
	Dirty,
	Shutdown(oneshot::Sender<()>),
}

pub struct Flusher {
	label: &'static str,
	tx: mpsc::UnboundedSender<Signal>,
}
impl Flusher {
	/// Spawns the flush task on the current tokio runtime.
	pub fn spawn(label: &'static str, delay: Duration, flush: FlushFn) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();

		tokio::spawn(run(label, delay, rx, flush));

		Self { label, tx }
	}

	pub fn mark_dirty(&self) {
		if self.tx.send(Signal::Dirty).is_err() {
			tracing::debug!(label = self.label, "Flusher stopped; dirty mark ignored.");
		}
	}

	/// Flushes pending state and stops the task. Later marks are ignored.
	pub async fn shutdown(&self) {
		let (ack_tx, ack_rx) = oneshot::channel();

		if self.tx.send(Signal::Shutdown(ack_tx)).is_err() {
			return;
		}
		if ack_rx.await.is_err() {
			tracing::warn!(label = self.label, "Flusher exited before acknowledging shutdown.");
		}
	}
}

async fn run(
	label: &'static str,
	delay: Duration,
	mut rx: mpsc::UnboundedReceiver<Signal>,
	flush: FlushFn,
) {
	let mut dirty = false;

	while let Some(signal) = rx.recv().await {
		match signal {
			Signal::Dirty => {},
			Signal::Shutdown(ack) => {
				if dirty {
					flush().await;
				}

				let _ = ack.send(());

				tracing::debug!(label, "Flusher shut down.");

				return;
			},
		}

		loop {
			tokio::select! {
				signal = rx.recv() => match signal {
					Some(Signal::Dirty) => continue,
					Some(Signal::Shutdown(ack)) => {
						flush().await;

						let _ = ack.send(());

						tracing::debug!(label, "Flusher shut down.");

						return;
					},
					None => {
						flush().await;

						return;
					},
				},
				_ = tokio::time::sleep(delay) => break,
			}
		}

		dirty = !flush().await;

		if dirty {
			tracing::warn!(label, "Snapshot flush failed; will retry after the next mutation.");
		}
	}

	if dirty {
		flush().await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	fn counting_flush(count: Arc<AtomicUsize>) -> FlushFn {
		Arc::new(move || {
			let count = count.clone();

			Box::pin(async move {
				count.fetch_add(1, Ordering::SeqCst);

				true
			})
		})
	}

	#[tokio::test]
	async fn coalesces_marks_inside_window() {
		let count = Arc::new(AtomicUsize::new(0));
		let flusher =
			Flusher::spawn("test", Duration::from_millis(50), counting_flush(count.clone()));

		for _ in 0..10 {
			flusher.mark_dirty();
		}

		tokio::time::sleep(Duration::from_millis(250)).await;

		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn shutdown_flushes_pending_marks() {
		let count = Arc::new(AtomicUsize::new(0));
		let flusher =
			Flusher::spawn("test", Duration::from_secs(60), counting_flush(count.clone()));

		flusher.mark_dirty();
		flusher.shutdown().await;

		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn shutdown_without_marks_skips_flush() {
		let count = Arc::new(AtomicUsize::new(0));
		let flusher =
			Flusher::spawn("test", Duration::from_secs(60), counting_flush(count.clone()));

		flusher.shutdown().await;

		assert_eq!(count.load(Ordering::SeqCst), 0);
	}
}
