//! Processing systems for the duplicate detection pipeline

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::data::ScanState;
use crate::error::{SystemError, SystemResult};

pub mod discovery;
pub mod grouping;
pub mod hashing;
pub mod scheduler;

pub use discovery::FileDiscoverySystem;
pub use grouping::SizeGroupingSystem;
pub use hashing::{ContentHashSystem, HashAlgorithm};
pub use scheduler::SystemScheduler;

/// Common interface for all processing systems
#[async_trait]
pub trait SystemRunner: Send + Sync {
	/// Run the system on the current state
	async fn run(&self, state: &mut ScanState, context: &SystemContext) -> SystemResult<()>;

	/// Check if this system can run (dependencies met)
	fn can_run(&self, state: &ScanState) -> bool;

	/// System priority (higher number = higher priority)
	fn priority(&self) -> u8;

	/// System name for logging and identification
	fn name(&self) -> &'static str;
}

/// System metadata interface
pub trait System {
	/// Columns required by this system
	fn required_columns(&self) -> &[&'static str];

	/// Columns written by this system
	fn produced_columns(&self) -> &[&'static str];

	/// System description
	fn description(&self) -> &'static str;
}

/// Progress information for system execution
#[derive(Debug, Clone)]
pub struct SystemProgress {
	pub system_name: String,
	pub total_items: usize,
	pub processed_items: usize,
	pub current_item: Option<String>,
}

impl SystemProgress {
	pub fn new(system_name: String, total_items: usize) -> Self {
		Self {
			system_name,
			total_items,
			processed_items: 0,
			current_item: None,
		}
	}

	pub fn update(&mut self, processed: usize, current_item: Option<String>) {
		self.processed_items = processed;
		self.current_item = current_item;
	}

	pub fn progress_ratio(&self) -> f64 {
		if self.total_items == 0 {
			1.0
		} else {
			self.processed_items as f64 / self.total_items as f64
		}
	}

	pub fn is_complete(&self) -> bool {
		self.processed_items >= self.total_items
	}
}

pub type ProgressCallback = Arc<dyn Fn(SystemProgress) + Send + Sync>;

/// System execution context
#[derive(Clone)]
pub struct SystemContext {
	pub max_concurrent_files: usize,
	pub yield_interval: Duration,
	pub progress_callback: Option<ProgressCallback>,
	pub cancellation_token: Arc<AtomicBool>,
}

impl std::fmt::Debug for SystemContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SystemContext")
			.field("max_concurrent_files", &self.max_concurrent_files)
			.field("yield_interval", &self.yield_interval)
			.field("progress_callback", &self.progress_callback.is_some())
			.field("cancelled", &self.is_cancelled())
			.finish()
	}
}

impl Default for SystemContext {
	fn default() -> Self {
		Self {
			max_concurrent_files: num_cpus::get(),
			yield_interval: Duration::from_millis(100),
			progress_callback: None,
			cancellation_token: Arc::new(AtomicBool::new(false)),
		}
	}
}

impl SystemContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_concurrent_files(mut self, max: usize) -> Self {
		self.max_concurrent_files = max.max(1);
		self
	}

	pub fn with_yield_interval(mut self, interval: Duration) -> Self {
		self.yield_interval = interval;
		self
	}

	pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
		self.progress_callback = Some(callback);
		self
	}

	pub fn with_cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
		self.cancellation_token = token;
		self
	}

	pub fn report_progress(&self, progress: SystemProgress) {
		if let Some(ref callback) = self.progress_callback {
			callback(progress);
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation_token.load(Ordering::Relaxed)
	}

	pub fn cancel(&self) {
		self.cancellation_token.store(true, Ordering::Relaxed);
	}
}

/// Yield control periodically, failing once the context is cancelled
pub async fn yield_periodically_with_cancellation(
	last_yield: &mut Instant,
	interval: Duration,
	context: &SystemContext,
	system: &str,
) -> SystemResult<()> {
	if last_yield.elapsed() >= interval {
		smol::future::yield_now().await;
		*last_yield = Instant::now();
	}

	if context.is_cancelled() {
		return Err(SystemError::Cancelled {
			system: system.to_string(),
		});
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	#[test]
	fn test_progress_ratio() {
		let mut progress = SystemProgress::new("ContentHash".to_string(), 4);
		assert_eq!(progress.progress_ratio(), 0.0);
		progress.update(2, Some("/a".to_string()));
		assert_eq!(progress.progress_ratio(), 0.5);
		assert!(!progress.is_complete());
		progress.update(4, None);
		assert!(progress.is_complete());

		let empty = SystemProgress::new("ContentHash".to_string(), 0);
		assert_eq!(empty.progress_ratio(), 1.0);
	}

	#[test]
	fn test_context_progress_and_cancel() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		let context = SystemContext::new()
			.with_max_concurrent_files(0)
			.with_progress_callback(Arc::new(move |p: SystemProgress| {
				sink.lock().unwrap().push(p.processed_items);
			}));
		assert_eq!(context.max_concurrent_files, 1);

		let mut progress = SystemProgress::new("x".to_string(), 3);
		progress.update(3, None);
		context.report_progress(progress);
		assert_eq!(*seen.lock().unwrap(), vec![3]);

		assert!(!context.is_cancelled());
		context.cancel();
		assert!(context.is_cancelled());
	}

	#[smol_potat::test]
	async fn test_yield_reports_cancellation() {
		let context = SystemContext::new();
		let mut last = Instant::now();
		assert!(
			yield_periodically_with_cancellation(&mut last, Duration::ZERO, &context, "t")
				.await
				.is_ok()
		);
		context.cancel();
		let err = yield_periodically_with_cancellation(&mut last, Duration::ZERO, &context, "t")
			.await
			.unwrap_err();
		assert!(matches!(err, SystemError::Cancelled { .. }));
	}
}
