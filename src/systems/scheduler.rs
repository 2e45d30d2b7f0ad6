//! System scheduler for orchestrating system execution

use crate::data::ScanState;
use crate::error::{SystemError, SystemResult};
use crate::systems::{SystemContext, SystemRunner};
use tracing::{debug, info};

#[derive(Default)]
pub struct SystemScheduler {
	pub systems: Vec<Box<dyn SystemRunner>>,
}

impl SystemScheduler {
	pub fn new() -> Self {
		Self {
			systems: Vec::new(),
		}
	}

	pub fn add_system<S: SystemRunner + 'static>(&mut self, system: S) {
		debug!("Scheduler: added system {}", system.name());
		self.systems.push(Box::new(system));
	}

	pub fn clear(&mut self) {
		self.systems.clear();
	}

	/// Run every registered system once, highest priority first.
	///
	/// `can_run` is checked right before each system, so later systems see the
	/// rows produced by earlier ones.
	pub async fn run_all(
		&mut self,
		state: &mut ScanState,
		context: &SystemContext,
	) -> SystemResult<()> {
		// Stable sort keeps registration order among equal priorities
		self.systems.sort_by_key(|s| std::cmp::Reverse(s.priority()));
		info!("Scheduler: running {} systems", self.systems.len());

		for system in &self.systems {
			if context.is_cancelled() {
				info!("Scheduler: operation cancelled");
				return Err(SystemError::Cancelled {
					system: system.name().to_string(),
				});
			}
			if !system.can_run(state) {
				debug!("Scheduler: skipping {} (nothing to do)", system.name());
				continue;
			}
			debug!("Scheduler: running system {}", system.name());
			system.run(state, context).await?;
			debug!("Scheduler: completed system {}", system.name());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::sync::{Arc, Mutex};

	struct Recorder {
		name: &'static str,
		priority: u8,
		log: Arc<Mutex<Vec<&'static str>>>,
		runnable: bool,
	}

	#[async_trait]
	impl SystemRunner for Recorder {
		async fn run(&self, _state: &mut ScanState, _context: &SystemContext) -> SystemResult<()> {
			self.log.lock().unwrap().push(self.name);
			Ok(())
		}

		fn can_run(&self, _state: &ScanState) -> bool {
			self.runnable
		}

		fn priority(&self) -> u8 {
			self.priority
		}

		fn name(&self) -> &'static str {
			self.name
		}
	}

	fn recorder(
		name: &'static str,
		priority: u8,
		runnable: bool,
		log: &Arc<Mutex<Vec<&'static str>>>,
	) -> Recorder {
		Recorder {
			name,
			priority,
			log: log.clone(),
			runnable,
		}
	}

	#[smol_potat::test]
	async fn test_runs_by_priority_and_skips_blocked() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let mut scheduler = SystemScheduler::new();
		scheduler.add_system(recorder("low", 1, true, &log));
		scheduler.add_system(recorder("blocked", 100, false, &log));
		scheduler.add_system(recorder("high", 200, true, &log));

		let mut state = ScanState::new().unwrap();
		scheduler
			.run_all(&mut state, &SystemContext::new())
			.await
			.unwrap();

		assert_eq!(*log.lock().unwrap(), vec!["high", "low"]);
	}

	#[smol_potat::test]
	async fn test_cancelled_before_start() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let mut scheduler = SystemScheduler::new();
		scheduler.add_system(recorder("only", 1, true, &log));

		let context = SystemContext::new();
		context.cancel();
		let mut state = ScanState::new().unwrap();
		let result = scheduler.run_all(&mut state, &context).await;

		assert!(matches!(result, Err(SystemError::Cancelled { .. })));
		assert!(log.lock().unwrap().is_empty());
	}
}
