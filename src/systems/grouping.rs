//! Size grouping system: only files sharing a size can be duplicates

use async_trait::async_trait;
use tracing::info;

use crate::data::ScanState;
use crate::error::{SystemError, SystemResult};
use crate::systems::{System, SystemContext, SystemProgress, SystemRunner};

#[derive(Debug, Default, Clone, Copy)]
pub struct SizeGroupingSystem;

#[async_trait]
impl SystemRunner for SizeGroupingSystem {
	async fn run(&self, state: &mut ScanState, context: &SystemContext) -> SystemResult<()> {
		let total = state.data.height();
		let candidates = state
			.mark_candidates()
			.map_err(|e| SystemError::ExecutionFailed {
				system: self.name().into(),
				reason: e.to_string(),
			})?;
		info!(
			"SizeGrouping: {} of {} files share a size with another file",
			candidates, total
		);

		let mut progress = SystemProgress::new(self.name().to_string(), total);
		progress.update(total, None);
		context.report_progress(progress);
		Ok(())
	}

	fn can_run(&self, state: &ScanState) -> bool {
		state.data.height() > 0
	}

	fn priority(&self) -> u8 {
		220
	}

	fn name(&self) -> &'static str {
		"SizeGrouping"
	}
}

impl System for SizeGroupingSystem {
	fn required_columns(&self) -> &[&'static str] {
		&["size"]
	}

	fn produced_columns(&self) -> &[&'static str] {
		&["candidate"]
	}

	fn description(&self) -> &'static str {
		"Marks files whose size matches another file as hash candidates"
	}
}
