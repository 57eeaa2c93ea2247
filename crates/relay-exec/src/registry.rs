//! Process-wide executor registry, mirroring the hub's.

use crate::executor::ToolExecutor;
use std::sync::{Arc, OnceLock};

static EXECUTOR: OnceLock<Arc<ToolExecutor>> = OnceLock::new();

/// Install the process-wide executor, or return the existing one.
pub fn init_executor(build: impl FnOnce() -> ToolExecutor) -> Arc<ToolExecutor> {
    Arc::clone(EXECUTOR.get_or_init(|| Arc::new(build())))
}

/// The process-wide executor, if one has been initialized.
pub fn executor() -> Option<Arc<ToolExecutor>> {
    EXECUTOR.get().cloned()
}
