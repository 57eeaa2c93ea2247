//! Process-wide composition-executor registry, mirroring the hub's.

use crate::executor::ComposeExecutor;
use std::sync::{Arc, OnceLock};

static COMPOSER: OnceLock<Arc<ComposeExecutor>> = OnceLock::new();

/// Install the process-wide composition executor, or return the existing one.
pub fn init_composer(build: impl FnOnce() -> ComposeExecutor) -> Arc<ComposeExecutor> {
    Arc::clone(COMPOSER.get_or_init(|| Arc::new(build())))
}

/// The process-wide composition executor, if one has been initialized.
pub fn composer() -> Option<Arc<ComposeExecutor>> {
    COMPOSER.get().cloned()
}
