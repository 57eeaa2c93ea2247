//! Process-wide hub registry.
//!
//! The hub is an ambient singleton that must survive developer-time reloads,
//! so it lives in an explicit once-initialized registry rather than an ad-hoc
//! static in whatever module happens to construct it first.

use crate::hub::Hub;
use relay_config::HubConfig;
use std::sync::{Arc, OnceLock};

static HUB: OnceLock<Arc<Hub>> = OnceLock::new();

/// Initialize the process-wide hub, or return the existing one. Repeated
/// calls with a different config return the original instance unchanged.
pub fn init_hub(config: HubConfig) -> Arc<Hub> {
    Arc::clone(HUB.get_or_init(|| Hub::new(config)))
}

/// The process-wide hub, if one has been initialized.
pub fn hub() -> Option<Arc<Hub>> {
    HUB.get().cloned()
}
