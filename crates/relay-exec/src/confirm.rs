//! The user-confirmation seam.

use std::future::Future;
use std::pin::Pin;

/// Asks the user to approve a dangerous call. With no handler installed the
/// executor denies, which is the safe non-interactive default.
pub trait ConfirmationHandler: Send + Sync {
    fn confirm(
        &self,
        server: &str,
        tool: &str,
        args: &serde_json::Value,
        message: &str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Fixed-answer handler for non-interactive embedders and tests.
pub struct StaticConfirmation(pub bool);

impl ConfirmationHandler for StaticConfirmation {
    fn confirm(
        &self,
        _server: &str,
        _tool: &str,
        _args: &serde_json::Value,
        _message: &str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let answer = self.0;
        Box::pin(async move { answer })
    }
}
