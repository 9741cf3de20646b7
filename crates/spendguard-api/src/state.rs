//! Shared application state for the API server.

use spendguard_core::CostController;

/// State shared by every handler behind an `Arc`.
#[derive(Debug)]
pub struct AppState {
    /// The control plane.
    pub controller: CostController,
}

impl AppState {
    /// Wrap a controller.
    pub const fn new(controller: CostController) -> Self {
        Self { controller }
    }
}
