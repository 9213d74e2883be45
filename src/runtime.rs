use crate::error::{EngineError, Result};
use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;

// Global Tokio runtime stored in a OnceCell for lazy init
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Returns the shared runtime that hosts subprocess reader tasks.
pub fn runtime() -> Result<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .thread_name("tubetone-worker")
            .enable_all()
            .build()
            .map_err(EngineError::Io)
    })
}
