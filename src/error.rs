use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by selectors, channels and the write pipeline.
///
/// The enum is `Clone` (I/O causes are wrapped in `Arc`) so a failure can
/// be stored on a channel once and handed to every later observer.
#[derive(Debug, Clone, Error)]
pub enum SelectError {
    /// The selector shut down before, or while, the operation ran.
    #[error("selector is closed")]
    SelectorClosed,
    /// The channel is closing or closed.
    #[error("channel is closed")]
    ChannelClosed,
    /// The channel's registration token is no longer valid.
    #[error("registration token is cancelled")]
    CancelledKey,
    /// Another thread already runs this selector's loop.
    #[error("selector is already running")]
    AlreadyRunning,
    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for SelectError {
    fn from(err: io::Error) -> SelectError {
        SelectError::Io(Arc::new(err))
    }
}

impl SelectError {
    pub fn is_selector_closed(&self) -> bool {
        matches!(self, SelectError::SelectorClosed)
    }
}
