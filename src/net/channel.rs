use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use mio::Token;
use parking_lot::Mutex;

use crate::future::CloseFuture;
use crate::ops::Ops;
use crate::poll::RawSelector;

/// Stable identity for a channel, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> ChannelId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChannelId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle of a channel. The state only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChannelState {
    Unregistered = 0,
    Registered = 1,
    Closing = 2,
    Closed = 3,
}

impl ChannelState {
    fn from_u8(value: u8) -> ChannelState {
        match value {
            0 => ChannelState::Unregistered,
            1 => ChannelState::Registered,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

/// State shared by both channel kinds: identity, lifecycle, registration
/// token, interest set and the close future.
pub(crate) struct ChannelCore {
    id: ChannelId,
    state: AtomicU8,
    interest: AtomicU8,
    token: Mutex<Option<Token>>,
    raw: OnceLock<Arc<dyn RawSelector>>,
    close_future: Arc<CloseFuture>,
    close_hook_claimed: AtomicBool,
}

impl ChannelCore {
    pub(crate) fn new() -> ChannelCore {
        ChannelCore {
            id: ChannelId::next(),
            state: AtomicU8::new(ChannelState::Unregistered as u8),
            interest: AtomicU8::new(Ops::empty().bits()),
            token: Mutex::new(None),
            raw: OnceLock::new(),
            close_future: Arc::new(CloseFuture::new()),
            close_hook_claimed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    pub(crate) fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` unless the channel is already past it. Returns the
    /// state observed before the call.
    pub(crate) fn advance(&self, to: ChannelState) -> ChannelState {
        ChannelState::from_u8(self.state.fetch_max(to as u8, Ordering::AcqRel))
    }

    /// Claim the one registration slot. Loses to a concurrent claim or to
    /// a close that already moved the state onward.
    pub(crate) fn mark_registered(&self) -> bool {
        self.state
            .compare_exchange(
                ChannelState::Unregistered as u8,
                ChannelState::Registered as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn set_raw(&self, raw: Arc<dyn RawSelector>) {
        let _ = self.raw.set(raw);
    }

    pub(crate) fn raw(&self) -> Option<&Arc<dyn RawSelector>> {
        self.raw.get()
    }

    pub(crate) fn set_token(&self, token: Token) {
        *self.token.lock() = Some(token);
    }

    pub(crate) fn token(&self) -> Option<Token> {
        *self.token.lock()
    }

    pub(crate) fn take_token(&self) -> Option<Token> {
        self.token.lock().take()
    }

    pub(crate) fn interest(&self) -> Ops {
        Ops::from_bits(self.interest.load(Ordering::Acquire))
    }

    pub(crate) fn set_interest(&self, ops: Ops) {
        self.interest.store(ops.bits(), Ordering::Release);
    }

    pub(crate) fn close_future(&self) -> Arc<CloseFuture> {
        self.close_future.clone()
    }

    /// The channel-close hook runs at most once per channel, no matter how
    /// many paths queued the channel for close.
    pub(crate) fn claim_close_hook(&self) -> bool {
        !self.close_hook_claimed.swap(true, Ordering::AcqRel)
    }
}

/// What the selector loop skeleton needs from either channel kind.
pub(crate) trait EngineChannel: Send + Sync + 'static {
    fn core(&self) -> &ChannelCore;

    fn id(&self) -> ChannelId {
        self.core().id()
    }

    fn state(&self) -> ChannelState {
        self.core().state()
    }
}
