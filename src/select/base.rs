//! The loop skeleton shared by both selector flavours: lifecycle,
//! pending-close draining and the close handshake.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};
use std::time::Duration;

use mio::Token;
use parking_lot::{Mutex, RwLock};
use slab::Slab;

use crate::error::SelectError;
use crate::future::RunningFuture;
use crate::net::channel::{ChannelId, EngineChannel};
use crate::poll::RawSelector;
use crate::queues::Fifo;

/// Bounds shutdown latency; beyond that the value carries no meaning.
pub(crate) const DEFAULT_SELECT_TIMEOUT: Duration = Duration::from_millis(300);

/// State common to both selector flavours. The loop itself lives in
/// [`EventLoop`]; the flavours plug their drain-and-poll behaviour in by
/// implementing its required methods.
pub(crate) struct SelectorBase<C> {
    pub(crate) raw: Arc<dyn RawSelector>,
    pub(crate) channels_to_close: Fifo<Arc<C>>,
    registered: RwLock<HashMap<ChannelId, Arc<C>>>,
    tokens: Mutex<Slab<Arc<C>>>,
    closed: AtomicBool,
    run_lock: Mutex<()>,
    running: Arc<RunningFuture>,
    thread: Mutex<Option<(ThreadId, Thread)>>,
    pub(crate) timeout: Duration,
}

impl<C: EngineChannel> SelectorBase<C> {
    pub(crate) fn new(raw: Arc<dyn RawSelector>, timeout: Duration) -> SelectorBase<C> {
        SelectorBase {
            raw,
            channels_to_close: Fifo::new(),
            registered: RwLock::new(HashMap::new()),
            tokens: Mutex::new(Slab::new()),
            closed: AtomicBool::new(false),
            run_lock: Mutex::new(()),
            running: Arc::new(RunningFuture::new()),
            thread: Mutex::new(None),
            timeout,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.run_lock.is_locked()
    }

    pub(crate) fn running(&self) -> Arc<RunningFuture> {
        self.running.clone()
    }

    pub(crate) fn wake(&self) {
        let _ = self.raw.wake();
    }

    pub(crate) fn set_thread(&self) {
        let current = thread::current();
        *self.thread.lock() = Some((current.id(), current));
    }

    pub(crate) fn on_selector_thread(&self) -> bool {
        match &*self.thread.lock() {
            Some((id, _)) => *id == thread::current().id(),
            None => false,
        }
    }

    pub(crate) fn registered_channels(&self) -> Vec<Arc<C>> {
        self.registered.read().values().cloned().collect()
    }

    pub(crate) fn registered_count(&self) -> usize {
        self.registered.read().len()
    }

    pub(crate) fn is_registered(&self, id: ChannelId) -> bool {
        self.registered.read().contains_key(&id)
    }

    pub(crate) fn insert_registered(&self, channel: Arc<C>) {
        self.registered.write().insert(channel.id(), channel);
    }

    pub(crate) fn insert_token(&self, channel: Arc<C>) -> Token {
        Token(self.tokens.lock().insert(channel))
    }

    pub(crate) fn remove_token(&self, token: Token) {
        self.tokens.lock().try_remove(token.0);
    }

    pub(crate) fn channel_for(&self, token: Token) -> Option<Arc<C>> {
        self.tokens.lock().get(token.0).cloned()
    }

    /// The close handshake (producer side). Call straight after pushing
    /// `item`'s queue entry: if the selector has since closed and the item
    /// can still be removed, the selector never saw it and the caller owns
    /// the failure, delivered here as `Err(item)`. The selector thread
    /// itself may keep enqueuing during shutdown.
    pub(crate) fn ensure_open_for_enqueuing<T>(
        &self,
        queue: &Fifo<T>,
        mut pred: impl FnMut(&T) -> bool,
    ) -> Result<(), T> {
        if !self.is_open() && !self.on_selector_thread() {
            if let Some(item) = queue.remove(&mut pred) {
                return Err(item);
            }
        }
        Ok(())
    }

    pub(crate) fn queue_channel_close(&self, channel: Arc<C>) -> Result<(), SelectError> {
        let id = channel.id();
        self.channels_to_close.push(channel);
        match self.ensure_open_for_enqueuing(&self.channels_to_close, |c| c.id() == id) {
            Ok(()) => {
                self.wake();
                Ok(())
            }
            Err(_removed) => Err(SelectError::SelectorClosed),
        }
    }

    pub(crate) fn close_pending_channels(&self, hook: &dyn Fn(&Arc<C>)) {
        while let Some(channel) = self.channels_to_close.pop() {
            self.close_channel(&channel, hook);
        }
    }

    /// Close one channel on the selector thread. The hook runs at most
    /// once per channel; the registered-set removal, token release and
    /// close-future completion happen even if it panics.
    fn close_channel(&self, channel: &Arc<C>, hook: &dyn Fn(&Arc<C>)) {
        let token = channel.core().token();
        let hook_outcome = if channel.core().claim_close_hook() {
            catch_unwind(AssertUnwindSafe(|| hook(channel)))
        } else {
            Ok(())
        };
        self.registered.write().remove(&channel.id());
        channel.core().take_token();
        if let Some(token) = token {
            self.tokens.lock().try_remove(token.0);
        }
        channel.core().close_future().complete(());
        if let Err(payload) = hook_outcome {
            resume_unwind(payload);
        }
    }

    /// Shut the selector down and wait for the loop to exit. Idempotent:
    /// the first caller performs the close, every caller waits (except the
    /// selector thread itself, which cannot wait for its own exit).
    pub(crate) fn close(&self, interrupt: bool) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.raw.close();
            if interrupt {
                if let Some((_, handle)) = &*self.thread.lock() {
                    handle.unpark();
                }
            }
            let _ = self.raw.wake();
        }
        if !self.on_selector_thread() {
            drop(self.run_lock.lock());
        }
    }
}

/// The event loop itself, expressed over a drain-and-poll callback
/// (`do_select`) so the two selector flavours share one skeleton.
pub(crate) trait EventLoop {
    type Channel: EngineChannel;

    fn base(&self) -> &SelectorBase<Self::Channel>;

    /// One flavour-specific turn: drain admin queues, then poll and
    /// dispatch readiness.
    fn do_select(&self, timeout: Duration) -> Result<(), SelectError>;

    /// Called once as the selector shuts down.
    fn cleanup(&self);

    fn close_hook(&self, channel: &Arc<Self::Channel>);

    fn on_select_error(&self, err: SelectError);

    fn on_panic(&self, payload: Box<dyn Any + Send>);

    /// Run the loop on the calling thread until the selector is closed.
    fn run(&self) -> Result<(), SelectError> {
        let base = self.base();
        let guard = match base.run_lock.try_lock() {
            Some(guard) => guard,
            None => return Err(SelectError::AlreadyRunning),
        };
        base.set_thread();
        base.running.complete(());
        let mut result = Ok(());
        while base.is_open() {
            if let Err(err) = self.single_loop() {
                result = Err(err);
                break;
            }
        }
        self.cleanup();
        drop(guard);
        result
    }

    /// One turn: pending closes first, then the flavour's select. Only a
    /// selector-closed condition seen while still marked open ends the
    /// loop; everything else is reported and survived.
    fn single_loop(&self) -> Result<(), SelectError> {
        let base = self.base();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            base.close_pending_channels(&|channel| self.close_hook(channel));
            self.do_select(base.timeout)
        }));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if err.is_selector_closed() => {
                if base.is_open() {
                    // The backend closed underneath a live selector.
                    Err(err)
                } else {
                    Ok(())
                }
            }
            Ok(Err(err)) => {
                self.on_select_error(err);
                Ok(())
            }
            Err(payload) => {
                self.on_panic(payload);
                Ok(())
            }
        }
    }
}
