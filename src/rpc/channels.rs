//! Command Dispatcher: bounded FIFO between the link's write callback and
//! the single command worker.
//!
//! ```text
//! ┌───────────────┐ try_send ┌──────────────────┐ receive ┌──────────────┐
//! │ link write cb │─────────▶│ COMMANDS (cap 20)│────────▶│ command      │
//! │ (must return) │          └──────────────────┘         │ worker       │
//! │               │  REGISTER_CANCEL (inline)             │ (one at a    │
//! │               │──────────▶ CancelFlag::raise ────────▶│  time)       │
//! └───────────────┘                                       └──────────────┘
//! ```
//!
//! The producer never blocks: when the queue is full the incoming frame is
//! dropped. The worker drains strictly in arrival order.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, warn};

use super::codec::{Command, CommandFrame, Reply};
use crate::app::ports::ReplySink;

/// Queue capacity.
pub const QUEUE_DEPTH: usize = 20;

pub type CommandQueue = Channel<CriticalSectionRawMutex, CommandFrame, QUEUE_DEPTH>;

/// Inbound command queue: link callback → command worker.
pub static COMMANDS: CommandQueue = Channel::new();

/// Cancel request for the registration workflow, shared between the
/// inline cancel path and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What became of one inbound write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Queued,
    /// Handled in the caller's context without queueing.
    Inline,
    /// Queue full; the frame was discarded.
    Dropped,
    /// Empty write.
    Ignored,
}

/// Producer side, called from the link's write callback.
pub struct Dispatcher {
    queue: &'static CommandQueue,
    cancel: CancelFlag,
    replies: Arc<dyn ReplySink>,
}

impl Dispatcher {
    pub fn new(queue: &'static CommandQueue, cancel: CancelFlag, replies: Arc<dyn ReplySink>) -> Self {
        Self { queue, cancel, replies }
    }

    /// Accept one raw write. Never blocks.
    pub fn submit(&self, data: &[u8]) -> Submitted {
        let Some(frame) = CommandFrame::from_write(data) else {
            return Submitted::Ignored;
        };
        if frame.is_truncated() {
            warn!(
                "Dispatch: payload of type 0x{:02X} truncated ({} > {})",
                frame.kind,
                frame.declared_len,
                frame.payload.len()
            );
        }

        if frame.command() == Some(Command::RegisterCancel) {
            self.cancel.raise();
            debug!("Dispatch: registration cancel raised");
            if let Err(e) = self.replies.ack(Command::RegisterCancel as u8, Reply::Success as u8) {
                warn!("Dispatch: cancel ack not sent: {}", e);
            }
            return Submitted::Inline;
        }

        let kind = frame.kind;
        match self.queue.try_send(frame) {
            Ok(()) => Submitted::Queued,
            Err(_) => {
                warn!("Dispatch: queue full, dropped type 0x{:02X}", kind);
                Submitted::Dropped
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Wait for the next frame and hand it to `handle`.
pub fn process_next(queue: &CommandQueue, handle: &mut impl FnMut(CommandFrame)) {
    let frame = futures_lite::future::block_on(queue.receive());
    handle(frame);
}

/// Worker body: one command at a time, forever.
pub fn run_worker(queue: &'static CommandQueue, mut handle: impl FnMut(CommandFrame)) -> ! {
    log::info!("Dispatch: worker started");
    loop {
        process_next(queue, &mut handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Sent(Mutex<std::vec::Vec<(u8, std::vec::Vec<u8>)>>);

    impl ReplySink for Sent {
        fn send(&self, kind: u8, payload: &[u8]) -> Result<(), LinkError> {
            self.0.lock().unwrap().push((kind, payload.to_vec()));
            Ok(())
        }
    }

    fn fixture() -> (Dispatcher, Arc<Sent>, CancelFlag) {
        let queue: &'static CommandQueue = Box::leak(Box::new(Channel::new()));
        let sent = Arc::new(Sent::default());
        let cancel = CancelFlag::new();
        let d = Dispatcher::new(queue, cancel.clone(), sent.clone());
        (d, sent, cancel)
    }

    #[test]
    fn frames_drain_in_arrival_order() {
        let (d, _, _) = fixture();
        for kind in [0x02u8, 0x03, 0x21, 0x08] {
            assert_eq!(d.submit(&[kind, 1]), Submitted::Queued);
        }
        let mut seen = std::vec::Vec::new();
        for _ in 0..4 {
            process_next(d.queue, &mut |f: CommandFrame| seen.push(f.kind));
        }
        assert_eq!(seen, [0x02, 0x03, 0x21, 0x08]);
    }

    #[test]
    fn overflow_drops_newest() {
        let (d, _, _) = fixture();
        for i in 0..QUEUE_DEPTH {
            assert_eq!(d.submit(&[0x20, i as u8]), Submitted::Queued);
        }
        assert_eq!(d.submit(&[0x20, 0xEE]), Submitted::Dropped);
        assert_eq!(d.pending(), QUEUE_DEPTH);

        let mut last = 0;
        for _ in 0..QUEUE_DEPTH {
            process_next(d.queue, &mut |f: CommandFrame| last = f.payload[0]);
        }
        assert_eq!(last as usize, QUEUE_DEPTH - 1);
    }

    #[test]
    fn cancel_bypasses_full_queue() {
        let (d, sent, cancel) = fixture();
        for _ in 0..QUEUE_DEPTH {
            d.submit(&[0x02, 0]);
        }
        assert_eq!(d.submit(&[0x09]), Submitted::Inline);
        assert!(cancel.is_raised());
        assert_eq!(
            sent.0.lock().unwrap().as_slice(),
            &[(0x09, std::vec![Reply::Success as u8])]
        );
        assert_eq!(d.pending(), QUEUE_DEPTH);
    }

    #[test]
    fn empty_write_ignored() {
        let (d, _, _) = fixture();
        assert_eq!(d.submit(&[]), Submitted::Ignored);
        assert_eq!(d.pending(), 0);
    }
}
