use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sleep interrupted")]
pub struct Interrupted;

struct InterruptShared {
    flag: AtomicBool,
    wake_sender: Sender<()>,
    wake_receiver: Receiver<()>,
}

/// Cloneable interrupt flag with an interruptible sleep.
///
/// An interrupt stays set until `clear` is called; sleeping never consumes it.
#[derive(Clone)]
pub struct Interrupt {
    shared: Arc<InterruptShared>,
}

impl Default for Interrupt {
    fn default() -> Self {
        let (wake_sender, wake_receiver) = bounded(1);
        Self {
            shared: Arc::new(InterruptShared {
                flag: AtomicBool::new(false),
                wake_sender,
                wake_receiver,
            }),
        }
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.shared.flag.store(true, Ordering::Release);
        match self.shared.wake_sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                panic!("interrupt wake channel disconnected")
            }
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.shared.flag.load(Ordering::Acquire)
    }

    /// Clears the interrupt and returns whether it was set.
    pub fn clear(&self) -> bool {
        while self.shared.wake_receiver.try_recv().is_ok() {}
        self.shared.flag.swap(false, Ordering::AcqRel)
    }

    /// Sleeps for `duration` unless interrupted before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            return Err(Interrupted);
        }
        match self.shared.wake_receiver.recv_timeout(duration) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {
                if self.is_interrupted() {
                    Err(Interrupted)
                } else {
                    Ok(())
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                panic!("interrupt wake channel disconnected")
            }
        }
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Interrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn sleeps_full_duration_without_interrupt() {
        let interrupt = Interrupt::new();
        let start = Instant::now();
        assert_eq!(interrupt.sleep(Duration::from_millis(5)), Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn pending_interrupt_fails_sleep_and_stays_set() {
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        assert_eq!(interrupt.sleep(Duration::from_secs(10)), Err(Interrupted));
        assert!(interrupt.is_interrupted());
        assert_eq!(interrupt.sleep(Duration::from_secs(10)), Err(Interrupted));

        assert!(interrupt.clear());
        assert!(!interrupt.is_interrupted());
        assert_eq!(interrupt.sleep(Duration::from_millis(1)), Ok(()));
    }

    #[test]
    fn interrupt_from_other_thread_wakes_sleeper() {
        let interrupt = Interrupt::new();
        let remote = interrupt.clone();
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.interrupt();
        });
        let start = Instant::now();
        assert_eq!(interrupt.sleep(Duration::from_secs(10)), Err(Interrupted));
        assert!(start.elapsed() < Duration::from_secs(10));
        waker.join().expect("join waker");
    }
}
