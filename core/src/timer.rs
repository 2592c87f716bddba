use std::{
    io,
    sync::{
        atomic::{AtomicU16, AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use bytemuck::{Pod, Zeroable};
use log::{debug, info, warn};

/// Period of the 60 Hz timer tick.
pub const TIMER_PERIOD: Duration = Duration::from_millis(16);

/// Delay and sound counters, packed so both fit in one atomic word.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct TimerPair {
    pub delay: u8,
    pub sound: u8,
}

impl TimerPair {
    pub const fn new(delay: u8, sound: u8) -> TimerPair {
        TimerPair { delay, sound }
    }

    fn pack(self) -> u16 {
        bytemuck::cast(self)
    }

    fn unpack(word: u16) -> TimerPair {
        bytemuck::cast(word)
    }

    /// One 60 Hz step, both counters saturate at zero.
    pub fn decremented(self) -> TimerPair {
        TimerPair {
            delay: self.delay.saturating_sub(1),
            sound: self.sound.saturating_sub(1),
        }
    }
}

/// Handle to a timer pair shared between the execution loop and the timer
/// thread. Cloning shares the same counters.
///
/// Every change goes through a compare-and-swap of the whole packed pair, so
/// a writer never loses the other field's concurrent update.
#[derive(Debug, Clone, Default)]
pub struct SharedTimers(Arc<AtomicU16>);

impl SharedTimers {
    pub fn new() -> SharedTimers {
        SharedTimers::default()
    }

    pub fn load(&self) -> TimerPair {
        TimerPair::unpack(self.0.load(Ordering::Acquire))
    }

    /// Read-modify-write of the pair, retried until it commits. Returns the
    /// pair before and after the change.
    pub fn update<F>(&self, mut f: F) -> (TimerPair, TimerPair)
    where
        F: FnMut(TimerPair) -> TimerPair,
    {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let old = TimerPair::unpack(current);
            let new = f(old);
            match self.0.compare_exchange_weak(
                current,
                new.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (old, new),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn store(&self, pair: TimerPair) {
        self.update(|_| pair);
    }

    pub fn delay(&self) -> u8 {
        self.load().delay
    }

    pub fn sound(&self) -> u8 {
        self.load().sound
    }

    pub fn set_delay(&self, delay: u8) {
        self.update(|pair| TimerPair { delay, ..pair });
    }

    pub fn set_sound(&self, sound: u8) {
        self.update(|pair| TimerPair { sound, ..pair });
    }

    /// Decrement both counters. Returns true when the sound counter just
    /// reached zero.
    pub fn tick(&self) -> bool {
        let (old, new) = self.update(TimerPair::decremented);
        old.sound == 1 && new.sound == 0
    }
}

/// Receives the beep raised when the sound timer expires.
pub trait Beeper: Send + Sync {
    fn beep(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullBeeper;

impl Beeper for NullBeeper {
    fn beep(&self) {}
}

/// Counts beeps, handy for hosts without audio and for tests.
#[derive(Debug, Default)]
pub struct CountingBeeper(AtomicUsize);

impl CountingBeeper {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

impl Beeper for CountingBeeper {
    fn beep(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

/// Background thread ticking a `SharedTimers` at a fixed period.
///
/// The thread is stopped and joined by `stop()` or when the service is
/// dropped.
pub struct TimerService {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TimerService {
    pub fn spawn(
        timers: SharedTimers,
        period: Duration,
        beeper: Arc<dyn Beeper>,
    ) -> io::Result<TimerService> {
        let (shutdown, rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("chip8-timers".into())
            .spawn(move || loop {
                match rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if timers.tick() {
                            debug!("Sound timer expired");
                            beeper.beep();
                        }
                    }
                    // Explicit stop or the service was dropped
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!("Started timer service [period: {:?}]", period);

        Ok(TimerService {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it to exit. Calling it twice is a no-op.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Timer thread panicked");
            }
            info!("Stopped timer service");
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}
