use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

pub const KEY_COUNT: usize = 16;

/// Source of the 16 logical keys (0x0..=0xF).
pub trait Keypad: Send + Sync {
    fn is_key_down(&self, key: u8) -> bool;

    /// Block until a key is pressed. A press only counts while its key is
    /// still held. `None` means no more input will arrive and the caller
    /// should shut down.
    fn wait_for_any_key(&self) -> Option<u8>;
}

/// Keypad with no keys, `wait_for_any_key` returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullKeypad;

impl Keypad for NullKeypad {
    fn is_key_down(&self, _key: u8) -> bool {
        false
    }

    fn wait_for_any_key(&self) -> Option<u8> {
        None
    }
}

#[derive(Debug, Default)]
struct KeyState {
    down: [bool; KEY_COUNT],
    /// Last press not yet consumed by a waiter, dropped when that key is
    /// released
    pending: Option<u8>,
    closed: bool,
}

/// Keypad fed by a host input thread.
///
/// The host calls `press`/`release` as events arrive. A waiter parked in
/// `wait_for_any_key` sleeps on a condition variable until the next press or
/// until `close`.
#[derive(Debug, Clone, Default)]
pub struct SharedKeypad {
    inner: Arc<(Mutex<KeyState>, Condvar)>,
}

impl SharedKeypad {
    pub fn new() -> SharedKeypad {
        SharedKeypad::default()
    }

    fn lock(&self) -> MutexGuard<'_, KeyState> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn press(&self, key: u8) {
        let key = key & 0xF;
        let mut state = self.lock();
        state.down[key as usize] = true;
        state.pending = Some(key);
        self.inner.1.notify_all();
    }

    pub fn release(&self, key: u8) {
        let key = key & 0xF;
        let mut state = self.lock();
        state.down[key as usize] = false;
        if state.pending == Some(key) {
            state.pending = None;
        }
    }

    pub fn release_all(&self) {
        let mut state = self.lock();
        state.down = [false; KEY_COUNT];
        state.pending = None;
    }

    /// Wake every waiter with `None`. Presses after this are ignored by
    /// waiters.
    pub fn close(&self) {
        self.lock().closed = true;
        self.inner.1.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Keypad for SharedKeypad {
    fn is_key_down(&self, key: u8) -> bool {
        self.lock().down[(key & 0xF) as usize]
    }

    fn wait_for_any_key(&self) -> Option<u8> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(key) = state.pending.take() {
                if state.down[key as usize] {
                    return Some(key);
                }
            }
            state = self
                .inner
                .1
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn test_press_release() {
        let keypad = SharedKeypad::new();

        keypad.press(0xA);
        assert!(keypad.is_key_down(0xA));
        assert!(!keypad.is_key_down(0xB));

        keypad.release(0xA);
        assert!(!keypad.is_key_down(0xA));
    }

    #[test]
    fn test_key_id_masked() {
        let keypad = SharedKeypad::new();

        keypad.press(0x1F);

        assert!(keypad.is_key_down(0xF));
        assert!(keypad.is_key_down(0x3F));
    }

    #[test]
    fn test_wait_consumes_pending_press() {
        let keypad = SharedKeypad::new();
        keypad.press(7);

        assert_eq!(keypad.wait_for_any_key(), Some(7));
        // Key stays down after the wait consumed the press
        assert!(keypad.is_key_down(7));
    }

    #[test]
    fn test_wait_wakes_on_press_from_other_thread() {
        let keypad = SharedKeypad::new();
        let host = keypad.clone();

        let waiter = thread::spawn(move || keypad.wait_for_any_key());
        thread::sleep(Duration::from_millis(10));
        host.press(0x3);

        assert_eq!(waiter.join().unwrap(), Some(0x3));
    }

    #[test]
    fn test_released_press_does_not_satisfy_wait() {
        let keypad = SharedKeypad::new();
        let host = keypad.clone();
        keypad.press(5);
        keypad.release(5);

        let waiter = thread::spawn(move || keypad.wait_for_any_key());
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished(), "wait returned on a released key");

        host.press(0x9);
        assert_eq!(waiter.join().unwrap(), Some(0x9));
    }

    #[test]
    fn test_release_all_drops_pending_press() {
        let keypad = SharedKeypad::new();
        let host = keypad.clone();
        keypad.press(2);
        keypad.release_all();

        let waiter = thread::spawn(move || keypad.wait_for_any_key());
        thread::sleep(Duration::from_millis(20));
        host.close();

        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn test_close_wakes_waiter() {
        let keypad = SharedKeypad::new();
        let host = keypad.clone();

        let waiter = thread::spawn(move || keypad.wait_for_any_key());
        thread::sleep(Duration::from_millis(10));
        host.close();

        assert_eq!(waiter.join().unwrap(), None);
        assert!(host.is_closed());
    }

    #[test]
    fn test_null_keypad() {
        assert!(!NullKeypad.is_key_down(0));
        assert_eq!(NullKeypad.wait_for_any_key(), None);
    }
}
