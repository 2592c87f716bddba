use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use log::{debug, info};
use schip_core::{SharedKeypad, KEY_COUNT};

/// Terminals report presses but rarely releases, so a key counts as held for
/// this long after its last press or repeat.
const HOLD_TIME: Duration = Duration::from_millis(150);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Left-hand side of a qwerty keyboard laid out like the COSMAC hex keypad.
const KEYMAP: [(char, u8); KEY_COUNT] = [
    ('1', 0x1),
    ('2', 0x2),
    ('3', 0x3),
    ('4', 0xC),
    ('q', 0x4),
    ('w', 0x5),
    ('e', 0x6),
    ('r', 0xD),
    ('a', 0x7),
    ('s', 0x8),
    ('d', 0x9),
    ('f', 0xE),
    ('z', 0xA),
    ('x', 0x0),
    ('c', 0xB),
    ('v', 0xF),
];

pub fn map_key(c: char) -> Option<u8> {
    let c = c.to_ascii_lowercase();
    KEYMAP.iter().find(|(k, _)| *k == c).map(|(_, key)| *key)
}

/// Read terminal events into `keypad` until `stop` is raised or Esc is hit.
///
/// Esc and Ctrl-C raise `stop` and close the keypad so a machine blocked on
/// a key wait shuts down too.
pub fn spawn(keypad: SharedKeypad, stop: Arc<AtomicBool>) -> io::Result<JoinHandle<io::Result<()>>> {
    thread::Builder::new()
        .name("input".into())
        .spawn(move || {
            let result = pump(&keypad, &stop);
            stop.store(true, Ordering::Release);
            keypad.close();
            result
        })
}

fn pump(keypad: &SharedKeypad, stop: &AtomicBool) -> io::Result<()> {
    let mut held: [Option<Instant>; KEY_COUNT] = [None; KEY_COUNT];

    while !stop.load(Ordering::Acquire) {
        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if is_quit(&key) {
                    info!("Quit requested");
                    return Ok(());
                }
                if key.kind == KeyEventKind::Release {
                    continue;
                }
                if let KeyCode::Char(c) = key.code {
                    match map_key(c) {
                        Some(k) => {
                            keypad.press(k);
                            held[k as usize] = Some(Instant::now() + HOLD_TIME);
                        }
                        None => debug!("Unmapped key {:?}", c),
                    }
                }
            }
        }

        let now = Instant::now();
        for (k, deadline) in held.iter_mut().enumerate() {
            if deadline.is_some_and(|d| d <= now) {
                keypad.release(k as u8);
                *deadline = None;
            }
        }
    }

    Ok(())
}

fn is_quit(key: &KeyEvent) -> bool {
    key.code == KeyCode::Esc
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
}
