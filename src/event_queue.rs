//! The thread-safe buffer that operator input lands in.

use crate::input_source::{keys, ControllerEvent, InputSource, KeyCode};

use log::{debug, warn};
use std::{
    collections::VecDeque,
    io::BufRead,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
};

/// An [InputSource] backed by a shared queue. Clones share the queue, so
/// a reader thread can hold one end while the session drains the other.
#[derive(Debug, Default, Clone)]
pub struct EventQueue {
    events: Arc<Mutex<VecDeque<ControllerEvent>>>,
}

impl EventQueue {
    /// An empty queue.
    pub fn new() -> Self {
        EventQueue {
            events: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue an event behind everything already queued.
    pub fn push(&self, event: ControllerEvent) {
        self.lock().push_back(event);
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Spawn a thread that turns each line of `input` into a key chord and
    /// queues it. The thread ends at end of input.
    pub fn spawn_reader<R>(&self, input: R) -> thread::JoinHandle<()>
    where
        R: BufRead + Send + 'static,
    {
        let queue = self.clone();
        thread::spawn(move || {
            for line in input.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("keyboard reader stopped: {}", e);
                        break;
                    }
                };
                match parse_chord(&line) {
                    Some(event) => queue.push(event),
                    None => debug!("ignoring input line {:?}", line),
                }
            }
            debug!("keyboard reader reached end of input");
        })
    }

    // A panicking reader must not take the session down with it.
    fn lock(&self) -> MutexGuard<'_, VecDeque<ControllerEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Iterator for EventQueue {
    type Item = ControllerEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.lock().pop_front()
    }
}

impl InputSource for EventQueue {
    fn clear(&mut self) {
        self.lock().clear();
    }
}

/// Map a key name to its code: a single character is its own code, and
/// the arrows go by name.
pub fn key_code(name: &str) -> Option<KeyCode> {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c as KeyCode),
        _ => match name {
            "up" => Some(keys::UP),
            "down" => Some(keys::DOWN),
            "left" => Some(keys::LEFT),
            "right" => Some(keys::RIGHT),
            _ => None,
        },
    }
}

/// Parse a line of whitespace-separated key names, all held together, such
/// as `x up`. Returns `None` for an empty line or an unknown key.
pub fn parse_chord(line: &str) -> Option<ControllerEvent> {
    let codes = line
        .split_whitespace()
        .map(key_code)
        .collect::<Option<Vec<_>>>()?;
    if codes.is_empty() {
        None
    } else {
        Some(ControllerEvent::keys_down(codes))
    }
}
