use std::sync::mpsc::Sender;
use log::trace;
use thiserror::Error;
use crate::keypad::KeypadKey;

/// Returned by a sink that cannot accept the keypad, e.g. because the input device failed to register.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Receives decoded key events from the scan worker.
///
/// Within one scan cycle every `press`/`release` is delivered before that cycle's `sync`.
pub trait KeyEventSink: Send {
    /// Declares every key the keypad can report. Called once, before any event.
    fn register(&mut self, keys: &[KeypadKey]) -> Result<(), SinkError>;
    fn press(&mut self, key: KeypadKey);
    fn release(&mut self, key: KeypadKey);
    /// Marks the end of a scan cycle.
    fn sync(&mut self);
}

impl<T: KeyEventSink + ?Sized> KeyEventSink for Box<T> {
    fn register(&mut self, keys: &[KeypadKey]) -> Result<(), SinkError> {
        (**self).register(keys)
    }

    fn press(&mut self, key: KeypadKey) {
        (**self).press(key)
    }

    fn release(&mut self, key: KeypadKey) {
        (**self).release(key)
    }

    fn sync(&mut self) {
        (**self).sync()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KeyEvent {
    Press(KeypadKey),
    Release(KeypadKey),
    Sync,
}

/// Forwards events over a channel. A disconnected receiver drops events silently.
impl KeyEventSink for Sender<KeyEvent> {
    fn register(&mut self, _keys: &[KeypadKey]) -> Result<(), SinkError> {
        Ok(())
    }

    fn press(&mut self, key: KeypadKey) {
        forward(self, KeyEvent::Press(key));
    }

    fn release(&mut self, key: KeypadKey) {
        forward(self, KeyEvent::Release(key));
    }

    fn sync(&mut self) {
        forward(self, KeyEvent::Sync);
    }
}

fn forward(sender: &Sender<KeyEvent>, event: KeyEvent) {
    if sender.send(event).is_err() {
        trace!("Event receiver gone, dropping {:?}", event);
    }
}
