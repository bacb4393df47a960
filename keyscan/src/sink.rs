//! Streams key events as JSON lines.
use std::io::Write;
use log::{debug, info, warn};
use serde::Serialize;
use keyscan_gpio::keypad::{KeyEventSink, KeypadKey, SinkError};

#[derive(Serialize, Debug)]
struct EventRecord {
    event: &'static str,
    key: char,
    code: u16,
}

/// Writes one JSON object per press or release, flushing at the end of every scan cycle.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer
    }

    fn emit(&mut self, event: &'static str, key: KeypadKey) {
        debug!("Key {} {}", key, event);
        let record = EventRecord { event, key: key.to_char(), code: key.input_code() };
        let written = serde_json::to_writer(&mut self.writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = written {
            warn!("Failed to write {:?}: {}", record, e);
        }
    }
}

impl<W: Write + Send> KeyEventSink for JsonLinesSink<W> {
    fn register(&mut self, keys: &[KeypadKey]) -> Result<(), SinkError> {
        let chars: String = keys.iter().map(|key| key.to_char()).collect();
        info!("Reporting keys {}", chars);
        Ok(())
    }

    fn press(&mut self, key: KeypadKey) {
        self.emit("press", key);
    }

    fn release(&mut self, key: KeypadKey) {
        self.emit("release", key);
    }

    fn sync(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush events: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_written_one_per_line() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.register(&[KeypadKey::Key1, KeypadKey::KeyHash]).unwrap();
        sink.press(KeypadKey::Key1);
        sink.sync();
        sink.release(KeypadKey::Key1);
        sink.press(KeypadKey::KeyHash);
        sink.sync();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"event":"press","key":"1","code":79}"#,
                r#"{"event":"release","key":"1","code":79}"#,
                r##"{"event":"press","key":"#","code":96}"##,
            ],
        );
    }
}
