use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use log::{debug, warn};
use spin_sleep::SpinSleeper;
use crate::{GpioBias, GpioDriver, GpioInput, GpioOutput, GpioResult};
use crate::keypad::{ConfigError, EdgeSource, KeypadConfig, LineRole, SENSE_LINES, STROBE_LINES};

/// Level driven on a strobe line to select its column.
const SELECTING: bool = true;

/// The sense lines of the matrix, shared between the scan worker and the edge watcher.
pub struct SenseLines {
    lines: Vec<Box<dyn GpioInput>>,
}

impl SenseLines {
    /// Claims the sense lines as inputs and checks that each of them can be read.
    ///
    /// With `detect_edges` the lines are requested with rising-edge detection.
    pub fn acquire(
        driver: &dyn GpioDriver,
        pins: [usize; SENSE_LINES],
        bias: GpioBias,
        detect_edges: bool,
    ) -> Result<Self, ConfigError> {
        let mut lines = Vec::with_capacity(SENSE_LINES);
        for (index, pin) in pins.into_iter().enumerate() {
            let line_error = |source| ConfigError::Line { role: LineRole::Sense, index, pin, source };

            let mut handle = driver.get_pin(pin).map_err(line_error)?;
            if bias != GpioBias::None {
                handle.set_bias(bias).map_err(line_error)?;
            }
            let input = if detect_edges {
                handle.into_edge_input()
            } else {
                handle.into_input()
            }
            .map_err(line_error)?;
            input.read().map_err(line_error)?;

            debug!("Sense line {} on {:?}", index, input);
            lines.push(input);
        }
        Ok(SenseLines { lines })
    }

    /// Reads all sense lines.
    pub fn read(&self) -> GpioResult<[bool; SENSE_LINES]> {
        let mut levels = [false; SENSE_LINES];
        for (level, line) in levels.iter_mut().zip(&self.lines) {
            *level = line.read()?;
        }
        Ok(levels)
    }

    /// Waits up to `timeout` for a rising edge on one sense line.
    pub fn wait_rising_edge(&self, line: usize, timeout: Duration) -> GpioResult<bool> {
        self.lines[line].wait_rising_edge(timeout)
    }
}

impl Debug for SenseLines {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SenseLines({:?})", self.lines)
    }
}

/// Drives the strobe lines and samples the sense lines of the key matrix.
///
/// Only the scan worker may drive the strobes, so the multiplexer is owned by it.
pub struct LineMultiplexer {
    strobes: Vec<Box<dyn GpioOutput>>,
    sense: Arc<SenseLines>,
    sleeper: SpinSleeper,
}

impl LineMultiplexer {
    /// Claims every line named by `config`, strobes first.
    ///
    /// Strobes start out parked. If any line fails, the lines claimed so far are released
    /// before the error is returned.
    pub fn acquire(driver: &dyn GpioDriver, config: &KeypadConfig) -> Result<Self, ConfigError> {
        let mut strobes = Vec::with_capacity(STROBE_LINES);
        for (index, pin) in config.strobe_pins.into_iter().enumerate() {
            let line_error = |source| ConfigError::Line { role: LineRole::Strobe, index, pin, source };

            let output = driver
                .get_pin(pin)
                .and_then(|handle| handle.into_output(SELECTING))
                .map_err(line_error)?;

            debug!("Strobe line {} on {:?}", index, output);
            strobes.push(output);
        }

        let detect_edges = matches!(config.edges, EdgeSource::Interrupt(_));
        let sense = SenseLines::acquire(driver, config.sense_pins, config.sense_bias, detect_edges)?;

        Ok(LineMultiplexer {
            strobes,
            sense: Arc::new(sense),
            sleeper: SpinSleeper::default(),
        })
    }

    /// Selects a single column: its strobe is driven to the selecting level, the rest are not.
    pub fn strobe(&self, state: usize) {
        debug_assert!(state < STROBE_LINES);
        for (column, line) in self.strobes.iter().enumerate() {
            self.drive(line.as_ref(), if column == state { SELECTING } else { !SELECTING });
        }
    }

    /// Drives every strobe to the selecting level, so that any pressed key raises its sense line.
    pub fn park(&self) {
        for line in &self.strobes {
            self.drive(line.as_ref(), SELECTING);
        }
    }

    /// Blocks the calling thread while the sense lines settle.
    pub fn settle(&self, duration: Duration) {
        self.sleeper.sleep(duration);
    }

    /// Samples the sense lines. A line that fails to read is reported as released.
    pub fn sample(&self) -> [bool; SENSE_LINES] {
        let mut levels = [false; SENSE_LINES];
        for (level, line) in levels.iter_mut().zip(&self.sense.lines) {
            *level = line.read().unwrap_or_else(|e| {
                warn!("Failed to read {:?}: {}", line, e);
                false
            });
        }
        levels
    }

    pub fn sense_lines(&self) -> Arc<SenseLines> {
        Arc::clone(&self.sense)
    }

    fn drive(&self, line: &dyn GpioOutput, value: bool) {
        if let Err(e) = line.write(value) {
            warn!("Failed to drive {:?}: {}", line, e);
        }
    }
}

impl Debug for LineMultiplexer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LineMultiplexer({:?}, {:?})", self.strobes, self.sense)
    }
}
