//! A simulated GPIO chip with a 3x4 key matrix wired to it.
//!
//! Used to run the keypad engine without hardware. Sense line `row` reads high exactly when some
//! pressed cell `(row, column)` has its strobe line driven high, the way the real matrix conducts.
//! Sense lines claimed with edge detection queue one event per low-to-high transition.
use crate::keypad::{SENSE_LINES, STROBE_LINES};
use crate::{
    GpioActiveLevel, GpioBias, GpioDriver, GpioError, GpioInput, GpioOutput, GpioPin, GpioResult,
};
use bitvec::vec::BitVec;
use std::fmt::{Debug, Formatter};
use std::io::ErrorKind;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Number of lines exposed by the simulated chip.
pub const SIM_LINE_COUNT: usize = 32;

/// A simulated GPIO chip with a key matrix attached. Clones share the same chip.
#[derive(Clone)]
pub struct SimMatrix {
    state: Arc<Mutex<SimState>>,
    edges: Arc<Condvar>,
}

struct SimState {
    strobe_pins: [usize; STROBE_LINES],
    sense_pins: [usize; SENSE_LINES],
    strobes: [bool; STROBE_LINES],
    pressed: [[bool; STROBE_LINES]; SENSE_LINES],
    used_pins: BitVec,
    faulty_pins: BitVec,
    unreadable_pins: BitVec,
    edge_pins: BitVec,
    sense_seen: [bool; SENSE_LINES],
    pending_edges: [usize; SENSE_LINES],
    strobe_writes: usize,
    sense_reads: usize,
}

impl SimMatrix {
    /// Creates a chip with the matrix strobes wired to `strobe_pins` and senses to `sense_pins`.
    pub fn new(strobe_pins: [usize; STROBE_LINES], sense_pins: [usize; SENSE_LINES]) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                strobe_pins,
                sense_pins,
                strobes: [false; STROBE_LINES],
                pressed: [[false; STROBE_LINES]; SENSE_LINES],
                used_pins: BitVec::repeat(false, SIM_LINE_COUNT),
                faulty_pins: BitVec::repeat(false, SIM_LINE_COUNT),
                unreadable_pins: BitVec::repeat(false, SIM_LINE_COUNT),
                edge_pins: BitVec::repeat(false, SIM_LINE_COUNT),
                sense_seen: [false; SENSE_LINES],
                pending_edges: [0; SENSE_LINES],
                strobe_writes: 0,
                sense_reads: 0,
            })),
            edges: Arc::new(Condvar::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies an electrical change and wakes edge waiters if a sense line went high.
    fn update(&self, change: impl FnOnce(&mut SimState)) {
        let mut state = self.lock();
        change(&mut state);
        if state.track_edges() {
            self.edges.notify_all();
        }
    }

    /// Closes the switch at the given cell.
    pub fn press(&self, row: usize, column: usize) {
        self.set_pressed(row, column, true);
    }

    /// Opens the switch at the given cell.
    pub fn release(&self, row: usize, column: usize) {
        self.set_pressed(row, column, false);
    }

    pub fn set_pressed(&self, row: usize, column: usize, pressed: bool) {
        self.update(|state| state.pressed[row][column] = pressed);
    }

    pub fn release_all(&self) {
        self.update(|state| state.pressed = [[false; STROBE_LINES]; SENSE_LINES]);
    }

    /// Physical levels currently driven on the strobe lines.
    pub fn strobe_levels(&self) -> [bool; STROBE_LINES] {
        self.lock().strobes
    }

    /// Total number of writes made to strobe lines so far.
    pub fn strobe_writes(&self) -> usize {
        self.lock().strobe_writes
    }

    /// Total number of reads made from sense lines so far.
    pub fn sense_reads(&self) -> usize {
        self.lock().sense_reads
    }

    pub fn is_claimed(&self, pin: usize) -> bool {
        self.lock().used_pins.get(pin).is_some_and(|bit| *bit)
    }

    pub fn claimed_count(&self) -> usize {
        self.lock().used_pins.count_ones()
    }

    /// Makes claiming `pin` fail with an I/O error, as if the kernel refused the request.
    pub fn set_faulty(&self, pin: usize) {
        self.lock().faulty_pins.set(pin, true);
    }

    /// Makes every read of `pin` fail.
    pub fn set_unreadable(&self, pin: usize, unreadable: bool) {
        self.lock().unreadable_pins.set(pin, unreadable);
    }
}

impl SimState {
    fn sense_row(&self, pin: usize) -> Option<usize> {
        self.sense_pins.iter().position(|&p| p == pin)
    }

    fn sense_level(&self, row: usize) -> bool {
        self.pressed[row]
            .iter()
            .zip(self.strobes)
            .any(|(&pressed, strobe)| pressed && strobe)
    }

    /// Queues an edge for every edge-detecting sense line that went high since the last call.
    fn track_edges(&mut self) -> bool {
        let mut fired = false;
        for row in 0..SENSE_LINES {
            let level = self.sense_level(row);
            if level && !self.sense_seen[row] && self.edge_pins[self.sense_pins[row]] {
                self.pending_edges[row] += 1;
                fired = true;
            }
            self.sense_seen[row] = level;
        }
        fired
    }
}

impl Debug for SimMatrix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimMatrix")
    }
}

impl GpioDriver for SimMatrix {
    fn count(&self) -> GpioResult<usize> {
        Ok(SIM_LINE_COUNT)
    }

    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin>> {
        if index >= self.count()? {
            return Err(GpioError::InvalidArgument);
        }

        let mut state = self.lock();
        if state.faulty_pins[index] {
            return Err(GpioError::Io(ErrorKind::Other));
        }
        if state.used_pins[index] {
            return Err(GpioError::AlreadyInUse);
        }
        state.used_pins.set(index, true);

        Ok(Box::new(SimPin {
            matrix: self.clone(),
            pin_index: index,
            active_level: GpioActiveLevel::High,
            bias: GpioBias::None,
        }))
    }
}

struct SimPin {
    matrix: SimMatrix,
    pin_index: usize,
    active_level: GpioActiveLevel,
    bias: GpioBias,
}

impl Debug for SimPin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimMatrix[{}]", self.pin_index)
    }
}

impl GpioPin for SimPin {
    fn into_input(self: Box<Self>) -> GpioResult<Box<dyn GpioInput>> {
        Ok(Box::new(SimInput { pin: *self }))
    }

    fn into_edge_input(self: Box<Self>) -> GpioResult<Box<dyn GpioInput>> {
        let mut state = self.matrix.lock();
        state.edge_pins.set(self.pin_index, true);
        if let Some(row) = state.sense_row(self.pin_index) {
            let level = state.sense_level(row);
            state.sense_seen[row] = level;
            state.pending_edges[row] = 0;
        }
        drop(state);
        Ok(Box::new(SimInput { pin: *self }))
    }

    fn into_output(self: Box<Self>, initial: bool) -> GpioResult<Box<dyn GpioOutput>> {
        let output = SimOutput { pin: *self };
        output.write(initial)?;
        Ok(Box::new(output))
    }

    fn set_active_level(&mut self, level: GpioActiveLevel) -> GpioResult<()> {
        self.active_level = level;
        Ok(())
    }

    fn set_bias(&mut self, bias: GpioBias) -> GpioResult<()> {
        self.bias = bias;
        Ok(())
    }
}

impl Drop for SimPin {
    fn drop(&mut self) {
        let mut state = self.matrix.lock();
        state.used_pins.set(self.pin_index, false);
        state.edge_pins.set(self.pin_index, false);
    }
}

struct SimInput {
    pin: SimPin,
}

impl Debug for SimInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.pin)
    }
}

impl GpioInput for SimInput {
    fn read(&self) -> GpioResult<bool> {
        let mut state = self.pin.matrix.lock();
        if state.unreadable_pins[self.pin.pin_index] {
            return Err(GpioError::Io(ErrorKind::BrokenPipe));
        }

        let level = match state.sense_row(self.pin.pin_index) {
            Some(row) => {
                state.sense_reads += 1;
                state.sense_level(row)
            }
            None => false,
        } || self.pin.bias == GpioBias::PullUp;

        Ok(self.pin.active_level.get_state(level))
    }

    fn wait_rising_edge(&self, timeout: Duration) -> GpioResult<bool> {
        let state = self.pin.matrix.lock();
        if !state.edge_pins[self.pin.pin_index] {
            return Err(GpioError::NotSupported);
        }

        let row = state.sense_row(self.pin.pin_index);
        let (mut state, _) = self
            .pin
            .matrix
            .edges
            .wait_timeout_while(state, timeout, |state| {
                row.is_none_or(|row| state.pending_edges[row] == 0)
            })
            .unwrap_or_else(PoisonError::into_inner);

        match row {
            Some(row) if state.pending_edges[row] > 0 => {
                state.pending_edges[row] -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

struct SimOutput {
    pin: SimPin,
}

impl Debug for SimOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.pin)
    }
}

impl GpioOutput for SimOutput {
    fn write(&self, value: bool) -> GpioResult<()> {
        let level = self.pin.active_level.get_state(value);
        self.pin.matrix.update(|state| {
            if let Some(column) = state.strobe_pins.iter().position(|&p| p == self.pin.pin_index) {
                state.strobes[column] = level;
                state.strobe_writes += 1;
            }
        });
        Ok(())
    }
}
