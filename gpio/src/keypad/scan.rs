use std::fmt::{Debug, Formatter};
use std::time::Duration;
use bitvec::array::BitArray;
use bitvec::order::Lsb0;
use crate::keypad::{KeyEventSink, Keymap, LineMultiplexer, SENSE_LINES, STROBE_LINES};

/// One flag per matrix cell, indexed like the [Keymap].
#[derive(Copy, Clone)]
pub struct PressBitmap {
    bits: BitArray<[u16; 1], Lsb0>,
}

impl PressBitmap {
    pub const EMPTY: PressBitmap = PressBitmap { bits: BitArray::ZERO };

    /// Cells outside the matrix always read released.
    pub fn is_pressed(&self, row: usize, column: usize) -> bool {
        in_matrix(row, column) && self.bits[Keymap::index(row, column)]
    }

    /// Does nothing for cells outside the matrix.
    pub fn set(&mut self, row: usize, column: usize, pressed: bool) {
        if in_matrix(row, column) {
            self.bits.set(Keymap::index(row, column), pressed);
        }
    }

    pub fn any(&self) -> bool {
        self.bits.any()
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// Pressed cells as `(row, column)`, in keymap order.
    pub fn pressed(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.bits.iter_ones().map(Keymap::position)
    }
}

fn in_matrix(row: usize, column: usize) -> bool {
    row < SENSE_LINES && column < STROBE_LINES
}

impl Default for PressBitmap {
    fn default() -> Self {
        PressBitmap::EMPTY
    }
}

impl PartialEq for PressBitmap {
    fn eq(&self, other: &Self) -> bool {
        self.bits.into_inner() == other.bits.into_inner()
    }
}

impl Eq for PressBitmap {}

impl Debug for PressBitmap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.pressed()).finish()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanOutcome {
    pub bitmap: PressBitmap,
    pub any_pressed: bool,
}

/// A full pass over every strobe state, reporting what changed since the previous pass.
pub struct ScanCycle {
    mux: LineMultiplexer,
    keymap: Keymap,
    settle: Duration,
    previous: PressBitmap,
}

impl ScanCycle {
    pub fn new(mux: LineMultiplexer, keymap: Keymap, settle: Duration) -> Self {
        ScanCycle {
            mux,
            keymap,
            settle,
            previous: PressBitmap::EMPTY,
        }
    }

    /// Forgets the previous pass, so the next one reports every pressed key as a new press.
    pub fn reset(&mut self) {
        self.previous = PressBitmap::EMPTY;
    }

    /// Strobes each column in turn, parks the strobes and reports the changes to `sink`,
    /// finishing with a sync.
    pub fn run(&mut self, sink: &mut dyn KeyEventSink) -> ScanOutcome {
        let mut bitmap = PressBitmap::EMPTY;
        let mut any_pressed = false;

        for column in 0..STROBE_LINES {
            self.mux.strobe(column);
            self.mux.settle(self.settle);
            for (row, pressed) in self.mux.sample().into_iter().enumerate() {
                any_pressed |= pressed;
                bitmap.set(row, column, pressed);
            }
        }
        self.mux.park();

        for column in 0..STROBE_LINES {
            for row in 0..SENSE_LINES {
                let was = self.previous.is_pressed(row, column);
                let is = bitmap.is_pressed(row, column);
                if was == is {
                    continue;
                }

                let Some(key) = self.keymap.get(row, column) else { continue };
                if is {
                    sink.press(key);
                } else {
                    sink.release(key);
                }
            }
        }
        sink.sync();

        self.previous = bitmap;
        ScanOutcome { bitmap, any_pressed }
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }
}

impl Debug for ScanCycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScanCycle({:?}, {:?})", self.mux, self.keymap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypad::{KeyEvent, KeypadConfig, KeypadKey, SinkError};
    use crate::sim::SimMatrix;
    use proptest::prelude::*;
    use KeypadKey::*;

    #[derive(Default)]
    struct Recorder(Vec<KeyEvent>);

    impl KeyEventSink for Recorder {
        fn register(&mut self, _keys: &[KeypadKey]) -> Result<(), SinkError> {
            Ok(())
        }

        fn press(&mut self, key: KeypadKey) {
            self.0.push(KeyEvent::Press(key));
        }

        fn release(&mut self, key: KeypadKey) {
            self.0.push(KeyEvent::Release(key));
        }

        fn sync(&mut self) {
            self.0.push(KeyEvent::Sync);
        }
    }

    fn setup() -> (SimMatrix, ScanCycle) {
        let config = KeypadConfig::default();
        let sim = SimMatrix::new(config.strobe_pins, config.sense_pins);
        let mux = LineMultiplexer::acquire(&sim, &config).unwrap();
        (sim, ScanCycle::new(mux, Keymap::default(), Duration::ZERO))
    }

    #[test]
    fn idle_matrix_only_syncs() {
        let (sim, mut cycle) = setup();
        let mut sink = Recorder::default();
        let outcome = cycle.run(&mut sink);
        assert!(!outcome.any_pressed);
        assert_eq!(outcome.bitmap, PressBitmap::EMPTY);
        assert_eq!(sink.0, vec![KeyEvent::Sync]);
        assert_eq!(sim.strobe_levels(), [true; STROBE_LINES]);
    }

    #[test]
    fn press_then_release_of_one_cell() {
        let (sim, mut cycle) = setup();
        let mut sink = Recorder::default();

        sim.press(0, 0);
        assert!(cycle.run(&mut sink).any_pressed);
        assert!(cycle.run(&mut sink).any_pressed);
        sim.release(0, 0);
        assert!(!cycle.run(&mut sink).any_pressed);

        assert_eq!(
            sink.0,
            vec![
                KeyEvent::Press(Key1),
                KeyEvent::Sync,
                KeyEvent::Sync,
                KeyEvent::Release(Key1),
                KeyEvent::Sync,
            ],
        );
    }

    #[test]
    fn simultaneous_presses_come_in_scan_order() {
        let (sim, mut cycle) = setup();
        let mut sink = Recorder::default();

        // Column 2 is strobed after column 0, row order breaks ties within a column.
        sim.press(0, 2);
        sim.press(3, 0);
        sim.press(1, 0);
        let outcome = cycle.run(&mut sink);

        assert_eq!(outcome.bitmap.count(), 3);
        assert!(outcome.bitmap.is_pressed(0, 2));
        assert_eq!(
            sink.0,
            vec![
                KeyEvent::Press(Key4),
                KeyEvent::Press(KeyAsterisk),
                KeyEvent::Press(Key3),
                KeyEvent::Sync,
            ],
        );
    }

    #[test]
    fn reset_reports_held_keys_again() {
        let (sim, mut cycle) = setup();
        let mut sink = Recorder::default();

        sim.press(3, 1);
        cycle.run(&mut sink);
        cycle.reset();
        cycle.run(&mut sink);

        assert_eq!(
            sink.0,
            vec![KeyEvent::Press(Key0), KeyEvent::Sync, KeyEvent::Press(Key0), KeyEvent::Sync],
        );
    }

    #[test]
    fn bitmap_debug_lists_pressed_cells() {
        let mut bitmap = PressBitmap::EMPTY;
        bitmap.set(1, 2, true);
        bitmap.set(0, 0, true);
        assert_eq!(format!("{:?}", bitmap), "{(0, 0), (1, 2)}");
        assert_eq!(bitmap.pressed().collect::<Vec<_>>(), vec![(0, 0), (1, 2)]);
    }

    #[test]
    fn bitmap_ignores_cells_outside_the_matrix() {
        let mut bitmap = PressBitmap::EMPTY;
        bitmap.set(SENSE_LINES, 0, true);
        bitmap.set(0, STROBE_LINES, true);
        assert_eq!(bitmap, PressBitmap::EMPTY);
        assert!(!bitmap.is_pressed(6, 0));
        assert!(!bitmap.is_pressed(0, 3));

        // Row 1 column 3 would alias row 2 column 0 without the check.
        bitmap.set(2, 0, true);
        assert!(!bitmap.is_pressed(1, 3));
        assert!(bitmap.is_pressed(2, 0));
    }

    proptest! {
        #[test]
        fn every_cycle_ends_in_sync(frames in proptest::collection::vec(0u16..(1 << 12), 1..40)) {
            let (sim, mut cycle) = setup();

            for frame in frames {
                for index in 0..12 {
                    let (row, column) = Keymap::position(index);
                    sim.set_pressed(row, column, frame & (1 << index) != 0);
                }

                let mut sink = Recorder::default();
                let outcome = cycle.run(&mut sink);
                prop_assert_eq!(sink.0.last(), Some(&KeyEvent::Sync));
                prop_assert_eq!(sink.0.iter().filter(|e| **e == KeyEvent::Sync).count(), 1);
                prop_assert_eq!(outcome.any_pressed, frame != 0);
                prop_assert_eq!(outcome.bitmap.count(), frame.count_ones() as usize);
            }
        }

        #[test]
        fn per_key_history_strictly_alternates(frames in proptest::collection::vec(0u16..(1 << 12), 1..40)) {
            let (sim, mut cycle) = setup();
            let mut sink = Recorder::default();

            for frame in &frames {
                for index in 0..12 {
                    let (row, column) = Keymap::position(index);
                    sim.set_pressed(row, column, frame & (1 << index) != 0);
                }
                cycle.run(&mut sink);
            }

            for &key in Keymap::default().keys() {
                let mut expect_press = true;
                for event in &sink.0 {
                    match *event {
                        KeyEvent::Press(k) if k == key => {
                            prop_assert!(expect_press, "{} pressed twice", key);
                            expect_press = false;
                        }
                        KeyEvent::Release(k) if k == key => {
                            prop_assert!(!expect_press, "{} released while up", key);
                            expect_press = true;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
