use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{debug, trace};
use crate::keypad::{KeyEventSink, ScanCycle, SinkError};

/// Where the scan engine is in its life.
///
/// `Idle` is the only state in which a new scan may be armed. `ShuttingDown` is terminal.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ScanState {
    /// No scan is scheduled; the next edge arms one.
    Idle = 0,
    /// A scan is queued for the worker but has not started yet.
    Armed = 1,
    /// The worker is running a scan cycle.
    Scanning = 2,
    /// Teardown has begun; nothing will be scheduled again.
    ShuttingDown = 3,
}

impl ScanState {
    fn from_u8(value: u8) -> ScanState {
        match value {
            0 => ScanState::Idle,
            1 => ScanState::Armed,
            2 => ScanState::Scanning,
            _ => ScanState::ShuttingDown,
        }
    }
}

/// The state word shared by the edge front-end, the worker and the owner of the keypad.
///
/// Every transition is a single compare-and-swap, so two edges racing each other arm at most
/// one scan and nothing can leave `ShuttingDown`.
#[derive(Debug)]
pub struct SchedulerState(AtomicU8);

impl SchedulerState {
    pub fn new() -> Self {
        SchedulerState(AtomicU8::new(ScanState::Idle as u8))
    }

    pub fn load(&self) -> ScanState {
        ScanState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: ScanState, to: ScanState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Idle -> Armed`. Fails if a scan is already pending or running, or on shutdown.
    pub fn try_arm(&self) -> bool {
        self.transition(ScanState::Idle, ScanState::Armed)
    }

    /// `Armed -> Scanning`. Fails once shutdown has begun, which cancels the pending scan.
    pub fn begin_scan(&self) -> bool {
        self.transition(ScanState::Armed, ScanState::Scanning)
    }

    /// `Scanning -> Armed`.
    pub fn rearm(&self) -> bool {
        self.transition(ScanState::Scanning, ScanState::Armed)
    }

    /// `Armed -> Idle`, for an arm that could not be handed to the worker.
    pub fn disarm(&self) -> bool {
        self.transition(ScanState::Armed, ScanState::Idle)
    }

    /// `Scanning -> Idle`.
    pub fn finish(&self) -> bool {
        self.transition(ScanState::Scanning, ScanState::Idle)
    }

    /// Enters `ShuttingDown` from any state, returning the state it left.
    pub fn shut_down(&self) -> ScanState {
        ScanState::from_u8(self.0.swap(ScanState::ShuttingDown as u8, Ordering::AcqRel))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.load() == ScanState::ShuttingDown
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        SchedulerState::new()
    }
}

/// Requests handed to the scan worker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Job {
    /// A scan was armed from `Idle`.
    Scan,
    /// Exit the worker after whatever is running.
    Stop,
}

/// The serialized scan worker.
///
/// Owns the lines, the keymap and the sink, so they are released only when the worker has
/// finished its last cycle and returned.
pub(crate) struct ScanScheduler {
    state: Arc<SchedulerState>,
    cycle: ScanCycle,
    sink: Box<dyn KeyEventSink>,
    debounce: Duration,
    jobs: Receiver<Job>,
}

impl ScanScheduler {
    pub fn new(
        state: Arc<SchedulerState>,
        cycle: ScanCycle,
        sink: Box<dyn KeyEventSink>,
        debounce: Duration,
        jobs: Receiver<Job>,
    ) -> Self {
        ScanScheduler { state, cycle, sink, debounce, jobs }
    }

    /// Starts the worker thread. It registers the keys with the sink, reports the result on
    /// `registered` and takes jobs only if the sink accepted them.
    pub fn spawn(self, registered: Sender<Result<(), SinkError>>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("keyscan-worker".to_string())
            .spawn(move || self.run(registered))
    }

    fn run(mut self, registered: Sender<Result<(), SinkError>>) {
        let result = self.sink.register(self.cycle.keymap().keys());
        let accepted = result.is_ok();
        if registered.send(result).is_err() || !accepted {
            debug!("Scan worker exiting before the first scan");
            return;
        }

        debug!("Scan worker started with {:?}", self.cycle);
        while let Ok(Job::Scan) = self.jobs.recv() {
            self.scan_while_pressed();
        }
        debug!("Scan worker exiting");
    }

    /// Runs cycles back to back, a debounce delay apart, until the matrix reads idle or
    /// shutdown begins. The next cycle is armed before the delay, so stopping during the delay
    /// cancels it.
    fn scan_while_pressed(&mut self) {
        self.cycle.reset();

        while self.state.begin_scan() {
            let outcome = self.cycle.run(&mut *self.sink);
            trace!("Scanned {:?}", outcome.bitmap);

            if !outcome.any_pressed {
                if self.state.finish() {
                    trace!("All keys released, scanner idle");
                }
                return;
            }

            if !self.state.rearm() {
                return;
            }
            thread::sleep(self.debounce);
        }
        trace!("Pending scan cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_is_exclusive() {
        let state = SchedulerState::new();
        assert!(state.try_arm());
        assert!(!state.try_arm());
        assert_eq!(state.load(), ScanState::Armed);

        assert!(state.begin_scan());
        assert!(!state.try_arm());
        assert!(state.rearm());
        assert!(state.begin_scan());
        assert!(state.finish());
        assert_eq!(state.load(), ScanState::Idle);
        assert!(state.try_arm());
    }

    #[test]
    fn shutdown_is_terminal() {
        let state = SchedulerState::new();
        assert!(state.try_arm());
        assert_eq!(state.shut_down(), ScanState::Armed);

        assert!(!state.begin_scan());
        assert!(!state.try_arm());
        assert!(!state.finish());
        assert!(!state.rearm());
        assert_eq!(state.shut_down(), ScanState::ShuttingDown);
        assert!(state.is_shutting_down());
    }

    #[test]
    fn shutdown_mid_scan_blocks_rearm() {
        let state = SchedulerState::new();
        assert!(state.try_arm());
        assert!(state.begin_scan());
        assert_eq!(state.shut_down(), ScanState::Scanning);
        assert!(!state.rearm());
        assert!(!state.finish());
    }

    #[test]
    fn racing_edges_arm_once() {
        let state = Arc::new(SchedulerState::new());
        let armed: usize = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || (0..1000).filter(|_| state.try_arm()).count())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .sum();
        assert_eq!(armed, 1);
    }
}
