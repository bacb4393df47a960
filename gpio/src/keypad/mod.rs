//! Interrupt-driven scanning of a 3x4 key matrix.
//!
//! A rising edge on any sense line arms a scan through the [EdgeTrigger]. By default every sense
//! line is requested with rising-edge detection and has a listener thread blocked on its events,
//! so an idle keypad does no work. A single worker thread then strobes the three columns, samples
//! the four rows, and reports key changes to a [KeyEventSink]. While any key stays down the
//! worker re-arms itself and waits out a debounce delay, so holding a key needs no further edges.
//! Once the matrix reads idle the worker waits for the next edge.
mod edge;
mod key;
mod mux;
mod scan;
mod scheduler;
mod sink;

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use log::{debug, error, info};
use thiserror::Error;
use crate::{GpioBias, GpioDriver, GpioError};
use scheduler::{Job, ScanScheduler, SchedulerState};
use edge::{EdgeListener, EdgeWatcher};
pub use edge::EdgeTrigger;
pub use key::*;
pub use mux::{LineMultiplexer, SenseLines};
pub use scan::{PressBitmap, ScanCycle, ScanOutcome};
pub use scheduler::ScanState;
pub use sink::*;

/// Number of strobe (column) lines.
pub const STROBE_LINES: usize = 3;
/// Number of sense (row) lines.
pub const SENSE_LINES: usize = 4;
/// Number of keys in the matrix.
pub const KEY_COUNT: usize = STROBE_LINES * SENSE_LINES;

/// Fixed delays of the scan loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanTiming {
    /// Wait after switching strobes before the sense lines are sampled.
    pub settle: Duration,
    /// Wait between two cycles while a key is held.
    pub debounce: Duration,
}

impl Default for ScanTiming {
    fn default() -> Self {
        ScanTiming {
            settle: Duration::from_micros(50),
            debounce: Duration::from_millis(5),
        }
    }
}

/// Where rising edges on the sense lines come from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeSource {
    /// The sense lines are requested with rising-edge detection and one thread per line waits for
    /// their events. Without events a wait ends after this long, which bounds how late the threads
    /// notice shutdown.
    Interrupt(Duration),
    /// A watcher thread samples the sense lines at this interval while the keypad runs. For
    /// backends without edge detection.
    Poll(Duration),
    /// The caller reports edges itself through [Keypad::trigger].
    External,
}

impl Default for EdgeSource {
    fn default() -> Self {
        EdgeSource::Interrupt(Duration::from_millis(50))
    }
}

/// Which lines the keypad uses and how it scans them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeypadConfig {
    pub strobe_pins: [usize; STROBE_LINES],
    pub sense_pins: [usize; SENSE_LINES],
    pub sense_bias: GpioBias,
    pub timing: ScanTiming,
    pub edges: EdgeSource,
}

impl KeypadConfig {
    pub fn new(strobe_pins: [usize; STROBE_LINES], sense_pins: [usize; SENSE_LINES]) -> Self {
        KeypadConfig {
            strobe_pins,
            sense_pins,
            ..KeypadConfig::default()
        }
    }

    pub fn with_timing(mut self, timing: ScanTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_edge_source(mut self, edges: EdgeSource) -> Self {
        self.edges = edges;
        self
    }

    pub fn with_sense_bias(mut self, bias: GpioBias) -> Self {
        self.sense_bias = bias;
        self
    }
}

impl Default for KeypadConfig {
    fn default() -> Self {
        KeypadConfig {
            strobe_pins: [10, 9, 11],
            sense_pins: [5, 6, 13, 19],
            sense_bias: GpioBias::PullDown,
            timing: ScanTiming::default(),
            edges: EdgeSource::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineRole {
    Strobe,
    Sense,
}

impl Display for LineRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LineRole::Strobe => write!(f, "strobe"),
            LineRole::Sense => write!(f, "sense"),
        }
    }
}

/// Why a keypad could not be started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{role} line {index} (GPIO {pin}): {source}")]
    Line {
        role: LineRole,
        index: usize,
        pin: usize,
        source: GpioError,
    },
    #[error("event sink registration failed: {0}")]
    Sink(#[from] SinkError),
    #[error("failed to spawn the {0} thread: {1}")]
    Spawn(&'static str, std::io::ErrorKind),
}

/// A running keypad.
///
/// Stopping it, explicitly or by dropping it, waits for the scan in flight to finish and then
/// releases every line.
#[derive(Debug)]
pub struct Keypad {
    state: Arc<SchedulerState>,
    trigger: EdgeTrigger,
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
    watchers: Vec<JoinHandle<()>>,
}

/// Claims the keypad lines, starts scanning and registers the keys with `sink`.
///
/// # Errors
/// - `ConfigError::Line` if a line cannot be claimed, configured or read. Lines claimed up to
///   that point are released and `sink` is never registered.
/// - `ConfigError::Spawn` if a thread cannot be started. `sink` is never registered.
/// - `ConfigError::Sink` if `sink` refuses the key set.
///
/// On every error the threads started so far are stopped and all lines are released before
/// this returns.
pub fn start<S>(
    driver: &dyn GpioDriver,
    config: &KeypadConfig,
    keymap: Keymap,
    sink: S,
) -> Result<Keypad, ConfigError>
where
    S: KeyEventSink + 'static,
{
    debug!("Starting keypad on {:?} with {:?}", driver, config);
    let mux = LineMultiplexer::acquire(driver, config)?;

    let state = Arc::new(SchedulerState::new());
    let (jobs, queue) = mpsc::channel();
    // Dropped on any error below, which stops whatever it already runs.
    let mut keypad = Keypad {
        state: Arc::clone(&state),
        trigger: EdgeTrigger::new(Arc::clone(&state), jobs.clone()),
        jobs,
        worker: None,
        watchers: Vec::new(),
    };
    keypad.spawn_edge_source(config.edges, mux.sense_lines())?;

    let (registered_tx, registered) = mpsc::channel();
    let cycle = ScanCycle::new(mux, keymap, config.timing.settle);
    let worker = ScanScheduler::new(state, cycle, Box::new(sink), config.timing.debounce, queue)
        .spawn(registered_tx)
        .map_err(|e| ConfigError::Spawn("scan worker", e.kind()))?;
    keypad.worker = Some(worker);

    // The worker registers the sink before it takes the first job.
    match registered.recv() {
        Ok(result) => result?,
        Err(_) => {
            return Err(SinkError("scan worker exited during registration".to_string()).into());
        }
    }

    info!("Keypad started on strobes {:?}, senses {:?}", config.strobe_pins, config.sense_pins);
    Ok(keypad)
}

impl Keypad {
    /// Gets a handle that reports edges to this keypad.
    pub fn trigger(&self) -> EdgeTrigger {
        self.trigger.clone()
    }

    pub fn state(&self) -> ScanState {
        self.state.load()
    }

    /// Stops scanning and releases the lines, keymap and sink.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn spawn_edge_source(
        &mut self,
        edges: EdgeSource,
        sense: Arc<SenseLines>,
    ) -> Result<(), ConfigError> {
        match edges {
            EdgeSource::Interrupt(wake) => {
                for line in 0..SENSE_LINES {
                    let listener = EdgeListener::new(Arc::clone(&sense), line, self.trigger(), wake)
                        .spawn()
                        .map_err(|e| ConfigError::Spawn("edge listener", e.kind()))?;
                    self.watchers.push(listener);
                }
            }
            EdgeSource::Poll(interval) => {
                let watcher = EdgeWatcher::new(sense, self.trigger(), interval)
                    .spawn()
                    .map_err(|e| ConfigError::Spawn("edge watcher", e.kind()))?;
                self.watchers.push(watcher);
            }
            EdgeSource::External => {}
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        let previous = self.state.shut_down();
        if previous == ScanState::ShuttingDown {
            return;
        }
        debug!("Shutting down keypad, scanner was {:?}", previous);

        for watcher in self.watchers.drain(..) {
            if watcher.join().is_err() {
                error!("Edge thread panicked");
            }
        }

        if let Some(worker) = self.worker.take() {
            // A scan armed before shutdown is still queued; the worker skips it and then sees this.
            let _ = self.jobs.send(Job::Stop);
            if worker.join().is_err() {
                error!("Scan worker panicked");
            }
        }

        info!("Keypad stopped");
    }
}

impl Drop for Keypad {
    fn drop(&mut self) {
        self.shutdown();
    }
}
