use std::io;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{debug, trace, warn};
use crate::keypad::mux::SenseLines;
use crate::keypad::scheduler::{Job, SchedulerState};

/// The edge front-end: reports rising edges on the sense lines to the scan worker.
///
/// Never blocks, so it can be called from any context that learns about an edge, such as an
/// interrupt thread. Clones share the same keypad.
#[derive(Clone, Debug)]
pub struct EdgeTrigger {
    state: Arc<SchedulerState>,
    jobs: Sender<Job>,
}

impl EdgeTrigger {
    pub(crate) fn new(state: Arc<SchedulerState>, jobs: Sender<Job>) -> Self {
        EdgeTrigger { state, jobs }
    }

    /// Reports a rising edge on a sense line.
    ///
    /// Arms a scan if the keypad is idle and returns `true`. Edges arriving while a scan is
    /// pending or running, or after the keypad stopped, are absorbed and return `false`.
    pub fn fire(&self) -> bool {
        if !self.state.try_arm() {
            return false;
        }

        if self.jobs.send(Job::Scan).is_err() {
            trace!("Scan worker gone, edge dropped");
            self.state.disarm();
            return false;
        }
        trace!("Scan armed");
        true
    }
}

/// Waits for rising-edge events on one sense line and fires the trigger for each of them.
///
/// The wait wakes every `wake` interval without an edge, only to notice shutdown.
pub(crate) struct EdgeListener {
    sense: Arc<SenseLines>,
    line: usize,
    trigger: EdgeTrigger,
    wake: Duration,
}

impl EdgeListener {
    pub fn new(sense: Arc<SenseLines>, line: usize, trigger: EdgeTrigger, wake: Duration) -> Self {
        EdgeListener { sense, line, trigger, wake }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("keyscan-edge-{}", self.line))
            .spawn(move || self.run())
    }

    fn run(self) {
        debug!("Listening for edges on sense line {}", self.line);
        while !self.trigger.state.is_shutting_down() {
            match self.sense.wait_rising_edge(self.line, self.wake) {
                Ok(true) => {
                    if self.trigger.fire() {
                        trace!("Rising edge on sense line {}", self.line);
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Waiting for edges on sense line {} failed: {}", self.line, e);
                    thread::sleep(self.wake);
                }
            }
        }
        debug!("Edge listener {} exiting", self.line);
    }
}

/// Polls the sense lines and fires the trigger on every low-to-high transition.
///
/// For backends without edge detection.
pub(crate) struct EdgeWatcher {
    sense: Arc<SenseLines>,
    trigger: EdgeTrigger,
    interval: Duration,
}

impl EdgeWatcher {
    pub fn new(sense: Arc<SenseLines>, trigger: EdgeTrigger, interval: Duration) -> Self {
        EdgeWatcher { sense, trigger, interval }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("keyscan-edges".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        debug!("Watching {:?} every {:?}", self.sense, self.interval);
        let mut previous = self.sense.read().unwrap_or_default();

        while !self.trigger.state.is_shutting_down() {
            thread::sleep(self.interval);

            let levels = match self.sense.read() {
                Ok(levels) => levels,
                Err(e) => {
                    trace!("Edge poll failed: {}", e);
                    continue;
                }
            };

            for (line, (&was, &is)) in previous.iter().zip(&levels).enumerate() {
                if !was && is && self.trigger.fire() {
                    trace!("Rising edge on sense line {}", line);
                }
            }
            previous = levels;
        }
        debug!("Edge watcher exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypad::{KeypadConfig, LineMultiplexer, ScanState};
    use crate::sim::SimMatrix;
    use std::sync::mpsc;

    #[test]
    fn burst_of_edges_queues_one_scan() {
        let state = Arc::new(SchedulerState::new());
        let (tx, rx) = mpsc::channel();
        let trigger = EdgeTrigger::new(Arc::clone(&state), tx);

        assert!(trigger.fire());
        for _ in 0..10 {
            assert!(!trigger.clone().fire());
        }

        assert_eq!(state.load(), ScanState::Armed);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![Job::Scan]);
    }

    #[test]
    fn edges_after_shutdown_are_ignored() {
        let state = Arc::new(SchedulerState::new());
        let (tx, rx) = mpsc::channel();
        let trigger = EdgeTrigger::new(Arc::clone(&state), tx);

        state.shut_down();
        assert!(!trigger.fire());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_worker_leaves_edge_unarmed() {
        let state = Arc::new(SchedulerState::new());
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let trigger = EdgeTrigger::new(Arc::clone(&state), tx);
        assert!(!trigger.fire());
        assert_eq!(state.load(), ScanState::Idle);
    }

    #[test]
    fn listener_arms_on_an_edge_and_exits_on_shutdown() {
        let config = KeypadConfig::default();
        let sim = SimMatrix::new(config.strobe_pins, config.sense_pins);
        let mux = LineMultiplexer::acquire(&sim, &config).unwrap();
        let state = Arc::new(SchedulerState::new());
        let (tx, rx) = mpsc::channel();
        let trigger = EdgeTrigger::new(Arc::clone(&state), tx);
        let listener = EdgeListener::new(mux.sense_lines(), 2, trigger, Duration::from_millis(5))
            .spawn()
            .unwrap();

        sim.press(2, 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(Job::Scan));
        assert_eq!(state.load(), ScanState::Armed);

        state.shut_down();
        listener.join().unwrap();
    }
}
