use std::env::var_os;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use dotenv::var;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use keyscan_gpio::GpioBias;
use keyscan_gpio::keypad::{EdgeSource, KeypadConfig, ScanTiming, SENSE_LINES, STROBE_LINES};

#[derive(Debug, Error, Eq, PartialEq)]
pub enum PinListError {
    #[error("invalid pin number {0:?}")]
    InvalidNumber(String),
    #[error("expected {expected} pins, got {actual}")]
    WrongCount { expected: usize, actual: usize },
}

/// Parses a list of pin numbers separated by commas, spaces or semicolons.
pub fn parse_pin_list<const N: usize>(pin_str: &str) -> Result<[usize; N], PinListError> {
    let pins = pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| PinListError::InvalidNumber(s.to_string())))
        .collect::<Result<Vec<usize>, _>>()?;
    let actual = pins.len();
    pins.try_into()
        .map_err(|_| PinListError::WrongCount { expected: N, actual })
}

/// How the keypad learns about key presses.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeConfig {
    /// Kernel edge events on every sense line.
    Interrupt { wake_millis: u64 },
    /// Sampling the sense lines, for chips without edge detection.
    Poll { interval_millis: u64 },
    /// No edge source; nothing is scanned.
    External,
}

impl From<EdgeConfig> for EdgeSource {
    fn from(edges: EdgeConfig) -> Self {
        match edges {
            EdgeConfig::Interrupt { wake_millis } => {
                EdgeSource::Interrupt(Duration::from_millis(wake_millis))
            }
            EdgeConfig::Poll { interval_millis } => {
                EdgeSource::Poll(Duration::from_millis(interval_millis))
            }
            EdgeConfig::External => EdgeSource::External,
        }
    }
}

impl From<EdgeSource> for EdgeConfig {
    fn from(edges: EdgeSource) -> Self {
        match edges {
            EdgeSource::Interrupt(wake) => {
                EdgeConfig::Interrupt { wake_millis: wake.as_millis() as u64 }
            }
            EdgeSource::Poll(interval) => {
                EdgeConfig::Poll { interval_millis: interval.as_millis() as u64 }
            }
            EdgeSource::External => EdgeConfig::External,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    /// GPIO character device of the chip the keypad is wired to.
    pub chip: String,
    pub strobe_pins: [usize; STROBE_LINES],
    pub sense_pins: [usize; SENSE_LINES],
    pub settle_micros: u64,
    pub debounce_millis: u64,
    pub edges: EdgeConfig,
    /// Whether the sense lines get pull-down resistors.
    pub pull_down: bool,
}

impl Config {
    /// Path of the config file, from `KEYSCAN_CONFIG` or `keyscan.json`.
    pub fn path() -> PathBuf {
        var_os("KEYSCAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("keyscan.json"))
    }

    /// Loads the config file, or returns `None` if there is none.
    pub fn try_load(path: &Path) -> eyre::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Applies `KEYSCAN_CHIP`, `KEYSCAN_STROBE_PINS` and `KEYSCAN_SENSE_PINS` on top of the file.
    pub fn apply_env(&mut self) -> Result<(), PinListError> {
        if let Ok(chip) = var("KEYSCAN_CHIP") {
            self.chip = chip;
        }
        if let Ok(pins) = var("KEYSCAN_STROBE_PINS") {
            self.strobe_pins = parse_pin_list(&pins)?;
        }
        if let Ok(pins) = var("KEYSCAN_SENSE_PINS") {
            self.sense_pins = parse_pin_list(&pins)?;
        }
        Ok(())
    }

    pub fn keypad_config(&self) -> KeypadConfig {
        let bias = if self.pull_down { GpioBias::PullDown } else { GpioBias::None };

        KeypadConfig::new(self.strobe_pins, self.sense_pins)
            .with_timing(ScanTiming {
                settle: Duration::from_micros(self.settle_micros),
                debounce: Duration::from_millis(self.debounce_millis),
            })
            .with_edge_source(self.edges.into())
            .with_sense_bias(bias)
    }
}

impl Default for Config {
    fn default() -> Self {
        let keypad = KeypadConfig::default();
        Config {
            chip: "/dev/gpiochip0".to_string(),
            strobe_pins: keypad.strobe_pins,
            sense_pins: keypad.sense_pins,
            settle_micros: keypad.timing.settle.as_micros() as u64,
            debounce_millis: keypad.timing.debounce.as_millis() as u64,
            edges: keypad.edges.into(),
            pull_down: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_lists_accept_mixed_separators() {
        assert_eq!(parse_pin_list::<3>("10, 9;11"), Ok([10, 9, 11]));
        assert_eq!(parse_pin_list::<4>(" 5 6  13,19 "), Ok([5, 6, 13, 19]));
    }

    #[test]
    fn pin_lists_reject_garbage_and_wrong_counts() {
        assert_eq!(
            parse_pin_list::<3>("10, nine, 11"),
            Err(PinListError::InvalidNumber("nine".to_string())),
        );
        assert_eq!(
            parse_pin_list::<4>("5, 6, 13"),
            Err(PinListError::WrongCount { expected: 4, actual: 3 }),
        );
    }

    #[test]
    fn default_config_matches_the_library_defaults() {
        assert_eq!(Config::default().keypad_config(), KeypadConfig::default());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "sense_pins": [1, 2, 3, 4] }"#).unwrap();
        assert_eq!(config.sense_pins, [1, 2, 3, 4]);
        assert_eq!(config.strobe_pins, [10, 9, 11]);
        assert_eq!(config.chip, "/dev/gpiochip0");
    }

    #[test]
    fn edge_source_is_read_from_json() {
        let config: Config =
            serde_json::from_str(r#"{ "edges": { "poll": { "interval_millis": 2 } } }"#).unwrap();
        assert_eq!(config.keypad_config().edges, EdgeSource::Poll(Duration::from_millis(2)));

        let config: Config =
            serde_json::from_str(r#"{ "edges": "external", "pull_down": false }"#).unwrap();
        let keypad = config.keypad_config();
        assert_eq!(keypad.edges, EdgeSource::External);
        assert_eq!(keypad.sense_bias, GpioBias::None);
    }

    #[test]
    fn default_edges_are_interrupts() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains(r#""edges":{"interrupt":{"wake_millis":50}}"#));
    }

    #[test]
    fn config_survives_a_save_and_load() {
        let path = std::env::temp_dir().join(format!("keyscan-config-{}.json", std::process::id()));
        let config = Config { debounce_millis: 8, ..Config::default() };
        config.save(&path).unwrap();
        let loaded = Config::try_load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, Some(config));
    }
}
