pub mod gpiod;
pub mod keypad;
pub mod sim;

use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("pin already in use")]
    AlreadyInUse,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the feature is not supported on this backend")]
    NotSupported,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

pub trait GpioDriver: Debug {
    /// Gets the amount of GPIO pins available.
    fn count(&self) -> GpioResult<usize>;

    /// Claims the GPIO pin at the given index.
    ///
    /// The claim is held by the returned handle and by whatever input or output it is turned into,
    /// and is released when that is dropped.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the index is out of range.
    /// - `GpioError::AlreadyInUse` if the pin is already claimed.
    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin>>;
}

/// Specifies the active level of the GPIO pin.
///
/// By default, the active level is high.
///
/// Might be software-implemented.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioActiveLevel {
    #[default] High,
    Low,
}

impl GpioActiveLevel {
    /// Gets the real state that will be outputted on the GPIO pin based on the active level and the value.
    pub fn get_state(&self, value: bool) -> bool {
        match self {
            GpioActiveLevel::High => value,
            GpioActiveLevel::Low => !value,
        }
    }
}

/// Specifies the bias of the GPIO pin.
///
/// You can use this to enable pull-up or pull-down resistors.
/// These should work in both input and output modes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioBias {
    #[default] None,
    PullUp,
    PullDown,
}

pub trait GpioPin: Debug + Send {
    /// Sets the GPIO pin function to input, allowing reading its state.
    fn into_input(self: Box<Self>) -> GpioResult<Box<dyn GpioInput>>;
    /// Sets the GPIO pin function to input with rising-edge detection, so that
    /// [GpioInput::wait_rising_edge] can block until the line goes high.
    ///
    /// # Errors
    /// - `GpioError::NotSupported` if the backend cannot detect edges.
    fn into_edge_input(self: Box<Self>) -> GpioResult<Box<dyn GpioInput>> {
        Err(GpioError::NotSupported)
    }
    /// Sets the GPIO pin function to output, driving `initial` until the first write.
    fn into_output(self: Box<Self>, initial: bool) -> GpioResult<Box<dyn GpioOutput>>;

    /// Sets the active level of the GPIO pin.
    ///
    /// # Errors
    /// - `GpioError::NotSupported` if the pin does not support active level.
    fn set_active_level(&mut self, _level: GpioActiveLevel) -> GpioResult<()> {
        Err(GpioError::NotSupported)
    }

    /// Sets the bias of the GPIO pin.
    ///
    /// # Errors
    /// - `GpioError::NotSupported` if the pin does not support bias.
    fn set_bias(&mut self, _bias: GpioBias) -> GpioResult<()> {
        Err(GpioError::NotSupported)
    }
}

/// An input line. Reads may happen from several threads at once.
pub trait GpioInput: Debug + Send + Sync {
    /// Reads the state of the GPIO pin.
    fn read(&self) -> GpioResult<bool>;

    /// Blocks until the line sees a rising edge or `timeout` passes, returning whether an edge
    /// arrived. Edges that happen while nobody waits are queued and returned by later calls.
    ///
    /// # Errors
    /// - `GpioError::NotSupported` unless the line came from [GpioPin::into_edge_input].
    fn wait_rising_edge(&self, _timeout: Duration) -> GpioResult<bool> {
        Err(GpioError::NotSupported)
    }
}

pub trait GpioOutput: Debug + Send {
    /// Writes the state of the GPIO pin.
    fn write(&self, value: bool) -> GpioResult<()>;
}
