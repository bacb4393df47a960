//! GpiodDriver implementation for managing GPIO pins through the Linux GPIO character device.
use crate::{
    GpioActiveLevel, GpioBias, GpioDriver, GpioError, GpioInput, GpioOutput, GpioPin, GpioResult,
};
use bitvec::vec::BitVec;
use gpiod_core::{ChipInfo, Internal, RawEvent, ValuesInfo};
use log::{debug, trace};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};
use std::ffi::c_int;
use std::fmt::{Debug, Formatter};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd};
use std::sync::Arc;
use std::sync::atomic::AtomicU8;
use std::time::Duration;

/// GpiodDriver is a GPIO driver that uses the gpiod library to manage GPIO pins.
///
/// Pins handed out by the driver keep the chip open, so they may outlive the driver value itself.
pub struct GpiodDriver {
    chip: Arc<GpiodChip>,
}

struct GpiodChip {
    chip: gpiod::Chip,
    // Second handle on the same device. Edge requests go through it so that we own the request
    // descriptor and can poll it with a timeout.
    device: File,
    info: Internal<ChipInfo>,
    used_pins: BitVec<AtomicU8>,
}

impl GpiodChip {
    fn release(&self, index: usize) {
        self.used_pins.set_aliased(index, false);
    }
}

impl GpiodDriver {
    /// Opens the GPIO chip at the given path, e.g. `/dev/gpiochip0`.
    pub fn open(path: &str) -> GpioResult<Self> {
        let chip = gpiod::Chip::new(path)?;
        let device = OpenOptions::new().read(true).write(true).open(path)?;
        let info = Internal::<ChipInfo>::from_fd(device.as_raw_fd())?;

        let n = chip.num_lines() as usize;
        let bits = BitVec::repeat(false, n);
        Ok(Self {
            chip: Arc::new(GpiodChip {
                chip,
                device,
                info,
                used_pins: bits,
            }),
        })
    }
}

impl Debug for GpiodDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})", self.chip.chip.name())
    }
}

impl GpioDriver for GpiodDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.chip.chip.num_lines() as usize)
    }

    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin>> {
        if index >= self.count()? {
            return Err(GpioError::InvalidArgument);
        }

        if self.chip.used_pins[index] {
            return Err(GpioError::AlreadyInUse);
        }

        self.chip.used_pins.set_aliased(index, true);
        debug!("{:?}[{}] claimed", self, index);

        Ok(Box::new(GpiodPin {
            chip: Arc::clone(&self.chip),
            pin_index: index,
            active_level: GpioActiveLevel::High,
            bias: GpioBias::None,
        }))
    }
}

impl From<GpioActiveLevel> for gpiod::Active {
    fn from(level: GpioActiveLevel) -> Self {
        match level {
            GpioActiveLevel::High => gpiod::Active::High,
            GpioActiveLevel::Low => gpiod::Active::Low,
        }
    }
}

impl From<GpioBias> for gpiod::Bias {
    fn from(bias: GpioBias) -> Self {
        match bias {
            GpioBias::None => gpiod::Bias::Disable,
            GpioBias::PullUp => gpiod::Bias::PullUp,
            GpioBias::PullDown => gpiod::Bias::PullDown,
        }
    }
}

struct GpiodPin {
    chip: Arc<GpiodChip>,
    pin_index: usize,
    active_level: GpioActiveLevel,
    bias: GpioBias,
}

impl Debug for GpiodPin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})[{}]", self.chip.chip.name(), self.pin_index)
    }
}

impl GpioPin for GpiodPin {
    fn into_input(self: Box<Self>) -> GpioResult<Box<dyn GpioInput>> {
        let line = self.chip.chip.request_lines(
            gpiod::Options::input([self.pin_index as u32])
                .consumer(env!("CARGO_PKG_NAME"))
                .active(self.active_level.into())
                .bias(self.bias.into()),
        )?;
        Ok(Box::new(GpiodInput { line, pin: *self }))
    }

    fn into_edge_input(self: Box<Self>) -> GpioResult<Box<dyn GpioInput>> {
        let (info, fd) = self.chip.info.request_lines(
            self.chip.device.as_raw_fd(),
            gpiod::Options::input([self.pin_index as u32])
                .edge(gpiod::EdgeDetect::Rising)
                .consumer(env!("CARGO_PKG_NAME"))
                .active(self.active_level.into())
                .bias(self.bias.into()),
        )?;
        // SAFETY: the kernel just created `fd` for this request and nothing else holds it.
        let request = unsafe { File::from_raw_fd(fd) };
        Ok(Box::new(GpiodEdgeInput { request, info, pin: *self }))
    }

    fn into_output(self: Box<Self>, initial: bool) -> GpioResult<Box<dyn GpioOutput>> {
        let line = self.chip.chip.request_lines(
            gpiod::Options::output([self.pin_index as u32])
                .values([initial])
                .consumer(env!("CARGO_PKG_NAME"))
                .active(self.active_level.into())
                .bias(self.bias.into()),
        )?;
        Ok(Box::new(GpiodOutput { line, pin: *self }))
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

impl Drop for GpiodPin {
    fn drop(&mut self) {
        self.chip.release(self.pin_index);
        debug!("{:?} released", self);
    }
}

// The requested line is declared first so the kernel handle is closed before the claim is cleared.
struct GpiodInput {
    line: gpiod::Lines<gpiod::Input>,
    pin: GpiodPin,
}

impl Debug for GpiodInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.pin)
    }
}

impl GpioInput for GpiodInput {
    fn read(&self) -> GpioResult<bool> {
        let values = self.line.get_values([false])?;
        Ok(values[0])
    }
}

/// An input line requested with rising-edge detection. The kernel queues edge events on the
/// request descriptor, which is polled so that a waiter never blocks past its timeout.
struct GpiodEdgeInput {
    request: File,
    info: Internal<ValuesInfo>,
    pin: GpiodPin,
}

impl Debug for GpiodEdgeInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[edge input]", self.pin)
    }
}

impl GpioInput for GpiodEdgeInput {
    fn read(&self) -> GpioResult<bool> {
        let mut values = [false];
        self.info.get_values(self.request.as_raw_fd(), &mut values)?;
        Ok(values[0])
    }

    fn wait_rising_edge(&self, timeout: Duration) -> GpioResult<bool> {
        let millis = timeout.as_millis().min(c_int::MAX as u128) as c_int;
        let mut fds = [PollFd::new(self.request.as_raw_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, millis) {
            Ok(0) | Err(Errno::EINTR) => return Ok(false),
            Ok(_) => {}
            Err(e) => return Err(std::io::Error::from(e).into()),
        }

        let mut event = RawEvent::default();
        let len = (&self.request).read(event.as_mut())?;
        gpiod_core::check_size(len, &event)?;
        let event = event.as_event(self.info.index())?;
        trace!("{:?}: {}", self, event);
        Ok(event.edge == gpiod::Edge::Rising)
    }
}

struct GpiodOutput {
    line: gpiod::Lines<gpiod::Output>,
    pin: GpiodPin,
}

impl Debug for GpiodOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.pin)
    }
}

impl GpioOutput for GpiodOutput {
    fn write(&self, value: bool) -> GpioResult<()> {
        self.line.set_values([value])?;
        Ok(())
    }
}
