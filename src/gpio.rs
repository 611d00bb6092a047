// Copyright (c) 2017-2019 Rene van der Meer
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
// THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Direct control of a single GPIO pin.
//!
//! ## Register access
//!
//! For maximum toggle speed, pins are driven by writing straight into the GPIO
//! register bank. [`RegisterMap::acquire`] maps the bank from `/dev/mem` into the
//! process, and a [`PinController`] computes the function-select field and the
//! set/clear bitmask for one validated [`Pin`].
//!
//! Mapping `/dev/mem` requires superuser privileges. The physical address of the
//! register bank depends on the SoC, and is configured through a
//! [`PeripheralWindow`].
//!
//! ## Teardown
//!
//! The toggle loop never returns, so the only way out is a signal. [`SignalGuard`]
//! installs `SIGINT` and `SIGTERM` handlers that drive the pin low, release the
//! mapping and terminate the process immediately.
//!
//! ## Software-based PWM
//!
//! [`SoftPwm`] emulates a PWM signal by switching any
//! [`embedded_hal::digital::OutputPin`] on and off with timed sleeps in between.
//! Both a [`PinController`] and a gpiochip [`LineHandle`] can be used as output.
//!
//! Software-based PWM is inherently inaccurate on a multi-threaded OS due to
//! scheduling/preemption.
//!
//! ## Examples
//!
//! ```no_run
//! use pinflash::gpio::{Pin, PinController, RegisterMap};
//! use pinflash::system::PeripheralWindow;
//!
//! # fn main() -> pinflash::gpio::Result<()> {
//! let pin = Pin::new(23)?;
//! let map = RegisterMap::acquire(&PeripheralWindow::from_env()?)?;
//! let mut led = PinController::new(&map, pin)?;
//!
//! led.configure_as_output();
//! led.set_high();
//! led.set_low();
//! # Ok(())
//! # }
//! ```
//!
//! [`RegisterMap::acquire`]: struct.RegisterMap.html#method.acquire
//! [`PinController`]: struct.PinController.html
//! [`Pin`]: struct.Pin.html
//! [`PeripheralWindow`]: ../system/struct.PeripheralWindow.html
//! [`SignalGuard`]: struct.SignalGuard.html
//! [`SoftPwm`]: struct.SoftPwm.html
//! [`LineHandle`]: cdev/struct.LineHandle.html

use std::error;
use std::fmt;
use std::io;
use std::ops::Not;
use std::result;
use std::str::FromStr;

pub mod cdev;
mod controller;
mod hal;
mod mem;
mod signal;
mod soft_pwm;
pub mod toggle;

use crate::system;

pub use self::controller::PinController;
pub use self::mem::{RegisterMap, Registers};
pub use self::signal::{SignalGuard, Teardown};
pub use self::soft_pwm::{set_realtime_priority, DutyCycle, SoftPwm};

/// Number of GPIO lines on the BCM283x. Valid pins are `0..GPIO_MAX_PINS`.
pub const GPIO_MAX_PINS: u8 = 54;

/// Errors that can occur when accessing the GPIO peripheral.
#[derive(Debug)]
pub enum Error {
    /// Pin is not available.
    ///
    /// The GPIO peripheral doesn't expose a GPIO pin with the specified number. Pins are
    /// addressed by their BCM GPIO numbers, rather than their physical location on the GPIO
    /// header.
    PinNotAvailable(u32),
    /// Invalid configuration value.
    ///
    /// A pin number, chip number, frequency or duty cycle couldn't be parsed, or the
    /// peripheral base address override is malformed.
    InvalidInput(String),
    /// Permission denied when opening `/dev/mem` or `/dev/gpiochipN` for read/write access.
    ///
    /// Mapping `/dev/mem` requires superuser privileges. Access to `/dev/gpiochipN`
    /// is typically granted to members of the `gpio` group.
    PermissionDenied(String),
    /// The register bank is too small for the selected pin.
    ///
    /// `required` and `actual` are expressed in 32-bit registers.
    WindowTooSmall { required: usize, actual: usize },
    /// The gpiochip refused to hand out the requested line.
    LineRequest { line: u32, source: io::Error },
    /// I/O error.
    Io(io::Error),
}

impl Error {
    /// Returns the process exit status that corresponds to this error.
    ///
    /// Every failure in this crate reflects an unrecoverable environment
    /// condition, so all of them map to 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::PinNotAvailable(pin) => write!(f, "Pin {} is not available", pin),
            Error::InvalidInput(ref value) => write!(f, "Invalid input: {}", value),
            Error::PermissionDenied(ref path) => write!(f, "Permission denied: {}", path),
            Error::WindowTooSmall { required, actual } => write!(
                f,
                "Register window too small: {} registers required, {} mapped",
                required, actual
            ),
            Error::LineRequest { line, ref source } => {
                write!(f, "Unable to request line {}: {}", line, source)
            }
            Error::Io(ref err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::LineRequest { ref source, .. } => Some(source),
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<system::Error> for Error {
    fn from(err: system::Error) -> Error {
        Error::InvalidInput(err.to_string())
    }
}

/// Result type returned from methods that can have `pinflash::gpio::Error`s.
pub type Result<T> = result::Result<T, Error>;

/// Pin modes, using the BCM283x function-select encoding.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Mode {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

impl Mode {
    /// Decodes a 3-bit function-select field.
    pub fn from_bits(bits: u32) -> Mode {
        match bits & 0b111 {
            0b000 => Mode::Input,
            0b001 => Mode::Output,
            0b100 => Mode::Alt0,
            0b101 => Mode::Alt1,
            0b110 => Mode::Alt2,
            0b111 => Mode::Alt3,
            0b011 => Mode::Alt4,
            _ => Mode::Alt5,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Mode::Input => write!(f, "In"),
            Mode::Output => write!(f, "Out"),
            Mode::Alt0 => write!(f, "Alt0"),
            Mode::Alt1 => write!(f, "Alt1"),
            Mode::Alt2 => write!(f, "Alt2"),
            Mode::Alt3 => write!(f, "Alt3"),
            Mode::Alt4 => write!(f, "Alt4"),
            Mode::Alt5 => write!(f, "Alt5"),
        }
    }
}

/// Pin logic levels.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Level {
    Low = 0,
    High = 1,
}

impl From<bool> for Level {
    fn from(e: bool) -> Level {
        if e {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<u8> for Level {
    fn from(value: u8) -> Self {
        if value == 0 {
            Level::Low
        } else {
            Level::High
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Level::Low => write!(f, "Low"),
            Level::High => write!(f, "High"),
        }
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// A validated BCM GPIO number.
///
/// A `Pin` can only be constructed for numbers below [`GPIO_MAX_PINS`], so
/// register offsets derived from it always fall within the GPIO register bank.
///
/// [`GPIO_MAX_PINS`]: constant.GPIO_MAX_PINS.html
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Pin(u8);

impl Pin {
    /// Constructs a new `Pin`.
    ///
    /// Returns `Err(`[`Error::PinNotAvailable`]`)` if the BCM283x doesn't have a
    /// GPIO line with the specified number.
    ///
    /// [`Error::PinNotAvailable`]: enum.Error.html#variant.PinNotAvailable
    pub fn new(pin: u8) -> Result<Pin> {
        if pin >= GPIO_MAX_PINS {
            return Err(Error::PinNotAvailable(u32::from(pin)));
        }

        Ok(Pin(pin))
    }

    /// Returns the BCM GPIO number.
    #[inline]
    pub fn number(self) -> u8 {
        self.0
    }
}

impl FromStr for Pin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Pin> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("{:?} is not a pin number", s)))?;

        match u8::try_from(value) {
            Ok(pin) => Pin::new(pin),
            Err(_) => Err(Error::PinNotAvailable(value)),
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}
