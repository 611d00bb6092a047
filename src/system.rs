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

//! Peripheral address configuration.
//!
//! Use [`PeripheralWindow`] to describe which physical address range holds the
//! GPIO register bank. The peripheral base differs between SoC revisions, and
//! can be overridden through the `PERI_BASE` environment variable.
//!
//! [`PeripheralWindow`]: struct.PeripheralWindow.html

use std::env;
use std::error;
use std::fmt;
use std::result;

/// Peripheral base address for the BCM2835 (Pi A, B, Zero).
pub const PERIPHERAL_BASE_BCM2835: u64 = 0x2000_0000;
/// Peripheral base address for the BCM2836 and BCM2837 (Pi 2, 3).
pub const PERIPHERAL_BASE_BCM2837: u64 = 0x3f00_0000;
/// Peripheral base address for the BCM2711 (Pi 4, 400).
pub const PERIPHERAL_BASE_BCM2711: u64 = 0xfe00_0000;
/// Offset from the peripheral base to the GPIO register bank.
pub const GPIO_OFFSET: u64 = 0x20_0000;

// GPFSEL0 up to and including GPLEV1
const GPIO_WINDOW_LEN: usize = 0xb4;

/// Environment variable that overrides the peripheral base address.
pub const ENV_PERIPHERAL_BASE: &str = "PERI_BASE";

/// Errors that can occur when configuring the peripheral address window.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// The peripheral base address override couldn't be parsed.
    ///
    /// Addresses are accepted in decimal, in hexadecimal with a `0x` prefix,
    /// or in octal with a leading `0`.
    InvalidBaseAddress(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidBaseAddress(ref value) => {
                write!(f, "Invalid peripheral base address: {}", value)
            }
        }
    }
}

impl error::Error for Error {}

/// Result type returned from methods that can have `system::Error`s.
pub type Result<T> = result::Result<T, Error>;

/// Physical address range containing the GPIO registers.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct PeripheralWindow {
    peripheral_base: u64,
    gpio_offset: u64,
    len: usize,
}

impl PeripheralWindow {
    /// Constructs a new `PeripheralWindow` for the specified peripheral base.
    pub fn new(peripheral_base: u64) -> PeripheralWindow {
        PeripheralWindow {
            peripheral_base,
            gpio_offset: GPIO_OFFSET,
            len: GPIO_WINDOW_LEN,
        }
    }

    /// Constructs a new `PeripheralWindow` based on the `PERI_BASE` environment
    /// variable, falling back to the BCM2837 base address when it's not set.
    pub fn from_env() -> Result<PeripheralWindow> {
        match env::var(ENV_PERIPHERAL_BASE) {
            Ok(value) => Ok(PeripheralWindow::new(parse_address(&value)?)),
            Err(env::VarError::NotPresent) => Ok(PeripheralWindow::default()),
            Err(env::VarError::NotUnicode(value)) => Err(Error::InvalidBaseAddress(
                value.to_string_lossy().into_owned(),
            )),
        }
    }

    /// Returns the peripheral base address.
    pub fn peripheral_base(&self) -> u64 {
        self.peripheral_base
    }

    /// Returns the offset from the peripheral base to the GPIO registers.
    pub fn gpio_offset(&self) -> u64 {
        self.gpio_offset
    }

    /// Returns the physical address of the first GPIO register.
    pub fn address(&self) -> u64 {
        self.peripheral_base + self.gpio_offset
    }

    /// Returns the length of the window in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the window doesn't cover any registers.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a copy of this window starting at `address` rather than at
    /// `peripheral_base + gpio_offset`.
    ///
    /// Useful when mapping a device or file that exposes the GPIO registers
    /// at offset 0, such as `/dev/gpiomem`.
    pub fn at_address(self, address: u64) -> PeripheralWindow {
        PeripheralWindow {
            peripheral_base: address,
            gpio_offset: 0,
            len: self.len,
        }
    }
}

impl Default for PeripheralWindow {
    fn default() -> PeripheralWindow {
        PeripheralWindow::new(PERIPHERAL_BASE_BCM2837)
    }
}

/// Parses an address using the same prefix rules as C's `strtoul(s, _, 0)`.
pub fn parse_address(value: &str) -> Result<u64> {
    let trimmed = value.trim();

    let (digits, radix) = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        (hex, 16)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        (&trimmed[1..], 8)
    } else {
        (trimmed, 10)
    };

    if digits.is_empty() || digits.starts_with('+') || digits.starts_with('-') {
        return Err(Error::InvalidBaseAddress(value.to_owned()));
    }

    u64::from_str_radix(digits, radix).map_err(|_| Error::InvalidBaseAddress(value.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_radixes() {
        assert_eq!(parse_address("0xFE000000"), Ok(PERIPHERAL_BASE_BCM2711));
        assert_eq!(parse_address("0X3f000000"), Ok(PERIPHERAL_BASE_BCM2837));
        assert_eq!(parse_address("536870912"), Ok(PERIPHERAL_BASE_BCM2835));
        assert_eq!(parse_address("010"), Ok(8));
        assert_eq!(parse_address("0"), Ok(0));
        assert_eq!(parse_address("  0x20000000\n"), Ok(PERIPHERAL_BASE_BCM2835));
    }

    #[test]
    fn rejects_garbage() {
        for value in ["", "0x", "pi4", "0xZZ", "-1", "09", "0x-1"] {
            assert_eq!(
                parse_address(value),
                Err(Error::InvalidBaseAddress(value.to_owned())),
                "{:?}",
                value
            );
        }
    }

    #[test]
    fn window_covers_gpio_bank() {
        let window = PeripheralWindow::new(PERIPHERAL_BASE_BCM2711);
        assert_eq!(window.address(), 0xfe20_0000);
        assert_eq!(window.len(), 0xb4);

        let window = PeripheralWindow::default().at_address(0);
        assert_eq!(window.address(), 0);
        assert_eq!(window.len(), 0xb4);
    }
}
