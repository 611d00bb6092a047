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

use std::fmt;
use std::mem::size_of;

use log::debug;

use crate::gpio::{Error, Level, Mode, Pin, Registers, Result};

// Register offsets in 32-bit units (BCM2835 datasheet @ 6.1)
const GPFSEL0: usize = 0x00;
const GPSET0: usize = 0x1c / size_of::<u32>();
const GPCLR0: usize = 0x28 / size_of::<u32>();
const GPLEV0: usize = 0x34 / size_of::<u32>();

const FSEL_MASK: u32 = 0b111;

/// Drives a single GPIO pin through a register bank.
///
/// All register offsets and the bitmask are computed once, when the
/// `PinController` is constructed. Construction fails if the bank doesn't
/// cover every register the pin needs, so the accessors themselves never
/// address anything outside the bank.
pub struct PinController<'a, R: Registers + ?Sized> {
    regs: &'a R,
    pin: Pin,
    fsel: usize,
    fsel_shift: u32,
    set: usize,
    clr: usize,
    lev: usize,
    mask: u32,
}

impl<'a, R: Registers + ?Sized> fmt::Debug for PinController<'a, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinController")
            .field("pin", &self.pin)
            .field("fsel", &self.fsel)
            .field("fsel_shift", &self.fsel_shift)
            .field("set", &self.set)
            .field("clr", &self.clr)
            .field("lev", &self.lev)
            .field("mask", &format_args!("{:#010x}", self.mask))
            .finish()
    }
}

impl<'a, R: Registers + ?Sized> PinController<'a, R> {
    /// Constructs a new `PinController` for `pin`.
    ///
    /// Returns `Err(`[`Error::WindowTooSmall`]`)` if `regs` doesn't include the
    /// function-select, set, clear and level registers for `pin`.
    ///
    /// [`Error::WindowTooSmall`]: enum.Error.html#variant.WindowTooSmall
    pub fn new(regs: &'a R, pin: Pin) -> Result<PinController<'a, R>> {
        let number = pin.number() as usize;

        let controller = PinController {
            regs,
            pin,
            fsel: GPFSEL0 + number / 10,
            fsel_shift: ((number % 10) * 3) as u32,
            set: GPSET0 + number / 32,
            clr: GPCLR0 + number / 32,
            lev: GPLEV0 + number / 32,
            mask: 1 << (number % 32),
        };

        // GPLEV is the last register we touch
        let required = controller.lev + 1;
        let actual = regs.register_count();
        if actual < required {
            return Err(Error::WindowTooSmall { required, actual });
        }

        Ok(controller)
    }

    /// Returns the pin this controller drives.
    #[inline]
    pub fn pin(&self) -> Pin {
        self.pin
    }

    /// Returns the register bank this controller writes to.
    pub(crate) fn registers(&self) -> &'a R {
        self.regs
    }

    /// Returns the clear register offset and bitmask for this pin.
    pub(crate) fn clear_bit(&self) -> (usize, u32) {
        (self.clr, self.mask)
    }

    /// Reads the pin's current mode from its function-select field.
    pub fn mode(&self) -> Mode {
        Mode::from_bits(self.regs.read(self.fsel) >> self.fsel_shift)
    }

    /// Changes the pin's mode.
    ///
    /// Function-select registers are shared between 10 pins. The fields of
    /// the other pins are written back unchanged.
    pub fn set_mode(&mut self, mode: Mode) {
        let reg_value = self.regs.read(self.fsel);
        self.regs.write(
            self.fsel,
            (reg_value & !(FSEL_MASK << self.fsel_shift)) | ((mode as u32) << self.fsel_shift),
        );
    }

    /// Configures the pin as an output, and drives it low.
    pub fn configure_as_output(&mut self) {
        self.set_mode(Mode::Output);
        self.set_low();

        debug!("Configured {} as output", self.pin);
    }

    /// Drives the pin high.
    #[inline(always)]
    pub fn set_high(&mut self) {
        self.regs.write(self.set, self.mask);
    }

    /// Drives the pin low.
    #[inline(always)]
    pub fn set_low(&mut self) {
        self.regs.write(self.clr, self.mask);
    }

    /// Drives the pin to `level`.
    #[inline]
    pub fn write(&mut self, level: Level) {
        match level {
            Level::Low => self.set_low(),
            Level::High => self.set_high(),
        }
    }

    /// Reads the pin's logic level.
    #[inline]
    pub fn level(&self) -> Level {
        Level::from(self.regs.read(self.lev) & self.mask != 0)
    }
}
