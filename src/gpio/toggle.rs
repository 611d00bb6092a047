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

//! Square wave at the highest frequency the register path allows.
//!
//! [`run`] never returns. Install a [`SignalGuard`] first, otherwise the pin is
//! left in whatever state it happened to be in when the process is killed.
//!
//! [`run`]: fn.run.html
//! [`SignalGuard`]: ../struct.SignalGuard.html

use crate::gpio::{PinController, Registers};

/// Alternates between setting and clearing the pin, without any delay.
pub fn run<R: Registers + ?Sized>(pin: &mut PinController<'_, R>) -> ! {
    loop {
        pin.set_high();
        pin.set_low();
    }
}

/// Runs `cycles` high/low cycles, and leaves the pin low.
pub fn run_cycles<R: Registers + ?Sized>(pin: &mut PinController<'_, R>, cycles: u64) {
    for _ in 0..cycles {
        pin.set_high();
        pin.set_low();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::gpio::controller::tests::SimulatedBank;
    use crate::gpio::{Level, Pin};

    #[test]
    fn alternates_set_and_clear() {
        let bank = SimulatedBank::new(45);
        let mut gpio = PinController::new(&bank, Pin::new(40).unwrap()).unwrap();

        run_cycles(&mut gpio, 3);

        let mask = 1 << 8;
        assert_eq!(
            *bank.writes.borrow(),
            vec![
                (8, mask),
                (11, mask),
                (8, mask),
                (11, mask),
                (8, mask),
                (11, mask)
            ]
        );
        assert_eq!(gpio.level(), Level::Low);
    }
}
