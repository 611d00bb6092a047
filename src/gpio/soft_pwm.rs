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

use std::convert::Infallible;
use std::fmt;
use std::mem;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use libc::{self, sched_param, PR_SET_TIMERSLACK, SCHED_RR};
use log::debug;

const MICROS_PER_SEC: u32 = 1_000_000;

/// On/off timing for one PWM period, in microseconds.
///
/// `on_us + off_us` always equals `period_us`.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct DutyCycle {
    period_us: u32,
    on_us: u32,
    off_us: u32,
}

impl DutyCycle {
    /// Computes the schedule for `frequency` Hz at `duty_percent` %.
    ///
    /// Out-of-range values are clamped rather than rejected: `duty_percent`
    /// to 0-100, and `frequency` to at least 1 Hz.
    pub fn new(frequency: i64, duty_percent: i64) -> DutyCycle {
        let duty_percent = duty_percent.clamp(0, 100) as u64;
        let frequency = frequency.clamp(1, i64::from(MICROS_PER_SEC)) as u32;

        let period_us = MICROS_PER_SEC / frequency;
        let on_us = (u64::from(period_us) * duty_percent / 100) as u32;

        DutyCycle {
            period_us,
            on_us,
            off_us: period_us - on_us,
        }
    }

    /// Returns the length of one period.
    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Returns how long the output stays high during each period.
    pub fn on_us(&self) -> u32 {
        self.on_us
    }

    /// Returns how long the output stays low during each period.
    pub fn off_us(&self) -> u32 {
        self.off_us
    }
}

impl fmt::Display for DutyCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "period {} µs, on {} µs, off {} µs",
            self.period_us, self.on_us, self.off_us
        )
    }
}

/// Software-based PWM over any digital output.
///
/// Each period drives the output high for [`DutyCycle::on_us`] and low for
/// [`DutyCycle::off_us`]. A phase with a duration of zero is skipped entirely,
/// so 0% keeps the output low and 100% keeps it high without any glitches.
///
/// [`DutyCycle::on_us`]: struct.DutyCycle.html#method.on_us
/// [`DutyCycle::off_us`]: struct.DutyCycle.html#method.off_us
#[derive(Debug)]
pub struct SoftPwm<P, D> {
    pin: P,
    delay: D,
    duty_cycle: DutyCycle,
}

impl<P: OutputPin, D: DelayNs> SoftPwm<P, D> {
    /// Constructs a new `SoftPwm`. The output isn't touched until the first cycle.
    pub fn new(pin: P, delay: D, duty_cycle: DutyCycle) -> SoftPwm<P, D> {
        SoftPwm {
            pin,
            delay,
            duty_cycle,
        }
    }

    /// Returns the current schedule.
    pub fn duty_cycle(&self) -> DutyCycle {
        self.duty_cycle
    }

    /// Replaces the schedule, starting with the next period.
    pub fn set_duty_cycle(&mut self, duty_cycle: DutyCycle) {
        self.duty_cycle = duty_cycle;
    }

    /// Runs a single period.
    pub fn cycle(&mut self) -> Result<(), P::Error> {
        let DutyCycle { on_us, off_us, .. } = self.duty_cycle;

        if on_us > 0 {
            self.pin.set_high()?;
            self.delay.delay_us(on_us);
        }

        if off_us > 0 {
            self.pin.set_low()?;
            self.delay.delay_us(off_us);
        }

        Ok(())
    }

    /// Runs `cycles` periods.
    pub fn run_cycles(&mut self, cycles: u64) -> Result<(), P::Error> {
        for _ in 0..cycles {
            self.cycle()?;
        }

        Ok(())
    }

    /// Runs until the output reports an error, or the process is terminated.
    pub fn run(&mut self) -> Result<Infallible, P::Error> {
        debug!("Starting software PWM: {}", self.duty_cycle);

        loop {
            self.cycle()?;
        }
    }

    /// Consumes the `SoftPwm`, returning the output and delay.
    pub fn into_inner(self) -> (P, D) {
        (self.pin, self.delay)
    }
}

/// Asks the scheduler to favour the calling thread.
///
/// Sets the scheduling policy to real-time round robin at the highest
/// priority, and the timer slack to 1 ns. Both silently fail if we're not
/// running as root.
pub fn set_realtime_priority() {
    let mut params: sched_param = unsafe { mem::zeroed() };
    params.sched_priority = unsafe { libc::sched_get_priority_max(SCHED_RR) };

    unsafe {
        libc::sched_setscheduler(0, SCHED_RR, &params);
    }

    // Default timer slack is 50 µs. Only relevant if SCHED_RR was refused.
    unsafe {
        libc::prctl(PR_SET_TIMERSLACK, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    use embedded_hal::digital::{ErrorKind, ErrorType};

    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    enum Event {
        High,
        Low,
        Sleep(u32),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct RecordingPin(Log);

    impl ErrorType for RecordingPin {
        type Error = Infallible;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.borrow_mut().push(Event::Low);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.borrow_mut().push(Event::High);
            Ok(())
        }
    }

    struct RecordingDelay(Log);

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.0.borrow_mut().push(Event::Sleep(ns / 1_000));
        }

        fn delay_us(&mut self, us: u32) {
            self.0.borrow_mut().push(Event::Sleep(us));
        }
    }

    fn recorder(duty_cycle: DutyCycle) -> (SoftPwm<RecordingPin, RecordingDelay>, Log) {
        let log = Log::default();
        let pwm = SoftPwm::new(
            RecordingPin(log.clone()),
            RecordingDelay(log.clone()),
            duty_cycle,
        );

        (pwm, log)
    }

    #[test]
    fn half_duty() {
        let duty_cycle = DutyCycle::new(100, 50);
        assert_eq!(duty_cycle.period_us(), 10_000);
        assert_eq!(duty_cycle.on_us(), 5_000);
        assert_eq!(duty_cycle.off_us(), 5_000);

        let (mut pwm, log) = recorder(duty_cycle);
        pwm.run_cycles(2).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                Event::High,
                Event::Sleep(5_000),
                Event::Low,
                Event::Sleep(5_000),
                Event::High,
                Event::Sleep(5_000),
                Event::Low,
                Event::Sleep(5_000),
            ]
        );
    }

    #[test]
    fn zero_duty_skips_on_phase() {
        let duty_cycle = DutyCycle::new(100, 0);
        assert_eq!(duty_cycle.on_us(), 0);
        assert_eq!(duty_cycle.off_us(), 10_000);

        let (mut pwm, log) = recorder(duty_cycle);
        pwm.run_cycles(2).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                Event::Low,
                Event::Sleep(10_000),
                Event::Low,
                Event::Sleep(10_000)
            ]
        );
    }

    #[test]
    fn full_duty_skips_off_phase() {
        let duty_cycle = DutyCycle::new(100, 100);
        assert_eq!(duty_cycle.on_us(), 10_000);
        assert_eq!(duty_cycle.off_us(), 0);

        let (mut pwm, log) = recorder(duty_cycle);
        pwm.run_cycles(2).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                Event::High,
                Event::Sleep(10_000),
                Event::High,
                Event::Sleep(10_000)
            ]
        );
    }

    #[test]
    fn inputs_are_clamped() {
        assert_eq!(DutyCycle::new(100, -5), DutyCycle::new(100, 0));
        assert_eq!(DutyCycle::new(100, 150), DutyCycle::new(100, 100));
        assert_eq!(DutyCycle::new(0, 50).period_us(), 1_000_000);
        assert_eq!(DutyCycle::new(-20, 50).period_us(), 1_000_000);
        assert_eq!(DutyCycle::new(i64::MAX, 50).period_us(), 1);
    }

    #[test]
    fn on_and_off_add_up_to_period() {
        for frequency in [1, 3, 7, 60, 100, 333, 999, 44_100] {
            for duty_percent in 0..=100 {
                let duty_cycle = DutyCycle::new(frequency, duty_percent);
                assert_eq!(
                    duty_cycle.on_us() + duty_cycle.off_us(),
                    duty_cycle.period_us()
                );
            }
        }

        // floor(333333 * 33 / 100)
        assert_eq!(DutyCycle::new(3, 33).on_us(), 109_999);
    }

    #[test]
    fn reconfigure_between_periods() {
        let (mut pwm, log) = recorder(DutyCycle::new(100, 100));
        pwm.cycle().unwrap();
        pwm.set_duty_cycle(DutyCycle::new(200, 0));
        pwm.cycle().unwrap();

        assert_eq!(
            *log.borrow(),
            vec![Event::High, Event::Sleep(10_000), Event::Low, Event::Sleep(5_000)]
        );
    }

    #[derive(Debug)]
    struct Unplugged;

    impl embedded_hal::digital::Error for Unplugged {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    struct FailingPin;

    impl ErrorType for FailingPin {
        type Error = Unplugged;
    }

    impl OutputPin for FailingPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Err(Unplugged)
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Err(Unplugged)
        }
    }

    #[test]
    fn output_errors_stop_the_loop() {
        let log = Log::default();
        let mut pwm = SoftPwm::new(
            FailingPin,
            RecordingDelay(log.clone()),
            DutyCycle::new(100, 50),
        );

        assert!(pwm.run().is_err());
        assert!(log.borrow().is_empty());
    }
}
