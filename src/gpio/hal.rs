use core::convert::Infallible;

use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin as OutputPinHal};

use super::cdev::LineHandle;
use super::{Error, Level, PinController, Registers};

/// `Error` trait implementation for `embedded-hal` v1.0.0.
impl embedded_hal::digital::Error for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// `ErrorType` trait implementation for `embedded-hal` v1.0.0.
impl<'a, R: Registers + ?Sized> ErrorType for PinController<'a, R> {
    type Error = Infallible;
}

/// `OutputPin` trait implementation for `embedded-hal` v1.0.0.
impl<'a, R: Registers + ?Sized> OutputPinHal for PinController<'a, R> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        PinController::set_low(self);

        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        PinController::set_high(self);

        Ok(())
    }
}

/// `OutputPin` trait implementation for `embedded-hal` v0.2.7.
#[cfg(feature = "embedded-hal-0")]
impl<'a, R: Registers + ?Sized> embedded_hal_0::digital::v2::OutputPin for PinController<'a, R> {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        OutputPinHal::set_low(self)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        OutputPinHal::set_high(self)
    }
}

/// `ErrorType` trait implementation for `embedded-hal` v1.0.0.
impl ErrorType for LineHandle {
    type Error = Error;
}

/// `OutputPin` trait implementation for `embedded-hal` v1.0.0.
impl OutputPinHal for LineHandle {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set_value(Level::Low)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set_value(Level::High)
    }
}

/// `OutputPin` trait implementation for `embedded-hal` v0.2.7.
#[cfg(feature = "embedded-hal-0")]
impl embedded_hal_0::digital::v2::OutputPin for LineHandle {
    type Error = Error;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        OutputPinHal::set_low(self)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        OutputPinHal::set_high(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::gpio::controller::tests::SimulatedBank;
    use crate::gpio::{DutyCycle, Pin, SoftPwm};

    use embedded_hal::delay::DelayNs;

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    #[test]
    fn soft_pwm_over_registers() {
        let bank = SimulatedBank::new(45);
        let mut gpio = PinController::new(&bank, Pin::new(12).unwrap()).unwrap();
        gpio.configure_as_output();
        bank.writes.borrow_mut().clear();

        let mut pwm = SoftPwm::new(gpio, NoDelay, DutyCycle::new(1_000, 25));
        pwm.run_cycles(1).unwrap();

        assert_eq!(*bank.writes.borrow(), vec![(7, 1 << 12), (10, 1 << 12)]);

        let (gpio, _) = pwm.into_inner();
        assert_eq!(gpio.level(), Level::Low);
    }
}
