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

use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use libc::{self, c_int, SIGINT, SIGTERM, SIG_DFL};
use log::debug;

use crate::gpio::cdev::{self, LineHandle};
use crate::gpio::{Level, PinController, RegisterMap, Registers, Result};

const SIGNALS: [c_int; 2] = [SIGINT, SIGTERM];

// Capability handed to the signal handler. Written only by SignalGuard, read
// only by handle_signal().
static TEARDOWN: AtomicPtr<Teardown> = AtomicPtr::new(ptr::null_mut());

/// What the signal handler does before the process exits.
///
/// A `Teardown` only holds what's needed to drive one output low and release
/// its resource. Everything it does is async-signal-safe: a single register
/// write and `munmap`, or an `ioctl` and `close`.
#[derive(Debug, Copy, Clone)]
pub enum Teardown {
    /// Clear a pin through the register bank, then unmap the bank.
    Registers {
        map: &'static RegisterMap,
        clr: usize,
        mask: u32,
    },
    /// Drive a gpiochip line low, then close its file descriptor.
    Line { fd: RawFd },
}

impl Teardown {
    /// Constructs a `Teardown` that clears the controller's pin.
    pub fn for_controller(controller: &PinController<'static, RegisterMap>) -> Teardown {
        let (clr, mask) = controller.clear_bit();

        Teardown::Registers {
            map: controller.registers(),
            clr,
            mask,
        }
    }

    /// Constructs a `Teardown` that drives `line` low.
    pub fn for_line(line: &LineHandle) -> Teardown {
        Teardown::Line { fd: line.as_raw_fd() }
    }

    /// Drives the output low and releases the resource.
    pub fn run(&self) {
        match *self {
            Teardown::Registers { map, clr, mask } => {
                map.write(clr, mask);
                map.release();
            }
            Teardown::Line { fd } => {
                let _ = cdev::set_value(fd, Level::Low);
                unsafe {
                    libc::close(fd);
                }
            }
        }
    }
}

extern "C" fn handle_signal(_signum: c_int) {
    let teardown = TEARDOWN.load(Ordering::SeqCst);
    if !teardown.is_null() {
        unsafe { (*teardown).run() };
    }

    // Skip atexit handlers and destructors. The mapping is already gone.
    unsafe { libc::_exit(0) }
}

/// Process-wide `SIGINT`/`SIGTERM` handler.
///
/// While a `SignalGuard` exists, either signal runs its [`Teardown`] and
/// terminates the process with exit status 0. Dropping the guard restores the
/// default signal dispositions.
///
/// Only one teardown is active at a time. Installing a new guard replaces the
/// previous guard's teardown.
///
/// [`Teardown`]: enum.Teardown.html
#[derive(Debug)]
pub struct SignalGuard {
    _private: (),
}

impl SignalGuard {
    /// Installs the signal handlers. Call this before entering a loop that
    /// never returns.
    pub fn install(teardown: Teardown) -> Result<SignalGuard> {
        replace_teardown(Box::into_raw(Box::new(teardown)));

        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = handle_signal as extern "C" fn(c_int) as libc::sighandler_t;
        action.sa_flags = 0;

        // Block both signals while the handler runs, so a SIGTERM can't
        // interrupt a SIGINT teardown halfway through.
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
            for &signal in SIGNALS.iter() {
                libc::sigaddset(&mut action.sa_mask, signal);
            }
        }

        for &signal in SIGNALS.iter() {
            parse_retval!(unsafe { libc::sigaction(signal, &action, ptr::null_mut()) })?;
        }

        debug!("Installed SIGINT/SIGTERM teardown: {:?}", teardown);

        Ok(SignalGuard { _private: () })
    }

    /// Returns the currently installed teardown, if any.
    pub fn current() -> Option<Teardown> {
        let teardown = TEARDOWN.load(Ordering::SeqCst);
        if teardown.is_null() {
            None
        } else {
            Some(unsafe { *teardown })
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for &signal in SIGNALS.iter() {
            unsafe {
                libc::signal(signal, SIG_DFL);
            }
        }

        replace_teardown(ptr::null_mut());
    }
}

fn replace_teardown(teardown: *mut Teardown) {
    let previous = TEARDOWN.swap(teardown, Ordering::SeqCst);
    if !previous.is_null() {
        // The handler runs on this thread, so it can't be holding on to the
        // previous teardown while we free it.
        unsafe { drop(Box::from_raw(previous)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use serial_test::serial;

    use crate::gpio::mem::tests::backing_file;
    use crate::gpio::Pin;
    use crate::system::PeripheralWindow;

    fn installed_handler(signal: c_int) -> libc::sighandler_t {
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        unsafe {
            libc::sigaction(signal, ptr::null(), &mut action);
        }

        action.sa_sigaction
    }

    #[test]
    #[serial]
    fn teardown_clears_pin_and_releases() {
        let window = PeripheralWindow::default().at_address(0);
        let path = backing_file("teardown", window.len() as u64);
        let map: &'static RegisterMap =
            Box::leak(Box::new(RegisterMap::acquire_device(&path, &window).unwrap()));

        let mut gpio = PinController::new(map, Pin::new(35).unwrap()).unwrap();
        gpio.configure_as_output();
        // Forget the clear written by configure_as_output()
        map.write(11, 0);

        Teardown::for_controller(&gpio).run();

        assert!(!map.is_mapped());
        let bytes = fs::read(&path).unwrap();
        // GPCLR1, bit 3
        assert_eq!(&bytes[44..48], &(1u32 << 3).to_ne_bytes());

        fs::remove_file(path).unwrap();
    }

    #[test]
    #[serial]
    fn install_and_restore() {
        let window = PeripheralWindow::default().at_address(0);
        let path = backing_file("guard", window.len() as u64);
        let map: &'static RegisterMap =
            Box::leak(Box::new(RegisterMap::acquire_device(&path, &window).unwrap()));
        let gpio = PinController::new(map, Pin::new(17).unwrap()).unwrap();

        let guard = SignalGuard::install(Teardown::for_controller(&gpio)).unwrap();

        let ours = handle_signal as extern "C" fn(c_int) as libc::sighandler_t;
        assert_eq!(installed_handler(SIGINT), ours);
        assert_eq!(installed_handler(SIGTERM), ours);

        match SignalGuard::current() {
            Some(Teardown::Registers { clr, mask, .. }) => {
                assert_eq!(clr, 10);
                assert_eq!(mask, 1 << 17);
            }
            other => panic!("unexpected teardown: {:?}", other),
        }

        drop(guard);

        assert!(SignalGuard::current().is_none());
        assert_eq!(installed_handler(SIGINT), SIG_DFL);
        assert_eq!(installed_handler(SIGTERM), SIG_DFL);

        map.release();
        fs::remove_file(path).unwrap();
    }

    #[test]
    #[serial]
    fn reinstall_replaces_teardown() {
        let first = SignalGuard::install(Teardown::Line { fd: -1 }).unwrap();
        let second = SignalGuard::install(Teardown::Line { fd: -2 }).unwrap();

        assert!(matches!(
            SignalGuard::current(),
            Some(Teardown::Line { fd: -2 })
        ));

        drop(second);
        drop(first);
        assert!(SignalGuard::current().is_none());
    }
}
