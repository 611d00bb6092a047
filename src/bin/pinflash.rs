// pinflash.rs - Toggles a GPIO pin as fast as the memory-mapped registers
// allow, producing a square wave until SIGINT (Ctrl-C) or SIGTERM arrives.
//
// Usage: pinflash <bcm_pin>
//
// Mapping /dev/mem requires superuser privileges. Set PERI_BASE to override
// the peripheral base address, for instance PERI_BASE=0xFE000000 on a Pi 4.

use std::convert::Infallible;
use std::env;
use std::process;

use log::info;

use pinflash::gpio::{self, toggle, Pin, PinController, RegisterMap, SignalGuard, Teardown};
use pinflash::system::PeripheralWindow;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: pinflash <bcm_pin>");
        process::exit(1);
    }

    // Validate the pin before touching any hardware.
    let pin = match args[1].parse::<Pin>() {
        Ok(pin) => pin,
        Err(_) => {
            eprintln!("Invalid BCM pin: {}", args[1]);
            process::exit(1);
        }
    };

    if let Err(e) = run(pin) {
        eprintln!("{}", e);
        process::exit(e.exit_code());
    }
}

fn run(pin: Pin) -> gpio::Result<Infallible> {
    let window = PeripheralWindow::from_env()?;

    // The signal handler needs the mapping for the rest of the process.
    let map: &'static RegisterMap = Box::leak(Box::new(RegisterMap::acquire(&window)?));

    let result = flash(map, &window, pin);

    // Only reached when setting up the pin failed.
    map.release();

    result
}

fn flash(
    map: &'static RegisterMap,
    window: &PeripheralWindow,
    pin: Pin,
) -> gpio::Result<Infallible> {
    let mut controller = PinController::new(map, pin)?;
    controller.configure_as_output();

    let _guard = SignalGuard::install(Teardown::for_controller(&controller))?;

    info!(
        "Toggling {} through registers at {:#x}, press Ctrl-C to stop",
        pin,
        window.address()
    );

    toggle::run(&mut controller)
}

