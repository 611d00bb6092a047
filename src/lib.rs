//! pinflash drives a single Raspberry Pi GPIO pin as fast as the hardware
//! allows, or at a chosen brightness through software-based PWM.
//!
//! The fast path maps the GPIO register bank from `/dev/mem` and writes the
//! set and clear registers directly. The PWM path works over any
//! `embedded-hal` digital output, including lines claimed through the
//! gpiochip character device.
//!
//! pinflash requires Raspberry Pi OS or any similar, recent, Linux
//! distribution. Both `gnu` and `musl` libc targets are supported. The register
//! layout matches the BCM2835, BCM2836, BCM2837 and BCM2711.

// Used by rustdoc to link other crates to pinflash's docs
#![doc(html_root_url = "https://docs.rs/pinflash/0.1.0")]

#[macro_use]
mod macros;

pub mod gpio;
pub mod hal;
pub mod system;
