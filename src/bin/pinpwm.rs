// pinpwm.rs - Drives a gpiochip line with software PWM until SIGINT (Ctrl-C)
// or SIGTERM arrives.
//
// Prompts for the chip number, line offset, frequency (Hz) and duty cycle (%).
// Frequency is clamped to 1 Hz - 1 MHz and the duty cycle to 0-100 %. The line
// is driven low before the process exits.

use std::convert::Infallible;
use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::process;
use std::str::FromStr;

use log::info;

use pinflash::gpio::cdev::{Chip, Direction};
use pinflash::gpio::{
    self, set_realtime_priority, DutyCycle, Error, Level, SignalGuard, SoftPwm, Teardown,
};
use pinflash::hal::Delay;

const CONSUMER: &str = "pinpwm";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run() {
        eprintln!("{}", e);
        process::exit(e.exit_code());
    }
}

fn run() -> gpio::Result<Infallible> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();

    let chip: u32 = prompt(&mut input, &mut output, "Chip number")?;
    let offset: u32 = prompt(&mut input, &mut output, "Pin number")?;
    let frequency: i64 = prompt(&mut input, &mut output, "Frequency (Hz)")?;
    let duty_percent: i64 = prompt(&mut input, &mut output, "Duty cycle (%)")?;

    let duty_cycle = DutyCycle::new(frequency, duty_percent);

    let chip = Chip::open(chip)?;
    let line = chip
        .line(offset)?
        .request(CONSUMER, Direction::Output, Level::Low)?;

    let _guard = SignalGuard::install(Teardown::for_line(&line))?;
    set_realtime_priority();

    writeln!(output, "{}", duty_cycle)?;
    output.flush()?;

    info!(
        "Driving line {} on {} ({}), press Ctrl-C to stop",
        offset,
        chip.name(),
        chip.label()
    );

    SoftPwm::new(line, Delay::new(), duty_cycle).run()
}

// Prints `label`, then parses the next line of input.
fn prompt<T, R, W>(input: &mut R, output: &mut W, label: &str) -> gpio::Result<T>
where
    T: FromStr,
    T::Err: Display,
    R: BufRead,
    W: Write,
{
    write!(output, "{}: ", label)?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(Error::InvalidInput(format!("{}: no value entered", label)));
    }

    let value = line.trim();
    value
        .parse::<T>()
        .map_err(|e| Error::InvalidInput(format!("{}: {:?} ({})", label, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_parses_numbers() {
        let mut input = io::Cursor::new("4\n  17 \n1000\n25\n");
        let mut output = Vec::new();

        let chip: u32 = prompt(&mut input, &mut output, "Chip number").unwrap();
        let pin: u32 = prompt(&mut input, &mut output, "Pin number").unwrap();
        let frequency: i64 = prompt(&mut input, &mut output, "Frequency (Hz)").unwrap();
        let duty: i64 = prompt(&mut input, &mut output, "Duty cycle (%)").unwrap();

        assert_eq!((chip, pin, frequency, duty), (4, 17, 1000, 25));
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Chip number: Pin number: Frequency (Hz): Duty cycle (%): "
        );
    }

    #[test]
    fn prompt_accepts_out_of_range_pwm_values() {
        let mut input = io::Cursor::new("-50\n250\n");
        let mut output = Vec::new();

        let frequency: i64 = prompt(&mut input, &mut output, "Frequency (Hz)").unwrap();
        let duty: i64 = prompt(&mut input, &mut output, "Duty cycle (%)").unwrap();

        assert_eq!(DutyCycle::new(frequency, duty), DutyCycle::new(1, 100));
    }

    #[test]
    fn prompt_rejects_non_numeric_input() {
        let mut input = io::Cursor::new("seventeen\n");
        let mut output = Vec::new();

        match prompt::<u32, _, _>(&mut input, &mut output, "Pin number") {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("seventeen")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn prompt_rejects_end_of_input() {
        let mut input = io::Cursor::new("");
        let mut output = Vec::new();

        assert!(matches!(
            prompt::<u32, _, _>(&mut input, &mut output, "Chip number"),
            Err(Error::InvalidInput(_))
        ));
    }
}
