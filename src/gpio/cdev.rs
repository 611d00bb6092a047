//! Minimal gpiochip character device client.
//!
//! Covers just enough of the GPIO v2 uAPI to claim a single line and drive it:
//! open a chip, pick a line, request it, and set its value. A requested line
//! stays claimed until its [`LineHandle`] is dropped.
//!
//! ```no_run
//! use pinflash::gpio::cdev::{Chip, Direction};
//! use pinflash::gpio::Level;
//!
//! # fn main() -> pinflash::gpio::Result<()> {
//! let chip = Chip::open(0)?;
//! let mut led = chip.line(23)?.request("pinflash", Direction::Output, Level::Low)?;
//! led.set_value(Level::High)?;
//! # Ok(())
//! # }
//! ```
//!
//! [`LineHandle`]: struct.LineHandle.html

#![allow(clippy::unnecessary_cast)]

use std::ffi::CString;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use libc::{self, c_int};
use log::debug;

use crate::gpio::{Error, Level, Result};

#[cfg(target_env = "gnu")]
type IoctlLong = libc::c_ulong;
#[cfg(target_env = "musl")]
type IoctlLong = c_int;

const PATH_GPIOCHIP: &str = "/dev/gpiochip";

const BITS_NR: u8 = 8;
const BITS_TYPE: u8 = 8;
const BITS_SIZE: u8 = 14;

const SHIFT_NR: u8 = 0;
const SHIFT_TYPE: u8 = SHIFT_NR + BITS_NR;
const SHIFT_SIZE: u8 = SHIFT_TYPE + BITS_TYPE;
const SHIFT_DIR: u8 = SHIFT_SIZE + BITS_SIZE;

const DIR_WRITE: IoctlLong = 1 << SHIFT_DIR;
const DIR_READ: IoctlLong = 2 << SHIFT_DIR;
const DIR_READ_WRITE: IoctlLong = DIR_READ | DIR_WRITE;

const TYPE_GPIO: IoctlLong = (0xB4 as IoctlLong) << SHIFT_TYPE;

const NR_GET_CHIP_INFO: IoctlLong = 0x01 << SHIFT_NR;
const NR_GET_LINE: IoctlLong = 0x07 << SHIFT_NR;
const NR_LINE_GET_VALUES: IoctlLong = 0x0E << SHIFT_NR;
const NR_LINE_SET_VALUES: IoctlLong = 0x0F << SHIFT_NR;

const SIZE_CHIP_INFO: IoctlLong = (mem::size_of::<ChipInfo>() as IoctlLong) << SHIFT_SIZE;
const SIZE_LINE_REQUEST: IoctlLong = (mem::size_of::<LineRequest>() as IoctlLong) << SHIFT_SIZE;
const SIZE_LINE_VALUES: IoctlLong = (mem::size_of::<LineValues>() as IoctlLong) << SHIFT_SIZE;

const GPIO_GET_CHIPINFO_IOCTL: IoctlLong = DIR_READ | TYPE_GPIO | NR_GET_CHIP_INFO | SIZE_CHIP_INFO;
const GPIO_V2_GET_LINE_IOCTL: IoctlLong =
    DIR_READ_WRITE | TYPE_GPIO | NR_GET_LINE | SIZE_LINE_REQUEST;
const GPIO_V2_LINE_GET_VALUES_IOCTL: IoctlLong =
    DIR_READ_WRITE | TYPE_GPIO | NR_LINE_GET_VALUES | SIZE_LINE_VALUES;
const GPIO_V2_LINE_SET_VALUES_IOCTL: IoctlLong =
    DIR_READ_WRITE | TYPE_GPIO | NR_LINE_SET_VALUES | SIZE_LINE_VALUES;

// Maximum name and label length, including the NUL terminator.
const NAME_BUFSIZE: usize = 32;
const LABEL_BUFSIZE: usize = 32;

// Maximum number of requested lines.
const LINES_MAX: usize = 64;
// Maximum number of configuration attributes.
const LINE_NUM_ATTRS_MAX: usize = 10;

const LINE_FLAG_INPUT: u64 = 0x04;
const LINE_FLAG_OUTPUT: u64 = 0x08;

const LINE_ATTR_ID_OUTPUT_VALUES: u32 = 2;

#[derive(Copy, Clone)]
#[repr(C)]
struct ChipInfo {
    name: [u8; NAME_BUFSIZE],
    label: [u8; LABEL_BUFSIZE],
    lines: u32,
}

impl ChipInfo {
    fn new(cdev_fd: c_int) -> io::Result<ChipInfo> {
        let mut chip_info = ChipInfo {
            name: [0u8; NAME_BUFSIZE],
            label: [0u8; LABEL_BUFSIZE],
            lines: 0,
        };

        parse_retval!(unsafe { libc::ioctl(cdev_fd, GPIO_GET_CHIPINFO_IOCTL, &mut chip_info) })?;

        Ok(chip_info)
    }
}

#[derive(Copy, Clone, Default)]
#[repr(C)]
struct LineAttribute {
    id: u32,
    padding: u32,
    values: u64,
}

#[derive(Copy, Clone, Default)]
#[repr(C)]
struct LineConfigAttribute {
    attr: LineAttribute,
    mask: u64,
}

#[derive(Copy, Clone, Default)]
#[repr(C)]
struct LineConfig {
    flags: u64,
    num_attrs: u32,
    padding: [u32; 5],
    attrs: [LineConfigAttribute; LINE_NUM_ATTRS_MAX],
}

#[derive(Clone)]
#[repr(C)]
struct LineRequest {
    offsets: [u32; LINES_MAX],
    consumer: [u8; LABEL_BUFSIZE],
    config: LineConfig,
    num_lines: u32,
    event_buffer_size: u32,
    padding: [u32; 5],
    fd: c_int,
}

impl Default for LineRequest {
    fn default() -> Self {
        Self {
            offsets: [0u32; LINES_MAX],
            consumer: [0u8; LABEL_BUFSIZE],
            config: Default::default(),
            num_lines: 0,
            event_buffer_size: 0,
            padding: [0u32; 5],
            fd: 0,
        }
    }
}

#[derive(Copy, Clone, Default)]
#[repr(C)]
struct LineValues {
    bits: u64,
    mask: u64,
}

/// Line direction.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Direction {
    Input,
    Output,
}

/// An open gpiochip character device.
pub struct Chip {
    file: File,
    path: PathBuf,
    info: ChipInfo,
}

impl fmt::Debug for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chip")
            .field("path", &self.path)
            .field("name", &cbuf_to_cstring(&self.info.name))
            .field("label", &cbuf_to_cstring(&self.info.label))
            .field("lines", &self.info.lines)
            .finish()
    }
}

impl Chip {
    /// Opens `/dev/gpiochip{chip}`.
    pub fn open(chip: u32) -> Result<Chip> {
        Self::open_path(format!("{}{}", PATH_GPIOCHIP, chip))
    }

    /// Opens the gpiochip device at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Chip> {
        let path = path.as_ref();

        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(ref e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(Error::PermissionDenied(path.display().to_string()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let info = ChipInfo::new(file.as_raw_fd())?;

        debug!(
            "Opened {} ({}, {} lines)",
            path.display(),
            cbuf_to_string(&info.label),
            info.lines
        );

        Ok(Chip {
            file,
            path: path.to_path_buf(),
            info,
        })
    }

    /// Returns the chip's kernel name, for instance `gpiochip0`.
    pub fn name(&self) -> String {
        cbuf_to_string(&self.info.name)
    }

    /// Returns the chip's label, usually the name of its driver.
    pub fn label(&self) -> String {
        cbuf_to_string(&self.info.label)
    }

    /// Returns the number of lines exposed by the chip.
    pub fn lines(&self) -> u32 {
        self.info.lines
    }

    /// Returns the line at `offset`.
    ///
    /// Returns `Err(`[`Error::PinNotAvailable`]`)` if the chip doesn't have that many lines.
    ///
    /// [`Error::PinNotAvailable`]: ../enum.Error.html#variant.PinNotAvailable
    pub fn line(&self, offset: u32) -> Result<Line<'_>> {
        if offset >= self.info.lines {
            return Err(Error::PinNotAvailable(offset));
        }

        Ok(Line { chip: self, offset })
    }
}

/// A single, not yet requested, line on a [`Chip`].
///
/// [`Chip`]: struct.Chip.html
#[derive(Debug, Copy, Clone)]
pub struct Line<'a> {
    chip: &'a Chip,
    offset: u32,
}

impl<'a> Line<'a> {
    /// Returns the line's offset on its chip.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Claims the line.
    ///
    /// `consumer` is visible to other processes that inspect the line, and is
    /// truncated to 31 bytes. `initial` is only used for outputs.
    pub fn request(
        &self,
        consumer: &str,
        direction: Direction,
        initial: Level,
    ) -> Result<LineHandle> {
        let mut line_request = LineRequest::default();
        line_request.offsets[0] = self.offset;
        line_request.num_lines = 1;
        line_request.consumer = consumer_label(consumer);

        match direction {
            Direction::Input => line_request.config.flags = LINE_FLAG_INPUT,
            Direction::Output => {
                line_request.config.flags = LINE_FLAG_OUTPUT;
                line_request.config.num_attrs = 1;
                line_request.config.attrs[0].attr.id = LINE_ATTR_ID_OUTPUT_VALUES;
                line_request.config.attrs[0].attr.values = initial as u64;
                line_request.config.attrs[0].mask = 0x01;
            }
        }

        parse_retval!(unsafe {
            libc::ioctl(
                self.chip.file.as_raw_fd(),
                GPIO_V2_GET_LINE_IOCTL,
                &mut line_request,
            )
        })
        .map_err(|source| Error::LineRequest {
            line: self.offset,
            source,
        })?;

        // If the fd is zero or negative, an error occurred
        if line_request.fd <= 0 {
            return Err(Error::LineRequest {
                line: self.offset,
                source: io::Error::last_os_error(),
            });
        }

        debug!(
            "Requested line {} on {} as {:?}",
            self.offset,
            self.chip.path.display(),
            direction
        );

        Ok(LineHandle {
            fd: line_request.fd,
            offset: self.offset,
        })
    }
}

/// A claimed line. The line is released when the `LineHandle` is dropped.
#[derive(Debug)]
pub struct LineHandle {
    fd: c_int,
    offset: u32,
}

impl LineHandle {
    /// Returns the line's offset on its chip.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Drives the line to `level`.
    pub fn set_value(&mut self, level: Level) -> Result<()> {
        set_value(self.fd, level)?;

        Ok(())
    }

    /// Reads the line's current level.
    pub fn value(&self) -> Result<Level> {
        let mut line_values = LineValues::default();
        line_values.mask = 0x01;

        parse_retval!(unsafe {
            libc::ioctl(self.fd, GPIO_V2_LINE_GET_VALUES_IOCTL, &mut line_values)
        })?;

        Ok(Level::from((line_values.bits & 0x01) as u8))
    }

    fn close(&mut self) {
        if self.fd > 0 {
            unsafe {
                libc::close(self.fd);
            }

            self.fd = 0;
        }
    }
}

impl AsRawFd for LineHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for LineHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// Sets the value of the first line of a line request. Only issues an ioctl,
// so it's also used from the signal handler.
pub(crate) fn set_value(line_fd: c_int, level: Level) -> io::Result<()> {
    let mut line_values = LineValues {
        bits: level as u64,
        mask: 0x01,
    };

    parse_retval!(unsafe {
        libc::ioctl(line_fd, GPIO_V2_LINE_SET_VALUES_IOCTL, &mut line_values)
    })?;

    Ok(())
}

// Leaves room for the NUL terminator
fn consumer_label(consumer: &str) -> [u8; LABEL_BUFSIZE] {
    let mut label = [0u8; LABEL_BUFSIZE];
    let len = consumer.len().min(LABEL_BUFSIZE - 1);
    label[..len].copy_from_slice(&consumer.as_bytes()[..len]);

    label
}

// Create a CString from a C-style NUL-terminated char array. This workaround
// is needed for fixed-length buffers that fill the remaining bytes with NULs,
// because CString::new() interprets those as a NUL in the middle of the byte
// slice and returns a NulError.
fn cbuf_to_cstring(buf: &[u8]) -> CString {
    CString::new({
        let pos = buf.iter().position(|&c| c == b'\0').unwrap_or(buf.len());
        &buf[..pos]
    })
    .unwrap_or_default()
}

fn cbuf_to_string(buf: &[u8]) -> String {
    cbuf_to_cstring(buf).into_string().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::env;
    use std::fs;

    #[test]
    fn uapi_struct_sizes() {
        assert_eq!(mem::size_of::<ChipInfo>(), 68);
        assert_eq!(mem::size_of::<LineConfig>(), 272);
        assert_eq!(mem::size_of::<LineRequest>(), 592);
        assert_eq!(mem::size_of::<LineValues>(), 16);
    }

    #[test]
    fn ioctl_numbers() {
        // Values from <linux/gpio.h>
        assert_eq!(GPIO_GET_CHIPINFO_IOCTL as u32, 0x8044_b401);
        assert_eq!(GPIO_V2_GET_LINE_IOCTL as u32, 0xc250_b407);
        assert_eq!(GPIO_V2_LINE_GET_VALUES_IOCTL as u32, 0xc010_b40e);
        assert_eq!(GPIO_V2_LINE_SET_VALUES_IOCTL as u32, 0xc010_b40f);
    }

    #[test]
    fn consumer_label_is_truncated() {
        let label = consumer_label("pinpwm");
        assert_eq!(&label[..7], b"pinpwm\0");

        let label = consumer_label(&"x".repeat(40));
        assert_eq!(label[30], b'x');
        assert_eq!(label[31], 0);
        assert_eq!(cbuf_to_string(&label).len(), 31);
    }

    #[test]
    fn missing_chip() {
        let path = env::temp_dir().join(format!("pinflash-{}-gpiochip", std::process::id()));

        match Chip::open_path(&path) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn not_a_chip() {
        let path = env::temp_dir().join(format!("pinflash-{}-notachip", std::process::id()));
        fs::write(&path, b"").unwrap();

        // Regular files don't support the chip info ioctl
        assert!(matches!(Chip::open_path(&path), Err(Error::Io(_))));

        fs::remove_file(path).unwrap();
    }
}
