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

use std::env;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use libc::{self, c_void, off_t, size_t, MAP_FAILED, MAP_SHARED, O_SYNC, PROT_READ, PROT_WRITE};
use log::debug;

use crate::gpio::{Error, Result};
use crate::system::PeripheralWindow;

const PATH_DEV_MEM: &str = "/dev/mem";

/// Environment variable that overrides the physical memory device.
pub const ENV_MEM_DEVICE: &str = "PINFLASH_MEM_DEVICE";

/// A bank of 32-bit registers, addressed by their offset in 32-bit units.
pub trait Registers {
    /// Returns the number of registers in the bank.
    fn register_count(&self) -> usize;

    /// Reads the register at `offset`.
    fn read(&self, offset: usize) -> u32;

    /// Writes `value` to the register at `offset`.
    fn write(&self, offset: usize, value: u32);
}

/// Owns the mapping of the GPIO register bank into the process.
///
/// The mapping is created by [`acquire`] and removed exactly once, either by
/// an explicit [`release`] or when the `RegisterMap` is dropped. `release` only
/// touches an atomic and calls `munmap`, which makes it safe to call from a
/// signal handler.
///
/// [`acquire`]: #method.acquire
/// [`release`]: #method.release
pub struct RegisterMap {
    mem_ptr: AtomicPtr<u32>,
    len: usize,
}

impl fmt::Debug for RegisterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterMap")
            .field("mem_ptr", &self.mem_ptr.load(Ordering::Relaxed))
            .field("len", &self.len)
            .finish()
    }
}

impl RegisterMap {
    /// Maps the GPIO registers described by `window` from `/dev/mem`.
    ///
    /// The device can be overridden with the `PINFLASH_MEM_DEVICE` environment
    /// variable.
    pub fn acquire(window: &PeripheralWindow) -> Result<RegisterMap> {
        let device = env::var_os(ENV_MEM_DEVICE)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(PATH_DEV_MEM));

        Self::acquire_device(device, window)
    }

    /// Maps the GPIO registers described by `window` from `device`.
    ///
    /// The file descriptor is closed as soon as the mapping exists.
    pub fn acquire_device<P: AsRef<Path>>(
        device: P,
        window: &PeripheralWindow,
    ) -> Result<RegisterMap> {
        let device = device.as_ref();

        // Opening /dev/mem requires superuser privileges. Report the path, so
        // it's clear which device needs different permissions.
        let mem_file = match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(O_SYNC)
            .open(device)
        {
            Ok(file) => file,
            Err(ref e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(Error::PermissionDenied(device.display().to_string()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mem_ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                window.len() as size_t,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                mem_file.as_raw_fd(),
                window.address() as off_t,
            )
        };

        // Capture errno before close() gets a chance to overwrite it
        let map_err = io::Error::last_os_error();
        drop(mem_file);

        if mem_ptr == MAP_FAILED {
            return Err(Error::Io(map_err));
        }

        debug!(
            "Mapped {} bytes at {:#x} from {}",
            window.len(),
            window.address(),
            device.display()
        );

        Ok(RegisterMap {
            mem_ptr: AtomicPtr::new(mem_ptr as *mut u32),
            len: window.len(),
        })
    }

    /// Returns `true` until the mapping is released.
    pub fn is_mapped(&self) -> bool {
        !self.mem_ptr.load(Ordering::SeqCst).is_null()
    }

    /// Returns the length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the mapping doesn't cover any registers.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Unmaps the register bank.
    ///
    /// Calling `release` when the bank is already unmapped is a no-op. Reads
    /// return 0 and writes are ignored after the bank has been released.
    pub fn release(&self) {
        let mem_ptr = self.mem_ptr.swap(ptr::null_mut(), Ordering::SeqCst);
        if !mem_ptr.is_null() {
            unsafe {
                libc::munmap(mem_ptr as *mut c_void, self.len as size_t);
            }
        }
    }

    #[inline(always)]
    fn register_ptr(&self, offset: usize) -> Option<*mut u32> {
        let mem_ptr = self.mem_ptr.load(Ordering::Relaxed);
        if mem_ptr.is_null() || offset >= self.register_count() {
            None
        } else {
            // SAFETY: offset is within the mapped window.
            Some(unsafe { mem_ptr.add(offset) })
        }
    }
}

impl Registers for RegisterMap {
    #[inline(always)]
    fn register_count(&self) -> usize {
        self.len / std::mem::size_of::<u32>()
    }

    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        match self.register_ptr(offset) {
            Some(reg) => unsafe { ptr::read_volatile(reg) },
            None => 0,
        }
    }

    #[inline(always)]
    fn write(&self, offset: usize, value: u32) {
        if let Some(reg) = self.register_ptr(offset) {
            unsafe {
                ptr::write_volatile(reg, value);
            }
        }
    }
}

impl Drop for RegisterMap {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::fs::{self, File};

    // A regular file stands in for /dev/mem. MAP_SHARED writes end up in
    // the page cache, so they're visible through fs::read().
    pub(crate) fn backing_file(name: &str, len: u64) -> PathBuf {
        let path = env::temp_dir().join(format!("pinflash-{}-{}", std::process::id(), name));
        let file = File::create(&path).unwrap();
        file.set_len(len).unwrap();

        path
    }

    fn word(bytes: &[u8], offset: usize) -> u32 {
        let start = offset * 4;
        u32::from_ne_bytes([
            bytes[start],
            bytes[start + 1],
            bytes[start + 2],
            bytes[start + 3],
        ])
    }

    #[test]
    fn writes_reach_the_device() {
        let window = PeripheralWindow::default().at_address(0);
        let path = backing_file("writes", window.len() as u64);

        let map = RegisterMap::acquire_device(&path, &window).unwrap();
        assert!(map.is_mapped());
        assert_eq!(map.register_count(), 45);

        map.write(7, 1 << 17);
        map.write(44, 0xdead_beef);
        assert_eq!(map.read(7), 1 << 17);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(word(&bytes, 7), 1 << 17);
        assert_eq!(word(&bytes, 44), 0xdead_beef);

        drop(map);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn out_of_window_access_is_ignored() {
        let window = PeripheralWindow::default().at_address(0);
        let path = backing_file("bounds", 4096);

        let map = RegisterMap::acquire_device(&path, &window).unwrap();
        map.write(45, 0xffff_ffff);
        assert_eq!(map.read(45), 0);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(word(&bytes, 45), 0);

        drop(map);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let window = PeripheralWindow::default().at_address(0);
        let path = backing_file("release", window.len() as u64);

        let map = RegisterMap::acquire_device(&path, &window).unwrap();
        map.write(0, 0b001);

        map.release();
        assert!(!map.is_mapped());
        map.release();
        assert!(!map.is_mapped());

        // Accesses after release don't touch the old mapping
        map.write(0, 0b111);
        assert_eq!(map.read(0), 0);
        assert_eq!(word(&fs::read(&path).unwrap(), 0), 0b001);

        // Drop runs release a third time
        drop(map);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_device() {
        let window = PeripheralWindow::default();
        let path = env::temp_dir().join(format!("pinflash-{}-missing", std::process::id()));

        match RegisterMap::acquire_device(&path, &window) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
