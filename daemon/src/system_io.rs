// This file is part of fpgahpd, a daemon that manages image reload of hot-pluggable FPGA cards over PCIe.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// fpgahpd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// fpgahpd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Error Wrapping File System I/O Helpers
//!
//! Convenient wrappers around standard Rust file system operations, with
//! automatic conversion to `FpgahpError` types. All functions include trace
//! logging and provide detailed error context including file paths and
//! operation types.
//!
//! Includes: whole-file read/write (sysfs attributes), offset read/write
//! (PCI configuration space files), and directory listing.

use crate::error::FpgahpError;
use log::trace;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Read the contents of a file to a String.
///
/// # Returns: `Result<String, FpgahpError>`
/// * `Ok(String)` - The complete contents of the file
/// * `Err(FpgahpError::IORead)` - If the file cannot be read
pub fn fs_read(file_path: &Path) -> Result<String, FpgahpError> {
    trace!("Attempting to read from {file_path:?}");
    let mut buf: String = String::new();
    let result = OpenOptions::new()
        .read(true)
        .open(file_path)
        .and_then(|mut f| f.read_to_string(&mut buf));

    match result {
        Ok(_) => {
            trace!("Reading done");
            Ok(buf)
        }
        Err(e) => Err(FpgahpError::IORead {
            file: file_path.into(),
            e,
        }),
    }
}

/// Write a string value to a file.
///
/// Sysfs attribute writes either take the whole value or fail, so there is
/// no create/truncate handling here; the file must already exist.
///
/// # Returns: `Result<(), FpgahpError>`
/// * `Ok(())` - Write succeeded
/// * `Err(FpgahpError::IOWrite)` - If the write fails
pub fn fs_write(file_path: &Path, value: impl AsRef<str>) -> Result<(), FpgahpError> {
    trace!(
        "Attempting to write {:?} to {:?}",
        value.as_ref(),
        file_path
    );
    let result = OpenOptions::new()
        .read(false)
        .write(true)
        .open(file_path)
        .and_then(|mut f| write!(f, "{}", value.as_ref()));
    match result {
        Ok(_) => {
            trace!("Write done.");
            Ok(())
        }
        Err(e) => Err(FpgahpError::IOWrite {
            data: value.as_ref().to_string(),
            file: file_path.into(),
            e,
        }),
    }
}

/// Read exactly `buf.len()` bytes from `file_path` starting at `offset`.
///
/// Used for the binary `config` file of a PCI device, which exposes the
/// device's configuration space and supports positioned reads.
///
/// # Returns: `Result<(), FpgahpError>`
/// * `Ok(())` - `buf` holds the bytes at `offset`
/// * `Err(FpgahpError::IORead)` - Open, seek or read failed
pub fn fs_read_at(file_path: &Path, offset: u64, buf: &mut [u8]) -> Result<(), FpgahpError> {
    trace!("Attempting to read {} bytes at {offset:#x} from {file_path:?}", buf.len());
    let result = OpenOptions::new()
        .read(true)
        .open(file_path)
        .and_then(|mut f| {
            f.seek(SeekFrom::Start(offset))?;
            f.read_exact(buf)
        });
    match result {
        Ok(_) => Ok(()),
        Err(e) => Err(FpgahpError::IORead {
            file: file_path.into(),
            e,
        }),
    }
}

/// Write `data` to `file_path` starting at `offset`.
///
/// Counterpart of [`fs_read_at`] for read-modify-write cycles on PCI
/// configuration space registers.
///
/// # Returns: `Result<(), FpgahpError>`
/// * `Ok(())` - Write succeeded
/// * `Err(FpgahpError::IOWrite)` - Open, seek or write failed
pub fn fs_write_at(file_path: &Path, offset: u64, data: &[u8]) -> Result<(), FpgahpError> {
    trace!("Attempting to write {data:?} at {offset:#x} to {file_path:?}");
    let result = OpenOptions::new()
        .write(true)
        .open(file_path)
        .and_then(|mut f| {
            f.seek(SeekFrom::Start(offset))?;
            f.write_all(data)
        });
    match result {
        Ok(_) => {
            trace!("Write done.");
            Ok(())
        }
        Err(e) => Err(FpgahpError::IOWrite {
            data: format!("{data:?}"),
            file: file_path.into(),
            e,
        }),
    }
}

/// Read the contents of a directory and return entry names.
///
/// Entries that cannot be read are silently skipped.
///
/// # Returns: `Result<Vec<String>, FpgahpError>`
/// * `Ok(Vec<String>)` - List of entry names in the directory
/// * `Err(FpgahpError::IOReadDir)` - If the directory cannot be read
pub fn fs_read_dir(dir: &Path) -> Result<Vec<String>, FpgahpError> {
    trace!("Attempting to read directory '{dir:?}'");
    std::fs::read_dir(dir).map_or_else(
        |e| {
            Err(FpgahpError::IOReadDir {
                dir: dir.to_owned(),
                e,
            })
        },
        |iter| {
            let ret = iter
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            trace!("Dir reading done.");
            Ok(ret)
        },
    )
}
