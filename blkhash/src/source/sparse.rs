//! Sparse-file hole detection via `SEEK_DATA`/`SEEK_HOLE` (spec.md §4.5a).
//!
//! No crate in the workspace wraps this syscall pair, so we call it
//! directly through `libc`, the same way the workspace's `fuse`
//! integration reaches for raw POSIX primitives it has no safe wrapper
//! for.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// One alternating data/hole run, in strictly increasing offset order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub offset: u64,
    pub length: u64,
    pub is_data: bool,
}

/// Walk `file` from `start` to `file_len` using `lseek(SEEK_DATA)` /
/// `lseek(SEEK_HOLE)`, returning alternating data/hole ranges.
///
/// Leaves the file's seek position unspecified; callers must seek
/// explicitly before reading a range. Falls back to one `data` range
/// covering the whole span if the filesystem doesn't support sparse
/// queries at all.
pub fn data_ranges(file: &File, start: u64, file_len: u64) -> io::Result<Vec<Range>> {
    let mut ranges = Vec::new();

    if start >= file_len {
        return Ok(ranges);
    }

    if !supports_seek_hole(file)? {
        ranges.push(Range {
            offset: start,
            length: file_len - start,
            is_data: true,
        });
        return Ok(ranges);
    }

    let mut pos = start;
    while pos < file_len {
        let data_start = match seek(file, pos as i64, libc::SEEK_DATA) {
            Ok(off) => (off as u64).min(file_len),
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => file_len,
            Err(e) => return Err(e),
        };

        if data_start > pos {
            ranges.push(Range {
                offset: pos,
                length: data_start - pos,
                is_data: false,
            });
        }
        if data_start >= file_len {
            break;
        }

        let hole_start = match seek(file, data_start as i64, libc::SEEK_HOLE) {
            Ok(off) => (off as u64).min(file_len),
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => file_len,
            Err(e) => return Err(e),
        };

        ranges.push(Range {
            offset: data_start,
            length: hole_start - data_start,
            is_data: true,
        });
        pos = hole_start;
    }

    Ok(ranges)
}

fn supports_seek_hole(file: &File) -> io::Result<bool> {
    match seek(file, 0, libc::SEEK_HOLE) {
        Ok(_) => Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(false),
        Err(e) => Err(e),
    }
}

fn seek(file: &File, offset: i64, whence: libc::c_int) -> io::Result<i64> {
    let result = unsafe { libc::lseek(file.as_raw_fd(), offset, whence) };
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}
