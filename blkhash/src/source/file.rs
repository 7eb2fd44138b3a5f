//! Seekable regular-file driver (spec.md §4.5a).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::io::AsRawFd;

use bytes::Bytes;

use crate::cancel::CancellationToken;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::source::{is_all_zero, sparse, DEFAULT_READ_SIZE};

/// Feeds the engine from a seekable regular file using OS hole detection
/// (spec.md §4.5a).
pub struct FileSource {
    file: File,
    len: u64,
    read_size: usize,
    cache: bool,
}

impl FileSource {
    pub fn new(file: File, cache: bool) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            read_size: DEFAULT_READ_SIZE,
            cache,
        })
    }

    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    /// Drive `engine` to completion from this file.
    pub fn run(mut self, engine: &mut Engine, cancel: &CancellationToken) -> Result<()> {
        let ranges = sparse::data_ranges(&self.file, 0, self.len)?;
        let mut buf = vec![0u8; self.read_size];

        for range in ranges {
            cancel.check()?;

            if !range.is_data {
                engine.update_zeros(range.length)?;
                continue;
            }

            self.file.seek(SeekFrom::Start(range.offset))?;
            let mut consumed = 0u64;

            while consumed < range.length {
                cancel.check()?;

                let want = (self.read_size as u64).min(range.length - consumed) as usize;
                let got = read_full_or_eof(&mut self.file, &mut buf[..want])?;
                if got == 0 {
                    return Err(Error::UnexpectedEOF {
                        offset: range.offset + consumed,
                        expected: self.len,
                    });
                }

                let chunk = &buf[..got];
                if is_all_zero(chunk) {
                    engine.update_zeros(got as u64)?;
                } else {
                    engine.update(Bytes::copy_from_slice(chunk))?;
                }

                consumed += got as u64;
            }

            if !self.cache {
                drop_cache(&self.file, range.offset, range.length);
            }
        }

        Ok(())
    }
}

/// Read until `buf` is full or a definitive EOF, looping over short reads
/// (spec.md §7: the only condition recovered locally).
fn read_full_or_eof(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Advisory page-cache drop for a finished range so a large sequential
/// scan doesn't evict the working set (spec.md §4.5a, `--cache` opts
/// out).
fn drop_cache(file: &File, offset: u64, length: u64) {
    unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            length as libc::off_t,
            libc::POSIX_FADV_DONTNEED,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Config;
    use std::io::Write;

    #[test]
    fn dense_file_matches_direct_update() {
        let data: Vec<u8> = (0..500_000u32).map(|i| (i % 241) as u8).collect();

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let mut via_file = Engine::new(Config::default()).unwrap();
        FileSource::new(tmp.reopen().unwrap(), true)
            .unwrap()
            .run(&mut via_file, &CancellationToken::new())
            .unwrap();
        let via_file_digest = via_file.finalize().unwrap();

        let mut via_update = Engine::new(Config::default()).unwrap();
        via_update.update(Bytes::copy_from_slice(&data)).unwrap();
        let via_update_digest = via_update.finalize().unwrap();

        assert_eq!(via_file_digest, via_update_digest);
    }

    #[test]
    fn sparse_hole_matches_explicit_zeros() {
        // S2-style: data, hole, data laid out explicitly as a sparse
        // file, compared against the flat byte-equivalent input.
        let head = vec![7u8; 32 * 1024];
        let hole_len = 1 << 20;
        let tail = vec![9u8; 32 * 1024];

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&head).unwrap();
        tmp.as_file_mut()
            .seek(SeekFrom::Start(head.len() as u64 + hole_len))
            .unwrap();
        tmp.write_all(&tail).unwrap();
        tmp.flush().unwrap();

        let mut via_file = Engine::new(Config::default()).unwrap();
        FileSource::new(tmp.reopen().unwrap(), true)
            .unwrap()
            .run(&mut via_file, &CancellationToken::new())
            .unwrap();
        let via_file_digest = via_file.finalize().unwrap();

        let mut via_flat = Engine::new(Config::default()).unwrap();
        via_flat.update(Bytes::copy_from_slice(&head)).unwrap();
        via_flat.update_zeros(hole_len).unwrap();
        via_flat.update(Bytes::copy_from_slice(&tail)).unwrap();
        let via_flat_digest = via_flat.finalize().unwrap();

        assert_eq!(via_file_digest, via_flat_digest);
    }
}
