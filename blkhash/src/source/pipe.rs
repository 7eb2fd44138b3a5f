//! Non-seekable pipe driver (spec.md §4.5b).

use std::io::Read;

use bytes::Bytes;

use crate::cancel::CancellationToken;
use crate::engine::Engine;
use crate::error::Result;
use crate::source::{is_all_zero, DEFAULT_READ_SIZE};

/// Feeds the engine from any non-seekable [`Read`]. Hole detection is
/// unavailable; every byte is delivered as `data`, with the same
/// post-read zero scan the file driver applies (spec.md §4.5b).
pub struct PipeSource<R> {
    reader: R,
    read_size: usize,
}

impl<R: Read> PipeSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            read_size: DEFAULT_READ_SIZE,
        }
    }

    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    /// Drive `engine` to completion from this reader.
    pub fn run(mut self, engine: &mut Engine, cancel: &CancellationToken) -> Result<()> {
        let mut buf = vec![0u8; self.read_size];
        loop {
            cancel.check()?;

            let got = self.reader.read(&mut buf)?;
            if got == 0 {
                break;
            }

            let chunk = &buf[..got];
            if is_all_zero(chunk) {
                engine.update_zeros(got as u64)?;
            } else {
                engine.update(Bytes::copy_from_slice(chunk))?;
            }
        }
        Ok(())
    }
}
