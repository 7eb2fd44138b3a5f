//! Source drivers (spec.md §4.5): feed the engine from a file, a pipe, or
//! a networked extent map, sharing the read-size default and the
//! post-read zero scan.

pub mod extent_map;
pub mod file;
pub mod pipe;
pub mod sparse;

pub use extent_map::ExtentMapSource;
pub use file::FileSource;
pub use pipe::PipeSource;

/// Default read buffer size for seekable and pipe sources (spec.md §4.5
/// a/b, "default 256 KiB").
pub const DEFAULT_READ_SIZE: usize = 256 * 1024;

pub(crate) fn is_all_zero(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}
