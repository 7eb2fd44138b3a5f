//! Stream accumulators (spec.md §4.2).

use crate::digest::Scratch;

/// One of the `S` ordered accumulators a block's digest is routed into.
///
/// Every `Stream` is owned by exactly one routing slot and updated only by
/// the engine's routing thread (spec.md §5: "Stream accumulators are
/// updated only by the routing thread — each stream has a single-producer
/// update path"), so it needs no internal locking.
pub struct Stream {
    hasher: Scratch,
    #[cfg(debug_assertions)]
    stream_index: usize,
    #[cfg(debug_assertions)]
    streams: usize,
    #[cfg(debug_assertions)]
    next_index: Option<u64>,
}

impl Stream {
    /// `stream_index` is this stream's slot among `streams` total streams
    /// (spec.md §4.2's `stream = block_index mod S`); only used to check
    /// ordering in debug builds.
    pub fn new(
        template: &Scratch,
        #[allow(unused_variables)] stream_index: usize,
        #[allow(unused_variables)] streams: usize,
    ) -> Self {
        Self {
            hasher: template.clone(),
            #[cfg(debug_assertions)]
            stream_index,
            #[cfg(debug_assertions)]
            streams,
            #[cfg(debug_assertions)]
            next_index: None,
        }
    }

    /// Fold a block's digest into this stream's running hash.
    ///
    /// `block_index` is used only to assert strictly increasing order in
    /// debug builds (I2); callers are responsible for the real ordering
    /// guarantee (spec.md §4.2). Blocks routed to a given stream take the
    /// global indices `stream_index, stream_index + S, stream_index + 2S,
    /// …`, not a plain `0, 1, 2, …` sequence.
    pub fn push(&mut self, #[allow(unused_variables)] block_index: u64, block_digest: &[u8]) {
        #[cfg(debug_assertions)]
        {
            let expected = match self.next_index {
                Some(next) => next,
                None => self.stream_index as u64,
            };
            debug_assert_eq!(
                block_index, expected,
                "stream {} received block {block_index} out of order, expected {expected}",
                self.stream_index
            );
            self.next_index = Some(expected + self.streams as u64);
        }
        self.hasher.update(block_digest);
    }

    /// Finalize this stream, consuming it.
    pub fn finish(self) -> Vec<u8> {
        self.hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Primitive;

    #[test]
    fn order_is_enforced_in_debug_builds() {
        // Stream 1 of 4: global block indices 1, 5, 9, ...
        let template = Primitive::Sha256.new_scratch();
        let mut s = Stream::new(&template, 1, 4);
        s.push(1, b"a");
        s.push(5, b"b");
        s.push(9, b"c");
        let _ = s.finish();
    }

    #[test]
    fn single_stream_is_a_plain_sequence() {
        let template = Primitive::Sha256.new_scratch();
        let mut s = Stream::new(&template, 0, 1);
        s.push(0, b"a");
        s.push(1, b"b");
        let _ = s.finish();
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore)]
    #[should_panic]
    fn out_of_order_push_panics_in_debug() {
        let template = Primitive::Sha256.new_scratch();
        let mut s = Stream::new(&template, 1, 4);
        s.push(1, b"a");
        s.push(6, b"b");
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore)]
    #[should_panic]
    fn wrong_first_index_panics_in_debug() {
        let template = Primitive::Sha256.new_scratch();
        let mut s = Stream::new(&template, 3, 4);
        s.push(0, b"a");
    }
}
