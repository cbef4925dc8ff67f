//! Mark and sweep.
//!
//! The bitmap bit is inverted relative to "live": marking *clears* the
//! bit of every reachable block, so when the mark phase is done a set bit
//! identifies an allocated block nothing reached. Sweep reclaims exactly
//! those, rebuilds every free list from scratch, and re-sets the bits of
//! the survivors for the next cycle.

use log::debug;

use moss_common::{is_pointer_shaped, Tag, WORD_BYTES};

use crate::engine::Engine;

use super::header::{self, HEADER_SIZE};
use super::Memory;

impl Memory {
    /// Trace one root.
    ///
    /// `root` is a payload pointer. Anything that does not name an
    /// allocated, untraced block is ignored, which covers out-of-heap
    /// sentinels, payload words that merely look like pointers, and
    /// blocks visited earlier (cycles terminate because the first visit
    /// clears the bit). Traversal uses an explicit work list on the host
    /// heap, so a pointer chain as long as the heap cannot overflow the
    /// call stack.
    pub(super) fn mark(&mut self, root: usize) {
        let mut worklist = vec![root];
        while let Some(p) = worklist.pop() {
            let Some(block) = p.checked_sub(HEADER_SIZE) else {
                continue;
            };
            if !self.is_marked(block) {
                continue;
            }
            self.clear_bit(block);

            let size = header::payload_words(self.buf[block]) as usize;
            for i in 1..=size {
                let child = self.buf[block + i];
                if is_pointer_shaped(child) {
                    worklist.push((child / WORD_BYTES) as usize);
                }
            }
        }
    }

    /// Linear scan of the heap, reclaiming every block whose bit is still
    /// set (allocated but unreachable) or whose tag is already `NONE`.
    ///
    /// Adjacent reclaimed blocks coalesce: the open block absorbs its
    /// neighbour, header word included, and stays open for more. A live
    /// block closes the open one for good, since nothing beyond it can be
    /// adjacent. Returns the words reclaimed from unreachable blocks.
    pub(super) fn sweep(&mut self) -> usize {
        self.free_lists.reset();

        let mut reclaimed = 0;
        // Most recent block turned free but not yet enlisted: still open
        // to absorbing an adjacent successor.
        let mut pending: Option<usize> = None;
        let mut curr = self.heap_start;

        while curr < self.buf.len() {
            let size = header::payload_words(self.buf[curr]);
            let garbage = self.is_marked(curr);

            if garbage || header::unpack_tag(self.buf[curr]) == Tag::NONE {
                if garbage {
                    reclaimed += size as usize + HEADER_SIZE;
                }
                match pending {
                    Some(open) if self.adjacent(open, curr) => {
                        let open_size = header::payload_words(self.buf[open]);
                        self.buf[open] =
                            header::pack(Tag::NONE, open_size + size + HEADER_SIZE as u32);
                    }
                    _ => {
                        if let Some(open) = pending {
                            self.add_to_free_list(open);
                        }
                        self.buf[curr] = header::pack(Tag::NONE, size);
                        self.buf[curr + HEADER_SIZE] = 0;
                        pending = Some(curr);
                    }
                }
                self.clear_bit(curr);
            } else {
                // Survivor: its bit goes back up for the next cycle, and
                // no later block can coalesce across it.
                self.set_bit(curr);
                if let Some(open) = pending.take() {
                    self.add_to_free_list(open);
                }
            }

            curr += size as usize + HEADER_SIZE;
        }

        if let Some(open) = pending {
            self.add_to_free_list(open);
        }
        reclaimed
    }

    /// Whether `second` starts right where `first` ends.
    fn adjacent(&self, first: usize, second: usize) -> bool {
        debug_assert!(first < second);
        first + header::payload_words(self.buf[first]) as usize + HEADER_SIZE == second
    }

    /// Run a full collection: mark from the engine's three base
    /// registers, then sweep.
    pub fn collect(&mut self, engine: &impl Engine) {
        assert!(self.heap_start != 0, "collect before set_heap_start");
        self.mark(engine.input_base());
        self.mark(engine.output_base());
        self.mark(engine.local_base());

        let reclaimed = self.sweep();
        self.stats.collections += 1;
        self.stats.words_reclaimed += reclaimed as u64;
        debug!(
            "gc cycle {}: reclaimed {} words, {} free",
            self.stats.collections,
            reclaimed,
            self.free_words()
        );
    }
}
