//! The Moss heap: region, allocator, and collector state.
//!
//! One contiguous buffer of words holds everything, low to high:
//!
//! ```text
//! +----------------+--------+--------------------------------+
//! | engine prefix  | bitmap | heap proper                    |
//! +----------------+--------+--------------------------------+
//! 0                         heap_start                       end
//! ```
//!
//! The engine reserves the prefix for code and statics, then hands the
//! rest over with [`Memory::set_heap_start`]. The bitmap is carved from
//! the front of that remainder (one bit per heap word), and the heap
//! proper starts as a single giant free block.
//!
//! "Physical" pointers are word indices into the buffer. Inter-block
//! references stored inside payloads are virtual addresses: byte offsets
//! from the region base, 0 meaning null.

mod bitmap;
mod freelist;
mod gc;
mod header;

use log::{debug, trace};
use serde::Serialize;

use moss_common::{Tag, Value, WORD_BYTES};

use crate::engine::Engine;
use self::freelist::FreeLists;
use self::header::HEADER_SIZE;

pub use self::freelist::NUM_FREE_LISTS;

/// Counters accumulated across collection cycles.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Completed mark-sweep cycles.
    pub collections: u64,
    /// Words of unreachable blocks (headers included) returned to the
    /// free lists, summed over all cycles.
    pub words_reclaimed: u64,
}

/// A snapshot of one heap block, produced by [`Memory::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Word index of the header.
    pub header: usize,
    /// Tag stored in the header.
    pub tag: Tag,
    /// Size field as stored; a block requested with size 0 keeps the 0.
    pub size: Value,
    /// Payload words the block occupies (the stored size, 0 normalized
    /// to 1).
    pub payload_words: Value,
}

/// The memory manager of the Moss VM.
///
/// Owns the region between [`Memory::setup`] and [`Memory::cleanup`].
/// Single-threaded by design: the engine is the only caller, and the only
/// suspension point it observes is [`Memory::allocate`], which may run a
/// full collection internally.
pub struct Memory {
    /// The whole region, zero-initialized at setup.
    buf: Vec<Value>,
    /// First word of the bitmap. Meaningless until the heap is set up.
    bitmap_start: usize,
    /// First word of the heap proper. 0 until `set_heap_start` runs; the
    /// bitmap in front guarantees a real heap never starts at 0.
    heap_start: usize,
    free_lists: FreeLists,
    stats: GcStats,
}

impl Memory {
    /// Allocate a zeroed region of `total_byte_size` bytes.
    ///
    /// Refusal by the host allocator is fatal and goes through
    /// [`Engine::fail`].
    pub fn setup(total_byte_size: usize, engine: &impl Engine) -> Self {
        let words = total_byte_size / WORD_BYTES as usize;
        let mut buf = Vec::new();
        if buf.try_reserve_exact(words).is_err() {
            engine.fail(format_args!(
                "cannot allocate {total_byte_size} bytes of memory"
            ));
        }
        buf.resize(words, 0);
        debug!("memory region ready: {words} words");
        Memory {
            buf,
            bitmap_start: 0,
            heap_start: 0,
            free_lists: FreeLists::new(),
            stats: GcStats::default(),
        }
    }

    /// Hand the words from `heap_start` upward to the memory manager.
    ///
    /// Called once, after the engine has reserved its prefix. Carves the
    /// bitmap out of the front of the remainder, then seeds the free
    /// lists with one giant free block covering the heap proper. The
    /// block goes straight onto the variable-size list; the fixed-size
    /// classes only ever receive split residues and swept blocks.
    pub fn set_heap_start(&mut self, heap_start: usize) {
        assert!(self.heap_start == 0, "heap start already set");
        assert!(
            heap_start < self.buf.len(),
            "heap start {heap_start} is outside the region"
        );
        let heap_size = self.buf.len() - heap_start;
        assert!(heap_size > 2, "heap of {heap_size} words is too small");

        let bitmap_words = heap_size.div_ceil(moss_common::VALUE_BITS as usize);
        self.bitmap_start = heap_start;
        self.heap_start = heap_start + bitmap_words;
        self.buf[self.bitmap_start..self.heap_start].fill(0);

        let first = self.heap_start;
        let payload = (self.buf.len() - first - HEADER_SIZE) as Value;
        self.buf[first] = header::pack(Tag::NONE, payload);
        self.enlist(freelist::VAR_LIST, first);
        debug!(
            "heap ready: {bitmap_words} bitmap words, free block of {payload} words at {first}"
        );
    }

    /// Release the region and reset all state.
    ///
    /// Dropping the `Memory` releases the region too; this exists for
    /// engines that keep the manager alive across VM runs.
    pub fn cleanup(&mut self) {
        assert!(!self.buf.is_empty(), "cleanup before setup");
        self.buf = Vec::new();
        self.bitmap_start = 0;
        self.heap_start = 0;
        self.free_lists = FreeLists::new();
        self.stats = GcStats::default();
    }

    /// Reserve a block of `size` payload words and return its payload
    /// pointer.
    ///
    /// A request for 0 words still occupies one payload word (the free
    /// list threads its next pointer through it), but the header records
    /// the 0 the caller asked for. When no free block fits, a collection
    /// runs and the search retries; a second miss is fatal.
    pub fn allocate(&mut self, tag: Tag, size: Value, engine: &impl Engine) -> usize {
        assert!(self.heap_start != 0, "allocate before set_heap_start");
        let wanted = size.max(1);

        let block = match self.find_free_block(wanted) {
            Some(block) => block,
            None => {
                self.collect(engine);
                match self.find_free_block(wanted) {
                    Some(block) => block,
                    None => engine.fail(format_args!(
                        "cannot allocate block of {size} words"
                    )),
                }
            }
        };

        self.buf[block] = header::pack(tag, size);
        self.set_bit(block);
        trace!("allocated {wanted} words tagged {tag} at {block}");
        block + HEADER_SIZE
    }

    /// Payload size of the block behind payload pointer `p`. A stored 0
    /// is reported as 1.
    pub fn block_size(&self, p: usize) -> Value {
        header::payload_words(self.buf[p - HEADER_SIZE])
    }

    /// Tag of the block behind payload pointer `p`.
    pub fn block_tag(&self, p: usize) -> Tag {
        header::unpack_tag(self.buf[p - HEADER_SIZE])
    }

    /// First word of the region. The arena base is index 0, which is also
    /// what virtual address 0 resolves to.
    pub fn start(&self) -> usize {
        0
    }

    /// One past the last word of the region.
    pub fn end(&self) -> usize {
        self.buf.len()
    }

    /// First word of the heap proper (past the bitmap).
    pub fn heap_start(&self) -> usize {
        self.heap_start
    }

    /// Read the word at index `p`. Panics if `p` is outside the region.
    pub fn word(&self, p: usize) -> Value {
        self.buf[p]
    }

    /// Write the word at index `p`. Panics if `p` is outside the region.
    pub fn set_word(&mut self, p: usize, v: Value) {
        self.buf[p] = v;
    }

    /// Collector counters.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Name of the collection strategy.
    pub fn identity() -> &'static str {
        "GC: Mark and Sweep"
    }

    /// Walk the heap block by block, in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        assert!(self.heap_start != 0, "blocks before set_heap_start");
        Blocks {
            mem: self,
            curr: self.heap_start,
        }
    }

    /// Render the heap as one line per block, in address order.
    pub fn dump_heap(&self) -> String {
        let lines: Vec<String> = self
            .blocks()
            .map(|b| format!("@{} size={} tag={}", b.header, b.payload_words, b.tag))
            .collect();
        lines.join("\n")
    }

    /// Render every non-empty free list with its blocks in queue order.
    pub fn dump_free_lists(&self) -> String {
        let mut lines = Vec::new();
        for class in 0..NUM_FREE_LISTS {
            let blocks = self.free_list_blocks(class);
            if blocks.is_empty() {
                continue;
            }
            let entries: Vec<String> = blocks
                .iter()
                .map(|&b| format!("@{}({})", b, header::payload_words(self.buf[b])))
                .collect();
            lines.push(format!("list {class}: {}", entries.join(" ")));
        }
        lines.join("\n")
    }

    /// Word index for a virtual address. The caller is responsible for
    /// the address being in range; the conversion itself is pure
    /// arithmetic.
    #[inline]
    fn virt_to_phys(&self, v: Value) -> usize {
        debug_assert!(v % WORD_BYTES == 0, "unaligned virtual address {v}");
        (v / WORD_BYTES) as usize
    }

    /// Virtual address for a word index inside the region.
    #[inline]
    fn phys_to_virt(&self, p: usize) -> Value {
        debug_assert!(p <= self.buf.len());
        p as Value * WORD_BYTES
    }
}

/// Iterator over heap blocks in address order. Relies on every header
/// carrying a truthful size, which allocate, split, coalesce, and sweep
/// maintain.
pub struct Blocks<'a> {
    mem: &'a Memory,
    curr: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.curr >= self.mem.buf.len() {
            return None;
        }
        let word = self.mem.buf[self.curr];
        let info = BlockInfo {
            header: self.curr,
            tag: header::unpack_tag(word),
            size: header::unpack_size(word),
            payload_words: header::payload_words(word),
        };
        self.curr += info.payload_words as usize + HEADER_SIZE;
        Some(info)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::fmt;

    use crate::engine::Engine;

    /// Engine stub with settable roots. `fail` panics instead of aborting
    /// so tests can observe the fatal path.
    pub struct StubEngine {
        pub input: usize,
        pub output: usize,
        pub local: usize,
    }

    impl StubEngine {
        pub fn new() -> Self {
            StubEngine {
                input: 0,
                output: 0,
                local: 0,
            }
        }
    }

    impl Engine for StubEngine {
        fn input_base(&self) -> usize {
            self.input
        }

        fn output_base(&self) -> usize {
            self.output
        }

        fn local_base(&self) -> usize {
            self.local
        }

        fn fail(&self, msg: fmt::Arguments<'_>) -> ! {
            panic!("{msg}");
        }
    }
}
