//! Shared types for the Moss virtual machine.
//!
//! The engine, the loader, and the runtime memory manager all agree on a
//! small vocabulary: the machine word, the virtual-address convention, and
//! the 8-bit block tag stored in every heap header. This crate is that
//! vocabulary and nothing else.

pub mod tag;
pub mod value;

pub use tag::Tag;
pub use value::{is_pointer_shaped, Value, VALUE_BITS, WORD_BYTES};
