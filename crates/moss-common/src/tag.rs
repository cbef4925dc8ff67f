//! Block tags.

use std::fmt;

use serde::Serialize;

/// The 8-bit tag stored in the low byte of every heap block header.
///
/// The engine defines what most tags mean. The memory manager itself
/// interprets exactly one value, [`Tag::NONE`], which marks a free block;
/// everything else is opaque payload classification it carries around
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Tag(pub u8);

impl Tag {
    /// A heap-allocated string.
    pub const STRING: Tag = Tag(200);
    /// A register frame of the bytecode engine.
    pub const REGISTER_FRAME: Tag = Tag(201);
    /// A function value.
    pub const FUNCTION: Tag = Tag(202);
    /// A free block. Reserved; never handed out by the allocator.
    pub const NONE: Tag = Tag(255);
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            200 => write!(f, "string"),
            201 => write!(f, "register-frame"),
            202 => write!(f, "function"),
            255 => write!(f, "none"),
            other => write!(f, "tag({other})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_display_named_variants() {
        assert_eq!(Tag::STRING.to_string(), "string");
        assert_eq!(Tag::REGISTER_FRAME.to_string(), "register-frame");
        assert_eq!(Tag::FUNCTION.to_string(), "function");
        assert_eq!(Tag::NONE.to_string(), "none");
    }

    #[test]
    fn tag_display_engine_defined_variants() {
        assert_eq!(Tag(7).to_string(), "tag(7)");
        assert_eq!(Tag(0).to_string(), "tag(0)");
    }

    #[test]
    fn tags_fit_in_a_header_byte() {
        assert_eq!(Tag::NONE.0, 255);
        assert_ne!(Tag::STRING, Tag::FUNCTION);
    }
}
