//! Wire protocol constants
//!
//! Every structural element of a stream starts with one tag byte. All
//! multi-byte quantities are big-endian.

/// Protocol version written after the stream header
pub const DEFAULT_VERSION: u8 = 1;

/// Highest protocol version this engine reads and writes
pub const MAX_VERSION: u8 = 1;

// ===== Object tags =====

/// Null reference
pub const ID_NULL: u8 = 0x01;
/// Back-reference, one byte distance from the next handle
pub const ID_REPEAT_OBJECT_NEAR: u8 = 0x02;
/// Back-reference, two byte distance from the next handle
pub const ID_REPEAT_OBJECT_NEARISH: u8 = 0x03;
/// Back-reference, four byte absolute handle
pub const ID_REPEAT_OBJECT_FAR: u8 = 0x04;
/// New instance: class descriptor, then instance data
pub const ID_NEW_OBJECT: u8 = 0x05;
/// Prefix marking the next new object as unshared
pub const ID_UNSHARED: u8 = 0x06;
/// Object replaced by an object-table payload
pub const ID_PREDEFINED_OBJECT: u8 = 0x07;

/// Empty string
pub const ID_STRING_EMPTY: u8 = 0x08;
/// String with a one byte UTF-16 length
pub const ID_STRING_SMALL: u8 = 0x09;
/// String with a two byte UTF-16 length
pub const ID_STRING_MEDIUM: u8 = 0x0a;
/// String with a four byte UTF-16 length
pub const ID_STRING_LARGE: u8 = 0x0b;

/// Zero-length array; component descriptor follows
pub const ID_ARRAY_EMPTY: u8 = 0x0c;
/// Array with a one byte length
pub const ID_ARRAY_SMALL: u8 = 0x0d;
/// Array with a two byte length
pub const ID_ARRAY_MEDIUM: u8 = 0x0e;
/// Array with a four byte length
pub const ID_ARRAY_LARGE: u8 = 0x0f;

// ===== Boxed primitives at object positions =====

/// `false`
pub const ID_BOOLEAN_FALSE: u8 = 0x10;
/// `true`
pub const ID_BOOLEAN_TRUE: u8 = 0x11;
/// Byte value follows
pub const ID_BYTE: u8 = 0x12;
/// Short value follows
pub const ID_SHORT: u8 = 0x13;
/// Char (UTF-16 unit) follows
pub const ID_CHAR: u8 = 0x14;
/// Int value follows
pub const ID_INT: u8 = 0x15;
/// Long value follows
pub const ID_LONG: u8 = 0x16;
/// Float value follows
pub const ID_FLOAT: u8 = 0x17;
/// Double value follows
pub const ID_DOUBLE: u8 = 0x18;

// ===== Class descriptors =====

/// Back-reference into the class cache, four byte handle
pub const ID_REPEAT_CLASS: u8 = 0x20;
/// Class replaced by a class-table payload
pub const ID_PREDEFINED_CLASS: u8 = 0x21;
/// Default-serialized class: name, version, flags, fields, superclass
pub const ID_SERIALIZABLE_CLASS: u8 = 0x22;
/// Class writing itself through external hooks: name, version
pub const ID_EXTERNALIZABLE_CLASS: u8 = 0x23;
/// Class written by a registered externalizer: name
pub const ID_EXTERNALIZER_CLASS: u8 = 0x24;
/// Enumeration: name
pub const ID_ENUM_TYPE_CLASS: u8 = 0x25;
/// Array class: dimensions, then element descriptor
pub const ID_ARRAY_CLASS: u8 = 0x26;
/// The built-in string class
pub const ID_STRING_CLASS: u8 = 0x27;
/// Class with no serialization support, used as an array component
pub const ID_PLAIN_CLASS: u8 = 0x28;
/// End of a superclass chain
pub const ID_NO_SUPER: u8 = 0x2f;

/// First primitive class tag; the eight kinds follow in declaration order
pub const ID_PRIM_CLASS_BASE: u8 = 0x30;

// ===== Block data =====

/// Block with a one byte length
pub const ID_START_BLOCK_SMALL: u8 = 0x40;
/// Block with a two byte length
pub const ID_START_BLOCK_MEDIUM: u8 = 0x41;
/// Block with a four byte length
pub const ID_START_BLOCK_LARGE: u8 = 0x42;
/// End of hook-written data
pub const ID_END_BLOCK_DATA: u8 = 0x43;

// ===== Cache control =====

/// Peer must clear its instance cache
pub const ID_CLEAR_INSTANCE_CACHE: u8 = 0x44;
/// Peer must clear its class and instance caches
pub const ID_CLEAR_CLASS_CACHE: u8 = 0x45;

/// Serializable descriptor flag: a custom write hook produced block data
pub const SC_WRITE_HOOK: u8 = 0x01;

/// Pending block bytes that trigger a flush
pub const BLOCK_FLUSH_THRESHOLD: usize = 0x1000;

/// Human-readable tag name for error messages
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        ID_NULL => "null",
        ID_REPEAT_OBJECT_NEAR | ID_REPEAT_OBJECT_NEARISH | ID_REPEAT_OBJECT_FAR => "back-reference",
        ID_NEW_OBJECT => "new object",
        ID_UNSHARED => "unshared prefix",
        ID_PREDEFINED_OBJECT => "predefined object",
        ID_STRING_EMPTY..=ID_STRING_LARGE => "string",
        ID_ARRAY_EMPTY..=ID_ARRAY_LARGE => "array",
        ID_BOOLEAN_FALSE..=ID_DOUBLE => "boxed primitive",
        ID_REPEAT_CLASS..=ID_PLAIN_CLASS | ID_NO_SUPER => "class descriptor",
        0x30..=0x37 => "primitive class",
        ID_START_BLOCK_SMALL..=ID_START_BLOCK_LARGE => "block data",
        ID_END_BLOCK_DATA => "end of block data",
        ID_CLEAR_INSTANCE_CACHE | ID_CLEAR_CLASS_CACHE => "cache clear",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names() {
        assert_eq!(tag_name(ID_STRING_MEDIUM), "string");
        assert_eq!(tag_name(ID_PRIM_CLASS_BASE + 7), "primitive class");
        assert_eq!(tag_name(0xff), "unknown");
    }
}
