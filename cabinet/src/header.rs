use crate::{
    Ptr,
    bytes::{read_ptr_at, read_u32_at, read_u8_at, write_ptr_at, write_u32_at, write_u8_at},
    ptr::align8,
};

/// Object type tag stored in byte 0 of the header.
///
/// Tag 0 is never written by a constructor: it is what zero-filled memory
/// (a fresh drawer, or space allocated after a snapshot was taken) reads as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    Unallocated = 0,
    Integer,
    Float,
    Boolean,
    Str,
    Array,
    Hash,
    Closure,
    CompiledFunction,
    Error,
    Schema,
    Struct,
    Upvalue,
    Module,
    Resource,
    Pointer,
    Builtin,
}

impl ObjectType {
    pub const COUNT: usize = Self::Builtin as usize + 1;

    pub fn from_tag(tag: u8) -> Option<Self> {
        use ObjectType::*;
        const ALL: [ObjectType; ObjectType::COUNT] = [
            Unallocated,
            Integer,
            Float,
            Boolean,
            Str,
            Array,
            Hash,
            Closure,
            CompiledFunction,
            Error,
            Schema,
            Struct,
            Upvalue,
            Module,
            Resource,
            Pointer,
            Builtin,
        ];
        ALL.get(tag as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unallocated => "unallocated",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Str => "string",
            Self::Array => "array",
            Self::Hash => "hash",
            Self::Closure => "closure",
            Self::CompiledFunction => "compiled function",
            Self::Error => "error",
            Self::Schema => "schema",
            Self::Struct => "struct",
            Self::Upvalue => "upvalue",
            Self::Module => "module",
            Self::Resource => "resource",
            Self::Pointer => "pointer",
            Self::Builtin => "builtin",
        }
    }
}

/// The 16-byte prefix of every heap object.
///
/// ```text
/// byte 0:     type tag
/// bytes 1..4: zero
/// bytes 4..8: size (u32, whole object including header, multiple of 8)
/// bytes 8..16: forwarding Ptr, reserved for a copying collector, always 0
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: u8,
    pub size: u32,
    pub forwarding: Ptr,
}

impl Header {
    pub const SIZE: usize = 16;

    const TAG: usize = 0;
    const SIZE_FIELD: usize = 4;
    const FORWARDING: usize = 8;

    /// Header for an object whose payload is `payload` bytes.
    pub fn new(object_type: ObjectType, payload: usize) -> Self {
        Self {
            tag: object_type as u8,
            size: align8(Self::SIZE + payload) as u32,
            forwarding: Ptr::NULL,
        }
    }

    pub fn object_type(&self) -> Option<ObjectType> {
        ObjectType::from_tag(self.tag)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        write_u8_at(buf, Self::TAG, self.tag);
        buf[1..4].fill(0);
        write_u32_at(buf, Self::SIZE_FIELD, self.size);
        write_ptr_at(buf, Self::FORWARDING, self.forwarding);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: read_u8_at(buf, Self::TAG),
            size: read_u32_at(buf, Self::SIZE_FIELD),
            forwarding: read_ptr_at(buf, Self::FORWARDING),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in 0..ObjectType::COUNT as u8 {
            let ty = ObjectType::from_tag(tag).unwrap();
            assert_eq!(ty as u8, tag);
        }
        assert_eq!(ObjectType::from_tag(ObjectType::COUNT as u8), None);
        assert_eq!(ObjectType::from_tag(0xFF), None);
    }

    #[test]
    fn size_includes_header_and_is_aligned() {
        let h = Header::new(ObjectType::Str, 4 + 5);
        assert_eq!(h.size, 32);
        let h = Header::new(ObjectType::Integer, 8);
        assert_eq!(h.size, 24);
    }

    #[test]
    fn encoding_is_byte_exact() {
        let h = Header::new(ObjectType::Boolean, 1);
        let mut buf = [0xFFu8; Header::SIZE];
        h.encode(&mut buf);
        assert_eq!(buf[0], ObjectType::Boolean as u8);
        assert_eq!(&buf[1..4], &[0, 0, 0]);
        assert_eq!(&buf[4..8], &24u32.to_le_bytes());
        assert_eq!(&buf[8..16], &[0; 8]);
        assert_eq!(Header::decode(&buf), h);
    }
}
