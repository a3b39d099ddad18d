//! Decoded heap values and their byte layouts.
//!
//! Each object is a [`Header`] followed by a kind-specific payload; offsets
//! below are from the start of the object.

use crate::{
    Header, ObjectType, Ptr,
    bytes::{
        read_f64_at, read_i64_at, read_ptr_at, read_u8_at, read_u32_at, read_u64_at,
        write_f64_at, write_i64_at, write_ptr_at, write_u8_at, write_u32_at, write_u64_at,
    },
    error::corruption,
};

const PAYLOAD: usize = Header::SIZE;

/// Field offsets from the start of an object.
pub(crate) mod layout {
    use super::PAYLOAD;

    pub const LEN: usize = PAYLOAD;
    /// first element of an Array/Hash, first byte of a String/Error
    pub const ARRAY_ITEMS: usize = PAYLOAD + 8;
    pub const STRING_BYTES: usize = PAYLOAD + 4;

    /// Closure, Schema and Struct: a leading Ptr, then the count.
    pub const HEAD_PTR: usize = PAYLOAD;
    pub const HEADED_LEN: usize = PAYLOAD + 8;
    pub const HEADED_ITEMS: usize = PAYLOAD + 16;

    pub const FN_LOCALS: usize = PAYLOAD;
    pub const FN_PARAMS: usize = PAYLOAD + 4;
    pub const FN_LEN: usize = PAYLOAD + 8;
    pub const FN_CODE: usize = PAYLOAD + 16;

    pub const UPVALUE_CLOSED: usize = PAYLOAD;
    pub const UPVALUE_LOCATION: usize = PAYLOAD + 8;
    pub const UPVALUE_VALUE: usize = PAYLOAD + 16;

    pub const MODULE_NAME: usize = PAYLOAD;
    pub const MODULE_EXPORTS: usize = PAYLOAD + 8;

    pub const RESOURCE_KIND: usize = PAYLOAD;
    pub const RESOURCE_HANDLE: usize = PAYLOAD + 8;
}

use layout::*;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Closure {
    pub function: Ptr,
    pub upvalues: Vec<Ptr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledFunction {
    pub num_locals: u32,
    pub num_params: u32,
    pub instructions: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    pub name: Ptr,
    pub fields: Vec<Ptr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Struct {
    pub schema: Ptr,
    pub fields: Vec<Ptr>,
}

/// A captured variable: open while it still aliases `location`, closed once
/// its value has been copied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Upvalue {
    pub location: Ptr,
    pub closed: Option<Ptr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Module {
    pub name: Ptr,
    pub exports: Ptr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resource {
    pub kind: u32,
    pub handle: u64,
}

/// A heap object decoded out of its bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Zeroed memory.
    Unallocated,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Str(String),
    Array(Vec<Ptr>),
    Hash(Vec<(Ptr, Ptr)>),
    Closure(Closure),
    CompiledFunction(CompiledFunction),
    Error(String),
    Schema(Schema),
    Struct(Struct),
    Upvalue(Upvalue),
    Module(Module),
    Resource(Resource),
    Pointer(Ptr),
    Builtin(u32),
}

impl Object {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Unallocated => ObjectType::Unallocated,
            Self::Integer(_) => ObjectType::Integer,
            Self::Float(_) => ObjectType::Float,
            Self::Boolean(_) => ObjectType::Boolean,
            Self::Str(_) => ObjectType::Str,
            Self::Array(_) => ObjectType::Array,
            Self::Hash(_) => ObjectType::Hash,
            Self::Closure(_) => ObjectType::Closure,
            Self::CompiledFunction(_) => ObjectType::CompiledFunction,
            Self::Error(_) => ObjectType::Error,
            Self::Schema(_) => ObjectType::Schema,
            Self::Struct(_) => ObjectType::Struct,
            Self::Upvalue(_) => ObjectType::Upvalue,
            Self::Module(_) => ObjectType::Module,
            Self::Resource(_) => ObjectType::Resource,
            Self::Pointer(_) => ObjectType::Pointer,
            Self::Builtin(_) => ObjectType::Builtin,
        }
    }

    /// Payload bytes, before the header and alignment padding.
    pub fn payload_size(&self) -> usize {
        match self {
            Self::Unallocated => 0,
            Self::Integer(_) | Self::Float(_) | Self::Pointer(_) => 8,
            Self::Boolean(_) => 1,
            Self::Builtin(_) => 4,
            Self::Str(s) | Self::Error(s) => 4 + s.len(),
            Self::Array(items) => 8 + items.len() * Ptr::SIZE,
            Self::Hash(pairs) => 8 + pairs.len() * 2 * Ptr::SIZE,
            Self::Closure(c) => 16 + c.upvalues.len() * Ptr::SIZE,
            Self::CompiledFunction(f) => 16 + f.instructions.len(),
            Self::Schema(s) => 16 + s.fields.len() * Ptr::SIZE,
            Self::Struct(s) => 16 + s.fields.len() * Ptr::SIZE,
            Self::Upvalue(_) => 24,
            Self::Module(_) | Self::Resource(_) => 16,
        }
    }

    pub fn header(&self) -> Header {
        Header::new(self.object_type(), self.payload_size())
    }

    /// Full object bytes, header included, zero-padded to the header size.
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header();
        let mut buf = vec![0u8; header.size as usize];
        header.encode(&mut buf);
        match self {
            Self::Unallocated => {}
            Self::Integer(v) => write_i64_at(&mut buf, PAYLOAD, *v),
            Self::Float(v) => write_f64_at(&mut buf, PAYLOAD, *v),
            Self::Boolean(v) => write_u8_at(&mut buf, PAYLOAD, *v as u8),
            Self::Str(s) | Self::Error(s) => {
                write_u32_at(&mut buf, LEN, s.len() as u32);
                buf[STRING_BYTES..STRING_BYTES + s.len()].copy_from_slice(s.as_bytes());
            }
            Self::Array(items) => {
                write_u32_at(&mut buf, LEN, items.len() as u32);
                write_ptrs(&mut buf, ARRAY_ITEMS, items);
            }
            Self::Hash(pairs) => {
                write_u32_at(&mut buf, LEN, pairs.len() as u32);
                for (i, (key, value)) in pairs.iter().enumerate() {
                    let at = ARRAY_ITEMS + i * 2 * Ptr::SIZE;
                    write_ptr_at(&mut buf, at, *key);
                    write_ptr_at(&mut buf, at + Ptr::SIZE, *value);
                }
            }
            Self::Closure(c) => write_headed(&mut buf, c.function, &c.upvalues),
            Self::Schema(s) => write_headed(&mut buf, s.name, &s.fields),
            Self::Struct(s) => write_headed(&mut buf, s.schema, &s.fields),
            Self::CompiledFunction(f) => {
                write_u32_at(&mut buf, FN_LOCALS, f.num_locals);
                write_u32_at(&mut buf, FN_PARAMS, f.num_params);
                write_u32_at(&mut buf, FN_LEN, f.instructions.len() as u32);
                buf[FN_CODE..FN_CODE + f.instructions.len()].copy_from_slice(&f.instructions);
            }
            Self::Upvalue(u) => {
                write_u8_at(&mut buf, UPVALUE_CLOSED, u.closed.is_some() as u8);
                write_ptr_at(&mut buf, UPVALUE_LOCATION, u.location);
                write_ptr_at(&mut buf, UPVALUE_VALUE, u.closed.unwrap_or(Ptr::NULL));
            }
            Self::Module(m) => {
                write_ptr_at(&mut buf, MODULE_NAME, m.name);
                write_ptr_at(&mut buf, MODULE_EXPORTS, m.exports);
            }
            Self::Resource(r) => {
                write_u32_at(&mut buf, RESOURCE_KIND, r.kind);
                write_u64_at(&mut buf, RESOURCE_HANDLE, r.handle);
            }
            Self::Pointer(p) => write_ptr_at(&mut buf, PAYLOAD, *p),
            Self::Builtin(i) => write_u32_at(&mut buf, PAYLOAD, *i),
        }
        buf
    }

    /// Decode the object stored at `ptr` from its full bytes.
    ///
    /// Panics through [`corruption`] on an unknown tag or on lengths that do
    /// not fit the header's size.
    pub fn decode(ptr: Ptr, buf: &[u8]) -> Self {
        let header = Header::decode(buf);
        let Some(ty) = header.object_type() else {
            corruption(ptr, header.tag, "a known object tag");
        };
        let size = buf.len();
        let need = |end: usize, what: &str| {
            if end > size {
                corruption(ptr, header.tag, what);
            }
        };

        need(PAYLOAD + fixed_payload(ty), "an object size covering its fields");

        match ty {
            ObjectType::Unallocated => Self::Unallocated,
            ObjectType::Integer => Self::Integer(read_i64_at(buf, PAYLOAD)),
            ObjectType::Float => Self::Float(read_f64_at(buf, PAYLOAD)),
            ObjectType::Boolean => Self::Boolean(read_u8_at(buf, PAYLOAD) != 0),
            ObjectType::Str | ObjectType::Error => {
                let len = read_u32_at(buf, LEN) as usize;
                need(STRING_BYTES + len, "a string length inside the object");
                let Ok(text) = String::from_utf8(buf[STRING_BYTES..STRING_BYTES + len].to_vec())
                else {
                    corruption(ptr, header.tag, "UTF-8 string bytes");
                };
                if ty == ObjectType::Str {
                    Self::Str(text)
                } else {
                    Self::Error(text)
                }
            }
            ObjectType::Array => {
                let len = read_u32_at(buf, LEN) as usize;
                need(ARRAY_ITEMS + len * Ptr::SIZE, "an array length inside the object");
                Self::Array(read_ptrs(buf, ARRAY_ITEMS, len))
            }
            ObjectType::Hash => {
                let len = read_u32_at(buf, LEN) as usize;
                need(ARRAY_ITEMS + len * 2 * Ptr::SIZE, "a hash length inside the object");
                let flat = read_ptrs(buf, ARRAY_ITEMS, len * 2);
                Self::Hash(flat.chunks_exact(2).map(|kv| (kv[0], kv[1])).collect())
            }
            ObjectType::Closure | ObjectType::Schema | ObjectType::Struct => {
                let head = read_ptr_at(buf, HEAD_PTR);
                let len = read_u32_at(buf, HEADED_LEN) as usize;
                need(HEADED_ITEMS + len * Ptr::SIZE, "an item count inside the object");
                let items = read_ptrs(buf, HEADED_ITEMS, len);
                match ty {
                    ObjectType::Closure => Self::Closure(Closure {
                        function: head,
                        upvalues: items,
                    }),
                    ObjectType::Schema => Self::Schema(Schema {
                        name: head,
                        fields: items,
                    }),
                    _ => Self::Struct(Struct {
                        schema: head,
                        fields: items,
                    }),
                }
            }
            ObjectType::CompiledFunction => {
                let len = read_u32_at(buf, FN_LEN) as usize;
                need(FN_CODE + len, "an instruction length inside the object");
                Self::CompiledFunction(CompiledFunction {
                    num_locals: read_u32_at(buf, FN_LOCALS),
                    num_params: read_u32_at(buf, FN_PARAMS),
                    instructions: buf[FN_CODE..FN_CODE + len].to_vec(),
                })
            }
            ObjectType::Upvalue => {
                let closed = read_u8_at(buf, UPVALUE_CLOSED) != 0;
                Self::Upvalue(Upvalue {
                    location: read_ptr_at(buf, UPVALUE_LOCATION),
                    closed: closed.then(|| read_ptr_at(buf, UPVALUE_VALUE)),
                })
            }
            ObjectType::Module => Self::Module(Module {
                name: read_ptr_at(buf, MODULE_NAME),
                exports: read_ptr_at(buf, MODULE_EXPORTS),
            }),
            ObjectType::Resource => Self::Resource(Resource {
                kind: read_u32_at(buf, RESOURCE_KIND),
                handle: read_u64_at(buf, RESOURCE_HANDLE),
            }),
            ObjectType::Pointer => Self::Pointer(read_ptr_at(buf, PAYLOAD)),
            ObjectType::Builtin => Self::Builtin(read_u32_at(buf, PAYLOAD)),
        }
    }

    /// Offsets, from the object start, of every field that holds a `Ptr`.
    pub fn pointer_offsets(&self) -> Vec<usize> {
        let run = |start: usize, n: usize| (0..n).map(move |i| start + i * Ptr::SIZE);
        match self {
            Self::Array(items) => run(ARRAY_ITEMS, items.len()).collect(),
            Self::Hash(pairs) => run(ARRAY_ITEMS, pairs.len() * 2).collect(),
            Self::Closure(Closure { upvalues: items, .. })
            | Self::Schema(Schema { fields: items, .. })
            | Self::Struct(Struct { fields: items, .. }) => std::iter::once(HEAD_PTR)
                .chain(run(HEADED_ITEMS, items.len()))
                .collect(),
            Self::Upvalue(_) => vec![UPVALUE_LOCATION, UPVALUE_VALUE],
            Self::Module(_) => vec![MODULE_NAME, MODULE_EXPORTS],
            Self::Pointer(_) => vec![PAYLOAD],
            _ => Vec::new(),
        }
    }
}

/// Payload bytes every object of `ty` has before any variable-length part.
fn fixed_payload(ty: ObjectType) -> usize {
    match ty {
        ObjectType::Unallocated => 0,
        ObjectType::Boolean => 1,
        ObjectType::Builtin | ObjectType::Str | ObjectType::Error => 4,
        ObjectType::Integer | ObjectType::Float | ObjectType::Pointer => 8,
        ObjectType::Array | ObjectType::Hash => 8,
        ObjectType::Closure
        | ObjectType::Schema
        | ObjectType::Struct
        | ObjectType::CompiledFunction
        | ObjectType::Module
        | ObjectType::Resource => 16,
        ObjectType::Upvalue => 24,
    }
}

fn write_ptrs(buf: &mut [u8], start: usize, ptrs: &[Ptr]) {
    for (i, p) in ptrs.iter().enumerate() {
        write_ptr_at(buf, start + i * Ptr::SIZE, *p);
    }
}

fn read_ptrs(buf: &[u8], start: usize, n: usize) -> Vec<Ptr> {
    (0..n)
        .map(|i| read_ptr_at(buf, start + i * Ptr::SIZE))
        .collect()
}

fn write_headed(buf: &mut [u8], head: Ptr, items: &[Ptr]) {
    write_ptr_at(buf, HEAD_PTR, head);
    write_u32_at(buf, HEADED_LEN, items.len() as u32);
    write_ptrs(buf, HEADED_ITEMS, items);
}
