//! Typed constructors, readers and writers over [`Object`] layouts.
//!
//! Readers accept zeroed memory and return the kind's default value. Any
//! other tag that does not match the reader is heap corruption.

use crate::{
    CabinetShared, Header, MemoryError, ObjectType, Ptr, Result,
    bytes::{read_ptr_at, read_u32_at},
    error::corruption,
    object::{
        Closure, CompiledFunction, Module, Object, Resource, Schema, Struct, Upvalue, layout::*,
    },
};

impl CabinetShared {
    /// Allocate room for `object` and store it.
    pub fn alloc_object(&self, object: &Object) -> Result<Ptr> {
        let ptr = self.alloc_init(&object.encode())?;
        log::trace!("stored {} at {ptr:?}", object.object_type().name());
        Ok(ptr)
    }

    pub fn read_header(&self, ptr: Ptr) -> Result<Header> {
        let mut buf = [0u8; Header::SIZE];
        self.read_into(ptr, &mut buf)?;
        Ok(Header::decode(&buf))
    }

    /// Decode whatever object lives at `ptr`.
    pub fn decode(&self, ptr: Ptr) -> Result<Object> {
        let header = self.read_header(ptr)?;
        match header.object_type() {
            None => corruption(ptr, header.tag, "a known object tag"),
            Some(ObjectType::Unallocated) => Ok(Object::Unallocated),
            Some(_) => {
                let size = header.size as usize;
                if size < Header::SIZE || !size.is_multiple_of(8) {
                    corruption(ptr, header.tag, "a header with an aligned size");
                }
                let bytes = self.read(ptr, size)?;
                Ok(Object::decode(ptr, &bytes))
            }
        }
    }

    fn decode_as<T: Default>(
        &self,
        ptr: Ptr,
        expected: ObjectType,
        pick: impl FnOnce(Object) -> Option<T>,
    ) -> Result<T> {
        let object = self.decode(ptr)?;
        let tag = object.object_type() as u8;
        match object {
            Object::Unallocated => Ok(T::default()),
            object => match pick(object) {
                Some(value) => Ok(value),
                None => corruption(ptr, tag, expected.name()),
            },
        }
    }

    /// Address of a fixed field of an object that must be of kind `ty`.
    fn field(&self, ptr: Ptr, ty: ObjectType, offset: usize) -> Result<Ptr> {
        let header = self.read_header(ptr)?;
        if header.tag != ty as u8 {
            corruption(ptr, header.tag, ty.name());
        }
        Ok(ptr.add(offset as u32))
    }

    /// Length word of a sequence object, 0 for zeroed memory.
    fn sequence_len(&self, ptr: Ptr, ty: ObjectType, len_at: usize) -> Result<usize> {
        let header = self.read_header(ptr)?;
        match header.object_type() {
            Some(ObjectType::Unallocated) => Ok(0),
            Some(found) if found == ty => {
                let bytes = self.read(ptr.add(len_at as u32), 4)?;
                Ok(read_u32_at(&bytes, 0) as usize)
            }
            _ => corruption(ptr, header.tag, ty.name()),
        }
    }

    /// Address of element `index` of a sequence whose items start at
    /// `items_at` and are `stride` bytes apart.
    fn element(
        &self,
        ptr: Ptr,
        ty: ObjectType,
        (len_at, items_at, stride): (usize, usize, usize),
        index: usize,
    ) -> Result<Ptr> {
        let len = self.sequence_len(ptr, ty, len_at)?;
        if index >= len {
            return Err(MemoryError::Bounds { index, len });
        }
        Ok(ptr.add((items_at + index * stride) as u32))
    }

    pub(crate) fn read_ptr(&self, at: Ptr) -> Result<Ptr> {
        let mut buf = [0u8; Ptr::SIZE];
        self.read_into(at, &mut buf)?;
        Ok(read_ptr_at(&buf, 0))
    }

    pub(crate) fn write_ptr(&self, at: Ptr, value: Ptr) -> Result<()> {
        self.write(at, &value.raw().to_le_bytes())
    }

    // ── Scalars ───────────────────────────────────────────────────────

    pub fn alloc_integer(&self, value: i64) -> Result<Ptr> {
        self.alloc_object(&Object::Integer(value))
    }

    pub fn read_integer(&self, ptr: Ptr) -> Result<i64> {
        self.decode_as(ptr, ObjectType::Integer, |o| match o {
            Object::Integer(v) => Some(v),
            _ => None,
        })
    }

    pub fn write_integer(&self, ptr: Ptr, value: i64) -> Result<()> {
        let at = self.field(ptr, ObjectType::Integer, Header::SIZE)?;
        self.write(at, &value.to_le_bytes())
    }

    pub fn alloc_float(&self, value: f64) -> Result<Ptr> {
        self.alloc_object(&Object::Float(value))
    }

    pub fn read_float(&self, ptr: Ptr) -> Result<f64> {
        self.decode_as(ptr, ObjectType::Float, |o| match o {
            Object::Float(v) => Some(v),
            _ => None,
        })
    }

    pub fn write_float(&self, ptr: Ptr, value: f64) -> Result<()> {
        let at = self.field(ptr, ObjectType::Float, Header::SIZE)?;
        self.write(at, &value.to_bits().to_le_bytes())
    }

    pub fn alloc_boolean(&self, value: bool) -> Result<Ptr> {
        self.alloc_object(&Object::Boolean(value))
    }

    pub fn read_boolean(&self, ptr: Ptr) -> Result<bool> {
        self.decode_as(ptr, ObjectType::Boolean, |o| match o {
            Object::Boolean(v) => Some(v),
            _ => None,
        })
    }

    pub fn write_boolean(&self, ptr: Ptr, value: bool) -> Result<()> {
        let at = self.field(ptr, ObjectType::Boolean, Header::SIZE)?;
        self.write(at, &[value as u8])
    }

    // ── Strings and errors ────────────────────────────────────────────

    pub fn alloc_string(&self, value: &str) -> Result<Ptr> {
        self.alloc_object(&Object::Str(value.to_owned()))
    }

    pub fn read_string(&self, ptr: Ptr) -> Result<String> {
        self.decode_as(ptr, ObjectType::Str, |o| match o {
            Object::Str(s) => Some(s),
            _ => None,
        })
    }

    pub fn alloc_error(&self, message: &str) -> Result<Ptr> {
        self.alloc_object(&Object::Error(message.to_owned()))
    }

    pub fn read_error(&self, ptr: Ptr) -> Result<String> {
        self.decode_as(ptr, ObjectType::Error, |o| match o {
            Object::Error(s) => Some(s),
            _ => None,
        })
    }

    // ── Arrays and hashes ─────────────────────────────────────────────

    pub fn alloc_array(&self, items: &[Ptr]) -> Result<Ptr> {
        self.alloc_object(&Object::Array(items.to_vec()))
    }

    pub fn read_array(&self, ptr: Ptr) -> Result<Vec<Ptr>> {
        self.decode_as(ptr, ObjectType::Array, |o| match o {
            Object::Array(items) => Some(items),
            _ => None,
        })
    }

    pub fn array_len(&self, ptr: Ptr) -> Result<usize> {
        self.sequence_len(ptr, ObjectType::Array, LEN)
    }

    /// Address of an array slot, suitable for the atomic primitives.
    pub fn array_slot(&self, ptr: Ptr, index: usize) -> Result<Ptr> {
        self.element(ptr, ObjectType::Array, (LEN, ARRAY_ITEMS, Ptr::SIZE), index)
    }

    pub fn read_array_element(&self, ptr: Ptr, index: usize) -> Result<Ptr> {
        let at = self.array_slot(ptr, index)?;
        self.read_ptr(at)
    }

    pub fn write_array_element(&self, ptr: Ptr, index: usize, value: Ptr) -> Result<()> {
        let at = self.array_slot(ptr, index)?;
        self.write_ptr(at, value)
    }

    pub fn alloc_hash(&self, pairs: &[(Ptr, Ptr)]) -> Result<Ptr> {
        self.alloc_object(&Object::Hash(pairs.to_vec()))
    }

    pub fn hash_len(&self, ptr: Ptr) -> Result<usize> {
        self.sequence_len(ptr, ObjectType::Hash, LEN)
    }

    pub fn read_hash_pair(&self, ptr: Ptr, index: usize) -> Result<(Ptr, Ptr)> {
        let at = self.element(ptr, ObjectType::Hash, (LEN, ARRAY_ITEMS, 2 * Ptr::SIZE), index)?;
        Ok((self.read_ptr(at)?, self.read_ptr(at.add(Ptr::SIZE as u32))?))
    }

    pub fn write_hash_pair(&self, ptr: Ptr, index: usize, key: Ptr, value: Ptr) -> Result<()> {
        let at = self.element(ptr, ObjectType::Hash, (LEN, ARRAY_ITEMS, 2 * Ptr::SIZE), index)?;
        let mut pair = [0u8; 2 * Ptr::SIZE];
        pair[..Ptr::SIZE].copy_from_slice(&key.raw().to_le_bytes());
        pair[Ptr::SIZE..].copy_from_slice(&value.raw().to_le_bytes());
        self.write(at, &pair)
    }

    // ── Functions ─────────────────────────────────────────────────────

    pub fn alloc_closure(&self, function: Ptr, upvalues: &[Ptr]) -> Result<Ptr> {
        self.alloc_object(&Object::Closure(Closure {
            function,
            upvalues: upvalues.to_vec(),
        }))
    }

    pub fn read_closure(&self, ptr: Ptr) -> Result<Closure> {
        self.decode_as(ptr, ObjectType::Closure, |o| match o {
            Object::Closure(c) => Some(c),
            _ => None,
        })
    }

    pub fn alloc_compiled_function(&self, function: &CompiledFunction) -> Result<Ptr> {
        self.alloc_object(&Object::CompiledFunction(function.clone()))
    }

    pub fn read_compiled_function(&self, ptr: Ptr) -> Result<CompiledFunction> {
        self.decode_as(ptr, ObjectType::CompiledFunction, |o| match o {
            Object::CompiledFunction(f) => Some(f),
            _ => None,
        })
    }

    pub fn alloc_upvalue(&self, location: Ptr) -> Result<Ptr> {
        self.alloc_object(&Object::Upvalue(Upvalue {
            location,
            closed: None,
        }))
    }

    /// Copy `value` into the upvalue and mark it closed.
    pub fn close_upvalue(&self, ptr: Ptr, value: Ptr) -> Result<()> {
        let flag = self.field(ptr, ObjectType::Upvalue, UPVALUE_CLOSED)?;
        self.write_ptr(ptr.add(UPVALUE_VALUE as u32), value)?;
        self.write(flag, &[1])
    }

    pub fn read_upvalue(&self, ptr: Ptr) -> Result<Upvalue> {
        self.decode_as(ptr, ObjectType::Upvalue, |o| match o {
            Object::Upvalue(u) => Some(u),
            _ => None,
        })
    }

    // ── Records ───────────────────────────────────────────────────────

    pub fn alloc_schema(&self, name: Ptr, fields: &[Ptr]) -> Result<Ptr> {
        self.alloc_object(&Object::Schema(Schema {
            name,
            fields: fields.to_vec(),
        }))
    }

    pub fn read_schema(&self, ptr: Ptr) -> Result<Schema> {
        self.decode_as(ptr, ObjectType::Schema, |o| match o {
            Object::Schema(s) => Some(s),
            _ => None,
        })
    }

    pub fn alloc_struct(&self, schema: Ptr, fields: &[Ptr]) -> Result<Ptr> {
        self.alloc_object(&Object::Struct(Struct {
            schema,
            fields: fields.to_vec(),
        }))
    }

    pub fn read_struct(&self, ptr: Ptr) -> Result<Struct> {
        self.decode_as(ptr, ObjectType::Struct, |o| match o {
            Object::Struct(s) => Some(s),
            _ => None,
        })
    }

    pub fn read_struct_field(&self, ptr: Ptr, index: usize) -> Result<Ptr> {
        let at = self.element(ptr, ObjectType::Struct, (HEADED_LEN, HEADED_ITEMS, Ptr::SIZE), index)?;
        self.read_ptr(at)
    }

    pub fn write_struct_field(&self, ptr: Ptr, index: usize, value: Ptr) -> Result<()> {
        let at = self.element(ptr, ObjectType::Struct, (HEADED_LEN, HEADED_ITEMS, Ptr::SIZE), index)?;
        self.write_ptr(at, value)
    }

    pub fn alloc_module(&self, name: Ptr, exports: Ptr) -> Result<Ptr> {
        self.alloc_object(&Object::Module(Module { name, exports }))
    }

    pub fn read_module(&self, ptr: Ptr) -> Result<Module> {
        self.decode_as(ptr, ObjectType::Module, |o| match o {
            Object::Module(m) => Some(m),
            _ => None,
        })
    }

    pub fn write_module_name(&self, ptr: Ptr, name: Ptr) -> Result<()> {
        let at = self.field(ptr, ObjectType::Module, MODULE_NAME)?;
        self.write_ptr(at, name)
    }

    pub fn write_module_exports(&self, ptr: Ptr, exports: Ptr) -> Result<()> {
        let at = self.field(ptr, ObjectType::Module, MODULE_EXPORTS)?;
        self.write_ptr(at, exports)
    }

    // ── Handles ───────────────────────────────────────────────────────

    pub fn alloc_resource(&self, kind: u32, handle: u64) -> Result<Ptr> {
        self.alloc_object(&Object::Resource(Resource { kind, handle }))
    }

    pub fn read_resource(&self, ptr: Ptr) -> Result<Resource> {
        self.decode_as(ptr, ObjectType::Resource, |o| match o {
            Object::Resource(r) => Some(r),
            _ => None,
        })
    }

    pub fn alloc_pointer(&self, target: Ptr) -> Result<Ptr> {
        self.alloc_object(&Object::Pointer(target))
    }

    pub fn read_pointer(&self, ptr: Ptr) -> Result<Ptr> {
        self.decode_as(ptr, ObjectType::Pointer, |o| match o {
            Object::Pointer(p) => Some(p),
            _ => None,
        })
    }

    pub fn alloc_builtin(&self, index: u32) -> Result<Ptr> {
        self.alloc_object(&Object::Builtin(index))
    }

    pub fn read_builtin(&self, ptr: Ptr) -> Result<u32> {
        self.decode_as(ptr, ObjectType::Builtin, |o| match o {
            Object::Builtin(i) => Some(i),
            _ => None,
        })
    }
}
