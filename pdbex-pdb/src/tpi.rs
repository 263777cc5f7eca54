//! TPI stream walking and `LF_*` record decoding (§6.2). Produces a
//! populated [`pdbex_core::graph::SymbolGraph`] from the raw bytes of MSF
//! stream 2.

use std::collections::HashMap;

use pdbex_core::graph::{
    Access, BaseClass, BasicType, CallingConvention, DataKind, EnumField, EnumValue, Field,
    FieldTag, Symbol, SymbolGraph, SymbolId, SymbolVariant, UdtKind,
};
use zerocopy::{FromBytes, FromZeroes, Unaligned, LE, U16, U32};

use crate::error::{DriverError, DriverResult};
use crate::leaf::*;
use crate::primitive;

#[derive(FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct TpiHeaderRaw {
    version: U32<LE>,
    header_size: U32<LE>,
    type_index_begin: U32<LE>,
    type_index_end: U32<LE>,
    type_record_bytes: U32<LE>,
    hash_stream_index: U16<LE>,
    hash_aux_stream_index: U16<LE>,
    hash_key_size: U32<LE>,
    num_hash_buckets: U32<LE>,
    hash_value_buffer_offset: U32<LE>,
    hash_value_buffer_length: U32<LE>,
    index_offset_buffer_offset: U32<LE>,
    index_offset_buffer_length: U32<LE>,
    hash_adj_buffer_offset: U32<LE>,
    hash_adj_buffer_length: U32<LE>,
}

/// The handful of header fields this driver actually consults (§6.2 step 2).
pub struct TpiHeader {
    pub header_size: u32,
    pub type_index_begin: u32,
    pub type_index_end: u32,
    pub type_record_bytes: u32,
}

pub fn parse_header(stream: &[u8]) -> DriverResult<TpiHeader> {
    let (raw, _) =
        TpiHeaderRaw::ref_from_prefix(stream).ok_or(DriverError::MalformedTpiHeader)?;
    if raw.header_size.get() < std::mem::size_of::<TpiHeaderRaw>() as u32 {
        return Err(DriverError::MalformedTpiHeader);
    }
    Ok(TpiHeader {
        header_size: raw.header_size.get(),
        type_index_begin: raw.type_index_begin.get(),
        type_index_end: raw.type_index_end.get(),
        type_record_bytes: raw.type_record_bytes.get(),
    })
}

/// A byte cursor over one TPI record (or the whole record array), with
/// bounds-checked primitives matching the little-endian, loosely-aligned
/// layout of CodeView records.
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

enum Numeric {
    Signed(i64),
    Unsigned(u64),
}

impl Numeric {
    fn as_u64(&self) -> u64 {
        match self {
            Numeric::Signed(n) => *n as u64,
            Numeric::Unsigned(n) => *n,
        }
    }
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Decoder { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn require(&self, n: usize) -> DriverResult<()> {
        if self.remaining() < n {
            Err(DriverError::MalformedRecord { offset: self.pos })
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> DriverResult<u8> {
        self.require(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn u16(&mut self) -> DriverResult<u16> {
        self.require(2)?;
        let v = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    fn u32(&mut self) -> DriverResult<u32> {
        self.require(4)?;
        let bytes = [
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ];
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    fn bytes(&mut self, n: usize) -> DriverResult<&'a [u8]> {
        self.require(n)?;
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// `LF_NUMERIC` (§6.2): a `u16` tag, either the literal value itself (if
    /// `< LF_NUMERIC_THRESHOLD`) or a type byte introducing the bytes that
    /// follow.
    fn numeric(&mut self) -> DriverResult<Numeric> {
        let tag = self.u16()?;
        if tag < LF_NUMERIC_THRESHOLD {
            return Ok(Numeric::Unsigned(tag as u64));
        }
        match tag {
            LF_CHAR => Ok(Numeric::Signed(self.u8()? as i8 as i64)),
            LF_SHORT => Ok(Numeric::Signed(self.u16()? as i16 as i64)),
            LF_USHORT => Ok(Numeric::Unsigned(self.u16()? as u64)),
            LF_LONG => Ok(Numeric::Signed(self.u32()? as i32 as i64)),
            LF_ULONG => Ok(Numeric::Unsigned(self.u32()? as u64)),
            LF_QUADWORD => {
                let lo = self.u32()? as u64;
                let hi = self.u32()? as u64;
                Ok(Numeric::Signed(((hi << 32) | lo) as i64))
            }
            LF_UQUADWORD => {
                let lo = self.u32()? as u64;
                let hi = self.u32()? as u64;
                Ok(Numeric::Unsigned((hi << 32) | lo))
            }
            _ => {
                tracing::warn!(tag, "unsupported numeric leaf form, treating as 0");
                Ok(Numeric::Unsigned(0))
            }
        }
    }

    fn strz(&mut self) -> DriverResult<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        self.require(1)?;
        let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        self.pos += 1; // the NUL
        Ok(s)
    }

    /// Skips the `LF_PAD0`..`LF_PAD15` alignment bytes (`0xf0`..`0xff`)
    /// MSVC emits between field-list sub-records.
    fn skip_padding(&mut self) {
        while self.pos < self.data.len() && self.data[self.pos] >= 0xf0 {
            self.pos += 1;
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}

fn access_from_attr(attr: u16) -> Access {
    match attr & 0x3 {
        1 => Access::Private,
        2 => Access::Protected,
        3 => Access::Public,
        _ => Access::Public,
    }
}

/// One decoded entry of an `LF_FIELDLIST` record (§6.2 step 3). Kept as an
/// intermediate, not a graph `Symbol` — a field list is metadata the
/// referencing UDT/enum record consumes, not a first-class type.
enum FieldListEntry {
    Member {
        name: String,
        ty: u32,
        offset: u64,
        access: Access,
    },
    StaticMember {
        name: String,
        ty: u32,
        access: Access,
    },
    BaseClass {
        ty: u32,
        offset: u64,
        access: Access,
        is_virtual: bool,
    },
    Enumerate {
        name: String,
        value: EnumValue,
    },
    OneMethod {
        name: String,
        ty: u32,
        access: Access,
        is_static: bool,
        is_virtual: bool,
        is_pure: bool,
        is_override: bool,
        vtable_offset: Option<i64>,
    },
}

fn decode_field_list(body: &[u8]) -> DriverResult<Vec<FieldListEntry>> {
    let mut d = Decoder::new(body);
    let mut entries = Vec::new();
    while !d.at_end() {
        d.skip_padding();
        if d.at_end() {
            break;
        }
        let kind = d.u16()?;
        match kind {
            LF_MEMBER => {
                let attr = d.u16()?;
                let ty = d.u32()?;
                let offset = d.numeric()?.as_u64();
                let name = d.strz()?;
                entries.push(FieldListEntry::Member {
                    name,
                    ty,
                    offset,
                    access: access_from_attr(attr),
                });
            }
            LF_STMEMBER => {
                let attr = d.u16()?;
                let ty = d.u32()?;
                let name = d.strz()?;
                entries.push(FieldListEntry::StaticMember {
                    name,
                    ty,
                    access: access_from_attr(attr),
                });
            }
            LF_BCLASS => {
                let attr = d.u16()?;
                let ty = d.u32()?;
                let offset = d.numeric()?.as_u64();
                entries.push(FieldListEntry::BaseClass {
                    ty,
                    offset,
                    access: access_from_attr(attr),
                    is_virtual: false,
                });
            }
            LF_VBCLASS | LF_IVBCLASS => {
                let attr = d.u16()?;
                let base_ty = d.u32()?;
                let _vbptr_ty = d.u32()?;
                let _vbpoff = d.numeric()?;
                let _vboff = d.numeric()?;
                entries.push(FieldListEntry::BaseClass {
                    ty: base_ty,
                    offset: 0,
                    access: access_from_attr(attr),
                    is_virtual: true,
                });
            }
            LF_ENUMERATE => {
                let attr = d.u16()?;
                let value = match d.numeric()? {
                    Numeric::Signed(n) => EnumValue::Signed(n),
                    Numeric::Unsigned(n) => EnumValue::Unsigned(n),
                };
                let name = d.strz()?;
                let _ = attr;
                entries.push(FieldListEntry::Enumerate { name, value });
            }
            LF_ONEMETHOD => {
                let attr = d.u16()?;
                let ty = d.u32()?;
                // CV_methodprop (bits 2-4 of attr): 0 vanilla, 1 virtual
                // (overrides an existing slot), 2 static, 3 friend, 4
                // introducing virtual, 5 pure virtual, 6 pure introducing
                // virtual. Population contract step 6: `isOverride` is set
                // iff the method is virtual and does not introduce the slot.
                let mprop = (attr >> 2) & 0x7;
                let is_intro = mprop == 4 || mprop == 6;
                let is_pure = mprop == 5 || mprop == 6;
                let is_virtual = mprop == 1 || mprop == 5 || is_intro;
                let is_override = is_virtual && !is_intro;
                let vtable_offset = if is_intro {
                    Some(d.u32()? as i64)
                } else {
                    None
                };
                let name = d.strz()?;
                entries.push(FieldListEntry::OneMethod {
                    name,
                    ty,
                    access: access_from_attr(attr),
                    is_static: mprop == 2,
                    is_virtual,
                    is_pure,
                    is_override,
                    vtable_offset,
                });
            }
            LF_METHOD => {
                // An overload set bundled behind a separate LF_METHODLIST
                // record this driver does not decode; each overload is
                // dropped rather than guessed at (documented limitation).
                let _count_and_attr = d.u16()?;
                let _method_list_ty = d.u32()?;
                let _name = d.strz()?;
            }
            LF_NESTEDTYPE => {
                let _pad = d.u16()?;
                let _ty = d.u32()?;
                let _name = d.strz()?;
            }
            LF_VFUNCTAB => {
                let _pad = d.u16()?;
                let _ty = d.u32()?;
            }
            other => {
                tracing::warn!(kind = other, "unsupported field-list entry, stopping list early");
                break;
            }
        }
    }
    Ok(entries)
}

/// Drives the TPI walk and owns the symbol graph under construction.
pub struct TpiBuilder {
    graph: SymbolGraph,
    /// `tpi type index -> SymbolId`, populated as each complex record is
    /// decoded. CodeView's TPI format only ever refers backward to
    /// already-emitted indices; a forward reference (which a well-formed
    /// PDB never produces) resolves to an `Other` placeholder instead of
    /// failing the whole pass.
    index_map: HashMap<u32, SymbolId>,
    primitive_cache: HashMap<u32, SymbolId>,
    field_lists: HashMap<u32, Vec<FieldListEntry>>,
    arglists: HashMap<u32, Vec<SymbolId>>,
    type_index_begin: u32,
}

impl TpiBuilder {
    pub fn new(type_index_begin: u32) -> Self {
        TpiBuilder {
            graph: SymbolGraph::new(),
            index_map: HashMap::new(),
            primitive_cache: HashMap::new(),
            field_lists: HashMap::new(),
            arglists: HashMap::new(),
            type_index_begin,
        }
    }

    pub fn into_graph(self) -> SymbolGraph {
        self.graph
    }

    /// Parses every record in `record_bytes` (the TPI stream with the
    /// header already stripped), in order, and registers each in
    /// `index_map` under `type_index_begin + n`.
    pub fn walk(&mut self, record_bytes: &[u8]) -> DriverResult<()> {
        let mut cursor = Decoder::new(record_bytes);
        let mut next_index = self.type_index_begin;
        while !cursor.at_end() {
            let record_start = cursor.pos;
            let len = cursor.u16()? as usize;
            if len < 2 {
                return Err(DriverError::MalformedRecord { offset: record_start });
            }
            let body_start = cursor.pos;
            let body_end = body_start + len;
            if body_end > cursor.data.len() {
                return Err(DriverError::MalformedRecord { offset: record_start });
            }
            let kind = cursor.u16()?;
            let body = &cursor.data[cursor.pos..body_end];
            self.decode_record(next_index, kind, body)?;
            cursor.pos = body_end;
            next_index += 1;
        }
        Ok(())
    }

    fn decode_record(&mut self, tpi_index: u32, kind: u16, body: &[u8]) -> DriverResult<()> {
        match kind {
            LF_FIELDLIST => {
                let entries = decode_field_list(body)?;
                self.field_lists.insert(tpi_index, entries);
            }
            LF_STRUCTURE | LF_CLASS | LF_INTERFACE | LF_UNION => {
                self.decode_udt(tpi_index, kind, body)?;
            }
            LF_ENUM => self.decode_enum(tpi_index, body)?,
            LF_POINTER => self.decode_pointer(tpi_index, body)?,
            LF_ARRAY => self.decode_array(tpi_index, body)?,
            LF_MODIFIER => self.decode_modifier(tpi_index, body)?,
            LF_PROCEDURE => self.decode_procedure(tpi_index, body)?,
            LF_MFUNCTION => self.decode_mfunction(tpi_index, body)?,
            LF_ARGLIST => self.decode_arglist(tpi_index, body)?,
            _ => {
                let id = self.graph.next_id();
                self.graph.insert(Symbol {
                    id,
                    basic_type: None,
                    size: 0,
                    is_const: false,
                    is_volatile: false,
                    name: String::new(),
                    type_id: tpi_index as u64,
                    variant: SymbolVariant::Other,
                });
                self.index_map.insert(tpi_index, id);
            }
        }
        Ok(())
    }

    /// Resolves a raw TPI type-index reference, decoding a primitive on
    /// first use and falling back to an `Other` placeholder for anything
    /// else unresolved.
    fn resolve(&mut self, tpi_index: u32) -> SymbolId {
        if tpi_index < self.type_index_begin {
            if let Some(&id) = self.primitive_cache.get(&tpi_index) {
                return id;
            }
            let id = self.graph.next_id();
            if let Some((basic, size)) = primitive::describe(tpi_index) {
                self.graph.insert(Symbol {
                    id,
                    basic_type: Some(basic),
                    size,
                    is_const: false,
                    is_volatile: false,
                    name: basic.spelling().to_string(),
                    type_id: tpi_index as u64,
                    variant: SymbolVariant::Base,
                });
            } else {
                self.graph.insert(Symbol {
                    id,
                    basic_type: None,
                    size: 0,
                    is_const: false,
                    is_volatile: false,
                    name: String::new(),
                    type_id: tpi_index as u64,
                    variant: SymbolVariant::Other,
                });
            }
            self.primitive_cache.insert(tpi_index, id);
            return id;
        }
        if let Some(&id) = self.index_map.get(&tpi_index) {
            return id;
        }
        tracing::warn!(tpi_index, "forward or dangling type reference, using placeholder");
        let id = self.graph.next_id();
        self.graph.insert(Symbol {
            id,
            basic_type: None,
            size: 0,
            is_const: false,
            is_volatile: false,
            name: String::new(),
            type_id: tpi_index as u64,
            variant: SymbolVariant::Other,
        });
        self.index_map.insert(tpi_index, id);
        id
    }

    fn decode_udt(&mut self, tpi_index: u32, kind: u16, body: &[u8]) -> DriverResult<()> {
        let mut d = Decoder::new(body);
        let _member_count = d.u16()?;
        let _property = d.u16()?;
        let field_list_ty = d.u32()?;
        let _derivation_list_ty = d.u32()?;
        let _vtable_shape_ty = d.u32()?;
        let size = d.numeric()?.as_u64();
        let name = d.strz()?;

        let udt_kind = match kind {
            LF_CLASS | LF_INTERFACE => UdtKind::Class,
            LF_UNION => UdtKind::Union,
            _ => UdtKind::Struct,
        };

        let id = self.graph.next_id();
        self.index_map.insert(tpi_index, id);

        let entries = self.field_lists.remove(&field_list_ty).unwrap_or_default();
        let mut fields = Vec::new();
        let mut base_classes = Vec::new();
        for entry in entries {
            match entry {
                FieldListEntry::Member {
                    name,
                    ty,
                    offset,
                    access,
                } => {
                    let field_ty = self.resolve(ty);
                    fields.push(Field {
                        tag: FieldTag::Data,
                        data_kind: DataKind::Member,
                        name,
                        ty: field_ty,
                        offset,
                        bits: 0,
                        bit_position: 0,
                        access,
                        is_base_class: false,
                        parent: id,
                    });
                }
                FieldListEntry::StaticMember { name, ty, access } => {
                    let field_ty = self.resolve(ty);
                    fields.push(Field {
                        tag: FieldTag::Data,
                        data_kind: DataKind::Static,
                        name,
                        ty: field_ty,
                        offset: 0,
                        bits: 0,
                        bit_position: 0,
                        access,
                        is_base_class: false,
                        parent: id,
                    });
                }
                FieldListEntry::BaseClass {
                    ty,
                    offset,
                    access,
                    is_virtual,
                } => {
                    let base_ty = self.resolve(ty);
                    base_classes.push(BaseClass {
                        base: base_ty,
                        access,
                        is_virtual,
                    });
                    fields.push(Field {
                        tag: FieldTag::BaseClass,
                        data_kind: DataKind::Unknown,
                        name: String::new(),
                        ty: base_ty,
                        offset,
                        bits: 0,
                        bit_position: 0,
                        access,
                        is_base_class: true,
                        parent: id,
                    });
                }
                FieldListEntry::OneMethod {
                    name,
                    ty,
                    access,
                    is_static,
                    is_virtual,
                    is_pure,
                    is_override,
                    vtable_offset,
                } => {
                    let base_method_ty = self.resolve(ty);
                    let method_ty = self.specialize_method(
                        base_method_ty,
                        access,
                        is_static,
                        is_virtual,
                        is_pure,
                        is_override,
                        vtable_offset,
                    );
                    fields.push(Field {
                        tag: FieldTag::Method,
                        data_kind: if is_static {
                            DataKind::Static
                        } else {
                            DataKind::Member
                        },
                        name,
                        ty: method_ty,
                        offset: 0,
                        bits: 0,
                        bit_position: 0,
                        access,
                        is_base_class: false,
                        parent: id,
                    });
                }
                FieldListEntry::Enumerate { .. } => {}
            }
        }

        self.graph.insert(Symbol {
            id,
            basic_type: None,
            size,
            is_const: false,
            is_volatile: false,
            name,
            type_id: tpi_index as u64,
            variant: SymbolVariant::Udt {
                kind: udt_kind,
                fields,
                base_classes,
            },
        });
        Ok(())
    }

    /// `LF_ONEMETHOD`/`LF_METHOD` carry the static/virtual/override/pure
    /// flags as properties of *this member's use* of a signature, not of
    /// the `LF_PROCEDURE`/`LF_MFUNCTION` record itself — and the core
    /// treats every already-inserted `Symbol` as immutable (§3 Lifecycle).
    /// So rather than mutate the shared signature symbol in place, this
    /// clones its return type and argument list onto a fresh `Symbol` with
    /// the member's own flags baked in and returns the new id. An
    /// introducing virtual's vtable slot offset is known at decode time and
    /// seeded directly; an overriding virtual's is left for the
    /// reconstructor's late-bound (name, arity) lookup (§4.3).
    fn specialize_method(
        &mut self,
        base: SymbolId,
        access: Access,
        is_static: bool,
        is_virtual: bool,
        is_pure: bool,
        is_override: bool,
        vtable_offset: Option<i64>,
    ) -> SymbolId {
        let Ok(symbol) = self.graph.resolve(base) else {
            return base;
        };
        let SymbolVariant::Function {
            return_type,
            calling_convention,
            arguments,
            is_const,
            ..
        } = &symbol.variant
        else {
            return base;
        };
        let return_type = *return_type;
        let calling_convention = *calling_convention;
        let arguments = arguments.clone();
        let is_const = *is_const;
        let size = symbol.size;
        let type_id = symbol.type_id;

        let id = self.graph.next_id();
        self.graph.insert(Symbol {
            id,
            basic_type: None,
            size,
            is_const: false,
            is_volatile: false,
            name: String::new(),
            type_id,
            variant: SymbolVariant::Function {
                return_type,
                calling_convention,
                access,
                is_static,
                is_virtual,
                is_override,
                is_const,
                is_pure,
                virtual_offset: std::cell::RefCell::new(vtable_offset),
                arguments,
            },
        });
        id
    }

    fn decode_enum(&mut self, tpi_index: u32, body: &[u8]) -> DriverResult<()> {
        let mut d = Decoder::new(body);
        let _count = d.u16()?;
        let _property = d.u16()?;
        let underlying_ty = d.u32()?;
        let field_list_ty = d.u32()?;
        let name = d.strz()?;

        let id = self.graph.next_id();
        self.index_map.insert(tpi_index, id);
        let underlying_size = self.resolve_size(underlying_ty);

        let entries = self.field_lists.remove(&field_list_ty).unwrap_or_default();
        let mut fields = Vec::new();
        for entry in entries {
            if let FieldListEntry::Enumerate { name, value } = entry {
                fields.push(EnumField {
                    name,
                    value,
                    parent: id,
                });
            }
        }

        self.graph.insert(Symbol {
            id,
            basic_type: None,
            size: underlying_size,
            is_const: false,
            is_volatile: false,
            name,
            type_id: tpi_index as u64,
            variant: SymbolVariant::Enum { fields },
        });
        Ok(())
    }

    fn resolve_size(&mut self, tpi_index: u32) -> u64 {
        let id = self.resolve(tpi_index);
        self.graph.resolve(id).map(|s| s.size).unwrap_or(4)
    }

    fn decode_pointer(&mut self, tpi_index: u32, body: &[u8]) -> DriverResult<()> {
        let mut d = Decoder::new(body);
        let referent_ty = d.u32()?;
        let attr = d.u32()?;
        let ptr_mode = (attr >> 5) & 0x7;
        let is_volatile = (attr >> 9) & 1 != 0;
        let is_const = (attr >> 10) & 1 != 0;
        let size = ((attr >> 13) & 0x3f) as u64;
        let is_reference = ptr_mode == 1 || ptr_mode == 4;

        let pointee = self.resolve(referent_ty);
        let id = self.graph.next_id();
        self.index_map.insert(tpi_index, id);
        self.graph.insert(Symbol {
            id,
            basic_type: None,
            size: if size == 0 { 8 } else { size },
            is_const,
            is_volatile,
            name: String::new(),
            type_id: tpi_index as u64,
            variant: SymbolVariant::Pointer {
                pointee,
                is_reference,
            },
        });
        Ok(())
    }

    fn decode_array(&mut self, tpi_index: u32, body: &[u8]) -> DriverResult<()> {
        let mut d = Decoder::new(body);
        let element_ty = d.u32()?;
        let _index_ty = d.u32()?;
        let total_size = d.numeric()?.as_u64();
        let _name = d.strz()?;

        let element = self.resolve(element_ty);
        let element_size = self.graph.resolve(element).map(|s| s.size).unwrap_or(0);
        let count = if element_size == 0 {
            0
        } else {
            total_size / element_size
        };

        let id = self.graph.next_id();
        self.index_map.insert(tpi_index, id);
        self.graph.insert(Symbol {
            id,
            basic_type: None,
            size: total_size,
            is_const: false,
            is_volatile: false,
            name: String::new(),
            type_id: tpi_index as u64,
            variant: SymbolVariant::Array { element, count },
        });
        Ok(())
    }

    /// `LF_MODIFIER` has no graph kind of its own: it names a `const`/
    /// `volatile` qualification of an existing type. This driver models
    /// that by cloning the underlying symbol's payload onto a fresh
    /// `Symbol` with the qualifier bits set, so the modifier's own type
    /// index resolves to something that prints correctly (§6.2 step 3).
    fn decode_modifier(&mut self, tpi_index: u32, body: &[u8]) -> DriverResult<()> {
        let mut d = Decoder::new(body);
        let underlying_ty = d.u32()?;
        let modifier_attr = d.u16()?;
        let is_const = modifier_attr & 0x1 != 0;
        let is_volatile = modifier_attr & 0x2 != 0;

        let underlying = self.resolve(underlying_ty);
        let mut cloned = self
            .graph
            .resolve(underlying)
            .cloned()
            .unwrap_or(Symbol {
                id: underlying,
                basic_type: None,
                size: 0,
                is_const: false,
                is_volatile: false,
                name: String::new(),
                type_id: underlying_ty as u64,
                variant: SymbolVariant::Other,
            });

        let id = self.graph.next_id();
        cloned.id = id;
        cloned.is_const = is_const;
        cloned.is_volatile = is_volatile;
        self.index_map.insert(tpi_index, id);
        self.graph.insert(cloned);
        Ok(())
    }

    fn decode_procedure(&mut self, tpi_index: u32, body: &[u8]) -> DriverResult<()> {
        let mut d = Decoder::new(body);
        let return_ty = d.u32()?;
        let _calling_convention_byte = d.u8()?;
        let _reserved = d.u8()?;
        let _param_count = d.u16()?;
        let arglist_ty = d.u32()?;

        let return_type = self.resolve(return_ty);
        let arguments = self.resolve_arglist(arglist_ty);

        let id = self.graph.next_id();
        self.index_map.insert(tpi_index, id);
        self.graph.insert(Symbol {
            id,
            basic_type: None,
            size: 0,
            is_const: false,
            is_volatile: false,
            name: String::new(),
            type_id: tpi_index as u64,
            variant: SymbolVariant::Function {
                return_type,
                calling_convention: CallingConvention::Cdecl,
                access: Access::Public,
                is_static: false,
                is_virtual: false,
                is_override: false,
                is_const: false,
                is_pure: false,
                virtual_offset: std::cell::RefCell::new(None),
                arguments,
            },
        });
        Ok(())
    }

    fn decode_mfunction(&mut self, tpi_index: u32, body: &[u8]) -> DriverResult<()> {
        let mut d = Decoder::new(body);
        let return_ty = d.u32()?;
        let _class_ty = d.u32()?;
        let _this_ty = d.u32()?;
        let _calling_convention_byte = d.u8()?;
        let _reserved = d.u8()?;
        let _param_count = d.u16()?;
        let arglist_ty = d.u32()?;
        let _this_adjust = d.u32()?;

        let return_type = self.resolve(return_ty);
        let arguments = self.resolve_arglist(arglist_ty);

        let id = self.graph.next_id();
        self.index_map.insert(tpi_index, id);
        self.graph.insert(Symbol {
            id,
            basic_type: None,
            size: 0,
            is_const: false,
            is_volatile: false,
            name: String::new(),
            type_id: tpi_index as u64,
            variant: SymbolVariant::Function {
                return_type,
                calling_convention: CallingConvention::ThisCall,
                access: Access::Public,
                is_static: false,
                is_virtual: false,
                is_override: false,
                is_const: false,
                is_pure: false,
                virtual_offset: std::cell::RefCell::new(None),
                arguments,
            },
        });
        Ok(())
    }

    fn decode_arglist(&mut self, tpi_index: u32, body: &[u8]) -> DriverResult<()> {
        let mut d = Decoder::new(body);
        let count = d.u32()?;
        let mut arg_types = Vec::with_capacity(count as usize);
        for _ in 0..count {
            arg_types.push(d.u32()?);
        }

        // Each argument is its own graph symbol (a `FunctionArg` wrapper),
        // matching the data model's "ordered sequence of argument Symbol
        // references" (§3); this is the one place the driver allocates
        // symbols that do not correspond to a TPI type index of their own.
        let mut arguments = Vec::with_capacity(arg_types.len());
        for arg_ty in arg_types {
            let ty = self.resolve(arg_ty);
            let arg_id = self.graph.next_id();
            self.graph.insert(Symbol {
                id: arg_id,
                basic_type: None,
                size: 0,
                is_const: false,
                is_volatile: false,
                name: String::new(),
                type_id: arg_ty as u64,
                variant: SymbolVariant::FunctionArg { ty },
            });
            arguments.push(arg_id);
        }
        // An `LF_ARGLIST` is referenced only via a procedure/method's own
        // `arglist` field, never as a type in its own right, so it is kept
        // in `arglists` rather than `index_map` (which would otherwise need
        // a placeholder `Symbol` for the zero-argument case).
        self.arglists.insert(tpi_index, arguments);
        Ok(())
    }

    fn resolve_arglist(&mut self, tpi_index: u32) -> Vec<SymbolId> {
        self.arglists.get(&tpi_index).cloned().unwrap_or_default()
    }
}
