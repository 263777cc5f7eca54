//! `pdbex-pdb`: the population-contract driver (`spec.md` §6; `SPEC_FULL.md`
//! §6.2). Opens a real PDB's MSF container, parses the TPI stream, and
//! produces a populated [`pdbex_core::graph::SymbolGraph`].
//!
//! This crate is the "external collaborator" `spec.md` §1 places out of
//! scope for the core's specification; it exists so the `pdbex` binary has a
//! real driver to call, grounded in the CodeView record layouts cataloged
//! throughout the `ms-pdb-rs` workspace (see `SPEC_FULL.md` §6.2).

pub mod error;
pub mod leaf;
pub mod primitive;
pub mod tpi;

use std::path::Path;

use ms_pdb_msf::Msf;
use pdbex_core::graph::{Symbol, SymbolGraph, SymbolId, SymbolVariant};

use crate::error::{DriverError, DriverResult};
use crate::tpi::TpiBuilder;

/// Stream index of the Type Information (TPI) stream in every PDB, per
/// `mspdb::stream_index::Stream::TPI`.
const TPI_STREAM: u32 = 2;

/// Opens `path` as an MSF container, reads its TPI stream, and returns a
/// populated [`SymbolGraph`] (§6.2 steps 1-5).
///
/// This alone does not produce `Typedef` symbols (step 6: those come from
/// `S_UDT` symbol records in the symbol stream, which this driver does not
/// walk) — callers that need typedefs should additionally call
/// [`register_typedef`] once per such record they decode themselves.
pub fn open_and_populate(path: &Path) -> DriverResult<SymbolGraph> {
    let msf = Msf::open(path).map_err(|source| DriverError::FileNotFound { source })?;
    let stream = msf
        .read_stream_to_vec(TPI_STREAM)
        .map_err(|source| DriverError::StreamReadFailed { source })?;
    populate_from_tpi_stream(&stream)
}

/// Parses a raw TPI stream's bytes (header + record array) into a
/// [`SymbolGraph`]. Split out from [`open_and_populate`] so the decoder can
/// be exercised with hand-built byte buffers, independent of any real PDB
/// file (§8: "TPI header parsing ... using hand-built byte buffers").
pub fn populate_from_tpi_stream(stream: &[u8]) -> DriverResult<SymbolGraph> {
    let header = tpi::parse_header(stream)?;
    let header_size = header.header_size as usize;
    if stream.len() < header_size {
        return Err(DriverError::MalformedTpiHeader);
    }
    let record_bytes_start = header_size;
    let record_bytes_end = record_bytes_start + header.type_record_bytes as usize;
    let record_bytes = stream
        .get(record_bytes_start..record_bytes_end)
        .ok_or(DriverError::MalformedTpiHeader)?;

    let mut builder = TpiBuilder::new(header.type_index_begin);
    builder.walk(record_bytes)?;
    let _ = header.type_index_end;
    Ok(builder.into_graph())
}

/// Population contract step 6: wraps `underlying` in a named `Typedef`
/// `Symbol` and registers it in `graph`, returning its new [`SymbolId`].
/// Grounded in `SymbolModule::ProcessSymbolTypedef` (`original_source/Source/PDB.cpp`),
/// which performs the same lookup-and-wrap when it encounters an `S_UDT`
/// symbol record; this driver exposes the operation directly because it does
/// not itself walk the symbol stream that `S_UDT` records live in.
pub fn register_typedef(graph: &mut SymbolGraph, name: &str, underlying: SymbolId) -> SymbolId {
    let id = graph.next_id();
    graph.insert(Symbol {
        id,
        basic_type: None,
        size: graph.resolve(underlying).map(|s| s.size).unwrap_or(0),
        is_const: false,
        is_volatile: false,
        name: name.to_string(),
        type_id: u64::from(id.0),
        variant: SymbolVariant::Typedef { underlying },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdbex_core::graph::{BasicType, SymbolVariant};

    const T_CHAR: u32 = 0x10;
    const T_INT4: u32 = 0x74;
    const LF_FIELDLIST: u16 = 0x1203;
    const LF_STRUCTURE: u16 = 0x1505;
    const LF_MEMBER: u16 = 0x150d;

    fn strz(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        v
    }

    /// One length-prefixed TPI record: `kind` plus `body_after_kind`, with
    /// the 2-byte length field (covering `kind` + `body_after_kind`, per
    /// `SPEC_FULL.md` §6.2 step 3) prepended.
    fn record(kind: u16, body_after_kind: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let len = 2 + body_after_kind.len();
        out.extend_from_slice(&(len as u16).to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(body_after_kind);
        out
    }

    fn member(name: &str, ty: u32, offset: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0x0003u16.to_le_bytes()); // attr: public
        body.extend_from_slice(&ty.to_le_bytes());
        body.extend_from_slice(&offset.to_le_bytes()); // numeric < 0x8000: literal
        body.extend_from_slice(&strz(name));
        let mut out = Vec::new();
        out.extend_from_slice(&LF_MEMBER.to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    fn tpi_header(type_index_begin: u32, type_index_end: u32, type_record_bytes: u32) -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(&1u32.to_le_bytes()); // version
        h.extend_from_slice(&56u32.to_le_bytes()); // header_size
        h.extend_from_slice(&type_index_begin.to_le_bytes());
        h.extend_from_slice(&type_index_end.to_le_bytes());
        h.extend_from_slice(&type_record_bytes.to_le_bytes());
        h.extend_from_slice(&0u16.to_le_bytes()); // hash_stream_index
        h.extend_from_slice(&0u16.to_le_bytes()); // hash_aux_stream_index
        h.extend_from_slice(&0u32.to_le_bytes()); // hash_key_size
        h.extend_from_slice(&0u32.to_le_bytes()); // num_hash_buckets
        h.extend_from_slice(&0u32.to_le_bytes()); // hash_value_buffer_offset
        h.extend_from_slice(&0u32.to_le_bytes()); // hash_value_buffer_length
        h.extend_from_slice(&0u32.to_le_bytes()); // index_offset_buffer_offset
        h.extend_from_slice(&0u32.to_le_bytes()); // index_offset_buffer_length
        h.extend_from_slice(&0u32.to_le_bytes()); // hash_adj_buffer_offset
        h.extend_from_slice(&0u32.to_le_bytes()); // hash_adj_buffer_length
        assert_eq!(h.len(), 56);
        h
    }

    #[test]
    fn malformed_header_is_rejected() {
        let err = populate_from_tpi_stream(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, DriverError::MalformedTpiHeader));
    }

    /// S1 at the driver level: a hand-built TPI stream with one
    /// `LF_FIELDLIST` (char a@0, int b@4) and one `LF_STRUCTURE` named
    /// `Foo` referencing it decodes into a `Udt` symbol with both members
    /// resolved to their primitive types at the right offsets.
    #[test]
    fn decodes_a_struct_with_two_members() {
        let field_list_body = [member("a", T_CHAR, 0), member("b", T_INT4, 4)].concat();
        let field_list_record = record(LF_FIELDLIST, &field_list_body);

        let mut struct_body = Vec::new();
        struct_body.extend_from_slice(&2u16.to_le_bytes()); // member_count
        struct_body.extend_from_slice(&0u16.to_le_bytes()); // property
        struct_body.extend_from_slice(&0x1000u32.to_le_bytes()); // field_list_ty
        struct_body.extend_from_slice(&0u32.to_le_bytes()); // derivation_list_ty
        struct_body.extend_from_slice(&0u32.to_le_bytes()); // vtable_shape_ty
        struct_body.extend_from_slice(&8u16.to_le_bytes()); // size
        struct_body.extend_from_slice(&strz("Foo"));
        let struct_record = record(LF_STRUCTURE, &struct_body);

        let record_bytes = [field_list_record.as_slice(), struct_record.as_slice()].concat();
        let mut stream = tpi_header(0x1000, 0x1002, record_bytes.len() as u32);
        stream.extend_from_slice(&record_bytes);

        let graph = populate_from_tpi_stream(&stream).unwrap();
        let foo_id = graph.lookup_by_name("Foo").expect("Foo registered by name");
        let foo = graph.resolve(foo_id).unwrap();
        assert_eq!(foo.size, 8);
        let (_, fields, _) = foo.variant.as_udt().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "a");
        assert_eq!(fields[0].offset, 0);
        assert_eq!(fields[1].name, "b");
        assert_eq!(fields[1].offset, 4);

        let a_ty = graph.resolve(fields[0].ty).unwrap();
        assert_eq!(a_ty.basic_type, Some(BasicType::Char));
        let b_ty = graph.resolve(fields[1].ty).unwrap();
        assert_eq!(b_ty.basic_type, Some(BasicType::Int32));
    }

    #[test]
    fn register_typedef_wraps_underlying_and_copies_size() {
        let mut graph = SymbolGraph::new();
        let base_id = graph.next_id();
        graph.insert(Symbol {
            id: base_id,
            basic_type: Some(BasicType::Int32),
            size: 4,
            is_const: false,
            is_volatile: false,
            name: "int".to_string(),
            type_id: 0,
            variant: SymbolVariant::Base,
        });

        let typedef_id = register_typedef(&mut graph, "MyInt", base_id);
        let typedef = graph.resolve(typedef_id).unwrap();
        assert_eq!(typedef.size, 4);
        assert_eq!(typedef.name, "MyInt");
        assert_eq!(typedef.variant.as_typedef(), Some(base_id));
    }
}
