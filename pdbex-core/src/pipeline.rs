//! The façade (§4): sorts a populated [`SymbolGraph`] and emits every
//! top-level symbol in that order, continuing past a single symbol's
//! failure rather than aborting the whole run (§7 recovery policy).

use tracing::warn;

use crate::builder::{DefinitionBuilder, FieldDefinitionBuilder};
use crate::error::{CoreError, CoreResult};
use crate::graph::SymbolGraph;
use crate::reconstruct::{HeaderReconstructor, Settings};
use crate::sorter::{Architecture, Sorter};
use crate::traversal::TraversalController;

/// Outcome of one [`reconstruct`] run.
pub struct Reconstruction {
    pub header: String,
    pub architecture: Architecture,
    /// Top-level symbols the run could not emit, because a referenced
    /// symbol was missing from the graph (§7: a `SymbolNotFound` during one
    /// symbol's emission does not abort the others).
    pub skipped: Vec<CoreError>,
}

/// Sorts `graph`, then drives a fresh [`HeaderReconstructor`] with the
/// default [`DefinitionBuilder`] over the resulting order, returning the
/// rendered header text alongside the inferred architecture and any
/// per-symbol failures.
pub fn reconstruct(graph: &SymbolGraph, settings: Settings) -> CoreResult<Reconstruction> {
    let mut sorter = Sorter::new();
    let order = sorter.sort(graph)?;

    let sink = String::new();
    let reconstructor = HeaderReconstructor::new(sink, settings);
    let mut controller = TraversalController::new(graph, reconstructor);

    let mut skipped: Vec<CoreError> = sorter.errors().to_vec();
    for id in order {
        match controller.emit::<DefinitionBuilder>(id) {
            Ok(()) => {}
            Err(err) => {
                warn!(symbol = %id, error = %err, "skipping symbol after emission failure");
                skipped.push(err);
            }
        }
    }

    let reconstructor = controller.into_callbacks();
    Ok(Reconstruction {
        header: reconstructor.into_inner(),
        architecture: sorter.architecture(),
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::*;

    fn push_base(graph: &mut SymbolGraph, name: &str, basic: BasicType, size: u64) -> SymbolId {
        let id = graph.next_id();
        graph.insert(Symbol {
            id,
            basic_type: Some(basic),
            size,
            is_const: false,
            is_volatile: false,
            name: name.to_string(),
            type_id: id.0 as u64,
            variant: SymbolVariant::Base,
        })
    }

    /// S1: a struct with a gap between two members gets a synthesized byte
    /// padding member.
    #[test]
    fn padding_member_is_synthesized_for_a_gap() {
        let mut graph = SymbolGraph::new();
        let char_ty = push_base(&mut graph, "char", BasicType::Char, 1);
        let int_ty = push_base(&mut graph, "int", BasicType::Int32, 4);

        let id = graph.next_id();
        graph.insert(Symbol {
            id,
            basic_type: None,
            size: 8,
            is_const: false,
            is_volatile: false,
            name: "Gapped".to_string(),
            type_id: 100,
            variant: SymbolVariant::Udt {
                kind: UdtKind::Struct,
                fields: vec![
                    Field {
                        tag: FieldTag::Data,
                        data_kind: DataKind::Member,
                        name: "a".to_string(),
                        ty: char_ty,
                        offset: 0,
                        bits: 0,
                        bit_position: 0,
                        access: Access::Public,
                        is_base_class: false,
                        parent: id,
                    },
                    Field {
                        tag: FieldTag::Data,
                        data_kind: DataKind::Member,
                        name: "b".to_string(),
                        ty: int_ty,
                        offset: 4,
                        bits: 0,
                        bit_position: 0,
                        access: Access::Public,
                        is_base_class: false,
                        parent: id,
                    },
                ],
                base_classes: vec![],
            },
        });

        let result = reconstruct(&graph, Settings::default()).unwrap();
        assert!(result.skipped.is_empty());
        assert!(result.header.contains("char Padding_0[3];"), "{}", result.header);
        assert!(result.header.contains("int b;"), "{}", result.header);
    }

    /// S2: two members sharing an offset become an anonymous union.
    #[test]
    fn overlapping_members_become_an_anonymous_union() {
        let mut graph = SymbolGraph::new();
        let int_ty = push_base(&mut graph, "int", BasicType::Int32, 4);
        let float_ty = push_base(&mut graph, "float", BasicType::Float32, 4);

        let id = graph.next_id();
        graph.insert(Symbol {
            id,
            basic_type: None,
            size: 4,
            is_const: false,
            is_volatile: false,
            name: "Variant".to_string(),
            type_id: 101,
            variant: SymbolVariant::Udt {
                kind: UdtKind::Struct,
                fields: vec![
                    Field {
                        tag: FieldTag::Data,
                        data_kind: DataKind::Member,
                        name: "i".to_string(),
                        ty: int_ty,
                        offset: 0,
                        bits: 0,
                        bit_position: 0,
                        access: Access::Public,
                        is_base_class: false,
                        parent: id,
                    },
                    Field {
                        tag: FieldTag::Data,
                        data_kind: DataKind::Member,
                        name: "f".to_string(),
                        ty: float_ty,
                        offset: 0,
                        bits: 0,
                        bit_position: 0,
                        access: Access::Public,
                        is_base_class: false,
                        parent: id,
                    },
                ],
                base_classes: vec![],
            },
        });

        let result = reconstruct(&graph, Settings::default()).unwrap();
        assert!(result.header.contains("union"), "{}", result.header);
        assert!(result.header.contains("int i;"), "{}", result.header);
        assert!(result.header.contains("float f;"), "{}", result.header);
    }

    /// S3: a run of bitfields, with a leading padding bitfield for a
    /// nonzero starting bit position.
    #[test]
    fn bitfield_run_is_grouped_and_padded() {
        let mut graph = SymbolGraph::new();
        let uint_ty = push_base(&mut graph, "unsigned int", BasicType::UInt32, 4);

        let id = graph.next_id();
        graph.insert(Symbol {
            id,
            basic_type: None,
            size: 4,
            is_const: false,
            is_volatile: false,
            name: "Flags".to_string(),
            type_id: 102,
            variant: SymbolVariant::Udt {
                kind: UdtKind::Struct,
                fields: vec![
                    Field {
                        tag: FieldTag::Data,
                        data_kind: DataKind::Member,
                        name: "a".to_string(),
                        ty: uint_ty,
                        offset: 0,
                        bits: 3,
                        bit_position: 1,
                        access: Access::Public,
                        is_base_class: false,
                        parent: id,
                    },
                    Field {
                        tag: FieldTag::Data,
                        data_kind: DataKind::Member,
                        name: "b".to_string(),
                        ty: uint_ty,
                        offset: 0,
                        bits: 4,
                        bit_position: 4,
                        access: Access::Public,
                        is_base_class: false,
                        parent: id,
                    },
                ],
                base_classes: vec![],
            },
        });

        let result = reconstruct(&graph, Settings::default()).unwrap();
        assert!(result.header.contains("unsigned int : 1;"), "{}", result.header);
        assert!(result.header.contains("unsigned int a : 3;"), "{}", result.header);
        assert!(result.header.contains("unsigned int b : 4;"), "{}", result.header);
    }

    /// S4: a class with one public non-virtual base and one field emits
    /// the base-class list on the header line and an access specifier
    /// before the field.
    #[test]
    fn class_with_base_emits_base_list_and_access_specifier() {
        let mut graph = SymbolGraph::new();
        let int_ty = push_base(&mut graph, "int", BasicType::Int32, 4);

        let base_id = graph.next_id();
        graph.insert(Symbol {
            id: base_id,
            basic_type: None,
            size: 4,
            is_const: false,
            is_volatile: false,
            name: "B".to_string(),
            type_id: 200,
            variant: SymbolVariant::Udt {
                kind: UdtKind::Struct,
                fields: vec![],
                base_classes: vec![],
            },
        });

        let id = graph.next_id();
        graph.insert(Symbol {
            id,
            basic_type: None,
            size: 8,
            is_const: false,
            is_volatile: false,
            name: "D".to_string(),
            type_id: 201,
            variant: SymbolVariant::Udt {
                kind: UdtKind::Class,
                fields: vec![Field {
                    tag: FieldTag::Data,
                    data_kind: DataKind::Member,
                    name: "m".to_string(),
                    ty: int_ty,
                    offset: 4,
                    bits: 0,
                    bit_position: 0,
                    access: Access::Public,
                    is_base_class: false,
                    parent: id,
                }],
                base_classes: vec![BaseClass {
                    base: base_id,
                    access: Access::Public,
                    is_virtual: false,
                }],
            },
        });

        let result = reconstruct(&graph, Settings::default()).unwrap();
        assert!(result.skipped.is_empty());
        assert!(
            result.header.contains("class D : public B"),
            "{}",
            result.header
        );
        assert!(result.header.contains("public:"), "{}", result.header);
        assert!(result.header.contains("int m;"), "{}", result.header);
    }

    /// S5: an enum's fields are emitted in declaration order, values
    /// rendered in hex.
    #[test]
    fn enum_fields_are_emitted_in_order() {
        let mut graph = SymbolGraph::new();
        let id = graph.next_id();
        graph.insert(Symbol {
            id,
            basic_type: None,
            size: 4,
            is_const: false,
            is_volatile: false,
            name: "E".to_string(),
            type_id: 202,
            variant: SymbolVariant::Enum {
                fields: vec![
                    EnumField {
                        name: "Zero".to_string(),
                        value: EnumValue::Unsigned(0),
                        parent: id,
                    },
                    EnumField {
                        name: "One".to_string(),
                        value: EnumValue::Unsigned(1),
                        parent: id,
                    },
                    EnumField {
                        name: "Two".to_string(),
                        value: EnumValue::Unsigned(2),
                        parent: id,
                    },
                ],
            },
        });

        let result = reconstruct(&graph, Settings::default()).unwrap();
        assert!(result.skipped.is_empty());
        assert!(result.header.contains("enum E"), "{}", result.header);
        assert!(result.header.contains("Zero = 0x0,"), "{}", result.header);
        assert!(result.header.contains("One = 0x1,"), "{}", result.header);
        assert!(result.header.contains("Two = 0x2,"), "{}", result.header);
    }

    /// S6: a struct with a pointer to its own type emits its body exactly
    /// once, using the pointee's name rather than recursing into it again.
    #[test]
    fn self_referential_pointer_emits_once_without_recursing() {
        let mut graph = SymbolGraph::new();

        let id = graph.next_id();
        let pointer_id = graph.next_id();
        graph.insert(Symbol {
            id: pointer_id,
            basic_type: None,
            size: 8,
            is_const: false,
            is_volatile: false,
            name: String::new(),
            type_id: 300,
            variant: SymbolVariant::Pointer {
                pointee: id,
                is_reference: false,
            },
        });
        graph.insert(Symbol {
            id,
            basic_type: None,
            size: 8,
            is_const: false,
            is_volatile: false,
            name: "Node".to_string(),
            type_id: 301,
            variant: SymbolVariant::Udt {
                kind: UdtKind::Struct,
                fields: vec![Field {
                    tag: FieldTag::Data,
                    data_kind: DataKind::Member,
                    name: "next".to_string(),
                    ty: pointer_id,
                    offset: 0,
                    bits: 0,
                    bit_position: 0,
                    access: Access::Public,
                    is_base_class: false,
                    parent: id,
                }],
                base_classes: vec![],
            },
        });

        let result = reconstruct(&graph, Settings::default()).unwrap();
        assert!(result.skipped.is_empty());
        assert_eq!(
            result.header.matches("struct Node").count(),
            1,
            "{}",
            result.header
        );
        assert!(result.header.contains("Node* next;"), "{}", result.header);
    }

    /// S7 (dangling reference): a field pointing at a missing symbol does
    /// not abort the whole run.
    #[test]
    fn dangling_reference_is_skipped_not_fatal() {
        let mut graph = SymbolGraph::new();
        let missing = SymbolId(99);

        let id = graph.next_id();
        graph.insert(Symbol {
            id,
            basic_type: None,
            size: 4,
            is_const: false,
            is_volatile: false,
            name: "Broken".to_string(),
            type_id: 103,
            variant: SymbolVariant::Udt {
                kind: UdtKind::Struct,
                fields: vec![Field {
                    tag: FieldTag::Data,
                    data_kind: DataKind::Member,
                    name: "x".to_string(),
                    ty: missing,
                    offset: 0,
                    bits: 0,
                    bit_position: 0,
                    access: Access::Public,
                    is_base_class: false,
                    parent: id,
                }],
                base_classes: vec![],
            },
        });

        let result = reconstruct(&graph, Settings::default()).unwrap();
        assert_eq!(result.skipped.len(), 1);
    }
}
