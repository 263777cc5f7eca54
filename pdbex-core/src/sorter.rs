//! The symbol sorter (§4.2): chooses an emission order for top-level
//! symbols such that every UDT/enum referenced by name is emitted before
//! its first textual use, and infers the target's pointer width along the
//! way.

use std::collections::HashSet;

use crate::error::{CoreError, CoreResult};
use crate::graph::{Symbol, SymbolGraph, SymbolId, SymbolKind};
use crate::visitor::SymbolVisitor;

/// Pointer-width-derived guess at the target image's architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Architecture {
    #[default]
    Unknown,
    X86,
    X64,
}

/// Recursive post-order visitor that produces emission order. Reusable
/// across sorts of the same graph (state is reset at the top of
/// [`Sorter::sort`]), but a fresh `Sorter` per graph is the common case.
#[derive(Debug, Default)]
pub struct Sorter {
    visited: HashSet<String>,
    unnamed_counter: u32,
    order: Vec<SymbolId>,
    architecture: Architecture,
    architecture_known: bool,
    errors: Vec<CoreError>,
}

impl Sorter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visits every UDT and enum in `graph` in declaration order, each of
    /// which recursively visits its own referenced types first (§4.2),
    /// and returns the resulting post-order top-level emission sequence.
    /// Idempotent: a second call on the same graph yields the same order.
    ///
    /// A dangling reference partway through one top-level symbol's subtree
    /// drops that symbol from the order rather than aborting the whole
    /// sort (§7); the failure is recorded and available via [`Self::errors`].
    pub fn sort(&mut self, graph: &SymbolGraph) -> CoreResult<Vec<SymbolId>> {
        self.visited.clear();
        self.unnamed_counter = 0;
        self.order.clear();
        self.architecture = Architecture::Unknown;
        self.architecture_known = false;
        self.errors.clear();

        for symbol in graph.iter() {
            match symbol.kind() {
                SymbolKind::Udt | SymbolKind::Enum => {
                    if let Err(err) = self.visit(graph, symbol.id) {
                        tracing::warn!(symbol = %symbol.id, error = %err, "skipping symbol during sort");
                        self.errors.push(err);
                    }
                }
                _ => {}
            }
        }
        Ok(self.order.clone())
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Sort-phase failures recorded by the most recent [`Self::sort`] call.
    pub fn errors(&self) -> &[CoreError] {
        &self.errors
    }

    /// Invariant-6-aware visited check: named symbols dedupe by name;
    /// unnamed symbols are keyed with a freshly incremented per-run
    /// counter before the lookup, so the membership test always misses —
    /// each anonymous occurrence is therefore always treated as a new,
    /// distinct visit (Design Note "process-wide unnamed counter", scoped
    /// per-run here via `self.unnamed_counter`). Returns `true` if `symbol`
    /// had already been visited under its (possibly counter-augmented) key.
    fn mark_visited(&mut self, symbol: &Symbol) -> bool {
        let key = if symbol.is_unnamed() {
            self.unnamed_counter += 1;
            format!("{}#{}", symbol.name, self.unnamed_counter)
        } else {
            symbol.name.clone()
        };
        !self.visited.insert(key)
    }
}

impl SymbolVisitor for Sorter {
    fn visit_enum(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let symbol = graph.resolve(id)?;
        if self.mark_visited(symbol) {
            return Ok(());
        }
        self.order.push(id);
        Ok(())
    }

    fn visit_pointer(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        if !self.architecture_known {
            let size = graph.resolve(id)?.size;
            self.architecture = match size {
                4 => Architecture::X86,
                8 => Architecture::X64,
                _ => Architecture::Unknown,
            };
            self.architecture_known = true;
        }
        let (pointee, _is_reference) = graph
            .resolve(id)?
            .variant
            .as_pointer()
            .ok_or_else(|| CoreError::consistency_violation("pointer kind without payload"))?;
        self.visit(graph, pointee)
    }

    /// Descends into each field's type, then each base class, then appends
    /// this UDT's own ID once — a plain post-order DFS, bypassing the base
    /// visitor's bitfield-grouping (the sorter only needs every referenced
    /// type visited, not field declarator text).
    fn visit_udt(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let symbol = graph.resolve(id)?;
        if self.mark_visited(symbol) {
            return Ok(());
        }
        let (_kind, fields, base_classes) = symbol
            .variant
            .as_udt()
            .ok_or_else(|| CoreError::consistency_violation("udt kind without payload"))?;
        for field in fields {
            self.visit(graph, field.ty)?;
        }
        for base in base_classes {
            self.visit(graph, base.base)?;
        }
        self.order.push(id);
        Ok(())
    }
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

    #[test]
    fn order_is_deterministic_across_repeated_sorts() {
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
            name: "Foo".to_string(),
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

        let mut sorter = Sorter::new();
        let first = sorter.sort(&graph).unwrap();
        let second = sorter.sort(&graph).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![id]);
    }

    #[test]
    fn self_referential_pointer_does_not_infinite_loop() {
        let mut graph = SymbolGraph::new();
        let node_id = graph.next_id();
        let ptr_id = SymbolId(node_id.0 + 1);

        graph.insert(Symbol {
            id: node_id,
            basic_type: None,
            size: 8,
            is_const: false,
            is_volatile: false,
            name: "Node".to_string(),
            type_id: 1,
            variant: SymbolVariant::Udt {
                kind: UdtKind::Struct,
                fields: vec![Field {
                    tag: FieldTag::Data,
                    data_kind: DataKind::Member,
                    name: "next".to_string(),
                    ty: ptr_id,
                    offset: 0,
                    bits: 0,
                    bit_position: 0,
                    access: Access::Public,
                    is_base_class: false,
                    parent: node_id,
                }],
                base_classes: vec![],
            },
        });
        graph.insert(Symbol {
            id: ptr_id,
            basic_type: None,
            size: 8,
            is_const: false,
            is_volatile: false,
            name: String::new(),
            type_id: 2,
            variant: SymbolVariant::Pointer {
                pointee: node_id,
                is_reference: false,
            },
        });

        let mut sorter = Sorter::new();
        let order = sorter.sort(&graph).unwrap();
        assert_eq!(order, vec![node_id]);
        assert_eq!(sorter.architecture(), Architecture::X64);
    }
}
