//! The base visitor (§4.1): dispatches on a [`Symbol`]'s kind and, for
//! UDTs, groups contiguous bitfield members into ranges before handing
//! fields to the implementor. Contains no state of its own — every hook has
//! a default, recursing implementation, so a minimal visitor (the sorter)
//! only needs to override the handful of hooks it cares about.

use crate::error::{CoreError, CoreResult};
use crate::graph::{EnumField, Field, SymbolGraph, SymbolId, SymbolKind};

/// Capability interface implemented by anything that walks the symbol
/// graph: the sorter (§4.2) and the traversal controller (§4.5) both
/// implement this trait, overriding only the hooks relevant to their job.
pub trait SymbolVisitor {
    /// Dispatches `id` to the matching `visit_*` hook. This is the only
    /// method most implementors call directly; the rest are overridable
    /// hooks.
    fn visit(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let kind = graph.resolve(id)?.kind();
        match kind {
            SymbolKind::Base => self.visit_base(graph, id),
            SymbolKind::Enum => self.visit_enum(graph, id),
            SymbolKind::Typedef => self.visit_typedef(graph, id),
            SymbolKind::Pointer => self.visit_pointer(graph, id),
            SymbolKind::Array => self.visit_array(graph, id),
            SymbolKind::Function => self.visit_function(graph, id),
            SymbolKind::FunctionArg => self.visit_function_arg(graph, id),
            SymbolKind::Udt => self.visit_udt(graph, id),
            SymbolKind::Other => self.visit_other(graph, id),
        }
    }

    /// A primitive type. No payload to recurse into.
    fn visit_base(&mut self, _graph: &SymbolGraph, _id: SymbolId) -> CoreResult<()> {
        Ok(())
    }

    fn visit_typedef(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let underlying = graph
            .resolve(id)?
            .variant
            .as_typedef()
            .ok_or_else(|| CoreError::consistency_violation("typedef kind without payload"))?;
        self.visit(graph, underlying)
    }

    fn visit_pointer(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let (pointee, _is_reference) = graph
            .resolve(id)?
            .variant
            .as_pointer()
            .ok_or_else(|| CoreError::consistency_violation("pointer kind without payload"))?;
        self.visit(graph, pointee)
    }

    fn visit_array(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let (element, _count) = graph
            .resolve(id)?
            .variant
            .as_array()
            .ok_or_else(|| CoreError::consistency_violation("array kind without payload"))?;
        self.visit(graph, element)
    }

    fn visit_function_arg(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let ty = graph
            .resolve(id)?
            .variant
            .as_function_arg()
            .ok_or_else(|| CoreError::consistency_violation("function-arg kind without payload"))?;
        self.visit(graph, ty)
    }

    /// Iterates enumerators in source order, issuing [`Self::visit_enum_field`].
    fn visit_enum(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let fields = graph
            .resolve(id)?
            .variant
            .as_enum()
            .ok_or_else(|| CoreError::consistency_violation("enum kind without payload"))?;
        for field in fields {
            self.visit_enum_field(graph, id, field)?;
        }
        Ok(())
    }

    fn visit_enum_field(
        &mut self,
        _graph: &SymbolGraph,
        _parent: SymbolId,
        _field: &EnumField,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A function signature. Recurses into the return type, then each
    /// argument in order, matching the recursing default given to every
    /// other referenced-type hook (typedef/pointer/array/function-arg).
    /// The definition builder (§4.4) additionally threads declarator
    /// fragments through this same shape, but that is a different
    /// capability (`FieldDefinitionVisitor`), not this one.
    fn visit_function(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let symbol = graph.resolve(id)?;
        let (return_type, arguments) = match &symbol.variant {
            crate::graph::SymbolVariant::Function {
                return_type,
                arguments,
                ..
            } => (*return_type, arguments.as_slice()),
            _ => return Err(CoreError::consistency_violation("function kind without payload")),
        };
        self.visit(graph, return_type)?;
        for arg in arguments {
            self.visit(graph, *arg)?;
        }
        Ok(())
    }

    fn visit_other(&mut self, _graph: &SymbolGraph, _id: SymbolId) -> CoreResult<()> {
        Ok(())
    }

    /// Default field iteration for a UDT: groups contiguous bitfield
    /// members into ranges, bracketing everything else with
    /// begin/field/end. A bitfield run ends on the first subsequent field
    /// whose `bit_position == 0` (§4.1).
    fn visit_udt(&mut self, graph: &SymbolGraph, id: SymbolId) -> CoreResult<()> {
        let fields = graph
            .resolve(id)?
            .variant
            .as_udt()
            .ok_or_else(|| CoreError::consistency_violation("udt kind without payload"))?
            .1;
        let mut i = 0;
        while i < fields.len() {
            let field = &fields[i];
            if field.bits != 0 {
                let first = i;
                let mut last = i;
                self.visit_udt_field_bitfield_begin(graph, id, &fields[first]);
                loop {
                    self.visit_udt_field_bitfield(graph, id, &fields[last])?;
                    let next = last + 1;
                    if next >= fields.len() || fields[next].bit_position == 0 {
                        break;
                    }
                    last = next;
                }
                self.visit_udt_field_bitfield_end(graph, id, &fields[first], &fields[last]);
                i = last + 1;
            } else {
                self.visit_udt_field_begin(graph, id, field);
                self.visit_udt_field(graph, id, field)?;
                self.visit_udt_field_end(graph, id, field);
                i += 1;
            }
        }
        Ok(())
    }

    fn visit_udt_field_begin(&mut self, _graph: &SymbolGraph, _owner: SymbolId, _field: &Field) {}

    /// Default behavior recurses into the field's type, matching the
    /// sorter's use of this hook (§4.2): it only needs every referenced
    /// type visited, not the declarator text.
    fn visit_udt_field(
        &mut self,
        graph: &SymbolGraph,
        _owner: SymbolId,
        field: &Field,
    ) -> CoreResult<()> {
        self.visit(graph, field.ty)
    }

    fn visit_udt_field_end(&mut self, _graph: &SymbolGraph, _owner: SymbolId, _field: &Field) {}

    fn visit_udt_field_bitfield_begin(
        &mut self,
        _graph: &SymbolGraph,
        _owner: SymbolId,
        _first: &Field,
    ) {
    }

    fn visit_udt_field_bitfield(
        &mut self,
        graph: &SymbolGraph,
        owner: SymbolId,
        field: &Field,
    ) -> CoreResult<()> {
        self.visit_udt_field(graph, owner, field)
    }

    fn visit_udt_field_bitfield_end(
        &mut self,
        _graph: &SymbolGraph,
        _owner: SymbolId,
        _first: &Field,
        _last: &Field,
    ) {
    }
}
