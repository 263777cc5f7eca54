//! The traversal controller (§4.5): owns the recursive descent through one
//! top-level symbol, driving the [`ReconstructorCallbacks`] a
//! [`HeaderReconstructor`](crate::reconstruct::HeaderReconstructor) (or any
//! other implementor) exposes. Rust's own call stack plays the role of the
//! original's explicit builder-frame stack — one stack frame per active
//! field declarator falls out of the recursion for free, so there is no
//! separate `Vec<Builder>` to manage here.
//!
//! This module also owns the anonymous-aggregate inference (§4.3): rather
//! than the original's single streaming pass that opens/closes aggregates
//! as it walks, fields are grouped into a small tree of [`LayoutItem`]s
//! first, then printed — two simpler, independently testable phases in
//! place of one intertwined one.

use crate::builder::{FieldDefinitionBuilder, FunctionEndInfo};
use crate::error::{CoreError, CoreResult};
use crate::graph::{
    BaseClass, DataKind, Field, FieldTag, SymbolGraph, SymbolId, SymbolKind, SymbolVariant, UdtKind,
};
use crate::reconstruct::{BaseDescriptor, ReconstructorCallbacks};

fn is_synthetic_skip_name(name: &str) -> bool {
    name == "__local_vftable_ctor_closure" || name == "__vecDelDtor"
}

/// A field or contiguous run of bitfield members, with bitfield ranges
/// collapsed to a single offset for aggregate/padding comparisons (§4.3:
/// "the next non-static, non-bitfield data member ... with bitfield ranges
/// collapsed").
#[derive(Clone)]
enum Collapsed {
    Single(Field),
    Run(Vec<Field>),
}

impl Collapsed {
    fn offset(&self) -> u64 {
        match self {
            Collapsed::Single(f) => f.offset,
            Collapsed::Run(v) => v[0].offset,
        }
    }
}

fn collapse_bitfields(fields: &[Field]) -> Vec<Collapsed> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < fields.len() {
        if fields[i].bits != 0 {
            let first = i;
            let mut last = i;
            while last + 1 < fields.len() && fields[last + 1].bit_position != 0 {
                last += 1;
            }
            out.push(Collapsed::Run(fields[first..=last].to_vec()));
            i = last + 1;
        } else {
            out.push(Collapsed::Single(fields[i].clone()));
            i += 1;
        }
    }
    out
}

/// One printable item inside a UDT's body, after anonymous-aggregate
/// inference.
enum LayoutItem {
    Field(Field),
    BitfieldRun(Vec<Field>),
    Padding { offset: u64, gap: u64 },
    Anonymous {
        kind: UdtKind,
        items: Vec<LayoutItem>,
        offset: u64,
        size: u64,
    },
}

struct Pending {
    kind: UdtKind,
    offset: u64,
    items: Vec<LayoutItem>,
    size: u64,
}

fn current_items<'a>(stack: &'a mut Vec<Pending>, top: &'a mut Vec<LayoutItem>) -> &'a mut Vec<LayoutItem> {
    match stack.last_mut() {
        Some(p) => &mut p.items,
        None => top,
    }
}

/// Drives one top-level symbol's emission.
pub struct TraversalController<'g, C> {
    graph: &'g SymbolGraph,
    callbacks: C,
    /// Set by `print_passthrough` right before descending into a
    /// constructor's or destructor's own type; consumed by the `Function`
    /// arm of `describe_type` to skip the return-type descent (§4.3:
    /// "destructors and constructors ... render without a return type").
    suppress_next_return_type: bool,
}

impl<'g, C: ReconstructorCallbacks> TraversalController<'g, C> {
    pub fn new(graph: &'g SymbolGraph, callbacks: C) -> Self {
        TraversalController {
            graph,
            callbacks,
            suppress_next_return_type: false,
        }
    }

    pub fn into_callbacks(self) -> C {
        self.callbacks
    }

    /// Emits `id` (a UDT or enum, per the sorter's contract) as a complete
    /// top-level declaration.
    pub fn emit<B: FieldDefinitionBuilder>(&mut self, id: SymbolId) -> CoreResult<()> {
        let symbol = self.graph.resolve(id)?;
        match symbol.kind() {
            SymbolKind::Enum => self.emit_enum(id),
            SymbolKind::Udt => self.emit_udt::<B>(id, 0),
            _ => Ok(()),
        }
    }

    fn emit_enum(&mut self, id: SymbolId) -> CoreResult<()> {
        let symbol = self.graph.resolve(id)?;
        let name = self.callbacks.correct_name(&symbol.name, symbol.is_unnamed());
        let fields = symbol
            .variant
            .as_enum()
            .ok_or_else(|| CoreError::consistency_violation("enum kind without payload"))?;
        self.callbacks.on_enum_begin(&name);
        for field in fields {
            self.callbacks.on_enum_field(&field.name, field.value);
        }
        self.callbacks.on_enum_end();
        Ok(())
    }

    fn emit_udt<B: FieldDefinitionBuilder>(&mut self, id: SymbolId, depth: usize) -> CoreResult<()> {
        let symbol = self.graph.resolve(id)?;
        let name = self.callbacks.correct_name(&symbol.name, symbol.is_unnamed());
        let (kind, fields, base_classes) = symbol
            .variant
            .as_udt()
            .ok_or_else(|| CoreError::consistency_violation("udt kind without payload"))?;
        let is_class = matches!(kind, UdtKind::Class);

        let bases = self.build_base_descriptors(base_classes)?;
        self.callbacks.on_udt_begin(kind, &name, &bases);

        let layout_fields = select_layout_fields(fields);
        let base_floor = self.base_class_size_sum(base_classes)?;
        let collapsed = collapse_bitfields(&layout_fields);
        let items = self.group_layout(&collapsed, base_floor)?;
        self.print_items::<B>(&items, 0, is_class, depth + 1)?;

        let passthrough = select_passthrough_fields(fields);
        self.print_passthrough::<B>(id, base_classes, &passthrough, is_class, depth + 1)?;

        self.callbacks.on_udt_end(symbol.size);
        Ok(())
    }

    fn build_base_descriptors(&self, base_classes: &[BaseClass]) -> CoreResult<Vec<BaseDescriptor>> {
        base_classes
            .iter()
            .map(|b| {
                let base_symbol = self.graph.resolve(b.base)?;
                Ok(BaseDescriptor {
                    access: b.access,
                    is_virtual: b.is_virtual,
                    name: self
                        .callbacks
                        .correct_name(&base_symbol.name, base_symbol.is_unnamed()),
                })
            })
            .collect()
    }

    fn base_class_size_sum(&self, base_classes: &[BaseClass]) -> CoreResult<u64> {
        let mut total = 0u64;
        for b in base_classes {
            total += self.graph.resolve(b.base)?.size;
        }
        Ok(total)
    }

    /// Groups collapsed fields into a tree of [`LayoutItem`]s: contiguous
    /// runs sharing a storage offset become an anonymous union, strictly
    /// increasing runs following one become an anonymous struct, and gaps
    /// against the running offset become padding (§4.3 "Anonymous-aggregate
    /// inference"). `base_floor` seeds the running offset with the space
    /// already claimed by base classes, so the gap between offset 0 and the
    /// first own field is never mistaken for padding.
    fn group_layout(&self, collapsed: &[Collapsed], base_floor: u64) -> CoreResult<Vec<LayoutItem>> {
        let mut stack: Vec<Pending> = Vec::new();
        let mut top: Vec<LayoutItem> = Vec::new();
        let mut prev_end: Vec<Option<u64>> = vec![Some(base_floor)];

        for i in 0..collapsed.len() {
            let cur = &collapsed[i];
            let cur_offset = cur.offset();
            let cur_size = self.collapsed_size(cur)?;
            let next = collapsed.get(i + 1);
            let next_offset = next.map(|n| n.offset());

            if let Some(no) = next_offset {
                let opens_union = no == cur_offset
                    && stack
                        .last()
                        .map_or(true, |a| matches!(a.kind, UdtKind::Struct) && no >= a.offset);
                let opens_struct = !opens_union
                    && no > cur_offset
                    && stack
                        .last()
                        .map_or(true, |a| matches!(a.kind, UdtKind::Union) && no >= a.offset);
                if opens_union {
                    stack.push(Pending {
                        kind: UdtKind::Union,
                        offset: cur_offset,
                        items: Vec::new(),
                        size: 0,
                    });
                    prev_end.push(None);
                } else if opens_struct {
                    stack.push(Pending {
                        kind: UdtKind::Struct,
                        offset: cur_offset,
                        items: Vec::new(),
                        size: 0,
                    });
                    prev_end.push(None);
                }
            }

            let depth_idx = prev_end.len() - 1;
            if let Some(end) = prev_end[depth_idx] {
                if cur_offset > end {
                    let gap = cur_offset - end;
                    current_items(&mut stack, &mut top).push(LayoutItem::Padding { offset: end, gap });
                }
            }

            let item = match cur.clone() {
                Collapsed::Single(f) => LayoutItem::Field(f),
                Collapsed::Run(v) => LayoutItem::BitfieldRun(v),
            };
            current_items(&mut stack, &mut top).push(item);

            if let Some(agg) = stack.last_mut() {
                agg.size = match agg.kind {
                    UdtKind::Union => agg.size.max(cur_size),
                    _ => agg.size + cur_size,
                };
            }
            *prev_end.last_mut().unwrap() = Some(cur_offset + cur_size);

            loop {
                let should_end = match stack.last() {
                    None => false,
                    Some(agg) => match agg.kind {
                        UdtKind::Union => next_offset.map_or(true, |o| o != agg.offset),
                        _ => next_offset.map_or(true, |o| o <= cur_offset),
                    },
                };
                if !should_end {
                    break;
                }
                let agg = stack.pop().unwrap();
                prev_end.pop();
                let agg_size = agg.size;
                let agg_offset = agg.offset;
                let agg_kind = agg.kind;
                let item = LayoutItem::Anonymous {
                    kind: agg_kind,
                    items: agg.items,
                    offset: agg_offset,
                    size: agg_size,
                };
                current_items(&mut stack, &mut top).push(item);
                if let Some(parent) = stack.last_mut() {
                    parent.size = match parent.kind {
                        UdtKind::Union => parent.size.max(agg_size),
                        _ => parent.size + agg_size,
                    };
                    *prev_end.last_mut().unwrap() = Some(agg_offset + agg_size);
                }
            }
        }
        Ok(top)
    }

    fn collapsed_size(&self, c: &Collapsed) -> CoreResult<u64> {
        let ty = match c {
            Collapsed::Single(f) => f.ty,
            Collapsed::Run(v) => v[0].ty,
        };
        Ok(self.graph.resolve(ty)?.size)
    }

    fn print_items<B: FieldDefinitionBuilder>(
        &mut self,
        items: &[LayoutItem],
        base_offset: u64,
        is_class: bool,
        depth: usize,
    ) -> CoreResult<()> {
        for item in items {
            match item {
                LayoutItem::Field(f) => self.print_plain_field::<B>(f, base_offset, is_class, depth)?,
                LayoutItem::BitfieldRun(run) => self.print_bitfield_run(run, is_class)?,
                LayoutItem::Padding { offset, gap } => self.print_padding(base_offset + offset, *gap)?,
                LayoutItem::Anonymous {
                    kind,
                    items,
                    size,
                    ..
                } => {
                    self.callbacks.on_anonymous_begin(*kind);
                    self.print_items::<B>(items, base_offset, is_class, depth + 1)?;
                    let name = self.callbacks.next_anonymous_name(*kind);
                    self.callbacks.on_anonymous_end(*kind, name.as_deref(), *size);
                }
            }
        }
        Ok(())
    }

    fn print_plain_field<B: FieldDefinitionBuilder>(
        &mut self,
        field: &Field,
        base_offset: u64,
        is_class: bool,
        depth: usize,
    ) -> CoreResult<()> {
        if is_class {
            self.callbacks.on_access_change(field.access);
        }
        let absolute_offset = base_offset + field.offset;
        let ty_symbol = self.graph.resolve(field.ty)?;

        if let SymbolVariant::Udt {
            kind,
            fields,
            base_classes,
        } = &ty_symbol.variant
        {
            let is_unnamed = ty_symbol.is_unnamed();
            let size = ty_symbol.size;
            let kind = *kind;
            let fields = fields.clone();
            let base_classes = base_classes.clone();
            let already = self.callbacks.mark_expanded(field.ty.0);
            if self.callbacks.should_expand(depth, is_unnamed, already, size) {
                let base_floor = self.base_class_size_sum(&base_classes)?;
                let layout_fields = select_layout_fields(&fields);
                let collapsed = collapse_bitfields(&layout_fields);
                let items = self.group_layout(&collapsed, base_floor)?;
                self.callbacks.on_anonymous_begin(kind);
                self.print_items::<B>(&items, 0, matches!(kind, UdtKind::Class), depth + 1)?;
                self.callbacks.on_anonymous_end(kind, Some(&field.name), size);
                return Ok(());
            }
        }

        let mut builder = B::default();
        builder.set_member_name(&field.name);
        self.describe_type(field.ty, &mut builder)?;
        let mut printable = builder.printable_definition();
        if field.data_kind == DataKind::Static {
            printable = format!("static {printable}");
        }
        let offset = if field.data_kind == DataKind::Static
            || matches!(ty_symbol.kind(), SymbolKind::Function)
        {
            None
        } else {
            Some(absolute_offset)
        };
        self.callbacks.on_field(offset, &printable);
        Ok(())
    }

    fn print_bitfield_run(&mut self, run: &[Field], is_class: bool) -> CoreResult<()> {
        if is_class {
            if let Some(first) = run.first() {
                self.callbacks.on_access_change(first.access);
            }
        }
        let wrap = run.len() > 1 && !self.callbacks.allow_bitfields_in_union();
        if wrap {
            self.callbacks.on_bitfield_run_begin();
        }
        if let Some(first) = run.first() {
            if first.bit_position != 0 {
                let storage = self.graph.resolve(first.ty)?;
                let spelling = storage.basic_type.map(|b| b.spelling()).unwrap_or("unsigned int");
                let name = self.callbacks.next_bitfield_padding_member_name();
                let declarator = if name.is_empty() {
                    format!("{spelling} : {}", first.bit_position)
                } else {
                    format!("{spelling} {name} : {}", first.bit_position)
                };
                self.callbacks.on_field(None, &format!("{declarator} /* 0 */"));
            }
        }
        for field in run {
            let storage = self.graph.resolve(field.ty)?;
            let spelling = storage.basic_type.map(|b| b.spelling()).unwrap_or("int");
            let declarator = format!("{spelling} {} : {}", field.name, field.bits);
            self.callbacks
                .on_field(None, &format!("{declarator} /* {} */", field.bit_position));
        }
        if wrap {
            self.callbacks.on_bitfield_run_end();
        }
        Ok(())
    }

    fn print_padding(&mut self, offset: u64, gap: u64) -> CoreResult<()> {
        if !self.callbacks.create_padding_members() {
            return Ok(());
        }
        let name = self.callbacks.next_padding_member_name();
        let printable = if gap == 1 {
            format!("char {name}")
        } else {
            format!("char {name}[{gap}]")
        };
        self.callbacks.on_padding_member(Some(offset), &printable);
        Ok(())
    }

    /// Static members and methods: rendered after the laid-out data
    /// members, in declaration order among themselves. Interleaving them
    /// byte-for-byte with data members' print order would need per-field
    /// index bookkeeping through the grouping pass; declaration order
    /// among data members (invariant 3) does not depend on it, so this
    /// crate takes the simpler two-block layout instead.
    fn print_passthrough<B: FieldDefinitionBuilder>(
        &mut self,
        owner: SymbolId,
        base_classes: &[BaseClass],
        fields: &[Field],
        is_class: bool,
        _depth: usize,
    ) -> CoreResult<()> {
        let owner_name = self.graph.resolve(owner)?.name.clone();
        for field in fields {
            if is_class {
                self.callbacks.on_access_change(field.access);
            }
            if matches!(field.tag, FieldTag::Method) {
                self.resolve_override_virtual_offset(owner, base_classes, field)?;
            }
            let is_ctor_or_dtor = matches!(field.tag, FieldTag::Method)
                && (field.name == owner_name || field.name == format!("~{owner_name}"));
            let mut builder = B::default();
            builder.set_member_name(&field.name);
            if is_ctor_or_dtor {
                self.suppress_next_return_type = true;
            }
            self.describe_type(field.ty, &mut builder)?;
            let mut printable = builder.printable_definition();
            if field.data_kind == DataKind::Static {
                printable = format!("static {printable}");
            }
            self.callbacks.on_field(None, &printable);
        }
        Ok(())
    }

    /// Late-binds an overriding method's `virtualOffset` by (name, arity)
    /// lookup against the immediate base classes (§3 Lifecycle, §4.3).
    /// Looks one level up the hierarchy, matching the common
    /// single-inheritance case; deeper multi-level overrides are not
    /// chased transitively.
    fn resolve_override_virtual_offset(
        &self,
        _owner: SymbolId,
        base_classes: &[BaseClass],
        field: &Field,
    ) -> CoreResult<()> {
        let func_symbol = self.graph.resolve(field.ty)?;
        let (is_override, virtual_offset, arity) = match &func_symbol.variant {
            SymbolVariant::Function {
                is_override,
                virtual_offset,
                arguments,
                ..
            } => (*is_override, virtual_offset, arguments.len()),
            _ => return Ok(()),
        };
        if !is_override || virtual_offset.borrow().is_some() {
            return Ok(());
        }
        for base in base_classes {
            let base_symbol = self.graph.resolve(base.base)?;
            let Some((_, base_fields, _)) = base_symbol.variant.as_udt() else {
                continue;
            };
            for base_field in base_fields {
                if base_field.name != field.name {
                    continue;
                }
                let Ok(base_func) = self.graph.resolve(base_field.ty) else {
                    continue;
                };
                if let SymbolVariant::Function {
                    arguments: base_args,
                    virtual_offset: base_offset,
                    ..
                } = &base_func.variant
                {
                    if base_args.len() == arity {
                        if let Some(offset) = *base_offset.borrow() {
                            *virtual_offset.borrow_mut() = Some(offset);
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Descends a field's (or argument's, or return type's) type chain,
    /// accumulating declarator fragments into `builder` (§4.4).
    fn describe_type<B: FieldDefinitionBuilder>(&mut self, ty: SymbolId, builder: &mut B) -> CoreResult<()> {
        let symbol = self.graph.resolve(ty)?;
        match &symbol.variant {
            SymbolVariant::Base => {
                let spelling = symbol.basic_type.map(|b| b.spelling()).unwrap_or("int");
                let is_80bit = matches!(symbol.basic_type, Some(crate::graph::BasicType::Float80));
                builder.visit_base(spelling, symbol.is_const, symbol.is_volatile, is_80bit);
                Ok(())
            }
            SymbolVariant::Enum { .. } | SymbolVariant::Typedef { .. } => {
                let name = self.callbacks.correct_name(&symbol.name, symbol.is_unnamed());
                builder.visit_named(&name, symbol.is_const, symbol.is_volatile);
                Ok(())
            }
            SymbolVariant::Udt { .. } => {
                let name = self.callbacks.correct_name(&symbol.name, symbol.is_unnamed());
                builder.visit_named(&name, symbol.is_const, symbol.is_volatile);
                Ok(())
            }
            SymbolVariant::Pointer {
                pointee,
                is_reference,
            } => {
                let pointee = *pointee;
                let is_reference = *is_reference;
                let is_const = symbol.is_const;
                let is_volatile = symbol.is_volatile;
                let pointee_is_function =
                    matches!(self.graph.resolve(pointee)?.kind(), SymbolKind::Function);
                self.describe_type(pointee, builder)?;
                builder.visit_pointer_end(pointee_is_function, is_reference, is_const, is_volatile);
                Ok(())
            }
            SymbolVariant::Array { element, count } => {
                let element = *element;
                let count = *count;
                self.describe_type(element, builder)?;
                builder.visit_array_end(count);
                Ok(())
            }
            SymbolVariant::FunctionArg { ty } => {
                let ty = *ty;
                self.describe_type(ty, builder)
            }
            SymbolVariant::Function {
                return_type,
                calling_convention,
                is_static,
                is_virtual,
                is_override,
                is_const,
                is_pure,
                virtual_offset,
                arguments,
                ..
            } => {
                let return_type = *return_type;
                let calling_convention = *calling_convention;
                let is_static = *is_static;
                let is_virtual = *is_virtual;
                let is_override = *is_override;
                let is_const = *is_const;
                let is_pure = *is_pure;
                let resolved_virtual_offset = *virtual_offset.borrow();
                let arguments = arguments.clone();
                let skip_return_type = std::mem::take(&mut self.suppress_next_return_type);

                builder.visit_function_begin();
                for arg in &arguments {
                    self.describe_type(*arg, builder)?;
                    builder.visit_function_arg_end();
                }
                if !skip_return_type {
                    self.describe_type(return_type, builder)?;
                }
                builder.visit_function_end(FunctionEndInfo {
                    calling_convention: calling_convention.keyword(),
                    is_static,
                    is_virtual,
                    is_override,
                    is_const,
                    is_pure,
                    virtual_offset: resolved_virtual_offset,
                });
                Ok(())
            }
            SymbolVariant::Other => {
                builder.visit_named("/* unresolved */", false, false);
                Ok(())
            }
        }
    }
}

/// Fields that MUST be skipped during emission entirely (§4.5): the
/// vtable pointer, base-class pseudo-members (surfaced instead via the
/// base-class list), and the two compiler-synthesized helper names.
fn select_layout_fields(fields: &[Field]) -> Vec<Field> {
    fields
        .iter()
        .filter(|f| {
            matches!(f.tag, FieldTag::Data)
                && f.data_kind != DataKind::Static
                && !is_synthetic_skip_name(&f.name)
        })
        .cloned()
        .collect()
}

fn select_passthrough_fields(fields: &[Field]) -> Vec<Field> {
    fields
        .iter()
        .filter(|f| {
            !matches!(f.tag, FieldTag::VTable | FieldTag::BaseClass)
                && !is_synthetic_skip_name(&f.name)
                && (f.data_kind == DataKind::Static || matches!(f.tag, FieldTag::Method))
        })
        .cloned()
        .collect()
}
