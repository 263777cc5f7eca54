//! The reconstructor (§4.3): the callback surface a traversal drives to
//! render one top-level symbol's declaration. Mirrors the shape of the
//! original's `PDBReconstructorBase` interface — a capability trait, not a
//! base class (Design Note "Polymorphic visitors") — implemented here by
//! [`HeaderReconstructor`], the only implementation this crate ships.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::graph::{Access, EnumValue, UdtKind};

/// Nested-structure expansion policy (§4.3 "Emission model").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpansionPolicy {
    /// Only the top-most UDT/enum is expanded; nested types appear by name.
    None,
    /// Inline only unnamed UDTs; named nested types appear by name.
    #[default]
    InlineUnnamed,
    /// Inline any nested type not yet emitted during the current pass.
    InlineAll,
}

/// One entry of a UDT's base-class list, pre-rendered for the callback
/// surface (name already resolved by the traversal controller).
pub struct BaseDescriptor {
    pub access: Access,
    pub is_virtual: bool,
    pub name: String,
}

/// Tunables mirroring the original `Settings` struct; CLI flags (§6) map
/// onto these.
pub struct Settings {
    pub member_struct_expansion: ExpansionPolicy,
    pub padding_member_prefix: String,
    pub bitfield_padding_member_prefix: String,
    pub unnamed_type_prefix: String,
    pub symbol_prefix: String,
    pub symbol_suffix: String,
    pub anonymous_struct_prefix: String,
    pub anonymous_union_prefix: String,
    pub create_padding_members: bool,
    pub show_offsets: bool,
    pub allow_bitfields_in_union: bool,
    pub allow_anonymous_data_types: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            member_struct_expansion: ExpansionPolicy::InlineUnnamed,
            padding_member_prefix: "Padding_".to_string(),
            bitfield_padding_member_prefix: String::new(),
            unnamed_type_prefix: String::new(),
            symbol_prefix: String::new(),
            symbol_suffix: String::new(),
            anonymous_struct_prefix: "s".to_string(),
            anonymous_union_prefix: "u".to_string(),
            create_padding_members: true,
            show_offsets: true,
            allow_bitfields_in_union: false,
            allow_anonymous_data_types: true,
        }
    }
}

/// Callback surface the traversal controller drives. One call sequence per
/// top-level symbol.
pub trait ReconstructorCallbacks {
    fn on_enum_begin(&mut self, name: &str);
    fn on_enum_field(&mut self, name: &str, value: EnumValue);
    fn on_enum_end(&mut self);

    fn on_udt_begin(&mut self, kind: UdtKind, name: &str, bases: &[BaseDescriptor]);
    fn on_udt_end(&mut self, size: u64);

    /// Called whenever the access level of consecutive fields changes
    /// (class UDTs only).
    fn on_access_change(&mut self, access: Access);

    fn on_field(&mut self, offset: Option<u64>, printable: &str);
    fn on_padding_member(&mut self, offset: Option<u64>, printable: &str);

    fn on_anonymous_begin(&mut self, kind: UdtKind);
    fn on_anonymous_end(&mut self, kind: UdtKind, name: Option<&str>, size: u64);

    /// Only called when the run has more than one member and
    /// `allow_bitfields_in_union` is false — the original's synthetic
    /// wrapping struct around a multi-member bitfield run.
    fn on_bitfield_run_begin(&mut self);
    fn on_bitfield_run_end(&mut self);

    /// Applies `symbol_prefix`/`symbol_suffix` to a named symbol, or
    /// `unnamed_type_prefix` to an unnamed one.
    fn correct_name(&self, raw: &str, is_unnamed: bool) -> String;

    /// `shouldExpand` (§4.3): depth 0 always expands (for any policy);
    /// beyond that it depends on the configured [`ExpansionPolicy`].
    fn should_expand(&self, depth: usize, is_unnamed: bool, already_visited: bool, size: u64) -> bool;

    /// Marks `id` as expanded during the current top-level pass, for
    /// `InlineAll`'s once-per-pass bookkeeping. Returns whether it was
    /// already marked.
    fn mark_expanded(&mut self, id: u32) -> bool;

    fn next_anonymous_name(&mut self, kind: UdtKind) -> Option<String>;
    fn next_padding_member_name(&mut self) -> String;
    fn next_bitfield_padding_member_name(&mut self) -> String;
    fn allow_bitfields_in_union(&self) -> bool;
    fn create_padding_members(&self) -> bool;
}

/// The default, text-emitting [`ReconstructorCallbacks`] implementation.
pub struct HeaderReconstructor<W> {
    pub settings: Settings,
    sink: W,
    depth: usize,
    last_access: Option<Access>,
    visited: HashSet<u32>,
    anonymous_counter: u32,
    padding_counter: u32,
    bitfield_padding_counter: u32,
}

impl<W: std::fmt::Write> HeaderReconstructor<W> {
    pub fn new(sink: W, settings: Settings) -> Self {
        HeaderReconstructor {
            settings,
            sink,
            depth: 0,
            last_access: None,
            visited: HashSet::new(),
            anonymous_counter: 0,
            padding_counter: 0,
            bitfield_padding_counter: 0,
        }
    }

    /// Resets per-pass state (§5: reconstructor state "MUST be reset
    /// between passes").
    pub fn reset_pass(&mut self) {
        self.visited.clear();
        self.anonymous_counter = 0;
        self.padding_counter = 0;
        self.bitfield_padding_counter = 0;
        self.last_access = None;
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    fn indent(&self) -> String {
        "  ".repeat(self.depth)
    }

    fn write_line(&mut self, text: &str) {
        let indent = self.indent();
        let _ = writeln!(self.sink, "{indent}{text}");
    }

    fn format_offset(&self, offset: Option<u64>) -> String {
        match offset {
            Some(o) if self.settings.show_offsets => format!("/* {o:#06x} */ "),
            _ => String::new(),
        }
    }

    fn format_enum_value(value: EnumValue) -> String {
        match value {
            EnumValue::Signed(n) => format!("{n}"),
            EnumValue::Unsigned(n) => format!("{n:#x}"),
        }
    }

    fn format_bases(bases: &[BaseDescriptor]) -> String {
        if bases.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = bases
            .iter()
            .map(|b| {
                let v = if b.is_virtual { "virtual " } else { "" };
                format!("{}{v}{}", format!("{} ", b.access.keyword()), b.name)
            })
            .collect();
        format!(" : {}", parts.join(", "))
    }
}

impl<W: std::fmt::Write> ReconstructorCallbacks for HeaderReconstructor<W> {
    fn on_enum_begin(&mut self, name: &str) {
        self.write_line(&format!("enum {name}"));
        self.write_line("{");
        self.depth += 1;
    }

    fn on_enum_field(&mut self, name: &str, value: EnumValue) {
        let rendered = Self::format_enum_value(value);
        self.write_line(&format!("{name} = {rendered},"));
    }

    fn on_enum_end(&mut self) {
        self.depth -= 1;
        self.write_line("};");
    }

    fn on_udt_begin(&mut self, kind: UdtKind, name: &str, bases: &[BaseDescriptor]) {
        let bases_text = Self::format_bases(bases);
        self.write_line(&format!("{} {name}{bases_text}", kind.keyword()));
        self.write_line("{");
        self.depth += 1;
        self.last_access = Some(if matches!(kind, UdtKind::Class) {
            Access::Private
        } else {
            Access::Public
        });
    }

    fn on_udt_end(&mut self, size: u64) {
        self.depth -= 1;
        self.write_line(&format!("}} /* size: {size:#06x} */;"));
    }

    fn on_access_change(&mut self, access: Access) {
        if self.last_access != Some(access) {
            self.last_access = Some(access);
            let indent = "  ".repeat(self.depth.saturating_sub(1));
            let _ = writeln!(self.sink, "{indent}{}:", access.keyword());
        }
    }

    fn on_field(&mut self, offset: Option<u64>, printable: &str) {
        let prefix = self.format_offset(offset);
        self.write_line(&format!("{prefix}{printable};"));
    }

    fn on_padding_member(&mut self, offset: Option<u64>, printable: &str) {
        self.on_field(offset, printable);
    }

    fn on_anonymous_begin(&mut self, kind: UdtKind) {
        self.write_line(kind.keyword());
        self.write_line("{");
        self.depth += 1;
    }

    fn on_anonymous_end(&mut self, _kind: UdtKind, name: Option<&str>, size: u64) {
        self.depth -= 1;
        let name = name.unwrap_or("");
        self.write_line(&format!("}} {name}; /* size: {size:#06x} */"));
    }

    fn on_bitfield_run_begin(&mut self) {
        self.write_line("struct /* bitfield */");
        self.write_line("{");
        self.depth += 1;
    }

    fn on_bitfield_run_end(&mut self) {
        self.depth -= 1;
        self.write_line("};");
    }

    fn correct_name(&self, raw: &str, is_unnamed: bool) -> String {
        if is_unnamed {
            format!("{}{raw}", self.settings.unnamed_type_prefix)
        } else {
            format!(
                "{}{raw}{}",
                self.settings.symbol_prefix, self.settings.symbol_suffix
            )
        }
    }

    fn should_expand(&self, depth: usize, is_unnamed: bool, already_visited: bool, size: u64) -> bool {
        if size == 0 {
            return false;
        }
        match self.settings.member_struct_expansion {
            ExpansionPolicy::None => depth == 0,
            ExpansionPolicy::InlineUnnamed => depth == 0 || is_unnamed,
            ExpansionPolicy::InlineAll => !already_visited,
        }
    }

    fn mark_expanded(&mut self, id: u32) -> bool {
        !self.visited.insert(id)
    }

    fn next_anonymous_name(&mut self, kind: UdtKind) -> Option<String> {
        if self.settings.allow_anonymous_data_types {
            return None;
        }
        self.anonymous_counter += 1;
        let prefix = match kind {
            UdtKind::Union => &self.settings.anonymous_union_prefix,
            _ => &self.settings.anonymous_struct_prefix,
        };
        Some(format!("{prefix}_{}", self.anonymous_counter))
    }

    fn next_padding_member_name(&mut self) -> String {
        self.padding_counter += 1;
        format!("{}{}", self.settings.padding_member_prefix, self.padding_counter - 1)
    }

    fn next_bitfield_padding_member_name(&mut self) -> String {
        self.bitfield_padding_counter += 1;
        format!(
            "{}{}",
            self.settings.bitfield_padding_member_prefix,
            self.bitfield_padding_counter - 1
        )
    }

    fn allow_bitfields_in_union(&self) -> bool {
        self.settings.allow_bitfields_in_union
    }

    fn create_padding_members(&self) -> bool {
        self.settings.create_padding_members
    }
}
