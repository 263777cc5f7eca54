//! The symbol graph: a neutral, in-memory mirror of a PDB's type
//! information, addressed by stable indices rather than pointers so that
//! the inherently cyclic reference structure (a struct holding a pointer to
//! itself, a linked list node, a parent back-pointer) never needs `Rc`/
//! `Weak` bookkeeping. See Design Note "Cyclic graph" for the rationale.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// A stable reference to a [`Symbol`] within one [`SymbolGraph`]. Trivially
/// `Copy`, so it can be threaded through the sorter and reconstructor
/// without fighting the borrow checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discriminant used by the base visitor to dispatch without touching the
/// payload. Kept separate from [`SymbolVariant`] so callers that only need
/// the tag (the sorter, mostly) don't have to match the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Base,
    Enum,
    Typedef,
    Pointer,
    Array,
    Function,
    FunctionArg,
    Udt,
    /// A type record the driver did not decode into a richer kind. Visited
    /// but never expanded; exists so references to it do not dangle.
    Other,
}

/// A primitive ("basic") type, the leaves of every declarator chain.
/// Mirrors the CodeView simple-type table (see `ms-codeview`'s
/// `PRIMITIVES`), trimmed to the types the reconstructor needs to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Void,
    Bool,
    Char,
    SignedChar,
    UnsignedChar,
    Char8,
    Char16,
    Char32,
    WideChar,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Int128,
    UInt128,
    Float32,
    Float64,
    /// 80-bit extended-precision float; the reconstructor appends a
    /// `/* 80-bit float */` comment for it (§4.4).
    Float80,
    Hresult,
}

impl BasicType {
    /// The C spelling the definition builder appends to `typePrefix`.
    pub fn spelling(self) -> &'static str {
        match self {
            BasicType::Void => "void",
            BasicType::Bool => "bool",
            BasicType::Char => "char",
            BasicType::SignedChar => "signed char",
            BasicType::UnsignedChar => "unsigned char",
            BasicType::Char8 => "char8_t",
            BasicType::Char16 => "char16_t",
            BasicType::Char32 => "char32_t",
            BasicType::WideChar => "wchar_t",
            BasicType::Int16 => "short",
            BasicType::UInt16 => "unsigned short",
            BasicType::Int32 => "int",
            BasicType::UInt32 => "unsigned int",
            BasicType::Int64 => "long long",
            BasicType::UInt64 => "unsigned long long",
            BasicType::Int128 => "__int128",
            BasicType::UInt128 => "unsigned __int128",
            BasicType::Float32 => "float",
            BasicType::Float64 => "double",
            BasicType::Float80 => "long double",
            BasicType::Hresult => "HRESULT",
        }
    }

    /// Whether enumerator values / bitfield storage of this type should
    /// render as signed decimal (vs. unsigned hex).
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            BasicType::Char
                | BasicType::SignedChar
                | BasicType::Int16
                | BasicType::Int32
                | BasicType::Int64
                | BasicType::Int128
        )
    }
}

/// `struct` / `class` / `union`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdtKind {
    Struct,
    Class,
    Union,
}

impl UdtKind {
    pub fn keyword(self) -> &'static str {
        match self {
            UdtKind::Struct => "struct",
            UdtKind::Class => "class",
            UdtKind::Union => "union",
        }
    }
}

/// C++ access level, carried on fields and base classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Private,
    Protected,
    Public,
}

impl Access {
    pub fn keyword(self) -> &'static str {
        match self {
            Access::Private => "private",
            Access::Protected => "protected",
            Access::Public => "public",
        }
    }
}

/// What role a [`Field`] plays on its owning UDT. Corresponds to the
/// `SymTag*` discriminants the original driver read off each field record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTag {
    /// An ordinary data member.
    Data,
    /// A pseudo-field representing inheritance from `BaseClass`; also
    /// present in the UDT's `base_classes` list, but surfaced here too so
    /// traversal order matches declaration order.
    BaseClass,
    /// The compiler-synthesized vtable pointer. Always skipped during
    /// emission (§4.5).
    VTable,
    /// A member function (method, constructor, destructor, operator).
    Method,
}

/// Whether a [`Field`] is a plain member, a static member, a function
/// parameter (used only inside `FunctionArg` contexts, never on a UDT), or
/// unknown because the driver could not classify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Member,
    Static,
    Parameter,
    Unknown,
}

/// One member of a UDT's field list, in declaration order.
#[derive(Debug, Clone)]
pub struct Field {
    pub tag: FieldTag,
    pub data_kind: DataKind,
    pub name: String,
    pub ty: SymbolId,
    pub offset: u64,
    pub bits: u32,
    pub bit_position: u32,
    pub access: Access,
    pub is_base_class: bool,
    pub parent: SymbolId,
}

/// One entry of a UDT's base-class list.
#[derive(Debug, Clone)]
pub struct BaseClass {
    pub base: SymbolId,
    pub access: Access,
    pub is_virtual: bool,
}

/// One enumerator of an `Enum` symbol.
#[derive(Debug, Clone)]
pub struct EnumField {
    pub name: String,
    pub value: EnumValue,
    pub parent: SymbolId,
}

/// An enumerator's value, tagged by signedness so the reconstructor can
/// choose decimal vs. hex rendering without re-deriving it from the
/// underlying type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumValue {
    Signed(i64),
    Unsigned(u64),
}

/// Calling convention of a `Function` symbol. Spellings are applied by the
/// definition builder, not stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    Cdecl,
    FastCall,
    StdCall,
    Syscall,
    ThisCall,
    ClrCall,
    Unknown,
}

impl CallingConvention {
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            CallingConvention::Cdecl => Some("__cdecl"),
            CallingConvention::FastCall => Some("__fastcall"),
            CallingConvention::StdCall => Some("__stdcall"),
            CallingConvention::Syscall => Some("__syscall"),
            CallingConvention::ThisCall => Some("__thiscall"),
            CallingConvention::ClrCall => Some("__clrcall"),
            CallingConvention::Unknown => None,
        }
    }
}

/// The kind-specific payload of a [`Symbol`]. Exhaustively matched by the
/// base visitor rather than dispatched through a trait object — see Design
/// Note "Tagged-union payload".
#[derive(Debug, Clone)]
pub enum SymbolVariant {
    Base,
    Enum {
        fields: Vec<EnumField>,
    },
    Typedef {
        underlying: SymbolId,
    },
    Pointer {
        pointee: SymbolId,
        is_reference: bool,
    },
    Array {
        element: SymbolId,
        count: u64,
    },
    Function {
        return_type: SymbolId,
        calling_convention: CallingConvention,
        access: Access,
        is_static: bool,
        is_virtual: bool,
        is_override: bool,
        is_const: bool,
        is_pure: bool,
        /// Late-bound by the reconstructor the first time an overriding
        /// method is emitted (§4.3); `None` until then, and always `None`
        /// for non-overrides.
        virtual_offset: RefCell<Option<i64>>,
        arguments: Vec<SymbolId>,
    },
    FunctionArg {
        ty: SymbolId,
    },
    Udt {
        kind: UdtKind,
        fields: Vec<Field>,
        base_classes: Vec<BaseClass>,
    },
    /// A record the driver decoded but left unclassified. Never expanded;
    /// never referenced by a well-formed population (§6).
    Other,
}

impl SymbolVariant {
    pub fn kind(&self) -> SymbolKind {
        match self {
            SymbolVariant::Base => SymbolKind::Base,
            SymbolVariant::Enum { .. } => SymbolKind::Enum,
            SymbolVariant::Typedef { .. } => SymbolKind::Typedef,
            SymbolVariant::Pointer { .. } => SymbolKind::Pointer,
            SymbolVariant::Array { .. } => SymbolKind::Array,
            SymbolVariant::Function { .. } => SymbolKind::Function,
            SymbolVariant::FunctionArg { .. } => SymbolKind::FunctionArg,
            SymbolVariant::Udt { .. } => SymbolKind::Udt,
            SymbolVariant::Other => SymbolKind::Other,
        }
    }

    pub fn as_udt(&self) -> Option<(UdtKind, &[Field], &[BaseClass])> {
        match self {
            SymbolVariant::Udt {
                kind,
                fields,
                base_classes,
            } => Some((*kind, fields, base_classes)),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&[EnumField]> {
        match self {
            SymbolVariant::Enum { fields } => Some(fields),
            _ => None,
        }
    }

    pub fn as_typedef(&self) -> Option<SymbolId> {
        match self {
            SymbolVariant::Typedef { underlying } => Some(*underlying),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<(SymbolId, bool)> {
        match self {
            SymbolVariant::Pointer {
                pointee,
                is_reference,
            } => Some((*pointee, *is_reference)),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<(SymbolId, u64)> {
        match self {
            SymbolVariant::Array { element, count } => Some((*element, *count)),
            _ => None,
        }
    }

    pub fn as_function_arg(&self) -> Option<SymbolId> {
        match self {
            SymbolVariant::FunctionArg { ty } => Some(*ty),
            _ => None,
        }
    }
}

/// A node of the symbol graph. Fixed attributes common to every kind, plus
/// a tagged-union payload (§3).
#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    /// Set only when `variant` is `Base`; the primitive type code.
    pub basic_type: Option<BasicType>,
    pub size: u64,
    pub is_const: bool,
    pub is_volatile: bool,
    pub name: String,
    /// The PDB's own numeric type ID, carried through for diagnostics; not
    /// used for graph identity (that's `id`).
    pub type_id: u64,
    pub variant: SymbolVariant,
}

impl Symbol {
    pub fn kind(&self) -> SymbolKind {
        self.variant.kind()
    }

    /// True if `name` matches one of the unnamed-symbol spellings a driver
    /// may produce for a compiler-synthesized anonymous type (invariant 6).
    pub fn is_unnamed(&self) -> bool {
        is_unnamed_name(&self.name)
    }
}

/// Invariant 6: unnamed names match `<anonymous-…>`, `<unnamed-…>`, or
/// `__unnamed…`; an empty name is unnamed by construction.
pub fn is_unnamed_name(name: &str) -> bool {
    name.is_empty()
        || name.starts_with("<anonymous-")
        || name.starts_with("<unnamed-")
        || name.starts_with("__unnamed")
}

/// The arena owning every [`Symbol`] in one population. Indexed by
/// [`SymbolId`]; symbols are appended once by the driver and never removed
/// or mutated by the core, save for the late-bound `virtual_offset`.
#[derive(Debug, Default)]
pub struct SymbolGraph {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
}

impl SymbolGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next [`SymbolId`] without filling it in yet. Used by
    /// drivers that need a forward reference's ID before the referee's
    /// payload is fully decoded (§6 population contract, step 3).
    pub fn next_id(&self) -> SymbolId {
        SymbolId(self.symbols.len() as u32)
    }

    /// Appends `symbol` to the arena, registering it by name unless its
    /// name is unnamed (§6 population contract, step 4). `symbol.id` MUST
    /// equal the value [`Self::next_id`] returned before this call.
    pub fn insert(&mut self, symbol: Symbol) -> SymbolId {
        debug_assert_eq!(symbol.id, self.next_id(), "symbol inserted out of order");
        let id = symbol.id;
        if !symbol.is_unnamed() {
            self.by_name.entry(symbol.name.clone()).or_insert(id);
        }
        self.symbols.push(symbol);
        id
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    /// Resolves `id` to its [`Symbol`], or [`CoreError::SymbolNotFound`] if
    /// the reference is dangling (a violation of invariant 1, but the core
    /// still has to handle a malformed population gracefully — §7).
    pub fn resolve(&self, id: SymbolId) -> CoreResult<&Symbol> {
        self.symbols
            .get(id.0 as usize)
            .ok_or_else(|| CoreError::symbol_not_found(id.0))
    }
}
