//! The definition builder (§4.4): accumulates the three fragments of a C
//! declarator — `typePrefix`, `memberName`, `typeSuffix` — plus a trailing
//! `comment`, while the traversal controller descends a field's type
//! chain. Kept behind the [`FieldDefinitionBuilder`] trait so the
//! reconstructor is generic over the builder the same way the original's
//! templated visitor was generic over its member-definition type — a trait
//! boundary instead of a base class (Design Note "Polymorphic visitors").

/// Details needed to finish a function declarator, gathered by whatever
/// drove the traversal (the traversal controller reads these off the
/// `Function` symbol's payload).
pub struct FunctionEndInfo<'a> {
    pub calling_convention: Option<&'a str>,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_const: bool,
    pub is_pure: bool,
    pub virtual_offset: Option<i64>,
}

/// Capability a traversal drives while walking one field's type chain, to
/// end up with a single printable declaration.
pub trait FieldDefinitionBuilder: Default {
    /// Seeds the identifier before descent begins.
    fn set_member_name(&mut self, name: &str);
    /// A primitive leaf of the type chain.
    fn visit_base(&mut self, spelling: &str, is_const: bool, is_volatile: bool, is_80bit_float: bool);
    /// An enum or UDT referenced by name (not expanded at this point).
    fn visit_named(&mut self, name: &str, is_const: bool, is_volatile: bool);
    /// Rewrites the accumulated prefix/suffix into `using NAME = TYPE`.
    fn visit_typedef_end(&mut self);
    fn visit_pointer_end(
        &mut self,
        is_function_pointer: bool,
        is_reference: bool,
        is_const: bool,
        is_volatile: bool,
    );
    fn visit_array_end(&mut self, count: u64);
    /// Pushes the current `(memberName, args)` pair as a frame, for nested
    /// function-pointer declarators.
    fn visit_function_begin(&mut self);
    fn visit_function_end(&mut self, info: FunctionEndInfo<'_>);
    /// Folds the just-built argument fragment into the enclosing
    /// function's argument list and clears the working fragment.
    fn visit_function_arg_end(&mut self);
    /// `typePrefix [space] memberName typeSuffix comment`.
    fn printable_definition(&self) -> String;
}

fn qualifier_spelling(is_const: bool, is_volatile: bool) -> &'static str {
    match (is_const, is_volatile) {
        (true, true) => "const volatile",
        (true, false) => "const",
        (false, true) => "volatile",
        (false, false) => "",
    }
}

struct Frame {
    member_name: String,
    args: Vec<String>,
}

/// The concrete, default [`FieldDefinitionBuilder`].
#[derive(Default)]
pub struct DefinitionBuilder {
    type_prefix: String,
    member_name: String,
    type_suffix: String,
    comment: String,
    args: Vec<String>,
    frames: Vec<Frame>,
}

impl DefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_qualified(&mut self, is_const: bool, is_volatile: bool, spelling: &str) {
        let q = qualifier_spelling(is_const, is_volatile);
        if !q.is_empty() {
            self.type_prefix.push_str(q);
            self.type_prefix.push(' ');
        }
        self.type_prefix.push_str(spelling);
    }
}

impl FieldDefinitionBuilder for DefinitionBuilder {
    fn set_member_name(&mut self, name: &str) {
        self.member_name = name.to_string();
    }

    fn visit_base(&mut self, spelling: &str, is_const: bool, is_volatile: bool, is_80bit_float: bool) {
        self.push_qualified(is_const, is_volatile, spelling);
        if is_80bit_float {
            self.comment = " /* 80-bit float */".to_string();
        }
    }

    fn visit_named(&mut self, name: &str, is_const: bool, is_volatile: bool) {
        self.push_qualified(is_const, is_volatile, name);
    }

    fn visit_typedef_end(&mut self) {
        let underlying = format!("{}{}", self.type_prefix, self.type_suffix);
        self.type_prefix = "using".to_string();
        self.type_suffix = format!(" = {underlying}");
    }

    fn visit_pointer_end(
        &mut self,
        is_function_pointer: bool,
        is_reference: bool,
        is_const: bool,
        is_volatile: bool,
    ) {
        let sigil = if is_reference { '&' } else { '*' };
        if is_function_pointer {
            let q = qualifier_spelling(is_const, is_volatile);
            self.member_name = if q.is_empty() {
                format!("({sigil}{})", self.member_name)
            } else {
                format!("({sigil}{q} {})", self.member_name)
            };
        } else {
            self.type_prefix.push(sigil);
            let q = qualifier_spelling(is_const, is_volatile);
            if !q.is_empty() {
                self.type_prefix.push(' ');
                self.type_prefix.push_str(q);
            }
        }
    }

    fn visit_array_end(&mut self, count: u64) {
        // Arrays recurse element-first, so the innermost dimension's
        // suffix is already in place by the time an outer dimension's End
        // hook runs; prepending keeps multi-dimensional declarators in
        // left-to-right order (`int[2][3]`, not `int[3][2]`).
        let dimension = if count == 0 {
            "[]".to_string()
        } else {
            format!("[{count}]")
        };
        self.type_suffix = format!("{dimension}{}", self.type_suffix);
    }

    fn visit_function_begin(&mut self) {
        self.frames.push(Frame {
            member_name: std::mem::take(&mut self.member_name),
            args: std::mem::take(&mut self.args),
        });
    }

    fn visit_function_end(&mut self, info: FunctionEndInfo<'_>) {
        self.type_suffix
            .push_str(&format!("({})", self.args.join(", ")));

        self.type_prefix = match (info.is_static, info.calling_convention) {
            (true, Some(cc)) => format!("static {} {cc}", self.type_prefix),
            (true, None) => format!("static {}", self.type_prefix),
            (false, _) => self.type_prefix.clone(),
        };
        if info.is_virtual {
            self.type_prefix = format!("virtual {}", self.type_prefix);
        }

        let mut comment = String::new();
        if info.is_const {
            comment.push_str(" const");
        }
        if info.is_override {
            comment.push_str(" override");
        }
        if info.is_pure {
            comment.push_str(" = 0");
        }
        if info.is_virtual {
            if let Some(offset) = info.virtual_offset {
                comment.push_str(&format!(" /* {offset:#06x} */"));
            }
        }
        self.comment = comment;

        if let Some(frame) = self.frames.pop() {
            self.member_name = frame.member_name;
            self.args = frame.args;
        } else {
            self.args.clear();
            self.member_name.clear();
        }
    }

    fn visit_function_arg_end(&mut self) {
        self.args.push(self.printable_definition());
        self.type_prefix.clear();
        self.member_name.clear();
        self.type_suffix.clear();
        self.comment.clear();
    }

    fn printable_definition(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.type_prefix);
        if !self.type_prefix.is_empty() {
            out.push(' ');
        }
        out.push_str(&self.member_name);
        out.push_str(&self.type_suffix);
        out.push_str(&self.comment);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_field_declarator() {
        let mut b = DefinitionBuilder::new();
        b.set_member_name("a");
        b.visit_base("int", false, false, false);
        assert_eq!(b.printable_definition(), "int a");
    }

    #[test]
    fn pointer_to_data() {
        let mut b = DefinitionBuilder::new();
        b.set_member_name("p");
        b.visit_base("int", false, false, false);
        b.visit_pointer_end(false, false, true, false);
        assert_eq!(b.printable_definition(), "int* const p");
    }

    #[test]
    fn array_of_two_dimensions() {
        let mut b = DefinitionBuilder::new();
        b.set_member_name("m");
        b.visit_base("int", false, false, false);
        b.visit_array_end(3);
        b.visit_array_end(2);
        assert_eq!(b.printable_definition(), "int m[2][3]");
    }

    #[test]
    fn typedef_becomes_using_declaration() {
        let mut b = DefinitionBuilder::new();
        b.set_member_name("MyAlias");
        b.visit_base("int", false, false, false);
        b.visit_typedef_end();
        assert_eq!(b.printable_definition(), "using MyAlias = int");
    }

    #[test]
    fn function_pointer_member() {
        // field `void (*callback)()`: pointer to a function returning void
        // taking no arguments.
        let mut b = DefinitionBuilder::new();
        b.set_member_name("callback");
        b.visit_function_begin();
        b.visit_base("void", false, false, false);
        b.visit_function_end(FunctionEndInfo {
            calling_convention: None,
            is_static: false,
            is_virtual: false,
            is_override: false,
            is_const: false,
            is_pure: false,
            virtual_offset: None,
        });
        b.visit_pointer_end(true, false, false, false);
        assert_eq!(b.printable_definition(), "void (*callback)()");
    }
}
