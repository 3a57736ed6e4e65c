//! The closed set of types in the language, and structural type equality
//! (spec.md §3.1).

use std::cell::{Cell, RefCell};
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

/// Types are allocated once (by the resolver, at construction and while
/// lowering struct/procedure declarations) and shared via `Rc` from then on;
/// they outlive both the resolver and any interpreter built against it.
pub type TypeRef = Rc<Type>;

/// The machine pointer size this implementation targets. Both the resolver
/// and the interpreter must agree on this, since it determines struct/array
/// layout and the size of the variadic type-tag slots.
pub const POINTER_SIZE: u64 = 8;

/// Caps the recursion depth used when structurally comparing two types.
/// Struct equality short-circuits on `id` without recursing into members, so
/// the only way to recurse indefinitely is a procedure type whose argument
/// or return type is (transitively) a pointer back to a procedure of the
/// same shape. This is vanishingly rare in real programs but costs nothing
/// to guard against: past this depth we stop recursing and treat the
/// branches as equal, exactly as spec.md §3.1 describes for the
/// binary-operator overload matcher's pointer-base comparisons.
const MAX_EQUALITY_DEPTH: u32 = 64;

/// `runtime_size`/`alignment` are [Cell]s rather than plain `u64`s so a
/// struct's own [Type] can be patched in place once its member layout is
/// known (spec.md §9): a self-referential pointer member (`*Node` inside
/// `Node`) captures the struct's `Rc<Type>` while its size is still unknown,
/// since a pointer's own size never depends on its pointee's completeness.
#[derive(Clone, Debug, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub runtime_size: Cell<u64>,
    pub alignment: Cell<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    /// The "void" placeholder. Has size 0 and no runtime representation.
    Null,
    /// A single byte. Arithmetic is allowed on it the same as on `Integer`.
    Character,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// A single byte, either `0` or `1`.
    Bool,
    Pointer(TypeRef),
    Procedure(ProcedureType),
    Struct(StructType),
    StaticArray(StaticArrayType),
    /// `{ length: int64; data: *element }`.
    ArrayView(TypeRef),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcedureType {
    pub args: Vec<TypeRef>,
    pub return_type: Option<TypeRef>,
    pub variadic: bool,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeRef,
    pub offset: u64,
}

/// `id` is assigned at struct-declaration resolution time and uniquely
/// identifies *that* declaration; two structurally identical struct bodies
/// declared separately are still distinct types (spec.md §3.1).
///
/// `members` is an `Rc<RefCell<..>>` rather than a plain `Vec` so the
/// two-pass struct resolver can hand out the struct's `Rc<Type>` before its
/// members are resolved (to self-referential pointer members) and fill the
/// member list in once the body is fully resolved; every clone of this
/// `StructType` shares the same member list.
#[derive(Clone, Debug, PartialEq)]
pub struct StructType {
    pub id: u64,
    pub name: String,
    pub members: Rc<RefCell<Vec<StructMember>>>,
}

impl StructType {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        StructType {
            id,
            name: name.into(),
            members: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn with_members(id: u64, name: impl Into<String>, members: Vec<StructMember>) -> Self {
        StructType {
            id,
            name: name.into(),
            members: Rc::new(RefCell::new(members)),
        }
    }

    pub fn member(&self, name: &str) -> Option<StructMember> {
        self.members.borrow().iter().find(|m| m.name == name).cloned()
    }

    pub fn members(&self) -> std::cell::Ref<'_, Vec<StructMember>> {
        self.members.borrow()
    }

    pub fn set_members(&self, members: Vec<StructMember>) {
        *self.members.borrow_mut() = members;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StaticArrayType {
    pub element: TypeRef,
    pub count: i64,
}

impl Type {
    fn sized(kind: TypeKind, runtime_size: u64, alignment: u64) -> Self {
        Type {
            kind,
            runtime_size: Cell::new(runtime_size),
            alignment: Cell::new(alignment),
        }
    }

    pub fn null() -> Self {
        Self::sized(TypeKind::Null, 0, 1)
    }

    pub fn character() -> Self {
        Self::sized(TypeKind::Character, 1, 1)
    }

    pub fn integer() -> Self {
        Self::sized(TypeKind::Integer, 8, 8)
    }

    pub fn real() -> Self {
        Self::sized(TypeKind::Real, 8, 8)
    }

    pub fn boolean() -> Self {
        Self::sized(TypeKind::Bool, 1, 1)
    }

    pub fn pointer(base: TypeRef) -> Self {
        Self::sized(TypeKind::Pointer(base), POINTER_SIZE, POINTER_SIZE)
    }

    pub fn array_view(element: TypeRef) -> Self {
        // { length: int64; data: *element }
        Self::sized(TypeKind::ArrayView(element), 8 + POINTER_SIZE, 8)
    }

    pub fn static_array(element: TypeRef, count: i64) -> Self {
        let size = element.runtime_size.get() * count.max(0) as u64;
        let alignment = element.alignment.get();
        Self::sized(TypeKind::StaticArray(StaticArrayType { element, count }), size, alignment)
    }

    pub fn procedure(
        args: Vec<TypeRef>,
        return_type: Option<TypeRef>,
        variadic: bool,
        name: Option<String>,
    ) -> Self {
        // Procedure-typed values are code/ccall pointers at runtime.
        Self::sized(
            TypeKind::Procedure(ProcedureType {
                args,
                return_type,
                variadic,
                name,
            }),
            POINTER_SIZE,
            POINTER_SIZE,
        )
    }

    /// A struct type with a placeholder (empty) member list and zero size,
    /// to be registered under the struct's name before its members are
    /// resolved. `finish_struct` patches the size/alignment in once the
    /// member list is known; pointer members captured in the meantime keep
    /// working because a pointer's size never depends on its pointee.
    pub fn struct_placeholder(id: u64, name: impl Into<String>) -> Self {
        Self::sized(TypeKind::Struct(StructType::new(id, name)), 0, 1)
    }

    /// Patches a struct [Type] built with [Type::struct_placeholder] in
    /// place once its members are known, so every `Rc<Type>` clone already
    /// handed out (e.g. to a self-referential pointer member) observes the
    /// final layout.
    pub fn finish_struct(&self, members: Vec<StructMember>, runtime_size: u64, alignment: u64) {
        match &self.kind {
            TypeKind::Struct(s) => s.set_members(members),
            _ => panic!("finish_struct called on a non-struct type"),
        }
        self.runtime_size.set(runtime_size);
        self.alignment.set(alignment);
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Character | TypeKind::Integer | TypeKind::Real
        )
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer(_))
    }

    pub fn is_void_pointer(&self) -> bool {
        matches!(&self.kind, TypeKind::Pointer(base) if base.kind == TypeKind::Null)
    }

    pub fn pointee(&self) -> Option<&TypeRef> {
        match &self.kind {
            TypeKind::Pointer(base) => Some(base),
            _ => None,
        }
    }

    /// Structural equality per spec.md §3.1: same kind, size, and alignment,
    /// then recurse on kind-specific structure (pointer base, procedure
    /// signature, struct `id`).
    pub fn structurally_equal(&self, other: &Type) -> bool {
        equal_with_depth(self, other, 0)
    }
}

fn equal_with_depth(a: &Type, b: &Type, depth: u32) -> bool {
    // Struct equality is by `id` alone (checked below), so two `Rc`s for the
    // *same* struct declaration are always equal even while one is still
    // the zero-sized placeholder a self-referential pointer member captured
    // mid-resolution and the other is the finished type.
    if let (TypeKind::Struct(a_s), TypeKind::Struct(b_s)) = (&a.kind, &b.kind) {
        return a_s.id == b_s.id;
    }
    if a.runtime_size.get() != b.runtime_size.get() || a.alignment.get() != b.alignment.get() {
        return false;
    }
    match (&a.kind, &b.kind) {
        (TypeKind::Null, TypeKind::Null)
        | (TypeKind::Character, TypeKind::Character)
        | (TypeKind::Integer, TypeKind::Integer)
        | (TypeKind::Real, TypeKind::Real)
        | (TypeKind::Bool, TypeKind::Bool) => true,
        (TypeKind::Pointer(a_base), TypeKind::Pointer(b_base)) => {
            if depth >= MAX_EQUALITY_DEPTH {
                // Break the cycle: both sides are pointers of the right
                // size/alignment already, assume the pointee matches too.
                return true;
            }
            equal_with_depth(a_base, b_base, depth + 1)
        }
        (TypeKind::ArrayView(a_elem), TypeKind::ArrayView(b_elem)) => {
            equal_with_depth(a_elem, b_elem, depth + 1)
        }
        (TypeKind::StaticArray(a_arr), TypeKind::StaticArray(b_arr)) => {
            a_arr.count == b_arr.count
                && equal_with_depth(&a_arr.element, &b_arr.element, depth + 1)
        }
        (TypeKind::Procedure(a_p), TypeKind::Procedure(b_p)) => {
            if a_p.variadic != b_p.variadic || a_p.args.len() != b_p.args.len()
            {
                return false;
            }
            let depth = if depth >= MAX_EQUALITY_DEPTH {
                return true;
            } else {
                depth + 1
            };
            let args_match = a_p
                .args
                .iter()
                .zip(b_p.args.iter())
                .all(|(x, y)| equal_with_depth(x, y, depth));
            let returns_match = match (&a_p.return_type, &b_p.return_type) {
                (None, None) => true,
                (Some(x), Some(y)) => equal_with_depth(x, y, depth),
                _ => false,
            };
            args_match && returns_match
        }
        _ => false,
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Null => write!(f, "void"),
            TypeKind::Character => write!(f, "byte"),
            TypeKind::Integer => write!(f, "int"),
            TypeKind::Real => write!(f, "float"),
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Pointer(base) => write!(f, "*{}", base),
            TypeKind::ArrayView(elem) => write!(f, "[]{}", elem),
            TypeKind::StaticArray(arr) => {
                write!(f, "[{}]{}", arr.count, arr.element)
            }
            TypeKind::Struct(s) => write!(f, "{}", s.name),
            TypeKind::Procedure(p) => {
                write!(f, "proc(")?;
                for (i, arg) in p.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                if p.variadic {
                    write!(f, ", ...")?;
                }
                write!(f, ")")?;
                if let Some(ret) = &p.return_type {
                    write!(f, " -> {}", ret)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_array_size() {
        let int_ty = Rc::new(Type::integer());
        let arr = Type::static_array(int_ty, 5);
        assert_eq!(arr.runtime_size.get(), 40);
        assert_eq!(arr.alignment.get(), 8);
    }

    #[test]
    fn test_struct_equality_is_by_id_not_shape() {
        let int_ty = Rc::new(Type::integer());
        let a = Type::sized(
            TypeKind::Struct(StructType::with_members(
                1,
                "Point",
                vec![StructMember { name: "x".into(), ty: int_ty.clone(), offset: 0 }],
            )),
            8,
            8,
        );
        let b = Type::sized(
            TypeKind::Struct(StructType::with_members(
                2,
                "Point",
                vec![StructMember { name: "x".into(), ty: int_ty, offset: 0 }],
            )),
            8,
            8,
        );
        assert!(!a.structurally_equal(&b));
    }

    #[test]
    fn test_struct_placeholder_can_be_finished_in_place() {
        let placeholder = Rc::new(Type::struct_placeholder(1, "Node"));
        let self_ptr = Type::pointer(Rc::clone(&placeholder));
        assert_eq!(self_ptr.runtime_size.get(), POINTER_SIZE);

        placeholder.finish_struct(
            vec![StructMember { name: "next".into(), ty: Rc::new(self_ptr), offset: 0 }],
            POINTER_SIZE,
            POINTER_SIZE,
        );
        assert_eq!(placeholder.runtime_size.get(), POINTER_SIZE);
        match &placeholder.kind {
            TypeKind::Struct(s) => assert_eq!(s.member("next").unwrap().offset, 0),
            _ => panic!("expected struct"),
        }
    }

    #[test]
    fn test_pointer_equality_recurses_on_base() {
        let int_ptr = Type::pointer(Rc::new(Type::integer()));
        let float_ptr = Type::pointer(Rc::new(Type::real()));
        assert!(!int_ptr.structurally_equal(&float_ptr));

        let int_ptr_2 = Type::pointer(Rc::new(Type::integer()));
        assert!(int_ptr.structurally_equal(&int_ptr_2));
    }
}
