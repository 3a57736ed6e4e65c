//! Unary and binary operator overload tables (spec.md §4.3).
//!
//! Overloads are tried in registration order and the first match wins, so
//! the order entries are pushed in in [OperatorTable::standard] is load
//! bearing, not cosmetic: e.g. `pointer + integer` and `integer + pointer`
//! are distinct overloads, checked in the order they were registered, not
//! picked by some more clever "best match" rule.
//!
//! `&` and `*` (address-of / dereference) are not modeled here: both need
//! the operand's lvalue-ness, not just its type, which this table does not
//! see. The resolver resolves those two directly against the operand's
//! symbol flags (spec.md §4.4).

use crate::types::{Type, TypeKind, TypeRef};
use std::rc::Rc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
    BitNot,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    LogicalAnd,
    LogicalOr,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

pub struct UnaryOverload {
    pub op: UnaryOp,
    matches: fn(&Type) -> bool,
    result: fn(&Type) -> TypeRef,
}

pub struct BinaryOverload {
    pub op: BinaryOp,
    matches: fn(&Type, &Type) -> bool,
    result: fn(&Type, &Type) -> TypeRef,
}

/// The registered unary and binary overloads, in priority order.
pub struct OperatorTable {
    unary: Vec<UnaryOverload>,
    binary: Vec<BinaryOverload>,
}

fn is_integral(t: &Type) -> bool {
    matches!(t.kind, TypeKind::Integer | TypeKind::Character)
}

fn is_numeric(t: &Type) -> bool {
    t.is_numeric()
}

fn is_bool(t: &Type) -> bool {
    matches!(t.kind, TypeKind::Bool)
}

fn same_pointer_base(a: &Type, b: &Type) -> bool {
    match (&a.kind, &b.kind) {
        (TypeKind::Pointer(x), TypeKind::Pointer(y)) => x.structurally_equal(y),
        _ => false,
    }
}

/// Widen two numeric operands to the type the result should be computed in:
/// real beats integer beats character.
fn widen_numeric(a: &Type, b: &Type) -> TypeRef {
    if matches!(a.kind, TypeKind::Real) || matches!(b.kind, TypeKind::Real) {
        Rc::new(Type::real())
    } else if matches!(a.kind, TypeKind::Integer) || matches!(b.kind, TypeKind::Integer)
    {
        Rc::new(Type::integer())
    } else {
        Rc::new(Type::character())
    }
}

fn result_bool(_a: &Type, _b: &Type) -> TypeRef {
    Rc::new(Type::boolean())
}

fn result_lhs_pointer(a: &Type, _b: &Type) -> TypeRef {
    Rc::new(a.clone())
}

fn result_rhs_pointer(_a: &Type, b: &Type) -> TypeRef {
    Rc::new(b.clone())
}

fn result_integer(_a: &Type, _b: &Type) -> TypeRef {
    Rc::new(Type::integer())
}

fn result_unary_same(t: &Type) -> TypeRef {
    Rc::new(t.clone())
}

fn result_unary_bool(_t: &Type) -> TypeRef {
    Rc::new(Type::boolean())
}

impl OperatorTable {
    /// The built-in overload set. Order matches spec.md §4.3: arithmetic on
    /// numerics, then pointer arithmetic, then comparisons, then logical,
    /// then bitwise.
    pub fn standard() -> Self {
        let mut table = OperatorTable {
            unary: Vec::new(),
            binary: Vec::new(),
        };

        for op in [
            BinaryOp::Add,
            BinaryOp::Subtract,
            BinaryOp::Multiply,
            BinaryOp::Divide,
            BinaryOp::Modulo,
        ] {
            table.register_binary(op, |a, b| is_numeric(a) && is_numeric(b), widen_numeric);
        }

        // Pointer arithmetic: `ptr + int` and `int + ptr` are distinct
        // overloads of `+`, tried in this order. `ptr - ptr` (same base) is
        // an overload of `-` distinct from both.
        table.register_binary(
            BinaryOp::Add,
            |a, b| a.is_pointer() && is_integral(b),
            result_lhs_pointer,
        );
        table.register_binary(
            BinaryOp::Add,
            |a, b| is_integral(a) && b.is_pointer(),
            result_rhs_pointer,
        );
        table.register_binary(
            BinaryOp::Subtract,
            |a, b| a.is_pointer() && is_integral(b),
            result_lhs_pointer,
        );
        table.register_binary(
            BinaryOp::Subtract,
            |a, b| a.is_pointer() && b.is_pointer() && same_pointer_base(a, b),
            result_integer,
        );

        for op in [
            BinaryOp::Equal,
            BinaryOp::NotEqual,
            BinaryOp::Less,
            BinaryOp::LessEqual,
            BinaryOp::Greater,
            BinaryOp::GreaterEqual,
        ] {
            table.register_binary(op, |a, b| is_numeric(a) && is_numeric(b), result_bool);
        }
        // Equality (but not ordering) is also defined on pointers and bools.
        for op in [BinaryOp::Equal, BinaryOp::NotEqual] {
            table.register_binary(
                op,
                |a, b| a.is_pointer() && b.is_pointer() && same_pointer_base(a, b),
                result_bool,
            );
            table.register_binary(op, |a, b| is_bool(a) && is_bool(b), result_bool);
        }

        // `&&`/`||` accept BOOL, CHARACTER, INTEGER, REAL, and POINTER
        // operand pairs, each homogeneous, each its own overload.
        for op in [BinaryOp::LogicalAnd, BinaryOp::LogicalOr] {
            table.register_binary(
                op,
                |a, b| a.is_pointer() && b.is_pointer() && same_pointer_base(a, b),
                result_bool,
            );
            table.register_binary(
                op,
                |a, b| matches!(a.kind, TypeKind::Character) && matches!(b.kind, TypeKind::Character),
                result_bool,
            );
            table.register_binary(
                op,
                |a, b| matches!(a.kind, TypeKind::Integer) && matches!(b.kind, TypeKind::Integer),
                result_bool,
            );
            table.register_binary(
                op,
                |a, b| matches!(a.kind, TypeKind::Real) && matches!(b.kind, TypeKind::Real),
                result_bool,
            );
            table.register_binary(op, |a, b| is_bool(a) && is_bool(b), result_bool);
        }

        // Bitwise AND is its own routine, distinct from `+`: the two must
        // never share a dispatch slot, since `&` on two integers and `+` on
        // two integers mean very different things.
        for op in [BinaryOp::BitAnd, BinaryOp::BitOr, BinaryOp::BitXor] {
            table.register_binary(op, |a, b| is_integral(a) && is_integral(b), widen_numeric);
        }
        for op in [BinaryOp::ShiftLeft, BinaryOp::ShiftRight] {
            table.register_binary(op, |a, b| is_integral(a) && is_integral(b), result_integer);
        }

        table.register_unary(UnaryOp::Negate, is_numeric, result_unary_same);
        table.register_unary(UnaryOp::Plus, is_numeric, result_unary_same);
        table.register_unary(UnaryOp::Not, is_bool, result_unary_bool);
        table.register_unary(UnaryOp::BitNot, is_integral, result_unary_same);

        table
    }

    fn register_binary(
        &mut self,
        op: BinaryOp,
        matches: fn(&Type, &Type) -> bool,
        result: fn(&Type, &Type) -> TypeRef,
    ) {
        self.binary.push(BinaryOverload { op, matches, result });
    }

    fn register_unary(
        &mut self,
        op: UnaryOp,
        matches: fn(&Type) -> bool,
        result: fn(&Type) -> TypeRef,
    ) {
        self.unary.push(UnaryOverload { op, matches, result });
    }

    pub fn resolve_binary(&self, op: BinaryOp, lhs: &Type, rhs: &Type) -> Option<TypeRef> {
        self.binary
            .iter()
            .find(|o| o.op == op && (o.matches)(lhs, rhs))
            .map(|o| (o.result)(lhs, rhs))
    }

    pub fn resolve_unary(&self, op: UnaryOp, operand: &Type) -> Option<TypeRef> {
        self.unary
            .iter()
            .find(|o| o.op == op && (o.matches)(operand))
            .map(|o| (o.result)(operand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_plus_int_keeps_pointer_type() {
        let table = OperatorTable::standard();
        let ptr = Type::pointer(Rc::new(Type::integer()));
        let int = Type::integer();
        let result = table.resolve_binary(BinaryOp::Add, &ptr, &int).unwrap();
        assert!(result.is_pointer());
    }

    #[test]
    fn test_bitwise_and_is_not_addition() {
        let table = OperatorTable::standard();
        let int = Type::integer();
        assert!(table
            .resolve_binary(BinaryOp::BitAnd, &int, &int)
            .is_some());
        assert!(table.resolve_binary(BinaryOp::BitAnd, &Type::real(), &int).is_none());
    }

    #[test]
    fn test_no_overload_for_struct_arithmetic() {
        let table = OperatorTable::standard();
        let null_ty = Type::null();
        assert!(table
            .resolve_binary(BinaryOp::Add, &null_ty, &null_ty)
            .is_none());
    }
}
