//! Symbols and symbol tables (spec.md §3.2, §3.3, §4.1).

use crate::types::TypeRef;
use crate::util::Span;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

bitflags::bitflags! {
    /// Flags carried on every [Symbol].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SymbolFlags: u32 {
        /// Immutable binding; cannot appear as an assignment destination.
        const CONSTANT     = 0b0000_0001;
        /// Addressable: can be the destination of an assignment, or the
        /// operand of `&`.
        const LVALUE       = 0b0000_0010;
        /// This symbol denotes a type, not a runtime value.
        const TYPE         = 0b0000_0100;
        /// The expression this symbol is bound to is a compile-time
        /// constant.
        const CONST_EXPR   = 0b0000_1000;
        /// Built in to the resolver (`int`, `float`, `bool`, `byte`,
        /// `*void`, `string`, ...).
        const COMPILER_DEF = 0b0001_0000;
    }
}

/// Where a symbol lives at runtime. STACK/GLOBAL are byte offsets into their
/// respective segment; CODE points at the symbol's procedure body in the
/// code tree; CCALL points at a registered native callback.
#[derive(Clone, Debug)]
pub enum Address {
    Stack(u32),
    Global(u32),
    Code(Rc<crate::code_tree::ProcedureBody>),
    CCall(crate::ccall::CCallId),
    /// Assigned only transiently, to symbols whose final address depends on
    /// a later planning step (struct members; see [crate::address]).
    Unassigned,
}

/// A name bound in some scope. Addresses are wrapped in `Rc<RefCell<_>>` so
/// that every `Identifier` code-tree node referencing this symbol sees the
/// same address cell — if the address planner updates it, every reference
/// observes the update through the same cell rather than a stale copy
/// (spec.md §4.4, "a pointer to the symbol's address descriptor").
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub ty: TypeRef,
    pub flags: SymbolFlags,
    pub address: Rc<RefCell<Address>>,
    pub span: Span,
}

impl Symbol {
    pub fn new(
        name: impl Into<String>,
        ty: TypeRef,
        flags: SymbolFlags,
        address: Address,
        span: Span,
    ) -> Rc<Symbol> {
        Rc::new(Symbol {
            name: name.into(),
            ty,
            flags,
            address: Rc::new(RefCell::new(address)),
            span,
        })
    }

    pub fn is_constant(&self) -> bool {
        self.flags.contains(SymbolFlags::CONSTANT)
    }

    pub fn is_lvalue(&self) -> bool {
        self.flags.contains(SymbolFlags::LVALUE)
    }

    pub fn is_type(&self) -> bool {
        self.flags.contains(SymbolFlags::TYPE)
    }
}

/// A lexically scoped name -> symbol map with a parent link. Each table is
/// owned by the scope that introduces it (a block, a struct body, the
/// resolver's root). Since each [Symbol] is heap-allocated behind an `Rc`,
/// the table itself needs no separate arena to keep addresses stable — the
/// `Rc` allocation already is that arena.
#[derive(Debug, Default)]
pub struct SymbolTable {
    parent: Option<Rc<RefCell<SymbolTable>>>,
    symbols: HashMap<String, Rc<Symbol>>,
}

impl SymbolTable {
    pub fn new(parent: Option<Rc<RefCell<SymbolTable>>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(SymbolTable {
            parent,
            symbols: HashMap::new(),
        }))
    }

    /// Insert `symbol` into this scope. Returns `false` (and does not
    /// insert) if the name is already bound in *this* scope; the resolver is
    /// expected to check this before proceeding and report a
    /// [crate::error::CompileError::Redeclaration].
    pub fn put(&mut self, symbol: Rc<Symbol>) -> bool {
        if self.symbols.contains_key(&symbol.name) {
            return false;
        }
        self.symbols.insert(symbol.name.clone(), symbol);
        true
    }

    /// Look up `name`, climbing parent scopes unless `recursive` is false.
    pub fn find(&self, name: &str, recursive: bool) -> Option<Rc<Symbol>> {
        if let Some(sym) = self.symbols.get(name) {
            return Some(Rc::clone(sym));
        }
        if recursive {
            if let Some(parent) = &self.parent {
                return parent.borrow().find(name, true);
            }
        }
        None
    }

    /// Symbols declared directly in this scope, in insertion order is *not*
    /// guaranteed; callers that need declaration order (struct member
    /// offsets) must track it themselves as they declare, not read it back
    /// out of the table.
    pub fn local_symbols(&self) -> impl Iterator<Item = &Rc<Symbol>> {
        self.symbols.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn dummy_symbol(name: &str) -> Rc<Symbol> {
        Symbol::new(
            name,
            Rc::new(Type::integer()),
            SymbolFlags::LVALUE,
            Address::Stack(0),
            Span::synthetic(),
        )
    }

    #[test]
    fn test_put_rejects_duplicate_in_same_scope() {
        let table = SymbolTable::new(None);
        assert!(table.borrow_mut().put(dummy_symbol("x")));
        assert!(!table.borrow_mut().put(dummy_symbol("x")));
    }

    #[test]
    fn test_find_climbs_parent() {
        let root = SymbolTable::new(None);
        root.borrow_mut().put(dummy_symbol("x"));
        let child = SymbolTable::new(Some(Rc::clone(&root)));
        assert!(child.borrow().find("x", true).is_some());
        assert!(child.borrow().find("x", false).is_none());
    }
}
