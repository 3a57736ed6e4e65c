//! The foreign call registry (spec.md §4.5).
//!
//! A ccall is a native Rust closure the embedder registers under a name and
//! a procedure signature before resolving a program. At the call site the
//! interpreter marshals arguments onto the stack exactly as it would for a
//! call into a resolved procedure — return slot first, then arguments, then
//! any variadic tail — and hands the callback a mutable view of that region.
//! The callback reads its arguments out of the tail of the slice and writes
//! its return value (if any) into the bytes at the front.

use crate::types::TypeRef;
use std::fmt;
use std::rc::Rc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CCallId(pub u32);

pub type CCallFn = Rc<dyn Fn(&mut [u8])>;

#[derive(Clone)]
pub struct CCallEntry {
    pub name: String,
    /// Always a `TypeKind::Procedure`.
    pub signature: TypeRef,
    pub callback: CCallFn,
}

impl fmt::Debug for CCallEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CCallEntry")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

/// All ccalls registered with a [crate::resolver::Resolver] before
/// resolution begins. Once resolution is done this is shared, read-only,
/// between the resolver's output and the interpreter that runs it.
#[derive(Clone, Debug, Default)]
pub struct CCallRegistry {
    entries: Vec<CCallEntry>,
}

impl CCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        signature: TypeRef,
        callback: impl Fn(&mut [u8]) + 'static,
    ) -> CCallId {
        let id = CCallId(self.entries.len() as u32);
        self.entries.push(CCallEntry {
            name: name.into(),
            signature,
            callback: Rc::new(callback),
        });
        id
    }

    pub fn get(&self, id: CCallId) -> &CCallEntry {
        &self.entries[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (CCallId, &CCallEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (CCallId(i as u32), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;
    use std::cell::RefCell;

    #[test]
    fn test_register_and_invoke() {
        let mut registry = CCallRegistry::new();
        let sig = Rc::new(Type::procedure(
            vec![Rc::new(Type::integer())],
            Some(Rc::new(Type::integer())),
            false,
            Some("double".into()),
        ));
        let seen = Rc::new(RefCell::new(0i64));
        let seen2 = Rc::clone(&seen);
        let id = registry.register("double", sig, move |frame| {
            let arg = i64::from_le_bytes(frame[8..16].try_into().unwrap());
            *seen2.borrow_mut() = arg;
            frame[0..8].copy_from_slice(&(arg * 2).to_le_bytes());
        });

        let mut frame = [0u8; 16];
        frame[8..16].copy_from_slice(&21i64.to_le_bytes());
        (registry.get(id).callback)(&mut frame);
        assert_eq!(*seen.borrow(), 21);
        assert_eq!(i64::from_le_bytes(frame[0..8].try_into().unwrap()), 42);
    }
}
