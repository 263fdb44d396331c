//! The local context: nested scopes of locally-indexed variables and the
//! declared/defined function deques that admit forward references and
//! mutual recursion.
//!
//! One `LocalContext` exists per function being parsed; block scopes push
//! and pop levels inside it. Looking up a name searches variable scopes
//! inner to outer, then defined functions, then declared ones.

use porkchop_sem::Type;
use porkchop_util::{Category, Diagnostic, ErrorMessage, FxHashMap, Segment};

/// A function declared but not yet defined.
#[derive(Clone, Debug)]
pub struct DeclEntry {
    pub index: usize,
    pub parameters: Vec<Type>,
    /// `None` when the declaration left the return type to inference.
    pub ret: Option<Type>,
    pub segment: Segment,
}

/// What a name resolved to within one context.
#[derive(Clone, Debug)]
pub enum ContextLookup {
    Local { index: usize, typ: Type },
    Function { index: usize, typ: Type },
}

pub struct LocalContext {
    scopes: Vec<FxHashMap<String, usize>>,
    pub local_types: Vec<Type>,
    decl_scopes: Vec<FxHashMap<String, DeclEntry>>,
    def_scopes: Vec<FxHashMap<String, (usize, Type)>>,
    /// Collected `return` expressions of the function: (type, segment).
    pub returns: Vec<(Type, Segment)>,
    /// Collected `yield` expressions of the function.
    pub yields: Vec<(Type, Segment)>,
    /// Loop-hook stack depth at function entry; a `break` must find a
    /// hook above this watermark.
    pub hook_base: usize,
}

impl LocalContext {
    pub fn new(hook_base: usize) -> Self {
        Self {
            scopes: vec![FxHashMap::default()],
            local_types: Vec::new(),
            decl_scopes: vec![FxHashMap::default()],
            def_scopes: vec![FxHashMap::default()],
            returns: Vec::new(),
            yields: Vec::new(),
            hook_base,
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(FxHashMap::default());
        self.decl_scopes.push(FxHashMap::default());
        self.def_scopes.push(FxHashMap::default());
    }

    /// Leaves a scope. A declaration without a matching definition is an
    /// error at this point.
    pub fn pop(&mut self) -> Result<(), Diagnostic> {
        self.check_undefined()?;
        self.scopes.pop();
        self.decl_scopes.pop();
        self.def_scopes.pop();
        Ok(())
    }

    /// The same check as [`LocalContext::pop`] for the root level, run
    /// when the function body is complete.
    pub fn finish(&self) -> Result<(), Diagnostic> {
        self.check_undefined()
    }

    fn check_undefined(&self) -> Result<(), Diagnostic> {
        if let Some(entry) = self.decl_scopes.last().and_then(|m| m.values().next()) {
            return Err(Diagnostic::error(
                Category::SemanticResolution,
                "declared function is never defined in its scope",
                entry.segment,
            ));
        }
        Ok(())
    }

    /// Binds `name` to a fresh local slot of type `typ`.
    pub fn local(&mut self, name: &str, typ: Type) -> usize {
        debug_assert!(name != "_");
        let index = self.local_types.len();
        self.local_types.push(typ);
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_owned(), index);
        index
    }

    /// Allocates an unnamed local slot, for `_` parameters; they occupy a
    /// slot so parameter positions line up with the call convention.
    pub fn local_anon(&mut self, typ: Type) -> usize {
        let index = self.local_types.len();
        self.local_types.push(typ);
        index
    }

    /// An existing forward declaration for `name` in the current scope.
    pub fn existing_decl(&self, name: &str) -> Option<&DeclEntry> {
        self.decl_scopes.last().and_then(|m| m.get(name))
    }

    pub fn declare(&mut self, name: &str, entry: DeclEntry) {
        self.decl_scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_owned(), entry);
    }

    /// Records a definition, discharging the matching declaration.
    pub fn define(&mut self, name: &str, index: usize, prototype: Type) {
        self.decl_scopes
            .last_mut()
            .expect("scope stack is never empty")
            .remove(name);
        self.def_scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_owned(), (index, prototype));
    }

    /// Registers an external or otherwise pre-defined function at the
    /// root scope.
    pub fn define_global(&mut self, name: &str, index: usize, prototype: Type) {
        self.def_scopes[0].insert(name.to_owned(), (index, prototype));
    }

    /// A variable visible from the current scope.
    pub fn lookup_local(&self, name: &str) -> Option<(usize, Type)> {
        for scope in self.scopes.iter().rev() {
            if let Some(&index) = scope.get(name) {
                return Some((index, self.local_types[index].clone()));
            }
        }
        None
    }

    /// A defined or declared function visible from the current scope.
    ///
    /// A declared-but-undefined function resolves only when its return
    /// type was spelled out; a recursive call without one is rejected.
    pub fn lookup_function(&self, name: &str) -> Result<Option<ContextLookup>, Diagnostic> {
        for scope in self.def_scopes.iter().rev() {
            if let Some((index, typ)) = scope.get(name) {
                return Ok(Some(ContextLookup::Function {
                    index: *index,
                    typ: typ.clone(),
                }));
            }
        }
        for scope in self.decl_scopes.iter().rev() {
            if let Some(entry) = scope.get(name) {
                let Some(ret) = entry.ret.clone() else {
                    return Err(Diagnostic::error(
                        Category::SemanticResolution,
                        "recursive function without specified return type",
                        entry.segment,
                    )
                    .with(ErrorMessage::plain_note(
                        "spell out the return type to allow calls before the definition completes",
                    )));
                };
                return Ok(Some(ContextLookup::Function {
                    index: entry.index,
                    typ: Type::func(entry.parameters.clone(), ret),
                }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing() {
        let mut ctx = LocalContext::new(0);
        let outer = ctx.local("x", Type::INT);
        ctx.push();
        let inner = ctx.local("x", Type::STRING);
        assert_eq!(ctx.lookup_local("x"), Some((inner, Type::STRING)));
        ctx.pop().unwrap();
        assert_eq!(ctx.lookup_local("x"), Some((outer, Type::INT)));
    }

    #[test]
    fn test_flat_local_indices() {
        let mut ctx = LocalContext::new(0);
        ctx.local("a", Type::INT);
        ctx.push();
        let b = ctx.local("b", Type::BOOL);
        assert_eq!(b, 1);
        ctx.pop().unwrap();
        // slots are never reused within a function
        let c = ctx.local("c", Type::FLOAT);
        assert_eq!(c, 2);
        assert_eq!(ctx.local_types.len(), 3);
    }

    #[test]
    fn test_undefined_declaration_rejected() {
        let mut ctx = LocalContext::new(0);
        ctx.push();
        ctx.declare(
            "f",
            DeclEntry {
                index: 5,
                parameters: vec![],
                ret: Some(Type::INT),
                segment: Segment::default(),
            },
        );
        assert!(ctx.pop().is_err());
    }

    #[test]
    fn test_define_discharges_declaration() {
        let mut ctx = LocalContext::new(0);
        let proto = Type::func(vec![], Type::INT);
        ctx.declare(
            "f",
            DeclEntry {
                index: 5,
                parameters: vec![],
                ret: Some(Type::INT),
                segment: Segment::default(),
            },
        );
        ctx.define("f", 5, proto.clone());
        assert!(ctx.finish().is_ok());
        match ctx.lookup_function("f").unwrap() {
            Some(ContextLookup::Function { index, typ }) => {
                assert_eq!(index, 5);
                assert_eq!(typ, proto);
            }
            other => panic!("unexpected lookup {other:?}"),
        }
    }

    #[test]
    fn test_recursion_needs_return_type() {
        let mut ctx = LocalContext::new(0);
        ctx.declare(
            "f",
            DeclEntry {
                index: 5,
                parameters: vec![],
                ret: None,
                segment: Segment::default(),
            },
        );
        assert!(ctx.lookup_function("f").is_err());
    }
}
