//! Hierarchical symbol table.
//!
//! Scopes and symbols live in one arena owned by the program and are addressed
//! by `ScopeId` / `SymbolId`. A scope only points at its parent; children are
//! never enumerated, so the arena has no ownership cycles.
//!
//! Blocks start with a fresh local scope. A `let` inside a block closes the
//! active scope and continues in a new child; `keep_alive` counts how often
//! a scope was left behind that way.

use indexmap::IndexMap;

use super::tree::ExprId;
use crate::error::CoreError;
use crate::span::Span;

arena_id!(
    /// Handle of a scope in a `ScopeTable`.
    ScopeId
);
arena_id!(
    /// Handle of a symbol in a `ScopeTable`.
    SymbolId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Module or prelude namespace.
    Module,
    /// Block or function parameter scope.
    Local,
    /// Member scope of a type, typeclass or instance.
    Class,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    /// Used for name mangling; local scopes are anonymous.
    pub name: Option<String>,
    symbols: IndexMap<String, SymbolId>,
    closed: bool,
    keep_alive: u32,
}

impl Scope {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Shadowing declarations that continued past this scope. A record only;
    /// the arena keeps every scope regardless.
    pub fn keep_alive(&self) -> u32 {
        self.keep_alive
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub scope: ScopeId,
    pub value: ExprId,
    pub exported: bool,
    /// A non-exported type that exported symbols expose.
    pub associated: bool,
}

#[derive(Debug, Default, Clone)]
pub struct ScopeTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
}

impl ScopeTable {
    pub fn new() -> Self {
        ScopeTable::default()
    }

    pub fn new_scope(
        &mut self,
        parent: Option<ScopeId>,
        kind: ScopeKind,
        name: Option<String>,
    ) -> ScopeId {
        let id = ScopeId::from_index(self.scopes.len());
        self.scopes.push(Scope {
            parent,
            kind,
            name,
            symbols: IndexMap::new(),
            closed: false,
            keep_alive: 0,
        });
        id
    }

    /// Opens a local child of `parent`.
    pub fn clone_local(&mut self, parent: ScopeId) -> ScopeId {
        self.new_scope(Some(parent), ScopeKind::Local, None)
    }

    /// Opens a member scope for a type declared in `parent`.
    pub fn clone_for_class(&mut self, parent: ScopeId, name: impl Into<String>) -> ScopeId {
        self.new_scope(Some(parent), ScopeKind::Class, Some(name.into()))
    }

    /// Copies `source` into a new scope under `parent`. Symbol entries are
    /// left pointing at the original symbols; the clone engine rebinds them.
    pub(crate) fn duplicate(&mut self, source: ScopeId) -> ScopeId {
        let copy = self.scope(source).clone();
        let id = ScopeId::from_index(self.scopes.len());
        self.scopes.push(copy);
        id
    }

    pub(crate) fn duplicate_symbol(&mut self, source: SymbolId) -> SymbolId {
        let copy = self.symbol(source).clone();
        let id = SymbolId::from_index(self.symbols.len());
        self.symbols.push(copy);
        id
    }

    pub(crate) fn rebind(&mut self, scope: ScopeId, name: &str, symbol: SymbolId) {
        if let Some(slot) = self.scopes[scope.index()].symbols.get_mut(name) {
            *slot = symbol;
        }
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Get-or-create binding of `name` in `scope`.
    ///
    /// An existing binding is returned unchanged and `make_value` is not run.
    /// Creating a binding in a closed scope fails with `ScopeClosed`.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        make_value: impl FnOnce() -> ExprId,
    ) -> Result<SymbolId, CoreError> {
        if let Some(existing) = self.lookup_local(scope, name) {
            return Ok(existing);
        }
        if self.scopes[scope.index()].closed {
            return Err(CoreError::ScopeClosed {
                name: name.to_string(),
            });
        }

        let id = SymbolId::from_index(self.symbols.len());
        self.symbols.push(Symbol {
            name: name.to_string(),
            scope,
            value: make_value(),
            exported: false,
            associated: false,
        });
        self.scopes[scope.index()]
            .symbols
            .insert(name.to_string(), id);
        Ok(id)
    }

    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.scopes[scope.index()].symbols.get(name).copied()
    }

    /// Nearest binding of `name`, walking up the parent chain.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(symbol) = self.lookup_local(id, name) {
                return Some(symbol);
            }
            current = self.scopes[id.index()].parent;
        }
        None
    }

    pub fn resolve(&self, scope: ScopeId, name: &str, span: Span) -> Result<SymbolId, CoreError> {
        self.lookup(scope, name)
            .ok_or_else(|| CoreError::UnboundName {
                name: name.to_string(),
                span,
            })
    }

    pub fn close(&mut self, scope: ScopeId) {
        self.scopes[scope.index()].closed = true;
    }

    pub fn retain(&mut self, scope: ScopeId) {
        self.scopes[scope.index()].keep_alive += 1;
    }

    /// Symbols of `scope` in declaration order.
    pub fn symbols_in_order(&self, scope: ScopeId) -> impl DoubleEndedIterator<Item = SymbolId> + '_ {
        self.scopes[scope.index()].symbols.values().copied()
    }

    /// Symbols from `innermost` up to and including `outermost`, in the order
    /// they must be torn down: innermost scope first, each scope in reverse
    /// declaration order.
    pub fn destruction_order(&self, innermost: ScopeId, outermost: ScopeId) -> Vec<SymbolId> {
        let stop = self.scope(outermost).parent;
        let mut order = Vec::new();
        let mut current = Some(innermost);
        while let Some(id) = current {
            if Some(id) == stop {
                break;
            }
            order.extend(self.symbols_in_order(id).rev());
            current = self.scopes[id.index()].parent;
        }
        order
    }

    /// Iterates `scope` and its ancestors.
    pub fn ancestors(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), |id| self.scopes[id.index()].parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(n: u32) -> ExprId {
        ExprId::from_index(n as usize)
    }

    #[test]
    fn declare_is_get_or_create() {
        let mut table = ScopeTable::new();
        let root = table.new_scope(None, ScopeKind::Module, Some("main".to_string()));
        let first = table.declare(root, "x", || expr(1)).expect("declare");
        let mut called = false;
        let second = table
            .declare(root, "x", || {
                called = true;
                expr(2)
            })
            .expect("declare");
        assert_eq!(first, second);
        assert!(!called);
        assert_eq!(table.symbol(first).value, expr(1));
    }

    #[test]
    fn closed_scope_rejects_new_names_but_returns_existing() {
        let mut table = ScopeTable::new();
        let scope = table.new_scope(None, ScopeKind::Local, None);
        let x = table.declare(scope, "x", || expr(0)).expect("declare");
        table.close(scope);
        assert_eq!(table.declare(scope, "x", || expr(1)).expect("existing"), x);
        let err = table.declare(scope, "y", || expr(1)).unwrap_err();
        assert!(matches!(err, CoreError::ScopeClosed { ref name } if name == "y"));
    }

    #[test]
    fn lookup_walks_outwards_only() {
        let mut table = ScopeTable::new();
        let outer = table.new_scope(None, ScopeKind::Local, None);
        table.declare(outer, "a", || expr(0)).expect("declare");
        let inner = table.clone_local(outer);
        table.declare(inner, "b", || expr(1)).expect("declare");

        assert!(table.lookup(inner, "a").is_some());
        assert!(table.lookup(inner, "b").is_some());
        assert!(table.lookup(outer, "b").is_none());
        let err = table.resolve(outer, "b", Span::dummy()).unwrap_err();
        assert!(matches!(err, CoreError::UnboundName { .. }));
    }

    #[test]
    fn destruction_runs_in_reverse_declaration_order() {
        let mut table = ScopeTable::new();
        let function = table.new_scope(None, ScopeKind::Local, None);
        let block = table.clone_local(function);
        let a = table.declare(block, "a", || expr(0)).expect("declare");
        let b = table.declare(block, "b", || expr(1)).expect("declare");
        table.close(block);
        table.retain(block);
        let after_let = table.clone_local(block);
        let c = table.declare(after_let, "c", || expr(2)).expect("declare");

        assert_eq!(table.destruction_order(after_let, block), vec![c, b, a]);
        assert_eq!(table.scope(block).keep_alive(), 1);
    }
}
