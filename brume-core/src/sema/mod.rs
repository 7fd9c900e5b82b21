//! Semantic analysis: scopes, the semantic tree, deferred analysis,
//! instantiation, cloning and simplification.
//!
//! The pipeline over a `Program` is:
//!
//!   preanalyze  (CST -> semantic tree, scopes and symbols)
//!     -> analyze   (types, overloads, instances; deferred)
//!     -> simplify  (constant literals, dead statements, block flattening)
//!
//! after which `ir::lower` turns the program into IR.

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(index: usize) -> Self {
                $name(index as u32)
            }
        }
    };
}

pub mod scope;
pub mod tree;
pub mod types;
pub mod value;

pub mod deferred;
pub mod overload;
pub mod preanalyze;
pub mod analyze;
pub mod typeclass;
pub mod clone;
pub mod simplify;
pub mod print;

use crate::error::CoreError;
use crate::span::Span;

use scope::{ScopeId, ScopeKind, ScopeTable};
use tree::{Ast, ExprId, ExprKind, FunctionId, StmtId};
use types::{BUILTIN_NAMES, TypeId, TypeKind, TypeTable};
use value::Value;

/// Everything the middle end knows about one compilation unit and its
/// prelude.
#[derive(Debug, Clone)]
pub struct Program {
    pub module_name: String,
    pub ast: Ast,
    pub scopes: ScopeTable,
    pub types: TypeTable,
    /// Holds the builtin type names.
    pub root_scope: ScopeId,
    pub prelude_scope: Option<ScopeId>,
    pub module_scope: ScopeId,
    pub prelude_blocks: Vec<StmtId>,
    pub module_block: Option<StmtId>,
    /// Functions whose analysis completed, in creation order. Copies made
    /// later (simplification snapshots) are not listed.
    pub analyzed_functions: Vec<FunctionId>,
}

impl Program {
    pub fn new(module_name: impl Into<String>, with_prelude: bool) -> Self {
        let module_name = module_name.into();
        let mut ast = Ast::new();
        let mut scopes = ScopeTable::new();
        let mut types = TypeTable::new();

        let root_scope = scopes.new_scope(None, ScopeKind::Module, None);
        for (name, expected) in BUILTIN_NAMES {
            let kind = match expected {
                TypeId::TYPE => TypeKind::Type,
                TypeId::INTEGER => TypeKind::Integer,
                TypeId::BOOLEAN => TypeKind::Boolean,
                _ => TypeKind::Unconstrained,
            };
            let member_scope = scopes.clone_for_class(root_scope, name);
            scopes.close(member_scope);
            let id = types.add(kind, name, member_scope, |id| {
                ast.add_expr(ExprKind::TypeRef(id), Span::dummy())
            });
            debug_assert_eq!(id, expected);
            let self_expr = types.get(id).self_expr;
            // The root scope is fresh and open, so this cannot fail.
            let _ = scopes.declare(root_scope, name, || self_expr);
        }
        scopes.close(root_scope);

        let prelude_scope = with_prelude.then(|| {
            scopes.new_scope(Some(root_scope), ScopeKind::Module, Some("prelude".to_string()))
        });
        let module_scope = scopes.new_scope(
            Some(prelude_scope.unwrap_or(root_scope)),
            ScopeKind::Module,
            Some(module_name.clone()),
        );

        Program {
            module_name,
            ast,
            scopes,
            types,
            root_scope,
            prelude_scope,
            module_scope,
            prelude_blocks: Vec::new(),
            module_block: None,
            analyzed_functions: Vec::new(),
        }
    }

    /// Top-level blocks: prelude files first, then the unit.
    pub fn top_level_blocks(&self) -> Vec<StmtId> {
        let mut blocks = self.prelude_blocks.clone();
        blocks.extend(self.module_block);
        blocks
    }

    pub fn expr_type(&self, expr: ExprId) -> Result<TypeId, CoreError> {
        self.ast
            .expr(expr)
            .ty
            .ok_or_else(|| CoreError::malformed("unanalyzed expression", "a typed context"))
    }

    pub fn expr_value(&self, expr: ExprId) -> &Value {
        &self.ast.expr(expr).value
    }

    pub fn type_name(&self, ty: TypeId) -> &str {
        self.types.name(ty)
    }

    /// Names of the type scopes enclosing `scope` up to and including the
    /// nearest module, outermost first.
    pub fn scope_path(&self, scope: ScopeId) -> Vec<String> {
        let mut path = Vec::new();
        for id in self.scopes.ancestors(scope) {
            let scope = self.scopes.scope(id);
            match scope.kind {
                ScopeKind::Local => {}
                ScopeKind::Class => path.extend(scope.name.clone()),
                ScopeKind::Module => {
                    path.extend(scope.name.clone());
                    break;
                }
            }
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_from_the_module_scope() {
        let program = Program::new("main", true);
        for (name, ty) in BUILTIN_NAMES {
            let symbol = program
                .scopes
                .lookup(program.module_scope, name)
                .expect("builtin visible");
            let value = program.scopes.symbol(symbol).value;
            assert!(matches!(program.ast.expr(value).kind, ExprKind::TypeRef(t) if t == ty));
        }
        assert!(program.scopes.scope(program.root_scope).is_closed());
    }

    #[test]
    fn module_scope_sits_under_the_prelude() {
        let program = Program::new("demo", true);
        let prelude = program.prelude_scope.expect("prelude scope");
        assert_eq!(program.scopes.scope(program.module_scope).parent, Some(prelude));
        assert_eq!(program.scope_path(program.module_scope), vec!["demo"]);
        assert_eq!(program.scope_path(prelude), vec!["prelude"]);

        let bare = Program::new("demo", false);
        assert_eq!(bare.scope_path(bare.module_scope), vec!["demo"]);
    }
}
