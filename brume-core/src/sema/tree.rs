//! Semantic tree.
//!
//! Statements, expressions, functions, overload sets, typeclasses and
//! instances live in arenas inside `Ast` and refer to each other by id. A node
//! owns the children listed by `Ast::owned_children`; every other id it holds
//! (scopes, symbols, overload sets, resolutions) is a reference.

use std::cell::OnceCell;

use rustc_hash::FxHashSet;

use super::scope::{ScopeId, SymbolId};
use super::types::TypeId;
use super::value::Value;
use crate::ast::{BinaryOp, UnaryOp};
use crate::ir::Opcode;
use crate::span::Span;

arena_id!(StmtId);
arena_id!(ExprId);
arena_id!(FunctionId);
arena_id!(OverloadSetId);
arena_id!(TypeclassId);
arena_id!(InstanceId);

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(Block),
    /// `binding` is the `Variable` expression the symbol resolves to.
    Let {
        symbol: SymbolId,
        binding: ExprId,
    },
    Function(FunctionId),
    Return {
        value: ExprId,
    },
    If {
        condition: ExprId,
        then_branch: StmtId,
        else_branch: Option<StmtId>,
    },
    Expr(ExprId),
    Struct {
        ty: TypeId,
    },
    Typeclass(TypeclassId),
    Instance(InstanceId),
}

/// A statement of a block together with the scope active after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub stmt: StmtId,
    pub scope: ScopeId,
}

#[derive(Debug, Clone)]
pub struct Block {
    /// Scope the block was opened with.
    pub scope: ScopeId,
    /// Scope active at the end of the block; differs from `scope` after a
    /// `let`.
    pub current_scope: ScopeId,
    pub entries: Vec<Entry>,
    pub value: Option<ExprId>,
    /// Function bodies and module blocks.
    pub is_top_level: bool,
    /// Copy of the block taken before simplification first rewrites it.
    pub snapshot: OnceCell<StmtId>,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: Option<TypeId>,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorResolution {
    pub opcode: Opcode,
    pub result: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Function(FunctionId),
    /// A typeclass applied to type arguments, yielding the instance type.
    Instance(TypeId),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Integer(i64),
    Boolean(bool),
    Identifier {
        name: String,
        scope: ScopeId,
        referenced: Option<SymbolId>,
    },
    Unary {
        op: UnaryOp,
        operand: ExprId,
        resolution: Option<OperatorResolution>,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        resolution: Option<OperatorResolution>,
    },
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
        resolution: Option<CallTarget>,
    },
    Member {
        base: ExprId,
        member: String,
        referenced: Option<SymbolId>,
    },
    StructLiteral {
        ty_expr: ExprId,
        fields: Vec<(String, ExprId)>,
        /// Expression supplying each field, in declaration order; filled in
        /// by analysis (initializer or the field's default).
        layout: Vec<ExprId>,
    },
    TypeRef(TypeId),
    TypeclassRef(TypeclassId),
    OverloadSetRef(OverloadSetId),
    Parameter {
        name: String,
        type_expr: ExprId,
        index: usize,
    },
    Field {
        name: String,
        type_expr: ExprId,
        default: Option<ExprId>,
        index: usize,
    },
    /// The variable introduced by a `let`.
    Variable {
        name: String,
        annotation: Option<ExprId>,
        init: ExprId,
    },
}

impl ExprKind {
    /// Expressions that compute a value, as opposed to declarations and
    /// references to declarations.
    pub fn is_value_expression(&self) -> bool {
        matches!(
            self,
            ExprKind::Identifier { .. }
                | ExprKind::Unary { .. }
                | ExprKind::Binary { .. }
                | ExprKind::Call { .. }
                | ExprKind::Member { .. }
        )
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, ExprKind::Integer(_) | ExprKind::Boolean(_))
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub span: Span,
    /// `Parameter` expressions.
    pub params: Vec<ExprId>,
    pub return_type_expr: Option<ExprId>,
    /// Explicit or inferred; set by analysis.
    pub return_type: Option<TypeId>,
    pub body: Option<StmtId>,
    /// Parameter scope; the body block's scope is its child.
    pub scope: ScopeId,
    pub overload_set: OverloadSetId,
    pub vtable_slot: Option<usize>,
    /// Declared inside a typeclass; only its instantiated copies are analyzed.
    pub generic: bool,
    pub parent_type: Option<TypeId>,
    pub analyzed: bool,
}

#[derive(Debug, Clone)]
pub struct OverloadSet {
    pub name: String,
    pub scope: ScopeId,
    pub functions: Vec<FunctionId>,
    pub ty: TypeId,
}

#[derive(Debug, Clone)]
pub struct Typeclass {
    pub name: String,
    pub span: Span,
    pub scope: ScopeId,
    /// `Parameter` expressions; each must denote a type.
    pub params: Vec<ExprId>,
    /// Member functions in declaration order; the index is the vtable slot.
    pub functions: Vec<FunctionId>,
    pub ty: TypeId,
    pub instances: Vec<(Vec<TypeId>, TypeId)>,
}

impl Typeclass {
    pub fn find_instance(&self, arguments: &[TypeId]) -> Option<TypeId> {
        self.instances
            .iter()
            .find(|(args, _)| args.as_slice() == arguments)
            .map(|(_, ty)| *ty)
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub span: Span,
    pub typeclass_expr: ExprId,
    pub arguments: Vec<ExprId>,
    /// Member scope of the instance; stays open until instantiation.
    pub scope: ScopeId,
    /// Members defined by the instance itself.
    pub functions: Vec<FunctionId>,
    pub ty: Option<TypeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Stmt(StmtId),
    Expr(ExprId),
    Function(FunctionId),
}

#[derive(Debug, Default, Clone)]
pub struct Ast {
    stmts: Vec<Stmt>,
    exprs: Vec<Expr>,
    functions: Vec<Function>,
    overload_sets: Vec<OverloadSet>,
    typeclasses: Vec<Typeclass>,
    instances: Vec<Instance>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn add_stmt(&mut self, kind: StmtKind, span: Span) -> StmtId {
        let id = StmtId::from_index(self.stmts.len());
        self.stmts.push(Stmt { kind, span });
        id
    }

    pub fn add_expr(&mut self, kind: ExprKind, span: Span) -> ExprId {
        let id = ExprId::from_index(self.exprs.len());
        self.exprs.push(Expr {
            kind,
            span,
            ty: None,
            value: Value::Runtime,
        });
        id
    }

    pub fn add_function(&mut self, function: Function) -> FunctionId {
        let id = FunctionId::from_index(self.functions.len());
        self.functions.push(function);
        id
    }

    pub fn add_overload_set(&mut self, set: OverloadSet) -> OverloadSetId {
        let id = OverloadSetId::from_index(self.overload_sets.len());
        self.overload_sets.push(set);
        id
    }

    pub fn add_typeclass(&mut self, typeclass: Typeclass) -> TypeclassId {
        let id = TypeclassId::from_index(self.typeclasses.len());
        self.typeclasses.push(typeclass);
        id
    }

    pub fn add_instance(&mut self, instance: Instance) -> InstanceId {
        let id = InstanceId::from_index(self.instances.len());
        self.instances.push(instance);
        id
    }

    pub(crate) fn push_stmt(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId::from_index(self.stmts.len());
        self.stmts.push(stmt);
        id
    }

    pub(crate) fn push_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId::from_index(self.exprs.len());
        self.exprs.push(expr);
        id
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index()]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    pub fn overload_set(&self, id: OverloadSetId) -> &OverloadSet {
        &self.overload_sets[id.index()]
    }

    pub fn overload_set_mut(&mut self, id: OverloadSetId) -> &mut OverloadSet {
        &mut self.overload_sets[id.index()]
    }

    pub fn typeclass(&self, id: TypeclassId) -> &Typeclass {
        &self.typeclasses[id.index()]
    }

    pub fn typeclass_mut(&mut self, id: TypeclassId) -> &mut Typeclass {
        &mut self.typeclasses[id.index()]
    }

    pub fn instance(&self, id: InstanceId) -> &Instance {
        &self.instances[id.index()]
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> &mut Instance {
        &mut self.instances[id.index()]
    }

    pub fn block(&self, id: StmtId) -> Option<&Block> {
        match &self.stmts[id.index()].kind {
            StmtKind::Block(block) => Some(block),
            _ => None,
        }
    }

    pub fn block_mut(&mut self, id: StmtId) -> Option<&mut Block> {
        match &mut self.stmts[id.index()].kind {
            StmtKind::Block(block) => Some(block),
            _ => None,
        }
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FunctionId> {
        (0..self.functions.len()).map(FunctionId::from_index)
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }

    /// Children owned by `node`, in source order.
    pub fn owned_children(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        match node {
            NodeRef::Stmt(id) => match &self.stmt(id).kind {
                StmtKind::Block(block) => {
                    out.extend(block.entries.iter().map(|entry| NodeRef::Stmt(entry.stmt)));
                    out.extend(block.value.map(NodeRef::Expr));
                }
                StmtKind::Let { binding, .. } => out.push(NodeRef::Expr(*binding)),
                StmtKind::Function(function) => out.push(NodeRef::Function(*function)),
                StmtKind::Return { value } | StmtKind::Expr(value) => out.push(NodeRef::Expr(*value)),
                StmtKind::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    out.push(NodeRef::Expr(*condition));
                    out.push(NodeRef::Stmt(*then_branch));
                    out.extend(else_branch.map(NodeRef::Stmt));
                }
                StmtKind::Struct { .. } | StmtKind::Typeclass(_) | StmtKind::Instance(_) => {}
            },
            NodeRef::Expr(id) => match &self.expr(id).kind {
                ExprKind::Unary { operand, .. } => out.push(NodeRef::Expr(*operand)),
                ExprKind::Binary { lhs, rhs, .. } => {
                    out.push(NodeRef::Expr(*lhs));
                    out.push(NodeRef::Expr(*rhs));
                }
                ExprKind::Call { callee, args, .. } => {
                    out.push(NodeRef::Expr(*callee));
                    out.extend(args.iter().copied().map(NodeRef::Expr));
                }
                ExprKind::Member { base, .. } => out.push(NodeRef::Expr(*base)),
                ExprKind::StructLiteral { ty_expr, fields, .. } => {
                    out.push(NodeRef::Expr(*ty_expr));
                    out.extend(fields.iter().map(|(_, value)| NodeRef::Expr(*value)));
                }
                ExprKind::Parameter { type_expr, .. } => out.push(NodeRef::Expr(*type_expr)),
                ExprKind::Field {
                    type_expr, default, ..
                } => {
                    out.push(NodeRef::Expr(*type_expr));
                    out.extend(default.map(NodeRef::Expr));
                }
                ExprKind::Variable { annotation, init, .. } => {
                    out.extend(annotation.map(NodeRef::Expr));
                    out.push(NodeRef::Expr(*init));
                }
                ExprKind::Integer(_)
                | ExprKind::Boolean(_)
                | ExprKind::Identifier { .. }
                | ExprKind::TypeRef(_)
                | ExprKind::TypeclassRef(_)
                | ExprKind::OverloadSetRef(_) => {}
            },
            NodeRef::Function(id) => {
                let function = self.function(id);
                out.extend(function.return_type_expr.map(NodeRef::Expr));
                out.extend(function.params.iter().copied().map(NodeRef::Expr));
                out.extend(function.body.map(NodeRef::Stmt));
            }
        }
        out
    }

    /// Every node owned, directly or transitively, by `root` (inclusive).
    pub fn subtree(&self, root: NodeRef) -> FxHashSet<NodeRef> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.owned_children(node));
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtree_follows_owned_children_only() {
        let mut ast = Ast::new();
        let scope = ScopeId::from_index(0);
        let one = ast.add_expr(ExprKind::Integer(1), Span::dummy());
        let name = ast.add_expr(
            ExprKind::Identifier {
                name: "x".to_string(),
                scope,
                referenced: None,
            },
            Span::dummy(),
        );
        let sum = ast.add_expr(
            ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: one,
                rhs: name,
                resolution: None,
            },
            Span::dummy(),
        );
        let ret = ast.add_stmt(StmtKind::Return { value: sum }, Span::dummy());
        let unrelated = ast.add_expr(ExprKind::Integer(9), Span::dummy());

        let nodes = ast.subtree(NodeRef::Stmt(ret));
        assert_eq!(nodes.len(), 4);
        assert!(nodes.contains(&NodeRef::Expr(name)));
        assert!(!nodes.contains(&NodeRef::Expr(unrelated)));
    }

    #[test]
    fn value_expressions_exclude_declarations() {
        let scope = ScopeId::from_index(0);
        let identifier = ExprKind::Identifier {
            name: "x".to_string(),
            scope,
            referenced: None,
        };
        assert!(identifier.is_value_expression());
        assert!(!ExprKind::TypeRef(TypeId::INTEGER).is_value_expression());
        assert!(ExprKind::Integer(3).is_literal());
    }
}
