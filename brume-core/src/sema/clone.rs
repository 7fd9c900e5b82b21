//! Clone-with-substitution.
//!
//! One cloning operation owns one `Replacements` map. Cloning runs in two
//! phases:
//!
//! 1. *claim*: walk the owned subtree; for each node not yet in the map, copy
//!    it, record `original -> copy` and only then descend into its owned
//!    children. A node reached twice maps to the same copy, and
//!    self-references terminate.
//! 2. *remap*: rewrite every id held by a produced copy through the map. Ids
//!    without a mapping point outside the cloned subtree and are kept.
//!
//! The map can be seeded before cloning (`add_scope`, `add_expr`,
//! `add_overload_set`) to redirect references, which is how typeclass bodies
//! are rebound to an instance's scope and arguments.

use std::cell::OnceCell;
use std::hash::Hash;

use rustc_hash::FxHashMap;

use super::Program;
use super::scope::{ScopeId, SymbolId};
use super::tree::{
    CallTarget, ExprId, ExprKind, FunctionId, OverloadSetId, StmtId, StmtKind,
};
use super::types::{TypeId, TypeKind};
use super::value::Value;
use crate::error::CoreError;

/// Identity map from original nodes to their clones; each key is written at
/// most once.
#[derive(Debug, Default, Clone)]
pub struct Replacements {
    scopes: FxHashMap<ScopeId, ScopeId>,
    symbols: FxHashMap<SymbolId, SymbolId>,
    stmts: FxHashMap<StmtId, StmtId>,
    exprs: FxHashMap<ExprId, ExprId>,
    functions: FxHashMap<FunctionId, FunctionId>,
    overload_sets: FxHashMap<OverloadSetId, OverloadSetId>,
    types: FxHashMap<TypeId, TypeId>,
}

fn insert_once<K, V>(map: &mut FxHashMap<K, V>, key: K, value: V) -> Result<(), CoreError>
where
    K: Hash + Eq,
    V: PartialEq,
{
    match map.get(&key) {
        Some(existing) if *existing != value => Err(CoreError::malformed(
            "replacement entry",
            "a second, different mapping",
        )),
        Some(_) => Ok(()),
        None => {
            map.insert(key, value);
            Ok(())
        }
    }
}

impl Replacements {
    pub fn new() -> Self {
        Replacements::default()
    }

    pub fn add_scope(&mut self, from: ScopeId, to: ScopeId) -> Result<(), CoreError> {
        insert_once(&mut self.scopes, from, to)
    }

    pub fn add_expr(&mut self, from: ExprId, to: ExprId) -> Result<(), CoreError> {
        insert_once(&mut self.exprs, from, to)
    }

    pub fn add_overload_set(
        &mut self,
        from: OverloadSetId,
        to: OverloadSetId,
    ) -> Result<(), CoreError> {
        insert_once(&mut self.overload_sets, from, to)
    }

    pub fn add_type(&mut self, from: TypeId, to: TypeId) -> Result<(), CoreError> {
        insert_once(&mut self.types, from, to)
    }

    pub fn scope(&self, id: ScopeId) -> Option<ScopeId> {
        self.scopes.get(&id).copied()
    }

    pub fn symbol(&self, id: SymbolId) -> Option<SymbolId> {
        self.symbols.get(&id).copied()
    }

    pub fn stmt(&self, id: StmtId) -> Option<StmtId> {
        self.stmts.get(&id).copied()
    }

    pub fn expr(&self, id: ExprId) -> Option<ExprId> {
        self.exprs.get(&id).copied()
    }

    pub fn function(&self, id: FunctionId) -> Option<FunctionId> {
        self.functions.get(&id).copied()
    }

    pub fn overload_set(&self, id: OverloadSetId) -> Option<OverloadSetId> {
        self.overload_sets.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
            + self.symbols.len()
            + self.stmts.len()
            + self.exprs.len()
            + self.functions.len()
            + self.overload_sets.len()
            + self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map_scope(&self, id: ScopeId) -> ScopeId {
        self.scope(id).unwrap_or(id)
    }

    fn map_symbol(&self, id: SymbolId) -> SymbolId {
        self.symbol(id).unwrap_or(id)
    }

    fn map_stmt(&self, id: StmtId) -> StmtId {
        self.stmt(id).unwrap_or(id)
    }

    fn map_expr(&self, id: ExprId) -> ExprId {
        self.expr(id).unwrap_or(id)
    }

    fn map_function(&self, id: FunctionId) -> FunctionId {
        self.function(id).unwrap_or(id)
    }

    fn map_overload_set(&self, id: OverloadSetId) -> OverloadSetId {
        self.overload_set(id).unwrap_or(id)
    }

    fn map_type(&self, id: TypeId) -> TypeId {
        self.types.get(&id).copied().unwrap_or(id)
    }

    fn map_value(&self, value: &Value) -> Value {
        match value {
            Value::OverloadSet(set) => Value::OverloadSet(self.map_overload_set(*set)),
            Value::Type(ty) => Value::Type(self.map_type(*ty)),
            other => other.clone(),
        }
    }
}

pub fn clone_function(
    program: &mut Program,
    map: &mut Replacements,
    function: FunctionId,
) -> Result<FunctionId, CoreError> {
    let mut cloner = Cloner::new(program, map);
    let copy = cloner.claim_function(function)?;
    cloner.remap();
    Ok(copy)
}

pub fn clone_stmt(
    program: &mut Program,
    map: &mut Replacements,
    stmt: StmtId,
) -> Result<StmtId, CoreError> {
    let mut cloner = Cloner::new(program, map);
    let copy = cloner.claim_stmt(stmt)?;
    cloner.remap();
    Ok(copy)
}

pub fn clone_expr(
    program: &mut Program,
    map: &mut Replacements,
    expr: ExprId,
) -> Result<ExprId, CoreError> {
    let mut cloner = Cloner::new(program, map);
    let copy = cloner.claim_expr(expr)?;
    cloner.remap();
    Ok(copy)
}

/// Returns the pre-simplification copy of `block`, taking it on first use.
pub fn ensure_snapshot(program: &mut Program, block: StmtId) -> Result<StmtId, CoreError> {
    let cached = program
        .ast
        .block(block)
        .ok_or_else(|| CoreError::malformed("non-block statement", "snapshotting"))?
        .snapshot
        .get()
        .copied();
    if let Some(snapshot) = cached {
        return Ok(snapshot);
    }

    let mut map = Replacements::new();
    let snapshot = clone_stmt(program, &mut map, block)?;
    if let Some(data) = program.ast.block(block) {
        let _ = data.snapshot.set(snapshot);
    }
    tracing::trace!(block = block.index(), snapshot = snapshot.index(), "took block snapshot");
    Ok(snapshot)
}

#[derive(Default)]
struct Produced {
    scopes: Vec<ScopeId>,
    symbols: Vec<SymbolId>,
    stmts: Vec<StmtId>,
    exprs: Vec<ExprId>,
    functions: Vec<FunctionId>,
    overload_sets: Vec<OverloadSetId>,
}

struct Cloner<'a> {
    program: &'a mut Program,
    map: &'a mut Replacements,
    produced: Produced,
}

impl<'a> Cloner<'a> {
    fn new(program: &'a mut Program, map: &'a mut Replacements) -> Self {
        Cloner {
            program,
            map,
            produced: Produced::default(),
        }
    }

    fn claim_scope(&mut self, scope: ScopeId) -> Result<ScopeId, CoreError> {
        if let Some(copy) = self.map.scope(scope) {
            return Ok(copy);
        }
        let copy = self.program.scopes.duplicate(scope);
        insert_once(&mut self.map.scopes, scope, copy)?;
        self.produced.scopes.push(copy);

        let symbols: Vec<SymbolId> = self.program.scopes.symbols_in_order(scope).collect();
        for symbol in symbols {
            self.claim_symbol(symbol)?;
        }
        Ok(copy)
    }

    fn claim_symbol(&mut self, symbol: SymbolId) -> Result<SymbolId, CoreError> {
        if let Some(copy) = self.map.symbol(symbol) {
            return Ok(copy);
        }
        let copy = self.program.scopes.duplicate_symbol(symbol);
        insert_once(&mut self.map.symbols, symbol, copy)?;
        self.produced.symbols.push(copy);

        // Overload set references are owned by the scope that declares them.
        let value = self.program.scopes.symbol(symbol).value;
        if matches!(self.program.ast.expr(value).kind, ExprKind::OverloadSetRef(_)) {
            self.claim_expr(value)?;
        }
        Ok(copy)
    }

    fn claim_overload_set(&mut self, set: OverloadSetId) -> Result<OverloadSetId, CoreError> {
        if let Some(copy) = self.map.overload_set(set) {
            return Ok(copy);
        }
        let data = self.program.ast.overload_set(set).clone();
        let copy = self.program.ast.add_overload_set(data.clone());
        insert_once(&mut self.map.overload_sets, set, copy)?;
        self.produced.overload_sets.push(copy);

        let member_scope = self.program.types.get(data.ty).member_scope;
        let span = self.program.ast.expr(self.program.types.get(data.ty).self_expr).span;
        let ast = &mut self.program.ast;
        let ty = self.program.types.add(
            TypeKind::OverloadSet(copy),
            self.program.types.name(data.ty).to_string(),
            member_scope,
            |id| ast.add_expr(ExprKind::TypeRef(id), span),
        );
        insert_once(&mut self.map.types, data.ty, ty)?;
        Ok(copy)
    }

    fn claim_function(&mut self, function: FunctionId) -> Result<FunctionId, CoreError> {
        if let Some(copy) = self.map.function(function) {
            return Ok(copy);
        }
        let data = self.program.ast.function(function).clone();
        let copy = self.program.ast.add_function(data.clone());
        insert_once(&mut self.map.functions, function, copy)?;
        self.produced.functions.push(copy);
        tracing::trace!(function = %data.name, from = function.index(), to = copy.index(), "cloning function");

        self.claim_scope(data.scope)?;
        if let Some(return_type) = data.return_type_expr {
            self.claim_expr(return_type)?;
        }
        for param in data.params {
            self.claim_expr(param)?;
        }
        if let Some(body) = data.body {
            self.claim_stmt(body)?;
        }
        Ok(copy)
    }

    fn claim_stmt(&mut self, stmt: StmtId) -> Result<StmtId, CoreError> {
        if let Some(copy) = self.map.stmt(stmt) {
            return Ok(copy);
        }
        let mut data = self.program.ast.stmt(stmt).clone();

        match &mut data.kind {
            StmtKind::Block(block) => {
                if let Some(snapshot) = block.snapshot.get().copied() {
                    let copy = self.claim_stmt(snapshot)?;
                    insert_once(&mut self.map.stmts, stmt, copy)?;
                    return Ok(copy);
                }
                block.snapshot = OnceCell::new();
            }
            StmtKind::Struct { .. } => {
                return Err(CoreError::malformed("struct declaration", "cloning"));
            }
            StmtKind::Typeclass(_) => {
                return Err(CoreError::malformed("typeclass declaration", "cloning"));
            }
            StmtKind::Instance(_) => {
                return Err(CoreError::malformed("instance definition", "cloning"));
            }
            _ => {}
        }

        let copy = self.program.ast.push_stmt(data.clone());
        insert_once(&mut self.map.stmts, stmt, copy)?;
        self.produced.stmts.push(copy);

        match data.kind {
            StmtKind::Block(block) => {
                for scope in scope_chain(self.program, block.current_scope, block.scope) {
                    self.claim_scope(scope)?;
                }
                for entry in &block.entries {
                    self.claim_stmt(entry.stmt)?;
                }
                if let Some(value) = block.value {
                    self.claim_expr(value)?;
                }
            }
            StmtKind::Let { binding, .. } => {
                self.claim_expr(binding)?;
            }
            StmtKind::Function(function) => {
                self.claim_function(function)?;
            }
            StmtKind::Return { value } | StmtKind::Expr(value) => {
                self.claim_expr(value)?;
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.claim_expr(condition)?;
                self.claim_stmt(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.claim_stmt(else_branch)?;
                }
            }
            StmtKind::Struct { .. } | StmtKind::Typeclass(_) | StmtKind::Instance(_) => {}
        }
        Ok(copy)
    }

    fn claim_expr(&mut self, expr: ExprId) -> Result<ExprId, CoreError> {
        if let Some(copy) = self.map.expr(expr) {
            return Ok(copy);
        }
        let data = self.program.ast.expr(expr).clone();
        if let ExprKind::Field { .. } = data.kind {
            return Err(CoreError::malformed("struct field", "cloning"));
        }
        let copy = self.program.ast.push_expr(data.clone());
        insert_once(&mut self.map.exprs, expr, copy)?;
        self.produced.exprs.push(copy);

        match data.kind {
            ExprKind::Unary { operand, .. } => {
                self.claim_expr(operand)?;
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.claim_expr(lhs)?;
                self.claim_expr(rhs)?;
            }
            ExprKind::Call { callee, args, .. } => {
                self.claim_expr(callee)?;
                for arg in args {
                    self.claim_expr(arg)?;
                }
            }
            ExprKind::Member { base, .. } => {
                self.claim_expr(base)?;
            }
            ExprKind::StructLiteral {
                ty_expr, fields, ..
            } => {
                self.claim_expr(ty_expr)?;
                for (_, value) in fields {
                    self.claim_expr(value)?;
                }
            }
            ExprKind::Parameter { type_expr, .. } => {
                self.claim_expr(type_expr)?;
            }
            ExprKind::Variable {
                annotation, init, ..
            } => {
                if let Some(annotation) = annotation {
                    self.claim_expr(annotation)?;
                }
                self.claim_expr(init)?;
            }
            ExprKind::OverloadSetRef(set) => {
                self.claim_overload_set(set)?;
            }
            ExprKind::Integer(_)
            | ExprKind::Boolean(_)
            | ExprKind::Identifier { .. }
            | ExprKind::TypeRef(_)
            | ExprKind::TypeclassRef(_)
            | ExprKind::Field { .. } => {}
        }
        Ok(copy)
    }

    fn remap(&mut self) {
        let map = &*self.map;
        let program = &mut *self.program;

        for &scope in &self.produced.scopes {
            let parent = program.scopes.scope(scope).parent.map(|p| map.map_scope(p));
            program.scopes.scope_mut(scope).parent = parent;
            let bindings: Vec<(String, SymbolId)> = program
                .scopes
                .symbols_in_order(scope)
                .map(|symbol| (program.scopes.symbol(symbol).name.clone(), symbol))
                .collect();
            for (name, symbol) in bindings {
                program.scopes.rebind(scope, &name, map.map_symbol(symbol));
            }
        }

        for &symbol in &self.produced.symbols {
            let data = program.scopes.symbol_mut(symbol);
            data.scope = map.map_scope(data.scope);
            data.value = map.map_expr(data.value);
        }

        for &stmt in &self.produced.stmts {
            match &mut program.ast.stmt_mut(stmt).kind {
                StmtKind::Block(block) => {
                    block.scope = map.map_scope(block.scope);
                    block.current_scope = map.map_scope(block.current_scope);
                    for entry in &mut block.entries {
                        entry.stmt = map.map_stmt(entry.stmt);
                        entry.scope = map.map_scope(entry.scope);
                    }
                    block.value = block.value.map(|value| map.map_expr(value));
                }
                StmtKind::Let { symbol, binding } => {
                    *symbol = map.map_symbol(*symbol);
                    *binding = map.map_expr(*binding);
                }
                StmtKind::Function(function) => *function = map.map_function(*function),
                StmtKind::Return { value } | StmtKind::Expr(value) => *value = map.map_expr(*value),
                StmtKind::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    *condition = map.map_expr(*condition);
                    *then_branch = map.map_stmt(*then_branch);
                    *else_branch = else_branch.map(|branch| map.map_stmt(branch));
                }
                StmtKind::Struct { .. } | StmtKind::Typeclass(_) | StmtKind::Instance(_) => {}
            }
        }

        for &expr in &self.produced.exprs {
            let data = program.ast.expr_mut(expr);
            data.ty = data.ty.map(|ty| map.map_type(ty));
            data.value = map.map_value(&data.value);
            match &mut data.kind {
                ExprKind::Identifier {
                    scope, referenced, ..
                } => {
                    *scope = map.map_scope(*scope);
                    *referenced = referenced.map(|symbol| map.map_symbol(symbol));
                }
                ExprKind::Unary { operand, .. } => *operand = map.map_expr(*operand),
                ExprKind::Binary { lhs, rhs, .. } => {
                    *lhs = map.map_expr(*lhs);
                    *rhs = map.map_expr(*rhs);
                }
                ExprKind::Call {
                    callee,
                    args,
                    resolution,
                } => {
                    *callee = map.map_expr(*callee);
                    for arg in args.iter_mut() {
                        *arg = map.map_expr(*arg);
                    }
                    if let Some(CallTarget::Function(function)) = resolution {
                        *function = map.map_function(*function);
                    }
                }
                ExprKind::Member {
                    base, referenced, ..
                } => {
                    *base = map.map_expr(*base);
                    *referenced = referenced.map(|symbol| map.map_symbol(symbol));
                }
                ExprKind::StructLiteral {
                    ty_expr,
                    fields,
                    layout,
                } => {
                    *ty_expr = map.map_expr(*ty_expr);
                    for (_, value) in fields.iter_mut() {
                        *value = map.map_expr(*value);
                    }
                    for slot in layout.iter_mut() {
                        *slot = map.map_expr(*slot);
                    }
                }
                ExprKind::Parameter { type_expr, .. } => *type_expr = map.map_expr(*type_expr),
                ExprKind::Variable {
                    annotation, init, ..
                } => {
                    *annotation = annotation.map(|expr| map.map_expr(expr));
                    *init = map.map_expr(*init);
                }
                ExprKind::OverloadSetRef(set) => *set = map.map_overload_set(*set),
                ExprKind::Integer(_)
                | ExprKind::Boolean(_)
                | ExprKind::TypeRef(_)
                | ExprKind::TypeclassRef(_)
                | ExprKind::Field { .. } => {}
            }
        }

        for &function in &self.produced.functions {
            let data = program.ast.function_mut(function);
            data.scope = map.map_scope(data.scope);
            data.overload_set = map.map_overload_set(data.overload_set);
            data.return_type_expr = data.return_type_expr.map(|expr| map.map_expr(expr));
            data.return_type = data.return_type.map(|ty| map.map_type(ty));
            for param in data.params.iter_mut() {
                *param = map.map_expr(*param);
            }
            data.body = data.body.map(|body| map.map_stmt(body));
        }

        for &set in &self.produced.overload_sets {
            let data = program.ast.overload_set_mut(set);
            data.scope = map.map_scope(data.scope);
            data.ty = map.map_type(data.ty);
            for function in data.functions.iter_mut() {
                *function = map.map_function(*function);
            }
        }
    }
}

/// Scopes of a block from its final scope back to the one it opened with.
fn scope_chain(program: &Program, current: ScopeId, original: ScopeId) -> Vec<ScopeId> {
    let mut chain = Vec::new();
    for scope in program.scopes.ancestors(current) {
        chain.push(scope);
        if scope == original {
            break;
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashSet;

    use super::*;
    use crate::parser::parse;
    use crate::sema::preanalyze::preanalyze_module;
    use crate::sema::tree::NodeRef;
    use crate::span::FileId;

    fn program(source: &str) -> Program {
        let module = parse(FileId::UNIT, source).expect("parse");
        let mut program = Program::new("main", false);
        let scope = program.module_scope;
        let block = preanalyze_module(&mut program, &module, scope).expect("preanalyze");
        program.module_block = Some(block);
        program
    }

    fn first_function(program: &Program) -> FunctionId {
        program.ast.function_ids().next().expect("a function")
    }

    fn scopes_referenced(program: &Program, nodes: &FxHashSet<NodeRef>) -> FxHashSet<ScopeId> {
        let mut scopes = FxHashSet::default();
        for node in nodes {
            match node {
                NodeRef::Expr(id) => {
                    if let ExprKind::Identifier { scope, .. } = program.ast.expr(*id).kind {
                        scopes.insert(scope);
                    }
                }
                NodeRef::Stmt(id) => {
                    if let Some(block) = program.ast.block(*id) {
                        scopes.insert(block.scope);
                        scopes.insert(block.current_scope);
                    }
                }
                NodeRef::Function(id) => {
                    scopes.insert(program.ast.function(*id).scope);
                }
            }
        }
        scopes
    }

    const RECURSIVE: &str = "fn f(n : integer) -> integer {
        let m = n - 1;
        if m == 0 { return 0; }
        return f(m);
    }";

    #[test]
    fn clone_shares_no_nodes_with_the_original() {
        let mut program = program(RECURSIVE);
        let original = first_function(&program);
        let mut map = Replacements::new();
        let copy = clone_function(&mut program, &mut map, original).expect("clone");

        let before = program.ast.subtree(NodeRef::Function(original));
        let after = program.ast.subtree(NodeRef::Function(copy));
        assert_eq!(before.len(), after.len());
        assert!(before.is_disjoint(&after));

        let original_scopes = scopes_referenced(&program, &before);
        let cloned_scopes = scopes_referenced(&program, &after);
        assert!(original_scopes.is_disjoint(&cloned_scopes));
    }

    #[test]
    fn every_original_node_maps_to_exactly_one_clone() {
        let mut program = program(RECURSIVE);
        let original = first_function(&program);
        let mut map = Replacements::new();
        let copy = clone_function(&mut program, &mut map, original).expect("clone");

        let after = program.ast.subtree(NodeRef::Function(copy));
        for node in program.ast.subtree(NodeRef::Function(original)) {
            let mapped = match node {
                NodeRef::Stmt(id) => map.stmt(id).map(NodeRef::Stmt),
                NodeRef::Expr(id) => map.expr(id).map(NodeRef::Expr),
                NodeRef::Function(id) => map.function(id).map(NodeRef::Function),
            }
            .expect("mapped");
            assert!(after.contains(&mapped));
        }

        // Claiming the same function again in the same operation is a no-op.
        let again = clone_function(&mut program, &mut map, original).expect("clone again");
        assert_eq!(again, copy);
    }

    #[test]
    fn cloned_scopes_keep_their_bindings_but_rebind_symbols() {
        let mut program = program(RECURSIVE);
        let original = first_function(&program);
        let mut map = Replacements::new();
        let copy = clone_function(&mut program, &mut map, original).expect("clone");

        let original_scope = program.ast.function(original).scope;
        let cloned_scope = program.ast.function(copy).scope;
        let original_n = program.scopes.lookup_local(original_scope, "n").expect("n");
        let cloned_n = program.scopes.lookup_local(cloned_scope, "n").expect("n");
        assert_ne!(original_n, cloned_n);
        assert_eq!(program.scopes.symbol(cloned_n).scope, cloned_scope);
        assert_ne!(
            program.scopes.symbol(cloned_n).value,
            program.scopes.symbol(original_n).value
        );
        // The parameter scope's parent lies outside the clone and is shared.
        assert_eq!(
            program.scopes.scope(cloned_scope).parent,
            program.scopes.scope(original_scope).parent
        );
    }

    #[test]
    fn seeded_scope_redirects_parents() {
        let mut program = program(RECURSIVE);
        let original = first_function(&program);
        let outer = program.scopes.scope(program.ast.function(original).scope).parent.expect("parent");
        let target = program.scopes.clone_for_class(outer, "Target");

        let mut map = Replacements::new();
        map.add_scope(outer, target).expect("seed");
        let copy = clone_function(&mut program, &mut map, original).expect("clone");
        assert_eq!(
            program.scopes.scope(program.ast.function(copy).scope).parent,
            Some(target)
        );

        let err = map.add_scope(outer, outer).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn nested_declarations_cannot_be_cloned() {
        let mut program = program("fn f() -> integer { struct S { x : integer } return 1; }");
        let original = first_function(&program);
        let mut map = Replacements::new();
        let err = clone_function(&mut program, &mut map, original).unwrap_err();
        assert!(matches!(err, CoreError::MalformedConstruct { stage: "cloning", .. }));
    }

    #[test]
    fn snapshot_is_taken_once() {
        let mut program = program(RECURSIVE);
        let body = program.ast.function(first_function(&program)).body.expect("body");
        let first = ensure_snapshot(&mut program, body).expect("snapshot");
        let count = program.ast.stmt_count();
        let second = ensure_snapshot(&mut program, body).expect("snapshot");
        assert_eq!(first, second);
        assert_eq!(program.ast.stmt_count(), count);

        // Cloning a snapshotted block clones the snapshot.
        let mut map = Replacements::new();
        clone_stmt(&mut program, &mut map, body).expect("clone");
        assert!(map.stmt(first).is_some());
        assert_eq!(map.stmt(body), map.stmt(first));
    }
}
