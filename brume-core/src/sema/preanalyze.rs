//! Pre-analysis: builds the semantic tree, scopes and symbols from the CST.
//!
//! Every declaration is bound before analysis starts, so analysis only ever
//! waits on the *analysis* of a symbol's value, never on its existence. The
//! one exception is an instance's member scope, which stays open until the
//! instance is instantiated.

use std::cell::OnceCell;

use super::Program;
use super::scope::{ScopeId, SymbolId};
use super::tree::{
    Block, Entry, ExprId, ExprKind, Function, FunctionId, Instance, OverloadSet, OverloadSetId,
    StmtId, StmtKind, Typeclass, TypeclassId,
};
use super::types::{TypeId, TypeKind};
use crate::ast;
use crate::error::CoreError;
use crate::span::Span;

/// Pre-analyzes a parsed file into a top-level block bound directly in
/// `scope`. The scope is left open; the caller closes it once every file
/// sharing it has been processed.
pub fn preanalyze_module(
    program: &mut Program,
    module: &ast::Module,
    scope: ScopeId,
) -> Result<StmtId, CoreError> {
    let mut pre = Preanalyzer { program };
    let mut entries = Vec::with_capacity(module.items.len());
    let mut current = scope;
    for item in &module.items {
        let stmt = pre.statement(&item.statement, &mut current, true, item.exported)?;
        entries.push(Entry {
            stmt,
            scope: current,
        });
    }

    let block = Block {
        scope,
        current_scope: current,
        entries,
        value: None,
        is_top_level: true,
        snapshot: OnceCell::new(),
    };
    Ok(pre.program.ast.add_stmt(StmtKind::Block(block), module.span))
}

/// Get-or-create the overload set called `name` in `scope`.
pub(crate) fn overload_set_in(
    program: &mut Program,
    scope: ScopeId,
    name: &str,
    span: Span,
) -> Result<(SymbolId, OverloadSetId), CoreError> {
    if let Some(symbol) = program.scopes.lookup_local(scope, name) {
        let value = program.scopes.symbol(symbol).value;
        return match program.ast.expr(value).kind {
            ExprKind::OverloadSetRef(set) => Ok((symbol, set)),
            _ => Err(CoreError::Redeclaration {
                name: name.to_string(),
                span,
            }),
        };
    }

    let member_scope = program.scopes.clone_for_class(scope, format!("fn {name}"));
    program.scopes.close(member_scope);
    let set = program.ast.add_overload_set(OverloadSet {
        name: name.to_string(),
        scope,
        functions: Vec::new(),
        ty: TypeId::TYPE,
    });
    let ast = &mut program.ast;
    let ty = program
        .types
        .add(TypeKind::OverloadSet(set), format!("fn {name}"), member_scope, |id| {
            ast.add_expr(ExprKind::TypeRef(id), span)
        });
    program.ast.overload_set_mut(set).ty = ty;

    let reference = program.ast.add_expr(ExprKind::OverloadSetRef(set), span);
    let symbol = program.scopes.declare(scope, name, || reference)?;
    Ok((symbol, set))
}

struct Preanalyzer<'p> {
    program: &'p mut Program,
}

impl<'p> Preanalyzer<'p> {
    fn block(
        &mut self,
        block: &ast::Block,
        parent: ScopeId,
        is_function_body: bool,
    ) -> Result<StmtId, CoreError> {
        let span = block.span;
        let scope = self.program.scopes.clone_local(parent);
        let mut current = scope;
        let mut entries = Vec::with_capacity(block.rows.len());

        for row in &block.rows {
            let stmt = match row {
                ast::BlockRow::Block(nested) => self.block(nested, current, false)?,
                ast::BlockRow::Statement(statement) => {
                    self.statement(statement, &mut current, false, false)?
                }
            };
            entries.push(Entry {
                stmt,
                scope: current,
            });
        }

        let value = block
            .value
            .as_ref()
            .map(|expr| self.expr(expr, current))
            .transpose()?;
        self.program.scopes.close(current);

        let block = Block {
            scope,
            current_scope: current,
            entries,
            value,
            is_top_level: is_function_body,
            snapshot: OnceCell::new(),
        };
        Ok(self.program.ast.add_stmt(StmtKind::Block(block), span))
    }

    fn statement(
        &mut self,
        statement: &ast::Statement,
        current: &mut ScopeId,
        module_level: bool,
        exported: bool,
    ) -> Result<StmtId, CoreError> {
        let span = statement.span;
        let (kind, symbol) = match &statement.kind {
            ast::StatementKind::Let(decl) => {
                let (kind, symbol) = self.let_binding(decl, current, module_level, span)?;
                (kind, Some(symbol))
            }
            ast::StatementKind::Function(def) => {
                let function = self.function(def, *current, false)?;
                let set = self.program.ast.function(function).overload_set;
                let symbol = self.program.scopes.lookup_local(*current, &self.program.ast.overload_set(set).name);
                (StmtKind::Function(function), symbol)
            }
            ast::StatementKind::Struct(decl) => {
                let (ty, symbol) = self.structure(decl, *current, span)?;
                (StmtKind::Struct { ty }, Some(symbol))
            }
            ast::StatementKind::Typeclass(decl) => {
                let (typeclass, symbol) = self.typeclass(decl, *current, span)?;
                (StmtKind::Typeclass(typeclass), Some(symbol))
            }
            ast::StatementKind::Instance(def) => (self.instance(def, *current, span)?, None),
            ast::StatementKind::Return(_) | ast::StatementKind::If(_) | ast::StatementKind::Expr(_)
                if module_level =>
            {
                return Err(CoreError::ParseError {
                    message: "only declarations may appear at module level".to_string(),
                    span,
                });
            }
            ast::StatementKind::Return(value) => (
                StmtKind::Return {
                    value: self.expr(value, *current)?,
                },
                None,
            ),
            ast::StatementKind::If(stmt) => (self.if_statement(stmt, *current)?, None),
            ast::StatementKind::Expr(expr) => (StmtKind::Expr(self.expr(expr, *current)?), None),
        };

        if let (true, Some(symbol)) = (exported, symbol) {
            self.program.scopes.symbol_mut(symbol).exported = true;
        }
        Ok(self.program.ast.add_stmt(kind, span))
    }

    /// Outside module level a `let` closes the active scope and continues in
    /// a fresh child, so the initializer still sees the previous binding of
    /// a shadowed name.
    fn let_binding(
        &mut self,
        decl: &ast::LetDecl,
        current: &mut ScopeId,
        module_level: bool,
        span: Span,
    ) -> Result<(StmtKind, SymbolId), CoreError> {
        let annotation = decl
            .annotation
            .as_ref()
            .map(|expr| self.expr(expr, *current))
            .transpose()?;
        let init = self.expr(&decl.init, *current)?;
        let binding = self.program.ast.add_expr(
            ExprKind::Variable {
                name: decl.name.name.clone(),
                annotation,
                init,
            },
            span,
        );

        if module_level {
            self.ensure_unbound(*current, &decl.name)?;
        } else {
            let next = self.program.scopes.clone_local(*current);
            self.program.scopes.close(*current);
            self.program.scopes.retain(*current);
            *current = next;
        }
        let symbol = self
            .program
            .scopes
            .declare(*current, &decl.name.name, || binding)?;
        Ok((StmtKind::Let { symbol, binding }, symbol))
    }

    fn function(
        &mut self,
        def: &ast::FunctionDef,
        scope: ScopeId,
        generic: bool,
    ) -> Result<FunctionId, CoreError> {
        let (_, overload_set) = overload_set_in(self.program, scope, &def.name.name, def.name.span)?;
        let function_scope = self.program.scopes.clone_local(scope);

        let mut params = Vec::with_capacity(def.params.len());
        for (index, param) in def.params.iter().enumerate() {
            let type_expr = self.expr(&param.ty, scope)?;
            let expr = self.program.ast.add_expr(
                ExprKind::Parameter {
                    name: param.name.name.clone(),
                    type_expr,
                    index,
                },
                param.span,
            );
            self.ensure_unbound(function_scope, &param.name)?;
            self.program
                .scopes
                .declare(function_scope, &param.name.name, || expr)?;
            params.push(expr);
        }

        let return_type_expr = def
            .return_type
            .as_ref()
            .map(|expr| self.expr(expr, scope))
            .transpose()?;
        let body = def
            .body
            .as_ref()
            .map(|body| self.block(body, function_scope, true))
            .transpose()?;
        self.program.scopes.close(function_scope);

        let function = self.program.ast.add_function(Function {
            name: def.name.name.clone(),
            span: def.span,
            params,
            return_type_expr,
            return_type: None,
            body,
            scope: function_scope,
            overload_set,
            vtable_slot: None,
            generic,
            parent_type: None,
            analyzed: false,
        });
        self.program
            .ast
            .overload_set_mut(overload_set)
            .functions
            .push(function);
        Ok(function)
    }

    fn structure(
        &mut self,
        decl: &ast::StructDecl,
        scope: ScopeId,
        span: Span,
    ) -> Result<(TypeId, SymbolId), CoreError> {
        self.ensure_unbound(scope, &decl.name)?;
        let member_scope = self.program.scopes.clone_for_class(scope, decl.name.name.clone());

        let mut fields = Vec::with_capacity(decl.fields.len());
        for (index, field) in decl.fields.iter().enumerate() {
            let type_expr = self.expr(&field.ty, scope)?;
            let default = field
                .default
                .as_ref()
                .map(|expr| self.expr(expr, scope))
                .transpose()?;
            let expr = self.program.ast.add_expr(
                ExprKind::Field {
                    name: field.name.name.clone(),
                    type_expr,
                    default,
                    index,
                },
                field.span,
            );
            self.ensure_unbound(member_scope, &field.name)?;
            self.program
                .scopes
                .declare(member_scope, &field.name.name, || expr)?;
            fields.push(expr);
        }
        self.program.scopes.close(member_scope);

        let ast = &mut self.program.ast;
        let ty = self.program.types.add(
            TypeKind::Struct { fields },
            decl.name.name.clone(),
            member_scope,
            |id| ast.add_expr(ExprKind::TypeRef(id), span),
        );
        let self_expr = self.program.types.get(ty).self_expr;
        let symbol = self
            .program
            .scopes
            .declare(scope, &decl.name.name, || self_expr)?;
        Ok((ty, symbol))
    }

    fn typeclass(
        &mut self,
        decl: &ast::TypeclassDecl,
        scope: ScopeId,
        span: Span,
    ) -> Result<(TypeclassId, SymbolId), CoreError> {
        self.ensure_unbound(scope, &decl.name)?;
        let class_scope = self.program.scopes.clone_for_class(scope, decl.name.name.clone());

        let mut params = Vec::with_capacity(decl.params.len());
        for (index, param) in decl.params.iter().enumerate() {
            let type_expr = self.expr(&param.ty, scope)?;
            let expr = self.program.ast.add_expr(
                ExprKind::Parameter {
                    name: param.name.name.clone(),
                    type_expr,
                    index,
                },
                param.span,
            );
            self.ensure_unbound(class_scope, &param.name)?;
            self.program
                .scopes
                .declare(class_scope, &param.name.name, || expr)?;
            params.push(expr);
        }

        let typeclass = self.program.ast.add_typeclass(Typeclass {
            name: decl.name.name.clone(),
            span,
            scope: class_scope,
            params,
            functions: Vec::new(),
            ty: TypeId::TYPE,
            instances: Vec::new(),
        });
        let ast = &mut self.program.ast;
        let ty = self.program.types.add(
            TypeKind::Typeclass(typeclass),
            decl.name.name.clone(),
            class_scope,
            |id| ast.add_expr(ExprKind::TypeRef(id), span),
        );
        self.program.ast.typeclass_mut(typeclass).ty = ty;

        let reference = self
            .program
            .ast
            .add_expr(ExprKind::TypeclassRef(typeclass), decl.name.span);
        let symbol = self
            .program
            .scopes
            .declare(scope, &decl.name.name, || reference)?;

        for member in &decl.members {
            if decl
                .members
                .iter()
                .filter(|other| other.name.name == member.name.name)
                .count()
                > 1
            {
                return Err(CoreError::Redeclaration {
                    name: member.name.name.clone(),
                    span: member.name.span,
                });
            }
            let function = self.function(member, class_scope, true)?;
            self.program
                .ast
                .typeclass_mut(typeclass)
                .functions
                .push(function);
        }
        self.program.scopes.close(class_scope);

        Ok((typeclass, symbol))
    }

    fn instance(
        &mut self,
        def: &ast::InstanceDef,
        scope: ScopeId,
        span: Span,
    ) -> Result<StmtKind, CoreError> {
        let typeclass_expr = self.program.ast.add_expr(
            ExprKind::Identifier {
                name: def.typeclass.name.clone(),
                scope,
                referenced: None,
            },
            def.typeclass.span,
        );
        let arguments = def
            .arguments
            .iter()
            .map(|arg| self.expr(arg, scope))
            .collect::<Result<Vec<_>, _>>()?;

        // Renamed to the full instance name once the arguments are known.
        let instance_scope = self
            .program
            .scopes
            .clone_for_class(scope, def.typeclass.name.clone());
        let functions = def
            .members
            .iter()
            .map(|member| self.function(member, instance_scope, false))
            .collect::<Result<Vec<_>, _>>()?;

        let instance = self.program.ast.add_instance(Instance {
            span,
            typeclass_expr,
            arguments,
            scope: instance_scope,
            functions,
            ty: None,
        });
        Ok(StmtKind::Instance(instance))
    }

    fn if_statement(&mut self, stmt: &ast::IfStmt, scope: ScopeId) -> Result<StmtKind, CoreError> {
        let condition = self.expr(&stmt.condition, scope)?;
        let then_branch = self.block(&stmt.then_block, scope, false)?;
        let else_branch = stmt
            .else_block
            .as_ref()
            .map(|block| self.block(block, scope, false))
            .transpose()?;
        Ok(StmtKind::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn expr(&mut self, expr: &ast::Expr, scope: ScopeId) -> Result<ExprId, CoreError> {
        let kind = match &expr.kind {
            ast::ExprKind::Integer(value) => ExprKind::Integer(*value),
            ast::ExprKind::Boolean(value) => ExprKind::Boolean(*value),
            ast::ExprKind::Ident(ident) => ExprKind::Identifier {
                name: ident.name.clone(),
                scope,
                referenced: None,
            },
            ast::ExprKind::Unary { op, operand } => ExprKind::Unary {
                op: *op,
                operand: self.expr(operand, scope)?,
                resolution: None,
            },
            ast::ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op: *op,
                lhs: self.expr(lhs, scope)?,
                rhs: self.expr(rhs, scope)?,
                resolution: None,
            },
            ast::ExprKind::Call { callee, args } => ExprKind::Call {
                callee: self.expr(callee, scope)?,
                args: args
                    .iter()
                    .map(|arg| self.expr(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?,
                resolution: None,
            },
            ast::ExprKind::Member { base, member } => ExprKind::Member {
                base: self.expr(base, scope)?,
                member: member.name.clone(),
                referenced: None,
            },
            ast::ExprKind::StructLiteral { ty, fields } => ExprKind::StructLiteral {
                ty_expr: self.expr(ty, scope)?,
                fields: fields
                    .iter()
                    .map(|field| Ok((field.name.name.clone(), self.expr(&field.value, scope)?)))
                    .collect::<Result<Vec<_>, CoreError>>()?,
                layout: Vec::new(),
            },
        };
        Ok(self.program.ast.add_expr(kind, expr.span))
    }

    fn ensure_unbound(&self, scope: ScopeId, name: &ast::Ident) -> Result<(), CoreError> {
        match self.program.scopes.lookup_local(scope, &name.name) {
            Some(_) => Err(CoreError::Redeclaration {
                name: name.name.clone(),
                span: name.span,
            }),
            None => Ok(()),
        }
    }
}
