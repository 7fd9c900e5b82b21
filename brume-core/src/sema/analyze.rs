//! Type analysis.
//!
//! Every statement, expression and function is analyzed at most once: asking
//! again returns the same `Done` handle. Analyzing a node spawns a task that
//! registers continuations on the nodes it depends on, so declarations may
//! refer to each other in any order. Results are written back into the tree
//! (`Expr::ty`, `Expr::value`, operator and call resolutions, function
//! return types).
//!
//! If the scheduler drains while some handle is still pending, the program
//! has a dependency that can never be satisfied: a missing typeclass
//! instance, or a cycle such as a function whose inferred return type
//! depends on itself.

use rustc_hash::FxHashMap;

use super::Program;
use super::deferred::{Context, Deferred, Scheduler, join_all, run};
use super::overload;
use super::scope::{ScopeKind, SymbolId};
use super::simplify::always_returns;
use super::tree::{
    CallTarget, ExprId, ExprKind, FunctionId, OverloadSetId, StmtId, StmtKind, TypeclassId,
};
use super::typeclass;
use super::types::TypeId;
use super::value::{self, Value};
use crate::error::CoreError;
use crate::span::Span;

/// Completion handle of one analysis.
pub type Done = Deferred<(), Analyzer>;

pub struct Analyzer {
    pub(super) program: Program,
    scheduler: Scheduler<Analyzer>,
    stmts: FxHashMap<StmtId, Done>,
    exprs: FxHashMap<ExprId, Done>,
    functions: FxHashMap<FunctionId, Done>,
    /// Complete once parameter and return types are known.
    signatures: FxHashMap<FunctionId, Done>,
    instance_waiters: FxHashMap<(TypeclassId, Vec<TypeId>), Deferred<TypeId, Analyzer>>,
    expected_instances: Vec<(TypeclassId, Vec<TypeId>, Span)>,
    /// Expressions in the order their analysis was requested.
    requested: Vec<ExprId>,
}

impl Context for Analyzer {
    fn scheduler(&mut self) -> &mut Scheduler<Self> {
        &mut self.scheduler
    }
}

/// Analyzes every top-level block of `program` and returns the annotated
/// program.
pub fn analyze(program: Program) -> Result<Program, CoreError> {
    let mut analyzer = Analyzer::new(program);
    let blocks = analyzer.program.top_level_blocks();
    let parts = blocks
        .into_iter()
        .map(|block| analyzer.analyze_stmt(block))
        .collect();
    let all = join_all(&mut analyzer, parts);
    run(&mut analyzer)?;

    if !all.is_ready() {
        return Err(analyzer.stall_error());
    }
    let mut functions: Vec<FunctionId> = analyzer
        .functions
        .keys()
        .copied()
        .filter(|function| analyzer.program.ast.function(*function).analyzed)
        .collect();
    functions.sort();
    analyzer.program.analyzed_functions = functions;
    tracing::debug!(
        tasks = analyzer.scheduler.executed(),
        expressions = analyzer.exprs.len(),
        "analysis complete"
    );
    Ok(analyzer.program)
}

impl Analyzer {
    pub fn new(program: Program) -> Self {
        Analyzer {
            program,
            scheduler: Scheduler::new(),
            stmts: FxHashMap::default(),
            exprs: FxHashMap::default(),
            functions: FxHashMap::default(),
            signatures: FxHashMap::default(),
            instance_waiters: FxHashMap::default(),
            expected_instances: Vec::new(),
            requested: Vec::new(),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    pub fn analyze_stmt(&mut self, stmt: StmtId) -> Done {
        if let Some(done) = self.stmts.get(&stmt) {
            return done.clone();
        }
        let done = Done::new();
        self.stmts.insert(stmt, done.clone());
        let handle = done.clone();
        self.spawn(move |cx| cx.stmt_task(stmt, handle));
        done
    }

    pub fn analyze_expr(&mut self, expr: ExprId) -> Done {
        if let Some(done) = self.exprs.get(&expr) {
            return done.clone();
        }
        let done = Done::new();
        self.exprs.insert(expr, done.clone());
        self.requested.push(expr);
        let handle = done.clone();
        self.spawn(move |cx| cx.expr_task(expr, handle));
        done
    }

    pub fn analyze_function(&mut self, function: FunctionId) -> Done {
        if let Some(done) = self.functions.get(&function) {
            return done.clone();
        }
        let done = Done::new();
        self.functions.insert(function, done.clone());
        let handle = done.clone();
        self.spawn(move |cx| cx.function_task(function, handle));
        done
    }

    /// Starts analysis of `function` if needed and returns a handle that
    /// completes once its parameter and return types are known. With an
    /// explicit return type that happens before the body is analyzed.
    pub fn signature(&mut self, function: FunctionId) -> Done {
        let cell = self.signature_cell(function);
        self.analyze_function(function);
        cell
    }

    fn signature_cell(&mut self, function: FunctionId) -> Done {
        self.signatures.entry(function).or_default().clone()
    }

    /// Runs `f` once every handle in `parts` has completed.
    pub(super) fn after<F>(&mut self, parts: Vec<Done>, f: F)
    where
        F: FnOnce(&mut Analyzer) -> Result<(), CoreError> + 'static,
    {
        let all = join_all(self, parts);
        all.then(self, move |cx, _| f(cx));
    }

    fn finish_after(&mut self, parts: Vec<Done>, done: Done) {
        self.after(parts, move |cx| done.complete(cx, ()));
    }

    fn stmt_task(&mut self, stmt: StmtId, done: Done) -> Result<(), CoreError> {
        let span = self.program.ast.stmt(stmt).span;
        match self.program.ast.stmt(stmt).kind.clone() {
            StmtKind::Block(block) => {
                let mut parts: Vec<Done> = block
                    .entries
                    .iter()
                    .map(|entry| self.analyze_stmt(entry.stmt))
                    .collect();
                parts.extend(block.value.map(|value| self.analyze_expr(value)));
                self.finish_after(parts, done);
            }
            StmtKind::Let { symbol, binding } => {
                let part = self.analyze_expr(binding);
                self.after(vec![part], move |cx| {
                    let scope = cx.program.scopes.symbol(symbol).scope;
                    let module_level = cx.program.scopes.scope(scope).kind == ScopeKind::Module;
                    if module_level && !cx.program.expr_value(binding).is_constant() {
                        return Err(CoreError::type_mismatch(
                            "a compile-time constant",
                            "a run-time value",
                            span,
                        ));
                    }
                    done.complete(cx, ())
                });
            }
            StmtKind::Function(function) => {
                let part = self.analyze_function(function);
                self.finish_after(vec![part], done);
            }
            StmtKind::Return { value } | StmtKind::Expr(value) => {
                let part = self.analyze_expr(value);
                self.finish_after(vec![part], done);
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let checked = self
                    .analyze_expr(condition)
                    .map(self, move |cx, ()| cx.expect_type(condition, TypeId::BOOLEAN));
                let mut parts = vec![checked, self.analyze_stmt(then_branch)];
                parts.extend(else_branch.map(|branch| self.analyze_stmt(branch)));
                self.finish_after(parts, done);
            }
            StmtKind::Struct { ty } => {
                let fields = self
                    .program
                    .types
                    .get(ty)
                    .struct_fields()
                    .map(<[ExprId]>::to_vec)
                    .unwrap_or_default();
                let parts = fields
                    .into_iter()
                    .map(|field| self.analyze_expr(field))
                    .collect();
                self.finish_after(parts, done);
            }
            // Member functions are generic; only their instantiated copies
            // are analyzed.
            StmtKind::Typeclass(typeclass) => {
                let params = self.program.ast.typeclass(typeclass).params.clone();
                let parts = params
                    .into_iter()
                    .map(|param| self.analyze_expr(param))
                    .collect();
                self.finish_after(parts, done);
            }
            StmtKind::Instance(instance) => typeclass::instantiate(self, instance, done)?,
        }
        Ok(())
    }

    fn expr_task(&mut self, expr: ExprId, done: Done) -> Result<(), CoreError> {
        let span = self.program.ast.expr(expr).span;
        match self.program.ast.expr(expr).kind.clone() {
            ExprKind::Integer(v) => {
                self.set(expr, TypeId::INTEGER, Value::Integer(v));
                done.complete(self, ())?;
            }
            ExprKind::Boolean(v) => {
                self.set(expr, TypeId::BOOLEAN, Value::Boolean(v));
                done.complete(self, ())?;
            }
            ExprKind::TypeRef(ty) => {
                self.set(expr, TypeId::TYPE, Value::Type(ty));
                done.complete(self, ())?;
            }
            ExprKind::TypeclassRef(typeclass) => {
                self.set(expr, TypeId::TYPE, Value::Typeclass(typeclass));
                done.complete(self, ())?;
            }
            ExprKind::OverloadSetRef(set) => {
                let ty = self.program.ast.overload_set(set).ty;
                self.set(expr, ty, Value::OverloadSet(set));
                done.complete(self, ())?;
            }
            ExprKind::Identifier { name, scope, .. } => {
                let symbol = self.program.scopes.resolve(scope, &name, span)?;
                if let ExprKind::Identifier { referenced, .. } =
                    &mut self.program.ast.expr_mut(expr).kind
                {
                    *referenced = Some(symbol);
                }
                let target = self.program.scopes.symbol(symbol).value;
                let part = self.analyze_expr(target);
                self.after(vec![part], move |cx| {
                    cx.copy_analysis(expr, target)?;
                    done.complete(cx, ())
                });
            }
            ExprKind::Parameter { type_expr, .. } => {
                let part = self.analyze_expr(type_expr);
                self.after(vec![part], move |cx| {
                    let ty = cx.type_value(type_expr)?;
                    cx.set(expr, ty, Value::Runtime);
                    done.complete(cx, ())
                });
            }
            ExprKind::Field {
                type_expr, default, ..
            } => {
                let mut parts = vec![self.analyze_expr(type_expr)];
                parts.extend(default.map(|default| self.analyze_expr(default)));
                self.after(parts, move |cx| {
                    let ty = cx.type_value(type_expr)?;
                    if let Some(default) = default {
                        cx.expect_type(default, ty)?;
                    }
                    cx.set(expr, ty, Value::Runtime);
                    done.complete(cx, ())
                });
            }
            ExprKind::Variable {
                annotation, init, ..
            } => {
                let mut parts = vec![self.analyze_expr(init)];
                parts.extend(annotation.map(|annotation| self.analyze_expr(annotation)));
                self.after(parts, move |cx| {
                    let ty = match annotation {
                        Some(annotation) => {
                            let declared = cx.type_value(annotation)?;
                            cx.expect_type(init, declared)?;
                            declared
                        }
                        None => cx.program.expr_type(init)?,
                    };
                    let value = cx.program.expr_value(init).clone();
                    cx.set(expr, ty, value);
                    done.complete(cx, ())
                });
            }
            ExprKind::Unary { op, operand, .. } => {
                let part = self.analyze_expr(operand);
                self.after(vec![part], move |cx| {
                    let operand_ty = cx.program.expr_type(operand)?;
                    let resolved = overload::resolve_unary(&cx.program.types, op, operand_ty, span)?;
                    let folded = value::fold_unary(resolved.opcode, cx.program.expr_value(operand));
                    if let ExprKind::Unary { resolution, .. } = &mut cx.program.ast.expr_mut(expr).kind {
                        *resolution = Some(resolved);
                    }
                    cx.set(expr, resolved.result, folded);
                    done.complete(cx, ())
                });
            }
            ExprKind::Binary { op, lhs, rhs, .. } => {
                let parts = vec![self.analyze_expr(lhs), self.analyze_expr(rhs)];
                self.after(parts, move |cx| {
                    let lhs_ty = cx.program.expr_type(lhs)?;
                    let rhs_ty = cx.program.expr_type(rhs)?;
                    let resolved =
                        overload::resolve_binary(&cx.program.types, op, lhs_ty, rhs_ty, span)?;
                    let folded = value::fold_binary(
                        resolved.opcode,
                        cx.program.expr_value(lhs),
                        cx.program.expr_value(rhs),
                    );
                    if let ExprKind::Binary { resolution, .. } = &mut cx.program.ast.expr_mut(expr).kind {
                        *resolution = Some(resolved);
                    }
                    cx.set(expr, resolved.result, folded);
                    done.complete(cx, ())
                });
            }
            ExprKind::Call { callee, args, .. } => {
                let part = self.analyze_expr(callee);
                self.after(vec![part], move |cx| match cx.program.expr_value(callee).clone() {
                    Value::OverloadSet(set) => cx.call_overload_set(expr, set, args, span, done),
                    Value::Typeclass(typeclass) => cx.call_typeclass(expr, typeclass, args, span, done),
                    _ => Err(CoreError::type_mismatch(
                        "a function or a typeclass",
                        cx.describe(callee),
                        span,
                    )),
                });
            }
            ExprKind::Member { base, member, .. } => {
                let part = self.analyze_expr(base);
                self.after(vec![part], move |cx| cx.member(expr, base, member, span, done));
            }
            ExprKind::StructLiteral {
                ty_expr, fields, ..
            } => {
                let part = self.analyze_expr(ty_expr);
                self.after(vec![part], move |cx| {
                    cx.struct_literal(expr, ty_expr, fields, span, done)
                });
            }
        }
        Ok(())
    }

    fn call_overload_set(
        &mut self,
        expr: ExprId,
        set: OverloadSetId,
        args: Vec<ExprId>,
        span: Span,
        done: Done,
    ) -> Result<(), CoreError> {
        let functions = self.program.ast.overload_set(set).functions.clone();
        let mut parts: Vec<Done> = args.iter().map(|arg| self.analyze_expr(*arg)).collect();
        parts.extend(functions.iter().map(|function| self.signature(*function)));

        self.after(parts, move |cx| {
            let arg_types = args
                .iter()
                .map(|arg| cx.program.expr_type(*arg))
                .collect::<Result<Vec<_>, _>>()?;
            let candidates = functions
                .iter()
                .map(|function| Ok((*function, cx.parameter_types(*function)?)))
                .collect::<Result<Vec<_>, CoreError>>()?;
            let name = cx.program.ast.overload_set(set).name.clone();
            let chosen = overload::select(&cx.program.types, &name, candidates, &arg_types, span)?;
            let result = cx.program.ast.function(chosen).return_type.ok_or_else(|| {
                CoreError::malformed(format!("signature of `{name}`"), "call resolution")
            })?;

            if let ExprKind::Call { resolution, .. } = &mut cx.program.ast.expr_mut(expr).kind {
                *resolution = Some(CallTarget::Function(chosen));
            }
            cx.set(expr, result, Value::Runtime);
            tracing::debug!(function = %name, candidate = chosen.index(), "resolved call");
            done.complete(cx, ())
        });
        Ok(())
    }

    /// `Typeclass(args)` evaluates to the instance type once an instance for
    /// those arguments has been registered.
    fn call_typeclass(
        &mut self,
        expr: ExprId,
        typeclass: TypeclassId,
        args: Vec<ExprId>,
        span: Span,
        done: Done,
    ) -> Result<(), CoreError> {
        let parts = args.iter().map(|arg| self.analyze_expr(*arg)).collect();
        self.after(parts, move |cx| {
            let arguments = args
                .iter()
                .map(|arg| cx.type_value(*arg))
                .collect::<Result<Vec<_>, _>>()?;
            let data = cx.program.ast.typeclass(typeclass);
            if arguments.len() != data.params.len() {
                return Err(CoreError::NoMatchingOverload {
                    name: cx.program.types.instance_name(&data.name, &arguments),
                    span,
                });
            }

            let waiter = cx.instance_waiter(typeclass, arguments.clone());
            if !waiter.is_ready() {
                cx.expected_instances.push((typeclass, arguments, span));
            }
            waiter.then(cx, move |cx, instance| {
                if let ExprKind::Call { resolution, .. } = &mut cx.program.ast.expr_mut(expr).kind {
                    *resolution = Some(CallTarget::Instance(instance));
                }
                cx.set(expr, TypeId::TYPE, Value::Type(instance));
                done.complete(cx, ())
            });
            Ok(())
        });
        Ok(())
    }

    fn member(
        &mut self,
        expr: ExprId,
        base: ExprId,
        member: String,
        span: Span,
        done: Done,
    ) -> Result<(), CoreError> {
        let base_value = self.program.expr_value(base).clone();

        // Static access into a type's member scope.
        if let Value::Type(owner) = base_value {
            let scope = self.program.types.get(owner).member_scope;
            let symbol = self
                .program
                .scopes
                .lookup_local(scope, &member)
                .ok_or_else(|| CoreError::UnboundName {
                    name: format!("{}.{member}", self.program.type_name(owner)),
                    span,
                })?;
            self.mark_member(expr, symbol);
            let target = self.program.scopes.symbol(symbol).value;
            let field_index = match self.program.ast.expr(target).kind {
                ExprKind::Field { index, .. } => Some(index),
                _ => None,
            };
            let part = self.analyze_expr(target);
            self.after(vec![part], move |cx| {
                match field_index {
                    Some(index) => {
                        let ty = cx.program.expr_type(target)?;
                        cx.set(expr, ty, Value::Member { owner, index });
                    }
                    None => cx.copy_analysis(expr, target)?,
                }
                done.complete(cx, ())
            });
            return Ok(());
        }

        let ty = self.program.expr_type(base)?;
        let data = self.program.types.get(ty);
        if !data.is_struct() {
            return Err(CoreError::type_mismatch(
                "a struct value or a type",
                self.describe(base),
                span,
            ));
        }
        let symbol = self
            .program
            .scopes
            .lookup_local(data.member_scope, &member)
            .ok_or_else(|| CoreError::UnboundName {
                name: format!("{}.{member}", data.name),
                span,
            })?;
        self.mark_member(expr, symbol);
        let field = self.program.scopes.symbol(symbol).value;
        let ExprKind::Field { index, .. } = self.program.ast.expr(field).kind else {
            return Err(CoreError::malformed("non-field struct member", "member access"));
        };
        let part = self.analyze_expr(field);
        self.after(vec![part], move |cx| {
            let ty = cx.program.expr_type(field)?;
            let value = match &base_value {
                Value::Struct { fields, .. } => fields.get(index).cloned().unwrap_or_default(),
                _ => Value::Runtime,
            };
            cx.set(expr, ty, value);
            done.complete(cx, ())
        });
        Ok(())
    }

    fn mark_member(&mut self, expr: ExprId, symbol: SymbolId) {
        if let ExprKind::Member { referenced, .. } = &mut self.program.ast.expr_mut(expr).kind {
            *referenced = Some(symbol);
        }
    }

    fn struct_literal(
        &mut self,
        expr: ExprId,
        ty_expr: ExprId,
        fields: Vec<(String, ExprId)>,
        span: Span,
        done: Done,
    ) -> Result<(), CoreError> {
        let ty = self.type_value(ty_expr)?;
        let data = self.program.types.get(ty);
        let declared = data
            .struct_fields()
            .map(<[ExprId]>::to_vec)
            .ok_or_else(|| CoreError::type_mismatch("a struct type", data.name.clone(), span))?;
        let member_scope = data.member_scope;

        for (index, (name, value)) in fields.iter().enumerate() {
            let field_span = self.program.ast.expr(*value).span;
            if fields[..index].iter().any(|(other, _)| other == name) {
                return Err(CoreError::Redeclaration {
                    name: name.clone(),
                    span: field_span,
                });
            }
            if self.program.scopes.lookup_local(member_scope, name).is_none() {
                return Err(CoreError::UnboundName {
                    name: format!("{}.{name}", self.program.type_name(ty)),
                    span: field_span,
                });
            }
        }

        let mut parts: Vec<Done> = declared.iter().map(|field| self.analyze_expr(*field)).collect();
        parts.extend(fields.iter().map(|(_, value)| self.analyze_expr(*value)));
        self.after(parts, move |cx| {
            let mut layout = Vec::with_capacity(declared.len());
            let mut values = Vec::with_capacity(declared.len());
            for field in &declared {
                let ExprKind::Field { name, default, .. } = &cx.program.ast.expr(*field).kind else {
                    return Err(CoreError::malformed("non-field struct member", "struct literal"));
                };
                let supplied = fields
                    .iter()
                    .find(|(given, _)| given == name)
                    .map(|(_, value)| *value)
                    .or(*default)
                    .ok_or_else(|| {
                        CoreError::type_mismatch(format!("a value for field `{name}`"), "none", span)
                    })?;
                let field_ty = cx.program.expr_type(*field)?;
                cx.expect_type(supplied, field_ty)?;
                layout.push(supplied);
                values.push(cx.program.expr_value(supplied).clone());
            }

            let value = Value::Struct { ty, fields: values };
            let value = if value.is_constant() { value } else { Value::Runtime };
            if let ExprKind::StructLiteral { layout: slot, .. } = &mut cx.program.ast.expr_mut(expr).kind {
                *slot = layout;
            }
            cx.set(expr, ty, value);
            done.complete(cx, ())
        });
        Ok(())
    }

    fn function_task(&mut self, function: FunctionId, done: Done) -> Result<(), CoreError> {
        let data = self.program.ast.function(function).clone();
        if data.generic {
            return Err(CoreError::malformed(
                format!("generic function `{}`", data.name),
                "analysis",
            ));
        }
        let Some(body) = data.body else {
            return Err(CoreError::malformed(
                format!("function `{}` without a body", data.name),
                "analysis",
            ));
        };
        let signature = self.signature_cell(function);
        let return_type_expr = data.return_type_expr;
        let params = data.params;
        let name = data.name;

        // Return type, then parameters, then the body.
        let parts = return_type_expr
            .map(|expr| self.analyze_expr(expr))
            .into_iter()
            .collect();
        self.after(parts, move |cx| {
            let explicit = return_type_expr
                .map(|expr| cx.type_value(expr))
                .transpose()?;
            cx.program.ast.function_mut(function).return_type = explicit;

            let parts = params.iter().map(|param| cx.analyze_expr(*param)).collect();
            cx.after(parts, move |cx| {
                if explicit.is_some() {
                    signature.complete(cx, ())?;
                }
                let part = cx.analyze_stmt(body);
                cx.after(vec![part], move |cx| {
                    cx.check_returns(function)?;
                    cx.program.ast.function_mut(function).analyzed = true;
                    if explicit.is_none() {
                        signature.complete(cx, ())?;
                    }
                    tracing::trace!(function = %name, "analyzed function");
                    done.complete(cx, ())
                });
                Ok(())
            });
            Ok(())
        });
        Ok(())
    }

    /// Checks the explicit return type against every return path, or infers
    /// it: all paths must agree on exactly one type.
    fn check_returns(&mut self, function: FunctionId) -> Result<(), CoreError> {
        let data = self.program.ast.function(function);
        let (name, span, declared, body) = (data.name.clone(), data.span, data.return_type, data.body);
        let Some(body) = body else {
            return Err(CoreError::malformed(format!("function `{name}` without a body"), "analysis"));
        };

        let mut values = Vec::new();
        collect_returns(&self.program, body, &mut values);
        values.extend(self.program.ast.block(body).and_then(|block| block.value));
        if values.is_empty() {
            return Err(CoreError::type_mismatch(
                format!("a return value in `{name}`"),
                "none",
                span,
            ));
        }

        let mut expected = declared;
        for value in values {
            let found = self.program.expr_type(value)?;
            match expected {
                None => expected = Some(found),
                Some(ty) if !self.program.types.matches(ty, found) => {
                    return Err(CoreError::type_mismatch(
                        self.program.type_name(ty),
                        self.program.type_name(found),
                        self.program.ast.expr(value).span,
                    ));
                }
                Some(_) => {}
            }
        }

        let trailing = self.program.ast.block(body).is_some_and(|block| block.value.is_some());
        if !trailing && !always_returns(&self.program, body) {
            return Err(CoreError::type_mismatch(
                "a return value on every path",
                format!("a path through `{name}` without one"),
                span,
            ));
        }
        self.program.ast.function_mut(function).return_type = expected;
        Ok(())
    }

    fn parameter_types(&self, function: FunctionId) -> Result<Vec<TypeId>, CoreError> {
        self.program
            .ast
            .function(function)
            .params
            .iter()
            .map(|param| self.program.expr_type(*param))
            .collect()
    }

    pub(super) fn instance_waiter(
        &mut self,
        typeclass: TypeclassId,
        arguments: Vec<TypeId>,
    ) -> Deferred<TypeId, Analyzer> {
        let existing = self.program.ast.typeclass(typeclass).find_instance(&arguments);
        self.instance_waiters
            .entry((typeclass, arguments))
            .or_insert_with(|| existing.map_or_else(Deferred::new, Deferred::ready))
            .clone()
    }

    pub(super) fn register_instance(
        &mut self,
        typeclass: TypeclassId,
        arguments: Vec<TypeId>,
        instance: TypeId,
    ) -> Result<(), CoreError> {
        self.program
            .ast
            .typeclass_mut(typeclass)
            .instances
            .push((arguments.clone(), instance));
        let waiter = self.instance_waiter(typeclass, arguments);
        if !waiter.is_ready() {
            waiter.complete(self, instance)?;
        }
        Ok(())
    }

    pub(super) fn type_value(&self, expr: ExprId) -> Result<TypeId, CoreError> {
        self.program.expr_value(expr).as_type().ok_or_else(|| {
            CoreError::type_mismatch("a type", self.describe(expr), self.program.ast.expr(expr).span)
        })
    }

    pub(super) fn expect_type(&self, expr: ExprId, expected: TypeId) -> Result<(), CoreError> {
        let found = self.program.expr_type(expr)?;
        if self.program.types.matches(expected, found) {
            return Ok(());
        }
        Err(CoreError::type_mismatch(
            self.program.type_name(expected),
            self.program.type_name(found),
            self.program.ast.expr(expr).span,
        ))
    }

    pub(super) fn describe(&self, expr: ExprId) -> String {
        match self.program.ast.expr(expr).ty {
            Some(ty) => format!("a value of type `{}`", self.program.type_name(ty)),
            None => "an unanalyzed expression".to_string(),
        }
    }

    fn set(&mut self, expr: ExprId, ty: TypeId, value: Value) {
        let data = self.program.ast.expr_mut(expr);
        data.ty = Some(ty);
        data.value = value;
    }

    fn copy_analysis(&mut self, expr: ExprId, target: ExprId) -> Result<(), CoreError> {
        let ty = self.program.expr_type(target)?;
        let value = self.program.expr_value(target).clone();
        self.set(expr, ty, value);
        Ok(())
    }

    fn stall_error(&self) -> CoreError {
        for (typeclass, arguments, span) in &self.expected_instances {
            let data = self.program.ast.typeclass(*typeclass);
            if data.find_instance(arguments).is_none() {
                return CoreError::UnboundName {
                    name: self.program.types.instance_name(&data.name, arguments),
                    span: *span,
                };
            }
        }
        let span = self
            .requested
            .iter()
            .find(|expr| self.exprs.get(expr).is_some_and(|done| !done.is_ready()))
            .map(|expr| self.program.ast.expr(*expr).span)
            .unwrap_or_default();
        CoreError::CyclicDependency { span }
    }
}

/// Return values reachable in `stmt`, not descending into nested functions.
fn collect_returns(program: &Program, stmt: StmtId, out: &mut Vec<ExprId>) {
    match &program.ast.stmt(stmt).kind {
        StmtKind::Return { value } => out.push(*value),
        StmtKind::Block(block) => {
            for entry in &block.entries {
                collect_returns(program, entry.stmt, out);
            }
        }
        StmtKind::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_returns(program, *then_branch, out);
            if let Some(branch) = else_branch {
                collect_returns(program, *branch, out);
            }
        }
        StmtKind::Let { .. }
        | StmtKind::Function(_)
        | StmtKind::Expr(_)
        | StmtKind::Struct { .. }
        | StmtKind::Typeclass(_)
        | StmtKind::Instance(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::sema::preanalyze::preanalyze_module;
    use crate::span::FileId;

    fn analyzed(source: &str) -> Result<Program, CoreError> {
        let module = parse(FileId::UNIT, source)?;
        let mut program = Program::new("main", false);
        let scope = program.module_scope;
        program.module_block = Some(preanalyze_module(&mut program, &module, scope)?);
        program.scopes.close(scope);
        analyze(program)
    }

    fn function_named(program: &Program, name: &str) -> FunctionId {
        program
            .ast
            .function_ids()
            .find(|id| program.ast.function(*id).name == name)
            .expect("function exists")
    }

    /// Value of the `index`-th statement of `name`'s body, which must be a
    /// `return`.
    fn returned(program: &Program, name: &str, index: usize) -> ExprId {
        let body = program.ast.function(function_named(program, name)).body.expect("body");
        let entry = program.ast.block(body).expect("block").entries[index];
        match program.ast.stmt(entry.stmt).kind {
            StmtKind::Return { value } => value,
            ref other => panic!("expected a return, found {other:?}"),
        }
    }

    #[test]
    fn forward_references_resolve() {
        let program = analyzed(
            "fn main() -> integer { return helper(2); }
             fn helper(n : integer) -> integer { return n * 2; }",
        )
        .expect("analyze");
        let call = returned(&program, "main", 0);
        let helper = function_named(&program, "helper");
        assert!(matches!(
            program.ast.expr(call).kind,
            ExprKind::Call { resolution: Some(CallTarget::Function(f)), .. } if f == helper
        ));
        assert_eq!(program.ast.expr(call).ty, Some(TypeId::INTEGER));
        assert!(program.ast.function(helper).analyzed);
    }

    #[test]
    fn infers_return_types_and_folds_constants() {
        let program = analyzed("fn f() { return 40 + 2; }").expect("analyze");
        let f = function_named(&program, "f");
        assert_eq!(program.ast.function(f).return_type, Some(TypeId::INTEGER));
        assert_eq!(*program.expr_value(returned(&program, "f", 0)), Value::Integer(42));
    }

    #[test]
    fn constant_lets_propagate_through_identifiers() {
        let program = analyzed(
            "let answer = 6 * 7;
             fn f() -> boolean { return answer == 42; }",
        )
        .expect("analyze");
        assert_eq!(*program.expr_value(returned(&program, "f", 0)), Value::Boolean(true));
    }

    #[test]
    fn explicit_return_type_must_match() {
        let err = analyzed("fn f() -> integer { return true; }").unwrap_err();
        assert!(matches!(
            err,
            CoreError::TypeMismatch { ref expected, ref found, .. }
                if expected == "integer" && found == "boolean"
        ));
    }

    #[test]
    fn inferred_return_paths_must_agree() {
        let err = analyzed("fn f(b : boolean) { if b { return 1; } return false; }").unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));

        let err = analyzed("fn g() -> integer { g2(); } fn g2() -> integer { return 1; }")
            .unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { ref found, .. } if found == "none"));
    }

    #[test]
    fn every_path_must_return() {
        let err = analyzed("fn f(b : boolean) -> integer { if b { return 1; } }").unwrap_err();
        assert!(matches!(
            err,
            CoreError::TypeMismatch { ref expected, .. } if expected == "a return value on every path"
        ));

        analyzed("fn g(b : boolean) -> integer { if b { return 1; } else { return 2; } }")
            .expect("both branches return");
    }

    #[test]
    fn unbound_names_are_reported() {
        let err = analyzed("fn f() -> integer { return missing; }").unwrap_err();
        assert!(matches!(err, CoreError::UnboundName { ref name, .. } if name == "missing"));
    }

    #[test]
    fn overloads_are_selected_by_argument_type() {
        let program = analyzed(
            "fn g(a : integer) -> integer { return a; }
             fn g(a : boolean) -> integer { return 0; }
             fn f() -> integer { return g(true); }",
        )
        .expect("analyze");
        let call = returned(&program, "f", 0);
        let ExprKind::Call { resolution: Some(CallTarget::Function(chosen)), .. } =
            program.ast.expr(call).kind
        else {
            panic!("call not resolved");
        };
        let param = program.ast.function(chosen).params[0];
        assert_eq!(program.ast.expr(param).ty, Some(TypeId::BOOLEAN));

        let err = analyzed(
            "fn h(a : integer) -> integer { return a; }
             fn h(a : unconstrained) -> integer { return 0; }
             fn f() -> integer { return h(1); }",
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::AmbiguousOverload { candidates: 2, .. }));

        let err = analyzed(
            "fn k(a : integer) -> integer { return a; }
             fn f() -> integer { return k(true); }",
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::NoMatchingOverload { ref name, .. } if name == "k(boolean)"));
    }

    #[test]
    fn recursion_needs_an_explicit_return_type() {
        analyzed("fn f(n : integer) -> integer { if n == 0 { return 0; } return f(n - 1); }")
            .expect("explicit return type breaks the cycle");

        let err = analyzed("fn f(n : integer) { return f(n); }").unwrap_err();
        assert!(matches!(err, CoreError::CyclicDependency { .. }));
    }

    #[test]
    fn module_lets_must_be_constant() {
        let err = analyzed(
            "fn g() -> integer { return 1; }
             let x = g();",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::TypeMismatch { ref expected, .. } if expected == "a compile-time constant"
        ));
    }

    #[test]
    fn if_conditions_must_be_boolean() {
        let err = analyzed("fn f() -> integer { if 1 { return 1; } return 2; }").unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { ref expected, .. } if expected == "boolean"));
    }

    #[test]
    fn struct_literals_fill_defaults_and_fields_are_typed() {
        let program = analyzed(
            "struct Point { x : integer, y : integer = 5 }
             fn f() -> integer { return Point { x: 1 }.y; }
             fn g(p : Point) -> integer { return p.x; }",
        )
        .expect("analyze");
        let member = returned(&program, "f", 0);
        assert_eq!(*program.expr_value(member), Value::Integer(5));
        let ExprKind::Member { base, .. } = program.ast.expr(member).kind else {
            panic!("member access");
        };
        let ExprKind::StructLiteral { ref layout, .. } = program.ast.expr(base).kind else {
            panic!("struct literal");
        };
        assert_eq!(layout.len(), 2);
        assert_eq!(program.ast.expr(returned(&program, "g", 0)).ty, Some(TypeId::INTEGER));
    }

    #[test]
    fn struct_literal_errors() {
        let err = analyzed(
            "struct Point { x : integer }
             fn f() -> Point { return Point { z: 1 }; }",
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::UnboundName { ref name, .. } if name == "Point.z"));

        let err = analyzed(
            "struct Point { x : integer, y : integer }
             fn f() -> Point { return Point { x: 1 }; }",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::TypeMismatch { ref expected, .. } if expected == "a value for field `y`"
        ));

        let err = analyzed(
            "struct Point { x : integer }
             fn f() -> Point { return Point { x: 1, x: 2 }; }",
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Redeclaration { ref name, .. } if name == "x"));
    }

    #[test]
    fn static_field_access_is_compile_time_only() {
        let program = analyzed(
            "struct Point { x : integer, y : integer }
             let field = Point.y;",
        )
        .expect("analyze");
        let symbol = program
            .scopes
            .lookup_local(program.module_scope, "field")
            .expect("field");
        let value = program.expr_value(program.scopes.symbol(symbol).value);
        assert!(matches!(value, Value::Member { index: 1, .. }));
        assert!(value.is_compile_time_only());
    }

    #[test]
    fn analysis_is_memoized() {
        let module = parse(FileId::UNIT, "fn f() -> integer { return 1; }").expect("parse");
        let mut program = Program::new("main", false);
        let scope = program.module_scope;
        let block = preanalyze_module(&mut program, &module, scope).expect("preanalyze");

        let mut analyzer = Analyzer::new(program);
        let first = analyzer.analyze_stmt(block);
        run(&mut analyzer).expect("run");
        let executed = analyzer.scheduler.executed();
        let known = analyzer.exprs.len();

        let second = analyzer.analyze_stmt(block);
        run(&mut analyzer).expect("run");
        assert!(first.is_ready() && second.is_ready());
        assert_eq!(analyzer.scheduler.executed(), executed);
        assert_eq!(analyzer.exprs.len(), known);
    }
}
