//! Typeclass instantiation.
//!
//! An `instance` statement binds a typeclass to concrete type arguments. The
//! instance's member scope receives the typeclass parameters (bound to the
//! argument expressions) and one overload set per typeclass member. Members
//! the instance defines itself are kept; the others are cloned from the
//! typeclass's default bodies with one shared `Replacements` map that
//! redirects the typeclass scope, parameters and member overload sets to the
//! instance's.

use super::Program;
use super::analyze::{Analyzer, Done};
use super::clone::{Replacements, clone_function};
use super::preanalyze::overload_set_in;
use super::scope::ScopeId;
use super::tree::{ExprKind, FunctionId, InstanceId, TypeclassId};
use super::types::{TypeId, TypeKind};
use super::value::Value;
use crate::error::CoreError;

pub(super) fn instantiate(
    cx: &mut Analyzer,
    instance: InstanceId,
    done: Done,
) -> Result<(), CoreError> {
    let data = cx.program.ast.instance(instance).clone();
    let mut parts = vec![cx.analyze_expr(data.typeclass_expr)];
    parts.extend(data.arguments.iter().map(|arg| cx.analyze_expr(*arg)));

    cx.after(parts, move |cx| {
        let typeclass = match cx.program.expr_value(data.typeclass_expr) {
            Value::Typeclass(typeclass) => *typeclass,
            _ => {
                return Err(CoreError::type_mismatch(
                    "a typeclass",
                    cx.describe(data.typeclass_expr),
                    cx.program.ast.expr(data.typeclass_expr).span,
                ));
            }
        };
        let arguments = data
            .arguments
            .iter()
            .map(|arg| cx.type_value(*arg))
            .collect::<Result<Vec<_>, _>>()?;

        let ty = build_instance(&mut cx.program, instance, typeclass, &arguments)?;
        cx.register_instance(typeclass, arguments, ty)?;

        let parts = instance_functions(&cx.program, data.scope)
            .into_iter()
            .map(|function| cx.analyze_function(function))
            .collect();
        cx.after(parts, move |cx| done.complete(cx, ()));
        Ok(())
    });
    Ok(())
}

fn build_instance(
    program: &mut Program,
    instance: InstanceId,
    typeclass: TypeclassId,
    arguments: &[TypeId],
) -> Result<TypeId, CoreError> {
    let class = program.ast.typeclass(typeclass).clone();
    let data = program.ast.instance(instance).clone();
    let name = program.types.instance_name(&class.name, arguments);
    let invalid = |reason: String| CoreError::InvalidInstance {
        typeclass: class.name.clone(),
        reason,
        span: data.span,
    };

    if arguments.len() != class.params.len() {
        return Err(invalid(format!(
            "expected {} type arguments, found {}",
            class.params.len(),
            arguments.len()
        )));
    }
    if class.find_instance(arguments).is_some() {
        return Err(invalid(format!("`{name}` is already defined")));
    }

    let mut map = Replacements::new();
    map.add_scope(class.scope, data.scope)?;
    for (param, arg) in class.params.iter().zip(&data.arguments) {
        let ExprKind::Parameter { name: param_name, .. } = &program.ast.expr(*param).kind else {
            return Err(CoreError::malformed("typeclass parameter", "instantiation"));
        };
        let param_name = param_name.clone();
        if program.scopes.lookup_local(data.scope, &param_name).is_some() {
            return Err(CoreError::Redeclaration {
                name: param_name,
                span: data.span,
            });
        }
        map.add_expr(*param, *arg)?;
        let arg = *arg;
        program.scopes.declare(data.scope, &param_name, || arg)?;
    }

    for own in &data.functions {
        let own_name = &program.ast.function(*own).name;
        if !class
            .functions
            .iter()
            .any(|member| program.ast.function(*member).name == *own_name)
        {
            return Err(invalid(format!(
                "`{own_name}` is not a member of `{}`",
                class.name
            )));
        }
    }

    // Every member overload set is redirected before any body is cloned,
    // since default bodies may call each other.
    for member in &class.functions {
        let member_data = program.ast.function(*member);
        let (member_name, member_span) = (member_data.name.clone(), member_data.span);
        let (target_symbol, target_set) =
            overload_set_in(program, data.scope, &member_name, member_span)?;
        let source_symbol = program
            .scopes
            .lookup_local(class.scope, &member_name)
            .ok_or_else(|| CoreError::malformed("unbound typeclass member", "instantiation"))?;
        let source_ref = program.scopes.symbol(source_symbol).value;
        let ExprKind::OverloadSetRef(source_set) = program.ast.expr(source_ref).kind else {
            return Err(CoreError::malformed("typeclass member", "instantiation"));
        };
        let target_ref = program.scopes.symbol(target_symbol).value;
        map.add_overload_set(source_set, target_set)?;
        map.add_expr(source_ref, target_ref)?;
        map.add_type(
            program.ast.overload_set(source_set).ty,
            program.ast.overload_set(target_set).ty,
        )?;
    }

    for (slot, member) in class.functions.iter().enumerate() {
        let member_data = program.ast.function(*member).clone();
        let own: Vec<FunctionId> = data
            .functions
            .iter()
            .copied()
            .filter(|function| program.ast.function(*function).name == member_data.name)
            .collect();

        if own.is_empty() {
            if member_data.body.is_none() {
                return Err(invalid(format!(
                    "`{}` has no default and is not defined",
                    member_data.name
                )));
            }
            let copy = clone_function(program, &mut map, *member)?;
            let function = program.ast.function_mut(copy);
            function.generic = false;
            function.vtable_slot = Some(slot);
            let set = function.overload_set;
            program.ast.overload_set_mut(set).functions.push(copy);
            tracing::debug!(instance = %name, member = %member_data.name, slot, "cloned default member");
            continue;
        }

        for function in own {
            let arity = program.ast.function(function).params.len();
            if arity != member_data.params.len() {
                return Err(invalid(format!(
                    "`{}` takes {} parameters, found {arity}",
                    member_data.name,
                    member_data.params.len()
                )));
            }
            program.ast.function_mut(function).vtable_slot = Some(slot);
        }
    }

    program.scopes.close(data.scope);
    program.scopes.scope_mut(data.scope).name = Some(name.clone());
    let span = data.span;
    let ast = &mut program.ast;
    let ty = program.types.add(
        TypeKind::TypeclassInstance {
            typeclass,
            arguments: arguments.to_vec(),
        },
        name.clone(),
        data.scope,
        |id| ast.add_expr(ExprKind::TypeRef(id), span),
    );
    program.ast.instance_mut(instance).ty = Some(ty);
    for function in instance_functions(program, data.scope) {
        program.ast.function_mut(function).parent_type = Some(ty);
    }

    tracing::debug!(instance = %name, "created typeclass instance");
    Ok(ty)
}

/// Functions of every overload set declared in an instance scope.
fn instance_functions(program: &Program, scope: ScopeId) -> Vec<FunctionId> {
    program
        .scopes
        .symbols_in_order(scope)
        .filter_map(|symbol| match program.ast.expr(program.scopes.symbol(symbol).value).kind {
            ExprKind::OverloadSetRef(set) => Some(set),
            _ => None,
        })
        .flat_map(|set| program.ast.overload_set(set).functions.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashSet;

    use super::*;
    use crate::parser::parse;
    use crate::sema::analyze::analyze;
    use crate::sema::preanalyze::preanalyze_module;
    use crate::sema::tree::{CallTarget, NodeRef, StmtKind};
    use crate::span::FileId;

    fn analyzed(source: &str) -> Result<Program, CoreError> {
        let module = parse(FileId::UNIT, source)?;
        let mut program = Program::new("main", false);
        let scope = program.module_scope;
        program.module_block = Some(preanalyze_module(&mut program, &module, scope)?);
        program.scopes.close(scope);
        analyze(program)
    }

    const PAIR: &str = "typeclass Pair(T : type) {
            fn first(a : T, b : T) -> T { return a; }
            fn second(a : T, b : T) -> T { return b; }
        }
        instance Pair(integer) {}";

    #[test]
    fn default_members_are_cloned_into_the_instance() {
        let program = analyzed(PAIR).expect("analyze");
        let class = program.ast.typeclass(TypeclassId::from_index(0));
        let instance_ty = class.instances[0].1;
        assert_eq!(program.type_name(instance_ty), "Pair(integer)");

        let scope = program.types.get(instance_ty).member_scope;
        let clones = instance_functions(&program, scope);
        assert_eq!(clones.len(), 2);
        assert_ne!(clones[0], clones[1]);

        for (slot, clone) in clones.iter().enumerate() {
            let function = program.ast.function(*clone);
            assert!(!function.generic);
            assert!(function.analyzed);
            assert_eq!(function.vtable_slot, Some(slot));
            assert_eq!(function.return_type, Some(TypeId::INTEGER));
            assert_eq!(function.parent_type, Some(instance_ty));

            let original = class.functions[slot];
            let before = program.ast.subtree(NodeRef::Function(original));
            let after = program.ast.subtree(NodeRef::Function(*clone));
            assert!(before.is_disjoint(&after));
        }
        let first: FxHashSet<_> = program.ast.subtree(NodeRef::Function(clones[0]));
        let second: FxHashSet<_> = program.ast.subtree(NodeRef::Function(clones[1]));
        assert!(first.is_disjoint(&second));
    }

    const EQUALITY: &str = "typeclass Equality(T : type) {
            fn equal(lhs : T, rhs : T) -> boolean;
            fn differ(lhs : T, rhs : T) -> boolean { return !equal(lhs, rhs); }
        }";

    #[test]
    fn defaults_call_the_instance_members() {
        let source = format!(
            "{EQUALITY}
             fn f() -> boolean {{ return Equality(integer).differ(1, 2); }}
             instance Equality(integer) {{
                 fn equal(lhs : integer, rhs : integer) -> boolean {{ return lhs == rhs; }}
             }}"
        );
        let program = analyzed(&source).expect("analyze");
        let instance = program.ast.instance(InstanceId::from_index(0));
        let own = instance.functions[0];
        assert_eq!(program.ast.function(own).vtable_slot, Some(0));

        let differ = instance_functions(&program, instance.scope)
            .into_iter()
            .find(|f| program.ast.function(*f).name == "differ")
            .expect("cloned differ");
        let body = program.ast.function(differ).body.expect("body");
        let entry = program.ast.block(body).expect("block").entries[0];
        let StmtKind::Return { value } = program.ast.stmt(entry.stmt).kind else {
            panic!("return");
        };
        let ExprKind::Unary { operand, .. } = program.ast.expr(value).kind else {
            panic!("negation");
        };
        assert!(matches!(
            program.ast.expr(operand).kind,
            ExprKind::Call { resolution: Some(CallTarget::Function(f)), .. } if f == own
        ));
    }

    #[test]
    fn missing_members_without_defaults_are_rejected() {
        let source = format!("{EQUALITY} instance Equality(boolean) {{}}");
        let err = analyzed(&source).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidInstance { ref reason, .. } if reason.contains("`equal`")
        ));
    }

    #[test]
    fn undeclared_members_are_rejected() {
        let source = format!(
            "{EQUALITY}
             instance Equality(boolean) {{
                 fn equal(lhs : boolean, rhs : boolean) -> boolean {{ return lhs == rhs; }}
                 fn extra() -> boolean {{ return true; }}
             }}"
        );
        let err = analyzed(&source).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidInstance { ref reason, .. } if reason.contains("`extra`")
        ));
    }

    #[test]
    fn duplicate_instances_are_rejected() {
        let source = format!("{PAIR} instance Pair(integer) {{}}");
        let err = analyzed(&source).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInstance { .. }));
    }

    #[test]
    fn missing_instances_are_unbound() {
        let source = format!("{PAIR} fn f() -> boolean {{ return Pair(boolean).first(true, false); }}");
        let err = analyzed(&source).unwrap_err();
        assert!(matches!(err, CoreError::UnboundName { ref name, .. } if name == "Pair(boolean)"));
    }
}
