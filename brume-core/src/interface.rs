//! Module interface: the exported surface of a compiled unit.
//!
//! Descriptors are plain serde data so another unit (or a tool) can read
//! them back without the semantic tree.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sema::Program;
use crate::sema::scope::{ScopeId, SymbolId};
use crate::sema::tree::{ExprId, ExprKind, FunctionId};
use crate::sema::types::{TypeId, TypeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInterface {
    pub module: String,
    pub entities: Vec<InterfaceEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceEntity {
    pub name: String,
    /// Names tied to the entity: a typeclass lists its instances, anything
    /// else the helper types it exposes.
    pub associated: Vec<String>,
    pub descriptor: EntityDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityDescriptor {
    Struct { fields: Vec<FieldDescriptor> },
    Typeclass { parameters: usize, members: Vec<String> },
    OverloadSet { functions: Vec<FunctionSignature> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeReference,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeReference {
    Builtin(String),
    /// Enclosing module and type names, ending with the type's own name.
    Path(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub parameters: Vec<TypeReference>,
    pub result: TypeReference,
    pub is_member: bool,
}

impl ModuleInterface {
    pub fn entity(&self, name: &str) -> Option<&InterfaceEntity> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Marks the non-exported structs of `scope` that exported fields and
/// signatures reach, directly or through other helpers.
pub fn mark_associated(program: &mut Program, scope: ScopeId) -> Result<(), CoreError> {
    let structs = struct_symbols(program, scope);
    let mut pending: Vec<SymbolId> = program
        .scopes
        .symbols_in_order(scope)
        .filter(|symbol| program.scopes.symbol(*symbol).exported)
        .collect();
    while let Some(symbol) = pending.pop() {
        for ty in referenced_types(program, program.scopes.symbol(symbol).value)? {
            let Some(&helper) = structs.get(&ty) else {
                continue;
            };
            let data = program.scopes.symbol_mut(helper);
            if !data.exported && !data.associated {
                data.associated = true;
                tracing::debug!(name = %data.name, "associated helper type");
                pending.push(helper);
            }
        }
    }
    Ok(())
}

/// Describes every exported or associated symbol of `scope`, in declaration
/// order.
pub fn build_interface(program: &Program, scope: ScopeId) -> Result<ModuleInterface, CoreError> {
    let name = program
        .scopes
        .scope(scope)
        .name
        .clone()
        .unwrap_or_else(|| program.module_name.clone());
    let structs = struct_symbols(program, scope);
    let mut entities = Vec::new();

    for symbol in program.scopes.symbols_in_order(scope) {
        let symbol = program.scopes.symbol(symbol);
        if !symbol.exported && !symbol.associated {
            continue;
        }
        let (descriptor, associated) = match &program.ast.expr(symbol.value).kind {
            ExprKind::TypeRef(ty) => (
                struct_descriptor(program, *ty)?,
                helper_names(program, &structs, symbol.value)?,
            ),
            ExprKind::TypeclassRef(typeclass) => {
                let data = program.ast.typeclass(*typeclass);
                let members = data
                    .functions
                    .iter()
                    .map(|function| program.ast.function(*function).name.clone())
                    .collect();
                let instances = data
                    .instances
                    .iter()
                    .map(|(_, instance)| program.type_name(*instance).to_string())
                    .collect();
                (
                    EntityDescriptor::Typeclass {
                        parameters: data.params.len(),
                        members,
                    },
                    instances,
                )
            }
            ExprKind::OverloadSetRef(set) => {
                let functions = program
                    .ast
                    .overload_set(*set)
                    .functions
                    .iter()
                    .map(|function| signature(program, *function))
                    .collect::<Result<_, _>>()?;
                (
                    EntityDescriptor::OverloadSet { functions },
                    helper_names(program, &structs, symbol.value)?,
                )
            }
            // Exported constants are inlined at their uses.
            _ => continue,
        };
        entities.push(InterfaceEntity {
            name: symbol.name.clone(),
            associated,
            descriptor,
        });
    }

    Ok(ModuleInterface {
        module: name,
        entities,
    })
}

pub fn type_reference(program: &Program, ty: TypeId) -> TypeReference {
    let data = program.types.get(ty);
    if data.is_builtin() {
        TypeReference::Builtin(data.name.clone())
    } else {
        TypeReference::Path(program.scope_path(data.member_scope))
    }
}

fn struct_symbols(program: &Program, scope: ScopeId) -> FxHashMap<TypeId, SymbolId> {
    program
        .scopes
        .symbols_in_order(scope)
        .filter_map(|symbol| match &program.ast.expr(program.scopes.symbol(symbol).value).kind {
            ExprKind::TypeRef(ty) => Some((*ty, symbol)),
            _ => None,
        })
        .collect()
}

/// Types named by a struct's fields or by an overload set's signatures.
fn referenced_types(program: &Program, value: ExprId) -> Result<Vec<TypeId>, CoreError> {
    match &program.ast.expr(value).kind {
        ExprKind::TypeRef(ty) => match &program.types.get(*ty).kind {
            TypeKind::Struct { fields } => fields.iter().map(|field| program.expr_type(*field)).collect(),
            _ => Ok(Vec::new()),
        },
        ExprKind::OverloadSetRef(set) => {
            let mut types = Vec::new();
            for function in &program.ast.overload_set(*set).functions {
                let data = program.ast.function(*function);
                for param in &data.params {
                    types.push(program.expr_type(*param)?);
                }
                types.extend(data.return_type);
            }
            Ok(types)
        }
        _ => Ok(Vec::new()),
    }
}

fn helper_names(
    program: &Program,
    structs: &FxHashMap<TypeId, SymbolId>,
    value: ExprId,
) -> Result<Vec<String>, CoreError> {
    let mut names: Vec<String> = Vec::new();
    for ty in referenced_types(program, value)? {
        let Some(&helper) = structs.get(&ty) else {
            continue;
        };
        let helper = program.scopes.symbol(helper);
        if helper.associated && !names.contains(&helper.name) {
            names.push(helper.name.clone());
        }
    }
    Ok(names)
}

fn struct_descriptor(program: &Program, ty: TypeId) -> Result<EntityDescriptor, CoreError> {
    let TypeKind::Struct { fields } = &program.types.get(ty).kind else {
        return Err(CoreError::malformed(
            format!("export of `{}`", program.type_name(ty)),
            "interface emission",
        ));
    };
    let fields = fields
        .iter()
        .map(|field| {
            let ExprKind::Field { name, default, .. } = &program.ast.expr(*field).kind else {
                return Err(CoreError::malformed("non-field struct member", "interface emission"));
            };
            Ok(FieldDescriptor {
                name: name.clone(),
                ty: type_reference(program, program.expr_type(*field)?),
                has_default: default.is_some(),
            })
        })
        .collect::<Result<_, CoreError>>()?;
    Ok(EntityDescriptor::Struct { fields })
}

fn signature(program: &Program, function: FunctionId) -> Result<FunctionSignature, CoreError> {
    let data = program.ast.function(function);
    let parameters = data
        .params
        .iter()
        .map(|param| Ok(type_reference(program, program.expr_type(*param)?)))
        .collect::<Result<_, CoreError>>()?;
    let result = data.return_type.ok_or_else(|| {
        CoreError::malformed(format!("signature of `{}`", data.name), "interface emission")
    })?;
    Ok(FunctionSignature {
        parameters,
        result: type_reference(program, result),
        is_member: data.parent_type.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::sema::analyze::analyze;
    use crate::sema::preanalyze::preanalyze_module;
    use crate::span::FileId;

    fn analyzed(source: &str) -> Program {
        let module = parse(FileId::UNIT, source).expect("parse");
        let mut program = Program::new("shapes", false);
        let scope = program.module_scope;
        program.module_block = Some(preanalyze_module(&mut program, &module, scope).expect("preanalyze"));
        program.scopes.close(scope);
        let mut program = analyze(program).expect("analyze");
        mark_associated(&mut program, scope).expect("mark associated");
        program
    }

    fn interface(source: &str) -> ModuleInterface {
        let program = analyzed(source);
        build_interface(&program, program.module_scope).expect("interface")
    }

    #[test]
    fn describes_exported_structs_and_functions() {
        let interface = interface(
            "export struct Point { x : integer, y : integer = 0 }
             export fn origin() -> Point { return Point { x: 0 }; }
             fn hidden() -> integer { return 1; }",
        );
        assert_eq!(interface.module, "shapes");
        assert_eq!(interface.entities.len(), 2);
        assert!(interface.entity("hidden").is_none());

        let point = interface.entity("Point").expect("Point");
        let EntityDescriptor::Struct { fields } = &point.descriptor else {
            panic!("struct descriptor");
        };
        assert_eq!(fields[0].ty, TypeReference::Builtin("integer".to_string()));
        assert!(fields[1].has_default);

        let origin = interface.entity("origin").expect("origin");
        let EntityDescriptor::OverloadSet { functions } = &origin.descriptor else {
            panic!("overload set descriptor");
        };
        assert_eq!(
            functions[0].result,
            TypeReference::Path(vec!["shapes".to_string(), "Point".to_string()])
        );
        assert!(!functions[0].is_member);
    }

    #[test]
    fn typeclasses_list_their_instances() {
        let interface = interface(
            "export typeclass Show(T : type) { fn show(v : T) -> integer; }
             instance Show(boolean) { fn show(v : boolean) -> integer { return 1; } }",
        );
        let show = interface.entity("Show").expect("Show");
        assert_eq!(show.associated, vec!["Show(boolean)".to_string()]);
        assert_eq!(
            show.descriptor,
            EntityDescriptor::Typeclass {
                parameters: 1,
                members: vec!["show".to_string()],
            }
        );
    }

    #[test]
    fn exposed_helper_types_are_associated() {
        let program = analyzed(
            "struct Inner { v : integer }
             struct Outer { inner : Inner }
             struct Unused { v : integer }
             export fn wrap(i : Inner) -> Outer { return Outer { inner: i }; }",
        );
        let scope = program.module_scope;
        let flag = |name: &str| {
            let symbol = program.scopes.lookup(scope, name).expect("symbol");
            program.scopes.symbol(symbol).associated
        };
        assert!(flag("Inner"));
        assert!(flag("Outer"));
        assert!(!flag("Unused"));
        assert!(!flag("wrap"));

        let interface = build_interface(&program, scope).expect("interface");
        let names: Vec<&str> = interface.entities.iter().map(|entity| entity.name.as_str()).collect();
        assert_eq!(names, vec!["Inner", "Outer", "wrap"]);
        assert_eq!(interface.entity("Outer").expect("Outer").associated, vec!["Inner".to_string()]);
        assert_eq!(
            interface.entity("wrap").expect("wrap").associated,
            vec!["Inner".to_string(), "Outer".to_string()]
        );
    }

    #[test]
    fn json_round_trips() {
        let interface = interface("export fn id(v : boolean) -> boolean { return v; }");
        let text = interface.to_json().expect("encode");
        let value: serde_json::Value = serde_json::from_str(&text).expect("valid json");
        assert_eq!(value["entities"][0]["descriptor"]["kind"], "overload_set");
        assert_eq!(ModuleInterface::from_json(&text).expect("decode"), interface);
    }
}
