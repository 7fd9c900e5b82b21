//! Types known to the analyzer.
//!
//! Every type has a member scope and a self-describing `TypeRef` expression,
//! so a type can be used as a first-class compile-time value. The four
//! builtins always occupy the first four slots of the table.

use std::cell::OnceCell;

use super::scope::ScopeId;
use super::tree::{ExprId, OverloadSetId, TypeclassId};
use crate::ir::IrType;

arena_id!(
    /// Handle of a type in a `TypeTable`.
    TypeId
);

impl TypeId {
    pub const TYPE: TypeId = TypeId(0);
    pub const INTEGER: TypeId = TypeId(1);
    pub const BOOLEAN: TypeId = TypeId(2);
    pub const UNCONSTRAINED: TypeId = TypeId(3);
}

pub const BUILTIN_NAMES: [(&str, TypeId); 4] = [
    ("type", TypeId::TYPE),
    ("integer", TypeId::INTEGER),
    ("boolean", TypeId::BOOLEAN),
    ("unconstrained", TypeId::UNCONSTRAINED),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Type,
    Integer,
    Boolean,
    Unconstrained,
    /// Fields are `Field` expressions in declaration order.
    Struct { fields: Vec<ExprId> },
    Typeclass(TypeclassId),
    TypeclassInstance {
        typeclass: TypeclassId,
        arguments: Vec<TypeId>,
    },
    OverloadSet(OverloadSetId),
}

#[derive(Debug, Clone)]
pub struct TypeData {
    pub kind: TypeKind,
    pub name: String,
    pub member_scope: ScopeId,
    pub self_expr: ExprId,
    /// Backend representation; computed at most once.
    pub codegen: OnceCell<Option<IrType>>,
}

impl TypeData {
    pub fn is_builtin(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Type | TypeKind::Integer | TypeKind::Boolean | TypeKind::Unconstrained
        )
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct { .. })
    }

    pub fn struct_fields(&self) -> Option<&[ExprId]> {
        match &self.kind {
            TypeKind::Struct { fields } => Some(fields),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct TypeTable {
    types: Vec<TypeData>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable::default()
    }

    /// Adds a type; `make_self` receives the new id and returns the
    /// expression naming it.
    pub fn add(
        &mut self,
        kind: TypeKind,
        name: impl Into<String>,
        member_scope: ScopeId,
        make_self: impl FnOnce(TypeId) -> ExprId,
    ) -> TypeId {
        let id = TypeId::from_index(self.types.len());
        let self_expr = make_self(id);
        self.types.push(TypeData {
            kind,
            name: name.into(),
            member_scope,
            self_expr,
            codegen: OnceCell::new(),
        });
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeData {
        &self.types[id.index()]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeData {
        &mut self.types[id.index()]
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.types[id.index()].name
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeData)> {
        self.types
            .iter()
            .enumerate()
            .map(|(index, data)| (TypeId::from_index(index), data))
    }

    /// Whether an argument of type `argument` is accepted where `parameter` is
    /// expected.
    pub fn matches(&self, parameter: TypeId, argument: TypeId) -> bool {
        parameter == argument || parameter == TypeId::UNCONSTRAINED
    }

    pub fn instance_name(&self, typeclass: &str, arguments: &[TypeId]) -> String {
        let args: Vec<&str> = arguments.iter().map(|arg| self.name(*arg)).collect();
        format!("{typeclass}({})", args.join(", "))
    }
}
