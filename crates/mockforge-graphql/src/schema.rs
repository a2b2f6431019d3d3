//! SDL parsing and dynamic schema construction.
//!
//! A mock's GraphQL schema is never executed against real resolvers.
//! Instead every field of every object type resolves generically to a
//! default-valued instance of its declared return type — scalars default
//! to a canned value, lists resolve to a single-element list of their
//! item's default, and object-typed fields recurse. This mirrors the
//! gRPC front end's "default-valued instance of the declared output
//! message type" behavior.

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, Object, Schema, SchemaError, TypeRef};
use async_graphql::Value as DynValue;
use async_graphql_parser::types::{BaseType, ServiceDocument, Type as SdlType, TypeKind, TypeSystemDefinition};
use async_graphql_parser::parse_schema;

use mockforge_core::{Error, Result};

/// One field's name and declared return type, flattened out of the parsed
/// SDL for generic resolution.
#[derive(Debug, Clone)]
struct FieldShape {
    name: String,
    ty: SdlType,
}

#[derive(Debug, Clone)]
struct ObjectShape {
    name: String,
    fields: Vec<FieldShape>,
}

fn object_shapes(doc: &ServiceDocument) -> HashMap<String, ObjectShape> {
    let mut shapes = HashMap::new();
    for def in &doc.definitions {
        if let TypeSystemDefinition::Type(positioned) = def {
            let type_def = &positioned.node;
            if let TypeKind::Object(obj) = &type_def.kind {
                let name = type_def.name.node.to_string();
                let fields = obj
                    .fields
                    .iter()
                    .map(|f| FieldShape {
                        name: f.node.name.node.to_string(),
                        ty: f.node.ty.node.clone(),
                    })
                    .collect();
                shapes.insert(name.clone(), ObjectShape { name, fields });
            }
        }
    }
    shapes
}

fn root_type_name(doc: &ServiceDocument, operation: &str) -> Option<String> {
    for def in &doc.definitions {
        if let TypeSystemDefinition::Schema(positioned) = def {
            let schema_def = &positioned.node;
            let found = match operation {
                "query" => schema_def.query.as_ref(),
                "mutation" => schema_def.mutation.as_ref(),
                "subscription" => schema_def.subscription.as_ref(),
                _ => None,
            };
            if let Some(name) = found {
                return Some(name.node.to_string());
            }
        }
    }
    // Fall back to the conventional root type names.
    match operation {
        "query" => Some("Query".to_string()),
        "mutation" => Some("Mutation".to_string()),
        "subscription" => Some("Subscription".to_string()),
        _ => None,
    }
}

fn type_ref_of(ty: &SdlType) -> TypeRef {
    to_type_ref(&ty.base, !ty.nullable)
}

fn to_type_ref(base: &BaseType, non_null: bool) -> TypeRef {
    let inner = match base {
        BaseType::Named(name) => TypeRef::named(name.to_string()),
        BaseType::List(inner) => TypeRef::List(Box::new(to_type_ref(&inner.base, !inner.nullable))),
    };
    if non_null {
        TypeRef::NonNull(Box::new(inner))
    } else {
        inner
    }
}

fn default_scalar_value(name: &str) -> DynValue {
    match name {
        "Int" => DynValue::Number(0.into()),
        "Float" => DynValue::Number(async_graphql::Number::from_f64(0.0).unwrap_or_else(|| 0.into())),
        "Boolean" => DynValue::Boolean(false),
        "ID" => DynValue::String("mock-id".to_string()),
        _ => DynValue::String(format!("mock-{}", name.to_lowercase())),
    }
}

/// Build a field whose resolver returns a default-valued instance of `ty`,
/// recursing into `shapes` for object-typed fields/lists.
fn default_field(field_name: &str, ty: &SdlType, shapes: Arc<HashMap<String, ObjectShape>>) -> Field {
    let type_ref = type_ref_of(ty);
    let base = ty.base.clone();
    Field::new(field_name, type_ref, move |_ctx| {
        let base = base.clone();
        let shapes = shapes.clone();
        FieldFuture::new(async move { Ok(Some(resolve_default(&base, &shapes))) })
    })
}

fn resolve_default(base: &BaseType, shapes: &HashMap<String, ObjectShape>) -> FieldValue<'static> {
    match base {
        BaseType::List(inner) => {
            let item = resolve_default(&inner.base, shapes);
            FieldValue::list(vec![item])
        }
        BaseType::Named(name) => {
            let name = name.to_string();
            if let Some(shape) = shapes.get(&name) {
                // Object-typed fields never read the parent value back out
                // (every child resolver is itself a `default_field`), so any
                // non-null placeholder that satisfies the declared type works.
                FieldValue::owned_any(shape.clone())
            } else {
                FieldValue::value(default_scalar_value(&name))
            }
        }
    }
}

/// Register one object type's shape as a dynamic `Object`, wiring every
/// field to [`default_field`].
fn build_object(shape: &ObjectShape, shapes: &Arc<HashMap<String, ObjectShape>>) -> Object {
    let mut obj = Object::new(shape.name.clone());
    for field in &shape.fields {
        obj = obj.field(default_field(&field.name, &field.ty, shapes.clone()));
    }
    obj
}

/// Parse `sdl` and build a fully dynamic, generically-resolving schema.
/// Every query/mutation field walks its declared return type and produces
/// a default-valued instance; no user resolver logic ever runs.
pub fn build_dynamic_schema(sdl: &str) -> Result<Schema> {
    let doc = parse_schema(sdl).map_err(|e| Error::validation(format!("invalid GraphQL SDL: {e}")))?;
    let shapes = Arc::new(object_shapes(&doc));

    let query_name = root_type_name(&doc, "query").unwrap_or_else(|| "Query".to_string());
    if !shapes.contains_key(&query_name) {
        return Err(Error::validation(format!(
            "GraphQL schema has no root Query type named {query_name}"
        )));
    }

    let mutation_name = root_type_name(&doc, "mutation");
    let subscription_name = root_type_name(&doc, "subscription");

    let mut builder = Schema::build(
        query_name.clone(),
        mutation_name.clone().filter(|n| shapes.contains_key(n)),
        subscription_name.clone().filter(|n| shapes.contains_key(n)),
    );

    for shape in shapes.values() {
        builder = builder.register(build_object(shape, &shapes));
    }

    builder
        .finish()
        .map_err(|e: SchemaError| Error::validation(format!("failed to build GraphQL schema: {e}")))
}

/// Whether `sdl` declares a `Subscription` root type (used to decide
/// whether the protocol manager should also register a `<path>/ws`
/// subscription endpoint).
pub fn declares_subscription_root(sdl: &str) -> bool {
    match parse_schema(sdl) {
        Ok(doc) => root_type_name(&doc, "subscription")
            .map(|name| object_shapes(&doc).contains_key(&name))
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        type Query {
            hello: String!
            users: [User!]!
        }
        type User {
            id: ID!
            name: String!
        }
    "#;

    #[test]
    fn builds_schema_from_simple_sdl() {
        assert!(build_dynamic_schema(SDL).is_ok());
    }

    #[test]
    fn rejects_malformed_sdl() {
        assert!(build_dynamic_schema("type Query { broken").is_err());
    }

    #[test]
    fn detects_no_subscription_root() {
        assert!(!declares_subscription_root(SDL));
    }
}
