use crate::convert::{ConvertContext, Converter, value_text};
use crate::diagnostic::DiagnosticKind;
use crate::document::Node;
use crate::types::{TypeKey, TypeRegistry, Value};

/// A [`TypeKey`] named by the node's text, looked up through the active
/// name resolver.
pub struct TypeNameConverter;

impl Converter for TypeNameConverter {
    fn name(&self) -> &'static str {
        "type-name"
    }

    fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
        ty.is::<TypeKey>()
    }

    fn parse(&self, node: &Node, _ty: TypeKey, ctx: &mut ConvertContext<'_>) -> Option<Value> {
        let name = value_text(node, ctx, "a type name")?;
        match ctx.types().resolve_name(&name) {
            Some(key) => Some(Box::new(key)),
            None => {
                ctx.report(DiagnosticKind::TypeResolution, format!("unknown type '{name}'"));
                None
            }
        }
    }
}
