use crate::convert::{ConvertContext, Converter, value_text};
use crate::document::Node;
use crate::types::{TypeKey, TypeRegistry, Value};

/// `true`/`false`, any case, surrounding whitespace ignored.
pub struct BoolConverter;

impl Converter for BoolConverter {
    fn name(&self) -> &'static str {
        "bool"
    }

    fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
        ty.is::<bool>()
    }

    fn parse(&self, node: &Node, _ty: TypeKey, ctx: &mut ConvertContext<'_>) -> Option<Value> {
        let text = value_text(node, ctx, "a boolean")?;
        if text.eq_ignore_ascii_case("true") {
            Some(Box::new(true))
        } else if text.eq_ignore_ascii_case("false") {
            Some(Box::new(false))
        } else {
            ctx.parse_error(format!("failed to parse '{text}' as a boolean"));
            None
        }
    }
}

/// Exactly one character, taken as written.
pub struct CharConverter;

impl Converter for CharConverter {
    fn name(&self) -> &'static str {
        "char"
    }

    fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
        ty.is::<char>()
    }

    fn parse(&self, node: &Node, _ty: TypeKey, ctx: &mut ConvertContext<'_>) -> Option<Value> {
        let text = node.inner_text();
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(Box::new(c)),
            _ => {
                ctx.parse_error(format!("failed to parse '{text}' as a single character"));
                None
            }
        }
    }
}

/// `f32` and `f64`.
pub struct FloatConverter;

impl Converter for FloatConverter {
    fn name(&self) -> &'static str {
        "float"
    }

    fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
        ty.is::<f32>() || ty.is::<f64>()
    }

    fn parse(&self, node: &Node, ty: TypeKey, ctx: &mut ConvertContext<'_>) -> Option<Value> {
        let text = value_text(node, ctx, "a number")?;
        let parsed: Option<Value> = if ty.is::<f32>() {
            text.parse::<f32>().ok().map(|v| Box::new(v) as Value)
        } else {
            text.parse::<f64>().ok().map(|v| Box::new(v) as Value)
        };
        if parsed.is_none() {
            ctx.parse_error(format!("failed to parse '{text}' as {ty}"));
        }
        parsed
    }
}

/// The node's inner text, unchanged.
pub struct StringConverter;

impl Converter for StringConverter {
    fn name(&self) -> &'static str {
        "string"
    }

    fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
        ty.is::<String>()
    }

    fn parse(&self, node: &Node, _ty: TypeKey, _ctx: &mut ConvertContext<'_>) -> Option<Value> {
        Some(Box::new(node.inner_text()))
    }
}
