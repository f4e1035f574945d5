use fixed::types::{I16F16, I32F32};

use crate::convert::{ConvertContext, Converter, value_text};
use crate::document::Node;
use crate::types::{TypeKey, TypeRegistry, Value};

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Q16.16 fixed-point for compact values.
pub type Fixed32 = I16F16;

/// Exact decimals as [`Fixed64`] or [`Fixed32`]. Values outside the
/// type's range are rejected.
pub struct DecimalConverter;

impl Converter for DecimalConverter {
    fn name(&self) -> &'static str {
        "decimal"
    }

    fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
        ty.is::<Fixed64>() || ty.is::<Fixed32>()
    }

    fn parse(&self, node: &Node, ty: TypeKey, ctx: &mut ConvertContext<'_>) -> Option<Value> {
        let text = value_text(node, ctx, "a decimal")?;
        let parsed = if ty.is::<Fixed64>() {
            text.parse::<Fixed64>()
                .map(|v| Box::new(v) as Value)
                .map_err(|e| e.to_string())
        } else {
            text.parse::<Fixed32>()
                .map(|v| Box::new(v) as Value)
                .map_err(|e| e.to_string())
        };
        match parsed {
            Ok(value) => Some(value),
            Err(reason) => {
                ctx.parse_error(format!("failed to parse '{text}' as a decimal: {reason}"));
                None
            }
        }
    }
}
