use crate::convert::{ConvertContext, Converter, value_text};
use crate::document::Node;
use crate::types::{TypeKey, TypeRegistry, Value};

/// Registered enums, by exact variant name.
pub struct EnumConverter;

impl Converter for EnumConverter {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn can_handle(&self, ty: TypeKey, types: &TypeRegistry) -> bool {
        types.get(ty).and_then(|desc| desc.as_enum()).is_some()
    }

    fn parse(&self, node: &Node, ty: TypeKey, ctx: &mut ConvertContext<'_>) -> Option<Value> {
        let text = value_text(node, ctx, "an enum variant")?;
        let desc = ctx.types().get(ty)?;
        let variants = desc.as_enum()?;
        if let Some(value) = variants.parse(&text) {
            return Some(value);
        }
        let message = format!(
            "'{text}' is not a variant of {} (expected one of {})",
            desc.name(),
            variants.variant_names().join(", ")
        );
        ctx.parse_error(message);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Diagnostics;
    use crate::types::Enum;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Rarity {
        Common,
        Rare,
    }

    #[test]
    fn parses_exact_variant_names() {
        let mut types = TypeRegistry::new();
        types.register(
            Enum::new("Rarity")
                .variant("Common", Rarity::Common)
                .variant("Rare", Rarity::Rare),
        );
        let key = TypeKey::of::<Rarity>();
        assert!(EnumConverter.can_handle(key, &types));

        let mut diagnostics = Diagnostics::new();
        let mut ctx = ConvertContext::new(&types, &mut diagnostics, "Rarity");
        let value = EnumConverter.parse(&Node::leaf("Rarity", "Rare"), key, &mut ctx);
        assert_eq!(*value.unwrap().downcast::<Rarity>().unwrap(), Rarity::Rare);

        let value = EnumConverter.parse(&Node::leaf("Rarity", "rare"), key, &mut ctx);
        assert!(value.is_none());
        assert!(diagnostics.iter().next().unwrap().message.contains("Common, Rare"));
    }

    #[test]
    fn unregistered_enums_are_not_handled() {
        let types = TypeRegistry::new();
        assert!(!EnumConverter.can_handle(TypeKey::of::<Rarity>(), &types));
    }
}
