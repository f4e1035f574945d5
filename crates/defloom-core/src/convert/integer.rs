use std::any::TypeId;

use crate::convert::{ConvertContext, Converter, value_text};
use crate::document::Node;
use crate::types::{TypeKey, TypeRegistry, Value};

type Narrow = fn(i128) -> Option<Value>;

fn narrow<T: TryFrom<i128> + 'static>(wide: i128) -> Option<Value> {
    T::try_from(wide).ok().map(|v| Box::new(v) as Value)
}

/// The narrowing function for every supported integer type.
fn narrower(ty: TypeKey) -> Option<Narrow> {
    macro_rules! table {
        ($($int:ty),*) => {
            $(
                if ty.id() == TypeId::of::<$int>() {
                    return Some(narrow::<$int> as Narrow);
                }
            )*
        };
    }
    table!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
    None
}

/// A leading `-` takes the signed path, anything else the unsigned one.
fn parse_wide(text: &str) -> Option<i128> {
    if text.starts_with('-') {
        text.parse::<i64>().ok().map(i128::from)
    } else {
        text.parse::<u64>().ok().map(i128::from)
    }
}

/// Every fixed-width integer. Out-of-range values are rejected, never
/// truncated.
pub struct IntegerConverter;

impl Converter for IntegerConverter {
    fn name(&self) -> &'static str {
        "integer"
    }

    fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
        narrower(ty).is_some()
    }

    fn parse(&self, node: &Node, ty: TypeKey, ctx: &mut ConvertContext<'_>) -> Option<Value> {
        let narrow = narrower(ty)?;
        let text = value_text(node, ctx, "an integer")?;
        let Some(wide) = parse_wide(&text) else {
            ctx.parse_error(format!("failed to parse '{text}' as an integer"));
            return None;
        };
        let value = narrow(wide);
        if value.is_none() {
            ctx.parse_error(format!("'{text}' is out of range for {ty}"));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{DiagnosticKind, Diagnostics};
    use proptest::prelude::*;

    fn parse_as<T: 'static + Copy>(text: &str) -> (Option<T>, Diagnostics) {
        let types = TypeRegistry::new();
        let mut diagnostics = Diagnostics::new();
        let node = Node::leaf("Count", text);
        let mut ctx = ConvertContext::new(&types, &mut diagnostics, "Count");
        let value = IntegerConverter
            .parse(&node, TypeKey::of::<T>(), &mut ctx)
            .map(|v| *v.downcast::<T>().unwrap());
        (value, diagnostics)
    }

    #[test]
    fn u8_bounds() {
        assert_eq!(parse_as::<u8>("255").0, Some(255));
        let (value, diagnostics) = parse_as::<u8>("300");
        assert_eq!(value, None);
        assert_eq!(diagnostics.count(DiagnosticKind::ValueParse), 1);
        assert_eq!(parse_as::<u8>("-1").0, None);
    }

    #[test]
    fn signed_extremes() {
        assert_eq!(parse_as::<i64>("-9223372036854775808").0, Some(i64::MIN));
        assert_eq!(parse_as::<i8>("-128").0, Some(-128));
        assert_eq!(parse_as::<i8>("128").0, None);
        assert_eq!(parse_as::<u64>("18446744073709551615").0, Some(u64::MAX));
        assert_eq!(parse_as::<i64>("18446744073709551615").0, None);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let (value, diagnostics) = parse_as::<i32>("12abc");
        assert_eq!(value, None);
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn only_integers_are_handled() {
        let types = TypeRegistry::new();
        assert!(IntegerConverter.can_handle(TypeKey::of::<usize>(), &types));
        assert!(!IntegerConverter.can_handle(TypeKey::of::<u128>(), &types));
        assert!(!IntegerConverter.can_handle(TypeKey::of::<f32>(), &types));
    }

    proptest! {
        #[test]
        fn every_i16_round_trips(n in any::<i16>()) {
            prop_assert_eq!(parse_as::<i16>(&n.to_string()).0, Some(n));
        }

        #[test]
        fn u16_accepts_exactly_its_range(n in -100_000i64..200_000) {
            let parsed = parse_as::<u16>(&n.to_string()).0;
            prop_assert_eq!(parsed, u16::try_from(n).ok());
        }
    }
}
