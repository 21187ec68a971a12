//! Command-line text to typed values.

use reflex_core::{Address, TypeHandle, TypeKind, Value};

/// Parse an address in hex (`0x1000`) or decimal.
pub fn parse_address(raw: &str) -> Result<Address, String>
{
    let trimmed = raw.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => trimmed.replace('_', "").parse::<u64>(),
    };
    parsed
        .map(Address::from)
        .map_err(|err| format!("invalid address '{raw}': {err}"))
}

fn parse_integer(raw: &str) -> Result<i128, String>
{
    let trimmed = raw.trim().replace('_', "");
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.as_str()),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16),
        None => digits.parse::<i128>(),
    }
    .map_err(|err| format!("invalid integer '{raw}': {err}"))?;
    Ok(if negative { -magnitude } else { magnitude })
}

macro_rules! integer {
    ($raw:expr, $ty:ty) => {{
        let wide = parse_integer($raw)?;
        <$ty>::try_from(wide)
            .map(Value::new)
            .map_err(|_| format!("{} does not fit in {}", $raw, stringify!($ty)))
    }};
}

/// Parse `raw` as a value of `ty`.
///
/// Slices take a comma-separated list of elements (`1,2,3`; empty for `[]`).
pub fn parse_value(ty: &TypeHandle, raw: &str) -> Result<Value, String>
{
    match (ty.kind(), ty.size()) {
        (TypeKind::Int { signed: true }, 1) => integer!(raw, i8),
        (TypeKind::Int { signed: true }, 2) => integer!(raw, i16),
        (TypeKind::Int { signed: true }, 4) => integer!(raw, i32),
        (TypeKind::Int { signed: true }, 8) => integer!(raw, i64),
        (TypeKind::Int { signed: false }, 1) => integer!(raw, u8),
        (TypeKind::Int { signed: false }, 2) => integer!(raw, u16),
        (TypeKind::Int { signed: false }, 4) => integer!(raw, u32),
        (TypeKind::Int { signed: false }, 8) => integer!(raw, u64),
        (TypeKind::Float, 4) => raw
            .trim()
            .parse::<f32>()
            .map(Value::new)
            .map_err(|err| format!("invalid f32 '{raw}': {err}")),
        (TypeKind::Float, 8) => raw
            .trim()
            .parse::<f64>()
            .map(Value::new)
            .map_err(|err| format!("invalid f64 '{raw}': {err}")),
        (TypeKind::Bool, _) => raw
            .trim()
            .parse::<bool>()
            .map(Value::new)
            .map_err(|err| format!("invalid bool '{raw}': {err}")),
        (TypeKind::Char, _) => {
            let mut chars = raw.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::new(c)),
                _ => Err(format!("'{raw}' is not a single character")),
            }
        }
        (TypeKind::Slice { element }, _) => {
            let items = raw
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| parse_value(element, item))
                .collect::<Result<Vec<_>, _>>()?;
            Value::pack_slice(element, &items).map_err(|err| err.to_string())
        }
        _ => Err(format!(
            "cannot parse a {} ({}) from the command line",
            ty,
            ty.kind().label()
        )),
    }
}

#[cfg(test)]
mod tests
{
    use reflex_core::Primitive;

    use super::*;

    #[test]
    fn test_parse_address()
    {
        assert_eq!(parse_address("0x1000").unwrap(), Address::from(0x1000u64));
        assert_eq!(parse_address("4096").unwrap(), Address::from(4096u64));
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn test_parse_integers()
    {
        assert_eq!(parse_value(&i8::type_handle(), "-0x10").unwrap().get::<i8>().unwrap(), -16);
        assert_eq!(parse_value(&u64::type_handle(), "1_000").unwrap().get::<u64>().unwrap(), 1000);
        assert!(parse_value(&u8::type_handle(), "256").is_err());
        assert!(parse_value(&u8::type_handle(), "-1").is_err());
    }

    #[test]
    fn test_parse_scalars()
    {
        assert_eq!(parse_value(&f64::type_handle(), "2.5").unwrap().get::<f64>().unwrap(), 2.5);
        assert!(parse_value(&bool::type_handle(), "true").unwrap().get::<bool>().unwrap());
        assert_eq!(parse_value(&char::type_handle(), "z").unwrap().get::<char>().unwrap(), 'z');
        assert!(parse_value(&char::type_handle(), "zz").is_err());
    }

    #[test]
    fn test_parse_slice()
    {
        let ty = Value::slice::<i64>(&[]).ty().clone();
        let value = parse_value(&ty, "1, 2,3").unwrap();
        assert_eq!(unsafe { value.read_slice::<i64>() }.unwrap(), vec![1, 2, 3]);
        let empty = parse_value(&ty, "").unwrap();
        assert!(unsafe { empty.read_slice::<i64>() }.unwrap().is_empty());
    }
}
