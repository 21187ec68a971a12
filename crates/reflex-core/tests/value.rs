//! Tests for the value model

use reflex_core::value::{Primitive, Value};
use reflex_core::TypeKind;

#[test]
fn test_primitive_type_names()
{
    assert_eq!(i8::type_handle().name(), "i8");
    assert_eq!(u64::type_handle().name(), "u64");
    assert_eq!(usize::type_handle().name(), "usize");
    assert_eq!(f32::type_handle().name(), "f32");
    assert_eq!(bool::type_handle().name(), "bool");
    assert_eq!(char::type_handle().name(), "char");
}

#[test]
fn test_primitive_sizes_match_rust()
{
    assert_eq!(i16::type_handle().size(), 2);
    assert_eq!(isize::type_handle().size(), std::mem::size_of::<isize>() as u64);
    assert_eq!(char::type_handle().size(), 4);
    assert_eq!(bool::type_handle().size(), 1);
}

#[test]
fn test_value_round_trip()
{
    assert_eq!(Value::new(-7i64).get::<i64>().unwrap(), -7);
    assert_eq!(Value::new(u16::MAX).get::<u16>().unwrap(), u16::MAX);
    assert_eq!(Value::new(0.25f32).get::<f32>().unwrap(), 0.25);
    assert!(!Value::new(false).get::<bool>().unwrap());
}

#[test]
fn test_signedness_is_part_of_the_shape()
{
    let value = Value::new(5i32);
    assert!(value.get::<u32>().is_err());
    assert!(value.get::<f32>().is_err());
}

#[test]
fn test_values_of_the_same_type_are_assignable()
{
    let a = Value::new(1i64);
    let b = Value::new(2i64);
    assert!(a.ty().is_assignable_to(b.ty()));
    assert!(!a.ty().is_assignable_to(Value::new(1u64).ty()));
}

#[test]
fn test_slice_value()
{
    let value = Value::slice(&[1.5f64, 2.5, -3.0]);
    assert_eq!(value.ty().name(), "&[f64]");
    assert_eq!(value.ty().size(), 16);
    match value.ty().kind() {
        TypeKind::Slice { element } => assert_eq!(element.name(), "f64"),
        other => panic!("unexpected kind: {}", other.label()),
    }
    let elements = unsafe { value.read_slice::<f64>() }.unwrap();
    assert_eq!(elements, vec![1.5, 2.5, -3.0]);
}

#[test]
fn test_read_slice_checks_element_type()
{
    let value = Value::slice(&[1u8, 2, 3]);
    assert!(unsafe { value.read_slice::<i8>() }.is_err());
    assert!(unsafe { Value::new(1u8).read_slice::<u8>() }.is_err());
}

#[test]
fn test_from_bytes()
{
    let value = Value::from_bytes(u32::type_handle(), &7u32.to_ne_bytes()).unwrap();
    assert_eq!(value.get::<u32>().unwrap(), 7);
    assert!(Value::from_bytes(u32::type_handle(), &[0u8; 8]).is_err());
}

#[test]
fn test_display()
{
    assert_eq!(Value::new(-12i16).to_string(), "-12");
    assert_eq!(Value::new(3u8).to_string(), "3");
    assert_eq!(Value::new(1.5f64).to_string(), "1.5");
    assert_eq!(Value::new(true).to_string(), "true");
    assert_eq!(Value::new('x').to_string(), "'x'");
}
