//! Tests for ABI classification and call planning

use reflex_core::invoke::abi::{AbiTarget, ArgumentPlan, RegisterClass, ReturnShape, Slot};
use reflex_core::value::{Primitive, Value};
use reflex_core::{FunctionType, ReflexError};

fn slice_of<T: Primitive>() -> reflex_core::TypeHandle
{
    Value::slice::<T>(&[]).ty().clone()
}

#[test]
fn test_scalar_classes()
{
    for target in [AbiTarget::SysV64, AbiTarget::Aapcs64 { apple: false }] {
        let parts = target.classify(&i32::type_handle()).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].class, RegisterClass::Integer);
        assert!(parts[0].signed);

        let parts = target.classify(&f32::type_handle()).unwrap();
        assert_eq!(parts[0].class, RegisterClass::Float);
        assert_eq!(parts[0].size, 4);

        let parts = target.classify(&u8::type_handle()).unwrap();
        assert!(!parts[0].signed);
    }
}

#[test]
fn test_slice_takes_two_integer_registers()
{
    let parts = AbiTarget::SysV64.classify(&slice_of::<f64>()).unwrap();
    let classes: Vec<RegisterClass> = parts.iter().map(|part| part.class).collect();
    assert_eq!(classes, vec![RegisterClass::Integer, RegisterClass::Integer]);
    assert_eq!(parts[1].offset, 8);
}

#[test]
fn test_integer_and_float_registers_are_counted_separately()
{
    let ty = FunctionType::new(
        vec![
            i64::type_handle(),
            f64::type_handle(),
            i64::type_handle(),
            f32::type_handle(),
        ],
        vec![f64::type_handle()],
        false,
    )
    .unwrap();
    let plan = AbiTarget::SysV64.plan(&ty).unwrap();

    let slots: Vec<Slot> = plan
        .arguments()
        .iter()
        .map(|argument| match argument {
            ArgumentPlan::Registers(parts) => parts[0].1,
            other => panic!("unexpected plan: {:?}", other),
        })
        .collect();
    assert_eq!(slots, vec![Slot::Int(0), Slot::Float(0), Slot::Int(1), Slot::Float(1)]);
    assert_eq!(plan.stack_words(), 0);
    assert_eq!(plan.return_shape(), ReturnShape::FloatPair);
}

#[test]
fn test_ninth_float_spills_to_the_stack()
{
    let ty = FunctionType::new(vec![f64::type_handle(); 9], Vec::new(), false).unwrap();
    for target in [AbiTarget::SysV64, AbiTarget::Aapcs64 { apple: false }] {
        let plan = target.plan(&ty).unwrap();
        assert_eq!(plan.arguments()[8], ArgumentPlan::Stack { word: 0, count: 1 });
        assert_eq!(plan.stack_words(), 1);
    }
}

#[test]
fn test_stack_overflow_is_not_supported()
{
    let ty = FunctionType::new(vec![u64::type_handle(); 20], Vec::new(), false).unwrap();
    let err = AbiTarget::SysV64.plan(&ty).unwrap_err();
    assert!(matches!(err, ReflexError::NotSupported(_)));
}

#[test]
fn test_apple_rejects_stack_arguments()
{
    let ty = FunctionType::new(vec![u64::type_handle(); 9], Vec::new(), false).unwrap();
    assert!(AbiTarget::Aapcs64 { apple: false }.plan(&ty).is_ok());
    assert!(AbiTarget::Aapcs64 { apple: true }.plan(&ty).is_err());
}

#[test]
fn test_slice_return_comes_back_in_two_registers()
{
    let ty = FunctionType::new(Vec::new(), vec![slice_of::<u8>()], false).unwrap();
    let plan = AbiTarget::SysV64.plan(&ty).unwrap();
    assert_eq!(plan.return_shape(), ReturnShape::IntPair);
    let slots: Vec<Slot> = plan.return_parts().iter().map(|(_, slot)| *slot).collect();
    assert_eq!(slots, vec![Slot::Int(0), Slot::Int(1)]);
}

#[test]
fn test_host_target_matches_the_build()
{
    let host = AbiTarget::host();
    if cfg!(all(target_arch = "x86_64", not(windows))) {
        assert_eq!(host.unwrap(), AbiTarget::SysV64);
    } else if cfg!(all(target_arch = "aarch64", not(windows))) {
        assert!(matches!(host.unwrap(), AbiTarget::Aapcs64 { .. }));
    } else {
        assert!(host.is_err());
    }
}
