//! # Invocation
//!
//! Dynamic calls of functions discovered in debug information.
//!
//! A [`FunctionType`] is the call-site view of a signature: the input and
//! output types, and whether the trailing input collects variadic arguments.
//! A [`Callable`] binds a function type to a live entry address and a
//! register plan for the host calling convention (see [`abi`]). Function
//! types also carry the [`CallingConvention`] the callee was compiled with:
//! plain Rust functions pass aggregates differently from `extern "C"` ones.
//!
//! ## Argument validation
//!
//! With `n` declared inputs, argument `i`:
//!
//! - `i < n - 1` (or any `i < n` when not variadic) must be assignable to input `i`
//! - for variadic types, every argument from `n - 1` on is matched against
//!   the element type of the trailing slice and packed into one slice (a
//!   single argument that already is that slice passes through)
//! - a surplus argument fails with [`ReflexError::LengthMismatch`] naming its
//!   index, and so does the first missing one

pub mod abi;

use std::fmt;

use crate::error::{ReflexError, ReflexResult};
use crate::resolve::{Signature, TypeHandle};
use crate::types::Address;
use crate::value::Value;

pub use self::abi::CallingConvention;
use self::abi::{AbiTarget, CallPlan};

/// Input and output types of a function
#[derive(Debug, Clone)]
pub struct FunctionType
{
    inputs: Vec<TypeHandle>,
    outputs: Vec<TypeHandle>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    variadic: bool,
    convention: CallingConvention,
}

impl FunctionType
{
    /// Build an `extern "C"` function type from bare types.
    ///
    /// A variadic type needs a trailing slice input.
    pub fn new(inputs: Vec<TypeHandle>, outputs: Vec<TypeHandle>, variadic: bool) -> ReflexResult<Self>
    {
        let input_names = (0..inputs.len()).map(|i| format!("arg{i}")).collect();
        let output_names = (0..outputs.len()).map(|i| format!("ret{i}")).collect();
        Self::with_names(inputs, input_names, outputs, output_names, variadic)
    }

    /// Build the call-site type of a resolved signature.
    pub fn from_signature(signature: &Signature, variadic: bool) -> ReflexResult<Self>
    {
        Self::with_names(
            signature.inputs.iter().map(|arg| arg.ty.clone()).collect(),
            signature.inputs.iter().map(|arg| arg.name.clone()).collect(),
            signature.outputs.iter().map(|arg| arg.ty.clone()).collect(),
            signature.outputs.iter().map(|arg| arg.name.clone()).collect(),
            variadic,
        )
        .map(|ty| ty.with_convention(signature.convention))
    }

    fn with_names(
        inputs: Vec<TypeHandle>,
        input_names: Vec<String>,
        outputs: Vec<TypeHandle>,
        output_names: Vec<String>,
        variadic: bool,
    ) -> ReflexResult<Self>
    {
        if variadic && inputs.last().and_then(TypeHandle::slice_element).is_none() {
            return Err(ReflexError::NotSupported(
                "variadic functions need a trailing slice parameter".to_string(),
            ));
        }
        Ok(Self {
            inputs,
            outputs,
            input_names,
            output_names,
            variadic,
            convention: CallingConvention::C,
        })
    }

    pub fn with_convention(mut self, convention: CallingConvention) -> Self
    {
        self.convention = convention;
        self
    }

    pub fn convention(&self) -> CallingConvention
    {
        self.convention
    }

    pub fn inputs(&self) -> &[TypeHandle]
    {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TypeHandle]
    {
        &self.outputs
    }

    pub fn input_names(&self) -> &[String]
    {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String]
    {
        &self.output_names
    }

    pub fn is_variadic(&self) -> bool
    {
        self.variadic
    }

    /// Element type collected by the trailing variadic input
    pub fn variadic_element(&self) -> Option<&TypeHandle>
    {
        if !self.variadic {
            return None;
        }
        self.inputs.last().and_then(TypeHandle::slice_element)
    }

    fn mismatch(&self, index: usize, expected: &TypeHandle, actual: &TypeHandle) -> ReflexError
    {
        let name = self
            .input_names
            .get(index.min(self.inputs.len().saturating_sub(1)))
            .cloned()
            .unwrap_or_default();
        ReflexError::TypeMismatch {
            index,
            name,
            expected: expected.name().to_string(),
            actual: actual.name().to_string(),
        }
    }

    /// Check `args` against the inputs and return one value per input,
    /// packing variadic arguments into their slice.
    pub fn validate(&self, args: &[Value]) -> ReflexResult<Vec<Value>>
    {
        let n = self.inputs.len();

        let Some(element) = self.variadic_element() else {
            for (i, arg) in args.iter().enumerate() {
                let Some(expected) = self.inputs.get(i) else {
                    return Err(ReflexError::LengthMismatch { index: i, expected: n });
                };
                if !arg.ty().is_assignable_to(expected) {
                    return Err(self.mismatch(i, expected, arg.ty()));
                }
            }
            if args.len() < n {
                return Err(ReflexError::LengthMismatch {
                    index: args.len(),
                    expected: n,
                });
            }
            return Ok(args.to_vec());
        };

        let fixed = n - 1;
        if args.len() < fixed {
            for (i, arg) in args.iter().enumerate() {
                if !arg.ty().is_assignable_to(&self.inputs[i]) {
                    return Err(self.mismatch(i, &self.inputs[i], arg.ty()));
                }
            }
            return Err(ReflexError::LengthMismatch {
                index: args.len(),
                expected: n,
            });
        }

        let mut values = Vec::with_capacity(n);
        for (i, arg) in args[..fixed].iter().enumerate() {
            if !arg.ty().is_assignable_to(&self.inputs[i]) {
                return Err(self.mismatch(i, &self.inputs[i], arg.ty()));
            }
            values.push(arg.clone());
        }

        let trailing = &args[fixed..];
        if let [single] = trailing {
            if single.ty().is_assignable_to(&self.inputs[fixed]) {
                values.push(single.clone());
                return Ok(values);
            }
        }
        for (offset, arg) in trailing.iter().enumerate() {
            if !arg.ty().is_assignable_to(element) {
                return Err(self.mismatch(fixed + offset, element, arg.ty()));
            }
        }
        values.push(Value::pack_slice(element, trailing)?);
        Ok(values)
    }
}

impl fmt::Display for FunctionType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "fn(")?;
        for (i, (name, ty)) in self.input_names.iter().zip(&self.inputs).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if self.variadic && i + 1 == self.inputs.len() {
                write!(f, "{name}: ...{ty}")?;
            } else {
                write!(f, "{name}: {ty}")?;
            }
        }
        write!(f, ")")?;
        match self.outputs.as_slice() {
            [] => Ok(()),
            [only] => write!(f, " -> {only}"),
            outputs => {
                let names: Vec<&str> = outputs.iter().map(TypeHandle::name).collect();
                write!(f, " -> ({})", names.join(", "))
            }
        }
    }
}

/// A function bound to its entry address and call plan
#[derive(Debug, Clone)]
pub struct Callable
{
    name: String,
    entry: Address,
    ty: FunctionType,
    plan: CallPlan,
}

impl Callable
{
    /// Plan calls of `ty` at `entry` for the host calling convention.
    pub(crate) fn bind(name: impl Into<String>, entry: Address, ty: FunctionType) -> ReflexResult<Self>
    {
        let plan = AbiTarget::host()?.plan(&ty)?;
        Ok(Self {
            name: name.into(),
            entry,
            ty,
            plan,
        })
    }

    pub fn name(&self) -> &str
    {
        &self.name
    }

    pub fn entry(&self) -> Address
    {
        self.entry
    }

    pub fn function_type(&self) -> &FunctionType
    {
        &self.ty
    }

    pub fn plan(&self) -> &CallPlan
    {
        &self.plan
    }

    /// Validate `args`, call the function and return its outputs in
    /// declared order.
    ///
    /// # Safety
    ///
    /// The debug information this callable was built from must describe the
    /// code at its entry address, and the callee must use the convention its
    /// linkage name implies: an unmangled (`#[no_mangle]`) plain Rust `fn`
    /// taking or returning aggregates is called as if it were `extern "C"`.
    /// Pointer arguments must be valid for the callee. Panics and aborts
    /// inside the callee are not caught.
    pub unsafe fn call(&self, args: &[Value]) -> ReflexResult<Vec<Value>>
    {
        let values = self.ty.validate(args)?;
        let frame = abi::marshal(&self.plan, &values)?;
        tracing::trace!(function = %self.name, entry = %self.entry, args = values.len(), "calling");

        // SAFETY: upheld by the caller.
        let returned = unsafe { abi::dispatch(self.entry, &self.plan, &frame)? };
        // `values` owns any packed slice buffer the callee read through.
        drop(values);
        abi::decode(&self.plan, &returned)
    }
}

impl fmt::Display for Callable
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}{} @ {}", self.name, self.ty, self.entry)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::value::Primitive;

    fn slice_of_i64() -> TypeHandle
    {
        Value::slice::<i64>(&[]).ty().clone()
    }

    fn variadic() -> FunctionType
    {
        FunctionType::new(vec![i64::type_handle(), slice_of_i64()], vec![i64::type_handle()], true).unwrap()
    }

    #[test]
    fn test_variadic_requires_trailing_slice()
    {
        let err = FunctionType::new(vec![i64::type_handle()], Vec::new(), true).unwrap_err();
        assert!(matches!(err, ReflexError::NotSupported(_)));
        assert!(FunctionType::new(Vec::new(), Vec::new(), true).is_err());
    }

    #[test]
    fn test_fixed_arity_lengths()
    {
        let ty = FunctionType::new(vec![i64::type_handle(), i64::type_handle()], Vec::new(), false).unwrap();

        let err = ty.validate(&[Value::new(1i64)]).unwrap_err();
        assert!(matches!(err, ReflexError::LengthMismatch { index: 1, expected: 2 }));

        let err = ty
            .validate(&[Value::new(1i64), Value::new(2i64), Value::new(3i64)])
            .unwrap_err();
        assert!(matches!(err, ReflexError::LengthMismatch { index: 2, expected: 2 }));

        assert_eq!(ty.validate(&[Value::new(1i64), Value::new(2i64)]).unwrap().len(), 2);
    }

    #[test]
    fn test_type_mismatch_reports_names()
    {
        let ty = FunctionType::new(vec![i64::type_handle()], Vec::new(), false).unwrap();
        match ty.validate(&[Value::new(1.0f64)]).unwrap_err() {
            ReflexError::TypeMismatch {
                index,
                name,
                expected,
                actual,
            } => {
                assert_eq!(index, 0);
                assert_eq!(name, "arg0");
                assert_eq!(expected, "i64");
                assert_eq!(actual, "f64");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_variadic_packing()
    {
        let ty = variadic();
        let values = ty
            .validate(&[Value::new(1i64), Value::new(2i64), Value::new(3i64)])
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(unsafe { values[1].read_slice::<i64>() }.unwrap(), vec![2, 3]);

        let values = ty.validate(&[Value::new(1i64)]).unwrap();
        assert_eq!(unsafe { values[1].read_slice::<i64>() }.unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn test_variadic_slice_passes_through()
    {
        let values = variadic()
            .validate(&[Value::new(1i64), Value::slice(&[4i64, 5])])
            .unwrap();
        assert_eq!(unsafe { values[1].read_slice::<i64>() }.unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_variadic_errors()
    {
        let ty = variadic();
        assert!(matches!(
            ty.validate(&[]).unwrap_err(),
            ReflexError::LengthMismatch { index: 0, expected: 2 }
        ));

        match ty
            .validate(&[Value::new(1i64), Value::new(2i64), Value::new(3u8)])
            .unwrap_err()
        {
            ReflexError::TypeMismatch {
                index,
                expected,
                actual,
                ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(expected, "i64");
                assert_eq!(actual, "u8");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_display()
    {
        assert_eq!(variadic().to_string(), "fn(arg0: i64, arg1: ...&[i64]) -> i64");
    }
}
