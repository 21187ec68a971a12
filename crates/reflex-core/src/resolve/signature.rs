//! Function signatures derived from debug information.
//!
//! Inputs are the subprogram's `DW_TAG_formal_parameter` children in
//! declaration order. Outputs are the declared return type (`DW_AT_type` on
//! the subprogram, unless it is `()`) followed by every parameter flagged
//! `DW_AT_variable_parameter`. Concrete (inlined or out-of-line) entries that
//! omit a name or type inherit it from their abstract origin.

use std::fmt;

use gimli::constants;

use super::types::{TypeHandle, TypeKind, TypeResolver};
use crate::catalog::FunctionDescriptor;
use crate::error::{ReflexError, ReflexResult};
use crate::invoke::CallingConvention;
use crate::symbols::{BinaryImage, DieRef};

/// One parameter or result of a function
#[derive(Debug, Clone)]
pub struct ArgumentDescriptor
{
    pub name: String,
    pub ty: TypeHandle,
    /// True for results: the return value and `DW_AT_variable_parameter`s
    pub is_output: bool,
    /// Position among the inputs or among the outputs
    pub position: usize,
}

impl fmt::Display for ArgumentDescriptor
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}: {}", self.name, self.ty)
    }
}

/// Ordered inputs and outputs of a function
#[derive(Debug, Clone, Default)]
pub struct Signature
{
    pub inputs: Vec<ArgumentDescriptor>,
    pub outputs: Vec<ArgumentDescriptor>,
    /// Taken from the linkage name
    pub convention: CallingConvention,
}

impl fmt::Display for Signature
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "(")?;
        for (i, input) in self.inputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{input}")?;
        }
        write!(f, ")")?;
        match self.outputs.as_slice() {
            [] => Ok(()),
            [only] => write!(f, " -> {}", only.ty),
            outputs => {
                write!(f, " -> (")?;
                for (i, output) in outputs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{output}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Derive the signature of `function`, defined in `image`.
///
/// Any failure is wrapped in [`ReflexError::Signature`] naming the function
/// and, where it applies, the parameter.
pub fn resolve_signature(resolver: &TypeResolver<'_>, image: &BinaryImage, function: &FunctionDescriptor)
    -> ReflexResult<Signature>
{
    let wrap = |index: Option<usize>, parameter: Option<String>| {
        let function = function.name.clone();
        move |source: ReflexError| ReflexError::Signature {
            function,
            index,
            parameter,
            source: Box::new(source),
        }
    };

    let debug_index = image.index().map_err(wrap(None, None))?;
    let mut signature = Signature {
        convention: CallingConvention::from_linkage(function.linkage.as_ref()),
        ..Signature::default()
    };

    if let Some(ret) = debug_index
        .reference_with_origin(function.die, constants::DW_AT_type)
        .map_err(wrap(None, None))?
    {
        let ty = resolver
            .resolve_die(image, ret)
            .map_err(wrap(None, Some("return".to_string())))?;
        if !matches!(ty.kind(), TypeKind::Unit) {
            signature.outputs.push(ArgumentDescriptor {
                name: "return".to_string(),
                ty,
                is_output: true,
                position: 0,
            });
        }
    }

    let parameters = formal_parameters(image, function.die).map_err(wrap(None, None))?;
    for (i, parameter) in parameters.into_iter().enumerate() {
        let name = debug_index
            .name_with_origin(parameter)
            .map_err(wrap(Some(i), None))?
            .unwrap_or_else(|| format!("arg{i}"));
        let ty_die = debug_index
            .reference_with_origin(parameter, constants::DW_AT_type)
            .map_err(wrap(Some(i), Some(name.clone())))?
            .ok_or_else(|| ReflexError::NotSupported("formal parameter has no type".to_string()))
            .map_err(wrap(Some(i), Some(name.clone())))?;
        let ty = resolver
            .resolve_die(image, ty_die)
            .map_err(wrap(Some(i), Some(name.clone())))?;
        let is_output = is_variable_parameter(image, parameter).map_err(wrap(Some(i), Some(name.clone())))?;

        let partition = if is_output {
            &mut signature.outputs
        } else {
            &mut signature.inputs
        };
        partition.push(ArgumentDescriptor {
            name,
            ty,
            is_output,
            position: partition.len(),
        });
    }

    Ok(signature)
}

fn formal_parameters(image: &BinaryImage, function: DieRef) -> ReflexResult<Vec<DieRef>>
{
    let index = image.index()?;
    let mut parameters = Vec::new();
    for child in index.children(function)? {
        if index.tag(child)? == constants::DW_TAG_formal_parameter {
            parameters.push(child);
        }
    }
    Ok(parameters)
}

fn is_variable_parameter(image: &BinaryImage, parameter: DieRef) -> ReflexResult<bool>
{
    let index = image.index()?;
    if index.flag(parameter, constants::DW_AT_variable_parameter)? {
        return Ok(true);
    }
    match index.origin(parameter)? {
        Some(origin) => index.flag(origin, constants::DW_AT_variable_parameter),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::catalog;
    use crate::registry::Snapshot;
    use crate::symbols::fixture;

    fn signature_of(name: &str) -> ReflexResult<Signature>
    {
        let snapshot = Snapshot::from_parts(vec![fixture::image()], Vec::new(), 1);
        let function = catalog::find_function(&snapshot, name)?;
        let image = snapshot.image(function.image).unwrap().clone();
        resolve_signature(&TypeResolver::new(&snapshot), &image, &function)
    }

    #[test]
    fn test_inputs_in_declaration_order()
    {
        let signature = signature_of("demo::max").unwrap();
        let inputs: Vec<(&str, &str, usize)> = signature
            .inputs
            .iter()
            .map(|arg| (arg.name.as_str(), arg.ty.name(), arg.position))
            .collect();
        assert_eq!(inputs, vec![("first", "i64", 0), ("rest", "&[i64]", 1)]);
        assert_eq!(signature.outputs.len(), 1);
        assert_eq!(signature.outputs[0].name, "return");
        assert_eq!(signature.to_string(), "(first: i64, rest: &[i64]) -> i64");
    }

    #[test]
    fn test_convention_follows_linkage_name()
    {
        let mangled = signature_of(fixture::ADD_LINKAGE).unwrap();
        assert_eq!(mangled.inputs.len(), 2);
        assert_eq!(mangled.convention, CallingConvention::Rust);

        let unmangled = signature_of("demo::max").unwrap();
        assert_eq!(unmangled.convention, CallingConvention::C);
    }

    #[test]
    fn test_variable_parameters_are_outputs()
    {
        let signature = signature_of("demo::divmod").unwrap();
        assert_eq!(signature.inputs.len(), 2);
        let outputs: Vec<(&str, usize)> = signature
            .outputs
            .iter()
            .map(|arg| (arg.name.as_str(), arg.position))
            .collect();
        assert_eq!(outputs, vec![("return", 0), ("rem", 1)]);
        assert!(signature.outputs.iter().all(|arg| arg.is_output));
    }

    #[test]
    fn test_method_receiver_is_a_pointer()
    {
        let signature = signature_of("demo::Point::norm").unwrap();
        assert_eq!(signature.inputs[0].name, "self");
        assert_eq!(signature.inputs[0].ty.name(), "*demo::Point");
        assert_eq!(signature.outputs[0].ty.name(), "f64");
    }

    #[test]
    fn test_untyped_parameter_names_function_and_parameter()
    {
        let err = signature_of("demo::broken").unwrap_err();
        match &err {
            ReflexError::Signature {
                function,
                index,
                parameter,
                source,
            } => {
                assert_eq!(function, "demo::broken");
                assert_eq!(*index, Some(0));
                assert_eq!(parameter.as_deref(), Some("value"));
                assert!(matches!(**source, ReflexError::NotSupported(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("parameter 0 `value`"));
    }

    #[test]
    fn test_last_definition_wins()
    {
        let snapshot = Snapshot::from_parts(vec![fixture::image()], Vec::new(), 1);
        let function = catalog::find_function(&snapshot, "demo::add").unwrap();
        // The last definition of `demo::add` (second unit) declares no parameters.
        assert_eq!(function.entry.value(), 0x10000 + fixture::SECOND_ADD_ADDRESS);
        let image = snapshot.image(function.image).unwrap().clone();
        let signature = resolve_signature(&TypeResolver::new(&snapshot), &image, &function).unwrap();
        assert!(signature.inputs.is_empty());
        assert_eq!(signature.outputs[0].ty.name(), "i64");
    }
}
