//! DWARF type resolution.
//!
//! A [`TypeHandle`] is the crate's runtime description of a type: canonical
//! name, kind, size, fields and the live runtime record the compiler emitted
//! for it (if any). Handles are built by walking DWARF type entries and are
//! cached per image under their canonical name, so resolving the same name
//! twice yields the same handle.
//!
//! ## Canonical names
//!
//! - structs, unions, enums and classes: namespace-qualified declared name
//! - pointers and references: declared name, or `"*" + inner` when unnamed
//! - arrays: `[T; N]`
//! - everything else: the entry's intrinsic name
//!
//! Typedefs and qualifiers (`const`, `volatile`, `restrict`, `_Atomic`,
//! template aliases) are unwrapped before naming, so a typedef resolves to
//! the handle of its target.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use gimli::{constants, DwAte, DwTag};

use crate::error::{ReflexError, ReflexResult};
use crate::module::RuntimeRecord;
use crate::registry::Snapshot;
use crate::symbols::{BinaryImage, DebugIndex, DieRef, ImageId};

const MAX_TYPE_REF_DEPTH: usize = 32;

const ANONYMOUS_PREFIX: &str = "{anonymous ";

/// The shape of a type
#[derive(Debug, Clone)]
pub enum TypeKind
{
    /// Zero-sized type (`()`, `void`)
    Unit,
    Bool,
    /// Unicode scalar value (`char`)
    Char,
    Int
    {
        signed: bool,
    },
    Float,
    /// Pointer or reference; only the pointee's canonical name is recorded
    Pointer
    {
        pointee: Option<String>,
    },
    /// Rust slice reference (`&[T]`): data pointer and length
    Slice
    {
        element: TypeHandle,
    },
    Struct
    {
        fields: Vec<Field>,
    },
    Enum
    {
        variants: Vec<Variant>,
        /// C-like enum (`DW_TAG_enumeration_type`); false for Rust enums
        /// whose variants carry data
        fieldless: bool,
    },
    Union
    {
        fields: Vec<Field>,
    },
    Array
    {
        element: TypeHandle,
        len: u64,
    },
    /// Function type (only ever seen behind a pointer)
    Function,
    /// A type whose shape could not be described
    Opaque,
}

impl TypeKind
{
    /// Short lowercase label for display.
    pub fn label(&self) -> &'static str
    {
        match self {
            TypeKind::Unit => "unit",
            TypeKind::Bool => "bool",
            TypeKind::Char => "char",
            TypeKind::Int { signed: true } => "signed integer",
            TypeKind::Int { signed: false } => "unsigned integer",
            TypeKind::Float => "float",
            TypeKind::Pointer { .. } => "pointer",
            TypeKind::Slice { .. } => "slice",
            TypeKind::Struct { .. } => "struct",
            TypeKind::Enum { .. } => "enum",
            TypeKind::Union { .. } => "union",
            TypeKind::Array { .. } => "array",
            TypeKind::Function => "function",
            TypeKind::Opaque => "opaque",
        }
    }

    /// Same shape ignoring nested types.
    pub(crate) fn same_shape(&self, other: &TypeKind) -> bool
    {
        match (self, other) {
            (TypeKind::Int { signed: a }, TypeKind::Int { signed: b }) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

/// A struct or union member
#[derive(Debug, Clone)]
pub struct Field
{
    pub name: String,
    pub ty: TypeHandle,
    /// Byte offset from the start of the containing type
    pub offset: u64,
}

/// An enumerator or Rust enum variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant
{
    pub name: String,
    pub discriminant: Option<i64>,
}

struct TypeInfo
{
    name: String,
    kind: TypeKind,
    size: u64,
    runtime_record: Option<RuntimeRecord>,
    image: Option<ImageId>,
}

/// Shared, cheaply clonable type description
///
/// Two handles compare equal when they are the same handle or describe a
/// type with the same canonical name and size.
#[derive(Clone)]
pub struct TypeHandle(Arc<TypeInfo>);

impl TypeHandle
{
    /// A handle not backed by debug information.
    pub(crate) fn synthetic(name: impl Into<String>, kind: TypeKind, size: u64) -> Self
    {
        Self(Arc::new(TypeInfo {
            name: name.into(),
            kind,
            size,
            runtime_record: None,
            image: None,
        }))
    }

    pub fn name(&self) -> &str
    {
        &self.0.name
    }

    pub fn kind(&self) -> &TypeKind
    {
        &self.0.kind
    }

    /// Size in bytes
    pub fn size(&self) -> u64
    {
        self.0.size
    }

    pub fn runtime_record(&self) -> Option<RuntimeRecord>
    {
        self.0.runtime_record
    }

    /// Image whose debug information described this type.
    pub fn image(&self) -> Option<ImageId>
    {
        self.0.image
    }

    /// False for anonymous aggregates, which get a placeholder name.
    pub fn is_named(&self) -> bool
    {
        !self.0.name.starts_with(ANONYMOUS_PREFIX)
    }

    /// Struct or union members; empty for other kinds.
    pub fn fields(&self) -> &[Field]
    {
        match &self.0.kind {
            TypeKind::Struct { fields } | TypeKind::Union { fields } => fields,
            _ => &[],
        }
    }

    pub fn slice_element(&self) -> Option<&TypeHandle>
    {
        match &self.0.kind {
            TypeKind::Slice { element } => Some(element),
            _ => None,
        }
    }

    pub fn ptr_eq(a: &TypeHandle, b: &TypeHandle) -> bool
    {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Whether a value of this type may be passed where `target` is declared.
    pub fn is_assignable_to(&self, target: &TypeHandle) -> bool
    {
        self == target
    }
}

impl PartialEq for TypeHandle
{
    fn eq(&self, other: &Self) -> bool
    {
        TypeHandle::ptr_eq(self, other) || (self.0.name == other.0.name && self.0.size == other.0.size)
    }
}

impl Eq for TypeHandle {}

impl fmt::Debug for TypeHandle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("TypeHandle")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind.label())
            .field("size", &self.0.size)
            .field("runtime_record", &self.0.runtime_record)
            .finish()
    }
}

impl fmt::Display for TypeHandle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.0.name)
    }
}

/// Unwrap typedefs and qualifiers.
///
/// Returns `die` itself when it is already canonical. A qualifier without a
/// target (`const void`) is returned as is.
pub(crate) fn canonicalize(index: &DebugIndex, die: DieRef) -> ReflexResult<DieRef>
{
    let mut current = die;
    for _ in 0..MAX_TYPE_REF_DEPTH {
        if !is_wrapper(index.tag(current)?) {
            return Ok(current);
        }
        match index.reference(current, constants::DW_AT_type)? {
            Some(next) => current = next,
            None => return Ok(current),
        }
    }
    Err(ReflexError::NotSupported(format!(
        "typedef chain at {die} deeper than {MAX_TYPE_REF_DEPTH}"
    )))
}

fn is_wrapper(tag: DwTag) -> bool
{
    matches!(
        tag,
        constants::DW_TAG_typedef
            | constants::DW_TAG_const_type
            | constants::DW_TAG_volatile_type
            | constants::DW_TAG_restrict_type
            | constants::DW_TAG_atomic_type
            | constants::DW_TAG_template_alias
    )
}

fn is_aggregate(tag: DwTag) -> bool
{
    matches!(
        tag,
        constants::DW_TAG_structure_type
            | constants::DW_TAG_class_type
            | constants::DW_TAG_union_type
            | constants::DW_TAG_enumeration_type
    )
}

/// Canonical name of the type at `die`.
pub(crate) fn canonical_name(index: &DebugIndex, die: DieRef) -> ReflexResult<String>
{
    canonical_name_at(index, die, 0)
}

fn canonical_name_at(index: &DebugIndex, die: DieRef, depth: usize) -> ReflexResult<String>
{
    if depth >= MAX_TYPE_REF_DEPTH {
        return Err(ReflexError::NotSupported(format!("type name at {die} nests too deeply")));
    }
    let die = canonicalize(index, die)?;
    let tag = index.tag(die)?;

    if is_aggregate(tag) {
        if let Some(name) = index.qualified_type_name(die) {
            return Ok(name.to_string());
        }
        return Ok(index
            .name(die)?
            .unwrap_or_else(|| format!("{ANONYMOUS_PREFIX}{die}}}")));
    }

    match tag {
        constants::DW_TAG_pointer_type | constants::DW_TAG_reference_type | constants::DW_TAG_rvalue_reference_type => {
            if let Some(name) = index.name(die)? {
                return Ok(name);
            }
            match index.reference(die, constants::DW_AT_type)? {
                Some(inner) => Ok(format!("*{}", canonical_name_at(index, inner, depth + 1)?)),
                None => Ok("*void".to_string()),
            }
        }
        constants::DW_TAG_array_type => {
            if let Some(name) = index.name(die)? {
                return Ok(name);
            }
            let element = match index.reference(die, constants::DW_AT_type)? {
                Some(element) => canonical_name_at(index, element, depth + 1)?,
                None => "()".to_string(),
            };
            Ok(match array_len(index, die)? {
                Some(len) => format!("[{element}; {len}]"),
                None => format!("[{element}]"),
            })
        }
        constants::DW_TAG_subroutine_type => Ok(index.name(die)?.unwrap_or_else(|| "fn()".to_string())),
        tag if is_wrapper(tag) => Ok("()".to_string()),
        _ => Ok(index
            .name(die)?
            .unwrap_or_else(|| format!("{ANONYMOUS_PREFIX}{die}}}"))),
    }
}

/// Element count from the first `DW_TAG_subrange_type` child.
fn array_len(index: &DebugIndex, die: DieRef) -> ReflexResult<Option<u64>>
{
    for child in index.children(die)? {
        if index.tag(child)? != constants::DW_TAG_subrange_type {
            continue;
        }
        if let Some(count) = index.udata(child, constants::DW_AT_count)? {
            return Ok(Some(count));
        }
        if let Some(upper) = index.udata(child, constants::DW_AT_upper_bound)? {
            let lower = index.udata(child, constants::DW_AT_lower_bound)?.unwrap_or(0);
            return Ok(Some((upper + 1).saturating_sub(lower)));
        }
        return Ok(None);
    }
    Ok(None)
}

#[derive(Default)]
struct BuildState
{
    depth: usize,
    visiting: HashSet<DieRef>,
}

/// Resolves type names and entries against one registry snapshot.
pub struct TypeResolver<'a>
{
    snapshot: &'a Snapshot,
}

impl<'a> TypeResolver<'a>
{
    pub fn new(snapshot: &'a Snapshot) -> Self
    {
        Self { snapshot }
    }

    /// Resolve a canonical type name, searching images in load order.
    ///
    /// Unknown names starting with `*` are synthesized as pointers to the
    /// resolved inner type.
    ///
    /// A type without a runtime record still resolves, with
    /// [`TypeHandle::runtime_record`] returning `None`; a record outside every
    /// module's type table keeps its relocated address.
    pub fn resolve_by_name(&self, name: &str) -> ReflexResult<TypeHandle>
    {
        let wanted = name.strip_prefix("::").unwrap_or(name);
        let epoch = self.snapshot.epoch();

        for image in self.snapshot.images() {
            if let Some(handle) = image.cached_type(epoch, wanted) {
                return Ok(handle);
            }
        }

        for image in self.snapshot.images() {
            let index = image.index()?;
            if let Some(die) = index.type_by_name(wanted) {
                let handle = self.resolve_die(image, die)?;
                if handle.name() == wanted {
                    return Ok(handle);
                }
                // Aliases (typedefs) are cached under their own name too.
                return Ok(image.cache_type(epoch, wanted, handle));
            }
        }

        if let Some(inner) = wanted.strip_prefix('*') {
            let inner = self.resolve_by_name(inner)?;
            let pointer_size = self
                .snapshot
                .primary()
                .map_or(std::mem::size_of::<usize>() as u64, |image| u64::from(image.pointer_size()));
            let handle = TypeHandle::synthetic(
                wanted,
                TypeKind::Pointer {
                    pointee: Some(inner.name().to_string()),
                },
                pointer_size,
            );
            tracing::trace!(name = wanted, "synthesized pointer type");
            return Ok(match self.snapshot.primary() {
                Some(primary) => primary.cache_type(epoch, wanted, handle),
                None => handle,
            });
        }

        Err(ReflexError::not_found("type", name))
    }

    /// Resolve the type entry `die` of `image`.
    pub fn resolve_die(&self, image: &BinaryImage, die: DieRef) -> ReflexResult<TypeHandle>
    {
        let index = image.index()?;
        let mut state = BuildState::default();
        self.build(image, index, die, &mut state)
    }

    fn build(&self, image: &BinaryImage, index: &DebugIndex, die: DieRef, state: &mut BuildState)
        -> ReflexResult<TypeHandle>
    {
        if state.depth >= MAX_TYPE_REF_DEPTH {
            return Err(ReflexError::NotSupported(format!(
                "type at {die} nests deeper than {MAX_TYPE_REF_DEPTH}"
            )));
        }

        let die = canonicalize(index, die)?;
        let name = canonical_name(index, die)?;
        let epoch = self.snapshot.epoch();
        if let Some(handle) = image.cached_type(epoch, &name) {
            return Ok(handle);
        }

        if !state.visiting.insert(die) {
            tracing::trace!(name = %name, "type refers to itself, describing it as opaque");
            let size = index.udata(die, constants::DW_AT_byte_size)?.unwrap_or(0);
            return Ok(TypeHandle::synthetic(name, TypeKind::Opaque, size));
        }
        state.depth += 1;
        let built = self.construct(image, index, die, name.clone(), state);
        state.depth -= 1;
        state.visiting.remove(&die);

        Ok(image.cache_type(epoch, &name, built?))
    }

    fn construct(
        &self,
        image: &BinaryImage,
        index: &DebugIndex,
        die: DieRef,
        name: String,
        state: &mut BuildState,
    ) -> ReflexResult<TypeHandle>
    {
        let tag = index.tag(die)?;
        let declared_size = index.udata(die, constants::DW_AT_byte_size)?;
        let pointer_size = u64::from(image.pointer_size());

        let (kind, size) = match tag {
            constants::DW_TAG_base_type => {
                let size = declared_size.unwrap_or(0);
                (base_kind(index.udata(die, constants::DW_AT_encoding)?, size), size)
            }
            constants::DW_TAG_pointer_type | constants::DW_TAG_reference_type | constants::DW_TAG_rvalue_reference_type => {
                let pointee = match index.reference(die, constants::DW_AT_type)? {
                    Some(inner) => Some(canonical_name(index, inner)?),
                    None => None,
                };
                (TypeKind::Pointer { pointee }, declared_size.unwrap_or(pointer_size))
            }
            constants::DW_TAG_structure_type | constants::DW_TAG_class_type => {
                let size = declared_size.unwrap_or(0);
                if let Some(element) = self.slice_element(image, index, die, &name, state)? {
                    (TypeKind::Slice { element }, size)
                } else if let Some(variants) = self.variant_part(index, die)? {
                    (TypeKind::Enum { variants, fieldless: false }, size)
                } else {
                    (
                        TypeKind::Struct {
                            fields: self.members(image, index, die, state)?,
                        },
                        size,
                    )
                }
            }
            constants::DW_TAG_union_type => (
                TypeKind::Union {
                    fields: self.members(image, index, die, state)?,
                },
                declared_size.unwrap_or(0),
            ),
            constants::DW_TAG_enumeration_type => (
                TypeKind::Enum {
                    variants: enumerators(index, die)?,
                    fieldless: true,
                },
                declared_size.unwrap_or(0),
            ),
            constants::DW_TAG_array_type => {
                let element_die = index.reference(die, constants::DW_AT_type)?.ok_or_else(|| {
                    ReflexError::NotSupported(format!("array type {name} has no element type"))
                })?;
                let element = self.build(image, index, element_die, state)?;
                let len = array_len(index, die)?.unwrap_or(0);
                let size = declared_size.unwrap_or_else(|| element.size().saturating_mul(len));
                (TypeKind::Array { element, len }, size)
            }
            constants::DW_TAG_subroutine_type => (TypeKind::Function, pointer_size),
            constants::DW_TAG_unspecified_type => (TypeKind::Unit, 0),
            tag if is_wrapper(tag) => (TypeKind::Unit, 0),
            _ => (TypeKind::Opaque, declared_size.unwrap_or(0)),
        };

        let runtime_record = if is_aggregate(tag) {
            self.runtime_record(image, index, die, &name)?
        } else {
            None
        };

        Ok(TypeHandle(Arc::new(TypeInfo {
            name,
            kind,
            size,
            runtime_record,
            image: Some(image.id()),
        })))
    }

    fn members(&self, image: &BinaryImage, index: &DebugIndex, die: DieRef, state: &mut BuildState)
        -> ReflexResult<Vec<Field>>
    {
        let mut fields = Vec::new();
        for child in index.children(die)? {
            if index.tag(child)? != constants::DW_TAG_member {
                continue;
            }
            let name = index.name(child)?.unwrap_or_else(|| format!("__{}", fields.len()));
            let ty_die = index
                .reference(child, constants::DW_AT_type)?
                .ok_or_else(|| ReflexError::NotSupported(format!("member `{name}` has no type")))?;
            let ty = self.build(image, index, ty_die, state)?;
            let offset = match index.udata(child, constants::DW_AT_data_member_location)? {
                Some(offset) => offset,
                None => index.udata(child, constants::DW_AT_data_bit_offset)?.unwrap_or(0) / 8,
            };
            fields.push(Field { name, ty, offset });
        }
        Ok(fields)
    }

    /// Element type of a Rust slice reference (`&[T]` with `data_ptr` and
    /// `length` members).
    fn slice_element(
        &self,
        image: &BinaryImage,
        index: &DebugIndex,
        die: DieRef,
        name: &str,
        state: &mut BuildState,
    ) -> ReflexResult<Option<TypeHandle>>
    {
        if !(name.starts_with("&[") || name.starts_with("&mut [")) {
            return Ok(None);
        }
        let mut data_ptr = None;
        let mut has_length = false;
        for child in index.children(die)? {
            match index.name(child)?.as_deref() {
                Some("data_ptr") => data_ptr = index.reference(child, constants::DW_AT_type)?,
                Some("length") => has_length = true,
                _ => {}
            }
        }
        let (Some(pointer), true) = (data_ptr, has_length) else {
            return Ok(None);
        };
        let pointer = canonicalize(index, pointer)?;
        match index.reference(pointer, constants::DW_AT_type)? {
            Some(element) => Ok(Some(self.build(image, index, element, state)?)),
            None => Ok(None),
        }
    }

    /// Variants of a Rust enum described with `DW_TAG_variant_part`.
    fn variant_part(&self, index: &DebugIndex, die: DieRef) -> ReflexResult<Option<Vec<Variant>>>
    {
        for child in index.children(die)? {
            if index.tag(child)? != constants::DW_TAG_variant_part {
                continue;
            }
            let mut variants = Vec::new();
            for variant in index.children(child)? {
                if index.tag(variant)? != constants::DW_TAG_variant {
                    continue;
                }
                let discriminant = index.sdata(variant, constants::DW_AT_discr_value)?;
                let mut name = None;
                for member in index.children(variant)? {
                    if index.tag(member)? == constants::DW_TAG_member {
                        name = index.name(member)?;
                        break;
                    }
                }
                variants.push(Variant {
                    name: name.unwrap_or_else(|| format!("variant{}", variants.len())),
                    discriminant,
                });
            }
            return Ok(Some(variants));
        }
        Ok(None)
    }

    /// Locate the live runtime record for an aggregate.
    ///
    /// The entry's own back-reference wins; otherwise non-primary images are
    /// searched by name.
    fn runtime_record(&self, image: &BinaryImage, index: &DebugIndex, die: DieRef, name: &str)
        -> ReflexResult<Option<RuntimeRecord>>
    {
        if let Some(entry) = index.runtime_record_for(die) {
            if entry.address != 0 {
                return Ok(Some(self.classify(image, entry.address)));
            }
        }

        let epoch = self.snapshot.epoch();
        for other in self.snapshot.images().iter().skip(1) {
            if let Some(link_address) = other.runtime_record_address(epoch, name)? {
                return Ok(Some(self.classify(other, link_address)));
            }
        }
        Ok(None)
    }

    fn classify(&self, image: &BinaryImage, link_address: u64) -> RuntimeRecord
    {
        match self.snapshot.module_for(image) {
            Ok(module) => module.classify_record(link_address),
            Err(err) => {
                tracing::trace!(path = %image.path().display(), error = %err, "no module record, keeping relocated address");
                RuntimeRecord {
                    address: image.relocate(link_address),
                    in_type_table: false,
                }
            }
        }
    }
}

fn base_kind(encoding: Option<u64>, size: u64) -> TypeKind
{
    if size == 0 {
        return TypeKind::Unit;
    }
    let Some(encoding) = encoding.and_then(|raw| u8::try_from(raw).ok()) else {
        return TypeKind::Opaque;
    };
    match DwAte(encoding) {
        constants::DW_ATE_boolean => TypeKind::Bool,
        constants::DW_ATE_float => TypeKind::Float,
        constants::DW_ATE_signed | constants::DW_ATE_signed_char => TypeKind::Int { signed: true },
        constants::DW_ATE_unsigned | constants::DW_ATE_unsigned_char => TypeKind::Int { signed: false },
        constants::DW_ATE_UTF => TypeKind::Char,
        _ => TypeKind::Opaque,
    }
}

fn enumerators(index: &DebugIndex, die: DieRef) -> ReflexResult<Vec<Variant>>
{
    let mut variants = Vec::new();
    for child in index.children(die)? {
        if index.tag(child)? != constants::DW_TAG_enumerator {
            continue;
        }
        variants.push(Variant {
            name: index.name(child)?.unwrap_or_default(),
            discriminant: index.sdata(child, constants::DW_AT_const_value)?,
        });
    }
    Ok(variants)
}
