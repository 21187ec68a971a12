//! # Debug Index
//!
//! A per-image index built in a single depth-first pass over every unit.
//!
//! The walk keeps a stack of enclosing scopes (namespaces, types and
//! subprograms) driven by the depth deltas `next_dfs` reports, so every entry
//! can be given its namespace-qualified name (`crate::module::Item`) without a
//! second traversal. The index records:
//!
//! - functions with a code address, in enumeration order
//! - package-level variables (outside any subprogram) with a static address
//! - declared type names, deduplicated, in debug-info order
//! - runtime type records: Rust trait-object vtables and the type they belong to
//!
//! Later lookups read entries back through [`DieRef`]s, so the index also owns
//! the parsed units and the `Dwarf` sections they borrow from.

use std::collections::HashMap;
use std::fmt;

use gimli::{
    constants, AttributeValue, DebuggingInformationEntry, DwAt, DwTag, Operation, Reader as _, Unit, UnitOffset,
    UnitSectionOffset, UnitType,
};
use indexmap::IndexSet;

use super::demangle::{make_symbol_name, map_dwarf_error, names_match, vtable_owner};
use super::{OwnedDwarf, OwnedReader};
use crate::error::{ReflexError, ReflexResult};
use crate::types::SymbolName;

type Entry<'abbrev, 'unit> = DebuggingInformationEntry<'abbrev, 'unit, OwnedReader>;

/// Reference to one debugging information entry of an image
///
/// Stable for the lifetime of the image: the unit is identified by its
/// position in the index, the entry by its offset inside that unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DieRef
{
    unit: usize,
    offset: UnitOffset<usize>,
}

impl DieRef
{
    pub(crate) fn new(unit: usize, offset: UnitOffset<usize>) -> Self
    {
        Self { unit, offset }
    }

    /// Position of the owning unit in the image's unit list.
    pub fn unit_index(self) -> usize
    {
        self.unit
    }

    /// Offset of the entry from the start of its unit.
    pub fn unit_offset(self) -> usize
    {
        self.offset.0
    }
}

impl fmt::Display for DieRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "unit {} +0x{:x}", self.unit, self.offset.0)
    }
}

/// A function with a code address.
#[derive(Debug, Clone)]
pub(crate) struct FunctionEntry
{
    pub name: String,
    pub linkage: Option<SymbolName>,
    /// Link-time entry address
    pub low_pc: u64,
    pub die: DieRef,
}

/// A package-level variable with a static location.
#[derive(Debug, Clone)]
pub(crate) struct VariableEntry
{
    pub name: String,
    /// Link-time storage address
    pub address: u64,
    pub ty: Option<DieRef>,
}

/// A runtime type record (vtable) and the type it was emitted for.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeTypeEntry
{
    /// Qualified name of the implementing type
    pub name: String,
    /// Link-time address of the record
    pub address: u64,
    pub die: Option<DieRef>,
}

/// Debug information index of one image
pub struct DebugIndex
{
    dwarf: OwnedDwarf,
    units: Vec<Unit<OwnedReader>>,
    functions: Vec<FunctionEntry>,
    variables: Vec<VariableEntry>,
    type_names: IndexSet<String>,
    types_by_name: HashMap<String, DieRef>,
    qualified_types: HashMap<DieRef, String>,
    runtime_types: Vec<RuntimeTypeEntry>,
    record_by_die: HashMap<DieRef, usize>,
}

impl fmt::Debug for DebugIndex
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("DebugIndex")
            .field("units", &self.units.len())
            .field("functions", &self.functions.len())
            .field("variables", &self.variables.len())
            .field("type_names", &self.type_names.len())
            .field("runtime_types", &self.runtime_types.len())
            .finish()
    }
}

impl DebugIndex
{
    /// Parse every unit and walk it once.
    pub(crate) fn build(dwarf: OwnedDwarf, include_type_units: bool) -> ReflexResult<Self>
    {
        let units = load_units(&dwarf, include_type_units)?;
        let mut builder = IndexBuilder::default();
        for unit_index in 0..units.len() {
            builder.walk_unit(&dwarf, &units, unit_index)?;
        }
        Ok(builder.finish(dwarf, units))
    }

    pub fn unit_count(&self) -> usize
    {
        self.units.len()
    }

    pub(crate) fn functions(&self) -> &[FunctionEntry]
    {
        &self.functions
    }

    pub(crate) fn variables(&self) -> &[VariableEntry]
    {
        &self.variables
    }

    pub(crate) fn runtime_types(&self) -> &[RuntimeTypeEntry]
    {
        &self.runtime_types
    }

    /// Declared type names in debug-info order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> + '_
    {
        self.type_names.iter().map(String::as_str)
    }

    /// First defining entry for a type name.
    pub(crate) fn type_by_name(&self, name: &str) -> Option<DieRef>
    {
        let wanted = name.strip_prefix("::").unwrap_or(name);
        self.types_by_name.get(wanted).copied()
    }

    /// Namespace-qualified name of a struct, union, enum or class entry.
    pub(crate) fn qualified_type_name(&self, die: DieRef) -> Option<&str>
    {
        self.qualified_types.get(&die).map(String::as_str)
    }

    /// Runtime record whose `DW_AT_containing_type` is `die`.
    pub(crate) fn runtime_record_for(&self, die: DieRef) -> Option<&RuntimeTypeEntry>
    {
        self.record_by_die.get(&die).map(|&position| &self.runtime_types[position])
    }

    /// Functions whose qualified or linkage name equals `name`.
    pub(crate) fn functions_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FunctionEntry> + 'a
    {
        self.functions.iter().filter(move |function| {
            names_match(&function.name, name) || function.linkage.as_ref().is_some_and(|linkage| linkage.raw() == name)
        })
    }

    fn unit(&self, index: usize) -> ReflexResult<&Unit<OwnedReader>>
    {
        self.units
            .get(index)
            .ok_or_else(|| ReflexError::Dwarf(format!("unit {index} out of range")))
    }

    /// Read an entry back.
    pub(crate) fn entry(&self, die: DieRef) -> ReflexResult<Entry<'_, '_>>
    {
        self.unit(die.unit)?
            .entry(die.offset)
            .map_err(|err| map_dwarf_error("resolving entry reference", err))
    }

    pub(crate) fn tag(&self, die: DieRef) -> ReflexResult<DwTag>
    {
        Ok(self.entry(die)?.tag())
    }

    pub(crate) fn name(&self, die: DieRef) -> ReflexResult<Option<String>>
    {
        self.string_attr(die, constants::DW_AT_name)
    }

    pub(crate) fn string_attr(&self, die: DieRef, name: DwAt) -> ReflexResult<Option<String>>
    {
        let unit = self.unit(die.unit)?;
        let entry = self.entry(die)?;
        string_attr(&self.dwarf, unit, &entry, name)
    }

    /// Follow a reference attribute (`DW_AT_type`, `DW_AT_abstract_origin`, ...).
    pub(crate) fn reference(&self, die: DieRef, name: DwAt) -> ReflexResult<Option<DieRef>>
    {
        let entry = self.entry(die)?;
        reference_attr(&self.units, die.unit, &entry, name)
    }

    /// The entry `die` completes: its abstract origin or specification.
    pub(crate) fn origin(&self, die: DieRef) -> ReflexResult<Option<DieRef>>
    {
        let entry = self.entry(die)?;
        origin_of(&self.units, die.unit, &entry)
    }

    /// Like [`reference`](Self::reference), falling back to the origin entry.
    pub(crate) fn reference_with_origin(&self, die: DieRef, name: DwAt) -> ReflexResult<Option<DieRef>>
    {
        if let Some(found) = self.reference(die, name)? {
            return Ok(Some(found));
        }
        match self.origin(die)? {
            Some(origin) => self.reference(origin, name),
            None => Ok(None),
        }
    }

    /// Like [`name`](Self::name), falling back to the origin entry.
    pub(crate) fn name_with_origin(&self, die: DieRef) -> ReflexResult<Option<String>>
    {
        if let Some(name) = self.name(die)? {
            return Ok(Some(name));
        }
        match self.origin(die)? {
            Some(origin) => self.name(origin),
            None => Ok(None),
        }
    }

    pub(crate) fn udata(&self, die: DieRef, name: DwAt) -> ReflexResult<Option<u64>>
    {
        let entry = self.entry(die)?;
        Ok(entry
            .attr(name)
            .map_err(|err| map_dwarf_error("reading constant attribute", err))?
            .and_then(|attr| attr.udata_value()))
    }

    pub(crate) fn sdata(&self, die: DieRef, name: DwAt) -> ReflexResult<Option<i64>>
    {
        let entry = self.entry(die)?;
        Ok(entry
            .attr(name)
            .map_err(|err| map_dwarf_error("reading constant attribute", err))?
            .and_then(|attr| {
                attr.sdata_value()
                    .or_else(|| attr.udata_value().and_then(|value| i64::try_from(value).ok()))
            }))
    }

    pub(crate) fn flag(&self, die: DieRef, name: DwAt) -> ReflexResult<bool>
    {
        let entry = self.entry(die)?;
        flag_attr(&entry, name)
    }

    /// Direct children of an entry, in declaration order.
    pub(crate) fn children(&self, die: DieRef) -> ReflexResult<Vec<DieRef>>
    {
        let unit = self.unit(die.unit)?;
        let mut tree = unit
            .entries_tree(Some(die.offset))
            .map_err(|err| map_dwarf_error("building entry tree", err))?;
        let root = tree.root().map_err(|err| map_dwarf_error("navigating entry root", err))?;
        let mut children = root.children();
        let mut found = Vec::new();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating entry children", err))?
        {
            found.push(DieRef::new(die.unit, child.entry().offset()));
        }
        Ok(found)
    }
}

fn load_units(dwarf: &OwnedDwarf, include_type_units: bool) -> ReflexResult<Vec<Unit<OwnedReader>>>
{
    let mut units = Vec::new();
    let mut headers = dwarf.units();
    while let Some(header) = headers
        .next()
        .map_err(|err| map_dwarf_error("reading .debug_info unit header", err))?
    {
        units.push(
            dwarf
                .unit(header)
                .map_err(|err| map_dwarf_error("parsing compilation unit", err))?,
        );
    }

    if include_type_units {
        let mut type_headers = dwarf.type_units();
        while let Some(header) = type_headers
            .next()
            .map_err(|err| map_dwarf_error("reading .debug_types unit header", err))?
        {
            units.push(dwarf.unit(header).map_err(|err| map_dwarf_error("parsing type unit", err))?);
        }
    }

    Ok(units)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind
{
    Namespace,
    Type,
    Subprogram,
}

#[derive(Debug)]
struct Scope
{
    depth: isize,
    kind: ScopeKind,
    name: Option<String>,
}

fn qualify(scopes: &[Scope], name: &str) -> String
{
    let mut path = String::new();
    for scope in scopes {
        if scope.kind == ScopeKind::Subprogram {
            continue;
        }
        if let Some(component) = &scope.name {
            path.push_str(component);
            path.push_str("::");
        }
    }
    path.push_str(name);
    path
}

fn in_subprogram(scopes: &[Scope]) -> bool
{
    scopes.iter().any(|scope| scope.kind == ScopeKind::Subprogram)
}

struct PendingRecord
{
    vtable: String,
    address: u64,
    containing: Option<DieRef>,
}

#[derive(Default)]
struct IndexBuilder
{
    functions: Vec<FunctionEntry>,
    variables: Vec<VariableEntry>,
    type_names: IndexSet<String>,
    types_by_name: HashMap<String, DieRef>,
    qualified_types: HashMap<DieRef, String>,
    // Subprograms without code (declarations, abstract inline instances)
    declared: HashMap<DieRef, (String, Option<String>)>,
    pending_records: Vec<PendingRecord>,
}

impl IndexBuilder
{
    fn walk_unit(&mut self, dwarf: &OwnedDwarf, units: &[Unit<OwnedReader>], unit_index: usize) -> ReflexResult<()>
    {
        let unit = &units[unit_index];
        let mut scopes: Vec<Scope> = Vec::new();
        let mut depth: isize = 0;
        let mut cursor = unit.entries();

        while let Some((delta, entry)) = cursor.next_dfs().map_err(|err| map_dwarf_error("traversing DIE tree", err))? {
            depth += delta;
            while scopes.last().is_some_and(|scope| scope.depth >= depth) {
                scopes.pop();
            }

            let die = DieRef::new(unit_index, entry.offset());
            let opened = match entry.tag() {
                constants::DW_TAG_namespace => {
                    Some((ScopeKind::Namespace, string_attr(dwarf, unit, entry, constants::DW_AT_name)?))
                }
                constants::DW_TAG_structure_type
                | constants::DW_TAG_class_type
                | constants::DW_TAG_union_type
                | constants::DW_TAG_enumeration_type => {
                    let name = string_attr(dwarf, unit, entry, constants::DW_AT_name)?;
                    if let Some(name) = &name {
                        let qualified = qualify(&scopes, name);
                        let declaration = flag_attr(entry, constants::DW_AT_declaration)?;
                        self.qualified_types.insert(die, qualified.clone());
                        self.add_type(qualified, die, declaration);
                    }
                    Some((ScopeKind::Type, name))
                }
                constants::DW_TAG_base_type | constants::DW_TAG_pointer_type | constants::DW_TAG_reference_type => {
                    if let Some(name) = string_attr(dwarf, unit, entry, constants::DW_AT_name)? {
                        self.add_type(name, die, false);
                    }
                    None
                }
                constants::DW_TAG_typedef => {
                    if let Some(name) = string_attr(dwarf, unit, entry, constants::DW_AT_name)? {
                        self.add_type(qualify(&scopes, &name), die, false);
                    }
                    None
                }
                constants::DW_TAG_subprogram => {
                    self.index_function(dwarf, units, unit_index, entry, &scopes)?;
                    Some((ScopeKind::Subprogram, None))
                }
                constants::DW_TAG_variable if !in_subprogram(&scopes) => {
                    self.index_variable(dwarf, units, unit_index, entry, &scopes)?;
                    None
                }
                _ => None,
            };

            if let Some((kind, name)) = opened {
                if entry.has_children() {
                    scopes.push(Scope { depth, kind, name });
                }
            }
        }

        Ok(())
    }

    fn add_type(&mut self, name: String, die: DieRef, declaration: bool)
    {
        if !declaration {
            self.types_by_name.entry(name.clone()).or_insert(die);
        }
        self.type_names.insert(name);
    }

    fn index_function(
        &mut self,
        dwarf: &OwnedDwarf,
        units: &[Unit<OwnedReader>],
        unit_index: usize,
        entry: &Entry<'_, '_>,
        scopes: &[Scope],
    ) -> ReflexResult<()>
    {
        let unit = &units[unit_index];
        let die = DieRef::new(unit_index, entry.offset());
        let mut qualified = string_attr(dwarf, unit, entry, constants::DW_AT_name)?.map(|name| qualify(scopes, &name));
        let mut linkage = linkage_name(dwarf, unit, entry)?;

        if qualified.is_none() || linkage.is_none() {
            if let Some(origin) = origin_of(units, unit_index, entry)? {
                if let Some((known_name, known_linkage)) = self.declared.get(&origin) {
                    qualified = qualified.or_else(|| Some(known_name.clone()));
                    linkage = linkage.or_else(|| known_linkage.clone());
                } else {
                    let origin_unit = &units[origin.unit];
                    let origin_entry = origin_unit
                        .entry(origin.offset)
                        .map_err(|err| map_dwarf_error("resolving subprogram origin", err))?;
                    if qualified.is_none() {
                        qualified = string_attr(dwarf, origin_unit, &origin_entry, constants::DW_AT_name)?
                            .map(|name| qualify(scopes, &name));
                    }
                    if linkage.is_none() {
                        linkage = linkage_name(dwarf, origin_unit, &origin_entry)?;
                    }
                }
            }
        }

        let Some(name) = qualified else {
            return Ok(());
        };

        match low_pc(dwarf, unit, entry)? {
            Some(low_pc) if low_pc != 0 => self.functions.push(FunctionEntry {
                name,
                linkage: linkage.map(make_symbol_name),
                low_pc,
                die,
            }),
            _ => {
                self.declared.insert(die, (name, linkage));
            }
        }

        Ok(())
    }

    fn index_variable(
        &mut self,
        dwarf: &OwnedDwarf,
        units: &[Unit<OwnedReader>],
        unit_index: usize,
        entry: &Entry<'_, '_>,
        scopes: &[Scope],
    ) -> ReflexResult<()>
    {
        let unit = &units[unit_index];
        let Some(address) = static_address(dwarf, unit, entry)? else {
            return Ok(());
        };
        if address == 0 {
            return Ok(());
        }

        let mut name = string_attr(dwarf, unit, entry, constants::DW_AT_name)?;
        let mut ty = reference_attr(units, unit_index, entry, constants::DW_AT_type)?;
        if name.is_none() || ty.is_none() {
            if let Some(origin) = origin_of(units, unit_index, entry)? {
                let origin_unit = &units[origin.unit];
                let origin_entry = origin_unit
                    .entry(origin.offset)
                    .map_err(|err| map_dwarf_error("resolving variable specification", err))?;
                if name.is_none() {
                    name = string_attr(dwarf, origin_unit, &origin_entry, constants::DW_AT_name)?;
                }
                if ty.is_none() {
                    ty = reference_attr(units, origin.unit, &origin_entry, constants::DW_AT_type)?;
                }
            }
        }

        let Some(name) = name else {
            return Ok(());
        };

        if name.ends_with("{vtable}") {
            let containing = match ty {
                Some(vtable_type) => containing_type(units, vtable_type)?,
                None => None,
            };
            self.pending_records.push(PendingRecord {
                vtable: name,
                address,
                containing,
            });
        } else {
            self.variables.push(VariableEntry {
                name: qualify(scopes, &name),
                address,
                ty,
            });
        }

        Ok(())
    }

    fn finish(self, dwarf: OwnedDwarf, units: Vec<Unit<OwnedReader>>) -> DebugIndex
    {
        let IndexBuilder {
            functions,
            variables,
            type_names,
            types_by_name,
            qualified_types,
            pending_records,
            ..
        } = self;

        let mut runtime_types = Vec::with_capacity(pending_records.len());
        let mut record_by_die = HashMap::new();
        for pending in pending_records {
            let owner = pending
                .containing
                .and_then(|die| qualified_types.get(&die).cloned())
                .or_else(|| vtable_owner(&pending.vtable).map(str::to_string));
            let Some(owner) = owner else {
                tracing::trace!(vtable = %pending.vtable, "skipping runtime record without owner");
                continue;
            };
            let die = pending.containing.or_else(|| types_by_name.get(&owner).copied());
            if let Some(die) = die {
                record_by_die.entry(die).or_insert(runtime_types.len());
            }
            runtime_types.push(RuntimeTypeEntry {
                name: owner,
                address: pending.address,
                die,
            });
        }

        DebugIndex {
            dwarf,
            units,
            functions,
            variables,
            type_names,
            types_by_name,
            qualified_types,
            runtime_types,
            record_by_die,
        }
    }
}

fn string_attr(dwarf: &OwnedDwarf, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>, name: DwAt) -> ReflexResult<Option<String>>
{
    let Some(attr) = entry.attr(name).map_err(|err| map_dwarf_error("reading string attribute", err))? else {
        return Ok(None);
    };
    let reader = dwarf
        .attr_string(unit, attr.value())
        .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
    let owned = match reader.to_string() {
        Ok(cow) => cow.into_owned(),
        Err(_) => reader
            .to_string_lossy()
            .map_err(|err| map_dwarf_error("decoding DWARF string", err))?
            .into_owned(),
    };
    Ok(Some(owned))
}

fn linkage_name(dwarf: &OwnedDwarf, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> ReflexResult<Option<String>>
{
    if let Some(name) = string_attr(dwarf, unit, entry, constants::DW_AT_linkage_name)? {
        return Ok(Some(name));
    }
    string_attr(dwarf, unit, entry, constants::DW_AT_MIPS_linkage_name)
}

fn flag_attr(entry: &Entry<'_, '_>, name: DwAt) -> ReflexResult<bool>
{
    Ok(matches!(
        entry
            .attr_value(name)
            .map_err(|err| map_dwarf_error("reading flag attribute", err))?,
        Some(AttributeValue::Flag(true))
    ))
}

fn low_pc(dwarf: &OwnedDwarf, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> ReflexResult<Option<u64>>
{
    let Some(value) = entry
        .attr_value(constants::DW_AT_low_pc)
        .map_err(|err| map_dwarf_error("reading DW_AT_low_pc", err))?
    else {
        return Ok(None);
    };
    dwarf
        .attr_address(unit, value)
        .map_err(|err| map_dwarf_error("resolving DW_AT_low_pc", err))
}

/// Address of a variable whose location is a single `DW_OP_addr`/`DW_OP_addrx`.
fn static_address(dwarf: &OwnedDwarf, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> ReflexResult<Option<u64>>
{
    let Some(AttributeValue::Exprloc(expression)) = entry
        .attr_value(constants::DW_AT_location)
        .map_err(|err| map_dwarf_error("reading DW_AT_location", err))?
    else {
        return Ok(None);
    };

    let mut operations = expression.operations(unit.encoding());
    let address = match operations
        .next()
        .map_err(|err| map_dwarf_error("decoding location expression", err))?
    {
        Some(Operation::Address { address }) => address,
        Some(Operation::AddressIndex { index }) => dwarf
            .address(unit, index)
            .map_err(|err| map_dwarf_error("resolving DW_OP_addrx", err))?,
        _ => return Ok(None),
    };

    // Anything after the address (offsets, TLS operators) is not a plain static.
    if operations
        .next()
        .map_err(|err| map_dwarf_error("decoding location expression", err))?
        .is_some()
    {
        return Ok(None);
    }

    Ok(Some(address))
}

fn reference_attr(
    units: &[Unit<OwnedReader>],
    unit_index: usize,
    entry: &Entry<'_, '_>,
    name: DwAt,
) -> ReflexResult<Option<DieRef>>
{
    let Some(value) = entry
        .attr_value(name)
        .map_err(|err| map_dwarf_error("reading reference attribute", err))?
    else {
        return Ok(None);
    };
    Ok(resolve_reference(units, unit_index, value))
}

fn origin_of(units: &[Unit<OwnedReader>], unit_index: usize, entry: &Entry<'_, '_>) -> ReflexResult<Option<DieRef>>
{
    if let Some(origin) = reference_attr(units, unit_index, entry, constants::DW_AT_abstract_origin)? {
        return Ok(Some(origin));
    }
    reference_attr(units, unit_index, entry, constants::DW_AT_specification)
}

fn containing_type(units: &[Unit<OwnedReader>], vtable_type: DieRef) -> ReflexResult<Option<DieRef>>
{
    let entry = units[vtable_type.unit]
        .entry(vtable_type.offset)
        .map_err(|err| map_dwarf_error("resolving vtable type", err))?;
    reference_attr(units, vtable_type.unit, &entry, constants::DW_AT_containing_type)
}

fn resolve_reference(
    units: &[Unit<OwnedReader>],
    unit_index: usize,
    value: AttributeValue<OwnedReader>,
) -> Option<DieRef>
{
    match value {
        AttributeValue::UnitRef(offset) => Some(DieRef::new(unit_index, offset)),
        AttributeValue::DebugInfoRef(offset) => {
            let target = UnitSectionOffset::from(offset);
            units
                .iter()
                .enumerate()
                .find_map(|(index, unit)| target.to_unit_offset(unit).map(|offset| DieRef::new(index, offset)))
        }
        AttributeValue::DebugTypesRef(signature) => units.iter().enumerate().find_map(|(index, unit)| {
            match unit.header.type_() {
                UnitType::Type {
                    type_signature,
                    type_offset,
                }
                | UnitType::SplitType {
                    type_signature,
                    type_offset,
                } if type_signature == signature => Some(DieRef::new(index, type_offset)),
                _ => None,
            }
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::symbols::fixture;

    fn index() -> DebugIndex
    {
        DebugIndex::build(fixture::dwarf(), false).unwrap()
    }

    #[test]
    fn test_functions_are_qualified()
    {
        let index = index();
        let names: Vec<&str> = index.functions().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["demo::add", "demo::Point::norm", "demo::max", "demo::divmod", "demo::broken", "demo::add"]
        );
        assert_eq!(index.functions()[0].low_pc, fixture::ADD_ADDRESS);
    }

    #[test]
    fn test_functions_without_code_are_skipped()
    {
        let index = index();
        assert!(index.functions().iter().all(|f| f.name != "demo::declared_only"));
    }

    #[test]
    fn test_linkage_name_lookup()
    {
        let index = index();
        let found: Vec<u64> = index.functions_named(fixture::ADD_LINKAGE).map(|f| f.low_pc).collect();
        assert_eq!(found, vec![fixture::ADD_ADDRESS]);
    }

    #[test]
    fn test_package_level_variables_only()
    {
        let index = index();
        let names: Vec<&str> = index.variables().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["demo::COUNTER"]);
        assert_eq!(index.variables()[0].address, fixture::COUNTER_ADDRESS);
    }

    #[test]
    fn test_type_names_deduplicated_in_order()
    {
        let index = index();
        let names: Vec<&str> = index.type_names().collect();
        assert_eq!(names[0], "i64");
        assert!(names.contains(&"demo::Point"));
        assert!(names.contains(&"demo::Meters"));
        assert_eq!(names.iter().filter(|name| **name == "i64").count(), 1);
    }

    #[test]
    fn test_runtime_record_back_reference()
    {
        let index = index();
        let point = index.type_by_name("demo::Point").unwrap();
        let record = index.runtime_record_for(point).unwrap();
        assert_eq!(record.name, "demo::Point");
        assert_eq!(record.address, fixture::VTABLE_ADDRESS);
    }

    #[test]
    fn test_type_by_name_tolerates_leading_separator()
    {
        let index = index();
        assert_eq!(index.type_by_name("::demo::Point"), index.type_by_name("demo::Point"));
        assert!(index.type_by_name("demo::Missing").is_none());
    }
}
