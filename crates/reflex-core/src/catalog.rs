//! # Symbol Catalog
//!
//! Lookup and enumeration of functions and globals across registered images.
//!
//! ## Name collisions
//!
//! Images are visited in load order, units in section order and entries in
//! depth-first order. When several functions answer to the same name the
//! **last** one visited wins, so a plugin registered later shadows the
//! primary image.
//!
//! ## Globals
//!
//! Package-level variables of the primary image are collected once per epoch
//! into an insertion-ordered table of memory-backed [`Value`]s. Variables
//! whose type cannot be described are skipped.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{ReflexError, ReflexResult};
use crate::registry::Snapshot;
use crate::resolve::{TypeKind, TypeResolver};
use crate::symbols::index::FunctionEntry;
use crate::symbols::{BinaryImage, DieRef, ImageId};
use crate::types::{Address, SymbolName};
use crate::value::Value;

/// A function discovered in debug information
#[derive(Debug, Clone)]
pub struct FunctionDescriptor
{
    /// Namespace-qualified name (`demo::math::add`)
    pub name: String,
    /// Mangled linkage name, when the compiler emitted one; decides the
    /// calling convention
    pub linkage: Option<SymbolName>,
    /// Live entry address
    pub entry: Address,
    /// Image the definition lives in
    pub image: ImageId,
    /// Definition entry in that image's debug information
    pub die: DieRef,
}

impl FunctionDescriptor
{
    fn new(image: &BinaryImage, entry: &FunctionEntry) -> Self
    {
        Self {
            name: entry.name.clone(),
            linkage: entry.linkage.clone(),
            entry: image.relocate(entry.low_pc),
            image: image.id(),
            die: entry.die,
        }
    }
}

impl fmt::Display for FunctionDescriptor
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} @ {}", self.name, self.entry)
    }
}

/// Find a function by qualified or linkage name; the last match wins.
pub fn find_function(snapshot: &Snapshot, name: &str) -> ReflexResult<FunctionDescriptor>
{
    let mut found = None;
    for image in snapshot.images() {
        let index = image.index()?;
        for entry in index.functions_named(name) {
            found = Some(FunctionDescriptor::new(image, entry));
        }
    }
    found.ok_or_else(|| ReflexError::not_found("function", name))
}

/// Visit every function with a code address until `visitor` returns `false`.
pub fn for_each_function<F>(snapshot: &Snapshot, mut visitor: F) -> ReflexResult<()>
where
    F: FnMut(&str, Address) -> bool,
{
    for image in snapshot.images() {
        for entry in image.index()?.functions() {
            if !visitor(&entry.name, image.relocate(entry.low_pc)) {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Epoch-tagged table of package-level variables
#[derive(Debug, Default)]
pub(crate) struct GlobalTable
{
    epoch: Option<u64>,
    entries: IndexMap<String, Value>,
}

impl GlobalTable
{
    pub(crate) fn is_current(&self, epoch: u64) -> bool
    {
        self.epoch == Some(epoch)
    }

    pub(crate) fn replace(&mut self, epoch: u64, entries: IndexMap<String, Value>)
    {
        if self.epoch.is_some_and(|current| current > epoch) {
            return;
        }
        self.epoch = Some(epoch);
        self.entries = entries;
    }

    pub(crate) fn get(&self, name: &str) -> Option<Value>
    {
        let wanted = name.strip_prefix("::").unwrap_or(name);
        self.entries.get(wanted).cloned()
    }

    pub(crate) fn entries(&self) -> Vec<(String, Value)>
    {
        self.entries
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub(crate) fn clear(&mut self)
    {
        self.epoch = None;
        self.entries.clear();
    }
}

/// Walk the primary image's package-level variables and describe each one.
pub(crate) fn collect_globals(snapshot: &Snapshot) -> ReflexResult<IndexMap<String, Value>>
{
    let mut entries = IndexMap::new();
    let Some(primary) = snapshot.primary() else {
        return Ok(entries);
    };

    let resolver = TypeResolver::new(snapshot);
    let index = primary.index()?;
    for variable in index.variables() {
        let Some(ty_die) = variable.ty else {
            tracing::debug!(name = %variable.name, "skipping global without a type");
            continue;
        };
        let ty = match resolver.resolve_die(primary, ty_die) {
            Ok(ty) => ty,
            Err(err) => {
                tracing::debug!(name = %variable.name, error = %err, "skipping global with unresolvable type");
                continue;
            }
        };
        if matches!(ty.kind(), TypeKind::Opaque) || !ty.is_named() {
            tracing::debug!(name = %variable.name, ty = %ty, "skipping global with undescribed type");
            continue;
        }

        let address = primary.relocate(variable.address);
        entries
            .entry(variable.name.clone())
            .or_insert_with(|| Value::from_address(ty, address));
    }

    tracing::debug!(globals = entries.len(), epoch = snapshot.epoch(), "collected globals");
    Ok(entries)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::symbols::fixture;

    fn snapshot() -> Snapshot
    {
        Snapshot::from_parts(vec![fixture::image()], Vec::new(), 1)
    }

    #[test]
    fn test_last_match_wins()
    {
        let function = find_function(&snapshot(), "demo::add").unwrap();
        assert_eq!(function.entry.value(), 0x10000 + fixture::SECOND_ADD_ADDRESS);
    }

    #[test]
    fn test_linkage_and_leading_separator()
    {
        let snapshot = snapshot();
        let by_linkage = find_function(&snapshot, fixture::ADD_LINKAGE).unwrap();
        assert_eq!(by_linkage.entry.value(), 0x10000 + fixture::ADD_ADDRESS);
        assert_eq!(by_linkage.linkage.unwrap().raw(), fixture::ADD_LINKAGE);

        let qualified = find_function(&snapshot, "::demo::max").unwrap();
        assert_eq!(qualified.entry.value(), 0x10000 + fixture::MAX_ADDRESS);
    }

    #[test]
    fn test_missing_function()
    {
        let err = find_function(&snapshot(), "demo::declared_only").unwrap_err();
        assert!(matches!(err, ReflexError::NotFound { kind: "function", .. }));
    }

    #[test]
    fn test_for_each_function_stops_early()
    {
        let mut seen = Vec::new();
        for_each_function(&snapshot(), |name, _| {
            seen.push(name.to_string());
            seen.len() < 2
        })
        .unwrap();
        assert_eq!(seen, vec!["demo::add", "demo::Point::norm"]);
    }

    #[test]
    fn test_globals_are_memory_backed()
    {
        let globals = collect_globals(&snapshot()).unwrap();
        let names: Vec<&str> = globals.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["demo::COUNTER"]);
        let counter = &globals["demo::COUNTER"];
        assert_eq!(counter.ty().name(), "i64");
        assert_eq!(counter.address().map(Address::value), Some(0x10000 + fixture::COUNTER_ADDRESS));
    }

    #[test]
    fn test_global_table_epochs()
    {
        let mut table = GlobalTable::default();
        assert!(!table.is_current(1));
        table.replace(2, collect_globals(&snapshot()).unwrap());
        assert!(table.is_current(2));
        assert!(table.get("::demo::COUNTER").is_some());

        table.replace(1, IndexMap::new());
        assert!(table.is_current(2));
        table.clear();
        assert!(table.get("demo::COUNTER").is_none());
    }
}
