//! Synthetic DWARF for unit tests.
//!
//! Two compilation units shaped like rustc output:
//!
//! ```text
//! unit 0
//!   i64, f64, bool, usize, *const i64
//!   struct &[i64] { data_ptr: *const i64, length: usize }
//!   namespace demo
//!     fn add(a: i64, b: i64) -> i64            (+ a local static-like variable)
//!     struct Point { x: i64, y: f64 }  fn norm(self: *demo::Point) -> f64
//!     fn max(first: i64, rest: &[i64]) -> i64
//!     fn divmod(a: i64, b: i64, rem: out i64) -> i64
//!     fn broken(value: <no type>)
//!     fn declared_only()                       (declaration, no code)
//!     typedef Meters = const f64
//!     static COUNTER: i64
//!     <demo::Point as core::fmt::Debug>::{vtable}
//!     enum Color { Red, Green }
//!     union Bits { i: i64, f: f64 }
//!     struct Buffer { data: [i64; 4] }
//!     struct Node { value: i64, next: *mut demo::Node }
//! unit 1
//!   i64
//!   namespace demo
//!     fn add()                                 (a second definition)
//! ```
//!
//! [`plugin_image`] carries one more unit, loaded as a separate image:
//!
//! ```text
//!   i64
//!   namespace demo
//!     struct Gadget { id: i64 }
//!     <demo::Node as core::fmt::Debug>::{vtable}
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use gimli::write::{self, Address, AttributeValue, EndianVec, Expression, LineProgram, Sections, UnitEntryId};
use gimli::{constants, DwAt, DwTag, Encoding, EndianArcSlice, Format, LittleEndian, RunTimeEndian, SectionId};

use super::image::BinaryImage;
use super::OwnedDwarf;

pub(crate) const ADD_ADDRESS: u64 = 0x1000;
pub(crate) const ADD_LINKAGE: &str = "_ZN4demo3add17h0011223344556677E";
pub(crate) const NORM_ADDRESS: u64 = 0x1100;
pub(crate) const MAX_ADDRESS: u64 = 0x1200;
pub(crate) const DIVMOD_ADDRESS: u64 = 0x1300;
pub(crate) const BROKEN_ADDRESS: u64 = 0x1400;
pub(crate) const SECOND_ADD_ADDRESS: u64 = 0x2000;
pub(crate) const COUNTER_ADDRESS: u64 = 0x8000;
pub(crate) const LOCAL_ADDRESS: u64 = 0x8100;
pub(crate) const VTABLE_ADDRESS: u64 = 0x9000;
pub(crate) const PLUGIN_VTABLE_ADDRESS: u64 = 0xa000;
pub(crate) const PLUGIN_BIAS: i64 = 0x40000;

struct UnitBuilder<'a>
{
    unit: &'a mut write::Unit,
}

impl UnitBuilder<'_>
{
    fn add(&mut self, parent: UnitEntryId, tag: DwTag, name: Option<&str>) -> UnitEntryId
    {
        let id = self.unit.add(parent, tag);
        if let Some(name) = name {
            self.set(id, constants::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
        }
        id
    }

    fn set(&mut self, id: UnitEntryId, attr: DwAt, value: AttributeValue)
    {
        self.unit.get_mut(id).set(attr, value);
    }

    fn base(&mut self, parent: UnitEntryId, name: &str, encoding: gimli::DwAte, size: u64) -> UnitEntryId
    {
        let id = self.add(parent, constants::DW_TAG_base_type, Some(name));
        self.set(id, constants::DW_AT_encoding, AttributeValue::Encoding(encoding));
        self.set(id, constants::DW_AT_byte_size, AttributeValue::Udata(size));
        id
    }

    fn typed(&mut self, parent: UnitEntryId, tag: DwTag, name: Option<&str>, ty: UnitEntryId) -> UnitEntryId
    {
        let id = self.add(parent, tag, name);
        self.set(id, constants::DW_AT_type, AttributeValue::UnitRef(ty));
        id
    }

    fn member(&mut self, parent: UnitEntryId, name: &str, ty: UnitEntryId, offset: u64) -> UnitEntryId
    {
        let id = self.typed(parent, constants::DW_TAG_member, Some(name), ty);
        self.set(id, constants::DW_AT_data_member_location, AttributeValue::Udata(offset));
        id
    }

    fn structure(&mut self, parent: UnitEntryId, name: &str, size: u64) -> UnitEntryId
    {
        let id = self.add(parent, constants::DW_TAG_structure_type, Some(name));
        self.set(id, constants::DW_AT_byte_size, AttributeValue::Udata(size));
        id
    }

    fn function(&mut self, parent: UnitEntryId, name: &str, low_pc: u64, ret: Option<UnitEntryId>) -> UnitEntryId
    {
        let id = self.add(parent, constants::DW_TAG_subprogram, Some(name));
        self.set(id, constants::DW_AT_low_pc, AttributeValue::Address(Address::Constant(low_pc)));
        self.set(id, constants::DW_AT_high_pc, AttributeValue::Udata(0x10));
        if let Some(ret) = ret {
            self.set(id, constants::DW_AT_type, AttributeValue::UnitRef(ret));
        }
        id
    }

    fn parameter(&mut self, function: UnitEntryId, name: &str, ty: UnitEntryId) -> UnitEntryId
    {
        self.typed(function, constants::DW_TAG_formal_parameter, Some(name), ty)
    }

    fn static_location(&mut self, id: UnitEntryId, address: u64)
    {
        let mut expression = Expression::new();
        expression.op_addr(Address::Constant(address));
        self.set(id, constants::DW_AT_location, AttributeValue::Exprloc(expression));
    }
}

fn encoding() -> Encoding
{
    Encoding {
        format: Format::Dwarf32,
        version: 4,
        address_size: 8,
    }
}

fn first_unit(unit: &mut write::Unit)
{
    let mut b = UnitBuilder { unit };
    let root = b.unit.root();

    let i64_ty = b.base(root, "i64", constants::DW_ATE_signed, 8);
    let f64_ty = b.base(root, "f64", constants::DW_ATE_float, 8);
    b.base(root, "bool", constants::DW_ATE_boolean, 1);
    let usize_ty = b.base(root, "usize", constants::DW_ATE_unsigned, 8);
    let i64_ptr = b.typed(root, constants::DW_TAG_pointer_type, Some("*const i64"), i64_ty);

    let demo = b.add(root, constants::DW_TAG_namespace, Some("demo"));

    let add = b.function(demo, "add", ADD_ADDRESS, Some(i64_ty));
    b.set(add, constants::DW_AT_linkage_name, AttributeValue::String(ADD_LINKAGE.as_bytes().to_vec()));
    b.parameter(add, "a", i64_ty);
    b.parameter(add, "b", i64_ty);
    let local = b.typed(add, constants::DW_TAG_variable, Some("local"), i64_ty);
    b.static_location(local, LOCAL_ADDRESS);

    let point = b.structure(demo, "Point", 16);
    b.member(point, "x", i64_ty, 0);
    b.member(point, "y", f64_ty, 8);
    let point_ptr = b.typed(demo, constants::DW_TAG_pointer_type, None, point);
    let norm = b.function(point, "norm", NORM_ADDRESS, Some(f64_ty));
    b.parameter(norm, "self", point_ptr);

    let slice = b.structure(root, "&[i64]", 16);
    b.member(slice, "data_ptr", i64_ptr, 0);
    b.member(slice, "length", usize_ty, 8);

    let max = b.function(demo, "max", MAX_ADDRESS, Some(i64_ty));
    b.parameter(max, "first", i64_ty);
    b.parameter(max, "rest", slice);

    let divmod = b.function(demo, "divmod", DIVMOD_ADDRESS, Some(i64_ty));
    b.parameter(divmod, "a", i64_ty);
    b.parameter(divmod, "b", i64_ty);
    let rem = b.parameter(divmod, "rem", i64_ty);
    b.set(rem, constants::DW_AT_variable_parameter, AttributeValue::Flag(true));

    let broken = b.function(demo, "broken", BROKEN_ADDRESS, None);
    b.add(broken, constants::DW_TAG_formal_parameter, Some("value"));

    let declared = b.add(demo, constants::DW_TAG_subprogram, Some("declared_only"));
    b.set(declared, constants::DW_AT_declaration, AttributeValue::Flag(true));

    let const_f64 = b.typed(demo, constants::DW_TAG_const_type, None, f64_ty);
    b.typed(demo, constants::DW_TAG_typedef, Some("Meters"), const_f64);

    let counter = b.typed(demo, constants::DW_TAG_variable, Some("COUNTER"), i64_ty);
    b.static_location(counter, COUNTER_ADDRESS);

    let vtable_type = b.structure(demo, "<demo::Point as core::fmt::Debug>::{vtable_type}", 24);
    b.set(vtable_type, constants::DW_AT_containing_type, AttributeValue::UnitRef(point));
    let vtable = b.typed(
        demo,
        constants::DW_TAG_variable,
        Some("<demo::Point as core::fmt::Debug>::{vtable}"),
        vtable_type,
    );
    b.static_location(vtable, VTABLE_ADDRESS);

    let color = b.add(demo, constants::DW_TAG_enumeration_type, Some("Color"));
    b.set(color, constants::DW_AT_byte_size, AttributeValue::Udata(1));
    let red = b.add(color, constants::DW_TAG_enumerator, Some("Red"));
    b.set(red, constants::DW_AT_const_value, AttributeValue::Udata(0));
    let green = b.add(color, constants::DW_TAG_enumerator, Some("Green"));
    b.set(green, constants::DW_AT_const_value, AttributeValue::Udata(1));

    let bits = b.add(demo, constants::DW_TAG_union_type, Some("Bits"));
    b.set(bits, constants::DW_AT_byte_size, AttributeValue::Udata(8));
    b.member(bits, "i", i64_ty, 0);
    b.member(bits, "f", f64_ty, 0);

    let array = b.typed(demo, constants::DW_TAG_array_type, None, i64_ty);
    let range = b.add(array, constants::DW_TAG_subrange_type, None);
    b.set(range, constants::DW_AT_count, AttributeValue::Udata(4));
    let buffer = b.structure(demo, "Buffer", 32);
    b.member(buffer, "data", array, 0);

    let node = b.structure(demo, "Node", 16);
    let node_ptr = b.typed(demo, constants::DW_TAG_pointer_type, Some("*mut demo::Node"), node);
    b.member(node, "value", i64_ty, 0);
    b.member(node, "next", node_ptr, 8);
}

fn second_unit(unit: &mut write::Unit)
{
    let mut b = UnitBuilder { unit };
    let root = b.unit.root();
    let i64_ty = b.base(root, "i64", constants::DW_ATE_signed, 8);
    let demo = b.add(root, constants::DW_TAG_namespace, Some("demo"));
    b.function(demo, "add", SECOND_ADD_ADDRESS, Some(i64_ty));
}

fn plugin_unit(unit: &mut write::Unit)
{
    let mut b = UnitBuilder { unit };
    let root = b.unit.root();
    let i64_ty = b.base(root, "i64", constants::DW_ATE_signed, 8);
    let demo = b.add(root, constants::DW_TAG_namespace, Some("demo"));

    let gadget = b.structure(demo, "Gadget", 8);
    b.member(gadget, "id", i64_ty, 0);

    let vtable_type = b.structure(demo, "<demo::Node as core::fmt::Debug>::{vtable_type}", 24);
    let vtable = b.typed(
        demo,
        constants::DW_TAG_variable,
        Some("<demo::Node as core::fmt::Debug>::{vtable}"),
        vtable_type,
    );
    b.static_location(vtable, PLUGIN_VTABLE_ADDRESS);
}

fn write_sections(units: &[fn(&mut write::Unit)]) -> HashMap<&'static str, Arc<[u8]>>
{
    let mut dwarf = write::Dwarf::new();
    for populate in units {
        let id = dwarf.units.add(write::Unit::new(encoding(), LineProgram::none()));
        populate(dwarf.units.get_mut(id));
    }

    let mut sections = Sections::new(EndianVec::new(LittleEndian));
    dwarf.write(&mut sections).unwrap();

    let mut raw = HashMap::new();
    sections
        .for_each(|id: SectionId, data: &EndianVec<LittleEndian>| {
            raw.insert(id.name(), Arc::<[u8]>::from(data.slice().to_vec()));
            Ok::<(), gimli::Error>(())
        })
        .unwrap();
    raw
}

/// Raw section contents keyed by section name.
pub(crate) fn sections() -> HashMap<&'static str, Arc<[u8]>>
{
    write_sections(&[first_unit as fn(&mut write::Unit), second_unit])
}

pub(crate) fn dwarf() -> OwnedDwarf
{
    let raw = sections();
    gimli::Dwarf::load(|id| {
        let data = raw.get(id.name()).cloned().unwrap_or_else(|| Arc::from(Vec::new()));
        Ok::<_, gimli::Error>(EndianArcSlice::new(data, RunTimeEndian::Little))
    })
    .unwrap()
}

/// An image backed by the synthetic sections, loaded with a bias of 0x10000.
pub(crate) fn image() -> Arc<BinaryImage>
{
    Arc::new(BinaryImage::from_sections(PathBuf::from("/fixture/demo"), sections(), 0x10000))
}

/// A second image declaring `demo::Gadget` and a vtable for `demo::Node`.
pub(crate) fn plugin_image() -> Arc<BinaryImage>
{
    Arc::new(BinaryImage::from_sections(
        PathBuf::from("/fixture/plugin"),
        write_sections(&[plugin_unit as fn(&mut write::Unit)]),
        PLUGIN_BIAS,
    ))
}
