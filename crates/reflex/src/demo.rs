//! Items the `reflex` binary exports so it always has something of its own
//! to introspect and call.
//!
//! ```text
//! reflex call reflex::demo::add 40 2
//! reflex call reflex::demo::max --variadic 3 9 4
//! reflex globals --filter DEMO
//! ```
#![allow(unsafe_code, unused_unsafe, improper_ctypes_definitions)]

use std::hint::black_box;

/// A point on the plane
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Point
{
    pub x: f64,
    pub y: f64,
}

#[export_name = "reflex_demo_add"]
pub extern "C" fn add(a: i64, b: i64) -> i64
{
    a.wrapping_add(b)
}

#[export_name = "reflex_demo_max"]
pub extern "C" fn max(first: i64, rest: &[i64]) -> i64
{
    rest.iter().copied().fold(first, i64::max)
}

#[export_name = "reflex_demo_hypot"]
pub extern "C" fn hypot(x: f64, y: f64) -> f64
{
    x.hypot(y)
}

#[export_name = "reflex_demo_norm"]
pub extern "C" fn norm(point: Point) -> f64
{
    point.x.hypot(point.y)
}

#[export_name = "reflex_demo_is_even"]
pub extern "C" fn is_even(value: u32) -> bool
{
    value % 2 == 0
}

/// Incremented by nothing; set it with a debugger or `for_each_global`.
#[used]
#[export_name = "REFLEX_DEMO_COUNTER"]
pub static mut COUNTER: u64 = 0;

/// Keep the exports linked into the binary.
pub fn keep_alive()
{
    black_box(add as extern "C" fn(i64, i64) -> i64);
    black_box(max as extern "C" fn(i64, &[i64]) -> i64);
    black_box(hypot as extern "C" fn(f64, f64) -> f64);
    black_box(norm as extern "C" fn(Point) -> f64);
    black_box(is_even as extern "C" fn(u32) -> bool);
    black_box(unsafe { std::ptr::addr_of!(COUNTER) });
}
