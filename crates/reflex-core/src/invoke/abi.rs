//! # C ABI Call Emulation
//!
//! Marshals [`Value`]s into argument registers and stack words, calls a
//! function address through a fixed-shape `extern "C"` trampoline and decodes
//! the returned registers.
//!
//! ## Supported Conventions
//!
//! | Target            | Integer registers | Float registers | Stack words |
//! |-------------------|-------------------|-----------------|-------------|
//! | x86-64 System V   | RDI..R9 (6)       | XMM0..XMM7 (8)  | 8           |
//! | AArch64 (AAPCS64) | X0..X7 (8)        | D0..D7 (8)      | 8           |
//!
//! The trampoline signature always spells out every argument register of the
//! target followed by eight `u64` stack words. Register parameters the callee
//! does not declare are ignored by it, and stack words past the ones it reads
//! are ignored as well, so one signature reaches any function whose arguments
//! fit.
//!
//! ## Classification
//!
//! - Integers, `bool`, `char`, pointers and fieldless enums up to 8 bytes take
//!   one integer register (narrow signed integers are sign-extended)
//! - `f32`/`f64` take one float register (an `f32` sits in the low half)
//! - `&[T]` takes two integer registers (data pointer, length)
//! - Structs, unions and arrays up to 16 bytes are split into eightbytes
//!   - x86-64: an eightbyte made only of floats goes to a float register,
//!     anything else to an integer register
//!   - AArch64: homogeneous aggregates of one to four floats take one float
//!     register per member, anything else takes integer registers
//! - Anything larger, `i128`, and x87/vector types are rejected
//!
//! An argument that does not fit the remaining registers is copied to the
//! stack whole.
//!
//! ## Rust calling convention
//!
//! Plain `fn` items (Rust-mangled linkage names) follow rustc's own
//! convention rather than the C one. Scalars travel as above. A scalar pair
//! (two non-zero-sized scalar leaves, e.g. `(i32, i32)`, `&[T]` or a
//! two-field struct) is split into two immediates, each in its own register
//! of its own class, and comes back the same way. Every other aggregate is
//! passed and returned by reference, which is rejected here. A mixed
//! integer/float pair cannot be returned on AArch64. Apple's AArch64 variant packs stack arguments by natural
//! alignment, which this emulator does not model, so spills are rejected
//! there.
//!
//! ## References
//!
//! - [System V AMD64 psABI](https://gitlab.com/x86-psABIs/x86-64-ABI)
//! - [Procedure Call Standard for the Arm 64-bit Architecture](https://github.com/ARM-software/abi-aa/blob/main/aapcs64/aapcs64.rst)
//! - [Apple ARM64 function calling conventions](https://developer.apple.com/documentation/xcode/writing-arm64-code-for-apple-platforms)

use std::fmt;

use smallvec::SmallVec;

use super::FunctionType;
use crate::error::{ReflexError, ReflexResult};
use crate::resolve::{TypeHandle, TypeKind};
use crate::types::{Address, SymbolName};
use crate::value::{register_word, Value};

/// Maximum integer argument registers of any supported target
pub const INT_REGISTERS: usize = 8;
/// Maximum float argument registers of any supported target
pub const FLOAT_REGISTERS: usize = 8;
/// Stack words passed by the trampoline
pub const STACK_WORDS: usize = 8;

/// Largest aggregate passed or returned in registers
const MAX_REGISTER_AGGREGATE: u64 = 16;

/// Convention a callee was compiled with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallingConvention
{
    /// `extern "C"`, which also covers every unmangled export
    #[default]
    C,
    /// rustc's convention for plain `fn` items
    Rust,
}

impl CallingConvention
{
    /// Convention implied by a function's linkage name.
    ///
    /// Rust-mangled names (`_ZN...E` with a hash, `_R...`) mean the Rust
    /// convention. Functions without a linkage name are `#[no_mangle]` or
    /// foreign, and are taken to be `extern "C"`.
    pub fn from_linkage(linkage: Option<&SymbolName>) -> Self
    {
        if linkage.is_some_and(SymbolName::is_rust) {
            CallingConvention::Rust
        } else {
            CallingConvention::C
        }
    }
}

impl fmt::Display for CallingConvention
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            CallingConvention::C => f.write_str("C"),
            CallingConvention::Rust => f.write_str("Rust"),
        }
    }
}

/// Register file an eightbyte travels in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass
{
    Integer,
    Float,
}

/// One register-sized piece of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part
{
    /// Byte offset within the value
    pub offset: u64,
    /// Bytes covered (1..=8)
    pub size: u64,
    pub class: RegisterClass,
    /// Sign-extend when widening to a register
    pub signed: bool,
}

impl Part
{
    fn integer(offset: u64, size: u64, signed: bool) -> Self
    {
        Self {
            offset,
            size,
            class: RegisterClass::Integer,
            signed,
        }
    }

    fn float(offset: u64, size: u64) -> Self
    {
        Self {
            offset,
            size,
            class: RegisterClass::Float,
            signed: false,
        }
    }
}

/// Where a part lives at the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot
{
    Int(usize),
    Float(usize),
}

/// How one argument is passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentPlan
{
    /// Zero-sized; nothing is passed
    Empty,
    Registers(Vec<(Part, Slot)>),
    /// Copied to `count` stack words starting at `word`
    Stack
    {
        word: usize,
        count: usize,
    },
}

/// Return registers read back after the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape
{
    /// RAX:RDX or X0:X1
    IntPair,
    /// XMM0:XMM1
    FloatPair,
    /// RAX, XMM0
    IntFloat,
    /// XMM0, RAX
    FloatInt,
    /// D0..D3
    FloatQuad,
}

/// Register assignment for one call of one function type
#[derive(Debug, Clone)]
pub struct CallPlan
{
    target: AbiTarget,
    arguments: Vec<ArgumentPlan>,
    stack_words: usize,
    shape: ReturnShape,
    output: Option<(TypeHandle, Vec<(Part, Slot)>)>,
}

impl CallPlan
{
    pub fn target(&self) -> AbiTarget
    {
        self.target
    }

    pub fn arguments(&self) -> &[ArgumentPlan]
    {
        &self.arguments
    }

    pub fn stack_words(&self) -> usize
    {
        self.stack_words
    }

    pub fn return_shape(&self) -> ReturnShape
    {
        self.shape
    }

    /// Parts of the return value and the registers they come back in
    pub fn return_parts(&self) -> &[(Part, Slot)]
    {
        self.output.as_ref().map_or(&[], |(_, parts)| parts.as_slice())
    }
}

/// A supported C calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiTarget
{
    /// x86-64 System V (Linux, macOS, BSDs)
    SysV64,
    /// AArch64 procedure call standard
    Aapcs64
    {
        /// Apple's variant (stack arguments packed by alignment)
        apple: bool,
    },
}

impl AbiTarget
{
    /// The convention of the running process.
    pub fn host() -> ReflexResult<Self>
    {
        if cfg!(all(target_arch = "x86_64", not(windows))) {
            Ok(AbiTarget::SysV64)
        } else if cfg!(all(target_arch = "aarch64", not(windows))) {
            Ok(AbiTarget::Aapcs64 {
                apple: cfg!(target_vendor = "apple"),
            })
        } else {
            Err(ReflexError::NotSupported(format!(
                "no call emulator for {}-{}",
                std::env::consts::ARCH,
                std::env::consts::OS
            )))
        }
    }

    fn registers(self) -> (usize, usize)
    {
        match self {
            AbiTarget::SysV64 => (6, 8),
            AbiTarget::Aapcs64 { .. } => (8, 8),
        }
    }

    /// Split a value of type `ty` into register parts.
    ///
    /// An empty list means the type is zero-sized.
    pub fn classify(self, ty: &TypeHandle) -> ReflexResult<Vec<Part>>
    {
        let size = ty.size();
        let unsupported = |why: &str| Err(ReflexError::NotSupported(format!("{ty} ({size} bytes) {why}")));

        match ty.kind() {
            TypeKind::Unit => Ok(Vec::new()),
            TypeKind::Bool | TypeKind::Char | TypeKind::Pointer { .. } | TypeKind::Function | TypeKind::Enum { .. } => {
                if size == 0 || size > 8 {
                    return unsupported("is not a register scalar");
                }
                Ok(vec![Part::integer(0, size, false)])
            }
            TypeKind::Int { signed } => {
                if size == 0 || size > 8 {
                    return unsupported("is wider than a register");
                }
                Ok(vec![Part::integer(0, size, *signed)])
            }
            TypeKind::Float => {
                if size != 4 && size != 8 {
                    return unsupported("is not an f32 or f64");
                }
                Ok(vec![Part::float(0, size)])
            }
            TypeKind::Slice { .. } => Ok(vec![Part::integer(0, 8, false), Part::integer(8, 8, false)]),
            TypeKind::Struct { .. } | TypeKind::Union { .. } | TypeKind::Array { .. } => {
                if size == 0 {
                    return Ok(Vec::new());
                }
                if size > MAX_REGISTER_AGGREGATE {
                    return unsupported("is passed in memory");
                }
                let mut leaves = Vec::new();
                flatten(ty, 0, &mut leaves, 0)?;
                Ok(match self {
                    AbiTarget::SysV64 => eightbytes(size, &leaves),
                    AbiTarget::Aapcs64 { .. } => homogeneous_floats(size, &leaves).unwrap_or_else(|| words(size)),
                })
            }
            TypeKind::Opaque => unsupported("has no describable layout"),
        }
    }

    /// Split a value of type `ty` into register parts under `convention`.
    pub fn classify_with(self, ty: &TypeHandle, convention: CallingConvention) -> ReflexResult<Vec<Part>>
    {
        match convention {
            CallingConvention::C => self.classify(ty),
            CallingConvention::Rust => self.classify_rust(ty),
        }
    }

    fn classify_rust(self, ty: &TypeHandle) -> ReflexResult<Vec<Part>>
    {
        let mut parts = Vec::new();
        self.rust_leaves(ty, 0, &mut parts, 0)?;
        if parts.len() > 2 {
            return Err(by_reference(ty));
        }
        parts.sort_by_key(|part| part.offset);
        Ok(parts)
    }

    /// Collect the scalar leaves of `ty`; anything rustc would not pass as
    /// a scalar or scalar pair is rejected.
    fn rust_leaves(self, ty: &TypeHandle, base: u64, parts: &mut Vec<Part>, depth: usize) -> ReflexResult<()>
    {
        if depth > 16 {
            return Err(ReflexError::NotSupported(format!("{ty} is nested too deeply")));
        }
        if parts.len() > 2 {
            return Err(by_reference(ty));
        }
        match ty.kind() {
            TypeKind::Struct { fields } => {
                for field in fields {
                    self.rust_leaves(&field.ty, base + field.offset, parts, depth + 1)?;
                }
                Ok(())
            }
            TypeKind::Union { .. } | TypeKind::Array { .. } | TypeKind::Enum { fieldless: false, .. } => {
                if ty.size() == 0 {
                    return Ok(());
                }
                Err(by_reference(ty))
            }
            _ => {
                for part in self.classify(ty)? {
                    parts.push(Part {
                        offset: base + part.offset,
                        ..part
                    });
                }
                Ok(())
            }
        }
    }

    /// Assign registers and stack words for a call of `ty`.
    pub fn plan(self, ty: &FunctionType) -> ReflexResult<CallPlan>
    {
        let (max_int, max_float) = self.registers();
        let mut next_int = 0;
        let mut next_float = 0;
        let mut stack_words = 0;
        let mut arguments = Vec::with_capacity(ty.inputs().len());

        for (index, input) in ty.inputs().iter().enumerate() {
            let parts = self.classify_with(input, ty.convention())?;
            if parts.is_empty() {
                arguments.push(ArgumentPlan::Empty);
                continue;
            }

            let ints = parts.iter().filter(|part| part.class == RegisterClass::Integer).count();
            let floats = parts.len() - ints;
            if next_int + ints <= max_int && next_float + floats <= max_float {
                let slots = parts
                    .into_iter()
                    .map(|part| {
                        let slot = match part.class {
                            RegisterClass::Integer => {
                                next_int += 1;
                                Slot::Int(next_int - 1)
                            }
                            RegisterClass::Float => {
                                next_float += 1;
                                Slot::Float(next_float - 1)
                            }
                        };
                        (part, slot)
                    })
                    .collect();
                arguments.push(ArgumentPlan::Registers(slots));
                continue;
            }

            if let AbiTarget::Aapcs64 { apple: true } = self {
                return Err(ReflexError::NotSupported(format!(
                    "argument {index} ({input}) would be passed on the stack"
                )));
            }
            if let AbiTarget::Aapcs64 { .. } = self {
                // Once a class spills, later arguments of that class spill too.
                if ints > 0 {
                    next_int = max_int;
                }
                if floats > 0 {
                    next_float = max_float;
                }
            }

            let count = usize::try_from(input.size().div_ceil(8)).unwrap_or(usize::MAX);
            if stack_words + count > STACK_WORDS {
                return Err(ReflexError::NotSupported(format!(
                    "argument {index} ({input}) needs more than {STACK_WORDS} stack words"
                )));
            }
            arguments.push(ArgumentPlan::Stack {
                word: stack_words,
                count,
            });
            stack_words += count;
        }

        let (shape, output) = self.plan_return(ty)?;
        tracing::trace!(
            target = ?self,
            convention = %ty.convention(),
            arguments = arguments.len(),
            stack_words,
            ?shape,
            "planned call"
        );

        Ok(CallPlan {
            target: self,
            arguments,
            stack_words,
            shape,
            output,
        })
    }

    fn plan_return(self, ty: &FunctionType) -> ReflexResult<(ReturnShape, Option<(TypeHandle, Vec<(Part, Slot)>)>)>
    {
        let output = match ty.outputs() {
            [] => return Ok((ReturnShape::IntPair, None)),
            [output] => output.clone(),
            outputs => {
                return Err(ReflexError::NotSupported(format!(
                    "{} results cannot be returned through registers",
                    outputs.len()
                )))
            }
        };

        let parts = self.classify_with(&output, ty.convention())?;
        let classes: SmallVec<[RegisterClass; 4]> = parts.iter().map(|part| part.class).collect();

        let shape = match (self, classes.as_slice()) {
            (_, [] | [RegisterClass::Integer] | [RegisterClass::Integer, RegisterClass::Integer]) => ReturnShape::IntPair,
            (AbiTarget::SysV64, [RegisterClass::Float] | [RegisterClass::Float, RegisterClass::Float]) => {
                ReturnShape::FloatPair
            }
            (AbiTarget::SysV64, [RegisterClass::Integer, RegisterClass::Float]) => ReturnShape::IntFloat,
            (AbiTarget::SysV64, [RegisterClass::Float, RegisterClass::Integer]) => ReturnShape::FloatInt,
            (AbiTarget::Aapcs64 { .. }, classes) if classes.iter().all(|class| *class == RegisterClass::Float) => {
                ReturnShape::FloatQuad
            }
            _ => {
                return Err(ReflexError::NotSupported(format!(
                    "{output} cannot be returned through registers"
                )))
            }
        };

        let mut next_int = 0;
        let mut next_float = 0;
        let slots = parts
            .into_iter()
            .map(|part| {
                let slot = match part.class {
                    RegisterClass::Integer => {
                        next_int += 1;
                        Slot::Int(next_int - 1)
                    }
                    RegisterClass::Float => {
                        next_float += 1;
                        Slot::Float(next_float - 1)
                    }
                };
                (part, slot)
            })
            .collect();

        Ok((shape, Some((output, slots))))
    }
}

fn by_reference(ty: &TypeHandle) -> ReflexError
{
    ReflexError::NotSupported(format!(
        "{ty} ({} bytes) is passed by reference under the Rust calling convention",
        ty.size()
    ))
}

/// A scalar leaf of an aggregate: offset, size and whether it is a float
type Leaf = (u64, u64, bool);

fn flatten(ty: &TypeHandle, base: u64, leaves: &mut Vec<Leaf>, depth: usize) -> ReflexResult<()>
{
    if depth > 16 {
        return Err(ReflexError::NotSupported(format!("{ty} is nested too deeply")));
    }
    match ty.kind() {
        TypeKind::Unit => {}
        TypeKind::Float => leaves.push((base, ty.size(), true)),
        TypeKind::Struct { fields } | TypeKind::Union { fields } => {
            for field in fields {
                flatten(&field.ty, base + field.offset, leaves, depth + 1)?;
            }
        }
        TypeKind::Array { element, len } => {
            let stride = element.size();
            for i in 0..*len {
                flatten(element, base + i * stride, leaves, depth + 1)?;
            }
        }
        TypeKind::Slice { .. } => {
            leaves.push((base, 8, false));
            leaves.push((base + 8, 8, false));
        }
        TypeKind::Opaque => return Err(ReflexError::NotSupported(format!("{ty} has no describable layout"))),
        _ => leaves.push((base, ty.size(), false)),
    }
    Ok(())
}

/// System V: classify each eightbyte by the leaves overlapping it.
fn eightbytes(size: u64, leaves: &[Leaf]) -> Vec<Part>
{
    (0..size.div_ceil(8))
        .map(|i| {
            let start = i * 8;
            let end = (start + 8).min(size);
            let all_float = leaves
                .iter()
                .filter(|(offset, len, _)| *offset < end && offset + len > start)
                .all(|(_, _, float)| *float);
            if all_float {
                Part::float(start, end - start)
            } else {
                Part::integer(start, end - start, false)
            }
        })
        .collect()
}

/// AAPCS64: one to four floats of the same size filling the whole aggregate.
fn homogeneous_floats(size: u64, leaves: &[Leaf]) -> Option<Vec<Part>>
{
    let (_, member, _) = *leaves.first()?;
    let homogeneous = leaves.len() <= 4
        && leaves.iter().all(|(_, len, float)| *float && *len == member)
        && leaves.len() as u64 * member == size;
    homogeneous.then(|| leaves.iter().map(|(offset, len, _)| Part::float(*offset, *len)).collect())
}

fn words(size: u64) -> Vec<Part>
{
    (0..size.div_ceil(8))
        .map(|i| Part::integer(i * 8, (size - i * 8).min(8), false))
        .collect()
}

/// Argument registers and stack words handed to the trampoline
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Frame
{
    pub int: [u64; INT_REGISTERS],
    pub float: [f64; FLOAT_REGISTERS],
    pub stack: [u64; STACK_WORDS],
}

/// Raw return registers captured after the call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Returned
{
    pub int: [u64; 2],
    /// Bit patterns of the float return registers
    pub float: [u64; 4],
}

fn slice_part<'a>(bytes: &'a [u8], part: &Part) -> ReflexResult<&'a [u8]>
{
    let start = usize::try_from(part.offset).map_err(|_| ReflexError::InvalidValue("part offset".into()))?;
    let end = start + usize::try_from(part.size).map_err(|_| ReflexError::InvalidValue("part size".into()))?;
    bytes
        .get(start..end)
        .ok_or_else(|| ReflexError::InvalidValue(format!("value too short for bytes {start}..{end}")))
}

/// Place `args` into registers and stack words according to `plan`.
pub fn marshal(plan: &CallPlan, args: &[Value]) -> ReflexResult<Frame>
{
    if args.len() != plan.arguments.len() {
        return Err(ReflexError::LengthMismatch {
            index: args.len().min(plan.arguments.len()),
            expected: plan.arguments.len(),
        });
    }

    let mut frame = Frame::default();
    for (arg, argument) in args.iter().zip(&plan.arguments) {
        let bytes = arg.bytes();
        match argument {
            ArgumentPlan::Empty => {}
            ArgumentPlan::Registers(parts) => {
                for (part, slot) in parts {
                    let word = register_word(slice_part(&bytes, part)?, part.signed);
                    match slot {
                        Slot::Int(i) => frame.int[*i] = word,
                        Slot::Float(i) => frame.float[*i] = f64::from_bits(word),
                    }
                }
            }
            ArgumentPlan::Stack { word, count } => {
                for (i, chunk) in bytes.chunks(8).take(*count).enumerate() {
                    frame.stack[word + i] = register_word(chunk, false);
                }
            }
        }
    }
    Ok(frame)
}

/// Rebuild the declared output from the return registers.
pub fn decode(plan: &CallPlan, returned: &Returned) -> ReflexResult<Vec<Value>>
{
    let Some((ty, parts)) = &plan.output else {
        return Ok(Vec::new());
    };

    let size = usize::try_from(ty.size()).map_err(|_| ReflexError::InvalidValue(format!("{ty} size")))?;
    let mut bytes = vec![0u8; size];
    for (part, slot) in parts {
        let word = match slot {
            Slot::Int(i) => returned.int[*i],
            Slot::Float(i) => returned.float[*i],
        };
        let start = usize::try_from(part.offset).map_err(|_| ReflexError::InvalidValue("part offset".into()))?;
        let len = usize::try_from(part.size).map_err(|_| ReflexError::InvalidValue("part size".into()))?;
        let Some(target) = bytes.get_mut(start..start + len) else {
            return Err(ReflexError::InvalidValue(format!("{ty} is shorter than its register parts")));
        };
        target.copy_from_slice(&word.to_ne_bytes()[..len]);
    }

    Ok(vec![Value::from_bytes(ty.clone(), &bytes)?])
}

#[repr(C)]
#[derive(Clone, Copy)]
struct IntPair(u64, u64);

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct FloatPair(f64, f64);

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct IntFloat(u64, f64);

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct FloatInt(f64, u64);

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct FloatQuad(f64, f64, f64, f64);

#[cfg(all(target_arch = "x86_64", not(windows)))]
mod trampoline
{
    use super::{FloatInt, FloatPair, Frame, IntFloat, IntPair, ReturnShape, Returned};
    use crate::error::ReflexResult;
    use crate::types::Address;

    macro_rules! trampoline {
        ($name:ident, $ret:ty) => {
            /// # Safety
            ///
            /// `entry` must be a function following the System V convention
            /// whose arguments are fully described by `frame`.
            pub(super) unsafe fn $name(entry: Address, frame: &Frame) -> $ret
            {
                type Target = unsafe extern "C" fn(
                    u64, u64, u64, u64, u64, u64,
                    f64, f64, f64, f64, f64, f64, f64, f64,
                    u64, u64, u64, u64, u64, u64, u64, u64,
                ) -> $ret;

                // SAFETY: function pointers and data pointers share a representation here.
                let target = unsafe { std::mem::transmute::<*const (), Target>(entry.as_ptr::<()>()) };
                let [i0, i1, i2, i3, i4, i5, _, _] = frame.int;
                let [f0, f1, f2, f3, f4, f5, f6, f7] = frame.float;
                let [s0, s1, s2, s3, s4, s5, s6, s7] = frame.stack;
                unsafe { target(i0, i1, i2, i3, i4, i5, f0, f1, f2, f3, f4, f5, f6, f7, s0, s1, s2, s3, s4, s5, s6, s7) }
            }
        };
    }

    trampoline!(int_pair, IntPair);
    trampoline!(float_pair, FloatPair);
    trampoline!(int_float, IntFloat);
    trampoline!(float_int, FloatInt);

    pub(super) unsafe fn call(entry: Address, frame: &Frame, shape: ReturnShape) -> ReflexResult<Returned>
    {

        let mut returned = Returned::default();
        match shape {
            ReturnShape::IntPair | ReturnShape::FloatQuad => {
                let IntPair(a, b) = unsafe { int_pair(entry, frame) };
                returned.int = [a, b];
            }
            ReturnShape::FloatPair => {
                let FloatPair(a, b) = unsafe { float_pair(entry, frame) };
                returned.float[..2].copy_from_slice(&[a.to_bits(), b.to_bits()]);
            }
            ReturnShape::IntFloat => {
                let IntFloat(a, b) = unsafe { int_float(entry, frame) };
                returned.int[0] = a;
                returned.float[0] = b.to_bits();
            }
            ReturnShape::FloatInt => {
                let FloatInt(a, b) = unsafe { float_int(entry, frame) };
                returned.float[0] = a.to_bits();
                returned.int[0] = b;
            }
        }
        Ok(returned)
    }
}

#[cfg(all(target_arch = "aarch64", not(windows)))]
mod trampoline
{
    use super::{FloatQuad, Frame, IntPair, ReturnShape, Returned};
    use crate::error::ReflexResult;
    use crate::types::Address;

    macro_rules! trampoline {
        ($name:ident, $ret:ty) => {
            /// # Safety
            ///
            /// `entry` must be a function following AAPCS64 whose arguments
            /// are fully described by `frame`.
            pub(super) unsafe fn $name(entry: Address, frame: &Frame) -> $ret
            {
                type Target = unsafe extern "C" fn(
                    u64, u64, u64, u64, u64, u64, u64, u64,
                    f64, f64, f64, f64, f64, f64, f64, f64,
                    u64, u64, u64, u64, u64, u64, u64, u64,
                ) -> $ret;

                // SAFETY: function pointers and data pointers share a representation here.
                let target = unsafe { std::mem::transmute::<*const (), Target>(entry.as_ptr::<()>()) };
                let [i0, i1, i2, i3, i4, i5, i6, i7] = frame.int;
                let [f0, f1, f2, f3, f4, f5, f6, f7] = frame.float;
                let [s0, s1, s2, s3, s4, s5, s6, s7] = frame.stack;
                unsafe {
                    target(
                        i0, i1, i2, i3, i4, i5, i6, i7, f0, f1, f2, f3, f4, f5, f6, f7, s0, s1, s2, s3, s4, s5, s6, s7,
                    )
                }
            }
        };
    }

    trampoline!(int_pair, IntPair);
    trampoline!(float_quad, FloatQuad);

    pub(super) unsafe fn call(entry: Address, frame: &Frame, shape: ReturnShape) -> ReflexResult<Returned>
    {

        let mut returned = Returned::default();
        match shape {
            ReturnShape::FloatQuad | ReturnShape::FloatPair => {
                let FloatQuad(a, b, c, d) = unsafe { float_quad(entry, frame) };
                returned.float = [a.to_bits(), b.to_bits(), c.to_bits(), d.to_bits()];
            }
            ReturnShape::IntPair | ReturnShape::IntFloat | ReturnShape::FloatInt => {
                let IntPair(a, b) = unsafe { int_pair(entry, frame) };
                returned.int = [a, b];
            }
        }
        Ok(returned)
    }
}

#[cfg(not(any(all(target_arch = "x86_64", not(windows)), all(target_arch = "aarch64", not(windows)))))]
mod trampoline
{
    use super::{Frame, Returned, ReturnShape};
    use crate::error::{ReflexError, ReflexResult};
    use crate::types::Address;

    pub(super) unsafe fn call(_entry: Address, _frame: &Frame, _shape: ReturnShape) -> ReflexResult<Returned>
    {
        Err(ReflexError::NotSupported("no call emulator for this target".to_string()))
    }
}

/// Call `entry` with `frame` and capture the return registers.
///
/// # Safety
///
/// `entry` must be the address of a function whose real signature is the one
/// `plan` was built from, following the host calling convention.
pub(crate) unsafe fn dispatch(entry: Address, plan: &CallPlan, frame: &Frame) -> ReflexResult<Returned>
{
    if plan.target != AbiTarget::host()? {
        return Err(ReflexError::NotSupported(format!("call planned for {:?}", plan.target)));
    }
    // SAFETY: upheld by the caller.
    unsafe { trampoline::call(entry, frame, plan.shape) }
}
