//! The four-slot typed parameter vector exchanged across the command boundary
//!
//! Every invocation carries exactly four slots. The caller declares a
//! [`ParamTypes`] vector alongside the slots; each handler compares that
//! declaration against its own expected shape before touching anything else.
//!
//! Accessing a slot through an accessor that does not match its declared type
//! is a contract violation on the calling side, not a recoverable runtime
//! condition: the accessors panic. Handlers only reach them after the shape
//! check has passed.

/// Direction/type tag for one parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Slot unused.
    None,
    /// 32-bit value supplied by the caller.
    ValueInput,
    /// 32-bit value written by the handler.
    ValueOutput,
    /// Caller-owned input buffer.
    MemrefInput,
    /// Caller-owned output buffer; its length field is updated on return.
    MemrefOutput,
}

/// The declared type vector for all four slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamTypes([ParamType; 4]);

impl ParamTypes {
    /// All four slots unused — the required shape for opening a session.
    pub const NONE: Self = Self([ParamType::None; 4]);

    pub const fn new(p0: ParamType, p1: ParamType, p2: ParamType, p3: ParamType) -> Self {
        Self([p0, p1, p2, p3])
    }

    pub fn slot(&self, index: usize) -> ParamType {
        self.0[index]
    }
}

/// An output memory reference: an optional destination buffer plus a length
/// field that the service updates on return.
///
/// A reference with no buffer is the size probe: the handler reports the
/// required output size in the length field and performs no work.
#[derive(Debug)]
pub struct MemrefOut<'a> {
    buffer: Option<&'a mut [u8]>,
    len: usize,
}

impl<'a> MemrefOut<'a> {
    /// Output reference backed by a real destination buffer.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let len = buffer.len();
        Self {
            buffer: Some(buffer),
            len,
        }
    }

    /// Buffer-less reference used to query the required output size.
    pub fn probe() -> Self {
        Self {
            buffer: None,
            len: 0,
        }
    }

    /// The length field: capacity on the way in, required or actual length
    /// on the way out.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Splits the reference into its buffer and its length field so a
    /// handler can write through one while updating the other.
    pub fn split_mut(&mut self) -> (Option<&mut [u8]>, &mut usize) {
        (self.buffer.as_deref_mut(), &mut self.len)
    }
}

/// One parameter slot.
#[derive(Debug, Default)]
pub enum Param<'a> {
    #[default]
    None,
    /// 32-bit value, input or output per the declared type.
    Value(u32),
    /// Input memory reference.
    MemrefIn(&'a [u8]),
    /// Output memory reference.
    MemrefOut(MemrefOut<'a>),
}

/// The four parameter slots of one invocation.
#[derive(Debug, Default)]
pub struct Params<'a>([Param<'a>; 4]);

impl<'a> Params<'a> {
    pub fn new(slots: [Param<'a>; 4]) -> Self {
        Self(slots)
    }

    /// Reads the 32-bit value in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not a value slot.
    pub fn value(&self, slot: usize) -> u32 {
        match &self.0[slot] {
            Param::Value(v) => *v,
            other => panic!("parameter slot {slot} is not a value slot: {other:?}"),
        }
    }

    /// Writes the 32-bit value in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not a value slot.
    pub fn set_value(&mut self, slot: usize, value: u32) {
        match &mut self.0[slot] {
            Param::Value(v) => *v = value,
            other => panic!("parameter slot {slot} is not a value slot: {other:?}"),
        }
    }

    /// Reads the input buffer in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not an input memory reference.
    pub fn memref_in(&self, slot: usize) -> &'a [u8] {
        match &self.0[slot] {
            Param::MemrefIn(buf) => *buf,
            other => panic!("parameter slot {slot} is not an input memref: {other:?}"),
        }
    }

    /// Accesses the output memory reference in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not an output memory reference.
    pub fn memref_out(&mut self, slot: usize) -> &mut MemrefOut<'a> {
        match &mut self.0[slot] {
            Param::MemrefOut(memref) => memref,
            other => panic!("parameter slot {slot} is not an output memref: {other:?}"),
        }
    }
}
