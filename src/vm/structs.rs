//! Struct values: fixed-size arrays accessed by field index.

use crate::vm::array::Array;
use crate::vm::errors::VmError;

/// A struct is an [`Array`] of declared size whose fields are addressed by
/// integer index; every field starts as the single byte `0x00`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Struct(Array);

impl Struct {
    /// Creates a struct with `size` zero-initialized fields.
    pub fn new(size: u16) -> Self {
        let mut array = Array::new();
        for _ in 0..size {
            // Fresh fields always fit, so the append cannot fail.
            let _ = array.append(vec![0]);
        }
        Self(array)
    }

    /// Parses a struct from its array blob form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VmError> {
        Array::from_bytes(bytes)
            .map(Self)
            .map_err(|_| VmError::NotAValidStruct)
    }

    /// Serializes into the canonical blob form.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    /// Returns the declared field count.
    pub fn size(&self) -> u16 {
        self.0.size()
    }

    /// Writes `value` into field `index`.
    pub fn store_field(&mut self, index: u16, value: Vec<u8>) -> Result<(), VmError> {
        self.0.insert(index, value)
    }

    /// Reads field `index`.
    pub fn load_field(&self, index: u16) -> Result<&[u8], VmError> {
        self.0.at(index)
    }
}
