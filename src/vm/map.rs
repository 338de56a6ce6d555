//! On-stack map values.
//!
//! Maps travel as a tag byte `0x01`, a big-endian `u16` entry count, then
//! each entry as length-prefixed key and value. Keys compare by byte
//! equality; entry order is insertion order, and removal preserves the
//! order of the remaining entries.

use crate::types::big_int;
use crate::vm::errors::VmError;

/// Tag byte distinguishing maps from arrays.
pub const MAP_TAG: u8 = 0x01;

/// Parsed in-memory form of a map value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Map {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Map {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a map blob, rejecting wrong tags, truncated lengths and
    /// entry counts that disagree with the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VmError> {
        let (tag, rest) = bytes.split_first().ok_or(VmError::NotAValidMap)?;
        if *tag != MAP_TAG || rest.len() < 2 {
            return Err(VmError::NotAValidMap);
        }
        let size = big_int::u16_from_bytes(&rest[..2]).map_err(|_| VmError::NotAValidMap)?;
        let mut entries = Vec::with_capacity(size as usize);
        let mut cursor = &rest[2..];
        for _ in 0..size {
            let (key, after_key) = Self::read_field(cursor)?;
            let (value, after_value) = Self::read_field(after_key)?;
            entries.push((key, value));
            cursor = after_value;
        }
        if !cursor.is_empty() {
            return Err(VmError::NotAValidMap);
        }
        Ok(Self { entries })
    }

    fn read_field(cursor: &[u8]) -> Result<(Vec<u8>, &[u8]), VmError> {
        if cursor.len() < 2 {
            return Err(VmError::NotAValidMap);
        }
        let length =
            big_int::u16_from_bytes(&cursor[..2]).map_err(|_| VmError::NotAValidMap)? as usize;
        let cursor = &cursor[2..];
        if cursor.len() < length {
            return Err(VmError::NotAValidMap);
        }
        Ok((cursor[..length].to_vec(), &cursor[length..]))
    }

    /// Serializes into the canonical blob form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload: usize = self
            .entries
            .iter()
            .map(|(k, v)| k.len() + v.len() + 4)
            .sum();
        let mut out = Vec::with_capacity(payload + 3);
        out.push(MAP_TAG);
        out.extend_from_slice(&big_int::u16_to_bytes(self.entries.len() as u16));
        for (key, value) in &self.entries {
            out.extend_from_slice(&big_int::u16_to_bytes(key.len() as u16));
            out.extend_from_slice(key);
            out.extend_from_slice(&big_int::u16_to_bytes(value.len() as u16));
            out.extend_from_slice(value);
        }
        out
    }

    /// Returns the entry count.
    pub fn size(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Returns whether `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<&[u8], VmError> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
            .ok_or(VmError::KeyNotFound)
    }

    /// Overwrites the value of an existing `key`.
    pub fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), VmError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .ok_or(VmError::KeyNotFound)?;
        entry.1 = value;
        Ok(())
    }

    /// Appends a new entry; the caller establishes that `key` is absent.
    pub fn append(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), VmError> {
        if self.entries.len() >= u16::MAX as usize
            || key.len() > u16::MAX as usize
            || value.len() > u16::MAX as usize
        {
            return Err(VmError::NotAValidMap);
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// Removes the entry under `key`, preserving the order of the rest.
    pub fn remove(&mut self, key: &[u8]) -> Result<(), VmError> {
        let position = self
            .entries
            .iter()
            .position(|(k, _)| k == key)
            .ok_or(VmError::KeyNotFound)?;
        self.entries.remove(position);
        Ok(())
    }
}
