use anyhow::{Context, Result, anyhow, bail};
use byteorder::{LittleEndian, ReadBytesExt};

// 32 / 8 bits = 4 bytes
pub const BYTES_32_OFFSET: usize = 4;
pub const DEFAULT_OFFSET: usize = 0;

/// Length-prefixed little-endian argument buffer, the encoding smart contracts
/// use for call parameters, return values and event payloads.
///
/// Strings are written as a `u32` length followed by the UTF-8 bytes.
#[derive(Debug, Clone, Default)]
pub struct Args {
    serialized: Vec<u8>,
    offset: usize, // For deserialization
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates Args from existing serialized data, ready for deserialization.
    pub fn from_bytes(serialized: Vec<u8>) -> Self {
        Self {
            serialized,
            offset: DEFAULT_OFFSET,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.serialized
    }

    /// Returns the unread tail of the buffer without advancing.
    pub fn remaining_bytes(&self) -> &[u8] {
        &self.serialized[self.offset..]
    }

    fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        let current_offset = self.offset;
        let end_offset = current_offset.checked_add(len).ok_or_else(|| {
            anyhow!(
                "Offset overflow while trying to read {} bytes from offset {}",
                len,
                current_offset
            )
        })?;

        if end_offset > self.serialized.len() {
            bail!(
                "Not enough bytes to read. Wanted {} bytes from offset {}, but buffer length is {}",
                len,
                current_offset,
                self.serialized.len()
            );
        }

        self.offset = end_offset;
        Ok(&self.serialized[current_offset..end_offset])
    }

    fn next_u32(&mut self) -> Result<u32> {
        self.read_bytes(BYTES_32_OFFSET)?
            .read_u32::<LittleEndian>()
            .context("Failed to read u32")
    }

    fn add_u32(&mut self, value: u32) -> &mut Self {
        self.serialized.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn next_string(&mut self) -> Result<String> {
        let len = self.next_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .with_context(|| format!("Failed to decode UTF-8 string with length {}", len))
    }

    pub fn add_string(&mut self, value: &str) -> Result<&mut Self> {
        let len = u32::try_from(value.len()).with_context(|| {
            format!(
                "Length {} exceeds maximum allowed size {}",
                value.len(),
                u32::MAX
            )
        })?;
        self.add_u32(len);
        self.serialized.extend_from_slice(value.as_bytes());
        Ok(self)
    }
}
