use anyhow::{Context, Result};

use super::args::Args;

// Serialize a list of strings as consecutive length-prefixed Args entries
pub fn strings_to_args(values: &[&str]) -> Result<Vec<u8>> {
    let mut args = Args::new();
    for value in values {
        args.add_string(value)?;
    }
    Ok(args.into_bytes())
}

// Decode a string returned by a read-only call. An empty result means the
// contract returned nothing for the key.
pub fn args_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() {
        return Ok(String::new());
    }

    Args::from_bytes(bytes.to_vec())
        .next_string()
        .context("Failed to decode string result")
}
