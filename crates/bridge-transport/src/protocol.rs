//! Line-delimited JSON framing for the process boundary.
//!
//! Each envelope is one JSON document followed by `\n`.

use serde::{Serialize, de::DeserializeOwned};

/// Encode a message as a single newline-terminated line.
///
/// # Errors
/// Returns error if the message cannot be serialized.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line; blank lines yield `None`.
///
/// # Errors
/// Returns error if the line is not a valid document of type `T`.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<Option<T>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}
