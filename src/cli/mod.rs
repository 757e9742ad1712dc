//! CLI front-end: thin argument parsing and JSON framing over the core API.

pub mod commands;
pub mod output;

use std::io::Read;

use serde_json::Value;

use crate::types::{EmpiricaError, Result};

/// Materialise a request payload from an argument or stdin.
///
/// `None` or `"-"` reads stdin, matching the subprocess boundary contract:
/// JSON in on stdin, JSON out on stdout, summaries on stderr.
pub fn read_payload(arg: Option<&str>) -> Result<Value> {
    let raw = match arg {
        Some(inline) if inline != "-" => inline.to_string(),
        _ => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(EmpiricaError::Io)?;
            buffer
        }
    };
    if raw.trim().is_empty() {
        return Err(EmpiricaError::invalid_input("empty request payload"));
    }
    serde_json::from_str(&raw)
        .map_err(|e| EmpiricaError::invalid_input(format!("malformed JSON payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_payload() {
        let value = read_payload(Some("{\"know\": 0.5}")).expect("parse");
        assert_eq!(value["know"], 0.5);
    }

    #[test]
    fn test_malformed_payload_is_invalid_input() {
        let err = read_payload(Some("{nope")).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::InvalidInput);
    }
}
