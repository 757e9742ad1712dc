//! CLI output discipline.
//!
//! The JSON envelope goes to stdout, verbatim; human-readable summaries go
//! to stderr. Exit codes follow the error taxonomy: 0 success,
//! 2 validation, 3 illegal transition, 4 store, 5 verification, 1 other.

use console::style;
use serde::Serialize;

use crate::types::{Result, envelope};

/// Print the envelope for an operation result and return the exit code.
pub fn emit<T: Serialize>(operation: &str, result: &Result<T>) -> u8 {
    let envelope = envelope::from_result(result);
    println!("{}", envelope);

    match result {
        Ok(_) => {
            eprintln!("{} {}", style("ok").green().bold(), style(operation).dim());
            0
        }
        Err(err) => {
            eprintln!(
                "{} {} {}",
                style("error").red().bold(),
                style(err.kind().as_str()).red(),
                err
            );
            if let Some(suggestion) = err.suggestion() {
                eprintln!("  {}", style(suggestion).yellow());
            }
            let recovery = err.recovery_commands();
            if !recovery.is_empty() {
                eprintln!("  {} {}", style("try:").dim(), recovery.join(", "));
            }
            err.kind().exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmpiricaError;

    #[test]
    fn test_exit_codes_follow_taxonomy() {
        let ok: Result<serde_json::Value> = Ok(serde_json::json!({"x": 1}));
        assert_eq!(emit("demo", &ok), 0);

        let invalid: Result<serde_json::Value> =
            Err(EmpiricaError::invalid_input("bad"));
        assert_eq!(emit("demo", &invalid), 2);

        let illegal: Result<serde_json::Value> = Err(EmpiricaError::IllegalTransition {
            current: "NEW".to_string(),
            attempted: "x".to_string(),
            expected: vec![],
        });
        assert_eq!(emit("demo", &illegal), 3);

        let store: Result<serde_json::Value> =
            Err(EmpiricaError::Storage("disk".to_string()));
        assert_eq!(emit("demo", &store), 4);

        let verify: Result<serde_json::Value> =
            Err(EmpiricaError::verification_failed("sig"));
        assert_eq!(emit("demo", &verify), 5);

        let other: Result<serde_json::Value> =
            Err(EmpiricaError::session_not_found("x"));
        assert_eq!(emit("demo", &other), 1);
    }
}
