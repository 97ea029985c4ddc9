//! Identifier quoting and literal escaping.
//!
//! Any value the compiler embeds as a literal rather than a bound parameter
//! goes through these helpers: embedded quote characters are doubled and
//! control characters are rejected outright. Naive concatenation is the defect
//! class this module exists to close: a value containing a quote must match
//! exactly that literal value without altering query structure.

use crate::error::CompileError;
use serde_json::Value as JsonValue;

/// Maximum accepted identifier length.
const MAX_IDENT_LEN: usize = 128;

/// Quotes an identifier for safe embedding, doubling embedded double quotes.
///
/// # Errors
/// Rejects empty identifiers, identifiers longer than 128 characters, and
/// identifiers containing control characters.
pub fn quote_ident(name: &str) -> std::result::Result<String, CompileError> {
    if name.is_empty() {
        return Err(CompileError::UnsafeLiteral {
            message: "empty identifier".to_string(),
        });
    }
    if name.len() > MAX_IDENT_LEN {
        return Err(CompileError::UnsafeLiteral {
            message: format!("identifier too long: {} characters", name.len()),
        });
    }
    if name.chars().any(char::is_control) {
        return Err(CompileError::UnsafeLiteral {
            message: format!("control character in identifier '{}'", name.escape_debug()),
        });
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Escapes a scalar JSON value as a SQL literal.
///
/// Strings get single-quote doubling; numbers and booleans render natively;
/// null renders as NULL.
///
/// # Errors
/// Rejects strings containing control characters, non-finite floats, and
/// non-scalar values (arrays, objects).
pub fn escape_literal(value: &JsonValue) -> std::result::Result<String, CompileError> {
    match value {
        JsonValue::Null => Ok("NULL".to_string()),
        JsonValue::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        JsonValue::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CompileError::UnsafeLiteral {
                        message: "non-finite numeric literal".to_string(),
                    });
                }
            }
            Ok(n.to_string())
        }
        JsonValue::String(s) => {
            if s.chars().any(char::is_control) {
                return Err(CompileError::UnsafeLiteral {
                    message: format!("control character in literal '{}'", s.escape_debug()),
                });
            }
            Ok(format!("'{}'", s.replace('\'', "''")))
        }
        JsonValue::Array(_) | JsonValue::Object(_) => Err(CompileError::UnsafeLiteral {
            message: "non-scalar literal value".to_string(),
        }),
    }
}
