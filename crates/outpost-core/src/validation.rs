//! # Validation Module
//!
//! Payload validation applied before a local mutation is written.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Entity store (caller)                                        │
//! │  └── Builds the JSON command body                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Required fields, formats, numeric ranges                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Remote API                                                   │
//! │  └── 4xx → ValidationError class → permanently failed operation        │
//! │                                                                         │
//! │  Catching errors in layer 2 keeps doomed operations out of the log.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use outpost_core::validation::validate_client;
//! use serde_json::json;
//!
//! let payload = json!({
//!     "documentNumber": "1020304050",
//!     "documentType": "CC",
//!     "clientType": "person",
//!     "name": "Ana Torres",
//! });
//! assert!(validate_client(&payload).is_ok());
//! ```

use std::collections::HashSet;

use serde_json::Value;

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted entity key.
const MAX_ENTITY_KEY_LEN: usize = 200;

// =============================================================================
// Field Helpers
// =============================================================================

/// Returns the trimmed string at `field`, or `Required` if missing or blank.
fn required_str<'a>(payload: &'a Value, field: &str, max: usize) -> ValidationResult<&'a str> {
    let value = payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(value)
}

/// Returns the positive integer id at `field`.
fn required_id(payload: &Value, field: &str) -> ValidationResult<i64> {
    match payload.get(field) {
        None | Some(Value::Null) => Err(ValidationError::Required {
            field: field.to_string(),
        }),
        Some(value) => match value.as_i64() {
            Some(id) if id > 0 => Ok(id),
            Some(_) => Err(ValidationError::MustBePositive {
                field: field.to_string(),
            }),
            None => Err(ValidationError::InvalidFormat {
                field: field.to_string(),
                reason: "must be an integer".to_string(),
            }),
        },
    }
}

/// Validates a non-negative price at `field`.
fn required_price(payload: &Value, field: &str) -> ValidationResult<f64> {
    let price = payload
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| ValidationError::Required {
            field: field.to_string(),
        })?;

    if price < 0.0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    Ok(price)
}

// =============================================================================
// Keys
// =============================================================================

/// Validates an operation entity key.
///
/// ## Rules
/// - Must not be empty
/// - At most 200 characters
pub fn validate_entity_key(key: &str) -> ValidationResult<()> {
    let key = key.trim();

    if key.is_empty() {
        return Err(ValidationError::Required {
            field: "entityKey".to_string(),
        });
    }

    if key.len() > MAX_ENTITY_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "entityKey".to_string(),
            max: MAX_ENTITY_KEY_LEN,
        });
    }

    Ok(())
}

/// Validates a document number.
///
/// ## Rules
/// - Must not be empty
/// - At most 20 characters
/// - Letters, digits and hyphens only
///
/// ## Example
/// ```rust
/// use outpost_core::validation::validate_document_number;
///
/// assert!(validate_document_number("900123456-7").is_ok());
/// assert!(validate_document_number("").is_err());
/// assert!(validate_document_number("12 34").is_err());
/// ```
pub fn validate_document_number(number: &str) -> ValidationResult<()> {
    let number = number.trim();

    if number.is_empty() {
        return Err(ValidationError::Required {
            field: "documentNumber".to_string(),
        });
    }

    if number.len() > 20 {
        return Err(ValidationError::TooLong {
            field: "documentNumber".to_string(),
            max: 20,
        });
    }

    if !number.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ValidationError::InvalidFormat {
            field: "documentNumber".to_string(),
            reason: "must contain only letters, digits and hyphens".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Payload Validators
// =============================================================================

/// Validates a client create/update body.
///
/// ## Rules
/// - `documentNumber` valid per [`validate_document_number`]
/// - `documentType` and `clientType` present
/// - `name` present, at most 200 characters
pub fn validate_client(payload: &Value) -> ValidationResult<()> {
    let number = required_str(payload, "documentNumber", 20)?;
    validate_document_number(number)?;
    required_str(payload, "documentType", 20)?;
    required_str(payload, "clientType", 20)?;
    required_str(payload, "name", 200)?;
    Ok(())
}

/// Validates a price list header, and its lines when present.
///
/// ## Rules
/// - `name` present, at most 200 characters
/// - each line valid per [`validate_price_line`]
/// - no product appears twice
pub fn validate_price_list(payload: &Value) -> ValidationResult<()> {
    required_str(payload, "name", 200)?;

    if let Some(lines) = payload.get("lines").and_then(Value::as_array) {
        let mut seen = HashSet::new();
        for line in lines {
            validate_price_line(line)?;
            let product_id = required_id(line, "productId")?;
            if !seen.insert(product_id) {
                return Err(ValidationError::Duplicate {
                    field: "productId".to_string(),
                    value: product_id.to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Validates a single price list line.
///
/// ## Rules
/// - `productId` positive integer
/// - `price` present and not negative
pub fn validate_price_line(payload: &Value) -> ValidationResult<()> {
    required_id(payload, "productId")?;
    required_price(payload, "price")?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_entity_key() {
        assert!(validate_entity_key("U1").is_ok());
        assert!(validate_entity_key("  ").is_err());
        assert!(validate_entity_key(&"k".repeat(201)).is_err());
    }

    #[test]
    fn test_validate_document_number() {
        assert!(validate_document_number("1020304050").is_ok());
        assert!(validate_document_number("900123456-7").is_ok());
        assert!(validate_document_number("").is_err());
        assert!(validate_document_number(&"9".repeat(21)).is_err());
        assert!(validate_document_number("10.20").is_err());
    }

    #[test]
    fn test_validate_client() {
        let valid = json!({
            "documentNumber": "1020304050",
            "documentType": "CC",
            "clientType": "person",
            "name": "Ana Torres",
        });
        assert!(validate_client(&valid).is_ok());

        let missing_name = json!({
            "documentNumber": "1020304050",
            "documentType": "CC",
            "clientType": "person",
        });
        assert!(matches!(
            validate_client(&missing_name),
            Err(ValidationError::Required { field }) if field == "name"
        ));
    }

    #[test]
    fn test_validate_price_list() {
        let valid = json!({
            "name": "Retail 2024",
            "lines": [
                { "productId": 7, "price": 1500.0 },
                { "productId": 8, "price": 0 },
            ],
        });
        assert!(validate_price_list(&valid).is_ok());

        let duplicate = json!({
            "name": "Retail 2024",
            "lines": [
                { "productId": 7, "price": 1500.0 },
                { "productId": 7, "price": 1200.0 },
            ],
        });
        assert!(matches!(
            validate_price_list(&duplicate),
            Err(ValidationError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_validate_price_line() {
        assert!(validate_price_line(&json!({ "productId": 3, "price": 10.5 })).is_ok());
        assert!(matches!(
            validate_price_line(&json!({ "productId": 3, "price": -1 })),
            Err(ValidationError::MustNotBeNegative { .. })
        ));
        assert!(matches!(
            validate_price_line(&json!({ "productId": 0, "price": 1 })),
            Err(ValidationError::MustBePositive { .. })
        ));
        assert!(matches!(
            validate_price_line(&json!({ "productId": "x", "price": 1 })),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }
}
