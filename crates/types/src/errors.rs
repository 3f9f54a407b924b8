use thiserror::Error;

// ============================================================================
// Main Error Enum
// ============================================================================

/// Error enum shared by the protocol crates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // ========================================================================
    // Math Errors
    // ========================================================================

    /// Arithmetic overflow occurred
    #[error("Math overflow in '{operation}' with values: {values:?}")]
    MathOverflow { operation: String, values: Vec<String> },

    /// Arithmetic underflow occurred
    #[error("Math underflow in '{operation}' with values: {values:?}")]
    MathUnderflow { operation: String, values: Vec<String> },

    /// Division by zero
    #[error("Division by zero in context: {context}")]
    DivisionByZero { context: String },

    // ========================================================================
    // Validation Errors
    // ========================================================================

    /// Invalid parameter
    #[error("Invalid parameter '{parameter}': got '{value}', expected '{expected}'")]
    InvalidParameter { parameter: String, value: String, expected: String },

    // ========================================================================
    // Account Errors
    // ========================================================================

    /// Account data does not start with the expected discriminator
    #[error("Invalid discriminator for {account}: expected {expected:?}, got {actual:?}")]
    InvalidDiscriminator { account: String, expected: [u8; 8], actual: [u8; 8] },

    /// Account data could not be decoded
    #[error("Failed to decode {account}: {reason}")]
    DecodeFailed { account: String, reason: String },

    // ========================================================================
    // General Errors
    // ========================================================================

    /// Generic error with optional context
    #[error("Error: {message}")]
    Generic { message: String, context: Option<String> },
}

impl ProtocolError {
    /// Create a math overflow error with context
    pub fn math_overflow(operation: &str, values: &[&str]) -> Self {
        Self::MathOverflow {
            operation: operation.to_string(),
            values: values.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Create a math underflow error with context
    pub fn math_underflow(operation: &str, values: &[&str]) -> Self {
        Self::MathUnderflow {
            operation: operation.to_string(),
            values: values.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: &str, value: &str, expected: &str) -> Self {
        Self::InvalidParameter {
            parameter: parameter.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Create a decode error for the named account type
    pub fn decode_failed(account: &str, reason: &str) -> Self {
        Self::DecodeFailed {
            account: account.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a generic error
    pub fn generic(message: &str) -> Self {
        Self::Generic {
            message: message.to_string(),
            context: None,
        }
    }

    /// Create a parse error
    pub fn parse_error(message: &str, context: Option<&str>) -> Self {
        Self::Generic {
            message: format!("Parse error: {}", message),
            context: context.map(|s| s.to_string()),
        }
    }
}
