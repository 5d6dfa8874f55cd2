//! Input validation for ttlfw
//!
//! Rule text is opaque to ttlfw: it is never parsed as firewall grammar. The
//! checks here only protect the ledger format (one record per line) and keep
//! obviously broken input away from the enforcer.

/// Upper bound on stored rule text, in bytes.
pub const MAX_RULE_LEN: usize = 1024;

/// Validates operator-supplied rule text and returns it trimmed.
///
/// # Examples
///
/// ```
/// use ttlfw::validators::validate_rule_text;
///
/// assert_eq!(validate_rule_text("  allow from 10.0.0.1 ").unwrap(), "allow from 10.0.0.1");
/// assert!(validate_rule_text("allow\nfrom 10.0.0.1").is_err());
/// assert!(validate_rule_text("   ").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` if:
/// - The text is empty after trimming
/// - The text contains a newline or any other control character
/// - The text exceeds [`MAX_RULE_LEN`] bytes
pub fn validate_rule_text(input: &str) -> Result<&str, String> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err("Rule cannot be empty".to_string());
    }

    if trimmed.contains(['\n', '\r']) {
        return Err("Rule cannot span multiple lines".to_string());
    }

    // Tabs are ordinary whitespace for the enforcer's argument splitting
    if trimmed.chars().any(|c| c.is_control() && c != '\t') {
        return Err("Rule contains control characters".to_string());
    }

    if trimmed.len() > MAX_RULE_LEN {
        return Err(format!("Rule too long (max {MAX_RULE_LEN} bytes)"));
    }

    Ok(trimmed)
}

/// Validates an insertion position (1-based, as the enforcer numbers rules).
///
/// # Errors
///
/// Returns `Err` if position is 0.
pub fn validate_position(position: u32) -> Result<u32, String> {
    if position == 0 {
        Err("Position must be 1 or greater".to_string())
    } else {
        Ok(position)
    }
}
