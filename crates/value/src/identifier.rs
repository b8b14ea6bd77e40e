pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Charset for tenant ids and table names. Deliberately excludes `.`, the
/// default prefix delimiter, so encoded physical values stay unambiguous.
pub fn check_valid_identifier(s: &str) -> anyhow::Result<()> {
    if s.is_empty() {
        anyhow::bail!("Identifier cannot be empty.");
    }
    if s.len() > MAX_IDENTIFIER_LEN {
        anyhow::bail!(
            "Identifier is too long ({} > maximum {}).",
            s.len(),
            MAX_IDENTIFIER_LEN
        );
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        anyhow::bail!(
            "Identifier {s} can only contain ASCII letters, numbers, underscores, or dashes."
        );
    }
    if !s.chars().any(|c| c.is_ascii_alphanumeric()) {
        anyhow::bail!("Identifier {s} must have at least one alphanumeric character.");
    }
    Ok(())
}

#[cfg(any(test, feature = "testing"))]
pub mod arbitrary_regexes {
    pub const IDENTIFIER_REGEX: &str = "[a-zA-Z][a-zA-Z0-9_-]{0,30}";
}

#[cfg(test)]
mod tests {
    use super::check_valid_identifier;

    #[test]
    fn identifier_valid() {
        assert!(check_valid_identifier("ctx1").is_ok());
        assert!(check_valid_identifier("table_1").is_ok());
        assert!(check_valid_identifier("org-acme").is_ok());
    }

    #[test]
    fn identifier_invalid() {
        assert!(check_valid_identifier("").is_err());
        assert!(check_valid_identifier("a.b").is_err());
        assert!(check_valid_identifier("with space").is_err());
        assert!(check_valid_identifier("___").is_err());
        assert!(check_valid_identifier("sujays_edgè_cäsê").is_err());
    }
}
