//! Repository name, tag, and space identifier grammar.
//!
//! The grammar follows the OCI distribution spec: repository names are
//! lowercase path segments separated by `/`, tags are short free-form
//! labels, and space identifiers are the tenant path segments in front of
//! the registry name.

use crate::error::{Error, Result};
use std::sync::LazyLock;

static IMAGE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*$",
    )
    .expect("image regex")
});

static TAG_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").expect("tag regex"));

static IDENTIFIER_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").expect("identifier regex")
});

/// Maximum length of a repository name, including slashes.
pub const MAX_IMAGE_NAME_LEN: usize = 255;

/// Maximum length of a space or registry identifier segment.
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Validate a repository (image) name. Nested names like `library/alpine`
/// are allowed.
pub fn validate_image_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_IMAGE_NAME_LEN {
        return Err(Error::InvalidReference(format!(
            "image name length must be 1..={MAX_IMAGE_NAME_LEN}"
        )));
    }
    if !IMAGE_RE.is_match(name) {
        return Err(Error::InvalidReference(format!(
            "malformed image name: {name}"
        )));
    }
    Ok(())
}

/// Validate a tag name.
pub fn validate_tag(tag: &str) -> Result<()> {
    if !TAG_RE.is_match(tag) {
        return Err(Error::InvalidReference(format!("malformed tag: {tag}")));
    }
    Ok(())
}

/// Validate a space or registry identifier segment.
pub fn validate_space_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidReference(format!(
            "identifier length must be 1..={MAX_IDENTIFIER_LEN}"
        )));
    }
    if !IDENTIFIER_RE.is_match(identifier) {
        return Err(Error::InvalidReference(format!(
            "malformed identifier: {identifier}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_names() {
        validate_image_name("alpine").unwrap();
        validate_image_name("library/alpine").unwrap();
        validate_image_name("a/b/c-d_e.f").unwrap();
        validate_image_name("team/app__worker").unwrap();

        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("Alpine").is_err());
        assert!(validate_image_name("/alpine").is_err());
        assert!(validate_image_name("alpine/").is_err());
        assert!(validate_image_name("alpine//busybox").is_err());
        assert!(validate_image_name("-leading").is_err());
        assert!(validate_image_name(&"a/".repeat(200)).is_err());
    }

    #[test]
    fn tags() {
        validate_tag("latest").unwrap();
        validate_tag("v1.2.3").unwrap();
        validate_tag("_internal").unwrap();
        validate_tag(&"a".repeat(128)).unwrap();

        assert!(validate_tag("").is_err());
        assert!(validate_tag(".hidden").is_err());
        assert!(validate_tag("-dash").is_err());
        assert!(validate_tag(&"a".repeat(129)).is_err());
        assert!(validate_tag("with space").is_err());
    }

    #[test]
    fn identifiers() {
        validate_space_identifier("acme").unwrap();
        validate_space_identifier("Acme-Corp.dev_1").unwrap();

        assert!(validate_space_identifier("").is_err());
        assert!(validate_space_identifier("-acme").is_err());
        assert!(validate_space_identifier("acme corp").is_err());
        assert!(validate_space_identifier(&"a".repeat(101)).is_err());
    }
}
