//! Image reference parsing.
//!
//! Only the split the engine needs: repository, optional tag and optional
//! digest.  A colon belongs to the tag only when it follows the last path
//! separator, so `host:5000/team/app` has no tag.

use std::fmt;

/// Prefix of content-addressed image references.
pub const CONTENT_ADDRESS_PREFIX: &str = "sha256:";

/// Tag probed when a reference carries none.
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Self {
        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (reference, None),
        };

        let slash = name.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match name[slash..].rfind(':') {
            Some(i) => {
                let colon = slash + i;
                (&name[..colon], Some(name[colon + 1..].to_string()))
            }
            None => (name, None),
        };

        Self {
            repository: repository.to_string(),
            tag: tag.filter(|t| !t.is_empty()),
            digest,
        }
    }

    /// The tag this reference pins, or `latest`.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Whether `reference` is a bare content address rather than a tag.
pub fn is_content_address(reference: &str) -> bool {
    reference.starts_with(CONTENT_ADDRESS_PREFIX)
}
