//! Container image references
//!
//! Push and deploy must always target the same artifact, so a run resolves
//! its image reference exactly once and every step renders it from there.

use serde::{Deserialize, Serialize};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// The tag registries assume when none is given
pub const DEFAULT_TAG: &str = "latest";

/// A parsed `[registry/]repository[:tag][@digest]` reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host (with optional port), if one was spelled out
    pub registry: Option<String>,

    /// Repository path, e.g. `team/service`
    pub repository: String,

    /// Tag, if any
    pub tag: Option<String>,

    /// Content digest, e.g. `sha256:...`
    pub digest: Option<String>,
}

/// Why a reference could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageReferenceError {
    #[error("reference is empty")]
    Empty,

    #[error("invalid repository `{0}`")]
    InvalidRepository(String),

    #[error("invalid tag `{0}`")]
    InvalidTag(String),

    #[error("invalid digest `{0}`")]
    InvalidDigest(String),
}

fn repository_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
            .expect("repository pattern is valid")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag pattern is valid"))
}

fn digest_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sha256:[a-f0-9]{64}$").expect("digest pattern is valid"))
}

impl ImageReference {
    /// Build a reference from a repository (which may carry a registry) and a tag
    pub fn with_tag(repository: &str, tag: &str) -> Result<Self, ImageReferenceError> {
        let mut reference: ImageReference = repository.parse()?;
        if !tag_regex().is_match(tag) {
            return Err(ImageReferenceError::InvalidTag(tag.to_string()));
        }
        reference.tag = Some(tag.to_string());
        Ok(reference)
    }

    /// Whether pushing this reference twice can point it at different content
    ///
    /// A digest always pins the content. Without one, an absent tag or the
    /// `latest` tag is treated as mutable.
    pub fn is_mutable(&self) -> bool {
        if self.digest.is_some() {
            return false;
        }
        match self.tag.as_deref() {
            None | Some(DEFAULT_TAG) => true,
            Some(_) => false,
        }
    }

    /// Registry host used for `docker login`, if the reference names one
    pub fn registry_host(&self) -> Option<&str> {
        self.registry.as_deref()
    }
}

impl FromStr for ImageReference {
    type Err = ImageReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ImageReferenceError::Empty);
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                if !digest_regex().is_match(digest) {
                    return Err(ImageReferenceError::InvalidDigest(digest.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // A colon after the last slash separates the tag; one before it is a registry port
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name[split + 1..];
                if !tag_regex().is_match(tag) {
                    return Err(ImageReferenceError::InvalidTag(tag.to_string()));
                }
                (&name[..split], Some(tag.to_string()))
            }
            None => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest)
            }
            _ => (None, name),
        };

        if !repository_regex().is_match(repository) {
            return Err(ImageReferenceError::InvalidRepository(repository.to_string()));
        }

        Ok(ImageReference {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
