use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

use crate::{EditorError, Result};

/// Fixed bytes expected at a known offset, used to tell apart builds that
/// share a file size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

impl Signature {
    pub fn matches(&self, data: &[u8]) -> bool {
        let end = match self.offset.checked_add(self.bytes.len()) {
            Some(end) => end,
            None => return false,
        };
        data.get(self.offset..end) == Some(self.bytes.as_slice())
    }
}

/// One known build of the executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub tag: String,
    pub size: usize,
    #[serde(default)]
    pub signature: Option<Signature>,
    /// Catalog column holding this build's offsets.
    pub address_column: String,
}

impl Variant {
    pub fn new(tag: &str, size: usize, address_column: &str) -> Self {
        Self {
            tag: tag.to_string(),
            size,
            signature: None,
            address_column: address_column.to_string(),
        }
    }

    pub fn with_signature(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.signature = Some(Signature {
            offset,
            bytes: bytes.to_vec(),
        });
        self
    }
}

// (tag, file size, address column)
const BUILTIN_VARIANTS: &[(&str, usize, &str)] = &[
    ("dos100", 1_142_371, "DOS address"),
    ("dos102", 1_142_387, "DOS address"),
    ("rend102", 1_247_899, "Rendition address"),
    ("windy101", 1_916_928, "Windy address"),
    ("rend32A", 1_109_095, "Rendition DOS32A"),
];

/// Keyed set of supported builds.
#[derive(Debug, Clone, Default)]
pub struct VariantRegistry {
    variants: BTreeMap<String, Variant>,
}

impl VariantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shipped executables.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for &(tag, size, column) in BUILTIN_VARIANTS {
            registry.insert(Variant::new(tag, size, column));
        }
        registry
    }

    /// Add or replace a variant, keyed by its tag.
    pub fn insert(&mut self, variant: Variant) -> Option<Variant> {
        self.variants.insert(variant.tag.clone(), variant)
    }

    /// Read a JSON array of variants and add them to the registry.
    pub fn extend_from_json<R: Read>(&mut self, reader: R) -> Result<usize> {
        let extra: Vec<Variant> = serde_json::from_reader(reader)?;
        let count = extra.len();
        for variant in extra {
            tracing::debug!(tag = %variant.tag, size = variant.size, "registered variant");
            self.insert(variant);
        }
        Ok(count)
    }

    pub fn get(&self, tag: &str) -> Option<&Variant> {
        self.variants.get(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variant> {
        self.variants.values()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Classify raw file bytes. Sizes must match exactly; a declared
    /// signature must match too. Anything other than a single survivor is
    /// rejected.
    pub fn identify(&self, data: &[u8]) -> Result<&Variant> {
        let mut found: Option<&Variant> = None;

        for candidate in self.variants.values().filter(|v| v.size == data.len()) {
            let accepted = candidate
                .signature
                .as_ref()
                .map_or(true, |sig| sig.matches(data));
            if !accepted {
                continue;
            }
            if let Some(previous) = found {
                tracing::warn!(
                    first = %previous.tag,
                    second = %candidate.tag,
                    size = data.len(),
                    "ambiguous executable version"
                );
                return Err(EditorError::UnrecognizedVariant { size: data.len() });
            }
            found = Some(candidate);
        }

        found.ok_or(EditorError::UnrecognizedVariant { size: data.len() })
    }
}
