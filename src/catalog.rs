//! Capability catalog: which source formats convert to which targets.
//!
//! The remote API publishes a mapping from a MIME-like source key to a
//! descriptor carrying the file extension and the ordered list of target
//! formats. [`CapabilityCatalog`] fetches it at most once per process and
//! caches it in durable storage so the next start skips the fetch.
//!
//! Key order matters: lookups return the *first* key that satisfies a rule,
//! so [`Catalog`] keeps entries in the order the API sent them.

use crate::job::FilePayload;
use crate::pipeline::api::CatalogSource;
use crate::storage::{keys, load_json, save_json, KeyValueStore};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// One catalog entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// File extension for this format, without the dot.
    #[serde(default)]
    pub extension: String,
    /// Formats this one can be converted to, in display order.
    #[serde(default, alias = "targetable_mimetypes")]
    pub targetable_formats: Vec<String>,
}

/// Ordered mapping of source format → descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<(String, FormatDescriptor)>,
}

/// Extensions for formats the catalog may not describe itself.
const KNOWN_EXTENSIONS: &[(&str, &str)] = &[
    ("text/plain", "txt"),
    ("application/pdf", "pdf"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/msword", "doc"),
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
];

/// Output formats offered by the OCR workflow, in display order.
pub const OCR_OUTPUT_FORMATS: &[&str] = &[
    "text/plain",
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
];

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. A repeated key replaces the earlier descriptor in place.
    pub fn insert(&mut self, key: impl Into<String>, descriptor: FormatDescriptor) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, d)) => *d = descriptor,
            None => self.entries.push((key, descriptor)),
        }
    }

    /// Builder-style helper used mostly in tests.
    pub fn with(mut self, key: &str, extension: &str, targets: &[&str]) -> Self {
        self.insert(
            key,
            FormatDescriptor {
                extension: extension.to_string(),
                targetable_formats: targets.iter().map(|t| t.to_string()).collect(),
            },
        );
        self
    }

    pub fn get(&self, key: &str) -> Option<&FormatDescriptor> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, d)| d)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatDescriptor)> {
        self.entries.iter().map(|(k, d)| (k.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve which catalog key describes `file`.
    ///
    /// Browsers do not always report a MIME type, and files read from disk
    /// carry none, so three rules are tried in order:
    ///
    /// 1. the declared MIME type is itself a key;
    /// 2. the file extension equals the segment after the key's last `/`
    ///    (case-insensitive);
    /// 3. the file extension occurs anywhere in the key (case-insensitive).
    ///
    /// Rules 2 and 3 are skipped when the extension is empty.
    pub fn lookup_source_format(&self, file: &FilePayload) -> Option<&str> {
        if !file.mime_type.is_empty() && self.get(&file.mime_type).is_some() {
            return self.keys().find(|k| *k == file.mime_type.as_str());
        }

        let ext = file.extension().to_lowercase();
        if ext.is_empty() {
            return None;
        }

        self.keys()
            .find(|k| k.to_lowercase().rsplit('/').next() == Some(ext.as_str()))
            .or_else(|| self.keys().find(|k| k.to_lowercase().contains(&ext)))
    }

    /// Targets for a resolved source key, or empty when unresolved.
    pub fn targets_for(&self, source: Option<&str>) -> &[String] {
        source
            .and_then(|s| self.get(s))
            .map(|d| d.targetable_formats.as_slice())
            .unwrap_or(&[])
    }

    /// File extension for `format`: the catalog's own descriptor first, then
    /// a small built-in table, then the MIME subtype.
    pub fn extension_for(&self, format: &str) -> String {
        if let Some(d) = self.get(format) {
            if !d.extension.is_empty() {
                return d.extension.trim_start_matches('.').to_string();
            }
        }
        extension_for_format(format)
    }
}

/// Catalog-independent extension lookup.
pub fn extension_for_format(format: &str) -> String {
    if let Some((_, ext)) = KNOWN_EXTENSIONS.iter().find(|(f, _)| *f == format) {
        return ext.to_string();
    }
    let subtype = format.rsplit('/').next().unwrap_or(format);
    let subtype = subtype.rsplit(['.', '+']).next().unwrap_or(subtype);
    subtype.trim_start_matches("x-").to_lowercase()
}

impl Serialize for Catalog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, d) in &self.entries {
            map.serialize_entry(k, d)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Catalog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CatalogVisitor;

        impl<'de> Visitor<'de> for CatalogVisitor {
            type Value = Catalog;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of source format to descriptor")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Catalog, A::Error> {
                let mut catalog = Catalog::new();
                while let Some((k, d)) = access.next_entry::<String, FormatDescriptor>()? {
                    catalog.insert(k, d);
                }
                Ok(catalog)
            }
        }

        deserializer.deserialize_map(CatalogVisitor)
    }
}

// ── CapabilityCatalog ────────────────────────────────────────────────────

/// Process-lifetime catalog, loaded lazily and at most once.
pub struct CapabilityCatalog {
    source: Option<Arc<dyn CatalogSource>>,
    store: Option<Arc<dyn KeyValueStore>>,
    cell: OnceCell<Catalog>,
}

impl CapabilityCatalog {
    /// A catalog fetched from `source`, cached in `store` when given.
    pub fn new(source: Arc<dyn CatalogSource>, store: Option<Arc<dyn KeyValueStore>>) -> Self {
        Self {
            source: Some(source),
            store,
            cell: OnceCell::new(),
        }
    }

    /// A catalog with fixed contents; `load` never fetches.
    pub fn fixed(catalog: Catalog) -> Self {
        Self {
            source: None,
            store: None,
            cell: OnceCell::new_with(Some(catalog)),
        }
    }

    /// Load the catalog.
    ///
    /// Uses the cached copy in storage when present and non-empty; otherwise
    /// fetches from the API. Concurrent callers share one in-flight fetch.
    /// A failed fetch leaves the catalog empty for the rest of the process
    /// and is only logged: conversions then simply offer no targets.
    pub async fn load(&self) -> &Catalog {
        self.cell.get_or_init(|| self.load_uncached()).await
    }

    async fn load_uncached(&self) -> Catalog {
        if let Some(ref store) = self.store {
            match load_json::<Catalog>(&**store, keys::SUPPORTED_CONVERSIONS).await {
                Ok(Some(cached)) if !cached.is_empty() => {
                    debug!("Catalog: using cached copy ({} formats)", cached.len());
                    return cached;
                }
                Ok(_) => {}
                Err(e) => warn!("Catalog: ignoring unreadable cache: {}", e),
            }
        }

        let Some(ref source) = self.source else {
            return Catalog::new();
        };

        match source.fetch_supported_conversions().await {
            Ok(catalog) => {
                info!("Catalog: fetched {} source formats", catalog.len());
                if let Some(ref store) = self.store {
                    if !catalog.is_empty() {
                        if let Err(e) = save_json(&**store, keys::SUPPORTED_CONVERSIONS, &catalog).await {
                            warn!("Catalog: failed to cache: {}", e);
                        }
                    }
                }
                catalog
            }
            Err(e) => {
                warn!("Catalog: fetch failed, continuing with no formats: {}", e);
                Catalog::new()
            }
        }
    }
}
