use std::collections::BTreeMap;

/// Metadata type key stamped on invoices issued by this crate.
pub const ENTITY_TYPE_KEY: &str = "entity";

/// Startup-time registry of invoice metadata types. Embedders that issue
/// their own invoice flavors register a key here so listings include them.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<String, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut types = BTreeMap::new();
        types.insert(ENTITY_TYPE_KEY.to_string(), "Content entity".to_string());
        Self { types }
    }

    pub fn register(&mut self, key: impl Into<String>, label: impl Into<String>) {
        self.types.insert(key.into(), label.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.types.contains_key(key)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.types.get(key).map(String::as_str)
    }

    pub fn types(&self) -> &BTreeMap<String, String> {
        &self.types
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
