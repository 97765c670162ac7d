use kelpie_types::KeyOrdering;

/// Everything the adapter needs to know about one index: its key pattern,
/// identity, and optional per-index engine options.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct IndexDescriptor {
    /// Index name, e.g. `x_1`.
    pub name: String,
    /// Namespace of the owning collection, e.g. `db.coll`.
    pub namespace: String,
    /// Column names with directions (`1` ascending, `-1` descending), in
    /// key order.
    pub key_pattern: Vec<(String, i32)>,
    /// Whether this index enforces uniqueness.
    pub unique: bool,
    /// Optional `storageEngine` options document. The adapter reads only
    /// its own subdocument (see [`crate::STORAGE_ENGINE_NAME`]).
    pub storage_engine: Option<serde_json::Value>,
}

impl IndexDescriptor {
    /// Minimal descriptor with an ascending key pattern and no options.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        key_pattern: Vec<(String, i32)>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            key_pattern,
            unique: false,
            storage_engine: None,
        }
    }

    /// Mark the descriptor unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Attach a `storageEngine` options document.
    #[must_use]
    pub fn with_storage_engine(mut self, options: serde_json::Value) -> Self {
        self.storage_engine = Some(options);
        self
    }

    /// The column-direction vector derived from the key pattern.
    #[must_use]
    pub fn ordering(&self) -> KeyOrdering {
        let directions: Vec<i32> = self.key_pattern.iter().map(|(_, d)| *d).collect();
        KeyOrdering::from_directions(&directions)
    }

    /// The info document persisted in the table's app metadata.
    #[must_use]
    pub fn info_document(&self) -> serde_json::Value {
        let mut key = serde_json::Map::new();
        for (name, dir) in &self.key_pattern {
            key.insert(name.clone(), serde_json::Value::from(*dir));
        }
        serde_json::json!({
            "name": self.name,
            "ns": self.namespace,
            "key": key,
            "unique": self.unique,
        })
    }
}
