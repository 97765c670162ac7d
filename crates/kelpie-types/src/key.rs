use std::cmp::Ordering;
use std::fmt;

use crate::value::FieldValue;

/// One field of a structured index key.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexField {
    /// Field name. Documentation only: storage strips names before
    /// encoding, and two keys differing only in names are the same key.
    pub name: String,
    /// Field value.
    pub value: FieldValue,
}

/// A structured index key: an ordered sequence of typed field values.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexKey {
    fields: Vec<IndexField>,
}

impl IndexKey {
    /// An empty key (zero fields). Sorts before every non-empty key.
    #[must_use]
    pub fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    /// Build a key from `(name, value)` pairs.
    pub fn from_pairs<N, V, I>(pairs: I) -> Self
    where
        N: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (N, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(name, value)| IndexField {
                    name: name.into(),
                    value: value.into(),
                })
                .collect(),
        }
    }

    /// Build a nameless key from values alone.
    pub fn from_values<V, I>(values: I) -> Self
    where
        V: Into<FieldValue>,
        I: IntoIterator<Item = V>,
    {
        Self {
            fields: values
                .into_iter()
                .map(|value| IndexField {
                    name: String::new(),
                    value: value.into(),
                })
                .collect(),
        }
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the key has zero fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The fields in key order.
    #[must_use]
    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    /// The field values in key order.
    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.fields.iter().map(|f| &f.value)
    }

    /// Whether any field carries a (non-empty) name.
    #[must_use]
    pub fn has_field_names(&self) -> bool {
        self.fields.iter().any(|f| !f.name.is_empty())
    }

    /// A copy of this key with all field names removed.
    #[must_use]
    pub fn strip_field_names(&self) -> Self {
        if !self.has_field_names() {
            return self.clone();
        }
        Self {
            fields: self
                .fields
                .iter()
                .map(|f| IndexField {
                    name: String::new(),
                    value: f.value.clone(),
                })
                .collect(),
        }
    }

    /// Logical comparison under a per-column ordering vector.
    ///
    /// Fields compare pairwise in key order with descending columns
    /// reversed; a shorter key that is a prefix of a longer one sorts
    /// first. This is the order the byte codec preserves.
    #[must_use]
    pub fn cmp_with(&self, other: &Self, ordering: KeyOrdering) -> Ordering {
        for (i, (a, b)) in self.values().zip(other.values()).enumerate() {
            let mut cmp = a.canonical_cmp(b);
            if ordering.is_descending(i) {
                cmp = cmp.reverse();
            }
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        self.len().cmp(&other.len())
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if field.name.is_empty() {
                write!(f, "{}", field.value)?;
            } else {
                write!(f, "{}: {}", field.name, field.value)?;
            }
        }
        write!(f, " }}")
    }
}

/// Per-index, immutable vector of column directions.
///
/// Derived once from the index's key pattern and passed to every codec
/// call. Columns beyond bit 31 are treated as ascending; real key patterns
/// are far shorter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyOrdering {
    descending: u32,
}

impl KeyOrdering {
    /// All columns ascending.
    #[must_use]
    pub const fn ascending() -> Self {
        Self { descending: 0 }
    }

    /// Build from per-column directions: a negative direction means the
    /// column is descending (key patterns use `1` / `-1`).
    #[must_use]
    pub fn from_directions(directions: &[i32]) -> Self {
        let mut descending = 0u32;
        for (i, dir) in directions.iter().take(32).enumerate() {
            if *dir < 0 {
                descending |= 1 << i;
            }
        }
        Self { descending }
    }

    /// Whether column `i` is descending.
    #[must_use]
    pub fn is_descending(self, i: usize) -> bool {
        i < 32 && (self.descending >> i) & 1 == 1
    }
}
