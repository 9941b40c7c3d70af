//! Positional record store: ids, texts and metadata kept in lockstep.

use studyvault_core::{AppError, AppResult};

use crate::types::{Metadata, SearchHit, StoredDocument};

/// Borrowed view of one stored record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordRef<'a> {
    pub position: usize,
    pub id: &'a str,
    pub text: &'a str,
    pub metadata: &'a Metadata,
}

impl RecordRef<'_> {
    pub fn to_hit(&self, score: f32) -> SearchHit {
        SearchHit {
            id: self.id.to_string(),
            text: self.text.to_string(),
            metadata: self.metadata.clone(),
            score,
        }
    }

    pub fn to_document(&self) -> StoredDocument {
        StoredDocument {
            id: self.id.to_string(),
            text: self.text.to_string(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Append-only column store addressed by position.
///
/// `ids`, `texts` and `metadatas` always have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStore {
    ids: Vec<String>,
    texts: Vec<String>,
    metadatas: Vec<Metadata>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a store from columns of equal length.
    pub fn from_parts(
        ids: Vec<String>,
        texts: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> AppResult<Self> {
        if ids.len() != texts.len() || texts.len() != metadatas.len() {
            return Err(AppError::Persistence(format!(
                "Record columns disagree: {} ids, {} texts, {} metadatas",
                ids.len(),
                texts.len(),
                metadatas.len()
            )));
        }
        Ok(Self {
            ids,
            texts,
            metadatas,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn push(&mut self, id: String, text: String, metadata: Metadata) {
        self.ids.push(id);
        self.texts.push(text);
        self.metadatas.push(metadata);
    }

    /// Drop every record at position `len` or beyond.
    pub fn truncate(&mut self, len: usize) {
        self.ids.truncate(len);
        self.texts.truncate(len);
        self.metadatas.truncate(len);
    }

    pub fn get(&self, position: usize) -> Option<RecordRef<'_>> {
        Some(RecordRef {
            position,
            id: self.ids.get(position)?,
            text: self.texts.get(position)?,
            metadata: self.metadatas.get(position)?,
        })
    }

    pub fn metadata(&self, position: usize) -> Option<&Metadata> {
        self.metadatas.get(position)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn metadatas(&self) -> &[Metadata] {
        &self.metadatas
    }

    /// Iterate records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = RecordRef<'_>> {
        (0..self.len()).filter_map(move |position| self.get(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetadataValue;

    #[test]
    fn test_push_get_truncate() {
        let mut store = RecordStore::new();
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), MetadataValue::from("a.pdf"));

        store.push("c0".into(), "zero".into(), meta.clone());
        store.push("c1".into(), "one".into(), Metadata::new());

        assert_eq!(store.len(), 2);
        let record = store.get(0).unwrap();
        assert_eq!(record.id, "c0");
        assert_eq!(record.metadata, &meta);
        assert!(store.get(2).is_none());

        store.truncate(1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.iter().count(), 1);
    }

    #[test]
    fn test_from_parts_rejects_uneven_columns() {
        let result = RecordStore::from_parts(
            vec!["a".into()],
            vec!["a".into(), "b".into()],
            vec![Metadata::new()],
        );
        assert!(matches!(result, Err(AppError::Persistence(_))));
    }
}
