//! Mapping from model class indices to configured labels

use crate::config::LabelTableConfig;

/// Static class-index → label mapping
///
/// Indices without a label are ignored by the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<Option<String>>,
}

impl LabelTable {
    /// Map every class to a label of the same name
    #[must_use]
    pub fn identity<S: AsRef<str>>(class_names: &[S]) -> Self {
        Self {
            labels: class_names
                .iter()
                .map(|name| Some(name.as_ref().to_string()))
                .collect(),
        }
    }

    /// Map classes to configured labels
    ///
    /// A class whose name equals a label maps to it; otherwise the first label
    /// with a keyword contained in the class name (case-insensitive) wins, so
    /// "Smoke detector, smoke alarm" maps to `alarm`.
    #[must_use]
    pub fn from_keywords<S: AsRef<str>>(class_names: &[S], labels: &LabelTableConfig) -> Self {
        let labels = class_names
            .iter()
            .map(|class| {
                let class = class.as_ref().to_lowercase();

                if labels.contains_key(&class) {
                    return Some(class);
                }

                labels
                    .iter()
                    .find(|(_, rule)| {
                        rule.keywords
                            .iter()
                            .any(|k| !k.is_empty() && class.contains(&k.to_lowercase()))
                    })
                    .map(|(label, _)| label.clone())
            })
            .collect();

        Self { labels }
    }

    /// Label for class `index`, if mapped
    #[must_use]
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).and_then(Option::as_deref)
    }

    /// Number of classes covered
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the table covers no classes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of classes mapped to a label
    #[must_use]
    pub fn mapped(&self) -> usize {
        self.labels.iter().flatten().count()
    }
}
