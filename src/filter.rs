//! Object filter: restricts which objects appear in step metadata.
//!
//! The filter never affects what actions can address; a filtered-out object
//! can still be opened or toggled by id.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ObjectFilter {
    #[default]
    Unrestricted,
    /// Only these ids, in first-seen order without duplicates.
    Only(Vec<String>),
}

impl ObjectFilter {
    /// Restrict to `ids`.  Unknown ids are kept; they simply never match.
    pub fn set<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| seen.insert(id.clone()))
            .collect();
        *self = ObjectFilter::Only(ids);
    }

    pub fn reset(&mut self) {
        *self = ObjectFilter::Unrestricted;
    }

    pub fn admits(&self, object_id: &str) -> bool {
        match self {
            ObjectFilter::Unrestricted => true,
            ObjectFilter::Only(ids) => ids.iter().any(|id| id == object_id),
        }
    }

    pub fn ids(&self) -> Option<&[String]> {
        match self {
            ObjectFilter::Unrestricted => None,
            ObjectFilter::Only(ids) => Some(ids),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_dedupes_in_order() {
        let mut f = ObjectFilter::default();
        f.set(["Mug|1", "Apple|1", "Mug|1"]);
        assert_eq!(f.ids().unwrap(), ["Mug|1", "Apple|1"]);
    }

    #[test]
    fn empty_filter_admits_nothing() {
        let mut f = ObjectFilter::default();
        f.set(Vec::<String>::new());
        assert!(!f.admits("Mug|1"));
        f.reset();
        assert!(f.admits("Mug|1"));
    }
}
