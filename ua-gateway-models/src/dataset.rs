use crate::settings::ServerEntry;
use serde::Serialize;

/// A registered backend server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSet {
    pub id: usize,
    pub name: String,
    pub url: String,
}

/// Immutable set of registered servers, ids assigned by position.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    data_sets: Vec<DataSet>,
}

impl ServerRegistry {
    pub fn new(entries: &[ServerEntry]) -> Self {
        let data_sets = entries
            .iter()
            .enumerate()
            .map(|(id, e)| DataSet {
                id,
                name: e.name.clone(),
                url: e.url.clone(),
            })
            .collect();
        Self { data_sets }
    }

    #[inline]
    pub fn get(&self, id: usize) -> Option<&DataSet> {
        self.data_sets.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&DataSet> {
        self.data_sets.iter().find(|d| d.name == name)
    }

    #[inline]
    pub fn all(&self) -> &[DataSet] {
        &self.data_sets
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data_sets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data_sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_registration_order() {
        let registry = ServerRegistry::new(&[
            ServerEntry {
                name: "a".into(),
                url: "opc.tcp://a:4840".into(),
            },
            ServerEntry {
                name: "b".into(),
                url: "opc.tcp://b:4840".into(),
            },
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).map(|d| d.url.as_str()), Some("opc.tcp://b:4840"));
        assert_eq!(registry.by_name("a").map(|d| d.id), Some(0));
        assert!(registry.get(2).is_none());
    }
}
