use std::collections::HashMap;

use crate::error::ModelError;

/// Named entities of one kind, addressed by registration position.
#[derive(Debug, Clone)]
pub(crate) struct Registry<T> {
    kind: &'static str,
    names: Vec<String>,
    items: Vec<T>,
    by_name: HashMap<String, usize>,
}

impl<T> Registry<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            names: Vec::new(),
            items: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub(crate) fn register(&mut self, name: &str, item: T) -> Result<usize, ModelError> {
        if self.by_name.contains_key(name) {
            return Err(ModelError::Duplicate {
                kind: self.kind,
                name: name.to_owned(),
            });
        }
        Ok(self.push(name, item))
    }

    /// Adds an entry whose name is known to be free.
    pub(crate) fn push(&mut self, name: &str, item: T) -> usize {
        let id = self.items.len();
        self.names.push(name.to_owned());
        self.items.push(item);
        self.by_name.insert(name.to_owned(), id);
        id
    }

    pub(crate) fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn check(&self, id: usize) -> Result<(), ModelError> {
        if id < self.items.len() {
            Ok(())
        } else {
            Err(ModelError::UnknownHandle {
                kind: self.kind,
                id,
            })
        }
    }

    pub(crate) fn name(&self, id: usize) -> &str {
        &self.names[id]
    }

    pub(crate) fn get(&self, id: usize) -> &T {
        &self.items[id]
    }

    pub(crate) fn get_mut(&mut self, id: usize) -> &mut T {
        &mut self.items[id]
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &str, &T)> {
        self.names
            .iter()
            .zip(&self.items)
            .enumerate()
            .map(|(id, (name, item))| (id, name.as_str(), item))
    }

    pub(crate) fn items(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = Registry::new("unit");
        assert_eq!(registry.register("mm", ()).unwrap(), 0);
        assert_eq!(registry.register("m3/s", ()).unwrap(), 1);

        let err = registry.register("mm", ()).unwrap_err();
        assert!(matches!(err, ModelError::Duplicate { kind: "unit", .. }));
        assert_eq!(registry.find("m3/s"), Some(1));
        assert!(registry.check(2).is_err());
    }
}
