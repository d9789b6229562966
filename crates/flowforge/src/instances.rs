use indexmap::IndexMap;

use crate::context::ContextKey;
use crate::fixture::Pk;

/// Which concrete row each abstraction became, per context.
///
/// A binding is made once; later attempts for the same pair are ignored so
/// references resolved early stay valid.
#[derive(Debug, Default)]
pub struct Instances {
    bindings: IndexMap<(String, ContextKey), Pk>,
}

impl Instances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the pair was already bound.
    pub fn bind(&mut self, abstraction_id: &str, context: ContextKey, pk: Pk) -> bool {
        let key = (abstraction_id.to_owned(), context);
        if self.bindings.contains_key(&key) {
            return false;
        }
        self.bindings.insert(key, pk);
        true
    }

    pub fn get(&self, abstraction_id: &str, context: &ContextKey) -> Option<&Pk> {
        self.bindings.get(&(abstraction_id.to_owned(), context.clone()))
    }

    /// Every instance of `abstraction_id`, in binding order.
    pub fn all(&self, abstraction_id: &str) -> impl Iterator<Item = &Pk> {
        self.bindings
            .iter()
            .filter(move |((id, _), _)| id == abstraction_id)
            .map(|(_, pk)| pk)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
