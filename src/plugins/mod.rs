use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-keyed registry of shared capabilities (template helpers, pools,
/// clients). An application hands its plugins to every request it
/// dispatches, and a mounted application inherits whatever its parent had
/// at mount time.
#[derive(Default, Clone)]
pub struct Plugins {
    data: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert<T: 'static + Send + Sync>(&mut self, value: T) {
        Arc::make_mut(&mut self.data).insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies every entry of `parent` this registry does not already hold.
    pub(crate) fn inherit(&mut self, parent: &Plugins) {
        let missing: Vec<_> = parent
            .data
            .iter()
            .filter(|(key, _)| !self.data.contains_key(key))
            .map(|(key, value)| (*key, Arc::clone(value)))
            .collect();
        if missing.is_empty() {
            return;
        }
        Arc::make_mut(&mut self.data).extend(missing);
    }
}

impl fmt::Debug for Plugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugins").field("len", &self.len()).finish()
    }
}
