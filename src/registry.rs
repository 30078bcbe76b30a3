use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error;

use crate::{error::Error, method::Method};

/// Lookup failure for a method name. Turned into "Method not found" by the
/// request layer; the registry itself knows nothing of protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no method registered as {0:?}")]
pub struct KeyNotFound(pub String);

/// Resolves method names at dispatch time.
pub trait Dispatch {
    fn resolve(&self, name: &str) -> Result<Arc<dyn Method>, KeyNotFound>;
}

/// A group of methods exported under their own names, for bulk registration
/// with [`MethodRegistry::import`].
pub trait MethodSet {
    fn methods(&self) -> Vec<(String, Arc<dyn Method>)>;
}

/// Name to method table. Names are unique and the last registration wins.
///
/// The registry does no locking: mutate it before dispatch starts, or guard it
/// yourself while requests are in flight.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn Method>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method` under `name`, returning the method it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        method: impl Method + 'static,
    ) -> Option<Arc<dyn Method>> {
        self.insert_arc(name, Arc::new(method))
    }

    pub fn insert_arc(
        &mut self,
        name: impl Into<String>,
        method: Arc<dyn Method>,
    ) -> Option<Arc<dyn Method>> {
        self.methods.insert(name.into(), method)
    }

    /// Registers `method` under its declared [`Method::name`].
    pub fn register(&mut self, method: impl Method + 'static) -> Result<&mut Self, Error> {
        let name = method.name().ok_or(Error::UnnamedMethod)?.to_owned();
        self.insert(name, method);
        Ok(self)
    }

    /// Registers every method exported by `set`.
    pub fn import(&mut self, set: &(impl MethodSet + ?Sized)) -> &mut Self {
        self.extend(set.methods());
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Method>> {
        self.methods.remove(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Method>, KeyNotFound> {
        self.methods
            .get(name)
            .cloned()
            .ok_or_else(|| KeyNotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl Dispatch for MethodRegistry {
    fn resolve(&self, name: &str) -> Result<Arc<dyn Method>, KeyNotFound> {
        self.get(name)
    }
}

impl Dispatch for HashMap<String, Arc<dyn Method>> {
    fn resolve(&self, name: &str) -> Result<Arc<dyn Method>, KeyNotFound> {
        self.get(name)
            .cloned()
            .ok_or_else(|| KeyNotFound(name.to_owned()))
    }
}

impl<D: Dispatch + ?Sized> Dispatch for Arc<D> {
    fn resolve(&self, name: &str) -> Result<Arc<dyn Method>, KeyNotFound> {
        (**self).resolve(name)
    }
}

impl MethodSet for MethodRegistry {
    fn methods(&self) -> Vec<(String, Arc<dyn Method>)> {
        self.methods
            .iter()
            .map(|(name, method)| (name.clone(), method.clone()))
            .collect()
    }
}

impl MethodSet for HashMap<String, Arc<dyn Method>> {
    fn methods(&self) -> Vec<(String, Arc<dyn Method>)> {
        self.iter()
            .map(|(name, method)| (name.clone(), method.clone()))
            .collect()
    }
}

impl Extend<(String, Arc<dyn Method>)> for MethodRegistry {
    fn extend<I: IntoIterator<Item = (String, Arc<dyn Method>)>>(&mut self, iter: I) {
        self.methods.extend(iter);
    }
}

impl FromIterator<(String, Arc<dyn Method>)> for MethodRegistry {
    fn from_iter<I: IntoIterator<Item = (String, Arc<dyn Method>)>>(iter: I) -> Self {
        Self {
            methods: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_set().entries(names).finish()
    }
}
