use std::{cell::RefCell, rc::Rc};

use derive_ex::derive_ex;
use slabmap::SlabMap;

use crate::Subscription;

#[cfg(test)]
mod tests;

/// A set of callbacks that stay registered while their [`Subscription`] is alive.
#[derive_ex(Clone, bound())]
pub struct Registry<T>(Rc<RefCell<SlabMap<T>>>);

impl<T: 'static> Registry<T> {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(SlabMap::new())))
    }
    pub fn register(&self, value: T) -> Subscription {
        let key = self.0.borrow_mut().insert(value);
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |items| {
            items.borrow_mut().remove(key);
        })
    }
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}
impl<T: Clone + 'static> Registry<T> {
    /// Entries present right now.
    ///
    /// Callbacks may register or unregister while the snapshot is being walked.
    pub fn snapshot(&self) -> Vec<T> {
        let items = self.0.borrow();
        let mut entries: Vec<_> = items.iter().map(|(key, value)| (key, value.clone())).collect();
        entries.sort_by_key(|(key, _)| *key);
        entries.into_iter().map(|(_, value)| value).collect()
    }
}
impl<T: 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
