use std::{
    any::Any,
    mem::take,
    rc::{Rc, Weak},
};


/// Keeps a listener, callback or binding registered until dropped.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }
    pub fn from_rc(rc: Rc<dyn Any>) -> Self {
        Subscription(RawSubscription::Rc(rc))
    }
    pub fn from_weak_fn<T: 'static>(this: Weak<T>, unsubscribe: impl FnOnce(Rc<T>) + 'static) -> Self {
        Self::from_fn(move || {
            if let Some(this) = this.upgrade() {
                unsubscribe(this)
            }
        })
    }

    /// Combine several subscriptions into one that releases all of them on drop.
    pub fn all(items: impl IntoIterator<Item = Subscription>) -> Self {
        let items: Vec<_> = items.into_iter().collect();
        if items.is_empty() {
            Self::empty()
        } else {
            Subscription(RawSubscription::Many(items))
        }
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
            RawSubscription::Rc(_) => {}
            RawSubscription::Many(_) => {}
        }
    }
}
impl FromIterator<Subscription> for Subscription {
    fn from_iter<I: IntoIterator<Item = Subscription>>(iter: I) -> Self {
        Self::all(iter)
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
    Rc(#[allow(unused)] Rc<dyn Any>),
    Many(#[allow(unused)] Vec<Subscription>),
}
