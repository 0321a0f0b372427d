use super::*;

#[test]
fn register_and_unsubscribe() {
    let r = Registry::new();
    let a = r.register(1);
    let b = r.register(2);
    assert_eq!(r.snapshot(), vec![1, 2]);
    drop(a);
    assert_eq!(r.snapshot(), vec![2]);
    drop(b);
    assert!(r.is_empty());
}

#[test]
fn subscription_outliving_registry_is_harmless() {
    let r = Registry::new();
    let s = r.register("x");
    drop(r);
    drop(s);
}

#[test]
fn clones_share_entries() {
    let r = Registry::new();
    let r2 = r.clone();
    let _s = r.register(5);
    assert_eq!(r2.len(), 1);
}
