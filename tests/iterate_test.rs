/*!
 * Iteration Integration Tests
 *
 * Visitor semantics, the ordered get_first/get_next walk, object search,
 * and unwrapping of indirect payloads.
 */

use handle_registry::{
    lib_type, Handle, Object, Registry, RegistryError, TypeClass, VisitAction, CLASS_IS_MT_SAFE,
    INVALID_HANDLE,
};
use std::sync::Arc;

fn plain_class(tag: usize) -> TypeClass {
    let mut class = TypeClass::new(tag);
    class.flags = CLASS_IS_MT_SAFE;
    class
}

fn populate(registry: &Registry, tag: usize, count: usize) -> Vec<Handle> {
    (0..count)
        .map(|value| registry.register(tag, Arc::new(value), true).unwrap())
        .collect()
}

#[test]
fn test_visitor_stop_semantics() {
    let registry = Registry::new();
    registry.register_type(plain_class(lib_type::DATASET)).unwrap();
    populate(&registry, lib_type::DATASET, 5);

    let mut visits = 0;
    registry
        .iterate(lib_type::DATASET, false, |_, _| {
            visits += 1;
            if visits == 3 {
                Ok(VisitAction::Stop)
            } else {
                Ok(VisitAction::Continue)
            }
        })
        .unwrap();
    assert_eq!(visits, 3, "positive verdict stops the walk as success");
}

#[test]
fn test_visitor_error_propagates() {
    let registry = Registry::new();
    registry.register_type(plain_class(lib_type::DATASET)).unwrap();
    populate(&registry, lib_type::DATASET, 5);

    let mut visits = 0;
    let result = registry.iterate(lib_type::DATASET, false, |_, _| {
        visits += 1;
        if visits == 2 {
            Err(RegistryError::CallbackFailed("visitor bailed".into()))
        } else {
            Ok(VisitAction::Continue)
        }
    });
    assert!(matches!(result, Err(RegistryError::CallbackFailed(_))));
    assert_eq!(visits, 2);

    // The walk released every token; records remain fully operable
    for handle in populate(&registry, lib_type::DATASET, 1) {
        registry.inc_ref(handle, false).unwrap();
    }
}

#[test]
fn test_iterate_skips_marked_and_internal_records() {
    let registry = Registry::new();
    registry.register_type(plain_class(lib_type::GROUP)).unwrap();

    let visible = registry
        .register(lib_type::GROUP, Arc::new(1usize), true)
        .unwrap();
    let removed = registry
        .register(lib_type::GROUP, Arc::new(2usize), true)
        .unwrap();
    let internal_only = registry
        .register(lib_type::GROUP, Arc::new(3usize), false)
        .unwrap();
    registry.remove(removed).unwrap();

    let mut seen = Vec::new();
    registry
        .iterate(lib_type::GROUP, true, |_, handle| {
            seen.push(handle);
            Ok(VisitAction::Continue)
        })
        .unwrap();
    assert_eq!(seen, vec![visible], "app_ref_only hides internal records");

    let mut all = Vec::new();
    registry
        .iterate(lib_type::GROUP, false, |_, handle| {
            all.push(handle);
            Ok(VisitAction::Continue)
        })
        .unwrap();
    all.sort();
    let mut expected = vec![visible, internal_only];
    expected.sort();
    assert_eq!(all, expected);
}

#[test]
fn test_iterate_uninitialized_type_is_empty() {
    let registry = Registry::new();
    let mut visits = 0;
    registry
        .iterate(lib_type::FILE, false, |_, _| {
            visits += 1;
            Ok(VisitAction::Continue)
        })
        .unwrap();
    assert_eq!(visits, 0);
}

#[test]
fn test_ordered_walk() {
    let registry = Registry::new();
    registry.register_type(plain_class(lib_type::FILE)).unwrap();
    let handles = populate(&registry, lib_type::FILE, 4);
    registry.remove(handles[1]).unwrap();

    let mut walked = Vec::new();
    let mut cursor = registry.get_first(lib_type::FILE).unwrap();
    while let Some((handle, object)) = cursor {
        walked.push((handle, *object.downcast_ref::<usize>().unwrap()));
        cursor = registry.get_next(lib_type::FILE, handle).unwrap();
    }

    // Handle order, marked records skipped
    assert_eq!(
        walked,
        vec![
            (handles[0], 0usize),
            (handles[2], 2usize),
            (handles[3], 3usize)
        ]
    );
}

#[test]
fn test_ordered_walk_empty_type() {
    let registry = Registry::new();
    assert_eq!(registry.get_first(lib_type::GROUP).unwrap(), None);

    registry.register_type(plain_class(lib_type::GROUP)).unwrap();
    assert_eq!(registry.get_first(lib_type::GROUP).unwrap(), None);
}

#[test]
fn test_find_by_object() {
    let registry = Registry::new();
    registry.register_type(plain_class(lib_type::DATATYPE)).unwrap();

    let needle: Object = Arc::new(42usize);
    let stranger: Object = Arc::new(42usize);
    populate(&registry, lib_type::DATATYPE, 3);
    let expected = registry
        .register(lib_type::DATATYPE, Arc::clone(&needle), true)
        .unwrap();

    // Identity search, not equality: a distinct allocation with the same
    // value does not match
    assert_eq!(
        registry.find_by_object(lib_type::DATATYPE, &needle).unwrap(),
        expected
    );
    assert_eq!(
        registry
            .find_by_object(lib_type::DATATYPE, &stranger)
            .unwrap(),
        INVALID_HANDLE
    );
}

/// Wrapper payload whose class extracts the inner object
struct Wrapped {
    inner: Object,
}

#[test]
fn test_unwrap_func_applies_to_iteration() {
    let registry = Registry::new();
    let mut class = plain_class(lib_type::DATASET);
    class.unwrap_func = Some(Box::new(|object: &Object| {
        match object.downcast_ref::<Wrapped>() {
            Some(wrapped) => Arc::clone(&wrapped.inner),
            None => Arc::clone(object),
        }
    }));
    registry.register_type(class).unwrap();

    let inner: Object = Arc::new(String::from("payload"));
    let wrapper: Object = Arc::new(Wrapped {
        inner: Arc::clone(&inner),
    });
    let handle = registry
        .register(lib_type::DATASET, wrapper, true)
        .unwrap();

    // The visitor sees the unwrapped object
    registry
        .iterate(lib_type::DATASET, false, |object, _| {
            assert!(Arc::ptr_eq(object, &inner));
            Ok(VisitAction::Continue)
        })
        .unwrap();

    // So do the ordered walk and the object search
    let (first, object) = registry.get_first(lib_type::DATASET).unwrap().unwrap();
    assert_eq!(first, handle);
    assert!(Arc::ptr_eq(&object, &inner));
    assert_eq!(
        registry.find_by_object(lib_type::DATASET, &inner).unwrap(),
        handle
    );

    // Plain lookup returns the stored (wrapped) object untouched
    let stored = registry.find(handle).unwrap();
    assert!(stored.downcast_ref::<Wrapped>().is_some());
}

#[test]
fn test_records_added_during_iteration_tolerated() {
    let registry = Arc::new(Registry::new());
    registry.register_type(plain_class(lib_type::GROUP)).unwrap();
    populate(&registry, lib_type::GROUP, 8);

    let adder = Arc::clone(&registry);
    let mut visits = 0usize;
    registry
        .iterate(lib_type::GROUP, false, move |_, _| {
            visits += 1;
            if visits == 1 {
                // Concurrent additions may or may not be visited; they must
                // never break the walk
                adder
                    .register(lib_type::GROUP, Arc::new(99usize), true)
                    .unwrap();
            }
            Ok(VisitAction::Continue)
        })
        .unwrap();
    assert_eq!(registry.nmembers(lib_type::GROUP).unwrap(), 9);
}
