/*!
 * Contention Stress Tests
 *
 * Many threads hammering register/inc_ref/dec_ref/remove on shared types,
 * checking the counting invariants and the free-list quiescence contract
 * at the end.
 */

use handle_registry::{lib_type, Registry, RegistryError, TypeClass, CLASS_IS_MT_SAFE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const CYCLES: usize = 500;

fn counting_class(tag: usize, frees: Arc<AtomicU64>) -> TypeClass {
    let mut class = TypeClass::new(tag);
    class.flags = CLASS_IS_MT_SAFE;
    class.free_func = Some(Box::new(move |_object, _request| {
        frees.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    class
}

#[test]
fn test_private_handle_churn() {
    let registry = Arc::new(Registry::new());
    let frees = Arc::new(AtomicU64::new(0));
    registry
        .register_type(counting_class(lib_type::DATASET, Arc::clone(&frees)))
        .unwrap();

    let mut workers = Vec::new();
    for worker_id in 0..THREADS {
        let registry = Arc::clone(&registry);
        workers.push(thread::spawn(move || {
            for cycle in 0..CYCLES {
                let handle = registry
                    .register(lib_type::DATASET, Arc::new(worker_id * CYCLES + cycle), true)
                    .unwrap();
                assert_eq!(registry.inc_ref(handle, true).unwrap(), 2);
                let count = registry.dec_ref(handle, true).unwrap();
                assert_eq!(count, 1);
                if cycle % 2 == 0 {
                    // Final release through the free_func path
                    assert_eq!(registry.dec_ref(handle, true).unwrap(), 0);
                } else {
                    // Extraction path: no free_func
                    registry.remove(handle).unwrap();
                }
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(registry.nmembers(lib_type::DATASET).unwrap(), 0);
    assert_eq!(registry.active_threads(), 0);

    // Every even cycle freed exactly once
    let expected_frees = (THREADS * CYCLES / 2) as u64;
    assert_eq!(frees.load(Ordering::SeqCst), expected_frees);

    // Free-list quiescence: at rest, every parked record is reallocable
    let snapshot = registry.stats_snapshot();
    assert_eq!(snapshot.id_freelist_len, snapshot.id_freelist_reallocable);
    assert_eq!(snapshot.registrations, (THREADS * CYCLES) as u64);
}

#[test]
fn test_shared_handle_count_integrity() {
    let registry = Arc::new(Registry::new());
    let frees = Arc::new(AtomicU64::new(0));
    registry
        .register_type(counting_class(lib_type::GROUP, Arc::clone(&frees)))
        .unwrap();

    // One shared handle with a baseline reference per worker, taken up
    // front so no worker can release it to zero mid-run
    let handle = registry
        .register(lib_type::GROUP, Arc::new(0usize), true)
        .unwrap();
    for _ in 0..THREADS {
        registry.inc_ref(handle, false).unwrap();
    }

    let mut workers = Vec::new();
    for _ in 0..THREADS {
        let registry = Arc::clone(&registry);
        workers.push(thread::spawn(move || {
            for _ in 0..CYCLES {
                let up = registry.inc_ref(handle, true).unwrap();
                assert!(up >= 2, "count must never be seen at zero while live");
                let down = registry.dec_ref(handle, true).unwrap();
                assert!(down >= 1);
            }
            registry.dec_ref(handle, false).unwrap();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    // Workers dropped their baselines; only the original reference is left
    assert_eq!(registry.ref_count(handle).unwrap(), 1);
    assert_eq!(registry.app_ref_count(handle).unwrap(), 1);
    assert_eq!(frees.load(Ordering::SeqCst), 0);

    assert_eq!(registry.dec_ref(handle, true).unwrap(), 0);
    assert_eq!(frees.load(Ordering::SeqCst), 1);
    assert_eq!(registry.nmembers(lib_type::GROUP).unwrap(), 0);
}

#[test]
fn test_concurrent_lookup_during_churn() {
    let registry = Arc::new(Registry::new());
    registry
        .register_type(counting_class(lib_type::FILE, Arc::new(AtomicU64::new(0))))
        .unwrap();

    // A stable population the readers can always hit
    let stable: Vec<_> = (0..64)
        .map(|value| {
            registry
                .register(lib_type::FILE, Arc::new(value as usize), true)
                .unwrap()
        })
        .collect();

    let mut workers = Vec::new();
    for _ in 0..4 {
        let registry = Arc::clone(&registry);
        let stable = stable.clone();
        workers.push(thread::spawn(move || {
            for _ in 0..CYCLES {
                for &handle in &stable {
                    let object = registry.find(handle).unwrap();
                    let value = *object.downcast_ref::<usize>().unwrap();
                    assert!(value < 64);
                }
            }
        }));
    }
    // Churners create and release disjoint records of the same type
    for _ in 0..4 {
        let registry = Arc::clone(&registry);
        workers.push(thread::spawn(move || {
            for cycle in 0..CYCLES {
                let handle = registry
                    .register(lib_type::FILE, Arc::new(1000 + cycle), true)
                    .unwrap();
                registry.dec_ref(handle, true).unwrap();
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(registry.nmembers(lib_type::FILE).unwrap(), 64);
    let snapshot = registry.stats_snapshot();
    assert_eq!(snapshot.id_freelist_len, snapshot.id_freelist_reallocable);
}

#[test]
fn test_randomized_mixed_workload() {
    let registry = Arc::new(Registry::new());
    let frees = Arc::new(AtomicU64::new(0));
    registry
        .register_type(counting_class(lib_type::ATTRIBUTE, Arc::clone(&frees)))
        .unwrap();

    let mut workers = Vec::new();
    for worker_id in 0..THREADS {
        let registry = Arc::clone(&registry);
        workers.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(worker_id as u64);
            let mut live: Vec<i64> = Vec::new();
            for _ in 0..CYCLES {
                match rng.gen_range(0..4) {
                    0 => {
                        let handle = registry
                            .register(lib_type::ATTRIBUTE, Arc::new(worker_id), rng.gen())
                            .unwrap();
                        live.push(handle);
                    }
                    1 if !live.is_empty() => {
                        let handle = live[rng.gen_range(0..live.len())];
                        registry.inc_ref(handle, rng.gen()).unwrap();
                        registry.dec_ref(handle, false).unwrap();
                    }
                    2 if !live.is_empty() => {
                        let handle = live.swap_remove(rng.gen_range(0..live.len()));
                        // Walk the count down to the final release
                        while registry.dec_ref(handle, false).unwrap() > 0 {}
                    }
                    _ if !live.is_empty() => {
                        let handle = live[rng.gen_range(0..live.len())];
                        let object = registry.find(handle).unwrap();
                        assert_eq!(*object.downcast_ref::<usize>().unwrap(), worker_id);
                    }
                    _ => {}
                }
            }
            // Drain the survivors
            for handle in live {
                match registry.remove(handle) {
                    Ok(_) => {}
                    Err(RegistryError::NotFound(_)) => {
                        panic!("another thread released a private handle")
                    }
                    Err(err) => panic!("unexpected remove failure: {}", err),
                }
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(registry.nmembers(lib_type::ATTRIBUTE).unwrap(), 0);
    let snapshot = registry.stats_snapshot();
    assert_eq!(snapshot.id_freelist_len, snapshot.id_freelist_reallocable);
    assert_eq!(snapshot.active_threads, 0);
}

#[test]
fn test_concurrent_type_registration() {
    let registry = Arc::new(Registry::new());

    let mut workers = Vec::new();
    for _ in 0..THREADS {
        let registry = Arc::clone(&registry);
        workers.push(thread::spawn(move || {
            registry
                .register_type(TypeClass::new(lib_type::DATASPACE))
                .unwrap();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    // All racers either installed or referenced the one type record
    assert!(registry.type_exists(lib_type::DATASPACE).unwrap());
    for _ in 0..THREADS {
        registry.dec_type_ref(lib_type::DATASPACE).unwrap();
    }
    assert!(!registry.type_exists(lib_type::DATASPACE).unwrap());
}
