// ReferenceEntry property test.
//
// Model: a single entry driven by random acquire / release / mark_loaded
// sequences on a current-thread runtime.
//  - count == 1 + accepted acquires - effective releases, never below zero.
//  - Acquires issued while loading suspend and all resume with the resource
//    once it is marked loaded.
//  - `release` returns true exactly on the transition to zero. Reaching zero
//    while acquires are still suspended fails them with `Abandoned`.
//  - The unload action fires at most once, and exactly once when the entry
//    reached zero and the resource exists.
use load_ref_cache::{EntryError, ReferenceEntry};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    Acquire,
    Release,
    MarkLoaded,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(
        prop_oneof![
            3 => Just(Op::Acquire),
            3 => Just(Op::Release),
            1 => Just(Op::MarkLoaded),
        ],
        1..80,
    )
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]
    #[test]
    fn prop_entry_counting(ops in arb_ops()) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let unloads = Arc::new(AtomicUsize::new(0));
        let seen = unloads.clone();
        let entry = Arc::new(ReferenceEntry::new("prop", move |r: u32| {
            assert_eq!(r, 42);
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let mut count: usize = 1;
        let mut loaded = false;
        let mut zeroed = false;
        let mut pending = Vec::new();

        for op in ops {
            match op {
                Op::Acquire => {
                    if zeroed {
                        let res = rt.block_on(entry.acquire());
                        prop_assert_eq!(res, Err(EntryError::Unloaded { key: "prop".to_string() }));
                    } else if loaded {
                        prop_assert_eq!(rt.block_on(entry.acquire()), Ok(42));
                        count += 1;
                    } else {
                        let e = entry.clone();
                        pending.push(rt.spawn(async move { e.acquire().await }));
                        let want = pending.len();
                        let e = entry.clone();
                        rt.block_on(async move {
                            while e.pending_waiters() < want {
                                tokio::task::yield_now().await;
                            }
                        });
                        count += 1;
                    }
                }
                Op::Release => {
                    let fully = entry.release();
                    if count == 0 {
                        prop_assert!(!fully);
                    } else {
                        count -= 1;
                        prop_assert_eq!(fully, count == 0);
                        if count == 0 {
                            zeroed = true;
                            // Releases consumed holds that suspended acquires
                            // had taken: those acquires fail, and the holds
                            // they give back on the way out are ignored.
                            for handle in pending.drain(..) {
                                prop_assert_eq!(
                                    rt.block_on(handle).unwrap(),
                                    Err(EntryError::Abandoned { key: "prop".to_string() })
                                );
                            }
                        }
                    }
                }
                Op::MarkLoaded => {
                    let res = entry.mark_loaded(42);
                    if loaded {
                        prop_assert!(res.is_err());
                    } else {
                        prop_assert!(res.is_ok());
                        loaded = true;
                        for handle in pending.drain(..) {
                            prop_assert_eq!(rt.block_on(handle).unwrap(), Ok(42));
                        }
                    }
                }
            }

            prop_assert_eq!(entry.count(), count);
            prop_assert_eq!(entry.is_done(), loaded);
            let expected_unloads = usize::from(zeroed && loaded);
            prop_assert_eq!(unloads.load(Ordering::SeqCst), expected_unloads);
        }
    }
}
