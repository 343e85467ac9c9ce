use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use tokenbucket::Bucket;

fn bucket(capacity: u64, rate: u64) -> Bucket {
    Bucket::new("prop", capacity, rate, Duration::from_millis(10))
}

proptest! {
    #[test]
    fn full_bucket_grants_exactly_capacity_hits(capacity in 0u64..200) {
        let b = bucket(capacity, 1);
        for _ in 0..capacity {
            prop_assert!(b.hit());
        }
        prop_assert!(!b.hit());
        prop_assert_eq!(b.tokens(), 0);
    }

    #[test]
    fn fill_never_exceeds_capacity(
        capacity in 0u64..1_000,
        rate in 0u64..2_000,
        start in 0u64..1_000,
        fills in 1usize..10,
    ) {
        let b = bucket(capacity, rate).with_tokens(start);
        for _ in 0..fills {
            b.fill();
            prop_assert!(b.tokens() <= capacity);
        }
    }

    #[test]
    fn fill_adds_rate_below_capacity(capacity in 10u64..1_000, rate in 0u64..10) {
        let b = bucket(capacity, rate).with_tokens(0);
        b.fill();
        prop_assert_eq!(b.tokens(), rate);
    }
}

#[test]
fn fill_saturates_on_huge_rate() {
    let b = bucket(5, u64::MAX).with_tokens(3);
    b.fill();
    assert_eq!(b.tokens(), 5);
}

#[test]
fn concurrent_hits_never_overdraw() {
    let b = Arc::new(bucket(1_000, 0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let b = b.clone();
            thread::spawn(move || (0..200).filter(|_| b.hit()).count())
        })
        .collect();
    let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(granted, 1_000);
    assert_eq!(b.tokens(), 0);
}

#[test]
fn concurrent_fills_and_hits_stay_in_bounds() {
    let b = Arc::new(bucket(50, 3).with_tokens(0));
    let filler = {
        let b = b.clone();
        thread::spawn(move || {
            for _ in 0..500 {
                b.fill();
            }
        })
    };
    let hitter = {
        let b = b.clone();
        thread::spawn(move || (0..500).filter(|_| b.hit()).count())
    };
    filler.join().unwrap();
    let granted = hitter.join().unwrap();
    assert!(b.tokens() <= 50);
    assert!(granted <= 1_500);
}
