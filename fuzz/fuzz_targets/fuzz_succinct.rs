#![no_main]
use libfuzzer_sys::fuzz_target;

const CHECK_EVERY: usize = 8;

fuzz_target!(|data: Vec<i16>| {
    if data.len() < 2 {
        return;
    }
    // Small capacities keep every group inside the overflow pool, so the
    // exact-count model below is a hard oracle. Positive values add, negative
    // values remove; set semantics (at most one live copy per item) keep all
    // counters inside the 4-bit lane range.
    let cap = (data[0] as u16 as usize).clamp(64, 160);
    let ops = data
        .into_iter()
        .map(|i| if i < 0 { (false, i.unsigned_abs()) } else { (true, i as u16) })
        .collect::<Vec<(bool, u16)>>();
    // The "Model", tracks whether each item is live
    let mut live = vec![false; (u16::MAX as usize) + 1];
    let mut live_total = 0usize;
    let mut f = cbfilter::SuccinctCountingBloomFilter::new(cap).unwrap();
    for i in 0..ops.len() {
        let (add, item) = ops[i];
        if add {
            if live_total == cap || live[item as usize] {
                continue;
            }
            f.add(&item);
            live[item as usize] = true;
            live_total += 1;
        } else {
            if !live[item as usize] {
                continue;
            }
            f.remove(&item);
            live[item as usize] = false;
            live_total -= 1;
        }
        if i % CHECK_EVERY == 0 {
            for &(_add, e) in &ops[..=i] {
                if live[e as usize] {
                    assert_eq!(f.contains(&e), cbfilter::Status::Ok, "{e}");
                    assert!(f.count(&e) >= 1, "{e}");
                }
            }
        }
    }
    for &(_add, e) in &ops {
        if live[e as usize] {
            assert_eq!(f.contains(&e), cbfilter::Status::Ok, "{e}");
        }
    }
});
