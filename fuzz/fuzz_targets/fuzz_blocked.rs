#![no_main]
use libfuzzer_sys::fuzz_target;

const CHECK_EVERY: usize = 8;
const MAX_DUPES: u8 = 3;

fuzz_target!(|data: Vec<i16>| {
    if data.len() < 2 {
        return;
    }
    // A capacity this small maps every key to a single bucket whose eight
    // groups always fit the overflow pool, and the 8-bit lanes decode the
    // bounded multiplicities exactly, so the model is a hard oracle.
    let cap = (data[0] as u16 as usize).clamp(64, 100);
    let ops = data
        .into_iter()
        .map(|i| if i < 0 { (false, i.unsigned_abs()) } else { (true, i as u16) })
        .collect::<Vec<(bool, u16)>>();
    // The "Model", tracks the count for each item
    let mut counts = vec![0u8; (u16::MAX as usize) + 1];
    let mut live_total = 0usize;
    let mut f = cbfilter::SuccinctCountingBlockedBloomFilter::new(cap).unwrap();
    for i in 0..ops.len() {
        let (add, item) = ops[i];
        if add {
            if live_total == cap || counts[item as usize] == MAX_DUPES {
                continue;
            }
            f.add(&item);
            counts[item as usize] += 1;
            live_total += 1;
        } else {
            if counts[item as usize] == 0 {
                continue;
            }
            f.remove(&item);
            counts[item as usize] -= 1;
            live_total -= 1;
        }
        if i % CHECK_EVERY == 0 {
            for &(_add, e) in &ops[..=i] {
                let min = counts[e as usize] as u64;
                if min != 0 {
                    assert!(f.contains(&e), "{e}");
                    let est = f.count(&e);
                    assert!(est >= min, "{e}: est {est} min {min}");
                }
            }
        }
    }
    for &(_add, e) in &ops {
        let min = counts[e as usize] as u64;
        if min != 0 {
            assert!(f.contains(&e), "{e}");
            assert!(f.count(&e) >= min, "{e}");
        }
    }
});
