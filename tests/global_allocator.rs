//! The general allocator installed as the Rust global allocator
//!
//! One test only: every allocation in this binary goes through `GLOBAL`.

use memcore::{finish_allocation_tracking, start_allocation_tracking, CallSite, GeneralAllocator};

#[global_allocator]
static GLOBAL: GeneralAllocator = GeneralAllocator::new();

#[test]
fn std_collections_run_on_the_general_allocator() {
    let baseline = GLOBAL.usage();

    let mut numbers: Vec<u64> = (0..1000).collect();
    numbers.retain(|n| n % 3 == 0);
    let text: String = numbers.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(",");
    assert!(text.starts_with("0,3,6"));
    assert!(GLOBAL.usage() > baseline);

    // Over-aligned through the global path
    #[repr(align(128))]
    struct Wide([u8; 128]);
    let wide = Box::new(Wide([7; 128]));
    assert_eq!(&*wide as *const Wide as usize % 128, 0);
    assert_eq!(wide.0[127], 7);
    drop(wide);

    start_allocation_tracking().expect("start tracking");
    let kept = vec![0xA5u8; 100];
    let leaks = finish_allocation_tracking();

    let leak = leaks
        .iter()
        .find(|leak| leak.address == kept.as_ptr() as usize)
        .expect("global allocation tracked");
    assert_eq!(leak.size, 100);
    assert_eq!(leak.call_site, CallSite::Unknown);

    drop(leaks);
    drop(kept);
    drop(numbers);
    drop(text);
}
