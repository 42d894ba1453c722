//! Process-wide allocation tracking through the general allocator
//!
//! Tests in this binary share the one tracker, so each holds `SERIAL`.

use memcore::{
    finish_allocation_tracking, general, pause_allocation_tracking, start_allocation_tracking,
    tracking, write_leak_report, Allocator, CallSite, TrackingState,
};
use parking_lot::Mutex;

static SERIAL: Mutex<()> = Mutex::new(());

#[test]
fn freed_allocation_is_not_a_leak() {
    let _serial = SERIAL.lock();
    start_allocation_tracking().expect("start tracking");

    let ptr = general().allocate(64, 8).unwrap();
    unsafe { general().free(ptr.as_ptr(), 64) };

    let leaks = finish_allocation_tracking();
    assert!(leaks.iter().all(|leak| leak.address != ptr.as_ptr() as usize));
    assert_eq!(tracking::tracking_state(), TrackingState::Stopped);
}

#[test]
fn unfreed_allocation_is_reported_with_its_call_site() {
    let _serial = SERIAL.lock();
    start_allocation_tracking().expect("start tracking");

    let ptr = general().allocate(48, 16).unwrap();
    let line = line!() - 1;

    let leaks = finish_allocation_tracking();
    let leak = leaks
        .iter()
        .find(|leak| leak.address == ptr.as_ptr() as usize)
        .expect("leak recorded");
    assert_eq!(leak.size, 48);
    match leak.call_site {
        CallSite::Source(location) => {
            assert!(location.file().ends_with("tracking.rs"));
            assert_eq!(location.line(), line);
        }
        other => panic!("expected a source call site, got {:?}", other),
    }

    let mut report = Vec::new();
    write_leak_report(&mut report, &leaks).unwrap();
    let report = String::from_utf8(report).unwrap();
    assert!(report.contains(&format!("tracking.rs:{}", line)));

    unsafe { general().free(ptr.as_ptr(), 48) };
}

#[test]
fn pause_then_resume_keeps_records() {
    let _serial = SERIAL.lock();
    start_allocation_tracking().expect("start tracking");

    let ptr = general().allocate(32, 8).unwrap();
    pause_allocation_tracking();
    assert_eq!(tracking::tracking_state(), TrackingState::Paused);
    assert!(!tracking::is_tracking());

    // Ignored while paused
    let unseen = general().allocate(32, 8).unwrap();

    start_allocation_tracking().expect("resume tracking");
    let leaks = finish_allocation_tracking();
    assert!(leaks.iter().any(|leak| leak.address == ptr.as_ptr() as usize));
    assert!(leaks.iter().all(|leak| leak.address != unseen.as_ptr() as usize));

    unsafe {
        general().free(ptr.as_ptr(), 32);
        general().free(unseen.as_ptr(), 32);
    }
}

#[test]
fn restart_clears_previous_leaks() {
    let _serial = SERIAL.lock();
    start_allocation_tracking().expect("start tracking");
    let ptr = general().allocate(24, 8).unwrap();
    assert!(finish_allocation_tracking()
        .iter()
        .any(|leak| leak.address == ptr.as_ptr() as usize));

    start_allocation_tracking().expect("restart tracking");
    let leaks = finish_allocation_tracking();
    assert!(leaks.iter().all(|leak| leak.address != ptr.as_ptr() as usize));

    unsafe { general().free(ptr.as_ptr(), 24) };
}

#[test]
fn over_aligned_round_trip_restores_usage() {
    let _serial = SERIAL.lock();
    start_allocation_tracking().expect("start tracking");

    let before = general().usage();
    let ptr = general().allocate(16, 32).unwrap();
    assert_eq!(ptr.as_ptr() as usize % 32, 0);
    assert_eq!(general().usage(), before + 16);

    unsafe { general().free(ptr.as_ptr(), 16) };
    assert_eq!(general().usage(), before);

    let leaks = finish_allocation_tracking();
    assert!(leaks.iter().all(|leak| leak.address != ptr.as_ptr() as usize));
}

#[test]
fn reallocation_moves_the_record() {
    let _serial = SERIAL.lock();
    start_allocation_tracking().expect("start tracking");

    let ptr = general().allocate(16, 64).unwrap();
    let grown = unsafe { general().reallocate(ptr.as_ptr(), 16, 8192, 64) }.unwrap();

    let leaks = finish_allocation_tracking();
    let live: Vec<_> = leaks
        .iter()
        .filter(|leak| leak.address == grown.as_ptr() as usize)
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].size, 8192);

    unsafe { general().free(grown.as_ptr(), 8192) };
}

#[test]
fn large_blocks_are_tracked() {
    let _serial = SERIAL.lock();
    start_allocation_tracking().expect("start tracking");

    let block = general().allocate_large(5000, 16).unwrap();
    let leaks = finish_allocation_tracking();
    assert!(leaks
        .iter()
        .any(|leak| leak.address == block.ptr.as_ptr() as usize && leak.size == block.size));

    unsafe { general().free_large(block) };
}

#[test]
fn hundreds_of_live_large_blocks_fit_the_tracker() {
    let _serial = SERIAL.lock();
    start_allocation_tracking().expect("start tracking");

    let blocks: Vec<_> = (0..300)
        .map(|_| general().allocate_large(4096, 16).unwrap())
        .collect();
    let leaks = finish_allocation_tracking();
    for block in &blocks {
        assert!(leaks.iter().any(|leak| leak.address == block.ptr.as_ptr() as usize));
    }

    for block in blocks {
        unsafe { general().free_large(block) };
    }
}
