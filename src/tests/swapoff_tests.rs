use super::{get_one, test_pager};
use crate::swap_index::slot;
use std::sync::atomic::Ordering;

#[test]
fn sweep_pages_in_only_the_given_slot_range() {
    let (pager, swap, alloc, _mmu) = test_pager();
    let a = pager.create_object(100).unwrap();
    let b = pager.create_object(100).unwrap();

    for (i, byte) in [(0u64, 0x11u8), (1, 0x22)] {
        let page = get_one(&pager, &a, i).unwrap();
        page.with_data_mut(|d| d[0] = byte);
        page.unbusy();
        pager.pageout_page(&a, i, 100 + i).unwrap();
    }
    let page = get_one(&pager, &b, 0).unwrap();
    page.unbusy();
    pager.pageout_page(&b, 0, 200).unwrap();
    assert_eq!(pager.pages_only_in_swap(), 3);

    let aborted = pager.pagein_swap_range(100, 150);
    assert!(!aborted);

    // both of a's pages came back in and gave up their slots
    assert_eq!(a.resident_count(), 2);
    assert_eq!(a.find_slot(0), slot::NONE);
    assert_eq!(a.find_slot(1), slot::NONE);
    assert_eq!(swap.reads_of(100), 1);
    assert_eq!(swap.reads_of(101), 1);
    assert_eq!(swap.freed_count(100), 1);
    assert_eq!(swap.freed_count(101), 1);
    let page = get_one(&pager, &a, 0).unwrap();
    page.with_data(|d| assert_eq!(d[0], 0x11));
    page.unbusy();

    // b's slot was outside the range
    assert_eq!(b.resident_count(), 0);
    assert_eq!(b.find_slot(0), 200);
    assert_eq!(swap.reads_of(200), 0);
    assert_eq!(pager.pages_only_in_swap(), 1);

    // swept pages land on the active queue
    let mut activated = alloc.activated();
    activated.sort_unstable();
    assert_eq!(activated, vec![0, 1]);

    // the sweep's transient references are gone
    assert_eq!(a.ref_count(), 1);
    assert_eq!(b.ref_count(), 1);
}

#[test]
fn sweep_aborts_on_read_error() {
    let (pager, swap, _alloc, _mmu) = test_pager();
    let obj = pager.create_object(100).unwrap();

    get_one(&pager, &obj, 5).unwrap().unbusy();
    pager.pageout_page(&obj, 5, 120).unwrap();
    swap.fail_read(120);

    assert!(pager.pagein_swap_range(100, 150));
    // the failed slot is poisoned, not left behind to loop on
    assert_eq!(obj.find_slot(5), slot::BAD);
    assert_eq!(swap.reads_of(120), 1);
    assert_eq!(obj.ref_count(), 1);
}

#[test]
fn sweep_skips_poisoned_slots() {
    let (pager, swap, _alloc, _mmu) = test_pager();
    let obj = pager.create_object(100).unwrap();
    obj.set_slot(3, slot::BAD).unwrap();

    assert!(!pager.pagein_swap_range(0, u64::MAX));
    assert_eq!(obj.find_slot(3), slot::BAD);
    assert_eq!(swap.total_reads(), 0);
}

#[test]
fn sweep_already_resident_page_keeps_counter() {
    let (pager, _swap, alloc, _mmu) = test_pager();
    let obj = pager.create_object(100).unwrap();

    // resident page with a stale slot still recorded: paging it "in" only
    // drops the slot, and the counter was never credited for it
    get_one(&pager, &obj, 7).unwrap().unbusy();
    obj.set_slot(7, 110).unwrap();

    assert!(!pager.pagein_swap_range(100, 150));
    assert_eq!(obj.find_slot(7), slot::NONE);
    assert_eq!(pager.pages_only_in_swap(), 0);
    assert_eq!(alloc.allocs.load(Ordering::SeqCst), 1);

    pager.detach(&obj);
}

#[test]
fn sweep_ignores_dead_objects() {
    let (pager, swap, _alloc, _mmu) = test_pager();
    let obj = pager.create_object(100).unwrap();
    get_one(&pager, &obj, 0).unwrap().unbusy();
    pager.pageout_page(&obj, 0, 130).unwrap();
    pager.detach(&obj);

    assert_eq!(pager.registered(), 0);
    assert!(!pager.pagein_swap_range(0, u64::MAX));
    // teardown already released the slot; the sweep found nothing
    assert_eq!(swap.freed_count(130), 1);
    assert_eq!(swap.reads_of(130), 0);
}
