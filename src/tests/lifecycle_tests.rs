use super::{get_one, test_pager};
use crate::swap_index::slot;

#[test]
fn create_registers_object() {
    let (pager, _swap, _alloc, _mmu) = test_pager();
    let obj = pager.create_object(10).unwrap();
    assert_eq!(obj.ref_count(), 1);
    assert_eq!(pager.registered(), 1);
    assert!(pager.is_registered(&obj));
    pager.detach(&obj);
    assert_eq!(pager.registered(), 0);
}

#[test]
fn reference_then_detach_is_idempotent() {
    let (pager, _swap, _alloc, _mmu) = test_pager();
    let obj = pager.create_object(10).unwrap();
    pager.reference(&obj);
    assert_eq!(obj.ref_count(), 2);
    pager.detach(&obj);
    assert_eq!(obj.ref_count(), 1);
    assert!(pager.is_registered(&obj));
    pager.detach(&obj);
    assert!(!pager.is_registered(&obj));
}

#[test]
fn detach_teardown_frees_pages_and_slots() {
    let (pager, swap, alloc, _mmu) = test_pager();
    let obj = pager.create_object(10).unwrap();

    // three resident pages
    for i in 0..3 {
        get_one(&pager, &obj, i).unwrap().unbusy();
    }
    // one resident page with a (stale) slot still recorded
    obj.set_slot(0, 103).unwrap();
    // two pages living only in swap
    obj.set_slot(5, 101).unwrap();
    obj.set_slot(6, 102).unwrap();
    assert_eq!(pager.pages_only_in_swap(), 2);

    pager.detach(&obj);

    assert_eq!(alloc.frees.load(std::sync::atomic::Ordering::SeqCst), 3);
    for s in [101, 102, 103] {
        assert_eq!(swap.freed_count(s), 1, "slot {s} freed exactly once");
    }
    // only the swap-resident slots adjust the counter
    assert_eq!(pager.pages_only_in_swap(), 0);
}

#[test]
fn teardown_does_not_free_poisoned_slots() {
    let (pager, swap, _alloc, _mmu) = test_pager();
    let obj = pager.create_object(10).unwrap();
    obj.set_slot(4, slot::BAD).unwrap();
    pager.detach(&obj);
    assert_eq!(swap.freed_count(slot::BAD), 0);
    assert_eq!(pager.pages_only_in_swap(), 0);
}

#[test]
fn kernel_object_is_permanent() {
    let (pager, _swap, _alloc, _mmu) = test_pager();
    let kern = pager.kernel_object(128);
    assert!(kern.is_kernel());
    assert!(kern.is_noswap());
    assert!(!pager.is_registered(&kern));

    // reference/detach are no-ops; the object survives any number of them
    pager.reference(&kern);
    pager.detach(&kern);
    pager.detach(&kern);
    assert!(std::sync::Arc::ptr_eq(&kern, &pager.kernel_object(128)));

    // no-swap objects never report a slot
    assert_eq!(kern.find_slot(0), slot::NONE);
    assert_eq!(kern.set_slot(0, slot::NONE).unwrap(), slot::NONE);
}

#[test]
#[should_panic(expected = "no-swap")]
fn noswap_set_slot_is_fatal() {
    let (pager, _swap, _alloc, _mmu) = test_pager();
    let kern = pager.kernel_object(128);
    let _ = kern.set_slot(0, 7);
}

#[test]
fn kernel_enable_swap_transition() {
    let (pager, _swap, _alloc, _mmu) = test_pager();
    let kern = pager.kernel_object(1 << 20);
    pager.kernel_enable_swap();
    assert!(!kern.is_noswap());
    assert_eq!(kern.set_slot(3, 9).unwrap(), slot::NONE);
    assert_eq!(kern.find_slot(3), 9);
    // second call is a no-op
    pager.kernel_enable_swap();
    assert_eq!(kern.find_slot(3), 9);
}

#[test]
fn drop_swap_slot_frees_unless_poisoned() {
    let (pager, swap, _alloc, _mmu) = test_pager();
    let obj = pager.create_object(10).unwrap();

    obj.set_slot(2, 55).unwrap();
    assert_eq!(pager.pages_only_in_swap(), 1);
    pager.drop_swap_slot(&obj, 2);
    assert_eq!(obj.find_slot(2), slot::NONE);
    assert_eq!(swap.freed_count(55), 1);
    assert_eq!(pager.pages_only_in_swap(), 0);

    obj.set_slot(3, slot::BAD).unwrap();
    pager.drop_swap_slot(&obj, 3);
    assert_eq!(obj.find_slot(3), slot::NONE);
    assert_eq!(swap.freed_count(slot::BAD), 0);

    pager.detach(&obj);
}

/// Every slot recorded for a non-resident page counts toward the system
/// counter, and releasing it (directly or at teardown) gives the count back.
#[test]
fn recorded_slots_feed_the_swap_only_counter() {
    let (pager, swap, _alloc, _mmu) = test_pager();
    let obj = pager.create_object(10).unwrap();

    obj.set_slot(1, 44).unwrap();
    obj.set_slot(2, 45).unwrap();
    assert_eq!(pager.pages_only_in_swap(), 2);

    obj.set_slot(2, slot::NONE).unwrap();
    assert_eq!(pager.pages_only_in_swap(), 1);

    // detach must release slot 44 and its counter credit, not panic
    pager.detach(&obj);
    assert_eq!(pager.pages_only_in_swap(), 0);
    assert_eq!(swap.freed_count(44), 1);
}

#[test]
fn slots_under_resident_pages_are_not_counted() {
    let (pager, _swap, _alloc, _mmu) = test_pager();
    let obj = pager.create_object(10).unwrap();

    let page = get_one(&pager, &obj, 0).unwrap();
    page.unbusy();
    // a stale slot behind a resident page is not a "page only in swap"
    obj.set_slot(0, 66).unwrap();
    assert_eq!(pager.pages_only_in_swap(), 0);

    pager.detach(&obj);
    assert_eq!(pager.pages_only_in_swap(), 0);
}
