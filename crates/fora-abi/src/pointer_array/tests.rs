//! Tests for host pointer array semantics.

use std::ptr;
use std::sync::{Arc, Mutex};

use super::*;

/// Records its id in a shared log when dropped.
struct Tracked {
    id: u32,
    log: Arc<Mutex<Vec<u32>>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.log.lock().unwrap().push(self.id);
    }
}

fn tracked(id: u32, log: &Arc<Mutex<Vec<u32>>>) -> Box<Tracked> {
    Box::new(Tracked {
        id,
        log: Arc::clone(log),
    })
}

fn drops(log: &Arc<Mutex<Vec<u32>>>) -> Vec<u32> {
    log.lock().unwrap().clone()
}

#[test]
fn test_new_is_empty() {
    let array: PointerArray<u64> = PointerArray::new();
    assert_eq!(array.count(), 0);
    assert_eq!(array.capacity(), 0);
    assert!(array.is_empty());
    assert!(array.as_slice().is_empty());
}

#[test]
fn test_layout_offsets() {
    assert_eq!(SLOTS_OFFSET, 0);
    assert_eq!(COUNT_OFFSET, 8);
    assert_eq!(CAPACITY_OFFSET, 16);
    assert_eq!(std::mem::size_of::<PointerArray<String>>(), 24);
}

#[test]
fn test_grow_fills_with_null() {
    let mut array: PointerArray<u64> = PointerArray::new();
    array.resize(3).unwrap();
    assert_eq!(array.count(), 3);
    assert!(array.as_slice().iter().all(|p| p.is_null()));
}

#[test]
fn test_growth_is_amortized() {
    let mut array: PointerArray<u64> = PointerArray::new();
    array.resize(1).unwrap();
    assert_eq!(array.capacity(), 4);
    array.resize(5).unwrap();
    assert_eq!(array.capacity(), 8);
    array.resize(100).unwrap();
    assert_eq!(array.capacity(), 100);
}

#[test]
fn test_shrink_keeps_capacity() {
    let mut array: PointerArray<u64> = PointerArray::with_count(10).unwrap();
    let capacity = array.capacity();
    array.resize(2).unwrap();
    assert_eq!(array.count(), 2);
    assert_eq!(array.capacity(), capacity);
}

#[test]
fn test_regrow_after_shrink_yields_null() {
    let mut array: PointerArray<u64> = PointerArray::with_count(4).unwrap();
    array.put(3, Box::new(7)).unwrap();
    array.resize(1).unwrap();
    array.resize(4).unwrap();
    assert!(array.at(3).unwrap().is_null());
}

#[test]
fn test_shrink_releases_truncated_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut array = PointerArray::with_count(5).unwrap();
    for i in 0..5 {
        array.put(i, tracked(i as u32, &log)).unwrap();
    }
    array.clear(3).unwrap();
    assert_eq!(drops(&log), vec![3]);

    array.resize(1).unwrap();
    assert_eq!(drops(&log), vec![3, 1, 2, 4]);
    assert_eq!(array.get(0).unwrap().map(|t| t.id), Some(0));
}

#[test]
fn test_resize_to_same_count_is_noop() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut array = PointerArray::with_count(2).unwrap();
    array.put(1, tracked(1, &log)).unwrap();
    array.resize(2).unwrap();
    assert!(drops(&log).is_empty());
    assert!(!array.at(1).unwrap().is_null());
}

#[test]
fn test_at_out_of_range() {
    let array: PointerArray<u64> = PointerArray::with_count(3).unwrap();
    assert_eq!(
        array.at(3),
        Err(AbiError::IndexOutOfRange { index: 3, count: 3 })
    );
    assert_eq!(
        PointerArray::<u64>::new().at(0),
        Err(AbiError::IndexOutOfRange { index: 0, count: 0 })
    );
}

#[test]
fn test_set_replaces_and_releases_previous() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut array = PointerArray::with_count(1).unwrap();
    array.put(0, tracked(1, &log)).unwrap();
    array.put(0, tracked(2, &log)).unwrap();
    assert_eq!(drops(&log), vec![1]);
    assert_eq!(array.get(0).unwrap().map(|t| t.id), Some(2));
}

#[test]
fn test_set_same_pointer_is_noop() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut array = PointerArray::with_count(1).unwrap();
    let p = Box::into_raw(tracked(1, &log));
    unsafe {
        array.set(0, p).unwrap();
        array.set(0, p).unwrap();
    }
    assert!(drops(&log).is_empty());
    assert_eq!(array.at(0).unwrap(), p);
    drop(array);
    assert_eq!(drops(&log), vec![1]);
}

#[test]
fn test_set_null_releases_occupant() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut array = PointerArray::with_count(1).unwrap();
    array.put(0, tracked(9, &log)).unwrap();
    unsafe { array.set(0, ptr::null_mut()).unwrap() };
    assert_eq!(drops(&log), vec![9]);
    assert!(array.at(0).unwrap().is_null());
}

#[test]
fn test_set_out_of_range_takes_no_ownership() {
    let mut array: PointerArray<u64> = PointerArray::with_count(1).unwrap();
    let mut value = 5u64;
    let result = unsafe { array.set(4, &mut value) };
    assert_eq!(result, Err(AbiError::IndexOutOfRange { index: 4, count: 1 }));
    assert_eq!(value, 5);
}

#[test]
fn test_take_moves_out() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut array = PointerArray::with_count(2).unwrap();
    array.put(0, tracked(4, &log)).unwrap();

    let taken = array.take(0).unwrap().expect("occupied");
    assert_eq!(taken.id, 4);
    assert!(array.at(0).unwrap().is_null());
    assert!(array.take(1).unwrap().is_none());
    assert!(drops(&log).is_empty());

    drop(taken);
    assert_eq!(drops(&log), vec![4]);
}

#[test]
fn test_forget_retracts_without_release() {
    let mut array: PointerArray<u64> = PointerArray::with_count(11).unwrap();
    let mut x = 42u64;
    unsafe { array.set(10, &mut x).unwrap() };
    assert_eq!(unsafe { *array.at(10).unwrap() }, 42);

    let retracted = array.forget(10).unwrap();
    assert_eq!(retracted, &mut x as *mut u64);
    assert!(array.at(10).unwrap().is_null());
}

#[test]
fn test_drop_releases_every_occupant() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut array = PointerArray::with_count(4).unwrap();
    array.put(0, tracked(0, &log)).unwrap();
    array.put(2, tracked(2, &log)).unwrap();
    drop(array);
    assert_eq!(drops(&log), vec![0, 2]);
}

#[test]
fn test_negative_arguments() {
    assert_eq!(
        size_arg(-1),
        Err(AbiError::InvalidArgument("size -1 is negative".into()))
    );
    assert_eq!(
        index_arg(-3),
        Err(AbiError::InvalidArgument("index -3 is negative".into()))
    );
    assert_eq!(size_arg(7), Ok(7));
}

#[test]
fn test_unrepresentable_size_leaves_array_unchanged() {
    let mut array: PointerArray<u64> = PointerArray::with_count(2).unwrap();
    let n = isize::MAX as usize / 8 + 1;
    assert_eq!(
        array.resize(n),
        Err(AbiError::InvalidArgument(format!(
            "size {n} is not representable"
        )))
    );
    assert_eq!(array.count(), 2);
    assert_eq!(array.capacity(), 4);
}

#[test]
fn test_out_of_memory_leaves_array_unchanged() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut array = PointerArray::with_count(2).unwrap();
    array.put(1, tracked(1, &log)).unwrap();

    let n = isize::MAX as usize / 8;
    assert_eq!(array.resize(n), Err(AbiError::OutOfMemory { requested: n }));
    assert_eq!(array.count(), 2);
    assert_eq!(array.get(1).unwrap().map(|t| t.id), Some(1));
    assert!(drops(&log).is_empty());
}

#[test]
fn test_size_error_matches_host_errors() {
    assert_eq!(size_error(-2), size_arg(-2).unwrap_err());
    let n = isize::MAX as usize / 8 + 1;
    let mut array: PointerArray<u8> = PointerArray::new();
    assert_eq!(size_error(n as i64), array.resize(n).unwrap_err());
}
