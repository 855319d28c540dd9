//! End-to-end use of compiled pointer array operations through the
//! process-wide compiler.

use std::ptr;
use std::sync::Barrier;
use std::thread;

use fora_abi::{compile, CompileState, NativeCodeCompiler, PointerArray};

#[test]
fn test_lookup_of_non_owned_address() {
    fora_console::init();

    let mut array: PointerArray<i64> = PointerArray::new();
    let resize = compile(&PointerArray::<i64>::resize_expr().unwrap());
    resize.call(&mut array, (100,)).unwrap();
    assert_eq!(array.count(), 100);

    let mut x = 42i64;
    let x_ptr: *mut i64 = &mut x;
    unsafe { array.set(10, x_ptr).unwrap() };

    let lookup = compile(&PointerArray::<i64>::lookup_expr().unwrap());
    assert_eq!(lookup.call(&mut array, (10,)), Ok(x_ptr));
    assert_eq!(unsafe { *lookup.call(&mut array, (10,)).unwrap() }, 42);

    // x lives on the stack; the array must not release it.
    assert_eq!(array.forget(10), Ok(x_ptr));
    drop(array);
    assert_eq!(x, 42);
}

#[test]
fn test_compiled_null_assignment_retracts_before_drop() {
    let mut array: PointerArray<i64> = PointerArray::with_count(11).unwrap();
    let mut x = 7i64;
    unsafe { array.set(10, &mut x).unwrap() };

    let assign = compile(&PointerArray::<i64>::assign_expr().unwrap());
    let count = compile(&PointerArray::<i64>::count_expr().unwrap());
    // Nulling through the compiled entry would release x, so retract first.
    array.forget(10).unwrap();
    unsafe { assign.call_unchecked(&mut array, (10, ptr::null_mut())).unwrap() };
    assert_eq!(count.call(&mut array, ()), Ok(11));
    assert!(array.at(10).unwrap().is_null());
}

#[test]
fn test_global_compiler_memoizes() {
    let expr = PointerArray::<[u8; 3]>::count_expr().unwrap();
    let global = NativeCodeCompiler::global();

    let first = compile(&expr);
    assert_eq!(global.state(expr.key()), CompileState::Compiled);
    let second = compile(&expr);
    assert!(first.same_artifact(&second));
}

#[test]
fn test_global_compile_from_many_threads() {
    const THREADS: usize = 6;
    let expr = PointerArray::<(u16, u16)>::lookup_expr().unwrap();
    let barrier = Barrier::new(THREADS);

    let compiled: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let (expr, barrier) = (&expr, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    let lookup = compile(expr);
                    let mut array = PointerArray::with_count(i + 1).unwrap();
                    array.put(i, Box::new((i as u16, 0))).unwrap();
                    let p = lookup.call(&mut array, (i as i64,)).unwrap();
                    assert_eq!(unsafe { *p }, (i as u16, 0));
                    lookup
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for c in &compiled {
        assert!(compiled[0].same_artifact(c));
    }
}

#[test]
fn test_compiled_array_moves_between_threads() {
    let resize = compile(&PointerArray::<String>::resize_expr().unwrap());
    let mut array = PointerArray::with_count(2).unwrap();
    array.put(1, Box::new("moved".to_string())).unwrap();

    let array = thread::spawn(move || {
        resize.call(&mut array, (4,)).unwrap();
        array
    })
    .join()
    .unwrap();

    assert_eq!(array.count(), 4);
    assert_eq!(array.get(1).unwrap().map(String::as_str), Some("moved"));
}
