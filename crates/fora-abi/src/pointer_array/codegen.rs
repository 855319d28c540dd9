//! Native lowering of [`PointerArray`] operations.
//!
//! Generated code reads and writes the array fields in place. Growth and
//! release go through two host helpers so allocation and `Drop` stay in Rust.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::types::I64;
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value};
use fora_core::{AbiError, ErrorKind, Result, STATUS_INVALID_ARGUMENT, STATUS_OK};

use super::{
    index_arg, negative_index, out_of_range, release, size_arg, size_error, PointerArray,
    CAPACITY_OFFSET, COUNT_OFFSET, SLOTS_OFFSET,
};
use crate::expr::{NativeSignature, NativeType, TypedNativeExpression};
use crate::jit::{CodegenError, Lowering, RuntimeSymbol};
use crate::receiver::NativeReceiver;

const RESERVE_SYMBOL: &str = "fora_pointer_array_reserve";
const RELEASE_SYMBOL: &str = "fora_pointer_array_release";

/// log2 of the slot width.
const SLOT_SHIFT: i64 = 3;

/// Member operations of [`PointerArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayOp {
    /// `(self) -> i64`
    Count,
    /// `(self, i64) -> ()`
    Resize,
    /// `(self, i64) -> ptr`
    Lookup,
    /// `(self, i64, ptr) -> ()`
    Assign,
}

impl<T: 'static> PointerArray<T> {
    pub fn count_expr() -> Result<TypedNativeExpression<Self, (), i64>> {
        TypedNativeExpression::member(ArrayOp::Count)
    }

    pub fn resize_expr() -> Result<TypedNativeExpression<Self, (i64,), ()>> {
        TypedNativeExpression::member(ArrayOp::Resize)
    }

    pub fn lookup_expr() -> Result<TypedNativeExpression<Self, (i64,), *mut T>> {
        TypedNativeExpression::member(ArrayOp::Lookup)
    }

    /// Owning assignment. Calls through this expression take ownership of
    /// the stored pointer, so they are only available as unchecked calls.
    pub fn assign_expr() -> Result<TypedNativeExpression<Self, (i64, *mut T), ()>> {
        TypedNativeExpression::member(ArrayOp::Assign)
    }
}

impl<T: 'static> NativeReceiver for PointerArray<T> {
    type Op = ArrayOp;

    fn op_name(op: ArrayOp) -> &'static str {
        match op {
            ArrayOp::Count => "count",
            ArrayOp::Resize => "resize",
            ArrayOp::Lookup => "lookup",
            ArrayOp::Assign => "assign",
        }
    }

    fn signature(op: ArrayOp) -> NativeSignature {
        use NativeType::{Ptr, Unit, I64 as Word};
        match op {
            ArrayOp::Count => NativeSignature::new(Vec::new(), Word),
            ArrayOp::Resize => NativeSignature::new([Word], Unit),
            ArrayOp::Lookup => NativeSignature::new([Word], Ptr),
            ArrayOp::Assign => NativeSignature::new([Word, Ptr], Unit),
        }
    }

    unsafe fn invoke_direct(&mut self, op: ArrayOp, args: &[i64]) -> Result<i64> {
        match op {
            ArrayOp::Count => Ok(self.count() as i64),
            ArrayOp::Resize => {
                self.resize(size_arg(args[0])?)?;
                Ok(0)
            }
            ArrayOp::Lookup => Ok(self.at(index_arg(args[0])?)? as usize as i64),
            ArrayOp::Assign => {
                self.set(index_arg(args[0])?, args[1] as usize as *mut T)?;
                Ok(0)
            }
        }
    }

    fn error_for(&self, op: ArrayOp, kind: ErrorKind, args: &[i64]) -> AbiError {
        match (op, kind) {
            (ArrayOp::Resize, ErrorKind::OutOfMemory) => AbiError::OutOfMemory {
                requested: args[0] as usize,
            },
            (ArrayOp::Resize, _) => size_error(args[0]),
            (ArrayOp::Lookup | ArrayOp::Assign, ErrorKind::InvalidArgument) => {
                negative_index(args[0])
            }
            (ArrayOp::Lookup | ArrayOp::Assign, _) => out_of_range(args[0], self.count()),
            (ArrayOp::Count, kind) => {
                AbiError::InvalidArgument(format!("count cannot fail, got {kind:?}"))
            }
        }
    }

    fn runtime_symbols() -> Vec<RuntimeSymbol> {
        vec![
            RuntimeSymbol::new(
                RESERVE_SYMBOL,
                reserve_slots::<T> as unsafe extern "C" fn(i64, i64) -> i64 as *const u8,
                2,
                true,
            ),
            RuntimeSymbol::new(
                RELEASE_SYMBOL,
                release_slot::<T> as unsafe extern "C" fn(i64) as *const u8,
                1,
                false,
            ),
        ]
    }

    fn lower(op: ArrayOp, lowering: &mut Lowering<'_, '_>) -> std::result::Result<(), CodegenError> {
        match op {
            ArrayOp::Count => {
                lower_count(lowering);
                Ok(())
            }
            ArrayOp::Resize => lower_resize(lowering),
            ArrayOp::Lookup => lower_lookup(lowering),
            ArrayOp::Assign => lower_assign(lowering),
        }
    }
}

/// Grows `array` to hold at least `n` slots. Returns a status word.
unsafe extern "C" fn reserve_slots<T>(array: i64, n: i64) -> i64 {
    let array = &mut *(array as usize as *mut PointerArray<T>);
    match array.reserve(n as usize) {
        Ok(()) => STATUS_OK,
        Err(e) => e.kind().status().unwrap_or(STATUS_INVALID_ARGUMENT),
    }
}

/// Releases one owned pointee.
unsafe extern "C" fn release_slot<T>(p: i64) {
    release(p as usize as *mut T);
}

fn load_field(lowering: &mut Lowering<'_, '_>, offset: i32) -> Value {
    let receiver = lowering.receiver();
    lowering
        .builder()
        .ins()
        .load(I64, MemFlags::trusted(), receiver, offset)
}

fn store_field(lowering: &mut Lowering<'_, '_>, value: Value, offset: i32) {
    let receiver = lowering.receiver();
    lowering
        .builder()
        .ins()
        .store(MemFlags::trusted(), value, receiver, offset);
}

fn slot_address(lowering: &mut Lowering<'_, '_>, slots: Value, index: Value) -> Value {
    let b = lowering.builder();
    let offset = b.ins().ishl_imm(index, SLOT_SHIFT);
    b.ins().iadd(slots, offset)
}

fn lower_count(lowering: &mut Lowering<'_, '_>) {
    let count = load_field(lowering, COUNT_OFFSET);
    lowering.return_ok(Some(count));
}

/// Checks argument 0 as an index and leaves the builder in a block where the
/// address of that slot is live.
fn emit_slot_address(lowering: &mut Lowering<'_, '_>) -> std::result::Result<Value, CodegenError> {
    let index = lowering.arg(0);
    let negative = lowering.create_block();
    let check_count = lowering.create_block();
    let out_of_range = lowering.create_block();
    let in_range = lowering.create_block();

    let b = lowering.builder();
    let is_negative = b.ins().icmp_imm(IntCC::SignedLessThan, index, 0);
    b.ins().brif(is_negative, negative, &[], check_count, &[]);

    b.switch_to_block(negative);
    lowering.return_error(ErrorKind::InvalidArgument)?;

    lowering.builder().switch_to_block(check_count);
    let count = load_field(lowering, COUNT_OFFSET);
    let b = lowering.builder();
    let fits = b.ins().icmp(IntCC::UnsignedLessThan, index, count);
    b.ins().brif(fits, in_range, &[], out_of_range, &[]);

    b.switch_to_block(out_of_range);
    lowering.return_error(ErrorKind::IndexOutOfRange)?;

    lowering.builder().switch_to_block(in_range);
    let slots = load_field(lowering, SLOTS_OFFSET);
    Ok(slot_address(lowering, slots, index))
}

fn lower_lookup(lowering: &mut Lowering<'_, '_>) -> std::result::Result<(), CodegenError> {
    let addr = emit_slot_address(lowering)?;
    let p = lowering
        .builder()
        .ins()
        .load(I64, MemFlags::trusted(), addr, 0);
    lowering.return_ok(Some(p));
    Ok(())
}

fn lower_assign(lowering: &mut Lowering<'_, '_>) -> std::result::Result<(), CodegenError> {
    let addr = emit_slot_address(lowering)?;
    let new = lowering.arg(1);
    let release_old = lowering.create_block();
    let done = lowering.create_block();

    let b = lowering.builder();
    let old = b.ins().load(I64, MemFlags::trusted(), addr, 0);
    b.ins().store(MemFlags::trusted(), new, addr, 0);
    let occupied = b.ins().icmp_imm(IntCC::NotEqual, old, 0);
    let replaced = b.ins().icmp(IntCC::NotEqual, old, new);
    let must_release = b.ins().band(occupied, replaced);
    b.ins().brif(must_release, release_old, &[], done, &[]);

    b.switch_to_block(release_old);
    lowering.call_runtime(RELEASE_SYMBOL, &[old])?;
    lowering.builder().ins().jump(done, &[]);

    lowering.builder().switch_to_block(done);
    lowering.return_ok(None);
    Ok(())
}

/// Emits resize:
///
/// ```text
/// n < 0              -> InvalidArgument
/// n > count:
///     n > capacity   -> status = reserve(self, n); non-zero status is returned
///     slots[count..n] = null; count = n
/// n < count:
///     count = n; release every non-null slots[n..old_count] in order
/// ```
fn lower_resize(lowering: &mut Lowering<'_, '_>) -> std::result::Result<(), CodegenError> {
    let n = lowering.arg(0);
    let receiver = lowering.receiver();

    let negative = lowering.create_block();
    let compare = lowering.create_block();
    let grow = lowering.create_block();
    let reserve = lowering.create_block();
    let reserve_failed = lowering.create_block();
    let fill_start = lowering.create_block();
    let fill_head = lowering.create_block();
    let fill_body = lowering.create_block();
    let fill_done = lowering.create_block();
    let not_growing = lowering.create_block();
    let shrink = lowering.create_block();
    let release_head = lowering.create_block();
    let release_body = lowering.create_block();
    let release_call = lowering.create_block();
    let release_next = lowering.create_block();
    let done = lowering.create_block();

    let b = lowering.builder();
    let is_negative = b.ins().icmp_imm(IntCC::SignedLessThan, n, 0);
    b.ins().brif(is_negative, negative, &[], compare, &[]);

    b.switch_to_block(negative);
    lowering.return_error(ErrorKind::InvalidArgument)?;

    lowering.builder().switch_to_block(compare);
    let count = load_field(lowering, COUNT_OFFSET);
    let b = lowering.builder();
    let growing = b.ins().icmp(IntCC::UnsignedGreaterThan, n, count);
    b.ins().brif(growing, grow, &[], not_growing, &[]);

    // Grow.
    b.switch_to_block(grow);
    let capacity = load_field(lowering, CAPACITY_OFFSET);
    let b = lowering.builder();
    let needs_storage = b.ins().icmp(IntCC::UnsignedGreaterThan, n, capacity);
    b.ins().brif(needs_storage, reserve, &[], fill_start, &[]);

    b.switch_to_block(reserve);
    let status = lowering
        .call_runtime(RESERVE_SYMBOL, &[receiver, n])?
        .ok_or_else(|| CodegenError::Codegen(format!("{RESERVE_SYMBOL} returns no status")))?;
    let b = lowering.builder();
    let failed = b.ins().icmp_imm(IntCC::NotEqual, status, STATUS_OK);
    b.ins().brif(failed, reserve_failed, &[], fill_start, &[]);

    b.switch_to_block(reserve_failed);
    lowering.return_status(status);

    lowering.builder().switch_to_block(fill_start);
    let slots = load_field(lowering, SLOTS_OFFSET);
    let b = lowering.builder();
    let i = b.append_block_param(fill_head, I64);
    b.ins().jump(fill_head, &[count]);

    b.switch_to_block(fill_head);
    let more = b.ins().icmp(IntCC::UnsignedLessThan, i, n);
    b.ins().brif(more, fill_body, &[], fill_done, &[]);

    b.switch_to_block(fill_body);
    let addr = slot_address(lowering, slots, i);
    let b = lowering.builder();
    let null = b.ins().iconst(I64, 0);
    b.ins().store(MemFlags::trusted(), null, addr, 0);
    let next = b.ins().iadd_imm(i, 1);
    b.ins().jump(fill_head, &[next]);

    b.switch_to_block(fill_done);
    store_field(lowering, n, COUNT_OFFSET);
    lowering.return_ok(None);

    // Shrink.
    let b = lowering.builder();
    b.switch_to_block(not_growing);
    let shrinking = b.ins().icmp(IntCC::UnsignedLessThan, n, count);
    b.ins().brif(shrinking, shrink, &[], done, &[]);

    b.switch_to_block(shrink);
    store_field(lowering, n, COUNT_OFFSET);
    let slots = load_field(lowering, SLOTS_OFFSET);
    let b = lowering.builder();
    let j = b.append_block_param(release_head, I64);
    b.ins().jump(release_head, &[n]);

    b.switch_to_block(release_head);
    let more = b.ins().icmp(IntCC::UnsignedLessThan, j, count);
    b.ins().brif(more, release_body, &[], done, &[]);

    b.switch_to_block(release_body);
    let addr = slot_address(lowering, slots, j);
    let b = lowering.builder();
    let p = b.ins().load(I64, MemFlags::trusted(), addr, 0);
    let occupied = b.ins().icmp_imm(IntCC::NotEqual, p, 0);
    b.ins().brif(occupied, release_call, &[], release_next, &[]);

    b.switch_to_block(release_call);
    lowering.call_runtime(RELEASE_SYMBOL, &[p])?;
    lowering.builder().ins().jump(release_next, &[]);

    let b = lowering.builder();
    b.switch_to_block(release_next);
    let next = b.ins().iadd_imm(j, 1);
    b.ins().jump(release_head, &[next]);

    lowering.builder().switch_to_block(done);
    lowering.return_ok(None);
    Ok(())
}
