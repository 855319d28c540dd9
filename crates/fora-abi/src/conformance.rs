//! Differential testing of compiled entries against host operations.
//!
//! A [`ConformanceHarness`] replays one script of [`Step`]s twice: on a
//! receiver driven through [`TypedNativeExpression::invoke_direct`] and on a
//! receiver driven through [`Compiled`] entries. Elements are [`Probe`]s, so
//! each side reports which labelled values it holds and which it released.
//! Pointers differ between the sides and are compared by label.
//!
//! ```
//! use fora_abi::conformance::{ConformanceHarness, Step};
//! use fora_abi::NativeCodeCompiler;
//!
//! let compiler = NativeCodeCompiler::default();
//! let harness = ConformanceHarness::new(&compiler).unwrap();
//! harness
//!     .run(&[Step::Resize(3), Step::Assign(1, Some(7)), Step::Lookup(1), Step::Resize(0)])
//!     .assert_equivalent();
//! ```

use std::fmt;
use std::mem;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use fora_core::{AbiError, Result};

use crate::expr::TypedNativeExpression;
use crate::jit::{Compiled, NativeCodeCompiler};
use crate::pointer_array::PointerArray;

/// Labels of dropped probes, in drop order.
#[derive(Debug, Clone, Default)]
pub struct DropLog(Arc<Mutex<Vec<u64>>>);

impl DropLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, label: u64) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(label);
    }

    /// Drains the labels recorded so far.
    pub fn take(&self) -> Vec<u64> {
        mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Array element that records its label in a [`DropLog`] when dropped.
#[derive(Debug)]
pub struct Probe {
    label: u64,
    log: DropLog,
    armed: bool,
}

impl Probe {
    pub fn new(label: u64, log: &DropLog) -> Self {
        Self {
            label,
            log: log.clone(),
            armed: true,
        }
    }

    pub fn label(&self) -> u64 {
        self.label
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        if self.armed {
            self.log.record(self.label);
        }
    }
}

/// One operation in a conformance script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Count,
    Resize(i64),
    Lookup(i64),
    /// Stores a fresh probe with the given label, or null.
    Assign(i64, Option<u64>),
}

/// Successful result of a step. Pointers are reported by probe label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returned {
    Unit,
    Count(i64),
    Slot(Option<u64>),
}

/// Receiver state after one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub outcome: std::result::Result<Returned, AbiError>,
    pub count: usize,
    pub slots: Vec<Option<u64>>,
    /// Probes released during the step, in release order.
    pub released: Vec<u64>,
}

/// Where two runs of one script first disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Index of the step, or `None` for teardown.
    pub step: Option<usize>,
    pub direct: Observation,
    pub compiled: Observation,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(idx) => writeln!(f, "divergence at step {idx}")?,
            None => writeln!(f, "divergence at teardown")?,
        }
        writeln!(f, "  direct:   {:?}", self.direct)?;
        write!(f, "  compiled: {:?}", self.compiled)
    }
}

/// Observations of both runs of one script.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub steps: Vec<Step>,
    pub direct: Vec<Observation>,
    pub compiled: Vec<Observation>,
    /// Probes released when each receiver was dropped.
    pub direct_teardown: Vec<u64>,
    pub compiled_teardown: Vec<u64>,
}

impl ConformanceReport {
    pub fn first_divergence(&self) -> Option<Divergence> {
        let diverged = self
            .direct
            .iter()
            .zip(&self.compiled)
            .position(|(d, c)| d != c);
        if let Some(idx) = diverged {
            return Some(Divergence {
                step: Some(idx),
                direct: self.direct[idx].clone(),
                compiled: self.compiled[idx].clone(),
            });
        }
        if self.direct_teardown != self.compiled_teardown {
            return Some(Divergence {
                step: None,
                direct: teardown(&self.direct_teardown),
                compiled: teardown(&self.compiled_teardown),
            });
        }
        None
    }

    /// # Panics
    ///
    /// Panics with the first divergence, if any.
    pub fn assert_equivalent(&self) {
        if let Some(divergence) = self.first_divergence() {
            panic!("{divergence}\n  script: {:?}", self.steps);
        }
    }
}

fn teardown(released: &[u64]) -> Observation {
    Observation {
        outcome: Ok(Returned::Unit),
        count: 0,
        slots: Vec::new(),
        released: released.to_vec(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Path {
    Direct,
    Compiled,
}

type Array = PointerArray<Probe>;

/// Replays scripts on a direct and a compiled [`PointerArray<Probe>`].
pub struct ConformanceHarness {
    count_expr: TypedNativeExpression<Array, (), i64>,
    resize_expr: TypedNativeExpression<Array, (i64,), ()>,
    lookup_expr: TypedNativeExpression<Array, (i64,), *mut Probe>,
    assign_expr: TypedNativeExpression<Array, (i64, *mut Probe), ()>,
    count: Compiled<Array, (), i64>,
    resize: Compiled<Array, (i64,), ()>,
    lookup: Compiled<Array, (i64,), *mut Probe>,
    assign: Compiled<Array, (i64, *mut Probe), ()>,
}

impl ConformanceHarness {
    /// Compiles the four array operations with `compiler`.
    pub fn new(compiler: &NativeCodeCompiler) -> Result<Self> {
        let count_expr = Array::count_expr()?;
        let resize_expr = Array::resize_expr()?;
        let lookup_expr = Array::lookup_expr()?;
        let assign_expr = Array::assign_expr()?;
        Ok(Self {
            count: compiler.compile(&count_expr),
            resize: compiler.compile(&resize_expr),
            lookup: compiler.compile(&lookup_expr),
            assign: compiler.compile(&assign_expr),
            count_expr,
            resize_expr,
            lookup_expr,
            assign_expr,
        })
    }

    /// Runs `steps` on fresh receivers, then drops them.
    pub fn run(&self, steps: &[Step]) -> ConformanceReport {
        let (direct, direct_teardown) = self.replay(Path::Direct, steps);
        let (compiled, compiled_teardown) = self.replay(Path::Compiled, steps);
        ConformanceReport {
            steps: steps.to_vec(),
            direct,
            compiled,
            direct_teardown,
            compiled_teardown,
        }
    }

    fn replay(&self, path: Path, steps: &[Step]) -> (Vec<Observation>, Vec<u64>) {
        let log = DropLog::new();
        let mut array = Array::new();
        let observations = steps
            .iter()
            .map(|step| self.apply(path, &mut array, &log, *step))
            .collect();
        drop(array);
        (observations, log.take())
    }

    fn apply(&self, path: Path, array: &mut Array, log: &DropLog, step: Step) -> Observation {
        let outcome = match step {
            Step::Count => match path {
                Path::Direct => self.count_expr.call_direct(array, ()),
                Path::Compiled => self.count.call(array, ()),
            }
            .map(Returned::Count),
            Step::Resize(n) => match path {
                Path::Direct => self.resize_expr.call_direct(array, (n,)),
                Path::Compiled => self.resize.call(array, (n,)),
            }
            .map(|()| Returned::Unit),
            Step::Lookup(index) => match path {
                Path::Direct => self.lookup_expr.call_direct(array, (index,)),
                Path::Compiled => self.lookup.call(array, (index,)),
            }
            .map(|p| Returned::Slot(label_of(p))),
            Step::Assign(index, label) => self.assign(path, array, log, index, label),
        };

        Observation {
            outcome,
            count: array.count(),
            slots: array.as_slice().iter().map(|&p| label_of(p)).collect(),
            released: log.take(),
        }
    }

    fn assign(
        &self,
        path: Path,
        array: &mut Array,
        log: &DropLog,
        index: i64,
        label: Option<u64>,
    ) -> std::result::Result<Returned, AbiError> {
        let p = label.map_or(ptr::null_mut(), |label| {
            Box::into_raw(Box::new(Probe::new(label, log)))
        });
        // SAFETY: p is null or a fresh Box owned by nobody else.
        let result = unsafe {
            match path {
                Path::Direct => self.assign_expr.invoke_direct(array, (index, p)),
                Path::Compiled => self.assign.call_unchecked(array, (index, p)),
            }
        };
        if result.is_err() && !p.is_null() {
            // A failed assignment takes no ownership.
            let mut rejected = unsafe { Box::from_raw(p) };
            rejected.armed = false;
        }
        result.map(|()| Returned::Unit)
    }
}

fn label_of(p: *mut Probe) -> Option<u64> {
    // SAFETY: non-null slots point to live probes owned by the array.
    unsafe { p.as_ref() }.map(Probe::label)
}
