//! Process-scoped memoization of compiled entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

use fora_config::CompilerConfig;
use tracing::{info, trace};

use super::compiler::compile_function;
use super::entry::{Compiled, CompiledEntry};
use crate::expr::{ExprKey, NativeArgs, NativeWord, TypedNativeExpression};
use crate::receiver::NativeReceiver;

/// One cache cell per expression key. The cell is the single point where the
/// first compilation of that key is serialized.
type Slot = Arc<OnceLock<Arc<CompiledEntry>>>;

static GLOBAL: OnceLock<NativeCodeCompiler> = OnceLock::new();

/// Compilation state of one expression.
///
/// `Compiled` is terminal; there is no transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileState {
    Uncompiled,
    Compiling,
    Compiled,
}

/// Compiles typed expressions to native code, at most once per expression.
///
/// Safe to share between threads. Concurrent first-time requests for the
/// same expression block on one compilation and all receive its artifact;
/// distinct expressions compile in parallel.
pub struct NativeCodeCompiler {
    config: CompilerConfig,
    cache: Mutex<HashMap<ExprKey, Slot>>,
    compilations: AtomicUsize,
}

impl NativeCodeCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
            compilations: AtomicUsize::new(0),
        }
    }

    /// The process-wide compiler, created with the default configuration on
    /// first use.
    pub fn global() -> &'static NativeCodeCompiler {
        GLOBAL.get_or_init(|| NativeCodeCompiler::new(CompilerConfig::default()))
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Returns a native callable for `expr`, compiling it on first request.
    ///
    /// # Panics
    ///
    /// Panics if Cranelift rejects the lowered IR. Expressions are validated
    /// at construction, so this indicates a bug in a receiver's lowering.
    pub fn compile<R, A, Ret>(&self, expr: &TypedNativeExpression<R, A, Ret>) -> Compiled<R, A, Ret>
    where
        R: NativeReceiver,
        A: NativeArgs,
        Ret: NativeWord,
    {
        let key = expr.key();
        let slot = self.slot(key);
        if let Some(entry) = slot.get() {
            trace!(
                event = "compile_cache_hit",
                receiver = key.receiver_name(),
                op = key.op(),
            );
            return Compiled::new(expr, Arc::clone(entry));
        }

        let entry = slot.get_or_init(|| Arc::new(self.build(expr)));
        Compiled::new(expr, Arc::clone(entry))
    }

    /// Current state of the expression identified by `key`.
    pub fn state(&self, key: &ExprKey) -> CompileState {
        match self.lock().get(key) {
            None => CompileState::Uncompiled,
            Some(slot) if slot.get().is_some() => CompileState::Compiled,
            Some(_) => CompileState::Compiling,
        }
    }

    /// Number of compilations performed so far.
    pub fn compilation_count(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }

    /// Number of expressions with a published artifact.
    pub fn cached_entries(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ExprKey, Slot>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &ExprKey) -> Slot {
        let mut cache = self.lock();
        if let Some(slot) = cache.get(key) {
            return Arc::clone(slot);
        }
        Arc::clone(cache.entry(key.clone()).or_default())
    }

    fn build<R, A, Ret>(&self, expr: &TypedNativeExpression<R, A, Ret>) -> CompiledEntry
    where
        R: NativeReceiver,
        A: NativeArgs,
        Ret: NativeWord,
    {
        let key = expr.key();
        info!(
            event = "compile_start",
            receiver = key.receiver_name(),
            op = key.op(),
        );
        let start = Instant::now();

        let (module, ptr) = compile_function::<R>(expr.op(), key.signature(), &self.config)
            .unwrap_or_else(|e| panic!("native compile of {key} failed: {e}"));

        let compilations = self.compilations.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            event = "compile_end",
            receiver = key.receiver_name(),
            op = key.op(),
            duration_us = start.elapsed().as_micros() as u64,
            compilations = compilations as u64,
        );

        CompiledEntry::new(key.clone(), module, ptr)
    }
}

impl Default for NativeCodeCompiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

/// Compiles `expr` with the process-wide compiler.
pub fn compile<R, A, Ret>(expr: &TypedNativeExpression<R, A, Ret>) -> Compiled<R, A, Ret>
where
    R: NativeReceiver,
    A: NativeArgs,
    Ret: NativeWord,
{
    NativeCodeCompiler::global().compile(expr)
}
