//! Cranelift code generation for a single compiled entry.
//!
//! Each entry gets its own [`JITModule`]: the receiver's runtime helpers are
//! registered as symbols, imported into the entry function, and the
//! receiver's [`lower`](crate::NativeReceiver::lower) emits the body.

use std::collections::HashMap;

use cranelift_codegen::ir::types::I64;
use cranelift_codegen::ir::{
    AbiParam, Block, Function, InstBuilder, MemFlags, Signature, UserFuncName, Value,
};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use fora_config::CompilerConfig;
use fora_core::{ErrorKind, STATUS_OK};
use smallvec::SmallVec;
use thiserror::Error;

use crate::expr::{NativeSignature, MAX_NATIVE_ARGS};
use crate::receiver::NativeReceiver;

/// A host function generated code may call.
///
/// Every parameter and the optional result are `i64` words.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSymbol {
    pub name: &'static str,
    pub address: *const u8,
    pub params: usize,
    pub returns: bool,
}

impl RuntimeSymbol {
    pub fn new(name: &'static str, address: *const u8, params: usize, returns: bool) -> Self {
        Self {
            name,
            address,
            params,
            returns,
        }
    }
}

/// Internal code generation failure. Surfaces only as a panic message.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("module: {0}")]
    Module(#[from] cranelift_module::ModuleError),

    #[error("codegen: {0}")]
    Codegen(String),

    #[error("unknown runtime symbol `{0}`")]
    UnknownSymbol(&'static str),

    #[error("{0:?} has no status word")]
    NoStatus(ErrorKind),
}

/// Emission context handed to [`NativeReceiver::lower`].
///
/// The entry block is current when lowering starts. Every path must end in
/// one of the `return_*` methods.
pub struct Lowering<'a, 'f> {
    builder: &'a mut FunctionBuilder<'f>,
    module: &'a mut JITModule,
    imports: &'a HashMap<&'static str, FuncId>,
    receiver: Value,
    args: SmallVec<[Value; MAX_NATIVE_ARGS]>,
    out: Value,
}

impl<'a, 'f> Lowering<'a, 'f> {
    pub fn builder(&mut self) -> &mut FunctionBuilder<'f> {
        self.builder
    }

    /// Receiver pointer.
    pub fn receiver(&self) -> Value {
        self.receiver
    }

    /// Declared argument `idx`.
    pub fn arg(&self, idx: usize) -> Value {
        self.args[idx]
    }

    pub fn create_block(&mut self) -> Block {
        self.builder.create_block()
    }

    /// Writes `value` (if any) to the result slot and returns success.
    pub fn return_ok(&mut self, value: Option<Value>) {
        if let Some(value) = value {
            self.builder
                .ins()
                .store(MemFlags::trusted(), value, self.out, 0);
        }
        let status = self.builder.ins().iconst(I64, STATUS_OK);
        self.builder.ins().return_(&[status]);
    }

    /// Returns the status word of `kind`.
    pub fn return_error(&mut self, kind: ErrorKind) -> Result<(), CodegenError> {
        let code = kind.status().ok_or(CodegenError::NoStatus(kind))?;
        let status = self.builder.ins().iconst(I64, code);
        self.builder.ins().return_(&[status]);
        Ok(())
    }

    /// Returns a status word computed at run time.
    pub fn return_status(&mut self, status: Value) {
        self.builder.ins().return_(&[status]);
    }

    /// Calls a registered runtime symbol, returning its result if it has one.
    pub fn call_runtime(
        &mut self,
        name: &'static str,
        args: &[Value],
    ) -> Result<Option<Value>, CodegenError> {
        let func_id = *self
            .imports
            .get(name)
            .ok_or(CodegenError::UnknownSymbol(name))?;
        let func_ref = self
            .module
            .declare_func_in_func(func_id, self.builder.func);
        let call = self.builder.ins().call(func_ref, args);
        Ok(self.builder.inst_results(call).first().copied())
    }
}

pub(crate) fn make_jit_module(
    config: &CompilerConfig,
    symbols: &[RuntimeSymbol],
) -> Result<JITModule, CodegenError> {
    let setting = |e: settings::SetError| CodegenError::Codegen(format!("cranelift setting: {e}"));
    let mut flag_builder = settings::builder();
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(setting)?;
    flag_builder.set("is_pic", "false").map_err(setting)?;
    flag_builder
        .set("opt_level", config.opt_level.as_cranelift_str())
        .map_err(setting)?;
    flag_builder
        .set("enable_verifier", bool_flag(config.enable_verifier))
        .map_err(setting)?;
    flag_builder
        .set(
            "preserve_frame_pointers",
            bool_flag(config.preserve_frame_pointers),
        )
        .map_err(setting)?;

    let isa_builder = cranelift_native::builder()
        .map_err(|e| CodegenError::Codegen(format!("cranelift ISA builder: {e}")))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| CodegenError::Codegen(format!("cranelift ISA finish: {e}")))?;

    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    for symbol in symbols {
        builder.symbol(symbol.name, symbol.address);
    }
    Ok(JITModule::new(builder))
}

fn bool_flag(enabled: bool) -> &'static str {
    if enabled {
        "true"
    } else {
        "false"
    }
}

/// Compiles `op` of `R` into a fresh module and returns the entry address.
#[allow(clippy::result_large_err)]
pub(crate) fn compile_function<R: NativeReceiver>(
    op: R::Op,
    signature: &NativeSignature,
    config: &CompilerConfig,
) -> Result<(JITModule, *const u8), CodegenError> {
    let symbols = R::runtime_symbols();
    let mut module = make_jit_module(config, &symbols)?;
    let ptr_type = module.target_config().pointer_type();

    let mut imports = HashMap::with_capacity(symbols.len());
    for symbol in &symbols {
        let mut sig = module.make_signature();
        sig.params
            .extend((0..symbol.params).map(|_| AbiParam::new(I64)));
        if symbol.returns {
            sig.returns.push(AbiParam::new(I64));
        }
        let func_id = module.declare_function(symbol.name, Linkage::Import, &sig)?;
        imports.insert(symbol.name, func_id);
    }

    // (receiver, args..., out) -> status
    let mut sig = Signature::new(module.isa().default_call_conv());
    sig.params.push(AbiParam::new(ptr_type));
    sig.params
        .extend(signature.params.iter().map(|_| AbiParam::new(I64)));
    sig.params.push(AbiParam::new(ptr_type));
    sig.returns.push(AbiParam::new(I64));

    let func_id = module.declare_function("fora_entry", Linkage::Local, &sig)?;
    let mut func = Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), sig);
    let mut func_ctx = FunctionBuilderContext::new();

    {
        let mut builder = FunctionBuilder::new(&mut func, &mut func_ctx);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);

        let params = builder.block_params(entry).to_vec();
        let (receiver, rest) = params
            .split_first()
            .ok_or_else(|| CodegenError::Codegen("entry has no receiver".into()))?;
        let (out, args) = rest
            .split_last()
            .ok_or_else(|| CodegenError::Codegen("entry has no result slot".into()))?;

        let mut lowering = Lowering {
            builder: &mut builder,
            module: &mut module,
            imports: &imports,
            receiver: *receiver,
            args: args.iter().copied().collect(),
            out: *out,
        };
        R::lower(op, &mut lowering)?;

        builder.seal_all_blocks();
        builder.finalize();
    }

    let mut ctx = Context::for_function(func);
    module
        .define_function(func_id, &mut ctx)
        .map_err(|e| CodegenError::Codegen(format!("{e:?}")))?;
    module.clear_context(&mut ctx);
    module
        .finalize_definitions()
        .map_err(|e| CodegenError::Codegen(e.to_string()))?;

    let ptr = module.get_finalized_function(func_id);
    Ok((module, ptr))
}
