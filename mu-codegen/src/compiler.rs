//! Main native code compiler
//!
//! Each selected function version becomes one exported native function.
//! Mu basic blocks map onto Cranelift blocks with the same parameters, so
//! Mu's block-local SSA variables translate directly to Cranelift values.
//! Callees outside the selection are declared as imports and resolved by the
//! system loader.
//!
//! `int<1>` values are kept as 0 or 1 in an 8-bit register. Every operation
//! that could leave other bits set masks its result, and signed operations
//! first widen the bit to 0 or -1.
//!
//! Global cells used by the compiled code are defined in the object as
//! zero-initialised exported data.

use anyhow::{anyhow, bail, Context as _, Result};
use cranelift::prelude::*;
use cranelift_codegen::isa;
use cranelift_frontend::Switch;
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use mu_core::ir::{
    BasicBlockNode, BinOptr, CmpOptr, ConstNode, ConvOptr, FuncVerNode, InstNode, TypeNode,
};
use mu_core::{CompileFailure, Error, MuId, Namespace, Node};

use crate::symbols::SymbolTable;
use crate::target::CompilationTarget;
use crate::types::{
    field_offset, int_len, int_type, layout, lower_signature, lower_type, type_node,
};
use crate::CodegenOptions;

/// A function version chosen for compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected {
    pub func: MuId,
    pub ver: MuId,
}

/// Native code compiler
pub struct NativeCompiler {
    module: ObjectModule,
    target: CompilationTarget,
    ptr: Type,
    symbols: SymbolTable,
    declared: FxHashMap<MuId, FuncId>,
    globals: FxHashMap<MuId, DataId>,
}

impl NativeCompiler {
    /// Create a new native compiler
    pub fn new(options: &CodegenOptions) -> Result<Self> {
        let target = CompilationTarget::from_triple(&options.target)
            .map_err(|e| anyhow!("Failed to parse target triple: {}", e))?;

        let mut flag_builder = settings::builder();

        let opt_level = match options.opt_level {
            0 => "none",
            1 | 2 => "speed",
            _ => "speed_and_size",
        };
        flag_builder.set("opt_level", opt_level)?;

        if target.pic {
            flag_builder.set("is_pic", "true")?;
        }

        let isa_builder = if target.is_host() {
            cranelift_native::builder()
                .map_err(|e| anyhow!("Failed to create ISA builder: {}", e))?
        } else {
            isa::lookup(target.triple.clone())
                .map_err(|e| anyhow!("Unsupported target {}: {}", target.triple, e))?
        };
        let isa = isa_builder.finish(settings::Flags::new(flag_builder))?;
        let ptr = isa.pointer_type();

        let builder =
            ObjectBuilder::new(isa, "mu_bundle", cranelift_module::default_libcall_names())?;
        let module = ObjectModule::new(builder);

        Ok(Self {
            module,
            target,
            ptr,
            symbols: SymbolTable::new(),
            declared: FxHashMap::default(),
            globals: FxHashMap::default(),
        })
    }

    pub fn target(&self) -> &CompilationTarget {
        &self.target
    }

    /// Compile the selected versions into the bytes of one object file
    ///
    /// Every version is attempted; if any fails, all failures are returned
    /// together and no object is produced.
    pub fn compile(mut self, ns: &Namespace, selected: &[Selected]) -> mu_core::Result<Vec<u8>> {
        let mut failures = Vec::new();

        // Exports first so that they keep their plain symbol names
        let mut ready = Vec::with_capacity(selected.len());
        for sel in selected {
            match self.declare(ns, sel.func, Linkage::Export) {
                Ok(_) => ready.push(*sel),
                Err(e) => failures.push(failure(ns, sel.ver, e)),
            }
        }

        for sel in ready {
            if let Err(e) = self.define(ns, sel) {
                failures.push(failure(ns, sel.ver, e));
            }
        }

        if !failures.is_empty() {
            warn!(failed = failures.len(), "compilation failed");
            return Err(Error::Compile(failures));
        }

        let object = self.module.finish();
        let bytes = object
            .emit()
            .map_err(|e| anyhow!("Failed to emit object file: {}", e))?;
        Ok(bytes)
    }

    fn func_sig(ns: &Namespace, func: MuId) -> Result<MuId> {
        match ns.node(func) {
            Some(Node::Func(node)) => Ok(node.sig),
            _ => bail!("{} is not a committed function", func),
        }
    }

    fn signature(&self, ns: &Namespace, sig: MuId) -> Result<Signature> {
        let mut signature = self.module.make_signature();
        lower_signature(ns, sig, self.ptr, &mut signature)?;
        Ok(signature)
    }

    /// Declare `func` once; later declarations return the first one
    fn declare(&mut self, ns: &Namespace, func: MuId, linkage: Linkage) -> Result<FuncId> {
        if let Some(id) = self.declared.get(&func) {
            return Ok(*id);
        }
        let signature = self.signature(ns, Self::func_sig(ns, func)?)?;
        let symbol = self.symbols.assign(ns, func);
        let id = self.module.declare_function(&symbol, linkage, &signature)?;
        self.declared.insert(func, id);
        debug!(%func, symbol = %symbol, ?linkage, "function declared");
        Ok(id)
    }

    /// Define a global cell once, as zeroed data exported under its symbol
    fn global(&mut self, ns: &Namespace, cell: MuId) -> Result<DataId> {
        if let Some(id) = self.globals.get(&cell) {
            return Ok(*id);
        }
        let ty = match ns.node(cell) {
            Some(Node::GlobalCell(node)) => node.ty,
            _ => bail!("{} is not a committed global cell", cell),
        };
        let (size, align) = layout(ns, ty, self.ptr)?;
        let symbol = self.symbols.assign(ns, cell);
        let id = self
            .module
            .declare_data(&symbol, Linkage::Export, true, false)?;

        let mut data = DataDescription::new();
        data.define_zeroinit(size.max(1) as usize);
        data.set_align(align);
        self.module.define_data(id, &data)?;

        self.globals.insert(cell, id);
        debug!(%cell, symbol = %symbol, size, "global cell defined");
        Ok(id)
    }

    fn define(&mut self, ns: &Namespace, sel: Selected) -> Result<()> {
        let func_id = self
            .declared
            .get(&sel.func)
            .copied()
            .ok_or_else(|| anyhow!("{} was not declared", sel.func))?;
        let ver = match ns.node(sel.ver) {
            Some(Node::FuncVer(ver)) => ver,
            _ => bail!("{} is not a committed function version", sel.ver),
        };

        let mut ctx = self.module.make_context();
        ctx.func.signature = self.signature(ns, Self::func_sig(ns, sel.func)?)?;

        let mut func_ctx = FunctionBuilderContext::new();
        let builder = FunctionBuilder::new(&mut ctx.func, &mut func_ctx);
        FunctionLowering {
            ns,
            compiler: &mut *self,
            builder,
            blocks: FxHashMap::default(),
            values: FxHashMap::default(),
        }
        .lower(sel.func, ver)?;

        self.module
            .define_function(func_id, &mut ctx)
            .map_err(|e| anyhow!("Failed to define function: {:?}", e))?;
        self.module.clear_context(&mut ctx);

        debug!(
            func_ver = %sel.ver,
            symbol = self.symbols.get(sel.func).unwrap_or_default(),
            "function version compiled"
        );
        Ok(())
    }
}

fn failure(ns: &Namespace, ver: MuId, err: anyhow::Error) -> CompileFailure {
    CompileFailure {
        func_ver: ver,
        name: ns.name_of(ver).map(str::to_string),
        message: format!("{:#}", err),
    }
}

fn label(ns: &Namespace, id: MuId) -> String {
    match ns.name_of(id) {
        Some(name) => format!("{} ({})", id, name),
        None => id.to_string(),
    }
}

/// Low `len` bits of a literal; 128-bit integers sign-extend the literal
fn int_bits(value: u64, len: u32) -> u128 {
    if len >= 128 {
        value as i64 as i128 as u128
    } else if len >= 64 {
        u128::from(value)
    } else {
        u128::from(value & ((1u64 << len) - 1))
    }
}

enum Condition {
    Int(IntCC),
    Float(FloatCC),
    Always(bool),
}

fn condition(op: CmpOptr) -> Condition {
    match op {
        CmpOptr::Eq => Condition::Int(IntCC::Equal),
        CmpOptr::Ne => Condition::Int(IntCC::NotEqual),
        CmpOptr::Sge => Condition::Int(IntCC::SignedGreaterThanOrEqual),
        CmpOptr::Sgt => Condition::Int(IntCC::SignedGreaterThan),
        CmpOptr::Sle => Condition::Int(IntCC::SignedLessThanOrEqual),
        CmpOptr::Slt => Condition::Int(IntCC::SignedLessThan),
        CmpOptr::Uge => Condition::Int(IntCC::UnsignedGreaterThanOrEqual),
        CmpOptr::Ugt => Condition::Int(IntCC::UnsignedGreaterThan),
        CmpOptr::Ule => Condition::Int(IntCC::UnsignedLessThanOrEqual),
        CmpOptr::Ult => Condition::Int(IntCC::UnsignedLessThan),
        CmpOptr::Ffalse => Condition::Always(false),
        CmpOptr::Ftrue => Condition::Always(true),
        CmpOptr::Foeq => Condition::Float(FloatCC::Equal),
        CmpOptr::Fogt => Condition::Float(FloatCC::GreaterThan),
        CmpOptr::Foge => Condition::Float(FloatCC::GreaterThanOrEqual),
        CmpOptr::Folt => Condition::Float(FloatCC::LessThan),
        CmpOptr::Fole => Condition::Float(FloatCC::LessThanOrEqual),
        CmpOptr::Fone => Condition::Float(FloatCC::OrderedNotEqual),
        CmpOptr::Ford => Condition::Float(FloatCC::Ordered),
        CmpOptr::Fueq => Condition::Float(FloatCC::UnorderedOrEqual),
        CmpOptr::Fugt => Condition::Float(FloatCC::UnorderedOrGreaterThan),
        CmpOptr::Fuge => Condition::Float(FloatCC::UnorderedOrGreaterThanOrEqual),
        CmpOptr::Fult => Condition::Float(FloatCC::UnorderedOrLessThan),
        CmpOptr::Fule => Condition::Float(FloatCC::UnorderedOrLessThanOrEqual),
        CmpOptr::Fune => Condition::Float(FloatCC::NotEqual),
        CmpOptr::Funo => Condition::Float(FloatCC::Unordered),
    }
}

/// Translation state for one function version
struct FunctionLowering<'a, 'f> {
    ns: &'a Namespace,
    compiler: &'a mut NativeCompiler,
    builder: FunctionBuilder<'f>,
    blocks: FxHashMap<MuId, Block>,
    /// Mu local variable -> the Cranelift value holding it
    values: FxHashMap<MuId, Value>,
}

impl<'a, 'f> FunctionLowering<'a, 'f> {
    fn lower(mut self, func: MuId, ver: &'a FuncVerNode) -> Result<()> {
        let ns = self.ns;
        let ptr = self.compiler.ptr;
        let sig = NativeCompiler::func_sig(ns, func)?;
        let param_types = match ns.node(sig) {
            Some(Node::FuncSig(node)) => node.params.clone(),
            _ => bail!("{} is not a committed function signature", sig),
        };

        let mut bodies = Vec::with_capacity(ver.blocks.len());
        for id in &ver.blocks {
            let bb = self.block_node(*id)?;
            let block = self.builder.create_block();
            for (_, ty) in &bb.params {
                let ty = lower_type(ns, *ty, ptr)?;
                self.builder.append_block_param(block, ty);
            }
            self.blocks.insert(*id, block);
            bodies.push((block, bb));
        }

        // A separate native entry block, since the Mu entry block may be a
        // branch target
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        self.builder.switch_to_block(entry);
        let mut params = self.builder.block_params(entry).to_vec();
        // C callers only guarantee the low bit of an int<1> argument
        for (param, ty) in params.iter_mut().zip(&param_types) {
            if self.is_bool(*ty) {
                *param = self.builder.ins().band_imm(*param, 1);
            }
        }
        let first = bodies
            .first()
            .map(|(block, _)| *block)
            .ok_or_else(|| anyhow!("function version has no blocks"))?;
        self.builder.ins().jump(first, &params);

        for (block, bb) in bodies {
            self.builder.switch_to_block(block);
            let params = self.builder.block_params(block).to_vec();
            for ((var, _), value) in bb.params.iter().zip(params) {
                self.values.insert(*var, value);
            }
            for id in &bb.insts {
                let inst = match ns.node(*id) {
                    Some(Node::Inst(inst)) => inst,
                    _ => bail!("{} is not a committed instruction", id),
                };
                self.lower_inst(inst)
                    .with_context(|| format!("instruction {}", label(ns, *id)))?;
            }
        }

        self.builder.seal_all_blocks();
        self.builder.finalize();
        Ok(())
    }

    fn is_bool(&self, ty: MuId) -> bool {
        matches!(type_node(self.ns, ty), Ok(TypeNode::Int { len: 1 }))
    }

    fn block_node(&self, id: MuId) -> Result<&'a BasicBlockNode> {
        let ns = self.ns;
        match ns.node(id) {
            Some(Node::BasicBlock(bb)) => Ok(bb),
            _ => bail!("{} is not a committed basic block", id),
        }
    }

    fn lower_inst(&mut self, inst: &'a InstNode) -> Result<()> {
        match inst {
            InstNode::BinOp {
                result,
                op,
                ty,
                lhs,
                rhs,
            } => {
                let lhs = self.operand(*lhs)?;
                let rhs = self.operand(*rhs)?;
                let value = if !op.is_float() && self.is_bool(*ty) {
                    self.bool_binop(*op, lhs, rhs)?
                } else {
                    self.binop(*op, lhs, rhs)?
                };
                self.values.insert(*result, value);
            }
            InstNode::Cmp {
                result,
                op,
                ty,
                lhs,
                rhs,
            } => {
                let mut lhs = self.operand(*lhs)?;
                let mut rhs = self.operand(*rhs)?;
                let signed = matches!(op, CmpOptr::Sge | CmpOptr::Sgt | CmpOptr::Sle | CmpOptr::Slt);
                if signed && self.is_bool(*ty) {
                    lhs = self.builder.ins().ineg(lhs);
                    rhs = self.builder.ins().ineg(rhs);
                }
                let value = match condition(*op) {
                    Condition::Int(cc) => self.builder.ins().icmp(cc, lhs, rhs),
                    Condition::Float(cc) => self.builder.ins().fcmp(cc, lhs, rhs),
                    Condition::Always(flag) => self.builder.ins().iconst(types::I8, i64::from(flag)),
                };
                self.values.insert(*result, value);
            }
            InstNode::Conv {
                result,
                op,
                from,
                to,
                operand,
            } => {
                let operand = self.operand(*operand)?;
                let value = self.conv(*op, *from, *to, operand)?;
                self.values.insert(*result, value);
            }
            InstNode::Select {
                result,
                cond,
                if_true,
                if_false,
                ..
            } => {
                let cond = self.operand(*cond)?;
                let if_true = self.operand(*if_true)?;
                let if_false = self.operand(*if_false)?;
                let value = self.builder.ins().select(cond, if_true, if_false);
                self.values.insert(*result, value);
            }
            InstNode::Branch { dest } => {
                let (block, args) = self.dest(*dest)?;
                self.builder.ins().jump(block, &args);
            }
            InstNode::Branch2 {
                cond,
                if_true,
                if_false,
            } => {
                let cond = self.operand(*cond)?;
                let (then_block, then_args) = self.dest(*if_true)?;
                let (else_block, else_args) = self.dest(*if_false)?;
                self.builder
                    .ins()
                    .brif(cond, then_block, &then_args, else_block, &else_args);
            }
            InstNode::Switch {
                ty,
                operand,
                default,
                cases,
            } => self.switch(*ty, *operand, *default, cases)?,
            InstNode::Call {
                results,
                sig,
                callee,
                args,
            } => {
                let values = self.call(*sig, *callee, args)?;
                for (result, value) in results.iter().zip(values) {
                    self.values.insert(*result, value);
                }
            }
            InstNode::TailCall { sig, callee, args } => {
                let values = self.call(*sig, *callee, args)?;
                self.builder.ins().return_(&values);
            }
            InstNode::Ret { values } => {
                let values = self.operands(values)?;
                self.builder.ins().return_(&values);
            }
            InstNode::CCall {
                results,
                sig,
                callee,
                args,
                ..
            } => {
                let target = self.operand(*callee)?;
                let values = self.call_indirect(*sig, target, args)?;
                for (result, value) in results.iter().zip(values) {
                    self.values.insert(*result, value);
                }
            }
            InstNode::Alloca { result, ty } => {
                let value = self.alloca(*ty)?;
                self.values.insert(*result, value);
            }
            InstNode::GetFieldIRef {
                result,
                ref_ty,
                index,
                operand,
                ..
            } => {
                let base = self.operand(*operand)?;
                let offset = field_offset(self.ns, *ref_ty, *index, self.compiler.ptr)?;
                let value = self.builder.ins().iadd_imm(base, offset as i64);
                self.values.insert(*result, value);
            }
            InstNode::GetElemIRef {
                result,
                ref_ty,
                index_ty,
                operand,
                index,
                ..
            } => {
                let elem = match type_node(self.ns, *ref_ty)? {
                    TypeNode::Array { elem, .. } => *elem,
                    _ => bail!("{} is not an array type", label(self.ns, *ref_ty)),
                };
                let value = self.offset_address(*operand, elem, *index_ty, *index)?;
                self.values.insert(*result, value);
            }
            InstNode::ShiftIRef {
                result,
                ref_ty,
                offset_ty,
                operand,
                offset,
                ..
            } => {
                let value = self.offset_address(*operand, *ref_ty, *offset_ty, *offset)?;
                self.values.insert(*result, value);
            }
            InstNode::Load {
                result,
                ord,
                ref_ty,
                loc,
                ..
            } => {
                let ty = lower_type(self.ns, *ref_ty, self.compiler.ptr)?;
                let addr = self.operand(*loc)?;
                let mut value = if ord.is_atomic() {
                    self.builder.ins().atomic_load(ty, MemFlags::new(), addr)
                } else {
                    self.builder.ins().load(ty, MemFlags::new(), addr, 0)
                };
                if self.is_bool(*ref_ty) {
                    value = self.builder.ins().band_imm(value, 1);
                }
                self.values.insert(*result, value);
            }
            InstNode::Store {
                ord, loc, value, ..
            } => {
                let addr = self.operand(*loc)?;
                let value = self.operand(*value)?;
                if ord.is_atomic() {
                    self.builder.ins().atomic_store(MemFlags::new(), value, addr);
                } else {
                    self.builder.ins().store(MemFlags::new(), value, addr, 0);
                }
            }
        }
        Ok(())
    }

    /// A fresh zeroed stack cell of `ty`; executing the same ALLOCA again
    /// reuses and re-zeroes the cell
    fn alloca(&mut self, ty: MuId) -> Result<Value> {
        let ptr = self.compiler.ptr;
        let (size, align) = layout(self.ns, ty, ptr)?;
        let size = u32::try_from(size)
            .map_err(|_| anyhow!("{} is too large for the stack", label(self.ns, ty)))?;
        let slot = self
            .builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size));
        let addr = self.builder.ins().stack_addr(ptr, slot, 0);
        if size > 0 {
            let config = self.compiler.module.target_config();
            self.builder.emit_small_memset(
                config,
                addr,
                0,
                u64::from(size),
                align.min(8) as u8,
                MemFlags::new(),
            );
        }
        Ok(addr)
    }

    /// `base + index * sizeof(elem)`, with the index sign-extended
    fn offset_address(&mut self, base: MuId, elem: MuId, index_ty: MuId, index: MuId) -> Result<Value> {
        let ptr = self.compiler.ptr;
        let (size, _) = layout(self.ns, elem, ptr)?;
        let base = self.operand(base)?;
        let mut index = self.operand(index)?;

        if self.is_bool(index_ty) {
            index = self.builder.ins().ineg(index);
        }
        let index_reg = lower_type(self.ns, index_ty, ptr)?;
        if index_reg.bits() < ptr.bits() {
            index = self.builder.ins().sextend(ptr, index);
        } else if index_reg.bits() > ptr.bits() {
            index = self.builder.ins().ireduce(ptr, index);
        }

        let scaled = self.builder.ins().imul_imm(index, size as i64);
        Ok(self.builder.ins().iadd(base, scaled))
    }

    /// The native value of a variable, constant or function operand
    fn operand(&mut self, id: MuId) -> Result<Value> {
        if let Some(value) = self.values.get(&id) {
            return Ok(*value);
        }
        let ns = self.ns;
        match ns.node(id) {
            Some(Node::Const(constant)) => self.constant(constant),
            Some(Node::Func(_)) => {
                let func_id = self.compiler.declare(ns, id, Linkage::Import)?;
                let func_ref = self
                    .compiler
                    .module
                    .declare_func_in_func(func_id, self.builder.func);
                Ok(self.builder.ins().func_addr(self.compiler.ptr, func_ref))
            }
            Some(Node::GlobalCell(_)) => {
                let data_id = self.compiler.global(ns, id)?;
                let gv = self
                    .compiler
                    .module
                    .declare_data_in_func(data_id, self.builder.func);
                Ok(self.builder.ins().symbol_value(self.compiler.ptr, gv))
            }
            _ => bail!("{} has no value in this block", label(ns, id)),
        }
    }

    fn operands(&mut self, ids: &[MuId]) -> Result<Vec<Value>> {
        ids.iter().map(|id| self.operand(*id)).collect()
    }

    fn constant(&mut self, constant: &ConstNode) -> Result<Value> {
        match constant {
            ConstNode::Int { ty, value } => {
                let len = int_len(self.ns, *ty)?;
                self.int_const(len, *value)
            }
            ConstNode::Float { value, .. } => Ok(self.builder.ins().f32const(*value)),
            ConstNode::Double { value, .. } => Ok(self.builder.ins().f64const(*value)),
            ConstNode::Null { .. } => Ok(self.builder.ins().iconst(self.compiler.ptr, 0)),
            ConstNode::Seq { .. } => {
                bail!("aggregate constants are not supported by the code generator")
            }
            ConstNode::Extern { ty, symbol } => self.extern_address(*ty, symbol),
        }
    }

    /// Address of an external symbol: a function for `ufuncptr`, data otherwise
    fn extern_address(&mut self, ty: MuId, symbol: &str) -> Result<Value> {
        let ns = self.ns;
        let ptr = self.compiler.ptr;
        if let TypeNode::UFuncPtr { sig } = type_node(ns, ty)? {
            let signature = self.compiler.signature(ns, *sig)?;
            let func_id = self
                .compiler
                .module
                .declare_function(symbol, Linkage::Import, &signature)?;
            let func_ref = self
                .compiler
                .module
                .declare_func_in_func(func_id, self.builder.func);
            return Ok(self.builder.ins().func_addr(ptr, func_ref));
        }
        let data_id = self
            .compiler
            .module
            .declare_data(symbol, Linkage::Import, true, false)?;
        let gv = self
            .compiler
            .module
            .declare_data_in_func(data_id, self.builder.func);
        Ok(self.builder.ins().symbol_value(ptr, gv))
    }

    fn int_const(&mut self, len: u32, value: u64) -> Result<Value> {
        let ty = int_type(len)
            .ok_or_else(|| anyhow!("int<{}> is not supported by the code generator", len))?;
        if ty == types::I128 {
            let low = self.builder.ins().iconst(types::I64, value as i64);
            return Ok(self.builder.ins().sextend(types::I128, low));
        }
        Ok(self.builder.ins().iconst(ty, int_bits(value, len) as i64))
    }

    fn binop(&mut self, op: BinOptr, lhs: Value, rhs: Value) -> Result<Value> {
        let ins = self.builder.ins();
        Ok(match op {
            BinOptr::Add => ins.iadd(lhs, rhs),
            BinOptr::Sub => ins.isub(lhs, rhs),
            BinOptr::Mul => ins.imul(lhs, rhs),
            BinOptr::Sdiv => ins.sdiv(lhs, rhs),
            BinOptr::Srem => ins.srem(lhs, rhs),
            BinOptr::Udiv => ins.udiv(lhs, rhs),
            BinOptr::Urem => ins.urem(lhs, rhs),
            BinOptr::Shl => ins.ishl(lhs, rhs),
            BinOptr::Lshr => ins.ushr(lhs, rhs),
            BinOptr::Ashr => ins.sshr(lhs, rhs),
            BinOptr::And => ins.band(lhs, rhs),
            BinOptr::Or => ins.bor(lhs, rhs),
            BinOptr::Xor => ins.bxor(lhs, rhs),
            BinOptr::Fadd => ins.fadd(lhs, rhs),
            BinOptr::Fsub => ins.fsub(lhs, rhs),
            BinOptr::Fmul => ins.fmul(lhs, rhs),
            BinOptr::Fdiv => ins.fdiv(lhs, rhs),
            BinOptr::Frem => bail!("FREM is not supported by the code generator"),
        })
    }

    /// Integer arithmetic on `int<1>`. Signed division reads the bit as 0 or
    /// -1; shifts are the identity since the amount is taken modulo 1.
    fn bool_binop(&mut self, op: BinOptr, lhs: Value, rhs: Value) -> Result<Value> {
        let value = match op {
            BinOptr::Shl | BinOptr::Lshr | BinOptr::Ashr => return Ok(lhs),
            BinOptr::Sdiv | BinOptr::Srem => {
                let lhs = self.builder.ins().ineg(lhs);
                let rhs = self.builder.ins().ineg(rhs);
                self.binop(op, lhs, rhs)?
            }
            _ => self.binop(op, lhs, rhs)?,
        };
        Ok(self.builder.ins().band_imm(value, 1))
    }

    fn conv(&mut self, op: ConvOptr, from: MuId, to: MuId, value: Value) -> Result<Value> {
        let ns = self.ns;
        let ptr = self.compiler.ptr;
        let from_ty = lower_type(ns, from, ptr)?;
        let to_ty = lower_type(ns, to, ptr)?;

        Ok(match op {
            ConvOptr::Trunc => {
                let narrowed = if from_ty == to_ty {
                    value
                } else {
                    self.builder.ins().ireduce(to_ty, value)
                };
                if int_len(ns, to)? == 1 {
                    self.builder.ins().band_imm(narrowed, 1)
                } else {
                    narrowed
                }
            }
            ConvOptr::Zext => {
                if from_ty == to_ty {
                    value
                } else {
                    self.builder.ins().uextend(to_ty, value)
                }
            }
            ConvOptr::Sext => {
                // int<1> is held as 0 or 1
                let value = if int_len(ns, from)? == 1 {
                    self.builder.ins().ineg(value)
                } else {
                    value
                };
                if from_ty == to_ty {
                    value
                } else {
                    self.builder.ins().sextend(to_ty, value)
                }
            }
            ConvOptr::Fptrunc => self.builder.ins().fdemote(to_ty, value),
            ConvOptr::Fpext => self.builder.ins().fpromote(to_ty, value),
            ConvOptr::Fptoui | ConvOptr::Fptosi => {
                let converted = if op == ConvOptr::Fptoui {
                    self.builder.ins().fcvt_to_uint(to_ty, value)
                } else {
                    self.builder.ins().fcvt_to_sint(to_ty, value)
                };
                if self.is_bool(to) {
                    self.builder.ins().band_imm(converted, 1)
                } else {
                    converted
                }
            }
            ConvOptr::Uitofp => self.builder.ins().fcvt_from_uint(to_ty, value),
            ConvOptr::Sitofp => {
                let value = if self.is_bool(from) {
                    self.builder.ins().ineg(value)
                } else {
                    value
                };
                self.builder.ins().fcvt_from_sint(to_ty, value)
            }
            ConvOptr::Bitcast => {
                if from_ty == to_ty {
                    value
                } else {
                    self.builder.ins().bitcast(to_ty, MemFlags::new(), value)
                }
            }
        })
    }

    /// Target block and argument values of a destination clause
    fn dest(&mut self, id: MuId) -> Result<(Block, Vec<Value>)> {
        let ns = self.ns;
        let clause = match ns.node(id) {
            Some(Node::DestClause(clause)) => clause,
            _ => bail!("{} is not a committed destination clause", id),
        };
        let block = self
            .blocks
            .get(&clause.dest)
            .copied()
            .ok_or_else(|| anyhow!("{} is not a block of this function version", clause.dest))?;
        let args = self.operands(&clause.args)?;
        Ok((block, args))
    }

    fn switch(
        &mut self,
        ty: MuId,
        operand: MuId,
        default: MuId,
        cases: &[(MuId, MuId)],
    ) -> Result<()> {
        let ns = self.ns;
        let len = int_len(ns, ty)?;
        let value = self.operand(operand)?;

        // Switch entries cannot carry arguments: every clause gets an edge block
        let mut switch = Switch::new();
        let mut seen = FxHashSet::default();
        let mut edges = Vec::with_capacity(cases.len() + 1);
        for (case, dest) in cases {
            let key = match ns.node(*case) {
                Some(Node::Const(ConstNode::Int { value, .. })) => int_bits(*value, len),
                _ => bail!("switch case {} is not an integer constant", label(ns, *case)),
            };
            if !seen.insert(key) {
                bail!("switch case {} repeats an earlier case value", label(ns, *case));
            }
            let edge = self.builder.create_block();
            switch.set_entry(key, edge);
            edges.push((edge, *dest));
        }
        let otherwise = self.builder.create_block();
        edges.push((otherwise, default));

        switch.emit(&mut self.builder, value, otherwise);

        for (edge, dest) in edges {
            self.builder.switch_to_block(edge);
            let (block, args) = self.dest(dest)?;
            self.builder.ins().jump(block, &args);
        }
        Ok(())
    }

    fn call(&mut self, sig: MuId, callee: MuId, args: &[MuId]) -> Result<Vec<Value>> {
        let ns = self.ns;
        if !matches!(ns.node(callee), Some(Node::Func(_))) {
            let target = self.operand(callee)?;
            return self.call_indirect(sig, target, args);
        }
        let args = self.operands(args)?;
        let func_id = self.compiler.declare(ns, callee, Linkage::Import)?;
        let func_ref = self
            .compiler
            .module
            .declare_func_in_func(func_id, self.builder.func);
        let inst = self.builder.ins().call(func_ref, &args);
        Ok(self.builder.inst_results(inst).to_vec())
    }

    fn call_indirect(&mut self, sig: MuId, target: Value, args: &[MuId]) -> Result<Vec<Value>> {
        let args = self.operands(args)?;
        let signature = self.compiler.signature(self.ns, sig)?;
        let sig_ref = self.builder.import_signature(signature);
        let inst = self.builder.ins().call_indirect(sig_ref, target, &args);
        Ok(self.builder.inst_results(inst).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_bits() {
        assert_eq!(int_bits(0xff, 1), 1);
        assert_eq!(int_bits(u64::MAX, 8), 0xff);
        assert_eq!(int_bits(u64::MAX, 64), u128::from(u64::MAX));
        assert_eq!(int_bits(u64::MAX, 128), u128::MAX);
        assert_eq!(int_bits(5, 128), 5);
    }

    #[test]
    fn test_conditions() {
        assert!(matches!(condition(CmpOptr::Slt), Condition::Int(IntCC::SignedLessThan)));
        assert!(matches!(condition(CmpOptr::Funo), Condition::Float(FloatCC::Unordered)));
        assert!(matches!(condition(CmpOptr::Ftrue), Condition::Always(true)));
    }
}
