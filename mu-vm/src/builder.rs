//! The IR builder: declares the draft nodes of one bundle
//!
//! Every `new_*` call stages one fully specified node under a fresh
//! identifier obtained from [`IrBuilder::gen_sym`]. Calls may come in any
//! order; references are only resolved when the bundle is loaded. A call that
//! fails stages nothing and leaves the builder usable.
//!
//! `load` and `abort` consume the builder, so a bundle is committed or
//! discarded exactly once.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use mu_core::id::validate_name;
use mu_core::ir::{
    BasicBlockNode, BinOptr, CmpOptr, ConstNode, ConvOptr, DestClauseNode, FuncNode,
    FuncSigNode, FuncVerNode, GlobalCellNode, InstNode, MemOrd, Node, TypeNode,
};
use mu_core::{Error, MuId, Result};

use crate::commit::{self, LoadReport};
use crate::staging::Bundle;
use crate::vm::VmShared;

pub struct IrBuilder {
    shared: Arc<VmShared>,
    bundle: Bundle,
}

impl fmt::Debug for IrBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrBuilder")
            .field("staged", &self.bundle.len())
            .finish()
    }
}

impl IrBuilder {
    pub(crate) fn new(shared: Arc<VmShared>) -> Self {
        Self {
            shared,
            bundle: Bundle::new(),
        }
    }

    /// Number of staged nodes
    pub fn len(&self) -> usize {
        self.bundle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundle.is_empty()
    }

    /// Issues a fresh identifier, optionally reserving a name for it
    ///
    /// The name becomes globally visible only if the bundle is loaded and
    /// the identifier received a node or variable.
    pub fn gen_sym(&mut self, name: Option<&str>) -> Result<MuId> {
        if let Some(name) = name {
            validate_name(name)?;
            if let Some(existing) = self.bundle.names().iter().find(|(n, _)| n == name) {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                    existing: existing.1,
                });
            }
        }
        let id = self.shared.ids.next_id()?;
        if let Some(name) = name {
            self.bundle.reserve_name(name, id)?;
        }
        trace!(%id, name = name.unwrap_or(""), "gen_sym");
        Ok(id)
    }

    fn stage(&mut self, id: MuId, node: Node) -> Result<()> {
        for claimed in std::iter::once(id).chain(node.defined_vars()) {
            if !self.shared.ids.was_issued(claimed) {
                return Err(Error::UnknownId(claimed));
            }
        }
        let snapshot = self.shared.snapshot();
        let kind = node.kind();
        self.bundle.insert(id, node, &snapshot)?;
        trace!(%id, %kind, "staged");
        Ok(())
    }

    fn stage_type(&mut self, id: MuId, ty: TypeNode) -> Result<()> {
        self.stage(id, Node::Type(ty))
    }

    fn stage_const(&mut self, id: MuId, c: ConstNode) -> Result<()> {
        self.stage(id, Node::Const(c))
    }

    fn stage_inst(&mut self, id: MuId, inst: InstNode) -> Result<()> {
        self.stage(id, Node::Inst(inst))
    }

    // ===== Types =====

    pub fn new_type_int(&mut self, id: MuId, len: u32) -> Result<()> {
        self.stage_type(id, TypeNode::Int { len })
    }

    pub fn new_type_float(&mut self, id: MuId) -> Result<()> {
        self.stage_type(id, TypeNode::Float)
    }

    pub fn new_type_double(&mut self, id: MuId) -> Result<()> {
        self.stage_type(id, TypeNode::Double)
    }

    pub fn new_type_uptr(&mut self, id: MuId, ty: MuId) -> Result<()> {
        self.stage_type(id, TypeNode::UPtr { ty })
    }

    pub fn new_type_ufuncptr(&mut self, id: MuId, sig: MuId) -> Result<()> {
        self.stage_type(id, TypeNode::UFuncPtr { sig })
    }

    pub fn new_type_struct(&mut self, id: MuId, fields: &[MuId]) -> Result<()> {
        self.stage_type(
            id,
            TypeNode::Struct {
                fields: fields.to_vec(),
            },
        )
    }

    pub fn new_type_array(&mut self, id: MuId, elem: MuId, len: u64) -> Result<()> {
        self.stage_type(id, TypeNode::Array { elem, len })
    }

    pub fn new_type_void(&mut self, id: MuId) -> Result<()> {
        self.stage_type(id, TypeNode::Void)
    }

    pub fn new_type_ref(&mut self, id: MuId, ty: MuId) -> Result<()> {
        self.stage_type(id, TypeNode::Ref { ty })
    }

    pub fn new_type_iref(&mut self, id: MuId, ty: MuId) -> Result<()> {
        self.stage_type(id, TypeNode::IRef { ty })
    }

    pub fn new_type_funcref(&mut self, id: MuId, sig: MuId) -> Result<()> {
        self.stage_type(id, TypeNode::FuncRef { sig })
    }

    pub fn new_funcsig(&mut self, id: MuId, params: &[MuId], rets: &[MuId]) -> Result<()> {
        self.stage(
            id,
            Node::FuncSig(FuncSigNode {
                params: params.to_vec(),
                rets: rets.to_vec(),
            }),
        )
    }

    // ===== Constants =====

    /// Integer constant; `value` holds the low 64 bits of the two's-complement form
    pub fn new_const_int(&mut self, id: MuId, ty: MuId, value: u64) -> Result<()> {
        self.stage_const(id, ConstNode::Int { ty, value })
    }

    pub fn new_const_float(&mut self, id: MuId, ty: MuId, value: f32) -> Result<()> {
        self.stage_const(id, ConstNode::Float { ty, value })
    }

    pub fn new_const_double(&mut self, id: MuId, ty: MuId, value: f64) -> Result<()> {
        self.stage_const(id, ConstNode::Double { ty, value })
    }

    pub fn new_const_null(&mut self, id: MuId, ty: MuId) -> Result<()> {
        self.stage_const(id, ConstNode::Null { ty })
    }

    pub fn new_const_seq(&mut self, id: MuId, ty: MuId, elems: &[MuId]) -> Result<()> {
        self.stage_const(
            id,
            ConstNode::Seq {
                ty,
                elems: elems.to_vec(),
            },
        )
    }

    /// Address of the native symbol `symbol`; `ty` is a `uptr` or `ufuncptr`
    pub fn new_const_extern(&mut self, id: MuId, ty: MuId, symbol: &str) -> Result<()> {
        self.stage_const(
            id,
            ConstNode::Extern {
                ty,
                symbol: symbol.to_string(),
            },
        )
    }

    pub fn new_global_cell(&mut self, id: MuId, ty: MuId) -> Result<()> {
        self.stage(id, Node::GlobalCell(GlobalCellNode { ty }))
    }

    // ===== Functions and control flow =====

    pub fn new_func(&mut self, id: MuId, sig: MuId) -> Result<()> {
        self.stage(id, Node::Func(FuncNode { sig }))
    }

    /// A version of `func`; the first block is the entry block
    pub fn new_func_ver(&mut self, id: MuId, func: MuId, blocks: &[MuId]) -> Result<()> {
        self.stage(
            id,
            Node::FuncVer(FuncVerNode {
                func,
                blocks: blocks.to_vec(),
            }),
        )
    }

    /// A basic block with `(variable, type)` parameters
    pub fn new_bb(&mut self, id: MuId, params: &[(MuId, MuId)], insts: &[MuId]) -> Result<()> {
        self.stage(
            id,
            Node::BasicBlock(BasicBlockNode {
                params: params.to_vec(),
                insts: insts.to_vec(),
            }),
        )
    }

    pub fn new_dest_clause(&mut self, id: MuId, dest: MuId, args: &[MuId]) -> Result<()> {
        self.stage(
            id,
            Node::DestClause(DestClauseNode {
                dest,
                args: args.to_vec(),
            }),
        )
    }

    // ===== Instructions =====

    pub fn new_binop(
        &mut self,
        id: MuId,
        result: MuId,
        op: BinOptr,
        ty: MuId,
        lhs: MuId,
        rhs: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::BinOp {
                result,
                op,
                ty,
                lhs,
                rhs,
            },
        )
    }

    pub fn new_cmp(
        &mut self,
        id: MuId,
        result: MuId,
        op: CmpOptr,
        ty: MuId,
        lhs: MuId,
        rhs: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::Cmp {
                result,
                op,
                ty,
                lhs,
                rhs,
            },
        )
    }

    pub fn new_conv(
        &mut self,
        id: MuId,
        result: MuId,
        op: ConvOptr,
        from: MuId,
        to: MuId,
        operand: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::Conv {
                result,
                op,
                from,
                to,
                operand,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_select(
        &mut self,
        id: MuId,
        result: MuId,
        cond_ty: MuId,
        ty: MuId,
        cond: MuId,
        if_true: MuId,
        if_false: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::Select {
                result,
                cond_ty,
                ty,
                cond,
                if_true,
                if_false,
            },
        )
    }

    pub fn new_branch(&mut self, id: MuId, dest: MuId) -> Result<()> {
        self.stage_inst(id, InstNode::Branch { dest })
    }

    pub fn new_branch2(
        &mut self,
        id: MuId,
        cond: MuId,
        if_true: MuId,
        if_false: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::Branch2 {
                cond,
                if_true,
                if_false,
            },
        )
    }

    /// Multi-way branch; `cases` pairs a constant with a destination clause
    pub fn new_switch(
        &mut self,
        id: MuId,
        ty: MuId,
        operand: MuId,
        default: MuId,
        cases: &[(MuId, MuId)],
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::Switch {
                ty,
                operand,
                default,
                cases: cases.to_vec(),
            },
        )
    }

    pub fn new_call(
        &mut self,
        id: MuId,
        results: &[MuId],
        sig: MuId,
        callee: MuId,
        args: &[MuId],
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::Call {
                results: results.to_vec(),
                sig,
                callee,
                args: args.to_vec(),
            },
        )
    }

    pub fn new_tailcall(&mut self, id: MuId, sig: MuId, callee: MuId, args: &[MuId]) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::TailCall {
                sig,
                callee,
                args: args.to_vec(),
            },
        )
    }

    pub fn new_ret(&mut self, id: MuId, values: &[MuId]) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::Ret {
                values: values.to_vec(),
            },
        )
    }

    /// Calls the native function `callee`, a value of type `callee_ty`
    /// (`ufuncptr<sig>`), with the platform C calling convention
    pub fn new_ccall(
        &mut self,
        id: MuId,
        results: &[MuId],
        callee_ty: MuId,
        sig: MuId,
        callee: MuId,
        args: &[MuId],
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::CCall {
                results: results.to_vec(),
                callee_ty,
                sig,
                callee,
                args: args.to_vec(),
            },
        )
    }

    // ===== Memory =====

    pub fn new_alloca(&mut self, id: MuId, result: MuId, ty: MuId) -> Result<()> {
        self.stage_inst(id, InstNode::Alloca { result, ty })
    }

    pub fn new_getfieldiref(
        &mut self,
        id: MuId,
        result: MuId,
        is_ptr: bool,
        ref_ty: MuId,
        index: u32,
        operand: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::GetFieldIRef {
                result,
                is_ptr,
                ref_ty,
                index,
                operand,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_getelemiref(
        &mut self,
        id: MuId,
        result: MuId,
        is_ptr: bool,
        ref_ty: MuId,
        index_ty: MuId,
        operand: MuId,
        index: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::GetElemIRef {
                result,
                is_ptr,
                ref_ty,
                index_ty,
                operand,
                index,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_shiftiref(
        &mut self,
        id: MuId,
        result: MuId,
        is_ptr: bool,
        ref_ty: MuId,
        offset_ty: MuId,
        operand: MuId,
        offset: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::ShiftIRef {
                result,
                is_ptr,
                ref_ty,
                offset_ty,
                operand,
                offset,
            },
        )
    }

    pub fn new_load(
        &mut self,
        id: MuId,
        result: MuId,
        is_ptr: bool,
        ord: MemOrd,
        ref_ty: MuId,
        loc: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::Load {
                result,
                is_ptr,
                ord,
                ref_ty,
                loc,
            },
        )
    }

    pub fn new_store(
        &mut self,
        id: MuId,
        is_ptr: bool,
        ord: MemOrd,
        ref_ty: MuId,
        loc: MuId,
        value: MuId,
    ) -> Result<()> {
        self.stage_inst(
            id,
            InstNode::Store {
                is_ptr,
                ord,
                ref_ty,
                loc,
                value,
            },
        )
    }

    // ===== Lifecycle =====

    /// Validates the bundle and commits it atomically
    ///
    /// On failure nothing is committed and every problem found is reported
    /// in [`Error::Load`].
    pub fn load(self) -> Result<LoadReport> {
        let IrBuilder { shared, bundle } = self;
        commit::commit(&shared.namespace, bundle)
    }

    /// Discards every staged node; generated identifiers stay consumed
    pub fn abort(self) {
        trace!(staged = self.bundle.len(), "bundle aborted");
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
