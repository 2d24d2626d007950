//! The closed vocabulary of Mu IR nodes
//!
//! Nodes never point at each other directly. Every cross reference is a
//! [`MuId`] that is resolved against a bundle and the committed namespace,
//! so forward references and cycles (a struct containing a pointer to
//! itself, a block branching to itself) need no special handling here.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::id::MuId;

/// Category of an entity, used for kind checking and redefinition rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Type,
    Const,
    FuncSig,
    Func,
    FuncVer,
    BasicBlock,
    DestClause,
    Inst,
    /// A statically allocated memory cell
    GlobalCell,
    /// A local SSA variable: a block parameter or an instruction result
    Var,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Type => "type",
            EntityKind::Const => "constant",
            EntityKind::FuncSig => "function signature",
            EntityKind::Func => "function",
            EntityKind::FuncVer => "function version",
            EntityKind::BasicBlock => "basic block",
            EntityKind::DestClause => "destination clause",
            EntityKind::Inst => "instruction",
            EntityKind::GlobalCell => "global cell",
            EntityKind::Var => "local variable",
        };
        f.write_str(s)
    }
}

/// Type declarations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeNode {
    /// Fixed-width integer, 1 to 128 bits
    Int { len: u32 },
    Float,
    Double,
    /// Untraced pointer to `ty`
    UPtr { ty: MuId },
    /// Untraced pointer to a native function of signature `sig`
    UFuncPtr { sig: MuId },
    Struct { fields: Vec<MuId> },
    Array { elem: MuId, len: u64 },
    Void,
    Ref { ty: MuId },
    IRef { ty: MuId },
    FuncRef { sig: MuId },
}

impl TypeNode {
    pub const MAX_INT_BITS: u32 = 128;

    /// Identifiers of the types this type mentions
    pub fn type_refs(&self) -> Vec<MuId> {
        match self {
            TypeNode::UPtr { ty } | TypeNode::Ref { ty } | TypeNode::IRef { ty } => vec![*ty],
            TypeNode::Struct { fields } => fields.clone(),
            TypeNode::Array { elem, .. } => vec![*elem],
            _ => Vec::new(),
        }
    }

    /// Identifier of the signature this type mentions
    pub fn sig_ref(&self) -> Option<MuId> {
        match self {
            TypeNode::UFuncPtr { sig } | TypeNode::FuncRef { sig } => Some(*sig),
            _ => None,
        }
    }

    /// Whether a value of this type is represented as an address
    pub fn is_pointer_like(&self) -> bool {
        matches!(
            self,
            TypeNode::UPtr { .. }
                | TypeNode::UFuncPtr { .. }
                | TypeNode::Ref { .. }
                | TypeNode::IRef { .. }
                | TypeNode::FuncRef { .. }
        )
    }
}

/// Constant declarations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstNode {
    /// Integer constant, stored as the low 64 bits of its two's-complement form
    Int { ty: MuId, value: u64 },
    Float { ty: MuId, value: f32 },
    Double { ty: MuId, value: f64 },
    /// Null pointer or reference
    Null { ty: MuId },
    /// Struct or array constant built from other constants
    Seq { ty: MuId, elems: Vec<MuId> },
    /// Address of a native symbol, typed `uptr` or `ufuncptr`
    Extern { ty: MuId, symbol: String },
}

impl ConstNode {
    /// The declared type of the constant
    pub fn ty(&self) -> MuId {
        match self {
            ConstNode::Int { ty, .. }
            | ConstNode::Float { ty, .. }
            | ConstNode::Double { ty, .. }
            | ConstNode::Null { ty }
            | ConstNode::Seq { ty, .. }
            | ConstNode::Extern { ty, .. } => *ty,
        }
    }
}

/// Whether a 64-bit literal is representable in an integer of `len` bits
///
/// Both the zero-extended form (`value < 2^len`) and the sign-extended form of
/// a negative `len`-bit value are accepted.
pub fn int_literal_fits(value: u64, len: u32) -> bool {
    if len == 0 {
        return false;
    }
    if len >= 64 {
        return true;
    }
    if value >> len == 0 {
        return true;
    }
    let signed = value as i64;
    let min = -(1i64 << (len - 1));
    signed < 0 && signed >= min
}

/// A global memory cell holding one value of `ty`; as an operand it is an
/// `iref<ty>` to the cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalCellNode {
    pub ty: MuId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncSigNode {
    pub params: Vec<MuId>,
    pub rets: Vec<MuId>,
}

/// A function declaration; its body is supplied by function versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncNode {
    pub sig: MuId,
}

/// One concrete implementation of a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncVerNode {
    pub func: MuId,
    /// Basic blocks; the first one is the entry block
    pub blocks: Vec<MuId>,
}

impl FuncVerNode {
    pub fn entry(&self) -> Option<MuId> {
        self.blocks.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlockNode {
    /// Parameters as (variable id, type id)
    pub params: Vec<(MuId, MuId)>,
    pub insts: Vec<MuId>,
}

/// Branch destination: a target block and the variables passed to its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestClauseNode {
    pub dest: MuId,
    pub args: Vec<MuId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOptr {
    Add,
    Sub,
    Mul,
    Sdiv,
    Srem,
    Udiv,
    Urem,
    Shl,
    Lshr,
    Ashr,
    And,
    Or,
    Xor,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Frem,
}

impl BinOptr {
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            BinOptr::Fadd | BinOptr::Fsub | BinOptr::Fmul | BinOptr::Fdiv | BinOptr::Frem
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOptr {
    Eq,
    Ne,
    Sge,
    Sgt,
    Sle,
    Slt,
    Uge,
    Ugt,
    Ule,
    Ult,
    Ffalse,
    Ftrue,
    Foeq,
    Fogt,
    Foge,
    Folt,
    Fole,
    Fone,
    Ford,
    Fueq,
    Fugt,
    Fuge,
    Fult,
    Fule,
    Fune,
    Funo,
}

/// Which operand types a comparison accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpClass {
    /// EQ / NE: integers and anything pointer-like
    Equality,
    /// Signed and unsigned orderings: integers and untraced pointers
    Ordering,
    Float,
}

impl CmpOptr {
    pub fn class(&self) -> CmpClass {
        match self {
            CmpOptr::Eq | CmpOptr::Ne => CmpClass::Equality,
            CmpOptr::Sge
            | CmpOptr::Sgt
            | CmpOptr::Sle
            | CmpOptr::Slt
            | CmpOptr::Uge
            | CmpOptr::Ugt
            | CmpOptr::Ule
            | CmpOptr::Ult => CmpClass::Ordering,
            _ => CmpClass::Float,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConvOptr {
    Trunc,
    Zext,
    Sext,
    Fptrunc,
    Fpext,
    Fptoui,
    Fptosi,
    Uitofp,
    Sitofp,
    Bitcast,
}

/// Memory ordering of a load or store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemOrd {
    NotAtomic,
    Relaxed,
    Consume,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl MemOrd {
    pub fn is_atomic(&self) -> bool {
        !matches!(self, MemOrd::NotAtomic)
    }

    pub fn valid_for_load(&self) -> bool {
        !matches!(self, MemOrd::Release | MemOrd::AcqRel)
    }

    pub fn valid_for_store(&self) -> bool {
        !matches!(self, MemOrd::Consume | MemOrd::Acquire | MemOrd::AcqRel)
    }
}

/// Instructions
///
/// Memory instructions address either untraced memory through `uptr<T>`
/// (`is_ptr`) or stack and global cells through `iref<T>`.
///
/// Operands are variable ids, constant ids or function ids. Result ids are
/// fresh identifiers that become local variables of the enclosing block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstNode {
    BinOp {
        result: MuId,
        op: BinOptr,
        ty: MuId,
        lhs: MuId,
        rhs: MuId,
    },
    /// Yields an `int<1>`
    Cmp {
        result: MuId,
        op: CmpOptr,
        ty: MuId,
        lhs: MuId,
        rhs: MuId,
    },
    Conv {
        result: MuId,
        op: ConvOptr,
        from: MuId,
        to: MuId,
        operand: MuId,
    },
    Select {
        result: MuId,
        cond_ty: MuId,
        ty: MuId,
        cond: MuId,
        if_true: MuId,
        if_false: MuId,
    },
    Branch {
        dest: MuId,
    },
    Branch2 {
        cond: MuId,
        if_true: MuId,
        if_false: MuId,
    },
    Switch {
        ty: MuId,
        operand: MuId,
        default: MuId,
        /// (case constant, destination clause)
        cases: Vec<(MuId, MuId)>,
    },
    Call {
        results: Vec<MuId>,
        sig: MuId,
        callee: MuId,
        args: Vec<MuId>,
    },
    TailCall {
        sig: MuId,
        callee: MuId,
        args: Vec<MuId>,
    },
    Ret {
        values: Vec<MuId>,
    },
    /// Call of a native function through a `ufuncptr` with the C convention
    CCall {
        results: Vec<MuId>,
        callee_ty: MuId,
        sig: MuId,
        callee: MuId,
        args: Vec<MuId>,
    },
    /// Zero-initialised stack cell of `ty`; yields `iref<ty>`
    Alloca {
        result: MuId,
        ty: MuId,
    },
    /// Address of field `index` of the struct `ref_ty` at `operand`
    GetFieldIRef {
        result: MuId,
        is_ptr: bool,
        ref_ty: MuId,
        index: u32,
        operand: MuId,
    },
    /// Address of element `index` of the array `ref_ty` at `operand`
    GetElemIRef {
        result: MuId,
        is_ptr: bool,
        ref_ty: MuId,
        index_ty: MuId,
        operand: MuId,
        index: MuId,
    },
    /// `operand` moved by `offset` values of `ref_ty`
    ShiftIRef {
        result: MuId,
        is_ptr: bool,
        ref_ty: MuId,
        offset_ty: MuId,
        operand: MuId,
        offset: MuId,
    },
    Load {
        result: MuId,
        is_ptr: bool,
        ord: MemOrd,
        ref_ty: MuId,
        loc: MuId,
    },
    Store {
        is_ptr: bool,
        ord: MemOrd,
        ref_ty: MuId,
        loc: MuId,
        value: MuId,
    },
}

impl InstNode {
    /// Variables this instruction defines
    pub fn results(&self) -> Vec<MuId> {
        match self {
            InstNode::BinOp { result, .. }
            | InstNode::Cmp { result, .. }
            | InstNode::Conv { result, .. }
            | InstNode::Select { result, .. }
            | InstNode::Alloca { result, .. }
            | InstNode::GetFieldIRef { result, .. }
            | InstNode::GetElemIRef { result, .. }
            | InstNode::ShiftIRef { result, .. }
            | InstNode::Load { result, .. } => vec![*result],
            InstNode::Call { results, .. } | InstNode::CCall { results, .. } => results.clone(),
            _ => Vec::new(),
        }
    }

    /// Whether this instruction ends a basic block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstNode::Branch { .. }
                | InstNode::Branch2 { .. }
                | InstNode::Switch { .. }
                | InstNode::TailCall { .. }
                | InstNode::Ret { .. }
        )
    }

    /// Destination clauses this instruction may transfer control to
    pub fn destinations(&self) -> Vec<MuId> {
        match self {
            InstNode::Branch { dest } => vec![*dest],
            InstNode::Branch2 {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            InstNode::Switch { default, cases, .. } => std::iter::once(*default)
                .chain(cases.iter().map(|(_, dest)| *dest))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A declared Mu entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Type(TypeNode),
    Const(ConstNode),
    FuncSig(FuncSigNode),
    Func(FuncNode),
    FuncVer(FuncVerNode),
    BasicBlock(BasicBlockNode),
    DestClause(DestClauseNode),
    Inst(InstNode),
    GlobalCell(GlobalCellNode),
}

impl Node {
    pub fn kind(&self) -> EntityKind {
        match self {
            Node::Type(_) => EntityKind::Type,
            Node::Const(_) => EntityKind::Const,
            Node::FuncSig(_) => EntityKind::FuncSig,
            Node::Func(_) => EntityKind::Func,
            Node::FuncVer(_) => EntityKind::FuncVer,
            Node::BasicBlock(_) => EntityKind::BasicBlock,
            Node::DestClause(_) => EntityKind::DestClause,
            Node::Inst(_) => EntityKind::Inst,
            Node::GlobalCell(_) => EntityKind::GlobalCell,
        }
    }

    /// Local variables introduced by this node (block parameters, instruction results)
    pub fn defined_vars(&self) -> Vec<MuId> {
        match self {
            Node::BasicBlock(bb) => bb.params.iter().map(|(var, _)| *var).collect(),
            Node::Inst(inst) => inst.results(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "ir_tests.rs"]
mod tests;
