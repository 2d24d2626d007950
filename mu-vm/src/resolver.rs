//! Resolution and validation of a staged bundle
//!
//! Runs once per `load`, under the namespace write lock. Every reference of
//! every staged node is resolved against the bundle first and the committed
//! namespace second. Problems are collected across all passes so that a
//! rejected bundle reports every invalid node at once.

use std::collections::hash_map::Entry;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use mu_core::ir::{
    int_literal_fits, BasicBlockNode, CmpClass, ConstNode, ConvOptr, FuncSigNode, FuncVerNode,
    InstNode, MemOrd, TypeNode,
};
use mu_core::{Diagnostic, EntityKind, LoadFailure, MuId, Namespace, Node, Reason, ShapeError};

use crate::staging::Bundle;

/// Ownership claims recorded for a valid bundle: (child, owner)
pub type Owners = Vec<(MuId, MuId)>;

/// Type of a value operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    Declared(MuId),
    /// A function used as a value: `funcref<sig>`
    FuncRef(MuId),
    /// The `int<1>` produced by a comparison
    Flag,
    /// An address without a declared type: `uptr<ty>` when `is_ptr`, else
    /// `iref<ty>` (global cells, ALLOCA and the address computations)
    Address { is_ptr: bool, ty: MuId },
}

/// In-scope variables of a block. `None` marks a variable whose type could
/// not be determined because of an earlier diagnostic.
type Scope = FxHashMap<MuId, Option<ValueType>>;

const VALUE_KINDS: &[EntityKind] = &[
    EntityKind::Var,
    EntityKind::Const,
    EntityKind::Func,
    EntityKind::GlobalCell,
];

/// Validates `bundle` against `ns`
///
/// On success returns the ownership claims (block -> version, instruction
/// -> block, clause -> instruction) the committer records.
pub fn resolve(bundle: &Bundle, ns: &Namespace) -> Result<Owners, LoadFailure> {
    let mut resolver = Resolver::new(bundle, ns);

    resolver.check_fresh_ids();
    resolver.check_references();
    debug!(diagnostics = resolver.diagnostics.len(), "references resolved");

    resolver.check_types();
    resolver.check_constants();
    debug!(diagnostics = resolver.diagnostics.len(), "types and constants checked");

    resolver.claim_owners();
    resolver.check_versions();
    debug!(diagnostics = resolver.diagnostics.len(), "function versions checked");

    resolver.check_redefinitions();
    resolver.finish()
}

struct Resolver<'a> {
    bundle: &'a Bundle,
    ns: &'a Namespace,
    diagnostics: Vec<Diagnostic>,
    owners: FxHashMap<MuId, MuId>,
}

impl<'a> Resolver<'a> {
    fn new(bundle: &'a Bundle, ns: &'a Namespace) -> Self {
        Self {
            bundle,
            ns,
            diagnostics: Vec::new(),
            owners: FxHashMap::default(),
        }
    }

    fn finish(self) -> Result<Owners, LoadFailure> {
        if self.diagnostics.is_empty() {
            return Ok(self.owners.into_iter().collect());
        }
        let mut diagnostics = self.diagnostics;
        diagnostics.sort_by_key(|d| d.node);
        Err(LoadFailure { diagnostics })
    }

    // ===== Lookups =====

    fn node(&self, id: MuId) -> Option<&'a Node> {
        let (bundle, ns) = (self.bundle, self.ns);
        bundle.node(id).or_else(|| ns.node(id))
    }

    fn kind_of(&self, id: MuId) -> Option<EntityKind> {
        self.bundle.kind_of(id).or_else(|| self.ns.kind_of(id))
    }

    fn var_owner(&self, var: MuId) -> Option<MuId> {
        self.bundle.var_owner(var).or_else(|| self.ns.var_owner(var))
    }

    fn type_node(&self, id: MuId) -> Option<&'a TypeNode> {
        match self.node(id) {
            Some(Node::Type(ty)) => Some(ty),
            _ => None,
        }
    }

    fn sig_node(&self, id: MuId) -> Option<&'a FuncSigNode> {
        match self.node(id) {
            Some(Node::FuncSig(sig)) => Some(sig),
            _ => None,
        }
    }

    /// The bundle's own node behind `id`; committed nodes are never re-checked
    fn staged(&self, id: MuId) -> Option<&'a Node> {
        let bundle = self.bundle;
        bundle.node(id)
    }

    fn label(&self, id: MuId) -> String {
        self.bundle
            .name_of(id)
            .or_else(|| self.ns.name_of(id))
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string())
    }

    fn describe(&self, ty: MuId) -> String {
        let Some(node) = self.type_node(ty) else {
            return self.label(ty);
        };
        match node {
            TypeNode::Int { len } => format!("int<{len}>"),
            TypeNode::Float => "float".to_string(),
            TypeNode::Double => "double".to_string(),
            TypeNode::Void => "void".to_string(),
            TypeNode::UPtr { ty } => format!("uptr<{}>", self.label(*ty)),
            TypeNode::UFuncPtr { sig } => format!("ufuncptr<{}>", self.label(*sig)),
            TypeNode::Struct { fields } => {
                let fields: Vec<_> = fields.iter().map(|f| self.label(*f)).collect();
                format!("struct<{}>", fields.join(" "))
            }
            TypeNode::Array { elem, len } => format!("array<{} {len}>", self.label(*elem)),
            TypeNode::Ref { ty } => format!("ref<{}>", self.label(*ty)),
            TypeNode::IRef { ty } => format!("iref<{}>", self.label(*ty)),
            TypeNode::FuncRef { sig } => format!("funcref<{}>", self.label(*sig)),
        }
    }

    fn describe_value(&self, value: ValueType) -> String {
        match value {
            ValueType::Declared(ty) => self.describe(ty),
            ValueType::FuncRef(sig) => format!("funcref<{}>", self.label(sig)),
            ValueType::Flag => "int<1>".to_string(),
            ValueType::Address { is_ptr, ty } => address_type(is_ptr, &self.describe(ty)),
        }
    }

    // ===== Reporting =====

    fn report(&mut self, node: MuId, reference: Option<MuId>, reason: Reason) {
        let name = self.bundle.name_of(node).map(str::to_string);
        self.diagnostics.push(Diagnostic {
            node,
            name,
            reference,
            reason,
        });
    }

    fn shape(&mut self, node: MuId, reference: Option<MuId>, error: ShapeError) {
        self.report(node, reference, Reason::MalformedShape(error));
    }

    fn mismatch(&mut self, node: MuId, reference: Option<MuId>, expected: String, found: String) {
        self.report(node, reference, Reason::TypeMismatch { expected, found });
    }

    // ===== Pass 1: identifiers committed meanwhile =====

    fn check_fresh_ids(&mut self) {
        let bundle = self.bundle;
        for id in bundle.claimed_ids() {
            if self.ns.contains(id) {
                match bundle.var_owner(id) {
                    Some(owner) => self.report(owner, Some(id), Reason::DuplicateId),
                    None => self.report(id, None, Reason::DuplicateId),
                }
            }
        }
    }

    // ===== Pass 2: every reference resolves to the right kind =====

    /// Checks that `reference` resolves to one of `allowed`
    fn expect(
        &mut self,
        node: MuId,
        reference: MuId,
        expected: &'static str,
        allowed: &[EntityKind],
    ) {
        match self.kind_of(reference) {
            None => self.report(node, Some(reference), Reason::DanglingReference),
            Some(found) if allowed.contains(&found) => {}
            Some(found) => {
                self.report(node, Some(reference), Reason::KindMismatch { expected, found })
            }
        }
    }

    fn expect_type(&mut self, node: MuId, reference: MuId) {
        self.expect(node, reference, "type", &[EntityKind::Type]);
    }

    fn expect_sig(&mut self, node: MuId, reference: MuId) {
        self.expect(node, reference, "function signature", &[EntityKind::FuncSig]);
    }

    fn expect_value(&mut self, node: MuId, reference: MuId) {
        self.expect(node, reference, "value", VALUE_KINDS);
    }

    fn expect_dest(&mut self, node: MuId, reference: MuId) {
        self.expect(node, reference, "destination clause", &[EntityKind::DestClause]);
    }

    fn check_references(&mut self) {
        let bundle = self.bundle;
        for (id, node) in bundle.nodes_by_id() {
            match node {
                Node::Type(ty) => {
                    for r in ty.type_refs() {
                        self.expect_type(id, r);
                    }
                    if let Some(sig) = ty.sig_ref() {
                        self.expect_sig(id, sig);
                    }
                }
                Node::Const(c) => {
                    self.expect_type(id, c.ty());
                    if let ConstNode::Seq { elems, .. } = c {
                        for elem in elems {
                            self.expect(id, *elem, "constant", &[EntityKind::Const]);
                        }
                    }
                }
                Node::FuncSig(sig) => {
                    for ty in sig.params.iter().chain(&sig.rets) {
                        self.expect_type(id, *ty);
                    }
                }
                Node::Func(func) => self.expect_sig(id, func.sig),
                Node::FuncVer(ver) => {
                    self.expect(id, ver.func, "function", &[EntityKind::Func]);
                    for block in &ver.blocks {
                        self.expect(id, *block, "basic block", &[EntityKind::BasicBlock]);
                    }
                }
                Node::BasicBlock(bb) => {
                    for (_, ty) in &bb.params {
                        self.expect_type(id, *ty);
                    }
                    for inst in &bb.insts {
                        self.expect(id, *inst, "instruction", &[EntityKind::Inst]);
                    }
                }
                Node::DestClause(dc) => {
                    self.expect(id, dc.dest, "basic block", &[EntityKind::BasicBlock]);
                    for arg in &dc.args {
                        self.expect_value(id, *arg);
                    }
                }
                Node::Inst(inst) => self.check_inst_refs(id, inst),
                Node::GlobalCell(cell) => self.expect_type(id, cell.ty),
            }
        }
    }

    fn check_inst_refs(&mut self, id: MuId, inst: &InstNode) {
        match inst {
            InstNode::BinOp { ty, lhs, rhs, .. } | InstNode::Cmp { ty, lhs, rhs, .. } => {
                self.expect_type(id, *ty);
                self.expect_value(id, *lhs);
                self.expect_value(id, *rhs);
            }
            InstNode::Conv {
                from, to, operand, ..
            } => {
                self.expect_type(id, *from);
                self.expect_type(id, *to);
                self.expect_value(id, *operand);
            }
            InstNode::Select {
                cond_ty,
                ty,
                cond,
                if_true,
                if_false,
                ..
            } => {
                self.expect_type(id, *cond_ty);
                self.expect_type(id, *ty);
                for value in [cond, if_true, if_false] {
                    self.expect_value(id, *value);
                }
            }
            InstNode::Branch { dest } => self.expect_dest(id, *dest),
            InstNode::Branch2 {
                cond,
                if_true,
                if_false,
            } => {
                self.expect_value(id, *cond);
                self.expect_dest(id, *if_true);
                self.expect_dest(id, *if_false);
            }
            InstNode::Switch {
                ty,
                operand,
                default,
                cases,
            } => {
                self.expect_type(id, *ty);
                self.expect_value(id, *operand);
                self.expect_dest(id, *default);
                for (value, dest) in cases {
                    self.expect(id, *value, "constant", &[EntityKind::Const]);
                    self.expect_dest(id, *dest);
                }
            }
            InstNode::Call {
                sig, callee, args, ..
            }
            | InstNode::TailCall { sig, callee, args } => {
                self.expect_sig(id, *sig);
                self.expect_value(id, *callee);
                for arg in args {
                    self.expect_value(id, *arg);
                }
            }
            InstNode::Ret { values } => {
                for value in values {
                    self.expect_value(id, *value);
                }
            }
            InstNode::CCall {
                callee_ty,
                sig,
                callee,
                args,
                ..
            } => {
                self.expect_type(id, *callee_ty);
                self.expect_sig(id, *sig);
                self.expect_value(id, *callee);
                for arg in args {
                    self.expect_value(id, *arg);
                }
            }
            InstNode::Alloca { ty, .. } => self.expect_type(id, *ty),
            InstNode::GetFieldIRef {
                ref_ty, operand, ..
            } => {
                self.expect_type(id, *ref_ty);
                self.expect_value(id, *operand);
            }
            InstNode::GetElemIRef {
                ref_ty,
                index_ty,
                operand,
                index,
                ..
            } => {
                self.expect_type(id, *ref_ty);
                self.expect_type(id, *index_ty);
                self.expect_value(id, *operand);
                self.expect_value(id, *index);
            }
            InstNode::ShiftIRef {
                ref_ty,
                offset_ty,
                operand,
                offset,
                ..
            } => {
                self.expect_type(id, *ref_ty);
                self.expect_type(id, *offset_ty);
                self.expect_value(id, *operand);
                self.expect_value(id, *offset);
            }
            InstNode::Load { ref_ty, loc, .. } => {
                self.expect_type(id, *ref_ty);
                self.expect_value(id, *loc);
            }
            InstNode::Store {
                ref_ty, loc, value, ..
            } => {
                self.expect_type(id, *ref_ty);
                self.expect_value(id, *loc);
                self.expect_value(id, *value);
            }
        }
    }

    // ===== Pass 3: well-formed types =====

    fn check_types(&mut self) {
        let bundle = self.bundle;
        for (id, node) in bundle.nodes_by_id() {
            if let Node::GlobalCell(cell) = node {
                if matches!(self.type_node(cell.ty), Some(TypeNode::Void)) {
                    self.report(
                        id,
                        Some(cell.ty),
                        Reason::MalformedType("global cell of type void".to_string()),
                    );
                }
                continue;
            }
            let Node::Type(ty) = node else { continue };
            match ty {
                TypeNode::Int { len } if *len == 0 || *len > TypeNode::MAX_INT_BITS => {
                    self.report(
                        id,
                        None,
                        Reason::MalformedType(format!(
                            "integer width {len} is outside 1..={}",
                            TypeNode::MAX_INT_BITS
                        )),
                    );
                }
                TypeNode::Struct { fields } => {
                    for field in fields {
                        if matches!(self.type_node(*field), Some(TypeNode::Void)) {
                            self.report(
                                id,
                                Some(*field),
                                Reason::MalformedType("struct field of type void".to_string()),
                            );
                        }
                    }
                    self.check_embedding(id);
                }
                TypeNode::Array { elem, .. } => {
                    if matches!(self.type_node(*elem), Some(TypeNode::Void)) {
                        self.report(
                            id,
                            Some(*elem),
                            Reason::MalformedType("array of void".to_string()),
                        );
                    }
                    self.check_embedding(id);
                }
                _ => {}
            }
        }
    }

    fn check_embedding(&mut self, id: MuId) {
        if self.embeds(id, id, &mut FxHashSet::default()) {
            self.report(
                id,
                None,
                Reason::MalformedType("type contains itself by value".to_string()),
            );
        }
    }

    /// Whether `outer` contains `target` by value, looking through struct
    /// fields and array elements but not through pointers or references
    fn embeds(&self, outer: MuId, target: MuId, seen: &mut FxHashSet<MuId>) -> bool {
        let children: &[MuId] = match self.type_node(outer) {
            Some(TypeNode::Struct { fields }) => fields,
            Some(TypeNode::Array { elem, .. }) => std::slice::from_ref(elem),
            _ => return false,
        };
        children
            .iter()
            .any(|child| *child == target || (seen.insert(*child) && self.embeds(*child, target, seen)))
    }

    // ===== Type equality =====

    fn types_eq(&self, a: MuId, b: MuId) -> bool {
        self.types_eq_in(a, b, &mut FxHashSet::default())
    }

    fn sigs_eq(&self, a: MuId, b: MuId) -> bool {
        self.sigs_eq_in(a, b, &mut FxHashSet::default())
    }

    /// Structural equality; a pair already under comparison is assumed equal
    fn types_eq_in(&self, a: MuId, b: MuId, seen: &mut FxHashSet<(MuId, MuId)>) -> bool {
        if a == b || !seen.insert((a, b)) {
            return true;
        }
        let (Some(x), Some(y)) = (self.type_node(a), self.type_node(b)) else {
            return false;
        };
        match (x, y) {
            (TypeNode::Int { len: l }, TypeNode::Int { len: r }) => l == r,
            (TypeNode::Float, TypeNode::Float)
            | (TypeNode::Double, TypeNode::Double)
            | (TypeNode::Void, TypeNode::Void) => true,
            (TypeNode::UPtr { ty: l }, TypeNode::UPtr { ty: r })
            | (TypeNode::Ref { ty: l }, TypeNode::Ref { ty: r })
            | (TypeNode::IRef { ty: l }, TypeNode::IRef { ty: r }) => self.types_eq_in(*l, *r, seen),
            (TypeNode::UFuncPtr { sig: l }, TypeNode::UFuncPtr { sig: r })
            | (TypeNode::FuncRef { sig: l }, TypeNode::FuncRef { sig: r }) => {
                self.sigs_eq_in(*l, *r, seen)
            }
            (TypeNode::Struct { fields: l }, TypeNode::Struct { fields: r }) => {
                l.len() == r.len() && l.iter().zip(r).all(|(l, r)| self.types_eq_in(*l, *r, seen))
            }
            (TypeNode::Array { elem: l, len: n }, TypeNode::Array { elem: r, len: m }) => {
                n == m && self.types_eq_in(*l, *r, seen)
            }
            _ => false,
        }
    }

    fn sigs_eq_in(&self, a: MuId, b: MuId, seen: &mut FxHashSet<(MuId, MuId)>) -> bool {
        if a == b || !seen.insert((a, b)) {
            return true;
        }
        let (Some(x), Some(y)) = (self.sig_node(a), self.sig_node(b)) else {
            return false;
        };
        x.params.len() == y.params.len()
            && x.rets.len() == y.rets.len()
            && x.params
                .iter()
                .zip(&y.params)
                .chain(x.rets.iter().zip(&y.rets))
                .all(|(l, r)| self.types_eq_in(*l, *r, seen))
    }

    fn value_matches(&self, value: ValueType, expected: MuId) -> bool {
        match value {
            ValueType::Declared(ty) => self.types_eq(ty, expected),
            ValueType::FuncRef(sig) => matches!(
                self.type_node(expected),
                Some(TypeNode::FuncRef { sig: s }) if self.sigs_eq(sig, *s)
            ),
            ValueType::Flag => matches!(self.type_node(expected), Some(TypeNode::Int { len: 1 })),
            ValueType::Address { is_ptr, ty } => match self.type_node(expected) {
                Some(TypeNode::UPtr { ty: e }) if is_ptr => self.types_eq(ty, *e),
                Some(TypeNode::IRef { ty: e }) if !is_ptr => self.types_eq(ty, *e),
                _ => false,
            },
        }
    }

    /// Whether `value` addresses a `ref_ty`: `uptr<ref_ty>` or `iref<ref_ty>`
    fn address_matches(&self, value: ValueType, is_ptr: bool, ref_ty: MuId) -> bool {
        match value {
            ValueType::Address { is_ptr: p, ty } => p == is_ptr && self.types_eq(ty, ref_ty),
            ValueType::Declared(declared) => match self.type_node(declared) {
                Some(TypeNode::UPtr { ty }) if is_ptr => self.types_eq(*ty, ref_ty),
                Some(TypeNode::IRef { ty }) if !is_ptr => self.types_eq(*ty, ref_ty),
                _ => false,
            },
            ValueType::FuncRef(_) | ValueType::Flag => false,
        }
    }

    fn is_flag(&self, value: ValueType) -> bool {
        match value {
            ValueType::Flag => true,
            ValueType::Declared(ty) => matches!(self.type_node(ty), Some(TypeNode::Int { len: 1 })),
            ValueType::FuncRef(_) | ValueType::Address { .. } => false,
        }
    }

    /// Signature of a callable value
    fn callee_sig(&self, value: ValueType) -> Option<MuId> {
        match value {
            ValueType::FuncRef(sig) => Some(sig),
            ValueType::Declared(ty) => match self.type_node(ty) {
                Some(TypeNode::FuncRef { sig }) | Some(TypeNode::UFuncPtr { sig }) => Some(*sig),
                _ => None,
            },
            ValueType::Flag | ValueType::Address { .. } => None,
        }
    }

    /// Reports a mismatch unless `found` and `expected` are the same type
    fn expect_type_eq(&mut self, node: MuId, reference: Option<MuId>, found: MuId, expected: MuId) {
        if self.type_node(found).is_none() || self.type_node(expected).is_none() {
            return;
        }
        if !self.types_eq(found, expected) {
            self.mismatch(node, reference, self.describe(expected), self.describe(found));
        }
    }

    // ===== Pass 4: constant literals =====

    fn check_constants(&mut self) {
        let bundle = self.bundle;
        for (id, node) in bundle.nodes_by_id() {
            if let Node::Const(c) = node {
                self.check_constant(id, c);
            }
        }
    }

    fn check_constant(&mut self, id: MuId, c: &ConstNode) {
        let Some(ty) = self.type_node(c.ty()) else {
            return;
        };
        let problem = match (c, ty) {
            (ConstNode::Int { value, .. }, TypeNode::Int { len }) => (!int_literal_fits(*value, *len))
                .then(|| format!("{value:#x} does not fit in int<{len}>")),
            (ConstNode::Float { .. }, TypeNode::Float)
            | (ConstNode::Double { .. }, TypeNode::Double) => None,
            (ConstNode::Null { .. }, ty) if ty.is_pointer_like() => None,
            (ConstNode::Extern { symbol, .. }, TypeNode::UPtr { .. } | TypeNode::UFuncPtr { .. }) => {
                (symbol.is_empty() || symbol.chars().any(char::is_whitespace))
                    .then(|| format!("{symbol:?} is not a native symbol name"))
            }
            (ConstNode::Seq { elems, .. }, TypeNode::Struct { fields }) => {
                if elems.len() == fields.len() {
                    for (elem, field) in elems.iter().zip(fields) {
                        self.check_element(id, *elem, *field);
                    }
                    None
                } else {
                    Some(format!(
                        "expected {} element(s), found {}",
                        fields.len(),
                        elems.len()
                    ))
                }
            }
            (ConstNode::Seq { elems, .. }, TypeNode::Array { elem, len }) => {
                if elems.len() as u64 == *len {
                    for value in elems {
                        self.check_element(id, *value, *elem);
                    }
                    None
                } else {
                    Some(format!("expected {len} element(s), found {}", elems.len()))
                }
            }
            (c, _) => Some(format!(
                "{} constant cannot have type {}",
                literal_kind(c),
                self.describe(c.ty())
            )),
        };
        if let Some(problem) = problem {
            self.report(id, Some(c.ty()), Reason::MalformedLiteral(problem));
        }
    }

    fn check_element(&mut self, id: MuId, elem: MuId, expected: MuId) {
        if let Some(Node::Const(value)) = self.node(elem) {
            self.expect_type_eq(id, Some(elem), value.ty(), expected);
        }
    }

    // ===== Pass 5: ownership =====

    fn claim(&mut self, child: MuId, owner: MuId, kind: EntityKind) {
        if self.kind_of(child) != Some(kind) {
            return;
        }
        match self.owners.get(&child).copied().or_else(|| self.ns.owner(child)) {
            Some(first) => self.shape(owner, Some(child), ShapeError::MultipleOwners { first }),
            None => {
                self.owners.insert(child, owner);
            }
        }
    }

    fn claim_owners(&mut self) {
        let bundle = self.bundle;
        let nodes = bundle.nodes_by_id();

        for (id, node) in &nodes {
            match node {
                Node::FuncVer(ver) => {
                    for block in &ver.blocks {
                        self.claim(*block, *id, EntityKind::BasicBlock);
                    }
                }
                Node::BasicBlock(bb) => {
                    for inst in &bb.insts {
                        self.claim(*inst, *id, EntityKind::Inst);
                    }
                }
                Node::Inst(inst) => {
                    for dest in inst.destinations() {
                        self.claim(dest, *id, EntityKind::DestClause);
                    }
                }
                _ => {}
            }
        }

        for (id, node) in &nodes {
            let owner = match node.kind() {
                EntityKind::BasicBlock => "function version",
                EntityKind::Inst => "basic block",
                EntityKind::DestClause => "branch instruction",
                _ => continue,
            };
            if !self.owners.contains_key(id) {
                self.shape(*id, None, ShapeError::Unowned { owner });
            }
        }
    }

    // ===== Pass 6: function versions =====

    fn check_versions(&mut self) {
        let bundle = self.bundle;
        let mut versioned: FxHashMap<MuId, MuId> = FxHashMap::default();

        for (id, node) in bundle.nodes_by_id() {
            let Node::FuncVer(ver) = node else { continue };
            if versioned.insert(ver.func, id).is_some() {
                self.shape(
                    id,
                    Some(ver.func),
                    ShapeError::DuplicateVersion { func: ver.func },
                );
            }
            self.check_version(id, ver);
        }
    }

    fn owned_blocks(&self, ver_id: MuId, ver: &'a FuncVerNode) -> Vec<(MuId, &'a BasicBlockNode)> {
        ver.blocks
            .iter()
            .filter(|block| self.owners.get(*block) == Some(&ver_id))
            .filter_map(|block| match self.staged(*block) {
                Some(Node::BasicBlock(bb)) => Some((*block, bb)),
                _ => None,
            })
            .collect()
    }

    fn check_version(&mut self, id: MuId, ver: &'a FuncVerNode) {
        let Some(entry) = ver.entry() else {
            self.shape(id, None, ShapeError::NoBlocks);
            return;
        };
        let sig = match self.node(ver.func) {
            Some(Node::Func(func)) => self.sig_node(func.sig),
            _ => None,
        };
        let blocks = self.owned_blocks(id, ver);

        if let (Some(sig), Some((_, bb))) = (sig, blocks.iter().find(|(b, _)| *b == entry)) {
            if bb.params.len() != sig.params.len() {
                self.shape(
                    entry,
                    None,
                    ShapeError::ArityMismatch {
                        what: "entry block parameters",
                        expected: sig.params.len(),
                        found: bb.params.len(),
                    },
                );
            } else {
                for ((var, ty), expected) in bb.params.iter().zip(&sig.params) {
                    self.expect_type_eq(entry, Some(*var), *ty, *expected);
                }
            }
        }

        for (block, bb) in &blocks {
            self.check_block(*block, bb, ver, sig);
        }

        let reached = self.reachable(entry, ver);
        for (block, _) in &blocks {
            if !reached.contains(block) {
                self.shape(*block, None, ShapeError::UnreachableBlock);
            }
        }
    }

    /// Blocks of `ver` reachable from `entry` through branch destinations
    fn reachable(&self, entry: MuId, ver: &FuncVerNode) -> FxHashSet<MuId> {
        let mut reached = FxHashSet::default();
        let mut work = vec![entry];
        while let Some(block) = work.pop() {
            if !reached.insert(block) {
                continue;
            }
            let Some(Node::BasicBlock(bb)) = self.staged(block) else {
                continue;
            };
            for inst in &bb.insts {
                let Some(Node::Inst(inst)) = self.staged(*inst) else {
                    continue;
                };
                for dest in inst.destinations() {
                    if let Some(Node::DestClause(dc)) = self.staged(dest) {
                        if ver.blocks.contains(&dc.dest) {
                            work.push(dc.dest);
                        }
                    }
                }
            }
        }
        reached
    }

    fn check_block(
        &mut self,
        id: MuId,
        bb: &BasicBlockNode,
        ver: &FuncVerNode,
        sig: Option<&FuncSigNode>,
    ) {
        let Some(last) = bb.insts.len().checked_sub(1) else {
            self.shape(id, None, ShapeError::EmptyBlock);
            return;
        };

        let mut scope: Scope = bb
            .params
            .iter()
            .map(|(var, ty)| (*var, self.declared(*ty)))
            .collect();

        for (pos, inst_id) in bb.insts.iter().enumerate() {
            let Some(Node::Inst(inst)) = self.staged(*inst_id) else {
                continue;
            };
            if inst.is_terminator() && pos != last {
                self.shape(
                    id,
                    Some(*inst_id),
                    ShapeError::TerminatorNotLast { inst: *inst_id },
                );
            }
            if pos == last && !inst.is_terminator() {
                self.shape(id, Some(*inst_id), ShapeError::MissingTerminator);
            }
            let results = self.check_inst(*inst_id, inst, &scope, ver, sig);
            scope.extend(results);
        }
    }

    fn declared(&self, ty: MuId) -> Option<ValueType> {
        self.type_node(ty).map(|_| ValueType::Declared(ty))
    }

    /// Type of `operand` as used by `site`; reports variables out of scope
    fn operand_type(&mut self, site: MuId, operand: MuId, scope: &Scope) -> Option<ValueType> {
        match self.node(operand) {
            Some(Node::Const(c)) => self.declared(c.ty()),
            Some(Node::Func(func)) => Some(ValueType::FuncRef(func.sig)),
            Some(Node::GlobalCell(cell)) => self.type_node(cell.ty).map(|_| ValueType::Address {
                is_ptr: false,
                ty: cell.ty,
            }),
            Some(_) => None,
            None => {
                self.var_owner(operand)?;
                match scope.get(&operand) {
                    Some(ty) => *ty,
                    None => {
                        self.shape(site, Some(operand), ShapeError::VarOutOfScope);
                        None
                    }
                }
            }
        }
    }

    /// Checks that `operand` has type `expected`
    fn expect_operand(&mut self, site: MuId, operand: MuId, expected: MuId, scope: &Scope) {
        let Some(value) = self.operand_type(site, operand, scope) else {
            return;
        };
        if self.type_node(expected).is_some() && !self.value_matches(value, expected) {
            self.mismatch(
                site,
                Some(operand),
                self.describe(expected),
                self.describe_value(value),
            );
        }
    }

    /// Checks that `operand` is a `uptr<ref_ty>` (`is_ptr`) or an `iref<ref_ty>`
    fn expect_address(&mut self, site: MuId, operand: MuId, is_ptr: bool, ref_ty: MuId, scope: &Scope) {
        let Some(value) = self.operand_type(site, operand, scope) else {
            return;
        };
        if self.type_node(ref_ty).is_some() && !self.address_matches(value, is_ptr, ref_ty) {
            self.mismatch(
                site,
                Some(operand),
                address_type(is_ptr, &self.describe(ref_ty)),
                self.describe_value(value),
            );
        }
    }

    fn address(&self, is_ptr: bool, ty: MuId) -> Option<ValueType> {
        self.type_node(ty).map(|_| ValueType::Address { is_ptr, ty })
    }

    fn expect_type_class(&mut self, site: MuId, ty: MuId, expected: &str, ok: fn(&TypeNode) -> bool) {
        if let Some(node) = self.type_node(ty) {
            if !ok(node) {
                self.mismatch(site, Some(ty), expected.to_string(), self.describe(ty));
            }
        }
    }

    fn check_inst(
        &mut self,
        id: MuId,
        inst: &InstNode,
        scope: &Scope,
        ver: &FuncVerNode,
        sig: Option<&FuncSigNode>,
    ) -> Vec<(MuId, Option<ValueType>)> {
        match inst {
            InstNode::BinOp {
                result,
                op,
                ty,
                lhs,
                rhs,
            } => {
                if op.is_float() {
                    self.expect_type_class(id, *ty, "float or double", is_float_like);
                } else {
                    self.expect_type_class(id, *ty, "an integer type", is_int);
                }
                self.expect_operand(id, *lhs, *ty, scope);
                self.expect_operand(id, *rhs, *ty, scope);
                vec![(*result, self.declared(*ty))]
            }
            InstNode::Cmp {
                result,
                op,
                ty,
                lhs,
                rhs,
            } => {
                match op.class() {
                    CmpClass::Equality => self.expect_type_class(
                        id,
                        *ty,
                        "an integer or pointer type",
                        |t| is_int(t) || t.is_pointer_like(),
                    ),
                    CmpClass::Ordering => self.expect_type_class(
                        id,
                        *ty,
                        "an integer or untraced pointer type",
                        |t| {
                            matches!(
                                t,
                                TypeNode::Int { .. } | TypeNode::UPtr { .. } | TypeNode::UFuncPtr { .. }
                            )
                        },
                    ),
                    CmpClass::Float => {
                        self.expect_type_class(id, *ty, "float or double", is_float_like)
                    }
                }
                self.expect_operand(id, *lhs, *ty, scope);
                self.expect_operand(id, *rhs, *ty, scope);
                vec![(*result, Some(ValueType::Flag))]
            }
            InstNode::Conv {
                result,
                op,
                from,
                to,
                operand,
            } => {
                if let (Some(f), Some(t)) = (self.type_node(*from), self.type_node(*to)) {
                    if !conversion_allowed(*op, f, t) {
                        self.mismatch(
                            id,
                            None,
                            format!("source and target types valid for {op:?}"),
                            format!("{} to {}", self.describe(*from), self.describe(*to)),
                        );
                    }
                }
                self.expect_operand(id, *operand, *from, scope);
                vec![(*result, self.declared(*to))]
            }
            InstNode::Select {
                result,
                cond_ty,
                ty,
                cond,
                if_true,
                if_false,
            } => {
                self.expect_type_class(id, *cond_ty, "int<1>", |t| {
                    matches!(t, TypeNode::Int { len: 1 })
                });
                self.expect_operand(id, *cond, *cond_ty, scope);
                self.expect_operand(id, *if_true, *ty, scope);
                self.expect_operand(id, *if_false, *ty, scope);
                vec![(*result, self.declared(*ty))]
            }
            InstNode::Branch { dest } => {
                self.check_dest(*dest, ver, scope);
                Vec::new()
            }
            InstNode::Branch2 {
                cond,
                if_true,
                if_false,
            } => {
                if let Some(value) = self.operand_type(id, *cond, scope) {
                    if !self.is_flag(value) {
                        self.mismatch(
                            id,
                            Some(*cond),
                            "int<1>".to_string(),
                            self.describe_value(value),
                        );
                    }
                }
                self.check_dest(*if_true, ver, scope);
                self.check_dest(*if_false, ver, scope);
                Vec::new()
            }
            InstNode::Switch {
                ty,
                operand,
                default,
                cases,
            } => {
                self.expect_type_class(id, *ty, "an integer type", is_int);
                self.expect_operand(id, *operand, *ty, scope);
                self.check_dest(*default, ver, scope);
                let len = match self.type_node(*ty) {
                    Some(TypeNode::Int { len }) => Some(*len),
                    _ => None,
                };
                let mut keys: FxHashMap<u128, MuId> = FxHashMap::default();
                for (value, dest) in cases {
                    if let Some(Node::Const(c)) = self.node(*value) {
                        self.expect_type_eq(id, Some(*value), c.ty(), *ty);
                        if let (ConstNode::Int { value: literal, .. }, Some(len)) = (c, len) {
                            match keys.entry(switch_key(*literal, len)) {
                                Entry::Occupied(first) => self.shape(
                                    id,
                                    Some(*value),
                                    ShapeError::DuplicateSwitchCase { first: *first.get() },
                                ),
                                Entry::Vacant(slot) => {
                                    slot.insert(*value);
                                }
                            }
                        }
                    }
                    self.check_dest(*dest, ver, scope);
                }
                Vec::new()
            }
            InstNode::Call {
                results,
                sig: callee_sig,
                callee,
                args,
            } => {
                self.check_call(id, *callee_sig, *callee, args, scope);
                self.call_results(id, *callee_sig, results)
            }
            InstNode::CCall {
                results,
                callee_ty,
                sig: callee_sig,
                callee,
                args,
            } => {
                if let Some(node) = self.type_node(*callee_ty) {
                    let matches_sig = match node {
                        TypeNode::UFuncPtr { sig } => {
                            self.sig_node(*callee_sig).is_none() || self.sigs_eq(*sig, *callee_sig)
                        }
                        _ => false,
                    };
                    if !matches_sig {
                        self.mismatch(
                            id,
                            Some(*callee_ty),
                            format!("ufuncptr<{}>", self.label(*callee_sig)),
                            self.describe(*callee_ty),
                        );
                    }
                }
                self.expect_operand(id, *callee, *callee_ty, scope);
                self.check_args(id, *callee_sig, args, scope);
                self.call_results(id, *callee_sig, results)
            }
            InstNode::TailCall {
                sig: callee_sig,
                callee,
                args,
            } => {
                self.check_call(id, *callee_sig, *callee, args, scope);
                if let (Some(callee), Some(own)) = (self.sig_node(*callee_sig), sig) {
                    if callee.rets.len() != own.rets.len() {
                        self.shape(
                            id,
                            Some(*callee_sig),
                            ShapeError::ArityMismatch {
                                what: "tail call results",
                                expected: own.rets.len(),
                                found: callee.rets.len(),
                            },
                        );
                    } else {
                        for (found, expected) in callee.rets.iter().zip(&own.rets) {
                            self.expect_type_eq(id, Some(*callee_sig), *found, *expected);
                        }
                    }
                }
                Vec::new()
            }
            InstNode::Ret { values } => {
                match sig {
                    Some(own) if values.len() != own.rets.len() => {
                        self.shape(
                            id,
                            None,
                            ShapeError::ArityMismatch {
                                what: "return values",
                                expected: own.rets.len(),
                                found: values.len(),
                            },
                        );
                        for value in values {
                            self.operand_type(id, *value, scope);
                        }
                    }
                    Some(own) => {
                        for (value, ty) in values.iter().zip(&own.rets) {
                            self.expect_operand(id, *value, *ty, scope);
                        }
                    }
                    None => {
                        for value in values {
                            self.operand_type(id, *value, scope);
                        }
                    }
                }
                Vec::new()
            }
            InstNode::Alloca { result, ty } => {
                self.expect_type_class(id, *ty, "a non-void type", |t| {
                    !matches!(t, TypeNode::Void)
                });
                vec![(*result, self.address(false, *ty))]
            }
            InstNode::GetFieldIRef {
                result,
                is_ptr,
                ref_ty,
                index,
                operand,
            } => {
                self.expect_address(id, *operand, *is_ptr, *ref_ty, scope);
                let field = match self.type_node(*ref_ty) {
                    Some(TypeNode::Struct { fields }) => match fields.get(*index as usize) {
                        Some(field) => Some(*field),
                        None => {
                            self.shape(
                                id,
                                Some(*ref_ty),
                                ShapeError::FieldOutOfRange {
                                    index: *index,
                                    fields: fields.len(),
                                },
                            );
                            None
                        }
                    },
                    Some(_) => {
                        self.mismatch(
                            id,
                            Some(*ref_ty),
                            "a struct type".to_string(),
                            self.describe(*ref_ty),
                        );
                        None
                    }
                    None => None,
                };
                vec![(*result, field.and_then(|f| self.address(*is_ptr, f)))]
            }
            InstNode::GetElemIRef {
                result,
                is_ptr,
                ref_ty,
                index_ty,
                operand,
                index,
            } => {
                self.expect_address(id, *operand, *is_ptr, *ref_ty, scope);
                self.expect_type_class(id, *index_ty, "an integer type", is_int);
                self.expect_operand(id, *index, *index_ty, scope);
                let elem = match self.type_node(*ref_ty) {
                    Some(TypeNode::Array { elem, .. }) => Some(*elem),
                    Some(_) => {
                        self.mismatch(
                            id,
                            Some(*ref_ty),
                            "an array type".to_string(),
                            self.describe(*ref_ty),
                        );
                        None
                    }
                    None => None,
                };
                vec![(*result, elem.and_then(|e| self.address(*is_ptr, e)))]
            }
            InstNode::ShiftIRef {
                result,
                is_ptr,
                ref_ty,
                offset_ty,
                operand,
                offset,
            } => {
                self.expect_address(id, *operand, *is_ptr, *ref_ty, scope);
                self.expect_type_class(id, *offset_ty, "an integer type", is_int);
                self.expect_operand(id, *offset, *offset_ty, scope);
                vec![(*result, self.address(*is_ptr, *ref_ty))]
            }
            InstNode::Load {
                result,
                is_ptr,
                ord,
                ref_ty,
                loc,
            } => {
                if !ord.valid_for_load() {
                    let error = ShapeError::InvalidOrdering {
                        ord: *ord,
                        access: "load",
                    };
                    self.shape(id, None, error);
                }
                self.check_access_type(id, *ord, *ref_ty);
                self.expect_address(id, *loc, *is_ptr, *ref_ty, scope);
                vec![(*result, self.declared(*ref_ty))]
            }
            InstNode::Store {
                is_ptr,
                ord,
                ref_ty,
                loc,
                value,
            } => {
                if !ord.valid_for_store() {
                    let error = ShapeError::InvalidOrdering {
                        ord: *ord,
                        access: "store",
                    };
                    self.shape(id, None, error);
                }
                self.check_access_type(id, *ord, *ref_ty);
                self.expect_address(id, *loc, *is_ptr, *ref_ty, scope);
                self.expect_operand(id, *value, *ref_ty, scope);
                Vec::new()
            }
        }
    }

    /// Loaded or stored values are not void; atomic accesses need a scalar
    /// that fits a machine word
    fn check_access_type(&mut self, id: MuId, ord: MemOrd, ty: MuId) {
        if ord.is_atomic() {
            self.expect_type_class(id, ty, "an integer of at most 64 bits or a pointer", |t| {
                matches!(t, TypeNode::Int { len } if *len <= 64) || t.is_pointer_like()
            });
        } else {
            self.expect_type_class(id, ty, "a non-void type", |t| !matches!(t, TypeNode::Void));
        }
    }

    /// Result variables of a call to a function of signature `callee_sig`
    fn call_results(
        &mut self,
        id: MuId,
        callee_sig: MuId,
        results: &[MuId],
    ) -> Vec<(MuId, Option<ValueType>)> {
        let rets: &[MuId] = self
            .sig_node(callee_sig)
            .map_or(&[][..], |s| s.rets.as_slice());
        if self.sig_node(callee_sig).is_some() && results.len() != rets.len() {
            self.shape(
                id,
                None,
                ShapeError::ArityMismatch {
                    what: "call results",
                    expected: rets.len(),
                    found: results.len(),
                },
            );
        }
        results
            .iter()
            .enumerate()
            .map(|(i, r)| (*r, rets.get(i).and_then(|ty| self.declared(*ty))))
            .collect()
    }

    fn check_call(
        &mut self,
        id: MuId,
        callee_sig: MuId,
        callee: MuId,
        args: &[MuId],
        scope: &Scope,
    ) {
        let callee_type = self.operand_type(id, callee, scope);
        if let (Some(value), Some(_)) = (callee_type, self.sig_node(callee_sig)) {
            let callable = self
                .callee_sig(value)
                .is_some_and(|s| self.sigs_eq(s, callee_sig));
            if !callable {
                let label = self.label(callee_sig);
                self.mismatch(
                    id,
                    Some(callee),
                    format!("funcref<{label}> or ufuncptr<{label}>"),
                    self.describe_value(value),
                );
            }
        }
        self.check_args(id, callee_sig, args, scope);
    }

    /// Checks call arguments against the parameters of `callee_sig`
    fn check_args(&mut self, id: MuId, callee_sig: MuId, args: &[MuId], scope: &Scope) {
        let Some(sig) = self.sig_node(callee_sig) else {
            for arg in args {
                self.operand_type(id, *arg, scope);
            }
            return;
        };
        if args.len() != sig.params.len() {
            self.shape(
                id,
                None,
                ShapeError::ArityMismatch {
                    what: "call arguments",
                    expected: sig.params.len(),
                    found: args.len(),
                },
            );
            for arg in args {
                self.operand_type(id, *arg, scope);
            }
            return;
        }
        for (arg, param) in args.iter().zip(&sig.params) {
            self.expect_operand(id, *arg, *param, scope);
        }
    }

    /// Checks a destination clause against its target block and the branch's scope
    fn check_dest(&mut self, dest: MuId, ver: &FuncVerNode, scope: &Scope) {
        let Some(Node::DestClause(dc)) = self.staged(dest) else {
            return;
        };
        if !ver.blocks.contains(&dc.dest) {
            if self.kind_of(dc.dest) == Some(EntityKind::BasicBlock) {
                self.shape(dest, Some(dc.dest), ShapeError::ForeignDestination);
            }
            return;
        }
        let Some(Node::BasicBlock(target)) = self.node(dc.dest) else {
            return;
        };
        if dc.args.len() != target.params.len() {
            self.shape(
                dest,
                Some(dc.dest),
                ShapeError::ArityMismatch {
                    what: "destination arguments",
                    expected: target.params.len(),
                    found: dc.args.len(),
                },
            );
            for arg in &dc.args {
                self.operand_type(dest, *arg, scope);
            }
            return;
        }
        for (arg, (_, ty)) in dc.args.iter().zip(&target.params) {
            self.expect_operand(dest, *arg, *ty, scope);
        }
    }

    // ===== Pass 7: redefinitions =====

    fn check_redefinitions(&mut self) {
        let bundle = self.bundle;
        for (name, id) in bundle.names() {
            let Some(kind) = bundle.kind_of(*id) else {
                continue;
            };
            let Some(previous) = self.ns.id_of(name) else {
                continue;
            };
            match self.ns.kind_of(previous) {
                Some(previous_kind) if previous_kind != kind => self.report(
                    *id,
                    None,
                    Reason::IncompatibleRedefinition {
                        previous,
                        previous_kind,
                        kind,
                    },
                ),
                _ => {}
            }
        }
    }
}

fn is_int(ty: &TypeNode) -> bool {
    matches!(ty, TypeNode::Int { .. })
}

fn is_float_like(ty: &TypeNode) -> bool {
    matches!(ty, TypeNode::Float | TypeNode::Double)
}

fn address_type(is_ptr: bool, pointee: &str) -> String {
    if is_ptr {
        format!("uptr<{pointee}>")
    } else {
        format!("iref<{pointee}>")
    }
}

/// A case value as seen by a switch over `int<len>`
fn switch_key(value: u64, len: u32) -> u128 {
    if len >= 128 {
        value as i64 as i128 as u128
    } else if len >= 64 {
        u128::from(value)
    } else {
        u128::from(value & ((1u64 << len) - 1))
    }
}

fn literal_kind(c: &ConstNode) -> &'static str {
    match c {
        ConstNode::Int { .. } => "integer",
        ConstNode::Float { .. } => "float",
        ConstNode::Double { .. } => "double",
        ConstNode::Null { .. } => "null",
        ConstNode::Seq { .. } => "sequence",
        ConstNode::Extern { .. } => "extern",
    }
}

fn conversion_allowed(op: ConvOptr, from: &TypeNode, to: &TypeNode) -> bool {
    use TypeNode::{Double, Float, Int};
    match op {
        ConvOptr::Trunc => matches!((from, to), (Int { len: f }, Int { len: t }) if f > t),
        ConvOptr::Zext | ConvOptr::Sext => {
            matches!((from, to), (Int { len: f }, Int { len: t }) if f < t)
        }
        ConvOptr::Fptrunc => matches!((from, to), (Double, Float)),
        ConvOptr::Fpext => matches!((from, to), (Float, Double)),
        ConvOptr::Fptoui | ConvOptr::Fptosi => is_float_like(from) && is_int(to),
        ConvOptr::Uitofp | ConvOptr::Sitofp => is_int(from) && is_float_like(to),
        ConvOptr::Bitcast => {
            matches!(
                (from, to),
                (Int { len: 32 }, Float)
                    | (Float, Int { len: 32 })
                    | (Int { len: 64 }, Double)
                    | (Double, Int { len: 64 })
            ) || (from.is_pointer_like() && to.is_pointer_like())
        }
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
