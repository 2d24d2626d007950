//! Mapping of Mu types onto Cranelift value types
//!
//! Scalars map one to one, `int<1>` travels in an 8-bit register and every
//! pointer-like type is a host pointer-width integer. Aggregates have no
//! register representation and are rejected, but they do have a memory
//! layout: C-style, each field at the next multiple of its alignment.

use anyhow::{anyhow, bail, Result};
use cranelift::prelude::*;

use mu_core::ir::TypeNode;
use mu_core::{MuId, Namespace, Node};

/// Register type of an integer of `len` bits
pub fn int_type(len: u32) -> Option<Type> {
    match len {
        1 | 8 => Some(types::I8),
        16 => Some(types::I16),
        32 => Some(types::I32),
        64 => Some(types::I64),
        128 => Some(types::I128),
        _ => None,
    }
}

pub fn lower_type_node(node: &TypeNode, ptr: Type) -> Result<Type> {
    match node {
        TypeNode::Int { len } => {
            int_type(*len).ok_or_else(|| anyhow!("int<{len}> is not supported by the code generator"))
        }
        TypeNode::Float => Ok(types::F32),
        TypeNode::Double => Ok(types::F64),
        TypeNode::UPtr { .. }
        | TypeNode::UFuncPtr { .. }
        | TypeNode::Ref { .. }
        | TypeNode::IRef { .. }
        | TypeNode::FuncRef { .. } => Ok(ptr),
        TypeNode::Struct { .. } => bail!("struct values are not supported by the code generator"),
        TypeNode::Array { .. } => bail!("array values are not supported by the code generator"),
        TypeNode::Void => bail!("void has no value representation"),
    }
}

pub fn type_node(ns: &Namespace, ty: MuId) -> Result<&TypeNode> {
    match ns.node(ty) {
        Some(Node::Type(node)) => Ok(node),
        _ => Err(anyhow!("{ty} is not a committed type")),
    }
}

pub fn lower_type(ns: &Namespace, ty: MuId, ptr: Type) -> Result<Type> {
    lower_type_node(type_node(ns, ty)?, ptr)
}

/// Width in bits of an integer type
pub fn int_len(ns: &Namespace, ty: MuId) -> Result<u32> {
    match type_node(ns, ty)? {
        TypeNode::Int { len } => Ok(*len),
        _ => Err(anyhow!("{ty} is not an integer type")),
    }
}

/// Size and alignment in bytes of a `ty` stored in memory
pub fn layout(ns: &Namespace, ty: MuId, ptr: Type) -> Result<(u64, u64)> {
    match type_node(ns, ty)? {
        TypeNode::Int { len } => {
            let reg = int_type(*len)
                .ok_or_else(|| anyhow!("int<{len}> is not supported by the code generator"))?;
            let bytes = u64::from(reg.bytes());
            Ok((bytes, bytes))
        }
        TypeNode::Float => Ok((4, 4)),
        TypeNode::Double => Ok((8, 8)),
        TypeNode::UPtr { .. }
        | TypeNode::UFuncPtr { .. }
        | TypeNode::Ref { .. }
        | TypeNode::IRef { .. }
        | TypeNode::FuncRef { .. } => {
            let bytes = u64::from(ptr.bytes());
            Ok((bytes, bytes))
        }
        TypeNode::Struct { fields } => {
            let mut size = 0;
            let mut align = 1;
            for field in fields {
                let (field_size, field_align) = layout(ns, *field, ptr)?;
                size = align_to(size, field_align) + field_size;
                align = align.max(field_align);
            }
            Ok((align_to(size, align), align))
        }
        TypeNode::Array { elem, len } => {
            let (size, align) = layout(ns, *elem, ptr)?;
            let total = size
                .checked_mul(*len)
                .ok_or_else(|| anyhow!("array of {len} elements is too large"))?;
            Ok((total, align))
        }
        TypeNode::Void => bail!("void has no memory representation"),
    }
}

/// Byte offset of field `index` of the struct `ty`
pub fn field_offset(ns: &Namespace, ty: MuId, index: u32, ptr: Type) -> Result<u64> {
    let fields = match type_node(ns, ty)? {
        TypeNode::Struct { fields } => fields,
        _ => bail!("{ty} is not a struct type"),
    };
    let index = index as usize;
    if index >= fields.len() {
        bail!("struct {ty} has no field {index}");
    }
    let mut offset = 0;
    for (i, field) in fields.iter().enumerate() {
        let (size, align) = layout(ns, *field, ptr)?;
        offset = align_to(offset, align);
        if i == index {
            break;
        }
        offset += size;
    }
    Ok(offset)
}

fn align_to(offset: u64, align: u64) -> u64 {
    offset.div_ceil(align) * align
}

/// Fills `sig` (already carrying the module's calling convention) from a
/// Mu function signature
pub fn lower_signature(ns: &Namespace, sig_id: MuId, ptr: Type, sig: &mut Signature) -> Result<()> {
    let node = match ns.node(sig_id) {
        Some(Node::FuncSig(node)) => node,
        _ => bail!("{sig_id} is not a committed function signature"),
    };
    for param in &node.params {
        sig.params.push(AbiParam::new(lower_type(ns, *param, ptr)?));
    }
    for ret in &node.rets {
        sig.returns.push(AbiParam::new(lower_type(ns, *ret, ptr)?));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widths() {
        assert_eq!(int_type(1), Some(types::I8));
        assert_eq!(int_type(8), Some(types::I8));
        assert_eq!(int_type(64), Some(types::I64));
        assert_eq!(int_type(128), Some(types::I128));
        assert_eq!(int_type(7), None);
        assert_eq!(int_type(52), None);
    }

    #[test]
    fn test_pointer_like_types_use_pointer_width() {
        let id = MuId::new(1).unwrap();
        for node in [
            TypeNode::UPtr { ty: id },
            TypeNode::UFuncPtr { sig: id },
            TypeNode::Ref { ty: id },
            TypeNode::IRef { ty: id },
            TypeNode::FuncRef { sig: id },
        ] {
            assert_eq!(lower_type_node(&node, types::I64).unwrap(), types::I64);
            assert_eq!(lower_type_node(&node, types::I32).unwrap(), types::I32);
        }
    }

    fn id(n: u32) -> MuId {
        MuId::new(n).unwrap()
    }

    /// i8 = #1, i64 = #2, i32 = #3, struct<i8 i64 i32> = #4, array<i32 5> = #5
    fn aggregates() -> Namespace {
        use mu_core::CommitBatch;
        let mut ns = Namespace::new();
        ns.commit(CommitBatch {
            nodes: vec![
                (id(1), Node::Type(TypeNode::Int { len: 8 })),
                (id(2), Node::Type(TypeNode::Int { len: 64 })),
                (id(3), Node::Type(TypeNode::Int { len: 32 })),
                (
                    id(4),
                    Node::Type(TypeNode::Struct {
                        fields: vec![id(1), id(2), id(3)],
                    }),
                ),
                (id(5), Node::Type(TypeNode::Array { elem: id(3), len: 5 })),
            ],
            ..Default::default()
        });
        ns
    }

    #[test]
    fn test_struct_layout_pads_fields() {
        let ns = aggregates();
        assert_eq!(layout(&ns, id(4), types::I64).unwrap(), (24, 8));
        assert_eq!(field_offset(&ns, id(4), 0, types::I64).unwrap(), 0);
        assert_eq!(field_offset(&ns, id(4), 1, types::I64).unwrap(), 8);
        assert_eq!(field_offset(&ns, id(4), 2, types::I64).unwrap(), 16);
        assert!(field_offset(&ns, id(4), 3, types::I64).is_err());
        assert!(field_offset(&ns, id(5), 0, types::I64).is_err());
    }

    #[test]
    fn test_array_layout() {
        let ns = aggregates();
        assert_eq!(layout(&ns, id(5), types::I64).unwrap(), (20, 4));
        assert_eq!(layout(&ns, id(1), types::I64).unwrap(), (1, 1));
    }

    #[test]
    fn test_aggregates_are_rejected() {
        let id = MuId::new(1).unwrap();
        let err = lower_type_node(&TypeNode::Struct { fields: vec![id] }, types::I64).unwrap_err();
        assert!(err.to_string().contains("struct"));
        assert!(lower_type_node(&TypeNode::Array { elem: id, len: 2 }, types::I64).is_err());
        assert!(lower_type_node(&TypeNode::Void, types::I64).is_err());
    }
}
