use pbi_error::{ErrorCode, Failure};

fn combine(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(left);
    bytes.extend_from_slice(right);
    pbi_crypto::sha256(&bytes)
}

fn leaf_bytes(leaves_hex: &[String]) -> Result<Vec<[u8; 32]>, Failure> {
    leaves_hex
        .iter()
        .map(|hex| {
            let bytes = pbi_crypto::hex_to_bytes(hex)
                .map_err(|_| Failure::new(ErrorCode::InvalidStructure))?;
            bytes
                .try_into()
                .map_err(|_| Failure::new(ErrorCode::InvalidStructure))
        })
        .collect()
}

/// Build every level of the tree, leaf level first, root level last
/// (a single element). Odd-length levels promote (duplicate) their last
/// element, per the normative Merkle rule.
fn build_levels(leaves: Vec<[u8; 32]>) -> Vec<Vec<[u8; 32]>> {
    let mut levels = vec![leaves];
    while levels.last().expect("levels never empty").len() > 1 {
        let current = levels.last().expect("levels never empty");
        let mut next = Vec::with_capacity(current.len().div_ceil(2));
        let mut i = 0;
        while i < current.len() {
            if i + 1 < current.len() {
                next.push(combine(&current[i], &current[i + 1]));
            } else {
                next.push(combine(&current[i], &current[i]));
            }
            i += 2;
        }
        levels.push(next);
    }
    levels
}

/// Compute the Merkle root over `leaves_hex` (each a 64-hex receipt hash),
/// in declared order.
///
/// # Errors
///
/// Returns [`ErrorCode::InvalidStructure`] if any leaf is not valid
/// 64-hex. An empty leaf set is rejected the same way — a pack must seal
/// at least one receipt.
pub fn merkle_root(leaves_hex: &[String]) -> Result<String, Failure> {
    if leaves_hex.is_empty() {
        return Err(Failure::with_detail(
            ErrorCode::InvalidStructure,
            "a pack must contain at least one receipt",
        ));
    }
    let leaves = leaf_bytes(leaves_hex)?;
    let levels = build_levels(leaves);
    let root = levels.last().expect("levels never empty")[0];
    Ok(pbi_crypto::bytes_to_hex(&root))
}

/// Compute the sibling path for the leaf at `index`, bottom level first —
/// exactly what a [`pbi_core::Proof`]'s `merkle.siblings` field stores.
///
/// Empty when there is only one leaf.
///
/// # Errors
///
/// Returns [`ErrorCode::InvalidStructure`] if any leaf is not valid
/// 64-hex or `index` is out of range.
pub fn merkle_siblings(leaves_hex: &[String], index: usize) -> Result<Vec<String>, Failure> {
    if index >= leaves_hex.len() {
        return Err(Failure::with_detail(ErrorCode::InvalidStructure, "proof index out of range"));
    }
    let leaves = leaf_bytes(leaves_hex)?;
    let levels = build_levels(leaves);

    let mut siblings = Vec::new();
    let mut idx = index;
    for level in &levels[..levels.len() - 1] {
        let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
        let sibling = if sibling_idx < level.len() { level[sibling_idx] } else { level[idx] };
        siblings.push(pbi_crypto::bytes_to_hex(&sibling));
        idx /= 2;
    }
    Ok(siblings)
}

/// Fold `leaf_hex` up through `siblings` (bottom level first) using the
/// left/right selection rule `is_right := (index >> level) & 1`, and
/// return the resulting root as 64-hex.
///
/// # Errors
///
/// Returns [`ErrorCode::InvalidStructure`] if `leaf_hex` or any sibling is
/// not valid 64-hex.
pub fn fold_proof(leaf_hex: &str, index: u64, siblings: &[String]) -> Result<String, Failure> {
    let leaf_bytes: [u8; 32] = pbi_crypto::hex_to_bytes(leaf_hex)
        .map_err(|_| Failure::new(ErrorCode::InvalidStructure))?
        .try_into()
        .map_err(|_| Failure::new(ErrorCode::InvalidStructure))?;

    let mut acc = leaf_bytes;
    for (level, sibling_hex) in siblings.iter().enumerate() {
        let sibling: [u8; 32] = pbi_crypto::hex_to_bytes(sibling_hex)
            .map_err(|_| Failure::new(ErrorCode::InvalidStructure))?
            .try_into()
            .map_err(|_| Failure::new(ErrorCode::InvalidStructure))?;
        let is_right = (index >> level) & 1 == 1;
        acc = if is_right { combine(&sibling, &acc) } else { combine(&acc, &sibling) };
    }
    Ok(pbi_crypto::bytes_to_hex(&acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> String {
        pbi_crypto::bytes_to_hex(&[byte; 32])
    }

    #[test]
    fn single_leaf_tree_has_no_siblings_and_root_equals_leaf() {
        let leaves = vec![leaf(1)];
        assert_eq!(merkle_root(&leaves).unwrap(), leaves[0]);
        assert!(merkle_siblings(&leaves, 0).unwrap().is_empty());
    }

    #[test]
    fn odd_length_level_promotes_the_last_element() {
        let leaves = vec![leaf(1), leaf(2), leaf(3)];
        let root = merkle_root(&leaves).unwrap();
        let siblings = merkle_siblings(&leaves, 2).unwrap();
        let folded = fold_proof(&leaves[2], 2, &siblings).unwrap();
        assert_eq!(folded, root);
    }

    #[test]
    fn every_leaf_folds_back_to_the_same_root() {
        let leaves: Vec<String> = (0..7u8).map(leaf).collect();
        let root = merkle_root(&leaves).unwrap();
        for (i, l) in leaves.iter().enumerate() {
            let siblings = merkle_siblings(&leaves, i).unwrap();
            assert_eq!(fold_proof(l, i as u64, &siblings).unwrap(), root);
        }
    }

    #[test]
    fn reordering_leaves_changes_the_root() {
        let a = vec![leaf(1), leaf(2), leaf(3), leaf(4)];
        let b = vec![leaf(2), leaf(1), leaf(3), leaf(4)];
        assert_ne!(merkle_root(&a).unwrap(), merkle_root(&b).unwrap());
    }

    #[test]
    fn tampering_a_leaf_changes_the_root() {
        let a = vec![leaf(1), leaf(2), leaf(3), leaf(4)];
        let mut b = a.clone();
        b[1] = leaf(9);
        assert_ne!(merkle_root(&a).unwrap(), merkle_root(&b).unwrap());
    }
}
