//! Merkle root computation over transaction hashes.

use crate::hash::{Hash, Hashable};

/// Computes the Merkle root of a list of leaf hashes.
///
/// Levels are built pairwise; an odd leaf at any level is paired with
/// itself. An empty list yields the zero hash, a single leaf is its own
/// root.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::zero();
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            next.push(hash_pair(&left, &right));
        }
        level = next;
    }
    level[0]
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut combined = Vec::with_capacity(64);
    combined.extend_from_slice(left.as_bytes());
    combined.extend_from_slice(right.as_bytes());
    combined.hash()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(data: &[u8]) -> Hash {
        data.hash()
    }

    #[test]
    fn test_empty_root_is_zero() {
        assert_eq!(merkle_root(&[]), Hash::zero());
    }

    #[test]
    fn test_single_leaf_is_its_own_root() {
        let l = leaf(b"only");
        assert_eq!(merkle_root(&[l]), l);
    }

    #[test]
    fn test_pair_root() {
        let a = leaf(b"a");
        let b = leaf(b"b");
        assert_eq!(merkle_root(&[a, b]), hash_pair(&a, &b));
    }

    #[test]
    fn test_odd_leaf_pairs_with_itself() {
        let a = leaf(b"a");
        let b = leaf(b"b");
        let c = leaf(b"c");

        let ab = hash_pair(&a, &b);
        let cc = hash_pair(&c, &c);
        assert_eq!(merkle_root(&[a, b, c]), hash_pair(&ab, &cc));
    }

    #[test]
    fn test_root_is_order_sensitive() {
        let a = leaf(b"a");
        let b = leaf(b"b");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn test_root_changes_with_any_leaf() {
        let leaves: Vec<Hash> = (0u8..7).map(|i| leaf(&[i])).collect();
        let base = merkle_root(&leaves);

        for i in 0..leaves.len() {
            let mut tampered = leaves.clone();
            tampered[i] = leaf(b"tampered");
            assert_ne!(merkle_root(&tampered), base, "leaf {} did not affect root", i);
        }
    }

    use proptest::prelude::*;

    fn arb_leaves(max: usize) -> impl Strategy<Value = Vec<Hash>> {
        proptest::collection::vec(any::<[u8; 32]>().prop_map(Hash::new), 1..max)
    }

    proptest! {
        #[test]
        fn prop_root_commits_to_every_leaf(
            leaves in arb_leaves(24),
            tamper in any::<[u8; 32]>(),
        ) {
            let base = merkle_root(&leaves);
            let tamper = Hash::new(tamper);
            for i in 0..leaves.len() {
                if leaves[i] == tamper {
                    continue;
                }
                let mut tampered = leaves.clone();
                tampered[i] = tamper;
                prop_assert_ne!(merkle_root(&tampered), base);
            }
        }

        #[test]
        fn prop_root_is_stable(leaves in arb_leaves(24)) {
            prop_assert_eq!(merkle_root(&leaves), merkle_root(&leaves.clone()));
        }
    }
}
