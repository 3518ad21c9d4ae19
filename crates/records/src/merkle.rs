//! Full merkle tree over transaction ids.

use updaterd_chain::Digest;

use crate::digest::digest;

/// Build the whole tree bottom-up: the leaves first, then each reduced
/// level, the root last. An odd node at the end of a level is carried up
/// unchanged rather than paired with itself.
pub fn full_merkle_tree(ids: &[Digest]) -> Vec<Digest> {
    let mut tree = ids.to_vec();
    let mut start = 0;
    let mut length = ids.len();
    while length > 1 {
        let next_start = tree.len();
        let mut i = 0;
        while i < length {
            if i + 1 == length {
                let carry = tree[start + i];
                tree.push(carry);
            } else {
                let mut buffer = [0u8; 64];
                buffer[..32].copy_from_slice(&tree[start + i]);
                buffer[32..].copy_from_slice(&tree[start + i + 1]);
                tree.push(digest(&buffer));
            }
            i += 2;
        }
        start = next_start;
        length = tree.len() - next_start;
    }
    tree
}

pub fn merkle_root(ids: &[Digest]) -> Option<Digest> {
    full_merkle_tree(ids).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(seed: u8) -> Digest {
        [seed; 32]
    }

    fn pair(left: &Digest, right: &Digest) -> Digest {
        let mut buffer = [0u8; 64];
        buffer[..32].copy_from_slice(left);
        buffer[32..].copy_from_slice(right);
        digest(&buffer)
    }

    #[test]
    fn empty_has_no_root() {
        assert_eq!(merkle_root(&[]), None);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let id = leaf(7);
        assert_eq!(merkle_root(&[id]), Some(id));
        assert_eq!(full_merkle_tree(&[id]).len(), 1);
    }

    #[test]
    fn two_leaves() {
        let (a, b) = (leaf(1), leaf(2));
        assert_eq!(merkle_root(&[a, b]), Some(pair(&a, &b)));
    }

    #[test]
    fn odd_leaf_is_carried_up() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let ab = pair(&a, &b);
        let expected = pair(&ab, &c);
        assert_eq!(merkle_root(&[a, b, c]), Some(expected));

        let tree = full_merkle_tree(&[a, b, c]);
        assert_eq!(tree.len(), 6); // 3 leaves + [ab, c] + root
        assert_eq!(tree[3], ab);
        assert_eq!(tree[4], c);
    }

    #[test]
    fn four_leaves() {
        let ids = [leaf(1), leaf(2), leaf(3), leaf(4)];
        let ab = pair(&ids[0], &ids[1]);
        let cd = pair(&ids[2], &ids[3]);
        assert_eq!(merkle_root(&ids), Some(pair(&ab, &cd)));
    }
}
