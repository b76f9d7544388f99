use crate::core::Transaction;
use crate::utils::sha256_digest;

/// Merkle root over transaction ids.
///
/// Leaves are the ids themselves; each level hashes adjacent pairs with double
/// SHA-256, duplicating the last node when a level has odd length. A single
/// leaf is paired with itself so the root never equals a bare transaction id.
pub struct MerkleTree;

impl MerkleTree {
    pub fn root_of(transactions: &[Transaction]) -> Vec<u8> {
        let hashes: Vec<Vec<u8>> = transactions.iter().map(|tx| tx.get_id().to_vec()).collect();
        Self::calculate_merkle_root(&hashes)
    }

    /// An empty list hashes to the digest of nothing.
    pub fn calculate_merkle_root(transaction_hashes: &[Vec<u8>]) -> Vec<u8> {
        if transaction_hashes.is_empty() {
            return sha256_digest(&[]);
        }

        let mut current_level = transaction_hashes.to_vec();
        loop {
            let next_level: Vec<Vec<u8>> = current_level
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    Self::hash_pair(left, right)
                })
                .collect();
            current_level = next_level;
            if current_level.len() == 1 {
                break;
            }
        }
        current_level.swap_remove(0)
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);

        let first_hash = sha256_digest(&combined);
        sha256_digest(&first_hash)
    }
}
