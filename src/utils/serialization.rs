// Every persisted record and wire payload goes through these two functions so
// the byte layout stays in one place.
use crate::error::{BlockchainError, Result};

/// Encode with bincode's standard configuration.
pub fn serialize<T: bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Upper bound on the bytes a single decoded value may claim. Length prefixes
/// past it fail instead of reaching the allocator.
pub const MAX_DECODE_LEN: usize = 32 * 1024 * 1024;

/// Decode with bincode's standard configuration, capped at
/// [`MAX_DECODE_LEN`]; trailing bytes are an error.
pub fn deserialize<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let config = bincode::config::standard().with_limit::<MAX_DECODE_LEN>();
    let (data, consumed) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    if consumed != bytes.len() {
        return Err(BlockchainError::Serialization(format!(
            "Deserialization left {} trailing bytes",
            bytes.len() - consumed
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
    struct Entry {
        index: u64,
        owner: Vec<u8>,
        memo: String,
    }

    #[test]
    fn test_serialize_deserialize() {
        let original = Entry {
            index: 3,
            owner: vec![7; 20],
            memo: "reward".to_string(),
        };

        let bytes = serialize(&original).unwrap();
        let decoded: Entry = deserialize(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = serialize(&42u64).unwrap();
        bytes.push(0);
        assert!(deserialize::<u64>(&bytes).is_err());
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid_bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<Entry> = deserialize(&invalid_bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        // Varint tag 0xFD announces a u64 length: 2^45 bytes.
        let mut bytes = vec![0xFD];
        bytes.extend_from_slice(&(1u64 << 45).to_le_bytes());
        assert!(matches!(
            deserialize::<Vec<u8>>(&bytes),
            Err(BlockchainError::Serialization(_))
        ));
    }
}
