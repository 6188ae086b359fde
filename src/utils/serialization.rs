// Bincode 2.0 storage encoding plus the hex framing used to carry it over JSON
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

/// Bincode bytes as lowercase hex, the form blocks and transactions take inside JSON payloads
pub fn to_hex<T: Serialize + bincode::Encode>(data: &T) -> Result<String> {
    Ok(HEXLOWER.encode(&serialize(data)?))
}

pub fn from_hex<T>(text: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let bytes = HEXLOWER
        .decode(text.as_bytes())
        .map_err(|e| BlockchainError::Serialization(format!("Invalid hex payload: {e}")))?;
    deserialize(&bytes)
}
