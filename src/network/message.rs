// Wire format: one message per connection. A frame is a 12-byte ASCII
// command, null-padded, followed by the bincode-encoded payload fields.

use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize, MAX_DECODE_LEN};

pub const NODE_VERSION: u32 = 1;
pub const COMMAND_LENGTH: usize = 12;
/// Largest frame a node reads from one connection.
pub const MAX_FRAME_LEN: usize = COMMAND_LENGTH + MAX_DECODE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum OpType {
    Tx,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    Version {
        addr_from: String,
        version: u32,
        /// `-1` when the sender's chain is empty.
        best_height: i64,
    },
    GetBlocks {
        addr_from: String,
    },
    Inv {
        addr_from: String,
        op_type: OpType,
        items: Vec<Vec<u8>>,
    },
    GetData {
        addr_from: String,
        op_type: OpType,
        id: Vec<u8>,
    },
    Block {
        addr_from: String,
        block: Vec<u8>,
    },
    Tx {
        addr_from: String,
        transaction: Vec<u8>,
    },
    Addr {
        addr_list: Vec<String>,
    },
}

fn decode_payload<T: bincode::Decode<()>>(command: &str, payload: &[u8]) -> Result<T> {
    deserialize(payload).map_err(|e| {
        BlockchainError::ProtocolDecode(format!("Malformed '{command}' payload: {e}"))
    })
}

impl Package {
    pub fn command(&self) -> &'static str {
        match self {
            Package::Version { .. } => "version",
            Package::GetBlocks { .. } => "getblocks",
            Package::Inv { .. } => "inv",
            Package::GetData { .. } => "getdata",
            Package::Block { .. } => "block",
            Package::Tx { .. } => "tx",
            Package::Addr { .. } => "addr",
        }
    }

    /// Sender address, absent only for `addr`.
    pub fn addr_from(&self) -> Option<&str> {
        match self {
            Package::Version { addr_from, .. }
            | Package::GetBlocks { addr_from }
            | Package::Inv { addr_from, .. }
            | Package::GetData { addr_from, .. }
            | Package::Block { addr_from, .. }
            | Package::Tx { addr_from, .. } => Some(addr_from.as_str()),
            Package::Addr { .. } => None,
        }
    }

    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Package::Version {
                addr_from,
                version,
                best_height,
            } => serialize(&(version, best_height, addr_from))?,
            Package::GetBlocks { addr_from } => serialize(addr_from)?,
            Package::Inv {
                addr_from,
                op_type,
                items,
            } => serialize(&(addr_from, op_type, items))?,
            Package::GetData {
                addr_from,
                op_type,
                id,
            } => serialize(&(addr_from, op_type, id))?,
            Package::Block { addr_from, block } => serialize(&(addr_from, block))?,
            Package::Tx {
                addr_from,
                transaction,
            } => serialize(&(addr_from, transaction))?,
            Package::Addr { addr_list } => serialize(addr_list)?,
        };

        let mut frame = command_to_bytes(self.command());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    pub fn from_frame(frame: &[u8]) -> Result<Package> {
        if frame.len() < COMMAND_LENGTH {
            return Err(BlockchainError::ProtocolDecode(format!(
                "Frame of {} bytes is shorter than the command header",
                frame.len()
            )));
        }
        let (header, payload) = frame.split_at(COMMAND_LENGTH);
        let command = bytes_to_command(header)?;

        let package = match command.as_str() {
            "version" => {
                let (version, best_height, addr_from) = decode_payload(&command, payload)?;
                Package::Version {
                    addr_from,
                    version,
                    best_height,
                }
            }
            "getblocks" => Package::GetBlocks {
                addr_from: decode_payload(&command, payload)?,
            },
            "inv" => {
                let (addr_from, op_type, items) = decode_payload(&command, payload)?;
                Package::Inv {
                    addr_from,
                    op_type,
                    items,
                }
            }
            "getdata" => {
                let (addr_from, op_type, id) = decode_payload(&command, payload)?;
                Package::GetData {
                    addr_from,
                    op_type,
                    id,
                }
            }
            "block" => {
                let (addr_from, block) = decode_payload(&command, payload)?;
                Package::Block { addr_from, block }
            }
            "tx" => {
                let (addr_from, transaction) = decode_payload(&command, payload)?;
                Package::Tx {
                    addr_from,
                    transaction,
                }
            }
            "addr" => Package::Addr {
                addr_list: decode_payload(&command, payload)?,
            },
            other => {
                return Err(BlockchainError::ProtocolDecode(format!(
                    "Unknown command '{other}'"
                )))
            }
        };
        Ok(package)
    }
}

fn command_to_bytes(command: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; COMMAND_LENGTH];
    bytes[..command.len()].copy_from_slice(command.as_bytes());
    bytes
}

fn bytes_to_command(bytes: &[u8]) -> Result<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    if bytes[end..].iter().any(|b| *b != 0) {
        return Err(BlockchainError::ProtocolDecode(
            "Command header is not null-padded".to_string(),
        ));
    }
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| BlockchainError::ProtocolDecode(format!("Command is not ASCII: {e}")))
}
