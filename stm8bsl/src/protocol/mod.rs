//! STM8 ROM bootloader protocol: frame codec and transfer chunking.

pub mod frame;
pub mod transfer;

pub use frame::{
    ACK, Command, GET_RESPONSE_LEN, GetResponse, GetResponseError, NACK, SYNC, encode_address,
    encode_command, encode_erase_sector, encode_lengthed_payload, encode_read_length,
    xor_checksum,
};
pub use transfer::{Chunk, Chunks, READ_CHUNK_SIZE, TransferRange, WRITE_CHUNK_SIZE};
