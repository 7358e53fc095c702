//! 7z header property ids ("NIDs"), bit-exact with the reference archiver
//! (spec §6). Grounded on the constant table used by `sevenz-rust2` and
//! `sevenzip-mt` in the reference pack.

pub const K_END: u8 = 0x00;
pub const K_HEADER: u8 = 0x01;
pub const K_ARCHIVE_PROPERTIES: u8 = 0x02;
pub const K_ADDITIONAL_STREAMS_INFO: u8 = 0x03;
pub const K_MAIN_STREAMS_INFO: u8 = 0x04;
pub const K_FILES_INFO: u8 = 0x05;
pub const K_PACK_INFO: u8 = 0x06;
pub const K_UNPACK_INFO: u8 = 0x07;
pub const K_SUB_STREAMS_INFO: u8 = 0x08;
pub const K_SIZE: u8 = 0x09;
pub const K_CRC: u8 = 0x0A;
pub const K_FOLDER: u8 = 0x0B;
pub const K_CODERS_UNPACK_SIZE: u8 = 0x0C;
pub const K_NUM_UNPACK_STREAM: u8 = 0x0D;
pub const K_EMPTY_STREAM: u8 = 0x0E;
pub const K_EMPTY_FILE: u8 = 0x0F;
pub const K_ANTI: u8 = 0x10;
pub const K_NAME: u8 = 0x11;
pub const K_C_TIME: u8 = 0x12;
pub const K_A_TIME: u8 = 0x13;
pub const K_M_TIME: u8 = 0x14;
pub const K_WIN_ATTRIBUTES: u8 = 0x15;
pub const K_COMMENT: u8 = 0x16;
pub const K_ENCODED_HEADER: u8 = 0x17;
pub const K_START_POS: u8 = 0x18;
pub const K_DUMMY: u8 = 0x19;

pub const SIGNATURE: [u8; 6] = [b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C];
pub const SIGNATURE_HEADER_SIZE: u64 = 32;

pub const MAX_CODERS_PER_FOLDER: usize = 64;
pub const MAX_CODER_STREAMS_PER_FOLDER: usize = 64;
