/// Utilities to parse event traces in SimBin format.
pub mod parser;

/// Utilities to encode event traces to SimBin format.
pub mod encoder;

// ============================================================================
// Layout of a single SimBin record (big-endian, no stream header):
//
// kind: u8 | semantics: u8 | tid: i16 | addr: i64 | size: i32 | flags: u8 |
// value: i64 | instructions: i32 | line: i16 | file: i16 | routine: i16 |
// seq: i32 | last_line: i16 | last_file: i16
//
// Opcodes are not part of the record; the simulator does not consume them.
const RECORD_LEN: usize = 43;

const FLAG_STACK: u8 = 0b001;
const FLAG_ATOMIC: u8 = 0b010;
const FLAG_IGNORED: u8 = 0b100;
const FLAG_MASK: u8 = FLAG_STACK | FLAG_ATOMIC | FLAG_IGNORED;
// ============================================================================
