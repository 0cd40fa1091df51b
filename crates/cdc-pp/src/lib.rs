//! Peripheral Processor: 12-bit register file and private memory,
//! the 64-opcode instruction set, and CM access (`spec.md` §4.7).

pub mod memxfer;
pub mod opcodes;
pub mod registers;

pub use opcodes::step;
pub use registers::{PpSlot, PP_MEM_WORDS};
