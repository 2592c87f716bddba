use std::fmt;

/// Errors raised while building or running a machine.
///
/// The first four are fatal run-time faults: the machine halts and never
/// retries the instruction. The rest are rejected at load time, before any
/// instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Chip8Error {
    #[error("stack overflow: call with 16 return addresses already pushed at 0x{pc:03x}")]
    StackOverflow { pc: u16 },

    #[error("stack underflow: return with an empty stack at 0x{pc:03x}")]
    StackUnderflow { pc: u16 },

    #[error("illegal opcode 0x{opcode:04x} at 0x{pc:03x}")]
    IllegalOpcode { opcode: u16, pc: u16 },

    #[error("program counter ran past addressable memory (0x{pc:04x})")]
    InstructionFlowGuard { pc: u16 },

    #[error("ROM is {size} bytes, the program area holds at most {max} bytes")]
    RomTooLarge { size: usize, max: usize },

    #[error("ROM is empty")]
    RomEmpty,

    #[error("font sprite must be {expected} bytes, got {len}")]
    InvalidFont { len: usize, expected: usize },
}

/// Diagnostics captured when the machine halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub error: Chip8Error,
    /// Last opcode fetched
    pub opcode: u16,
    /// Address the opcode was fetched from
    pub pc: u16,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (last opcode 0x{:04x} at 0x{:03x})",
            self.error, self.opcode, self.pc
        )
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
