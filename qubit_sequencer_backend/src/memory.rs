//! Provides the memory-command vocabulary shared by all board models.
//!
//! ## Main Structures:
//!
//! - [`MemoryCommand`]: one slot of a board's sequential instruction memory. The sequencer only
//!   cares about the order and count of commands; the bit-level encoding of each opcode belongs
//!   to the board driver, so bias commands arrive here already encoded as [`MemoryCommand::Encoded`].
//!
//! - [`SramRange`]: an inclusive `[start, end]` SRAM address range, as resolved from the block
//!   registry (see [`crate::sram::SramRegistry`]).

use std::fmt;

/// Inclusive SRAM address range of one padded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SramRange {
    pub start: usize,
    pub end: usize,
}

impl SramRange {
    /// Number of SRAM words covered by the range.
    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }
}

impl fmt::Display for SramRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// One instruction of a board's memory sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryCommand {
    /// Does nothing for one memory cycle. Used to keep boards in lockstep.
    Noop,
    /// Waits for the given number of memory-clock cycles.
    Delay { cycles: u64 },
    /// An opcode word produced by the board encoder (bias updates and the like).
    Encoded(u32),
    StartTimer,
    StopTimer,
    /// Plays one SRAM block.
    CallSram(SramRange),
    /// Plays two SRAM blocks with an idle delay in between.
    CallSramDual {
        first: SramRange,
        second: SramRange,
        delay_cycles: u64,
    },
}

impl MemoryCommand {
    pub fn is_noop(&self) -> bool {
        matches!(self, MemoryCommand::Noop)
    }
}

impl fmt::Display for MemoryCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryCommand::Noop => write!(f, "NOOP"),
            MemoryCommand::Delay { cycles } => write!(f, "DELAY[{}]", cycles),
            MemoryCommand::Encoded(word) => write!(f, "WORD[{:#08x}]", word),
            MemoryCommand::StartTimer => write!(f, "START_TIMER"),
            MemoryCommand::StopTimer => write!(f, "STOP_TIMER"),
            MemoryCommand::CallSram(range) => write!(f, "CALL_SRAM[{}]", range),
            MemoryCommand::CallSramDual {
                first,
                second,
                delay_cycles,
            } => write!(
                f,
                "CALL_SRAM_DUAL[{}, {}, delay={}]",
                first, second, delay_cycles
            ),
        }
    }
}
