//! Hardware constants used while building sequences.
use crate::error::{Result, SequencerError};

/// Clock and SRAM geometry shared by all boards of an experiment.
///
/// The defaults describe the GHz DAC boards: the memory sequencer runs at 25 MHz, SRAM is
/// addressed in cells of 4 words and a block must span at least 20 words.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerSettings {
    pub memory_clock_mhz: f64,
    pub sram_cell_words: usize,
    pub sram_min_block_words: usize,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            memory_clock_mhz: 25.0,
            sram_cell_words: 4,
            sram_min_block_words: 20,
        }
    }
}

impl SequencerSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.memory_clock_mhz > 0.0) {
            return Err(SequencerError::InvalidSettings(format!(
                "memory_clock_mhz must be positive, got {}",
                self.memory_clock_mhz
            )));
        }
        if self.sram_cell_words == 0 {
            return Err(SequencerError::InvalidSettings(
                "sram_cell_words must be positive".to_string(),
            ));
        }
        if self.sram_min_block_words == 0 || self.sram_min_block_words % self.sram_cell_words != 0
        {
            return Err(SequencerError::InvalidSettings(format!(
                "sram_min_block_words {} must be a positive multiple of sram_cell_words {}",
                self.sram_min_block_words, self.sram_cell_words
            )));
        }
        Ok(())
    }
}
