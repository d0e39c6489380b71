//! The SRAM block registry and its address arithmetic.
//!
//! Blocks are laid out back to back in registration order. Each block occupies its *padded*
//! length: SRAM is addressed in cells of `sram_cell_words` words and a block must cover at least
//! `sram_min_block_words` words (4 and 20 with [`SequencerSettings::default`]). Addresses are a
//! pure function of the registry's content, so every board resolves the same block to the same
//! range.
//!
//! ```
//! use qubit_sequencer_backend::sram::SramRegistry;
//! use qubit_sequencer_backend::settings::SequencerSettings;
//!
//! let mut sram = SramRegistry::new(&SequencerSettings::default());
//! sram.start_block("b1", 18).unwrap();
//! sram.start_block("b2", 24).unwrap();
//! assert_eq!(sram.padded_length("b1").unwrap(), 20);
//! assert_eq!(sram.start_address("b2").unwrap(), 20);
//! assert_eq!(sram.end_address("b2").unwrap(), 43);
//! ```
use indexmap::IndexMap;

use crate::error::{Result, SequencerError};
use crate::memory::SramRange;
use crate::settings::SequencerSettings;
use crate::utils::ceil_to_grid;

#[derive(Debug, Clone)]
pub struct SramRegistry {
    // Insertion order is address order
    blocks: IndexMap<String, usize>,
    cell_words: usize,
    min_block_words: usize,
}

impl SramRegistry {
    pub fn new(settings: &SequencerSettings) -> Self {
        Self {
            blocks: IndexMap::new(),
            cell_words: settings.sram_cell_words,
            min_block_words: settings.sram_min_block_words,
        }
    }

    /// Pads a raw block length to the cell grid and the minimum block size.
    pub fn pad(&self, length: usize) -> usize {
        if length % self.cell_words == 0 && length >= self.min_block_words {
            return length;
        }
        ceil_to_grid(length, self.cell_words).max(self.min_block_words)
    }

    /// Registers a new block at the end of the address space.
    ///
    /// Names are unique: re-registering a name fails with [`SequencerError::DuplicateBlock`] and
    /// leaves the registry untouched.
    pub fn start_block(&mut self, name: &str, length: usize) -> Result<()> {
        if self.blocks.contains_key(name) {
            return Err(SequencerError::DuplicateBlock(name.to_string()));
        }
        self.blocks.insert(name.to_string(), length);
        Ok(())
    }

    /// Fails with [`SequencerError::BlockNotFound`] unless `name` is registered.
    pub fn require(&self, name: &str) -> Result<()> {
        self.length(name).map(|_| ())
    }

    pub fn names(&self) -> Vec<String> {
        self.blocks.keys().cloned().collect()
    }

    /// Raw (unpadded) length as registered.
    pub fn length(&self, name: &str) -> Result<usize> {
        self.blocks
            .get(name)
            .copied()
            .ok_or_else(|| SequencerError::BlockNotFound(name.to_string()))
    }

    pub fn padded_length(&self, name: &str) -> Result<usize> {
        Ok(self.pad(self.length(name)?))
    }

    /// Sum of the padded lengths of all blocks registered before `name`.
    pub fn start_address(&self, name: &str) -> Result<usize> {
        let mut start = 0;
        for (block, &length) in self.blocks.iter() {
            if block == name {
                return Ok(start);
            }
            start += self.pad(length);
        }
        Err(SequencerError::BlockNotFound(name.to_string()))
    }

    /// Last address occupied by `name`, i.e. the cumulative padded length through `name` minus 1.
    pub fn end_address(&self, name: &str) -> Result<usize> {
        let mut end = 0;
        for (block, &length) in self.blocks.iter() {
            end += self.pad(length);
            if block == name {
                return Ok(end - 1);
            }
        }
        Err(SequencerError::BlockNotFound(name.to_string()))
    }

    pub fn range(&self, name: &str) -> Result<SramRange> {
        Ok(SramRange {
            start: self.start_address(name)?,
            end: self.end_address(name)?,
        })
    }

    /// Total number of SRAM words used by all registered blocks.
    pub fn total_padded_length(&self) -> usize {
        self.blocks.values().map(|&length| self.pad(length)).sum()
    }
}
