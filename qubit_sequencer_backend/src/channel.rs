//! Channels: the logical outputs and inputs of a device, each bound to one board.
//!
//! ## Channel categories
//!
//! A [`Channel`] carries a name, the [`DacBoard`] it lives on and, once the owning
//! [`Experiment`] has built its resource model, the [`FpgaKey`] of that board's model.
//! Its behavior is given by a closed [`ChannelKind`]:
//!
//! - [`AnalogChannel`]: drives DAC `A` or `B` of an analog board and accumulates SRAM waveforms.
//! - [`IqChannel`]: drives the I/Q pair of a microwave board and accumulates SRAM waveforms.
//! - [`PreampChannel`]: the timing channel of a readout chain. A board reachable through a
//!   preamp channel is a *timer board* and is explicitly started and stopped per acquisition.
//!
//! ### SRAM capability
//! The two SRAM-capable kinds share the [`SramChannel`] trait, which stores one waveform buffer
//! per SRAM block (shape `[components, length]`). Implementers only supply field accessors; the
//! block bookkeeping comes from default trait methods.
//!
//! [`Experiment`]: crate::experiment::Experiment
use indexmap::IndexMap;
use ndarray::{s, Array2, ArrayView2};

use crate::board::{DacBoard, DacId, DacSlot, FpgaKind};
use crate::error::{Result, SequencerError};
use crate::fpga::FpgaKey;

pub trait SramChannel {
    // Field methods
    fn components(&self) -> usize;
    fn blocks(&self) -> &IndexMap<String, Array2<f64>>;
    // Mutable field references
    fn blocks_(&mut self) -> &mut IndexMap<String, Array2<f64>>;

    /// Starts accumulating waveform data for a new block. The buffer is zero-initialised.
    fn start_block(&mut self, name: &str, length: usize) {
        let components = self.components();
        self.blocks_()
            .insert(name.to_string(), Array2::zeros((components, length)));
    }

    /// Name of the block most recently started on this channel.
    fn current_block(&self) -> Option<&str> {
        self.blocks().keys().last().map(|name| name.as_str())
    }

    fn block_data(&self, name: &str) -> Result<&Array2<f64>> {
        self.blocks()
            .get(name)
            .ok_or_else(|| SequencerError::BlockNotFound(name.to_string()))
    }

    /// Replaces the waveform of a block. The data must match the shape the block was started with.
    fn set_block_data(&mut self, name: &str, data: ArrayView2<f64>) -> Result<()> {
        let block = self
            .blocks_()
            .get_mut(name)
            .ok_or_else(|| SequencerError::BlockNotFound(name.to_string()))?;
        if block.dim() != data.dim() {
            return Err(SequencerError::DataShapeMismatch {
                block: name.to_string(),
                expected: block.dim(),
                actual: data.dim(),
            });
        }
        block.assign(&data);
        Ok(())
    }

    /// Returns a copy of the block's waveform zero-padded to `padded_length` samples.
    fn padded_block_data(&self, name: &str, padded_length: usize) -> Result<Array2<f64>> {
        let data = self.block_data(name)?;
        let (components, length) = data.dim();
        let mut padded = Array2::zeros((components, padded_length.max(length)));
        padded.slice_mut(s![.., ..length]).assign(data);
        Ok(padded)
    }
}

/// An analog output channel (one DAC of an analog board).
#[derive(Debug, Clone)]
pub struct AnalogChannel {
    dac: DacId,
    blocks: IndexMap<String, Array2<f64>>,
}

impl AnalogChannel {
    pub fn dac(&self) -> DacId {
        self.dac
    }
}

impl SramChannel for AnalogChannel {
    fn components(&self) -> usize {
        1
    }
    fn blocks(&self) -> &IndexMap<String, Array2<f64>> {
        &self.blocks
    }
    fn blocks_(&mut self) -> &mut IndexMap<String, Array2<f64>> {
        &mut self.blocks
    }
}

/// Microwave source settings used by an I/Q channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MicrowaveConfig {
    pub frequency_ghz: f64,
    pub power_dbm: f64,
}

/// An I/Q output channel of a microwave board.
#[derive(Debug, Clone)]
pub struct IqChannel {
    blocks: IndexMap<String, Array2<f64>>,
    microwave: Option<MicrowaveConfig>,
}

impl IqChannel {
    pub fn microwave_config(&self) -> Option<&MicrowaveConfig> {
        self.microwave.as_ref()
    }
}

impl SramChannel for IqChannel {
    // Row 0 is I, row 1 is Q
    fn components(&self) -> usize {
        2
    }
    fn blocks(&self) -> &IndexMap<String, Array2<f64>> {
        &self.blocks
    }
    fn blocks_(&mut self) -> &mut IndexMap<String, Array2<f64>> {
        &mut self.blocks
    }
}

/// Readout preamplifier settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PreampConfig {
    pub offset: i32,
    pub polarity: bool,
    pub high_pass: String,
    pub low_pass: String,
}

/// Timing channel: a readout preamp attached to one DAC of a board.
#[derive(Debug, Clone)]
pub struct PreampChannel {
    dac: DacId,
    config: Option<PreampConfig>,
}

impl PreampChannel {
    pub fn dac(&self) -> DacId {
        self.dac
    }

    pub fn config(&self) -> Option<&PreampConfig> {
        self.config.as_ref()
    }
}

#[derive(Debug, Clone)]
pub enum ChannelKind {
    Analog(AnalogChannel),
    Iq(IqChannel),
    Preamp(PreampChannel),
}

#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    board: DacBoard,
    fpga: Option<FpgaKey>,
    kind: ChannelKind,
}

impl Channel {
    fn new(name: &str, board: DacBoard, kind: ChannelKind) -> Self {
        Self {
            name: name.to_string(),
            board,
            fpga: None,
            kind,
        }
    }

    pub fn analog(name: &str, board: DacBoard, dac: DacId) -> Self {
        Self::new(
            name,
            board,
            ChannelKind::Analog(AnalogChannel {
                dac,
                blocks: IndexMap::new(),
            }),
        )
    }

    pub fn iq(name: &str, board: DacBoard) -> Self {
        Self::new(
            name,
            board,
            ChannelKind::Iq(IqChannel {
                blocks: IndexMap::new(),
                microwave: None,
            }),
        )
    }

    pub fn preamp(name: &str, board: DacBoard, dac: DacId) -> Self {
        Self::new(
            name,
            board,
            ChannelKind::Preamp(PreampChannel { dac, config: None }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn board(&self) -> &DacBoard {
        &self.board
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    /// Key of the board model this channel is bound to, once the experiment has been built.
    pub fn fpga(&self) -> Option<FpgaKey> {
        self.fpga
    }

    pub(crate) fn bind_fpga(&mut self, key: FpgaKey) {
        self.fpga = Some(key);
    }

    pub fn category(&self) -> &'static str {
        match self.kind {
            ChannelKind::Analog(_) => "analog",
            ChannelKind::Iq(_) => "iq",
            ChannelKind::Preamp(_) => "preamp",
        }
    }

    pub fn is_sram(&self) -> bool {
        self.sram().is_some()
    }

    pub fn is_timing(&self) -> bool {
        matches!(self.kind, ChannelKind::Preamp(_))
    }

    pub fn sram(&self) -> Option<&dyn SramChannel> {
        match &self.kind {
            ChannelKind::Analog(chan) => Some(chan),
            ChannelKind::Iq(chan) => Some(chan),
            ChannelKind::Preamp(_) => None,
        }
    }

    pub fn sram_(&mut self) -> Option<&mut dyn SramChannel> {
        match &mut self.kind {
            ChannelKind::Analog(chan) => Some(chan),
            ChannelKind::Iq(chan) => Some(chan),
            ChannelKind::Preamp(_) => None,
        }
    }

    /// Board slot and board kind an SRAM channel needs, `None` for channels without SRAM.
    /// DAC a timing channel reads out through, `None` for other channels.
    pub fn timing_dac(&self) -> Option<DacId> {
        match &self.kind {
            ChannelKind::Preamp(chan) => Some(chan.dac),
            _ => None,
        }
    }

    pub fn sram_slot(&self) -> Option<(DacSlot, FpgaKind)> {
        match &self.kind {
            ChannelKind::Analog(chan) => Some((chan.dac.into(), FpgaKind::Analog)),
            ChannelKind::Iq(_) => Some((DacSlot::Iq, FpgaKind::Microwave)),
            ChannelKind::Preamp(_) => None,
        }
    }

    pub(crate) fn set_preamp_config(&mut self, config: PreampConfig) -> bool {
        match &mut self.kind {
            ChannelKind::Preamp(chan) => {
                chan.config = Some(config);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_microwave_config(&mut self, config: MicrowaveConfig) -> bool {
        match &mut self.kind {
            ChannelKind::Iq(chan) => {
                chan.microwave = Some(config);
                true
            }
            _ => false,
        }
    }

    /// Drops per-channel configuration. Accumulated SRAM data is kept.
    pub fn clear_config(&mut self) {
        match &mut self.kind {
            ChannelKind::Analog(_) => {}
            ChannelKind::Iq(chan) => chan.microwave = None,
            ChannelKind::Preamp(chan) => chan.config = None,
        }
    }
}
