//! Hardware identity of boards and the board categories that have a sequencing model.
//!
//! A [`DacBoard`] is what the resource inventory reports: a name following the FPGA server
//! convention (`"Vince DAC 11"`) and a declared board type. The declared type is an open string
//! because the inventory may contain hardware this crate has no model for (ADC boards, for
//! instance). [`FpgaKind::for_board`] closes it into the supported categories and rejects the rest.
use std::fmt;

use crate::error::{Result, SequencerError};
use crate::utils::parse_board_name;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DacBoard {
    name: String,
    board_type: String,
}

impl DacBoard {
    /// Constructs a board identity after checking the name against the FPGA server convention.
    ///
    /// ```
    /// use qubit_sequencer_backend::board::DacBoard;
    ///
    /// let board = DacBoard::new("Vince DAC 11", "analog").unwrap();
    /// assert_eq!(board.name(), "Vince DAC 11");
    /// assert!(DacBoard::new("DAC11", "analog").is_err());
    /// ```
    pub fn new(name: &str, board_type: &str) -> Result<Self> {
        if parse_board_name(name).is_none() {
            return Err(SequencerError::InvalidBoardName(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            board_type: board_type.to_string(),
        })
    }

    pub fn analog(name: &str) -> Result<Self> {
        Self::new(name, "analog")
    }

    pub fn microwave(name: &str) -> Result<Self> {
        Self::new(name, "microwave")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn board_type(&self) -> &str {
        &self.board_type
    }
}

/// One of the two analog outputs of an analog board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DacId {
    A,
    B,
}

impl From<DacId> for DacSlot {
    fn from(dac: DacId) -> Self {
        match dac {
            DacId::A => DacSlot::A,
            DacId::B => DacSlot::B,
        }
    }
}

/// Output slot of a board that an SRAM channel drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DacSlot {
    A,
    B,
    Iq,
}

impl fmt::Display for DacSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                DacSlot::A => "A",
                DacSlot::B => "B",
                DacSlot::Iq => "IQ",
            }
        )
    }
}

/// Board categories with a sequencing model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FpgaKind {
    /// Two independent analog outputs, DAC A and DAC B.
    Analog,
    /// One I/Q output pair feeding a microwave mixer.
    Microwave,
}

impl FpgaKind {
    /// Maps the declared board type onto a model. Unknown types fail with
    /// [`SequencerError::UnsupportedBoard`].
    pub fn for_board(board: &DacBoard) -> Result<Self> {
        match board.board_type().to_ascii_lowercase().as_str() {
            "analog" => Ok(FpgaKind::Analog),
            "microwave" => Ok(FpgaKind::Microwave),
            _ => Err(SequencerError::UnsupportedBoard {
                board: board.name().to_string(),
                board_type: board.board_type().to_string(),
            }),
        }
    }

    /// SRAM output slots available on this kind of board.
    pub fn slots(&self) -> &'static [DacSlot] {
        match self {
            FpgaKind::Analog => &[DacSlot::A, DacSlot::B],
            FpgaKind::Microwave => &[DacSlot::Iq],
        }
    }
}

impl fmt::Display for FpgaKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FpgaKind::Analog => "analog",
                FpgaKind::Microwave => "microwave",
            }
        )
    }
}
