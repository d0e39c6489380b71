//! Error taxonomy for sequence building.
//!
//! Every failure in this crate is synchronous and local: an operation either returns `Ok` after
//! applying all of its effects, or returns one of the [`SequencerError`] variants below without
//! having mutated the experiment. Variants fall into three groups:
//!
//! 1. **Not found**: a name given by the caller does not refer to a registered device, channel,
//!    board or SRAM block.
//! 2. **Unsupported configuration**: the device/channel inventory cannot be mapped onto the
//!    supported board models. Raised while constructing an [`Experiment`], in which case no
//!    experiment is produced.
//! 3. **Usage errors**: the request is well-formed but illegal in the current state, e.g. starting
//!    a timer that is already running.
//!
//! [`Experiment`]: crate::experiment::Experiment

use crate::fpga::{TimerAction, TimerState};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SequencerError {
    #[error("Device '{0}' not found.")]
    DeviceNotFound(String),

    #[error("Channel '{channel}' not found on device '{device}'.")]
    ChannelNotFound { device: String, channel: String },

    #[error("Board '{0}' is not part of this experiment.")]
    BoardNotFound(String),

    #[error("SRAM block '{0}' is undefined.")]
    BlockNotFound(String),

    #[error("Unknown DAC board type '{board_type}' for board {board}.")]
    UnsupportedBoard { board: String, board_type: String },

    #[error("Board {board} is declared as both {first} and {second}.")]
    InconsistentBoard {
        board: String,
        first: String,
        second: String,
    },

    #[error("Channel {device}/{channel} requires a {expected} board but {board} is a {actual} board.")]
    ChannelBoardMismatch {
        device: String,
        channel: String,
        board: String,
        expected: String,
        actual: String,
    },

    #[error("Slot {slot} of board {board} is already used by channel {owner}.")]
    SlotConflict {
        board: String,
        slot: String,
        owner: String,
    },

    #[error("Expecting board names of format '<node> DAC <number>' or '<node> ADC <number>' yet received '{0}'.")]
    InvalidBoardName(String),

    #[error("Device {0} already registered.")]
    DuplicateDevice(String),

    #[error("Channel {channel} already registered on device {device}.")]
    DuplicateChannel { device: String, channel: String },

    #[error("Invalid sequencer settings: {0}")]
    InvalidSettings(String),

    #[error("SRAM block '{0}' is already defined.")]
    DuplicateBlock(String),

    #[error("Channel {device}/{channel} is not a {expected} channel.")]
    WrongChannelKind {
        device: String,
        channel: String,
        expected: &'static str,
    },

    #[error("Cannot {action} timer on board {board} while it is {state}.")]
    InvalidTimerTransition {
        board: String,
        action: TimerAction,
        state: TimerState,
    },

    #[error("SRAM data for block '{block}' has shape {actual:?}, expected {expected:?}.")]
    DataShapeMismatch {
        block: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

pub type Result<T, E = SequencerError> = std::result::Result<T, E>;
