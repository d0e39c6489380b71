//! Per-board sequencing models.
//!
//! An [`FpgaModel`] accumulates everything one board will execute: its memory-command sequence,
//! the SRAM blocks it calls, and the state of its timer. Models are owned exclusively by the
//! [`Experiment`], which creates one per board and hands out only shared references or owned
//! [`BoardProgram`] snapshots. Channels refer to their model through an [`FpgaKey`].
//!
//! ## Timer state machine
//!
//! ```text
//!   NotStarted --start--> Running --stop--> Stopped
//!                            ^                 |
//!                            +------start------+   (timer boards only)
//! ```
//!
//! Timer boards (boards with a timing channel) are started and stopped explicitly once per
//! acquisition. Non-timer boards are started once and must never be restarted: a restart would
//! desynchronise their counters relative to boards that kept running.
//!
//! [`Experiment`]: crate::experiment::Experiment
use std::fmt;

use indexmap::IndexMap;

use crate::board::{DacId, DacSlot, FpgaKind};
use crate::error::{Result, SequencerError};
use crate::memory::MemoryCommand;
use crate::sram::SramRegistry;
use crate::utils::micros_to_cycles;

/// Index of a board model inside the experiment's arena (board-registration order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FpgaKey(pub(crate) usize);

impl FpgaKey {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerState {
    NotStarted,
    Running,
    Stopped,
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TimerState::NotStarted => "not started",
                TimerState::Running => "running",
                TimerState::Stopped => "stopped",
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerAction {
    Start,
    Stop,
}

impl fmt::Display for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TimerAction::Start => "start",
                TimerAction::Stop => "stop",
            }
        )
    }
}

/// Whether a board is explicitly triggered per acquisition or runs for the whole sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerRole {
    Timer,
    NonTimer,
}

/// Owned snapshot of one board's generated sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardProgram {
    pub name: String,
    pub kind: FpgaKind,
    pub role: TimerRole,
    pub memory: Vec<MemoryCommand>,
    pub sram_calls: Vec<Vec<String>>,
    pub timer: TimerState,
    /// Bias-command streaming. Enabled on every board, including boards that are not part of
    /// the timing order; this matches the deployed behavior and is harmless but odd.
    pub streams_bias: bool,
}

#[derive(Debug, Clone)]
pub struct FpgaModel {
    name: String,
    kind: FpgaKind,
    role: TimerRole,
    memory_clock_mhz: f64,
    memory: Vec<MemoryCommand>,
    // One entry per SRAM call: one block name, or two for dual-block calls
    sram_calls: Vec<Vec<String>>,
    timer: TimerState,
    // SRAM output slot -> "device/channel" using it
    slots: IndexMap<DacSlot, String>,
    // Preamp DAC -> "device/channel" reading out through it
    preamps: IndexMap<DacId, String>,
}

impl FpgaModel {
    pub fn new(name: &str, kind: FpgaKind, memory_clock_mhz: f64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            role: TimerRole::NonTimer,
            memory_clock_mhz,
            memory: Vec::new(),
            sram_calls: Vec::new(),
            timer: TimerState::NotStarted,
            slots: IndexMap::new(),
            preamps: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FpgaKind {
        self.kind
    }

    pub fn role(&self) -> TimerRole {
        self.role
    }

    pub(crate) fn set_role(&mut self, role: TimerRole) {
        self.role = role;
    }

    pub fn memory(&self) -> &[MemoryCommand] {
        &self.memory
    }

    /// Number of memory commands accumulated so far.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn sram_calls(&self) -> &[Vec<String>] {
        &self.sram_calls
    }

    /// Channels attached to SRAM output slots, as `(slot, "device/channel")`.
    pub fn slots(&self) -> impl Iterator<Item = (&DacSlot, &String)> {
        self.slots.iter()
    }

    /// Claims an SRAM output slot for a channel. Fails if the board is of the wrong kind or the
    /// slot is already taken by another channel.
    pub(crate) fn attach_sram_channel(
        &mut self,
        device: &str,
        channel: &str,
        slot: DacSlot,
        required: FpgaKind,
    ) -> Result<()> {
        if required != self.kind || !self.kind.slots().contains(&slot) {
            return Err(SequencerError::ChannelBoardMismatch {
                device: device.to_string(),
                channel: channel.to_string(),
                board: self.name.clone(),
                expected: required.to_string(),
                actual: self.kind.to_string(),
            });
        }
        if let Some(owner) = self.slots.get(&slot) {
            return Err(SequencerError::SlotConflict {
                board: self.name.clone(),
                slot: slot.to_string(),
                owner: owner.clone(),
            });
        }
        self.slots.insert(slot, format!("{}/{}", device, channel));
        Ok(())
    }

    /// Claims the preamp of one DAC for a timing channel. Each DAC has a single preamp.
    pub(crate) fn attach_timing_channel(
        &mut self,
        device: &str,
        channel: &str,
        dac: DacId,
    ) -> Result<()> {
        if let Some(owner) = self.preamps.get(&dac) {
            return Err(SequencerError::SlotConflict {
                board: self.name.clone(),
                slot: format!("preamp {}", DacSlot::from(dac)),
                owner: owner.clone(),
            });
        }
        self.preamps.insert(dac, format!("{}/{}", device, channel));
        Ok(())
    }

    // MEMORY

    pub fn add_memory_commands(&mut self, commands: &[MemoryCommand]) {
        self.memory.extend_from_slice(commands);
    }

    pub fn add_memory_noop(&mut self) {
        self.memory.push(MemoryCommand::Noop);
    }

    pub fn add_memory_noops(&mut self, count: usize) {
        self.memory
            .extend(std::iter::repeat(MemoryCommand::Noop).take(count));
    }

    pub fn add_memory_delay(&mut self, microseconds: f64) {
        self.memory.push(MemoryCommand::Delay {
            cycles: micros_to_cycles(microseconds, self.memory_clock_mhz),
        });
    }

    /// Appends a call of one SRAM block, resolving its padded address range from the registry.
    pub fn call_sram_block(&mut self, sram: &SramRegistry, block: &str) -> Result<()> {
        let range = sram.range(block)?;
        self.memory.push(MemoryCommand::CallSram(range));
        self.sram_calls.push(vec![block.to_string()]);
        Ok(())
    }

    /// Appends a call of two SRAM blocks separated by `delay` microseconds.
    pub fn call_sram_dual_block(
        &mut self,
        sram: &SramRegistry,
        block1: &str,
        block2: &str,
        delay: f64,
    ) -> Result<()> {
        let first = sram.range(block1)?;
        let second = sram.range(block2)?;
        self.memory.push(MemoryCommand::CallSramDual {
            first,
            second,
            delay_cycles: micros_to_cycles(delay, self.memory_clock_mhz),
        });
        self.sram_calls
            .push(vec![block1.to_string(), block2.to_string()]);
        Ok(())
    }

    /// Empties the memory and SRAM-call sequences and returns the timer to `NotStarted`.
    pub fn clear_memory(&mut self) {
        self.memory.clear();
        self.sram_calls.clear();
        self.timer = TimerState::NotStarted;
    }

    // TIMER

    pub fn timer_state(&self) -> TimerState {
        self.timer
    }

    /// The timer has been started at least once since the last memory reset.
    pub fn is_timer_started(&self) -> bool {
        self.timer != TimerState::NotStarted
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer == TimerState::Running
    }

    /// Checks whether `action` is a legal transition from the current timer state.
    pub fn check_timer(&self, action: TimerAction) -> Result<()> {
        let legal = match (action, self.timer) {
            (TimerAction::Start, TimerState::NotStarted) => true,
            (TimerAction::Start, TimerState::Stopped) => self.role == TimerRole::Timer,
            (TimerAction::Stop, TimerState::Running) => true,
            _ => false,
        };
        if legal {
            Ok(())
        } else {
            Err(SequencerError::InvalidTimerTransition {
                board: self.name.clone(),
                action,
                state: self.timer,
            })
        }
    }

    pub fn start_timer(&mut self) -> Result<()> {
        self.check_timer(TimerAction::Start)?;
        self.memory.push(MemoryCommand::StartTimer);
        self.timer = TimerState::Running;
        log::debug!("Board {}: timer started", self.name);
        Ok(())
    }

    pub fn stop_timer(&mut self) -> Result<()> {
        self.check_timer(TimerAction::Stop)?;
        self.memory.push(MemoryCommand::StopTimer);
        self.timer = TimerState::Stopped;
        log::debug!("Board {}: timer stopped", self.name);
        Ok(())
    }

    pub fn program(&self) -> BoardProgram {
        BoardProgram {
            name: self.name.clone(),
            kind: self.kind,
            role: self.role,
            memory: self.memory.clone(),
            sram_calls: self.sram_calls.clone(),
            timer: self.timer,
            streams_bias: true,
        }
    }
}
