//! The experiment module provides the highest level of abstraction for building board sequences,
//! and the single place through which board models are mutated.
//!
//! ## Overview
//!
//! An [`Experiment`] is built once from a collection of [`Device`]s. Construction resolves every
//! channel to its board, creates one [`FpgaModel`] per distinct board, and partitions the boards
//! into *timer* boards (reachable through a timing channel) and *non-timer* boards. After that,
//! the client repeatedly calls experiment methods; each call fans out to every relevant board
//! model and leaves all boards in lockstep before returning.
//!
//! ## Lockstep
//!
//! Boards execute their memory sequences in parallel under a shared trigger, one command per slot.
//! Every sequencing method therefore appends the *same number* of commands to every board:
//!
//! - [`Experiment::add_bias_commands`] pads each board's commands with noops up to the longest
//!   per-board list, then appends the optional delay everywhere.
//! - [`Experiment::add_memory_delay`], [`Experiment::call_sram_block`] and
//!   [`Experiment::call_sram_dual_block`] append exactly one command per board.
//! - [`Experiment::start_timer`] and [`Experiment::stop_timer`] give one timer command to every
//!   requested board and a noop to every other timer board. Non-timer boards are started exactly
//!   once and stopped whenever they are running.
//!
//! ## Key structures and their relationships
//!
//! - **Experiment** owns the devices, the board models, the SRAM block registry and the
//!   configuration (setup state, timing order).
//! - **Device** / **Channel**: the client's inventory. Channels refer to their board model through
//!   an [`FpgaKey`] index, never through a handle.
//! - **FpgaModel**: one board's memory sequence and timer. Only reachable mutably through
//!   `&mut Experiment`; clients read [`BoardProgram`] snapshots.
//! - **SramRegistry**: the shared SRAM address layout.
//!
//! Every fallible method validates its whole request before mutating anything, so an `Err` leaves
//! the experiment exactly as it was.

use std::collections::HashMap;

use indexmap::IndexMap;
use ndarray::{Array2, ArrayView2};

use crate::board::FpgaKind;
use crate::channel::*;
use crate::device::*;
use crate::error::{Result, SequencerError};
use crate::fpga::*;
use crate::memory::MemoryCommand;
use crate::settings::SequencerSettings;
use crate::sram::SramRegistry;

/// Opaque setup packet forwarded to the instrument servers before a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupPacket(pub Vec<u8>);

/// Orchestrates the board models of one experiment.
///
/// Methods fall into the following categories:
/// 1. Construction and lookup:
///     - [`new`], [`with_settings`]
///     - [`device`], [`devices`], [`channel`], [`fpga`], [`channel_fpga`]
///     - [`fpga_names`], [`timer_fpga_names`], [`non_timer_fpga_names`], [`board_program`]
/// 2. Configuration:
///     - [`set_setup_state`], [`setup_state`], [`setup_packets`]
///     - [`set_timing_order`], [`timing_order`]
///     - [`set_preamp_config`], [`set_microwave_config`], [`clear_config`]
/// 3. SRAM:
///     - [`start_sram_block`], [`block_names`], [`block_length`], [`padded_block_length`]
///     - [`block_start_address`], [`block_end_address`], [`total_sram_length`]
///     - [`set_sram_data`], [`sram_data`]
/// 4. Memory sequencing:
///     - [`clear_memory`], [`add_bias_commands`], [`add_memory_delay`]
///     - [`call_sram_block`], [`call_sram_dual_block`]
///     - [`start_timer`], [`stop_timer`]
///
/// [`new`]: Experiment::new
/// [`with_settings`]: Experiment::with_settings
/// [`device`]: Experiment::device
/// [`devices`]: Experiment::devices
/// [`channel`]: Experiment::channel
/// [`fpga`]: Experiment::fpga
/// [`channel_fpga`]: Experiment::channel_fpga
/// [`fpga_names`]: Experiment::fpga_names
/// [`timer_fpga_names`]: Experiment::timer_fpga_names
/// [`non_timer_fpga_names`]: Experiment::non_timer_fpga_names
/// [`board_program`]: Experiment::board_program
/// [`set_setup_state`]: Experiment::set_setup_state
/// [`setup_state`]: Experiment::setup_state
/// [`setup_packets`]: Experiment::setup_packets
/// [`set_timing_order`]: Experiment::set_timing_order
/// [`timing_order`]: Experiment::timing_order
/// [`set_preamp_config`]: Experiment::set_preamp_config
/// [`set_microwave_config`]: Experiment::set_microwave_config
/// [`clear_config`]: Experiment::clear_config
/// [`start_sram_block`]: Experiment::start_sram_block
/// [`block_names`]: Experiment::block_names
/// [`block_length`]: Experiment::block_length
/// [`padded_block_length`]: Experiment::padded_block_length
/// [`block_start_address`]: Experiment::block_start_address
/// [`block_end_address`]: Experiment::block_end_address
/// [`total_sram_length`]: Experiment::total_sram_length
/// [`set_sram_data`]: Experiment::set_sram_data
/// [`sram_data`]: Experiment::sram_data
/// [`clear_memory`]: Experiment::clear_memory
/// [`add_bias_commands`]: Experiment::add_bias_commands
/// [`add_memory_delay`]: Experiment::add_memory_delay
/// [`call_sram_block`]: Experiment::call_sram_block
/// [`call_sram_dual_block`]: Experiment::call_sram_dual_block
/// [`start_timer`]: Experiment::start_timer
/// [`stop_timer`]: Experiment::stop_timer
#[derive(Debug, Clone)]
pub struct Experiment {
    devices: IndexMap<String, Device>,
    // Board-registration order; the position of a board is its FpgaKey
    fpgas: IndexMap<String, FpgaModel>,
    timer_fpgas: Vec<FpgaKey>,
    non_timer_fpgas: Vec<FpgaKey>,
    sram: SramRegistry,
    setup_state: Vec<String>,
    setup_packets: Vec<SetupPacket>,
    // (device, channel) of timing channels; None means all of them in insertion order
    timing_order: Option<Vec<(String, String)>>,
}

fn bound_key(chan: &Channel) -> Result<FpgaKey> {
    chan.fpga()
        .ok_or_else(|| SequencerError::BoardNotFound(chan.board().name().to_string()))
}

impl Experiment {
    /// Builds the resource model with [`SequencerSettings::default`].
    ///
    /// # Example
    /// ```
    /// # use qubit_sequencer_backend::*;
    /// let timer = DacBoard::analog("Vince DAC 1").unwrap();
    /// let bias = DacBoard::analog("Vince DAC 2").unwrap();
    /// let q0 = Device::new("q0")
    ///     .with_channel(Channel::analog("z", bias, DacId::A)).unwrap()
    ///     .with_channel(Channel::preamp("timing", timer, DacId::A)).unwrap();
    ///
    /// let exp = Experiment::new(vec![q0]).unwrap();
    /// assert_eq!(exp.fpga_names(), vec!["Vince DAC 2", "Vince DAC 1"]);
    /// assert_eq!(exp.timer_fpga_names(), vec!["Vince DAC 1"]);
    /// assert_eq!(exp.non_timer_fpga_names(), vec!["Vince DAC 2"]);
    /// ```
    pub fn new(devices: Vec<Device>) -> Result<Self> {
        Self::with_settings(devices, SequencerSettings::default())
    }

    /// Builds the resource model.
    ///
    /// Boards are registered in the order their first channel is encountered (devices in the
    /// given order, channels in insertion order). Fails without producing an experiment if
    /// - the settings are invalid,
    /// - two devices share a name,
    /// - a board's declared type has no model ([`SequencerError::UnsupportedBoard`]) or
    ///   channels declare the same board with different types,
    /// - an SRAM channel sits on the wrong kind of board or on an already claimed slot,
    /// - two timing channels read out through the same DAC of a board.
    pub fn with_settings(devices: Vec<Device>, settings: SequencerSettings) -> Result<Self> {
        settings.validate()?;

        let mut device_map: IndexMap<String, Device> = IndexMap::new();
        for dev in devices {
            if device_map.contains_key(dev.name()) {
                return Err(SequencerError::DuplicateDevice(dev.name().to_string()));
            }
            device_map.insert(dev.name().to_string(), dev);
        }

        let mut fpgas: IndexMap<String, FpgaModel> = IndexMap::new();
        let mut timer_keys: Vec<FpgaKey> = Vec::new();
        for dev in device_map.values_mut() {
            let dev_name = dev.name().to_string();
            for chan in dev.channels_().values_mut() {
                let board = chan.board();
                let index = match fpgas.get_index_of(board.name()) {
                    Some(index) => {
                        // Every channel must agree on the kind of a shared board
                        let kind = FpgaKind::for_board(board)?;
                        if kind != fpgas[index].kind() {
                            return Err(SequencerError::InconsistentBoard {
                                board: board.name().to_string(),
                                first: fpgas[index].kind().to_string(),
                                second: kind.to_string(),
                            });
                        }
                        index
                    }
                    None => {
                        let kind = FpgaKind::for_board(board)?;
                        let model = FpgaModel::new(board.name(), kind, settings.memory_clock_mhz);
                        fpgas.insert_full(board.name().to_string(), model).0
                    }
                };
                if let Some((slot, required)) = chan.sram_slot() {
                    fpgas[index].attach_sram_channel(&dev_name, chan.name(), slot, required)?;
                }
                if let Some(dac) = chan.timing_dac() {
                    fpgas[index].attach_timing_channel(&dev_name, chan.name(), dac)?;
                }
                let key = FpgaKey(index);
                if chan.is_timing() && !timer_keys.contains(&key) {
                    timer_keys.push(key);
                }
                chan.bind_fpga(key);
            }
        }

        // Partition once, in board-registration order
        let mut timer_fpgas = Vec::new();
        let mut non_timer_fpgas = Vec::new();
        for (index, fpga) in fpgas.values_mut().enumerate() {
            let key = FpgaKey(index);
            if timer_keys.contains(&key) {
                fpga.set_role(TimerRole::Timer);
                timer_fpgas.push(key);
            } else {
                fpga.set_role(TimerRole::NonTimer);
                non_timer_fpgas.push(key);
            }
        }

        log::info!(
            "Built experiment with {} devices on {} boards ({} timer, {} non-timer)",
            device_map.len(),
            fpgas.len(),
            timer_fpgas.len(),
            non_timer_fpgas.len()
        );

        Ok(Self {
            sram: SramRegistry::new(&settings),
            devices: device_map,
            fpgas,
            timer_fpgas,
            non_timer_fpgas,
            setup_state: Vec::new(),
            setup_packets: Vec::new(),
            timing_order: None,
        })
    }

    // LOOKUP

    pub fn devices(&self) -> &IndexMap<String, Device> {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Result<&Device> {
        self.devices
            .get(name)
            .ok_or_else(|| SequencerError::DeviceNotFound(name.to_string()))
    }

    fn device_(&mut self, name: &str) -> Result<&mut Device> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| SequencerError::DeviceNotFound(name.to_string()))
    }

    pub fn channel(&self, dev_name: &str, chan_name: &str) -> Result<&Channel> {
        self.device(dev_name)?.chan(chan_name)
    }

    /// Executes `f` on a channel after checking that the device and the channel exist.
    fn channel_op<F, R>(&mut self, dev_name: &str, chan_name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Channel) -> Result<R>,
    {
        let chan = self.device_(dev_name)?.chan_(chan_name)?;
        f(chan)
    }

    /// Resolves a timing channel, rejecting channels of other kinds.
    fn timing_channel(&self, dev_name: &str, chan_name: &str) -> Result<&Channel> {
        let chan = self.channel(dev_name, chan_name)?;
        if !chan.is_timing() {
            return Err(SequencerError::WrongChannelKind {
                device: dev_name.to_string(),
                channel: chan_name.to_string(),
                expected: "timing",
            });
        }
        Ok(chan)
    }

    /// Distinct boards of the given timing channels, in request order.
    fn timing_fpgas(&self, channels: &[(&str, &str)]) -> Result<Vec<FpgaKey>> {
        let mut keys = Vec::new();
        for &(dev_name, chan_name) in channels {
            let key = bound_key(self.timing_channel(dev_name, chan_name)?)?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    pub fn fpga(&self, name: &str) -> Result<&FpgaModel> {
        self.fpgas
            .get(name)
            .ok_or_else(|| SequencerError::BoardNotFound(name.to_string()))
    }

    /// Board model a channel is bound to.
    pub fn channel_fpga(&self, dev_name: &str, chan_name: &str) -> Result<&FpgaModel> {
        let key = bound_key(self.channel(dev_name, chan_name)?)?;
        Ok(&self.fpgas[key.index()])
    }

    fn names_of(&self, keys: &[FpgaKey]) -> Vec<String> {
        keys.iter()
            .map(|key| self.fpgas[key.index()].name().to_string())
            .collect()
    }

    /// All board names in registration order.
    pub fn fpga_names(&self) -> Vec<String> {
        self.fpgas.keys().cloned().collect()
    }

    pub fn timer_fpga_names(&self) -> Vec<String> {
        self.names_of(&self.timer_fpgas)
    }

    pub fn non_timer_fpga_names(&self) -> Vec<String> {
        self.names_of(&self.non_timer_fpgas)
    }

    /// Snapshot of one board's generated sequence.
    pub fn board_program(&self, name: &str) -> Result<BoardProgram> {
        Ok(self.fpga(name)?.program())
    }

    /// Snapshots of every board, in registration order.
    pub fn board_programs(&self) -> Vec<BoardProgram> {
        self.fpgas.values().map(|fpga| fpga.program()).collect()
    }

    // CONFIGURATION

    /// Replaces the setup state and packets together.
    pub fn set_setup_state(&mut self, states: Vec<String>, packets: Vec<SetupPacket>) {
        if states.len() != packets.len() {
            log::warn!(
                "Setup state has {} entries but {} packets were given",
                states.len(),
                packets.len()
            );
        }
        self.setup_state = states;
        self.setup_packets = packets;
    }

    pub fn setup_state(&self) -> Vec<String> {
        self.setup_state.clone()
    }

    pub fn setup_packets(&self) -> Vec<SetupPacket> {
        self.setup_packets.clone()
    }

    /// Sets the order of the timing channels whose boards return timing data.
    ///
    /// Every entry must name a timing channel. On error the previous order is kept.
    pub fn set_timing_order(&mut self, channels: &[(&str, &str)]) -> Result<()> {
        for &(dev_name, chan_name) in channels {
            self.timing_channel(dev_name, chan_name)?;
        }
        self.timing_order = Some(
            channels
                .iter()
                .map(|&(dev, chan)| (dev.to_string(), chan.to_string()))
                .collect(),
        );
        Ok(())
    }

    /// Board names from which timing data is returned, in order.
    ///
    /// Defaults to the boards of all timing channels in device and channel insertion order. A board
    /// appears once per timing channel on it.
    pub fn timing_order(&self) -> Vec<String> {
        match &self.timing_order {
            Some(order) => order
                .iter()
                .filter_map(|(dev, chan)| self.channel(dev, chan).ok())
                .map(|chan| chan.board().name().to_string())
                .collect(),
            None => self
                .devices
                .values()
                .flat_map(|dev| dev.timing_channels())
                .map(|chan| chan.board().name().to_string())
                .collect(),
        }
    }

    pub fn set_preamp_config(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        config: PreampConfig,
    ) -> Result<()> {
        self.channel_op(dev_name, chan_name, |chan| {
            if chan.set_preamp_config(config) {
                Ok(())
            } else {
                Err(SequencerError::WrongChannelKind {
                    device: dev_name.to_string(),
                    channel: chan_name.to_string(),
                    expected: "preamp",
                })
            }
        })
    }

    pub fn set_microwave_config(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        config: MicrowaveConfig,
    ) -> Result<()> {
        self.channel_op(dev_name, chan_name, |chan| {
            if chan.set_microwave_config(config) {
                Ok(())
            } else {
                Err(SequencerError::WrongChannelKind {
                    device: dev_name.to_string(),
                    channel: chan_name.to_string(),
                    expected: "iq",
                })
            }
        })
    }

    /// Clears setup state, timing order and every channel's configuration.
    /// SRAM data and board memory are kept.
    pub fn clear_config(&mut self) {
        self.setup_state.clear();
        self.setup_packets.clear();
        self.timing_order = None;
        for dev in self.devices.values_mut() {
            for chan in dev.channels_().values_mut() {
                chan.clear_config();
            }
        }
    }

    // SRAM

    /// Registers an SRAM block and starts a zeroed buffer for it on every SRAM channel.
    ///
    /// # Example
    /// ```
    /// # use qubit_sequencer_backend::*;
    /// let board = DacBoard::analog("Vince DAC 1").unwrap();
    /// let q0 = Device::new("q0")
    ///     .with_channel(Channel::analog("z", board, DacId::A)).unwrap();
    /// let mut exp = Experiment::new(vec![q0]).unwrap();
    ///
    /// exp.start_sram_block("b1", 18).unwrap();
    /// exp.start_sram_block("b2", 24).unwrap();
    /// assert_eq!(exp.padded_block_length("b1").unwrap(), 20);
    /// assert_eq!(exp.block_start_address("b2").unwrap(), 20);
    /// assert_eq!(exp.block_end_address("b2").unwrap(), 43);
    /// assert_eq!(exp.sram_data("q0", "z", "b1").unwrap().dim(), (1, 20));
    /// ```
    pub fn start_sram_block(&mut self, name: &str, length: usize) -> Result<()> {
        self.sram.start_block(name, length)?;
        for dev in self.devices.values_mut() {
            for chan in dev.channels_().values_mut() {
                if let Some(sram) = chan.sram_() {
                    sram.start_block(name, length);
                }
            }
        }
        log::debug!(
            "Started SRAM block {} with length {} (padded {})",
            name,
            length,
            self.sram.pad(length)
        );
        Ok(())
    }

    pub fn block_names(&self) -> Vec<String> {
        self.sram.names()
    }

    pub fn block_length(&self, name: &str) -> Result<usize> {
        self.sram.length(name)
    }

    pub fn padded_block_length(&self, name: &str) -> Result<usize> {
        self.sram.padded_length(name)
    }

    pub fn block_start_address(&self, name: &str) -> Result<usize> {
        self.sram.start_address(name)
    }

    pub fn block_end_address(&self, name: &str) -> Result<usize> {
        self.sram.end_address(name)
    }

    pub fn total_sram_length(&self) -> usize {
        self.sram.total_padded_length()
    }

    /// Overwrites the waveform of `block` on an SRAM channel. `data` has one row per DAC
    /// component and the block's raw length as columns.
    pub fn set_sram_data(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        block: &str,
        data: ArrayView2<f64>,
    ) -> Result<()> {
        self.sram.require(block)?;
        self.channel_op(dev_name, chan_name, |chan| match chan.sram_() {
            Some(sram) => sram.set_block_data(block, data),
            None => Err(SequencerError::WrongChannelKind {
                device: dev_name.to_string(),
                channel: chan_name.to_string(),
                expected: "SRAM",
            }),
        })
    }

    /// Waveform of `block` on an SRAM channel, zero-padded to the block's padded length.
    pub fn sram_data(&self, dev_name: &str, chan_name: &str, block: &str) -> Result<Array2<f64>> {
        let padded_length = self.sram.padded_length(block)?;
        let sram = self
            .channel(dev_name, chan_name)?
            .sram()
            .ok_or_else(|| SequencerError::WrongChannelKind {
                device: dev_name.to_string(),
                channel: chan_name.to_string(),
                expected: "SRAM",
            })?;
        sram.padded_block_data(block, padded_length)
    }

    // MEMORY

    /// Resets every board's memory sequence, SRAM calls and timer. Registered blocks and the
    /// configuration are kept.
    pub fn clear_memory(&mut self) {
        for fpga in self.fpgas.values_mut() {
            fpga.clear_memory();
        }
    }

    /// Appends bias commands to the boards, padded so that all boards stay in lockstep.
    ///
    /// `commands` maps board names to their commands. Every board of the experiment, named or not,
    /// receives its commands followed by noops up to the longest list, then one delay of
    /// `delay` microseconds when `delay > 0`.
    ///
    /// # Example
    /// ```
    /// # use qubit_sequencer_backend::*;
    /// # use maplit::hashmap;
    /// let q0 = Device::new("q0")
    ///     .with_channel(Channel::analog("z", DacBoard::analog("Vince DAC 1").unwrap(), DacId::A)).unwrap()
    ///     .with_channel(Channel::analog("xy", DacBoard::analog("Vince DAC 2").unwrap(), DacId::A)).unwrap();
    /// let mut exp = Experiment::new(vec![q0]).unwrap();
    ///
    /// let commands = hashmap! {
    ///     "Vince DAC 1".to_string() => vec![MemoryCommand::Encoded(0x100), MemoryCommand::Encoded(0x200)],
    /// };
    /// exp.add_bias_commands(&commands, 0.0).unwrap();
    /// assert_eq!(exp.fpga("Vince DAC 2").unwrap().memory(), &[MemoryCommand::Noop, MemoryCommand::Noop]);
    /// ```
    pub fn add_bias_commands(
        &mut self,
        commands: &HashMap<String, Vec<MemoryCommand>>,
        delay: f64,
    ) -> Result<()> {
        if let Some(unknown) = commands.keys().find(|name| !self.fpgas.contains_key(*name)) {
            return Err(SequencerError::BoardNotFound(unknown.clone()));
        }
        let max_count = commands.values().map(Vec::len).max().unwrap_or(0);
        for fpga in self.fpgas.values_mut() {
            let board_commands = commands
                .get(fpga.name())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            fpga.add_memory_commands(board_commands);
            fpga.add_memory_noops(max_count - board_commands.len());
            if delay > 0.0 {
                fpga.add_memory_delay(delay);
            }
        }
        Ok(())
    }

    /// Appends a delay of `microseconds` to every board.
    pub fn add_memory_delay(&mut self, microseconds: f64) {
        for fpga in self.fpgas.values_mut() {
            fpga.add_memory_delay(microseconds);
        }
    }

    /// Calls an SRAM block on every board.
    pub fn call_sram_block(&mut self, block: &str) -> Result<()> {
        self.sram.require(block)?;
        for fpga in self.fpgas.values_mut() {
            fpga.call_sram_block(&self.sram, block)?;
        }
        Ok(())
    }

    /// Calls two SRAM blocks on every board, separated by `delay` microseconds.
    pub fn call_sram_dual_block(&mut self, block1: &str, block2: &str, delay: f64) -> Result<()> {
        self.sram.require(block1)?;
        self.sram.require(block2)?;
        for fpga in self.fpgas.values_mut() {
            fpga.call_sram_dual_block(&self.sram, block1, block2, delay)?;
        }
        Ok(())
    }

    /// Starts the timers of the boards of the given timing channels.
    ///
    /// Timer boards that are not requested receive a noop. Every non-timer board that has not
    /// been started yet is started; non-timer boards are never restarted.
    ///
    /// # Example
    /// ```
    /// # use qubit_sequencer_backend::*;
    /// let q0 = Device::new("q0")
    ///     .with_channel(Channel::preamp("timing", DacBoard::analog("Vince DAC 1").unwrap(), DacId::A)).unwrap()
    ///     .with_channel(Channel::analog("z", DacBoard::analog("Vince DAC 2").unwrap(), DacId::A)).unwrap();
    /// let mut exp = Experiment::new(vec![q0]).unwrap();
    ///
    /// exp.start_timer(&[("q0", "timing")]).unwrap();
    /// assert_eq!(exp.fpga("Vince DAC 1").unwrap().timer_state(), TimerState::Running);
    /// assert_eq!(exp.fpga("Vince DAC 2").unwrap().timer_state(), TimerState::Running);
    /// ```
    pub fn start_timer(&mut self, channels: &[(&str, &str)]) -> Result<()> {
        let starts = self.timing_fpgas(channels)?;
        for key in &starts {
            self.fpgas[key.index()].check_timer(TimerAction::Start)?;
        }

        for key in &starts {
            self.fpgas[key.index()].start_timer()?;
        }
        for key in &self.timer_fpgas {
            if !starts.contains(key) {
                self.fpgas[key.index()].add_memory_noop();
            }
        }
        for key in &self.non_timer_fpgas {
            let fpga = &mut self.fpgas[key.index()];
            if !fpga.is_timer_started() {
                fpga.start_timer()?;
            }
        }
        Ok(())
    }

    /// Stops the timers of the boards of the given timing channels, along with every running
    /// non-timer board. Other timer boards receive a noop.
    pub fn stop_timer(&mut self, channels: &[(&str, &str)]) -> Result<()> {
        let stops = self.timing_fpgas(channels)?;
        for key in &stops {
            self.fpgas[key.index()].check_timer(TimerAction::Stop)?;
        }

        for key in &stops {
            self.fpgas[key.index()].stop_timer()?;
        }
        for key in &self.timer_fpgas {
            if !stops.contains(key) {
                self.fpgas[key.index()].add_memory_noop();
            }
        }
        for key in &self.non_timer_fpgas {
            let fpga = &mut self.fpgas[key.index()];
            if fpga.is_timer_running() {
                fpga.stop_timer()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::board::*;
    use crate::experiment::*;
    use maplit::hashmap;
    use ndarray::array;

    /// q0 drives the non-timer board DAC 2 and reads out through DAC 1;
    /// q1 sits on the microwave board DAC 3, which also carries a timing channel.
    fn experiment() -> Experiment {
        let dac1 = DacBoard::analog("Vince DAC 1").unwrap();
        let dac2 = DacBoard::analog("Vince DAC 2").unwrap();
        let dac3 = DacBoard::microwave("Vince DAC 3").unwrap();
        let q0 = Device::new("q0")
            .with_channel(Channel::analog("z", dac2, DacId::A))
            .unwrap()
            .with_channel(Channel::preamp("timing", dac1.clone(), DacId::A))
            .unwrap()
            .with_channel(Channel::analog("bias", dac1, DacId::B))
            .unwrap();
        let q1 = Device::new("q1")
            .with_channel(Channel::iq("uw", dac3.clone()))
            .unwrap()
            .with_channel(Channel::preamp("timing", dac3, DacId::A))
            .unwrap();
        Experiment::new(vec![q0, q1]).unwrap()
    }

    mod construction {
        use super::*;

        #[test]
        fn partitions_boards() {
            let exp = experiment();
            assert_eq!(
                exp.fpga_names(),
                vec!["Vince DAC 2", "Vince DAC 1", "Vince DAC 3"]
            );
            assert_eq!(exp.timer_fpga_names(), vec!["Vince DAC 1", "Vince DAC 3"]);
            assert_eq!(exp.non_timer_fpga_names(), vec!["Vince DAC 2"]);
            assert_eq!(exp.fpga("Vince DAC 3").unwrap().kind(), FpgaKind::Microwave);
            assert_eq!(exp.fpga("Vince DAC 2").unwrap().role(), TimerRole::NonTimer);
            assert_eq!(
                exp.channel_fpga("q0", "bias").unwrap().name(),
                "Vince DAC 1"
            );
            assert_eq!(
                exp.channel("q1", "uw").unwrap().fpga(),
                Some(FpgaKey(2))
            );
        }

        #[test]
        fn unsupported_board() {
            let adc = DacBoard::new("Vince ADC 1", "adc").unwrap();
            let dev = Device::new("q0")
                .with_channel(Channel::preamp("timing", adc, DacId::A))
                .unwrap();
            assert_eq!(
                Experiment::new(vec![dev]).unwrap_err(),
                SequencerError::UnsupportedBoard {
                    board: "Vince ADC 1".to_string(),
                    board_type: "adc".to_string()
                }
            );
        }

        #[test]
        fn board_declared_twice() {
            // A later channel cannot smuggle in an unknown type under a known name
            let q0 = Device::new("q0")
                .with_channel(Channel::analog("z", DacBoard::analog("Vince DAC 1").unwrap(), DacId::A))
                .unwrap()
                .with_channel(Channel::preamp(
                    "timing",
                    DacBoard::new("Vince DAC 1", "optical").unwrap(),
                    DacId::A,
                ))
                .unwrap();
            assert_eq!(
                Experiment::new(vec![q0]).unwrap_err(),
                SequencerError::UnsupportedBoard {
                    board: "Vince DAC 1".to_string(),
                    board_type: "optical".to_string()
                }
            );

            let q1 = Device::new("q1")
                .with_channel(Channel::analog("z", DacBoard::analog("Vince DAC 1").unwrap(), DacId::A))
                .unwrap()
                .with_channel(Channel::preamp(
                    "timing",
                    DacBoard::microwave("Vince DAC 1").unwrap(),
                    DacId::A,
                ))
                .unwrap();
            assert_eq!(
                Experiment::new(vec![q1]).unwrap_err(),
                SequencerError::InconsistentBoard {
                    board: "Vince DAC 1".to_string(),
                    first: "analog".to_string(),
                    second: "microwave".to_string()
                }
            );

            // Declared types are matched case-insensitively
            let q2 = Device::new("q2")
                .with_channel(Channel::analog("z", DacBoard::analog("Vince DAC 1").unwrap(), DacId::A))
                .unwrap()
                .with_channel(Channel::preamp(
                    "timing",
                    DacBoard::new("Vince DAC 1", "Analog").unwrap(),
                    DacId::A,
                ))
                .unwrap();
            assert_eq!(Experiment::new(vec![q2]).unwrap().fpga_names(), vec!["Vince DAC 1"]);
        }

        #[test]
        fn duplicate_device() {
            let board = DacBoard::analog("Vince DAC 1").unwrap();
            let q0 = Device::new("q0")
                .with_channel(Channel::analog("z", board.clone(), DacId::A))
                .unwrap();
            let q0_again = Device::new("q0")
                .with_channel(Channel::analog("z", board, DacId::B))
                .unwrap();
            assert_eq!(
                Experiment::new(vec![q0, q0_again]).unwrap_err(),
                SequencerError::DuplicateDevice("q0".to_string())
            );
        }

        #[test]
        fn slot_claims() {
            let board = DacBoard::analog("Vince DAC 1").unwrap();
            let q0 = Device::new("q0")
                .with_channel(Channel::analog("z", board.clone(), DacId::A))
                .unwrap();
            let q1 = Device::new("q1")
                .with_channel(Channel::analog("z", board.clone(), DacId::A))
                .unwrap();
            assert_eq!(
                Experiment::new(vec![q0, q1]).unwrap_err(),
                SequencerError::SlotConflict {
                    board: "Vince DAC 1".to_string(),
                    slot: "A".to_string(),
                    owner: "q0/z".to_string()
                }
            );

            let q2 = Device::new("q2")
                .with_channel(Channel::iq("uw", board))
                .unwrap();
            assert!(matches!(
                Experiment::new(vec![q2]),
                Err(SequencerError::ChannelBoardMismatch { .. })
            ));
        }

        #[test]
        fn preamp_claims() {
            let board = DacBoard::analog("Vince DAC 1").unwrap();
            let q0 = Device::new("q0")
                .with_channel(Channel::preamp("timing", board.clone(), DacId::A))
                .unwrap();
            let q1 = Device::new("q1")
                .with_channel(Channel::preamp("timing", board.clone(), DacId::B))
                .unwrap();
            let exp = Experiment::new(vec![q0.clone(), q1]).unwrap();
            assert_eq!(exp.timing_order(), vec!["Vince DAC 1", "Vince DAC 1"]);

            let q2 = Device::new("q2")
                .with_channel(Channel::preamp("timing", board, DacId::A))
                .unwrap();
            assert_eq!(
                Experiment::new(vec![q0, q2]).unwrap_err(),
                SequencerError::SlotConflict {
                    board: "Vince DAC 1".to_string(),
                    slot: "preamp A".to_string(),
                    owner: "q0/timing".to_string()
                }
            );
        }

        #[test]
        fn invalid_settings() {
            let settings = SequencerSettings {
                sram_min_block_words: 18,
                ..Default::default()
            };
            assert!(matches!(
                Experiment::with_settings(vec![], settings),
                Err(SequencerError::InvalidSettings(_))
            ));
        }

        #[test]
        fn empty_experiment() {
            let mut exp = Experiment::new(vec![]).unwrap();
            assert!(exp.fpga_names().is_empty());
            exp.start_timer(&[]).unwrap();
            exp.add_bias_commands(&HashMap::new(), 1.0).unwrap();
            assert!(exp.board_programs().is_empty());
        }
    }

    mod sram {
        use super::*;

        #[test]
        fn blocks_reach_every_sram_channel() {
            let mut exp = experiment();
            exp.start_sram_block("b1", 18).unwrap();
            exp.start_sram_block("b2", 24).unwrap();
            assert_eq!(exp.block_names(), vec!["b1", "b2"]);
            assert_eq!(exp.block_length("b1").unwrap(), 18);
            assert_eq!(exp.total_sram_length(), 44);

            assert_eq!(exp.sram_data("q0", "z", "b2").unwrap().dim(), (1, 24));
            assert_eq!(exp.sram_data("q1", "uw", "b1").unwrap().dim(), (2, 20));
            assert_eq!(
                exp.sram_data("q0", "timing", "b1"),
                Err(SequencerError::WrongChannelKind {
                    device: "q0".to_string(),
                    channel: "timing".to_string(),
                    expected: "SRAM"
                })
            );
        }

        #[test]
        fn data_is_padded() {
            let mut exp = experiment();
            exp.start_sram_block("b1", 2).unwrap();
            exp.set_sram_data("q1", "uw", "b1", array![[1.0, -1.0], [0.5, 0.25]].view())
                .unwrap();
            let data = exp.sram_data("q1", "uw", "b1").unwrap();
            assert_eq!(data.dim(), (2, 20));
            assert_eq!(data[[0, 1]], -1.0);
            assert_eq!(data[[1, 0]], 0.5);
            assert_eq!(data[[1, 19]], 0.0);

            assert_eq!(
                exp.set_sram_data("q0", "z", "b9", array![[1.0]].view()),
                Err(SequencerError::BlockNotFound("b9".to_string()))
            );
            assert!(matches!(
                exp.set_sram_data("q0", "z", "b1", array![[1.0]].view()),
                Err(SequencerError::DataShapeMismatch { .. })
            ));
        }

        #[test]
        fn duplicate_block_keeps_channel_data() {
            let mut exp = experiment();
            exp.start_sram_block("b1", 2).unwrap();
            exp.set_sram_data("q0", "z", "b1", array![[3.0, 4.0]].view())
                .unwrap();
            assert_eq!(
                exp.start_sram_block("b1", 8),
                Err(SequencerError::DuplicateBlock("b1".to_string()))
            );
            assert_eq!(exp.sram_data("q0", "z", "b1").unwrap()[[0, 1]], 4.0);
        }

        #[test]
        fn unknown_block_touches_no_board() {
            let mut exp = experiment();
            exp.start_sram_block("b1", 18).unwrap();
            assert_eq!(
                exp.call_sram_dual_block("b1", "b2", 1.0),
                Err(SequencerError::BlockNotFound("b2".to_string()))
            );
            assert!(exp.board_programs().iter().all(|p| p.memory.is_empty()));
        }
    }

    mod config {
        use super::*;

        #[test]
        fn timing_order() {
            let mut exp = experiment();
            assert_eq!(exp.timing_order(), vec!["Vince DAC 1", "Vince DAC 3"]);

            exp.set_timing_order(&[("q1", "timing"), ("q0", "timing")])
                .unwrap();
            assert_eq!(exp.timing_order(), vec!["Vince DAC 3", "Vince DAC 1"]);

            assert_eq!(
                exp.set_timing_order(&[("q0", "z")]),
                Err(SequencerError::WrongChannelKind {
                    device: "q0".to_string(),
                    channel: "z".to_string(),
                    expected: "timing"
                })
            );
            assert_eq!(exp.timing_order(), vec!["Vince DAC 3", "Vince DAC 1"]);
        }

        #[test]
        fn setup_state() {
            let mut exp = experiment();
            exp.set_setup_state(
                vec!["q0 ready".to_string()],
                vec![SetupPacket(vec![1, 2, 3])],
            );
            assert_eq!(exp.setup_state(), vec!["q0 ready"]);
            assert_eq!(exp.setup_packets(), vec![SetupPacket(vec![1, 2, 3])]);

            exp.set_setup_state(vec![], vec![]);
            assert!(exp.setup_state().is_empty() && exp.setup_packets().is_empty());
        }

        #[test]
        fn clear_config() {
            let mut exp = experiment();
            exp.set_setup_state(vec!["s".to_string()], vec![SetupPacket(vec![0])]);
            exp.set_timing_order(&[("q1", "timing")]).unwrap();
            exp.set_preamp_config(
                "q0",
                "timing",
                PreampConfig {
                    offset: 1500,
                    polarity: false,
                    high_pass: "DC".to_string(),
                    low_pass: "0".to_string(),
                },
            )
            .unwrap();
            exp.set_microwave_config(
                "q1",
                "uw",
                MicrowaveConfig {
                    frequency_ghz: 6.2,
                    power_dbm: 13.0,
                },
            )
            .unwrap();
            exp.start_sram_block("b1", 4).unwrap();
            exp.add_memory_delay(1.0);

            exp.clear_config();
            assert!(exp.setup_state().is_empty());
            assert_eq!(exp.timing_order(), vec!["Vince DAC 1", "Vince DAC 3"]);
            match exp.channel("q1", "uw").unwrap().kind() {
                ChannelKind::Iq(iq) => assert!(iq.microwave_config().is_none()),
                _ => unreachable!(),
            }
            match exp.channel("q0", "timing").unwrap().kind() {
                ChannelKind::Preamp(preamp) => assert!(preamp.config().is_none()),
                _ => unreachable!(),
            }
            // Memory and SRAM are untouched
            assert_eq!(exp.block_names(), vec!["b1"]);
            assert_eq!(exp.fpga("Vince DAC 1").unwrap().memory_len(), 1);
        }

        #[test]
        fn config_on_wrong_channel_kind() {
            let mut exp = experiment();
            let result = exp.set_microwave_config(
                "q0",
                "z",
                MicrowaveConfig {
                    frequency_ghz: 6.2,
                    power_dbm: 13.0,
                },
            );
            assert!(matches!(
                result,
                Err(SequencerError::WrongChannelKind { expected: "iq", .. })
            ));
            assert_eq!(
                exp.set_microwave_config(
                    "q9",
                    "uw",
                    MicrowaveConfig {
                        frequency_ghz: 6.2,
                        power_dbm: 13.0,
                    }
                ),
                Err(SequencerError::DeviceNotFound("q9".to_string()))
            );
        }
    }

    mod memory {
        use super::*;

        #[test]
        fn memory_delay_on_every_board() {
            let mut exp = experiment();
            exp.add_memory_delay(2.0);
            exp.add_memory_delay(0.0);
            for program in exp.board_programs() {
                assert_eq!(
                    program.memory,
                    vec![
                        MemoryCommand::Delay { cycles: 50 },
                        MemoryCommand::Delay { cycles: 0 }
                    ]
                );
                assert_eq!(program.timer, TimerState::NotStarted);
            }
            assert_eq!(exp.board_programs().len(), 3);
        }

        #[test]
        fn bias_commands_unknown_board() {
            let mut exp = experiment();
            let commands = hashmap! {
                "Vince DAC 1".to_string() => vec![MemoryCommand::Encoded(1)],
                "Vince DAC 9".to_string() => vec![MemoryCommand::Encoded(2)],
            };
            assert_eq!(
                exp.add_bias_commands(&commands, 1.0),
                Err(SequencerError::BoardNotFound("Vince DAC 9".to_string()))
            );
            assert!(exp.board_programs().iter().all(|p| p.memory.is_empty()));
        }

        #[test]
        fn clear_memory_resets_timers() {
            let mut exp = experiment();
            exp.start_sram_block("b1", 18).unwrap();
            exp.start_timer(&[("q0", "timing")]).unwrap();
            exp.call_sram_block("b1").unwrap();
            exp.clear_memory();

            for program in exp.board_programs() {
                assert!(program.memory.is_empty());
                assert!(program.sram_calls.is_empty());
                assert_eq!(program.timer, TimerState::NotStarted);
                assert!(program.streams_bias);
            }
            assert_eq!(exp.block_names(), vec!["b1"]);
        }

        #[test]
        fn timer_request_is_validated_first() {
            let mut exp = experiment();
            exp.start_timer(&[("q0", "timing")]).unwrap();
            let before = exp.board_programs();

            // DAC 3 could start, DAC 1 is already running
            assert_eq!(
                exp.start_timer(&[("q1", "timing"), ("q0", "timing")]),
                Err(SequencerError::InvalidTimerTransition {
                    board: "Vince DAC 1".to_string(),
                    action: TimerAction::Start,
                    state: TimerState::Running
                })
            );
            assert_eq!(exp.board_programs(), before);

            assert!(matches!(
                exp.stop_timer(&[("q1", "timing")]),
                Err(SequencerError::InvalidTimerTransition { .. })
            ));
            assert!(matches!(
                exp.start_timer(&[("q0", "z")]),
                Err(SequencerError::WrongChannelKind { .. })
            ));
            assert!(matches!(
                exp.stop_timer(&[("q0", "readout")]),
                Err(SequencerError::ChannelNotFound { .. })
            ));
            assert_eq!(exp.board_programs(), before);
        }

        #[test]
        fn repeated_channel_starts_board_once() {
            let mut exp = experiment();
            exp.start_timer(&[("q0", "timing"), ("q0", "timing")])
                .unwrap();
            assert_eq!(
                exp.fpga("Vince DAC 1").unwrap().memory(),
                &[MemoryCommand::StartTimer]
            );
        }
    }
}
