//! Implements the named channel groups handed to an experiment.
//!
//! A [`Device`] is the client's unit of organisation, typically one qubit or one readout chain.
//! It owns an ordered collection of [`Channel`]s, each of which lives on some board; channels of
//! one device may be spread across several boards and one board may serve several devices.
//!
//! Devices are assembled before the experiment is built. Once handed to
//! [`Experiment::new`], their channel membership is fixed.
//!
//! ```
//! use qubit_sequencer_backend::*;
//!
//! let board = DacBoard::analog("Vince DAC 1").unwrap();
//! let mut q0 = Device::new("q0");
//! q0.add_channel(Channel::analog("z", board.clone(), DacId::A)).unwrap();
//! q0.add_channel(Channel::preamp("timing", board, DacId::A)).unwrap();
//! assert_eq!(q0.channel_names(), vec!["z", "timing"]);
//! ```
//!
//! [`Experiment::new`]: crate::experiment::Experiment::new
use indexmap::IndexMap;

use crate::channel::*;
use crate::error::{Result, SequencerError};

#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    channels: IndexMap<String, Channel>,
}

impl Device {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            channels: IndexMap::new(),
        }
    }

    /// Adds a channel. Channel names are unique within a device.
    pub fn add_channel(&mut self, channel: Channel) -> Result<()> {
        if self.channels.contains_key(channel.name()) {
            return Err(SequencerError::DuplicateChannel {
                device: self.name.clone(),
                channel: channel.name().to_string(),
            });
        }
        self.channels.insert(channel.name().to_string(), channel);
        Ok(())
    }

    /// Builder-style variant of [`Device::add_channel`].
    pub fn with_channel(mut self, channel: Channel) -> Result<Self> {
        self.add_channel(channel)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> &IndexMap<String, Channel> {
        &self.channels
    }

    pub(crate) fn channels_(&mut self) -> &mut IndexMap<String, Channel> {
        &mut self.channels
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(|name| name.as_str()).collect()
    }

    /// Shortcut to borrow channel instance by name
    pub fn chan(&self, name: &str) -> Result<&Channel> {
        self.channels
            .get(name)
            .ok_or_else(|| SequencerError::ChannelNotFound {
                device: self.name.clone(),
                channel: name.to_string(),
            })
    }

    /// Shortcut to mutably borrow channel instance by name
    pub(crate) fn chan_(&mut self, name: &str) -> Result<&mut Channel> {
        let device = &self.name;
        self.channels
            .get_mut(name)
            .ok_or_else(|| SequencerError::ChannelNotFound {
                device: device.clone(),
                channel: name.to_string(),
            })
    }

    /// Channels with SRAM capability, in insertion order.
    pub fn sram_channels(&self) -> Vec<&Channel> {
        self.channels.values().filter(|chan| chan.is_sram()).collect()
    }

    /// Timing (preamp) channels, in insertion order.
    pub fn timing_channels(&self) -> Vec<&Channel> {
        self.channels.values().filter(|chan| chan.is_timing()).collect()
    }
}
