// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    glib::Error,
    iris_protocols::{repository::CommandDescriptor, LinkState},
    std::time::Duration,
};

/// The command signaled by pulses in one-wire line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OneWireCommand {
    PowerUpSys,
    EnterBypass,
    ExitBypass,
    PowerDownSys,
    ResetSys,
    ForceEnterBypass,
    ForceExitBypass,
    PowerUpMipi,
    PowerDownMipi,
}

impl OneWireCommand {
    /// The number of pulses.
    pub fn pulses(&self) -> u32 {
        match self {
            OneWireCommand::PowerUpSys => 1,
            OneWireCommand::EnterBypass => 2,
            OneWireCommand::ExitBypass => 3,
            OneWireCommand::PowerDownSys => 4,
            OneWireCommand::ResetSys => 5,
            OneWireCommand::ForceEnterBypass => 6,
            OneWireCommand::ForceExitBypass => 7,
            OneWireCommand::PowerUpMipi => 8,
            OneWireCommand::PowerDownMipi => 9,
        }
    }
}

/// The operations which the host provides to access co-processor. Any operation is called with
/// the panel command lock held.
pub trait ChipHost: Send {
    /// Transfer the batch of commands via DSI.
    fn transfer(
        &mut self,
        commands: &[CommandDescriptor],
        link_state: LinkState,
        channel: u8,
    ) -> Result<(), Error>;

    /// Transfer the command and receive the response into the frame. Return the length of
    /// received data.
    fn transfer_read(
        &mut self,
        command: &CommandDescriptor,
        link_state: LinkState,
        channel: u8,
        frame: &mut [u8],
    ) -> Result<usize, Error>;

    fn i2c_read(&mut self, addr: u32) -> Result<u32, Error>;

    fn i2c_write(&mut self, addr: u32, val: u32) -> Result<(), Error>;

    fn send_one_wire(&mut self, cmd: OneWireCommand) -> Result<(), Error>;

    /// Wait for the ready signal to reach the level. Return false at timeout.
    fn wait_ready_signal(&mut self, asserted: bool, timeout: Duration) -> bool;

    /// Pulse the reset line of co-processor.
    fn reset_chip(&mut self) -> Result<(), Error>;
}
