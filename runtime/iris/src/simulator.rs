// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::host::*,
    glib::{Error, FileError},
    iris_protocols::{dsi::*, ocp::*, repository::CommandDescriptor, LinkState},
    std::{
        collections::{HashMap, VecDeque},
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    },
    tracing::debug,
};

/// The register which switches mode of simulated co-processor by in-band command. Zero to enter
/// pass-through, non-zero to enter analog bypass.
pub const SIMULATED_BYPASS_REGISTER: u32 = 0xf0000100;

/// One call of transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub commands: Vec<CommandDescriptor>,
    pub link_state: LinkState,
    pub channel: u8,
}

/// The operation on the ready line and the one-wire line, in order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LineEvent {
    OneWire(OneWireCommand),
    ReadyPoll { asserted: bool, result: bool },
    Reset,
}

/// The record of operations over simulated co-processor.
#[derive(Debug, Default)]
pub struct SimulationLog {
    pub transfers: Vec<TransferRecord>,
    pub lines: Vec<LineEvent>,
    pub register_reads: Vec<u32>,
    /// The data type of read requests, in order.
    pub read_requests: Vec<u8>,
    pub i2c_reads: usize,
    pub i2c_writes: Vec<(u32, u32)>,
    pub resets: usize,
}

impl SimulationLog {
    /// The register writes decoded from transfers. The commands which are not OCP frame are
    /// ignored.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.transfers
            .iter()
            .flat_map(|record| record.commands.iter())
            .filter_map(|cmd| OcpFrame::parse(&cmd.payload).ok())
            .flat_map(|frame| frame.register_writes())
            .collect()
    }

    pub fn reads_of(&self, address: u32) -> usize {
        self.register_reads
            .iter()
            .filter(|&&addr| addr == address)
            .count()
    }

    pub fn one_wire_commands(&self) -> Vec<OneWireCommand> {
        self.lines
            .iter()
            .filter_map(|ev| match ev {
                LineEvent::OneWire(cmd) => Some(*cmd),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
struct ChipModel {
    bypass: bool,
    sys_powered: bool,
    stuck_ready: Option<bool>,
    stuck_polls: Option<usize>,
    settle_polls: usize,
    remaining_polls: usize,
    registers: HashMap<u32, VecDeque<u32>>,
    panel_responses: VecDeque<Vec<u8>>,
    pending_read: Option<u32>,
    failing_transfer: bool,
}

impl Default for ChipModel {
    fn default() -> Self {
        Self {
            bypass: true,
            sys_powered: true,
            stuck_ready: None,
            stuck_polls: None,
            settle_polls: 0,
            remaining_polls: 0,
            registers: Default::default(),
            panel_responses: Default::default(),
            pending_read: None,
            failing_transfer: false,
        }
    }
}

impl ChipModel {
    fn switch(&mut self, bypass: bool) {
        if self.sys_powered && self.bypass != bypass {
            self.bypass = bypass;
            self.remaining_polls = self.settle_polls;
        }
    }

    fn ready_level(&mut self) -> bool {
        if let Some(level) = self.stuck_ready {
            match self.stuck_polls {
                Some(count) if count <= 1 => {
                    self.stuck_ready = None;
                    self.stuck_polls = None;
                }
                Some(count) => self.stuck_polls = Some(count - 1),
                None => (),
            }
            level
        } else if self.remaining_polls > 0 {
            self.remaining_polls -= 1;
            !self.bypass
        } else {
            self.bypass
        }
    }

    fn read(&mut self, address: u32) -> u32 {
        self.registers
            .get_mut(&address)
            .and_then(|values| values.pop_front())
            .unwrap_or(0)
    }
}

/// The co-processor simulated in process. The ready line is asserted in analog bypass.
#[derive(Debug, Default, Clone)]
pub struct SimulatedChip {
    model: Arc<Mutex<ChipModel>>,
    log: Arc<Mutex<SimulationLog>>,
}

impl SimulatedChip {
    pub fn log(&self) -> Arc<Mutex<SimulationLog>> {
        self.log.clone()
    }

    /// Queue values returned by reads of the register, then zero.
    pub fn script_register(&self, address: u32, values: &[u32]) {
        if let Ok(model) = &mut self.model.lock() {
            model
                .registers
                .entry(address)
                .or_default()
                .extend(values.iter().copied());
        }
    }

    /// Queue the data returned by panel to read request which is not OCP frame.
    pub fn script_panel_response(&self, data: &[u8]) {
        if let Ok(model) = &mut self.model.lock() {
            model.panel_responses.push_back(data.to_vec());
        }
    }

    /// Fix the level of ready line regardless of mode.
    pub fn stick_ready_line(&self, level: Option<bool>) {
        if let Ok(model) = &mut self.model.lock() {
            model.stuck_ready = level;
            model.stuck_polls = None;
        }
    }

    /// Fix the level of ready line for the number of polls.
    pub fn stick_ready_line_for(&self, level: bool, polls: usize) {
        if let Ok(model) = &mut self.model.lock() {
            model.stuck_ready = Some(level);
            model.stuck_polls = Some(polls);
        }
    }

    /// The number of polls for the ready line to follow the switch of mode.
    pub fn set_settle_polls(&self, count: usize) {
        if let Ok(model) = &mut self.model.lock() {
            model.settle_polls = count;
        }
    }

    /// Fail any transfer to co-processor.
    pub fn fail_transfer(&self, enable: bool) {
        if let Ok(model) = &mut self.model.lock() {
            model.failing_transfer = enable;
        }
    }

    pub fn is_bypass(&self) -> bool {
        self.model.lock().map(|model| model.bypass).unwrap_or(true)
    }

    fn with_model<T, F>(&self, cb: F) -> T
    where
        F: FnOnce(&mut ChipModel) -> T,
        T: Default,
    {
        self.model
            .lock()
            .map(|mut model| cb(&mut model))
            .unwrap_or_default()
    }

    fn with_log<F>(&self, cb: F)
    where
        F: FnOnce(&mut SimulationLog),
    {
        if let Ok(log) = &mut self.log.lock() {
            cb(log);
        }
    }
}

impl ChipHost for SimulatedChip {
    fn transfer(
        &mut self,
        commands: &[CommandDescriptor],
        link_state: LinkState,
        channel: u8,
    ) -> Result<(), Error> {
        if self.with_model(|model| model.failing_transfer) {
            Err(Error::new(FileError::Io, "Transfer is failed"))?;
        }

        commands
            .iter()
            .filter_map(|cmd| OcpFrame::parse(&cmd.payload).ok())
            .for_each(|frame| {
                if frame.operation == OcpOperation::SingleRead {
                    self.with_model(|model| model.pending_read = Some(frame.address));
                }
                frame
                    .register_writes()
                    .iter()
                    .filter(|&&(addr, _)| addr == SIMULATED_BYPASS_REGISTER)
                    .for_each(|&(_, val)| self.with_model(|model| model.switch(val > 0)));
            });

        self.with_log(|log| {
            log.transfers.push(TransferRecord {
                commands: commands.to_vec(),
                link_state,
                channel,
            })
        });

        Ok(())
    }

    fn transfer_read(
        &mut self,
        command: &CommandDescriptor,
        _: LinkState,
        _: u8,
        frame: &mut [u8],
    ) -> Result<usize, Error> {
        if self.with_model(|model| model.failing_transfer) {
            Err(Error::new(FileError::Io, "Transfer is failed"))?;
        }

        self.with_log(|log| log.read_requests.push(command.data_type));

        let pending = if command.data_type == GENERIC_READ_REQUEST_1_PARAM {
            self.with_model(|model| model.pending_read.take())
        } else {
            None
        };

        let raw = match pending {
            Some(address) => {
                let value = self.with_model(|model| model.read(address));
                self.with_log(|log| log.register_reads.push(address));
                value.to_le_bytes().to_vec()
            }
            None => self.with_model(|model| model.panel_responses.pop_front().unwrap_or_default()),
        };

        let len = std::cmp::min(raw.len(), frame.len());
        frame[..len].copy_from_slice(&raw[..len]);
        Ok(len)
    }

    fn i2c_read(&mut self, addr: u32) -> Result<u32, Error> {
        let value = self.with_model(|model| model.read(addr));
        self.with_log(|log| {
            log.i2c_reads += 1;
            log.register_reads.push(addr);
        });
        Ok(value)
    }

    fn i2c_write(&mut self, addr: u32, val: u32) -> Result<(), Error> {
        if addr == SIMULATED_BYPASS_REGISTER {
            self.with_model(|model| model.switch(val > 0));
        }
        self.with_log(|log| log.i2c_writes.push((addr, val)));
        Ok(())
    }

    fn send_one_wire(&mut self, cmd: OneWireCommand) -> Result<(), Error> {
        debug!(?cmd, pulses = cmd.pulses(), "one-wire");
        self.with_model(|model| match cmd {
            OneWireCommand::EnterBypass | OneWireCommand::ForceEnterBypass => model.switch(true),
            OneWireCommand::ExitBypass | OneWireCommand::ForceExitBypass => model.switch(false),
            OneWireCommand::PowerDownSys => model.sys_powered = false,
            OneWireCommand::PowerUpSys => model.sys_powered = true,
            OneWireCommand::ResetSys => {
                model.sys_powered = true;
                model.bypass = true;
            }
            OneWireCommand::PowerUpMipi | OneWireCommand::PowerDownMipi => (),
        });
        self.with_log(|log| log.lines.push(LineEvent::OneWire(cmd)));
        Ok(())
    }

    fn wait_ready_signal(&mut self, asserted: bool, timeout: Duration) -> bool {
        let result = self.with_model(|model| model.ready_level() == asserted);
        if !result {
            thread::sleep(timeout);
        }
        self.with_log(|log| log.lines.push(LineEvent::ReadyPoll { asserted, result }));
        result
    }

    fn reset_chip(&mut self) -> Result<(), Error> {
        self.with_model(|model| {
            model.bypass = true;
            model.sys_powered = true;
            model.remaining_polls = 0;
        });
        self.with_log(|log| {
            log.resets += 1;
            log.lines.push(LineEvent::Reset);
        });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ready_line_follows_one_wire() {
        let mut sim = SimulatedChip::default();
        let timeout = Duration::from_millis(0);
        assert!(sim.wait_ready_signal(true, timeout));

        sim.set_settle_polls(2);
        sim.send_one_wire(OneWireCommand::ExitBypass).unwrap();
        assert!(!sim.wait_ready_signal(false, timeout));
        assert!(!sim.wait_ready_signal(false, timeout));
        assert!(sim.wait_ready_signal(false, timeout));
        assert!(!sim.is_bypass());

        sim.send_one_wire(OneWireCommand::PowerDownSys).unwrap();
        sim.send_one_wire(OneWireCommand::EnterBypass).unwrap();
        assert!(!sim.is_bypass());
        sim.reset_chip().unwrap();
        assert!(sim.is_bypass());

        let log = sim.log();
        let log = log.lock().unwrap();
        assert_eq!(log.resets, 1);
        assert_eq!(
            log.one_wire_commands(),
            vec![
                OneWireCommand::ExitBypass,
                OneWireCommand::PowerDownSys,
                OneWireCommand::EnterBypass
            ]
        );
    }

    #[test]
    fn in_band_switch() {
        let mut sim = SimulatedChip::default();
        let frames = build_single_writes(&[(SIMULATED_BYPASS_REGISTER, 0)], 256).unwrap();
        let cmds = build_commands(&frames, 256, Duration::default()).unwrap();
        sim.transfer(&cmds, LinkState::HighSpeed, 0).unwrap();
        assert!(!sim.is_bypass());
        assert_eq!(sim.log().lock().unwrap().writes(), vec![(SIMULATED_BYPASS_REGISTER, 0)]);
    }

    #[test]
    fn scripted_read() {
        let mut sim = SimulatedChip::default();
        sim.script_register(0x100, &[1, 2]);
        let cmd = build_single_read(0x100).to_command(true, Duration::default());
        sim.transfer(&[cmd], LinkState::HighSpeed, 0).unwrap();
        let request = CommandDescriptor {
            data_type: GENERIC_READ_REQUEST_1_PARAM,
            payload: vec![0x00],
            last_in_batch: true,
            post_wait: Duration::default(),
        };
        let mut frame = [0u8; 4];
        assert_eq!(sim.transfer_read(&request, LinkState::HighSpeed, 0, &mut frame).unwrap(), 4);
        assert_eq!(u32::from_le_bytes(frame), 1);
        assert_eq!(sim.i2c_read(0x100).unwrap(), 2);
        assert_eq!(sim.i2c_read(0x100).unwrap(), 0);
        assert_eq!(sim.log().lock().unwrap().reads_of(0x100), 3);

        // No address is pending, thus the request goes to panel.
        sim.script_panel_response(&[0x9c]);
        assert_eq!(sim.transfer_read(&request, LinkState::HighSpeed, 0, &mut frame).unwrap(), 1);
        assert_eq!(frame[0], 0x9c);
    }

    #[test]
    fn failing_transfer() {
        let mut sim = SimulatedChip::default();
        sim.fail_transfer(true);
        let frames = build_single_writes(&[(0x200, 1)], 256).unwrap();
        let cmds = build_commands(&frames, 256, Duration::default()).unwrap();
        let err = sim.transfer(&cmds, LinkState::HighSpeed, 0).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Io));
        assert!(sim.log().lock().unwrap().transfers.is_empty());
    }
}
