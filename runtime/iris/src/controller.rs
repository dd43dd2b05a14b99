// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{
        cancel::*, context::*, host::*, mode_switch::*, profile::*, sequencer::*, transport::*,
    },
    glib::Error,
    iris_protocols::{timing::*, LinkState, ModeState, ModeSwitchError},
    std::sync::Arc,
};

/// The controller of co-processor. Every operation holds the panel command lock till completion.
pub struct DisplayController<H: ChipHost> {
    transport: Arc<CommandTransport<H>>,
    mode_switch: ModeSwitch,
    sequencer: TimingSequencer,
}

impl<H: ChipHost> DisplayController<H> {
    pub fn new(host: H, ctx: ChipContext, profile: DisplayProfile) -> Self {
        let DisplayProfile {
            repository,
            timings,
            sequences,
            lightup,
        } = profile;

        Self {
            transport: Arc::new(CommandTransport::new(host, repository, ctx)),
            mode_switch: ModeSwitch::new(lightup),
            sequencer: TimingSequencer::new(timings, sequences),
        }
    }

    pub fn transport(&self) -> &Arc<CommandTransport<H>> {
        &self.transport
    }

    pub fn mode_state(&self) -> ModeState {
        self.mode_switch.state()
    }

    pub fn current_timing_index(&self) -> usize {
        self.sequencer.current_index()
    }

    /// Enter pass-through mode. Rejected when co-processor does not process video for the
    /// current timing.
    pub fn enter_pass_through(&mut self, cancel: &Cancellation) -> Result<PassThroughEntry, Error> {
        if self.sequencer.is_current_bypass_only() {
            let msg = format!(
                "Timing {} is for analog bypass only",
                self.sequencer.current_index()
            );
            Err(Error::new(ModeSwitchError::Rejected, &msg))?;
        }

        let mut bus = self.transport.lock()?;
        self.sequencer
            .resume_pass_through(&mut self.mode_switch, &mut bus, cancel)
    }

    pub fn enter_bypass(&mut self, cancel: &Cancellation) -> Result<(), Error> {
        let mut bus = self.transport.lock()?;
        self.mode_switch.enter_bypass(&mut bus, cancel)
    }

    pub fn switch_timing(
        &mut self,
        requested: &TimingDescriptor,
        cancel: &Cancellation,
    ) -> Result<SwitchCase, Error> {
        let mut bus = self.transport.lock()?;
        self.sequencer
            .on_new_timing(requested, &mut self.mode_switch, &mut bus, cancel)
    }

    pub fn reset(&mut self) -> Result<(), Error> {
        let mut bus = self.transport.lock()?;
        self.mode_switch.reset(&mut bus)
    }

    pub fn read_register(&self, address: u32) -> Result<u32, Error> {
        self.transport.lock()?.read_register(address)
    }

    /// Send DSI command to panel through co-processor or directly according to mode.
    pub fn send_panel_command(&self, data_type: u8, content: &[u8]) -> Result<(), Error> {
        let mut bus = self.transport.lock()?;
        match self.mode_switch.state() {
            ModeState::PassThrough => {
                bus.send_panel_command(data_type, content, LinkState::HighSpeed)
            }
            _ => bus.send_raw_panel_command(data_type, content, LinkState::HighSpeed),
        }
    }

    /// Read data from panel through co-processor or directly according to mode.
    pub fn read_panel(
        &self,
        data_type: u8,
        params: &[u8],
        length: usize,
    ) -> Result<Vec<u8>, Error> {
        let mut bus = self.transport.lock()?;
        match self.mode_switch.state() {
            ModeState::PassThrough => {
                bus.read_panel(data_type, params, length, LinkState::HighSpeed)
            }
            _ => bus.read_raw_panel(data_type, params, length, LinkState::HighSpeed),
        }
    }
}
