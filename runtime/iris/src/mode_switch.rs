// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{cancel::*, context::*, host::*, lightup::*, transport::*},
    glib::Error,
    iris_protocols::{chip::*, repository::*, ModeState, ModeSwitchError},
    std::{thread, time::Duration},
    tracing::{debug, debug_span},
};

/// The result of entering pass-through mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PassThroughEntry {
    /// Already in pass-through mode.
    Unchanged,
    /// Full light-up sequence is sent since co-processor is not preloaded.
    LightedUp,
    /// The configuration before analog bypass is retained.
    Resumed,
}

const STATUS_ERROR_MASK: u32 = 0x00000007;

const BYPASS_CTRL_VALUE_INDEX: usize = 3;
const BYPASS_CTRL_MASK: u32 = 0x0cd00000;
const BYPASS_CTRL_STANDBY: u32 = 0x00800000;
const BYPASS_CTRL_SLEEP: u32 = 0x00400000;

const DEBUG_HOLD_INTERVAL: Duration = Duration::from_millis(3000);

/// The state machine to switch co-processor between pass-through and analog bypass.
#[derive(Debug)]
pub struct ModeSwitch {
    state: ModeState,
    preloaded: bool,
    sys_powered_down: bool,
    applied_power_mode: Option<BypassPowerMode>,
    lightup: ControlSequence,
}

impl ModeSwitch {
    pub fn new(lightup: ControlSequence) -> Self {
        Self {
            state: Default::default(),
            preloaded: false,
            sys_powered_down: false,
            applied_power_mode: None,
            lightup,
        }
    }

    pub fn state(&self) -> ModeState {
        self.state
    }

    pub fn is_preloaded(&self) -> bool {
        self.preloaded
    }

    /// Pulse reset line. Co-processor restarts in analog bypass without configuration.
    pub fn reset<H: ChipHost>(&mut self, bus: &mut PanelCommandGuard<'_, H>) -> Result<(), Error> {
        bus.host().reset_chip()?;
        self.state = ModeState::AnalogBypass;
        self.preloaded = false;
        self.sys_powered_down = false;
        Ok(())
    }

    pub fn enter_pass_through<H: ChipHost>(
        &mut self,
        bus: &mut PanelCommandGuard<'_, H>,
        cancel: &Cancellation,
    ) -> Result<PassThroughEntry, Error> {
        if self.state == ModeState::PassThrough {
            return Ok(PassThroughEntry::Unchanged);
        }

        let _enter = debug_span!("enter-pass-through").entered();
        let ctx = bus.context().clone();

        self.state = ModeState::TransitioningToPassThrough;

        let mut attempt = 0;
        loop {
            match self.exit_bypass(bus, &ctx, cancel) {
                Ok(true) => break,
                Ok(false) => {
                    if attempt >= ctx.retry.outer_retry_count {
                        self.hold_for_debug(&ctx, cancel);
                        self.state = ModeState::AnalogBypass;
                        let msg = format!("Not ready for pass-through after {} retries", attempt);
                        Err(Error::new(ModeSwitchError::TransitionFailed, &msg))?;
                    }
                    attempt += 1;
                    debug!(attempt, "retry after reset");
                    if let Err(e) = self.reset(bus) {
                        self.state = ModeState::AnalogBypass;
                        return Err(e);
                    }
                    self.state = ModeState::TransitioningToPassThrough;
                }
                Err(e) => {
                    self.state = ModeState::AnalogBypass;
                    return Err(e);
                }
            }
        }

        self.state = ModeState::PassThrough;
        debug!(attempt, preloaded = self.preloaded, "pass-through");

        if self.preloaded {
            Ok(PassThroughEntry::Resumed)
        } else {
            if let Err(e) = send_sequence(bus, &self.lightup) {
                // Partially configured co-processor is not left in pass-through.
                debug!("light-up failed: {}", e);
                if let Err(reset_error) = self.reset(bus) {
                    debug!("reset failed: {}", reset_error);
                }
                self.state = ModeState::AnalogBypass;
                return Err(e);
            }
            self.preloaded = true;
            Ok(PassThroughEntry::LightedUp)
        }
    }

    fn exit_bypass<H: ChipHost>(
        &mut self,
        bus: &mut PanelCommandGuard<'_, H>,
        ctx: &ChipContext,
        cancel: &Cancellation,
    ) -> Result<bool, Error> {
        cancel.check()?;

        if self.sys_powered_down {
            bus.host().send_one_wire(OneWireCommand::PowerUpSys)?;
            thread::sleep(ctx.power_up_settle);
            if ctx.bypass_power_mode == BypassPowerMode::Sleep {
                thread::sleep(ctx.sleep_settle);
            }
            self.sys_powered_down = false;
            debug!("power up sys");
        }

        let opts = ctx.variant.mode_switch_options();
        if bus
            .repository()
            .lookup(HardwareBlock::Sys, opts.dma_ctrl)
            .is_some()
        {
            bus.send_option(HardwareBlock::Sys, opts.dma_ctrl)?;
        }

        match ctx.mode_switch_path() {
            ModeSwitchPath::OneWire => bus.host().send_one_wire(OneWireCommand::ExitBypass)?,
            ModeSwitchPath::InBand => bus.send_option(HardwareBlock::Sys, opts.exit_bypass)?,
        }

        poll_ready(bus, ctx, false, cancel)
    }

    pub fn enter_bypass<H: ChipHost>(
        &mut self,
        bus: &mut PanelCommandGuard<'_, H>,
        cancel: &Cancellation,
    ) -> Result<(), Error> {
        if self.state == ModeState::AnalogBypass {
            return Ok(());
        }

        let _enter = debug_span!("enter-bypass").entered();
        let ctx = bus.context().clone();

        let regs = ctx.variant.register_map();
        let status = bus.host().i2c_read(regs.status)?;
        if status & STATUS_ERROR_MASK > 0 {
            let msg = format!("Data path of co-processor is not ready: 0x{:08x}", status);
            Err(Error::new(ModeSwitchError::Rejected, &msg))?;
        }

        self.apply_power_mode(bus, &ctx)?;

        self.state = ModeState::TransitioningToBypass;

        let opts = ctx.variant.mode_switch_options();
        let sent = match ctx.mode_switch_path() {
            ModeSwitchPath::OneWire => bus.host().send_one_wire(OneWireCommand::EnterBypass),
            ModeSwitchPath::InBand => bus.send_option(HardwareBlock::Sys, opts.enter_bypass),
        };
        if let Err(e) = sent {
            self.state = ModeState::PassThrough;
            return Err(e);
        }

        let mut attempt = 0;
        loop {
            match poll_ready(bus, &ctx, true, cancel) {
                Ok(true) => break,
                Ok(false) => {
                    if attempt >= ctx.retry.outer_retry_count {
                        self.hold_for_debug(&ctx, cancel);
                        self.state = ModeState::PassThrough;
                        let msg = format!("Not ready for analog bypass after {} retries", attempt);
                        Err(Error::new(ModeSwitchError::TransitionFailed, &msg))?;
                    }
                    attempt += 1;
                    debug!(attempt, "retry after reset");
                    if let Err(e) = bus.host().reset_chip() {
                        self.state = ModeState::PassThrough;
                        return Err(e);
                    }
                    self.preloaded = false;
                }
                Err(e) => {
                    self.state = ModeState::PassThrough;
                    return Err(e);
                }
            }
        }

        self.state = ModeState::AnalogBypass;
        debug!(attempt, "analog bypass");

        if ctx.bypass_power_mode == BypassPowerMode::Sleep {
            bus.host().send_one_wire(OneWireCommand::PowerDownSys)?;
            thread::sleep(ctx.power_up_settle);
            self.sys_powered_down = true;
            self.preloaded = false;
            debug!("power down sys");
        }

        Ok(())
    }

    fn apply_power_mode<H: ChipHost>(
        &mut self,
        bus: &mut PanelCommandGuard<'_, H>,
        ctx: &ChipContext,
    ) -> Result<(), Error> {
        if self.applied_power_mode == Some(ctx.bypass_power_mode) {
            return Ok(());
        }

        let opt_id = ctx.variant.mode_switch_options().bypass_ctrl;
        let value = match ctx.bypass_power_mode {
            BypassPowerMode::Standby => BYPASS_CTRL_STANDBY,
            BypassPowerMode::Sleep => BYPASS_CTRL_SLEEP,
        };
        let result = bus.repository_mut().sync_payload_word(
            HardwareBlock::Sys,
            opt_id,
            BYPASS_CTRL_VALUE_INDEX,
            value & BYPASS_CTRL_MASK,
        );
        match result {
            Ok(count) => debug!(opt_id, count, "control of bypass"),
            Err(e) => {
                debug!(opt_id, "no control of bypass: {}", e);
                return Ok(());
            }
        }
        bus.send_option(HardwareBlock::Sys, opt_id)?;
        self.applied_power_mode = Some(ctx.bypass_power_mode);

        Ok(())
    }

    fn hold_for_debug(&self, ctx: &ChipContext, cancel: &Cancellation) {
        let mut count = 0;
        while ctx.debug_hold && !cancel.is_cancelled() {
            debug!(count, "mode switch is held");
            thread::sleep(DEBUG_HOLD_INTERVAL);
            count += 1;
        }
    }
}

fn poll_ready<H: ChipHost>(
    bus: &mut PanelCommandGuard<'_, H>,
    ctx: &ChipContext,
    asserted: bool,
    cancel: &Cancellation,
) -> Result<bool, Error> {
    let mut count = 0;
    while count < ctx.retry.ready_poll_count {
        cancel.check()?;
        if bus
            .host()
            .wait_ready_signal(asserted, ctx.retry.ready_poll_interval)
        {
            debug!(count, asserted, "ready");
            return Ok(true);
        }
        count += 1;
    }
    Ok(false)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::simulator::*,
        glib::FileError,
        iris_protocols::{ocp::*, ChipCapabilities, LinkState},
    };

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            ready_poll_interval: Duration::from_micros(100),
            ..Default::default()
        }
    }

    fn option(addr: u32, val: u32) -> Vec<CommandDescriptor> {
        let frames = build_single_writes(&[(addr, val)], 256).unwrap();
        build_commands(&frames, 256, Duration::default()).unwrap()
    }

    fn lightup() -> (CommandRepository, ControlSequence) {
        let mut repo = CommandRepository::default();
        repo.register_sequence(HardwareBlock::Dtg, 0x00, LinkState::HighSpeed, option(0x20, 1))
            .unwrap();
        let seq = ControlSequence(vec![ControlEntry {
            block: HardwareBlock::Dtg,
            opt_id: 0x00,
            chain: false,
        }]);
        (repo, seq)
    }

    #[test]
    fn first_entry_lights_up() {
        let sim = SimulatedChip::default();
        let log = sim.log();
        let (repo, seq) = lightup();
        let ctx = ChipContext::default().with_retry(fast_retry());
        let transport = CommandTransport::new(sim.clone(), repo, ctx);
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        let mut switch = ModeSwitch::new(seq);
        assert_eq!(switch.state(), ModeState::AnalogBypass);
        assert_eq!(
            switch.enter_pass_through(&mut guard, &cancel).unwrap(),
            PassThroughEntry::LightedUp
        );
        assert_eq!(switch.state(), ModeState::PassThrough);
        assert!(switch.is_preloaded());
        assert!(!sim.is_bypass());
        assert_eq!(
            switch.enter_pass_through(&mut guard, &cancel).unwrap(),
            PassThroughEntry::Unchanged
        );

        switch.enter_bypass(&mut guard, &cancel).unwrap();
        assert_eq!(switch.state(), ModeState::AnalogBypass);
        assert!(sim.is_bypass());

        assert_eq!(
            switch.enter_pass_through(&mut guard, &cancel).unwrap(),
            PassThroughEntry::Resumed
        );

        let log = log.lock().unwrap();
        assert_eq!(
            log.one_wire_commands(),
            vec![
                OneWireCommand::ExitBypass,
                OneWireCommand::EnterBypass,
                OneWireCommand::ExitBypass
            ]
        );
        assert_eq!(log.writes(), vec![(0x20, 1)]);
    }

    #[test]
    fn stuck_ready_line() {
        let sim = SimulatedChip::default();
        sim.stick_ready_line(Some(true));
        let log = sim.log();
        let (repo, seq) = lightup();
        let ctx = ChipContext::default().with_retry(fast_retry());
        let transport = CommandTransport::new(sim, repo, ctx);
        let mut guard = transport.lock().unwrap();

        let mut switch = ModeSwitch::new(seq);
        let err = switch
            .enter_pass_through(&mut guard, &Cancellation::default())
            .unwrap_err();
        assert_eq!(err.kind::<ModeSwitchError>(), Some(ModeSwitchError::TransitionFailed));
        assert_eq!(switch.state(), ModeState::AnalogBypass);
        assert!(!switch.is_preloaded());

        let log = log.lock().unwrap();
        assert_eq!(log.resets, 5);
        let polls = log
            .lines
            .iter()
            .filter(|ev| matches!(ev, LineEvent::ReadyPoll { .. }))
            .count();
        assert_eq!(polls, 6 * 50);
        assert!(log.writes().is_empty());
    }

    #[test]
    fn recovery_by_reset() {
        let sim = SimulatedChip::default();
        sim.stick_ready_line_for(true, 50);
        let log = sim.log();
        let (repo, seq) = lightup();
        let ctx = ChipContext::default().with_retry(fast_retry());
        let transport = CommandTransport::new(sim, repo, ctx);
        let mut guard = transport.lock().unwrap();

        let mut switch = ModeSwitch::new(seq);
        switch
            .enter_pass_through(&mut guard, &Cancellation::default())
            .unwrap();
        assert_eq!(switch.state(), ModeState::PassThrough);
        assert_eq!(log.lock().unwrap().resets, 1);
    }

    #[test]
    fn cancelled_transition() {
        let sim = SimulatedChip::default();
        sim.stick_ready_line(Some(true));
        let (repo, seq) = lightup();
        let transport = CommandTransport::new(sim, repo, ChipContext::default());
        let mut guard = transport.lock().unwrap();

        let cancel = Cancellation::default();
        cancel.cancel();
        let mut switch = ModeSwitch::new(seq);
        let err = switch.enter_pass_through(&mut guard, &cancel).unwrap_err();
        assert_eq!(err.kind::<ModeSwitchError>(), Some(ModeSwitchError::Cancelled));
        assert_eq!(switch.state(), ModeState::AnalogBypass);
    }

    #[test]
    fn rejected_by_precheck() {
        let sim = SimulatedChip::default();
        let (repo, seq) = lightup();
        let ctx = ChipContext::default().with_retry(fast_retry());
        let regs = ctx.variant.register_map();
        let transport = CommandTransport::new(sim.clone(), repo, ctx);
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        let mut switch = ModeSwitch::new(seq);
        switch.enter_pass_through(&mut guard, &cancel).unwrap();

        sim.script_register(regs.status, &[0x00000004]);
        let err = switch.enter_bypass(&mut guard, &cancel).unwrap_err();
        assert_eq!(err.kind::<ModeSwitchError>(), Some(ModeSwitchError::Rejected));
        assert_eq!(switch.state(), ModeState::PassThrough);
    }

    #[test]
    fn sleep_bypass() {
        let sim = SimulatedChip::default();
        let log = sim.log();
        let (repo, seq) = lightup();
        let ctx = ChipContext::default()
            .with_retry(fast_retry())
            .with_bypass_power_mode(BypassPowerMode::Sleep);
        let transport = CommandTransport::new(sim, repo, ctx);
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        let mut switch = ModeSwitch::new(seq);
        switch.enter_pass_through(&mut guard, &cancel).unwrap();
        switch.enter_bypass(&mut guard, &cancel).unwrap();
        assert!(!switch.is_preloaded());

        assert_eq!(
            switch.enter_pass_through(&mut guard, &cancel).unwrap(),
            PassThroughEntry::LightedUp
        );

        let log = log.lock().unwrap();
        assert_eq!(
            log.one_wire_commands(),
            vec![
                OneWireCommand::ExitBypass,
                OneWireCommand::EnterBypass,
                OneWireCommand::PowerDownSys,
                OneWireCommand::PowerUpSys,
                OneWireCommand::ExitBypass,
            ]
        );
    }

    #[test]
    fn lightup_failure_stays_in_bypass() {
        let sim = SimulatedChip::default();
        let log = sim.log();
        let (repo, seq) = lightup();
        let ctx = ChipContext::default().with_retry(fast_retry());
        let transport = CommandTransport::new(sim.clone(), repo, ctx);
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        let mut switch = ModeSwitch::new(seq);
        sim.fail_transfer(true);
        let err = switch.enter_pass_through(&mut guard, &cancel).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Io));
        assert_eq!(switch.state(), ModeState::AnalogBypass);
        assert!(!switch.is_preloaded());
        assert!(sim.is_bypass());
        assert_eq!(log.lock().unwrap().resets, 1);

        sim.fail_transfer(false);
        assert_eq!(
            switch.enter_pass_through(&mut guard, &cancel).unwrap(),
            PassThroughEntry::LightedUp
        );
        assert_eq!(switch.state(), ModeState::PassThrough);
    }

    #[test]
    fn bypass_control_by_power_mode() {
        let sim = SimulatedChip::default();
        let log = sim.log();
        let (mut repo, seq) = lightup();
        let ctx = ChipContext::default()
            .with_retry(fast_retry())
            .with_bypass_power_mode(BypassPowerMode::Sleep);
        let opts = ctx.variant.mode_switch_options();
        let frames = vec![build_bitmask_write(0x30, 0, BYPASS_CTRL_MASK)];
        let cmds = build_commands(&frames, 256, Duration::default()).unwrap();
        repo.register_sequence(HardwareBlock::Sys, opts.bypass_ctrl, LinkState::HighSpeed, cmds)
            .unwrap();
        let transport = CommandTransport::new(sim, repo, ctx);
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        let mut switch = ModeSwitch::new(seq);
        switch.enter_pass_through(&mut guard, &cancel).unwrap();
        switch.enter_bypass(&mut guard, &cancel).unwrap();
        assert!(log
            .lock()
            .unwrap()
            .writes()
            .contains(&(0x30, BYPASS_CTRL_SLEEP)));
    }

    #[test]
    fn bypass_control_without_value() {
        let sim = SimulatedChip::default();
        let log = sim.log();
        let (mut repo, seq) = lightup();
        let ctx = ChipContext::default().with_retry(fast_retry());
        let opts = ctx.variant.mode_switch_options();
        // The single write has no word for the value of mask.
        repo.register_sequence(
            HardwareBlock::Sys,
            opts.bypass_ctrl,
            LinkState::HighSpeed,
            option(0x30, 7),
        )
        .unwrap();
        let transport = CommandTransport::new(sim, repo, ctx);
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        let mut switch = ModeSwitch::new(seq);
        switch.enter_pass_through(&mut guard, &cancel).unwrap();
        switch.enter_bypass(&mut guard, &cancel).unwrap();
        assert_eq!(switch.state(), ModeState::AnalogBypass);
        assert!(log.lock().unwrap().writes().iter().all(|&(addr, _)| addr != 0x30));
        assert_eq!(
            guard
                .repository()
                .payload_word(HardwareBlock::Sys, opts.bypass_ctrl, 2),
            Some(7)
        );
    }

    #[test]
    fn in_band_path() {
        let sim = SimulatedChip::default();
        let (mut repo, seq) = lightup();
        let ctx = ChipContext::default()
            .with_retry(fast_retry())
            .with_capabilities(ChipCapabilities::default().with_inband_mode_switch(true));
        let opts = ctx.variant.mode_switch_options();
        repo.register_sequence(
            HardwareBlock::Sys,
            opts.exit_bypass,
            LinkState::HighSpeed,
            option(SIMULATED_BYPASS_REGISTER, 0),
        )
        .unwrap();
        repo.register_sequence(
            HardwareBlock::Sys,
            opts.enter_bypass,
            LinkState::HighSpeed,
            option(SIMULATED_BYPASS_REGISTER, 1),
        )
        .unwrap();

        let log = sim.log();
        let transport = CommandTransport::new(sim.clone(), repo, ctx);
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        let mut switch = ModeSwitch::new(seq);
        switch.enter_pass_through(&mut guard, &cancel).unwrap();
        assert!(!sim.is_bypass());
        switch.enter_bypass(&mut guard, &cancel).unwrap();
        assert!(sim.is_bypass());
        assert!(log.lock().unwrap().one_wire_commands().is_empty());
    }
}
