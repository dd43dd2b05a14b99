// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{cancel::*, host::*, lightup::*, mode_switch::*, transport::*},
    glib::Error,
    iris_protocols::{chip::*, repository::*, timing::*, ModeState},
    std::collections::BTreeMap,
    tracing::{debug, debug_span},
};

/// The sequencer of timing switch. It owns the indices of current timing and the last timing in
/// pass-through mode.
#[derive(Debug)]
pub struct TimingSequencer {
    table: TimingTable,
    sequences: BTreeMap<CmdListId, SwitchSequences>,
    current: usize,
    last_pass_through: usize,
}

impl TimingSequencer {
    pub fn new(table: TimingTable, sequences: BTreeMap<CmdListId, SwitchSequences>) -> Self {
        Self {
            table,
            sequences,
            current: 0,
            last_pass_through: 0,
        }
    }

    pub fn table(&self) -> &TimingTable {
        &self.table
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn last_pass_through_index(&self) -> usize {
        self.last_pass_through
    }

    pub fn current_cmd_list(&self) -> CmdListId {
        self.table
            .get(self.current)
            .map(|entry| entry.cmd_list)
            .unwrap_or(CmdListId::NONE)
    }

    pub fn is_current_bypass_only(&self) -> bool {
        self.table.is_bypass_only(self.current)
    }

    /// Find the timing in table and classify the switch against the mode.
    pub fn classify(
        &self,
        requested: &TimingDescriptor,
        mode: ModeState,
    ) -> Result<(usize, SwitchCase), Error> {
        let index = self.table.lookup(requested)?;
        let case = classify_switch(
            mode,
            self.table.is_bypass_only(self.current),
            self.table.is_bypass_only(index),
        );
        Ok((index, case))
    }

    /// Switch to the requested timing. The state is kept when the timing is not in table.
    pub fn on_new_timing<H: ChipHost>(
        &mut self,
        requested: &TimingDescriptor,
        mode_switch: &mut ModeSwitch,
        bus: &mut PanelCommandGuard<'_, H>,
        cancel: &Cancellation,
    ) -> Result<SwitchCase, Error> {
        let (index, case) = self.classify(requested, mode_switch.state())?;

        let _enter = debug_span!("timing").entered();
        debug!(
            index,
            current = self.current,
            last_pass_through = self.last_pass_through,
            ?case
        );

        bus.set_refresh_rate(requested.refresh_rate);
        self.current = index;

        match case {
            SwitchCase::PassThroughToPassThrough => {
                self.switch_pass_through(bus, index)?;
            }
            SwitchCase::PassThroughToBypass => {
                mode_switch.enter_bypass(bus, cancel)?;
            }
            SwitchCase::BypassToPassThrough => {
                self.resume_pass_through(mode_switch, bus, cancel)?;
            }
            SwitchCase::BypassToBypass => (),
        }

        Ok(case)
    }

    /// Enter pass-through mode for the current timing, then send light-up sequence or replay
    /// the switch from the last timing in pass-through mode.
    pub fn resume_pass_through<H: ChipHost>(
        &mut self,
        mode_switch: &mut ModeSwitch,
        bus: &mut PanelCommandGuard<'_, H>,
        cancel: &Cancellation,
    ) -> Result<PassThroughEntry, Error> {
        let cmd_list = self.current_cmd_list();
        if !mode_switch.is_preloaded() {
            bus.repository_mut().set_active_cmd_list(cmd_list);
        }

        let entry = mode_switch.enter_pass_through(bus, cancel)?;
        match entry {
            PassThroughEntry::LightedUp => self.last_pass_through = self.current,
            PassThroughEntry::Resumed => {
                if self.current != self.last_pass_through {
                    self.switch_pass_through(bus, self.current)?;
                }
            }
            PassThroughEntry::Unchanged => (),
        }

        Ok(entry)
    }

    fn switch_pass_through<H: ChipHost>(
        &mut self,
        bus: &mut PanelCommandGuard<'_, H>,
        index: usize,
    ) -> Result<(), Error> {
        let (last, entry) = match (self.table.get(self.last_pass_through), self.table.get(index)) {
            (Some(last), Some(entry)) => (last.timing, *entry),
            _ => return Ok(()),
        };

        let change = classify_change(&last, &entry.timing);
        bus.repository_mut().set_active_cmd_list(entry.cmd_list);

        let clock_aware = bus.context().variant.supports_fps_clock_switch();
        let sequence = self
            .sequences
            .get(&entry.cmd_list)
            .and_then(|sequences| sequences.select(change, clock_aware));

        match sequence {
            Some(sequence) => {
                debug!(?change, list = entry.cmd_list.0, "replay");
                send_sequence(bus, sequence)?;
            }
            None => debug!(?change, list = entry.cmd_list.0, "nothing to replay"),
        }

        self.last_pass_through = index;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{context::*, simulator::*},
        iris_protocols::{ocp::*, LinkState},
        std::time::Duration,
    };

    const CLOCK_A: u64 = 150_000_000;
    const CLOCK_B: u64 = 250_000_000;

    fn timing(width: u32, height: u32, refresh_rate: u32, pixel_clock: u64) -> TimingDescriptor {
        TimingDescriptor {
            width,
            height,
            refresh_rate,
            pixel_clock,
            transfer_time: Duration::default(),
        }
    }

    fn table() -> TimingTable {
        TimingTable::new(vec![
            TimingEntry {
                timing: timing(1920, 1080, 60, CLOCK_A),
                cmd_list: CmdListId(0),
            },
            TimingEntry {
                timing: timing(1920, 1080, 120, CLOCK_A),
                cmd_list: CmdListId(0),
            },
            TimingEntry {
                timing: timing(2560, 1440, 60, CLOCK_B),
                cmd_list: CmdListId(1),
            },
            TimingEntry {
                timing: timing(1280, 720, 30, CLOCK_A),
                cmd_list: CmdListId::NONE,
            },
            TimingEntry {
                timing: timing(1920, 1080, 90, CLOCK_B),
                cmd_list: CmdListId(0),
            },
        ])
    }

    // The register written by each sequence tells which is replayed.
    const RESOLUTION_REG: u32 = 0x1000;
    const FRAME_RATE_REG: u32 = 0x2000;
    const LIGHTUP_REG: u32 = 0x3000;
    const FRAME_RATE_WITH_CLOCK_REG: u32 = 0x4000;

    fn option(addr: u32, val: u32) -> Vec<CommandDescriptor> {
        let frames = build_single_writes(&[(addr, val)], 256).unwrap();
        build_commands(&frames, 256, Duration::default()).unwrap()
    }

    fn entry(opt_id: u8) -> ControlSequence {
        ControlSequence(vec![ControlEntry {
            block: HardwareBlock::Dtg,
            opt_id,
            chain: false,
        }])
    }

    fn fixture(
        sim: SimulatedChip,
    ) -> (CommandTransport<SimulatedChip>, TimingSequencer, ModeSwitch) {
        fixture_with(sim, ChipVariant::default(), false)
    }

    fn fixture_with(
        sim: SimulatedChip,
        variant: ChipVariant,
        clock_sequence: bool,
    ) -> (CommandTransport<SimulatedChip>, TimingSequencer, ModeSwitch) {
        let mut repo = CommandRepository::default();
        let mut sequences = BTreeMap::new();
        [CmdListId(0), CmdListId(1)].iter().for_each(|&list| {
            let tag = list.0 as u32;
            [
                (0x01, RESOLUTION_REG),
                (0x02, FRAME_RATE_REG),
                (0x03, LIGHTUP_REG),
                (0x04, FRAME_RATE_WITH_CLOCK_REG),
            ]
            .iter()
            .for_each(|&(opt_id, addr)| {
                let cmds = option(addr, tag);
                repo.register_sequence_in(
                    list,
                    HardwareBlock::Dtg,
                    opt_id,
                    LinkState::HighSpeed,
                    cmds,
                )
                .unwrap();
            });
            sequences.insert(
                list,
                SwitchSequences {
                    resolution: entry(0x01),
                    frame_rate: entry(0x02),
                    frame_rate_with_clock: if clock_sequence { Some(entry(0x04)) } else { None },
                },
            );
        });

        let ctx = ChipContext::default()
            .with_variant(variant)
            .with_retry(RetryPolicy {
                ready_poll_interval: Duration::from_micros(100),
                ..Default::default()
            });
        let transport = CommandTransport::new(sim, repo, ctx);
        (transport, TimingSequencer::new(table(), sequences), ModeSwitch::new(entry(0x03)))
    }

    fn drain_writes(sim: &SimulatedChip) -> Vec<(u32, u32)> {
        let log = sim.log();
        let mut log = log.lock().unwrap();
        let writes = log.writes();
        log.transfers.clear();
        writes
    }

    #[test]
    fn frame_rate_then_resolution() {
        let sim = SimulatedChip::default();
        let (transport, mut sequencer, mut switch) = fixture(sim.clone());
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        // Light up in the first timing.
        sequencer
            .resume_pass_through(&mut switch, &mut guard, &cancel)
            .unwrap();
        assert_eq!(drain_writes(&sim), vec![(LIGHTUP_REG, 0)]);
        assert_eq!(switch.state(), ModeState::PassThrough);

        let case = sequencer
            .on_new_timing(&timing(1920, 1080, 120, CLOCK_A), &mut switch, &mut guard, &cancel)
            .unwrap();
        assert_eq!(case, SwitchCase::PassThroughToPassThrough);
        assert_eq!(drain_writes(&sim), vec![(FRAME_RATE_REG, 0)]);
        assert_eq!(sequencer.current_index(), 1);
        assert_eq!(sequencer.last_pass_through_index(), 1);

        let case = sequencer
            .on_new_timing(&timing(2560, 1440, 60, CLOCK_B), &mut switch, &mut guard, &cancel)
            .unwrap();
        assert_eq!(case, SwitchCase::PassThroughToPassThrough);
        assert_eq!(drain_writes(&sim), vec![(RESOLUTION_REG, 1)]);
        assert_eq!(guard.repository().active_cmd_list(), CmdListId(1));
        assert_eq!(sequencer.last_pass_through_index(), 2);
    }

    #[test]
    fn frame_rate_with_clock_switch() {
        let cancel = Cancellation::default();

        // The variant switching pixel clock together.
        let sim = SimulatedChip::default();
        let (transport, mut sequencer, mut switch) =
            fixture_with(sim.clone(), ChipVariant::Iris7p, true);
        let mut guard = transport.lock().unwrap();
        sequencer
            .resume_pass_through(&mut switch, &mut guard, &cancel)
            .unwrap();
        drain_writes(&sim);

        let case = sequencer
            .on_new_timing(&timing(1920, 1080, 90, CLOCK_B), &mut switch, &mut guard, &cancel)
            .unwrap();
        assert_eq!(case, SwitchCase::PassThroughToPassThrough);
        assert_eq!(drain_writes(&sim), vec![(FRAME_RATE_WITH_CLOCK_REG, 0)]);
        assert_eq!(sequencer.last_pass_through_index(), 4);

        // The variant without the support uses the sequence for frame rate.
        let sim = SimulatedChip::default();
        let (transport, mut sequencer, mut switch) =
            fixture_with(sim.clone(), ChipVariant::Iris7, true);
        let mut guard = transport.lock().unwrap();
        sequencer
            .resume_pass_through(&mut switch, &mut guard, &cancel)
            .unwrap();
        drain_writes(&sim);

        sequencer
            .on_new_timing(&timing(1920, 1080, 90, CLOCK_B), &mut switch, &mut guard, &cancel)
            .unwrap();
        assert_eq!(drain_writes(&sim), vec![(FRAME_RATE_REG, 0)]);
    }

    #[test]
    fn timing_not_found() {
        let sim = SimulatedChip::default();
        let (transport, mut sequencer, mut switch) = fixture(sim.clone());
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        let err = sequencer
            .on_new_timing(&timing(1920, 1080, 75, CLOCK_A), &mut switch, &mut guard, &cancel)
            .unwrap_err();
        assert_eq!(err.kind::<TimingError>(), Some(TimingError::TimingNotFound));
        assert_eq!(sequencer.current_index(), 0);
        assert_eq!(switch.state(), ModeState::AnalogBypass);
        assert!(sim.log().lock().unwrap().transfers.is_empty());
    }

    #[test]
    fn bypass_only_timing_round_trip() {
        let sim = SimulatedChip::default();
        let (transport, mut sequencer, mut switch) = fixture(sim.clone());
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        sequencer
            .resume_pass_through(&mut switch, &mut guard, &cancel)
            .unwrap();
        drain_writes(&sim);

        let case = sequencer
            .on_new_timing(&timing(1280, 720, 30, CLOCK_A), &mut switch, &mut guard, &cancel)
            .unwrap();
        assert_eq!(case, SwitchCase::PassThroughToBypass);
        assert_eq!(switch.state(), ModeState::AnalogBypass);
        assert!(sequencer.is_current_bypass_only());

        // Leaving the forced bypass replays the switch from the last timing in pass-through.
        let case = sequencer
            .on_new_timing(&timing(2560, 1440, 60, CLOCK_B), &mut switch, &mut guard, &cancel)
            .unwrap();
        assert_eq!(case, SwitchCase::BypassToPassThrough);
        assert_eq!(switch.state(), ModeState::PassThrough);
        assert_eq!(drain_writes(&sim), vec![(RESOLUTION_REG, 1)]);
        assert_eq!(sequencer.last_pass_through_index(), 2);
    }

    #[test]
    fn bypass_to_bypass() {
        let sim = SimulatedChip::default();
        let (transport, mut sequencer, mut switch) = fixture(sim.clone());
        let mut guard = transport.lock().unwrap();
        let cancel = Cancellation::default();

        let case = sequencer
            .on_new_timing(&timing(1920, 1080, 120, CLOCK_A), &mut switch, &mut guard, &cancel)
            .unwrap();
        assert_eq!(case, SwitchCase::BypassToBypass);
        assert_eq!(sequencer.current_index(), 1);
        assert_eq!(sequencer.last_pass_through_index(), 0);
        assert!(drain_writes(&sim).is_empty());
    }
}
