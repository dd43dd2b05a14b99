// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{context::*, simulator::SIMULATED_BYPASS_REGISTER},
    glib::Error,
    iris_protocols::{chip::*, ocp::*, repository::*, timing::*, LinkState},
    std::{collections::BTreeMap, time::Duration},
};

/// The configuration of display built at once before any switch.
#[derive(Debug, Default)]
pub struct DisplayProfile {
    pub repository: CommandRepository,
    pub timings: TimingTable,
    pub sequences: BTreeMap<CmdListId, SwitchSequences>,
    pub lightup: ControlSequence,
}

const OPT_LIGHTUP: u8 = 0x00;
const OPT_RESOLUTION: u8 = 0x10;
const OPT_FRAME_RATE: u8 = 0x20;
const OPT_FRAME_RATE_WITH_CLOCK: u8 = 0x21;

const GAMMA_LUT: u8 = 0x81;
const GAMMA_LUT_ENTRIES: u32 = 65;

const BYPASS_CTRL_MASK: u32 = 0x0cd00000;

fn entry(block: HardwareBlock, opt_id: u8, chain: bool) -> ControlEntry {
    ControlEntry {
        block,
        opt_id,
        chain,
    }
}

// The base address of registers for the block, just for the reference panel.
fn block_base(block: HardwareBlock) -> u32 {
    0xf1000000 | ((u8::from(block) as u32) << 16)
}

struct ProfileBuilder<'a> {
    ctx: &'a ChipContext,
    repository: CommandRepository,
}

impl<'a> ProfileBuilder<'a> {
    fn register_writes(
        &mut self,
        list: CmdListId,
        block: HardwareBlock,
        opt_id: u8,
        link_state: LinkState,
        frames: Vec<OcpFrame>,
        post_wait: Duration,
    ) -> Result<(), Error> {
        let commands = build_commands(&frames, self.ctx.split_size, post_wait)?;
        self.repository
            .register_sequence_in(list, block, opt_id, link_state, commands)
    }

    fn register_block(
        &mut self,
        list: CmdListId,
        block: HardwareBlock,
        opt_id: u8,
        values: &[u32],
    ) -> Result<(), Error> {
        let frames = build_burst_write(block_base(block), values, self.ctx.split_size)?;
        self.register_writes(list, block, opt_id, LinkState::HighSpeed, frames, Duration::default())
    }

    fn register_system(&mut self, list: CmdListId) -> Result<(), Error> {
        let opts = self.ctx.variant.mode_switch_options();
        let base = block_base(HardwareBlock::Sys);

        let pairs = [(base + 0x20, 0x00000001), (base + 0x24, 0x0000ffff)];
        let frames = build_single_writes(&pairs, self.ctx.split_size)?;
        self.register_writes(
            list,
            HardwareBlock::Sys,
            opts.dma_ctrl,
            LinkState::HighSpeed,
            frames,
            Duration::default(),
        )?;

        let frames = vec![build_bitmask_write(base + 0x30, 0x00800000, BYPASS_CTRL_MASK)];
        self.register_writes(
            list,
            HardwareBlock::Sys,
            opts.bypass_ctrl,
            LinkState::LowPower,
            frames,
            Duration::default(),
        )?;

        let frames = build_single_writes(&[(SIMULATED_BYPASS_REGISTER, 1)], self.ctx.split_size)?;
        self.register_writes(
            list,
            HardwareBlock::Sys,
            opts.enter_bypass,
            LinkState::LowPower,
            frames,
            Duration::default(),
        )?;

        let frames = build_single_writes(&[(SIMULATED_BYPASS_REGISTER, 0)], self.ctx.split_size)?;
        self.register_writes(
            list,
            HardwareBlock::Sys,
            opts.exit_bypass,
            LinkState::LowPower,
            frames,
            Duration::from_millis(1),
        )
    }

    fn register_timing(&mut self, list: CmdListId, timing: &TimingDescriptor) -> Result<(), Error> {
        let geometry = [timing.width, timing.height, timing.refresh_rate];
        let clock = [(timing.pixel_clock / 1000) as u32];

        let values: Vec<u32> = geometry.iter().chain(clock.iter()).copied().collect();
        self.register_block(list, HardwareBlock::Dtg, OPT_LIGHTUP, &values)?;
        self.register_block(list, HardwareBlock::Dtg, OPT_RESOLUTION, &values)?;
        self.register_block(list, HardwareBlock::Pwil, OPT_RESOLUTION, &geometry[..2])?;
        self.register_block(list, HardwareBlock::Dtg, OPT_FRAME_RATE, &geometry[2..])?;
        self.register_block(list, HardwareBlock::Dtg, OPT_FRAME_RATE_WITH_CLOCK, &values[2..])?;

        [HardwareBlock::Rx, HardwareBlock::Tx, HardwareBlock::Pwil]
            .iter()
            .try_for_each(|&block| self.register_block(list, block, OPT_LIGHTUP, &geometry[..2]))
    }
}

impl DisplayProfile {
    /// The profile of reference panel with two cmd-lists and one timing for analog bypass only.
    pub fn reference(ctx: &ChipContext) -> Result<Self, Error> {
        let timings = TimingTable::new(vec![
            TimingEntry {
                timing: TimingDescriptor {
                    width: 1080,
                    height: 2400,
                    refresh_rate: 60,
                    pixel_clock: 170_000_000,
                    transfer_time: Duration::from_micros(15000),
                },
                cmd_list: CmdListId(0),
            },
            TimingEntry {
                timing: TimingDescriptor {
                    width: 1080,
                    height: 2400,
                    refresh_rate: 120,
                    pixel_clock: 170_000_000,
                    transfer_time: Duration::from_micros(7500),
                },
                cmd_list: CmdListId(0),
            },
            TimingEntry {
                timing: TimingDescriptor {
                    width: 1080,
                    height: 2400,
                    refresh_rate: 90,
                    pixel_clock: 255_000_000,
                    transfer_time: Duration::from_micros(10000),
                },
                cmd_list: CmdListId(0),
            },
            TimingEntry {
                timing: TimingDescriptor {
                    width: 1440,
                    height: 3200,
                    refresh_rate: 60,
                    pixel_clock: 300_000_000,
                    transfer_time: Duration::from_micros(15000),
                },
                cmd_list: CmdListId(1),
            },
            TimingEntry {
                timing: TimingDescriptor {
                    width: 720,
                    height: 1600,
                    refresh_rate: 30,
                    pixel_clock: 40_000_000,
                    transfer_time: Duration::from_micros(30000),
                },
                cmd_list: CmdListId::NONE,
            },
        ]);

        let mut builder = ProfileBuilder {
            ctx,
            repository: Default::default(),
        };
        let mut sequences = BTreeMap::new();

        // The first timing of each cmd-list stands for the list.
        let mut lists: Vec<(CmdListId, TimingDescriptor)> = Vec::new();
        (0..timings.len())
            .filter_map(|i| timings.get(i))
            .filter(|entry| !entry.cmd_list.is_none())
            .for_each(|entry| {
                if lists.iter().all(|(list, _)| *list != entry.cmd_list) {
                    lists.push((entry.cmd_list, entry.timing));
                }
            });

        lists.iter().try_for_each(|(list, timing)| {
            builder.register_system(*list)?;
            builder.register_timing(*list, timing)?;
            sequences.insert(
                *list,
                SwitchSequences {
                    resolution: ControlSequence(vec![
                        entry(HardwareBlock::Pwil, OPT_RESOLUTION, true),
                        entry(HardwareBlock::Dtg, OPT_RESOLUTION, false),
                    ]),
                    frame_rate: ControlSequence(vec![entry(
                        HardwareBlock::Dtg,
                        OPT_FRAME_RATE,
                        false,
                    )]),
                    frame_rate_with_clock: Some(ControlSequence(vec![entry(
                        HardwareBlock::Dtg,
                        OPT_FRAME_RATE_WITH_CLOCK,
                        false,
                    )])),
                },
            );
            Ok::<(), Error>(())
        })?;

        // Look-up table is shared by cmd-lists.
        let lut = ctx.variant.lut_block(GAMMA_LUT);
        let table: Vec<u32> = (0..GAMMA_LUT_ENTRIES)
            .map(|i| (i * 1023) / (GAMMA_LUT_ENTRIES - 1))
            .collect();
        builder.register_block(CmdListId(0), lut, 0x00, &table)?;

        let opts = ctx.variant.mode_switch_options();
        let lightup = ControlSequence(vec![
            entry(HardwareBlock::Sys, opts.dma_ctrl, true),
            entry(HardwareBlock::Rx, OPT_LIGHTUP, true),
            entry(HardwareBlock::Tx, OPT_LIGHTUP, false),
            entry(HardwareBlock::Pwil, OPT_LIGHTUP, true),
            entry(HardwareBlock::Dtg, OPT_LIGHTUP, false),
            entry(lut, 0x00, false),
        ]);

        Ok(Self {
            repository: builder.repository,
            timings,
            sequences,
            lightup,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reference_profile() {
        let ctx = ChipContext::default().with_variant(ChipVariant::Iris8);
        let mut profile = DisplayProfile::reference(&ctx).unwrap();
        assert_eq!(profile.timings.len(), 5);
        assert_eq!(profile.repository.cmd_lists(), vec![CmdListId(0), CmdListId(1)]);
        assert_eq!(profile.sequences.len(), 2);

        let assembled = profile.repository.assemble(&profile.lightup);
        assert!(assembled.missing.is_empty());
        assert_eq!(assembled.batches.len(), 3);

        // The look-up table is available in any cmd-list.
        profile.repository.set_active_cmd_list(CmdListId(1));
        let lut = ctx.variant.lut_block(GAMMA_LUT);
        assert_eq!(profile.repository.payload_word(lut, 0x00, 2 + 64), Some(1023));
        let assembled = profile.repository.assemble(&profile.lightup);
        assert!(assembled.missing.is_empty());
    }

    #[test]
    fn frames_fit_split_size() {
        let ctx = ChipContext::default().with_split_size(64);
        let profile = DisplayProfile::reference(&ctx).unwrap();
        let lut = ctx.variant.lut_block(GAMMA_LUT);
        let entry = profile.repository.lookup(lut, 0x00).unwrap();
        // 14 words per frame.
        assert_eq!(entry.commands.len(), 5);
        assert!(entry.commands.iter().all(|cmd| cmd.payload.len() <= 64));
    }
}
