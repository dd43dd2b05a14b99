// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{host::*, transport::*},
    glib::Error,
    iris_protocols::repository::*,
    tracing::{debug, debug_span},
};

/// Send the commands of control sequence from the active cmd-list. The options not configured
/// are skipped. Return the number of transfers.
pub fn send_sequence<H: ChipHost>(
    bus: &mut PanelCommandGuard<'_, H>,
    sequence: &ControlSequence,
) -> Result<usize, Error> {
    let _enter = debug_span!("sequence").entered();

    let assembled = bus.repository().assemble(sequence);
    assembled.missing.iter().for_each(|(block, opt_id)| {
        debug!(?block, opt_id, "option not configured");
    });

    assembled
        .batches
        .iter()
        .try_for_each(|batch| bus.send_batch(batch))?;

    debug!(
        entries = sequence.len(),
        transfers = assembled.batches.len(),
        list = bus.repository().active_cmd_list().0
    );

    Ok(assembled.batches.len())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{context::*, simulator::*},
        iris_protocols::{ocp::*, LinkState},
        std::time::Duration,
    };

    fn option(addr: u32, val: u32) -> Vec<CommandDescriptor> {
        let frames = build_single_writes(&[(addr, val)], 256).unwrap();
        build_commands(&frames, 256, Duration::default()).unwrap()
    }

    #[test]
    fn chained_entries_in_one_transfer() {
        let mut repo = CommandRepository::default();
        repo.register_sequence(HardwareBlock::Dtg, 0x01, LinkState::LowPower, option(0x10, 1))
            .unwrap();
        repo.register_sequence(HardwareBlock::Dtg, 0x02, LinkState::HighSpeed, option(0x14, 2))
            .unwrap();
        repo.register_sequence(HardwareBlock::Pwil, 0x03, LinkState::HighSpeed, option(0x18, 3))
            .unwrap();

        let sequence = ControlSequence(vec![
            ControlEntry {
                block: HardwareBlock::Dtg,
                opt_id: 0x01,
                chain: true,
            },
            ControlEntry {
                block: HardwareBlock::DscDecoder,
                opt_id: 0x00,
                chain: true,
            },
            ControlEntry {
                block: HardwareBlock::Dtg,
                opt_id: 0x02,
                chain: false,
            },
            ControlEntry {
                block: HardwareBlock::Pwil,
                opt_id: 0x03,
                chain: false,
            },
        ]);

        let sim = SimulatedChip::default();
        let log = sim.log();
        let transport = CommandTransport::new(sim, repo, ChipContext::default());
        let mut guard = transport.lock().unwrap();
        assert_eq!(send_sequence(&mut guard, &sequence).unwrap(), 2);

        let log = log.lock().unwrap();
        assert_eq!(log.transfers.len(), 2);
        assert_eq!(log.transfers[0].commands.len(), 2);
        assert_eq!(log.transfers[0].link_state, LinkState::LowPower);
        assert!(!log.transfers[0].commands[0].last_in_batch);
        assert!(log.transfers[0].commands[1].last_in_batch);
        assert_eq!(log.writes(), vec![(0x10, 1), (0x14, 2), (0x18, 3)]);
    }
}
