// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Repository of commands indexed by hardware block and option.
//!
//! The module includes structure and enumeration for the repository of commands. The repository
//! is populated at configuration time, then the payload of stored commands is updated in place
//! by the paths of timing switch and picture quality.

use {super::*, std::collections::BTreeMap, std::time::Duration};

/// Hardware block of co-processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HardwareBlock {
    /// System control.
    Sys,
    /// MIPI RX.
    Rx,
    /// MIPI TX.
    Tx,
    /// Pixel work interface layer.
    Pwil,
    /// Display port.
    Dport,
    /// Display timing generator.
    Dtg,
    Pwm,
    /// Decoder of display stream compression.
    DscDecoder,
    /// Encoder of display stream compression.
    DscEncoder,
    Sdr2Hdr,
    /// Color management.
    ColorManagement,
    Scaler1d,
    Peaking,
    /// Local contrast enhancement.
    Lce,
    /// Display pixel processing.
    Dpp,
    /// Dynamic backlight control.
    Dbc,
    Ext,
    Dma,
    Ai,
    /// Look-up table.
    Lut(u8),
    Reserved(u8),
}

impl Default for HardwareBlock {
    fn default() -> Self {
        Self::Sys
    }
}

impl HardwareBlock {
    const LUT_START: u8 = 0x80;
}

impl From<u8> for HardwareBlock {
    fn from(val: u8) -> Self {
        match val {
            0x00 => Self::Sys,
            0x01 => Self::Rx,
            0x02 => Self::Tx,
            0x03 => Self::Pwil,
            0x04 => Self::Dport,
            0x05 => Self::Dtg,
            0x06 => Self::Pwm,
            0x07 => Self::DscDecoder,
            0x08 => Self::DscEncoder,
            0x09 => Self::Sdr2Hdr,
            0x0a => Self::ColorManagement,
            0x0b => Self::Scaler1d,
            0x0c => Self::Peaking,
            0x0d => Self::Lce,
            0x0e => Self::Dpp,
            0x0f => Self::Dbc,
            0x10 => Self::Ext,
            0x11 => Self::Dma,
            0x12 => Self::Ai,
            _ => {
                if val >= Self::LUT_START {
                    Self::Lut(val)
                } else {
                    Self::Reserved(val)
                }
            }
        }
    }
}

impl From<HardwareBlock> for u8 {
    fn from(block: HardwareBlock) -> Self {
        match block {
            HardwareBlock::Sys => 0x00,
            HardwareBlock::Rx => 0x01,
            HardwareBlock::Tx => 0x02,
            HardwareBlock::Pwil => 0x03,
            HardwareBlock::Dport => 0x04,
            HardwareBlock::Dtg => 0x05,
            HardwareBlock::Pwm => 0x06,
            HardwareBlock::DscDecoder => 0x07,
            HardwareBlock::DscEncoder => 0x08,
            HardwareBlock::Sdr2Hdr => 0x09,
            HardwareBlock::ColorManagement => 0x0a,
            HardwareBlock::Scaler1d => 0x0b,
            HardwareBlock::Peaking => 0x0c,
            HardwareBlock::Lce => 0x0d,
            HardwareBlock::Dpp => 0x0e,
            HardwareBlock::Dbc => 0x0f,
            HardwareBlock::Ext => 0x10,
            HardwareBlock::Dma => 0x11,
            HardwareBlock::Ai => 0x12,
            HardwareBlock::Lut(val) => val,
            HardwareBlock::Reserved(val) => val,
        }
    }
}

impl HardwareBlock {
    /// Whether the block is shared by all of cmd-lists.
    pub fn is_lut(&self) -> bool {
        u8::from(*self) >= Self::LUT_START
    }
}

/// The identifier of cmd-list, a named bundle of commands associated with timings.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CmdListId(pub u8);

impl CmdListId {
    /// The cmd-list for the timing of which the co-processor does not process video.
    pub const NONE: Self = Self(0xff);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// One command in the repository.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// The data type of MIPI-DSI packet.
    pub data_type: u8,
    /// The content of packet.
    pub payload: Vec<u8>,
    /// The command terminates the batch of transfer.
    pub last_in_batch: bool,
    /// The duration to wait after transfer.
    pub post_wait: Duration,
}

/// The view of option in repository.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OptionEntry<'a> {
    pub link_state: LinkState,
    pub commands: &'a [CommandDescriptor],
}

/// One entry of control sequence.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct ControlEntry {
    pub block: HardwareBlock,
    pub opt_id: u8,
    /// Coalesce with the next entry into one physical transfer.
    pub chain: bool,
}

/// The sequence of options replayed at once.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ControlSequence(pub Vec<ControlEntry>);

impl ControlSequence {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Group entries into physical transfers according to chain flag.
    pub fn groups(&self) -> Vec<&[ControlEntry]> {
        let mut groups = Vec::new();
        let mut begin = 0;

        self.0.iter().enumerate().for_each(|(i, entry)| {
            if !entry.chain {
                groups.push(&self.0[begin..(i + 1)]);
                begin = i + 1;
            }
        });

        // Chain flag of the last entry has no successor to coalesce.
        if begin < self.0.len() {
            groups.push(&self.0[begin..]);
        }

        groups
    }
}

/// The batch of commands for one physical transfer.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    pub link_state: LinkState,
    pub commands: Vec<CommandDescriptor>,
}

/// The result to assemble control sequence.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct AssembledSequence {
    pub batches: Vec<CommandBatch>,
    /// The options not configured, skipped in the batches.
    pub missing: Vec<(HardwareBlock, u8)>,
}

/// The error in configuration of repository.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The option is not configured.
    NotConfigured,
    /// The sequence of commands is malformed.
    Malformed,
    /// The index of payload word is out of range.
    OutOfRange,
    Invalid(i32),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            RepositoryError::NotConfigured => "not-configured",
            RepositoryError::Malformed => "malformed",
            RepositoryError::OutOfRange => "out-of-range",
            RepositoryError::Invalid(_) => "invalid",
        };

        write!(f, "RepositoryError::{}", msg)
    }
}

impl ErrorDomain for RepositoryError {
    fn domain() -> Quark {
        Quark::from_str("iris-command-repository-error-quark")
    }

    fn code(self) -> i32 {
        match self {
            RepositoryError::NotConfigured => 0,
            RepositoryError::Malformed => 1,
            RepositoryError::OutOfRange => 2,
            RepositoryError::Invalid(v) => v,
        }
    }

    fn from(code: i32) -> Option<Self> {
        let enumeration = match code {
            0 => RepositoryError::NotConfigured,
            1 => RepositoryError::Malformed,
            2 => RepositoryError::OutOfRange,
            _ => RepositoryError::Invalid(code),
        };
        Some(enumeration)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct OptionSlot {
    link_state: LinkState,
    storage: usize,
}

type OptionKey = (u8, u8);

/// The repository of commands.
///
/// Each cmd-list has its own index of options, except for look-up tables shared by all of
/// cmd-lists. The storage of commands can be shared by several options by `clone_address()`.
#[derive(Default, Debug)]
pub struct CommandRepository {
    indexes: BTreeMap<CmdListId, BTreeMap<OptionKey, OptionSlot>>,
    lut_index: BTreeMap<OptionKey, OptionSlot>,
    storages: BTreeMap<usize, Vec<CommandDescriptor>>,
    next_storage: usize,
    active: CmdListId,
}

// MEMO: The payload of command built from configuration is OCP frame:
//
// word 0:      header
// word 1:      base address
// word 2..:    values
//
// When the values exceed split size, they are carried by following commands which have their
// own header and address. The index of payload word counts header and address of the first
// command only, then counts values over the following commands.
fn locate_payload_word(
    commands: &[CommandDescriptor],
    word_index: usize,
) -> Option<(usize, usize)> {
    if word_index < 2 {
        commands
            .first()
            .filter(|cmd| cmd.payload.len() >= (word_index + 1) * 4)
            .map(|_| (0, word_index * 4))
    } else {
        let mut value_index = word_index - 2;
        commands.iter().enumerate().find_map(|(i, cmd)| {
            let count = cmd.payload.len().saturating_sub(8) / 4;
            if value_index < count {
                Some((i, 8 + value_index * 4))
            } else {
                value_index -= count;
                None
            }
        })
    }
}

fn validate_commands(commands: &[CommandDescriptor]) -> Result<(), Error> {
    if commands.is_empty() {
        let msg = "The sequence of commands is empty";
        Err(Error::new(RepositoryError::Malformed, msg))?;
    }

    let count = commands.iter().filter(|cmd| cmd.last_in_batch).count();
    let last_is_terminal = commands
        .last()
        .map(|cmd| cmd.last_in_batch)
        .unwrap_or(false);
    if count != 1 || !last_is_terminal {
        let msg = format!(
            "The sequence of commands should be terminated by one command: {} terminators",
            count
        );
        Err(Error::new(RepositoryError::Malformed, &msg))?;
    }

    Ok(())
}

impl CommandRepository {
    fn index(
        &self,
        list: CmdListId,
        block: HardwareBlock,
    ) -> Option<&BTreeMap<OptionKey, OptionSlot>> {
        if block.is_lut() {
            Some(&self.lut_index)
        } else {
            self.indexes.get(&list)
        }
    }

    fn index_mut(
        &mut self,
        list: CmdListId,
        block: HardwareBlock,
    ) -> &mut BTreeMap<OptionKey, OptionSlot> {
        if block.is_lut() {
            &mut self.lut_index
        } else {
            self.indexes.entry(list).or_default()
        }
    }

    fn slot(&self, list: CmdListId, block: HardwareBlock, opt_id: u8) -> Option<OptionSlot> {
        self.index(list, block)
            .and_then(|index| index.get(&(u8::from(block), opt_id)))
            .copied()
    }

    fn release_unused_storages(&mut self) {
        let indexes = &self.indexes;
        let lut_index = &self.lut_index;
        self.storages.retain(|storage, _| {
            indexes
                .values()
                .chain(std::iter::once(lut_index))
                .any(|index| index.values().any(|slot| slot.storage == *storage))
        });
    }

    /// The cmd-list used when no cmd-list is given explicitly.
    pub fn active_cmd_list(&self) -> CmdListId {
        self.active
    }

    pub fn set_active_cmd_list(&mut self, list: CmdListId) {
        self.active = list;
    }

    /// The cmd-lists which have any option.
    pub fn cmd_lists(&self) -> Vec<CmdListId> {
        self.indexes
            .iter()
            .filter(|(_, index)| !index.is_empty())
            .map(|(list, _)| *list)
            .collect()
    }

    /// Register the sequence of commands for the option into the active cmd-list.
    pub fn register_sequence(
        &mut self,
        block: HardwareBlock,
        opt_id: u8,
        link_state: LinkState,
        commands: Vec<CommandDescriptor>,
    ) -> Result<(), Error> {
        let list = self.active;
        self.register_sequence_in(list, block, opt_id, link_state, commands)
    }

    /// Register the sequence of commands for the option into the cmd-list.
    pub fn register_sequence_in(
        &mut self,
        list: CmdListId,
        block: HardwareBlock,
        opt_id: u8,
        link_state: LinkState,
        commands: Vec<CommandDescriptor>,
    ) -> Result<(), Error> {
        validate_commands(&commands)?;

        let storage = self.next_storage;
        self.next_storage += 1;
        self.storages.insert(storage, commands);

        let slot = OptionSlot {
            link_state,
            storage,
        };
        self.index_mut(list, block)
            .insert((u8::from(block), opt_id), slot);

        // The former storage may be left without reference.
        self.release_unused_storages();

        Ok(())
    }

    /// Find the option in the active cmd-list.
    pub fn lookup(&self, block: HardwareBlock, opt_id: u8) -> Option<OptionEntry<'_>> {
        self.lookup_in(self.active, block, opt_id)
    }

    /// Find the option in the cmd-list.
    pub fn lookup_in(
        &self,
        list: CmdListId,
        block: HardwareBlock,
        opt_id: u8,
    ) -> Option<OptionEntry<'_>> {
        self.slot(list, block, opt_id).and_then(|slot| {
            self.storages.get(&slot.storage).map(|commands| OptionEntry {
                link_state: slot.link_state,
                commands,
            })
        })
    }

    /// Redirect the destination option to the storage of source option in the active cmd-list.
    pub fn clone_address(
        &mut self,
        dest_block: HardwareBlock,
        dest_opt: u8,
        src_block: HardwareBlock,
        src_opt: u8,
    ) -> Result<(), Error> {
        let list = self.active;
        let slot = self.slot(list, src_block, src_opt).ok_or_else(|| {
            let msg = format!(
                "The source option is not configured: {:?} 0x{:02x}",
                src_block, src_opt
            );
            Error::new(RepositoryError::NotConfigured, &msg)
        })?;

        self.index_mut(list, dest_block)
            .insert((u8::from(dest_block), dest_opt), slot);
        self.release_unused_storages();

        Ok(())
    }

    /// Read one payload word of the option in the active cmd-list.
    pub fn payload_word(&self, block: HardwareBlock, opt_id: u8, word_index: usize) -> Option<u32> {
        self.lookup(block, opt_id).and_then(|entry| {
            locate_payload_word(entry.commands, word_index).map(|(pos, offset)| {
                let mut val = 0;
                deserialize_u32(&mut val, &entry.commands[pos].payload[offset..]);
                val
            })
        })
    }

    fn locate_word(
        &self,
        list: CmdListId,
        block: HardwareBlock,
        opt_id: u8,
        word_index: usize,
    ) -> Result<(usize, usize, usize), Error> {
        let slot = self.slot(list, block, opt_id).ok_or_else(|| {
            let msg = format!("The option is not configured: {:?} 0x{:02x}", block, opt_id);
            Error::new(RepositoryError::NotConfigured, &msg)
        })?;
        let commands = self.storages.get(&slot.storage).ok_or_else(|| {
            let msg = format!("The storage of option is missing: {:?} 0x{:02x}", block, opt_id);
            Error::new(RepositoryError::NotConfigured, &msg)
        })?;
        let (pos, offset) = locate_payload_word(commands, word_index).ok_or_else(|| {
            let msg = format!(
                "The index of payload word is out of range: {:?} 0x{:02x} {}",
                block, opt_id, word_index
            );
            Error::new(RepositoryError::OutOfRange, &msg)
        })?;
        Ok((slot.storage, pos, offset))
    }

    fn write_payload_word(
        &mut self,
        list: CmdListId,
        block: HardwareBlock,
        opt_id: u8,
        word_index: usize,
        value: u32,
    ) -> Result<(), Error> {
        let (storage, pos, offset) = self.locate_word(list, block, opt_id, word_index)?;
        if let Some(commands) = self.storages.get_mut(&storage) {
            serialize_u32(&value, &mut commands[pos].payload[offset..]);
        }
        Ok(())
    }

    /// Overwrite one payload word of the option in the active cmd-list. The stored commands are
    /// left as is when the index is out of range.
    pub fn set_payload_word(
        &mut self,
        block: HardwareBlock,
        opt_id: u8,
        word_index: usize,
        value: u32,
    ) -> Result<(), Error> {
        let list = self.active;
        self.write_payload_word(list, block, opt_id, word_index, value)
    }

    /// Overwrite one payload word of the option in every cmd-list which has it. Return the
    /// number of cmd-lists updated. No cmd-list is updated when the index is out of range in
    /// any of them.
    pub fn sync_payload_word(
        &mut self,
        block: HardwareBlock,
        opt_id: u8,
        word_index: usize,
        value: u32,
    ) -> Result<usize, Error> {
        let candidates: Vec<CmdListId> = if block.is_lut() {
            vec![self.active]
        } else {
            self.indexes.keys().copied().collect()
        };
        let lists: Vec<CmdListId> = candidates
            .into_iter()
            .filter(|&list| self.slot(list, block, opt_id).is_some())
            .collect();

        if lists.len() == 0 {
            let msg = format!("The option is not configured: {:?} 0x{:02x}", block, opt_id);
            Err(Error::new(RepositoryError::NotConfigured, &msg))?;
        }

        lists
            .iter()
            .try_for_each(|&list| self.locate_word(list, block, opt_id, word_index).map(|_| ()))?;
        lists
            .iter()
            .try_for_each(|&list| self.write_payload_word(list, block, opt_id, word_index, value))?;

        Ok(lists.len())
    }

    /// Collect the commands for the control sequence from the active cmd-list.
    pub fn assemble(&self, sequence: &ControlSequence) -> AssembledSequence {
        let mut assembled = AssembledSequence::default();

        sequence.groups().iter().for_each(|group| {
            let mut batch: Option<CommandBatch> = None;

            group.iter().for_each(|entry| match self.lookup(entry.block, entry.opt_id) {
                Some(option) => {
                    let b = batch.get_or_insert_with(|| CommandBatch {
                        link_state: option.link_state,
                        commands: Vec::new(),
                    });
                    b.commands.extend(option.commands.iter().map(|cmd| {
                        let mut cmd = cmd.clone();
                        cmd.last_in_batch = false;
                        cmd
                    }));
                }
                None => assembled.missing.push((entry.block, entry.opt_id)),
            });

            if let Some(mut b) = batch {
                if let Some(cmd) = b.commands.last_mut() {
                    cmd.last_in_batch = true;
                }
                assembled.batches.push(b);
            }
        });

        assembled
    }

    /// Release all options of the block in every cmd-list.
    pub fn free_block(&mut self, block: HardwareBlock) {
        let id = u8::from(block);
        if block.is_lut() {
            self.lut_index.retain(|(b, _), _| *b != id);
        } else {
            self.indexes
                .values_mut()
                .for_each(|index| index.retain(|(b, _), _| *b != id));
        }
        self.release_unused_storages();
    }

    /// Release all options.
    pub fn free_all(&mut self) {
        self.indexes.clear();
        self.lut_index.clear();
        self.storages.clear();
    }

    /// The number of options in every cmd-list.
    pub fn option_count(&self) -> usize {
        self.indexes.values().map(|index| index.len()).sum::<usize>() + self.lut_index.len()
    }

    /// The number of storages of commands.
    pub fn storage_count(&self) -> usize {
        self.storages.len()
    }
}
