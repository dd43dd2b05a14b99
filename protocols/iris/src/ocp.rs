// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Register access protocol of co-processor.
//!
//! The module includes structure, enumeration, and functions to encode register operations into
//! OCP frames, and to decode them. One frame is carried by one MIPI-DSI generic long write, or by
//! one burst write over I2C.

use {
    super::{chip::RegisterMap, dsi::*, repository::CommandDescriptor, *},
    std::time::Duration,
};

/// The maximum length of payload in the first segment of command forwarded to panel.
pub const FIRST_SEGMENT_LENGTH: usize = 120;
/// The maximum length of payload in the following segments of command forwarded to panel.
pub const SEGMENT_LENGTH: usize = 124;

const HEADER_PREFIX: u32 = 0xfffffff0;
const HEADER_PREFIX_MASK: u32 = 0xfffffff0;

const OCP_SINGLE_WRITE_BYTEMASK: u32 = 0x0;
const OCP_SINGLE_WRITE_BITMASK: u32 = 0x1;
const OCP_BURST_WRITE: u32 = 0x2;
const OCP_SINGLE_READ: u32 = 0xc;

const FRAME_HEADER_SIZE: usize = 8;

/// The kind of operation in OCP frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OcpOperation {
    /// Pairs of address and value.
    SingleWriteByteMask,
    /// One address with mask and value.
    SingleWriteBitMask,
    /// Consecutive values from base address.
    BurstWrite,
    /// Request to read one register.
    SingleRead,
}

impl Default for OcpOperation {
    fn default() -> Self {
        Self::BurstWrite
    }
}

impl From<OcpOperation> for u32 {
    fn from(operation: OcpOperation) -> Self {
        match operation {
            OcpOperation::SingleWriteByteMask => OCP_SINGLE_WRITE_BYTEMASK,
            OcpOperation::SingleWriteBitMask => OCP_SINGLE_WRITE_BITMASK,
            OcpOperation::BurstWrite => OCP_BURST_WRITE,
            OcpOperation::SingleRead => OCP_SINGLE_READ,
        }
    }
}

impl OcpOperation {
    fn parse(header: u32) -> Result<Self, Error> {
        if header & HEADER_PREFIX_MASK != HEADER_PREFIX {
            let msg = format!("Unexpected header of OCP frame: 0x{:08x}", header);
            Err(protocol_error(ProtocolError::UnknownOperation, &msg))?;
        }

        match bits(header, 4, 0) {
            OCP_SINGLE_WRITE_BYTEMASK => Ok(Self::SingleWriteByteMask),
            OCP_SINGLE_WRITE_BITMASK => Ok(Self::SingleWriteBitMask),
            OCP_BURST_WRITE => Ok(Self::BurstWrite),
            OCP_SINGLE_READ => Ok(Self::SingleRead),
            kind => {
                let msg = format!("Unknown kind of OCP operation: 0x{:x}", kind);
                Err(protocol_error(ProtocolError::UnknownOperation, &msg))
            }
        }
    }
}

// MEMO: The layout of OCP frame in little endian:
//
// word 0:      0xfffffff0 | kind of operation
// word 1:      the address of register
// word 2..:    payload
//
// For single write with byte mask, the payload is the value for the address, then the pairs of
// address and value follow. For single write with bit mask, the payload is mask and value. For
// burst write, the payload is the values for consecutive registers. Single read has no payload.
/// One frame of OCP.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct OcpFrame {
    pub operation: OcpOperation,
    pub address: u32,
    pub payload: Vec<u32>,
}

impl OcpFrame {
    /// The length of encoded frame in bytes.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len() * 4
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = vec![0u8; self.encoded_len()];
        let header = HEADER_PREFIX | u32::from(self.operation);
        serialize_u32(&header, &mut raw[..4]);
        serialize_u32(&self.address, &mut raw[4..8]);
        self.payload.iter().enumerate().for_each(|(i, val)| {
            let pos = FRAME_HEADER_SIZE + i * 4;
            serialize_u32(val, &mut raw[pos..(pos + 4)]);
        });
        raw
    }

    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < FRAME_HEADER_SIZE || raw.len() % 4 > 0 {
            let msg = format!("Unexpected length of OCP frame: {}", raw.len());
            Err(protocol_error(ProtocolError::Truncated, &msg))?;
        }

        let mut header = 0;
        deserialize_u32(&mut header, &raw[..4]);
        let operation = OcpOperation::parse(header)?;

        let mut address = 0;
        deserialize_u32(&mut address, &raw[4..8]);

        let payload = raw[FRAME_HEADER_SIZE..]
            .chunks_exact(4)
            .map(|quadlet| {
                let mut val = 0;
                deserialize_u32(&mut val, quadlet);
                val
            })
            .collect();

        Ok(OcpFrame {
            operation,
            address,
            payload,
        })
    }

    /// The pairs of address and value written by the frame.
    pub fn register_writes(&self) -> Vec<(u32, u32)> {
        match self.operation {
            OcpOperation::SingleWriteByteMask => {
                let mut words = Vec::with_capacity(1 + self.payload.len());
                words.push(self.address);
                words.extend_from_slice(&self.payload);
                words
                    .chunks_exact(2)
                    .map(|pair| (pair[0], pair[1]))
                    .collect()
            }
            OcpOperation::SingleWriteBitMask => self
                .payload
                .get(1)
                .map(|&value| vec![(self.address, value)])
                .unwrap_or_default(),
            OcpOperation::BurstWrite => self
                .payload
                .iter()
                .enumerate()
                .map(|(i, &value)| (self.address.wrapping_add(4 * i as u32), value))
                .collect(),
            OcpOperation::SingleRead => Vec::new(),
        }
    }

    /// Wrap the frame into DSI generic long write.
    pub fn to_command(&self, last_in_batch: bool, post_wait: Duration) -> CommandDescriptor {
        CommandDescriptor {
            data_type: GENERIC_LONG_WRITE,
            payload: self.to_bytes(),
            last_in_batch,
            post_wait,
        }
    }
}

fn check_split_size(frame: &OcpFrame, split_size: usize) -> Result<(), Error> {
    if frame.encoded_len() > split_size {
        let msg = format!(
            "OCP frame exceeds split size: {} > {}",
            frame.encoded_len(),
            split_size
        );
        Err(protocol_error(ProtocolError::ExceedSplitSize, &msg))
    } else {
        Ok(())
    }
}

fn words_per_frame(split_size: usize) -> Result<usize, Error> {
    let count = (split_size / 4).saturating_sub(2);
    if count == 0 {
        let msg = format!("Split size too small for payload: {}", split_size);
        Err(protocol_error(ProtocolError::ExceedSplitSize, &msg))
    } else {
        Ok(count)
    }
}

/// Build frames of burst write for consecutive registers. The base address of each frame
/// advances by the length of values in the former frames.
pub fn build_burst_write(
    address: u32,
    values: &[u32],
    split_size: usize,
) -> Result<Vec<OcpFrame>, Error> {
    let count = words_per_frame(split_size)?;

    let mut frames = Vec::new();
    let mut addr = address;
    let mut vals = values;

    while vals.len() > 0 {
        let len = std::cmp::min(count, vals.len());
        frames.push(OcpFrame {
            operation: OcpOperation::BurstWrite,
            address: addr,
            payload: vals[..len].to_vec(),
        });
        addr = addr.wrapping_add(4 * len as u32);
        vals = &vals[len..];
    }

    Ok(frames)
}

/// Build frames of single write for the pairs of address and value.
pub fn build_single_writes(
    pairs: &[(u32, u32)],
    split_size: usize,
) -> Result<Vec<OcpFrame>, Error> {
    // The address of the first pair is in the frame header.
    let count = (words_per_frame(split_size)? + 1) / 2;

    let frames = pairs
        .chunks(count)
        .map(|chunk| {
            let (address, value) = chunk[0];
            let mut payload = vec![value];
            chunk[1..].iter().for_each(|&(addr, val)| {
                payload.push(addr);
                payload.push(val);
            });
            OcpFrame {
                operation: OcpOperation::SingleWriteByteMask,
                address,
                payload,
            }
        })
        .collect();

    Ok(frames)
}

/// Build frame of single write for the bits of register.
pub fn build_bitmask_write(address: u32, value: u32, mask: u32) -> OcpFrame {
    OcpFrame {
        operation: OcpOperation::SingleWriteBitMask,
        address,
        payload: vec![mask, value & mask],
    }
}

/// Build frame to request read of register.
pub fn build_single_read(address: u32) -> OcpFrame {
    OcpFrame {
        operation: OcpOperation::SingleRead,
        address,
        payload: Vec::new(),
    }
}

/// The segment of payload in command forwarded to panel.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct SplitSegment {
    pub offset: usize,
    pub len: usize,
}

/// The number of segments for the length of payload.
pub fn split_count(dlen: usize) -> usize {
    if dlen > FIRST_SEGMENT_LENGTH {
        (dlen - FIRST_SEGMENT_LENGTH + SEGMENT_LENGTH - 1) / SEGMENT_LENGTH + 1
    } else {
        1
    }
}

/// Split the payload of command forwarded to panel into segments.
pub fn split(dlen: usize) -> Vec<SplitSegment> {
    let count = split_count(dlen);
    let mut offset = 0;

    (0..count)
        .map(|k| {
            let len = if k == 0 {
                std::cmp::min(dlen, FIRST_SEGMENT_LENGTH)
            } else if k == count - 1 {
                dlen - FIRST_SEGMENT_LENGTH - (k - 1) * SEGMENT_LENGTH
            } else {
                SEGMENT_LENGTH
            };
            let segment = SplitSegment { offset, len };
            offset += len;
            segment
        })
        .collect()
}

fn pack_words(raw: &[u8]) -> Vec<u32> {
    raw.chunks(4)
        .map(|chunk| {
            let mut quadlet = [0u8; 4];
            quadlet[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(quadlet)
        })
        .collect()
}

/// Build frames to forward DSI command to panel via MIPI TX of co-processor.
pub fn build_panel_command(
    data_type: u8,
    link_state: LinkState,
    content: &[u8],
    regs: &RegisterMap,
    split_size: usize,
) -> Result<Vec<OcpFrame>, Error> {
    let header = MipiTxHeader::new(data_type, link_state, content)?;

    let mut frames = vec![OcpFrame {
        operation: OcpOperation::SingleWriteByteMask,
        address: regs.mipi_tx_header,
        payload: vec![header.build()],
    }];

    if header.long {
        split(content.len())
            .iter()
            .enumerate()
            .for_each(|(k, segment)| {
                let data = &content[segment.offset..(segment.offset + segment.len)];
                let words = pack_words(data);

                if k > 0 {
                    if let Some((&first, rest)) = words.split_first() {
                        let mut payload = vec![first];
                        rest.iter().for_each(|&w| {
                            payload.push(regs.mipi_tx_payload);
                            payload.push(w);
                        });
                        frames.push(OcpFrame {
                            operation: OcpOperation::SingleWriteByteMask,
                            address: regs.mipi_tx_payload,
                            payload,
                        });
                    }
                } else if let Some(frame) = frames.last_mut() {
                    words.iter().for_each(|&w| {
                        frame.payload.push(regs.mipi_tx_payload);
                        frame.payload.push(w);
                    });
                }
            });
    }

    frames
        .iter()
        .try_for_each(|frame| check_split_size(frame, split_size))?;

    Ok(frames)
}

/// Build commands to be stored in repository for the frames. The last command terminates the
/// batch and carries the post wait.
pub fn build_commands(
    frames: &[OcpFrame],
    split_size: usize,
    post_wait: Duration,
) -> Result<Vec<CommandDescriptor>, Error> {
    frames
        .iter()
        .try_for_each(|frame| check_split_size(frame, split_size))?;

    let count = frames.len();
    let commands = frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            if i + 1 == count {
                frame.to_command(true, post_wait)
            } else {
                frame.to_command(false, Duration::default())
            }
        })
        .collect();

    Ok(commands)
}

/// Decode the commands into the pairs of address and value in order.
pub fn decode_register_writes(commands: &[CommandDescriptor]) -> Result<Vec<(u32, u32)>, Error> {
    let mut writes = Vec::new();
    commands.iter().try_for_each(|cmd| {
        OcpFrame::parse(&cmd.payload).map(|frame| writes.extend(frame.register_writes()))
    })?;
    Ok(writes)
}
