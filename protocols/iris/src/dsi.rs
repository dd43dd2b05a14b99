// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Packets of MIPI-DSI forwarded by co-processor.
//!
//! The module includes constants, structure, and functions for DSI packets which the
//! co-processor forwards to panel in pass-through mode, and for the response packets which the
//! panel returns to read request.

use super::*;

pub const GENERIC_SHORT_WRITE_0_PARAM: u8 = 0x03;
pub const GENERIC_SHORT_WRITE_1_PARAM: u8 = 0x13;
pub const GENERIC_SHORT_WRITE_2_PARAM: u8 = 0x23;
pub const GENERIC_READ_REQUEST_0_PARAM: u8 = 0x04;
pub const GENERIC_READ_REQUEST_1_PARAM: u8 = 0x14;
pub const GENERIC_READ_REQUEST_2_PARAM: u8 = 0x24;
pub const DCS_SHORT_WRITE: u8 = 0x05;
pub const DCS_SHORT_WRITE_PARAM: u8 = 0x15;
pub const DCS_READ: u8 = 0x06;
pub const SET_MAXIMUM_RETURN_PACKET_SIZE: u8 = 0x37;
pub const GENERIC_LONG_WRITE: u8 = 0x29;
pub const DCS_LONG_WRITE: u8 = 0x39;

const RESPONSE_ACK_ERROR_REPORT: u8 = 0x02;
const RESPONSE_GENERIC_SHORT_1_BYTE: u8 = 0x11;
const RESPONSE_GENERIC_SHORT_2_BYTE: u8 = 0x12;
const RESPONSE_GENERIC_LONG: u8 = 0x1a;
const RESPONSE_DCS_LONG: u8 = 0x1c;
const RESPONSE_DCS_SHORT_1_BYTE: u8 = 0x21;
const RESPONSE_DCS_SHORT_2_BYTE: u8 = 0x22;

/// The maximum length of read from panel.
pub const MAXIMUM_READ_LENGTH: usize = 128;

/// The class of DSI packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketClass {
    ShortWrite,
    LongWrite,
    ReadRequest,
}

/// Classify the data type of DSI packet.
pub fn classify(data_type: u8) -> Result<PacketClass, Error> {
    match data_type {
        GENERIC_READ_REQUEST_0_PARAM
        | GENERIC_READ_REQUEST_1_PARAM
        | GENERIC_READ_REQUEST_2_PARAM
        | DCS_READ => Ok(PacketClass::ReadRequest),
        GENERIC_SHORT_WRITE_0_PARAM
        | GENERIC_SHORT_WRITE_1_PARAM
        | GENERIC_SHORT_WRITE_2_PARAM
        | DCS_SHORT_WRITE
        | DCS_SHORT_WRITE_PARAM
        | SET_MAXIMUM_RETURN_PACKET_SIZE => Ok(PacketClass::ShortWrite),
        GENERIC_LONG_WRITE | DCS_LONG_WRITE => Ok(PacketClass::LongWrite),
        _ => {
            let msg = format!("Unsupported data type of DSI packet: 0x{:02x}", data_type);
            Err(protocol_error(ProtocolError::UnknownOperation, &msg))
        }
    }
}

// MEMO: The header of command forwarded to panel:
//
// bits 0-7:    data type
// bits 8-15:   the first parameter, or the lower byte of length for long packet
// bits 16-23:  the second parameter, or the upper byte of length for long packet
// bit 24:      write flag
// bit 25:      low power flag
// bit 26:      long packet flag
/// The header of command forwarded to panel.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct MipiTxHeader {
    pub data_type: u8,
    pub params: [u8; 2],
    pub write: bool,
    pub low_power: bool,
    pub long: bool,
}

impl MipiTxHeader {
    /// Build header for the DSI packet with the content.
    pub fn new(data_type: u8, link_state: LinkState, content: &[u8]) -> Result<Self, Error> {
        let class = classify(data_type)?;

        let mut header = MipiTxHeader {
            data_type,
            params: [0; 2],
            write: class != PacketClass::ReadRequest,
            low_power: link_state == LinkState::LowPower,
            long: class == PacketClass::LongWrite,
        };

        if header.long {
            if content.len() > u16::MAX as usize {
                let msg = format!("Too large payload for long packet: {}", content.len());
                Err(protocol_error(ProtocolError::ExceedPacketLength, &msg))?;
            }
            header.params[0] = (content.len() & 0xff) as u8;
            header.params[1] = ((content.len() >> 8) & 0xff) as u8;
        } else {
            if content.len() > 2 {
                let msg = format!("Too many parameters for short packet: {}", content.len());
                Err(protocol_error(ProtocolError::ExceedPacketLength, &msg))?;
            }
            header.params[..content.len()].copy_from_slice(content);
        }

        Ok(header)
    }

    pub fn build(&self) -> u32 {
        let mut val = 0;
        val = set_bits(val, 8, 0, self.data_type as u32);
        val = set_bits(val, 8, 8, self.params[0] as u32);
        val = set_bits(val, 8, 16, self.params[1] as u32);
        val = set_bits(val, 1, 24, self.write as u32);
        val = set_bits(val, 1, 25, self.low_power as u32);
        val = set_bits(val, 1, 26, self.long as u32);
        val
    }

    pub fn parse(val: u32) -> Self {
        MipiTxHeader {
            data_type: bits(val, 8, 0) as u8,
            params: [bits(val, 8, 8) as u8, bits(val, 8, 16) as u8],
            write: bits(val, 1, 24) > 0,
            low_power: bits(val, 1, 25) > 0,
            long: bits(val, 1, 26) > 0,
        }
    }
}

/// The header of response returned by panel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// The tag of response.
    pub tag: u8,
    /// The offset of data in the first word.
    pub offset: usize,
    /// The length of data.
    pub length: usize,
}

impl ResponseHeader {
    /// Decode the first word of response.
    pub fn parse(word: u32) -> Result<Self, Error> {
        let mut raw = [0u8; 4];
        serialize_u32(&word, &mut raw);

        let tag = raw[0];
        let (offset, length) = match tag {
            RESPONSE_ACK_ERROR_REPORT => {
                let msg = format!("Panel reports error: 0x{:04x}", bits(word, 16, 8));
                Err(protocol_error(ProtocolError::AckError, &msg))?
            }
            RESPONSE_GENERIC_SHORT_1_BYTE | RESPONSE_DCS_SHORT_1_BYTE => (1, 1),
            RESPONSE_GENERIC_SHORT_2_BYTE | RESPONSE_DCS_SHORT_2_BYTE => (1, 2),
            RESPONSE_GENERIC_LONG | RESPONSE_DCS_LONG => (4, raw[1] as usize),
            _ => {
                let msg = format!("Unknown tag of response: 0x{:02x}", tag);
                Err(protocol_error(ProtocolError::UnknownResponse, &msg))?
            }
        };

        if length == 0 {
            let msg = format!("Response without data: 0x{:02x}", tag);
            Err(protocol_error(ProtocolError::NegativeLength, &msg))?;
        }

        Ok(ResponseHeader {
            tag,
            offset,
            length,
        })
    }

    pub fn is_long(&self) -> bool {
        self.offset == 4
    }

    /// The number of words to read from data register after the first word.
    pub fn additional_words(&self) -> usize {
        if self.is_long() {
            (self.length + 3) / 4
        } else {
            0
        }
    }

    /// Collect data from the first word and additional words.
    pub fn collect(&self, first: u32, additional: &[u32]) -> Vec<u8> {
        let mut raw = vec![0u8; 4 * (1 + additional.len())];
        serialize_u32(&first, &mut raw[..4]);
        additional.iter().enumerate().for_each(|(i, word)| {
            let pos = 4 * (1 + i);
            serialize_u32(word, &mut raw[pos..(pos + 4)]);
        });

        let end = std::cmp::min(self.offset + self.length, raw.len());
        raw[self.offset..end].to_vec()
    }
}
