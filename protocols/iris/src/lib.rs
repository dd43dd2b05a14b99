// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Protocols for Iris display co-processors.
//!
//! The crate includes structure, enumeration, and trait to operate Iris display co-processors
//! which sit between the display controller of host SoC and MIPI-DSI panel. The co-processor
//! accepts its own register access protocol (OCP) carried in MIPI-DSI generic packets or I2C
//! transactions.
//!
//! The crate has no I/O. The runtime executes the frames and commands built here through
//! injected transport.

pub mod chip;
pub mod dsi;
pub mod ocp;
pub mod repository;
pub mod timing;

use glib::{error::ErrorDomain, Error, Quark};

/// Extract `width` bits from `val` at bit `offset`.
pub fn bits(val: u32, width: u32, offset: u32) -> u32 {
    if width == 0 || offset >= 32 {
        0
    } else if width >= 32 - offset {
        val >> offset
    } else {
        (val >> offset) & ((1 << width) - 1)
    }
}

/// Replace `width` bits of `val` at bit `offset` with the low bits of `field`.
pub fn set_bits(val: u32, width: u32, offset: u32, field: u32) -> u32 {
    if width == 0 || offset >= 32 {
        val
    } else {
        let mask = if width >= 32 - offset {
            u32::MAX << offset
        } else {
            ((1 << width) - 1) << offset
        };
        (val & !mask) | ((field << offset) & mask)
    }
}

// The co-processor is little-endian in every numeric field.
fn serialize_u32(val: &u32, raw: &mut [u8]) {
    assert!(raw.len() >= 4);

    raw[..4].copy_from_slice(&val.to_le_bytes())
}

fn deserialize_u32(val: &mut u32, raw: &[u8]) {
    assert!(raw.len() >= 4);

    let mut quadlet = [0; 4];
    quadlet.copy_from_slice(&raw[..4]);
    *val = u32::from_le_bytes(quadlet);
}

/// The state of link when transferring command.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LinkState {
    /// Low power mode.
    LowPower,
    /// High speed mode.
    HighSpeed,
}

impl Default for LinkState {
    fn default() -> Self {
        Self::HighSpeed
    }
}

/// The operating state of co-processor.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ModeState {
    /// The co-processor processes video.
    PassThrough,
    /// The co-processor is transparent between host and panel.
    AnalogBypass,
    TransitioningToBypass,
    TransitioningToPassThrough,
}

impl Default for ModeState {
    fn default() -> Self {
        Self::AnalogBypass
    }
}

impl ModeState {
    pub fn is_transitioning(&self) -> bool {
        match self {
            Self::TransitioningToBypass | Self::TransitioningToPassThrough => true,
            _ => false,
        }
    }
}

/// Capabilities of co-processor, decoded once from configuration.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChipCapabilities(pub u32);

impl ChipCapabilities {
    const INBAND_MODE_SWITCH_SHIFT: u32 = 4;

    fn flag(&self, shift: u32) -> bool {
        bits(self.0, 1, shift) > 0
    }

    fn with_flag(self, shift: u32, enable: bool) -> Self {
        Self(set_bits(self.0, 1, shift, enable as u32))
    }

    /// Mode switch is operated by in-band register writes instead of one-wire pulses.
    pub fn inband_mode_switch(&self) -> bool {
        self.flag(Self::INBAND_MODE_SWITCH_SHIFT)
    }

    pub fn with_inband_mode_switch(self, enable: bool) -> Self {
        self.with_flag(Self::INBAND_MODE_SWITCH_SHIFT, enable)
    }
}

/// The error to violate the framing rules of protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The encoded frame exceeds split size.
    ExceedSplitSize,
    /// The kind of operation is not known.
    UnknownOperation,
    /// The length of read is negative or zero.
    NegativeLength,
    /// The peer reports error by acknowledge.
    AckError,
    /// The tag of response is not known.
    UnknownResponse,
    /// The frame is shorter than its header or not aligned to quadlet.
    Truncated,
    /// The length of data to read from panel is out of range.
    ExceedReadLength,
    /// The content does not fit in the fields of packet.
    ExceedPacketLength,
    Invalid(i32),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            ProtocolError::ExceedSplitSize => "exceed-split-size",
            ProtocolError::UnknownOperation => "unknown-operation",
            ProtocolError::NegativeLength => "negative-length",
            ProtocolError::AckError => "ack-error",
            ProtocolError::UnknownResponse => "unknown-response",
            ProtocolError::Truncated => "truncated",
            ProtocolError::ExceedReadLength => "exceed-read-length",
            ProtocolError::ExceedPacketLength => "exceed-packet-length",
            ProtocolError::Invalid(_) => "invalid",
        };

        write!(f, "ProtocolError::{}", msg)
    }
}

impl ErrorDomain for ProtocolError {
    fn domain() -> Quark {
        Quark::from_str("iris-ocp-protocol-error-quark")
    }

    fn code(self) -> i32 {
        match self {
            ProtocolError::ExceedSplitSize => 0,
            ProtocolError::UnknownOperation => 1,
            ProtocolError::NegativeLength => 2,
            ProtocolError::AckError => 3,
            ProtocolError::UnknownResponse => 4,
            ProtocolError::Truncated => 5,
            ProtocolError::ExceedReadLength => 6,
            ProtocolError::ExceedPacketLength => 7,
            ProtocolError::Invalid(v) => v,
        }
    }

    fn from(code: i32) -> Option<Self> {
        let enumeration = match code {
            0 => ProtocolError::ExceedSplitSize,
            1 => ProtocolError::UnknownOperation,
            2 => ProtocolError::NegativeLength,
            3 => ProtocolError::AckError,
            4 => ProtocolError::UnknownResponse,
            5 => ProtocolError::Truncated,
            6 => ProtocolError::ExceedReadLength,
            7 => ProtocolError::ExceedPacketLength,
            _ => ProtocolError::Invalid(code),
        };
        Some(enumeration)
    }
}

/// The error in transaction with co-processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the budget of poll.
    NoResponse,
    /// The co-processor reports error in status.
    ErrorFlagSet,
    /// The response includes no data.
    ShortFrame,
    Invalid(i32),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            TransportError::NoResponse => "no-response",
            TransportError::ErrorFlagSet => "error-flag-set",
            TransportError::ShortFrame => "short-frame",
            TransportError::Invalid(_) => "invalid",
        };

        write!(f, "TransportError::{}", msg)
    }
}

impl ErrorDomain for TransportError {
    fn domain() -> Quark {
        Quark::from_str("iris-transport-error-quark")
    }

    fn code(self) -> i32 {
        match self {
            TransportError::NoResponse => 0,
            TransportError::ErrorFlagSet => 1,
            TransportError::ShortFrame => 2,
            TransportError::Invalid(v) => v,
        }
    }

    fn from(code: i32) -> Option<Self> {
        let enumeration = match code {
            0 => TransportError::NoResponse,
            1 => TransportError::ErrorFlagSet,
            2 => TransportError::ShortFrame,
            _ => TransportError::Invalid(code),
        };
        Some(enumeration)
    }
}

/// The error in switch of operating state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModeSwitchError {
    /// The co-processor does not reach the state after retries.
    TransitionFailed,
    /// The transition is aborted by request.
    Cancelled,
    /// The transition is not allowed in current condition.
    Rejected,
    Invalid(i32),
}

impl std::fmt::Display for ModeSwitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            ModeSwitchError::TransitionFailed => "transition-failed",
            ModeSwitchError::Cancelled => "cancelled",
            ModeSwitchError::Rejected => "rejected",
            ModeSwitchError::Invalid(_) => "invalid",
        };

        write!(f, "ModeSwitchError::{}", msg)
    }
}

impl ErrorDomain for ModeSwitchError {
    fn domain() -> Quark {
        Quark::from_str("iris-mode-switch-error-quark")
    }

    fn code(self) -> i32 {
        match self {
            ModeSwitchError::TransitionFailed => 0,
            ModeSwitchError::Cancelled => 1,
            ModeSwitchError::Rejected => 2,
            ModeSwitchError::Invalid(v) => v,
        }
    }

    fn from(code: i32) -> Option<Self> {
        let enumeration = match code {
            0 => ModeSwitchError::TransitionFailed,
            1 => ModeSwitchError::Cancelled,
            2 => ModeSwitchError::Rejected,
            _ => ModeSwitchError::Invalid(code),
        };
        Some(enumeration)
    }
}

fn protocol_error(cause: ProtocolError, msg: &str) -> Error {
    Error::new(cause, msg)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bits_extraction() {
        assert_eq!(bits(0x12345678, 8, 0), 0x78);
        assert_eq!(bits(0x12345678, 8, 24), 0x12);
        assert_eq!(bits(0x12345678, 4, 4), 0x7);
        assert_eq!(bits(0x80000000, 1, 31), 1);
        assert_eq!(bits(0xffffffff, 32, 0), 0xffffffff);
        assert_eq!(bits(0xffffffff, 40, 8), 0x00ffffff);
        assert_eq!(bits(0xffffffff, 0, 8), 0);
        assert_eq!(bits(0xffffffff, 8, 32), 0);
    }

    #[test]
    fn bits_replacement() {
        assert_eq!(set_bits(0x12345678, 8, 0, 0xab), 0x123456ab);
        assert_eq!(set_bits(0x12345678, 4, 28, 0xf), 0xf2345678);
        assert_eq!(set_bits(0, 1, 31, 1), 0x80000000);
        assert_eq!(set_bits(0xffffffff, 32, 0, 0), 0);
        assert_eq!(set_bits(0x0000f000, 4, 8, 0x1ff), 0x0000ff00);
        assert_eq!(bits(set_bits(0, 3, 5, 0x5), 3, 5), 0x5);
    }

    #[test]
    fn capability_flags() {
        let caps = ChipCapabilities(0x0000000f);
        assert!(!caps.inband_mode_switch());

        let caps = caps.with_inband_mode_switch(true);
        assert_eq!(caps.0, 0x0000001f);
        assert!(caps.inband_mode_switch());

        let caps = caps.with_inband_mode_switch(false);
        assert_eq!(caps.0, 0x0000000f);
    }

    #[test]
    fn error_domain_codes() {
        let err = Error::new(TransportError::ErrorFlagSet, "status");
        assert_eq!(err.kind::<TransportError>(), Some(TransportError::ErrorFlagSet));
        assert_eq!(err.kind::<ModeSwitchError>(), None);

        assert_eq!(
            <ModeSwitchError as ErrorDomain>::from(1),
            Some(ModeSwitchError::Cancelled)
        );
        assert_eq!(
            <ProtocolError as ErrorDomain>::from(100),
            Some(ProtocolError::Invalid(100))
        );
        assert_eq!(ProtocolError::Truncated.code(), 5);
        assert_eq!(
            <ProtocolError as ErrorDomain>::from(6),
            Some(ProtocolError::ExceedReadLength)
        );
        assert_eq!(ProtocolError::ExceedPacketLength.code(), 7);
    }

    #[test]
    fn mode_state_transitioning() {
        assert_eq!(ModeState::default(), ModeState::AnalogBypass);
        assert!(ModeState::TransitioningToBypass.is_transitioning());
        assert!(!ModeState::PassThrough.is_transitioning());
    }

    #[test]
    fn little_endian_serdes() {
        let mut raw = [0u8; 4];
        serialize_u32(&0x01020304, &mut raw);
        assert_eq!(raw, [0x04, 0x03, 0x02, 0x01]);

        let mut val = 0;
        deserialize_u32(&mut val, &raw);
        assert_eq!(val, 0x01020304);
    }
}
