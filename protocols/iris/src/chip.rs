// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Generation-specific parameters of co-processor.
//!
//! The module includes enumeration and trait for the parameters which differ between generations
//! of co-processor, such as location of registers, error mask in read status, and identifiers of
//! option used for mode switch.

use super::{repository::HardwareBlock, *};

/// Location of registers used by the protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    /// The register to read packet data returned by panel.
    pub rd_packet_data: u32,
    /// The raw interrupt status of MIPI TX.
    pub tx_intstat_raw: u32,
    /// The register to clear interrupt status of MIPI TX.
    pub tx_intclr: u32,
    /// The register for header of command forwarded to panel.
    pub mipi_tx_header: u32,
    /// The register for payload of command forwarded to panel.
    pub mipi_tx_payload: u32,
    /// The register to read status of the co-processor by I2C.
    pub status: u32,
}

/// Identifiers of options in system block used for mode switch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ModeSwitchOptions {
    /// Enter analog bypass by register write.
    pub enter_bypass: u8,
    /// Exit analog bypass by register write.
    pub exit_bypass: u8,
    /// Control of analog bypass.
    pub bypass_ctrl: u8,
    /// Default settings of DMA, restored before exit of analog bypass.
    pub dma_ctrl: u8,
}

/// The flag in raw interrupt status of MIPI TX to express that response of panel arrives.
pub const RESPONSE_RECEIVED_FLAG: u32 = 0x80000000;

/// Operations which differ between generations of co-processor.
pub trait ChipOps {
    /// The name of generation.
    fn name(&self) -> &'static str;

    /// Location of registers.
    fn register_map(&self) -> RegisterMap;

    /// The mask over raw interrupt status of MIPI TX to detect error in read operation.
    fn tx_read_error_mask(&self) -> u32 {
        0x6feffeff
    }

    /// The maximum length of one frame in bytes, including OCP header.
    fn default_split_size(&self) -> usize {
        256
    }

    /// Identifiers of options in system block for mode switch.
    fn mode_switch_options(&self) -> ModeSwitchOptions;

    /// Whether the sequence of frame rate switch aware of pixel clock is available.
    fn supports_fps_clock_switch(&self) -> bool {
        false
    }

    /// Normalize the data type of DSI command before forwarding it to panel.
    fn normalize_data_type(&self, data_type: u8) -> u8 {
        data_type
    }

    /// The block which stores look-up tables of the generation.
    fn lut_block(&self, lut: u8) -> HardwareBlock {
        HardwareBlock::Lut(lut)
    }
}

/// The first generation supported, with one-wire mode switch.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Iris5;

impl ChipOps for Iris5 {
    fn name(&self) -> &'static str {
        "iris5"
    }

    fn register_map(&self) -> RegisterMap {
        RegisterMap {
            rd_packet_data: 0xf0c1c018,
            tx_intstat_raw: 0xf0c1c03c,
            tx_intclr: 0xf0c1c040,
            mipi_tx_header: 0xf0c1c010,
            mipi_tx_payload: 0xf0c1c014,
            status: 0xf0000008,
        }
    }

    fn mode_switch_options(&self) -> ModeSwitchOptions {
        ModeSwitchOptions {
            enter_bypass: 0xd0,
            exit_bypass: 0xd1,
            bypass_ctrl: 0xd2,
            dma_ctrl: 0xe2,
        }
    }
}

/// The generation with dual pipe.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Iris7;

impl ChipOps for Iris7 {
    fn name(&self) -> &'static str {
        "iris7"
    }

    fn register_map(&self) -> RegisterMap {
        RegisterMap {
            rd_packet_data: 0xf1a0c018,
            tx_intstat_raw: 0xf1a0c03c,
            tx_intclr: 0xf1a0c040,
            mipi_tx_header: 0xf1a0c010,
            mipi_tx_payload: 0xf1a0c014,
            status: 0xf0000008,
        }
    }

    fn mode_switch_options(&self) -> ModeSwitchOptions {
        ModeSwitchOptions {
            enter_bypass: 0x68,
            exit_bypass: 0x69,
            bypass_ctrl: 0x6a,
            dma_ctrl: 0xe2,
        }
    }
}

/// The revised generation of Iris7.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Iris7p;

impl ChipOps for Iris7p {
    fn name(&self) -> &'static str {
        "iris7p"
    }

    fn register_map(&self) -> RegisterMap {
        RegisterMap {
            rd_packet_data: 0xf1a4c018,
            tx_intstat_raw: 0xf1a4c03c,
            tx_intclr: 0xf1a4c040,
            mipi_tx_header: 0xf1a4c010,
            mipi_tx_payload: 0xf1a4c014,
            status: 0xf0000008,
        }
    }

    fn mode_switch_options(&self) -> ModeSwitchOptions {
        ModeSwitchOptions {
            enter_bypass: 0x68,
            exit_bypass: 0x69,
            bypass_ctrl: 0x6a,
            dma_ctrl: 0xe3,
        }
    }

    fn supports_fps_clock_switch(&self) -> bool {
        true
    }

    fn normalize_data_type(&self, data_type: u8) -> u8 {
        data_type & 0x3f
    }

    fn lut_block(&self, lut: u8) -> HardwareBlock {
        // The look-up tables are relocated by 0x10 against the former generations.
        HardwareBlock::Lut(lut.wrapping_add(0x10))
    }
}

/// The latest generation.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Iris8;

impl ChipOps for Iris8 {
    fn name(&self) -> &'static str {
        "iris8"
    }

    fn register_map(&self) -> RegisterMap {
        RegisterMap {
            rd_packet_data: 0xf1a4c018,
            tx_intstat_raw: 0xf1a4c03c,
            tx_intclr: 0xf1a4c040,
            mipi_tx_header: 0xf1a4c010,
            mipi_tx_payload: 0xf1a4c014,
            status: 0xf000000c,
        }
    }

    fn tx_read_error_mask(&self) -> u32 {
        0x4feffeff
    }

    fn mode_switch_options(&self) -> ModeSwitchOptions {
        ModeSwitchOptions {
            enter_bypass: 0x78,
            exit_bypass: 0x79,
            bypass_ctrl: 0x7a,
            dma_ctrl: 0xe3,
        }
    }

    fn supports_fps_clock_switch(&self) -> bool {
        true
    }

    fn normalize_data_type(&self, data_type: u8) -> u8 {
        data_type & 0x3f
    }

    fn lut_block(&self, lut: u8) -> HardwareBlock {
        HardwareBlock::Lut(lut.wrapping_add(0x10))
    }
}

/// Generation of co-processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChipVariant {
    Iris5,
    Iris7,
    Iris7p,
    Iris8,
}

impl Default for ChipVariant {
    fn default() -> Self {
        Self::Iris7p
    }
}

impl ChipVariant {
    fn ops(&self) -> &'static dyn ChipOps {
        match self {
            Self::Iris5 => &Iris5,
            Self::Iris7 => &Iris7,
            Self::Iris7p => &Iris7p,
            Self::Iris8 => &Iris8,
        }
    }
}

impl ChipOps for ChipVariant {
    fn name(&self) -> &'static str {
        self.ops().name()
    }

    fn register_map(&self) -> RegisterMap {
        self.ops().register_map()
    }

    fn tx_read_error_mask(&self) -> u32 {
        self.ops().tx_read_error_mask()
    }

    fn default_split_size(&self) -> usize {
        self.ops().default_split_size()
    }

    fn mode_switch_options(&self) -> ModeSwitchOptions {
        self.ops().mode_switch_options()
    }

    fn supports_fps_clock_switch(&self) -> bool {
        self.ops().supports_fps_clock_switch()
    }

    fn normalize_data_type(&self, data_type: u8) -> u8 {
        self.ops().normalize_data_type(data_type)
    }

    fn lut_block(&self, lut: u8) -> HardwareBlock {
        self.ops().lut_block(lut)
    }
}
