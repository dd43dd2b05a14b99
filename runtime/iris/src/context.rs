// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    iris_protocols::{chip::*, timing::TimingDescriptor, ChipCapabilities},
    std::time::Duration,
};

/// The path to read registers of co-processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadPath {
    Dsi,
    I2c,
}

impl Default for ReadPath {
    fn default() -> Self {
        Self::Dsi
    }
}

/// The path to write registers of co-processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WritePath {
    Dsi,
    /// The frames are decoded and written register by register.
    I2c,
}

impl Default for WritePath {
    fn default() -> Self {
        Self::Dsi
    }
}

/// The path to signal mode switch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModeSwitchPath {
    OneWire,
    InBand,
}

/// The state of co-processor in analog bypass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BypassPowerMode {
    Standby,
    /// The system of co-processor is additionally powered down.
    Sleep,
}

impl Default for BypassPowerMode {
    fn default() -> Self {
        Self::Standby
    }
}

/// The bounds of retries in mode switch and register read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub ready_poll_count: usize,
    pub ready_poll_interval: Duration,
    pub outer_retry_count: usize,
    pub read_poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ready_poll_count: 50,
            ready_poll_interval: Duration::from_millis(3),
            outer_retry_count: 5,
            read_poll_interval: Duration::from_millis(1),
        }
    }
}

/// The context of co-processor, fixed at configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipContext {
    pub variant: ChipVariant,
    pub capabilities: ChipCapabilities,
    pub split_size: usize,
    pub read_path: ReadPath,
    pub write_path: WritePath,
    pub bypass_power_mode: BypassPowerMode,
    pub retry: RetryPolicy,
    /// The refresh rate of panel used for the budget of read poll. Zero means 60.
    pub refresh_rate: u32,
    /// The virtual channel of DSI.
    pub channel: u8,
    /// Suspend the retry loop of mode switch at failure, for diagnosis in field.
    pub debug_hold: bool,
    /// The delay after powering up system of co-processor.
    pub power_up_settle: Duration,
    /// The additional delay to leave sleep.
    pub sleep_settle: Duration,
}

impl Default for ChipContext {
    fn default() -> Self {
        let variant = ChipVariant::default();
        Self {
            variant,
            capabilities: Default::default(),
            split_size: variant.default_split_size(),
            read_path: Default::default(),
            write_path: Default::default(),
            bypass_power_mode: Default::default(),
            retry: Default::default(),
            refresh_rate: 60,
            channel: 0,
            debug_hold: false,
            power_up_settle: Duration::from_millis(2),
            sleep_settle: Duration::from_millis(20),
        }
    }
}

impl ChipContext {
    pub fn with_variant(mut self, variant: ChipVariant) -> Self {
        self.variant = variant;
        self.split_size = variant.default_split_size();
        self
    }

    pub fn with_capabilities(mut self, capabilities: ChipCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_split_size(mut self, split_size: usize) -> Self {
        self.split_size = split_size;
        self
    }

    pub fn with_read_path(mut self, read_path: ReadPath) -> Self {
        self.read_path = read_path;
        self
    }

    pub fn with_write_path(mut self, write_path: WritePath) -> Self {
        self.write_path = write_path;
        self
    }

    pub fn with_bypass_power_mode(mut self, mode: BypassPowerMode) -> Self {
        self.bypass_power_mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_refresh_rate(mut self, refresh_rate: u32) -> Self {
        self.refresh_rate = refresh_rate;
        self
    }

    pub fn with_debug_hold(mut self, debug_hold: bool) -> Self {
        self.debug_hold = debug_hold;
        self
    }

    pub fn mode_switch_path(&self) -> ModeSwitchPath {
        if self.capabilities.inband_mode_switch() {
            ModeSwitchPath::InBand
        } else {
            ModeSwitchPath::OneWire
        }
    }

    /// The number of polls for the response of read, two frame intervals.
    pub fn read_poll_count(&self) -> usize {
        let timing = TimingDescriptor {
            refresh_rate: self.refresh_rate,
            ..Default::default()
        };
        2 * timing.frame_interval_ms() as usize
    }
}
