// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Timing of panel and classification of its switch.
//!
//! The module includes structure, enumeration, and functions for the table of panel timings and
//! the classification of switch between them.

use {
    super::{repository::*, *},
    std::time::Duration,
};

/// The timing of video output to panel.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimingDescriptor {
    pub width: u32,
    pub height: u32,
    /// In frames per second.
    pub refresh_rate: u32,
    /// In Hz.
    pub pixel_clock: u64,
    /// The time to transfer one frame.
    pub transfer_time: Duration,
}

impl TimingDescriptor {
    const DEFAULT_REFRESH_RATE: u32 = 60;

    pub fn same_resolution(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn same_refresh_rate(&self, other: &Self) -> bool {
        self.refresh_rate == other.refresh_rate
    }

    pub fn same_pixel_clock(&self, other: &Self) -> bool {
        self.pixel_clock == other.pixel_clock
    }

    /// Whether the timing is requested for the entry in table.
    pub fn matches(&self, other: &Self) -> bool {
        self.same_resolution(other) && self.same_refresh_rate(other)
    }

    /// The interval of frame in milliseconds, rounded up.
    pub fn frame_interval_ms(&self) -> u32 {
        let rate = if self.refresh_rate > 0 {
            self.refresh_rate
        } else {
            Self::DEFAULT_REFRESH_RATE
        };
        1000 / rate + 1
    }
}

/// The entry of timing table.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimingEntry {
    pub timing: TimingDescriptor,
    /// `CmdListId::NONE` for the timing of which co-processor does not process video.
    pub cmd_list: CmdListId,
}

/// The error to switch timing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimingError {
    /// The requested timing is not in table.
    TimingNotFound,
    Invalid(i32),
}

impl std::fmt::Display for TimingError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            TimingError::TimingNotFound => "timing-not-found",
            TimingError::Invalid(_) => "invalid",
        };

        write!(f, "TimingError::{}", msg)
    }
}

impl ErrorDomain for TimingError {
    fn domain() -> Quark {
        Quark::from_str("iris-timing-error-quark")
    }

    fn code(self) -> i32 {
        match self {
            TimingError::TimingNotFound => 0,
            TimingError::Invalid(v) => v,
        }
    }

    fn from(code: i32) -> Option<Self> {
        let enumeration = match code {
            0 => TimingError::TimingNotFound,
            _ => TimingError::Invalid(code),
        };
        Some(enumeration)
    }
}

/// The table of timings, fixed after configuration.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct TimingTable(Vec<TimingEntry>);

impl TimingTable {
    pub fn new(entries: Vec<TimingEntry>) -> Self {
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TimingEntry> {
        self.0.get(index)
    }

    /// Find the index of entry by exact match of resolution and refresh rate.
    pub fn lookup(&self, requested: &TimingDescriptor) -> Result<usize, Error> {
        self.0
            .iter()
            .position(|entry| entry.timing.matches(requested))
            .ok_or_else(|| {
                let msg = format!(
                    "Timing not found: {}x{}@{}",
                    requested.width, requested.height, requested.refresh_rate
                );
                Error::new(TimingError::TimingNotFound, &msg)
            })
    }

    /// Whether the co-processor does not process video for the timing.
    pub fn is_bypass_only(&self, index: usize) -> bool {
        self.0
            .get(index)
            .map(|entry| entry.cmd_list.is_none())
            .unwrap_or(false)
    }
}

/// The case of timing switch against operating state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SwitchCase {
    BypassToBypass,
    BypassToPassThrough,
    PassThroughToBypass,
    PassThroughToPassThrough,
}

/// Classify timing switch.
///
/// The co-processor in analog bypass enters pass-through only when the bypass is forced by the
/// former timing without cmd-list.
pub fn classify_switch(
    mode: ModeState,
    current_bypass_only: bool,
    new_bypass_only: bool,
) -> SwitchCase {
    let pass_through = match mode {
        ModeState::PassThrough | ModeState::TransitioningToPassThrough => true,
        ModeState::AnalogBypass | ModeState::TransitioningToBypass => false,
    };

    match (pass_through, new_bypass_only) {
        (true, true) => SwitchCase::PassThroughToBypass,
        (true, false) => SwitchCase::PassThroughToPassThrough,
        (false, true) => SwitchCase::BypassToBypass,
        (false, false) => {
            if current_bypass_only {
                SwitchCase::BypassToPassThrough
            } else {
                SwitchCase::BypassToBypass
            }
        }
    }
}

/// The change between timings in pass-through mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimingChange {
    Unchanged,
    Resolution,
    FrameRate,
    FrameRateWithClock,
}

/// Classify the change from the last timing in pass-through mode.
pub fn classify_change(last: &TimingDescriptor, new: &TimingDescriptor) -> TimingChange {
    if !new.same_resolution(last) {
        TimingChange::Resolution
    } else if !new.same_refresh_rate(last) {
        if new.same_pixel_clock(last) {
            TimingChange::FrameRate
        } else {
            TimingChange::FrameRateWithClock
        }
    } else {
        TimingChange::Unchanged
    }
}

/// The sequences replayed for timing switch in one cmd-list.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SwitchSequences {
    pub resolution: ControlSequence,
    pub frame_rate: ControlSequence,
    /// Optional. The sequence for frame rate is used when not configured.
    pub frame_rate_with_clock: Option<ControlSequence>,
}

impl SwitchSequences {
    /// Select the sequence for the change.
    pub fn select(&self, change: TimingChange, clock_aware: bool) -> Option<&ControlSequence> {
        match change {
            TimingChange::Unchanged => None,
            TimingChange::Resolution => Some(&self.resolution),
            TimingChange::FrameRate => Some(&self.frame_rate),
            TimingChange::FrameRateWithClock => {
                if clock_aware {
                    self.frame_rate_with_clock
                        .as_ref()
                        .or(Some(&self.frame_rate))
                } else {
                    Some(&self.frame_rate)
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn timing(width: u32, height: u32, refresh_rate: u32, pixel_clock: u64) -> TimingDescriptor {
        TimingDescriptor {
            width,
            height,
            refresh_rate,
            pixel_clock,
            transfer_time: Duration::from_micros(8000),
        }
    }

    fn table() -> TimingTable {
        TimingTable::new(vec![
            TimingEntry {
                timing: timing(1920, 1080, 60, 150_000_000),
                cmd_list: CmdListId(0),
            },
            TimingEntry {
                timing: timing(1920, 1080, 120, 150_000_000),
                cmd_list: CmdListId(0),
            },
            TimingEntry {
                timing: timing(2560, 1440, 60, 250_000_000),
                cmd_list: CmdListId(1),
            },
            TimingEntry {
                timing: timing(1280, 720, 30, 75_000_000),
                cmd_list: CmdListId::NONE,
            },
        ])
    }

    #[test]
    fn lookup_exact_match() {
        let table = table();
        assert_eq!(table.lookup(&timing(1920, 1080, 120, 0)).unwrap(), 1);
        assert_eq!(table.lookup(&timing(2560, 1440, 60, 0)).unwrap(), 2);

        let err = table.lookup(&timing(1920, 1080, 90, 0)).unwrap_err();
        assert_eq!(err.kind::<TimingError>(), Some(TimingError::TimingNotFound));
        let err = table.lookup(&timing(1080, 1920, 60, 0)).unwrap_err();
        assert_eq!(err.kind::<TimingError>(), Some(TimingError::TimingNotFound));
    }

    #[test]
    fn bypass_only_timing() {
        let table = table();
        assert!(!table.is_bypass_only(0));
        assert!(table.is_bypass_only(3));
        assert!(!table.is_bypass_only(10));
    }

    #[test]
    fn switch_case() {
        assert_eq!(
            classify_switch(ModeState::PassThrough, false, false),
            SwitchCase::PassThroughToPassThrough
        );
        assert_eq!(
            classify_switch(ModeState::PassThrough, false, true),
            SwitchCase::PassThroughToBypass
        );
        assert_eq!(
            classify_switch(ModeState::AnalogBypass, true, false),
            SwitchCase::BypassToPassThrough
        );
        assert_eq!(
            classify_switch(ModeState::AnalogBypass, false, false),
            SwitchCase::BypassToBypass
        );
        assert_eq!(
            classify_switch(ModeState::AnalogBypass, true, true),
            SwitchCase::BypassToBypass
        );
    }

    #[test]
    fn timing_change() {
        let table = table();
        let t0 = table.get(0).unwrap().timing;
        let t1 = table.get(1).unwrap().timing;
        let t2 = table.get(2).unwrap().timing;

        assert_eq!(classify_change(&t0, &t0), TimingChange::Unchanged);
        assert_eq!(classify_change(&t0, &t1), TimingChange::FrameRate);
        assert_eq!(classify_change(&t1, &t2), TimingChange::Resolution);

        let t3 = timing(1920, 1080, 90, 200_000_000);
        assert_eq!(classify_change(&t0, &t3), TimingChange::FrameRateWithClock);
    }

    #[test]
    fn sequence_selection() {
        let entry = ControlEntry {
            block: HardwareBlock::Dtg,
            opt_id: 0,
            chain: false,
        };
        let mut seqs = SwitchSequences {
            resolution: ControlSequence(vec![entry; 3]),
            frame_rate: ControlSequence(vec![entry; 1]),
            frame_rate_with_clock: None,
        };

        assert_eq!(seqs.select(TimingChange::Unchanged, true), None);
        assert_eq!(seqs.select(TimingChange::Resolution, false).unwrap().len(), 3);
        assert_eq!(seqs.select(TimingChange::FrameRateWithClock, true).unwrap().len(), 1);

        seqs.frame_rate_with_clock = Some(ControlSequence(vec![entry; 2]));
        assert_eq!(seqs.select(TimingChange::FrameRateWithClock, true).unwrap().len(), 2);
        assert_eq!(seqs.select(TimingChange::FrameRateWithClock, false).unwrap().len(), 1);
        assert_eq!(seqs.select(TimingChange::FrameRate, true).unwrap().len(), 1);
    }

    #[test]
    fn frame_interval() {
        assert_eq!(timing(0, 0, 60, 0).frame_interval_ms(), 17);
        assert_eq!(timing(0, 0, 120, 0).frame_interval_ms(), 9);
        assert_eq!(timing(0, 0, 0, 0).frame_interval_ms(), 17);
    }
}
