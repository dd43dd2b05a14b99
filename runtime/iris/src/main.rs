// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto
mod cancel;
mod context;
mod controller;
mod host;
mod lightup;
mod mode_switch;
mod profile;
mod sequencer;
mod simulator;
mod transport;
mod worker;

use {
    self::{cancel::*, context::*, controller::*, profile::*, simulator::*, worker::*},
    clap::{Parser, ValueEnum},
    glib::{ControlFlow, Error, FileError},
    iris_protocols::{chip::*, timing::*, ChipCapabilities, ModeState},
    nix::sys::signal::Signal,
    runtime_core::{cmdline::*, dispatcher::*, LogLevel, *},
    std::{
        io::BufRead,
        sync::mpsc,
        thread,
        time::Duration,
    },
    tracing::{debug, debug_span},
};

enum Event {
    Shutdown,
    Input(String),
    Report(Report),
}

const SYSTEM_DISPATCHER_NAME: &str = "system event dispatcher";
const INPUT_READER_NAME: &str = "request reader";

const TRANSITION_DEADLINE: Duration = Duration::from_secs(5);

struct IrisRuntime {
    // The receiver is released before the worker so that the worker never blocks at reporting.
    rx: mpsc::Receiver<Event>,
    tx: mpsc::SyncSender<Event>,
    dispatchers: Vec<Dispatcher>,
    worker: Option<Worker>,
    cancel: Cancellation,
}

impl Drop for IrisRuntime {
    fn drop(&mut self) {
        // At first, abort the transition in progress.
        self.cancel.cancel();

        // Next, stop event loop in all of dispatchers to avoid queueing new events.
        for dispatcher in &mut self.dispatchers {
            dispatcher.stop();
        }

        // Next, consume all events in queue to release blocked thread for sender.
        for _ in self.rx.try_iter() {}

        // Finally Finish I/O threads.
        self.dispatchers.clear();
    }
}

#[derive(Debug, Clone)]
struct RuntimeConfig {
    ctx: ChipContext,
    dry_run_settle_polls: usize,
}

impl RuntimeOperation<RuntimeConfig> for IrisRuntime {
    fn new(config: RuntimeConfig, log_level: Option<LogLevel>) -> Result<Self, Error> {
        if let Some(level) = log_level {
            tracing_subscriber::fmt()
                .with_max_level(level.max_level())
                .init();
        }

        let RuntimeConfig {
            ctx,
            dry_run_settle_polls,
        } = config;

        debug!(
            chip = ctx.variant.name(),
            split_size = ctx.split_size,
            read_path = ?ctx.read_path,
            mode_switch_path = ?ctx.mode_switch_path(),
            bypass_power_mode = ?ctx.bypass_power_mode,
        );

        let profile = DisplayProfile::reference(&ctx)?;

        let host = SimulatedChip::default();
        host.set_settle_polls(dry_run_settle_polls);

        let deadline = if ctx.debug_hold {
            None
        } else {
            Some(TRANSITION_DEADLINE)
        };

        let controller = DisplayController::new(host, ctx, profile);

        // Use uni-directional channel for communication to child threads. Use large number of
        // queue to avoid task blocking in the worker.
        let (tx, rx) = mpsc::sync_channel(256);

        let cancel = Cancellation::default();
        let report_tx = tx.clone();
        let worker = Worker::run(controller, cancel.clone(), deadline, move |report| {
            let _ = report_tx.send(Event::Report(report));
        })?;

        Ok(Self {
            rx,
            tx,
            dispatchers: Default::default(),
            worker: Some(worker),
            cancel,
        })
    }

    fn listen(&mut self) -> Result<(), Error> {
        self.launch_system_event_dispatcher()?;
        self.launch_input_reader()?;
        Ok(())
    }

    fn run(&mut self) -> Result<(), Error> {
        let enter = debug_span!("event").entered();
        loop {
            let ev = match self.rx.recv() {
                Ok(ev) => ev,
                Err(_) => continue,
            };

            match ev {
                Event::Shutdown => break,
                Event::Input(line) => {
                    let _enter = debug_span!("input").entered();
                    let line = line.trim();
                    debug!(input = line);

                    if line == "quit" {
                        break;
                    } else if line.len() == 0 || line.starts_with('#') {
                        continue;
                    }

                    match line.parse::<Request>() {
                        Ok(request) => {
                            if let Some(worker) = &self.worker {
                                worker.request(request)?;
                            }
                        }
                        Err(msg) => eprintln!("{}", msg),
                    }
                }
                Event::Report(report) => {
                    let _enter = debug_span!("report").entered();
                    print_report(&report);
                }
            }
        }

        enter.exit();

        Ok(())
    }
}

impl IrisRuntime {
    fn launch_system_event_dispatcher(&mut self) -> Result<(), Error> {
        let name = SYSTEM_DISPATCHER_NAME.to_string();
        let mut dispatcher = Dispatcher::run(name)?;

        [Signal::SIGINT, Signal::SIGTERM].iter().for_each(|&signum| {
            let tx = self.tx.clone();
            let cancel = self.cancel.clone();
            dispatcher.attach_signal_handler(signum, move || {
                cancel.cancel();
                let _ = tx.send(Event::Shutdown);
                ControlFlow::Break
            });
        });

        self.dispatchers.push(dispatcher);

        Ok(())
    }

    fn launch_input_reader(&mut self) -> Result<(), Error> {
        let tx = self.tx.clone();

        // The thread is left behind at shutdown since it blocks in read from standard input.
        thread::Builder::new()
            .name(INPUT_READER_NAME.to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(Event::Input(line)).is_err() {
                                return;
                            }
                        }
                        Err(_) => break,
                    }
                }
                let _ = tx.send(Event::Shutdown);
            })
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Fail to spawn thread for {}: {}", INPUT_READER_NAME, e);
                Error::new(FileError::Failed, &msg)
            })
    }
}

fn mode_state_to_str(state: &ModeState) -> &'static str {
    match state {
        ModeState::AnalogBypass => "analog-bypass",
        ModeState::TransitioningToPassThrough => "transitioning-to-pass-through",
        ModeState::PassThrough => "pass-through",
        ModeState::TransitioningToBypass => "transitioning-to-bypass",
    }
}

fn switch_case_to_str(case: &SwitchCase) -> &'static str {
    match case {
        SwitchCase::BypassToBypass => "bypass-to-bypass",
        SwitchCase::BypassToPassThrough => "bypass-to-pass-through",
        SwitchCase::PassThroughToBypass => "pass-through-to-bypass",
        SwitchCase::PassThroughToPassThrough => "pass-through-to-pass-through",
    }
}

fn print_report(report: &Report) {
    match &report.result {
        Ok(Completion::Mode(state)) => println!("mode: {}", mode_state_to_str(state)),
        Ok(Completion::Timing(case, state)) => println!(
            "timing: {}, mode: {}",
            switch_case_to_str(case),
            mode_state_to_str(state)
        ),
        Ok(Completion::Register(addr, val)) => println!("0x{:08x}: 0x{:08x}", addr, val),
        Ok(Completion::Panel(data)) => {
            let literals: Vec<String> = data.iter().map(|b| format!("{:02x}", b)).collect();
            println!("panel: {}", literals.join(" "));
        }
        Ok(Completion::Done) => println!("done"),
        Ok(Completion::Coalesced) => println!("coalesced: {:?}", report.request),
        Err(e) => eprintln!("{:?}: {}", report.request, specific_err_to_string(e)),
    }
}

#[derive(ValueEnum, Debug, Copy, Clone, PartialEq, Eq)]
enum ChipArg {
    Iris5,
    Iris7,
    Iris7p,
    Iris8,
}

impl From<ChipArg> for ChipVariant {
    fn from(chip: ChipArg) -> Self {
        match chip {
            ChipArg::Iris5 => ChipVariant::Iris5,
            ChipArg::Iris7 => ChipVariant::Iris7,
            ChipArg::Iris7p => ChipVariant::Iris7p,
            ChipArg::Iris8 => ChipVariant::Iris8,
        }
    }
}

struct IrisServiceCmd;

#[derive(Parser)]
#[clap(name = "iris-ctl-service")]
struct Arguments {
    /// The generation of co-processor.
    #[clap(long, short, value_enum, default_value_t = ChipArg::Iris7p)]
    chip: ChipArg,

    /// The maximum length of frame in bytes, the default of generation if not given.
    #[clap(long)]
    split_size: Option<usize>,

    /// Put system of co-processor into sleep instead of standby in analog bypass.
    #[clap(long)]
    sleep_bypass: bool,

    /// Switch mode by commands in band instead of one-wire signal.
    #[clap(long)]
    inband: bool,

    /// Read registers of co-processor through I2C instead of DSI.
    #[clap(long)]
    i2c_read: bool,

    /// Write registers of co-processor through I2C instead of DSI.
    #[clap(long)]
    i2c_write: bool,

    /// The refresh rate of panel, used for the budget to poll response.
    #[clap(long, default_value_t = 60)]
    refresh_rate: u32,

    /// Suspend the transition at failure of mode switch for diagnosis.
    #[clap(long)]
    debug_hold: bool,

    /// The number of polls for the simulated ready line to settle.
    #[clap(long, default_value_t = 0)]
    settle_polls: usize,

    /// The level to debug runtime, disabled as a default.
    #[clap(long, short, value_enum)]
    log_level: Option<LogLevel>,
}

impl ServiceCmd<Arguments, RuntimeConfig, IrisRuntime> for IrisServiceCmd {
    fn params(args: &Arguments) -> (RuntimeConfig, Option<LogLevel>) {
        let capabilities = ChipCapabilities::default().with_inband_mode_switch(args.inband);

        let mut ctx = ChipContext::default()
            .with_variant(args.chip.into())
            .with_capabilities(capabilities)
            .with_refresh_rate(args.refresh_rate)
            .with_debug_hold(args.debug_hold);

        if let Some(split_size) = args.split_size {
            ctx = ctx.with_split_size(split_size);
        }
        if args.sleep_bypass {
            ctx = ctx.with_bypass_power_mode(BypassPowerMode::Sleep);
        }
        if args.i2c_read {
            ctx = ctx.with_read_path(ReadPath::I2c);
        }
        if args.i2c_write {
            ctx = ctx.with_write_path(WritePath::I2c);
        }

        let config = RuntimeConfig {
            ctx,
            dry_run_settle_polls: args.settle_polls,
        };

        (config, args.log_level)
    }
}

fn main() {
    IrisServiceCmd::run()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn context_from_arguments() {
        let args = Arguments::try_parse_from([
            "iris-ctl-service",
            "--chip",
            "iris8",
            "--sleep-bypass",
            "--inband",
            "--refresh-rate",
            "120",
        ])
        .unwrap();
        let (config, log_level) = IrisServiceCmd::params(&args);
        assert_eq!(log_level, None);
        assert_eq!(config.ctx.variant, ChipVariant::Iris8);
        assert_eq!(config.ctx.split_size, ChipVariant::Iris8.default_split_size());
        assert_eq!(config.ctx.bypass_power_mode, BypassPowerMode::Sleep);
        assert_eq!(config.ctx.mode_switch_path(), ModeSwitchPath::InBand);
        assert_eq!(config.ctx.read_path, ReadPath::Dsi);
        assert_eq!(config.ctx.write_path, WritePath::Dsi);
        assert_eq!(config.ctx.refresh_rate, 120);

        let args = Arguments::try_parse_from([
            "iris-ctl-service",
            "--split-size",
            "128",
            "--i2c-read",
            "--i2c-write",
            "--log-level",
            "debug",
        ])
        .unwrap();
        let (config, log_level) = IrisServiceCmd::params(&args);
        assert_eq!(log_level, Some(LogLevel::Debug));
        assert_eq!(config.ctx.variant, ChipVariant::Iris7p);
        assert_eq!(config.ctx.split_size, 128);
        assert_eq!(config.ctx.read_path, ReadPath::I2c);
        assert_eq!(config.ctx.write_path, WritePath::I2c);
        assert_eq!(config.ctx.mode_switch_path(), ModeSwitchPath::OneWire);

        assert!(Arguments::try_parse_from(["iris-ctl-service", "--chip", "iris6"]).is_err());
    }
}
