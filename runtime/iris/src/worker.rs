// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{cancel::*, controller::*, host::*},
    glib::{Error, FileError},
    iris_protocols::{timing::*, ModeState},
    std::{
        collections::VecDeque,
        str::FromStr,
        sync::mpsc,
        thread,
        time::Duration,
    },
    tracing::{debug, debug_span},
};

/// The request to co-processor, processed in order by worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    PassThrough,
    Bypass,
    Timing(TimingDescriptor),
    ReadRegister(u32),
    ReadPanel {
        data_type: u8,
        params: Vec<u8>,
        length: usize,
    },
    WritePanel {
        data_type: u8,
        content: Vec<u8>,
    },
    Reset,
}

impl Request {
    fn is_mode_switch(&self) -> bool {
        match self {
            Request::PassThrough | Request::Bypass => true,
            _ => false,
        }
    }
}

fn parse_hex(literal: &str) -> Result<u32, String> {
    u32::from_str_radix(literal.trim_start_matches("0x"), 16)
        .map_err(|e| format!("Invalid hexadecimal {}: {}", literal, e))
}

fn parse_dec<T: FromStr>(literal: &str) -> Result<T, String> {
    literal
        .parse::<T>()
        .map_err(|_| format!("Invalid decimal: {}", literal))
}

fn parse_bytes(literals: &[&str]) -> Result<Vec<u8>, String> {
    literals
        .iter()
        .map(|literal| parse_hex(literal).map(|val| val as u8))
        .collect()
}

impl FromStr for Request {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["pt"] => Ok(Request::PassThrough),
            ["abyp"] => Ok(Request::Bypass),
            ["reset"] => Ok(Request::Reset),
            ["timing", width, height, refresh_rate, args @ ..] => {
                let pixel_clock = match args {
                    [] => 0,
                    [clock] => parse_dec(clock)?,
                    _ => Err(format!("Too many arguments: {}", line))?,
                };
                Ok(Request::Timing(TimingDescriptor {
                    width: parse_dec(width)?,
                    height: parse_dec(height)?,
                    refresh_rate: parse_dec(refresh_rate)?,
                    pixel_clock,
                    transfer_time: Duration::default(),
                }))
            }
            ["read", addr] => parse_hex(addr).map(Request::ReadRegister),
            ["panel-read", data_type, length, params @ ..] => Ok(Request::ReadPanel {
                data_type: parse_hex(data_type)? as u8,
                params: parse_bytes(params)?,
                length: parse_dec(length)?,
            }),
            ["panel-write", data_type, content @ ..] => Ok(Request::WritePanel {
                data_type: parse_hex(data_type)? as u8,
                content: parse_bytes(content)?,
            }),
            _ => Err(format!("Unknown request: {}", line)),
        }
    }
}

/// The result of request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Mode(ModeState),
    Timing(SwitchCase, ModeState),
    Register(u32, u32),
    Panel(Vec<u8>),
    Done,
    /// Superseded by the later request to switch mode.
    Coalesced,
}

#[derive(Debug)]
pub struct Report {
    pub request: Request,
    pub result: Result<Completion, Error>,
}

enum Event {
    Shutdown,
    Request(Request),
}

/// Keep the last one of leading requests to switch mode, and return the others.
fn coalesce_mode_switches(backlog: &mut VecDeque<Event>) -> Vec<Request> {
    let count = backlog
        .iter()
        .take_while(|ev| match ev {
            Event::Request(req) => req.is_mode_switch(),
            Event::Shutdown => false,
        })
        .count();

    backlog
        .drain(..count.saturating_sub(1))
        .filter_map(|ev| match ev {
            Event::Request(req) => Some(req),
            Event::Shutdown => None,
        })
        .collect()
}

const WORKER_NAME: &str = "co-processor worker";

/// The thread to process requests with bounded queue, away from the thread of event dispatcher.
pub struct Worker {
    tx: mpsc::SyncSender<Event>,
    th: Option<thread::JoinHandle<()>>,
    cancel: Cancellation,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.tx.send(Event::Shutdown);

        if let Some(th) = self.th.take() {
            if th.join().is_err() {
                debug!("Fail to join thread for {}.", WORKER_NAME);
            }
        }
    }
}

impl Worker {
    pub fn run<H, F>(
        controller: DisplayController<H>,
        cancel: Cancellation,
        deadline: Option<Duration>,
        report: F,
    ) -> Result<Self, Error>
    where
        H: ChipHost + 'static,
        F: FnMut(Report) + Send + 'static,
    {
        // Use large number of queue to avoid blocking the thread of event dispatcher.
        let (tx, rx) = mpsc::sync_channel(256);

        let token = cancel.clone();
        let th = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || {
                let mut ctx = WorkerContext {
                    controller,
                    rx,
                    backlog: Default::default(),
                    cancel: token,
                    deadline,
                    report,
                };
                ctx.run()
            })
            .map_err(|e| {
                let msg = format!("Fail to spawn thread for {}: {}", WORKER_NAME, e);
                Error::new(FileError::Failed, &msg)
            })?;

        Ok(Self {
            tx,
            th: Some(th),
            cancel,
        })
    }

    pub fn request(&self, request: Request) -> Result<(), Error> {
        self.tx
            .send(Event::Request(request))
            .map_err(|_| Error::new(FileError::Pipe, "Worker thread is not running"))
    }

    /// Abort the transition in progress, and the following ones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

struct WorkerContext<H: ChipHost, F: FnMut(Report)> {
    controller: DisplayController<H>,
    rx: mpsc::Receiver<Event>,
    backlog: VecDeque<Event>,
    cancel: Cancellation,
    deadline: Option<Duration>,
    report: F,
}

impl<H: ChipHost, F: FnMut(Report)> WorkerContext<H, F> {
    fn run(&mut self) {
        let enter = debug_span!("worker").entered();
        loop {
            let ev = match self.backlog.pop_front() {
                Some(ev) => ev,
                None => match self.rx.recv() {
                    Ok(ev) => ev,
                    Err(_) => break,
                },
            };

            match ev {
                Event::Shutdown => break,
                Event::Request(request) => {
                    let mode_switch = request.is_mode_switch();
                    let result = self.handle(&request);
                    (self.report)(Report { request, result });

                    // The requests arriving in the transition are re-evaluated after it.
                    if mode_switch {
                        self.backlog.extend(self.rx.try_iter());
                        coalesce_mode_switches(&mut self.backlog)
                            .into_iter()
                            .for_each(|request| {
                                debug!(?request, "coalesced");
                                (self.report)(Report {
                                    request,
                                    result: Ok(Completion::Coalesced),
                                });
                            });
                    }
                }
            }
        }
        enter.exit();
    }

    fn handle(&mut self, request: &Request) -> Result<Completion, Error> {
        let _enter = debug_span!("request").entered();
        debug!(?request);

        let cancel = match self.deadline {
            Some(deadline) => self.cancel.with_deadline(deadline),
            None => self.cancel.clone(),
        };

        let ctrl = &mut self.controller;
        match request {
            Request::PassThrough => ctrl
                .enter_pass_through(&cancel)
                .map(|_| Completion::Mode(ctrl.mode_state())),
            Request::Bypass => ctrl
                .enter_bypass(&cancel)
                .map(|_| Completion::Mode(ctrl.mode_state())),
            Request::Timing(timing) => ctrl
                .switch_timing(timing, &cancel)
                .map(|case| Completion::Timing(case, ctrl.mode_state())),
            Request::ReadRegister(addr) => ctrl
                .read_register(*addr)
                .map(|val| Completion::Register(*addr, val)),
            Request::ReadPanel {
                data_type,
                params,
                length,
            } => ctrl
                .read_panel(*data_type, params, *length)
                .map(Completion::Panel),
            Request::WritePanel { data_type, content } => ctrl
                .send_panel_command(*data_type, content)
                .map(|_| Completion::Done),
            Request::Reset => ctrl.reset().map(|_| Completion::Done),
        }
    }
}
