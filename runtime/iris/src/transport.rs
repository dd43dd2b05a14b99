// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{context::*, host::*},
    glib::{Error, FileError},
    iris_protocols::{
        chip::*,
        dsi::{self, *},
        ocp::*,
        repository::*,
        LinkState, ProtocolError, TransportError,
    },
    std::{
        sync::{Mutex, MutexGuard},
        thread,
        time::Duration,
    },
    tracing::debug,
};

struct PanelBus<H: ChipHost> {
    host: H,
    repository: CommandRepository,
    ctx: ChipContext,
}

/// The transport of commands to co-processor. The host, the repository of commands, and the
/// context are accessible only by the guard of panel command lock.
pub struct CommandTransport<H: ChipHost> {
    bus: Mutex<PanelBus<H>>,
}

impl<H: ChipHost> CommandTransport<H> {
    pub fn new(host: H, repository: CommandRepository, ctx: ChipContext) -> Self {
        Self {
            bus: Mutex::new(PanelBus {
                host,
                repository,
                ctx,
            }),
        }
    }

    /// Acquire the panel command lock.
    pub fn lock(&self) -> Result<PanelCommandGuard<'_, H>, Error> {
        self.bus
            .lock()
            .map(|bus| PanelCommandGuard { bus })
            .map_err(|_| Error::new(FileError::Failed, "Panel command lock is poisoned"))
    }
}

/// The guard of panel command lock. The frames of one logical operation are sent while the guard
/// is alive, thus never interleaved with the others.
pub struct PanelCommandGuard<'a, H: ChipHost> {
    bus: MutexGuard<'a, PanelBus<H>>,
}

impl<'a, H: ChipHost> PanelCommandGuard<'a, H> {
    pub fn context(&self) -> &ChipContext {
        &self.bus.ctx
    }

    pub fn set_refresh_rate(&mut self, refresh_rate: u32) {
        self.bus.ctx.refresh_rate = refresh_rate;
    }

    pub fn repository(&self) -> &CommandRepository {
        &self.bus.repository
    }

    pub fn repository_mut(&mut self) -> &mut CommandRepository {
        &mut self.bus.repository
    }

    pub fn host(&mut self) -> &mut H {
        &mut self.bus.host
    }

    /// Send the frames in order.
    pub fn send(&mut self, frames: &[OcpFrame], link_state: LinkState) -> Result<(), Error> {
        let split_size = self.bus.ctx.split_size;
        let commands = build_commands(frames, split_size, Duration::default())?;
        self.send_commands(&commands, link_state)
    }

    /// Send the commands in batches terminated by the flag. The command with wait also
    /// terminates the batch so that the wait is done before the following command.
    pub fn send_commands(
        &mut self,
        commands: &[CommandDescriptor],
        link_state: LinkState,
    ) -> Result<(), Error> {
        let variant = self.bus.ctx.variant;
        let channel = self.bus.ctx.channel;
        let write_path = self.bus.ctx.write_path;

        let mut cmds = commands;
        while cmds.len() > 0 {
            let len = cmds
                .iter()
                .position(|cmd| cmd.last_in_batch || cmd.post_wait > Duration::default())
                .map(|pos| pos + 1)
                .unwrap_or(cmds.len());

            match write_path {
                WritePath::Dsi => {
                    let batch: Vec<CommandDescriptor> = cmds[..len]
                        .iter()
                        .map(|cmd| CommandDescriptor {
                            data_type: variant.normalize_data_type(cmd.data_type),
                            ..cmd.clone()
                        })
                        .collect();
                    debug!(count = batch.len(), ?link_state, "transfer");
                    self.bus.host.transfer(&batch, link_state, channel)?;
                }
                WritePath::I2c => {
                    cmds[..len]
                        .iter()
                        .try_for_each(|cmd| self.write_by_i2c(cmd))?;
                }
            }

            let post_wait = cmds[len - 1].post_wait;
            if post_wait > Duration::default() {
                thread::sleep(post_wait);
            }

            cmds = &cmds[len..];
        }

        Ok(())
    }

    // The frame is decoded into register writes. The masked write is done by read-modify-write.
    fn write_by_i2c(&mut self, cmd: &CommandDescriptor) -> Result<(), Error> {
        let frame = OcpFrame::parse(&cmd.payload)?;
        debug!(operation = ?frame.operation, address = frame.address, "write by i2c");
        match frame.operation {
            OcpOperation::SingleWriteBitMask => {
                if let [mask, value] = frame.payload[..] {
                    let current = self.bus.host.i2c_read(frame.address)?;
                    let value = (current & !mask) | (value & mask);
                    self.bus.host.i2c_write(frame.address, value)?;
                }
                Ok(())
            }
            _ => frame
                .register_writes()
                .iter()
                .try_for_each(|&(addr, val)| self.bus.host.i2c_write(addr, val)),
        }
    }

    pub fn send_batch(&mut self, batch: &CommandBatch) -> Result<(), Error> {
        self.send_commands(&batch.commands, batch.link_state)
    }

    /// Send commands of the option in the active cmd-list.
    pub fn send_option(&mut self, block: HardwareBlock, opt_id: u8) -> Result<(), Error> {
        let (commands, link_state) = self
            .bus
            .repository
            .lookup(block, opt_id)
            .map(|entry| (entry.commands.to_vec(), entry.link_state))
            .ok_or_else(|| {
                let msg = format!("The option is not configured: {:?} 0x{:02x}", block, opt_id);
                Error::new(RepositoryError::NotConfigured, &msg)
            })?;
        self.send_commands(&commands, link_state)
    }

    pub fn write_register(&mut self, address: u32, value: u32) -> Result<(), Error> {
        let split_size = self.bus.ctx.split_size;
        let frames = build_single_writes(&[(address, value)], split_size)?;
        self.send(&frames, LinkState::HighSpeed)
    }

    pub fn write_register_bits(
        &mut self,
        address: u32,
        value: u32,
        mask: u32,
    ) -> Result<(), Error> {
        let frame = build_bitmask_write(address, value, mask);
        self.send(&[frame], LinkState::HighSpeed)
    }

    /// Read the register according to the read path.
    pub fn read_register(&mut self, address: u32) -> Result<u32, Error> {
        match self.bus.ctx.read_path {
            ReadPath::I2c => self.bus.host.i2c_read(address),
            ReadPath::Dsi => self.ocp_read(address),
        }
    }

    // The address is sent by the frame of single read at first, then the value is returned
    // to the following read request.
    fn ocp_read(&mut self, address: u32) -> Result<u32, Error> {
        let channel = self.bus.ctx.channel;
        let cmd = build_single_read(address).to_command(true, Duration::default());
        self.bus.host.transfer(&[cmd], LinkState::HighSpeed, channel)?;

        let request = CommandDescriptor {
            data_type: GENERIC_READ_REQUEST_1_PARAM,
            payload: vec![0x00],
            last_in_batch: true,
            post_wait: Duration::default(),
        };
        let mut frame = [0u8; 4];
        let len = self
            .bus
            .host
            .transfer_read(&request, LinkState::HighSpeed, channel, &mut frame)?;
        if len < frame.len() {
            let msg = format!("Short response for 0x{:08x}: {}", address, len);
            Err(Error::new(TransportError::ShortFrame, &msg))?;
        }

        Ok(u32::from_le_bytes(frame))
    }

    /// Send the frames to request read, then poll the status and read the response.
    pub fn send_and_read(
        &mut self,
        frames: &[OcpFrame],
        link_state: LinkState,
    ) -> Result<Vec<u8>, Error> {
        self.send(frames, link_state)?;

        let regs = self.bus.ctx.variant.register_map();
        let error_mask = self.bus.ctx.variant.tx_read_error_mask();
        let poll_count = self.bus.ctx.read_poll_count();
        let poll_interval = self.bus.ctx.retry.read_poll_interval;

        let mut status = 0;
        let mut received = false;
        let mut count = 0;
        while count < poll_count {
            thread::sleep(poll_interval);
            status = self.read_register(regs.tx_intstat_raw)?;
            if status & RESPONSE_RECEIVED_FLAG > 0 {
                received = true;
                break;
            }
            count += 1;
        }
        debug!(status, polls = count, "read status");

        if status & error_mask > 0 {
            let msg = format!("Error in status of read: 0x{:08x}", status);
            Err(Error::new(TransportError::ErrorFlagSet, &msg))?;
        }
        if !received {
            let msg = format!("No response after {} polls", poll_count);
            Err(Error::new(TransportError::NoResponse, &msg))?;
        }

        let first = self.read_register(regs.rd_packet_data)?;
        let header = ResponseHeader::parse(first).map_err(|e| {
            if e.kind::<ProtocolError>() == Some(ProtocolError::NegativeLength) {
                Error::new(TransportError::ShortFrame, e.message())
            } else {
                e
            }
        })?;

        let additional = (0..header.additional_words())
            .map(|_| self.read_register(regs.rd_packet_data))
            .collect::<Result<Vec<u32>, Error>>()?;

        Ok(header.collect(first, &additional))
    }

    /// Send the DSI command to panel through co-processor in pass-through mode.
    pub fn send_panel_command(
        &mut self,
        data_type: u8,
        content: &[u8],
        link_state: LinkState,
    ) -> Result<(), Error> {
        let frames = self.build_panel_frames(data_type, content, link_state)?;
        self.send(&frames, link_state)
    }

    /// Send the DSI command to panel as is, while co-processor is in analog bypass.
    pub fn send_raw_panel_command(
        &mut self,
        data_type: u8,
        content: &[u8],
        link_state: LinkState,
    ) -> Result<(), Error> {
        let cmd = CommandDescriptor {
            data_type,
            payload: content.to_vec(),
            last_in_batch: true,
            post_wait: Duration::default(),
        };
        let channel = self.bus.ctx.channel;
        self.bus.host.transfer(&[cmd], link_state, channel)
    }

    /// Read data from panel through co-processor in pass-through mode.
    pub fn read_panel(
        &mut self,
        data_type: u8,
        params: &[u8],
        length: usize,
        link_state: LinkState,
    ) -> Result<Vec<u8>, Error> {
        if length == 0 || length > MAXIMUM_READ_LENGTH {
            let msg = format!("Invalid length of read from panel: {}", length);
            Err(Error::new(ProtocolError::ExceedReadLength, &msg))?;
        }
        if dsi::classify(data_type)? != PacketClass::ReadRequest {
            let msg = format!("Not a read request: 0x{:02x}", data_type);
            Err(Error::new(ProtocolError::UnknownOperation, &msg))?;
        }

        let size = [length as u8];
        self.send_panel_command(SET_MAXIMUM_RETURN_PACKET_SIZE, &size, link_state)?;

        let regs = self.bus.ctx.variant.register_map();
        self.write_register(regs.tx_intclr, 0xffffffff)?;

        let frames = self.build_panel_frames(data_type, params, link_state)?;
        let mut data = self.send_and_read(&frames, link_state)?;
        data.truncate(length);

        Ok(data)
    }

    /// Read data from panel directly, while co-processor is in analog bypass.
    pub fn read_raw_panel(
        &mut self,
        data_type: u8,
        params: &[u8],
        length: usize,
        link_state: LinkState,
    ) -> Result<Vec<u8>, Error> {
        if length == 0 || length > MAXIMUM_READ_LENGTH {
            let msg = format!("Invalid length of read from panel: {}", length);
            Err(Error::new(ProtocolError::ExceedReadLength, &msg))?;
        }

        let cmd = CommandDescriptor {
            data_type,
            payload: params.to_vec(),
            last_in_batch: true,
            post_wait: Duration::default(),
        };
        let channel = self.bus.ctx.channel;
        let mut frame = vec![0u8; length];
        let len = self
            .bus
            .host
            .transfer_read(&cmd, link_state, channel, &mut frame)?;
        if len == 0 {
            Err(Error::new(TransportError::ShortFrame, "No data from panel"))?;
        }
        frame.truncate(len);

        Ok(frame)
    }

    fn build_panel_frames(
        &self,
        data_type: u8,
        content: &[u8],
        link_state: LinkState,
    ) -> Result<Vec<OcpFrame>, Error> {
        let ctx = &self.bus.ctx;
        build_panel_command(
            data_type,
            link_state,
            content,
            &ctx.variant.register_map(),
            ctx.split_size,
        )
    }
}
