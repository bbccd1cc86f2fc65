pub mod controls;

use std::collections::VecDeque;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Decoder;

use crate::clock::{Calendar, Clock};
use crate::energy::EnergyIntegrator;
use crate::entities::{Binary, Entities, Flag, Numeric, Text, UNKNOWN};
use crate::pi30::bits::{self, FlagSet, SecondaryBits, StatusBits};
use crate::pi30::fields::{self, ChunkCursor, Family, FieldTarget};
use crate::pi30::frame::{self, FrameDecoder};
use crate::pi30::{ACK, NAK};
use crate::prelude::*;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::transport::Transport;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PacketStats {
    pub commands_sent: u64,
    pub frames_received: u64,
    pub acks: u64,
    pub naks: u64,
    pub crc_failures: u64,
    pub timeouts: u64,
    pub unsolicited_frames: u64,
    pub payloads_decoded: u64,
    pub oversize_discarded: u64,
}

impl PacketStats {
    pub fn print_summary(&self) {
        info!("Packet Statistics:");
        info!("  Commands sent: {}", self.commands_sent);
        info!("  Frames received: {}", self.frames_received);
        info!("  Replies:");
        info!("    ACK: {}", self.acks);
        info!("    NAK: {}", self.naks);
        info!("    Payloads decoded: {}", self.payloads_decoded);
        info!("  Errors:");
        info!("    CRC failures: {}", self.crc_failures);
        info!("    Timeouts: {}", self.timeouts);
        info!("    Unsolicited frames: {}", self.unsolicited_frames);
        info!("    Oversize frames discarded: {}", self.oversize_discarded);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    WaitingResponse { command: Command, sent_at_ms: u64 },
}

/// A reply payload waiting to be decoded, with the command it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResult {
    pub command: Command,
    pub payload: String,
}

/// The protocol engine. Owns everything the step function touches; the
/// host calls `step` repeatedly and never concurrently.
pub struct Coordinator<T: Transport> {
    transport: T,
    clock: Box<dyn Clock>,
    calendar: Box<dyn Calendar>,
    store: Box<dyn Store>,
    entities: Entities,
    scheduler: Scheduler,
    decoder: FrameDecoder,
    inbound: BytesMut,
    state: State,
    pending: VecDeque<PendingResult>,
    cursors: Vec<ChunkCursor>,
    energy: EnergyIntegrator,
    ready_at_ms: u64,
    response_timeout_ms: u64,
    stats: PacketStats,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(
        config: &Config,
        transport: T,
        clock: Box<dyn Clock>,
        calendar: Box<dyn Calendar>,
        store: Box<dyn Store>,
        entities: Entities,
    ) -> Self {
        let mut energy = EnergyIntegrator::new(
            config.energy().sample_interval_ms(),
            config.energy().save_interval_ms(),
        );
        energy.load(store.as_ref());

        let ready_at_ms = clock.now_ms() + config.startup_delay_ms();

        Self {
            transport,
            clock,
            calendar,
            store,
            entities,
            scheduler: Scheduler::from_config(config),
            decoder: FrameDecoder::new(config.max_frame_len()),
            inbound: BytesMut::new(),
            state: State::Idle,
            pending: VecDeque::new(),
            cursors: Family::ALL.into_iter().map(ChunkCursor::new).collect(),
            energy,
            ready_at_ms,
            response_timeout_ms: config.response_timeout_ms(),
            stats: PacketStats::default(),
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn stats(&self) -> &PacketStats {
        &self.stats
    }

    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn energy(&self) -> &EnergyIntegrator {
        &self.energy
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn enqueue_priority(&mut self, command: Command) {
        self.scheduler.enqueue_priority(command);
    }

    /// One pass of the engine. Never blocks and never fails; every error
    /// is logged and leaves the engine Idle or still waiting.
    pub fn step(&mut self) {
        self.receive();

        let now = self.clock.now_ms();
        if now < self.ready_at_ms {
            return;
        }

        self.check_timeout(now);

        if self.state == State::Idle {
            if let Some(command) = self.scheduler.next(now) {
                self.send(command, now);
            }
        }

        if let Some(result) = self.pending.pop_front() {
            self.dispatch(result);
        }

        self.publish_chunks();
        self.sample_energy(now);
    }

    /// Final save of the energy totals.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.energy.save(self.store.as_mut()) {
            error!("failed to save energy totals: {}", err);
        }
        self.stats.print_summary();
    }

    // bytes -> frames {{{
    fn receive(&mut self) {
        while self.transport.available() > 0 {
            match self.transport.read_byte() {
                Some(byte) => self.inbound.put_u8(byte),
                None => break,
            }
        }

        loop {
            match self.decoder.decode(&mut self.inbound) {
                Ok(Some(frame)) => self.handle_frame(&frame),
                Ok(None) => break,
                Err(err @ ProtocolError::Oversize { .. }) => {
                    warn!("{}", err);
                    self.stats.oversize_discarded += 1;
                }
                Err(err) => {
                    warn!("{}", err);
                    self.inbound.clear();
                    break;
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        self.stats.frames_received += 1;

        if let Err(err) = frame::verify(frame) {
            warn!("{}", err);
            debug!("rejected frame: {}", frame::hex(frame));
            self.stats.crc_failures += 1;
            self.state = State::Idle;
            return;
        }

        let payload = match frame::payload(frame) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("{}", err);
                self.state = State::Idle;
                return;
            }
        };

        let State::WaitingResponse { command, .. } = std::mem::replace(&mut self.state, State::Idle)
        else {
            debug!("dropping unsolicited frame {:?}", payload);
            self.stats.unsolicited_frames += 1;
            return;
        };

        match payload.as_str() {
            ACK => {
                debug!("{} acknowledged", command);
                self.stats.acks += 1;
            }
            NAK => {
                warn!("{} not acknowledged", command);
                self.stats.naks += 1;
            }
            _ => {
                debug!("reply to {}: {}", command, payload);
                self.pending.push_back(PendingResult { command, payload });
            }
        }
    } // }}}

    fn check_timeout(&mut self, now: u64) {
        let State::WaitingResponse {
            command,
            sent_at_ms,
        } = &self.state
        else {
            return;
        };

        if now.saturating_sub(*sent_at_ms) >= self.response_timeout_ms {
            warn!(
                "{}",
                ProtocolError::Timeout {
                    command: command.to_string(),
                    timeout_ms: self.response_timeout_ms,
                }
            );
            self.stats.timeouts += 1;
            self.state = State::Idle;
        }
    }

    fn send(&mut self, command: Command, now: u64) {
        debug!("sending {}", command);

        match self.transport.write(&frame::encode(&command)) {
            Ok(()) => {
                self.stats.commands_sent += 1;
                self.state = State::WaitingResponse {
                    command,
                    sent_at_ms: now,
                };
            }
            Err(err) => warn!("failed to send {}: {}", command, err),
        }
    }

    // payload -> entities {{{
    fn dispatch(&mut self, result: PendingResult) {
        let PendingResult { command, payload } = result;
        self.stats.payloads_decoded += 1;

        let Some(query) = command.query() else {
            debug!("no decoder for reply to {}: {}", command, payload);
            return;
        };

        match query {
            Query::ProtocolId => self.entities.publish_text(Text::ProtocolId, &payload),
            Query::SerialNumber => self.entities.publish_text(Text::SerialNumber, &payload),
            Query::Mode => self.decode_mode(&payload),
            Query::Flags => self.decode_flags(&payload),
            Query::Warnings => self
                .entities
                .publish_text(Text::WarningStatus, &bits::decode_warnings(&payload)),
            Query::Status | Query::Ratings | Query::Equalization => {
                let Some(cursor) = self
                    .cursors
                    .iter_mut()
                    .find(|c| Some(c.family()) == Family::from_query(query))
                else {
                    return;
                };
                if let Err(err) = cursor.load(&payload) {
                    warn!("{}", err);
                }
            }
        }
    }

    fn decode_mode(&mut self, payload: &str) {
        let Some(code) = payload.chars().next() else {
            warn!("empty mode reply");
            return;
        };

        let label = bits::mode_label(code).unwrap_or_else(|| {
            warn!("unknown mode {:?}", code);
            UNKNOWN
        });

        self.entities.publish_text(Text::DeviceMode, &code.to_string());
        self.entities.publish_text(Text::DeviceModeText, label);
    }

    // letters the reply leaves out keep their last state
    fn decode_flags(&mut self, payload: &str) {
        let set = FlagSet::parse(payload);
        for &flag in Flag::ALL {
            if let Some(state) = set.state(flag.letter()) {
                self.entities.update_flag(flag, state);
            }
        }
    }

    fn publish_chunks(&mut self) {
        for cursor in self.cursors.iter_mut() {
            let family = cursor.family();
            if let Some((index, field)) = cursor.next() {
                publish_field(&mut self.entities, family, index, field);
            }
        }
    } // }}}

    fn sample_energy(&mut self, now: u64) {
        let sampled = self.energy.tick(
            now,
            self.calendar.today(),
            self.entities.value(Numeric::PvChargingPower),
            self.entities.value(Numeric::OutputActivePower),
        );
        if sampled {
            for (key, value) in self.energy.values() {
                self.entities.publish_numeric(key, value as f32);
            }
        }

        if self.energy.save_due(now) {
            if let Err(err) = self.energy.save(self.store.as_mut()) {
                warn!("failed to save energy totals: {}", err);
            }
            self.energy.mark_saved(now);
        }
    }

    /// Drive the engine every `tick_ms` until shutdown. Controls from MQTT
    /// are applied between steps.
    pub async fn run(mut self, channels: Channels, tick_ms: u64) -> Result<()> {
        let mut from_mqtt = channels.from_mqtt.subscribe();
        let mut shutdown = channels.shutdown.subscribe();
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(tick_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("coordinator shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.drain_controls(&mut from_mqtt);
                    self.step();
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn drain_controls(&mut self, receiver: &mut broadcast::Receiver<mqtt::ChannelData>) {
        use broadcast::error::TryRecvError;

        loop {
            match receiver.try_recv() {
                Ok(mqtt::ChannelData::Message(message)) => match message.to_control() {
                    Ok(request) => self.handle_control(request),
                    Err(err) => warn!("{}", err),
                },
                Ok(mqtt::ChannelData::Shutdown) => {}
                Err(TryRecvError::Lagged(n)) => warn!("dropped {} control messages", n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

fn publish_field(entities: &mut Entities, family: Family, index: usize, field: Option<&str>) {
    let (Some(target), Some(field)) = (family.target(index), field) else {
        return;
    };

    match target {
        FieldTarget::Numeric(key) => match fields::parse_number(field) {
            Ok(value) => entities.publish_numeric(key, value),
            Err(err) => trace!("{}: {}", key, err),
        },
        FieldTarget::Scaled(key, factor) => match fields::parse_number(field) {
            Ok(value) => entities.publish_numeric(key, value * factor),
            Err(err) => trace!("{}: {}", key, err),
        },
        FieldTarget::Text(key) => entities.publish_text(key, field),
        FieldTarget::Select(key) => {
            if let Err(err) = entities.update_select_from_code(key, field) {
                warn!("{}", err);
            }
        }
        FieldTarget::StatusBits => match StatusBits::parse(field) {
            Some(status) => {
                entities.update_binary(Binary::PvOrAcPoweringLoad, status.pv_or_ac_powering_load);
                entities.update_binary(Binary::ConfigChanged, status.config_changed);
                entities.update_binary(Binary::SccFirmwareUpdated, status.scc_fw_updated);
                entities.update_binary(Binary::LoadOn, status.load_on);
                entities.update_binary(Binary::ChargingOn, status.charging_on);
                entities.update_binary(Binary::SccChargingOn, status.scc_charging_on);
                entities.update_binary(Binary::AcChargingOn, status.ac_charging_on);

                let mode = status.charging_mode();
                entities.publish_numeric(Numeric::ChargingMode, mode as f32);
                entities.publish_text(Text::ChargingModeText, bits::charging_mode_label(mode));
            }
            None => warn!("bad status bits {:?}", field),
        },
        FieldTarget::SecondaryBits => match SecondaryBits::parse(field) {
            Some(secondary) => {
                entities.update_binary(Binary::ChargingToFloat, secondary.charging_to_float);
                entities.update_binary(Binary::InverterOn, secondary.inverter_on);
                entities.update_binary(Binary::DustproofInstalled, secondary.dustproof_installed);
            }
            None => warn!("bad secondary status bits {:?}", field),
        },
    }
}
