//! The opcode dispatch table.
//!
//! Every received message starts with a [`ClientPacketId`]. The [`MessageProcessor`] reads it,
//! looks up the handler registered for it and calls the handler with the reader positioned right
//! after the opcode. The table is an array built once at startup from [`handlers::handler_for`] and
//! checked for completeness with [`MessageProcessor::verify`].
//!
//! Nothing a client sends can unwind out of here. Malformed payloads, unknown opcodes and failed
//! handlers all come back as a [`DispatchError`] that the caller logs before dropping the message.

use crate::accounts::DbError;
use crate::connection::ConnectionId;
use crate::context::ServerContext;
use crate::handlers;
use log::{error, info};
use serde::Serialize;
use shared::protocol::{ClientPacketId, WireEnum};
use shared::{BitReader, DecodeError};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

pub type Handler =
    fn(&mut ServerContext, ConnectionId, &mut BitReader<'_>) -> Result<(), HandlerError>;

/// Failures a handler reports back to the dispatcher.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] DbError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("empty message")]
    Empty,
    #[error("unreadable opcode: {0}")]
    UnknownOpcode(DecodeError),
    #[error("no handler registered for {0:?}")]
    Unhandled(ClientPacketId),
    #[error("malformed {id:?} message: {source}")]
    Malformed {
        id: ClientPacketId,
        source: DecodeError,
    },
    #[error("{id:?} handler failed: {source}")]
    Handler { id: ClientPacketId, source: DbError },
}

impl DispatchError {
    /// True when the client sent something it should not have.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, Self::Handler { .. } | Self::Unhandled(_))
    }
}

/// Payload sizes seen for one opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpcodeStats {
    pub calls: u64,
    /// Bits read after the opcode, summed over all calls
    pub total_bits: u64,
    pub min_bits: u64,
    pub max_bits: u64,
}

impl OpcodeStats {
    fn record(&mut self, bits: u64) {
        self.min_bits = if self.calls == 0 {
            bits
        } else {
            self.min_bits.min(bits)
        };
        self.max_bits = self.max_bits.max(bits);
        self.total_bits += bits;
        self.calls += 1;
    }

    pub fn average_bits(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_bits as f64 / self.calls as f64
        }
    }
}

#[derive(Serialize)]
struct StatsDump<'a> {
    total_calls: u64,
    opcodes: BTreeMap<String, &'a OpcodeStats>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    opcodes: BTreeMap<ClientPacketId, OpcodeStats>,
}

impl ProcessorStats {
    pub fn record(&mut self, id: ClientPacketId, bits: u64) {
        self.opcodes.entry(id).or_default().record(bits);
    }

    pub fn get(&self, id: ClientPacketId) -> Option<&OpcodeStats> {
        self.opcodes.get(&id)
    }

    pub fn total_calls(&self) -> u64 {
        self.opcodes.values().map(|stats| stats.calls).sum()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        let dump = StatsDump {
            total_calls: self.total_calls(),
            opcodes: self
                .opcodes
                .iter()
                .map(|(id, stats)| (format!("{:?}", id), stats))
                .collect(),
        };
        toml::to_string(&dump)
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let text = self
            .to_toml()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, text)
    }

    /// One line per opcode, busiest first.
    pub fn summary(&self) -> String {
        if self.opcodes.is_empty() {
            return "No messages processed yet".to_string();
        }

        let mut rows: Vec<_> = self.opcodes.iter().collect();
        rows.sort_by(|a, b| b.1.calls.cmp(&a.1.calls));
        rows.iter()
            .map(|(id, stats)| {
                format!(
                    "{:?}: {} calls, {:.1} bits avg ({}..{})",
                    id,
                    stats.calls,
                    stats.average_bits(),
                    stats.min_bits,
                    stats.max_bits
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct MessageProcessor {
    handlers: Vec<Option<Handler>>,
    stats: ProcessorStats,
}

impl MessageProcessor {
    /// Builds the table by asking `lookup` for every opcode.
    pub fn new(lookup: fn(ClientPacketId) -> Option<Handler>) -> Self {
        Self {
            handlers: ClientPacketId::ALL.iter().map(|id| lookup(*id)).collect(),
            stats: ProcessorStats::default(),
        }
    }

    pub fn from_handlers() -> Self {
        Self::new(handlers::handler_for)
    }

    /// Fails with the first opcode that has no handler.
    pub fn verify(&self) -> Result<(), DispatchError> {
        for id in ClientPacketId::ALL {
            if self.handler(*id).is_none() {
                return Err(DispatchError::Unhandled(*id));
            }
        }
        Ok(())
    }

    fn handler(&self, id: ClientPacketId) -> Option<Handler> {
        self.handlers.get(id.to_index() as usize).copied().flatten()
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    /// Runs the handler for one message.
    pub fn process(
        &mut self,
        ctx: &mut ServerContext,
        conn: ConnectionId,
        data: &[u8],
    ) -> Result<ClientPacketId, DispatchError> {
        if data.is_empty() {
            return Err(DispatchError::Empty);
        }

        let mut reader = BitReader::new(data);
        let id: ClientPacketId = reader.read_enum().map_err(DispatchError::UnknownOpcode)?;
        let handler = self.handler(id).ok_or(DispatchError::Unhandled(id))?;

        let start = reader.bits_read();
        let result = handler(ctx, conn, &mut reader);
        self.stats.record(id, (reader.bits_read() - start) as u64);

        match result {
            Ok(()) => Ok(id),
            Err(HandlerError::Decode(source)) => Err(DispatchError::Malformed { id, source }),
            Err(HandlerError::Store(source)) => Err(DispatchError::Handler { id, source }),
        }
    }

    /// [`process`](Self::process), logging and dropping any failure.
    pub fn dispatch(&mut self, ctx: &mut ServerContext, conn: ConnectionId, data: &[u8]) {
        if let Err(e) = self.process(ctx, conn, data) {
            if e.is_protocol_violation() {
                info!("Dropped message from connection {}: {}", conn, e);
            } else {
                error!("Message from connection {} failed: {}", conn, e);
            }
        }
    }
}
