//! The backend exchange driver.
//!
//! One exchange covers a single request packet and every response
//! packet the grammar ties to it. The driver stages the request in the
//! frame buffer, writes it, then reads until the resolver reaches its
//! terminal state, dispatching each classified payload to the caller's
//! [`ResponseHooks`]. The completion callback fires exactly once, on
//! success or on any failure, after the buffer's chunk has gone back to
//! the pool.

use sqlgate_core::{ConnectionError, ConnectionErrorKind, Error, Result, ServerError};

use crate::buffer::FrameBuffer;
use crate::connection::{BackendConnection, ExchangeStream};
use crate::protocol::{
    Command, EofPacket, ErrPacket, MAX_PACKET_SIZE, OkPacket, PacketHeader, PacketReader,
    PacketWriter, StmtPrepareOk,
};
use crate::resolver::{PacketResolver, PayloadKind};

/// Terminal result of an exchange, handed to the completion callback.
#[derive(Debug)]
pub enum ExchangeOutcome<T> {
    /// The response grammar completed; `T` is the consumer's result.
    Success(T),
    /// The exchange failed. Server ERR packets, protocol violations,
    /// socket closure, and rejected requests all land here.
    Failure(Error),
}

impl<T> ExchangeOutcome<T> {
    /// Whether the exchange completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, ExchangeOutcome::Success(_))
    }

    /// Convert into a plain `Result`.
    pub fn into_result(self) -> Result<T> {
        match self {
            ExchangeOutcome::Success(value) => Ok(value),
            ExchangeOutcome::Failure(err) => Err(err),
        }
    }
}

/// Per-payload callbacks for one exchange.
///
/// Every method defaults to a no-op; consumers override only what they
/// consume. Payload slices borrow the frame buffer and are only valid
/// for the duration of the call.
pub trait ResponseHooks {
    /// Result produced on successful completion.
    type Output;

    /// Surrender the accumulated result at exchange end.
    fn take_result(&mut self) -> Self::Output;

    /// The request packet is about to be written.
    fn on_request(&mut self) {}

    /// A COM_STMT_SEND_LONG_DATA packet is about to be written. No
    /// response follows.
    fn on_send_long_data(&mut self) {}

    /// The server asked for LOCAL INFILE content; `name` is the file
    /// name from the 0xFB packet. Return the content to upload, or
    /// `None` to send only the empty terminator.
    fn on_load_data_request(&mut self, _name: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// ERR as the first response packet.
    fn on_error(&mut self, _err: &ErrPacket) {}

    /// OK as the first response packet.
    fn on_ok(&mut self, _ok: &OkPacket) {}

    /// EOF as the first response packet.
    fn on_eof(&mut self, _eof: &EofPacket) {}

    /// Column count opening a result set.
    fn on_column_count(&mut self, _count: u64) {}

    /// One column definition payload.
    fn on_column_def(&mut self, _payload: &[u8]) {}

    /// Legacy EOF closing the column definitions.
    fn on_column_def_eof(&mut self, _eof: &EofPacket) {}

    /// One text protocol row payload.
    fn on_text_row(&mut self, _payload: &[u8]) {}

    /// One binary protocol row payload.
    fn on_binary_row(&mut self, _payload: &[u8]) {}

    /// Legacy EOF closing the rows.
    fn on_row_eof(&mut self, _eof: &EofPacket) {}

    /// OK terminator closing the rows under CLIENT_DEPRECATE_EOF.
    fn on_row_ok(&mut self, _ok: &OkPacket) {}

    /// ERR in place of a row.
    fn on_row_error(&mut self, _err: &ErrPacket) {}

    /// COM_STMT_PREPARE_OK metadata.
    fn on_prepare_ok(&mut self, _ok: &StmtPrepareOk) {}

    /// One parameter definition payload after a prepare.
    fn on_prepare_param_def(&mut self, _payload: &[u8]) {}

    /// Legacy EOF closing the parameter definitions.
    fn on_prepare_param_def_eof(&mut self, _eof: &EofPacket) {}

    /// One column definition payload after a prepare.
    fn on_prepare_column_def(&mut self, _payload: &[u8]) {}

    /// Legacy EOF closing the prepare column definitions.
    fn on_prepare_column_def_eof(&mut self, _eof: &EofPacket) {}
}

/// Send a command with a payload and drive the exchange to completion.
///
/// The request is rejected before any socket I/O when the payload does
/// not fit the frame chunk (header + command byte need 5 bytes) or
/// would exceed the protocol packet limit. Resets the connection's
/// tracked sequence id and opens the exchange with it.
pub async fn request<S, H, F>(
    conn: &mut BackendConnection<S>,
    command: Command,
    data: &[u8],
    hooks: H,
    done: F,
) where
    S: ExchangeStream,
    H: ResponseHooks,
    F: FnOnce(ExchangeOutcome<H::Output>),
{
    let chunk_size = conn.pool().chunk_size();
    if data.len() > chunk_size.saturating_sub(5) || data.len() + 1 > MAX_PACKET_SIZE {
        let message = format!(
            "request payload of {} bytes exceeds the frame chunk ({} bytes)",
            data.len(),
            chunk_size
        );
        conn.set_last_message(&message);
        // No buffer was attached; fire the callback without touching
        // the buffer slot.
        done(ExchangeOutcome::Failure(Error::oversized(message)));
        return;
    }
    conn.reset_sequence();
    let sequence_id = conn.sequence_id();
    run(
        conn,
        Outbound::Command {
            command: command as u8,
            data,
            sequence_id,
        },
        hooks,
        done,
    )
    .await;
}

/// Send a command whose whole payload is one little-endian `u32` (for
/// example COM_STMT_CLOSE or COM_STMT_RESET).
///
/// The 9-byte wire packet always carries sequence id 0; the
/// connection's tracked sequence id is left untouched.
pub async fn request_fixed_int<S, H, F>(
    conn: &mut BackendConnection<S>,
    command: Command,
    value: u32,
    hooks: H,
    done: F,
) where
    S: ExchangeStream,
    H: ResponseHooks,
    F: FnOnce(ExchangeOutcome<H::Output>),
{
    let data = value.to_le_bytes();
    run(
        conn,
        Outbound::Command {
            command: command as u8,
            data: &data,
            sequence_id: 0,
        },
        hooks,
        done,
    )
    .await;
}

/// Send an empty packet under a caller-supplied sequence id and drive
/// the response (LOAD DATA terminator style).
pub async fn request_empty_packet<S, H, F>(
    conn: &mut BackendConnection<S>,
    sequence_id: u8,
    hooks: H,
    done: F,
) where
    S: ExchangeStream,
    H: ResponseHooks,
    F: FnOnce(ExchangeOutcome<H::Output>),
{
    run(conn, Outbound::Empty { sequence_id }, hooks, done).await;
}

/// Send a fully pre-built packet (header included) and drive the
/// response.
pub async fn request_raw<S, H, F>(
    conn: &mut BackendConnection<S>,
    packet: &[u8],
    hooks: H,
    done: F,
) where
    S: ExchangeStream,
    H: ResponseHooks,
    F: FnOnce(ExchangeOutcome<H::Output>),
{
    run(conn, Outbound::Raw { packet }, hooks, done).await;
}

enum Outbound<'a> {
    Command {
        command: u8,
        data: &'a [u8],
        sequence_id: u8,
    },
    Empty {
        sequence_id: u8,
    },
    Raw {
        packet: &'a [u8],
    },
}

async fn run<S, H, F>(conn: &mut BackendConnection<S>, outbound: Outbound<'_>, mut hooks: H, done: F)
where
    S: ExchangeStream,
    H: ResponseHooks,
    F: FnOnce(ExchangeOutcome<H::Output>),
{
    if let Err(e) = conn.attach_buffer() {
        done(ExchangeOutcome::Failure(e));
        return;
    }
    let mut resolver = PacketResolver::new(conn.capabilities());

    let request_kind = match &outbound {
        Outbound::Command { command, .. } => resolver.classify_request(*command),
        Outbound::Raw { packet } => match packet.get(4) {
            Some(&command) => resolver.classify_request(command),
            None => PayloadKind::Request,
        },
        Outbound::Empty { .. } => PayloadKind::Request,
    };
    if request_kind == PayloadKind::SendLongData {
        hooks.on_send_long_data();
    } else {
        hooks.on_request();
    }

    let staged = {
        let stage = match conn.buffer_mut() {
            Ok(buffer) => match &outbound {
                Outbound::Command {
                    command,
                    data,
                    sequence_id,
                } => buffer.encode_packet(*sequence_id, &[&[*command], data]),
                Outbound::Empty { sequence_id } => buffer.encode_packet(*sequence_id, &[]),
                Outbound::Raw { packet } => buffer.stage_raw(packet),
            },
            Err(e) => Err(e),
        };
        match stage {
            Ok(view) => view,
            Err(e) => {
                conn.set_last_message(e.to_string());
                finalize(conn, done, ExchangeOutcome::Failure(e));
                return;
            }
        }
    };

    tracing::trace!(bytes = staged.len(), "sending request packet");
    if let Err(e) = conn.write_staged(staged).await {
        conn.set_last_message(e.to_string());
        finalize(conn, done, ExchangeOutcome::Failure(e));
        return;
    }
    if let Ok(buffer) = conn.buffer_mut() {
        buffer.clear();
    }

    // COM_STMT_SEND_LONG_DATA, COM_STMT_CLOSE, and COM_QUIT elicit no
    // response.
    if resolver.is_finished() {
        let result = hooks.take_result();
        finalize(conn, done, ExchangeOutcome::Success(result));
        return;
    }

    loop {
        let n = match conn.read_available().await {
            Ok(n) => n,
            Err(e) => {
                conn.set_last_message(e.to_string());
                finalize(conn, done, ExchangeOutcome::Failure(e));
                return;
            }
        };
        if n == 0 {
            let message = "connection closed during exchange";
            conn.set_last_message(message);
            finalize(
                conn,
                done,
                ExchangeOutcome::Failure(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Closed,
                    message: message.to_string(),
                    source: None,
                })),
            );
            return;
        }

        let drained = match conn.buffer_mut() {
            Ok(buffer) => drain_packets(buffer, &mut resolver, &mut hooks),
            Err(e) => {
                finalize(conn, done, ExchangeOutcome::Failure(e));
                return;
            }
        };

        if let Some(sequence_id) = drained.last_sequence {
            conn.set_sequence(sequence_id);
        }

        if let Some(reply) = drained.load_data {
            if let Err(e) = answer_load_data(conn, reply).await {
                conn.set_last_message(e.to_string());
                finalize(conn, done, ExchangeOutcome::Failure(e));
                return;
            }
            continue;
        }

        if let Some(e) = drained.failure {
            conn.set_last_message(e.to_string());
            finalize(conn, done, ExchangeOutcome::Failure(e));
            return;
        }

        if resolver.is_finished() {
            if let Some(server) = drained.server_error {
                conn.set_last_message(server.message.clone());
                finalize(conn, done, ExchangeOutcome::Failure(Error::Server(server)));
            } else {
                let result = hooks.take_result();
                finalize(conn, done, ExchangeOutcome::Success(result));
            }
            return;
        }
    }
}

struct LoadDataReply {
    content: Option<Vec<u8>>,
    sequence_id: u8,
}

struct DrainState {
    last_sequence: Option<u8>,
    server_error: Option<ServerError>,
    failure: Option<Error>,
    load_data: Option<LoadDataReply>,
}

/// Consume every complete packet currently buffered, dispatching hooks.
///
/// Stops early on a grammar violation, on a LOAD DATA request (the
/// server waits for our reply before sending more), or when the
/// resolver finishes.
fn drain_packets<H: ResponseHooks>(
    buffer: &mut FrameBuffer,
    resolver: &mut PacketResolver,
    hooks: &mut H,
) -> DrainState {
    let mut state = DrainState {
        last_sequence: None,
        server_error: None,
        failure: None,
        load_data: None,
    };

    loop {
        let (header, view) = match buffer.next_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(e) => {
                state.failure = Some(e);
                break;
            }
        };
        state.last_sequence = Some(header.sequence_id.wrapping_add(1));

        {
            let payload = buffer.payload(view);
            let kind = match resolver.classify_response(&header, payload) {
                Ok(kind) => kind,
                Err(e) => {
                    state.failure = Some(e);
                    break;
                }
            };
            tracing::trace!(
                ?kind,
                sequence_id = header.sequence_id,
                len = payload.len(),
                "resolved response packet"
            );

            match kind {
                PayloadKind::Ok => {
                    if let Some(ok) = PacketReader::new(payload).parse_ok_packet() {
                        hooks.on_ok(&ok);
                    }
                }
                PayloadKind::Eof => {
                    if let Some(eof) = PacketReader::new(payload).parse_eof_packet() {
                        hooks.on_eof(&eof);
                    }
                }
                PayloadKind::Error => {
                    if let Some(err) = PacketReader::new(payload).parse_err_packet() {
                        hooks.on_error(&err);
                        state.server_error = Some(server_error(&err));
                    } else {
                        state.failure = Some(Error::protocol("malformed ERR packet"));
                    }
                }
                PayloadKind::ColumnCount => hooks.on_column_count(resolver.column_count()),
                PayloadKind::ColumnDef => hooks.on_column_def(payload),
                PayloadKind::ColumnDefEof => {
                    if let Some(eof) = PacketReader::new(payload).parse_eof_packet() {
                        hooks.on_column_def_eof(&eof);
                    }
                }
                PayloadKind::TextRow => hooks.on_text_row(payload),
                PayloadKind::BinaryRow => hooks.on_binary_row(payload),
                PayloadKind::RowEof => {
                    if let Some(eof) = PacketReader::new(payload).parse_eof_packet() {
                        hooks.on_row_eof(&eof);
                    }
                }
                PayloadKind::RowOk => {
                    if let Some(ok) = parse_fe_headed_ok(payload) {
                        hooks.on_row_ok(&ok);
                    }
                }
                PayloadKind::RowError => {
                    if let Some(err) = PacketReader::new(payload).parse_err_packet() {
                        hooks.on_row_error(&err);
                        state.server_error = Some(server_error(&err));
                    } else {
                        state.failure =
                            Some(Error::protocol("malformed ERR packet in place of a row"));
                    }
                }
                PayloadKind::LoadDataRequest => {
                    let content = hooks.on_load_data_request(&payload[1..]);
                    state.load_data = Some(LoadDataReply {
                        content,
                        sequence_id: header.sequence_id.wrapping_add(1),
                    });
                }
                PayloadKind::PrepareOk => {
                    if let Some(ok) = resolver.prepare_ok() {
                        hooks.on_prepare_ok(ok);
                    }
                }
                PayloadKind::PrepareParamDef => hooks.on_prepare_param_def(payload),
                PayloadKind::PrepareParamDefEof => {
                    if let Some(eof) = PacketReader::new(payload).parse_eof_packet() {
                        hooks.on_prepare_param_def_eof(&eof);
                    }
                }
                PayloadKind::PrepareColumnDef => hooks.on_prepare_column_def(payload),
                PayloadKind::PrepareColumnDefEof => {
                    if let Some(eof) = PacketReader::new(payload).parse_eof_packet() {
                        hooks.on_prepare_column_def_eof(&eof);
                    }
                }
                // Never produced by classify_response.
                PayloadKind::Request | PayloadKind::SendLongData => {}
            }
        }

        buffer.advance_past(&header);

        if state.failure.is_some() || state.load_data.is_some() || resolver.is_finished() {
            break;
        }
    }

    state
}

/// Answer a LOCAL INFILE request on the in-flight exchange: content
/// packet(s) when the hook supplied data, then the empty terminator.
async fn answer_load_data<S: ExchangeStream>(
    conn: &mut BackendConnection<S>,
    reply: LoadDataReply,
) -> Result<()> {
    let mut sequence_id = reply.sequence_id;
    if let Some(content) = reply.content {
        if !content.is_empty() {
            let writer = PacketWriter::new();
            let packet = writer.build_packet_from_payload(&content, sequence_id);
            conn.write_all(&packet).await?;
            sequence_id = sequence_id.wrapping_add(frame_count(content.len()));
        }
    }
    let terminator = PacketHeader {
        payload_length: 0,
        sequence_id,
    }
    .to_bytes();
    conn.write_all(&terminator).await?;
    conn.set_sequence(sequence_id.wrapping_add(1));
    Ok(())
}

/// Number of wire frames `build_packet_from_payload` emits for a
/// payload of `len` bytes.
#[allow(clippy::cast_possible_truncation)]
fn frame_count(len: usize) -> u8 {
    if len <= MAX_PACKET_SIZE {
        1
    } else {
        (len / MAX_PACKET_SIZE + 1) as u8
    }
}

/// Parse an OK terminator wearing the 0xFE header (CLIENT_DEPRECATE_EOF
/// row terminator). `PacketReader::parse_ok_packet` only understands
/// the 0x00 marker, so the fields are read past the marker by hand.
fn parse_fe_headed_ok(payload: &[u8]) -> Option<OkPacket> {
    let mut reader = PacketReader::new(payload);
    reader.skip(1);
    let affected_rows = reader.read_lenenc_int()?;
    let last_insert_id = reader.read_lenenc_int()?;
    let status_flags = reader.read_u16_le()?;
    let warnings = reader.read_u16_le()?;
    let info = if reader.remaining() > 0 {
        reader.read_rest_string()
    } else {
        String::new()
    };
    Some(OkPacket {
        affected_rows,
        last_insert_id,
        status_flags,
        warnings,
        info,
    })
}

fn server_error(err: &ErrPacket) -> ServerError {
    ServerError {
        code: err.error_code,
        sql_state: err.sql_state.clone(),
        message: err.error_message.clone(),
    }
}

/// Close the exchange exactly once: return the chunk, then fire the
/// completion callback. `done` is consumed by value, so a second
/// invocation cannot compile.
fn finalize<S, T, F>(conn: &mut BackendConnection<S>, done: F, outcome: ExchangeOutcome<T>)
where
    S: ExchangeStream,
    F: FnOnce(ExchangeOutcome<T>),
{
    if let Some(buffer) = conn.detach_buffer() {
        buffer.release();
    }
    match &outcome {
        ExchangeOutcome::Success(_) => tracing::debug!("exchange finished"),
        ExchangeOutcome::Failure(e) => tracing::debug!(error = %e, "exchange failed"),
    }
    done(outcome);
}
