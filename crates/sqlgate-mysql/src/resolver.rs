//! Response grammar resolution for backend exchanges.
//!
//! The resolver classifies each inbound payload against the MySQL
//! response grammar for the command that opened the exchange: plain
//! OK/ERR, text or binary result sets (with or without legacy EOF
//! packets), prepare metadata, LOAD DATA LOCAL round-trips, and
//! multi-result loops. It tracks only classification state; payload
//! parsing beyond what the grammar needs stays with the caller.

use sqlgate_core::{Error, Result};

use crate::protocol::{
    Command, PacketHeader, PacketReader, StmtPrepareOk, capabilities, parse_stmt_prepare_ok,
    server_status,
};

/// Grammar role of a single packet within an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Outbound command packet
    Request,
    /// Outbound COM_STMT_SEND_LONG_DATA (no server response)
    SendLongData,
    /// Server requests LOCAL INFILE content (0xFB)
    LoadDataRequest,
    /// ERR as the first response packet
    Error,
    /// OK as the first response packet
    Ok,
    /// EOF as the first response packet
    Eof,
    /// Column count opening a result set
    ColumnCount,
    /// Column definition within a result set
    ColumnDef,
    /// Legacy EOF terminating the column definitions
    ColumnDefEof,
    /// Text protocol row
    TextRow,
    /// Binary protocol row
    BinaryRow,
    /// Legacy EOF terminating the rows
    RowEof,
    /// OK (0xFE-headed) terminating the rows under CLIENT_DEPRECATE_EOF
    RowOk,
    /// ERR in place of a row
    RowError,
    /// COM_STMT_PREPARE_OK metadata packet
    PrepareOk,
    /// Parameter definition after a prepare
    PrepareParamDef,
    /// Legacy EOF terminating the parameter definitions
    PrepareParamDefEof,
    /// Column definition after a prepare
    PrepareColumnDef,
    /// Legacy EOF terminating the prepare column definitions
    PrepareColumnDefEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolverState {
    /// Awaiting the first packet of a response (or of the next result
    /// set when the previous terminator carried the more-results flag)
    First,
    ColumnDef,
    ColumnDefEof,
    Row,
    PrepareParamDef,
    PrepareParamDefEof,
    PrepareColumnDef,
    PrepareColumnDefEof,
    Finished,
}

/// Tracks where an exchange stands within the response grammar.
#[derive(Debug)]
pub struct PacketResolver {
    capabilities: u32,
    state: ResolverState,
    column_count: u64,
    columns_remaining: u64,
    prepare_params_remaining: u16,
    prepare_columns_remaining: u16,
    binary_rows: bool,
    prepare_expected: bool,
    more_results: bool,
    prepare: Option<StmtPrepareOk>,
}

impl PacketResolver {
    /// Create a resolver for a link negotiated with `capabilities`.
    pub fn new(capabilities: u32) -> Self {
        Self {
            capabilities,
            state: ResolverState::First,
            column_count: 0,
            columns_remaining: 0,
            prepare_params_remaining: 0,
            prepare_columns_remaining: 0,
            binary_rows: false,
            prepare_expected: false,
            more_results: false,
            prepare: None,
        }
    }

    /// Reset all per-exchange state.
    pub fn reset(&mut self) {
        let capabilities = self.capabilities;
        *self = Self::new(capabilities);
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    /// Whether the response grammar has reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.state == ResolverState::Finished
    }

    /// Whether the last terminator announced another result set.
    pub fn more_results(&self) -> bool {
        self.more_results
    }

    /// Column count of the result set currently being resolved.
    pub fn column_count(&self) -> u64 {
        self.column_count
    }

    /// Prepare metadata seen on this exchange, if any.
    pub fn prepare_ok(&self) -> Option<&StmtPrepareOk> {
        self.prepare.as_ref()
    }

    /// Note the outbound command opening this exchange.
    ///
    /// Sets the row encoding (binary after COM_STMT_EXECUTE) and the
    /// prepare-metadata expectation (after COM_STMT_PREPARE). Returns
    /// `SendLongData` for COM_STMT_SEND_LONG_DATA, which elicits no
    /// server response and finishes the exchange immediately.
    /// COM_STMT_CLOSE and COM_QUIT are equally fire-and-forget; the
    /// server never answers them.
    pub fn classify_request(&mut self, command_byte: u8) -> PayloadKind {
        self.more_results = false;
        if command_byte == Command::StmtExecute as u8 {
            self.binary_rows = true;
        } else if command_byte == Command::StmtPrepare as u8 {
            self.prepare_expected = true;
        } else if command_byte == Command::StmtSendLongData as u8 {
            self.state = ResolverState::Finished;
            return PayloadKind::SendLongData;
        } else if command_byte == Command::StmtClose as u8 || command_byte == Command::Quit as u8 {
            self.state = ResolverState::Finished;
        }
        PayloadKind::Request
    }

    /// Classify one complete inbound packet and advance the grammar.
    pub fn classify_response(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
    ) -> Result<PayloadKind> {
        match self.state {
            ResolverState::First => self.classify_first(header, payload),
            ResolverState::ColumnDef => {
                self.columns_remaining = self.columns_remaining.saturating_sub(1);
                if self.columns_remaining == 0 {
                    self.state = if self.deprecate_eof() {
                        ResolverState::Row
                    } else {
                        ResolverState::ColumnDefEof
                    };
                }
                Ok(PayloadKind::ColumnDef)
            }
            ResolverState::ColumnDefEof => {
                if !is_eof(header, payload) {
                    return Err(self.violation("expected EOF after column definitions", payload));
                }
                self.state = ResolverState::Row;
                Ok(PayloadKind::ColumnDefEof)
            }
            ResolverState::Row => self.classify_row(header, payload),
            ResolverState::PrepareParamDef => {
                self.prepare_params_remaining = self.prepare_params_remaining.saturating_sub(1);
                if self.prepare_params_remaining == 0 && self.deprecate_eof() {
                    self.after_prepare_params();
                } else if self.prepare_params_remaining == 0 {
                    self.state = ResolverState::PrepareParamDefEof;
                }
                Ok(PayloadKind::PrepareParamDef)
            }
            ResolverState::PrepareParamDefEof => {
                if !is_eof(header, payload) {
                    return Err(self.violation("expected EOF after parameter definitions", payload));
                }
                self.after_prepare_params();
                Ok(PayloadKind::PrepareParamDefEof)
            }
            ResolverState::PrepareColumnDef => {
                self.prepare_columns_remaining = self.prepare_columns_remaining.saturating_sub(1);
                if self.prepare_columns_remaining == 0 {
                    self.state = if self.deprecate_eof() {
                        ResolverState::Finished
                    } else {
                        ResolverState::PrepareColumnDefEof
                    };
                }
                Ok(PayloadKind::PrepareColumnDef)
            }
            ResolverState::PrepareColumnDefEof => {
                if !is_eof(header, payload) {
                    return Err(
                        self.violation("expected EOF after prepare column definitions", payload)
                    );
                }
                self.state = ResolverState::Finished;
                Ok(PayloadKind::PrepareColumnDefEof)
            }
            ResolverState::Finished => {
                Err(self.violation("packet received after the exchange finished", payload))
            }
        }
    }

    fn classify_first(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<PayloadKind> {
        let Some(&first) = payload.first() else {
            return Err(self.violation("empty response packet", payload));
        };

        if self.prepare_expected {
            return match first {
                0xFF => {
                    self.state = ResolverState::Finished;
                    Ok(PayloadKind::Error)
                }
                0x00 => {
                    let Some(ok) = parse_stmt_prepare_ok(payload) else {
                        return Err(self.violation("malformed COM_STMT_PREPARE_OK", payload));
                    };
                    self.prepare_params_remaining = ok.num_params;
                    self.prepare_columns_remaining = ok.num_columns;
                    self.prepare = Some(ok);
                    if ok.num_params > 0 {
                        self.state = ResolverState::PrepareParamDef;
                    } else {
                        self.after_prepare_params();
                    }
                    Ok(PayloadKind::PrepareOk)
                }
                _ => Err(self.violation("unexpected first byte in prepare response", payload)),
            };
        }

        match first {
            0x00 => {
                self.note_terminator_flags(payload, false);
                Ok(PayloadKind::Ok)
            }
            0xFF => {
                self.state = ResolverState::Finished;
                Ok(PayloadKind::Error)
            }
            0xFE if header.payload_length < 9 => {
                self.note_terminator_flags(payload, true);
                Ok(PayloadKind::Eof)
            }
            0xFB => {
                // State stays at First: after the content reply the
                // server answers with OK or ERR.
                Ok(PayloadKind::LoadDataRequest)
            }
            _ => {
                let mut reader = PacketReader::new(payload);
                let Some(count) = reader.read_lenenc_int() else {
                    return Err(self.violation("malformed column count", payload));
                };
                if count == 0 {
                    return Err(self.violation("result set with zero columns", payload));
                }
                self.column_count = count;
                self.columns_remaining = count;
                self.state = ResolverState::ColumnDef;
                Ok(PayloadKind::ColumnCount)
            }
        }
    }

    fn classify_row(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<PayloadKind> {
        let Some(&first) = payload.first() else {
            return Err(self.violation("empty row packet", payload));
        };
        match first {
            0xFF => {
                self.state = ResolverState::Finished;
                Ok(PayloadKind::RowError)
            }
            0xFE if header.payload_length < 9 => {
                let deprecate = self.deprecate_eof();
                self.note_terminator_flags(payload, !deprecate);
                if deprecate {
                    Ok(PayloadKind::RowOk)
                } else {
                    Ok(PayloadKind::RowEof)
                }
            }
            _ if self.binary_rows => Ok(PayloadKind::BinaryRow),
            _ => Ok(PayloadKind::TextRow),
        }
    }

    /// Read the status flags out of a terminator and either loop back to
    /// the first-packet state (more results pending) or finish.
    fn note_terminator_flags(&mut self, payload: &[u8], as_eof: bool) {
        let status = terminator_status(payload, as_eof);
        self.more_results = status & server_status::SERVER_MORE_RESULTS_EXISTS != 0;
        if self.more_results {
            self.state = ResolverState::First;
            self.column_count = 0;
            self.columns_remaining = 0;
        } else {
            self.state = ResolverState::Finished;
        }
    }

    fn after_prepare_params(&mut self) {
        if self.prepare_columns_remaining > 0 {
            self.state = ResolverState::PrepareColumnDef;
        } else {
            self.state = ResolverState::Finished;
        }
    }

    fn violation(&self, message: &str, payload: &[u8]) -> Error {
        tracing::warn!(
            state = ?self.state,
            first_byte = payload.first().copied(),
            "response grammar violation: {message}"
        );
        Error::protocol(format!("response grammar violation: {message}"))
    }
}

fn is_eof(header: &PacketHeader, payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && header.payload_length < 9
}

/// Status flags of a terminator packet. OK terminators are read field
/// by field past the marker byte, which may be 0x00 or 0xFE.
fn terminator_status(payload: &[u8], as_eof: bool) -> u16 {
    let mut reader = PacketReader::new(payload);
    if as_eof {
        return reader.parse_eof_packet().map_or(0, |eof| eof.status_flags);
    }
    reader.skip(1);
    let Some(_affected_rows) = reader.read_lenenc_int() else {
        return 0;
    };
    let Some(_last_insert_id) = reader.read_lenenc_int() else {
        return 0;
    };
    reader.read_u16_le().unwrap_or(0)
}
