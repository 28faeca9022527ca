//! Ready-made response consumers and query conveniences.
//!
//! These are plain [`ResponseHooks`] implementations layered on the
//! exchange driver: a collector that materializes text result sets and
//! a task for OK/ERR commands, plus async functions that wire them to a
//! connection and surface the completion as a `Result`.

use sqlgate_core::{Error, Result};

use crate::connection::{BackendConnection, ExchangeStream};
use crate::exchange::{self, ExchangeOutcome, ResponseHooks};
use crate::protocol::{Command, OkPacket, PacketReader};

/// Column metadata from a result set column definition payload.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDefinition {
    /// Parse a column definition payload (protocol 4.1 layout).
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(payload);
        let catalog = reader.read_lenenc_string()?;
        let schema = reader.read_lenenc_string()?;
        let table = reader.read_lenenc_string()?;
        let org_table = reader.read_lenenc_string()?;
        let name = reader.read_lenenc_string()?;
        let org_name = reader.read_lenenc_string()?;

        // Length of the fixed fields, always 0x0c
        let _fixed_len = reader.read_lenenc_int();

        let charset = reader.read_u16_le()?;
        let column_length = reader.read_u32_le()?;
        let column_type = reader.read_u8()?;
        let flags = reader.read_u16_le()?;
        let decimals = reader.read_u8()?;

        Some(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }
}

/// A text protocol result set materialized in memory.
///
/// Cells keep their wire encoding; `None` is SQL NULL.
#[derive(Debug, Default)]
pub struct TextResultSet {
    pub columns: Vec<ColumnDefinition>,
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    /// Terminator of the (last) result set, when the server sent one
    pub ok: Option<OkPacket>,
}

impl TextResultSet {
    /// Index of the column named `name`, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Collects column definitions and text rows into a [`TextResultSet`].
#[derive(Debug, Default)]
pub struct TextResultSetCollector {
    result: TextResultSet,
}

impl TextResultSetCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseHooks for TextResultSetCollector {
    type Output = TextResultSet;

    fn take_result(&mut self) -> TextResultSet {
        std::mem::take(&mut self.result)
    }

    fn on_column_def(&mut self, payload: &[u8]) {
        if let Some(column) = ColumnDefinition::parse(payload) {
            self.result.columns.push(column);
        }
    }

    fn on_text_row(&mut self, payload: &[u8]) {
        let mut reader = PacketReader::new(payload);
        let mut row = Vec::with_capacity(self.result.columns.len());
        for _ in 0..self.result.columns.len() {
            match reader.read_lenenc_bytes_nullable() {
                Some(cell) => row.push(cell),
                None => break,
            }
        }
        self.result.rows.push(row);
    }

    fn on_ok(&mut self, ok: &OkPacket) {
        self.result.ok = Some(ok.clone());
    }

    fn on_row_ok(&mut self, ok: &OkPacket) {
        self.result.ok = Some(ok.clone());
    }
}

/// Consumer for commands answered by a single OK (or ERR) packet.
#[derive(Debug, Default)]
pub struct CommandOkTask {
    ok: Option<OkPacket>,
}

impl CommandOkTask {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseHooks for CommandOkTask {
    type Output = Option<OkPacket>;

    fn take_result(&mut self) -> Option<OkPacket> {
        self.ok.take()
    }

    fn on_ok(&mut self, ok: &OkPacket) {
        self.ok = Some(ok.clone());
    }

    fn on_row_ok(&mut self, ok: &OkPacket) {
        self.ok = Some(ok.clone());
    }
}

/// Run a text protocol query and collect its result set.
pub async fn query<S: ExchangeStream>(
    conn: &mut BackendConnection<S>,
    sql: &str,
) -> Result<TextResultSet> {
    let mut slot = None;
    exchange::request(
        conn,
        Command::Query,
        sql.as_bytes(),
        TextResultSetCollector::new(),
        |outcome| slot = Some(outcome),
    )
    .await;
    take_outcome(slot)
}

/// Run a statement expected to answer with a single OK packet.
pub async fn execute<S: ExchangeStream>(
    conn: &mut BackendConnection<S>,
    sql: &str,
) -> Result<Option<OkPacket>> {
    let mut slot = None;
    exchange::request(
        conn,
        Command::Query,
        sql.as_bytes(),
        CommandOkTask::new(),
        |outcome| slot = Some(outcome),
    )
    .await;
    take_outcome(slot)
}

/// COM_PING round-trip.
pub async fn ping<S: ExchangeStream>(conn: &mut BackendConnection<S>) -> Result<()> {
    let mut slot = None;
    exchange::request(conn, Command::Ping, &[], CommandOkTask::new(), |outcome| {
        slot = Some(outcome);
    })
    .await;
    take_outcome(slot).map(|_| ())
}

/// The driver fires the completion callback exactly once before
/// returning, so an empty slot is a driver bug surfaced as an error
/// rather than a panic.
fn take_outcome<T>(slot: Option<ExchangeOutcome<T>>) -> Result<T> {
    match slot {
        Some(outcome) => outcome.into_result(),
        None => Err(Error::protocol("exchange ended without completion")),
    }
}
