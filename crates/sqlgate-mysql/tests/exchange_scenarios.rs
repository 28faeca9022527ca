//! End-to-end exchange scenarios driven through the public API over
//! scripted in-memory streams.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use sqlgate_mysql::connection::{BackendConnection, ExchangeStream};
use sqlgate_mysql::exchange::{self, ExchangeOutcome, ResponseHooks};
use sqlgate_mysql::protocol::{Command, PacketHeader, PacketWriter, StmtPrepareOk, capabilities};
use sqlgate_mysql::task;
use sqlgate_pool::ChunkPool;

struct ScriptedStream {
    reads: VecDeque<Vec<u8>>,
    written: Vec<u8>,
}

impl ScriptedStream {
    fn new(reads: Vec<Vec<u8>>) -> Self {
        Self {
            reads: reads.into(),
            written: Vec::new(),
        }
    }
}

impl ExchangeStream for ScriptedStream {
    fn poll_read(&mut self, _cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<std::io::Result<usize>> {
        match self.reads.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.reads.push_front(chunk[n..].to_vec());
                }
                Poll::Ready(Ok(n))
            }
            None => Poll::Ready(Ok(0)),
        }
    }

    fn poll_write(&mut self, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        self.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(&mut self, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn block_on<F: Future>(fut: F) -> F::Output {
    let mut cx = Context::from_waker(Waker::noop());
    let mut fut = std::pin::pin!(fut);
    loop {
        if let Poll::Ready(value) = fut.as_mut().poll(&mut cx) {
            return value;
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn packet(sequence_id: u8, payload: &[u8]) -> Vec<u8> {
    let header = PacketHeader {
        payload_length: payload.len() as u32,
        sequence_id,
    };
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

fn column_def_payload(name: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_lenenc_bytes(b"def");
    w.write_lenenc_bytes(b"db");
    w.write_lenenc_bytes(b"t");
    w.write_lenenc_bytes(b"t");
    w.write_lenenc_bytes(name.as_bytes());
    w.write_lenenc_bytes(name.as_bytes());
    w.write_lenenc_int(0x0c);
    w.write_u16_le(45);
    w.write_u32_le(255);
    w.write_u8(0xFD);
    w.write_u16_le(0);
    w.write_u8(0);
    w.as_bytes().to_vec()
}

fn text_row(cells: &[Option<&[u8]>]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for cell in cells {
        match cell {
            Some(bytes) => w.write_lenenc_bytes(bytes),
            None => w.write_u8(0xFB),
        }
    }
    w.as_bytes().to_vec()
}

fn ok_terminator(status: u16) -> Vec<u8> {
    let mut p = vec![0xFE, 0x00, 0x00];
    p.extend_from_slice(&status.to_le_bytes());
    p.extend_from_slice(&[0x00, 0x00]);
    p
}

fn eof_payload(status: u16) -> Vec<u8> {
    let mut p = vec![0xFE, 0x00, 0x00];
    p.extend_from_slice(&status.to_le_bytes());
    p
}

fn err_payload(code: u16, message: &str) -> Vec<u8> {
    let mut p = vec![0xFF];
    p.extend_from_slice(&code.to_le_bytes());
    p.push(b'#');
    p.extend_from_slice(b"HY000");
    p.extend_from_slice(message.as_bytes());
    p
}

fn connection_with_caps(
    reads: Vec<Vec<u8>>,
    caps: u32,
) -> BackendConnection<ScriptedStream> {
    let pool = Arc::new(ChunkPool::new(4096));
    BackendConnection::new(ScriptedStream::new(reads), pool, caps)
}

fn connection(reads: Vec<Vec<u8>>) -> BackendConnection<ScriptedStream> {
    connection_with_caps(reads, capabilities::DEFAULT_BACKEND_FLAGS)
}

#[test]
fn query_collects_a_text_result_set() {
    let mut bytes = packet(1, &[0x02]);
    bytes.extend(packet(2, &column_def_payload("id")));
    bytes.extend(packet(3, &column_def_payload("name")));
    bytes.extend(packet(4, &text_row(&[Some(b"1"), Some(b"alice")])));
    bytes.extend(packet(5, &text_row(&[Some(b"2"), None])));
    bytes.extend(packet(6, &ok_terminator(0x0002)));
    let mut conn = connection(vec![bytes]);

    let result = block_on(task::query(&mut conn, "SELECT id, name FROM t")).expect("query");
    assert_eq!(result.columns.len(), 2);
    assert_eq!(result.column_index("name"), Some(1));
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0][1].as_deref(), Some(b"alice".as_slice()));
    assert_eq!(result.rows[1][1], None);
    assert!(result.ok.is_some());

    // The link is immediately reusable.
    assert!(!conn.exchange_in_flight());
    assert_eq!(conn.pool().stats().in_use, 0);
}

#[test]
fn query_under_legacy_eof_capabilities() {
    let caps = capabilities::DEFAULT_BACKEND_FLAGS & !capabilities::CLIENT_DEPRECATE_EOF;
    let mut bytes = packet(1, &[0x01]);
    bytes.extend(packet(2, &column_def_payload("id")));
    bytes.extend(packet(3, &eof_payload(0x0002)));
    bytes.extend(packet(4, &text_row(&[Some(b"1")])));
    bytes.extend(packet(5, &eof_payload(0x0002)));
    let mut conn = connection_with_caps(vec![bytes], caps);

    let result = block_on(task::query(&mut conn, "SELECT id FROM t")).expect("query");
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.rows.len(), 1);
}

#[test]
fn execute_surfaces_the_ok_packet() {
    let ok = vec![0x00, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00];
    let mut conn = connection(vec![packet(1, &ok)]);

    let ok = block_on(task::execute(&mut conn, "DELETE FROM t"))
        .expect("execute")
        .expect("ok packet");
    assert_eq!(ok.affected_rows, 3);
}

#[test]
fn execute_propagates_server_errors() {
    let mut conn = connection(vec![packet(1, &err_payload(1146, "Table 't' doesn't exist"))]);

    let err = block_on(task::execute(&mut conn, "DELETE FROM t")).expect_err("server error");
    assert_eq!(err.server_code(), Some(1146));
    assert_eq!(conn.last_message(), Some("Table 't' doesn't exist"));
}

#[test]
fn ping_round_trip() {
    let ok = vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
    let mut conn = connection(vec![packet(1, &ok)]);
    block_on(task::ping(&mut conn)).expect("ping");
    // COM_PING is a bare command packet.
    assert_eq!(conn.stream().written, vec![0x01, 0x00, 0x00, 0x00, 0x0e]);
}

#[derive(Default)]
struct PrepareProbe {
    prepare: Option<StmtPrepareOk>,
    param_defs: usize,
    column_defs: usize,
}

impl ResponseHooks for PrepareProbe {
    type Output = (Option<StmtPrepareOk>, usize, usize);

    fn take_result(&mut self) -> Self::Output {
        (self.prepare.take(), self.param_defs, self.column_defs)
    }

    fn on_prepare_ok(&mut self, ok: &StmtPrepareOk) {
        self.prepare = Some(*ok);
    }

    fn on_prepare_param_def(&mut self, _payload: &[u8]) {
        self.param_defs += 1;
    }

    fn on_prepare_column_def(&mut self, _payload: &[u8]) {
        self.column_defs += 1;
    }
}

#[test]
fn prepare_metadata_flows_through_hooks() {
    let prepare_ok = [
        0x00, 0x2A, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00,
    ];
    let mut bytes = packet(1, &prepare_ok);
    bytes.extend(packet(2, &column_def_payload("?")));
    bytes.extend(packet(3, &column_def_payload("?")));
    bytes.extend(packet(4, &column_def_payload("id")));
    let mut conn = connection(vec![bytes]);

    let mut slot = None;
    block_on(exchange::request(
        &mut conn,
        Command::StmtPrepare,
        b"SELECT id FROM t WHERE a = ? AND b = ?",
        PrepareProbe::default(),
        |outcome| slot = Some(outcome),
    ));

    let (prepare, param_defs, column_defs) = match slot.expect("completion fired") {
        ExchangeOutcome::Success(result) => result,
        ExchangeOutcome::Failure(e) => panic!("prepare failed: {e}"),
    };
    let prepare = prepare.expect("prepare metadata");
    assert_eq!(prepare.statement_id, 0x2A);
    assert_eq!(param_defs, 2);
    assert_eq!(column_defs, 1);
}

#[test]
fn empty_packet_request_drives_a_response() {
    let ok = vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
    let mut conn = connection(vec![packet(3, &ok)]);
    let mut slot = None;
    block_on(exchange::request_empty_packet(
        &mut conn,
        2,
        task::CommandOkTask::new(),
        |outcome| slot = Some(outcome),
    ));
    assert!(slot.expect("completion fired").is_success());
    assert_eq!(conn.stream().written, vec![0x00, 0x00, 0x00, 0x02]);
}

#[test]
fn raw_packet_request() {
    let ok = vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
    let mut conn = connection(vec![packet(1, &ok)]);
    let raw = packet(0, &[Command::Query as u8, b'D', b'O', b' ', b'1']);
    let mut slot = None;
    block_on(exchange::request_raw(
        &mut conn,
        &raw,
        task::CommandOkTask::new(),
        |outcome| slot = Some(outcome),
    ));
    assert!(slot.expect("completion fired").is_success());
    assert_eq!(conn.stream().written, raw);
}

#[test]
fn back_to_back_exchanges_reuse_the_chunk() {
    let ok = vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
    let mut conn = connection(vec![packet(1, &ok), packet(1, &ok)]);

    block_on(task::execute(&mut conn, "DO 1")).expect("first");
    block_on(task::execute(&mut conn, "DO 2")).expect("second");
    let stats = conn.pool().stats();
    assert_eq!(stats.allocated, 1);
    assert_eq!(stats.in_use, 0);
}
