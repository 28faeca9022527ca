//! MySQL backend exchange engine.
//!
//! This crate drives request/response exchanges against MySQL backends
//! for a proxy: it frames packets out of pooled fixed-size chunks,
//! resolves the server's response grammar (OK/ERR, text and binary
//! result sets, prepare metadata, LOAD DATA LOCAL, multi-result
//! loops), and dispatches every classified payload to pluggable
//! response hooks, completing each exchange through a single-shot
//! callback.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlgate_mysql::config::BackendConfig;
//! use sqlgate_pool::ChunkPool;
//!
//! async fn run() -> sqlgate_core::Result<()> {
//!     let config = BackendConfig::new().host("127.0.0.1").port(3306);
//!     let pool = Arc::new(ChunkPool::new(config.chunk_size));
//!     let mut conn = sqlgate_mysql::net::connect(&config, pool).await?;
//!     let result = sqlgate_mysql::task::query(&mut conn, "SELECT 1").await?;
//!     assert_eq!(result.rows.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod connection;
pub mod exchange;
pub mod net;
pub mod protocol;
pub mod resolver;
pub mod task;

pub use buffer::{FrameBuffer, PacketView};
pub use config::BackendConfig;
pub use connection::{BackendConnection, ExchangeStream};
pub use exchange::{ExchangeOutcome, ResponseHooks};
pub use resolver::{PacketResolver, PayloadKind};
pub use task::{ColumnDefinition, CommandOkTask, TextResultSet, TextResultSetCollector};
