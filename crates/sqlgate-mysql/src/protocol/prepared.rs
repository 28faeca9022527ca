//! COM_STMT_PREPARE response metadata.
//!
//! A successful prepare returns a COM_STMT_PREPARE_OK packet followed by
//! parameter and column definitions. The resolver needs the counts from
//! that first packet to walk the rest of the metadata stream.

/// Response from COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy)]
pub struct StmtPrepareOk {
    /// Unique statement identifier (used in execute/close)
    pub statement_id: u32,
    /// Number of columns in result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of parameters (placeholders) in the SQL
    pub num_params: u16,
    /// Number of warnings generated during prepare
    pub warnings: u16,
}

/// Parse a COM_STMT_PREPARE_OK response.
///
/// # Format
///
/// - Status: 0x00 (1 byte)
/// - Statement ID (4 bytes)
/// - Number of columns (2 bytes)
/// - Number of parameters (2 bytes)
/// - Reserved: 0x00 (1 byte)
/// - Warning count (2 bytes, if CLIENT_PROTOCOL_41)
///
/// Returns `None` if the data is malformed.
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Option<StmtPrepareOk> {
    if data.len() < 12 {
        return None;
    }

    // First byte should be 0x00 (OK status)
    if data[0] != 0x00 {
        return None;
    }

    let statement_id = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    let num_columns = u16::from_le_bytes([data[5], data[6]]);
    let num_params = u16::from_le_bytes([data[7], data[8]]);
    // data[9] is reserved (0x00)
    let warnings = u16::from_le_bytes([data[10], data[11]]);

    Some(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings,
    })
}
