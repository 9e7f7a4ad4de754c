//! Out-of-band query protocol shared by master and game servers.
//!
//! Both query types use the same framing: a four byte all-ones prefix marks
//! the datagram as control traffic, followed by an ASCII command. Responses
//! repeat the prefix, a command-specific literal and a single separator byte.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::QueryError;

/// The single wire protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 86;

/// Marker distinguishing out-of-band queries from in-game traffic.
pub const QUERY_PREFIX: &[u8] = b"\xff\xff\xff\xff";

/// Separator between records and between key/value fields.
pub const RECORD_SEP: u8 = b'\\';

/// IPv4 octets, big-endian port, separator.
pub const SERVER_RECORD_LEN: usize = 7;

/// Receive buffer for status responses.
pub const STATUS_BUFFER_SIZE: usize = 1 << 14;

/// Default cap on the number of records accepted from a master.
pub const DEFAULT_MAX_SERVERS: usize = 1 << 9;

/// Default per-query receive timeout.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(1);

/// Header of a valid master list response.
pub const LIST_RESPONSE_HEADER: &[u8] = b"\xff\xff\xff\xffgetserversResponse\\";

/// Header of a valid game server status response.
pub const STATUS_RESPONSE_HEADER: &[u8] = b"\xff\xff\xff\xffstatusResponse\n\\";

/// Encodes the master server list query for the given protocol version.
pub fn list_query(protocol: u32) -> Vec<u8> {
    let mut query = QUERY_PREFIX.to_vec();
    query.extend_from_slice(format!("getservers {}", protocol).as_bytes());
    query
}

/// Encodes the game server status query.
pub fn status_query() -> Vec<u8> {
    let mut query = QUERY_PREFIX.to_vec();
    query.extend_from_slice(b"getstatus");
    query
}

/// Decodes a master list response into `(address, port)` records.
///
/// At most `max_records` records are returned; anything beyond the cap is
/// discarded unread.
pub fn parse_list_response(
    payload: &[u8],
    max_records: usize,
) -> Result<Vec<(Ipv4Addr, u16)>, QueryError> {
    if payload.is_empty() {
        return Err(QueryError::protocol("empty response"));
    }

    let body = payload
        .strip_prefix(LIST_RESPONSE_HEADER)
        .ok_or_else(|| QueryError::protocol("bad response header"))?;

    if body.len() % SERVER_RECORD_LEN != 0 {
        return Err(QueryError::Protocol(format!(
            "server list payload has unexpected size of {} (not a multiple of {})",
            body.len(),
            SERVER_RECORD_LEN
        )));
    }

    let mut records = Vec::with_capacity((body.len() / SERVER_RECORD_LEN).min(max_records));

    for record in body.chunks_exact(SERVER_RECORD_LEN).take(max_records) {
        if record[6] != RECORD_SEP {
            return Err(QueryError::Protocol(format!(
                "unexpected separator byte 0x{:02x} in server record",
                record[6]
            )));
        }

        let address = Ipv4Addr::new(record[0], record[1], record[2], record[3]);
        let port = u16::from(record[4]) << 8 | u16::from(record[5]);
        records.push((address, port));
    }

    Ok(records)
}

/// Decodes a status response into the server's configuration mapping.
///
/// Only the first line after the header carries key/value fields; trailing
/// lines (per-player score reports) are ignored. Keys are ASCII, values
/// UTF-8 with colour and markup sequences left raw.
pub fn parse_status_response(payload: &[u8]) -> Result<HashMap<String, String>, QueryError> {
    if payload.is_empty() {
        return Err(QueryError::protocol("empty response"));
    }

    let body = payload
        .strip_prefix(STATUS_RESPONSE_HEADER)
        .ok_or_else(|| QueryError::protocol("bad response header"))?;

    let mut line = match body.iter().position(|&byte| byte == b'\n') {
        Some(end) => &body[..end],
        None => body,
    };
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }

    let fields: Vec<&[u8]> = line.split(|&byte| byte == RECORD_SEP).collect();

    if fields.len() % 2 == 1 {
        return Err(QueryError::protocol(
            "bad number of separators in config string section",
        ));
    }

    let mut config = HashMap::with_capacity(fields.len() / 2);

    for pair in fields.chunks_exact(2) {
        let key = std::str::from_utf8(pair[0])
            .ok()
            .filter(|key| key.is_ascii())
            .ok_or_else(|| QueryError::protocol("non-ascii key in config string"))?;
        let value = std::str::from_utf8(pair[1])
            .map_err(|_| QueryError::protocol("malformed utf-8 in config value"))?;
        config.insert(key.to_string(), value.to_string());
    }

    Ok(config)
}
