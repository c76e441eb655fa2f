use std::time::Duration;

/// Maximum payload bytes carried by a single fragment.
pub const FRAGMENT_SIZE: usize = 1024;

/// Maximum number of fragments per logical packet. Together with
///  [FRAGMENT_SIZE] this caps a compressed payload at 255 * 1024 bytes.
pub const FRAGMENT_MAX: usize = 255;

/// Age after which an incomplete reassembly is discarded.
pub const FRAGMENT_TIMEOUT: Duration = Duration::from_secs(4);

// Well-known packet types. The relay init request is special at the transport
//  level: it is how a client first proves its address, so it is the one packet
//  type the master accepts without a valid master token.
pub const PACKET_TYPE_RELAY_INIT_REQUEST: u8 = 43;
pub const PACKET_TYPE_RELAY_REPORT: u8 = 48;
pub const PACKET_TYPE_RELAY_CONFIG_REQUEST: u8 = 50;
pub const PACKET_TYPE_RELAY_CONFIG_RESPONSE: u8 = 51;
pub const PACKET_TYPE_RELAY_INIT_RESPONSE: u8 = 52;

/// A logical packet travelling from a client (relay or game server) to the
///  master. `data` is the uncompressed payload; compression and fragmentation
///  happen below this type.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ToMasterPacket {
    pub packet_type: u8,
    pub id: u64,
    pub data: Vec<u8>,
}

/// A logical packet travelling from the master to a client, carrying an
///  HTTP-style status code alongside the payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ToClientPacket {
    pub packet_type: u8,
    pub id: u64,
    pub status: u16,
    pub data: Vec<u8>,
}

/// Pick a correlation id for a new logical packet. Correlation ids group the
///  fragments of one packet while they are in flight and are not a security
///  feature: collisions are tolerated (and detected via header mismatches) on
///  the receiving side, a sender just should not reuse an id while a packet
///  with that id may still be in flight.
pub fn random_correlation_id() -> u64 {
    rand::random()
}
