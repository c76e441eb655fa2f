//! Secure fragmented UDP transport between a coordination master and untrusted
//!  edge clients (relays and game servers reporting in from the open internet).
//!
//! The payloads are JSON-ish control messages of unbounded size; UDP datagrams
//!  are not. This crate moves one logical packet as up to 255 fragments of up
//!  to 1024 bytes each (the payload is zlib-compressed first), correlated by a
//!  sender-chosen 8-byte id and reassembled out of order, exactly once, on the
//!  receiving side.
//!
//! ## Design goals
//!
//! * Everything on the wire is attacker-controlled until a cryptographic check
//!   has passed, and the two directions have different trust shapes:
//!   * client→master is sealed anonymously to the master's public key. The
//!     encryption authenticates nobody - what ties a packet to a sender is the
//!     *master token* carried inside the sealed payload, a MAC'ed copy of the
//!     sender's address that the master itself minted earlier. The relay init
//!     request is the one token-exempt packet type, since it is how a client
//!     gets its first token.
//!   * master→client carries a detached signature under the master's signing
//!     key over everything after the type byte.
//! * Malformed, truncated or unverifiable datagrams are dropped silently.
//!   Answering them - even with an error - would give a probing attacker an
//!   oracle for which guesses pass which check.
//! * Reassembly state is bounded per slot (at most 255 fragments) and expires
//!   after four seconds, so bursts of never-completed fragments cannot pin
//!   memory for long.
//! * No delivery guarantee, no ordering between logical packets, no congestion
//!   control: a layer above resubmits a logical packet under a fresh
//!   correlation id if no response arrives in time.
//!
//! ## Wire formats
//!
//! All numbers little-endian.
//!
//! Client→master datagram:
//! ```ascii
//! 0:  packet type (u8)
//! 1:  sealed box over:
//!       0:  master token (19 byte address + 32 byte MAC)
//!       51: correlation id (u64)
//!       59: fragment index (u8)
//!       60: fragment count (u8)
//!       61: fragment payload (<= 1024 bytes)
//! ```
//!
//! Master→client datagram:
//! ```ascii
//! 0:  packet type (u8)
//! 1:  signature (64 bytes) over:
//!       0:  correlation id (u64)
//!       8:  fragment index (u8)
//!       9:  fragment count (u8)
//!       10: status code (u16)
//!       12: fragment payload (<= 1024 bytes)
//! ```
//!
//! ## Pieces
//!
//! * [to_master] / [to_client] - builder and decoder for each direction
//! * [fragment] - the reassembly buffer both decoders feed
//! * [token] - master token mint/verify
//! * [listener] - socket ownership, receive loop, dispatch, cleanup cadence
//! * [crypto] - the primitive seam ([crypto::WireCrypto]) and its NaCl-family
//!   implementation

pub mod addr;
pub mod compress;
pub mod config;
pub mod crypto;
pub mod fragment;
pub mod listener;
pub mod packet;
pub mod to_client;
pub mod to_master;
pub mod token;
