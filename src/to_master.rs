//! The client→master direction of the protocol.
//!
//! Clients are untrusted and their datagrams arrive over plain UDP, so this
//! direction is sealed anonymously to the master's public key: anyone can
//! produce a valid datagram, and nothing about the sender is authenticated by
//! the encryption itself. What binds a datagram to a sender is the master
//! token carried inside the sealed payload - except for the relay init
//! request, which is how a client obtains its first token.
//!
//! Datagram layout (numbers little-endian):
//! ```ascii
//! 0:  packet type (u8)
//! 1:  <sealed box>
//!         master token (51 bytes: 19 byte address, 32 byte MAC)
//!         correlation id (u64)
//!         fragment index (u8)
//!         fragment count (u8)
//!         fragment payload (up to 1024 bytes of the zlib-compressed packet)
//!     </sealed box>
//! ```

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::compress::{compress, decompress};
use crate::crypto::WireCrypto;
use crate::fragment::FragmentBuffer;
use crate::listener::DatagramDecoder;
use crate::packet::{ToMasterPacket, FRAGMENT_MAX, FRAGMENT_SIZE, PACKET_TYPE_RELAY_INIT_REQUEST};
use crate::token::{MasterToken, MASTER_TOKEN_BYTES};

/// token + correlation id + fragment index + fragment count
const SEALED_HEADER_BYTES: usize = MASTER_TOKEN_BYTES + 8 + 1 + 1;

/// Client-side encoder: turns one logical packet into the sealed datagrams
///  that carry it. The caller sends each returned datagram independently; the
///  wire gives no ordering guarantee, only the fragment index does.
pub struct ToMasterBuilder {
    crypto: Arc<dyn WireCrypto>,
    seal_public_key: Vec<u8>,
    token_bytes: [u8; MASTER_TOKEN_BYTES],
}

impl ToMasterBuilder {
    /// A client that does not hold a token yet (i.e. one about to send its
    ///  first relay init request) passes `None`: that writes the all-zero
    ///  placeholder token, which can never verify and is only accepted for
    ///  the token-exempt init packet type.
    pub fn new(crypto: Arc<dyn WireCrypto>, seal_public_key: Vec<u8>, token: Option<&MasterToken>) -> ToMasterBuilder {
        ToMasterBuilder {
            crypto,
            seal_public_key,
            token_bytes: token.map(MasterToken::write).unwrap_or([0u8; MASTER_TOKEN_BYTES]),
        }
    }

    /// Compress and fragment a logical packet into sealed datagrams. Fails if
    ///  the compressed payload exceeds what [FRAGMENT_MAX] fragments can carry
    ///  - that is a local precondition violation, not a network condition.
    pub fn build(&self, packet: &ToMasterPacket) -> anyhow::Result<Vec<Vec<u8>>> {
        let data = compress(&packet.data)?;

        let fragment_total = data.len().div_ceil(FRAGMENT_SIZE);
        if fragment_total > FRAGMENT_MAX {
            bail!("{} byte packet can't be sent; too big even for {} fragments", data.len(), FRAGMENT_MAX);
        }

        let mut datagrams = Vec::with_capacity(fragment_total);
        for (index, chunk) in data.chunks(FRAGMENT_SIZE).enumerate() {
            datagrams.push(self.build_fragment(packet.packet_type, packet.id, index as u8, fragment_total as u8, chunk)?);
        }
        Ok(datagrams)
    }

    fn build_fragment(&self, packet_type: u8, id: u64, fragment_index: u8, fragment_total: u8, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut plaintext = BytesMut::with_capacity(SEALED_HEADER_BYTES + data.len());
        plaintext.put_slice(&self.token_bytes);
        plaintext.put_u64_le(id);
        plaintext.put_u8(fragment_index);
        plaintext.put_u8(fragment_total);
        plaintext.put_slice(data);

        let sealed = self.crypto.seal(&plaintext, &self.seal_public_key)?;

        let mut datagram = Vec::with_capacity(1 + sealed.len());
        datagram.push(packet_type);
        datagram.extend_from_slice(&sealed);
        Ok(datagram)
    }
}

/// Master-side decoder: unseals one datagram, enforces the token binding, and
///  feeds the fragment into the reassembly buffer.
pub struct MasterDecoder {
    crypto: Arc<dyn WireCrypto>,
    token_mac_key: Vec<u8>,
    seal_public_key: Vec<u8>,
    seal_private_key: Vec<u8>,
    fragments: FragmentBuffer,
}

impl MasterDecoder {
    pub fn new(crypto: Arc<dyn WireCrypto>, token_mac_key: Vec<u8>, seal_public_key: Vec<u8>, seal_private_key: Vec<u8>) -> MasterDecoder {
        MasterDecoder {
            crypto,
            token_mac_key,
            seal_public_key,
            seal_private_key,
            fragments: FragmentBuffer::new(),
        }
    }

    /// Feed one raw datagram. `Ok(Some(..))` when this datagram completes a
    ///  logical packet, `Ok(None)` for a valid fragment that does not, `Err`
    ///  for anything rejected - the caller drops rejected datagrams without
    ///  answering, a reply would hand probing attackers an oracle.
    ///
    /// The datagram is fully attacker-controlled: every field is bounds-checked
    ///  before use, and nothing inside the sealed box is trusted before the
    ///  unseal succeeds (and for non-init packets, the token verifies).
    pub fn handle(&self, now: Instant, datagram: &[u8]) -> anyhow::Result<Option<ToMasterPacket>> {
        if datagram.is_empty() {
            bail!("empty packet");
        }

        let packet_type = datagram[0];

        // the smallest datagram carrying a sealed, token-bearing fragment
        //  header; the overhead comes from the crypto provider, not from here
        let min_size = 1 + self.crypto.seal_overhead() + SEALED_HEADER_BYTES;
        let max_size = min_size + FRAGMENT_SIZE;

        if datagram.len() < min_size {
            bail!("{} byte packet too small, expected at least {} bytes", datagram.len(), min_size);
        }
        if datagram.len() > max_size {
            bail!("{} byte packet too big, expected no more than {} bytes", datagram.len(), max_size);
        }

        let decrypted = self.crypto.unseal(&datagram[1..], &self.seal_public_key, &self.seal_private_key)
            .context("failed to decrypt client packet")?;

        // guaranteed by the size bounds for a conforming provider, but the
        //  provider's word is not taken for it
        if decrypted.len() < SEALED_HEADER_BYTES {
            bail!("{} byte sealed payload too small, expected at least {} bytes", decrypted.len(), SEALED_HEADER_BYTES);
        }

        if packet_type != PACKET_TYPE_RELAY_INIT_REQUEST
            && MasterToken::read(&decrypted[..MASTER_TOKEN_BYTES], self.crypto.as_ref(), &self.token_mac_key).is_none()
        {
            bail!("failed to verify master token");
        }

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&decrypted[MASTER_TOKEN_BYTES..MASTER_TOKEN_BYTES + 8]);
        let id = u64::from_le_bytes(id_bytes);
        let fragment_index = decrypted[MASTER_TOKEN_BYTES + 8];
        let fragment_total = decrypted[MASTER_TOKEN_BYTES + 9];
        let payload = &decrypted[SEALED_HEADER_BYTES..];

        match self.fragments.add(now, packet_type, id, fragment_index, fragment_total, 0, payload) {
            Some(complete) => {
                let data = decompress(&complete).context("failed to decompress client packet")?;
                trace!("completed {} byte packet {:016x} of type {}", data.len(), id, packet_type);
                Ok(Some(ToMasterPacket { packet_type, id, data }))
            }
            None => Ok(None),
        }
    }
}

impl DatagramDecoder for MasterDecoder {
    type Packet = ToMasterPacket;

    fn handle(&self, now: Instant, datagram: &[u8]) -> anyhow::Result<Option<ToMasterPacket>> {
        MasterDecoder::handle(self, now, datagram)
    }

    fn cleanup(&self, now: Instant) {
        self.fragments.cleanup(now);
    }
}
