//! The master→client direction of the protocol.
//!
//! The master is the single trusted party, so this direction needs no
//! confidentiality, only authenticity: each fragment carries a detached
//! signature under the master's signing key, and a client accepts nothing
//! that does not verify. The status code gives the master an HTTP-style
//! result channel alongside the payload.
//!
//! Datagram layout (numbers little-endian):
//! ```ascii
//! 0:  packet type (u8)
//! 1:  signature (64 bytes)
//! 65: <signed>
//!         correlation id (u64)
//!         fragment index (u8)
//!         fragment count (u8)
//!         status code (u16)
//!         fragment payload (up to 1024 bytes of the zlib-compressed packet)
//!     </signed>
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
use crate::packet::{ToClientPacket, FRAGMENT_MAX, FRAGMENT_SIZE};

/// correlation id + fragment index + fragment count + status
const SIGNED_HEADER_BYTES: usize = 8 + 1 + 1 + 2;

/// Master-side encoder: compresses, fragments and signs one logical packet.
pub struct ToClientBuilder {
    crypto: Arc<dyn WireCrypto>,
    sign_private_key: Vec<u8>,
}

impl ToClientBuilder {
    pub fn new(crypto: Arc<dyn WireCrypto>, sign_private_key: Vec<u8>) -> ToClientBuilder {
        ToClientBuilder {
            crypto,
            sign_private_key,
        }
    }

    /// Compress and fragment a logical packet into signed datagrams, to be
    ///  sent independently by the caller. Fails if the compressed payload
    ///  exceeds what [FRAGMENT_MAX] fragments can carry.
    pub fn build(&self, packet: &ToClientPacket) -> anyhow::Result<Vec<Vec<u8>>> {
        let data = compress(&packet.data)?;

        let fragment_total = data.len().div_ceil(FRAGMENT_SIZE);
        if fragment_total > FRAGMENT_MAX {
            bail!("{} byte packet can't be sent; too big even for {} fragments", data.len(), FRAGMENT_MAX);
        }

        let mut datagrams = Vec::with_capacity(fragment_total);
        for (index, chunk) in data.chunks(FRAGMENT_SIZE).enumerate() {
            datagrams.push(self.build_fragment(packet.packet_type, packet.id, index as u8, fragment_total as u8, packet.status, chunk)?);
        }
        Ok(datagrams)
    }

    fn build_fragment(&self, packet_type: u8, id: u64, fragment_index: u8, fragment_total: u8, status: u16, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut signed = BytesMut::with_capacity(SIGNED_HEADER_BYTES + data.len());
        signed.put_u64_le(id);
        signed.put_u8(fragment_index);
        signed.put_u8(fragment_total);
        signed.put_u16_le(status);
        signed.put_slice(data);

        let signature = self.crypto.sign(&signed, &self.sign_private_key)?;

        let mut datagram = Vec::with_capacity(1 + signature.len() + signed.len());
        datagram.push(packet_type);
        datagram.extend_from_slice(&signature);
        datagram.extend_from_slice(&signed);
        Ok(datagram)
    }
}

/// Client-side decoder: verifies the master's signature on one datagram and
///  feeds the fragment into the reassembly buffer.
pub struct ClientDecoder {
    crypto: Arc<dyn WireCrypto>,
    master_sign_public_key: Vec<u8>,
    fragments: FragmentBuffer,
}

impl ClientDecoder {
    pub fn new(crypto: Arc<dyn WireCrypto>, master_sign_public_key: Vec<u8>) -> ClientDecoder {
        ClientDecoder {
            crypto,
            master_sign_public_key,
            fragments: FragmentBuffer::new(),
        }
    }

    /// Feed one raw datagram; same contract as the master-side decoder:
    ///  `Ok(Some(..))` completes a packet, `Ok(None)` is a valid fragment that
    ///  does not, `Err` is rejected input to be dropped without an answer.
    pub fn handle(&self, now: Instant, datagram: &[u8]) -> anyhow::Result<Option<ToClientPacket>> {
        if datagram.is_empty() {
            bail!("empty packet");
        }

        let packet_type = datagram[0];

        let unsigned_size = 1 + self.crypto.signature_bytes();
        let header_size = unsigned_size + SIGNED_HEADER_BYTES;

        if datagram.len() < header_size {
            bail!("{} byte packet too small, expected at least {} bytes", datagram.len(), header_size);
        }
        if datagram.len() > header_size + FRAGMENT_SIZE {
            bail!("{} byte packet too big, expected no more than {} bytes", datagram.len(), header_size + FRAGMENT_SIZE);
        }

        let signature = &datagram[1..unsigned_size];
        let signed = &datagram[unsigned_size..];

        if !self.crypto.verify(signed, &self.master_sign_public_key, signature) {
            bail!("failed to verify master packet signature");
        }

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&signed[..8]);
        let id = u64::from_le_bytes(id_bytes);
        let fragment_index = signed[8];
        let fragment_total = signed[9];
        let status = u16::from_le_bytes([signed[10], signed[11]]);
        let payload = &signed[SIGNED_HEADER_BYTES..];

        match self.fragments.add(now, packet_type, id, fragment_index, fragment_total, status, payload) {
            Some(complete) => {
                let data = decompress(&complete).context("failed to decompress master packet")?;
                trace!("completed {} byte packet {:016x} of type {} with status {}", data.len(), id, packet_type, status);
                Ok(Some(ToClientPacket { packet_type, id, status, data }))
            }
            None => Ok(None),
        }
    }
}

impl DatagramDecoder for ClientDecoder {
    type Packet = ToClientPacket;

    fn handle(&self, now: Instant, datagram: &[u8]) -> anyhow::Result<Option<ToClientPacket>> {
        ClientDecoder::handle(self, now, datagram)
    }

    fn cleanup(&self, now: Instant) {
        self.fragments.cleanup(now);
    }
}
