use std::net::SocketAddr;

use anyhow::bail;

use crate::addr::{decode_address, encode_address, ADDRESS_BYTES};
use crate::crypto::{WireCrypto, MAC_BYTES};

/// Serialized size of a master token: the encoded address plus its MAC.
pub const MASTER_TOKEN_BYTES: usize = ADDRESS_BYTES + MAC_BYTES;

/// A master token proves that the master previously observed and accepted a
///  client's source address: the encoded address plus a keyed MAC over exactly
///  those address bytes, minted with a key that never leaves the master.
///
/// Clients treat the token as opaque bytes and echo it inside every encrypted
///  packet they send, which lets the master re-confirm the claimed address
///  cheaply instead of re-running a full handshake.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MasterToken {
    pub address: SocketAddr,
    mac: Vec<u8>,
}

impl MasterToken {
    /// Mint a token for an address the master has just validated.
    pub fn mint(address: SocketAddr, crypto: &dyn WireCrypto, mac_key: &[u8]) -> anyhow::Result<MasterToken> {
        let mac = crypto.mac(&encode_address(Some(&address)), mac_key)?;
        if mac.len() != MAC_BYTES {
            bail!("crypto provider produced a {} byte mac, the token format requires {}", mac.len(), MAC_BYTES);
        }
        Ok(MasterToken { address, mac })
    }

    pub fn write(&self) -> [u8; MASTER_TOKEN_BYTES] {
        let mut buffer = [0u8; MASTER_TOKEN_BYTES];
        buffer[..ADDRESS_BYTES].copy_from_slice(&encode_address(Some(&self.address)));
        buffer[ADDRESS_BYTES..].copy_from_slice(&self.mac);
        buffer
    }

    /// Decode and verify a token. The MAC is checked before the address is
    ///  surfaced anywhere, so a returned token's address can be trusted to the
    ///  extent the MAC key is secret. Any structural or MAC failure is `None`.
    pub fn read(buffer: &[u8], crypto: &dyn WireCrypto, mac_key: &[u8]) -> Option<MasterToken> {
        if buffer.len() < MASTER_TOKEN_BYTES {
            return None;
        }

        let address = decode_address(&buffer[..ADDRESS_BYTES])?;

        let mac = &buffer[ADDRESS_BYTES..MASTER_TOKEN_BYTES];
        if !crypto.mac_verify(&buffer[..ADDRESS_BYTES], mac, mac_key) {
            return None;
        }

        Some(MasterToken {
            address,
            mac: mac.to_vec(),
        })
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use rstest::rstest;

    use crate::crypto::{generate_mac_key, NaclCrypto};

    use super::*;

    #[rstest]
    #[case::v4("1.2.3.4:5678")]
    #[case::v4_port_zero("9.8.7.6:0")]
    #[case::v6("[102:304:506:708:90a:b0c:d0e:f10]:4660")]
    fn test_token_round_trip(#[case] addr: &str) {
        let addr = SocketAddr::from_str(addr).unwrap();
        let mac_key = generate_mac_key();

        let token = MasterToken::mint(addr, &NaclCrypto, &mac_key).unwrap();
        let buffer = token.write();
        assert_eq!(buffer.len(), MASTER_TOKEN_BYTES);

        let read_back = MasterToken::read(&buffer, &NaclCrypto, &mac_key).unwrap();
        assert_eq!(read_back.address, addr);
        assert_eq!(read_back, token);
    }

    /// the MAC must bind the token to the exact address bytes it was minted
    ///  over - changing any single byte of the address must fail verification
    #[rstest]
    fn test_token_bound_to_address_bytes() {
        let addr = SocketAddr::from_str("1.2.3.4:5678").unwrap();
        let mac_key = generate_mac_key();
        let buffer = MasterToken::mint(addr, &NaclCrypto, &mac_key).unwrap().write();

        for i in 0..ADDRESS_BYTES {
            let mut tampered = buffer;
            tampered[i] ^= 0x01;
            assert!(MasterToken::read(&tampered, &NaclCrypto, &mac_key).is_none(), "change in address byte {} was not detected", i);
        }
    }

    #[rstest]
    fn test_token_rejects_tampered_mac() {
        let addr = SocketAddr::from_str("1.2.3.4:5678").unwrap();
        let mac_key = generate_mac_key();
        let buffer = MasterToken::mint(addr, &NaclCrypto, &mac_key).unwrap().write();

        for i in ADDRESS_BYTES..MASTER_TOKEN_BYTES {
            let mut tampered = buffer;
            tampered[i] ^= 0x01;
            assert!(MasterToken::read(&tampered, &NaclCrypto, &mac_key).is_none(), "bit flip in mac byte {} was not detected", i);
        }
    }

    #[rstest]
    fn test_token_rejects_wrong_key() {
        let addr = SocketAddr::from_str("1.2.3.4:5678").unwrap();
        let buffer = MasterToken::mint(addr, &NaclCrypto, &generate_mac_key()).unwrap().write();

        assert!(MasterToken::read(&buffer, &NaclCrypto, &generate_mac_key()).is_none());
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated(vec![1u8; MASTER_TOKEN_BYTES - 1])]
    #[case::all_zero(vec![0u8; MASTER_TOKEN_BYTES])]
    fn test_token_rejects_malformed_buffer(#[case] buffer: Vec<u8>) {
        assert!(MasterToken::read(&buffer, &NaclCrypto, &generate_mac_key()).is_none());
    }
}
