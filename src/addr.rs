use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

/// Serialized size of a network address, the same for both IP families.
pub const ADDRESS_BYTES: usize = 19;

const ADDRESS_NONE: u8 = 0;
const ADDRESS_IPV4: u8 = 1;
const ADDRESS_IPV6: u8 = 2;

/// Encode an address into its fixed 19-byte wire representation:
///  a one-byte family tag, then for IP V4 four octets and a little-endian port,
///  for IP V6 sixteen octets and a little-endian port, zero-padded to the fixed
///  width. `None` encodes as the `none` tag with all other bytes zero.
pub fn encode_address(address: Option<&SocketAddr>) -> [u8; ADDRESS_BYTES] {
    let mut buffer = [0u8; ADDRESS_BYTES];
    match address {
        None => {
            buffer[0] = ADDRESS_NONE;
        }
        Some(SocketAddr::V4(addr)) => {
            buffer[0] = ADDRESS_IPV4;
            buffer[1..5].copy_from_slice(&addr.ip().octets());
            buffer[5..7].copy_from_slice(&addr.port().to_le_bytes());
        }
        Some(SocketAddr::V6(addr)) => {
            buffer[0] = ADDRESS_IPV6;
            buffer[1..17].copy_from_slice(&addr.ip().octets());
            buffer[17..19].copy_from_slice(&addr.port().to_le_bytes());
        }
    }
    buffer
}

/// Inverse of [encode_address]. Returns `None` for the `none` tag, an
///  unrecognized tag, or a buffer shorter than [ADDRESS_BYTES].
pub fn decode_address(buffer: &[u8]) -> Option<SocketAddr> {
    if buffer.len() < ADDRESS_BYTES {
        return None;
    }
    match buffer[0] {
        ADDRESS_IPV4 => {
            let ip = Ipv4Addr::new(buffer[1], buffer[2], buffer[3], buffer[4]);
            let port = u16::from_le_bytes([buffer[5], buffer[6]]);
            Some(SocketAddr::from((ip, port)))
        }
        ADDRESS_IPV6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buffer[1..17]);
            let port = u16::from_le_bytes([buffer[17], buffer[18]]);
            Some(SocketAddr::from((Ipv6Addr::from(octets), port)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::v4("1.2.3.4:5678", [1, 1,2,3,4, 0x2e,0x16, 0,0,0,0,0,0,0,0,0,0,0,0])]
    #[case::v4_port_zero("9.8.7.6:0", [1, 9,8,7,6, 0,0, 0,0,0,0,0,0,0,0,0,0,0,0])]
    #[case::v6("[102:304:506:708:90a:b0c:d0e:f10]:4660", [2, 1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16, 0x34,0x12])]
    fn test_encode_address(#[case] addr: &str, #[case] expected: [u8; ADDRESS_BYTES]) {
        let addr = SocketAddr::from_str(addr).unwrap();
        assert_eq!(encode_address(Some(&addr)), expected);
    }

    #[rstest]
    fn test_encode_address_none() {
        assert_eq!(encode_address(None), [0u8; ADDRESS_BYTES]);
    }

    #[rstest]
    #[case::v4("1.2.3.4:5678")]
    #[case::v4_high_port("255.255.255.255:65535")]
    #[case::v6("[102:304:506:708:90a:b0c:d0e:f10]:4660")]
    #[case::v6_loopback("[::1]:80")]
    fn test_address_round_trip(#[case] addr: &str) {
        let addr = SocketAddr::from_str(addr).unwrap();
        assert_eq!(decode_address(&encode_address(Some(&addr))), Some(addr));
    }

    #[rstest]
    #[case::none_tag(vec![0u8; ADDRESS_BYTES])]
    #[case::unknown_tag(vec![3, 1,2,3,4, 0x2e,0x16, 0,0,0,0,0,0,0,0,0,0,0,0])]
    #[case::too_short(vec![1, 1,2,3,4, 0x2e,0x16])]
    #[case::empty(vec![])]
    fn test_decode_address_rejected(#[case] buffer: Vec<u8>) {
        assert_eq!(decode_address(&buffer), None);
    }
}
