use std::time::Duration;

use anyhow::bail;

/// Lower bound for the receive buffer: the largest fragment datagram either
///  direction produces is a bit over 1100 bytes (type byte, crypto overhead,
///  fragment header and a full fragment), and a datagram larger than the
///  buffer would be silently truncated by the socket.
pub const MIN_RECV_BUFFER_LEN: usize = 2048;

/// How the listener hands completed packets to the application.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DispatchMode {
    /// Invoke the handler inline in the receive loop: strictly one packet at a
    ///  time, in completion order, and a slow handler delays receipt of the
    ///  next datagram. This is the default, and the contract the protocol was
    ///  designed around - switching away from it is an explicit choice.
    Serial,

    /// Spawn a task per completed packet, with at most `max_in_flight` of them
    ///  alive at a time. Packets may be handled out of order and concurrently;
    ///  handlers must be written for that.
    Concurrent { max_in_flight: usize },
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Size of the receive buffer, which caps the datagram size this listener
    ///  can accept. See [MIN_RECV_BUFFER_LEN].
    pub recv_buffer_len: usize,

    /// Minimum interval between expiry sweeps over partial reassemblies. The
    ///  sweep frequency only affects memory pressure under fragment loss,
    ///  never correctness.
    pub cleanup_interval: Duration,

    pub dispatch: DispatchMode,
}

impl Default for ListenerConfig {
    fn default() -> ListenerConfig {
        ListenerConfig {
            recv_buffer_len: 4096,
            cleanup_interval: Duration::from_secs(2),
            dispatch: DispatchMode::Serial,
        }
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.recv_buffer_len < MIN_RECV_BUFFER_LEN {
            bail!("receive buffer of {} bytes is too small to hold a full fragment datagram, the minimum is {}", self.recv_buffer_len, MIN_RECV_BUFFER_LEN);
        }
        if self.cleanup_interval.is_zero() {
            bail!("cleanup interval must not be zero");
        }
        if let DispatchMode::Concurrent { max_in_flight } = self.dispatch {
            if max_in_flight == 0 {
                bail!("concurrent dispatch needs at least one in-flight packet");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_default_config_is_valid() {
        assert!(ListenerConfig::default().validate().is_ok());
    }

    #[rstest]
    #[case::tiny_buffer(ListenerConfig { recv_buffer_len: 512, ..ListenerConfig::default() })]
    #[case::zero_cleanup(ListenerConfig { cleanup_interval: Duration::ZERO, ..ListenerConfig::default() })]
    #[case::zero_in_flight(ListenerConfig { dispatch: DispatchMode::Concurrent { max_in_flight: 0 }, ..ListenerConfig::default() })]
    fn test_invalid_config_rejected(#[case] config: ListenerConfig) {
        assert!(config.validate().is_err());
    }
}
