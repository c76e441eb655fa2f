use std::sync::Mutex;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::packet::{FRAGMENT_MAX, FRAGMENT_TIMEOUT};

/// One logical packet being reassembled. The slot is created by the first
///  fragment that arrives for a correlation id and destroyed either when the
///  set completes or when the cleanup sweep expires it - never both, and both
///  paths run under the buffer's lock.
///
/// `created_at` is fixed at slot creation: a trickle of fragments does not
///  keep an incomplete reassembly alive past [FRAGMENT_TIMEOUT].
struct PendingPacket {
    created_at: Instant,
    packet_type: u8,
    fragment_total: u8,
    status: u16,
    received: usize,
    fragments: Vec<Option<Vec<u8>>>,
}

/// Reassembly buffer for fragmented packets: a map from correlation id to
///  [PendingPacket], fed one fragment at a time from the receive loop.
///
/// Everything reaching [FragmentBuffer::add] is attacker-controlled (it has
///  passed the cryptographic checks, but an attacker can always produce valid
///  ciphertext for the anonymous-sender direction), so malformed or
///  inconsistent fragments are silently ignored - the caller cannot tell them
///  apart from "set not complete yet", and must not: answering malformed input
///  would give a probing attacker an oracle.
///
/// NB: The number of distinct in-flight correlation ids is not capped between
///  cleanup sweeps; [FRAGMENT_TIMEOUT] bounds how long each slot can live, but
///  a high-rate sender of never-completed fragments can still grow the map for
///  the duration of a sweep interval.
pub struct FragmentBuffer {
    packets: Mutex<FxHashMap<u64, PendingPacket>>,
}

impl Default for FragmentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentBuffer {
    pub fn new() -> FragmentBuffer {
        FragmentBuffer {
            packets: Mutex::new(FxHashMap::default()),
        }
    }

    /// Record one fragment. Returns the complete reassembled payload (the
    ///  fragments' bytes concatenated in index order) if and only if this call
    ///  completes the set, removing the slot in the same critical section.
    ///
    /// Returns `None` both while the set is incomplete and for rejected
    ///  fragments: an index outside the fragment count, a fragment count above
    ///  [FRAGMENT_MAX], or a disagreement with the slot's recorded packet
    ///  type, fragment count or status (which indicates a correlation id
    ///  collision or tampering - the existing slot is left untouched).
    pub fn add(
        &self,
        now: Instant,
        packet_type: u8,
        id: u64,
        fragment_index: u8,
        fragment_total: u8,
        status: u16,
        data: &[u8],
    ) -> Option<Vec<u8>> {
        if fragment_total as usize > FRAGMENT_MAX {
            return None; // invalid fragment count
        }
        if fragment_index >= fragment_total {
            return None; // invalid fragment index (also rejects a count of zero)
        }

        let mut packets = self.packets.lock().unwrap();

        let packet = packets.entry(id).or_insert_with(|| PendingPacket {
            created_at: now,
            packet_type,
            fragment_total,
            status,
            received: 0,
            fragments: vec![None; fragment_total as usize],
        });

        if packet.packet_type != packet_type
            || packet.fragment_total != fragment_total
            || packet.status != status
        {
            // correlation id collision (or tampering): leave the slot as it is
            return None;
        }

        let slot = &mut packet.fragments[fragment_index as usize];
        if slot.is_some() {
            // re-delivered fragment: the first delivery wins
            return None;
        }
        *slot = Some(data.to_vec());
        packet.received += 1;

        trace!("fragment {}/{} for packet {:016x}", fragment_index, fragment_total, id);

        if packet.received < fragment_total as usize {
            return None; // still missing fragments
        }

        let packet = packets.remove(&id)?;
        let mut complete = Vec::with_capacity(
            packet.fragments.iter().map(|f| f.as_ref().map(Vec::len).unwrap_or(0)).sum(),
        );
        for fragment in &packet.fragments {
            complete.extend_from_slice(fragment.as_deref().unwrap_or(&[]));
        }
        Some(complete)
    }

    /// Remove every slot older than [FRAGMENT_TIMEOUT]. Intended to be called
    ///  periodically by the owning receive loop; the call frequency only
    ///  affects memory pressure, never correctness.
    pub fn cleanup(&self, now: Instant) {
        let mut packets = self.packets.lock().unwrap();
        packets.retain(|id, packet| {
            let keep = now.duration_since(packet.created_at) <= FRAGMENT_TIMEOUT;
            if !keep {
                trace!("expiring incomplete packet {:016x} with {}/{} fragments", id, packet.received, packet.fragment_total);
            }
            keep
        });
    }

    /// Number of in-flight reassembly slots.
    pub fn pending_count(&self) -> usize {
        self.packets.lock().unwrap().len()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_single_fragment_completes_immediately() {
        let buffer = FragmentBuffer::new();
        let now = Instant::now();

        let complete = buffer.add(now, 7, 42, 0, 1, 0, b"payload");
        assert_eq!(complete.as_deref(), Some(b"payload".as_slice()));
        assert_eq!(buffer.pending_count(), 0);
    }

    #[rstest]
    #[case::in_order(vec![0, 1, 2])]
    #[case::reversed(vec![2, 1, 0])]
    #[case::interleaved(vec![1, 2, 0])]
    fn test_reassembly_in_any_order(#[case] order: Vec<u8>) {
        let buffer = FragmentBuffer::new();
        let now = Instant::now();
        let fragments: Vec<&[u8]> = vec![b"first ", b"second ", b"third"];

        let mut complete = None;
        for (n, &index) in order.iter().enumerate() {
            let result = buffer.add(now, 7, 42, index, 3, 0, fragments[index as usize]);
            if n < order.len() - 1 {
                assert_eq!(result, None);
                assert_eq!(buffer.pending_count(), 1);
            } else {
                complete = result;
            }
        }

        assert_eq!(complete.as_deref(), Some(b"first second third".as_slice()));
        assert_eq!(buffer.pending_count(), 0);
    }

    #[rstest]
    #[case::index_equals_total(3, 3)]
    #[case::index_above_total(200, 3)]
    #[case::zero_total(0, 0)]
    fn test_invalid_coordinates_create_no_state(#[case] fragment_index: u8, #[case] fragment_total: u8) {
        let buffer = FragmentBuffer::new();

        let result = buffer.add(Instant::now(), 7, 42, fragment_index, fragment_total, 0, b"data");
        assert_eq!(result, None);
        assert_eq!(buffer.pending_count(), 0);
    }

    #[rstest]
    #[case::wrong_type(9, 3, 0)]
    #[case::wrong_total(7, 4, 0)]
    #[case::wrong_status(7, 3, 500)]
    fn test_header_mismatch_leaves_slot_unchanged(#[case] packet_type: u8, #[case] fragment_total: u8, #[case] status: u16) {
        let buffer = FragmentBuffer::new();
        let now = Instant::now();

        assert_eq!(buffer.add(now, 7, 42, 0, 3, 0, b"first "), None);
        assert_eq!(buffer.add(now, 7, 42, 1, 3, 0, b"second "), None);

        // the mismatching fragment is dropped without touching the slot...
        assert_eq!(buffer.add(now, packet_type, 42, 2, fragment_total, status, b"evil"), None);
        assert_eq!(buffer.pending_count(), 1);

        // ...so the first set can still complete
        let complete = buffer.add(now, 7, 42, 2, 3, 0, b"third");
        assert_eq!(complete.as_deref(), Some(b"first second third".as_slice()));
    }

    #[rstest]
    fn test_redelivered_fragment_is_ignored() {
        let buffer = FragmentBuffer::new();
        let now = Instant::now();

        assert_eq!(buffer.add(now, 7, 42, 0, 2, 0, b"first "), None);
        assert_eq!(buffer.add(now, 7, 42, 0, 2, 0, b"first "), None);
        assert_eq!(buffer.add(now, 7, 42, 0, 2, 0, b"DIFFERENT"), None);
        assert_eq!(buffer.pending_count(), 1);

        let complete = buffer.add(now, 7, 42, 1, 2, 0, b"second");
        assert_eq!(complete.as_deref(), Some(b"first second".as_slice()));
    }

    #[rstest]
    fn test_distinct_ids_reassemble_independently() {
        let buffer = FragmentBuffer::new();
        let now = Instant::now();

        assert_eq!(buffer.add(now, 7, 1, 0, 2, 0, b"a0"), None);
        assert_eq!(buffer.add(now, 8, 2, 0, 2, 0, b"b0"), None);
        assert_eq!(buffer.pending_count(), 2);

        assert_eq!(buffer.add(now, 8, 2, 1, 2, 0, b"b1").as_deref(), Some(b"b0b1".as_slice()));
        assert_eq!(buffer.add(now, 7, 1, 1, 2, 0, b"a1").as_deref(), Some(b"a0a1".as_slice()));
        assert_eq!(buffer.pending_count(), 0);
    }

    #[rstest]
    fn test_cleanup_expires_stale_slots() {
        let buffer = FragmentBuffer::new();
        let t0 = Instant::now();

        assert_eq!(buffer.add(t0, 7, 42, 0, 2, 0, b"first "), None);

        // present just before the timeout...
        buffer.cleanup(t0 + FRAGMENT_TIMEOUT - Duration::from_millis(1));
        assert_eq!(buffer.pending_count(), 1);

        // ...absent just after
        buffer.cleanup(t0 + FRAGMENT_TIMEOUT + Duration::from_millis(1));
        assert_eq!(buffer.pending_count(), 0);

        // the late fragment now starts a fresh (incomplete) slot instead of completing
        assert_eq!(buffer.add(t0 + FRAGMENT_TIMEOUT + Duration::from_millis(2), 7, 42, 1, 2, 0, b"second"), None);
        assert_eq!(buffer.pending_count(), 1);
    }

    #[rstest]
    fn test_slot_age_is_measured_from_first_fragment() {
        let buffer = FragmentBuffer::new();
        let t0 = Instant::now();

        assert_eq!(buffer.add(t0, 7, 42, 0, 3, 0, b"first "), None);
        // a later fragment does not reset the clock
        assert_eq!(buffer.add(t0 + Duration::from_secs(3), 7, 42, 1, 3, 0, b"second "), None);

        buffer.cleanup(t0 + FRAGMENT_TIMEOUT + Duration::from_millis(1));
        assert_eq!(buffer.pending_count(), 0);
    }

    #[rstest]
    fn test_cleanup_keeps_fresh_slots() {
        let buffer = FragmentBuffer::new();
        let t0 = Instant::now();

        assert_eq!(buffer.add(t0, 7, 1, 0, 2, 0, b"stale"), None);
        assert_eq!(buffer.add(t0 + Duration::from_secs(3), 7, 2, 0, 2, 0, b"fresh"), None);

        buffer.cleanup(t0 + FRAGMENT_TIMEOUT + Duration::from_millis(1));
        assert_eq!(buffer.pending_count(), 1);

        assert_eq!(
            buffer.add(t0 + Duration::from_secs(5), 7, 2, 1, 2, 0, b" still here").as_deref(),
            Some(b"fresh still here".as_slice()),
        );
    }

    #[rstest]
    fn test_max_fragment_count_is_accepted() {
        let buffer = FragmentBuffer::new();
        let now = Instant::now();

        let mut complete = None;
        for i in 0..FRAGMENT_MAX as u8 {
            complete = buffer.add(now, 7, 42, i, FRAGMENT_MAX as u8, 0, &[i]);
        }

        let expected: Vec<u8> = (0..FRAGMENT_MAX as u8).collect();
        assert_eq!(complete, Some(expected));
    }
}
