//! Property-based tests for the Block-Ack reception queue.
//!
//! Whatever order frames arrive in, with duplicates, losses and
//! acknowledgement requests mixed in, delivery must be strictly increasing
//! and exactly once.

use bytes::Bytes;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::time::Duration;

use airlink_mac::block_ack::ReceptionQueue;
use airlink_mac::{Frame, PeerAddress};

fn frame(sn: u64) -> Frame {
    Frame::data(PeerAddress(1), PeerAddress(2), Bytes::from_static(b"x"), Duration::ZERO)
        .with_sequence(sn)
}

fn sequences(frames: &[Frame]) -> Vec<u64> {
    frames.iter().filter_map(|f| f.sequence).collect()
}

// ─── Strategies ──────────────────────────────────────────────────────────────

/// A permutation of `0..n`.
fn permutation() -> impl Strategy<Value = Vec<u64>> {
    (1u64..96).prop_flat_map(|n| Just((0..n).collect::<Vec<u64>>()).prop_shuffle())
}

#[derive(Debug, Clone)]
enum Op {
    Data(u64),
    Request(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (0u64..64).prop_map(Op::Data),
        1 => (0u64..72).prop_map(Op::Request),
    ]
}

// ─── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn any_arrival_order_delivers_everything_in_order(order in permutation()) {
        let n = order.len() as u64;
        let mut queue = ReceptionQueue::new(0);
        let mut out = Vec::new();
        for sn in order {
            queue.receive(frame(sn), &mut out);
        }
        prop_assert_eq!(sequences(&out), (0..n).collect::<Vec<u64>>());
        prop_assert_eq!(queue.waiting_for(), n);
        prop_assert_eq!(queue.buffered_len(), 0);
    }

    #[test]
    fn delivery_is_increasing_and_exactly_once(ops in prop::collection::vec(op(), 1..300)) {
        let mut queue = ReceptionQueue::new(0);
        let mut delivered: Vec<u64> = Vec::new();
        let mut received: BTreeSet<u64> = BTreeSet::new();
        let mut since_request: BTreeSet<u64> = BTreeSet::new();

        for op in ops {
            let mut out = Vec::new();
            match op {
                Op::Data(sn) => {
                    queue.receive(frame(sn), &mut out);
                    received.insert(sn);
                    since_request.insert(sn);
                }
                Op::Request(start) => {
                    let before = queue.waiting_for();
                    let reply = queue.on_request(start, &mut out);

                    prop_assert!(queue.waiting_for() >= start.max(before));
                    prop_assert_eq!(reply.start_sn, queue.waiting_for());
                    for sn in &since_request {
                        prop_assert!(reply.contains(*sn), "received {} but not acknowledged", sn);
                    }
                    since_request.clear();
                }
            }
            for sn in sequences(&out) {
                prop_assert!(received.contains(&sn), "delivered {} that never arrived", sn);
                if let Some(last) = delivered.last() {
                    prop_assert!(sn > *last, "delivered {} after {}", sn, last);
                }
                delivered.push(sn);
            }
            prop_assert!(delivered.last().map_or(true, |last| *last < queue.waiting_for()));
        }
    }

    #[test]
    fn request_releases_everything_below_start(
        order in permutation(),
        keep in prop::collection::vec(any::<bool>(), 96),
        start in 0u64..100,
    ) {
        let mut queue = ReceptionQueue::new(0);
        let mut out = Vec::new();
        let arrived: Vec<u64> = order
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep[*i])
            .map(|(_, sn)| sn)
            .collect();
        for sn in &arrived {
            queue.receive(frame(*sn), &mut out);
        }
        queue.on_request(start, &mut out);

        let delivered = sequences(&out);
        for sn in arrived.iter().filter(|sn| **sn < start) {
            prop_assert!(delivered.contains(sn), "{} held back behind the request start", sn);
        }
        prop_assert!(delivered.windows(2).all(|w| w[0] < w[1]));
    }
}
