//! Synchronizer integration: convergence over an in-process transport and
//! chaining of several stores on one link.

mod util;

use pretty_assertions::assert_eq;
use storelink::endpoint::{Endpoint, Loopback};
use storelink::store::{Store, StoreExt};
use storelink::sync::{ConnectionState, SyncConfig, SyncOut, Synchronizer};
use storelink::types::Value;
use storelink::Endian;
use util::DemoStore;

/// Drain one endpoint into frames.
fn drain(endpoint: &mut Loopback) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut buf = [0u8; 512];
    let mut partial = Vec::new();

    while let Some((n, last)) = endpoint.recv(&mut buf).unwrap() {
        partial.extend_from_slice(&buf[..n]);

        if last {
            frames.push(std::mem::take(&mut partial));
        }
    }

    frames
}

/// Feed every pending frame on `ep` into `sync`, sending replies back.
fn service(sync: &mut Synchronizer, store: &mut DemoStore, ep: &mut Loopback) {
    for frame in drain(ep) {
        let mut replies: Vec<Vec<u8>> = Vec::new();
        let mut reply = |f: &[u8]| replies.push(f.to_vec());
        let mut out = SyncOut {
            reply: &mut reply,
            forward: None,
        };

        let _ = sync.process(store, 0, &frame, &mut out);

        for r in replies {
            ep.send(&r, true).unwrap();
        }
    }
}

fn converged(a: &DemoStore, b: &DemoStore) -> bool {
    a.core().buffer() == b.core().buffer()
}

/// S7: Welcome adopts the responder's buffer, then Updates track writes.
#[test]
fn two_nodes_converge() {
    util::init_logging();

    let (mut ep_a, mut ep_b) = Loopback::pair();

    let mut sync_a = Synchronizer::new();
    let mut sync_b = Synchronizer::new();
    let mut store_a = DemoStore::new(Endian::Little);
    let mut store_b = DemoStore::new(Endian::Little);

    let x = store_a.lookup("/x").unwrap();

    store_a.set(&x, Value::Int32(1)).unwrap();
    store_b.set(&x, Value::Int32(9)).unwrap();

    // A announces itself.
    {
        let mut reply = |f: &[u8]| ep_a.send(f, true).unwrap();
        let mut out = SyncOut {
            reply: &mut reply,
            forward: None,
        };

        sync_a.hello(&store_a, 0, &mut out);
    }

    service(&mut sync_b, &mut store_b, &mut ep_b);
    service(&mut sync_a, &mut store_a, &mut ep_a);

    // The Welcome carried B's buffer; A adopted it.
    assert_eq!(store_a.get(&x).unwrap(), Value::Int32(9));
    assert!(converged(&store_a, &store_b));
    assert_eq!(sync_a.connection_state(0), Some(ConnectionState::Welcomed));
    assert_eq!(sync_b.connection_state(0), Some(ConnectionState::Welcomed));

    // B writes; the next tick ships the delta; A observes it.
    store_b.set(&x, Value::Int32(10)).unwrap();

    sync_b.tick(&mut store_b, 1_000, &mut |_conn, frame: &[u8]| {
        ep_b.send(frame, true).unwrap()
    });
    service(&mut sync_a, &mut store_a, &mut ep_a);

    assert_eq!(store_a.get(&x).unwrap(), Value::Int32(10));
    assert!(converged(&store_a, &store_b));

    // Writes on both further objects converge within one interval each way.
    let y = store_a.lookup("/y").unwrap();
    let baz = store_a.lookup("/baz").unwrap();

    store_a.set(&y, Value::Int32(-7)).unwrap();
    store_b.set(&baz, Value::Uint16(42)).unwrap();

    sync_a.tick(&mut store_a, 2_000, &mut |_conn, frame: &[u8]| {
        ep_a.send(frame, true).unwrap()
    });
    sync_b.tick(&mut store_b, 2_000, &mut |_conn, frame: &[u8]| {
        ep_b.send(frame, true).unwrap()
    });
    service(&mut sync_b, &mut store_b, &mut ep_b);
    service(&mut sync_a, &mut store_a, &mut ep_a);

    assert_eq!(store_b.get(&y).unwrap(), Value::Int32(-7));
    assert_eq!(store_a.get(&baz).unwrap(), Value::Uint16(42));
    assert!(converged(&store_a, &store_b));
}

/// Two different stores share one transport; frames hop the chain until a
/// synchronizer claims them.
#[test]
fn chained_stores_share_a_transport() {
    // Both ends happen to use the same store layout; the chain only routes
    // on hashes and ids.
    let mut other = DemoStore::new(Endian::Little);
    let mut store = DemoStore::new(Endian::Little);

    let mut sync_front = Synchronizer::new();
    let mut sync_back = Synchronizer::with_config(SyncConfig {
        base_id: 100,
        ..SyncConfig::default()
    });

    // A Hello for a hash nobody here owns crosses both and falls out the
    // far end.
    let mut frame = vec![b'h'];

    frame.extend_from_slice(&[b'f'; 40]);
    frame.extend_from_slice(&[0x01, 0x00]);

    let mut fell_through: Vec<Vec<u8>> = Vec::new();

    {
        let mut front_to_back: Vec<Vec<u8>> = Vec::new();

        {
            let mut reply = |_: &[u8]| panic!("nobody should reply");
            let mut forward = |f: &[u8]| front_to_back.push(f.to_vec());
            let mut out = SyncOut {
                reply: &mut reply,
                forward: Some(&mut forward),
            };

            let _ = sync_front.process(&mut store, 0, &frame, &mut out);
        }

        for hop in front_to_back {
            let mut reply = |_: &[u8]| panic!("nobody should reply");
            let mut forward = |f: &[u8]| fell_through.push(f.to_vec());
            let mut out = SyncOut {
                reply: &mut reply,
                forward: Some(&mut forward),
            };

            let _ = sync_back.process(&mut other, 0, &hop, &mut out);
        }
    }

    assert_eq!(fell_through, [frame]);

    // A Hello for the shared hash is claimed by the front synchronizer and
    // never reaches the chain.
    let mut frame = vec![b'h'];
    let hash = format!("{}", *store.core().hash());

    frame.extend_from_slice(hash.as_bytes());
    frame.extend_from_slice(&[0x01, 0x00]);

    let mut replies: Vec<Vec<u8>> = Vec::new();

    {
        let mut reply = |f: &[u8]| replies.push(f.to_vec());
        let mut forward = |_: &[u8]| panic!("claimed frames must not chain");
        let mut out = SyncOut {
            reply: &mut reply,
            forward: Some(&mut forward),
        };

        sync_front.process(&mut store, 0, &frame, &mut out).unwrap();
    }

    // The Welcome leads with the id we sent and the full 22 byte buffer.
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0][0], b'w');
    assert_eq!(&replies[0][1..3], &[0x01, 0x00][..]);
    assert_eq!(replies[0].len(), 5 + 22);
}

/// The journal keeps deltas minimal: only objects written since the last
/// send cross the wire.
#[test]
fn deltas_carry_only_changed_objects() {
    let (mut ep_a, mut ep_b) = Loopback::pair();

    let mut sync_a = Synchronizer::new();
    let mut sync_b = Synchronizer::new();
    let mut store_a = DemoStore::new(Endian::Little);
    let mut store_b = DemoStore::new(Endian::Little);

    {
        let mut reply = |f: &[u8]| ep_a.send(f, true).unwrap();
        let mut out = SyncOut {
            reply: &mut reply,
            forward: None,
        };

        sync_a.hello(&store_a, 0, &mut out);
    }

    service(&mut sync_b, &mut store_b, &mut ep_b);
    service(&mut sync_a, &mut store_a, &mut ep_a);

    let baz = store_b.lookup("/baz").unwrap();

    store_b.set(&baz, Value::Uint16(3)).unwrap();

    sync_b.tick(&mut store_b, 1_000, &mut |_conn, frame: &[u8]| {
        ep_b.send(frame, true).unwrap()
    });

    let frames = drain(&mut ep_a);

    assert_eq!(frames.len(), 1);

    // u, id:u16, then exactly one (key=8, len=2, data) tuple.
    assert_eq!(frames[0][0], b'u');
    assert_eq!(frames[0].len(), 3 + 1 + 1 + 2);
    assert_eq!(frames[0][3], 8);
    assert_eq!(frames[0][4], 2);
}
