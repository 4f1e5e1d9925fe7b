//! Two instances of the same store converging inside one process.
//!
//! Node A announces itself, node B welcomes it with its buffer, then writes
//! on either side propagate as deltas over an in-process transport.

use storelink::directory::{Directory, DirectoryBuilder};
use storelink::endpoint::{Endpoint, Loopback};
use storelink::error::Error;
use storelink::store::{FunctionOp, Store, StoreCore, StoreExt, StoreHash};
use storelink::sync::{SyncOut, Synchronizer};
use storelink::types::{Type, TypeTag, Value};
use storelink::Endian;

struct Node {
    core: StoreCore,
    dir: Vec<u8>,
}

impl Node {
    fn new() -> Self {
        let dir = DirectoryBuilder::new()
            .object("/setpoint", TypeTag::variable(Type::Float), 0, 4)
            .object("/enabled", TypeTag::variable(Type::Bool), 4, 1)
            .object("/counter", TypeTag::variable(Type::Uint32), 5, 4)
            .build()
            .expect("directory");

        Self {
            core: StoreCore::new(
                StoreHash([0xa7; 20]),
                Endian::Little,
                vec![0; 9],
                [(0, 4), (4, 1), (5, 4)],
            ),
            dir,
        }
    }
}

impl Store for Node {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StoreCore {
        &mut self.core
    }

    fn directory(&self) -> Directory<'_> {
        Directory::new(&self.dir)
    }

    fn call_function(&mut self, _: u32, _: FunctionOp, _: &mut [u8]) -> Result<usize, Error> {
        Err(Error::Value(storelink::error::ValueError::BadKey))
    }
}

fn service(sync: &mut Synchronizer, node: &mut Node, endpoint: &mut Loopback) {
    let mut buf = [0u8; 256];
    let mut frame = Vec::new();

    while let Some((n, last)) = endpoint.recv(&mut buf).expect("loopback recv") {
        frame.extend_from_slice(&buf[..n]);

        if !last {
            continue;
        }

        let current = std::mem::take(&mut frame);
        let mut replies: Vec<Vec<u8>> = Vec::new();

        {
            let mut reply = |f: &[u8]| replies.push(f.to_vec());
            let mut out = SyncOut {
                reply: &mut reply,
                forward: None,
            };

            if let Err(e) = sync.process(node, 0, &current, &mut out) {
                log::warn!("sync frame rejected: {}", e);
            }
        }

        for r in replies {
            endpoint.send(&r, true).expect("loopback send");
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (mut ep_a, mut ep_b) = Loopback::pair();

    let mut node_a = Node::new();
    let mut node_b = Node::new();
    let mut sync_a = Synchronizer::new();
    let mut sync_b = Synchronizer::new();

    let setpoint = node_a.lookup("/setpoint")?;
    let counter = node_a.lookup("/counter")?;

    node_b.set(&setpoint, Value::Float(21.5))?;

    // A joins; B's Welcome seeds A with its state.
    {
        let mut reply = |f: &[u8]| ep_a.send(f, true).expect("hello");
        let mut out = SyncOut {
            reply: &mut reply,
            forward: None,
        };

        sync_a.hello(&node_a, 0, &mut out);
    }

    service(&mut sync_b, &mut node_b, &mut ep_b);
    service(&mut sync_a, &mut node_a, &mut ep_a);

    println!(
        "after welcome: A /setpoint = {}",
        node_a.get(&setpoint)?
    );

    // Writes on both sides, one tick per direction.
    for round in 1u32..=3 {
        node_a.set(&counter, Value::Uint32(round))?;
        node_b.set(&setpoint, Value::Float(21.5 + round as f32))?;

        let now_ms = u64::from(round) * 1_000;

        sync_a.tick(&mut node_a, now_ms, &mut |_conn, frame: &[u8]| {
            ep_a.send(frame, true).expect("tick a")
        });
        sync_b.tick(&mut node_b, now_ms, &mut |_conn, frame: &[u8]| {
            ep_b.send(frame, true).expect("tick b")
        });

        service(&mut sync_b, &mut node_b, &mut ep_b);
        service(&mut sync_a, &mut node_a, &mut ep_a);

        println!(
            "round {}: A sees /setpoint = {}, B sees /counter = {}",
            round,
            node_a.get(&setpoint)?,
            node_b.get(&counter)?
        );

        assert_eq!(node_a.core().buffer(), node_b.core().buffer());
    }

    println!("both buffers byte-identical; done");

    Ok(())
}
