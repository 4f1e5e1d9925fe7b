//! Shared fixtures for the integration tests: a hand-built store the way the
//! generator would emit one, plus helpers to drive protocol stacks in
//! memory.

#![allow(unused)]

use storelink::directory::{Directory, DirectoryBuilder};
use storelink::error::Error;
use storelink::protocol::{
    Arq, ArqConfig, AsciiEscape, Crc16, LayerKind, Segmentation, Stack, StackEvent, StackIo,
    Terminal,
};
use storelink::store::{FunctionOp, Store, StoreCore, StoreHash};
use storelink::types::{Type, TypeTag};
use storelink::{Endian, WireScalar};

/// Switch test logging on; `RUST_LOG=trace cargo test` shows the frames.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const DEMO_HASH: StoreHash = StoreHash([
    0x2f, 0xd4, 0xe1, 0xc6, 0x7a, 0x2d, 0x28, 0xfc, 0xed, 0x84, 0x9e, 0xe1, 0xbb, 0x76, 0xe7,
    0x39, 0x1b, 0x93, 0xeb, 0x12,
]);

/// Objects:
/// - `/x`    int32 at 0
/// - `/bar`  int32 at 4
/// - `/baz`  uint16 at 8
/// - `/y`    int32 at 10
/// - `/name` string[8] at 14
/// - `/tick` uint32 function key 1
pub struct DemoStore {
    core: StoreCore,
    dir: Vec<u8>,
    pub tick: u32,
}

impl DemoStore {
    pub fn new(endian: Endian) -> Self {
        let dir = DirectoryBuilder::new()
            .object("/x", TypeTag::variable(Type::Int32), 0, 4)
            .object("/bar", TypeTag::variable(Type::Int32), 4, 4)
            .object("/baz", TypeTag::variable(Type::Uint16), 8, 2)
            .object("/y", TypeTag::variable(Type::Int32), 10, 4)
            .object("/name", TypeTag::variable(Type::String), 14, 8)
            .object("/tick", TypeTag::function(Type::Uint32), 1, 4)
            .build()
            .expect("demo directory");

        let objects = [(0, 4), (4, 4), (8, 2), (10, 4), (14, 8)];

        Self {
            core: StoreCore::new(DEMO_HASH, endian, vec![0; 22], objects),
            dir,
            tick: 0,
        }
    }
}

impl Store for DemoStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StoreCore {
        &mut self.core
    }

    fn directory(&self) -> Directory<'_> {
        Directory::new(&self.dir)
    }

    fn call_function(
        &mut self,
        key: u32,
        op: FunctionOp,
        data: &mut [u8],
    ) -> Result<usize, Error> {
        match (key, op) {
            (1, FunctionOp::Read) => {
                self.tick
                    .pack_to_slice(self.core.endian(), data)
                    .map_err(Error::Wire)?;

                Ok(4)
            }
            (1, FunctionOp::Write) => {
                self.tick =
                    u32::unpack_from_slice(data, self.core.endian()).map_err(Error::Wire)?;

                Ok(4)
            }
            _ => Err(Error::Value(storelink::error::ValueError::BadKey)),
        }
    }
}

/// Captures the four sinks of a stack into plain vectors.
#[derive(Debug, Default)]
pub struct Capture {
    pub up: Vec<Vec<u8>>,
    pub down: Vec<Vec<u8>>,
    pub sideband: Vec<u8>,
    pub events: Vec<StackEvent>,
    up_partial: Vec<u8>,
    down_partial: Vec<u8>,
}

impl Capture {
    pub fn drive<R>(&mut self, f: impl FnOnce(&mut StackIo<'_, '_>) -> R) -> R {
        let Self {
            up,
            down,
            sideband,
            events,
            up_partial,
            down_partial,
        } = self;

        let mut up_fn = |data: &[u8], last: bool| {
            up_partial.extend_from_slice(data);

            if last {
                up.push(std::mem::take(up_partial));
            }
        };

        let mut down_fn =
            |data: &[u8], last: bool| -> Result<(), storelink::error::ProtocolError> {
                down_partial.extend_from_slice(data);

                if last {
                    down.push(std::mem::take(down_partial));
                }

                Ok(())
            };

        let mut sideband_fn = |data: &[u8]| sideband.extend_from_slice(data);
        let mut event_fn = |event: StackEvent| events.push(event);

        let mut io = StackIo {
            up: &mut up_fn,
            down: &mut down_fn,
            sideband: Some(&mut sideband_fn),
            event: Some(&mut event_fn),
        };

        f(&mut io)
    }
}

/// The canonical lossy-channel stack over a transport with the given MTU.
pub fn lossy_stack(mtu: usize) -> Stack {
    Stack::new(
        vec![
            LayerKind::AsciiEscape(AsciiEscape::new()),
            LayerKind::Terminal(Terminal::new()),
            LayerKind::Arq(Arq::new(ArqConfig::default())),
            LayerKind::Crc16(Crc16::new()),
            LayerKind::Segmentation(Segmentation::new()),
        ],
        mtu,
    )
}

/// A minimal message-boundary stack for clean transports.
pub fn plain_stack() -> Stack {
    Stack::new(
        vec![
            LayerKind::AsciiEscape(AsciiEscape::new()),
            LayerKind::Terminal(Terminal::new()),
        ],
        0,
    )
}

/// Carry transport messages between two stacks until neither produces more.
/// Returns the number of messages that crossed.
pub fn shuttle(
    a: &mut Stack,
    cap_a: &mut Capture,
    b: &mut Stack,
    cap_b: &mut Capture,
) -> usize {
    let mut crossed = 0;

    loop {
        let from_a = std::mem::take(&mut cap_a.down);
        let from_b = std::mem::take(&mut cap_b.down);

        if from_a.is_empty() && from_b.is_empty() {
            return crossed;
        }

        crossed += from_a.len() + from_b.len();

        for msg in from_a {
            cap_b.drive(|io| b.feed(&msg, true, io)).unwrap();
        }

        for msg in from_b {
            cap_a.drive(|io| a.feed(&msg, true, io)).unwrap();
        }
    }
}
