//! A debugger node on stdin/stdout.
//!
//! Debugger frames travel inside APC escape sequences, so the process can
//! keep printing ordinary text while a client drives it. Try:
//!
//! ```sh
//! printf '\x1b_r/x\x1b\\' | cargo run --example debug-stdio
//! ```

use std::time::Instant;
use storelink::debugger::Debugger;
use storelink::directory::{Directory, DirectoryBuilder};
use storelink::endpoint::{Endpoint, Stdio};
use storelink::error::Error;
use storelink::poller;
use storelink::protocol::{AsciiEscape, LayerKind, Stack, StackIo, Terminal};
use storelink::store::{FunctionOp, Store, StoreCore, StoreExt, StoreHash};
use storelink::types::{Type, TypeTag, Value};
use storelink::{Endian, WireScalar};

/// What the store generator would emit for:
///
/// ```text
/// int32  /x
/// uint16 /baz
/// (function uint32) /uptime
/// ```
struct DemoStore {
    core: StoreCore,
    dir: Vec<u8>,
    started: Instant,
}

impl DemoStore {
    fn new() -> Self {
        let dir = DirectoryBuilder::new()
            .object("/x", TypeTag::variable(Type::Int32), 0, 4)
            .object("/baz", TypeTag::variable(Type::Uint16), 4, 2)
            .object("/uptime", TypeTag::function(Type::Uint32), 1, 4)
            .build()
            .expect("directory");

        Self {
            core: StoreCore::new(
                StoreHash([0x51; 20]),
                Endian::Little,
                vec![0; 6],
                [(0, 4), (4, 2)],
            ),
            dir,
            started: Instant::now(),
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
                let uptime = self.started.elapsed().as_millis() as u32;

                uptime
                    .pack_to_slice(self.core.endian(), data)
                    .map_err(Error::Wire)?;

                Ok(4)
            }
            _ => Err(Error::Value(storelink::error::ValueError::BadKey)),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut store = DemoStore::new();
    let mut debugger = Debugger::new();

    debugger.set_identification("storelink-demo");
    debugger.set_version("demo=0.2");

    let x = store.lookup("/x")?;

    store.set(&x, Value::Int32(0x1234_5678))?;

    let mut stack = Stack::new(
        vec![
            LayerKind::AsciiEscape(AsciiEscape::new()),
            LayerKind::Terminal(Terminal::new()),
        ],
        0,
    );

    let mut endpoint = Stdio::new()?;
    let mut requests: Vec<Vec<u8>> = Vec::new();
    let mut partial: Vec<u8> = Vec::new();
    let mut buf = [0u8; 512];

    log::info!("serving debugger on stdio; ctrl-d to exit");

    loop {
        {
            let mut sources = [endpoint.source().expect("stdio is pollable")];

            poller::poll(&mut sources, 1_000)?;
        }

        loop {
            let read = match endpoint.recv(&mut buf) {
                Ok(read) => read,
                Err(Error::Transport(_)) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            let Some((n, _last)) = read else {
                break;
            };

            let chunk = buf[..n].to_vec();

            let mut up = |data: &[u8], last: bool| {
                partial.extend_from_slice(data);

                if last {
                    requests.push(std::mem::take(&mut partial));
                }
            };
            let mut down =
                |data: &[u8], last: bool| -> Result<(), storelink::error::ProtocolError> {
                    endpoint
                        .send(data, last)
                        .map_err(|_| storelink::error::ProtocolError::Backpressure)
                };
            let mut sideband = |data: &[u8]| {
                // Unframed input is echoed like a dumb terminal would.
                print!("{}", String::from_utf8_lossy(data));
            };

            let mut io = StackIo {
                up: &mut up,
                down: &mut down,
                sideband: Some(&mut sideband),
                event: None,
            };

            stack.feed(&chunk, false, &mut io)?;
        }

        for request in requests.drain(..) {
            let mut response = Vec::new();

            debugger.process(&mut store, &request, &mut response);

            let mut up = |_: &[u8], _: bool| {};
            let mut down =
                |data: &[u8], last: bool| -> Result<(), storelink::error::ProtocolError> {
                    endpoint
                        .send(data, last)
                        .map_err(|_| storelink::error::ProtocolError::Backpressure)
                };

            let mut io = StackIo {
                up: &mut up,
                down: &mut down,
                sideband: None,
                event: None,
            };

            stack.encode(&response, true, &mut io)?;
        }
    }
}
