//! End-to-end debugger sessions: a client stack and a server stack joined
//! by an in-process transport, with the interpreter on the far side.

mod util;

use storelink::debugger::Debugger;
use storelink::endpoint::{Endpoint, Loopback};
use storelink::protocol::Stack;
use storelink::store::StoreExt;
use storelink::types::Value;
use storelink::Endian;
use util::{shuttle, Capture, DemoStore};

/// One request/response round trip through client stack → transport →
/// server stack → debugger and back.
fn round_trip(
    client: &mut Stack,
    server: &mut Stack,
    debugger: &mut Debugger,
    store: &mut DemoStore,
    request: &[u8],
) -> Vec<u8> {
    let mut cap_client = Capture::default();
    let mut cap_server = Capture::default();

    cap_client
        .drive(|io| client.encode(request, true, io))
        .unwrap();

    loop {
        shuttle(client, &mut cap_client, server, &mut cap_server);

        for request in std::mem::take(&mut cap_server.up) {
            let mut response = Vec::new();

            debugger.process(store, &request, &mut response);

            cap_server
                .drive(|io| server.encode(&response, true, io))
                .unwrap();
        }

        if cap_server.down.is_empty() && !cap_client.up.is_empty() {
            break;
        }
    }

    let mut responses = std::mem::take(&mut cap_client.up);

    assert_eq!(responses.len(), 1);

    responses.remove(0)
}

fn scenario(mut client: Stack, mut server: Stack) {
    let mut debugger = Debugger::new();
    let mut store = DemoStore::new(Endian::Little);

    // S1: echo.
    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"eHello"),
        b"Hello"
    );

    // S2: read scalar.
    let x = store.lookup("/x").unwrap();

    store.set(&x, Value::Int32(0x1234_5678)).unwrap();

    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"r/x"),
        b"12345678"
    );

    // S3: ambiguous abbreviation.
    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"r/b"),
        b"?"
    );

    // S4: alias lifecycle.
    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"a0/x"),
        b"!"
    );
    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"r0"),
        b"12345678"
    );
    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"a0"),
        b"!"
    );
    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"r0"),
        b"?"
    );

    // S5: macro responses concatenate with no separator.
    let y = store.lookup("/y").unwrap();

    store.set(&y, Value::Int32(0xaa)).unwrap();

    assert_eq!(
        round_trip(
            &mut client,
            &mut server,
            &mut debugger,
            &mut store,
            b"mZ;r/x;r/y"
        ),
        b"!"
    );
    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"Z"),
        b"12345678aa"
    );

    // Write-then-read observes the written value.
    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"wbeef/y"),
        b"!"
    );
    assert_eq!(
        round_trip(&mut client, &mut server, &mut debugger, &mut store, b"r/y"),
        b"beef"
    );
}

#[test]
fn scenarios_over_plain_framing() {
    scenario(util::plain_stack(), util::plain_stack());
}

#[test]
fn scenarios_over_the_full_lossy_stack() {
    let mut client = util::lossy_stack(32);
    let mut server = util::lossy_stack(32);

    // Let both ARQ directions handshake before the first request.
    let mut cap_client = Capture::default();
    let mut cap_server = Capture::default();

    cap_client.drive(|io| client.poll_time(0, io)).unwrap();
    cap_server.drive(|io| server.poll_time(0, io)).unwrap();
    shuttle(&mut client, &mut cap_client, &mut server, &mut cap_server);

    scenario(client, server);
}

#[test]
fn capabilities_and_listing_over_loopback_endpoint() {
    let (mut here, mut there) = Loopback::pair();
    let mut debugger = Debugger::new();
    let mut store = DemoStore::new(Endian::Little);

    debugger.set_identification("demo-node");

    // Requests travel as whole transport messages; no stack needed on a
    // message-oriented endpoint.
    here.send(b"?", true).unwrap();
    here.send(b"i", true).unwrap();
    here.send(b"l", true).unwrap();

    let mut buf = [0u8; 512];

    while let Some((n, last)) = there.recv(&mut buf).unwrap() {
        assert!(last);

        let mut response = Vec::new();

        debugger.process(&mut store, &buf[..n], &mut response);
        there.send(&response, true).unwrap();
    }

    let mut responses = Vec::new();

    while let Some((n, last)) = here.recv(&mut buf).unwrap() {
        assert!(last);
        responses.push(buf[..n].to_vec());
    }

    assert_eq!(responses.len(), 3);

    for cmd in b"?erwlamivs" {
        assert!(responses[0].contains(cmd));
    }

    assert_eq!(responses[1], b"demo-node");

    let listing = String::from_utf8(responses[2].clone()).unwrap();

    assert_eq!(listing.lines().count(), 6);
    assert!(listing.lines().any(|l| l.ends_with(" /x")));
    assert!(listing.lines().any(|l| l.ends_with(" /tick")));
}
