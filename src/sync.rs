//! Journaled delta replication between instances of the same store.
//!
//! Peers speak four messages, each one command byte plus fields in the
//! store's byte order (the byte's case encodes the order on the wire:
//! lowercase little, uppercase big, so a mismatch is detectable before any
//! field is parsed):
//!
//! ```text
//! h <hash: 40 ascii hex> <id: u16>                  Hello
//! w <hello_id: u16> <welcome_id: u16> <buffer>      Welcome
//! u <id: u16> ( <key> <len> <data> )*               Update
//! b [ <hash: 40 ascii hex> | <id: u16> | nothing ]  Bye
//! ```
//!
//! `key` and `len` are fixed-width fields, the smallest byte count whose bit
//! width covers the store buffer length. A Welcome carries the responder's
//! full buffer; afterwards both sides exchange key-ordered deltas of
//! whatever changed since the last snapshot they sent. Several stores can
//! share one transport by daisy-chaining synchronizers: frames addressed to
//! an unknown hash or connection id are handed to the `forward` sink
//! untouched.
//!
//! Exactly one writer per object is assumed. With concurrent writers to the
//! same object the outcome is undefined; cross-object write order from one
//! process is preserved, cross-process order is not.

use crate::error::SyncError;
use crate::fmt;
use crate::store::{Store, StoreHash};
use alloc::vec::Vec;
use storelink_wire::{get_uint, put_uint, Endian, WireScalar};

/// Synchronizer tuning.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Minimum pause between periodic Updates per connection.
    pub interval_ms: u64,
    /// First connection id this instance issues. Chained synchronizers on a
    /// shared transport must use disjoint ranges; seed the next one with
    /// [`Synchronizer::last_issued_id`]` + 1`.
    pub base_id: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            base_id: 1,
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ConnectionState {
    /// Nothing sent or received yet.
    Unannounced,
    /// We sent a Hello and await the Welcome.
    HelloSent,
    /// Buffers are exchanged; deltas flow.
    Welcomed,
}

#[derive(Debug, Copy, Clone)]
struct Connection {
    /// Application-assigned transport slot.
    conn: usize,
    /// Id we issued; inbound frames carrying it are ours.
    id_local: u16,
    /// Id the peer issued; goes into our outbound Updates.
    id_remote: u16,
    /// Journal snapshot as of our last outbound Welcome/Update.
    seq_sent: u64,
    state: ConnectionState,
    /// Suppress periodic updates while set.
    hold: bool,
    last_update_ms: u64,
}

/// Where outbound frames of one `process`/`tick` call go.
pub struct SyncOut<'a> {
    /// Frames for the peer the triggering frame came from.
    pub reply: &'a mut dyn FnMut(&[u8]),
    /// Frames not addressed to this store, for the next synchronizer in the
    /// chain.
    pub forward: Option<&'a mut dyn FnMut(&[u8])>,
}

/// Replicates one store across any number of peer connections.
pub struct Synchronizer {
    cfg: SyncConfig,
    connections: Vec<Connection>,
    next_id: u16,
}

impl Synchronizer {
    /// A synchronizer with default tuning.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// A synchronizer with explicit tuning.
    pub fn with_config(cfg: SyncConfig) -> Self {
        Self {
            connections: Vec::new(),
            next_id: cfg.base_id.max(1),
            cfg,
        }
    }

    /// The most recently issued connection id; seed for a chained
    /// synchronizer's `base_id`.
    pub fn last_issued_id(&self) -> u16 {
        self.next_id.wrapping_sub(1)
    }

    /// State of the connection on transport slot `conn`, if any.
    pub fn connection_state(&self, conn: usize) -> Option<ConnectionState> {
        self.connections
            .iter()
            .find(|c| c.conn == conn)
            .map(|c| c.state)
    }

    /// Suppress or resume periodic updates on a connection.
    pub fn set_hold(&mut self, conn: usize, hold: bool) {
        if let Some(c) = self.connections.iter_mut().find(|c| c.conn == conn) {
            c.hold = hold;
        }
    }

    fn issue_id(&mut self) -> u16 {
        let id = self.next_id;

        self.next_id = self.next_id.wrapping_add(1).max(1);

        id
    }

    /// Announce `store` to the peer on slot `conn`.
    pub fn hello<S: Store>(&mut self, store: &S, conn: usize, out: &mut SyncOut<'_>) {
        let endian = store.core().endian();
        let id = self.issue_id();

        self.connections.retain(|c| c.conn != conn);
        self.connections.push(Connection {
            conn,
            id_local: id,
            id_remote: 0,
            seq_sent: 0,
            state: ConnectionState::HelloSent,
            hold: false,
            last_update_ms: 0,
        });

        let mut frame = Vec::with_capacity(43);

        frame.push(cmd(b'h', endian));
        store.core().hash().write_hex(&mut frame);
        push_u16(&mut frame, id, endian);

        (out.reply)(&frame);
    }

    /// Tear down the connection on slot `conn` and tell the peer.
    pub fn bye<S: Store>(&mut self, store: &S, conn: usize, out: &mut SyncOut<'_>) {
        let endian = store.core().endian();

        if let Some(pos) = self.connections.iter().position(|c| c.conn == conn) {
            let c = self.connections.swap_remove(pos);

            let mut frame = Vec::with_capacity(3);

            frame.push(cmd(b'b', endian));
            push_u16(&mut frame, c.id_remote, endian);

            (out.reply)(&frame);
        }
    }

    /// Process an inbound frame from transport slot `conn`.
    pub fn process<S: Store>(
        &mut self,
        store: &mut S,
        conn: usize,
        frame: &[u8],
        out: &mut SyncOut<'_>,
    ) -> Result<(), SyncError> {
        let &command = frame.first().ok_or(SyncError::BadMessage)?;

        let wire_endian = match command {
            b'h' | b'w' | b'u' | b'b' => Endian::Little,
            b'H' | b'W' | b'U' | b'B' => Endian::Big,
            _ => return Err(SyncError::BadMessage),
        };

        if wire_endian != store.core().endian() {
            // Same hash implies the same flag; this frame belongs to some
            // other store or a misconfigured peer.
            fmt::warning!("sync frame endianness does not match the store");

            return Err(SyncError::EndianMismatch);
        }

        let endian = wire_endian;
        let payload = &frame[1..];

        match command.to_ascii_lowercase() {
            b'h' => self.on_hello(store, conn, frame, payload, endian, out),
            b'w' => self.on_welcome(store, conn, frame, payload, endian, out),
            b'u' => self.on_update(store, conn, frame, payload, endian, out),
            b'b' => self.on_bye(store, frame, payload, out),
            _ => unreachable!(),
        }
    }

    fn on_hello<S: Store>(
        &mut self,
        store: &mut S,
        conn: usize,
        frame: &[u8],
        payload: &[u8],
        endian: Endian,
        out: &mut SyncOut<'_>,
    ) -> Result<(), SyncError> {
        if payload.len() != 42 {
            return Err(SyncError::BadMessage);
        }

        let hash = StoreHash::from_hex(&payload[..40]).ok_or(SyncError::BadMessage)?;

        if hash != *store.core().hash() {
            forward(frame, out);

            return Err(SyncError::HashMismatch);
        }

        let hello_id = read_u16(&payload[40..], endian)?;
        let welcome_id = self.issue_id();

        self.connections.retain(|c| c.conn != conn);
        self.connections.push(Connection {
            conn,
            id_local: welcome_id,
            id_remote: hello_id,
            seq_sent: store.core().journal().snapshot(),
            state: ConnectionState::Welcomed,
            hold: false,
            last_update_ms: 0,
        });

        let core = store.core();
        let mut reply = Vec::with_capacity(5 + core.buffer().len());

        reply.push(cmd(b'w', endian));
        push_u16(&mut reply, hello_id, endian);
        push_u16(&mut reply, welcome_id, endian);
        reply.extend_from_slice(core.buffer());

        (out.reply)(&reply);

        fmt::info!("welcomed peer id {}", hello_id);

        Ok(())
    }

    fn on_welcome<S: Store>(
        &mut self,
        store: &mut S,
        conn: usize,
        frame: &[u8],
        payload: &[u8],
        endian: Endian,
        out: &mut SyncOut<'_>,
    ) -> Result<(), SyncError> {
        if payload.len() < 4 {
            return Err(SyncError::BadMessage);
        }

        let hello_id = read_u16(&payload[..2], endian)?;
        let welcome_id = read_u16(&payload[2..], endian)?;
        let buffer = &payload[4..];

        let Some(c) = self
            .connections
            .iter_mut()
            .find(|c| c.conn == conn && c.id_local == hello_id)
        else {
            // Some chained store's handshake.
            forward(frame, out);

            return Err(SyncError::HashMismatch);
        };

        if c.state != ConnectionState::HelloSent {
            fmt::debug!("unexpected welcome on established connection");

            return Err(SyncError::BadMessage);
        }

        if buffer.len() != store.core().buffer().len() {
            let local = store.core().buffer().len() as u32;

            fmt::warning!(
                "peer welcomed with a {} byte buffer, ours is {}; ignoring",
                buffer.len(),
                local
            );

            return Err(SyncError::SchemaDrift {
                local,
                remote: buffer.len() as u32,
            });
        }

        c.id_remote = welcome_id;
        c.state = ConnectionState::Welcomed;

        store
            .core_mut()
            .overwrite(buffer)
            .map_err(|_| SyncError::BadMessage)?;

        // The peer's state is by definition what it just sent us.
        let seq = store.core().journal().snapshot();

        if let Some(c) = self
            .connections
            .iter_mut()
            .find(|c| c.conn == conn && c.id_local == hello_id)
        {
            c.seq_sent = seq;
        }

        fmt::info!("welcomed by peer id {}", welcome_id);

        Ok(())
    }

    fn on_update<S: Store>(
        &mut self,
        store: &mut S,
        conn: usize,
        frame: &[u8],
        payload: &[u8],
        endian: Endian,
        out: &mut SyncOut<'_>,
    ) -> Result<(), SyncError> {
        if payload.len() < 2 {
            return Err(SyncError::BadMessage);
        }

        let id = read_u16(&payload[..2], endian)?;

        let Some(idx) = self
            .connections
            .iter()
            .position(|c| c.conn == conn && c.id_local == id && c.state == ConnectionState::Welcomed)
        else {
            forward(frame, out);

            return Err(SyncError::HashMismatch);
        };

        // Our own unsent changes must go out first: after the apply we mark
        // the peer current, which would otherwise swallow them.
        if let Some(update) = self.build_update(store, idx) {
            (out.reply)(&update);
        }

        let width = field_width(store.core().buffer().len());
        let mut rest = &payload[2..];

        while !rest.is_empty() {
            if rest.len() < 2 * width {
                return Err(SyncError::BadMessage);
            }

            let key = get_uint(rest, width, endian).map_err(|_| SyncError::BadMessage)?;
            let len = get_uint(&rest[width..], width, endian)
                .map_err(|_| SyncError::BadMessage)?;

            rest = &rest[2 * width..];

            let len = len as usize;
            let key = u32::try_from(key).map_err(|_| SyncError::BadMessage)?;

            if rest.len() < len {
                return Err(SyncError::BadMessage);
            }

            let (data, tail) = rest.split_at(len);

            rest = tail;

            match store.core().journal().size_of(key) {
                Some(size) if usize::from(size) == len => {
                    store
                        .core_mut()
                        .write_bytes(key, data)
                        .map_err(|_| SyncError::BadMessage)?;
                }
                Some(size) => {
                    let local = u32::from(size);

                    fmt::warning!(
                        "update for key {} carries {} bytes, object is {}; ignoring",
                        key,
                        len,
                        local
                    );

                    return Err(SyncError::SchemaDrift {
                        local,
                        remote: len as u32,
                    });
                }
                None => {
                    fmt::warning!("update for unknown key {}; ignoring", key);

                    return Err(SyncError::SchemaDrift {
                        local: 0,
                        remote: key,
                    });
                }
            }
        }

        // Do not echo what the peer just told us; other connections pick
        // these changes up on their next tick.
        self.connections[idx].seq_sent = store.core().journal().seq_now();

        Ok(())
    }

    fn on_bye<S: Store>(
        &mut self,
        store: &mut S,
        frame: &[u8],
        payload: &[u8],
        out: &mut SyncOut<'_>,
    ) -> Result<(), SyncError> {
        match payload.len() {
            // Transport-wide: everyone on the chain hangs up.
            0 => {
                self.connections.clear();

                forward(frame, out);

                Ok(())
            }
            2 => {
                let endian = store.core().endian();
                let id = read_u16(payload, endian)?;

                let before = self.connections.len();

                self.connections.retain(|c| c.id_local != id);

                if self.connections.len() == before {
                    forward(frame, out);

                    return Err(SyncError::UnknownPeer);
                }

                Ok(())
            }
            40 => {
                let hash = StoreHash::from_hex(payload).ok_or(SyncError::BadMessage)?;

                if hash == *store.core().hash() {
                    self.connections.clear();

                    Ok(())
                } else {
                    forward(frame, out);

                    Err(SyncError::HashMismatch)
                }
            }
            _ => Err(SyncError::BadMessage),
        }
    }

    /// Send periodic Updates where due. `send(conn, frame)` routes a frame
    /// to its transport slot.
    pub fn tick<S: Store>(
        &mut self,
        store: &mut S,
        now_ms: u64,
        send: &mut dyn FnMut(usize, &[u8]),
    ) {
        let interval = self.cfg.interval_ms;

        for idx in 0..self.connections.len() {
            let c = self.connections[idx];

            if c.state != ConnectionState::Welcomed || c.hold {
                continue;
            }

            if now_ms.saturating_sub(c.last_update_ms) < interval {
                continue;
            }

            if let Some(update) = self.build_update(store, idx) {
                self.connections[idx].last_update_ms = now_ms;

                send(c.conn, &update);
            }
        }
    }

    /// Send an Update on every welcomed connection immediately, holds
    /// excepted.
    pub fn trigger<S: Store>(&mut self, store: &mut S, send: &mut dyn FnMut(usize, &[u8])) {
        for idx in 0..self.connections.len() {
            let c = self.connections[idx];

            if c.state != ConnectionState::Welcomed || c.hold {
                continue;
            }

            if let Some(update) = self.build_update(store, idx) {
                send(c.conn, &update);
            }
        }
    }

    /// Encode the pending delta toward connection `idx`, advancing its
    /// snapshot. `None` when nothing changed.
    fn build_update<S: Store>(&mut self, store: &S, idx: usize) -> Option<Vec<u8>> {
        let core = store.core();
        let c = &mut self.connections[idx];

        if !core.journal().has_changes_since(c.seq_sent) {
            return None;
        }

        let endian = core.endian();
        let width = field_width(core.buffer().len());

        let mut frame = Vec::with_capacity(16);

        frame.push(cmd(b'u', endian));
        push_u16(&mut frame, c.id_remote, endian);

        let mut any = false;

        for entry in core.journal().changes_since(c.seq_sent) {
            let mut field = [0u8; 8];

            // Keys and sizes fit the derived width by construction.
            if put_uint(&mut field, u64::from(entry.key), width, endian).is_err() {
                continue;
            }

            frame.extend_from_slice(&field[..width]);

            if put_uint(&mut field, u64::from(entry.size), width, endian).is_err() {
                continue;
            }

            frame.extend_from_slice(&field[..width]);

            match core.read_bytes(entry.key, entry.size) {
                Ok(data) => frame.extend_from_slice(data),
                Err(_) => return None,
            }

            any = true;
        }

        c.seq_sent = core.journal().snapshot();

        any.then_some(frame)
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Field width in bytes for keys/lengths of a buffer this long.
fn field_width(buffer_len: usize) -> usize {
    let bits = usize::BITS - buffer_len.leading_zeros();

    (bits as usize).div_ceil(8).max(1)
}

fn cmd(lower: u8, endian: Endian) -> u8 {
    match endian {
        Endian::Little => lower,
        Endian::Big => lower.to_ascii_uppercase(),
    }
}

fn push_u16(frame: &mut Vec<u8>, value: u16, endian: Endian) {
    frame.extend_from_slice(value.pack(endian).as_ref());
}

fn read_u16(raw: &[u8], endian: Endian) -> Result<u16, SyncError> {
    u16::unpack_from_slice(raw, endian).map_err(|_| SyncError::BadMessage)
}

fn forward(frame: &[u8], out: &mut SyncOut<'_>) {
    if let Some(sink) = out.forward.as_mut() {
        sink(frame);
    } else {
        fmt::debug!("dropping frame for another store, no chain configured");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store::TestStore;
    use crate::store::StoreExt;
    use crate::types::Value;
    use alloc::vec::Vec;

    fn pump(
        a: (&mut Synchronizer, &mut TestStore),
        b: (&mut Synchronizer, &mut TestStore),
        a_to_b: Vec<Vec<u8>>,
    ) {
        // Carry frames both ways until the link is quiet.
        let mut to_b = a_to_b;
        let mut to_a: Vec<Vec<u8>> = Vec::new();

        while !to_b.is_empty() || !to_a.is_empty() {
            let mut replies: Vec<Vec<u8>> = Vec::new();

            for frame in to_b.drain(..) {
                let mut reply = |f: &[u8]| replies.push(f.to_vec());
                let mut out = SyncOut {
                    reply: &mut reply,
                    forward: None,
                };

                let _ = b.0.process(b.1, 0, &frame, &mut out);
            }

            to_a.append(&mut replies);

            let mut replies: Vec<Vec<u8>> = Vec::new();

            for frame in to_a.drain(..) {
                let mut reply = |f: &[u8]| replies.push(f.to_vec());
                let mut out = SyncOut {
                    reply: &mut reply,
                    forward: None,
                };

                let _ = a.0.process(a.1, 0, &frame, &mut out);
            }

            to_b.append(&mut replies);
        }
    }

    fn collect_hello(sync: &mut Synchronizer, store: &TestStore) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut reply = |f: &[u8]| frames.push(f.to_vec());
        let mut out = SyncOut {
            reply: &mut reply,
            forward: None,
        };

        sync.hello(store, 0, &mut out);

        frames
    }

    fn drain_ticks(
        from: (&mut Synchronizer, &mut TestStore),
        to: (&mut Synchronizer, &mut TestStore),
        now_ms: u64,
    ) {
        let mut frames = Vec::new();

        from.0
            .tick(from.1, now_ms, &mut |_conn, frame: &[u8]| {
                frames.push(frame.to_vec())
            });

        pump(from, to, frames);
    }

    #[test]
    fn hello_welcome_adopts_peer_buffer() {
        let mut sync_a = Synchronizer::new();
        let mut sync_b = Synchronizer::new();
        let mut store_a = TestStore::new(Endian::Little);
        let mut store_b = TestStore::new(Endian::Little);

        let x = store_a.lookup("/x").unwrap();

        store_a.set(&x, Value::Int32(1)).unwrap();
        store_b.set(&x, Value::Int32(9)).unwrap();

        let hello = collect_hello(&mut sync_a, &store_a);

        pump(
            (&mut sync_a, &mut store_a),
            (&mut sync_b, &mut store_b),
            hello,
        );

        // The Welcome wins: A now carries B's value.
        assert_eq!(store_a.get(&x).unwrap(), Value::Int32(9));
        assert_eq!(
            sync_a.connection_state(0),
            Some(ConnectionState::Welcomed)
        );
        assert_eq!(
            sync_b.connection_state(0),
            Some(ConnectionState::Welcomed)
        );
    }

    #[test]
    fn update_propagates_after_interval() {
        let mut sync_a = Synchronizer::new();
        let mut sync_b = Synchronizer::new();
        let mut store_a = TestStore::new(Endian::Little);
        let mut store_b = TestStore::new(Endian::Little);

        let hello = collect_hello(&mut sync_a, &store_a);

        pump(
            (&mut sync_a, &mut store_a),
            (&mut sync_b, &mut store_b),
            hello,
        );

        let x = store_a.lookup("/x").unwrap();

        store_b.set(&x, Value::Int32(10)).unwrap();

        drain_ticks(
            (&mut sync_b, &mut store_b),
            (&mut sync_a, &mut store_a),
            1_000,
        );

        assert_eq!(store_a.get(&x).unwrap(), Value::Int32(10));

        // And the other direction.
        store_a.set(&x, Value::Int32(11)).unwrap();

        drain_ticks(
            (&mut sync_a, &mut store_a),
            (&mut sync_b, &mut store_b),
            2_000,
        );

        assert_eq!(store_b.get(&x).unwrap(), Value::Int32(11));
    }

    #[test]
    fn applied_update_is_not_echoed() {
        let mut sync_a = Synchronizer::new();
        let mut sync_b = Synchronizer::new();
        let mut store_a = TestStore::new(Endian::Little);
        let mut store_b = TestStore::new(Endian::Little);

        let hello = collect_hello(&mut sync_a, &store_a);

        pump(
            (&mut sync_a, &mut store_a),
            (&mut sync_b, &mut store_b),
            hello,
        );

        let x = store_a.lookup("/x").unwrap();

        store_b.set(&x, Value::Int32(10)).unwrap();

        drain_ticks(
            (&mut sync_b, &mut store_b),
            (&mut sync_a, &mut store_a),
            1_000,
        );

        // A applied B's update; nothing pends toward B.
        let mut sent = Vec::new();

        sync_a.trigger(&mut store_a, &mut |_conn, frame: &[u8]| {
            sent.push(frame.to_vec())
        });

        assert!(sent.is_empty());
    }

    #[test]
    fn updates_ship_in_key_order() {
        let mut sync = Synchronizer::new();
        let mut store_a = TestStore::new(Endian::Little);
        let mut store_b = TestStore::new(Endian::Little);
        let mut sync_b = Synchronizer::new();

        let hello = collect_hello(&mut sync, &store_a);

        pump(
            (&mut sync, &mut store_a),
            (&mut sync_b, &mut store_b),
            hello,
        );

        let baz = store_a.lookup("/baz").unwrap();
        let x = store_a.lookup("/x").unwrap();

        // Touch in descending key order; the wire stays ascending.
        store_a.set(&baz, Value::Uint16(5)).unwrap();
        store_a.set(&x, Value::Int32(6)).unwrap();

        let mut sent = Vec::new();

        sync.trigger(&mut store_a, &mut |_conn, frame: &[u8]| {
            sent.push(frame.to_vec())
        });

        assert_eq!(sent.len(), 1);

        let frame = &sent[0];

        // u, id:u16, then (key,len,data) with 1-byte fields for a 22 byte
        // buffer: key 0 before key 8.
        assert_eq!(frame[0], b'u');
        assert_eq!(frame[3], 0);
        assert_eq!(frame[4], 4);
        assert_eq!(frame[9], 8);
        assert_eq!(frame[10], 2);
    }

    #[test]
    fn foreign_hash_is_forwarded() {
        let mut sync = Synchronizer::new();
        let mut store = TestStore::new(Endian::Little);

        let mut frame = Vec::new();

        frame.push(b'h');
        frame.extend_from_slice(&[b'0'; 40]);
        frame.extend_from_slice(&[0x05, 0x00]);

        let mut replies: Vec<Vec<u8>> = Vec::new();
        let mut forwarded: Vec<Vec<u8>> = Vec::new();

        let mut reply = |f: &[u8]| replies.push(f.to_vec());
        let mut forward = |f: &[u8]| forwarded.push(f.to_vec());
        let mut out = SyncOut {
            reply: &mut reply,
            forward: Some(&mut forward),
        };

        let result = sync.process(&mut store, 0, &frame, &mut out);

        assert_eq!(result, Err(SyncError::HashMismatch));
        assert!(replies.is_empty());
        assert_eq!(forwarded, [frame]);
    }

    #[test]
    fn endian_mismatch_is_detected_from_case() {
        let mut sync = Synchronizer::new();
        let mut store = TestStore::new(Endian::Little);

        let mut frame = Vec::new();

        frame.push(b'H');
        frame.extend_from_slice(&[b'0'; 40]);
        frame.extend_from_slice(&[0x05, 0x00]);

        let mut reply = |_: &[u8]| {};
        let mut out = SyncOut {
            reply: &mut reply,
            forward: None,
        };

        assert_eq!(
            sync.process(&mut store, 0, &frame, &mut out),
            Err(SyncError::EndianMismatch)
        );
    }

    #[test]
    fn schema_drift_is_diagnosed() {
        let mut sync_a = Synchronizer::new();
        let mut store_a = TestStore::new(Endian::Little);

        let hello = collect_hello(&mut sync_a, &store_a);

        // Hand-craft a Welcome with a short buffer.
        let hello_id = u16::from_le_bytes([hello[0][41], hello[0][42]]);

        let mut frame = Vec::new();

        frame.push(b'w');
        frame.extend_from_slice(&hello_id.to_le_bytes());
        frame.extend_from_slice(&7u16.to_le_bytes());
        frame.extend_from_slice(&[0xaa; 3]);

        let mut reply = |_: &[u8]| {};
        let mut out = SyncOut {
            reply: &mut reply,
            forward: None,
        };

        assert_eq!(
            sync_a.process(&mut store_a, 0, &frame, &mut out),
            Err(SyncError::SchemaDrift {
                local: 22,
                remote: 3
            })
        );

        // The connection stays in HelloSent; nothing was applied.
        assert_eq!(
            sync_a.connection_state(0),
            Some(ConnectionState::HelloSent)
        );
    }

    #[test]
    fn bye_with_id_tears_down_one_connection() {
        let mut sync_a = Synchronizer::new();
        let mut sync_b = Synchronizer::new();
        let mut store_a = TestStore::new(Endian::Little);
        let mut store_b = TestStore::new(Endian::Little);

        let hello = collect_hello(&mut sync_a, &store_a);

        pump(
            (&mut sync_a, &mut store_a),
            (&mut sync_b, &mut store_b),
            hello,
        );

        let mut frames = Vec::new();
        let mut reply = |f: &[u8]| frames.push(f.to_vec());
        let mut out = SyncOut {
            reply: &mut reply,
            forward: None,
        };

        sync_a.bye(&store_a, 0, &mut out);

        assert_eq!(sync_a.connection_state(0), None);

        pump(
            (&mut sync_a, &mut store_a),
            (&mut sync_b, &mut store_b),
            frames,
        );

        assert_eq!(sync_b.connection_state(0), None);
    }

    #[test]
    fn empty_bye_clears_and_chains() {
        let mut sync = Synchronizer::new();
        let mut store = TestStore::new(Endian::Little);

        let hello = collect_hello(&mut sync, &store);
        let _ = hello;

        let mut forwarded: Vec<Vec<u8>> = Vec::new();
        let mut reply = |_: &[u8]| {};
        let mut forward = |f: &[u8]| forwarded.push(f.to_vec());
        let mut out = SyncOut {
            reply: &mut reply,
            forward: Some(&mut forward),
        };

        sync.process(&mut store, 0, b"b", &mut out).unwrap();

        assert_eq!(sync.connection_state(0), None);
        assert_eq!(forwarded, [b"b".to_vec()]);
    }

    #[test]
    fn chained_ids_do_not_collide() {
        let mut sync_a = Synchronizer::new();
        let store = TestStore::new(Endian::Little);

        let hello_a = collect_hello(&mut sync_a, &store);

        assert_eq!(hello_a[0][41], 1);

        // The next synchronizer on the same transport seeds past the ids the
        // first one has issued.
        let mut sync_b = Synchronizer::with_config(SyncConfig {
            base_id: sync_a.last_issued_id() + 1,
            ..SyncConfig::default()
        });

        let hello_b = collect_hello(&mut sync_b, &store);

        assert_eq!(hello_b[0][41], 2);
    }

    #[test]
    fn field_width_tracks_buffer_size() {
        assert_eq!(field_width(1), 1);
        assert_eq!(field_width(255), 1);
        assert_eq!(field_width(256), 2);
        assert_eq!(field_width(65536), 3);
    }
}
