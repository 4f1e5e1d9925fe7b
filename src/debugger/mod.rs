//! The embedded debugger: a request/response command interpreter over a
//! store.
//!
//! Requests are a single ASCII command byte plus payload; responses are
//! payload bytes, `!` for a bare acknowledgement or `?` for any failure.
//! Values travel as lowercase big-endian hex regardless of the store's
//! endianness. One [`Debugger`] serves one store; the transport below it is
//! whatever [`protocol`](crate::protocol) stack the application assembled.
//!
//! | Cmd | Semantics |
//! |-----|-----------|
//! | `?` | capability list |
//! | `e` | echo |
//! | `r` | read object |
//! | `w` | write object |
//! | `l` | list objects |
//! | `a` | define/remove alias |
//! | `m` | define/remove macro |
//! | `i` | identification |
//! | `v` | versions |
//! | `R` | read memory (`memory-commands` builds only) |
//! | `W` | write memory (`memory-commands` builds only) |
//! | `s` | read stream |

use crate::directory::ObjectRef;
use crate::error::DebugError;
use crate::fmt;
use crate::store::{Store, StoreExt};
use crate::util;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// Acknowledgement response byte.
pub const ACK: u8 = b'!';
/// Failure response byte.
pub const NACK: u8 = b'?';

/// Default alias table capacity.
pub const DEFAULT_MAX_ALIASES: usize = 32;
/// Default bound on the summed size of all macro definitions.
pub const DEFAULT_MAX_MACRO_BYTES: usize = 4096;
/// Default per-stream buffer bound.
pub const DEFAULT_MAX_STREAM_BYTES: usize = 1024;
/// Default bound on concurrently existing streams.
pub const DEFAULT_MAX_STREAMS: usize = 8;

/// Macro recursion bound; a macro may invoke other macros this deep.
const MAX_MACRO_DEPTH: usize = 8;

/// Marker appended to the drained payload of a stream that overflowed.
const TRUNCATION_MARK: &[u8] = b"...";

const BUILTIN_COMMANDS: &[u8] = b"?erwlamivs";

#[derive(Debug, Copy, Clone)]
struct Alias {
    chr: u8,
    obj: ObjectRef,
    /// LRU tick of the last definition or use.
    used: u32,
}

#[derive(Debug, Default)]
struct Stream {
    data: Vec<u8>,
    truncated: bool,
}

/// Resource bounds of a debugger session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DebuggerConfig {
    /// Alias table capacity; the least recently used entry is evicted on
    /// overflow.
    pub max_aliases: usize,
    /// Summed size bound of all macro definitions; exceeding it nacks.
    pub max_macro_bytes: usize,
    /// Per-stream buffer bound; overflow truncates and marks.
    pub max_stream_bytes: usize,
    /// Bound on concurrently existing streams.
    pub max_streams: usize,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            max_aliases: DEFAULT_MAX_ALIASES,
            max_macro_bytes: DEFAULT_MAX_MACRO_BYTES,
            max_stream_bytes: DEFAULT_MAX_STREAM_BYTES,
            max_streams: DEFAULT_MAX_STREAMS,
        }
    }
}

/// A debugger session over one store.
pub struct Debugger {
    cfg: DebuggerConfig,
    identification: Option<&'static str>,
    version: Option<&'static str>,
    aliases: Vec<Alias>,
    lru: u32,
    macros: BTreeMap<u8, Vec<u8>>,
    macro_bytes: usize,
    streams: BTreeMap<u8, Stream>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debugger {
    /// A session with default bounds.
    pub fn new() -> Self {
        Self::with_config(DebuggerConfig::default())
    }

    /// A session with explicit bounds.
    pub fn with_config(cfg: DebuggerConfig) -> Self {
        Self {
            aliases: Vec::with_capacity(cfg.max_aliases),
            cfg,
            identification: None,
            version: None,
            lru: 0,
            macros: BTreeMap::new(),
            macro_bytes: 0,
            streams: BTreeMap::new(),
        }
    }

    /// Set the string returned by the `i` command.
    pub fn set_identification(&mut self, id: &'static str) {
        self.identification = Some(id);
    }

    /// Set the application tokens appended to the `v` response.
    pub fn set_version(&mut self, version: &'static str) {
        self.version = Some(version);
    }

    /// Append application bytes to stream `chr`, creating it on first use.
    ///
    /// Overflowing the per-stream bound drops the excess and marks the
    /// stream truncated; the mark is surfaced on the next drain.
    pub fn stream_write(&mut self, chr: u8, data: &[u8]) -> Result<(), DebugError> {
        if !is_printable(chr) {
            return Err(DebugError::Parse);
        }

        if !self.streams.contains_key(&chr) && self.streams.len() >= self.cfg.max_streams {
            return Err(DebugError::ResourceExhausted);
        }

        let stream = self.streams.entry(chr).or_default();
        let room = self.cfg.max_stream_bytes.saturating_sub(stream.data.len());

        if data.len() > room {
            stream.data.extend_from_slice(&data[..room]);
            stream.truncated = true;

            fmt::debug!("stream overflow, dropping {} bytes", data.len() - room);
        } else {
            stream.data.extend_from_slice(data);
        }

        Ok(())
    }

    /// Process one request and append the response to `rsp`.
    pub fn process<S: Store>(&mut self, store: &mut S, req: &[u8], rsp: &mut Vec<u8>) {
        self.run(store, req, rsp, 0);
    }

    fn run<S: Store>(&mut self, store: &mut S, req: &[u8], rsp: &mut Vec<u8>, depth: usize) {
        let start = rsp.len();

        let result = self.dispatch(store, req, rsp, depth);

        if let Err(e) = result {
            fmt::debug!("request failed: {}", e);

            // Failures reply with a lone nack.
            rsp.truncate(start);
            rsp.push(NACK);
        }
    }

    fn dispatch<S: Store>(
        &mut self,
        store: &mut S,
        req: &[u8],
        rsp: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), DebugError> {
        let (&cmd, args) = req.split_first().ok_or(DebugError::Parse)?;

        match cmd {
            b'?' => self.capabilities(rsp),
            b'e' => {
                rsp.extend_from_slice(args);

                Ok(())
            }
            b'r' => self.read(store, args, rsp),
            b'w' => self.write(store, args, rsp),
            b'l' => self.list(store, rsp),
            b'a' => self.alias(store, args, rsp),
            b'm' => self.define_macro(args, rsp),
            b'i' => {
                let id = self.identification.ok_or(DebugError::Unsupported)?;

                rsp.extend_from_slice(id.as_bytes());

                Ok(())
            }
            b'v' => {
                rsp.push(crate::PROTOCOL_VERSION);

                if let Some(version) = self.version {
                    rsp.push(b' ');
                    rsp.extend_from_slice(version.as_bytes());
                }

                Ok(())
            }
            b's' => self.stream_read(args, rsp),
            #[cfg(feature = "memory-commands")]
            b'R' => memory::read(args, rsp),
            #[cfg(feature = "memory-commands")]
            b'W' => memory::write(args, rsp),
            chr if self.macros.contains_key(&chr) => self.run_macro(store, chr, rsp, depth),
            _ => Err(DebugError::Unsupported),
        }
    }

    fn capabilities(&self, rsp: &mut Vec<u8>) -> Result<(), DebugError> {
        rsp.extend_from_slice(BUILTIN_COMMANDS);

        #[cfg(feature = "memory-commands")]
        rsp.extend_from_slice(b"RW");

        for chr in self.macros.keys() {
            rsp.push(*chr);
        }

        Ok(())
    }

    /// Resolve a name, alias chars included.
    fn resolve<S: Store>(&mut self, store: &S, name: &[u8]) -> Result<ObjectRef, DebugError> {
        if name.len() == 1 {
            if let Some(alias) = self.aliases.iter_mut().find(|a| a.chr == name[0]) {
                self.lru += 1;
                alias.used = self.lru;

                return Ok(alias.obj);
            }
        }

        let name = core::str::from_utf8(name).map_err(|_| DebugError::Parse)?;

        Ok(store.lookup(name)?)
    }

    fn read<S: Store>(
        &mut self,
        store: &mut S,
        args: &[u8],
        rsp: &mut Vec<u8>,
    ) -> Result<(), DebugError> {
        let obj = self.resolve(store, args)?;

        let mut raw = Vec::with_capacity(usize::from(obj.size));

        store
            .read_object(&obj, &mut raw)
            .map_err(|_| DebugError::Parse)?;

        if obj.tag.ty().is_fixed() {
            // Leading zero nybbles of scalars may be omitted.
            util::hex_encode_trimmed(&raw, rsp);
        } else {
            util::hex_encode(&raw, rsp);
        }

        Ok(())
    }

    fn write<S: Store>(
        &mut self,
        store: &mut S,
        args: &[u8],
        rsp: &mut Vec<u8>,
    ) -> Result<(), DebugError> {
        // The name starts at the first '/'. Without one, the final byte must
        // be an alias char and everything before it is the value.
        let split = match args.iter().position(|b| *b == b'/') {
            Some(split) => split,
            None if args.len() >= 2 => args.len() - 1,
            _ => return Err(DebugError::Parse),
        };

        let (hex, name) = args.split_at(split);
        let obj = self.resolve(store, name)?;

        let mut data = Vec::new();

        if obj.tag.ty().is_fixed() {
            let mut raw = [0u8; 8];
            let raw = &mut raw[..usize::from(obj.size)];

            util::hex_decode_be(hex, raw).ok_or(DebugError::BadHex)?;
            data.extend_from_slice(raw);
        } else {
            // Strings and blobs take byte pairs as-is.
            if hex.len() % 2 != 0 {
                return Err(DebugError::BadHex);
            }

            for pair in hex.chunks_exact(2) {
                let hi = util::hex_digit(pair[0]).ok_or(DebugError::BadHex)?;
                let lo = util::hex_digit(pair[1]).ok_or(DebugError::BadHex)?;

                data.push(hi << 4 | lo);
            }
        }

        store
            .write_object(&obj, &data)
            .map_err(|_| DebugError::Parse)?;

        rsp.push(ACK);

        Ok(())
    }

    fn list<S: Store>(&mut self, store: &mut S, rsp: &mut Vec<u8>) -> Result<(), DebugError> {
        store
            .directory()
            .list("", &mut |obj, name| {
                util::hex_encode(&[obj.tag.raw()], rsp);
                util::hex_encode_trimmed(&obj.size.to_be_bytes(), rsp);
                rsp.push(b' ');
                rsp.extend_from_slice(name.as_bytes());
                rsp.push(b'\n');
            })
            .map_err(DebugError::Name)?;

        Ok(())
    }

    fn alias<S: Store>(
        &mut self,
        store: &mut S,
        args: &[u8],
        rsp: &mut Vec<u8>,
    ) -> Result<(), DebugError> {
        let (&chr, name) = args.split_first().ok_or(DebugError::Parse)?;

        if !is_printable(chr) || chr == b'/' {
            return Err(DebugError::Parse);
        }

        if name.is_empty() {
            // Removal; idempotent.
            self.aliases.retain(|a| a.chr != chr);

            rsp.push(ACK);

            return Ok(());
        }

        let obj = self.resolve(store, name)?;

        self.lru += 1;

        if let Some(alias) = self.aliases.iter_mut().find(|a| a.chr == chr) {
            alias.obj = obj;
            alias.used = self.lru;
        } else {
            if self.aliases.len() >= self.cfg.max_aliases {
                // Evict the least recently used entry.
                if let Some(oldest) = self
                    .aliases
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, a)| a.used)
                    .map(|(i, _)| i)
                {
                    self.aliases.swap_remove(oldest);
                }
            }

            self.aliases.push(Alias {
                chr,
                obj,
                used: self.lru,
            });
        }

        rsp.push(ACK);

        Ok(())
    }

    fn define_macro(&mut self, args: &[u8], rsp: &mut Vec<u8>) -> Result<(), DebugError> {
        let (&chr, body) = args.split_first().ok_or(DebugError::Parse)?;

        if !is_printable(chr) {
            return Err(DebugError::Parse);
        }

        // A macro may not shadow a built-in command; the attempt is
        // silently ignored.
        if BUILTIN_COMMANDS.contains(&chr) || (cfg!(feature = "memory-commands") && matches!(chr, b'R' | b'W')) {
            rsp.push(ACK);

            return Ok(());
        }

        let old = self.macros.get(&chr).map_or(0, Vec::len);

        if body.is_empty() {
            self.macros.remove(&chr);
            self.macro_bytes -= old;

            rsp.push(ACK);

            return Ok(());
        }

        if self.macro_bytes - old + body.len() > self.cfg.max_macro_bytes {
            return Err(DebugError::ResourceExhausted);
        }

        self.macro_bytes = self.macro_bytes - old + body.len();
        self.macros.insert(chr, body.to_vec());

        rsp.push(ACK);

        Ok(())
    }

    fn run_macro<S: Store>(
        &mut self,
        store: &mut S,
        chr: u8,
        rsp: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), DebugError> {
        if depth >= MAX_MACRO_DEPTH {
            return Err(DebugError::ResourceExhausted);
        }

        // The body is re-parsed on every invocation: its first byte is the
        // separator, the rest a separator-delimited command list.
        let body = self.macros.get(&chr).cloned().ok_or(DebugError::Parse)?;
        let (&sep, commands) = body.split_first().ok_or(DebugError::Parse)?;

        // Responses of contained commands concatenate without separators.
        for command in commands.split(|b| *b == sep) {
            if !command.is_empty() {
                self.run(store, command, rsp, depth + 1);
            }
        }

        Ok(())
    }

    fn stream_read(&mut self, args: &[u8], rsp: &mut Vec<u8>) -> Result<(), DebugError> {
        let (&chr, suffix) = match args.split_first() {
            Some(parts) => parts,
            None => {
                // Bare `s` lists the existing streams.
                for chr in self.streams.keys() {
                    rsp.push(*chr);
                }

                return Ok(());
            }
        };

        let stream = self.streams.get_mut(&chr).ok_or(DebugError::Parse)?;

        rsp.extend_from_slice(&stream.data);

        if stream.truncated {
            rsp.extend_from_slice(TRUNCATION_MARK);
        }

        stream.data.clear();
        stream.truncated = false;

        rsp.extend_from_slice(suffix);

        Ok(())
    }
}

fn is_printable(chr: u8) -> bool {
    (0x21..=0x7e).contains(&chr)
}

#[cfg(feature = "memory-commands")]
mod memory {
    //! Raw memory access. Inherently unsafe; only compiled in when the
    //! `memory-commands` feature is enabled.

    use super::{DebugError, ACK};
    use crate::util;
    use alloc::vec::Vec;

    fn parse_ptr(hex: &[u8]) -> Result<usize, DebugError> {
        let mut raw = [0u8; 8];

        util::hex_decode_be(hex, &mut raw).ok_or(DebugError::BadHex)?;

        usize::try_from(u64::from_be_bytes(raw)).map_err(|_| DebugError::BadHex)
    }

    /// `R<hexptr> [<len>]`
    pub(super) fn read(args: &[u8], rsp: &mut Vec<u8>) -> Result<(), DebugError> {
        let mut parts = args.splitn(2, |b| *b == b' ');

        let ptr = parse_ptr(parts.next().ok_or(DebugError::Parse)?)?;
        let len = match parts.next() {
            Some(hex) => {
                let mut raw = [0u8; 4];

                util::hex_decode_be(hex, &mut raw).ok_or(DebugError::BadHex)?;

                u32::from_be_bytes(raw) as usize
            }
            None => 1,
        };

        // SAFETY: none whatsoever; the client asked for this address and
        // gets exactly what it asked for.
        let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };

        util::hex_encode(bytes, rsp);

        Ok(())
    }

    /// `W<hexptr> <hexbytes>`
    pub(super) fn write(args: &[u8], rsp: &mut Vec<u8>) -> Result<(), DebugError> {
        let mut parts = args.splitn(2, |b| *b == b' ');

        let ptr = parse_ptr(parts.next().ok_or(DebugError::Parse)?)?;
        let hex = parts.next().ok_or(DebugError::Parse)?;

        if hex.is_empty() || hex.len() % 2 != 0 {
            return Err(DebugError::BadHex);
        }

        for (i, pair) in hex.chunks_exact(2).enumerate() {
            let hi = util::hex_digit(pair[0]).ok_or(DebugError::BadHex)?;
            let lo = util::hex_digit(pair[1]).ok_or(DebugError::BadHex)?;

            // SAFETY: as above.
            unsafe {
                core::ptr::write_volatile((ptr + i) as *mut u8, hi << 4 | lo);
            }
        }

        rsp.push(ACK);

        Ok(())
    }
}
