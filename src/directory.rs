//! Name resolution over a compact byte-coded trie.
//!
//! A store ships its object names as a read-only blob that resolves a
//! (possibly abbreviated) name to an object in a single pass, one byte of
//! the query at a time, without allocating. The blob follows this grammar:
//!
//! ```text
//! node   ::= leaf | skip | branch
//! leaf   ::= 0x00 tag varint(key) varint(size)
//! skip   ::= 0x01 len byte{len}
//! branch ::= 0x02 n ( char varint(subtree_len) ){n} subtree{n}
//! varint ::= little-endian base-128, 7 data bits per byte, MSB = continue
//! ```
//!
//! Branch entries are sorted by `char`. The reserved entry char `0x00` marks
//! "an object's name ends here" and is only taken when the query is
//! exhausted, so an exact name always wins over its own extensions. A query
//! that ends early resolves anyway if exactly one object remains reachable,
//! which is what makes abbreviations like `r/b` work.

use crate::error::DirectoryError;
use crate::types::TypeTag;
use crate::MAX_NAME;

const NODE_LEAF: u8 = 0x00;
const NODE_SKIP: u8 = 0x01;
const NODE_BRANCH: u8 = 0x02;

/// A resolved store object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ObjectRef {
    /// The object's one-byte type tag.
    pub tag: TypeTag,
    /// Buffer offset for variables, function id for functions.
    pub key: u32,
    /// Object size in bytes.
    pub size: u16,
}

/// A read-only view over a directory blob.
#[derive(Debug, Copy, Clone)]
pub struct Directory<'a> {
    code: &'a [u8],
}

impl<'a> Directory<'a> {
    /// Wrap a directory blob, typically emitted by the store generator or a
    /// [`DirectoryBuilder`].
    pub const fn new(code: &'a [u8]) -> Self {
        Self { code }
    }

    /// The raw blob.
    pub const fn code(&self) -> &'a [u8] {
        self.code
    }

    /// Resolve a possibly-abbreviated object name.
    pub fn lookup(&self, name: &str) -> Result<ObjectRef, DirectoryError> {
        let query = name.as_bytes();

        let mut pos = 0usize;
        let mut qi = 0usize;
        // Set once the walk consumes a trie byte the query no longer covers;
        // from then on only a lone remaining object may resolve.
        let mut abbreviated = false;

        if self.code.is_empty() {
            return Err(DirectoryError::NotFound);
        }

        loop {
            match *self.code.get(pos).ok_or(DirectoryError::BadCode)? {
                NODE_LEAF => {
                    return if qi == query.len() {
                        self.parse_leaf(pos + 1).map(|(obj, _)| obj)
                    } else {
                        // Query continues past a complete name.
                        Err(DirectoryError::NotFound)
                    };
                }
                NODE_SKIP => {
                    let len =
                        usize::from(*self.code.get(pos + 1).ok_or(DirectoryError::BadCode)?);
                    let chars = self
                        .code
                        .get(pos + 2..pos + 2 + len)
                        .ok_or(DirectoryError::BadCode)?;

                    for c in chars {
                        if qi < query.len() {
                            if query[qi] != *c {
                                return Err(DirectoryError::NotFound);
                            }

                            qi += 1;
                        } else {
                            abbreviated = true;
                        }
                    }

                    pos += 2 + len;
                }
                NODE_BRANCH => {
                    let branch = Branch::parse(self.code, pos)?;

                    if qi < query.len() {
                        // NUL is the end-marker entry, never a name char.
                        if query[qi] == 0 {
                            return Err(DirectoryError::NotFound);
                        }

                        let next = branch.descend(self.code, query[qi])?;

                        qi += 1;
                        pos = next;
                    } else if !abbreviated && branch.has_end {
                        // Exact name: the end-marker entry is always first.
                        pos = branch.first_subtree;
                    } else if branch.count == 1 {
                        abbreviated = true;
                        pos = branch.first_subtree;
                    } else {
                        return Err(DirectoryError::Ambiguous);
                    }
                }
                _ => return Err(DirectoryError::BadCode),
            }
        }
    }

    /// Enumerate all objects whose name starts with `prefix`, in
    /// lexicographic order.
    ///
    /// Names are reassembled into a fixed scratch buffer bounded by
    /// [`MAX_NAME`]; an over-long name aborts with
    /// [`DirectoryError::BadCode`].
    pub fn list(
        &self,
        prefix: &str,
        emit: &mut dyn FnMut(ObjectRef, &str),
    ) -> Result<(), DirectoryError> {
        if self.code.is_empty() {
            return Ok(());
        }

        let mut name = heapless::Vec::<u8, MAX_NAME>::new();

        self.walk(0, prefix.as_bytes(), &mut name, emit)
    }

    fn walk(
        &self,
        mut pos: usize,
        prefix: &[u8],
        name: &mut heapless::Vec<u8, MAX_NAME>,
        emit: &mut dyn FnMut(ObjectRef, &str),
    ) -> Result<(), DirectoryError> {
        loop {
            match *self.code.get(pos).ok_or(DirectoryError::BadCode)? {
                NODE_LEAF => {
                    let (obj, _) = self.parse_leaf(pos + 1)?;

                    if name.starts_with(prefix) {
                        let text = core::str::from_utf8(name)
                            .map_err(|_| DirectoryError::BadCode)?;

                        emit(obj, text);
                    }

                    return Ok(());
                }
                NODE_SKIP => {
                    let len =
                        usize::from(*self.code.get(pos + 1).ok_or(DirectoryError::BadCode)?);
                    let chars = self
                        .code
                        .get(pos + 2..pos + 2 + len)
                        .ok_or(DirectoryError::BadCode)?;

                    name.extend_from_slice(chars)
                        .map_err(|_| DirectoryError::BadCode)?;

                    pos += 2 + len;
                }
                NODE_BRANCH => {
                    let branch = Branch::parse(self.code, pos)?;
                    let mut subtree = branch.first_subtree;
                    let mut entry = branch.entries;

                    for _ in 0..branch.count {
                        let c = self.code[entry];
                        let (len, next_entry) = read_varint(self.code, entry + 1)?;

                        let depth = name.len();

                        if c != 0 {
                            name.push(c).map_err(|_| DirectoryError::BadCode)?;
                        }

                        self.walk(subtree, prefix, name, emit)?;
                        name.truncate(depth);

                        subtree += len as usize;
                        entry = next_entry;
                    }

                    return Ok(());
                }
                _ => return Err(DirectoryError::BadCode),
            }
        }
    }

    fn parse_leaf(&self, pos: usize) -> Result<(ObjectRef, usize), DirectoryError> {
        let tag = *self.code.get(pos).ok_or(DirectoryError::BadCode)?;
        let (key, pos) = read_varint(self.code, pos + 1)?;
        let (size, pos) = read_varint(self.code, pos)?;

        Ok((
            ObjectRef {
                tag: TypeTag::from_raw(tag),
                key,
                size: u16::try_from(size).map_err(|_| DirectoryError::BadCode)?,
            },
            pos,
        ))
    }
}

/// Decoded branch header.
struct Branch {
    /// Number of entries.
    count: usize,
    /// Offset of the first `(char, varint)` entry pair.
    entries: usize,
    /// Offset of the first subtree (the end-marker's, if present).
    first_subtree: usize,
    /// An entry with char `0x00` exists.
    has_end: bool,
}

impl Branch {
    fn parse(code: &[u8], pos: usize) -> Result<Self, DirectoryError> {
        let count = usize::from(*code.get(pos + 1).ok_or(DirectoryError::BadCode)?);

        if count == 0 {
            return Err(DirectoryError::BadCode);
        }

        let entries = pos + 2;
        let mut cursor = entries;
        let mut has_end = false;

        for i in 0..count {
            let c = *code.get(cursor).ok_or(DirectoryError::BadCode)?;

            if c == 0 {
                if i != 0 {
                    return Err(DirectoryError::BadCode);
                }

                has_end = true;
            }

            let (_, next) = read_varint(code, cursor + 1)?;

            cursor = next;
        }

        Ok(Self {
            count,
            entries,
            first_subtree: cursor,
            has_end,
        })
    }

    /// Subtree offset for the entry matching `c`, or `NotFound`.
    fn descend(&self, code: &[u8], c: u8) -> Result<usize, DirectoryError> {
        let mut entry = self.entries;
        let mut subtree = self.first_subtree;

        for _ in 0..self.count {
            let ec = *code.get(entry).ok_or(DirectoryError::BadCode)?;
            let (len, next_entry) = read_varint(code, entry + 1)?;

            if ec == c {
                return Ok(subtree);
            }

            subtree += len as usize;
            entry = next_entry;
        }

        Err(DirectoryError::NotFound)
    }
}

fn read_varint(code: &[u8], mut pos: usize) -> Result<(u32, usize), DirectoryError> {
    let mut value = 0u64;
    let mut shift = 0u32;

    loop {
        let byte = *code.get(pos).ok_or(DirectoryError::BadCode)?;

        pos += 1;

        if shift > 28 {
            return Err(DirectoryError::BadCode);
        }

        value |= u64::from(byte & 0x7f) << shift;

        if byte & 0x80 == 0 {
            return u32::try_from(value)
                .map(|value| (value, pos))
                .map_err(|_| DirectoryError::BadCode);
        }

        shift += 7;
    }
}

fn push_varint(out: &mut alloc::vec::Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;

        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        out.push(byte);

        if value == 0 {
            return;
        }
    }
}

/// Assembles a directory blob from a set of named objects.
///
/// The store generator emits these blobs at build time; the builder exists
/// so tests and hand-written stores can do the same at startup.
#[derive(Debug, Default)]
pub struct DirectoryBuilder {
    entries: alloc::vec::Vec<(alloc::vec::Vec<u8>, ObjectRef)>,
}

/// A set of names that cannot be encoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuildError {
    /// The same name was added twice.
    Duplicate,
    /// An empty name was added.
    EmptyName,
    /// A name exceeds [`MAX_NAME`] or a branch exceeds 255 successors.
    TooLarge,
}

impl core::fmt::Display for BuildError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BuildError::Duplicate => f.write_str("duplicate object name"),
            BuildError::EmptyName => f.write_str("empty object name"),
            BuildError::TooLarge => f.write_str("name or branch too large"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BuildError {}

impl DirectoryBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object.
    pub fn object(&mut self, name: &str, tag: TypeTag, key: u32, size: u16) -> &mut Self {
        self.entries
            .push((name.as_bytes().to_vec(), ObjectRef { tag, key, size }));

        self
    }

    /// Encode the blob.
    pub fn build(&mut self) -> Result<alloc::vec::Vec<u8>, BuildError> {
        if self.entries.iter().any(|(name, _)| name.is_empty()) {
            return Err(BuildError::EmptyName);
        }

        if self.entries.iter().any(|(name, _)| name.len() > MAX_NAME) {
            return Err(BuildError::TooLarge);
        }

        self.entries.sort_by(|a, b| a.0.cmp(&b.0));

        if self.entries.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(BuildError::Duplicate);
        }

        if self.entries.is_empty() {
            return Ok(alloc::vec::Vec::new());
        }

        Self::encode(&self.entries, 0)
    }

    fn encode(
        entries: &[(alloc::vec::Vec<u8>, ObjectRef)],
        depth: usize,
    ) -> Result<alloc::vec::Vec<u8>, BuildError> {
        let mut out = alloc::vec::Vec::new();
        let mut depth = depth;

        // Entries are sorted, so a terminating name can only be the first.
        let terminated = entries[0].0.len() == depth;

        if entries.len() == 1 && terminated {
            Self::encode_leaf(&mut out, &entries[0].1);

            return Ok(out);
        }

        // Hoist the longest common run of next chars into a skip node. A
        // terminated first entry has no char at `depth`, so the run is empty
        // and nothing is emitted.
        let mut common = 0usize;

        'outer: loop {
            let probe = match entries[0].0.get(depth + common) {
                Some(c) => *c,
                None => break,
            };

            for (name, _) in &entries[1..] {
                if name.get(depth + common) != Some(&probe) {
                    break 'outer;
                }
            }

            common += 1;
        }

        if common > 0 {
            debug_assert!(common <= usize::from(u8::MAX));

            out.push(NODE_SKIP);
            out.push(common as u8);
            out.extend_from_slice(&entries[0].0[depth..depth + common]);

            depth += common;

            if entries.len() == 1 {
                Self::encode_leaf(&mut out, &entries[0].1);

                return Ok(out);
            }
        }

        // The skip may have consumed the whole first name.
        let terminated = entries[0].0.len() == depth;

        // Group the remaining entries by their next char; the terminated
        // entry becomes the end-marker group.
        let mut groups = alloc::vec::Vec::<(u8, core::ops::Range<usize>)>::new();
        let mut start = 0usize;

        if terminated {
            groups.push((0, 0..1));
            start = 1;
        }

        while start < entries.len() {
            let c = entries[start].0[depth];
            let mut end = start + 1;

            while end < entries.len() && entries[end].0[depth] == c {
                end += 1;
            }

            groups.push((c, start..end));
            start = end;
        }

        if groups.len() > usize::from(u8::MAX) {
            return Err(BuildError::TooLarge);
        }

        let subtrees = groups
            .iter()
            .map(|(c, range)| {
                Self::encode(
                    &entries[range.clone()],
                    if *c == 0 { depth } else { depth + 1 },
                )
            })
            .collect::<Result<alloc::vec::Vec<_>, _>>()?;

        out.push(NODE_BRANCH);
        out.push(groups.len() as u8);

        for ((c, _), subtree) in groups.iter().zip(&subtrees) {
            out.push(*c);
            push_varint(&mut out, subtree.len() as u32);
        }

        for subtree in &subtrees {
            out.extend_from_slice(subtree);
        }

        Ok(out)
    }

    fn encode_leaf(out: &mut alloc::vec::Vec<u8>, obj: &ObjectRef) {
        out.push(NODE_LEAF);
        out.push(obj.tag.raw());
        push_varint(out, obj.key);
        push_varint(out, u32::from(obj.size));
    }
}
