//! Ref advertisement parsing.
//!
//! Parses the v0/v1 ref listing that `git-upload-pack` sends before
//! negotiation. Over smart HTTP the listing is preceded by a
//! `# service=git-upload-pack` announcement and a flush; over SSH it starts
//! directly with the refs. The first ref line carries the server
//! capabilities after a NUL byte.
//! See: https://git-scm.com/docs/http-protocol

use crate::pktline::{PktLine, PktLines};
use crate::{GitError, Result};
use std::fmt;

/// Ref name used by servers to advertise capabilities for an empty repository.
const CAPABILITIES_PLACEHOLDER: &str = "capabilities^{}";
/// Suffix of peeled tag entries.
const PEELED_SUFFIX: &str = "^{}";

/// A hex object id as advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(String);

impl ObjectId {
    /// SHA-1 id length in hex digits.
    pub const SHA1_HEX_LEN: usize = 40;
    /// SHA-256 id length in hex digits.
    pub const SHA256_HEX_LEN: usize = 64;

    /// Parses a hex object id, normalising it to lowercase.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != Self::SHA1_HEX_LEN && s.len() != Self::SHA256_HEX_LEN {
            return Err(GitError::InvalidAdvertisement(format!(
                "object id {s:?} has length {}",
                s.len()
            )));
        }
        hex::decode(s).map_err(|e| {
            GitError::InvalidAdvertisement(format!("object id {s:?} is not hex: {e}"))
        })?;
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Returns the hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability tokens advertised by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: Vec<(String, Option<String>)>,
}

impl Capabilities {
    /// Parses a space separated capability list (`name` or `name=value`).
    pub fn parse(s: &str) -> Self {
        let entries = s
            .split_whitespace()
            .map(|token| match token.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (token.to_string(), None),
            })
            .collect();
        Self { entries }
    }

    /// Returns true if the capability was advertised.
    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Returns the value of the first `name=value` entry.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .find_map(|(_, v)| v.as_deref())
    }

    /// Returns every value advertised for `name` (e.g. several `symref`s).
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .filter_map(|(_, v)| v.as_deref())
    }

    /// Returns true if nothing was advertised.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The server's ref listing.
#[derive(Debug, Clone, Default)]
pub struct RefAdvertisement {
    refs: Vec<(String, ObjectId)>,
    capabilities: Capabilities,
    head_target: Option<String>,
}

impl RefAdvertisement {
    /// Parses a complete advertisement from a packet sequence.
    pub fn parse<I>(packets: I) -> Result<Self>
    where
        I: IntoIterator<Item = PktLine>,
    {
        let mut parser = AdvertisementParser::new();
        for pkt in packets {
            if parser.push(pkt)? {
                break;
            }
        }
        parser.finish()
    }

    /// Parses a complete advertisement from raw pkt-line bytes.
    pub fn parse_bytes(data: &[u8]) -> Result<Self> {
        let mut parser = AdvertisementParser::new();
        for pkt in PktLines::new(data) {
            if parser.push(pkt?)? {
                break;
            }
        }
        parser.finish()
    }

    /// Looks up a ref by full name.
    pub fn get(&self, name: &str) -> Option<&ObjectId> {
        self.refs.iter().find(|(n, _)| n == name).map(|(_, id)| id)
    }

    /// Iterates refs in advertisement order.
    pub fn refs(&self) -> impl Iterator<Item = (&str, &ObjectId)> {
        self.refs.iter().map(|(n, id)| (n.as_str(), id))
    }

    /// Number of advertised refs.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns true if no refs were advertised.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Server capabilities from the first ref line.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Target of the symbolic `HEAD`, if the server announced one.
    pub fn head_target(&self) -> Option<&str> {
        self.head_target.as_deref()
    }

    /// Picks the ref a clone would check out.
    ///
    /// Order: symbolic HEAD target, advertised `HEAD`, `refs/heads/main`,
    /// `refs/heads/master`, then the first branch.
    pub fn default_ref(&self) -> Result<(&str, &ObjectId)> {
        if let Some(target) = self.head_target() {
            if let Some(id) = self.get(target) {
                return Ok((target, id));
            }
        }

        for name in ["HEAD", "refs/heads/main", "refs/heads/master"] {
            if let Some(id) = self.get(name) {
                return Ok((name, id));
            }
        }

        self.refs
            .iter()
            .find(|(n, _)| n.starts_with("refs/heads/"))
            .map(|(n, id)| (n.as_str(), id))
            .ok_or(GitError::NoUsableRef)
    }

    fn insert(&mut self, name: &str, id: ObjectId) {
        if name == CAPABILITIES_PLACEHOLDER || name.ends_with(PEELED_SUFFIX) {
            return;
        }
        if self.get(name).is_none() {
            self.refs.push((name.to_string(), id));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Nothing seen yet; a service announcement or version line may follow.
    Start,
    /// Service announcement seen, its flush is pending.
    ServiceFlush,
    /// After the service flush, before the first ref.
    AwaitingRefs,
    /// First ref seen.
    Refs,
    /// Terminating flush seen.
    Done,
}

/// Incremental advertisement parser.
///
/// Packets are pushed one at a time; [`push`](Self::push) returns `true`
/// once the terminating flush has been consumed so callers reading from a
/// live channel know to stop.
#[derive(Debug)]
pub struct AdvertisementParser {
    state: ParseState,
    adv: RefAdvertisement,
}

impl AdvertisementParser {
    /// Creates a parser.
    pub fn new() -> Self {
        Self {
            state: ParseState::Start,
            adv: RefAdvertisement::default(),
        }
    }

    /// Returns true once the advertisement is complete.
    pub fn is_done(&self) -> bool {
        self.state == ParseState::Done
    }

    /// Consumes one packet.
    pub fn push(&mut self, pkt: PktLine) -> Result<bool> {
        let data = match (self.state, pkt) {
            (ParseState::Done, _) => {
                return Err(GitError::InvalidAdvertisement(
                    "data after terminating flush".to_string(),
                ))
            }
            (_, PktLine::Delimiter) => {
                return Err(GitError::InvalidAdvertisement(
                    "unexpected delimiter packet".to_string(),
                ))
            }
            (ParseState::ServiceFlush, PktLine::Flush) => {
                self.state = ParseState::AwaitingRefs;
                return Ok(false);
            }
            (ParseState::ServiceFlush, PktLine::Data(_)) => {
                return Err(GitError::InvalidAdvertisement(
                    "service announcement not followed by flush".to_string(),
                ))
            }
            (_, PktLine::Flush) => {
                self.state = ParseState::Done;
                return Ok(true);
            }
            (_, PktLine::Data(data)) => data,
        };

        let line = std::str::from_utf8(&data)
            .map_err(|_| GitError::InvalidAdvertisement("line is not UTF-8".to_string()))?
            .trim_end_matches('\n');

        match self.state {
            ParseState::Start if line.starts_with("# service=") => {
                self.state = ParseState::ServiceFlush;
            }
            ParseState::Start | ParseState::AwaitingRefs if line == "version 1" => {}
            ParseState::Start | ParseState::AwaitingRefs if line.starts_with("version ") => {
                return Err(GitError::InvalidAdvertisement(format!(
                    "unsupported protocol {line:?}"
                )));
            }
            ParseState::Start | ParseState::AwaitingRefs => {
                let (ref_part, caps) = match line.split_once('\0') {
                    Some((r, c)) => (r, Some(c)),
                    None => (line, None),
                };
                if let Some(caps) = caps {
                    self.set_capabilities(caps);
                }
                self.push_ref(ref_part)?;
                self.state = ParseState::Refs;
            }
            ParseState::Refs => {
                // Only the first line may carry capabilities.
                let ref_part = line.split('\0').next().unwrap_or(line);
                self.push_ref(ref_part)?;
            }
            ParseState::ServiceFlush | ParseState::Done => unreachable!("handled above"),
        }

        Ok(false)
    }

    /// Returns the parsed advertisement; fails if the terminating flush was
    /// never seen.
    pub fn finish(self) -> Result<RefAdvertisement> {
        if self.is_done() {
            Ok(self.adv)
        } else {
            Err(GitError::InvalidAdvertisement(
                "advertisement ended before terminating flush".to_string(),
            ))
        }
    }

    fn set_capabilities(&mut self, caps: &str) {
        let capabilities = Capabilities::parse(caps);
        self.adv.head_target = capabilities
            .values("symref")
            .find_map(|v| v.strip_prefix("HEAD:"))
            .map(str::to_string);
        self.adv.capabilities = capabilities;
    }

    fn push_ref(&mut self, ref_part: &str) -> Result<()> {
        let (id, name) = ref_part.split_once(' ').ok_or_else(|| {
            GitError::InvalidAdvertisement(format!("missing separator in {ref_part:?}"))
        })?;
        if name.is_empty() {
            return Err(GitError::InvalidAdvertisement(format!(
                "missing ref name in {ref_part:?}"
            )));
        }
        let id = ObjectId::from_hex(id)?;
        self.adv.insert(name, id);
        Ok(())
    }
}

impl Default for AdvertisementParser {
    fn default() -> Self {
        Self::new()
    }
}
