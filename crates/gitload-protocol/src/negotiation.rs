//! Want/done negotiation for upload-pack.
//!
//! Every request is a full clone: wants only, never `have` lines, so the
//! server always answers with a complete pack.

use crate::advertisement::{Capabilities, ObjectId, RefAdvertisement};
use crate::pktline::PktLine;
use crate::{GitError, Result};
use bytes::{Bytes, BytesMut};

/// Agent string sent when the server advertises `agent`.
pub const AGENT: &str = concat!("git-load-tester/", env!("CARGO_PKG_VERSION"));

/// Capabilities the client asks for, in request order, when offered.
const CLIENT_CAPABILITIES: &[&str] = &[
    "multi_ack_detailed",
    "side-band-64k",
    "thin-pack",
    "ofs-delta",
];

/// How the server multiplexes the pack response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideBand {
    /// Raw pack bytes follow the acknowledgement.
    None,
    /// `side-band`: channel-prefixed frames of up to 1000 bytes.
    Basic,
    /// `side-band-64k`: channel-prefixed frames of up to 65520 bytes.
    Large,
}

impl SideBand {
    /// Returns true if response frames carry a channel byte.
    pub fn is_multiplexed(self) -> bool {
        self != Self::None
    }
}

/// A complete upload-pack request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    wants: Vec<ObjectId>,
    capabilities: Vec<String>,
    side_band: SideBand,
}

impl NegotiationRequest {
    /// Builds a request for `wants` against the server's capabilities.
    pub fn new(wants: Vec<ObjectId>, server: &Capabilities) -> Result<Self> {
        Self::with_agent(wants, server, AGENT)
    }

    /// Builds a request with an explicit agent string.
    pub fn with_agent(wants: Vec<ObjectId>, server: &Capabilities, agent: &str) -> Result<Self> {
        let mut unique: Vec<ObjectId> = Vec::with_capacity(wants.len());
        for want in wants {
            if !unique.contains(&want) {
                unique.push(want);
            }
        }
        if unique.is_empty() {
            return Err(GitError::EmptyWants);
        }

        let mut capabilities = Vec::new();
        let mut side_band = SideBand::None;
        for &cap in CLIENT_CAPABILITIES {
            if server.has(cap) {
                capabilities.push(cap.to_string());
                if cap == "side-band-64k" {
                    side_band = SideBand::Large;
                }
            } else if cap == "side-band-64k" && server.has("side-band") {
                capabilities.push("side-band".to_string());
                side_band = SideBand::Basic;
            }
        }
        if server.has("agent") && !agent.is_empty() {
            capabilities.push(format!("agent={agent}"));
        }

        Ok(Self {
            wants: unique,
            capabilities,
            side_band,
        })
    }

    /// Builds the request a clone of the advertisement's default ref sends.
    pub fn for_clone(adv: &RefAdvertisement) -> Result<Self> {
        let (_, id) = adv.default_ref()?;
        Self::new(vec![id.clone()], adv.capabilities())
    }

    /// Wanted object ids, first to last.
    pub fn wants(&self) -> &[ObjectId] {
        &self.wants
    }

    /// Capabilities requested on the first want line.
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Multiplexing mode the response will use.
    pub fn side_band(&self) -> SideBand {
        self.side_band
    }

    /// Encodes the request as pkt-lines: wants, flush, `done`.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        for (i, want) in self.wants.iter().enumerate() {
            let line = if i == 0 && !self.capabilities.is_empty() {
                format!("want {want} {}\n", self.capabilities.join(" "))
            } else {
                format!("want {want}\n")
            };
            PktLine::from_string(&line).encode_to(&mut buf)?;
        }
        PktLine::Flush.encode_to(&mut buf)?;
        PktLine::from_string("done\n").encode_to(&mut buf)?;
        Ok(buf.freeze())
    }
}
