//! Pack stream accounting.
//!
//! The response to a `done` request is an acknowledgement (`NAK`) followed by
//! the pack, either raw or multiplexed over side-band channels. The sink
//! counts pack bytes as they arrive and drops them immediately; memory use is
//! bounded by one frame no matter how large the pack is.

use crate::negotiation::SideBand;
use crate::pktline::{PktLine, PktLineDecoder};
use crate::{GitError, Result};
use std::time::{Duration, Instant};

/// Signature every pack starts with.
const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// Side-band channel carrying pack data.
pub const CHANNEL_PACK: u8 = 1;
/// Side-band channel carrying progress text.
pub const CHANNEL_PROGRESS: u8 = 2;
/// Side-band channel carrying a fatal error message.
pub const CHANNEL_ERROR: u8 = 3;

/// Byte counters for one pack reception.
#[derive(Debug, Clone, Copy)]
pub struct PackStreamStats {
    /// Pack bytes received (channel 1, or the raw stream).
    pub bytes_received: u64,
    /// Progress text bytes received on channel 2.
    pub progress_bytes: u64,
    /// When reception started.
    pub started_at: Instant,
    /// When the stream terminated, if it has.
    pub finished_at: Option<Instant>,
}

impl PackStreamStats {
    fn new() -> Self {
        Self {
            bytes_received: 0,
            progress_bytes: 0,
            started_at: Instant::now(),
            finished_at: None,
        }
    }

    /// Time from start to finish (or until now if still running).
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started_at)
    }
}

/// Whether the sink wants more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// Keep feeding.
    NeedMore,
    /// The terminating flush was seen.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Acknowledgement,
    Multiplexed,
    Raw,
    Finished,
}

/// Incremental consumer for an upload-pack response.
#[derive(Debug)]
pub struct PackSink {
    side_band: SideBand,
    phase: Phase,
    decoder: PktLineDecoder,
    stats: PackStreamStats,
}

impl PackSink {
    /// Creates a sink for a response negotiated with `side_band`.
    pub fn new(side_band: SideBand) -> Self {
        Self {
            side_band,
            phase: Phase::Acknowledgement,
            decoder: PktLineDecoder::new(),
            stats: PackStreamStats::new(),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> &PackStreamStats {
        &self.stats
    }

    /// Pack bytes counted so far.
    pub fn pack_bytes(&self) -> u64 {
        self.stats.bytes_received
    }

    /// Consumes one chunk of the response.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<SinkStatus> {
        match self.phase {
            Phase::Raw => {
                self.stats.bytes_received += chunk.len() as u64;
                Ok(SinkStatus::NeedMore)
            }
            Phase::Finished => Ok(SinkStatus::Finished),
            Phase::Acknowledgement | Phase::Multiplexed => {
                self.decoder.feed(chunk);
                self.drain()
            }
        }
    }

    /// Signals end of stream and returns the final counters.
    pub fn finish(&mut self) -> Result<PackStreamStats> {
        match self.phase {
            Phase::Acknowledgement => {
                return Err(GitError::InvalidPktLine(
                    "response ended before any pack data".to_string(),
                ))
            }
            Phase::Multiplexed => self.decoder.finish()?,
            Phase::Raw | Phase::Finished => {}
        }
        self.phase = Phase::Finished;
        self.stats.finished_at.get_or_insert_with(Instant::now);
        Ok(self.stats)
    }

    fn drain(&mut self) -> Result<SinkStatus> {
        loop {
            if self.phase == Phase::Acknowledgement
                && !self.side_band.is_multiplexed()
                && self.decoder.buffered().starts_with(PACK_SIGNATURE)
            {
                let rest = self.decoder.take_buffered();
                self.stats.bytes_received += rest.len() as u64;
                self.phase = Phase::Raw;
                return Ok(SinkStatus::NeedMore);
            }

            let pkt = match self.decoder.next_pkt()? {
                Some(pkt) => pkt,
                None => return Ok(SinkStatus::NeedMore),
            };

            match (self.phase, pkt) {
                (_, PktLine::Flush) => {
                    self.phase = Phase::Finished;
                    self.stats.finished_at = Some(Instant::now());
                    return Ok(SinkStatus::Finished);
                }
                (_, PktLine::Delimiter) => {
                    return Err(GitError::InvalidPktLine(
                        "unexpected delimiter in pack response".to_string(),
                    ))
                }
                (Phase::Acknowledgement, PktLine::Data(data)) => {
                    if data.starts_with(b"NAK") || data.starts_with(b"ACK ") {
                        tracing::trace!(line = %String::from_utf8_lossy(&data).trim_end(), "acknowledgement");
                    } else if let Some(msg) = data.strip_prefix(b"ERR ") {
                        return Err(GitError::Remote(
                            String::from_utf8_lossy(msg).trim_end().to_string(),
                        ));
                    } else if self.side_band.is_multiplexed() {
                        self.phase = Phase::Multiplexed;
                        self.demux(&data)?;
                    } else {
                        return Err(GitError::InvalidPktLine(format!(
                            "unexpected line before pack: {:?}",
                            String::from_utf8_lossy(&data)
                        )));
                    }
                }
                (_, PktLine::Data(data)) => self.demux(&data)?,
            }
        }
    }

    fn demux(&mut self, frame: &[u8]) -> Result<()> {
        let Some((&channel, payload)) = frame.split_first() else {
            return Ok(());
        };
        match channel {
            CHANNEL_PACK => self.stats.bytes_received += payload.len() as u64,
            CHANNEL_PROGRESS => {
                self.stats.progress_bytes += payload.len() as u64;
                tracing::trace!(progress = %String::from_utf8_lossy(payload).trim_end(), "remote");
            }
            CHANNEL_ERROR => {
                return Err(GitError::Remote(
                    String::from_utf8_lossy(payload).trim_end().to_string(),
                ))
            }
            other => {
                return Err(GitError::InvalidPktLine(format!(
                    "unknown side-band channel {other}"
                )))
            }
        }
        Ok(())
    }
}
