//! Candidate formats and capability negotiation
//!
//! A session encodes with exactly one format, picked from a
//! preference-ordered candidate list by asking the capture engine
//! whether it can produce each descriptor.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Reference candidate list, most preferred first
pub const DEFAULT_CANDIDATES: [&str; 5] = [
    "video/mp4; codecs=avc1.42E01E, mp4a.40.2",
    "video/mp4; codecs=avc1.64001F, mp4a.40.2",
    "video/mp4; codec=avc1.4D401F, mp4a.40.2",
    "video/webm;codecs=vp8, opus",
    "video/webm;codecs=vp9, opus",
];

/// One entry of the preference list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFormat {
    /// Fully-qualified descriptor handed to the encoder
    pub descriptor: String,
    /// Short content-type label announced to the remote endpoint
    pub label: String,
}

impl CandidateFormat {
    pub fn new(descriptor: impl Into<String>) -> Self {
        let descriptor = descriptor.into();
        let label = content_type_label(&descriptor);
        Self { descriptor, label }
    }

    /// Build the candidate list from raw descriptors, keeping order
    pub fn list<I, S>(descriptors: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        descriptors.into_iter().map(Self::new).collect()
    }

    /// The reference preference list
    pub fn defaults() -> Vec<Self> {
        Self::list(DEFAULT_CANDIDATES)
    }
}

/// Everything before the first `;`, trimmed
pub fn content_type_label(descriptor: &str) -> String {
    descriptor
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// The format a session was built with. Immutable once chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChosenFormat {
    candidate: CandidateFormat,
    /// Position in the candidate list
    index: usize,
}

impl ChosenFormat {
    pub fn descriptor(&self) -> &str {
        &self.candidate.descriptor
    }

    pub fn label(&self) -> &str {
        &self.candidate.label
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Outcome of probing a single candidate
#[derive(Debug, Clone, Serialize)]
pub struct FormatProbe {
    pub descriptor: String,
    pub supported: bool,
}

/// Record of a negotiation run, kept for diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct NegotiationReport {
    pub probes: Vec<FormatProbe>,
    pub chosen: Option<String>,
}

/// Return the first candidate the predicate accepts.
///
/// Candidates after the first match are never probed.
pub fn negotiate<P>(candidates: &[CandidateFormat], supported: P) -> Result<ChosenFormat, CodecError>
where
    P: FnMut(&str) -> bool,
{
    negotiate_with_report(candidates, supported).0
}

/// Same as [`negotiate`], also returning what was probed
pub fn negotiate_with_report<P>(
    candidates: &[CandidateFormat],
    mut supported: P,
) -> (Result<ChosenFormat, CodecError>, NegotiationReport)
where
    P: FnMut(&str) -> bool,
{
    let mut report = NegotiationReport::default();

    for (index, candidate) in candidates.iter().enumerate() {
        let ok = supported(&candidate.descriptor);
        report.probes.push(FormatProbe {
            descriptor: candidate.descriptor.clone(),
            supported: ok,
        });

        if ok {
            tracing::info!(descriptor = %candidate.descriptor, label = %candidate.label, "format negotiated");
            report.chosen = Some(candidate.descriptor.clone());
            let chosen = ChosenFormat {
                candidate: candidate.clone(),
                index,
            };
            return (Ok(chosen), report);
        }

        tracing::debug!(descriptor = %candidate.descriptor, "format not encodable");
    }

    (
        Err(CodecError::NoSupportedFormat {
            tried: candidates.len(),
        }),
        report,
    )
}
