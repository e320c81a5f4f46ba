//! Encode format negotiation
//!
//! Picks the transport codec for a session from a preference-ordered
//! candidate list and parses descriptors for the encoder.

pub mod descriptor;
pub mod format;

pub use descriptor::{Codec, Container, MediaDescriptor};
pub use format::{
    content_type_label, negotiate, negotiate_with_report, CandidateFormat, ChosenFormat,
    NegotiationReport,
};
