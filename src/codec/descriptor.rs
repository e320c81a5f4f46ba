//! Descriptor parsing
//!
//! Turns a descriptor such as `video/mp4; codecs=avc1.42E01E, mp4a.40.2`
//! into the container and codec choices an encoder needs.

use crate::error::CodecError;

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    WebM,
}

impl Container {
    /// ffmpeg muxer name
    pub fn muxer(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::WebM => "webm",
        }
    }
}

/// Codec named by a `codecs=` token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Aac,
    Vp8,
    Vp9,
    Opus,
}

impl Codec {
    fn from_token(token: &str) -> Option<Self> {
        let family = token.split('.').next().unwrap_or_default().to_ascii_lowercase();
        match family.as_str() {
            "avc1" | "avc3" => Some(Codec::H264),
            "mp4a" => Some(Codec::Aac),
            "vp8" => Some(Codec::Vp8),
            "vp9" | "vp09" => Some(Codec::Vp9),
            "opus" => Some(Codec::Opus),
            _ => None,
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(self, Codec::Aac | Codec::Opus)
    }

    /// ffmpeg encoders able to produce this codec, preferred first
    pub fn encoders(self) -> &'static [&'static str] {
        match self {
            Codec::H264 => &["libx264", "h264_v4l2m2m", "h264"],
            Codec::Aac => &["aac", "libfdk_aac"],
            Codec::Vp8 => &["libvpx"],
            Codec::Vp9 => &["libvpx-vp9"],
            Codec::Opus => &["libopus", "opus"],
        }
    }

    fn allowed_in(self, container: Container) -> bool {
        match container {
            Container::Mp4 => matches!(self, Codec::H264 | Codec::Aac | Codec::Opus | Codec::Vp9),
            Container::WebM => matches!(self, Codec::Vp8 | Codec::Vp9 | Codec::Opus),
        }
    }
}

/// A parsed, validated descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub container: Container,
    pub codecs: Vec<Codec>,
}

impl MediaDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, CodecError> {
        let malformed = || CodecError::MalformedDescriptor(descriptor.to_string());

        let (mime, params) = match descriptor.split_once(';') {
            Some((mime, params)) => (mime.trim(), Some(params.trim())),
            None => (descriptor.trim(), None),
        };

        let container = match mime.to_ascii_lowercase().as_str() {
            "video/mp4" => Container::Mp4,
            "video/webm" => Container::WebM,
            _ => return Err(malformed()),
        };

        let mut codecs = Vec::new();
        if let Some(params) = params.filter(|p| !p.is_empty()) {
            // Single `codecs` parameter whose value is a comma list
            let (name, value) = params.split_once('=').ok_or_else(malformed)?;
            if !name.trim().eq_ignore_ascii_case("codecs") {
                return Err(malformed());
            }

            for token in value.trim().trim_matches('"').split(',') {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                let codec = Codec::from_token(token).ok_or_else(malformed)?;
                if !codec.allowed_in(container) {
                    return Err(malformed());
                }
                codecs.push(codec);
            }
        }

        Ok(Self { container, codecs })
    }

    pub fn video_codec(&self) -> Option<Codec> {
        self.codecs.iter().copied().find(|c| !c.is_audio())
    }

    pub fn audio_codec(&self) -> Option<Codec> {
        self.codecs.iter().copied().find(|c| c.is_audio())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::format::DEFAULT_CANDIDATES;

    #[test]
    fn test_parse_mp4_descriptor() {
        let parsed = MediaDescriptor::parse(DEFAULT_CANDIDATES[0]).unwrap();
        assert_eq!(parsed.container, Container::Mp4);
        assert_eq!(parsed.video_codec(), Some(Codec::H264));
        assert_eq!(parsed.audio_codec(), Some(Codec::Aac));
    }

    #[test]
    fn test_parse_webm_descriptor() {
        let parsed = MediaDescriptor::parse("video/webm;codecs=vp9, opus").unwrap();
        assert_eq!(parsed.container, Container::WebM);
        assert_eq!(parsed.codecs, vec![Codec::Vp9, Codec::Opus]);
    }

    #[test]
    fn test_bare_mime_has_no_codecs() {
        let parsed = MediaDescriptor::parse("video/webm").unwrap();
        assert!(parsed.codecs.is_empty());
    }

    #[test]
    fn test_misspelled_parameter_rejected() {
        assert!(MediaDescriptor::parse(DEFAULT_CANDIDATES[2]).is_err());
    }

    #[test]
    fn test_codec_container_mismatch_rejected() {
        assert!(MediaDescriptor::parse("video/webm;codecs=avc1.42E01E").is_err());
        assert!(MediaDescriptor::parse("audio/ogg;codecs=opus").is_err());
    }
}
