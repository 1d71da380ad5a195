use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Sample rate of microphone audio sent to the model.
pub const INPUT_SAMPLE_RATE: u32 = 16000;
/// Sample rate the model streams speech at when the mime type omits it.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

pub const PCM_MIME_PREFIX: &str = "audio/pcm";
pub const JPEG_MIME: &str = "image/jpeg";

/// Mime type of 16 kHz PCM16 input audio.
pub fn input_pcm_mime() -> String {
    format!("{};rate={}", PCM_MIME_PREFIX, INPUT_SAMPLE_RATE)
}

/// Reads the `rate=` parameter of an `audio/pcm` mime type.
///
/// Returns `None` when the mime type is not PCM audio.
pub fn pcm_rate(mime_type: &str) -> Option<u32> {
    let mut params = mime_type.split(';').map(str::trim);
    if !params.next()?.eq_ignore_ascii_case(PCM_MIME_PREFIX) {
        return None;
    }
    let rate = params
        .filter_map(|p| p.strip_prefix("rate="))
        .find_map(|r| r.parse::<u32>().ok());
    Some(rate.unwrap_or(OUTPUT_SAMPLE_RATE))
}

/// Little-endian PCM16 audio with its sample rate and a monotonic sequence number
/// used for playback scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    seq: u64,
    sample_rate: u32,
    data: Vec<u8>,
}

impl AudioChunk {
    pub fn new(seq: u64, sample_rate: u32, data: Vec<u8>) -> Self {
        Self {
            seq,
            sample_rate,
            data,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of 16-bit samples in the chunk.
    pub fn samples(&self) -> usize {
        self.data.len() / 2
    }
}

/// Prebuilt voices of the live model.
#[derive(Debug, Clone, PartialEq)]
pub enum Voice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Custom(String),
}

impl Default for Voice {
    fn default() -> Self {
        Voice::Puck
    }
}

impl Voice {
    pub fn as_str(&self) -> &str {
        match self {
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Aoede => "Aoede",
            Voice::Custom(s) => s,
        }
    }
}

impl Serialize for Voice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Puck" => Voice::Puck,
            "Charon" => Voice::Charon,
            "Kore" => Voice::Kore,
            "Fenrir" => Voice::Fenrir,
            "Aoede" => Voice::Aoede,
            _ => Voice::Custom(s.to_string()),
        })
    }
}

impl<'de> Deserialize<'de> for Voice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Voice::from_str(&s).map_err(serde::de::Error::custom)
    }
}
