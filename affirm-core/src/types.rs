//! Domain types shared across the pipeline components: the closed
//! enumerations named in the data model (goal, tier, match type, voice,
//! pace) plus the request/response shapes of the HTTP surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Sleep,
    Focus,
    Calm,
    Manifest,
}

impl Goal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Goal::Sleep => "sleep",
            Goal::Focus => "focus",
            Goal::Calm => "calm",
            Goal::Manifest => "manifest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sleep" => Some(Goal::Sleep),
            "focus" => Some(Goal::Focus),
            "calm" => Some(Goal::Calm),
            "manifest" => Some(Goal::Manifest),
            _ => None,
        }
    }

    /// Default binaural category mapped to this goal.
    pub fn default_binaural_category(&self) -> &'static str {
        match self {
            Goal::Sleep => "delta",
            Goal::Focus => "beta",
            Goal::Calm => "alpha",
            Goal::Manifest => "theta",
        }
    }

    pub fn capitalized(&self) -> &'static str {
        match self {
            Goal::Sleep => "Sleep",
            Goal::Focus => "Focus",
            Goal::Calm => "Calm",
            Goal::Manifest => "Manifest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pro" => Tier::Pro,
            _ => Tier::Free,
        }
    }

    /// Voice IDs this tier is allowed to use. `neutral` is always free.
    pub fn allowed_voices(&self) -> &'static [&'static str] {
        match self {
            Tier::Free => &["neutral"],
            Tier::Pro => &["neutral", "premium1", "premium2"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Slow,
    Normal,
}

impl Pace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pace::Slow => "slow",
            Pace::Normal => "normal",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "slow" => Pace::Slow,
            _ => Pace::Normal,
        }
    }

    /// Duration multiplier and TTS-level speed per §4.6.
    pub fn duration_multiplier(&self) -> f64 {
        match self {
            Pace::Slow => 1.3,
            Pace::Normal => 1.0,
        }
    }

    pub fn tts_speed(&self) -> f64 {
        match self {
            Pace::Slow => 0.85,
            Pace::Normal => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Pooled,
    Generated,
    Fallback,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Pooled => "pooled",
            MatchType::Generated => "generated",
            MatchType::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "exact" => MatchType::Exact,
            "pooled" => MatchType::Pooled,
            "generated" => MatchType::Generated,
            _ => MatchType::Fallback,
        }
    }
}

/// Allowed affirmation-spacing presets (§4.7 Silence).
pub const SPACING_PRESETS_SEC: [u32; 7] = [3, 5, 8, 10, 15, 20, 30];
pub const DEFAULT_SPACING_SEC: u32 = 8;

#[derive(Debug, Clone, Serialize)]
pub struct AffirmationSegment {
    pub id: String,
    pub text: String,
    #[serde(rename = "audioUrl")]
    pub audio_url: Option<String>,
    #[serde(rename = "durationMs")]
    pub duration_ms: i64,
    #[serde(rename = "silenceAfterMs")]
    pub silence_after_ms: i64,
    #[serde(rename = "voiceId")]
    pub voice_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Playlist {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "totalDurationMs")]
    pub total_duration_ms: i64,
    #[serde(rename = "silenceBetweenMs")]
    pub silence_between_ms: i64,
    pub affirmations: Vec<AffirmationSegment>,
    #[serde(rename = "binauralCategory", skip_serializing_if = "Option::is_none")]
    pub binaural_category: Option<String>,
    #[serde(rename = "binauralHz", skip_serializing_if = "Option::is_none")]
    pub binaural_hz: Option<f64>,
    #[serde(rename = "backgroundNoise", skip_serializing_if = "Option::is_none")]
    pub background_noise: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub title: String,
    pub affirmations: Vec<String>,
    pub goal: String,
    #[serde(rename = "voiceId")]
    pub voice_id: String,
    pub pace: String,
    pub noise: String,
    #[serde(rename = "lengthSec")]
    pub length_sec: i64,
    #[serde(rename = "binauralCategory", skip_serializing_if = "Option::is_none")]
    pub binaural_category: Option<String>,
    #[serde(rename = "binauralHz", skip_serializing_if = "Option::is_none")]
    pub binaural_hz: Option<f64>,
}
