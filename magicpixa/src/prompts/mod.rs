//! Feature catalogue and prompt templates.
//!
//! Every feature is a pure mapping from typed parameters to an instruction string for the
//! model. Templates live in `templates/` and are rendered with minijinja; celebrity-specific
//! wording comes from the lookup table in [`celebrities`].

pub mod celebrities;

use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::PromptsConfig;
pub use celebrities::{CelebrityProfile, CelebrityTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Enhance,
    Colorize,
    TimeTravel,
    AgeShift,
    CelebritySelfie,
    RoomRestyle,
    Caption,
}

/// What a feature returns to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Image,
    Text,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Enhance,
        Feature::Colorize,
        Feature::TimeTravel,
        Feature::AgeShift,
        Feature::CelebritySelfie,
        Feature::RoomRestyle,
        Feature::Caption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Enhance => "enhance",
            Feature::Colorize => "colorize",
            Feature::TimeTravel => "time_travel",
            Feature::AgeShift => "age_shift",
            Feature::CelebritySelfie => "celebrity_selfie",
            Feature::RoomRestyle => "room_restyle",
            Feature::Caption => "caption",
        }
    }

    /// Human readable label, stored on artifacts as the processing type.
    pub fn label(&self) -> &'static str {
        match self {
            Feature::Enhance => "Photo Enhancement",
            Feature::Colorize => "Colorization",
            Feature::TimeTravel => "Time Travel",
            Feature::AgeShift => "Age Shift",
            Feature::CelebritySelfie => "Celebrity Selfie",
            Feature::RoomRestyle => "Room Restyle",
            Feature::Caption => "Caption",
        }
    }

    pub fn output(&self) -> OutputKind {
        match self {
            Feature::Caption => OutputKind::Text,
            _ => OutputKind::Image,
        }
    }

    pub fn default_cost(&self) -> i64 {
        match self {
            Feature::Enhance | Feature::Caption => 1,
            Feature::CelebritySelfie => 3,
            Feature::Colorize | Feature::TimeTravel | Feature::AgeShift | Feature::RoomRestyle => 2,
        }
    }

    pub fn default_retries(&self) -> u32 {
        match self {
            Feature::Caption => 0,
            Feature::Enhance | Feature::Colorize | Feature::RoomRestyle => 1,
            Feature::TimeTravel | Feature::AgeShift | Feature::CelebritySelfie => 2,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| PromptError::Invalid(format!("Unknown feature '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Subtle,
    #[default]
    Balanced,
    Strong,
}

impl Intensity {
    fn as_str(&self) -> &'static str {
        match self {
            Intensity::Subtle => "subtle",
            Intensity::Balanced => "balanced",
            Intensity::Strong => "strong",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaptionTone {
    #[default]
    Casual,
    Witty,
    Poetic,
    Professional,
}

impl CaptionTone {
    fn as_str(&self) -> &'static str {
        match self {
            CaptionTone::Casual => "casual",
            CaptionTone::Witty => "witty",
            CaptionTone::Poetic => "poetic",
            CaptionTone::Professional => "professional",
        }
    }
}

/// Feature selection plus its parameters, tagged by `feature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "feature", rename_all = "snake_case", deny_unknown_fields)]
pub enum FeatureRequest {
    Enhance {
        #[serde(default)]
        intensity: Intensity,
    },
    Colorize {
        #[serde(default)]
        intensity: Intensity,
        #[serde(default)]
        era_hint: Option<String>,
    },
    TimeTravel {
        era: String,
    },
    AgeShift {
        /// Years to add (positive) or remove (negative)
        age_gap: i32,
    },
    CelebritySelfie {
        celebrity: String,
        location: String,
    },
    RoomRestyle {
        room_type: String,
        style: String,
    },
    Caption {
        #[serde(default)]
        tone: CaptionTone,
    },
}

#[derive(Debug, Error)]
pub enum PromptError {
    /// The parameters were rejected; the message is safe to show to the user
    #[error("{0}")]
    Invalid(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),
}

fn check_text(field: &str, value: &str, min: usize, max: usize) -> Result<(), PromptError> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len < min || len > max {
        return Err(PromptError::Invalid(format!("{field} must be between {min} and {max} characters")));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(PromptError::Invalid(format!("{field} must not contain control characters")));
    }
    Ok(())
}

impl FeatureRequest {
    pub fn feature(&self) -> Feature {
        match self {
            FeatureRequest::Enhance { .. } => Feature::Enhance,
            FeatureRequest::Colorize { .. } => Feature::Colorize,
            FeatureRequest::TimeTravel { .. } => Feature::TimeTravel,
            FeatureRequest::AgeShift { .. } => Feature::AgeShift,
            FeatureRequest::CelebritySelfie { .. } => Feature::CelebritySelfie,
            FeatureRequest::RoomRestyle { .. } => Feature::RoomRestyle,
            FeatureRequest::Caption { .. } => Feature::Caption,
        }
    }

    /// Check parameter shapes before anything is charged or sent to the model.
    pub fn validate(&self) -> Result<(), PromptError> {
        match self {
            FeatureRequest::Enhance { .. } | FeatureRequest::Caption { .. } => Ok(()),
            FeatureRequest::Colorize { era_hint, .. } => match era_hint.as_deref() {
                Some(hint) if !hint.trim().is_empty() => check_text("era_hint", hint, 2, 60),
                _ => Ok(()),
            },
            FeatureRequest::TimeTravel { era } => check_text("era", era, 2, 60),
            FeatureRequest::AgeShift { age_gap } => {
                if *age_gap == 0 || !(-80..=80).contains(age_gap) {
                    Err(PromptError::Invalid(
                        "age_gap must be a non-zero number of years between -80 and 80".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            FeatureRequest::CelebritySelfie { celebrity, location } => {
                check_text("celebrity", celebrity, 2, 60)?;
                check_text("location", location, 2, 80)
            }
            FeatureRequest::RoomRestyle { room_type, style } => {
                check_text("room_type", room_type, 2, 40)?;
                check_text("style", style, 2, 40)
            }
        }
    }
}

/// Renders feature requests into model instructions.
pub struct PromptRenderer {
    env: Environment<'static>,
    celebrities: CelebrityTable,
}

impl PromptRenderer {
    pub fn new(config: &PromptsConfig) -> Result<Self, PromptError> {
        let mut env = Environment::new();
        env.add_template("enhance", include_str!("templates/enhance.j2"))?;
        env.add_template("colorize", include_str!("templates/colorize.j2"))?;
        env.add_template("time_travel", include_str!("templates/time_travel.j2"))?;
        env.add_template("age_shift", include_str!("templates/age_shift.j2"))?;
        env.add_template("celebrity_selfie", include_str!("templates/celebrity_selfie.j2"))?;
        env.add_template("room_restyle", include_str!("templates/room_restyle.j2"))?;
        env.add_template("caption", include_str!("templates/caption.j2"))?;

        Ok(Self {
            env,
            celebrities: CelebrityTable::new(&config.celebrity_overrides),
        })
    }

    /// Validate and render the prompt for a request.
    pub fn render(&self, request: &FeatureRequest) -> Result<String, PromptError> {
        request.validate()?;

        let ctx = match request {
            FeatureRequest::Enhance { intensity } => context! { intensity => intensity.as_str() },
            FeatureRequest::Colorize { intensity, era_hint } => context! {
                intensity => intensity.as_str(),
                era_hint => era_hint.as_deref().map(str::trim).filter(|h| !h.is_empty()),
            },
            FeatureRequest::TimeTravel { era } => context! { era => era.trim() },
            FeatureRequest::AgeShift { age_gap } => context! { age_gap => age_gap },
            FeatureRequest::CelebritySelfie { celebrity, location } => context! {
                celebrity => self.celebrities.lookup(celebrity),
                location => location.trim(),
            },
            FeatureRequest::RoomRestyle { room_type, style } => context! {
                room_type => room_type.trim(),
                style => style.trim(),
            },
            FeatureRequest::Caption { tone } => context! { tone => tone.as_str() },
        };

        let rendered = self.env.get_template(request.feature().as_str())?.render(ctx)?;
        Ok(rendered.trim().to_string())
    }
}
