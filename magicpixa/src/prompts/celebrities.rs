//! Celebrity identity blocks for the selfie feature.
//!
//! Names are matched after normalisation (case, punctuation and whitespace are ignored), first
//! against configured overrides, then the built-in table. Unknown names fall back to a generic
//! description built from the name as the user typed it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CelebrityProfile {
    /// Name as it should appear in the prompt
    pub display_name: String,
    /// Appearance notes used to keep the celebrity recognisable
    pub identity: String,
}

const BUILT_IN: &[(&str, &str, &str)] = &[
    (
        "shah rukh khan",
        "Shah Rukh Khan",
        "Render him as the Indian film actor Shah Rukh Khan: wavy dark hair, warm dimpled smile, light stubble, smart casual outfit.",
    ),
    (
        "virat kohli",
        "Virat Kohli",
        "Render him as the Indian cricketer Virat Kohli: short styled dark hair, full trimmed beard, athletic build, casual sporty clothing.",
    ),
    (
        "priyanka chopra",
        "Priyanka Chopra",
        "Render her as the actor Priyanka Chopra: long dark wavy hair, confident smile, elegant contemporary outfit.",
    ),
    (
        "taylor swift",
        "Taylor Swift",
        "Render her as the singer Taylor Swift: blonde hair with bangs, red lipstick, bright friendly smile, stylish casual outfit.",
    ),
];

/// Lowercase, keep alphanumerics, collapse everything else to single spaces.
pub fn normalise_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct CelebrityTable {
    profiles: HashMap<String, CelebrityProfile>,
}

impl CelebrityTable {
    pub fn new(overrides: &HashMap<String, CelebrityProfile>) -> Self {
        let mut profiles: HashMap<String, CelebrityProfile> = BUILT_IN
            .iter()
            .map(|(key, display_name, identity)| {
                (
                    (*key).to_string(),
                    CelebrityProfile {
                        display_name: (*display_name).to_string(),
                        identity: (*identity).to_string(),
                    },
                )
            })
            .collect();

        for (name, profile) in overrides {
            profiles.insert(normalise_key(name), profile.clone());
        }

        Self { profiles }
    }

    pub fn lookup(&self, name: &str) -> CelebrityProfile {
        self.profiles.get(&normalise_key(name)).cloned().unwrap_or_else(|| {
            let display_name = name.trim().to_string();
            CelebrityProfile {
                identity: format!("Render {display_name} exactly as they are widely recognised in public photos."),
                display_name,
            }
        })
    }
}
