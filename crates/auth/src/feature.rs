use serde::{Deserialize, Serialize};

use crate::PlanTier;

/// A gated product capability.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Text agents: rewriting, outlines, SEO.
    AiWriter,
    ImageGeneration,
    VideoRender,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::AiWriter, Feature::ImageGeneration, Feature::VideoRender];

    /// Lowest plan that unlocks the feature.
    pub fn min_plan(&self) -> PlanTier {
        match self {
            Feature::AiWriter => PlanTier::Free,
            Feature::ImageGeneration => PlanTier::Plus,
            Feature::VideoRender => PlanTier::Pro,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::AiWriter => "ai_writer",
            Feature::ImageGeneration => "image_generation",
            Feature::VideoRender => "video_render",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Feature::ALL.into_iter().find(|f| f.as_str().eq_ignore_ascii_case(s))
    }
}

impl core::fmt::Display for Feature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_catalog_names() {
        for feature in Feature::ALL {
            assert_eq!(Feature::parse(feature.as_str()), Some(feature));
        }
        assert_eq!(Feature::parse(" Video_Render "), Some(Feature::VideoRender));
        assert_eq!(Feature::parse("teleport"), None);
    }
}
