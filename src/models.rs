//! Model catalogue helpers used by the model picker.

use crate::types::ModelInfo;

pub const DEFAULT_MODEL_ID: &str = "meta-llama/llama-3.2-3b-instruct:free";

/// Models that answer with generated images rather than text.
pub const IMAGE_GENERATION_MODELS: &[&str] = &["google/gemma-3-4b-it:free"];

/// Served when the backend's model list cannot be fetched.
pub fn fallback_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo::new(DEFAULT_MODEL_ID, "Meta Llama 3.2 3B (Free)", true),
        ModelInfo::new("qwen/qwen-2.5-7b-instruct:free", "Qwen 2.5 7B (Free)", true),
        ModelInfo::new("google/gemini-flash-1.5", "Google Gemini Flash 1.5", false),
    ]
}

/// Matches on the id stem, so tier suffixes like `:free` don't matter.
pub fn is_image_generation_model(model_id: &str) -> bool {
    !model_id.is_empty()
        && IMAGE_GENERATION_MODELS.iter().any(|id| {
            let stem = id.split(':').next().unwrap_or(id);
            model_id.contains(stem)
        })
}

/// First free model, else the first listed, else the default id.
pub fn pick_default_model(models: &[ModelInfo]) -> String {
    models
        .iter()
        .find(|m| m.free)
        .or_else(|| models.first())
        .map(|m| m.id.clone())
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_generation_model_matches_stem() {
        assert!(is_image_generation_model("google/gemma-3-4b-it:free"));
        assert!(is_image_generation_model("google/gemma-3-4b-it"));
        assert!(!is_image_generation_model("gpt-4"));
        assert!(!is_image_generation_model(""));
    }

    #[test]
    fn test_pick_default_prefers_free() {
        let models = vec![
            ModelInfo::new("gpt-4", "GPT-4", false),
            ModelInfo::new("free-one", "Free", true),
        ];
        assert_eq!(pick_default_model(&models), "free-one");

        let paid = vec![ModelInfo::new("gpt-4", "GPT-4", false)];
        assert_eq!(pick_default_model(&paid), "gpt-4");

        assert_eq!(pick_default_model(&[]), DEFAULT_MODEL_ID);
    }

    #[test]
    fn test_fallback_contains_default() {
        assert!(fallback_models().iter().any(|m| m.id == DEFAULT_MODEL_ID));
    }
}
