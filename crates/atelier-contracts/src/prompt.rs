use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_MOOD: &str = "unknown";

const STYLES: &[&str] = &[
    "realistic",
    "abstract",
    "impressionist",
    "surreal",
    "minimalist",
    "cartoon",
    "anime",
    "fantasy",
    "sci-fi",
    "vintage",
    "modern",
    "cyberpunk",
    "steampunk",
    "gothic",
    "noir",
    "watercolor",
    "oil painting",
    "sketch",
    "digital art",
    "pop art",
    "conceptual",
    "futuristic",
];

const MOODS: &[&str] = &[
    "happy",
    "sad",
    "mysterious",
    "dark",
    "light",
    "joyful",
    "melancholic",
    "serene",
    "chaotic",
    "peaceful",
    "tense",
    "nostalgic",
    "dreamy",
    "nightmare",
    "fantasy",
    "romantic",
    "scary",
    "horror",
    "whimsical",
    "dramatic",
    "epic",
    "tranquil",
    "energetic",
    "calm",
    "angry",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enhancement {
    pub enhanced_prompt: String,
    pub style_tags: Vec<String>,
    pub mood: String,
}

impl Enhancement {
    /// Tags and mood are derived from `enhanced_prompt`.
    pub fn from_text(enhanced_prompt: impl Into<String>) -> Self {
        let enhanced_prompt = enhanced_prompt.into();
        Self {
            style_tags: extract_style_tags(&enhanced_prompt),
            mood: extract_mood(&enhanced_prompt),
            enhanced_prompt,
        }
    }

    /// Result used when enhancement failed: the prompt unchanged, no tags.
    pub fn unchanged(prompt: &str) -> Self {
        Self {
            enhanced_prompt: prompt.to_string(),
            style_tags: Vec::new(),
            mood: UNKNOWN_MOOD.to_string(),
        }
    }
}

/// Text transform turning a short prompt into a detailed description.
pub trait PromptEnhancer: Send + Sync {
    fn name(&self) -> &str;
    fn enhance(&self, prompt: &str, context: Option<&str>) -> anyhow::Result<Enhancement>;
}

/// Network-free enhancer; keeps the prompt and folds in memory context.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEnhancer;

impl PromptEnhancer for PassthroughEnhancer {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn enhance(&self, prompt: &str, context: Option<&str>) -> anyhow::Result<Enhancement> {
        let prompt = prompt.trim();
        let text = match context.map(str::trim).filter(|value| !value.is_empty()) {
            Some(context) => format!("{prompt}. Inspired by earlier work:\n{context}"),
            None => prompt.to_string(),
        };
        Ok(Enhancement::from_text(text))
    }
}

/// Instruction sent to the language model for one creative request.
pub fn creative_instruction(user_prompt: &str, context: Option<&str>) -> String {
    let context_text = context
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("Consider this context from previous creations: {value}\n\n"))
        .unwrap_or_default();
    format!(
        "You are a creative AI assisting with generating detailed descriptions for visual content.\n\
{context_text}The user wants to create: {user_prompt}\n\n\
Please enhance this prompt with specific details about:\n\
1. Visual details (colors, lighting, composition)\n\
2. Style references\n\
3. Mood and atmosphere\n\n\
Your output should be ONLY the enhanced, detailed description with no explanations or additional text.\n"
    )
}

/// Drops `<think>` blocks, remaining tags and `enhanced prompt:` label lines.
pub fn clean_llm_output(text: &str) -> String {
    static THINK: OnceLock<Option<Regex>> = OnceLock::new();
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    let think = THINK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").ok());
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").ok());

    let mut cleaned = text.to_string();
    if let Some(re) = think {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    if let Some(re) = tag {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned
        .lines()
        .filter(|line| !line.trim_start().to_lowercase().starts_with("enhanced prompt:"))
        .collect::<Vec<&str>>()
        .join("\n")
        .trim()
        .to_string()
}

pub fn extract_style_tags(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    STYLES
        .iter()
        .filter(|style| lowered.contains(*style))
        .map(|style| style.to_string())
        .collect()
}

/// First listed mood mentioned in `text`, or [`UNKNOWN_MOOD`].
pub fn extract_mood(text: &str) -> String {
    let lowered = text.to_lowercase();
    MOODS
        .iter()
        .find(|mood| lowered.contains(*mood))
        .map(|mood| mood.to_string())
        .unwrap_or_else(|| UNKNOWN_MOOD.to_string())
}
