// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Input analysis
//!
//! Classifies a [`Request`] into an agent type, a complexity tier and a
//! confidence score, and decides whether it warrants a specialized agent.
//! Pure and synchronous: no network calls, never fails. Ambiguous input
//! falls back to `general` / `simple` / low confidence.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RouterConfig;
use crate::request::{MediaKind, Request};

/// Specialized handler a request can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    General,
    CodeAssistant,
    FileProcessor,
    DataAnalyzer,
    CreativeWriter,
    SequentialThinking,
    ImageGeneration,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::General => "general",
            AgentType::CodeAssistant => "code_assistant",
            AgentType::FileProcessor => "file_processor",
            AgentType::DataAnalyzer => "data_analyzer",
            AgentType::CreativeWriter => "creative_writer",
            AgentType::SequentialThinking => "sequential_thinking",
            AgentType::ImageGeneration => "image_generation",
        }
    }

    /// Agents whose output is text meant to be read, not heard
    pub fn is_text_only(&self) -> bool {
        matches!(self, AgentType::FileProcessor)
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(AgentType::General),
            "code_assistant" => Ok(AgentType::CodeAssistant),
            "file_processor" => Ok(AgentType::FileProcessor),
            "data_analyzer" => Ok(AgentType::DataAnalyzer),
            "creative_writer" => Ok(AgentType::CreativeWriter),
            "sequential_thinking" => Ok(AgentType::SequentialThinking),
            "image_generation" => Ok(AgentType::ImageGeneration),
            _ => Err(format!("Unknown agent type: {}", s)),
        }
    }
}

/// Complexity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    fn weight(&self) -> f32 {
        match self {
            Complexity::Simple => 0.2,
            Complexity::Moderate => 0.5,
            Complexity::Complex => 1.0,
        }
    }
}

/// Result of analyzing one request. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAnalysis {
    pub suggested_agent: AgentType,
    pub complexity: Complexity,
    /// In [0, 1]
    pub confidence: f32,
    pub needs_router_agent: bool,
    /// Rough token estimate of text plus text attachments
    pub estimated_tokens: u32,
}

/// Policy knobs for the analyzer
#[derive(Debug, Clone)]
pub struct AnalysisHints {
    pub confidence_threshold: f32,
    pub complex_token_threshold: u32,
    pub suppress_text_when_audio_active: bool,
}

impl Default for AnalysisHints {
    fn default() -> Self {
        Self::from(&RouterConfig::default())
    }
}

impl From<&RouterConfig> for AnalysisHints {
    fn from(config: &RouterConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold.clamp(0.0, 1.0),
            complex_token_threshold: config.complex_token_threshold,
            suppress_text_when_audio_active: config.suppress_text_when_audio_active,
        }
    }
}

/// Keyword tables, in tie-break precedence order
static AGENT_KEYWORDS: LazyLock<Vec<(AgentType, Regex)>> = LazyLock::new(|| {
    let table: &[(AgentType, &[&str])] = &[
        (
            AgentType::ImageGeneration,
            &[
                r"generate an? (image|picture|photo)",
                r"create an? (image|picture|illustration)",
                r"draw",
                r"paint",
                r"illustrat(e|ion)",
                r"picture of",
                r"render an?",
                r"logo",
            ],
        ),
        (
            AgentType::CodeAssistant,
            &[
                r"code",
                r"function",
                r"bug",
                r"debug",
                r"compile[rs]?",
                r"refactor",
                r"stack ?trace",
                r"rust",
                r"python",
                r"javascript",
                r"typescript",
                r"sql",
                r"regex",
                r"api",
                r"class",
                r"unit tests?",
                r"error",
            ],
        ),
        (
            AgentType::DataAnalyzer,
            &[
                r"data(set)?",
                r"csv",
                r"statistics?",
                r"chart",
                r"graph",
                r"analy[sz]e",
                r"analysis",
                r"average",
                r"median",
                r"trend",
                r"spreadsheet",
                r"correlation",
            ],
        ),
        (
            AgentType::FileProcessor,
            &[
                r"this (file|document|pdf|attachment)",
                r"attached",
                r"extract",
                r"summari[sz]e",
                r"transcribe",
                r"convert",
            ],
        ),
        (
            AgentType::CreativeWriter,
            &[
                r"story",
                r"poem",
                r"novel",
                r"lyrics",
                r"fiction",
                r"character",
                r"narrative",
                r"screenplay",
                r"haiku",
                r"creative",
            ],
        ),
        (
            AgentType::SequentialThinking,
            &[
                r"step by step",
                r"plan",
                r"break (it )?down",
                r"reason through",
                r"strategy",
                r"roadmap",
                r"think through",
            ],
        ),
    ];

    table
        .iter()
        .filter_map(|(agent, words)| {
            let pattern = format!(r"(?i)\b(?:{})\b", words.join("|"));
            match Regex::new(&pattern) {
                Ok(re) => Some((*agent, re)),
                Err(e) => {
                    tracing::warn!(target: "relay.analyzer", agent = %agent, error = %e, "invalid keyword pattern");
                    None
                }
            }
        })
        .collect()
});

static MULTI_STEP: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(step by step|step-by-step|plan|multi-step|first\b.*\bthen)\b").ok()
});

static CODE_FENCE: &str = "```";

/// Analyze a request. Always returns a result.
pub fn analyze(request: &Request, hints: &AnalysisHints) -> InputAnalysis {
    let text = request.raw_text.as_str();
    let estimated_tokens = estimate_tokens(request);

    let mut scores: Vec<(AgentType, usize)> = AGENT_KEYWORDS
        .iter()
        .map(|(agent, re)| {
            let distinct: BTreeSet<String> = re
                .find_iter(text)
                .map(|m| m.as_str().to_lowercase())
                .collect();
            let mut hits = distinct.len();
            if *agent == AgentType::CodeAssistant && text.contains(CODE_FENCE) {
                hits += 2;
            }
            (*agent, hits)
        })
        .filter(|(_, hits)| *hits > 0)
        .collect();

    let audio_suppresses_text =
        request.audio_mode_active && hints.suppress_text_when_audio_active;
    if audio_suppresses_text {
        scores.retain(|(agent, _)| !agent.is_text_only());
    }

    // Stable: equal hit counts keep table precedence.
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let is_generation_command = scores
        .iter()
        .any(|(agent, _)| *agent == AgentType::ImageGeneration);

    let (mut agent, mut hits) = scores
        .first()
        .copied()
        .unwrap_or((AgentType::General, 0));

    // Media attachments without any routing keyword go to the file processor,
    // unless audio output would hide its text.
    if hits == 0
        && request.has_non_text_attachments()
        && !is_generation_command
        && !audio_suppresses_text
    {
        agent = AgentType::FileProcessor;
        hits = 1;
    }

    let complexity = classify_complexity(request, estimated_tokens, scores.len(), hints);

    let strength = keyword_strength(hits);
    let mut confidence = 0.7 * strength + 0.3 * complexity.weight();
    if agent == AgentType::General {
        confidence = 0.3 * complexity.weight();
    }
    if scores.len() > 1 && scores[0].1 == scores[1].1 {
        // Two agents matched equally well.
        confidence -= 0.15;
    }
    let confidence = confidence.clamp(0.0, 1.0);

    let needs_router_agent =
        agent != AgentType::General && confidence >= hints.confidence_threshold;

    let analysis = InputAnalysis {
        suggested_agent: agent,
        complexity,
        confidence,
        needs_router_agent,
        estimated_tokens,
    };

    tracing::debug!(
        target: "relay.analyzer",
        agent = %analysis.suggested_agent,
        complexity = ?analysis.complexity,
        confidence = analysis.confidence,
        needs_router_agent = analysis.needs_router_agent,
        estimated_tokens,
        "input analyzed"
    );

    analysis
}

/// ~4 characters per token over the text and any text attachments
pub fn estimate_tokens(request: &Request) -> u32 {
    let attachment_chars: usize = request
        .attachments
        .iter()
        .filter(|a| a.kind == MediaKind::Text)
        .map(|a| a.data.len())
        .sum();
    let chars = request.raw_text.chars().count() + attachment_chars;
    (chars as f64 / 4.0).ceil() as u32
}

fn keyword_strength(hits: usize) -> f32 {
    match hits {
        0 => 0.0,
        1 => 0.55,
        2 => 0.75,
        _ => 0.9,
    }
}

fn classify_complexity(
    request: &Request,
    estimated_tokens: u32,
    matched_agents: usize,
    hints: &AnalysisHints,
) -> Complexity {
    let multi_step = MULTI_STEP
        .as_ref()
        .map(|re| re.is_match(&request.raw_text))
        .unwrap_or(false);

    if estimated_tokens > hints.complex_token_threshold || multi_step {
        return Complexity::Complex;
    }

    let questions = request.raw_text.matches('?').count();
    if estimated_tokens > hints.complex_token_threshold / 4
        || matched_agents > 1
        || questions > 1
        || !request.attachments.is_empty()
    {
        return Complexity::Moderate;
    }

    Complexity::Simple
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Attachment;
    use proptest::prelude::*;

    fn hints() -> AnalysisHints {
        AnalysisHints::default()
    }

    #[test]
    fn test_ambiguous_input_defaults_to_general() {
        let analysis = analyze(&Request::new("hello there"), &hints());
        assert_eq!(analysis.suggested_agent, AgentType::General);
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert!(analysis.confidence < 0.2);
        assert!(!analysis.needs_router_agent);
    }

    #[test]
    fn test_empty_input() {
        let analysis = analyze(&Request::new(""), &hints());
        assert_eq!(analysis.suggested_agent, AgentType::General);
        assert_eq!(analysis.estimated_tokens, 0);
        assert!(!analysis.needs_router_agent);
    }

    #[test]
    fn test_code_request_step_by_step_is_complex_and_routed() {
        let request = Request::new(
            "Refactor this Rust function step by step and fix the compile error in the code",
        );
        let analysis = analyze(&request, &hints());
        assert_eq!(analysis.suggested_agent, AgentType::CodeAssistant);
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert!(analysis.confidence >= 0.9);
        assert!(analysis.needs_router_agent);
    }

    #[test]
    fn test_code_fence_boosts_code_assistant() {
        let request = Request::new("why does this panic?\n```\nlet x: u8 = 256;\n```");
        let analysis = analyze(&request, &hints());
        assert_eq!(analysis.suggested_agent, AgentType::CodeAssistant);
    }

    #[test]
    fn test_long_input_is_complex() {
        let request = Request::new("word ".repeat(1000));
        let analysis = analyze(&request, &hints());
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert!(analysis.estimated_tokens > 800);
    }

    #[test]
    fn test_plan_keyword_is_complex() {
        let analysis = analyze(&Request::new("make a plan for my week"), &hints());
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert_eq!(analysis.suggested_agent, AgentType::SequentialThinking);
    }

    #[test]
    fn test_media_attachment_without_keywords_prefers_file_processor() {
        let request = Request::new("what is this?")
            .with_attachment(Attachment::new("scan.pdf", MediaKind::Pdf, vec![0; 16]));
        let analysis = analyze(&request, &hints());
        assert_eq!(analysis.suggested_agent, AgentType::FileProcessor);
        assert_eq!(analysis.complexity, Complexity::Moderate);
    }

    #[test]
    fn test_generation_command_with_attachment_is_not_file_processing() {
        let request = Request::new("draw a watercolor version of this")
            .with_attachment(Attachment::new("cat.png", MediaKind::Image, vec![0; 16]));
        let analysis = analyze(&request, &hints());
        assert_eq!(analysis.suggested_agent, AgentType::ImageGeneration);
    }

    #[test]
    fn test_text_attachment_does_not_trigger_file_processor() {
        let request = Request::new("thoughts?")
            .with_attachment(Attachment::new("notes.txt", MediaKind::Text, b"hi".to_vec()));
        let analysis = analyze(&request, &hints());
        assert_eq!(analysis.suggested_agent, AgentType::General);
    }

    #[test]
    fn test_audio_mode_suppresses_file_processor() {
        let request = Request::new("what is this?")
            .with_attachment(Attachment::new("scan.pdf", MediaKind::Pdf, vec![0; 16]))
            .with_audio_mode(true);
        let analysis = analyze(&request, &hints());
        assert_ne!(analysis.suggested_agent, AgentType::FileProcessor);

        let request = Request::new("summarize this document please").with_audio_mode(true);
        let analysis = analyze(&request, &hints());
        assert_ne!(analysis.suggested_agent, AgentType::FileProcessor);
    }

    #[test]
    fn test_audio_suppression_can_be_disabled() {
        let mut hints = hints();
        hints.suppress_text_when_audio_active = false;
        let request = Request::new("what is this?")
            .with_attachment(Attachment::new("scan.pdf", MediaKind::Pdf, vec![0; 16]))
            .with_audio_mode(true);
        let analysis = analyze(&request, &hints);
        assert_eq!(analysis.suggested_agent, AgentType::FileProcessor);
    }

    #[test]
    fn test_low_confidence_disables_router_agent() {
        let mut hints = hints();
        hints.confidence_threshold = 0.99;
        let analysis = analyze(&Request::new("write a poem about autumn"), &hints);
        assert_eq!(analysis.suggested_agent, AgentType::CreativeWriter);
        assert!(!analysis.needs_router_agent);
    }

    #[test]
    fn test_agent_type_round_trip_str() {
        for agent in [
            AgentType::General,
            AgentType::CodeAssistant,
            AgentType::FileProcessor,
            AgentType::DataAnalyzer,
            AgentType::CreativeWriter,
            AgentType::SequentialThinking,
            AgentType::ImageGeneration,
        ] {
            assert_eq!(agent.as_str().parse::<AgentType>().unwrap(), agent);
        }
    }

    proptest! {
        #[test]
        fn prop_confidence_in_unit_interval(text in ".{0,400}", audio in any::<bool>()) {
            let request = Request::new(text).with_audio_mode(audio);
            let analysis = analyze(&request, &AnalysisHints::default());
            prop_assert!((0.0..=1.0).contains(&analysis.confidence));
        }

        #[test]
        fn prop_router_agent_requires_threshold(text in "[a-z ]{0,200}", threshold in 0.0f32..1.0) {
            let hints = AnalysisHints { confidence_threshold: threshold, ..AnalysisHints::default() };
            let analysis = analyze(&Request::new(text), &hints);
            if analysis.needs_router_agent {
                prop_assert!(analysis.confidence >= threshold);
                prop_assert_ne!(analysis.suggested_agent, AgentType::General);
            }
        }
    }
}
