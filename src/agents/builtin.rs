// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Built-in agent definitions
//!
//! One definition per [`AgentType`]: a short description and the system
//! prompt the prompted executor runs the request under.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::analyzer::AgentType;

/// Definition of an agent type
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub agent_type: AgentType,
    /// Short description
    pub description: &'static str,
    /// Sampling temperature override for this agent
    pub temperature: Option<f32>,
    pub system_prompt: &'static str,
}

static BUILTIN_AGENTS: OnceLock<HashMap<AgentType, AgentDefinition>> = OnceLock::new();

/// Get the built-in agent definitions
pub fn builtin_agents() -> &'static HashMap<AgentType, AgentDefinition> {
    BUILTIN_AGENTS.get_or_init(|| {
        let mut agents = HashMap::new();

        agents.insert(
            AgentType::General,
            AgentDefinition {
                agent_type: AgentType::General,
                description: "General conversation",
                temperature: None,
                system_prompt: "You are a helpful assistant. Answer clearly and concisely.",
            },
        );

        agents.insert(
            AgentType::CodeAssistant,
            AgentDefinition {
                agent_type: AgentType::CodeAssistant,
                description: "Writing, explaining and debugging code",
                temperature: Some(0.2),
                system_prompt: r#"
You are a CODE ASSISTANT. Your job is to write, explain and fix code.

GOALS:
- Identify the language and the actual problem before answering
- Give complete, working code in fenced blocks
- Explain the root cause of bugs, not just the fix
- Mention edge cases and how to test the change
"#,
            },
        );

        agents.insert(
            AgentType::FileProcessor,
            AgentDefinition {
                agent_type: AgentType::FileProcessor,
                description: "Extracting and summarizing attached files",
                temperature: Some(0.3),
                system_prompt: r#"
You are a FILE PROCESSOR. The user has attached one or more files.

GOALS:
- Work only from the attached content and the user's question
- Extract, summarize or convert exactly what was asked
- Say so plainly when the attachment does not contain the answer
"#,
            },
        );

        agents.insert(
            AgentType::DataAnalyzer,
            AgentDefinition {
                agent_type: AgentType::DataAnalyzer,
                description: "Statistics and data interpretation",
                temperature: Some(0.2),
                system_prompt: r#"
You are a DATA ANALYZER.

GOALS:
- Restate what the data contains before drawing conclusions
- Show the calculations behind every number you report
- Separate observations from interpretation
- Flag small samples and missing values
"#,
            },
        );

        agents.insert(
            AgentType::CreativeWriter,
            AgentDefinition {
                agent_type: AgentType::CreativeWriter,
                description: "Stories, poems and other creative writing",
                temperature: Some(0.9),
                system_prompt: r#"
You are a CREATIVE WRITER.

GOALS:
- Match the form, tone and length the user asked for
- Prefer concrete imagery over abstraction
- Deliver the piece itself without preamble
"#,
            },
        );

        agents.insert(
            AgentType::SequentialThinking,
            AgentDefinition {
                agent_type: AgentType::SequentialThinking,
                description: "Multi-step reasoning and planning",
                temperature: Some(0.3),
                system_prompt: r#"
You are a SEQUENTIAL THINKING agent. Work through the problem step by step.

GOALS:
- Break the problem into numbered steps
- Check each step before moving to the next
- End with a short, direct conclusion
"#,
            },
        );

        agents.insert(
            AgentType::ImageGeneration,
            AgentDefinition {
                agent_type: AgentType::ImageGeneration,
                description: "Turning an image request into a generation prompt",
                temperature: Some(0.7),
                system_prompt: r#"
You are an IMAGE PROMPT writer. Rewrite the user's request as one detailed
image-generation prompt: subject, composition, style, lighting and palette.
Reply with the prompt only.
"#,
            },
        );

        agents
    })
}

/// Definition for an agent type. Every type has one.
pub fn agent_definition(agent_type: AgentType) -> &'static AgentDefinition {
    match builtin_agents().get(&agent_type) {
        Some(definition) => definition,
        None => general_definition(),
    }
}

fn general_definition() -> &'static AgentDefinition {
    static GENERAL: AgentDefinition = AgentDefinition {
        agent_type: AgentType::General,
        description: "General conversation",
        temperature: None,
        system_prompt: "You are a helpful assistant. Answer clearly and concisely.",
    };
    &GENERAL
}
