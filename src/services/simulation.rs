// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Simulation entries
//!
//! The terminal entry of every chain. Never touches the network and always
//! succeeds; the chain tags its output as simulated.

use async_trait::async_trait;

use crate::error::Result;
use crate::fallback::{ChainService, ModalityOutput, ModalityRequest, Payload};
use crate::llm::providers::SimulationBackend;
use crate::registry::Modality;

const SAMPLE_RATE: u32 = 24_000;
const TONE_SECONDS: f32 = 1.5;
const BASE_FREQ_HZ: f32 = 220.0;

/// Always-succeeding stand-in for any modality
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulationService;

impl SimulationService {
    pub fn new() -> Self {
        Self
    }
}

/// Mono 16-bit PCM WAV: a decaying tone with a few harmonics
pub fn tone_wav() -> Vec<u8> {
    let samples = (SAMPLE_RATE as f32 * TONE_SECONDS) as u32;
    let data_len = samples * 2;
    let mut wav = Vec::with_capacity(44 + data_len as usize);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());

    for n in 0..samples {
        let t = n as f32 / SAMPLE_RATE as f32;
        let mut value = 0.0f32;
        for harmonic in 1..=4 {
            let h = harmonic as f32;
            value += (0.4 / h.powf(0.8)) * (2.0 * std::f32::consts::PI * BASE_FREQ_HZ * h * t).sin();
        }
        value *= (-t / (TONE_SECONDS * 0.4)).exp();
        let sample = (value.clamp(-0.9, 0.9) * i16::MAX as f32) as i16;
        wav.extend_from_slice(&sample.to_le_bytes());
    }
    wav
}

fn escape_xml(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&apos;".to_string(),
            c => c.to_string(),
        })
        .collect()
}

/// Placeholder image naming the prompt
pub fn placeholder_svg(prompt: &str) -> String {
    let caption: String = prompt.chars().take(60).collect();
    format!(
        concat!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"512\" height=\"512\" viewBox=\"0 0 512 512\">",
            "<rect width=\"512\" height=\"512\" fill=\"#e5e7eb\"/>",
            "<text x=\"256\" y=\"240\" font-family=\"sans-serif\" font-size=\"20\" text-anchor=\"middle\" fill=\"#374151\">Simulated image</text>",
            "<text x=\"256\" y=\"280\" font-family=\"sans-serif\" font-size=\"14\" text-anchor=\"middle\" fill=\"#6b7280\">{}</text>",
            "</svg>"
        ),
        escape_xml(&caption)
    )
}

#[async_trait]
impl ChainService for SimulationService {
    fn service_id(&self) -> &str {
        "simulation"
    }

    fn availability(&self, _request: &ModalityRequest) -> std::result::Result<(), String> {
        Ok(())
    }

    fn is_simulation(&self) -> bool {
        true
    }

    async fn invoke(&self, request: &ModalityRequest) -> Result<ModalityOutput> {
        let payload = match request.modality {
            Modality::Chat | Modality::Transcription => {
                Payload::Text(SimulationBackend::reply_for(&request.prompt))
            }
            Modality::Speech => Payload::Binary {
                mime_type: "audio/wav".to_string(),
                data: tone_wav(),
            },
            Modality::Image => Payload::Binary {
                mime_type: "image/svg+xml".to_string(),
                data: placeholder_svg(&request.prompt.user).into_bytes(),
            },
            Modality::Video => Payload::Text(format!(
                "[Simulated video] A short clip of: {}",
                request.prompt.user.trim()
            )),
        };
        Ok(ModalityOutput::new(payload)
            .with_metadata("notice", "approximate result; no provider was available")
            .simulated())
    }
}
