// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! User requests
//!
//! A [`Request`] is built once from user input and never mutated after it is
//! handed to the dispatcher.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Declared media kind of an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Text,
    Image,
    Audio,
    Video,
    Pdf,
    Spreadsheet,
    Binary,
}

impl MediaKind {
    /// Guess the media kind from a file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "md" | "rs" | "py" | "js" | "ts" | "json" | "toml" | "yaml" | "yml"
            | "html" | "css" | "go" | "java" | "c" | "cpp" | "h" | "sh" => MediaKind::Text,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg" => MediaKind::Image,
            "wav" | "mp3" | "ogg" | "flac" | "m4a" => MediaKind::Audio,
            "mp4" | "mov" | "webm" | "mkv" => MediaKind::Video,
            "pdf" => MediaKind::Pdf,
            "csv" | "xlsx" | "xls" | "tsv" => MediaKind::Spreadsheet,
            _ => MediaKind::Binary,
        }
    }

    /// Whether the attachment carries something other than plain text
    pub fn is_non_text(&self) -> bool {
        !matches!(self, MediaKind::Text)
    }
}

/// A binary blob attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Original file name
    pub name: String,
    /// Declared media kind
    pub kind: MediaKind,
    /// Raw bytes
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, kind: MediaKind, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind,
            data,
        }
    }

    /// Read an attachment from disk, inferring its media kind
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self::new(name, MediaKind::from_path(path), data))
    }
}

/// A user request submitted to the dispatcher
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Raw text typed by the user
    pub raw_text: String,
    /// Attached files, in the order they were added
    pub attachments: Vec<Attachment>,
    /// Named context references (e.g. `@file`, `@web`)
    pub context_annotations: BTreeSet<String>,
    /// Whether the response will be spoken rather than shown
    pub audio_mode_active: bool,
}

impl Request {
    /// Create a plain text request
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            ..Default::default()
        }
    }

    /// Attach a file
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Add a context annotation
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.context_annotations.insert(annotation.into());
        self
    }

    /// Mark the request as issued while audio output is engaged
    pub fn with_audio_mode(mut self, active: bool) -> Self {
        self.audio_mode_active = active;
        self
    }

    /// Whether any attachment is non-text media
    pub fn has_non_text_attachments(&self) -> bool {
        self.attachments.iter().any(|a| a.kind.is_non_text())
    }
}
