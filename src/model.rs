use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::quiz::normalizer::{self, NormalizeMode};

/// Question difficulty, 1 (easiest) through 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(level: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&level).then_some(Self(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Difficulty::new(value).ok_or_else(|| format!("difficulty must be 1-5, got {value}"))
    }
}

impl From<Difficulty> for u8 {
    fn from(value: Difficulty) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    Choice,
    Text,
    Math,
}

impl QuestionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::Choice => "choice",
            QuestionKind::Text => "text",
            QuestionKind::Math => "math",
        }
    }
}

/// A chosen option index or a free-form answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Choice(usize),
    Text(String),
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Choice(i) => write!(f, "{i}"),
            AnswerValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionText {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed: Option<String>,
}

impl Explanation {
    pub fn best(&self) -> Option<&str> {
        self.detailed.as_deref().or(self.simple.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Media {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub subject: String,
    #[serde(rename = "type", default)]
    pub kind: QuestionKind,
    pub question: QuestionText,
    #[serde(default)]
    pub options: Vec<String>,
    pub answer: AnswerValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepted_answers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_mode: Option<NormalizeMode>,
    #[serde(default)]
    pub explanation: Explanation,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub media: Media,
}

impl Question {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("question id is required".to_string());
        }
        if self.subject.trim().is_empty() {
            return Err("subject is required".to_string());
        }
        if self.question.text.trim().is_empty() {
            return Err("question text is required".to_string());
        }
        match (self.kind, &self.answer) {
            (QuestionKind::Choice, AnswerValue::Choice(index)) => {
                if self.options.len() < 2 {
                    return Err("choice questions need at least two options".to_string());
                }
                if *index >= self.options.len() {
                    return Err(format!(
                        "answer index {index} is out of range for {} options",
                        self.options.len()
                    ));
                }
            }
            (QuestionKind::Choice, AnswerValue::Text(_)) => {
                return Err("choice questions take an option index as answer".to_string());
            }
            (QuestionKind::Text | QuestionKind::Math, AnswerValue::Text(text)) => {
                if text.trim().is_empty() {
                    return Err("answer text is required".to_string());
                }
            }
            (QuestionKind::Text | QuestionKind::Math, AnswerValue::Choice(_)) => {
                return Err(format!(
                    "{} questions take a text answer",
                    self.kind.as_str()
                ));
            }
        }
        Ok(())
    }

    /// Whether `given` fits this question's answer shape.
    pub fn accepts_shape(&self, given: &AnswerValue) -> Result<(), String> {
        match (self.kind, given) {
            (QuestionKind::Choice, AnswerValue::Choice(index)) if *index < self.options.len() => {
                Ok(())
            }
            (QuestionKind::Choice, AnswerValue::Choice(index)) => Err(format!(
                "option {index} does not exist ({} options)",
                self.options.len()
            )),
            (QuestionKind::Choice, AnswerValue::Text(_)) => {
                Err("expected an option index".to_string())
            }
            (_, AnswerValue::Text(_)) => Ok(()),
            (_, AnswerValue::Choice(_)) => Err("expected a text answer".to_string()),
        }
    }

    pub fn is_correct(&self, given: &AnswerValue) -> bool {
        match (self.kind, &self.answer, given) {
            (QuestionKind::Choice, AnswerValue::Choice(expected), AnswerValue::Choice(got)) => {
                expected == got
            }
            (QuestionKind::Text, AnswerValue::Text(expected), AnswerValue::Text(got)) => {
                let got = got.trim();
                std::iter::once(expected)
                    .chain(self.accepted_answers.iter())
                    .any(|candidate| candidate.trim().eq_ignore_ascii_case(got))
            }
            (QuestionKind::Math, AnswerValue::Text(expected), AnswerValue::Text(got)) => {
                let forms: Vec<&str> = std::iter::once(expected.as_str())
                    .chain(self.accepted_answers.iter().map(String::as_str))
                    .collect();
                normalizer::answers_match(got, &forms, self.answer_mode.unwrap_or_default())
            }
            _ => false,
        }
    }

    pub fn view(&self) -> QuestionView {
        QuestionView {
            id: self.id.clone(),
            subject: self.subject.clone(),
            kind: self.kind,
            question: self.question.clone(),
            options: self.options.clone(),
            answer_mode: self.answer_mode,
            difficulty: self.difficulty,
            tags: self.tags.clone(),
            media: self.media.clone(),
        }
    }
}

/// What a quiz taker sees before grading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: String,
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub question: QuestionText,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_mode: Option<NormalizeMode>,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub media: Media,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPatch {
    pub subject: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<QuestionKind>,
    pub question: Option<QuestionText>,
    pub options: Option<Vec<String>>,
    pub answer: Option<AnswerValue>,
    pub accepted_answers: Option<Vec<String>>,
    pub answer_mode: Option<NormalizeMode>,
    pub explanation: Option<Explanation>,
    pub difficulty: Option<Difficulty>,
    pub tags: Option<Vec<String>>,
    pub media: Option<Media>,
}

impl QuestionPatch {
    pub fn apply(self, question: &mut Question) {
        if let Some(subject) = self.subject {
            question.subject = subject;
        }
        if let Some(kind) = self.kind {
            question.kind = kind;
        }
        if let Some(text) = self.question {
            question.question = text;
        }
        if let Some(options) = self.options {
            question.options = options;
        }
        if let Some(answer) = self.answer {
            question.answer = answer;
        }
        if let Some(accepted) = self.accepted_answers {
            question.accepted_answers = accepted;
        }
        if let Some(mode) = self.answer_mode {
            question.answer_mode = Some(mode);
        }
        if let Some(explanation) = self.explanation {
            question.explanation = explanation;
        }
        if let Some(difficulty) = self.difficulty {
            question.difficulty = difficulty;
        }
        if let Some(tags) = self.tags {
            question.tags = tags;
        }
        if let Some(media) = self.media {
            question.media = media;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub subject: String,
    pub total: u64,
    pub correct: u64,
    pub sessions: u64,
    pub best_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl UserProgress {
    pub fn accuracy(&self) -> f64 {
        percentage(self.correct, self.total)
    }
}

/// `part / whole` in percent, rounded to two decimals.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}
