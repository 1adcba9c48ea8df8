use serde::Serialize;

use crate::model::{AnswerValue, QuestionView, UserProgress};
use crate::states::quiz_state::{QuizResult, QuizSnapshot};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "question", rename_all = "camelCase")]
    Question {
        index: usize,
        total: usize,
        question: QuestionView,
        #[serde(skip_serializing_if = "Option::is_none")]
        answered: Option<AnswerValue>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_secs: Option<u64>,
    },

    #[serde(rename = "answer_recorded")]
    AnswerRecorded { index: usize },

    #[serde(rename = "finished")]
    Finished {
        result: QuizResult,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<UserProgress>,
    },

    #[serde(rename = "snapshot")]
    Snapshot { snapshot: QuizSnapshot },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}
