use serde::Deserialize;

use crate::model::AnswerValue;
use crate::quiz::SampleMode;
use crate::states::quiz_state::QuizSnapshot;

fn default_count() -> usize {
    10
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "start", rename_all = "camelCase")]
    Start {
        subject: String,
        #[serde(default = "default_count")]
        count: usize,
        #[serde(default)]
        difficulty: Option<String>,
        #[serde(default)]
        mode: Option<SampleMode>,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        time_limit_secs: Option<u64>,
        #[serde(default)]
        token: Option<String>,
    },

    #[serde(rename = "answer")]
    Answer { value: AnswerValue },

    #[serde(rename = "next")]
    Next,

    #[serde(rename = "prev")]
    Prev,

    #[serde(rename = "goto")]
    Goto { index: usize },

    #[serde(rename = "finish")]
    Finish,

    /// Retry only the questions missed in the finished quiz.
    #[serde(rename = "review")]
    Review,

    #[serde(rename = "snapshot")]
    Snapshot,

    #[serde(rename = "resume")]
    Resume {
        snapshot: Box<QuizSnapshot>,
        #[serde(default)]
        token: Option<String>,
    },
}
