use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AnswerValue, Question, percentage};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuizError {
    #[error("a quiz needs at least one question")]
    Empty,
    #[error("the quiz is already finished")]
    Finished,
    #[error("time is up")]
    TimeUp,
    #[error("question {index} does not exist ({len} questions)")]
    OutOfRange { index: usize, len: usize },
    #[error("{0}")]
    InvalidAnswer(String),
    #[error("snapshot cannot be restored: {0}")]
    BadSnapshot(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question_id: String,
    pub given: Option<AnswerValue>,
    pub expected: AnswerValue,
    pub correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub subject: String,
    pub correct: usize,
    pub total: usize,
    pub answered: usize,
    pub percentage: f64,
    pub elapsed_secs: u64,
    pub timed_out: bool,
    pub outcomes: Vec<QuestionOutcome>,
}

/// One run through a fixed list of questions.
#[derive(Debug, Clone)]
pub struct QuizSession {
    subject: String,
    questions: Vec<Question>,
    current: usize,
    answers: Vec<Option<AnswerValue>>,
    started_at: DateTime<Utc>,
    time_limit_secs: Option<u64>,
    result: Option<QuizResult>,
}

/// Serializable resume state of a [`QuizSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSnapshot {
    pub version: u32,
    pub subject: String,
    pub questions: Vec<Question>,
    pub current_index: usize,
    pub answers: Vec<Option<AnswerValue>>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    #[serde(default)]
    pub result: Option<QuizResult>,
}

impl QuizSession {
    pub fn new(
        subject: impl Into<String>,
        questions: Vec<Question>,
        time_limit_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::Empty);
        }
        let answers = vec![None; questions.len()];
        Ok(Self {
            subject: subject.into(),
            questions,
            current: 0,
            answers,
            started_at: now,
            time_limit_secs: time_limit_secs.filter(|secs| *secs > 0),
            result: None,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &Question {
        &self.questions[self.current]
    }

    pub fn answer_at(&self, index: usize) -> Option<&AnswerValue> {
        self.answers.get(index).and_then(Option::as_ref)
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&QuizResult> {
        self.result.as_ref()
    }

    fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.started_at).num_seconds().max(0) as u64
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        self.time_limit_secs
            .map(|limit| limit.saturating_sub(self.elapsed_secs(now)))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.time_limit_secs
            .is_some_and(|limit| self.elapsed_secs(now) >= limit)
    }

    /// Records `value` for the current question, replacing an earlier answer.
    pub fn answer(&mut self, value: AnswerValue, now: DateTime<Utc>) -> Result<(), QuizError> {
        if self.is_finished() {
            return Err(QuizError::Finished);
        }
        if self.is_expired(now) {
            self.finish(now);
            return Err(QuizError::TimeUp);
        }
        self.current()
            .accepts_shape(&value)
            .map_err(QuizError::InvalidAnswer)?;
        self.answers[self.current] = Some(value);
        Ok(())
    }

    pub fn next(&mut self) -> bool {
        if self.current + 1 < self.questions.len() {
            self.current += 1;
            true
        } else {
            false
        }
    }

    pub fn prev(&mut self) -> bool {
        if self.current > 0 {
            self.current -= 1;
            true
        } else {
            false
        }
    }

    pub fn go_to(&mut self, index: usize) -> Result<(), QuizError> {
        if index >= self.questions.len() {
            return Err(QuizError::OutOfRange {
                index,
                len: self.questions.len(),
            });
        }
        self.current = index;
        Ok(())
    }

    /// Grades the session. Calling it again returns the first result.
    pub fn finish(&mut self, now: DateTime<Utc>) -> &QuizResult {
        let graded = match self.result.take() {
            Some(result) => result,
            None => self.grade(now),
        };
        self.result.insert(graded)
    }

    fn grade(&self, now: DateTime<Utc>) -> QuizResult {
        let outcomes: Vec<QuestionOutcome> = self
            .questions
            .iter()
            .zip(&self.answers)
            .map(|(question, given)| QuestionOutcome {
                question_id: question.id.clone(),
                given: given.clone(),
                expected: question.answer.clone(),
                correct: given.as_ref().is_some_and(|g| question.is_correct(g)),
                explanation: question.explanation.best().map(str::to_string),
            })
            .collect();
        let correct = outcomes.iter().filter(|o| o.correct).count();
        let answered = outcomes.iter().filter(|o| o.given.is_some()).count();
        let timed_out = self.is_expired(now);
        let mut elapsed_secs = self.elapsed_secs(now);
        if let Some(limit) = self.time_limit_secs {
            elapsed_secs = elapsed_secs.min(limit);
        }
        QuizResult {
            subject: self.subject.clone(),
            correct,
            total: self.questions.len(),
            answered,
            percentage: percentage(correct as u64, self.questions.len() as u64),
            elapsed_secs,
            timed_out,
            outcomes,
        }
    }

    /// Ids of the questions that were missed, in quiz order.
    pub fn mistakes(&self) -> Vec<String> {
        self.result
            .iter()
            .flat_map(|r| r.outcomes.iter())
            .filter(|o| !o.correct)
            .map(|o| o.question_id.clone())
            .collect()
    }

    /// A fresh session over the missed questions of a finished one.
    pub fn review(&self, now: DateTime<Utc>) -> Option<QuizSession> {
        let missed = self.mistakes();
        let questions: Vec<Question> = self
            .questions
            .iter()
            .filter(|q| missed.contains(&q.id))
            .cloned()
            .collect();
        QuizSession::new(self.subject.clone(), questions, self.time_limit_secs, now).ok()
    }

    pub fn snapshot(&self) -> QuizSnapshot {
        QuizSnapshot {
            version: SNAPSHOT_VERSION,
            subject: self.subject.clone(),
            questions: self.questions.clone(),
            current_index: self.current,
            answers: self.answers.clone(),
            started_at: self.started_at,
            time_limit_secs: self.time_limit_secs,
            result: self.result.clone(),
        }
    }

    pub fn restore(snapshot: QuizSnapshot) -> Result<Self, QuizError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(QuizError::BadSnapshot(format!(
                "unsupported version {}",
                snapshot.version
            )));
        }
        if snapshot.questions.is_empty() {
            return Err(QuizError::Empty);
        }
        if snapshot.answers.len() != snapshot.questions.len() {
            return Err(QuizError::BadSnapshot(format!(
                "{} answers for {} questions",
                snapshot.answers.len(),
                snapshot.questions.len()
            )));
        }
        if snapshot.current_index >= snapshot.questions.len() {
            return Err(QuizError::BadSnapshot(format!(
                "index {} is out of range",
                snapshot.current_index
            )));
        }
        for (question, answer) in snapshot.questions.iter().zip(&snapshot.answers) {
            if let Some(answer) = answer {
                question.accepts_shape(answer).map_err(QuizError::BadSnapshot)?;
            }
        }
        Ok(Self {
            subject: snapshot.subject,
            questions: snapshot.questions,
            current: snapshot.current_index,
            answers: snapshot.answers,
            started_at: snapshot.started_at,
            time_limit_secs: snapshot.time_limit_secs,
            result: snapshot.result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::choice_question;
    use chrono::TimeDelta;

    fn session(n: usize, limit: Option<u64>) -> (QuizSession, DateTime<Utc>) {
        let now = Utc::now();
        let questions = (0..n)
            .map(|i| choice_question(&format!("q{i}"), "toeic", 2))
            .collect();
        (
            QuizSession::new("toeic", questions, limit, now).expect("session"),
            now,
        )
    }

    #[test]
    fn empty_quiz_is_rejected() {
        assert_eq!(
            QuizSession::new("toeic", Vec::new(), None, Utc::now()).unwrap_err(),
            QuizError::Empty
        );
    }

    #[test]
    fn selecting_correct_option_scores_one_of_one() {
        let (mut quiz, now) = session(1, None);
        quiz.answer(AnswerValue::Choice(1), now).expect("answer");
        let result = quiz.finish(now);
        assert_eq!(result.correct, 1);
        assert_eq!(result.total, 1);
        assert_eq!(result.percentage, 100.0);
    }

    #[test]
    fn unanswered_questions_count_as_wrong() {
        let (mut quiz, now) = session(3, None);
        quiz.answer(AnswerValue::Choice(1), now).expect("answer");
        assert!(quiz.next());
        quiz.answer(AnswerValue::Choice(0), now).expect("answer");
        let result = quiz.finish(now).clone();
        assert_eq!(result.correct, 1);
        assert_eq!(result.answered, 2);
        assert_eq!(result.percentage, 33.33);
        assert_eq!(quiz.mistakes(), vec!["q1".to_string(), "q2".to_string()]);
    }

    #[test]
    fn navigation_stays_in_range() {
        let (mut quiz, _) = session(2, None);
        assert!(!quiz.prev());
        assert!(quiz.next());
        assert!(!quiz.next());
        assert_eq!(quiz.current_index(), 1);
        assert_eq!(
            quiz.go_to(2),
            Err(QuizError::OutOfRange { index: 2, len: 2 })
        );
        quiz.go_to(0).expect("go_to");
        assert_eq!(quiz.current().id, "q0");
    }

    #[test]
    fn answers_can_be_changed_until_finish() {
        let (mut quiz, now) = session(1, None);
        quiz.answer(AnswerValue::Choice(0), now).expect("answer");
        quiz.answer(AnswerValue::Choice(1), now).expect("answer");
        assert_eq!(quiz.answer_at(0), Some(&AnswerValue::Choice(1)));
        quiz.finish(now);
        assert_eq!(
            quiz.answer(AnswerValue::Choice(2), now),
            Err(QuizError::Finished)
        );
    }

    #[test]
    fn out_of_range_choice_is_invalid() {
        let (mut quiz, now) = session(1, None);
        assert!(matches!(
            quiz.answer(AnswerValue::Choice(9), now),
            Err(QuizError::InvalidAnswer(_))
        ));
        assert!(matches!(
            quiz.answer(AnswerValue::Text("b".into()), now),
            Err(QuizError::InvalidAnswer(_))
        ));
    }

    #[test]
    fn expired_session_finishes_on_answer() {
        let (mut quiz, start) = session(2, Some(60));
        assert_eq!(quiz.remaining(start + TimeDelta::seconds(20)), Some(40));
        let late = start + TimeDelta::seconds(61);
        assert!(quiz.is_expired(late));
        assert_eq!(
            quiz.answer(AnswerValue::Choice(1), late),
            Err(QuizError::TimeUp)
        );
        let result = quiz.result().expect("finished");
        assert!(result.timed_out);
        assert_eq!(result.elapsed_secs, 60);
        assert_eq!(quiz.remaining(late), Some(0));
    }

    #[test]
    fn finish_is_idempotent() {
        let (mut quiz, now) = session(1, None);
        let first = quiz.finish(now).clone();
        quiz.answer(AnswerValue::Choice(1), now).unwrap_err();
        let second = quiz.finish(now + TimeDelta::seconds(100)).clone();
        assert_eq!(first, second);
    }

    #[test]
    fn review_contains_only_mistakes() {
        let (mut quiz, now) = session(3, None);
        quiz.answer(AnswerValue::Choice(1), now).expect("answer");
        assert!(quiz.review(now).is_none());
        quiz.finish(now);
        let review = quiz.review(now).expect("review");
        assert_eq!(review.len(), 2);
        assert_eq!(review.current().id, "q1");
        assert!(!review.is_finished());
    }

    #[test]
    fn snapshot_restores_progress() {
        let (mut quiz, now) = session(3, Some(300));
        quiz.answer(AnswerValue::Choice(1), now).expect("answer");
        quiz.next();
        let json = serde_json::to_string(&quiz.snapshot()).expect("snapshot json");
        let snapshot: QuizSnapshot = serde_json::from_str(&json).expect("snapshot");
        let restored = QuizSession::restore(snapshot).expect("restore");
        assert_eq!(restored.current_index(), 1);
        assert_eq!(restored.answer_at(0), Some(&AnswerValue::Choice(1)));
        assert_eq!(restored.remaining(now), Some(300));
    }

    #[test]
    fn inconsistent_snapshot_is_rejected() {
        let (quiz, _) = session(2, None);
        let mut snapshot = quiz.snapshot();
        snapshot.answers.pop();
        assert!(matches!(
            QuizSession::restore(snapshot),
            Err(QuizError::BadSnapshot(_))
        ));

        let mut snapshot = quiz.snapshot();
        snapshot.current_index = 5;
        assert!(QuizSession::restore(snapshot).is_err());
    }
}
