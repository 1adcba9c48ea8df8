use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::auth::hash_token;
use crate::enums::client_message::ClientMessage;
use crate::enums::server_event::ServerEvent;
use crate::quiz::{DifficultySpec, SelectionSpec, select};
use crate::states::app_state::AppState;
use crate::states::quiz_state::{QuizError, QuizSession};

const MAX_QUIZ_QUESTIONS: usize = 100;

/// Per-socket state: at most one quiz at a time.
#[derive(Debug, Default)]
pub struct ConnectionState {
    quiz: Option<QuizSession>,
    user_id: Option<i64>,
    recorded: bool,
}

pub fn handle_client_message(
    msg: ClientMessage,
    state: &AppState,
    conn: &mut ConnectionState,
    now: DateTime<Utc>,
) -> Vec<ServerEvent> {
    match msg {
        ClientMessage::Start {
            subject,
            count,
            difficulty,
            mode,
            tag,
            time_limit_secs,
            token,
        } => {
            let user_id = match resolve_user(state, token.as_deref(), now) {
                Ok(user_id) => user_id,
                Err(event) => return vec![event],
            };
            if count == 0 || count > MAX_QUIZ_QUESTIONS {
                return vec![ServerEvent::error(format!(
                    "count must be between 1 and {MAX_QUIZ_QUESTIONS}"
                ))];
            }
            let pool = match state.store.questions_for_subject(&subject) {
                Ok(pool) => pool,
                Err(e) => {
                    error!(error = %e, subject = %subject, "failed to load question pool");
                    return vec![ServerEvent::error("could not load questions")];
                }
            };
            let spec = SelectionSpec {
                count,
                difficulty: DifficultySpec::parse(difficulty.as_deref().unwrap_or("")),
                mode: mode.unwrap_or_default(),
                tag,
            };
            let picked = select(&pool, &spec, &mut rand::thread_rng());
            match QuizSession::new(subject.clone(), picked, time_limit_secs, now) {
                Ok(quiz) => {
                    info!(subject = %subject, total = quiz.len(), ?user_id, "quiz started");
                    conn.user_id = user_id;
                    conn.recorded = false;
                    let event = question_event(&quiz, now);
                    conn.quiz = Some(quiz);
                    vec![event]
                }
                Err(QuizError::Empty) => vec![ServerEvent::error(format!(
                    "no questions match for subject {subject}"
                ))],
                Err(e) => vec![ServerEvent::error(e.to_string())],
            }
        }

        ClientMessage::Answer { value } => {
            let Some(quiz) = conn.quiz.as_mut() else {
                return vec![no_quiz()];
            };
            match quiz.answer(value, now) {
                Ok(()) => vec![ServerEvent::AnswerRecorded {
                    index: quiz.current_index(),
                }],
                Err(QuizError::TimeUp) => {
                    let mut events = vec![ServerEvent::error(QuizError::TimeUp.to_string())];
                    events.extend(finish(state, conn, now));
                    events
                }
                Err(e) => vec![ServerEvent::error(e.to_string())],
            }
        }

        ClientMessage::Next => navigate(conn, now, |quiz| {
            quiz.next();
            Ok(())
        }),

        ClientMessage::Prev => navigate(conn, now, |quiz| {
            quiz.prev();
            Ok(())
        }),

        ClientMessage::Goto { index } => navigate(conn, now, |quiz| quiz.go_to(index)),

        ClientMessage::Finish => {
            if conn.quiz.is_none() {
                return vec![no_quiz()];
            }
            finish(state, conn, now)
        }

        ClientMessage::Review => {
            let Some(quiz) = conn.quiz.as_ref() else {
                return vec![no_quiz()];
            };
            if !quiz.is_finished() {
                return vec![ServerEvent::error("finish the quiz before reviewing it")];
            }
            match quiz.review(now) {
                Some(review) => {
                    let event = question_event(&review, now);
                    conn.quiz = Some(review);
                    conn.recorded = false;
                    vec![event]
                }
                None => vec![ServerEvent::error("no mistakes to review")],
            }
        }

        ClientMessage::Snapshot => match conn.quiz.as_ref() {
            Some(quiz) => vec![ServerEvent::Snapshot {
                snapshot: quiz.snapshot(),
            }],
            None => vec![no_quiz()],
        },

        ClientMessage::Resume { snapshot, token } => {
            let user_id = match resolve_user(state, token.as_deref(), now) {
                Ok(user_id) => user_id,
                Err(event) => return vec![event],
            };
            match QuizSession::restore(*snapshot) {
                Ok(quiz) => {
                    debug!(subject = quiz.subject(), "quiz resumed");
                    conn.user_id = user_id;
                    conn.recorded = quiz.is_finished();
                    let event = match quiz.result() {
                        Some(result) => ServerEvent::Finished {
                            result: result.clone(),
                            progress: None,
                        },
                        None => question_event(&quiz, now),
                    };
                    conn.quiz = Some(quiz);
                    let mut events = vec![event];
                    if conn.quiz.as_ref().is_some_and(|q| q.is_expired(now) && !q.is_finished()) {
                        events = finish(state, conn, now);
                    }
                    events
                }
                Err(e) => vec![ServerEvent::error(e.to_string())],
            }
        }
    }
}

/// Finishes an expired quiz. Driven by the socket's one-second ticker.
pub fn tick(state: &AppState, conn: &mut ConnectionState, now: DateTime<Utc>) -> Vec<ServerEvent> {
    let expired = conn
        .quiz
        .as_ref()
        .is_some_and(|quiz| !quiz.is_finished() && quiz.is_expired(now));
    if expired {
        debug!("quiz time limit reached");
        finish(state, conn, now)
    } else {
        Vec::new()
    }
}

fn finish(state: &AppState, conn: &mut ConnectionState, now: DateTime<Utc>) -> Vec<ServerEvent> {
    let Some(quiz) = conn.quiz.as_mut() else {
        return vec![no_quiz()];
    };
    let result = quiz.finish(now).clone();
    let mut progress = None;
    if !conn.recorded
        && let Some(user_id) = conn.user_id
    {
        match state
            .store
            .record_quiz_result(user_id, &result, quiz.questions(), now)
        {
            Ok(saved) => progress = Some(saved),
            Err(e) => error!(error = %e, user_id, "failed to record quiz result"),
        }
    }
    conn.recorded = true;
    info!(
        subject = %result.subject,
        correct = result.correct,
        total = result.total,
        timed_out = result.timed_out,
        "quiz finished"
    );
    vec![ServerEvent::Finished { result, progress }]
}

fn navigate(
    conn: &mut ConnectionState,
    now: DateTime<Utc>,
    step: impl FnOnce(&mut QuizSession) -> Result<(), QuizError>,
) -> Vec<ServerEvent> {
    let Some(quiz) = conn.quiz.as_mut() else {
        return vec![no_quiz()];
    };
    match step(quiz) {
        Ok(()) => vec![question_event(quiz, now)],
        Err(e) => vec![ServerEvent::error(e.to_string())],
    }
}

fn question_event(quiz: &QuizSession, now: DateTime<Utc>) -> ServerEvent {
    let index = quiz.current_index();
    ServerEvent::Question {
        index,
        total: quiz.len(),
        question: quiz.current().view(),
        answered: quiz.answer_at(index).cloned(),
        remaining_secs: quiz.remaining(now),
    }
}

fn no_quiz() -> ServerEvent {
    ServerEvent::error("no quiz in progress")
}

/// A missing token means an anonymous quiz; a bad one is refused.
fn resolve_user(
    state: &AppState,
    token: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<i64>, ServerEvent> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    match state.store.session_user(&hash_token(token), now) {
        Ok(Some(user)) => Ok(Some(user.id)),
        Ok(None) => Err(ServerEvent::error("session is invalid or expired")),
        Err(e) => {
            error!(error = %e, "session lookup failed");
            Err(ServerEvent::error("could not verify session"))
        }
    }
}
