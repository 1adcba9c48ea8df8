use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, timeout};

use questa_server::media::MemoryObjectStore;
use questa_server::store::Store;
use questa_server::{AppState, Config, build_app};

const ADMIN: &str = "admin-secret";

struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

async fn spawn_app() -> SocketAddr {
    let mut config = Config::ephemeral();
    config.admin_token = Some(ADMIN.to_string());
    config.admin_users = vec!["boss_01".to_string()];
    let store = Store::open_in_memory().expect("store");
    let state = AppState::new(store, Arc::new(MemoryObjectStore::new()), config);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = build_app(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve");
    });
    addr
}

fn dechunk(mut raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let Some(end) = raw.windows(2).position(|w| w == b"\r\n") else {
            break;
        };
        let size_line = String::from_utf8_lossy(&raw[..end]);
        let size = usize::from_str_radix(size_line.split(';').next().unwrap_or("0").trim(), 16)
            .unwrap_or(0);
        raw = &raw[end + 2..];
        if size == 0 || raw.len() < size {
            break;
        }
        out.extend_from_slice(&raw[..size]);
        raw = &raw[(size + 2).min(raw.len())..];
    }
    out
}

async fn send(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
) -> Reply {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let mut head = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Length: {}\r\n",
        body.len()
    );
    if let Some(token) = token {
        head.push_str(&format!("Authorization: Bearer {token}\r\n"));
    }
    if let Some(ct) = content_type {
        head.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await.expect("write head");
    stream.write_all(body).await.expect("write body");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read");
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
        .expect("status line");
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let mut body = raw[split + 4..].to_vec();
    if headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v.contains("chunked"))
    {
        body = dechunk(&body);
    }
    Reply {
        status,
        headers,
        body,
    }
}

async fn get(addr: SocketAddr, path: &str, token: Option<&str>) -> Reply {
    send(addr, "GET", path, token, None, b"").await
}

async fn post(addr: SocketAddr, path: &str, token: Option<&str>, body: Value) -> Reply {
    send_json(addr, "POST", path, token, body).await
}

async fn send_json(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Value,
) -> Reply {
    let bytes = serde_json::to_vec(&body).expect("json body");
    send(addr, method, path, token, Some("application/json"), &bytes).await
}

fn client_data(kind: &str, challenge: &str) -> String {
    URL_SAFE_NO_PAD.encode(
        json!({ "type": kind, "challenge": challenge, "origin": "http://localhost" }).to_string(),
    )
}

async fn register(addr: SocketAddr, user_id: &str, display: &str, inquiry: &str) -> Reply {
    post(
        addr,
        "/api/auth/register",
        None,
        json!({ "userId": user_id, "displayName": display, "inquiryNumber": inquiry }),
    )
    .await
}

/// Registers a user and a passkey, then logs in and returns the session token.
async fn sign_in(addr: SocketAddr, user_id: &str, display: &str, inquiry: &str) -> String {
    assert_eq!(register(addr, user_id, display, inquiry).await.status, 201);

    let begin = post(
        addr,
        "/api/auth/passkey/register/begin",
        None,
        json!({ "userId": user_id }),
    )
    .await;
    assert_eq!(begin.status, 200);
    let challenge = begin.json()["options"]["challenge"]
        .as_str()
        .expect("challenge")
        .to_string();
    let credential_id = format!("cred-{user_id}");
    let complete = post(
        addr,
        "/api/auth/passkey/register/complete",
        None,
        json!({
            "userId": user_id,
            "challenge": challenge,
            "credential": {
                "id": credential_id,
                "rawId": credential_id,
                "response": {
                    "clientDataJSON": client_data("webauthn.create", &challenge),
                    "attestationObject": "o2NmbXRkbm9uZQ",
                },
            },
        }),
    )
    .await;
    assert_eq!(complete.status, 200, "{:?}", complete.json());

    let begin = post(
        addr,
        "/api/auth/passkey/login/begin",
        None,
        json!({ "userId": user_id }),
    )
    .await;
    assert_eq!(begin.status, 200);
    let options = &begin.json()["options"];
    assert_eq!(options["allowCredentials"][0]["id"], credential_id.as_str());
    let challenge = options["challenge"].as_str().expect("challenge").to_string();
    let login = post(
        addr,
        "/api/auth/passkey/login/complete",
        None,
        json!({
            "challenge": challenge,
            "credential": {
                "id": credential_id,
                "response": {
                    "clientDataJSON": client_data("webauthn.get", &challenge),
                    "authenticatorData": "AAAA",
                    "signature": "AAAA",
                },
            },
        }),
    )
    .await;
    assert_eq!(login.status, 200, "{:?}", login.json());
    login.json()["token"].as_str().expect("token").to_string()
}

fn choice(id: &str, difficulty: u8, tag: &str) -> Value {
    json!({
        "id": id,
        "subject": "toeic",
        "type": "choice",
        "question": { "text": format!("question {id}") },
        "options": ["a", "b", "c", "d"],
        "answer": 1,
        "explanation": { "simple": "b is right" },
        "difficulty": difficulty,
        "tags": [tag],
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let addr = spawn_app().await;
    let reply = get(addr, "/api/health", None).await;
    assert_eq!(reply.status, 200);
    let body = reply.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["media"], "memory");
    assert!(reply.header("x-request-id").is_some());
}

#[tokio::test]
async fn unknown_routes_are_json_404s() {
    let addr = spawn_app().await;
    let reply = get(addr, "/api/nothing-here", None).await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.json()["success"], false);
    assert_eq!(reply.json()["code"], "NOT_FOUND");
}

#[tokio::test]
async fn preflight_is_answered_with_cors_headers() {
    let addr = spawn_app().await;
    let reply = send(addr, "OPTIONS", "/api/note/questions", None, None, b"").await;
    assert_eq!(reply.status, 204);
    assert_eq!(reply.header("access-control-allow-origin"), Some("*"));
    assert!(
        reply
            .header("access-control-allow-methods")
            .is_some_and(|m| m.contains("DELETE"))
    );
}

#[tokio::test]
async fn registration_validates_and_rejects_duplicates() {
    let addr = spawn_app().await;
    let created = register(addr, "taro_01", "Taro", "123456").await;
    assert_eq!(created.status, 201);
    assert_eq!(created.json()["user"]["userId"], "taro_01");

    let duplicate = register(addr, "taro_01", "Someone", "654321").await;
    assert_eq!(duplicate.status, 409);
    assert_eq!(duplicate.json()["code"], "CONFLICT");

    let bad = register(addr, "ab", "Short", "111111").await;
    assert_eq!(bad.status, 400);
    let bad = register(addr, "hanako", "Hanako", "12345").await;
    assert_eq!(bad.status, 400);

    let malformed = send(
        addr,
        "POST",
        "/api/auth/register",
        None,
        Some("application/json"),
        b"{not json",
    )
    .await;
    assert_eq!(malformed.status, 400);
    assert_eq!(malformed.json()["success"], false);
}

#[tokio::test]
async fn passkey_login_issues_a_session() {
    let addr = spawn_app().await;
    let token = sign_in(addr, "taro_01", "Taro", "123456").await;

    let me = get(addr, "/api/auth/me", Some(&token)).await;
    assert_eq!(me.status, 200);
    assert_eq!(me.json()["user"]["username"], "taro_01");
    assert_eq!(me.json()["user"]["loginCount"], 1);

    assert_eq!(get(addr, "/api/auth/me", None).await.status, 401);
    assert_eq!(get(addr, "/api/auth/me", Some("bogus")).await.status, 401);

    let logout = post(addr, "/api/auth/logout", Some(&token), json!({})).await;
    assert_eq!(logout.status, 200);
    assert_eq!(get(addr, "/api/auth/me", Some(&token)).await.status, 401);
}

#[tokio::test]
async fn challenges_are_single_use_and_type_checked() {
    let addr = spawn_app().await;
    assert_eq!(register(addr, "taro_01", "Taro", "123456").await.status, 201);
    let begin = post(
        addr,
        "/api/auth/passkey/register/begin",
        None,
        json!({ "userId": "taro_01" }),
    )
    .await;
    let challenge = begin.json()["options"]["challenge"]
        .as_str()
        .expect("challenge")
        .to_string();
    let attempt = |kind: &'static str| {
        json!({
            "userId": "taro_01",
            "challenge": challenge,
            "credential": {
                "id": "cred-1",
                "response": {
                    "clientDataJSON": client_data(kind, &challenge),
                    "attestationObject": "o2NmbXRkbm9uZQ",
                },
            },
        })
    };

    let wrong_type = post(
        addr,
        "/api/auth/passkey/register/complete",
        None,
        attempt("webauthn.get"),
    )
    .await;
    assert_eq!(wrong_type.status, 400);

    // the failed attempt already spent the challenge
    let replay = post(
        addr,
        "/api/auth/passkey/register/complete",
        None,
        attempt("webauthn.create"),
    )
    .await;
    assert_eq!(replay.status, 400);

    let unknown = post(
        addr,
        "/api/auth/passkey/register/begin",
        None,
        json!({ "userId": "nobody" }),
    )
    .await;
    assert_eq!(unknown.status, 404);

    let no_passkey = post(
        addr,
        "/api/auth/passkey/login/begin",
        None,
        json!({ "userId": "taro_01" }),
    )
    .await;
    assert_eq!(no_passkey.status, 404);
}

#[tokio::test]
async fn admin_manages_the_question_bank() {
    let addr = spawn_app().await;

    let anonymous = post(addr, "/api/note/questions", None, choice("q1", 2, "grammar")).await;
    assert_eq!(anonymous.status, 401);

    let created = post(addr, "/api/note/questions", Some(ADMIN), choice("q1", 2, "grammar")).await;
    assert_eq!(created.status, 201, "{:?}", created.json());
    let again = post(addr, "/api/note/questions", Some(ADMIN), choice("q1", 2, "grammar")).await;
    assert_eq!(again.status, 409);

    let mut invalid = choice("q2", 2, "grammar");
    invalid["answer"] = json!(9);
    let rejected = post(addr, "/api/note/questions", Some(ADMIN), invalid).await;
    assert_eq!(rejected.status, 400);

    let fetched = get(addr, "/api/note/questions/q1", None).await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.json()["question"]["options"][1], "b");

    let updated = send_json(
        addr,
        "PUT",
        "/api/note/questions/q1",
        Some(ADMIN),
        json!({ "difficulty": 4, "tags": ["vocabulary"] }),
    )
    .await;
    assert_eq!(updated.status, 200, "{:?}", updated.json());
    assert_eq!(updated.json()["question"]["difficulty"], 4);
    assert_eq!(updated.json()["question"]["id"], "q1");

    let listed = get(addr, "/api/note/questions?subject=toeic&tag=vocabulary", None).await;
    assert_eq!(listed.json()["count"], 1);
    let listed = get(addr, "/api/note/questions?difficulty=1-3", None).await;
    assert_eq!(listed.json()["count"], 0);

    let deleted = send(addr, "DELETE", "/api/note/questions/q1", Some(ADMIN), None, b"").await;
    assert_eq!(deleted.status, 200);
    assert_eq!(get(addr, "/api/note/questions/q1", None).await.status, 404);
    let twice = send(addr, "DELETE", "/api/note/questions/q1", Some(ADMIN), None, b"").await;
    assert_eq!(twice.status, 404);

    let recreated = post(addr, "/api/note/questions", Some(ADMIN), choice("q1", 3, "grammar")).await;
    assert_eq!(recreated.status, 201, "{:?}", recreated.json());
    let fetched = get(addr, "/api/note/questions/q1", None).await;
    assert_eq!(fetched.json()["question"]["difficulty"], 3);
}

#[tokio::test]
async fn admin_sessions_are_checked_against_the_user_flag() {
    let addr = spawn_app().await;
    let boss = sign_in(addr, "boss_01", "Boss", "111111").await;
    let learner = sign_in(addr, "taro_01", "Taro", "222222").await;

    let me = get(addr, "/api/auth/me", Some(&boss)).await;
    assert_eq!(me.json()["user"]["isAdmin"], true);

    let by_boss = post(addr, "/api/note/questions", Some(&boss), choice("q1", 2, "toeic")).await;
    assert_eq!(by_boss.status, 201);
    let by_learner = post(addr, "/api/note/questions", Some(&learner), choice("q2", 2, "toeic")).await;
    assert_eq!(by_learner.status, 403);
    assert_eq!(by_learner.json()["code"], "FORBIDDEN");
}

#[tokio::test]
async fn quiz_selection_hides_answers_from_learners() {
    let addr = spawn_app().await;
    for (id, level) in [("q1", 1), ("q2", 2), ("q3", 3), ("q4", 3)] {
        let reply = post(addr, "/api/note/questions", Some(ADMIN), choice(id, level, "toeic")).await;
        assert_eq!(reply.status, 201);
    }

    let quiz = get(addr, "/api/questions/toeic?count=2", None).await;
    assert_eq!(quiz.status, 200);
    let body = quiz.json();
    assert_eq!(body["count"], 2);
    assert_eq!(body["available"], 4);
    let first = &body["questions"][0];
    assert!(first.get("answer").is_none());
    assert!(first.get("explanation").is_none());

    let hard = get(addr, "/api/questions/toeic?count=10&difficulty=3&mode=balanced", None).await;
    assert_eq!(hard.json()["count"], 2);

    let bad_mode = get(addr, "/api/questions/toeic?mode=shuffled", None).await;
    assert_eq!(bad_mode.status, 400);

    let sneaky = get(addr, "/api/questions/toeic?includeAnswers=true", None).await;
    assert_eq!(sneaky.status, 401);
    let admin = get(addr, "/api/questions/toeic?includeAnswers=true", Some(ADMIN)).await;
    assert_eq!(admin.json()["questions"][0]["answer"], 1);
}

#[tokio::test]
async fn question_sets_publish_and_serve_latest() {
    let addr = spawn_app().await;
    let empty = get(addr, "/api/question-sets/toeic", None).await;
    assert_eq!(empty.status, 200);
    assert_eq!(empty.json()["questions"], json!([]));

    let none = post(addr, "/api/question-sets/toeic", Some(ADMIN), json!({})).await;
    assert_eq!(none.status, 400);

    post(addr, "/api/note/questions", Some(ADMIN), choice("q1", 2, "toeic")).await;
    let published = post(addr, "/api/question-sets/toeic", Some(ADMIN), json!({})).await;
    assert_eq!(published.status, 200, "{:?}", published.json());
    let filename = published.json()["file"]["filename"]
        .as_str()
        .expect("filename")
        .to_string();
    assert!(filename.starts_with("questions/toeic/"));

    let latest = get(addr, "/api/question-sets/toeic", None).await;
    assert_eq!(latest.json()["questions"][0]["id"], "q1");
    assert_eq!(latest.json()["metadata"]["filename"], filename.as_str());

    let raw = get(addr, &format!("/api/media/{filename}"), None).await;
    assert_eq!(raw.status, 200);
    assert_eq!(raw.header("content-type"), Some("application/json"));

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = post(addr, "/api/question-sets/toeic", Some(ADMIN), json!({})).await;
    assert_eq!(second.status, 200);
    let sets = get(addr, "/api/questions/toeic/sets", None).await;
    assert_eq!(sets.status, 200);
    let body = sets.json();
    assert_eq!(body["count"], 2);
    assert_eq!(body["files"][1]["filename"], filename.as_str());
    assert_eq!(body["files"][0]["count"], 1);
    let untouched = get(addr, "/api/questions/math/sets", None).await;
    assert_eq!(untouched.json()["files"], json!([]));
}

#[tokio::test]
async fn subjects_list_live_question_counts() {
    let addr = spawn_app().await;
    let empty = get(addr, "/api/subjects", None).await;
    assert_eq!(empty.status, 200);
    assert_eq!(empty.json()["subjects"], json!([]));

    for id in ["q1", "q2"] {
        post(addr, "/api/note/questions", Some(ADMIN), choice(id, 2, "toeic")).await;
    }
    let mut math = choice("m1", 1, "algebra");
    math["subject"] = json!("math");
    post(addr, "/api/note/questions", Some(ADMIN), math).await;
    send(addr, "DELETE", "/api/note/questions/q2", Some(ADMIN), None, b"").await;

    let listed = get(addr, "/api/subjects", None).await.json();
    assert_eq!(listed["count"], 2);
    assert_eq!(listed["subjects"][0]["subject"], "math");
    assert_eq!(listed["subjects"][1]["subject"], "toeic");
    assert_eq!(listed["subjects"][1]["questionCount"], 1);
}

#[tokio::test]
async fn answers_are_normalized_and_checked() {
    let addr = spawn_app().await;
    let normalized = post(
        addr,
        "/api/answers/normalize",
        None,
        json!({ "answer": "sqrt(2)" }),
    )
    .await;
    assert_eq!(normalized.status, 200);
    assert_eq!(normalized.json()["normalized"], "\\sqrt{2}");
    assert_eq!(normalized.json()["valid"], true);

    let ratio = post(
        addr,
        "/api/answers/check",
        None,
        json!({ "answer": "6:4", "expected": ["3:2"], "mode": "ratio" }),
    )
    .await;
    assert_eq!(ratio.json()["correct"], true);

    post(addr, "/api/note/questions", Some(ADMIN), choice("q1", 2, "toeic")).await;
    let right = post(
        addr,
        "/api/answers/check",
        None,
        json!({ "questionId": "q1", "answer": 1 }),
    )
    .await;
    assert_eq!(right.json()["correct"], true);
    let wrong = post(
        addr,
        "/api/answers/check",
        None,
        json!({ "questionId": "q1", "answer": 0 }),
    )
    .await;
    assert_eq!(wrong.json()["correct"], false);
    let out_of_range = post(
        addr,
        "/api/answers/check",
        None,
        json!({ "questionId": "q1", "answer": 7 }),
    )
    .await;
    assert_eq!(out_of_range.status, 400);

    let nothing = post(addr, "/api/answers/check", None, json!({ "answer": "1" })).await;
    assert_eq!(nothing.status, 400);
}

#[tokio::test]
async fn progress_and_study_history_follow_the_learner() {
    let addr = spawn_app().await;
    let token = sign_in(addr, "taro_01", "Taro", "123456").await;
    let token = Some(token.as_str());

    assert_eq!(get(addr, "/api/note/progress", None).await.status, 401);
    let saved = post(
        addr,
        "/api/note/progress",
        token,
        json!({ "subject": "toeic", "correct": 3, "total": 4, "durationSecs": 60 }),
    )
    .await;
    assert_eq!(saved.status, 200, "{:?}", saved.json());
    assert_eq!(saved.json()["accuracy"], 75.0);
    let bad = post(
        addr,
        "/api/note/progress",
        token,
        json!({ "subject": "toeic", "correct": 5, "total": 4 }),
    )
    .await;
    assert_eq!(bad.status, 400);
    let progress = get(addr, "/api/note/progress", token).await;
    assert_eq!(progress.json()["progress"][0]["total"], 4);

    let started = post(
        addr,
        "/api/study/session/start",
        token,
        json!({ "subject": "toeic", "level": "600" }),
    )
    .await;
    let session_id = started.json()["sessionId"].as_i64().expect("session id");
    let recorded = post(
        addr,
        "/api/study/record",
        token,
        json!({
            "sessionId": session_id,
            "subject": "toeic",
            "level": "600",
            "questionText": "She ___ to work.",
            "userAnswer": "go",
            "correctAnswer": "goes",
            "isCorrect": false,
        }),
    )
    .await;
    assert_eq!(recorded.status, 200, "{:?}", recorded.json());

    let wrong = get(addr, "/api/study/wrong-answers", token).await;
    let entry = &wrong.json()["wrongAnswers"][0];
    assert_eq!(entry["wrongCount"], 1);
    let wrong_id = entry["id"].as_i64().expect("wrong answer id");
    let mastered = post(
        addr,
        "/api/study/wrong-answers/master",
        token,
        json!({ "id": wrong_id }),
    )
    .await;
    assert_eq!(mastered.status, 200);
    let open = get(addr, "/api/study/wrong-answers?unmasteredOnly=true", token).await;
    assert_eq!(open.json()["wrongAnswers"], json!([]));

    let ended = post(
        addr,
        "/api/study/session/end",
        token,
        json!({ "sessionId": session_id, "totalQuestions": 1, "correctQuestions": 0, "durationSeconds": 30 }),
    )
    .await;
    assert_eq!(ended.status, 200);
    let missing = post(
        addr,
        "/api/study/session/end",
        token,
        json!({ "sessionId": 9999, "totalQuestions": 1, "correctQuestions": 0 }),
    )
    .await;
    assert_eq!(missing.status, 404);

    let history = get(addr, "/api/study/history?limit=5", token).await;
    assert!(!history.json()["sessions"].as_array().expect("sessions").is_empty());
    let stats = get(addr, "/api/study/stats", token).await;
    assert_eq!(stats.json()["success"], true);
    assert_eq!(stats.json()["stats"][0]["totalQuestions"], 1);

    let profile = get(addr, "/api/user/profile", token).await;
    assert_eq!(profile.json()["user"]["username"], "taro_01");
    assert_eq!(profile.json()["progress"][0]["subject"], "toeic");
}

#[tokio::test]
async fn oversized_session_values_are_rejected_and_the_server_keeps_working() {
    let addr = spawn_app().await;
    let token = sign_in(addr, "hana_02", "Hana", "654321").await;
    let token = Some(token.as_str());

    let huge = post(
        addr,
        "/api/note/progress",
        token,
        json!({ "subject": "toeic", "correct": 1, "total": 1, "durationSecs": 10_000_000_000_000u64 }),
    )
    .await;
    assert_eq!(huge.status, 400);
    assert_eq!(huge.json()["code"], "BAD_REQUEST");

    let started = post(
        addr,
        "/api/study/session/start",
        token,
        json!({ "subject": "math", "level": "1a" }),
    )
    .await;
    let session_id = started.json()["sessionId"].as_i64().expect("session id");
    let ended = post(
        addr,
        "/api/study/session/end",
        token,
        json!({ "sessionId": session_id, "totalQuestions": 1, "correctQuestions": 1, "durationSeconds": i64::MAX - 1 }),
    )
    .await;
    assert_eq!(ended.status, 400);

    let saved = post(
        addr,
        "/api/note/progress",
        token,
        json!({ "subject": "toeic", "correct": 1, "total": 1, "durationSecs": 30 }),
    )
    .await;
    assert_eq!(saved.status, 200, "{:?}", saved.json());
    let stats = get(addr, "/api/study/stats", token).await;
    assert_eq!(stats.status, 200);
    assert_eq!(stats.json()["totalStudySeconds"], 30);
}

fn multipart(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> (String, Vec<u8>) {
    let boundary = "questa-boundary-7d2f";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"subject\"\r\n\r\ntoeic\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

#[tokio::test]
async fn uploads_are_typed_stored_and_served() {
    let addr = spawn_app().await;
    let clip = b"ID3\x03\x00fake-mp3-bytes";
    let (ct, body) = multipart("audio", "Listening 1.mp3", "audio/mpeg", clip);

    let anonymous = send(addr, "POST", "/api/upload/audio", None, Some(&ct), &body).await;
    assert_eq!(anonymous.status, 401);

    let uploaded = send(addr, "POST", "/api/upload/audio", Some(ADMIN), Some(&ct), &body).await;
    assert_eq!(uploaded.status, 201, "{:?}", uploaded.json());
    let json = uploaded.json();
    let key = json["key"].as_str().expect("key").to_string();
    assert!(key.starts_with("assets/audio/toeic/"));
    assert!(key.ends_with(".mp3"));
    assert_eq!(json["originalName"], "Listening 1.mp3");
    assert_eq!(json["size"], clip.len());

    let served = get(addr, &format!("/api/media/{key}"), None).await;
    assert_eq!(served.status, 200);
    assert_eq!(served.header("content-type"), Some("audio/mpeg"));
    assert_eq!(served.body, clip);

    let listed = get(addr, "/api/media?prefix=assets/audio/", Some(ADMIN)).await;
    assert_eq!(listed.json()["count"], 1);
    assert_eq!(listed.json()["files"][0]["originalName"], "Listening 1.mp3");

    let (ct, body) = multipart("file", "notes.txt", "text/plain", b"hello");
    let refused = send(addr, "POST", "/api/upload", Some(ADMIN), Some(&ct), &body).await;
    assert_eq!(refused.status, 415);

    let (ct, body) = multipart("audio", "cover.png", "image/png", b"\x89PNG");
    let not_audio = send(addr, "POST", "/api/upload/audio", Some(ADMIN), Some(&ct), &body).await;
    assert_eq!(not_audio.status, 415);

    assert_eq!(get(addr, "/api/media/assets/none.mp3", None).await.status, 404);
}

/// Minimal client side of the quiz socket: masked text frames out, JSON
/// events in.
struct QuizSocket {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl QuizSocket {
    async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let head = format!(
            "GET /ws/quiz HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
        );
        stream.write_all(head.as_bytes()).await.expect("handshake");
        let mut socket = Self {
            stream,
            buf: Vec::new(),
        };
        let end = loop {
            if let Some(pos) = socket.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            socket.read_more().await;
        };
        let response = String::from_utf8_lossy(&socket.buf[..end]).to_string();
        assert!(response.starts_with("HTTP/1.1 101"), "{response}");
        socket.buf.drain(..end);
        socket
    }

    async fn read_more(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).await.expect("read");
        assert!(n > 0, "socket closed");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    async fn fill(&mut self, len: usize) {
        while self.buf.len() < len {
            self.read_more().await;
        }
    }

    async fn send_text(&mut self, text: &str) {
        let payload = text.as_bytes();
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        let mut frame = vec![0x81];
        match payload.len() {
            n if n < 126 => frame.push(0x80 | n as u8),
            n if n <= u16::MAX as usize => {
                frame.push(0x80 | 126);
                frame.extend_from_slice(&(n as u16).to_be_bytes());
            }
            n => {
                frame.push(0x80 | 127);
                frame.extend_from_slice(&(n as u64).to_be_bytes());
            }
        }
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        self.stream.write_all(&frame).await.expect("send frame");
    }

    async fn send(&mut self, message: Value) {
        self.send_text(&message.to_string()).await;
    }

    /// Next text frame as JSON, skipping control frames.
    async fn event(&mut self) -> Value {
        timeout(Duration::from_secs(5), async {
            loop {
                self.fill(2).await;
                let opcode = self.buf[0] & 0x0f;
                let (len, offset) = match self.buf[1] & 0x7f {
                    126 => {
                        self.fill(4).await;
                        (u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize, 4)
                    }
                    127 => {
                        self.fill(10).await;
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(&self.buf[2..10]);
                        (u64::from_be_bytes(raw) as usize, 10)
                    }
                    n => (n as usize, 2),
                };
                self.fill(offset + len).await;
                let payload: Vec<u8> = self.buf.drain(..offset + len).skip(offset).collect();
                match opcode {
                    0x1 => return serde_json::from_slice::<Value>(&payload).expect("event json"),
                    0x8 => panic!("server closed the socket"),
                    _ => continue,
                }
            }
        })
        .await
        .expect("event within 5s")
    }
}

#[tokio::test]
async fn quiz_socket_runs_a_graded_quiz() {
    let addr = spawn_app().await;
    for id in ["q1", "q2"] {
        let reply = post(addr, "/api/note/questions", Some(ADMIN), choice(id, 2, "toeic")).await;
        assert_eq!(reply.status, 201);
    }
    let token = sign_in(addr, "taro_01", "Taro", "123456").await;

    let mut socket = QuizSocket::connect(addr).await;
    socket.send_text("{not json").await;
    let error = socket.event().await;
    assert_eq!(error["type"], "error");
    assert!(
        error["message"]
            .as_str()
            .expect("message")
            .starts_with("invalid message")
    );

    socket.send(json!({ "type": "answer", "value": 1 })).await;
    assert_eq!(socket.event().await["message"], "no quiz in progress");

    socket
        .send(json!({ "type": "start", "subject": "toeic", "count": 2, "token": token }))
        .await;
    let first = socket.event().await;
    assert_eq!(first["type"], "question");
    assert_eq!(first["index"], 0);
    assert_eq!(first["total"], 2);
    assert!(first["question"].get("answer").is_none());

    socket.send(json!({ "type": "answer", "value": 1 })).await;
    let recorded = socket.event().await;
    assert_eq!(recorded["type"], "answer_recorded");
    assert_eq!(recorded["index"], 0);

    socket.send(json!({ "type": "next" })).await;
    assert_eq!(socket.event().await["index"], 1);
    socket.send(json!({ "type": "answer", "value": 0 })).await;
    assert_eq!(socket.event().await["type"], "answer_recorded");

    socket.send(json!({ "type": "finish" })).await;
    let finished = socket.event().await;
    assert_eq!(finished["type"], "finished");
    assert_eq!(finished["result"]["total"], 2);
    assert_eq!(finished["result"]["correct"], 1);
    assert_eq!(finished["result"]["timedOut"], false);
    assert_eq!(finished["progress"]["total"], 2);

    let wrong = get(addr, "/api/study/wrong-answers", Some(&token)).await;
    assert_eq!(wrong.json()["wrongAnswers"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn quiz_socket_finishes_when_time_runs_out() {
    let addr = spawn_app().await;
    let reply = post(addr, "/api/note/questions", Some(ADMIN), choice("q1", 2, "toeic")).await;
    assert_eq!(reply.status, 201);

    let mut socket = QuizSocket::connect(addr).await;
    socket
        .send(json!({ "type": "start", "subject": "toeic", "count": 1, "timeLimitSecs": 1 }))
        .await;
    let started = socket.event().await;
    assert_eq!(started["type"], "question");
    assert_eq!(started["remainingSecs"], 1);

    let finished = socket.event().await;
    assert_eq!(finished["type"], "finished");
    assert_eq!(finished["result"]["timedOut"], true);
    assert_eq!(finished["result"]["answered"], 0);
    assert!(finished.get("progress").is_none());
}
