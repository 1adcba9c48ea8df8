//! WebAuthn-shaped passkey ceremonies. Challenges are issued and checked
//! against `clientDataJSON`; attestation and assertion signatures are not
//! verified.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{ChallengeKind, User};

const CHALLENGE_BYTES: usize = 32;
const CEREMONY_TIMEOUT_MS: u64 = 60_000;
const ES256: i32 = -7;
const RS256: i32 = -257;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasskeyError {
    #[error("clientDataJSON is not valid base64")]
    Encoding,
    #[error("clientDataJSON is not valid json: {0}")]
    Json(String),
    #[error("expected a {expected} ceremony, got {got}")]
    WrongType { expected: &'static str, got: String },
    #[error("challenge does not match")]
    ChallengeMismatch,
}

pub fn generate_challenge<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; CHALLENGE_BYTES];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn ceremony_type(kind: ChallengeKind) -> &'static str {
    match kind {
        ChallengeKind::Registration => "webauthn.create",
        ChallengeKind::Authentication => "webauthn.get",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelyingParty {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredParam {
    pub alg: i32,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl CredentialDescriptor {
    fn public_key(id: String) -> Self {
        Self {
            id,
            kind: "public-key",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub authenticator_attachment: &'static str,
    pub user_verification: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationOptions {
    pub challenge: String,
    pub rp: RelyingParty,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<CredParam>,
    pub authenticator_selection: AuthenticatorSelection,
    pub timeout: u64,
    pub attestation: &'static str,
    pub exclude_credentials: Vec<CredentialDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    pub challenge: String,
    pub timeout: u64,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: &'static str,
}

pub fn creation_options(
    rp: RelyingParty,
    user: &User,
    challenge: String,
    existing: Vec<String>,
) -> CreationOptions {
    CreationOptions {
        challenge,
        rp,
        user: UserEntity {
            id: URL_SAFE_NO_PAD.encode(user.id.to_string()),
            name: user.username.clone(),
            display_name: user.display_name.clone(),
        },
        pub_key_cred_params: [ES256, RS256]
            .into_iter()
            .map(|alg| CredParam {
                alg,
                kind: "public-key",
            })
            .collect(),
        authenticator_selection: AuthenticatorSelection {
            authenticator_attachment: "platform",
            user_verification: "preferred",
        },
        timeout: CEREMONY_TIMEOUT_MS,
        attestation: "none",
        exclude_credentials: existing
            .into_iter()
            .map(CredentialDescriptor::public_key)
            .collect(),
    }
}

pub fn request_options(rp_id: &str, challenge: String, credentials: Vec<String>) -> RequestOptions {
    RequestOptions {
        challenge,
        timeout: CEREMONY_TIMEOUT_MS,
        rp_id: rp_id.to_string(),
        allow_credentials: credentials
            .into_iter()
            .map(CredentialDescriptor::public_key)
            .collect(),
        user_verification: "preferred",
    }
}

/// The browser's `PublicKeyCredential`, as JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredential {
    pub id: String,
    #[serde(default)]
    pub raw_id: Option<String>,
    pub response: CredentialResponse,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(default)]
    pub attestation_object: Option<String>,
    #[serde(default)]
    pub authenticator_data: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
    #[serde(default)]
    pub origin: Option<String>,
}

/// Accepts base64url and standard base64, padded or not.
pub fn decode_client_data(encoded: &str) -> Result<ClientData, PasskeyError> {
    let bytes = [URL_SAFE_NO_PAD, URL_SAFE, STANDARD, STANDARD_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(encoded.trim()).ok())
        .ok_or(PasskeyError::Encoding)?;
    serde_json::from_slice(&bytes).map_err(|e| PasskeyError::Json(e.to_string()))
}

/// Checks the ceremony type and that the signed challenge is the one issued.
pub fn verify_client_data(
    credential: &PublicKeyCredential,
    kind: ChallengeKind,
    expected_challenge: &str,
) -> Result<ClientData, PasskeyError> {
    let client_data = decode_client_data(&credential.response.client_data_json)?;
    let expected = ceremony_type(kind);
    if client_data.kind != expected {
        return Err(PasskeyError::WrongType {
            expected,
            got: client_data.kind,
        });
    }
    if client_data.challenge != expected_challenge {
        return Err(PasskeyError::ChallengeMismatch);
    }
    Ok(client_data)
}
