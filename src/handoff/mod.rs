//! Deep-link encoder for launching the analyzer through the OS.
//!
//! Builds a `scheme://action?...` URL that the operating system routes to
//! the locally installed analyzer. The URL is self-sufficient: it carries
//! the session id, the repository path, the callback base URL and all
//! analyzer options, so the analyzer needs no other shared state. The
//! encoder performs no network or process activity; handing the URL to the
//! OS is the Control Surface's job.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::session::model::{GenerationSession, SessionKind};

/// Deep-link action for single-artifact generation.
const ACTION_ANALYZE: &str = "analyze";
/// Deep-link action for multi-artifact (batch) generation.
const ACTION_ANALYZE_BATCH: &str = "analyze-batch";

/// Build the deep-link URL for a registered session.
///
/// For the multi-artifact kind the pre-parsed metadata document travels as
/// one `metadata` parameter, base64url-encoded JSON, because the payload
/// can exceed convenient loose-parameter sizes.
pub fn encode(session: &GenerationSession, scheme: &str, callback_base: &str) -> Result<String> {
    let action = match session.kind {
        SessionKind::SingleArtifact => ACTION_ANALYZE,
        SessionKind::MultiArtifact => ACTION_ANALYZE_BATCH,
    };

    let mut url = format!(
        "{}://{}?sessionId={}&repoPath={}&callback={}",
        scheme,
        action,
        urlencoding::encode(&session.id),
        urlencoding::encode(&session.request_params.repo_path),
        urlencoding::encode(callback_base),
    );

    // BTreeMap keeps option order deterministic across encodes.
    for (key, value) in &session.request_params.options {
        url.push('&');
        url.push_str(&urlencoding::encode(key));
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }

    if let Some(metadata) = &session.request_params.metadata {
        let json = serde_json::to_vec(metadata).context("Failed to serialize handoff metadata")?;
        url.push_str("&metadata=");
        url.push_str(&URL_SAFE_NO_PAD.encode(json));
    }

    Ok(url)
}
