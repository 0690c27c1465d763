//! Session identity parsing and verbatim auth replay.
//!
//! A descriptor is backed by exactly one of two forms: a complete
//! `42["auth",{…}]` string captured from a browser session, or discrete
//! fields supplied by the caller. Whichever form backed it is what goes
//! over the wire on every (re)connect, byte for byte, so re-auth can
//! never drift from the first auth.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{PocketOptionError, Result};

const AUTH_PREFIX: &str = r#"42["auth","#;
const AUTH_SUFFIX: &str = "]";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthPayload {
    session: String,
    #[serde(rename = "isDemo")]
    is_demo: u8,
    uid: u64,
    platform: u32,
    #[serde(rename = "isFastHistory", default)]
    is_fast_history: bool,
}

/// Immutable parsed authentication identity.
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    session: String,
    is_demo: bool,
    uid: u64,
    platform: u32,
    is_fast_history: bool,
    /// Original complete auth string, kept only when parsed from one.
    complete: Option<String>,
}

impl SessionDescriptor {
    /// Parse a complete `42["auth",{…}]` string.
    pub fn parse(raw: &str) -> Result<Self> {
        let inner = raw
            .strip_prefix(AUTH_PREFIX)
            .and_then(|s| s.strip_suffix(AUTH_SUFFIX))
            .ok_or_else(|| {
                PocketOptionError::InvalidParameter(
                    "auth string must match 42[\"auth\",{…}]".to_string(),
                )
            })?;

        let payload: AuthPayload = serde_json::from_str(inner)?;

        Ok(Self {
            session: payload.session,
            is_demo: payload.is_demo != 0,
            uid: payload.uid,
            platform: payload.platform,
            is_fast_history: payload.is_fast_history,
            complete: Some(raw.to_string()),
        })
    }

    /// Build from discrete fields; the auth frame is synthesized on demand.
    pub fn from_fields(
        session: impl Into<String>,
        is_demo: bool,
        uid: u64,
        platform: u32,
        is_fast_history: bool,
    ) -> Self {
        Self {
            session: session.into(),
            is_demo,
            uid,
            platform,
            is_fast_history,
            complete: None,
        }
    }

    /// Accept either a complete auth string or a raw session token.
    pub fn from_ssid(ssid: &str, is_demo: bool, uid: u64, platform: u32) -> Self {
        match Self::parse(ssid) {
            Ok(descriptor) => descriptor,
            Err(_) => Self::from_fields(ssid, is_demo, uid, platform, true),
        }
    }

    /// The auth frame replayed on every (re)connect. Verbatim when the
    /// descriptor was parsed from a complete string.
    pub fn auth_message(&self) -> String {
        if let Some(complete) = &self.complete {
            return complete.clone();
        }
        let payload = json!({
            "session": self.session,
            "isDemo": if self.is_demo { 1 } else { 0 },
            "uid": self.uid,
            "platform": self.platform,
            "isFastHistory": self.is_fast_history,
        });
        format!("{AUTH_PREFIX}{payload}{AUTH_SUFFIX}")
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn is_demo(&self) -> bool {
        self.is_demo
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn platform(&self) -> u32 {
        self.platform
    }

    pub fn is_fast_history(&self) -> bool {
        self.is_fast_history
    }
}
