use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::response::Response;
use std::convert::Infallible;
use uuid::Uuid;

use crate::helper::cookie_value;
use crate::state::AppState;

/// Identifies the client session that flash entries belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    is_new: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            is_new: true,
        }
    }

    /// Reuses `cookie` when it is a valid session id, otherwise mints one.
    pub fn from_cookie(cookie: Option<&str>) -> Self {
        match cookie.and_then(|c| Uuid::parse_str(c).ok()) {
            Some(id) => Self {
                id: id.to_string(),
                is_new: false,
            },
            None => Self::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Adds the session cookie to `response` when the client does not have
    /// it yet.
    pub fn attach(&self, cookie_name: &str, response: &mut Response) {
        if !self.is_new {
            return;
        }
        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", cookie_name, self.id);
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => log::error!("Invalid session cookie header: {}", e),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Session::from_cookie(cookie_value(
            &parts.headers,
            &state.config.session_cookie,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn test_valid_cookie_is_reused() {
        let id = Uuid::new_v4().to_string();
        let session = Session::from_cookie(Some(&id));
        assert_eq!(session.id(), id);
        assert!(!session.is_new());
    }

    #[test]
    fn test_missing_or_forged_cookie_mints_new_session() {
        let missing = Session::from_cookie(None);
        assert!(missing.is_new());
        assert!(Uuid::parse_str(missing.id()).is_ok());

        let forged = Session::from_cookie(Some("../../etc/passwd"));
        assert!(forged.is_new());
        assert_ne!(forged.id(), "../../etc/passwd");
    }

    #[test]
    fn test_attach_sets_cookie_only_for_new_sessions() {
        let fresh = Session::new();
        let mut response = "ok".into_response();
        fresh.attach("dlform_sid", &mut response);
        let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(header.starts_with(&format!("dlform_sid={}", fresh.id())));
        assert!(header.contains("HttpOnly"));

        let known = Session::from_cookie(Some(fresh.id()));
        let mut response = "ok".into_response();
        known.attach("dlform_sid", &mut response);
        assert!(response.headers().get(SET_COOKIE).is_none());
    }
}
