//! The authenticated identity attached to a request once it has passed
//! through the [`crate::pipeline::AuthPipeline`].

use std::collections::HashSet;

/// Which branch of the classification chain produced this principal.
/// Recorded for audit purposes, not used in authorization decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    /// No `Authorization` header at all.
    LocalAdmin,
    /// `awc_system_*` bearer key.
    SystemService,
    /// `awc_*` (non-system) bearer key, resolved via the platform `/auth/me`.
    ApiKeyUser,
    /// Exact-match internal/workflow-runner service key.
    InternalService,
    /// Locally-signed HMAC-SHA256 token (no `kid`).
    LocalToken,
    /// IdP-signed asymmetric token, validated against JWKS.
    IdpToken,
}

/// The result of successfully classifying a request's credential.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub email: Option<String>,
    pub is_admin: bool,
    pub groups: HashSet<String>,
    pub kind: PrincipalKind,
    /// Which claim name resolved the subject/email, e.g. `"oid"` or
    /// `"preferred_username"`. `None` for non-claim-based principals.
    pub claim_source: Option<&'static str>,
    /// The raw bearer credential, kept only long enough to support OBO
    /// exchange and per-user session spawning. Never logged.
    pub access_token: Option<String>,
}

impl Principal {
    pub fn local_admin() -> Self {
        Self {
            id: "local-admin".into(),
            email: None,
            is_admin: true,
            groups: HashSet::new(),
            kind: PrincipalKind::LocalAdmin,
            claim_source: None,
            access_token: None,
        }
    }

    pub fn system_service() -> Self {
        Self {
            id: "system-service".into(),
            email: None,
            is_admin: true,
            groups: HashSet::new(),
            kind: PrincipalKind::SystemService,
            claim_source: None,
            access_token: None,
        }
    }

    pub fn internal_service(name: &str) -> Self {
        Self {
            id: name.to_string(),
            email: None,
            is_admin: true,
            groups: HashSet::new(),
            kind: PrincipalKind::InternalService,
            claim_source: None,
            access_token: None,
        }
    }
}

/// Extracts the subject id and display email from a claims payload using
/// the fallback sequence carried over from the original system:
/// `oid` then `sub` for the subject, `preferred_username` then `upn` then
/// `email` for the display email. Returns the claim name that matched each
/// field for audit purposes.
pub fn resolve_claims(claims: &serde_json::Value) -> (Option<String>, &'static str, Option<String>, Option<&'static str>) {
    let (subject, subject_claim) = ["oid", "sub"]
        .iter()
        .find_map(|&name| claims.get(name).and_then(|v| v.as_str()).map(|s| (Some(s.to_string()), name)))
        .unwrap_or((None, "sub"));

    let email = ["preferred_username", "upn", "email"]
        .iter()
        .find_map(|&name| {
            claims
                .get(name)
                .and_then(|v| v.as_str())
                .map(|s| (s.to_string(), name))
        });

    let (email_value, email_claim) = match email {
        Some((v, c)) => (Some(v), Some(c)),
        None => (None, None),
    };

    (subject, subject_claim, email_value, email_claim)
}

/// Extracts the subject, email, and admin bit from a locally-signed token's
/// claims: `userId`/`email`/`isAdmin`/`groups`, the shape spec §4.5 point 5
/// names directly rather than the IdP's `oid`/`sub` claim-name variance
/// [`resolve_claims`] handles.
pub fn resolve_local_claims(claims: &serde_json::Value) -> (Option<String>, Option<String>, bool) {
    let subject = claims.get("userId").and_then(|v| v.as_str()).map(str::to_string);
    let email = claims.get("email").and_then(|v| v.as_str()).map(str::to_string);
    let is_admin = claims.get("isAdmin").and_then(|v| v.as_bool()).unwrap_or(false);
    (subject, email, is_admin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_oid_over_sub() {
        let claims = serde_json::json!({ "oid": "oid-1", "sub": "sub-1" });
        let (subject, claim, _, _) = resolve_claims(&claims);
        assert_eq!(subject, Some("oid-1".into()));
        assert_eq!(claim, "oid");
    }

    #[test]
    fn falls_back_to_sub_when_no_oid() {
        let claims = serde_json::json!({ "sub": "sub-1" });
        let (subject, claim, _, _) = resolve_claims(&claims);
        assert_eq!(subject, Some("sub-1".into()));
        assert_eq!(claim, "sub");
    }

    #[test]
    fn prefers_preferred_username_over_upn_and_email() {
        let claims = serde_json::json!({
            "preferred_username": "a@example.com",
            "upn": "b@example.com",
            "email": "c@example.com"
        });
        let (_, _, email, claim) = resolve_claims(&claims);
        assert_eq!(email, Some("a@example.com".into()));
        assert_eq!(claim, Some("preferred_username"));
    }

    #[test]
    fn falls_back_through_upn_to_email() {
        let claims = serde_json::json!({ "email": "c@example.com" });
        let (_, _, email, claim) = resolve_claims(&claims);
        assert_eq!(email, Some("c@example.com".into()));
        assert_eq!(claim, Some("email"));
    }

    #[test]
    fn missing_claims_resolve_to_none() {
        let claims = serde_json::json!({});
        let (subject, _, email, email_claim) = resolve_claims(&claims);
        assert_eq!(subject, None);
        assert_eq!(email, None);
        assert_eq!(email_claim, None);
    }

    #[test]
    fn local_claims_read_user_id_email_and_is_admin() {
        let claims = serde_json::json!({
            "userId": "user-1",
            "email": "user1@example.com",
            "isAdmin": true,
            "groups": ["eng"]
        });
        let (subject, email, is_admin) = resolve_local_claims(&claims);
        assert_eq!(subject, Some("user-1".into()));
        assert_eq!(email, Some("user1@example.com".into()));
        assert!(is_admin);
    }

    #[test]
    fn local_claims_default_is_admin_false_when_absent() {
        let claims = serde_json::json!({ "userId": "user-1" });
        let (_, _, is_admin) = resolve_local_claims(&claims);
        assert!(!is_admin);
    }
}
