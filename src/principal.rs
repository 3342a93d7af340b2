use axum::http::HeaderMap;

/// Header carrying the verified subject, set by the identity-aware gateway in front of us.
pub const SUBJECT_HEADER: &str = "x-tether-subject";
/// Optional header selecting which of the subject's organizations the request acts in.
pub const ORGANIZATION_HEADER: &str = "x-tether-organization";

/// An already-authenticated caller. Nothing here is verified locally; the upstream
/// gateway strips these headers from untrusted traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub organization_id: Option<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, organization_id: Option<String>) -> Self {
        Self {
            subject: subject.into(),
            organization_id,
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let subject = header_value(headers, SUBJECT_HEADER)?;
        Some(Self {
            subject,
            organization_id: header_value(headers, ORGANIZATION_HEADER),
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
