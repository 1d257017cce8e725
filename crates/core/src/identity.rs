//! Worker identity derived from the hosting environment.
//!
//! On rented compute the container label (e.g. `C.25862941`) carries the
//! instance number; the worker reports as `VastAi-<n>`. Anywhere else it
//! reports as [`LOCAL_WORKER_ID`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Environment variable holding the rented-compute container label.
pub const INSTANCE_LABEL_ENV: &str = "VAST_CONTAINERLABEL";

/// Identity used when not running on rented compute.
pub const LOCAL_WORKER_ID: &str = "local-pc";

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Process-lifetime identity used as the correlation key with the
/// coordination server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    id: String,
    instance_id: Option<u64>,
}

impl WorkerIdentity {
    pub fn from_instance_label(label: Option<&str>) -> Self {
        match label.and_then(instance_id_from_label) {
            Some(instance_id) => Self {
                id: format!("VastAi-{instance_id}"),
                instance_id: Some(instance_id),
            },
            None => Self::local(),
        }
    }

    pub fn local() -> Self {
        Self {
            id: LOCAL_WORKER_ID.to_string(),
            instance_id: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// Rented-compute instance number, when there is one.
    pub fn instance_id(&self) -> Option<u64> {
        self.instance_id
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// First run of digits in the label.
pub fn instance_id_from_label(label: &str) -> Option<u64> {
    DIGITS_RE.find(label).and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_with_digits_yields_vast_identity() {
        let identity = WorkerIdentity::from_instance_label(Some("C.25862941"));
        assert_eq!(identity.as_str(), "VastAi-25862941");
        assert_eq!(identity.instance_id(), Some(25862941));
    }

    #[test]
    fn first_digit_run_wins() {
        assert_eq!(instance_id_from_label("A.123-456"), Some(123));
    }

    #[test]
    fn missing_or_digitless_label_is_local() {
        assert_eq!(WorkerIdentity::from_instance_label(None), WorkerIdentity::local());
        let identity = WorkerIdentity::from_instance_label(Some("no-digits"));
        assert_eq!(identity.as_str(), LOCAL_WORKER_ID);
        assert_eq!(identity.instance_id(), None);
    }

    #[test]
    fn display_matches_id() {
        assert_eq!(WorkerIdentity::local().to_string(), "local-pc");
    }
}
