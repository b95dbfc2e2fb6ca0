//! Helpers for building `SessionFilter` values.

pub use crate::storage::types::SessionFilter;
use crate::session_management::SessionStatus;

/// Build a `SessionFilter` from the admin `status` query value.
///
/// `None` and `"all"` match every session; an unrecognised value yields `Err`.
pub fn from_status_param(status: Option<&str>) -> Result<SessionFilter, String> {
    match status {
        None | Some("all") => Ok(SessionFilter::default()),
        Some(s) => Ok(by_status(s.parse()?)),
    }
}

/// Build a `SessionFilter` that matches sessions in one status.
pub fn by_status(status: SessionStatus) -> SessionFilter {
    SessionFilter {
        status: Some(status),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_param() {
        assert!(from_status_param(None).unwrap().status.is_none());
        assert!(from_status_param(Some("all")).unwrap().status.is_none());
        assert_eq!(
            from_status_param(Some("completed")).unwrap().status,
            Some(SessionStatus::Completed)
        );
        assert!(from_status_param(Some("stale")).is_err());
    }
}
