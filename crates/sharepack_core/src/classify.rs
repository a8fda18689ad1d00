//! Retryable vs terminal failure classification.

use crate::error::ProvisionError;
use crate::platform::PlatformError;
use crate::queue::QueueError;
use crate::store::StoreError;

/// HTTP statuses worth one more attempt.
const RETRYABLE_STATUSES: [u16; 3] = [429, 503, 504];

/// Whether a failed attempt may succeed if repeated after a cool-down.
///
/// Anything not recognised as transient is terminal.
pub fn is_retryable(err: &ProvisionError) -> bool {
    match err {
        ProvisionError::Platform(e) => match e {
            PlatformError::Timeout(_) | PlatformError::Connection(_) => true,
            PlatformError::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        },
        ProvisionError::Store(StoreError::Connection(_)) => true,
        ProvisionError::Queue(QueueError::Connection(_)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share_config::ShareConfig;
    use crate::types::EntityKind;
    use uuid::Uuid;

    fn platform(e: PlatformError) -> ProvisionError {
        e.into()
    }

    #[test]
    fn transient_platform_errors_retry() {
        assert!(is_retryable(&platform(PlatformError::Timeout("t".into()))));
        assert!(is_retryable(&platform(PlatformError::Connection("c".into()))));
        for status in [429, 503, 504] {
            assert!(is_retryable(&platform(PlatformError::Http {
                status,
                message: String::new(),
            })));
        }
    }

    #[test]
    fn other_http_statuses_are_terminal() {
        for status in [400, 401, 403, 404, 409, 500, 502] {
            assert!(!is_retryable(&platform(PlatformError::Http {
                status,
                message: String::new(),
            })));
        }
    }

    #[test]
    fn domain_errors_are_terminal() {
        assert!(!is_retryable(&platform(PlatformError::PermissionDenied("p".into()))));
        assert!(!is_retryable(&platform(PlatformError::NotFound("n".into()))));
        assert!(!is_retryable(&ProvisionError::Validation(vec!["v".into()])));
        assert!(!is_retryable(&ProvisionError::SharePackNotFound(Uuid::nil())));
        assert!(!is_retryable(&ProvisionError::InvalidState("s".into())));
    }

    #[test]
    fn only_connection_errors_retry_for_store_and_queue() {
        assert!(is_retryable(&StoreError::Connection("pool".into()).into()));
        assert!(!is_retryable(&StoreError::Backend("syntax".into()).into()));
        assert!(!is_retryable(
            &StoreError::Decode {
                kind: EntityKind::Share,
                message: "bad".into(),
            }
            .into()
        ));
        assert!(is_retryable(&QueueError::Connection("down".into()).into()));
        assert!(!is_retryable(&QueueError::Malformed("x".into()).into()));
    }

    #[test]
    fn decode_and_unknown_errors_are_terminal() {
        let config_err = ShareConfig::from_json_str("{").unwrap_err();
        assert!(!is_retryable(&config_err.into()));
        assert!(!is_retryable(&ProvisionError::Internal(anyhow::anyhow!(
            "something odd"
        ))));
    }
}
