pub mod feedback;
pub mod queue;

pub use feedback::RedisFeedbackStore;
pub use queue::RedisQueueFactory;

/// Key of the per-service message list.
pub(crate) fn queue_key(service_id: &str) -> String {
    format!("shove:{service_id}")
}

/// Key of the shared feedback list, consumable by external systems.
pub(crate) const FEEDBACK_KEY: &str = "shove:feedback";

/// Connection-class failures are retried by the dequeue loop with backoff;
/// anything else surfaces immediately. Detection is by substring on the
/// surfaced message, which covers both protocol and I/O level errors.
pub(crate) fn is_connection_error(err: &redis::RedisError) -> bool {
    const MARKERS: [&str; 5] = ["connection", "timeout", "eof", "broken pipe", "connection reset"];
    let message = err.to_string().to_ascii_lowercase();
    MARKERS.iter().any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_error(kind: std::io::ErrorKind, text: &str) -> redis::RedisError {
        redis::RedisError::from(std::io::Error::new(kind, text.to_string()))
    }

    #[test]
    fn io_failures_are_connection_class() {
        assert!(is_connection_error(&io_error(
            std::io::ErrorKind::ConnectionReset,
            "Connection reset by peer"
        )));
        assert!(is_connection_error(&io_error(
            std::io::ErrorKind::UnexpectedEof,
            "unexpected EOF"
        )));
        assert!(is_connection_error(&io_error(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe"
        )));
        assert!(is_connection_error(&io_error(
            std::io::ErrorKind::TimedOut,
            "read timeout"
        )));
    }

    #[test]
    fn protocol_failures_surface() {
        let err = redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "WRONGTYPE",
            "operation against a key holding the wrong kind of value".to_string(),
        ));
        assert!(!is_connection_error(&err));
    }

    #[test]
    fn queue_keys_are_namespaced() {
        assert_eq!(queue_key("webhook"), "shove:webhook");
        assert_eq!(queue_key("apns-sandbox"), "shove:apns-sandbox");
    }
}
