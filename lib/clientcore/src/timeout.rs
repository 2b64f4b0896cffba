//! Connection-quality degradation levels (section 4.10): the client never decides to
//! disconnect itself on silence alone (only the transport/server do that), but it does need
//! to tell the UI how worried to look as time since the last inbound message grows.

use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimeoutLevel {
    /// Heard from the server recently; nothing to show.
    None,
    /// A small, unobtrusive connectivity indicator.
    Indicator,
    /// A visible banner warning the connection looks unhealthy.
    Banner,
    /// Full-screen "reconnecting" treatment.
    FullUi,
}

/// Derives the level from how long it's been since the last message was received from the
/// server, given the three ascending thresholds in `ClientConfig`.
pub fn derive(since_last_message_ms: u64, config: &ClientConfig) -> TimeoutLevel {
    if since_last_message_ms >= config.timeout_full_ui_ms {
        TimeoutLevel::FullUi
    } else if since_last_message_ms >= config.timeout_banner_ms {
        TimeoutLevel::Banner
    } else if since_last_message_ms >= config.timeout_indicator_ms {
        TimeoutLevel::Indicator
    } else {
        TimeoutLevel::None
    }
}
