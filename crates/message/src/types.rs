use serde::{Deserialize, Serialize};

/// Message classification. Discriminants match the original wire values and
/// must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Unknown = 0,
    Text = 1,
    Binary = 2,
    Json = 3,

    // Game-domain events.
    PlayerEvent = 10,
    GameState = 11,
    ChatMessage = 12,
    SystemNotification = 13,
    CombatEvent = 14,
    EconomyEvent = 15,
    GuildEvent = 16,
    MatchEvent = 17,

    // Operational events.
    Heartbeat = 20,
    HealthCheck = 21,
    Metrics = 22,
    LogEntry = 23,
    ConfigUpdate = 24,
    ServiceDiscovery = 25,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Unknown
    }
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Unknown => "UNKNOWN",
            MessageType::Text => "TEXT",
            MessageType::Binary => "BINARY",
            MessageType::Json => "JSON",
            MessageType::PlayerEvent => "PLAYER_EVENT",
            MessageType::GameState => "GAME_STATE",
            MessageType::ChatMessage => "CHAT_MESSAGE",
            MessageType::SystemNotification => "SYSTEM_NOTIFICATION",
            MessageType::CombatEvent => "COMBAT_EVENT",
            MessageType::EconomyEvent => "ECONOMY_EVENT",
            MessageType::GuildEvent => "GUILD_EVENT",
            MessageType::MatchEvent => "MATCH_EVENT",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::HealthCheck => "HEALTH_CHECK",
            MessageType::Metrics => "METRICS",
            MessageType::LogEntry => "LOG_ENTRY",
            MessageType::ConfigUpdate => "CONFIG_UPDATE",
            MessageType::ServiceDiscovery => "SERVICE_DISCOVERY",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum MessagePriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
    /// Realtime traffic such as combat sync; always dequeued first.
    Realtime = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum DeliveryMode {
    FireAndForget = 0,
    #[default]
    AtLeastOnce = 1,
    AtMostOnce = 2,
    ExactlyOnce = 3,
}

impl DeliveryMode {
    /// Modes at or above at-least-once track dispatched messages in the
    /// pending-ack map until acknowledged.
    pub fn requires_ack(&self) -> bool {
        matches!(self, DeliveryMode::AtLeastOnce | DeliveryMode::ExactlyOnce)
    }
}

/// Declared persistence intent. The broker is memory-only; the mode is
/// carried through configuration for embedders that layer storage on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum PersistenceMode {
    #[default]
    MemoryOnly = 0,
    DiskPersistent = 1,
    Hybrid = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum QueueType {
    #[default]
    Standard = 0,
    Priority = 1,
    Delay = 2,
    DeadLetter = 3,
    Broadcast = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeadLetterReason {
    Expired = 0,
    MaxRetriesExceeded = 1,
    Rejected = 2,
    QueueFull = 3,
    MessageTooLarge = 4,
    InvalidMessage = 5,
    ConsumerError = 6,
    Timeout = 7,
    Unknown = 255,
}

impl Default for DeadLetterReason {
    fn default() -> Self {
        DeadLetterReason::Unknown
    }
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Expired => "EXPIRED",
            DeadLetterReason::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            DeadLetterReason::Rejected => "REJECTED",
            DeadLetterReason::QueueFull => "QUEUE_FULL",
            DeadLetterReason::MessageTooLarge => "MESSAGE_TOO_LARGE",
            DeadLetterReason::InvalidMessage => "INVALID_MESSAGE",
            DeadLetterReason::ConsumerError => "CONSUMER_ERROR",
            DeadLetterReason::Timeout => "TIMEOUT",
            DeadLetterReason::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum MessageStatus {
    #[default]
    Pending = 0,
    Sent = 1,
    Delivered = 2,
    Acknowledged = 3,
    Failed = 4,
    Expired = 5,
    DeadLetter = 6,
}
