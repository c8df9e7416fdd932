use async_trait::async_trait;

/// Where a message goes: the public signal channel or the operator's
/// direct chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Channel,
    Owner,
}

/// Outbound notification port. Delivery is best-effort: implementations log
/// failures and never surface them into trading logic.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, audience: Audience, text: &str);
}
