pub mod mexc;

pub use mexc::MexcClient;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    InstrumentSpec, MarginMode, OrderRef, OrderRequest, OrderState, PositionInfo, Ticker,
};

/// Trading port. Implementations take `&self` so one client can be shared
/// across the dispatch loop and every monitor task behind an `Arc`.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Fetches the tradeable instrument list into the client's cache.
    /// Returns how many instruments were loaded.
    async fn load_instruments(&self) -> Result<usize>;

    /// Spec for one unified symbol, from cache or fetched on demand.
    /// Unknown symbols are an error.
    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec>;

    async fn ticker(&self, symbol: &str) -> Result<Ticker>;

    /// Combined leverage + margin-mode setup in one call.
    async fn set_leverage_and_margin_mode(
        &self,
        symbol: &str,
        leverage: u32,
        mode: MarginMode,
    ) -> Result<()>;

    /// Standalone margin-mode switch. `Ok(true)` when a server call was made,
    /// `Ok(false)` when the venue carries the mode on each order instead.
    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<bool>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderRef>;

    async fn cancel_order(&self, order: &OrderRef) -> Result<()>;

    async fn fetch_order(&self, order: &OrderRef) -> Result<OrderState>;

    /// Current open position, `None` when flat.
    async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>>;
}
