pub mod bundle;
pub mod direction;
pub mod market;
pub mod signal;

pub use bundle::{OrderBundle, TpLeg};
pub use direction::*;
pub use market::{InstrumentSpec, MarketSnapshot, OrderRef, OrderRequest, OrderState, PositionInfo, Ticker};
pub use signal::TradeSignal;
