use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::exchange::Exchange;
use crate::models::{
    InstrumentSpec, MarginMode, OrderKind, OrderRef, OrderRequest, OrderSide, OrderState,
    OrderStatus, PositionInfo, Ticker,
};

const BASE_URL: &str = "https://contract.mexc.com";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

// Contract API order type codes.
const TYPE_LIMIT: u8 = 1;
const TYPE_MARKET: u8 = 5;
// Plan orders trigger on the latest traded price.
const TRIGGER_ON_LAST_PRICE: u8 = 1;
// Trigger orders stay active for seven days.
const EXECUTE_CYCLE_7D: u8 = 2;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContract {
    symbol: String,
    contract_size: f64,
    vol_unit: f64,
    min_vol: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    last_price: f64,
    #[serde(default)]
    bid1: f64,
    #[serde(default)]
    ask1: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    state: i32,
    #[serde(default)]
    deal_vol: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlanOrder {
    id: serde_json::Value,
    state: i32,
    #[serde(default)]
    vol: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    hold_vol: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeverageChange<'a> {
    symbol: &'a str,
    leverage: u32,
    open_type: u8,
    position_type: u8,
}

#[derive(Debug, Clone)]
struct ContractMeta {
    spec: InstrumentSpec,
    contract_size: f64,
    vol_unit: f64,
}

/// MEXC USDT-perpetual client. Quantities cross this boundary in base-asset
/// units; the wire speaks in contracts, converted via each instrument's
/// contract size.
pub struct MexcClient {
    client: Client,
    api_key: String,
    api_secret: String,
    last_request: Mutex<Option<Instant>>,
    instruments: RwLock<HashMap<String, ContractMeta>>,
}

impl MexcClient {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: cfg.mexc_api_key.clone(),
            api_secret: cfg.mexc_api_secret.clone(),
            last_request: Mutex::new(None),
            instruments: RwLock::new(HashMap::new()),
        }
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn timestamp_ms() -> Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        Ok(now.as_millis().to_string())
    }

    /// HMAC-SHA256 over access key + timestamp + parameter string, hex
    /// encoded. The parameter string is the sorted query for GET requests
    /// and the raw JSON body for POST.
    fn sign(&self, timestamp: &str, param_string: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .context("invalid MEXC API secret")?;
        mac.update(self.api_key.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(param_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn require_credentials(&self) -> Result<()> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            anyhow::bail!("MEXC API credentials not configured");
        }
        Ok(())
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limit().await;

        let resp = self
            .client
            .get(format!("{}{}", BASE_URL, path))
            .query(params)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;

        Self::unwrap_response(path, resp).await
    }

    async fn private_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.require_credentials()?;
        self.rate_limit().await;

        let mut sorted: Vec<(&str, String)> = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let param_string = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let timestamp = Self::timestamp_ms()?;
        let signature = self.sign(&timestamp, &param_string)?;

        let resp = self
            .client
            .get(format!("{}{}", BASE_URL, path))
            .query(&sorted)
            .header("ApiKey", &self.api_key)
            .header("Request-Time", &timestamp)
            .header("Signature", signature)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;

        Self::unwrap_response(path, resp).await
    }

    async fn private_post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.require_credentials()?;
        self.rate_limit().await;

        let payload = serde_json::to_string(body).context("failed to encode request body")?;
        let timestamp = Self::timestamp_ms()?;
        let signature = self.sign(&timestamp, &payload)?;

        let resp = self
            .client
            .post(format!("{}{}", BASE_URL, path))
            .header("ApiKey", &self.api_key)
            .header("Request-Time", &timestamp)
            .header("Signature", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;

        Self::unwrap_response(path, resp).await
    }

    async fn unwrap_response<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("MEXC API error {} on {}: {}", status, path, body);
        }

        let envelope: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response from {path}"))?;
        if !envelope.success || envelope.code != 0 {
            anyhow::bail!(
                "MEXC error {} on {}: {}",
                envelope.code,
                path,
                envelope.message.unwrap_or_default()
            );
        }
        envelope
            .data
            .with_context(|| format!("empty data from {path}"))
    }

    async fn instrument_meta(&self, symbol: &str) -> Result<ContractMeta> {
        if let Some(meta) = self.instruments.read().await.get(symbol) {
            return Ok(meta.clone());
        }

        // Unknown symbol: fetch its contract definition on demand.
        let raw: RawContract = self
            .public_get(
                "/api/v1/contract/detail",
                &[("symbol", to_contract_symbol(symbol))],
            )
            .await
            .with_context(|| format!("unknown instrument {symbol}"))?;
        let meta = to_meta(&raw);
        self.instruments
            .write()
            .await
            .insert(meta.spec.symbol.clone(), meta.clone());
        Ok(meta)
    }

    /// Base-asset quantity to wire volume in contracts, snapped to the
    /// contract's volume unit.
    fn to_vol(meta: &ContractMeta, quantity: f64) -> f64 {
        if meta.contract_size <= 0.0 {
            return quantity;
        }
        let contracts = quantity / meta.contract_size;
        if meta.vol_unit <= 0.0 {
            return contracts;
        }
        ((contracts / meta.vol_unit).round() * meta.vol_unit * 1e8).round() / 1e8
    }

    async fn submit_standard(&self, meta: &ContractMeta, request: &OrderRequest) -> Result<OrderRef> {
        let mut body = serde_json::json!({
            "symbol": to_contract_symbol(&request.symbol),
            "vol": Self::to_vol(meta, request.quantity),
            "side": side_code(request.side, request.reduce_only),
            "type": if request.price.is_some() { TYPE_LIMIT } else { TYPE_MARKET },
            "openType": margin_mode_code(MarginMode::Isolated),
            "externalOid": request.client_id,
        });
        if let Some(price) = request.price {
            body["price"] = serde_json::json!(price);
        }
        if let Some(leverage) = request.leverage {
            body["leverage"] = serde_json::json!(leverage);
        }

        let id: serde_json::Value = self
            .private_post("/api/v1/private/order/submit", &body)
            .await?;
        Ok(OrderRef {
            id: id_to_string(&id),
            client_id: request.client_id.clone(),
            symbol: request.symbol.clone(),
            kind: OrderKind::Standard,
        })
    }

    async fn submit_trigger(&self, meta: &ContractMeta, request: &OrderRequest) -> Result<OrderRef> {
        let trigger_price = request
            .trigger_price
            .context("trigger order without trigger price")?;
        let mut body = serde_json::json!({
            "symbol": to_contract_symbol(&request.symbol),
            "vol": Self::to_vol(meta, request.quantity),
            "side": side_code(request.side, request.reduce_only),
            "openType": margin_mode_code(MarginMode::Isolated),
            "triggerPrice": trigger_price,
            "triggerType": trigger_type_code(request.side),
            "executeCycle": EXECUTE_CYCLE_7D,
            "orderType": if request.price.is_some() { TYPE_LIMIT } else { TYPE_MARKET },
            "trend": TRIGGER_ON_LAST_PRICE,
        });
        if let Some(price) = request.price {
            body["price"] = serde_json::json!(price);
        }
        if let Some(leverage) = request.leverage {
            body["leverage"] = serde_json::json!(leverage);
        }

        let id: serde_json::Value = self
            .private_post("/api/v1/private/planorder/place", &body)
            .await?;
        Ok(OrderRef {
            id: id_to_string(&id),
            client_id: request.client_id.clone(),
            symbol: request.symbol.clone(),
            kind: OrderKind::Trigger,
        })
    }
}

#[async_trait]
impl Exchange for MexcClient {
    async fn load_instruments(&self) -> Result<usize> {
        let raw: Vec<RawContract> = self.public_get("/api/v1/contract/detail", &[]).await?;
        let mut cache = self.instruments.write().await;
        cache.clear();
        for contract in &raw {
            let meta = to_meta(contract);
            cache.insert(meta.spec.symbol.clone(), meta);
        }
        Ok(cache.len())
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec> {
        Ok(self.instrument_meta(symbol).await?.spec)
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        let raw: RawTicker = self
            .public_get(
                "/api/v1/contract/ticker",
                &[("symbol", to_contract_symbol(symbol))],
            )
            .await?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last: raw.last_price,
            bid: raw.bid1,
            ask: raw.ask1,
        })
    }

    async fn set_leverage_and_margin_mode(
        &self,
        symbol: &str,
        leverage: u32,
        mode: MarginMode,
    ) -> Result<()> {
        let contract = to_contract_symbol(symbol);
        // The venue keys leverage by position side, so set both.
        for position_type in [1u8, 2u8] {
            let body = LeverageChange {
                symbol: &contract,
                leverage,
                open_type: margin_mode_code(mode),
                position_type,
            };
            let _: serde_json::Value = self
                .private_post("/api/v1/private/position/change_leverage", &body)
                .await?;
        }
        Ok(())
    }

    async fn set_margin_mode(&self, _symbol: &str, _mode: MarginMode) -> Result<bool> {
        // Margin mode rides on every order's openType here; there is no
        // standalone endpoint to flip ahead of time.
        Ok(false)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.set_leverage_and_margin_mode(symbol, leverage, MarginMode::Isolated)
            .await
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderRef> {
        let meta = self.instrument_meta(&request.symbol).await?;
        if request.trigger_price.is_some() {
            self.submit_trigger(&meta, request).await
        } else {
            self.submit_standard(&meta, request).await
        }
    }

    async fn cancel_order(&self, order: &OrderRef) -> Result<()> {
        match order.kind {
            OrderKind::Standard => {
                let body = serde_json::json!([id_value(&order.id)]);
                let _: serde_json::Value =
                    self.private_post("/api/v1/private/order/cancel", &body).await?;
            }
            OrderKind::Trigger => {
                let body = serde_json::json!([{
                    "symbol": to_contract_symbol(&order.symbol),
                    "orderId": id_value(&order.id),
                }]);
                let _: serde_json::Value = self
                    .private_post("/api/v1/private/planorder/cancel", &body)
                    .await?;
            }
        }
        Ok(())
    }

    async fn fetch_order(&self, order: &OrderRef) -> Result<OrderState> {
        let meta = self.instrument_meta(&order.symbol).await?;
        match order.kind {
            OrderKind::Standard => {
                let raw: RawOrder = self
                    .private_get(&format!("/api/v1/private/order/get/{}", order.id), &[])
                    .await?;
                Ok(OrderState {
                    status: order_status(raw.state),
                    filled: raw.deal_vol * meta.contract_size,
                })
            }
            OrderKind::Trigger => {
                let raw: Vec<RawPlanOrder> = self
                    .private_get(
                        "/api/v1/private/planorder/list/orders",
                        &[
                            ("symbol", to_contract_symbol(&order.symbol)),
                            ("page_num", "1".to_string()),
                            ("page_size", "50".to_string()),
                        ],
                    )
                    .await?;
                let found = raw
                    .iter()
                    .find(|p| id_to_string(&p.id) == order.id)
                    .with_context(|| format!("trigger order {} not found", order.id))?;
                let status = plan_order_status(found.state);
                let filled = if status == OrderStatus::Filled {
                    found.vol * meta.contract_size
                } else {
                    0.0
                };
                Ok(OrderState { status, filled })
            }
        }
    }

    async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        let meta = self.instrument_meta(symbol).await?;
        let raw: Vec<RawPosition> = self
            .private_get(
                "/api/v1/private/position/open_positions",
                &[("symbol", to_contract_symbol(symbol))],
            )
            .await?;
        let hold_vol: f64 = raw.iter().map(|p| p.hold_vol).sum();
        if hold_vol <= 0.0 {
            return Ok(None);
        }
        Ok(Some(PositionInfo {
            symbol: symbol.to_string(),
            contracts: hold_vol * meta.contract_size,
        }))
    }
}

// --- Wire mapping helpers ---

/// "STX/USDT:USDT" -> "STX_USDT".
fn to_contract_symbol(unified: &str) -> String {
    let base = unified.split('/').next().unwrap_or(unified);
    format!("{base}_USDT")
}

/// "STX_USDT" -> "STX/USDT:USDT".
fn to_unified_symbol(contract: &str) -> String {
    let base = contract.split('_').next().unwrap_or(contract);
    format!("{base}/USDT:USDT")
}

fn to_meta(raw: &RawContract) -> ContractMeta {
    let contract_size = if raw.contract_size > 0.0 {
        raw.contract_size
    } else {
        1.0
    };
    let vol_unit = if raw.vol_unit > 0.0 { raw.vol_unit } else { 1.0 };
    ContractMeta {
        spec: InstrumentSpec {
            symbol: to_unified_symbol(&raw.symbol),
            qty_step: contract_size * vol_unit,
            min_qty: contract_size * raw.min_vol.max(0.0),
        },
        contract_size,
        vol_unit,
    }
}

/// 1 = open long, 2 = close short, 3 = open short, 4 = close long.
fn side_code(side: OrderSide, reduce_only: bool) -> u8 {
    match (side, reduce_only) {
        (OrderSide::Buy, false) => 1,
        (OrderSide::Buy, true) => 2,
        (OrderSide::Sell, false) => 3,
        (OrderSide::Sell, true) => 4,
    }
}

fn margin_mode_code(mode: MarginMode) -> u8 {
    match mode {
        MarginMode::Isolated => 1,
        MarginMode::Cross => 2,
    }
}

/// A sell stop fires when price falls to the trigger, a buy stop when it
/// rises: 1 = greater-or-equal, 2 = less-or-equal.
fn trigger_type_code(side: OrderSide) -> u8 {
    match side {
        OrderSide::Buy => 1,
        OrderSide::Sell => 2,
    }
}

fn order_status(state: i32) -> OrderStatus {
    match state {
        3 => OrderStatus::Filled,
        4 => OrderStatus::Canceled,
        5 => OrderStatus::Rejected,
        _ => OrderStatus::Open,
    }
}

fn plan_order_status(state: i32) -> OrderStatus {
    match state {
        3 => OrderStatus::Filled,
        2 => OrderStatus::Canceled,
        4 | 5 => OrderStatus::Rejected,
        _ => OrderStatus::Open,
    }
}

fn id_to_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cancel endpoints want numeric ids when the id is numeric.
fn id_value(id: &str) -> serde_json::Value {
    id.parse::<i64>()
        .map(serde_json::Value::from)
        .unwrap_or_else(|_| serde_json::Value::from(id))
}
