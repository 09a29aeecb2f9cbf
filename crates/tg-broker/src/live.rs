//! JSON/REST adapter for the live brokerage gateway.
//!
//! The gateway speaks the same document shapes as `tg-schemas`, so responses
//! deserialize straight into the domain types. Live and paper differ only by
//! configuration (host, port, client id); there are no behavioral forks
//! here. Deadlines, retries, and the breaker live in `BrokerClient`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use tg_schemas::{
    ApprovalToken, Bar, CashBalance, Instrument, MarketSnapshot, OpenOrder, OrderIntent, Portfolio,
    Position, Timeframe,
};

use crate::{
    verify_submit_token, BarRange, BrokerAdapter, BrokerError, Contract, InstrumentCandidate,
    ReportHandle, ReportQuery, ResolveHint, SearchQuery,
};

pub struct LiveBroker {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    intent: &'a OrderIntent,
    token_id: String,
    intent_hash: &'a str,
    client_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReadyBody {
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct HandleBody {
    handle: String,
}

impl LiveBroker {
    pub fn new(host: &str, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://{host}:{port}/v1/api"),
            client_id: client_id.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BrokerError> {
        let resp = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }

    async fn post_json<T: serde::de::DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BrokerError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }
}

fn transport(e: reqwest::Error) -> BrokerError {
    if e.is_connect() {
        BrokerError::NotConnected
    } else {
        BrokerError::Transport(e.to_string())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, BrokerError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(BrokerError::Protocol(format!(
            "gateway returned {status}: {body}"
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| BrokerError::Protocol(format!("undecodable gateway response: {e}")))
}

#[async_trait]
impl BrokerAdapter for LiveBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        let _: serde_json::Value = self.get_json("/health", &[]).await?;
        Ok(())
    }

    async fn get_portfolio(&self, account_id: &str) -> Result<Portfolio, BrokerError> {
        self.get_json(
            &format!("/portfolio/{account_id}/summary"),
            &[("client_id", self.client_id.clone())],
        )
        .await
    }

    async fn get_positions(&self, account_id: &str) -> Result<Vec<Position>, BrokerError> {
        self.get_json(&format!("/portfolio/{account_id}/positions"), &[])
            .await
    }

    async fn get_cash(&self, account_id: &str) -> Result<Vec<CashBalance>, BrokerError> {
        self.get_json(&format!("/portfolio/{account_id}/cash"), &[])
            .await
    }

    async fn get_open_orders(&self, account_id: &str) -> Result<Vec<OpenOrder>, BrokerError> {
        self.get_json("/orders", &[("account_id", account_id.to_string())])
            .await
    }

    async fn get_market_snapshot(
        &self,
        instrument: &Instrument,
    ) -> Result<MarketSnapshot, BrokerError> {
        self.get_json(
            "/md/snapshot",
            &[
                ("symbol", instrument.symbol.clone()),
                ("sec_type", instrument.sec_type.as_str().to_string()),
                ("exchange", instrument.exchange.clone()),
                ("currency", instrument.currency.clone()),
            ],
        )
        .await
    }

    async fn get_market_bars(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        range: BarRange,
    ) -> Result<Vec<Bar>, BrokerError> {
        self.get_json(
            "/md/bars",
            &[
                ("symbol", instrument.symbol.clone()),
                ("timeframe", timeframe.as_str().to_string()),
                ("limit", range.limit.to_string()),
            ],
        )
        .await
    }

    async fn instrument_search(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<InstrumentCandidate>, BrokerError> {
        let mut q: Vec<(&str, String)> = Vec::new();
        if let Some(text) = &query.q {
            q.push(("q", text.clone()));
        }
        if let Some(t) = query.sec_type {
            q.push(("type", t.as_str().to_string()));
        }
        if let Some(e) = &query.exchange {
            q.push(("exchange", e.clone()));
        }
        if let Some(c) = &query.currency {
            q.push(("currency", c.clone()));
        }
        if let Some(l) = query.limit {
            q.push(("limit", l.to_string()));
        }
        self.get_json("/secdef/search", &q).await
    }

    async fn instrument_resolve(&self, hint: &ResolveHint) -> Result<Contract, BrokerError> {
        self.post_json("/secdef/resolve", hint).await
    }

    async fn submit_order(
        &self,
        intent: &OrderIntent,
        token: &ApprovalToken,
    ) -> Result<OpenOrder, BrokerError> {
        verify_submit_token(intent, token)?;
        let body = SubmitBody {
            intent,
            token_id: token.token_id.to_string(),
            intent_hash: &token.intent_hash,
            client_id: &self.client_id,
        };
        let order: OpenOrder = self.post_json("/orders", &body).await?;
        info!(broker_order_id = %order.broker_order_id, "live order accepted");
        Ok(order)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError> {
        self.post_json(
            &format!("/orders/{broker_order_id}/cancel"),
            &json!({"client_id": self.client_id}),
        )
        .await
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError> {
        self.get_json(&format!("/orders/{broker_order_id}"), &[]).await
    }

    async fn modify_order(
        &self,
        broker_order_id: &str,
        new_quantity: Option<Decimal>,
        new_limit_price: Option<Decimal>,
    ) -> Result<OpenOrder, BrokerError> {
        self.post_json(
            &format!("/orders/{broker_order_id}/modify"),
            &json!({
                "quantity": new_quantity,
                "limit_price": new_limit_price,
                "client_id": self.client_id,
            }),
        )
        .await
    }

    async fn request_report(&self, query: &ReportQuery) -> Result<ReportHandle, BrokerError> {
        let body: HandleBody = self.post_json("/reports", query).await?;
        Ok(ReportHandle(body.handle))
    }

    async fn report_ready(&self, handle: &ReportHandle) -> Result<bool, BrokerError> {
        let body: ReadyBody = self
            .get_json(&format!("/reports/{}/status", handle.0), &[])
            .await?;
        Ok(body.ready)
    }

    async fn download_report(&self, handle: &ReportHandle) -> Result<Vec<u8>, BrokerError> {
        let resp = self
            .http
            .get(self.url(&format!("/reports/{}/download", handle.0)))
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BrokerError::Protocol(format!(
                "report download returned {status}"
            )));
        }
        let bytes = resp.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }
}
