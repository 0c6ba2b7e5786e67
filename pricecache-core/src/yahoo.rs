//! Yahoo Finance price-history provider.
//!
//! Fetches daily bars from Yahoo's v8 chart API with a single blocking
//! request. Yahoo has no official API and is subject to unannounced format
//! changes; parse failures surface as `ResponseFormatChanged`.

use crate::config::ProviderConfig;
use crate::error::DataError;
use crate::provider::{PriceHistoryProvider, RawBar};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;

/// Seconds to wait when a 429 carries no usable `retry-after` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| DataError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Chart API URL for `symbol` over the half-open range `[start, end)`.
    fn chart_url(base_url: &str, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end_ts = end.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        format!(
            "{base_url}/v8/finance/chart/{symbol}\
             ?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true"
        )
    }

    /// Parse the chart API response into RawBars.
    ///
    /// An unknown symbol or a range without trading days yields an empty list.
    fn parse_response(resp: ChartResponse) -> Result<Vec<RawBar>, DataError> {
        let result = match (resp.chart.result, resp.chart.error) {
            (Some(result), _) => result,
            (None, Some(err)) if err.code == "Not Found" => return Ok(Vec::new()),
            (None, Some(err)) => {
                return Err(DataError::ResponseFormatChanged(format!(
                    "{}: {}",
                    err.code, err.description
                )))
            }
            (None, None) => {
                return Err(DataError::ResponseFormatChanged(
                    "empty result with no error".into(),
                ))
            }
        };

        let Some(data) = result.into_iter().next() else {
            return Ok(Vec::new());
        };

        // Yahoo omits timestamps entirely when the range has no bars
        let Some(timestamps) = data.timestamp else {
            return Ok(Vec::new());
        };

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let mut bars = Vec::with_capacity(timestamps.len());

        for (i, &ts) in timestamps.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.naive_utc().date())
                .ok_or_else(|| {
                    DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();
            let adj_close = adj_closes
                .as_ref()
                .and_then(|v| v.get(i).copied().flatten());

            // Skip bars where all OHLCV are None (holidays/non-trading days)
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            bars.push(RawBar {
                date,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume.unwrap_or(0),
                adj_close: adj_close.unwrap_or(f64::NAN),
            });
        }

        Ok(bars)
    }

    /// Body of a 404: Yahoo answers unknown symbols with a chart error,
    /// which is an empty result rather than a failure.
    fn parse_not_found(body: &str) -> Result<Vec<RawBar>, DataError> {
        match serde_json::from_str::<ChartResponse>(body) {
            Ok(chart) => Self::parse_response(chart),
            Err(_) => Ok(Vec::new()),
        }
    }

    fn request(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawBar>, DataError> {
        let url = Self::chart_url(&self.base_url, symbol, start, end);
        log::debug!("GET {url}");

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        match classify(resp.status(), resp.headers(), symbol)? {
            Body::Chart => {
                let chart: ChartResponse = resp.json().map_err(|e| {
                    DataError::ResponseFormatChanged(format!(
                        "failed to parse response for {symbol}: {e}"
                    ))
                })?;
                Self::parse_response(chart)
            }
            Body::NotFound => Self::parse_not_found(&resp.text().unwrap_or_default()),
        }
    }
}

/// How to read a response body, once its status has been accepted.
#[derive(Debug, PartialEq)]
enum Body {
    Chart,
    NotFound,
}

/// Map an HTTP status (and headers) to either a body to parse or an error.
fn classify(status: StatusCode, headers: &HeaderMap, symbol: &str) -> Result<Body, DataError> {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            })
        }
        StatusCode::UNAUTHORIZED => Err(DataError::AuthenticationRequired(
            "Yahoo Finance requires authentication".into(),
        )),
        StatusCode::NOT_FOUND => Ok(Body::NotFound),
        s if s.is_success() => Ok(Body::Chart),
        s => Err(DataError::Other(format!("HTTP {s} for {symbol}"))),
    }
}

impl PriceHistoryProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawBar>, DataError> {
        self.request(symbol, start, end)
    }
}
