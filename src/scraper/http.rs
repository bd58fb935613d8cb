use crate::model::{FlowQuery, RawPage, TransportError};
use crate::scraper::Transport;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const REFERER: &str = "https://quote.eastmoney.com/";
const UT_TOKEN: &str = "b2884a393a59ad64002292a3e90d46a5";

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    data: Option<PageData>,
}

#[derive(Debug, Deserialize)]
struct PageData {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    diff: Vec<String>,
}

/// HTTP implementation of [`Transport`] against the provider's
/// `clist/get` endpoint family.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn query_params(query: &FlowQuery, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("fid", query.sort_field.provider_code().to_string()),
            ("po", query.sort_order.provider_code().to_string()),
            ("pz", query.page_size.to_string()),
            ("pn", page.to_string()),
            ("np", "1".to_string()),
            ("fltt", "2".to_string()),
            ("invt", "2".to_string()),
            ("ut", UT_TOKEN.to_string()),
            ("fs", query.segment.filter_code().to_string()),
            (
                "fields",
                crate::parser::field_codes().collect::<Vec<_>>().join(","),
            ),
        ]
    }

    /// Peels an optional JSONP callback wrapper off the body. Plain
    /// JSON passes through untouched, including parentheses inside
    /// string values.
    fn strip_jsonp(body: &str) -> &str {
        let trimmed = body.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return trimmed;
        }
        match (trimmed.find('('), trimmed.rfind(')')) {
            (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
            _ => trimmed,
        }
    }

    fn decode_envelope(body: &str, page: u32) -> Result<RawPage, TransportError> {
        let stripped = Self::strip_jsonp(body);
        let envelope: PageEnvelope = serde_json::from_str(stripped)
            .map_err(|e| TransportError::MalformedPayload(e.to_string()))?;
        let data = envelope.data.ok_or(TransportError::EmptyData)?;

        Ok(RawPage {
            index: page,
            total: data.total,
            items: data.diff,
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn get_page(&self, query: &FlowQuery, page: u32) -> Result<RawPage, TransportError> {
        let params = Self::query_params(query, page);
        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .header("Referer", REFERER)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Self::decode_envelope(&body, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MarketSegment, SortField, SortOrder};

    fn query() -> FlowQuery {
        FlowQuery {
            segment: MarketSegment::AllStocks,
            sort_field: SortField::MainInflow,
            sort_order: SortOrder::Descending,
            page_size: 100,
            max_pages: Some(10),
        }
    }

    #[test]
    fn params_carry_page_sort_and_filter() {
        let params = HttpTransport::query_params(&query(), 3);
        let find = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .expect("param present")
        };
        assert_eq!(find("pn"), "3");
        assert_eq!(find("pz"), "100");
        assert_eq!(find("fid"), "f62");
        assert_eq!(find("po"), "1");
        assert!(find("fs").starts_with("m:0+t:6"));
        assert!(find("fields").starts_with("f12,f14,"));
        assert!(find("fields").ends_with("f124"));
    }

    #[test]
    fn jsonp_wrapper_is_stripped() {
        let body = r#"jQuery_jsonp_callback_1({"data":{"total":2,"diff":["a","b"]}});"#;
        let page = HttpTransport::decode_envelope(body, 1).expect("decode wrapped");
        assert_eq!(page.total, 2);
        assert_eq!(page.items, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn plain_json_with_parens_in_strings_survives() {
        let body = r#"{"data":{"total":1,"diff":["600001,ST股(退)"]}}"#;
        let page = HttpTransport::decode_envelope(body, 2).expect("decode plain");
        assert_eq!(page.index, 2);
        assert_eq!(page.items[0], "600001,ST股(退)");
    }

    #[test]
    fn null_data_is_empty_data_error() {
        let err = HttpTransport::decode_envelope(r#"{"data":null}"#, 1).unwrap_err();
        assert!(matches!(err, TransportError::EmptyData));
    }

    #[test]
    fn garbage_is_malformed_payload() {
        let err = HttpTransport::decode_envelope("<html>busy</html>", 1).unwrap_err();
        assert!(matches!(err, TransportError::MalformedPayload(_)));
    }

    #[test]
    fn missing_total_defaults_to_zero() {
        let page = HttpTransport::decode_envelope(r#"{"data":{"diff":[]}}"#, 1).expect("decode");
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }
}
