use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_RANGE};
use reqwest::Client;
use url::Url;

use crate::model::{DateRange, Row};
use crate::platform::PlatformSource;

use super::RowSource;

/// Supabase (PostgREST) access to the platform tables.
pub struct RestSource {
    http: Client,
    base: Url,
    api_key: String,
}

impl RestSource {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url).with_context(|| format!("invalid SUPABASE_URL: {}", base_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base, api_key })
    }

    fn table_url(&self, src: &PlatformSource, range: &DateRange) -> Result<Url> {
        let table = src.table.rsplit('.').next().unwrap_or(&src.table);
        let mut url = self.base.join(&format!("rest/v1/{}", table))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("select", "*");
            q.append_pair(&src.date_column, &format!("gte.{}", range.start()));
            q.append_pair(&src.date_column, &format!("lte.{}", range.end()));
        }
        Ok(url)
    }

    fn page_url(&self, src: &PlatformSource, range: &DateRange, offset: i64, limit: i64) -> Result<Url> {
        let mut url = self.table_url(src, range)?;
        url.query_pairs_mut()
            .append_pair("order", &format!("{}.asc,{}.asc", src.date_column, src.order_key))
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    fn headers(&self, src: &PlatformSource) -> Result<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert("apikey", HeaderValue::from_str(&self.api_key)?);
        h.insert(reqwest::header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", self.api_key))?);
        // schema-qualified tables select the schema through the profile header
        if let Some((schema, _)) = src.table.split_once('.') {
            h.insert("Accept-Profile", HeaderValue::from_str(schema)?);
        }
        Ok(h)
    }
}

/// Total from a PostgREST `Content-Range` header: `0-24/3573` or `*/3573`.
pub fn parse_content_range_total(v: &str) -> Option<i64> {
    let (_, total) = v.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

#[async_trait]
impl RowSource for RestSource {
    async fn count(&self, source: &PlatformSource, range: &DateRange) -> Result<i64> {
        let resp = self
            .http
            .head(self.table_url(source, range)?)
            .headers(self.headers(source)?)
            .header("Prefer", "count=exact")
            .send()
            .await
            .with_context(|| format!("count {}", source.table))?;
        let status = resp.status();
        if !status.is_success() { bail!("count {} failed: HTTP {}", source.table, status); }
        let total = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);
        match total {
            Some(n) => Ok(n),
            None => bail!("count {}: missing Content-Range total", source.table),
        }
    }

    async fn fetch_page(&self, source: &PlatformSource, range: &DateRange, offset: i64, limit: i64) -> Result<Vec<Row>> {
        let resp = self
            .http
            .get(self.page_url(source, range, offset, limit)?)
            .headers(self.headers(source)?)
            .send()
            .await
            .with_context(|| format!("select {} offset={} limit={}", source.table, offset, limit))?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            bail!("select {} failed: HTTP {}: {}", source.table, status, body.chars().take(300).collect::<String>());
        }
        let rows: Vec<Row> = serde_json::from_str(&body).with_context(|| format!("decode {} page", source.table))?;
        Ok(rows)
    }

    fn backend(&self) -> &'static str { "supabase" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;

    fn src() -> RestSource { RestSource::new("https://abc.supabase.co", "k".into(), Duration::from_secs(5)).unwrap() }

    #[test]
    fn content_range_total() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn page_url_filters_orders_and_paginates() {
        let s = PlatformSource::new(Platform::GoogleAds, "google_ads_data", "day").unwrap();
        let r = DateRange::parse(Some("2024-01-01"), Some("2024-01-31")).unwrap();
        let url = src().page_url(&s, &r, 1000, 500).unwrap();
        assert_eq!(url.path(), "/rest/v1/google_ads_data");
        let pairs: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert_eq!(pairs, vec![
            ("select".to_string(), "*".to_string()),
            ("day".to_string(), "gte.2024-01-01".to_string()),
            ("day".to_string(), "lte.2024-01-31".to_string()),
            ("order".to_string(), "day.asc,id.asc".to_string()),
            ("offset".to_string(), "1000".to_string()),
            ("limit".to_string(), "500".to_string()),
        ]);
    }

    #[test]
    fn shared_dates_are_ordered_by_the_order_key() {
        let s = PlatformSource::new(Platform::MetaAds, "meta_ads_data", "date").unwrap().with_order_key("ad_row_id").unwrap();
        let r = DateRange::parse(Some("2024-01-01"), Some("2024-01-01")).unwrap();
        let first = src().page_url(&s, &r, 0, 2).unwrap();
        let second = src().page_url(&s, &r, 2, 2).unwrap();
        for url in [&first, &second] {
            let order: Vec<String> = url.query_pairs().filter(|(k, _)| k == "order").map(|(_, v)| v.into_owned()).collect();
            assert_eq!(order, vec!["date.asc,ad_row_id.asc"]);
        }
    }

    #[test]
    fn schema_goes_to_profile_header() {
        let s = PlatformSource::new(Platform::Shopify, "analytics.shopify_data", "date").unwrap();
        let h = src().headers(&s).unwrap();
        assert_eq!(h.get("Accept-Profile").unwrap(), "analytics");
        assert_eq!(h.get("authorization").unwrap(), "Bearer k");
    }
}
