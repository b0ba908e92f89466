use anyhow::Result;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::models::RawResult;

lazy_static! {
    static ref ROW_SELECTOR: Selector = Selector::parse("table.torrent-list tbody tr").unwrap();
    static ref TD_SELECTOR: Selector = Selector::parse("td").unwrap();
    static ref LINK_SELECTOR: Selector = Selector::parse("a").unwrap();
    static ref MAGNET_SELECTOR: Selector = Selector::parse("a[href^='magnet:']").unwrap();
}

pub struct SearchScraper {
    client: reqwest::Client,
    base_url: String,
}

impl SearchScraper {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn search_url(&self, uploader: &str) -> String {
        format!("{}/user/{}", self.base_url, urlencoding::encode(uploader))
    }

    pub async fn try_search(&self, uploader: &str, query: &str) -> Result<Vec<RawResult>> {
        let search_url = self.search_url(uploader);
        info!("Searching: {} for {:?}", search_url, query);

        let response = self
            .client
            .get(&search_url)
            .query(&[("f", "0"), ("c", "0_0"), ("q", query)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("HTTP error: {}", response.status()));
        }

        let html_content = response.text().await?;

        if std::env::var("DEBUG_HTML").is_ok() {
            std::fs::write("debug_search_results.html", &html_content)?;
            info!("Saved HTML to debug_search_results.html");
        }

        Ok(parse_search_results(&html_content))
    }

    /// Fetches the listing for `{uploader, query}`. Failures are logged and
    /// reported as no results.
    pub async fn search(&self, uploader: &str, query: &str) -> Vec<RawResult> {
        match self.try_search(uploader, query).await {
            Ok(results) => results,
            Err(e) => {
                warn!(uploader, query, "Search failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn parse_row(row: ElementRef) -> Option<RawResult> {
    let cells: Vec<_> = row.select(&TD_SELECTOR).collect();
    if cells.len() < 5 {
        return None;
    }

    // The name cell may lead with a comment-count link; the title is the last one.
    let title = cells[1]
        .select(&LINK_SELECTOR)
        .last()
        .map(|link| cell_text(&link))
        .filter(|t| !t.is_empty())?;

    let magnet_link = row
        .select(&MAGNET_SELECTOR)
        .next()
        .and_then(|a| a.value().attr("href"))
        .unwrap_or("")
        .to_string();

    let size = cell_text(&cells[3]);

    let timestamp = cells[4]
        .value()
        .attr("data-timestamp")
        .and_then(|ts| ts.trim().parse::<i64>().ok())
        .unwrap_or(0);

    Some(RawResult {
        title,
        magnet_link,
        size,
        timestamp,
    })
}

pub fn parse_search_results(html: &str) -> Vec<RawResult> {
    let document = Html::parse_document(html);
    let results: Vec<RawResult> = document.select(&ROW_SELECTOR).filter_map(parse_row).collect();
    debug!("Found {} results", results.len());
    results
}
