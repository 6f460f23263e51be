use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use reqwest::{Client, Url};
use serde::Serialize;
use tracing::{info, warn};

use crate::http;
use crate::llm::{ChatModel, CompletionRequest};

const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

const REFINE_SYSTEM_PROMPT: &str = "You are a research assistant helping refine academic search queries for better arXiv results. You are working for a content creator that will produce reels, so the papers you find should be hyped and interesting";

/// Paper metadata from the arXiv Atom feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Paper {
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub published: Option<DateTime<Utc>>,
    pub url: String,
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

/// Ask the model for a sharper arXiv query. Any failure falls back to the
/// user's query unchanged.
pub async fn refine_query(model: &dyn ChatModel, user_query: &str) -> String {
    let prompt = format!(
        "Refine the following academic search query for arXiv to be more specific and relevant:\n\nOriginal query: \"{}\"\n\nImproved query:",
        user_query
    );
    let answer = model
        .complete(&CompletionRequest {
            system: REFINE_SYSTEM_PROMPT,
            user: &prompt,
            temperature: 0.3,
            max_tokens: None,
            json: false,
        })
        .await;

    match answer {
        Ok(text) => {
            let refined = text.trim().trim_matches('"').trim();
            if refined.is_empty() {
                user_query.to_string()
            } else {
                refined.to_string()
            }
        }
        Err(e) => {
            warn!("Query refinement failed ({}), using original query", e);
            user_query.to_string()
        }
    }
}

/// Query the arXiv API and return the matching papers.
pub async fn search(client: &Client, query: &str, max_results: usize) -> Result<Vec<Paper>> {
    let url = Url::parse_with_params(
        ARXIV_API_URL,
        &[
            ("search_query", format!("all:{}", query)),
            ("start", "0".to_string()),
            ("max_results", max_results.to_string()),
        ],
    )?;

    info!("Searching arXiv: {}", query);
    let xml = http::send_checked("arxiv", client.get(url))
        .await?
        .text()
        .await
        .context("Failed to read arXiv response")?;

    let papers = parse_feed(&xml)?;
    info!("arXiv returned {} papers", papers.len());
    Ok(papers)
}

/// Save the paper's PDF under `dir`. Papers without a PDF link are skipped.
pub async fn download_pdf(client: &Client, paper: &Paper, dir: &Path) -> Result<Option<PathBuf>> {
    let Some(pdf_url) = paper.pdf_url.as_deref() else {
        warn!("No PDF link for {:?}", paper.title);
        return Ok(None);
    };

    let bytes = http::send_checked("arxiv", client.get(pdf_url))
        .await?
        .bytes()
        .await
        .with_context(|| format!("Failed to download {}", pdf_url))?;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(pdf_file_name(pdf_url));
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("PDF saved to {} ({} bytes)", path.display(), bytes.len());
    Ok(Some(path))
}

/// Refine → search → download. Returns the papers whose PDF was saved.
pub async fn run_search(
    refiner: &dyn ChatModel,
    client: &Client,
    user_query: &str,
    max_results: usize,
    pdf_dir: &Path,
) -> Result<Vec<Paper>> {
    info!("Original query: {}", user_query);
    let refined = refine_query(refiner, user_query).await;
    info!("Refined query: {}", refined);

    let papers = search(client, &refined, max_results).await?;
    if papers.is_empty() {
        warn!("No papers found for {:?}", refined);
        return Ok(papers);
    }

    let mut downloaded = Vec::with_capacity(papers.len());
    for mut paper in papers {
        if let Some(path) = download_pdf(client, &paper, pdf_dir).await? {
            paper.file_path = Some(path);
            downloaded.push(paper);
        }
    }
    Ok(downloaded)
}

fn pdf_file_name(pdf_url: &str) -> String {
    let last = pdf_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("paper");
    if last.ends_with(".pdf") {
        last.to_string()
    } else {
        format!("{}.pdf", last)
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Id,
    Published,
    Title,
    Summary,
    AuthorName,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"id" => Some(Field::Id),
            b"published" => Some(Field::Published),
            b"title" => Some(Field::Title),
            b"summary" => Some(Field::Summary),
            b"name" => Some(Field::AuthorName),
            _ => None,
        }
    }
}

/// Parse an Atom feed and return one `Paper` per `<entry>`.
fn parse_feed(xml: &str) -> Result<Vec<Paper>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut entry: Option<Paper> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"entry" => entry = Some(Paper::default()),
                b"link" => {
                    if let Some(paper) = entry.as_mut() {
                        read_link(&e, paper)?;
                    }
                }
                tag if entry.is_some() => {
                    field = Field::from_tag(tag);
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"link" => {
                if let Some(paper) = entry.as_mut() {
                    read_link(&e, paper)?;
                }
            }
            Ok(Event::Text(e)) if field.is_some() => text.push_str(&e.unescape()?),
            Ok(Event::CData(e)) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"entry" => {
                    if let Some(paper) = entry.take() {
                        papers.push(paper);
                    }
                }
                _ => {
                    if let (Some(f), Some(paper)) = (field.take(), entry.as_mut()) {
                        set_field(paper, f, &text);
                    }
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }
    Ok(papers)
}

fn set_field(paper: &mut Paper, field: Field, raw: &str) {
    let value = collapse_whitespace(raw);
    match field {
        Field::Id => paper.url = value,
        Field::Title => paper.title = value,
        Field::Summary => paper.summary = value,
        Field::AuthorName => paper.authors.push(value),
        Field::Published => match DateTime::parse_from_rfc3339(&value) {
            Ok(ts) => paper.published = Some(ts.with_timezone(&Utc)),
            Err(e) => warn!("Unparseable published date {:?}: {}", value, e),
        },
    }
}

fn read_link(e: &BytesStart<'_>, paper: &mut Paper) -> Result<()> {
    let is_pdf = match e.try_get_attribute("type")? {
        Some(attr) => attr.unescape_value()? == "application/pdf",
        None => false,
    };
    if is_pdf && paper.pdf_url.is_none() {
        if let Some(href) = e.try_get_attribute("href")? {
            paper.pdf_url = Some(href.unescape_value()?.to_string());
        }
    }
    Ok(())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ──
