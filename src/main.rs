mod arxiv;
mod avatar;
mod config;
mod document;
mod error;
mod http;
mod llm;
mod parser;
mod pipeline;
mod script;
mod speech;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::avatar::AvatarStudio;
use crate::config::Settings;
use crate::llm::OpenAiChat;
use crate::pipeline::ScriptPipeline;
use crate::speech::Synthesizer;

#[derive(Parser)]
#[command(name = "paper_reels", about = "Turn research papers into narrated avatar reels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search arXiv and download the matching PDFs
    Search {
        query: String,
        /// Max papers to fetch
        #[arg(short = 'n', long, default_value = "5")]
        max_results: usize,
        /// Print papers as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Turn local PDFs into narration scripts
    Script {
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,
        /// Also print the extracted abstract and introduction
        #[arg(long)]
        sections: bool,
    },
    /// Save a script and synthesize it to podcast_audio.mp3
    Speak {
        /// Read the script from a file
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Script text (default: read stdin)
        #[arg(long)]
        text: Option<String>,
    },
    /// Render an avatar video from an MP3
    Video { audio: PathBuf },
    /// Search + script + speech + video, one paper at a time
    Run {
        query: String,
        /// Max papers to fetch
        #[arg(short = 'n', long, default_value = "1")]
        max_results: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Search {
            query,
            max_results,
            json,
        } => cmd_search(&settings, &query, max_results, json).await,
        Commands::Script { pdfs, sections } => cmd_script(&settings, &pdfs, sections).await,
        Commands::Speak { file, text } => cmd_speak(&settings, file, text).await,
        Commands::Video { audio } => cmd_video(&settings, &audio).await,
        Commands::Run { query, max_results } => cmd_run(&settings, &query, max_results).await,
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn cmd_search(settings: &Settings, query: &str, max_results: usize, json: bool) -> anyhow::Result<()> {
    let client = http::client(settings.http_timeout())?;
    let refiner = OpenAiChat::new(client.clone(), settings.require_openai_key()?, &settings.openai)
        .with_model(settings.openai.refine_model.clone());

    let papers = arxiv::run_search(&refiner, &client, query, max_results, &settings.pdf_dir).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&papers)?);
        return Ok(());
    }
    if papers.is_empty() {
        println!("No papers found.");
        return Ok(());
    }

    println!("{:>3} | {:<60} | {:<10} | {}", "#", "Title", "Published", "PDF");
    println!("{}", "-".repeat(110));
    for (i, p) in papers.iter().enumerate() {
        let published = p
            .published
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".into());
        let file = p
            .file_path
            .as_ref()
            .map(|f| f.display().to_string())
            .unwrap_or_default();
        println!("{:>3} | {:<60} | {:<10} | {}", i + 1, truncate(&p.title, 60), published, file);
    }
    println!("\n{} papers saved to {}", papers.len(), settings.pdf_dir.display());
    Ok(())
}

async fn cmd_script(settings: &Settings, pdfs: &[PathBuf], sections: bool) -> anyhow::Result<()> {
    let pipeline = ScriptPipeline::from_settings(settings)?;
    info!("Scripting {} documents with {}", pdfs.len(), pipeline.model().model());

    let outcomes = pipeline.run(pdfs).await;
    let mut ok = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(paper) => {
                ok += 1;
                let boundary = paper
                    .boundary
                    .map(|b| format!("chunk #{}", b))
                    .unwrap_or_else(|| "none".into());
                println!(
                    "== {} ({} chunks, boundary {}) ==",
                    outcome.path.display(),
                    paper.chunk_count,
                    boundary
                );
                if sections {
                    println!("-- abstract --\n{}", paper.abstract_text);
                    println!("-- introduction --\n{}", paper.introduction_text);
                    println!("-- script --");
                }
                println!("{}\n", paper.script);
            }
            Err(e) => eprintln!("{}: {}", outcome.path.display(), e),
        }
    }

    if ok == 0 {
        bail!("no document produced a script");
    }
    println!("{} of {} documents scripted.", ok, outcomes.len());
    Ok(())
}

async fn cmd_speak(settings: &Settings, file: Option<PathBuf>, text: Option<String>) -> anyhow::Result<()> {
    let script = match (file, text) {
        (Some(path), _) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, Some(text)) => text,
        (None, None) => {
            eprintln!("Enter your podcast script (end with Ctrl+D):");
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    if script.trim().is_empty() {
        println!("No script entered.");
        return Ok(());
    }

    let synth = synthesizer(settings)?;
    let script_path = speech::save_script(&settings.output_dir, &script).await?;
    println!("Script saved to {}", script_path.display());
    let audio = synth.synthesize(&script, &settings.output_dir).await?;
    println!("Audio saved to {}", audio.display());
    Ok(())
}

async fn cmd_video(settings: &Settings, audio: &Path) -> anyhow::Result<()> {
    let (studio, avatar_id) = studio(settings)?;
    let video = studio.render(&avatar_id, audio, &settings.output_dir).await?;
    println!("Video downloaded to {}", video.display());
    Ok(())
}

async fn cmd_run(settings: &Settings, query: &str, max_results: usize) -> anyhow::Result<()> {
    let pipeline = ScriptPipeline::from_settings(settings)?;
    let synth = synthesizer(settings)?;
    let (studio, avatar_id) = studio(settings)?;
    let refiner = pipeline.model().clone().with_model(settings.openai.refine_model.clone());
    let client = http::client(settings.http_timeout())?;

    let papers = arxiv::run_search(&refiner, &client, query, max_results, &settings.pdf_dir).await?;
    let paths: Vec<PathBuf> = papers.iter().filter_map(|p| p.file_path.clone()).collect();
    if paths.is_empty() {
        println!("No papers downloaded for {:?}.", query);
        return Ok(());
    }

    let outcomes = pipeline.run(&paths).await;
    let mut videos = Vec::new();
    for outcome in outcomes {
        let paper = match outcome.result {
            Ok(paper) => paper,
            Err(e) => {
                warn!("Skipping {}: {}", outcome.path.display(), e);
                continue;
            }
        };
        let out_dir = paper_output_dir(&settings.output_dir, &outcome.path);
        match narrate(&synth, &studio, &avatar_id, &paper.script, &out_dir).await {
            Ok(video) => {
                println!("{} -> {}", outcome.path.display(), video.display());
                videos.push(video);
            }
            Err(e) => warn!("Skipping {}: {:#}", outcome.path.display(), e),
        }
    }

    println!("\n{} of {} papers rendered.", videos.len(), paths.len());
    Ok(())
}

async fn narrate(
    synth: &Synthesizer,
    studio: &AvatarStudio,
    avatar_id: &str,
    script: &str,
    out_dir: &Path,
) -> anyhow::Result<PathBuf> {
    speech::save_script(out_dir, script).await?;
    let audio = synth.synthesize(script, out_dir).await?;
    let video = studio.render(avatar_id, &audio, out_dir).await?;
    Ok(video)
}

fn synthesizer(settings: &Settings) -> anyhow::Result<Synthesizer> {
    let (api_key, voice_id) = settings.require_elevenlabs()?;
    let client = http::client(settings.http_timeout())?;
    Ok(Synthesizer::new(client, api_key, voice_id, &settings.elevenlabs))
}

fn studio(settings: &Settings) -> anyhow::Result<(AvatarStudio, String)> {
    let (api_key, avatar_id) = settings.require_heygen()?;
    let client = http::client(settings.http_timeout())?;
    Ok((AvatarStudio::new(client, api_key, &settings.heygen), avatar_id))
}

/// One subdirectory per paper so audio and video don't overwrite each other.
fn paper_output_dir(output_dir: &Path, pdf: &Path) -> PathBuf {
    match pdf.file_stem() {
        Some(stem) => output_dir.join(stem),
        None => output_dir.to_path_buf(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

// ── Tests ──
