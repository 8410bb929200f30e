//! iptv-guide: parse a playlist and merge guide files into one program guide

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iptv_guide::epg::format_span;
use iptv_guide::{parse_m3u, Guide, GuideConfig, GuideSource, NaiveTimePolicy};

#[derive(Parser, Debug)]
#[command(name = "iptv-guide", version, about)]
struct Args {
    /// JSON config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// M3U playlist file
    #[arg(short, long)]
    playlist: Option<PathBuf>,

    /// Guide file as LABEL=PATH or PATH; repeat to merge several sources
    #[arg(short, long = "guide")]
    guides: Vec<String>,

    /// Guide as LABEL=PATH loaded last, replacing the merged guides
    #[arg(short, long, value_name = "GUIDE")]
    replace: Option<String>,

    /// Read timestamps without a zone as local time instead of UTC
    #[arg(long)]
    local_time: bool,

    /// Print the merged guide as JSON
    #[arg(long)]
    json: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("iptv_guide={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GuideConfig::load(path)?,
        None => GuideConfig::load_or_default(),
    };

    if args.playlist.is_some() {
        config.playlist = args.playlist.clone();
    }
    if !args.guides.is_empty() {
        config.guides = args.guides.iter().map(|g| guide_source(g)).collect();
    }
    if let Some(replace) = &args.replace {
        config.replace = Some(guide_source(replace));
    }
    if args.local_time {
        config.naive_time = NaiveTimePolicy::Local;
    }

    if config.playlist.is_none() && config.guides.is_empty() && config.replace.is_none() {
        bail!("nothing to do: pass --playlist and/or --guide, or list them in the config file");
    }

    let parser = config.guide_parser();
    let mut guide = Guide::new();

    for (source, mode) in config.merge_plan() {
        let xml = fs::read_to_string(&source.path)
            .with_context(|| format!("reading guide {}", source.path.display()))?;

        // One bad source does not stop the others
        let snapshot = match parser.parse(&xml) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(source = %source.label, "{}", e);
                continue;
            }
        };

        guide.merge(snapshot, &source.label, mode);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&guide)?);
        return Ok(());
    }

    let Some(playlist) = &config.playlist else {
        info!(
            "{} channels, {} programmes",
            guide.channel_count(),
            guide.programme_count()
        );
        return Ok(());
    };

    let content = fs::read_to_string(playlist)
        .with_context(|| format!("reading playlist {}", playlist.display()))?;
    let channels = parse_m3u(&content).with_context(|| format!("parsing {}", playlist.display()))?;

    let now = Utc::now();
    for channel in &channels {
        let name = channel.name.as_deref().unwrap_or("<unnamed>");
        let tvg_id = channel.tvg_id.as_deref().unwrap_or("-");
        let guide_name = guide
            .channel_for(channel)
            .map(|c| c.display_name.as_str())
            .unwrap_or("-");
        let programmes = guide.programmes_for(channel);
        let on_now = channel
            .tvg_id
            .as_deref()
            .and_then(|id| guide.current_programme(id, now))
            .map(|p| format!("{} {}", format_span(p), p.title))
            .unwrap_or_default();

        println!(
            "{}\t{}\t{}\t{}\t{}",
            name,
            tvg_id,
            guide_name,
            programmes.len(),
            on_now
        );
    }

    info!("{} playlist channels", channels.len());
    Ok(())
}

/// `label=path`, or a bare path labelled by itself
fn guide_source(arg: &str) -> GuideSource {
    match arg.split_once('=') {
        Some((label, path)) if !label.is_empty() => GuideSource {
            label: label.to_string(),
            path: PathBuf::from(path),
        },
        _ => GuideSource {
            label: arg.to_string(),
            path: PathBuf::from(arg),
        },
    }
}
