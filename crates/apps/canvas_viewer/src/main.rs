use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canvas::{CanvasConfig, CanvasMap, MemorySurface, PixelEvent, PixelWrite};
use clap::Parser;
use foundation::{Rgba, Time};
use runtime::RenderThrottle;
use streaming::{ChunkKey, ProceduralSource};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless pixel canvas session over a procedural map")]
struct Args {
    /// JSON config file; CANVAS_* environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Terrain seed for the procedural chunk source
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Artificial latency per chunk fetch
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Number of ticks to run
    #[arg(long, default_value_t = 240)]
    frames: u32,

    /// JSONL file of pixel_update / tile_update events to replay
    #[arg(long)]
    events: Option<PathBuf>,

    /// Write the final frame as a binary PPM
    #[arg(long)]
    out: Option<PathBuf>,

    /// Outline every drawn chunk
    #[arg(long)]
    chunk_borders: bool,

    /// Make a chunk fail to load: x,y,lod (repeatable)
    #[arg(long, value_parser = parse_chunk_key)]
    fail: Vec<ChunkKey>,
}

fn parse_chunk_key(s: &str) -> Result<ChunkKey, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, lod] = parts.as_slice() else {
        return Err(format!("expected x,y,lod, got {s:?}"));
    };
    let x = x.parse::<i64>().map_err(|e| format!("bad x: {e}"))?;
    let y = y.parse::<i64>().map_err(|e| format!("bad y: {e}"))?;
    let lod = lod.parse::<u8>().map_err(|e| format!("bad lod: {e}"))?;
    Ok(ChunkKey::new(x, y, lod))
}

async fn read_events(path: &PathBuf) -> Result<Vec<PixelEvent>, std::io::Error> {
    let text = tokio::fs::read_to_string(path).await?;
    let mut events = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<PixelEvent>(line) {
            Ok(event) => events.push(event),
            Err(err) => warn!(line = line_no + 1, error = %err, "skipping event"),
        }
    }
    Ok(events)
}

/// Scripted input for one tick: drag for the first third, zoom in around the
/// middle, then paint under the cursor.
fn drive(map: &mut CanvasMap, frame: u32, frames: u32) {
    let (w, h) = {
        let vp = map.viewport();
        (vp.width, vp.height)
    };
    let result = if frame < frames / 3 {
        map.pan(-6.0, -3.0)
    } else if frame == frames / 2 {
        map.double_click(w / 2.0, h / 2.0)
    } else if frame > frames / 2 && frame < frames / 2 + 10 {
        map.wheel(-40.0, w / 2.0, h / 2.0)
    } else {
        Ok(false)
    };
    if let Err(err) = result {
        warn!(error = %err, frame, "gesture rejected");
    }

    if frame % 10 == 0
        && let Some((x, y)) = map.click(w / 2.0 + frame as f64 % 50.0, h / 2.0)
    {
        let shade = (frame % 256) as u8;
        map.place_pixel(x, y, Rgba::opaque(255, shade, 255 - shade));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => CanvasConfig::load(path)?,
        None => CanvasConfig::default(),
    };
    config.apply_env();
    config.validate()?;
    if args.chunk_borders {
        config.composer.chunk_borders = true;
    }

    let source = Arc::new(
        ProceduralSource::new(args.seed).with_latency(Duration::from_millis(args.latency_ms)),
    );
    for key in &args.fail {
        source.fail_chunk(*key);
    }
    let events = match &args.events {
        Some(path) => read_events(path).await?,
        None => Vec::new(),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<PixelWrite>();
    let forwarder = tokio::spawn(async move {
        let mut sent = 0usize;
        while let Some(write) = rx.recv().await {
            debug!(x = write.x, y = write.y, color = %write.color.to_hex(), "pixel placed");
            sent += 1;
        }
        sent
    });

    let start = Instant::now();
    let clock = || Time(start.elapsed().as_secs_f64());
    let mut map = CanvasMap::new(config, source.clone(), Handle::current(), clock())?
        .with_outbox(tx);
    info!(viewport = ?map.viewport(), frames = args.frames, "session started");

    let frame_interval = Duration::from_secs_f64(RenderThrottle::DISPLAY_INTERVAL_MS / 1000.0);
    let mut pending = events.into_iter();
    let replay_every = (args.frames / 4).max(1);
    for frame in 0..args.frames {
        drive(&mut map, frame, args.frames);
        if frame % replay_every == 0
            && let Some(event) = pending.next()
        {
            map.apply_remote(event);
        }
        let report = map.tick(clock());
        if report.loads_applied > 0 || report.evicted > 0 {
            debug!(?report, "tick");
        }
        tokio::time::sleep(frame_interval).await;
    }
    for event in pending {
        map.apply_remote(event);
    }

    let loaded = map.load_all().await;
    info!(installed = loaded.installed, fallback = loaded.fallback, "viewport settled");
    tokio::time::sleep(frame_interval).await;
    map.tick(clock());

    if let Some(path) = &args.out {
        let (w, h) = map.composer().size();
        let mut surface = MemorySurface::new(w, h)?;
        map.present(&mut surface);
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        surface.write_ppm(&mut file)?;
        info!(path = %path.display(), w, h, "frame written");
    }

    let performance = map.performance();
    debug!(
        loader = %serde_json::to_string(&map.loader().metrics().snapshot())?,
        composer = %serde_json::to_string(&map.composer().metrics().snapshot())?,
        "metrics"
    );
    map.shutdown();
    let sent = forwarder.await?;
    info!(sent, fetches = source.total_fetches(), "session finished");
    println!("{}", serde_json::to_string_pretty(&performance)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_chunk_key;
    use streaming::ChunkKey;

    #[test]
    fn parses_chunk_keys() {
        assert_eq!(parse_chunk_key("5, 5,0"), Ok(ChunkKey::new(5, 5, 0)));
        assert!(parse_chunk_key("5,5").is_err());
        assert!(parse_chunk_key("a,5,0").is_err());
    }
}
