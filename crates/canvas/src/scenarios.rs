//! End-to-end behaviour of the canvas core over a procedural source.

use std::sync::Arc;

use foundation::{Rgba, Time, Vec2, Viewport, ViewportPatch};
use pretty_assertions::assert_eq;
use streaming::{ChunkKey, ChunkState, ChunkStore, ProceduralSource, StoreConfig};
use tokio::runtime::Handle;

use crate::config::CanvasConfig;
use crate::map::CanvasMap;

/// 1024×1024 map with 32 px chunks, small enough for debug builds.
fn small_config() -> CanvasConfig {
    let mut config = CanvasConfig::default();
    config.limits.map_width = 1024.0;
    config.limits.map_height = 1024.0;
    config.limits.min_zoom = 0.25;
    config.store.chunk_size = 32;
    config.store.map_width = 1024.0;
    config.store.map_height = 1024.0;
    config.initial_viewport = Viewport::new(0.0, 0.0, 1.0, 120.0, 100.0);
    config
}

fn open(config: CanvasConfig, src: &Arc<ProceduralSource>) -> CanvasMap {
    CanvasMap::new(config, src.clone(), Handle::current(), Time::ZERO).unwrap()
}

#[test]
fn initial_viewport_requires_padded_native_grid() {
    let mut store = ChunkStore::new(StoreConfig::default());
    let bounds = Viewport::new(0.0, 0.0, 1.0, 800.0, 600.0).bounds();
    let mut keys: Vec<ChunkKey> = store
        .required_chunks(&bounds, Time::ZERO)
        .into_iter()
        .map(|r| r.key)
        .collect();
    keys.sort();

    let mut expected = Vec::new();
    for x in 0..=5 {
        for y in 0..=4 {
            expected.push(ChunkKey::new(x, y, 2));
        }
    }
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn pinch_zooms_about_the_fingers() {
    let src = Arc::new(ProceduralSource::new(10));
    let mut config = CanvasConfig::default();
    config.initial_viewport = Viewport::new(1000.0, 1000.0, 1.0, 800.0, 600.0);
    let mut map = open(config, &src);

    let anchor = Vec2::new(400.0, 300.0);
    let before = map.viewport().screen_to_world(anchor);
    assert!(map.pinch(100.0, 200.0, anchor.x, anchor.y).unwrap());

    let vp = map.viewport();
    assert_eq!(vp.zoom, 2.0);
    let after = vp.screen_to_world(anchor);
    assert!(before.distance(after) < 1.0, "{before:?} vs {after:?}");
    // Zoom 2 selects the next LOD up.
    assert!(map.visible_chunks().iter().all(|k| k.lod == 3));
}

#[tokio::test]
async fn local_writes_do_not_refetch_until_invalidated() {
    let src = Arc::new(ProceduralSource::new(11));
    let mut map = open(small_config(), &src);
    map.load_all().await;
    let key = ChunkKey::new(0, 0, 2);
    assert_eq!(src.fetch_count(key), 1);

    for i in 0..300 {
        let (x, y) = (i % 32, i / 32);
        map.place_pixel(x, y, Rgba::opaque(i as u8, 0, 0));
    }
    map.load_all().await;
    assert_eq!(src.fetch_count(key), 1);

    assert_eq!(map.invalidate(5, 5, Some(2)), 1);
    map.load_all().await;
    assert_eq!(src.fetch_count(key), 2);
    assert_eq!(map.store().state(key), Some(ChunkState::Resident));
}

#[tokio::test]
async fn failed_chunk_renders_as_fallback() {
    let src = Arc::new(ProceduralSource::new(12));
    src.fail_chunk(ChunkKey::new(5, 5, 0));
    let mut config = small_config();
    // Zoom 0.25 picks LOD 0, where a chunk spans 128 world px.
    config.initial_viewport = Viewport::new(544.0, 624.0, 0.25, 120.0, 100.0);
    let mut map = open(config, &src);

    map.load_all().await;
    map.tick(Time(1.0));

    assert_eq!(
        map.store().state(ChunkKey::new(5, 5, 0)),
        Some(ChunkState::Fallback)
    );
    // Screen (40, 20) is world (704, 704).
    assert_eq!(map.front_frame().pixel(40, 20), Some(Rgba::FALLBACK));
    assert_ne!(map.front_frame().pixel(5, 90), Some(Rgba::FALLBACK));
}

#[tokio::test]
async fn placed_pixel_fills_its_block_when_zoomed_in() {
    let src = Arc::new(ProceduralSource::new(13));
    let mut config = small_config();
    config.initial_viewport = Viewport::new(0.0, 0.0, 4.0, 120.0, 100.0);
    let mut map = open(config, &src);
    map.load_all().await;

    let lime = Rgba::opaque(0, 255, 0);
    map.place_pixel(3, 2, lime);
    map.tick(Time(1.0));

    let front = map.front_frame();
    for (sx, sy) in [(12, 8), (15, 8), (12, 11), (15, 11)] {
        assert_eq!(front.pixel(sx, sy), Some(lime), "screen ({sx}, {sy})");
    }
    assert_ne!(front.pixel(16, 8), Some(lime));
    assert_eq!(map.click(13.0, 9.0), Some((3, 2)));
}

#[tokio::test]
async fn sweep_keeps_cache_within_limit() {
    let src = Arc::new(ProceduralSource::new(14));
    let mut config = small_config();
    config.store.cache_limit = 40;
    config.store.sweep_slack = 0;
    config.sweep_interval_ms = 300.0;
    let mut map = open(config, &src);

    for x in [0.0, 300.0, 600.0, 900.0] {
        map.set_viewport(ViewportPatch::position(x, x)).unwrap();
        map.load_all().await;
    }
    // Let the preload pass run before the sweep is due.
    map.tick(Time(0.15));
    map.load_all().await;
    assert!(map.store().len() > 40);

    // Nothing is older than the 60 s staleness threshold yet.
    assert_eq!(map.config().store.stale_after_ms, 60_000.0);
    let report = map.tick(Time(0.5));
    assert!(report.evicted > 0);
    assert!(map.store().len() <= 40 + map.loader().in_flight_count());
    for key in map.visible_chunks() {
        assert!(map.store().peek(*key).is_some(), "{key} evicted while visible");
    }
}

#[tokio::test]
async fn gestures_inside_one_throttle_window_collapse() {
    let src = Arc::new(ProceduralSource::new(15));
    let mut map = open(small_config(), &src);
    assert!(map.tick(Time::ZERO).composed);

    for _ in 0..5 {
        map.pan(-20.0, 0.0).unwrap();
    }
    assert!(!map.tick(Time(0.005)).composed);
    assert!(map.composer().queue_len() >= 5);

    assert!(map.tick(Time(0.02)).composed);
    assert_eq!(map.composer().queue_len(), 0);
    assert_eq!(map.composer().stats().frames_rendered, 2);
    assert_eq!(map.composer().front_bounds(), Some(map.bounds()));
}
