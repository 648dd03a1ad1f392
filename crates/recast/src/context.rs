//! Build context providing profiling spans for the generation stages
//!
//! Every stage of a build is timed as a named span. Finished spans are
//! aggregated per category on the context and also forwarded to a
//! [`MetricsSink`], so callers decide where timings end up (the `log`
//! facade, an in-memory buffer for tests, or nowhere).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use web_time::Instant;

/// Timer categories for performance profiling
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerCategory {
    /// Total navigation mesh generation time
    Total,
    /// Collider extraction from the physics world
    Extraction,
    /// Building or reusing the cached static tiles
    StaticTiles,
    /// Heightfield rasterization
    Rasterization,
    /// Heightfield filtering
    Filtering,
    /// Compact heightfield building
    CompactHeightfield,
    /// Walkable area erosion
    Erosion,
    /// Distance field computation
    DistanceField,
    /// Region building
    Regions,
    /// Contour extraction
    Contours,
    /// Polygon mesh generation
    PolyMesh,
    /// Detail mesh generation
    DetailMesh,
    /// Carving obstacles into a compact heightfield
    Stamping,
    /// Writing tiles into the navigation mesh
    Assembly,
    /// Custom user-defined timer
    Custom(String),
}

impl TimerCategory {
    /// Stable, human readable span name
    pub fn name(&self) -> &str {
        match self {
            TimerCategory::Total => "total",
            TimerCategory::Extraction => "extraction",
            TimerCategory::StaticTiles => "static_tiles",
            TimerCategory::Rasterization => "rasterization",
            TimerCategory::Filtering => "filtering",
            TimerCategory::CompactHeightfield => "compact_heightfield",
            TimerCategory::Erosion => "erosion",
            TimerCategory::DistanceField => "distance_field",
            TimerCategory::Regions => "regions",
            TimerCategory::Contours => "contours",
            TimerCategory::PolyMesh => "poly_mesh",
            TimerCategory::DetailMesh => "detail_mesh",
            TimerCategory::Stamping => "stamping",
            TimerCategory::Assembly => "assembly",
            TimerCategory::Custom(name) => name,
        }
    }
}

impl fmt::Display for TimerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A finished span
#[derive(Debug, Clone)]
pub struct SpanEvent {
    /// What was measured
    pub category: TimerCategory,
    /// Tile the span belongs to, if any
    pub tile: Option<(i32, i32)>,
    /// When the span started
    pub started_at: Instant,
    /// How long it took
    pub duration: Duration,
}

/// Destination for finished spans
pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn record(&self, event: &SpanEvent);
}

/// Discards every span
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&self, _event: &SpanEvent) {}
}

/// Writes spans to the `log` facade at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&self, event: &SpanEvent) {
        match event.tile {
            Some((x, y)) => log::debug!(
                "span {} tile ({}, {}) took {:.3}ms",
                event.category,
                x,
                y,
                event.duration.as_secs_f64() * 1000.0
            ),
            None => log::debug!(
                "span {} took {:.3}ms",
                event.category,
                event.duration.as_secs_f64() * 1000.0
            ),
        }
    }
}

/// Keeps every span in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SpanEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded spans
    pub fn events(&self) -> Vec<SpanEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of recorded spans for a category
    pub fn count(&self, category: &TimerCategory) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| &e.category == category).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, event: &SpanEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Aggregated timings for one category
#[derive(Debug, Clone)]
pub struct TimerEntry {
    /// Timer category
    pub category: TimerCategory,
    /// Accumulated duration
    pub duration: Duration,
    /// Number of times this timer was used
    pub count: usize,
}

/// Context for build operations providing profiling spans
#[derive(Debug, Clone)]
pub struct RecastContext {
    /// Where finished spans are sent
    sink: Arc<dyn MetricsSink>,
    /// Active timers
    active_timers: HashMap<TimerCategory, Instant>,
    /// Completed timer entries
    timers: HashMap<TimerCategory, TimerEntry>,
    /// Tile attached to spans started from now on
    current_tile: Option<(i32, i32)>,
    /// Whether to enable performance timing
    enable_timing: bool,
}

impl Default for RecastContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RecastContext {
    /// Creates a context that only aggregates timings locally
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NullSink))
    }

    /// Creates a context forwarding every finished span to `sink`
    pub fn with_sink(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            active_timers: HashMap::new(),
            timers: HashMap::new(),
            current_tile: None,
            enable_timing: true,
        }
    }

    /// Enables or disables performance timing
    pub fn set_timing_enabled(&mut self, enabled: bool) {
        self.enable_timing = enabled;
    }

    /// Tags subsequent spans with a tile coordinate
    pub fn set_tile(&mut self, tile: Option<(i32, i32)>) {
        self.current_tile = tile;
    }

    /// Starts a timer for the given category
    pub fn start_span(&mut self, category: TimerCategory) {
        if self.enable_timing {
            self.active_timers.insert(category, Instant::now());
        }
    }

    /// Stops a timer, records the duration and emits the span
    pub fn end_span(&mut self, category: TimerCategory) -> Option<Duration> {
        if !self.enable_timing {
            return None;
        }
        let started_at = self.active_timers.remove(&category)?;
        let duration = started_at.elapsed();

        let entry = self
            .timers
            .entry(category.clone())
            .or_insert_with(|| TimerEntry {
                category: category.clone(),
                duration: Duration::ZERO,
                count: 0,
            });
        entry.duration += duration;
        entry.count += 1;

        self.sink.record(&SpanEvent {
            category,
            tile: self.current_tile,
            started_at,
            duration,
        });
        Some(duration)
    }

    /// Runs `f` inside a span of `category`
    pub fn time<T>(&mut self, category: TimerCategory, f: impl FnOnce(&mut Self) -> T) -> T {
        self.start_span(category.clone());
        let result = f(self);
        self.end_span(category);
        result
    }

    /// Gets the total duration for a completed timer
    pub fn get_timer_duration(&self, category: &TimerCategory) -> Option<Duration> {
        self.timers.get(category).map(|entry| entry.duration)
    }

    /// Gets the count for a timer (how many times it was used)
    pub fn get_timer_count(&self, category: &TimerCategory) -> usize {
        self.timers
            .get(category)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Gets all timer entries
    pub fn get_timers(&self) -> &HashMap<TimerCategory, TimerEntry> {
        &self.timers
    }

    /// Clears all timers
    pub fn clear_timers(&mut self) {
        self.active_timers.clear();
        self.timers.clear();
    }

    /// One line per category, slowest first
    pub fn timer_summary(&self) -> String {
        let mut sorted: Vec<_> = self.timers.values().collect();
        sorted.sort_by(|a, b| b.duration.cmp(&a.duration));

        let mut out = String::new();
        for entry in sorted {
            let ms = entry.duration.as_secs_f64() * 1000.0;
            out.push_str(&format!(
                "{:20} {:8.2}ms ({} calls, avg: {:.2}ms)\n",
                entry.category.name(),
                ms,
                entry.count,
                ms / entry.count.max(1) as f64
            ));
        }
        out
    }
}
