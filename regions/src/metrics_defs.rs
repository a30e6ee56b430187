//! Metrics definitions for the region cache.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "regions.cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of region lookups served from a fresh cached snapshot",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "regions.cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of region lookups that found the cache empty or expired",
};

pub const CACHE_REFRESH: MetricDef = MetricDef {
    name: "regions.cache.refresh",
    metric_type: MetricType::Counter,
    description: "Number of cache refreshes. Tagged with source (backend, fallback).",
};

pub const BACKEND_FETCH_DURATION: MetricDef = MetricDef {
    name: "regions.backend.fetch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to list regions from the backend in seconds",
};

pub const BACKEND_RETRIES: MetricDef = MetricDef {
    name: "regions.backend.retries",
    metric_type: MetricType::Counter,
    description: "Number of retried backend requests",
};

pub const BACKEND_ERRORS: MetricDef = MetricDef {
    name: "regions.backend.errors",
    metric_type: MetricType::Counter,
    description: "Number of failed backend region listings that triggered the fallback table",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_HIT,
    CACHE_MISS,
    CACHE_REFRESH,
    BACKEND_FETCH_DURATION,
    BACKEND_RETRIES,
    BACKEND_ERRORS,
];
