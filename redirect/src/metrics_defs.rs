//! Metrics definitions for the redirect service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "redirect.requests",
    metric_type: MetricType::Counter,
    description: "Number of storefront requests. Tagged with action (forward, redirect, set_cookie).",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "redirect.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time to answer a storefront request in seconds. Tagged with action.",
};

pub const UPSTREAM_ERRORS: MetricDef = MetricDef {
    name: "redirect.upstream.errors",
    metric_type: MetricType::Counter,
    description: "Number of forwarded requests that failed or timed out",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUESTS, REQUEST_DURATION, UPSTREAM_ERRORS];
