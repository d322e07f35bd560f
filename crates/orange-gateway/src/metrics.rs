use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Admission outcomes: pass_through, checked, rejected
pub static ADMISSIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_admissions_total", "Admission decisions by outcome"),
        &["outcome"],
    )
    .unwrap()
});

// Requests refused before admission, by error code
pub static AUTH_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gateway_auth_failures_total",
            "Requests rejected during authentication",
        ),
        &["reason"],
    )
    .unwrap()
});

// Requests refused because the client address is blocked
pub static IP_BLOCKED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gateway_ip_blocked_requests_total",
        "Requests refused from blocked client addresses",
    )
    .unwrap()
});

// Rate limit violations by outcome: counted, suspicious, blocked, ignored, error
pub static IP_VIOLATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gateway_ip_violations_total",
            "Rate limit violations recorded per outcome",
        ),
        &["outcome"],
    )
    .unwrap()
});

// Proxy metrics
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gateway_proxy_requests_total",
        "Total number of proxied requests",
    )
    .unwrap()
});

pub static PROXY_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("gateway_proxy_latency_seconds", "Proxy request latency")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .unwrap()
});

/// Register all metrics with the registry
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(ADMISSIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(IP_BLOCKED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(IP_VIOLATIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PROXY_REQUESTS_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(PROXY_LATENCY.clone())).unwrap();
}
