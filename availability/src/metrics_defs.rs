//! Metrics definitions for the availability pipeline.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
    ($def:expr, $($label:expr => $value:expr),+ $(,)?) => {
        metrics::counter!($def.name, $($label => $value),+)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
    ($def:expr, $($label:expr => $value:expr),+ $(,)?) => {
        metrics::histogram!($def.name, $($label => $value),+)
    };
}

pub const STATUS_CACHE_HIT: MetricDef = MetricDef {
    name: "status_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of existence lookups answered from the status cache",
};

pub const STATUS_CACHE_MISS: MetricDef = MetricDef {
    name: "status_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of existence lookups that missed the status cache",
};

pub const STATUS_CACHE_EXPIRED: MetricDef = MetricDef {
    name: "status_cache.expired",
    metric_type: MetricType::Counter,
    description: "Number of status cache entries purged on read after expiry",
};

pub const ID_MAP_CACHE_HIT: MetricDef = MetricDef {
    name: "id_map_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of primary ids resolved from the mapping cache",
};

pub const ID_MAP_CACHE_MISS: MetricDef = MetricDef {
    name: "id_map_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of primary ids that missed the mapping cache",
};

pub const STORE_WRITE_FAILED: MetricDef = MetricDef {
    name: "store.write_failed",
    metric_type: MetricType::Counter,
    description: "Number of cache writes dropped because the persistent store failed",
};

pub const BATCH_SENT: MetricDef = MetricDef {
    name: "batch.sent",
    metric_type: MetricType::Counter,
    description: "Number of bulk requests issued, tagged by stage",
};

pub const BATCH_SIZE: MetricDef = MetricDef {
    name: "batch.size",
    metric_type: MetricType::Histogram,
    description: "Number of distinct ids per bulk request, tagged by stage",
};

pub const BATCH_RATE_LIMITED: MetricDef = MetricDef {
    name: "batch.rate_limited",
    metric_type: MetricType::Counter,
    description: "Number of bulk requests rejected with 429, tagged by stage",
};

pub const BATCH_FAILED: MetricDef = MetricDef {
    name: "batch.failed",
    metric_type: MetricType::Counter,
    description: "Number of bulk requests that failed in transport, tagged by stage",
};

pub const DELIVERED: MetricDef = MetricDef {
    name: "delivered",
    metric_type: MetricType::Counter,
    description: "Number of results delivered to waiters, tagged by status",
};

// TODO: all metrics must be added here for now, this can be done dynamically with a macro in the future.
pub const ALL_METRICS: &[MetricDef] = &[
    STATUS_CACHE_HIT,
    STATUS_CACHE_MISS,
    STATUS_CACHE_EXPIRED,
    ID_MAP_CACHE_HIT,
    ID_MAP_CACHE_MISS,
    STORE_WRITE_FAILED,
    BATCH_SENT,
    BATCH_SIZE,
    BATCH_RATE_LIMITED,
    BATCH_FAILED,
    DELIVERED,
];

/// Registers descriptions for every metric with the installed recorder.
pub fn describe_all() {
    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}
