mod range;

pub use range::{gap_fill, to_metric_series, MetricSeries, RangeQueryEngine, SeriesPoint, METRIC_LABELS};
