use serde::{Deserialize, Serialize};

/// A single metric sample discovered by a bridge's metric source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Class of entity the sample describes (e.g., "queue", "exchange").
    pub category: String,

    /// Entity name, the subject of ignore rules (e.g., "amq.direct").
    pub name: String,

    /// Optional grouping scope of the entity (e.g., a virtual host).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Dotted field path of the measurement (e.g., "message_stats.publish").
    pub metric: String,

    /// The measured value.
    pub value: f64,
}

impl MetricSample {
    /// Create a new unscoped sample.
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        metric: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            scope: None,
            metric: metric.into(),
            value,
        }
    }

    /// Attach a scope to this sample.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Statsd-safe metric path: `category[.scope].name.metric`.
    ///
    /// Category, scope and name are each sanitised into a single segment.
    /// The metric keeps its dots so nested fields stay hierarchical.
    pub fn path(&self) -> String {
        let mut path = sanitize_segment(&self.category);
        if let Some(scope) = &self.scope {
            path.push('.');
            path.push_str(&sanitize_segment(scope));
        }
        path.push('.');
        path.push_str(&sanitize_segment(&self.name));
        for part in self.metric.split('.') {
            path.push('.');
            path.push_str(&sanitize_segment(part));
        }
        path
    }
}

/// Make a string safe to use as one segment of a statsd metric name.
///
/// Separators and reserved characters (`.`, `:`, `|`, `@`, `/`, whitespace)
/// become `_`. An empty input becomes `_`.
pub fn sanitize_segment(segment: &str) -> String {
    if segment.is_empty() {
        return "_".to_string();
    }

    segment
        .chars()
        .map(|c| match c {
            '.' | ':' | '|' | '@' | '/' | '#' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect()
}
