//! Performance metrics reported with every completed request.

use serde::{Deserialize, Serialize, Serializer};

/// Latency and throughput figures for one completion.
///
/// Values are kept at full precision; rounding happens only when the struct is
/// serialized (4 decimals for durations in seconds, 2 for rates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetrics {
    /// Time to first token in seconds. Absent when no token was produced or
    /// the request was not streamed.
    #[serde(serialize_with = "round_latency")]
    pub ttft: Option<f64>,
    /// End-to-end latency in seconds.
    #[serde(serialize_with = "round_latency_required")]
    pub total_latency: f64,
    /// (input + output tokens) / total latency.
    #[serde(serialize_with = "round_rate")]
    pub tokens_per_second: Option<f64>,
    /// Output tokens / generation time.
    #[serde(serialize_with = "round_rate")]
    pub output_tokens_per_second: Option<f64>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    /// Time per output token in seconds.
    #[serde(serialize_with = "round_latency")]
    pub tpot: Option<f64>,
    pub model: String,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn round_latency<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) if v.is_finite() => serializer.serialize_some(&round_to(*v, 4)),
        _ => serializer.serialize_none(),
    }
}

fn round_latency_required<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let v = if value.is_finite() { round_to(*value, 4) } else { 0.0 };
    serializer.serialize_f64(v)
}

fn round_rate<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) if v.is_finite() => serializer.serialize_some(&round_to(*v, 2)),
        _ => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CompletionMetrics {
        CompletionMetrics {
            ttft: Some(0.123456),
            total_latency: 2.000049,
            tokens_per_second: Some(7.0 / 2.000049),
            output_tokens_per_second: Some(4.0 / 1.5),
            input_tokens: Some(3),
            output_tokens: Some(4),
            tpot: Some(1.5 / 4.0),
            model: "smollm2:1.7b".to_string(),
        }
    }

    #[test]
    fn test_rounding_applies_on_serialization_only() {
        let metrics = sample();
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["ttft"], json!(0.1235));
        assert_eq!(json["total_latency"], json!(2.0));
        assert_eq!(json["tokens_per_second"], json!(3.5));
        assert_eq!(json["output_tokens_per_second"], json!(2.67));
        assert_eq!(json["tpot"], json!(0.375));
        // In-memory values keep full precision.
        assert_eq!(metrics.ttft, Some(0.123456));
    }

    #[test]
    fn test_absent_fields_serialize_as_null() {
        let metrics = CompletionMetrics {
            ttft: None,
            total_latency: 0.0,
            tokens_per_second: None,
            output_tokens_per_second: None,
            input_tokens: None,
            output_tokens: None,
            tpot: None,
            model: "m".to_string(),
        };
        let json = serde_json::to_value(&metrics).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 8);
        for key in [
            "ttft",
            "tokens_per_second",
            "output_tokens_per_second",
            "input_tokens",
            "output_tokens",
            "tpot",
        ] {
            assert!(obj[key].is_null(), "{key} should be null");
        }
    }

    #[test]
    fn test_non_finite_values_never_serialized() {
        let mut metrics = sample();
        metrics.tokens_per_second = Some(f64::INFINITY);
        metrics.tpot = Some(f64::NAN);
        let text = serde_json::to_string(&metrics).unwrap();
        assert!(!text.contains("inf"));
        assert!(!text.contains("NaN"));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(json["tokens_per_second"].is_null());
        assert!(json["tpot"].is_null());
    }

    #[test]
    fn test_deserialize_from_wire() {
        let json = r#"{"ttft":null,"total_latency":1.25,"tokens_per_second":11.2,
            "output_tokens_per_second":null,"input_tokens":10,"output_tokens":4,
            "tpot":null,"model":"m"}"#;
        let metrics: CompletionMetrics = serde_json::from_str(json).unwrap();
        assert_eq!(metrics.total_latency, 1.25);
        assert_eq!(metrics.output_tokens, Some(4));
        assert!(metrics.ttft.is_none());
    }
}
