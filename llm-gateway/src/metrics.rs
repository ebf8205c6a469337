//! Latency and throughput metrics for one completion.

use std::time::{Duration, Instant};

use llm_gateway_common::CompletionMetrics;

/// Raw timing and token-count samples gathered while serving one request.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub start: Instant,
    /// Absent when no fragment was produced.
    pub first_token: Option<Instant>,
    pub end: Instant,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    /// Backend-reported generation time, preferred over the wall-clock estimate.
    pub generation_time: Option<Duration>,
}

impl Observation {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            first_token: None,
            end: start,
            input_tokens: None,
            output_tokens: None,
            generation_time: None,
        }
    }

    /// Derive the published metrics.
    pub fn compute(&self, model: &str) -> CompletionMetrics {
        let total_latency = self.end.saturating_duration_since(self.start).as_secs_f64();
        let ttft = self
            .first_token
            .map(|t| t.saturating_duration_since(self.start).as_secs_f64().min(total_latency));

        let generation_time = match self.generation_time {
            Some(hint) if !hint.is_zero() => hint.as_secs_f64(),
            _ => match ttft {
                Some(ttft) => total_latency - ttft,
                None => total_latency,
            },
        };

        let input_tokens = self.input_tokens.filter(|&n| n > 0);
        let output_tokens = self.output_tokens.filter(|&n| n > 0);
        let token_sum = input_tokens.unwrap_or(0) as f64 + output_tokens.unwrap_or(0) as f64;

        let tokens_per_second = ratio(token_sum, total_latency);
        let (output_tokens_per_second, tpot) = match output_tokens {
            Some(out) if generation_time > 0.0 => (
                ratio(out as f64, generation_time),
                ratio(generation_time, out as f64),
            ),
            _ => (None, None),
        };

        CompletionMetrics {
            ttft,
            total_latency,
            tokens_per_second,
            output_tokens_per_second,
            input_tokens,
            output_tokens,
            tpot,
            model: model.to_string(),
        }
    }
}

/// `num / den`, absent unless both are positive and the result is finite.
fn ratio(num: f64, den: f64) -> Option<f64> {
    if num > 0.0 && den > 0.0 {
        Some(num / den).filter(|v| v.is_finite())
    } else {
        None
    }
}
