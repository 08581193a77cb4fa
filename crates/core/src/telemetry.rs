//! Metric recording for the request pipeline. Instruments come from the
//! OpenTelemetry global meter; without an installed meter provider they are
//! no-ops.

use crate::domain::recommendation::Category;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::time::Duration;

const METER_NAME: &str = "stockpulse";
const MODEL_NAME: &str = "random_forest";

/// Call sites in the service layer report through this seam.
pub trait PipelineMetrics: Send + Sync {
    fn provider_request(&self, provider: &'static str, ticker: &str, success: bool, elapsed: Duration);

    fn prediction(&self, ticker: &str, horizon: usize, confidence: Option<f64>, elapsed: Duration);

    fn recommendation(&self, ticker: &str, category: Option<Category>, elapsed: Duration);
}

pub struct OtelMetrics {
    provider_requests: Counter<u64>,
    provider_errors: Counter<u64>,
    provider_duration: Histogram<f64>,
    prediction_requests: Counter<u64>,
    prediction_duration: Histogram<f64>,
    prediction_confidence: Histogram<f64>,
    recommendation_requests: Counter<u64>,
    recommendation_duration: Histogram<f64>,
}

impl OtelMetrics {
    pub fn from_global() -> Self {
        let meter = opentelemetry::global::meter(METER_NAME);
        Self {
            provider_requests: meter
                .u64_counter("provider_requests_total")
                .with_description("Market-data provider calls")
                .build(),
            provider_errors: meter
                .u64_counter("provider_errors_total")
                .with_description("Failed market-data provider calls")
                .build(),
            provider_duration: meter
                .f64_histogram("provider_request_duration_seconds")
                .with_description("Market-data provider call duration in seconds")
                .build(),
            prediction_requests: meter
                .u64_counter("prediction_requests_total")
                .with_description("Forecast requests")
                .build(),
            prediction_duration: meter
                .f64_histogram("prediction_duration_seconds")
                .with_description("Forecast duration in seconds, fetch included")
                .build(),
            prediction_confidence: meter
                .f64_histogram("prediction_confidence")
                .with_description("Confidence of successful forecasts")
                .build(),
            recommendation_requests: meter
                .u64_counter("recommendation_requests_total")
                .with_description("Recommendation requests")
                .build(),
            recommendation_duration: meter
                .f64_histogram("recommendation_duration_seconds")
                .with_description("Recommendation duration in seconds, fetch included")
                .build(),
        }
    }
}

impl PipelineMetrics for OtelMetrics {
    fn provider_request(&self, provider: &'static str, ticker: &str, success: bool, elapsed: Duration) {
        let attrs = [
            KeyValue::new("provider", provider),
            KeyValue::new("ticker", ticker.to_string()),
            KeyValue::new("success", success),
        ];
        self.provider_requests.add(1, &attrs);
        self.provider_duration.record(elapsed.as_secs_f64(), &attrs);
        if !success {
            self.provider_errors.add(
                1,
                &[
                    KeyValue::new("provider", provider),
                    KeyValue::new("ticker", ticker.to_string()),
                ],
            );
        }
    }

    fn prediction(&self, ticker: &str, horizon: usize, confidence: Option<f64>, elapsed: Duration) {
        let attrs = [
            KeyValue::new("ticker", ticker.to_string()),
            KeyValue::new("days", horizon as i64),
            KeyValue::new("model", MODEL_NAME),
            KeyValue::new("success", confidence.is_some()),
        ];
        self.prediction_requests.add(1, &attrs);
        self.prediction_duration.record(elapsed.as_secs_f64(), &attrs);
        if let Some(c) = confidence {
            self.prediction_confidence.record(
                c,
                &[
                    KeyValue::new("ticker", ticker.to_string()),
                    KeyValue::new("model", MODEL_NAME),
                ],
            );
        }
    }

    fn recommendation(&self, ticker: &str, category: Option<Category>, elapsed: Duration) {
        let outcome = match category {
            Some(Category::Buy) => "buy",
            Some(Category::Hold) => "hold",
            Some(Category::Sell) => "sell",
            None => "error",
        };
        let attrs = [
            KeyValue::new("ticker", ticker.to_string()),
            KeyValue::new("outcome", outcome),
        ];
        self.recommendation_requests.add(1, &attrs);
        self.recommendation_duration.record(elapsed.as_secs_f64(), &attrs);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otel_instruments_record_without_a_provider() {
        let m = OtelMetrics::from_global();
        m.provider_request("yahoo", "AAPL", false, Duration::from_millis(12));
        m.prediction("AAPL", 7, Some(0.8), Duration::from_millis(40));
        m.recommendation("AAPL", Some(Category::Hold), Duration::from_millis(5));
    }
}
