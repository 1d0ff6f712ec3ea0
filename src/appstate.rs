use crate::prometheus::Metrics;
use crate::rates::RateService;

/// Shared by every handler; cloned per request.
#[derive(Clone, Debug)]
pub struct AppState {
    pub rates: RateService,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(rates: RateService, metrics: Metrics) -> Self {
        Self { rates, metrics }
    }
}
