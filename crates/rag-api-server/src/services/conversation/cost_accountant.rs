use crate::config::PricingConfig;
use crate::models::chat::TurnMetadata;
use crate::services::config_resolver::ConfigResolver;
use std::sync::Arc;

/// Turns raw token counts into the USD/XAF cost figures surfaced in the
/// `metadata` SSE event. Falls back to a static `PricingConfig` only when no
/// `ConfigResolver` is attached (unit tests, or a bare manager built without
/// §4.12 wiring); the live path below never compiles in a tariff or rate.
pub struct CostAccountant {
    pricing: PricingConfig,
}

impl CostAccountant {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    pub fn account(
        &self,
        tokens_input: u32,
        tokens_output: u32,
        cache_hit: bool,
        response_time_ms: u64,
        model_used: impl Into<String>,
    ) -> TurnMetadata {
        let cost_usd = if cache_hit {
            0.0
        } else {
            let input_cost = (tokens_input as f64 / 1000.0) * self.pricing.input_cost_per_1k_tokens_usd;
            let output_cost = (tokens_output as f64 / 1000.0) * self.pricing.output_cost_per_1k_tokens_usd;
            round_cents(input_cost + output_cost)
        };
        let cost_xaf = round_cents(cost_usd * self.pricing.usd_to_xaf_rate);

        TurnMetadata {
            tokens_input,
            tokens_output,
            cost_usd,
            cost_xaf,
            cache_hit,
            response_time_ms,
            model_used: model_used.into(),
        }
    }

    /// §4.12/§4.13: resolve the per-(model, operation) tariff and the
    /// current USD->XAF rate from `SystemConfig`/`ExchangeRate` at call
    /// time instead of the compiled-in `PricingConfig`. `exchange_rate_used`
    /// is always populated so it is never null when `cost_usd > 0` (§8).
    pub async fn account_live(
        &self,
        resolver: &Arc<ConfigResolver>,
        operation: &str,
        tokens_input: u32,
        tokens_output: u32,
        cache_hit: bool,
        response_time_ms: u64,
        model_used: impl Into<String>,
    ) -> TurnMetadata {
        let model_used = model_used.into();
        let exchange_rate_used = resolver
            .current_exchange_rate("XAF", self.pricing.usd_to_xaf_rate)
            .await;

        let cost_usd = if cache_hit {
            0.0
        } else {
            let tariff_in = resolver.tariff_per_mtok(
                &model_used,
                &format!("{operation}_input"),
                self.pricing.input_cost_per_1k_tokens_usd * 1000.0,
            );
            let tariff_out = resolver.tariff_per_mtok(
                &model_used,
                &format!("{operation}_output"),
                self.pricing.output_cost_per_1k_tokens_usd * 1000.0,
            );
            round_usd((tokens_input as f64 * tariff_in + tokens_output as f64 * tariff_out) / 1_000_000.0)
        };
        let cost_xaf = round_cents(cost_usd * exchange_rate_used);

        TurnMetadata {
            tokens_input,
            tokens_output,
            cost_usd,
            cost_xaf,
            cache_hit,
            response_time_ms,
            model_used,
        }
    }
}

fn round_usd(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> PricingConfig {
        PricingConfig {
            usd_to_xaf_rate: 610.0,
            input_cost_per_1k_tokens_usd: 0.0005,
            output_cost_per_1k_tokens_usd: 0.0015,
        }
    }

    #[test]
    fn computes_usd_and_xaf_for_a_normal_turn() {
        let accountant = CostAccountant::new(pricing());
        let m = accountant.account(2000, 500, false, 1200, "llama-3");
        assert_eq!(m.cost_usd, 0.0 + round_cents(2.0 * 0.0005 + 0.5 * 0.0015));
        assert_eq!(m.cost_xaf, round_cents(m.cost_usd * 610.0));
    }

    #[test]
    fn cache_hit_is_free() {
        let accountant = CostAccountant::new(pricing());
        let m = accountant.account(2000, 500, true, 5, "cache");
        assert_eq!(m.cost_usd, 0.0);
        assert_eq!(m.cost_xaf, 0.0);
    }
}
