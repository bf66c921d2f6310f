//! Formatted terminal output.
//!
//! Formatting lives in one place so the engine stays free of presentation
//! concerns and output changes stay local.

use crate::domain::{Explanation, IntervalMethod, ModelRole, PropertyType, ValuationResult};
use crate::engine::PublishedTraining;
use crate::error::EngineError;
use crate::fit::TrainingReport;
use crate::io::RowError;
use crate::math::RegressionMetrics;
use crate::models::Objective;

/// Training summary: data split, chosen hyperparameters, per-role fit quality.
pub fn format_training_summary(report: &TrainingReport) -> String {
    let mut out = String::new();
    let hp = &report.hyperparameters;

    out.push_str(&format!(
        "=== valuer - {} models ===\n",
        report.property_type.display_name()
    ));
    out.push_str(&format!(
        "Samples: n={} | train={} | validation={}\n",
        report.samples, report.train_rows, report.validation_rows
    ));
    out.push_str(&format!(
        "Hyperparameters: depth={} eta={} trees={} subsample={} colsample={} seed={}\n",
        hp.max_depth, hp.learning_rate, hp.n_estimators, hp.subsample, hp.colsample, hp.seed
    ));
    out.push_str(&format!(
        "Interval: {:.0}% confidence, quantiles {:.3} / {:.3}\n",
        report.confidence_level * 100.0,
        report.quantile_levels.0,
        report.quantile_levels.1
    ));

    if let Some(search) = &report.search {
        out.push_str(&format!(
            "Search: {} candidates x {} folds, best #{} (cv rmse {})\n",
            search.candidates.len(),
            search.folds,
            search.best_index,
            fmt_money(search.best_score.sqrt())
        ));
    }

    out.push_str("\nRoles:\n");
    out.push_str(&format!(
        "{:<14} {:<16} {:>6} {:>10} {:>14} {:>14} {:>8}\n",
        "role", "objective", "trees", "best_iter", "train_rmse", "valid_rmse", "r2"
    ));
    for r in &report.roles {
        let train = r.metrics.train.map(|m| fmt_money(m.rmse)).unwrap_or_else(|| "-".to_string());
        let valid = r
            .metrics
            .validation
            .map(|m| fmt_money(m.rmse))
            .unwrap_or_else(|| "-".to_string());
        let r2 = r
            .metrics
            .validation
            .or(r.metrics.train)
            .map(|m| format!("{:.3}", m.r2))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<14} {:<16} {:>6} {:>10} {:>14} {:>14} {:>8}\n",
            r.role.as_str(),
            fmt_objective(r.objective),
            r.trees,
            r.best_iteration.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string()),
            train,
            valid,
            r2
        ));
    }
    if report.quantile_inversions > 0 {
        out.push_str(&format!(
            "note: quantile models cross on {} training rows (repaired at prediction time)\n",
            report.quantile_inversions
        ));
    }
    out.push_str(&format!("Elapsed: {} ms\n", report.elapsed_ms));
    out
}

/// One line per property type for `train-all` / `retrain`.
pub fn format_train_all(
    results: &[(PropertyType, Result<PublishedTraining, EngineError>)],
) -> String {
    let mut out = String::new();
    for (pt, result) in results {
        match result {
            Ok(published) => {
                let point = published.report.role(ModelRole::Point);
                let rmse = point
                    .and_then(|r| r.metrics.validation.or(r.metrics.train))
                    .map(|m| fmt_money(m.rmse))
                    .unwrap_or_else(|| "-".to_string());
                let version = published.handles.first().map(|h| h.version.as_str()).unwrap_or("-");
                out.push_str(&format!(
                    "{:<14} ok      n={:<6} rmse={rmse:<14} version={version}\n",
                    pt.as_str(),
                    published.report.samples
                ));
            }
            Err(e) => out.push_str(&format!("{:<14} failed  {e}\n", pt.as_str())),
        }
    }
    out
}

pub fn format_valuation(result: &ValuationResult, id: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(id) = id {
        out.push_str(&format!("[{id}] "));
    }
    out.push_str(&format!(
        "{}: {} ({:.0}% interval {} .. {}, {})\n",
        result.property_type.display_name(),
        fmt_money(result.point_estimate),
        result.confidence_level * 100.0,
        fmt_money(result.interval_low),
        fmt_money(result.interval_high),
        fmt_method(result.interval_method)
    ));
    out.push_str(&format!(
        "  width {} | model {}",
        fmt_money(result.interval_width()),
        result.model_version
    ));
    if result.repaired {
        out.push_str(" | interval repaired");
    }
    if !result.clamped_features.is_empty() {
        out.push_str(&format!(" | clamped: {}", result.clamped_features.join(", ")));
    }
    out.push('\n');
    out
}

/// Baseline, estimate and the top `top` contributions.
pub fn format_explanation(explanation: &Explanation, top: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} estimate {} = baseline {} + contributions {}\n",
        explanation.property_type.display_name(),
        fmt_money(explanation.point_estimate),
        fmt_money(explanation.baseline),
        fmt_signed(explanation.total_contribution())
    ));
    out.push_str(&format!(
        "{:>4} {:<24} {:>14} {:>16}\n",
        "rank", "feature", "value", "contribution"
    ));
    for c in explanation.contributions.iter().take(top) {
        out.push_str(&format!(
            "{:>4} {:<24} {:>14} {:>16}\n",
            c.rank,
            truncate(&c.feature, 24),
            fmt_value(c.value),
            fmt_signed(c.contribution)
        ));
    }
    let rest = explanation.contributions.len().saturating_sub(top);
    if rest > 0 {
        out.push_str(&format!("     ({rest} more)\n"));
    }
    out
}

pub fn format_importance(
    property_type: PropertyType,
    ranked: &[(String, f64)],
    top: usize,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} feature importance (mean |contribution|):\n",
        property_type.display_name()
    ));
    let max = ranked.first().map(|(_, v)| *v).unwrap_or(0.0);
    for (i, (name, value)) in ranked.iter().take(top).enumerate() {
        let bar_len = if max > 0.0 { ((value / max) * 30.0).round() as usize } else { 0 };
        out.push_str(&format!(
            "{:>3}. {:<24} {:>14} {}\n",
            i + 1,
            truncate(name, 24),
            fmt_money(*value),
            "#".repeat(bar_len)
        ));
    }
    out
}

pub fn format_metrics(property_type: PropertyType, metrics: &RegressionMetrics) -> String {
    format!(
        "{} evaluation: n={} rmse={} mae={} r2={:.4} mape={:.2}%\n",
        property_type.display_name(),
        metrics.n,
        fmt_money(metrics.rmse),
        fmt_money(metrics.mae),
        metrics.r2,
        metrics.mape
    )
}

/// First `limit` row errors, then a count of the rest.
pub fn format_row_errors(errors: &[RowError], limit: usize) -> String {
    let mut out = String::new();
    if errors.is_empty() {
        return out;
    }
    out.push_str(&format!("Skipped {} row(s):\n", errors.len()));
    for e in errors.iter().take(limit) {
        match &e.id {
            Some(id) => out.push_str(&format!("  line {} ({id}): {}\n", e.line, e.message)),
            None => out.push_str(&format!("  line {}: {}\n", e.line, e.message)),
        }
    }
    if errors.len() > limit {
        out.push_str(&format!("  ... and {} more\n", errors.len() - limit));
    }
    out
}

fn fmt_objective(objective: Objective) -> String {
    match objective {
        Objective::SquaredError => "squared_error".to_string(),
        Objective::Quantile { alpha } => format!("quantile({alpha:.3})"),
    }
}

fn fmt_method(method: IntervalMethod) -> &'static str {
    match method {
        IntervalMethod::Quantile => "quantile models",
        IntervalMethod::Bootstrap => "residual bootstrap",
        IntervalMethod::Parametric => "parametric",
    }
}

/// `1234567.8` -> `$1,234,568`.
fn fmt_money(v: f64) -> String {
    if !v.is_finite() {
        return v.to_string();
    }
    let rounded = v.abs().round() as u64;
    let digits = rounded.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if v < 0.0 && rounded > 0 { "-" } else { "" };
    format!("{sign}${grouped}")
}

fn fmt_signed(v: f64) -> String {
    if v >= 0.0 { format!("+{}", fmt_money(v)) } else { fmt_money(v) }
}

fn fmt_value(v: f64) -> String {
    if v.fract() == 0.0 { format!("{v:.0}") } else { format!("{v:.2}") }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FeatureContribution;

    #[test]
    fn money_is_grouped_and_signed() {
        assert_eq!(fmt_money(1_234_567.8), "$1,234,568");
        assert_eq!(fmt_money(999.4), "$999");
        assert_eq!(fmt_money(-12_000.0), "-$12,000");
        assert_eq!(fmt_money(-0.2), "$0");
        assert_eq!(fmt_signed(2_500.0), "+$2,500");
    }

    #[test]
    fn explanation_lists_top_contributions() {
        let e = Explanation {
            property_type: PropertyType::Condo,
            baseline: 300_000.0,
            point_estimate: 345_000.0,
            contributions: vec![
                FeatureContribution {
                    feature: "square_feet".to_string(),
                    value: 1400.0,
                    contribution: 50_000.0,
                    rank: 1,
                },
                FeatureContribution {
                    feature: "hoa_fee".to_string(),
                    value: 350.5,
                    contribution: -5_000.0,
                    rank: 2,
                },
            ],
        };
        let text = format_explanation(&e, 1);
        assert!(text.contains("square_feet"));
        assert!(!text.contains("hoa_fee"));
        assert!(text.contains("(1 more)"));
        assert!(text.contains("+$45,000"));
    }

    #[test]
    fn row_errors_are_capped() {
        let errors: Vec<RowError> = (0..5)
            .map(|i| RowError {
                line: i + 2,
                id: None,
                message: "bad".to_string(),
            })
            .collect();
        let text = format_row_errors(&errors, 2);
        assert!(text.contains("Skipped 5 row(s)"));
        assert!(text.contains("... and 3 more"));
        assert!(format_row_errors(&[], 2).is_empty());
    }

    #[test]
    fn valuation_shows_interval_and_warnings() {
        let r = ValuationResult {
            property_type: PropertyType::SingleFamily,
            point_estimate: 412_000.0,
            interval_low: 380_500.0,
            interval_high: 455_000.0,
            confidence_level: 0.9,
            interval_method: IntervalMethod::Bootstrap,
            model_version: "20240101T000000Z".to_string(),
            trained_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            repaired: true,
            clamped_features: vec!["lot_size".to_string()],
        };
        let text = format_valuation(&r, Some("apn-7"));
        assert!(text.starts_with("[apn-7] "));
        assert!(text.contains("90% interval $380,500 .. $455,000, residual bootstrap"));
        assert!(text.contains("width $74,500"));
        assert!(text.contains("interval repaired"));
        assert!(text.contains("clamped: lot_size"));
    }
}
