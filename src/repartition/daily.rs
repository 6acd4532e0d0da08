//! Daily value generator: spreads one slot's target over every day of the year.
//!
//! Each distribution profile reduces to a [`DayShape`]; the generator then has
//! exactly one handler per (calculation type, day shape) pair.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use tracing::warn;

use crate::config::DistributionConfig;
use crate::kpi::{CalculationType, DistributionProfile, ProfileParams, RepartitionLevel};
use crate::period::{self, is_weekend, month_days, quarter_days, quarter_of_month, Period};
use crate::repartition::allocation::PeriodAllocation;
use crate::repartition::proportions::{self, Shape, SUM_EPSILON};
use crate::repartition::DailySeries;

/// Inputs for one slot of one annual target.
#[derive(Debug, Clone, Copy)]
pub struct DailyRequest<'a> {
    pub year: i32,
    pub calculation_type: CalculationType,
    pub profile: DistributionProfile,
    pub params: &'a ProfileParams,
    pub level: RepartitionLevel,
    pub allocation: &'a PeriodAllocation,
    pub target: f64,
}

/// How a profile shapes values across days.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DayShape {
    /// Uniform inside each allocated period.
    Flat,
    /// One curve over the whole year.
    Annual(Shape),
    /// Annual curve with weekend days damped by `bias`.
    AnnualWeekdayBias { shape: Shape, bias: f64 },
    /// Per-month curve; `month_split` divides a quarter's sum across its months.
    Monthly { day: Shape, month_split: Shape },
    /// Per-quarter curve with no month sub-split.
    Quarterly(Shape),
}

pub struct DailyValueGenerator<'a> {
    config: &'a DistributionConfig,
}

impl<'a> DailyValueGenerator<'a> {
    pub fn new(config: &'a DistributionConfig) -> Self {
        Self { config }
    }

    pub fn day_shape(&self, profile: DistributionProfile, params: &ProfileParams) -> DayShape {
        let progressive = Shape::linear(
            params
                .initial_factor
                .unwrap_or(self.config.progressive_initial_factor),
            params
                .final_factor
                .unwrap_or(self.config.progressive_final_factor),
            params.decreasing,
        );
        let parabolic = Shape::Parabolic {
            floor: self.config.parabolic_floor,
            valley: params.valley,
        };
        let sinusoidal = Shape::Sinusoidal {
            amplitude: params
                .amplitude
                .map(f64::abs)
                .unwrap_or(self.config.sine_amplitude),
            phase: params.phase.unwrap_or(self.config.sine_phase),
            floor: self.config.sine_floor,
        };

        match profile {
            DistributionProfile::Even => DayShape::Flat,
            DistributionProfile::AnnualProgressive => DayShape::Annual(progressive),
            DistributionProfile::AnnualSinusoidal => DayShape::Annual(sinusoidal),
            DistributionProfile::AnnualProgressiveWeekdayBias => DayShape::AnnualWeekdayBias {
                shape: progressive,
                bias: self.weekday_bias(params),
            },
            DistributionProfile::MonthlySinusoidal => DayShape::Monthly {
                day: parabolic,
                month_split: Shape::Even,
            },
            DistributionProfile::IntraPeriodProgressive => DayShape::Monthly {
                day: progressive,
                month_split: progressive,
            },
            DistributionProfile::QuarterlyProgressive => DayShape::Quarterly(progressive),
            DistributionProfile::QuarterlySinusoidal => DayShape::Quarterly(parabolic),
            DistributionProfile::EventBased => {
                let base = params
                    .base_profile
                    .filter(|p| *p != DistributionProfile::EventBased)
                    .unwrap_or(DistributionProfile::AnnualProgressive);
                self.day_shape(base, params)
            }
        }
    }

    fn weekday_bias(&self, params: &ProfileParams) -> f64 {
        match params.weekday_bias {
            Some(bias) if bias > 0.0 && bias < 1.0 => bias,
            Some(bias) => {
                warn!("weekday_bias {bias} outside (0, 1), using configured factor");
                self.config.weekday_bias_factor
            }
            None => self.config.weekday_bias_factor,
        }
    }

    pub fn generate(&self, request: &DailyRequest<'_>) -> DailySeries {
        let days = period::year_days(request.year);
        let shape = self.day_shape(request.profile, request.params);
        let values = match request.calculation_type {
            CalculationType::Incremental => incremental_values(request, &days, shape),
            CalculationType::Average => self.average_values(request, &days, shape),
        };
        DailySeries {
            year: request.year,
            days,
            values,
        }
    }

    fn average_values(
        &self,
        request: &DailyRequest<'_>,
        days: &[NaiveDate],
        shape: DayShape,
    ) -> Vec<f64> {
        let scale = self.config.deviation_scale;
        let deviations: Vec<f64> = match shape {
            DayShape::Flat => vec![0.0; days.len()],
            DayShape::Annual(curve) | DayShape::AnnualWeekdayBias { shape: curve, .. } => {
                centered_deviation(&proportions::generate(days.len(), curve), scale)
            }
            DayShape::Monthly { day, .. } => (1..=12)
                .flat_map(|m| {
                    let n = month_days(request.year, m).len();
                    centered_deviation(&proportions::generate(n, day), scale)
                })
                .collect(),
            DayShape::Quarterly(curve) => (1..=4)
                .flat_map(|q| {
                    let n = quarter_days(request.year, q).len();
                    centered_deviation(&proportions::generate(n, curve), scale)
                })
                .collect(),
        };

        days.iter()
            .zip(deviations)
            .map(|(day, deviation)| {
                let base = base_for_day(request, *day);
                let value = base * (1.0 + deviation);
                match shape {
                    DayShape::AnnualWeekdayBias { bias, .. } if is_weekend(*day) => value * bias,
                    _ => value,
                }
            })
            .collect()
    }
}

fn incremental_values(request: &DailyRequest<'_>, days: &[NaiveDate], shape: DayShape) -> Vec<f64> {
    let target = request.target;
    match shape {
        DayShape::Flat => even_values(request, days),
        DayShape::Annual(curve) => proportions::generate(days.len(), curve)
            .into_iter()
            .map(|w| w * target)
            .collect(),
        DayShape::AnnualWeekdayBias { shape: curve, bias } => {
            let biased: Vec<f64> = proportions::generate(days.len(), curve)
                .into_iter()
                .zip(days)
                .map(|(w, day)| if is_weekend(*day) { w * bias } else { w })
                .collect();
            proportions::normalize(biased)
                .into_iter()
                .map(|w| w * target)
                .collect()
        }
        DayShape::Monthly { day, month_split } => {
            let sums = month_sums(request, days, month_split);
            (1..=12)
                .flat_map(|m| {
                    let sum = sums.get(&m).copied().unwrap_or(0.0);
                    let n = month_days(request.year, m).len();
                    proportions::generate(n, day)
                        .into_iter()
                        .map(move |w| w * sum)
                })
                .collect()
        }
        DayShape::Quarterly(curve) => {
            let sums = quarter_sums(request, days);
            (1..=4)
                .flat_map(|q| {
                    let sum = sums.get(&q).copied().unwrap_or(0.0);
                    let n = quarter_days(request.year, q).len();
                    proportions::generate(n, curve)
                        .into_iter()
                        .map(move |w| w * sum)
                })
                .collect()
        }
    }
}

/// Incremental Even: each day gets its period's sum split evenly over the
/// period's days inside the year.
fn even_values(request: &DailyRequest<'_>, days: &[NaiveDate]) -> Vec<f64> {
    if matches!(request.allocation, PeriodAllocation::Unallocated) || days.is_empty() {
        let per_day = if days.is_empty() {
            0.0
        } else {
            request.target / days.len() as f64
        };
        return vec![per_day; days.len()];
    }

    let mut day_counts: BTreeMap<Period, usize> = BTreeMap::new();
    for day in days {
        if let Some(p) = Period::of_date(request.level, *day) {
            *day_counts.entry(p).or_default() += 1;
        }
    }
    days.iter()
        .map(|day| {
            let Some(p) = Period::of_date(request.level, *day) else {
                return 0.0;
            };
            let sum = request.allocation.get(&p).unwrap_or(0.0);
            let count = day_counts.get(&p).copied().unwrap_or(1).max(1);
            sum / count as f64
        })
        .collect()
}

fn month_sums(
    request: &DailyRequest<'_>,
    days: &[NaiveDate],
    month_split: Shape,
) -> BTreeMap<u32, f64> {
    match request.level {
        RepartitionLevel::Month => (1..=12)
            .map(|m| (m, request.allocation.get(&Period::Month(m)).unwrap_or(0.0)))
            .collect(),
        RepartitionLevel::Quarter => {
            let mut sums = BTreeMap::new();
            for q in 1..=4 {
                let quarter_sum = request.allocation.get(&Period::Quarter(q)).unwrap_or(0.0);
                let split = proportions::generate(3, month_split);
                for (month, share) in period::quarter_months(q).into_iter().zip(split) {
                    sums.insert(month, quarter_sum * share);
                }
            }
            sums
        }
        RepartitionLevel::Year | RepartitionLevel::Week => {
            warn!(
                "profile {} expects month or quarter repartition, deriving month sums from {} level",
                request.profile, request.level
            );
            sum_by(days, &even_values(request, days), |d| d.month())
        }
    }
}

fn quarter_sums(request: &DailyRequest<'_>, days: &[NaiveDate]) -> BTreeMap<u32, f64> {
    if request.level == RepartitionLevel::Quarter {
        return (1..=4)
            .map(|q| (q, request.allocation.get(&Period::Quarter(q)).unwrap_or(0.0)))
            .collect();
    }
    warn!(
        "profile {} expects quarter repartition, deriving quarter sums from {} level",
        request.profile, request.level
    );
    sum_by(days, &even_values(request, days), |d| quarter_of_month(d.month()))
}

fn sum_by(days: &[NaiveDate], values: &[f64], key: impl Fn(&NaiveDate) -> u32) -> BTreeMap<u32, f64> {
    let mut out = BTreeMap::new();
    for (day, value) in days.iter().zip(values) {
        *out.entry(key(day)).or_insert(0.0) += value;
    }
    out
}

fn base_for_day(request: &DailyRequest<'_>, day: NaiveDate) -> f64 {
    let multiplier = Period::of_date(request.level, day)
        .and_then(|p| request.allocation.get(&p))
        .unwrap_or(1.0);
    request.target * multiplier
}

/// Signed deviation of each weight from the curve mean, scaled so the largest
/// magnitude equals `scale`. Mean deviation is zero.
pub fn centered_deviation(weights: &[f64], scale: f64) -> Vec<f64> {
    let n = weights.len() as f64;
    let relative: Vec<f64> = weights.iter().map(|w| w * n - 1.0).collect();
    let max_abs = relative.iter().fold(0.0_f64, |acc, r| acc.max(r.abs()));
    if max_abs <= SUM_EPSILON {
        return vec![0.0; weights.len()];
    }
    relative.into_iter().map(|r| r / max_abs * scale).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate};

    use super::{centered_deviation, DailyRequest, DailyValueGenerator, DayShape};
    use crate::config::DistributionConfig;
    use crate::kpi::{
        CalculationType, DistributionProfile, ProfileParams, RepartitionLevel, RepartitionWeights,
    };
    use crate::period::is_weekend;
    use crate::repartition::allocation::resolve_allocation;
    use crate::repartition::proportions::Shape;

    fn run(
        calc: CalculationType,
        profile: DistributionProfile,
        level: RepartitionLevel,
        weights: &RepartitionWeights,
        year: i32,
        target: f64,
    ) -> crate::repartition::DailySeries {
        let config = DistributionConfig::default();
        let params = ProfileParams::default();
        let allocation = resolve_allocation(calc, level, weights, year, target);
        DailyValueGenerator::new(&config).generate(&DailyRequest {
            year,
            calculation_type: calc,
            profile,
            params: &params,
            level,
            allocation: &allocation,
            target,
        })
    }

    #[test]
    fn even_year_level_spreads_leap_year_uniformly() {
        let series = run(
            CalculationType::Incremental,
            DistributionProfile::Even,
            RepartitionLevel::Year,
            &RepartitionWeights::default(),
            2024,
            1200.0,
        );
        assert_eq!(series.values.len(), 366);
        assert!(series
            .values
            .iter()
            .all(|v| (v - 1200.0 / 366.0).abs() < 1e-12));
        assert!((series.total() - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn incremental_profiles_preserve_the_target_at_every_level() {
        let levels = [
            (RepartitionLevel::Year, RepartitionWeights::default()),
            (
                RepartitionLevel::Month,
                RepartitionWeights::from_pairs([("January", 20.0), ("July", 30.0), ("December", 50.0)]),
            ),
            (
                RepartitionLevel::Quarter,
                RepartitionWeights::from_pairs([("Q1", 25.0), ("Q2", 30.0), ("Q3", 20.0), ("Q4", 25.0)]),
            ),
            (
                RepartitionLevel::Week,
                RepartitionWeights::from_pairs([("2024-W01", 3.0), ("W10", 5.0), ("2025-W01", 1.0)]),
            ),
        ];
        for profile in DistributionProfile::ALL {
            for (level, weights) in &levels {
                let series = run(
                    CalculationType::Incremental,
                    profile,
                    *level,
                    weights,
                    2024,
                    98_765.4,
                );
                assert_eq!(series.values.len(), 366);
                let rel = (series.total() - 98_765.4).abs() / 98_765.4;
                assert!(rel < 1e-6, "{profile} at {level}: {}", series.total());
                assert!(series.values.iter().all(|v| *v >= 0.0), "{profile} at {level}");
            }
        }
    }

    #[test]
    fn quarterly_progressive_respects_quarter_sums_and_grows_inside_quarter() {
        let weights =
            RepartitionWeights::from_pairs([("Q1", 25.0), ("Q2", 30.0), ("Q3", 20.0), ("Q4", 25.0)]);
        let series = run(
            CalculationType::Incremental,
            DistributionProfile::QuarterlyProgressive,
            RepartitionLevel::Quarter,
            &weights,
            2024,
            4000.0,
        );
        let q1: Vec<f64> = series
            .iter()
            .filter(|(d, _)| d.month() <= 3)
            .map(|(_, v)| v)
            .collect();
        let q2_total: f64 = series
            .iter()
            .filter(|(d, _)| (4..=6).contains(&d.month()))
            .map(|(_, v)| v)
            .sum();
        assert!((q1.iter().sum::<f64>() - 1000.0).abs() < 1e-9);
        assert!((q2_total - 1200.0).abs() < 1e-9);
        assert!(q1.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn weekday_bias_damps_weekends() {
        let series = run(
            CalculationType::Incremental,
            DistributionProfile::AnnualProgressiveWeekdayBias,
            RepartitionLevel::Year,
            &RepartitionWeights::default(),
            2024,
            10_000.0,
        );
        // 2024-06-07 is a Friday, 06-08 a Saturday.
        let fri = series
            .value_on(NaiveDate::from_ymd_opt(2024, 6, 7).expect("date"))
            .expect("friday");
        let sat = series
            .value_on(NaiveDate::from_ymd_opt(2024, 6, 8).expect("date"))
            .expect("saturday");
        assert!(sat < fri * 0.7);
    }

    #[test]
    fn monthly_sinusoidal_peaks_mid_month() {
        let series = run(
            CalculationType::Incremental,
            DistributionProfile::MonthlySinusoidal,
            RepartitionLevel::Month,
            &RepartitionWeights::default(),
            2023,
            1200.0,
        );
        let january: Vec<f64> = series
            .iter()
            .filter(|(d, _)| d.month() == 1)
            .map(|(_, v)| v)
            .collect();
        assert!((january.iter().sum::<f64>() - 100.0).abs() < 1e-9);
        assert!(january[15] > january[0]);
        assert!(january[15] > january[30]);
    }

    #[test]
    fn average_even_applies_period_multipliers() {
        let weights = RepartitionWeights::from_pairs([("Q1", 150.0)]);
        let series = run(
            CalculationType::Average,
            DistributionProfile::Even,
            RepartitionLevel::Quarter,
            &weights,
            2024,
            40.0,
        );
        let jan = series
            .value_on(NaiveDate::from_ymd_opt(2024, 1, 15).expect("date"))
            .expect("jan");
        let may = series
            .value_on(NaiveDate::from_ymd_opt(2024, 5, 15).expect("date"))
            .expect("may");
        assert!((jan - 60.0).abs() < 1e-12);
        assert!((may - 40.0).abs() < 1e-12);
    }

    #[test]
    fn average_shapes_keep_mean_near_base() {
        for profile in [
            DistributionProfile::AnnualProgressive,
            DistributionProfile::AnnualSinusoidal,
            DistributionProfile::QuarterlySinusoidal,
            DistributionProfile::IntraPeriodProgressive,
        ] {
            let series = run(
                CalculationType::Average,
                profile,
                RepartitionLevel::Year,
                &RepartitionWeights::default(),
                2023,
                50.0,
            );
            let mean = series.total() / series.values.len() as f64;
            assert!((mean - 50.0).abs() < 1e-9, "{profile}: {mean}");
            let max = series.values.iter().copied().fold(0.0, f64::max);
            assert!(max <= 50.0 * 1.2 + 1e-9, "{profile}: {max}");
        }
    }

    #[test]
    fn average_weekday_bias_damps_weekend_after_deviation() {
        let series = run(
            CalculationType::Average,
            DistributionProfile::AnnualProgressiveWeekdayBias,
            RepartitionLevel::Year,
            &RepartitionWeights::default(),
            2024,
            100.0,
        );
        for (day, value) in series.iter() {
            if is_weekend(day) {
                assert!(value < 100.0 * 1.2 * 0.6 + 1e-9);
            }
        }
    }

    #[test]
    fn event_based_uses_requested_base_profile() {
        let config = DistributionConfig::default();
        let generator = DailyValueGenerator::new(&config);
        let default_base = generator.day_shape(DistributionProfile::EventBased, &ProfileParams::default());
        let params = ProfileParams {
            base_profile: Some(DistributionProfile::Even),
            ..ProfileParams::default()
        };
        assert!(matches!(default_base, DayShape::Annual(Shape::Linear { .. })));
        assert_eq!(
            generator.day_shape(DistributionProfile::EventBased, &params),
            DayShape::Flat
        );
    }

    #[test]
    fn centered_deviation_has_zero_mean_and_bounded_peak() {
        let deviations = centered_deviation(&[0.1, 0.2, 0.3, 0.4], 0.2);
        let mean: f64 = deviations.iter().sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
        let peak = deviations.iter().fold(0.0_f64, |a, d| a.max(d.abs()));
        assert!((peak - 0.2).abs() < 1e-12);
        assert_eq!(centered_deviation(&[0.25; 4], 0.2), vec![0.0; 4]);
    }
}
