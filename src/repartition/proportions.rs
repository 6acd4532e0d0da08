use std::f64::consts::PI;

/// Sums at or below this are treated as zero.
pub const SUM_EPSILON: f64 = 1e-12;

/// A normalized weight curve over `n` consecutive positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Even,
    /// Interpolates from `initial` at the first position to `last` at the final one.
    Linear { initial: f64, last: f64 },
    /// Symmetric peak (or valley) centred on the range.
    Parabolic { floor: f64, valley: bool },
    Sinusoidal {
        amplitude: f64,
        phase: f64,
        floor: f64,
    },
}

impl Shape {
    pub fn linear(initial: f64, last: f64, decreasing: bool) -> Self {
        if decreasing {
            Shape::Linear {
                initial: last,
                last: initial,
            }
        } else {
            Shape::Linear { initial, last }
        }
    }
}

/// `n` non-negative weights summing to 1 (empty for `n == 0`).
pub fn generate(n: usize, shape: Shape) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => normalize(raw_weights(n, shape)),
    }
}

fn raw_weights(n: usize, shape: Shape) -> Vec<f64> {
    match shape {
        Shape::Even => vec![1.0; n],
        Shape::Linear { initial, last } => {
            let span = (n - 1) as f64;
            let raw: Vec<f64> = (0..n)
                .map(|i| initial + (last - initial) * (i as f64 / span))
                .collect();
            let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
            if min <= 0.0 {
                raw.into_iter().map(|w| w - min).collect()
            } else {
                raw
            }
        }
        Shape::Parabolic { floor, valley } => {
            let mid = (n - 1) as f64 / 2.0;
            let peak = mid * mid;
            (0..n)
                .map(|i| {
                    let dist = (i as f64 - mid).powi(2);
                    let w = if valley { dist } else { peak - dist };
                    w.max(0.0) + floor.max(0.0)
                })
                .collect()
        }
        Shape::Sinusoidal {
            amplitude,
            phase,
            floor,
        } => (0..n)
            .map(|i| {
                let angle = 2.0 * PI * i as f64 / n as f64 + phase;
                (1.0 + amplitude * angle.sin()).max(floor.max(0.0))
            })
            .collect(),
    }
}

/// Scales `raw` to sum to 1, clamping negatives to 0. A zero total falls back to even.
pub fn normalize(raw: Vec<f64>) -> Vec<f64> {
    let n = raw.len();
    if n == 0 {
        return raw;
    }
    let clamped: Vec<f64> = raw
        .into_iter()
        .map(|w| if w.is_finite() { w.max(0.0) } else { 0.0 })
        .collect();
    let total: f64 = clamped.iter().sum();
    if total <= SUM_EPSILON {
        return vec![1.0 / n as f64; n];
    }
    clamped.into_iter().map(|w| w / total).collect()
}

#[cfg(test)]
mod tests {
    use super::{generate, normalize, Shape};

    fn shapes() -> Vec<Shape> {
        vec![
            Shape::Even,
            Shape::linear(0.5, 1.5, false),
            Shape::linear(0.5, 1.5, true),
            Shape::linear(-2.0, 1.0, false),
            Shape::linear(1.0, 1.0, false),
            Shape::linear(0.0, 0.0, false),
            Shape::Parabolic {
                floor: 1.0,
                valley: false,
            },
            Shape::Parabolic {
                floor: 1e-9,
                valley: true,
            },
            Shape::Sinusoidal {
                amplitude: 0.3,
                phase: 0.0,
                floor: 1e-6,
            },
            Shape::Sinusoidal {
                amplitude: 4.0,
                phase: 1.0,
                floor: 1e-6,
            },
        ]
    }

    #[test]
    fn every_shape_sums_to_one_and_stays_non_negative() {
        for shape in shapes() {
            for n in 1..=370 {
                let weights = generate(n, shape);
                assert_eq!(weights.len(), n);
                let sum: f64 = weights.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9, "{shape:?} n={n} sum={sum}");
                assert!(weights.iter().all(|w| *w >= 0.0), "{shape:?} n={n}");
            }
        }
    }

    #[test]
    fn single_position_is_whole() {
        assert_eq!(generate(1, Shape::linear(0.5, 1.5, false)), vec![1.0]);
        assert!(generate(0, Shape::Even).is_empty());
    }

    #[test]
    fn linear_moves_from_initial_to_final_factor() {
        let up = generate(10, Shape::linear(0.5, 1.5, false));
        assert!(up.windows(2).all(|w| w[1] > w[0]));
        assert!((up[9] / up[0] - 3.0).abs() < 1e-9);

        let down = generate(10, Shape::linear(0.5, 1.5, true));
        assert!(down.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn parabolic_is_symmetric_with_centred_peak() {
        let weights = generate(31, Shape::Parabolic {
            floor: 1.0,
            valley: false,
        });
        for i in 0..15 {
            assert!((weights[i] - weights[30 - i]).abs() < 1e-12);
        }
        let max = weights.iter().copied().fold(0.0, f64::max);
        assert!((weights[15] - max).abs() < 1e-12);

        let valley = generate(31, Shape::Parabolic {
            floor: 1.0,
            valley: true,
        });
        let min = valley.iter().copied().fold(f64::INFINITY, f64::min);
        assert!((valley[15] - min).abs() < 1e-12);
    }

    #[test]
    fn normalize_handles_all_zero_and_negative_input() {
        assert_eq!(normalize(vec![0.0, 0.0, 0.0, 0.0]), vec![0.25; 4]);
        assert_eq!(normalize(vec![-1.0, 1.0]), vec![0.0, 1.0]);
    }
}
