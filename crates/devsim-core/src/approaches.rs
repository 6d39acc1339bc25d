//! Helpers for approaching a target value over simulated time

/// Move `current` towards `target` at `rate` units per second for `dt` seconds
///
/// Never overshoots; a non-positive rate or time step leaves the value unchanged.
pub fn linear(current: f64, target: f64, rate: f64, dt: f64) -> f64 {
    if rate <= 0.0 || dt <= 0.0 {
        return current;
    }
    let step = rate * dt;
    let delta = target - current;
    if delta.abs() <= step {
        target
    } else {
        current + step.copysign(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_steps() {
        assert_eq!(linear(0.0, 10.0, 2.0, 1.0), 2.0);
        assert_eq!(linear(10.0, 0.0, 2.0, 1.5), 7.0);
    }

    #[test]
    fn test_linear_does_not_overshoot() {
        assert_eq!(linear(9.5, 10.0, 2.0, 1.0), 10.0);
        assert_eq!(linear(-9.5, -10.0, 2.0, 1.0), -10.0);
    }

    #[test]
    fn test_linear_degenerate() {
        assert_eq!(linear(1.0, 5.0, 0.0, 1.0), 1.0);
        assert_eq!(linear(1.0, 5.0, 1.0, 0.0), 1.0);
    }
}
