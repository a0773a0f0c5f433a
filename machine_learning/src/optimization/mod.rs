mod adam;
mod gradient_descent;
mod gradient_descent_with_momentum;
mod nesterov;
mod optimizer;

pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use nesterov::Nesterov;
pub use optimizer::Optimizer;

use crate::{MlErr, Result};

/// Fails unless `got` equals `expected`.
fn check_len(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        return Ok(());
    }

    Err(MlErr::SizeMismatch {
        a: what,
        b: "parameters",
        got,
        expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimizes `sum (p - 3)^2` from zero.
    fn minimize<O: Optimizer>(mut optimizer: O, steps: usize) -> Vec<f32> {
        let mut params = vec![0.; 4];
        for _ in 0..steps {
            let grad: Vec<f32> = params.iter().map(|p| 2. * (p - 3.)).collect();
            optimizer.update_params(&grad, &mut params).unwrap();
        }
        params
    }

    fn assert_near(params: &[f32], target: f32) {
        for p in params {
            assert!((p - target).abs() < 1e-2, "{p} is not near {target}");
        }
    }

    #[test]
    fn every_optimizer_reaches_the_minimum() {
        assert_near(&minimize(GradientDescent::new(0.1), 200), 3.);
        assert_near(&minimize(GradientDescentWithMomentum::new(4, 0.05, 0.9), 400), 3.);
        assert_near(&minimize(Nesterov::new(4, 0.05, 0.9), 400), 3.);
        assert_near(&minimize(Adam::new(4, 0.1, 0.9, 0.999, 1e-8), 1000), 3.);
    }

    #[test]
    fn nesterov_first_step_overshoots_plain_momentum() {
        let grad = [1.];
        let mut classic = GradientDescentWithMomentum::new(1, 0.1, 0.9);
        let mut nesterov = Nesterov::new(1, 0.1, 0.9);
        let (mut a, mut b) = ([0.], [0.]);

        classic.update_params(&grad, &mut a).unwrap();
        nesterov.update_params(&grad, &mut b).unwrap();

        assert!((a[0] + 0.1).abs() < 1e-6);
        assert!((b[0] + 0.19).abs() < 1e-6);
    }

    #[test]
    fn state_round_trips_through_set_state() {
        let mut adam = Adam::new(3, 0.01, 0.9, 0.999, 1e-8);
        let mut params = [1., 2., 3.];
        adam.update_params(&[0.5, -0.5, 1.], &mut params).unwrap();

        let state = adam.state();
        assert_eq!(state.len(), 6);

        let mut fresh = Adam::new(3, 0.01, 0.9, 0.999, 1e-8);
        fresh.set_state(&state).unwrap();
        assert_eq!(fresh.state(), state);
    }

    #[test]
    fn sizes_are_checked() {
        let mut momentum = GradientDescentWithMomentum::new(2, 0.1, 0.9);
        let mut params = [0.; 3];

        assert!(momentum.update_params(&[1.; 3], &mut params).is_err());
        assert!(momentum.set_state(&[0.; 5]).is_err());
        assert!(GradientDescent::new(0.1).set_state(&[1.]).is_err());
        assert!(GradientDescent::new(0.1).set_state(&[]).is_ok());
    }
}
