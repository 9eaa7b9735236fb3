//! Levenberg-Marquardt backend for the calibration cost.
//!
//! Problems implement [`NllsProblem`]; [`minimize`] adapts them to
//! [`levenberg_marquardt::LeastSquaresProblem`] and runs the solver.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};

/// Nonlinear least-squares problem over a dense parameter vector.
pub trait NllsProblem {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of [`NllsProblem::residuals`]. Defaults to forward
    /// differences over every parameter.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let r0 = self.residuals(x);
        let mut j = DMatrix::<f64>::zeros(r0.len(), x.len());
        let mut xp = x.clone();
        for c in 0..x.len() {
            let step = finite_difference_step(x[c]);
            xp[c] = x[c] + step;
            let r = self.residuals(&xp);
            j.set_column(c, &((r - &r0) / step));
            xp[c] = x[c];
        }
        j
    }
}

#[inline]
pub fn finite_difference_step(value: f64) -> f64 {
    1e-6 * value.abs().max(1.0)
}

#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    /// Patience of the solver: it gives up after about
    /// `max_iters * (params + 1)` residual evaluations.
    pub max_iters: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    CostConverged,
    StepConverged,
    /// Residuals are orthogonal to the Jacobian columns.
    GradientConverged,
    ResidualsZero,
    MaxIterations,
    /// Numerical trouble or an ill-posed problem.
    Failed,
}

impl From<&TerminationReason> for Termination {
    fn from(reason: &TerminationReason) -> Self {
        match reason {
            TerminationReason::Converged { ftol: true, .. } => Self::CostConverged,
            TerminationReason::Converged { .. } => Self::StepConverged,
            TerminationReason::Orthogonal => Self::GradientConverged,
            TerminationReason::ResidualsZero => Self::ResidualsZero,
            TerminationReason::LostPatience => Self::MaxIterations,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    /// Residual evaluations spent by the solver.
    pub iterations: usize,
    pub initial_cost: f64,
    /// Half the sum of squared residuals at the solution.
    pub final_cost: f64,
    pub termination: Termination,
}

impl SolveReport {
    pub fn converged(&self) -> bool {
        !matches!(
            self.termination,
            Termination::MaxIterations | Termination::Failed
        )
    }
}

struct LmAdapter<'a, P: NllsProblem> {
    problem: &'a P,
    params: DVector<f64>,
}

impl<P: NllsProblem> LeastSquaresProblem<f64, Dyn, Dyn> for LmAdapter<'_, P> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.problem.residuals(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let j = self.problem.jacobian(&self.params);
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

/// Minimise `0.5 * |r(x)|^2` starting from `x0`.
pub fn minimize<P: NllsProblem>(
    problem: &P,
    x0: DVector<f64>,
    opts: &SolveOptions,
) -> (DVector<f64>, SolveReport) {
    let initial_cost = 0.5 * problem.residuals(&x0).norm_squared();
    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.max_iters.max(1));

    let (adapter, report) = lm.minimize(LmAdapter {
        problem,
        params: x0,
    });
    let termination = Termination::from(&report.termination);

    log::debug!(
        "lm: {} evaluations, cost {:.6e} -> {:.6e} ({:?})",
        report.number_of_evaluations,
        initial_cost,
        report.objective_function,
        report.termination
    );

    (
        adapter.params,
        SolveReport {
            iterations: report.number_of_evaluations,
            initial_cost,
            final_cost: report.objective_function,
            termination,
        },
    )
}
