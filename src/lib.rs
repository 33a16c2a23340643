//! An implementation of the stabilized Barzilai-Borwein (BB) method for unconstrained
//! optimization, following Burdakov, Dai & Huang (2019), "Stabilized Barzilai-Borwein method".
//!
//! The BB step size approximates curvature from two consecutive points and gradients
//! instead of an explicit Hessian. The stabilization bounds every step by a trust radius
//! `delta`, scaled by the inverse gradient norm, which prevents the step blow-ups plain BB
//! suffers from on ill-conditioned or nonconvex problems.
//!
//! # Features
//! - BB1 (`sᵀy / yᵀy`) and BB2 (`sᵀs / sᵀy`) step sizes.
//! - Nonconvexity correction: a nonpositive BB estimate is replaced by `‖s‖ / ‖y‖`.
//! - Stabilized step `α = min(α_BB, Δ / ‖g‖)` with either a constant `Δ` or the adaptive
//!   choice `Δ = c · min(‖x₄ − x₃‖, ‖x₃ − x₂‖, ‖x₂ − x₁‖)` made once at iteration 4.
//! - Backtracking seed: the second starting point is found by shrinking a scaled
//!   steepest-descent step until the cost strictly decreases.
//! - Cooperative cancellation through a shared stop flag. An interrupted run still
//!   returns the best point found so far.
//! - Full iterate, step-size, trust-radius and gradient-norm histories in the solution.
//!
//! ## Defaults
//! - Variant: BB1. Delta strategy: adaptive with initial `Δ = 1e6` and `c = 0.2`.
//! - `max_iterations = 10000`, `tolerance = 1e-7` on the gradient norm.
//!
//! ## Degenerate secant pairs
//! When the BB quotient has a zero denominator (BB1 with `y = 0`, BB2 with `sᵀy = 0`), is
//! not finite, or the corrected step is not a positive finite number, the previously
//! accepted step size is reused. On the first iteration, where no accepted step exists,
//! the step `‖s‖ / ‖g‖` is used instead, i.e. one as long as the seed step. Only when that
//! is also unusable does the run fail with [`StabBbError::DegenerateSecant`].
//!
//! # Example
//!
//! ```
//! use stab_bb::{StabBb, StabBbSolution, Termination};
//! use ndarray::{array, Array1};
//!
//! let cost = |x: &Array1<f64>| x.dot(x);
//! let grad = |x: &Array1<f64>| 2.0 * x;
//!
//! let StabBbSolution {
//!     best_point,
//!     termination,
//!     iterations,
//!     ..
//! } = StabBb::new(array![5.0, -3.0], cost, grad)
//!     .with_tolerance(1e-7)
//!     .with_max_iterations(1000)
//!     .run()
//!     .expect("stabilized BB failed");
//!
//! println!("Found minimum at {} after {} iterations.", best_point, iterations);
//! assert_eq!(termination, Termination::Converged);
//! assert!(best_point.dot(&best_point).sqrt() < 1e-5);
//! ```

use ndarray::Array1;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Maximum number of step reductions the backtracking seed performs.
const MAX_BACKTRACKS: usize = 60;
/// Iteration index at which the adaptive strategy picks its trust radius.
const DELTA_ADAPT_ITERATION: usize = 4;

#[inline]
fn norm2(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

#[inline]
fn norm_inf(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

#[inline]
fn all_finite(v: &Array1<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Which two-point step size formula to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BbVariant {
    /// `α = sᵀy / yᵀy`, the "short" BB step.
    #[default]
    Bb1,
    /// `α = sᵀs / sᵀy`, the "long" BB step.
    Bb2,
}

impl TryFrom<u8> for BbVariant {
    type Error = StabBbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BbVariant::Bb1),
            2 => Ok(BbVariant::Bb2),
            other => Err(StabBbError::InvalidConfiguration {
                parameter: "bb",
                reason: format!("expected 1 or 2, got {other}"),
            }),
        }
    }
}

/// How the trust radius `delta` evolves during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeltaStrategy {
    /// Use the initial delta until iteration 4, then switch once to
    /// `c · min` of the three preceding step lengths.
    #[default]
    Adaptive,
    /// Keep the initial delta for the whole run.
    Constant,
}

impl FromStr for DeltaStrategy {
    type Err = StabBbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            // "adaptative" is accepted as a legacy spelling.
            "adaptive" | "adaptative" => Ok(DeltaStrategy::Adaptive),
            "constant" => Ok(DeltaStrategy::Constant),
            other => Err(StabBbError::InvalidConfiguration {
                parameter: "delta_strategy",
                reason: format!("expected \"adaptive\" or \"constant\", got {other:?}"),
            }),
        }
    }
}

/// Why the iteration loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The last gradient norm dropped to the tolerance or below.
    Converged,
    /// The iteration cap was hit first.
    MaxIterationsReached,
    /// The stop flag was raised between iterations.
    Interrupted,
    /// A non-finite gradient or an unusable secant pair ended the run. Only found in the
    /// partial solution carried by the corresponding [`StabBbError`].
    NumericalBreakdown,
}

/// An error type for clear diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum StabBbError {
    #[error("Invalid configuration for `{parameter}`: {reason}.")]
    InvalidConfiguration {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// What was wrong with it.
        reason: String,
    },
    #[error(
        "The gradient function returned {found} components for a problem of dimension {expected}."
    )]
    DimensionMismatch { expected: usize, found: usize },
    #[error("The cost at the initial point is NaN or infinity.")]
    NonFiniteCost,
    #[error(
        "Backtracking failed to find a point with lower cost after {attempts} step reductions."
    )]
    StalledBacktracking { attempts: usize },
    #[error("The gradient became NaN or infinity at iteration {iteration}.")]
    NonFiniteGradient {
        /// Index of the iteration whose gradient was non-finite. Seed gradients report 0.
        iteration: usize,
        /// The well-formed result up to the last finite gradient. `None` when one of the
        /// two seed gradients was already non-finite.
        last_solution: Option<Box<StabBbSolution>>,
    },
    #[error(
        "The secant pair at iteration {iteration} is degenerate and no fallback step size is usable."
    )]
    DegenerateSecant {
        iteration: usize,
        /// The well-formed result up to the failing iteration.
        last_solution: Box<StabBbSolution>,
    },
    #[error("No gradient norm has been recorded, so there is no point to select.")]
    EmptyHistory,
}

/// The outcome of a run.
///
/// `best_point` is the iterate with the smallest recorded gradient norm, which for the
/// nonmonotone BB method is not necessarily the last one.
#[derive(Debug, Clone)]
pub struct StabBbSolution {
    /// The iterate with the smallest observed gradient norm.
    pub best_point: Array1<f64>,
    /// Index of `best_point` in `iterate_history` (always `>= 1`).
    pub best_index: usize,
    /// The gradient norm at `best_point`.
    pub best_gradient_norm: f64,
    /// Initial point, backtracked seed point, then one point per iteration.
    pub iterate_history: Vec<Array1<f64>>,
    /// The stabilized step size applied at each iteration.
    pub alpha_history: Vec<f64>,
    /// Gradient norms from the seed point on: `iterate_history.len() - 1` entries.
    pub grad_norm_history: Vec<f64>,
    /// The trust radius in force when each step size was computed.
    pub delta_history: Vec<f64>,
    /// The trust radius at the end of the run.
    pub final_delta: f64,
    /// The number of completed iterations.
    pub iterations: usize,
    /// The total number of cost evaluations, all of them made by the backtracking seed.
    pub func_evals: usize,
    /// The total number of gradient evaluations.
    pub grad_evals: usize,
    /// Why the run stopped.
    pub termination: Termination,
}

impl StabBbSolution {
    /// True when the run stopped because the gradient norm reached the tolerance.
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Run parameters. Immutable for the duration of a run and validated before any
/// evaluation of the objective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabBbConfig {
    pub bb: BbVariant,
    pub delta_strategy: DeltaStrategy,
    /// Trust radius used throughout (constant) or until iteration 4 (adaptive).
    pub initial_delta: f64,
    /// Factor `c` of the adaptive trust radius.
    pub correction_c: f64,
    pub max_iterations: usize,
    /// Stop once the gradient norm is at or below this value.
    pub tolerance: f64,
    /// Log per-iteration progress at `info` level instead of `trace`.
    pub verbose: bool,
}

impl Default for StabBbConfig {
    fn default() -> Self {
        Self {
            bb: BbVariant::Bb1,
            delta_strategy: DeltaStrategy::Adaptive,
            initial_delta: 1e6,
            correction_c: 0.2,
            max_iterations: 10_000,
            tolerance: 1e-7,
            verbose: false,
        }
    }
}

impl StabBbConfig {
    /// Checks every numeric parameter; the enums are valid by construction.
    pub fn validate(&self) -> Result<(), StabBbError> {
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(StabBbError::InvalidConfiguration {
                parameter: "tolerance",
                reason: format!("must be finite and non-negative, got {}", self.tolerance),
            });
        }
        if !(self.initial_delta.is_finite() && self.initial_delta > 0.0) {
            return Err(StabBbError::InvalidConfiguration {
                parameter: "initial_delta",
                reason: format!("must be finite and positive, got {}", self.initial_delta),
            });
        }
        if !(self.correction_c.is_finite() && self.correction_c > 0.0) {
            return Err(StabBbError::InvalidConfiguration {
                parameter: "correction_c",
                reason: format!("must be finite and positive, got {}", self.correction_c),
            });
        }
        Ok(())
    }
}

/// Counts evaluations and checks the gradient dimension.
struct Oracle<'a, CostFn, GradFn> {
    cost_fn: &'a mut CostFn,
    grad_fn: &'a mut GradFn,
    dim: usize,
    func_evals: usize,
    grad_evals: usize,
}

impl<'a, CostFn, GradFn> Oracle<'a, CostFn, GradFn>
where
    CostFn: FnMut(&Array1<f64>) -> f64,
    GradFn: FnMut(&Array1<f64>) -> Array1<f64>,
{
    fn new(cost_fn: &'a mut CostFn, grad_fn: &'a mut GradFn, dim: usize) -> Self {
        Self {
            cost_fn,
            grad_fn,
            dim,
            func_evals: 0,
            grad_evals: 0,
        }
    }

    fn cost(&mut self, x: &Array1<f64>) -> f64 {
        self.func_evals += 1;
        (self.cost_fn)(x)
    }

    fn grad(&mut self, x: &Array1<f64>) -> Result<Array1<f64>, StabBbError> {
        self.grad_evals += 1;
        let g = (self.grad_fn)(x);
        if g.len() != self.dim {
            return Err(StabBbError::DimensionMismatch {
                expected: self.dim,
                found: g.len(),
            });
        }
        Ok(g)
    }
}

/// Per-run mutable state of the iteration loop.
struct RunState {
    /// g_{k-1}
    g_prev: Array1<f64>,
    /// g_k
    g_curr: Array1<f64>,
    delta: f64,
    /// The last accepted step size, used by the degenerate-secant fallback.
    prev_alpha: Option<f64>,
    iteration: usize,
}

/// The append-only records of a run. They grow in lockstep:
/// `grad_norms.len() == points.len() - 1` and `alphas.len() == points.len() - 2`.
struct Histories {
    points: Vec<Array1<f64>>,
    alphas: Vec<f64>,
    deltas: Vec<f64>,
    grad_norms: Vec<f64>,
}

impl Histories {
    fn seed(x0: Array1<f64>, x1: Array1<f64>, g1_norm: f64) -> Self {
        Self {
            points: vec![x0, x1],
            alphas: Vec::new(),
            deltas: Vec::new(),
            grad_norms: vec![g1_norm],
        }
    }

    fn push(&mut self, x: Array1<f64>, alpha: f64, delta: f64, grad_norm: f64) {
        self.points.push(x);
        self.alphas.push(alpha);
        self.deltas.push(delta);
        self.grad_norms.push(grad_norm);
    }

    fn last_grad_norm(&self) -> f64 {
        self.grad_norms.last().copied().unwrap_or(f64::INFINITY)
    }

    fn finish(
        self,
        state: &RunState,
        evals: (usize, usize),
        termination: Termination,
    ) -> Result<StabBbSolution, StabBbError> {
        let (best_index, best_gradient_norm) = select_best(&self.grad_norms)?;
        Ok(StabBbSolution {
            best_point: self.points[best_index].clone(),
            best_index,
            best_gradient_norm,
            iterations: self.alphas.len(),
            iterate_history: self.points,
            alpha_history: self.alphas,
            grad_norm_history: self.grad_norms,
            delta_history: self.deltas,
            final_delta: state.delta,
            func_evals: evals.0,
            grad_evals: evals.1,
            termination,
        })
    }
}

/// Returns the iterate index with the smallest gradient norm, and that norm.
///
/// `grad_norms[i]` belongs to iterate `i + 1`; the initial point has no entry and is never
/// selected. Ties resolve to the earliest iterate.
fn select_best(grad_norms: &[f64]) -> Result<(usize, f64), StabBbError> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &norm) in grad_norms.iter().enumerate() {
        if best.is_none_or(|(_, best_norm)| norm < best_norm) {
            best = Some((i, norm));
        }
    }
    best.map(|(i, norm)| (i + 1, norm))
        .ok_or(StabBbError::EmptyHistory)
}

/// Raw two-point step size. `None` for a zero denominator or a non-finite quotient.
fn bb_candidate(variant: BbVariant, s: &Array1<f64>, y: &Array1<f64>) -> Option<f64> {
    let (numerator, denominator) = match variant {
        BbVariant::Bb1 => (s.dot(y), y.dot(y)),
        BbVariant::Bb2 => (s.dot(s), s.dot(y)),
    };
    if denominator == 0.0 {
        return None;
    }
    Some(numerator / denominator).filter(|alpha| alpha.is_finite())
}

/// Replaces a nonpositive BB estimate with `‖s‖ / ‖y‖`.
///
/// The correction in the paper uses the current step `s_k`, which is not known yet; the
/// previous pair is used instead.
fn correct_nonconvex(alpha: f64, s: &Array1<f64>, y: &Array1<f64>) -> Option<f64> {
    if alpha > 0.0 {
        return Some(alpha);
    }
    let y_norm = norm2(y);
    if y_norm == 0.0 {
        return None;
    }
    Some(norm2(s) / y_norm).filter(|a| a.is_finite() && *a > 0.0)
}

/// Step size used when the secant pair gives no usable estimate.
fn fallback_step(prev_alpha: Option<f64>, s_norm: f64, g_norm: f64) -> Option<f64> {
    prev_alpha
        .or_else(|| (g_norm > 0.0).then(|| s_norm / g_norm))
        .filter(|a| a.is_finite() && *a > 0.0)
}

/// `min(α, Δ / ‖g‖)`: the step `α g` never gets longer than the trust radius.
#[inline]
fn stabilize(alpha: f64, delta: f64, g_norm: f64) -> f64 {
    if g_norm > 0.0 {
        alpha.min(delta / g_norm)
    } else {
        alpha
    }
}

/// The adaptive trust radius `c · min(‖x₄ − x₃‖, ‖x₃ − x₂‖, ‖x₂ − x₁‖)`.
///
/// Keeps `current` if the new radius would not be a positive finite number, e.g. when two
/// consecutive iterates coincide.
fn adapt_delta(points: &[Array1<f64>], c: f64, current: f64) -> f64 {
    let shortest = (1..=3)
        .map(|i| norm2(&(&points[i + 1] - &points[i])))
        .fold(f64::INFINITY, f64::min);
    let adapted = c * shortest;
    if adapted.is_finite() && adapted > 0.0 {
        log::debug!(
            "[StabBB] trust radius adapted from {:.3e} to {:.3e}",
            current,
            adapted
        );
        adapted
    } else {
        log::warn!(
            "[StabBB] adaptive trust radius {:.3e} is unusable; keeping {:.3e}",
            adapted,
            current
        );
        current
    }
}

/// Finds the second starting point from `x0` by shrinking a scaled steepest-descent step
/// until the cost strictly decreases.
fn backtrack_seed<CostFn, GradFn>(
    oracle: &mut Oracle<'_, CostFn, GradFn>,
    x0: &Array1<f64>,
    g0: &Array1<f64>,
) -> Result<Array1<f64>, StabBbError>
where
    CostFn: FnMut(&Array1<f64>) -> f64,
    GradFn: FnMut(&Array1<f64>) -> Array1<f64>,
{
    let f0 = oracle.cost(x0);
    if !f0.is_finite() {
        return Err(StabBbError::NonFiniteCost);
    }
    let scale = norm_inf(x0);
    let alpha0 = if scale > 0.0 {
        1.0 / scale
    } else {
        log::debug!("[StabBB Backtracking] initial point is zero; using unit step length");
        1.0
    };

    let mut s0 = g0 * (-alpha0);
    for reductions in 0..=MAX_BACKTRACKS {
        let x1 = x0 + &s0;
        let f1 = oracle.cost(&x1);
        if f1.is_finite() && f1 < f0 {
            log::debug!(
                "[StabBB Backtracking] accepted seed point after {} reductions (f: {:.6e} -> {:.6e})",
                reductions,
                f0,
                f1
            );
            return Ok(x1);
        }
        s0 /= 4.0;
    }
    log::warn!(
        "[StabBB Backtracking] no cost decrease after {} reductions from f = {:.6e}",
        MAX_BACKTRACKS,
        f0
    );
    Err(StabBbError::StalledBacktracking {
        attempts: MAX_BACKTRACKS,
    })
}

/// Ways a single iteration can fail.
enum StepFailure {
    NonFiniteGradient,
    DegenerateSecant,
    Fatal(StabBbError),
}

impl StepFailure {
    fn into_error(self, iteration: usize, last_solution: StabBbSolution) -> StabBbError {
        match self {
            StepFailure::NonFiniteGradient => StabBbError::NonFiniteGradient {
                iteration,
                last_solution: Some(Box::new(last_solution)),
            },
            StepFailure::DegenerateSecant => StabBbError::DegenerateSecant {
                iteration,
                last_solution: Box::new(last_solution),
            },
            StepFailure::Fatal(err) => err,
        }
    }
}

/// Starting point and configuration of a run.
struct StabBbCore {
    x0: Array1<f64>,
    config: StabBbConfig,
}

impl StabBbCore {
    fn validate_start(&self) -> Result<(), StabBbError> {
        if self.x0.is_empty() {
            return Err(StabBbError::InvalidConfiguration {
                parameter: "x0",
                reason: "the initial point must have at least one component".to_string(),
            });
        }
        if !all_finite(&self.x0) {
            return Err(StabBbError::InvalidConfiguration {
                parameter: "x0",
                reason: "the initial point contains NaN or infinity".to_string(),
            });
        }
        Ok(())
    }

    fn run<CostFn, GradFn>(
        &self,
        cost_fn: &mut CostFn,
        grad_fn: &mut GradFn,
        stop_flag: Option<&AtomicBool>,
    ) -> Result<StabBbSolution, StabBbError>
    where
        CostFn: FnMut(&Array1<f64>) -> f64,
        GradFn: FnMut(&Array1<f64>) -> Array1<f64>,
    {
        self.config.validate()?;
        self.validate_start()?;
        let tolerance = self.config.tolerance;
        let mut oracle = Oracle::new(cost_fn, grad_fn, self.x0.len());

        let g0 = oracle.grad(&self.x0)?;
        if !all_finite(&g0) {
            return Err(StabBbError::NonFiniteGradient {
                iteration: 0,
                last_solution: None,
            });
        }
        let (x1, g1) = if norm2(&g0) <= tolerance {
            log::info!("[StabBB] initial point is already stationary; skipping backtracking");
            (self.x0.clone(), g0.clone())
        } else {
            let x1 = backtrack_seed(&mut oracle, &self.x0, &g0)?;
            let g1 = oracle.grad(&x1)?;
            if !all_finite(&g1) {
                return Err(StabBbError::NonFiniteGradient {
                    iteration: 0,
                    last_solution: None,
                });
            }
            (x1, g1)
        };

        let mut histories = Histories::seed(self.x0.clone(), x1, norm2(&g1));
        let mut state = RunState {
            g_prev: g0,
            g_curr: g1,
            delta: self.config.initial_delta,
            prev_alpha: None,
            iteration: 0,
        };

        let termination = loop {
            if histories.last_grad_norm() <= tolerance {
                break Termination::Converged;
            }
            if state.iteration >= self.config.max_iterations {
                break Termination::MaxIterationsReached;
            }
            if stop_flag.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                log::info!(
                    "[StabBB] stop requested after {} iterations; returning the best point so far",
                    state.iteration
                );
                break Termination::Interrupted;
            }
            if let Err(failure) = self.iterate(&mut oracle, &mut state, &mut histories) {
                let iteration = state.iteration;
                let evals = (oracle.func_evals, oracle.grad_evals);
                let last_solution =
                    histories.finish(&state, evals, Termination::NumericalBreakdown)?;
                return Err(failure.into_error(iteration, last_solution));
            }
        };

        match termination {
            Termination::MaxIterationsReached => log::warn!(
                "[StabBB] maximum of {} iterations reached; gradient norm {:.3e} > {:.3e}",
                self.config.max_iterations,
                histories.last_grad_norm(),
                tolerance
            ),
            _ => log::info!(
                "[StabBB] finished after {} iterations ({:?}); gradient norm {:.3e}",
                state.iteration,
                termination,
                histories.last_grad_norm()
            ),
        }
        let evals = (oracle.func_evals, oracle.grad_evals);
        histories.finish(&state, evals, termination)
    }

    /// One step: estimate, correct, stabilize, move, evaluate, adapt, record.
    fn iterate<CostFn, GradFn>(
        &self,
        oracle: &mut Oracle<'_, CostFn, GradFn>,
        state: &mut RunState,
        histories: &mut Histories,
    ) -> Result<(), StepFailure>
    where
        CostFn: FnMut(&Array1<f64>) -> f64,
        GradFn: FnMut(&Array1<f64>) -> Array1<f64>,
    {
        let k = state.iteration;
        let last = histories.points.len() - 1;
        let x_k = &histories.points[last];
        // s_{k-1} = x_{k-1} - x_{k-2}, y_{k-1} = g_k - g_{k-1}
        let s = x_k - &histories.points[last - 1];
        let y = &state.g_curr - &state.g_prev;
        let g_norm = histories.last_grad_norm();

        let alpha_bb = match bb_candidate(self.config.bb, &s, &y)
            .and_then(|alpha| correct_nonconvex(alpha, &s, &y))
        {
            Some(alpha) => alpha,
            None => {
                let fallback = fallback_step(state.prev_alpha, norm2(&s), g_norm)
                    .ok_or(StepFailure::DegenerateSecant)?;
                log::warn!(
                    "[StabBB] degenerate secant pair at iteration {}; falling back to step {:.3e}",
                    k,
                    fallback
                );
                fallback
            }
        };
        let alpha = stabilize(alpha_bb, state.delta, g_norm);
        let x_next = x_k - &(&state.g_curr * alpha);

        let g_next = oracle.grad(&x_next).map_err(StepFailure::Fatal)?;
        if !all_finite(&g_next) {
            log::error!("[StabBB] non-finite gradient at iteration {}", k);
            return Err(StepFailure::NonFiniteGradient);
        }
        let g_next_norm = norm2(&g_next);
        histories.push(x_next, alpha, state.delta, g_next_norm);

        if self.config.delta_strategy == DeltaStrategy::Adaptive && k == DELTA_ADAPT_ITERATION {
            state.delta = adapt_delta(&histories.points, self.config.correction_c, state.delta);
        }

        if self.config.verbose {
            log::info!(
                "[StabBB] iter {}: alpha = {:.3e}, gradient norm = {:.6e}",
                k,
                alpha,
                g_next_norm
            );
        } else {
            log::trace!(
                "[StabBB] iter {}: alpha = {:.3e}, gradient norm = {:.6e}",
                k,
                alpha,
                g_next_norm
            );
        }

        state.prev_alpha = Some(alpha);
        state.g_prev = std::mem::replace(&mut state.g_curr, g_next);
        state.iteration += 1;
        Ok(())
    }
}

/// A configurable stabilized Barzilai-Borwein solver.
pub struct StabBb<CostFn, GradFn> {
    core: StabBbCore,
    cost_fn: CostFn,
    grad_fn: GradFn,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl<CostFn, GradFn> StabBb<CostFn, GradFn>
where
    CostFn: FnMut(&Array1<f64>) -> f64,
    GradFn: FnMut(&Array1<f64>) -> Array1<f64>,
{
    /// Creates a solver for `cost_fn` with gradient `grad_fn`, starting at `x0`, with the
    /// default configuration.
    pub fn new(x0: Array1<f64>, cost_fn: CostFn, grad_fn: GradFn) -> Self {
        Self {
            core: StabBbCore {
                x0,
                config: StabBbConfig::default(),
            },
            cost_fn,
            grad_fn,
            stop_flag: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: StabBbConfig) -> Self {
        self.core.config = config;
        self
    }

    pub fn with_bb_variant(mut self, bb: BbVariant) -> Self {
        self.core.config.bb = bb;
        self
    }

    pub fn with_delta_strategy(mut self, strategy: DeltaStrategy) -> Self {
        self.core.config.delta_strategy = strategy;
        self
    }

    /// Sets the trust radius. Under the adaptive strategy it only applies until
    /// iteration 4, so a large value such as the default `1e6` is recommended there.
    pub fn with_initial_delta(mut self, delta: f64) -> Self {
        self.core.config.initial_delta = delta;
        self
    }

    /// Sets `c` in the adaptive trust radius. Values between 0.1 and 0.3 work well on
    /// quadratics, up to 1.0 on general smooth problems.
    pub fn with_correction_c(mut self, c: f64) -> Self {
        self.core.config.correction_c = c;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.core.config.max_iterations = max_iterations;
        self
    }

    /// Sets the gradient-norm tolerance for convergence.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.core.config.tolerance = tolerance;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.core.config.verbose = verbose;
        self
    }

    /// Installs a stop flag. Raising it from anywhere (another thread, a signal handler,
    /// the objective itself) ends the run at the next iteration boundary with
    /// [`Termination::Interrupted`] and the best point found so far.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    pub fn config(&self) -> &StabBbConfig {
        &self.core.config
    }

    /// Executes the method.
    pub fn run(&mut self) -> Result<StabBbSolution, StabBbError> {
        self.core.run(
            &mut self.cost_fn,
            &mut self.grad_fn,
            self.stop_flag.as_deref(),
        )
    }
}

/// Minimizes `cost_fn` from `x0` with the given configuration.
pub fn stab_bb<CostFn, GradFn>(
    x0: Array1<f64>,
    cost_fn: CostFn,
    grad_fn: GradFn,
    config: StabBbConfig,
) -> Result<StabBbSolution, StabBbError>
where
    CostFn: FnMut(&Array1<f64>) -> f64,
    GradFn: FnMut(&Array1<f64>) -> Array1<f64>,
{
    StabBb::new(x0, cost_fn, grad_fn).with_config(config).run()
}
