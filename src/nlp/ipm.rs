//! A dense primal-dual interior point solver.
//!
//! Solves
//!
//! ```text
//! minimize f(x)  subject to  c_e(x) = 0,  c_i(x) >= 0
//! ```
//!
//! by introducing slacks s > 0 for the inequalities and following the central path of the
//! log-barrier subproblems while the barrier parameter is driven to zero. Each iteration
//! takes a Newton step on the perturbed KKT conditions. The KKT matrix is factored with a
//! symmetric indefinite LDL' and the Hessian block is regularized until the inertia shows it
//! is convex on the constraints' null space. A filter line search with second order
//! corrections decides how much of the step to keep, and a feasibility restoration phase
//! takes over when no step is acceptable.

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};

use super::ldl::Ldl;
use super::{Backend, Constraint, Expr, Solution, SolveFailure};

/// Tuning knobs of the interior point solver
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    /// KKT error below which the solve succeeds
    pub tolerance: f64,
    /// a looser KKT error that also counts as success when held for `acceptable_iterations`
    pub acceptable_tolerance: f64,
    pub acceptable_iterations: usize,
    pub max_iterations: usize,
    /// starting value of the barrier parameter
    pub initial_barrier: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            tolerance: 1e-8,
            acceptable_tolerance: 1e-6,
            acceptable_iterations: 15,
            max_iterations: 1000,
            initial_barrier: 0.1,
        }
    }
}

// barrier update
const BARRIER_ERROR_FACTOR: f64 = 10.;
const BARRIER_LINEAR_DECREASE: f64 = 0.2;
const BARRIER_SUPERLINEAR_DECREASE: f64 = 1.5;

// error scaling
const SCALING_THRESHOLD: f64 = 100.;

// filter line search
const GAMMA_THETA: f64 = 1e-5;
const GAMMA_PHI: f64 = 1e-5;
const ARMIJO: f64 = 1e-4;
const SWITCHING_PHI_EXPONENT: f64 = 2.3;
const SWITCHING_THETA_EXPONENT: f64 = 1.1;
const MAX_BACKTRACKS: usize = 40;
const MAX_CONSECUTIVE_FALLBACKS: usize = 10;
const MAX_SECOND_ORDER_CORRECTIONS: usize = 4;
const SECOND_ORDER_CONTRACTION: f64 = 0.99;

// inertia correction
const FIRST_REGULARIZATION: f64 = 1e-4;
const MIN_REGULARIZATION: f64 = 1e-20;
const MAX_REGULARIZATION: f64 = 1e40;
const DUAL_REGULARIZATION: f64 = 1e-8;
const DUAL_REGULARIZATION_EXPONENT: f64 = 0.25;

// feasibility restoration
const MAX_RESTORATION_ITERATIONS: usize = 200;
const RESTORATION_REDUCTION: f64 = 0.9;
const FIRST_DAMPING: f64 = 1e-4;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e12;

const MIN_INITIAL_SLACK: f64 = 1e-2;
const LEAST_SQUARES_REGULARIZATION: f64 = 1e-8;
const MAX_INITIAL_MULTIPLIER: f64 = 1e3;
const MULTIPLIER_SAFEGUARD: f64 = 1e10;
const DIVERGENCE_LIMIT: f64 = 1e20;

/// an expression together with the variables it references, in local-index order
#[derive(Debug)]
struct CompiledExpr {
    expr: Expr,
    variables: Vec<usize>,
}

impl CompiledExpr {
    fn new(expr: Expr) -> CompiledExpr {
        let variables = expr.variables();
        CompiledExpr { expr, variables }
    }
}

/// everything the Newton step needs at one iterate
struct Evaluation {
    objective: f64,
    objective_gradient: DVector<f64>,
    equalities: DVector<f64>,
    equality_jacobian: DMatrix<f64>,
    inequalities: DVector<f64>,
    inequality_jacobian: DMatrix<f64>,
    /// local Hessians of the objective, then equalities, then inequalities
    objective_hessian: DMatrix<f64>,
    equality_hessians: Vec<DMatrix<f64>>,
    inequality_hessians: Vec<DMatrix<f64>>,
}

/// function values only, for the line search
struct Values {
    objective: f64,
    equalities: DVector<f64>,
    inequalities: DVector<f64>,
}

impl Values {
    fn is_finite(&self) -> bool {
        self.objective.is_finite()
            && self.equalities.iter().all(|v| v.is_finite())
            && self.inequalities.iter().all(|v| v.is_finite())
    }

    /// half the squared violation of all constraints
    fn squared_violation(&self) -> f64 {
        let inequalities: f64 = self.inequalities.iter().map(|c| c.min(0.).powi(2)).sum();
        0.5 * (self.equalities.norm_squared() + inequalities)
    }
}

#[derive(Debug, Default)]
struct Filter {
    entries: Vec<(f64, f64)>,
}

impl Filter {
    fn accepts(&self, theta: f64, phi: f64) -> bool {
        self.entries.iter().all(|&(entry_theta, entry_phi)| {
            theta < (1. - GAMMA_THETA) * entry_theta || phi < entry_phi - GAMMA_PHI * entry_theta
        })
    }

    fn add(&mut self, theta: f64, phi: f64) {
        self.entries.push((theta, phi));
    }

    fn reset(&mut self) {
        self.entries.clear();
    }
}

/// a primal-dual search direction
struct Direction {
    dx: DVector<f64>,
    dy: DVector<f64>,
    ds: DVector<f64>,
    dz: DVector<f64>,
}

/// the factored Newton system of one iteration, with slacks and inequality multipliers
/// eliminated
struct NewtonSystem<'a> {
    kkt: Ldl,
    inequality_jacobian: &'a DMatrix<f64>,
    dual_residual: &'a DVector<f64>,
    s: &'a DVector<f64>,
    z: &'a DVector<f64>,
    sigma: DVector<f64>,
    mu: f64,
}

impl NewtonSystem<'_> {
    /// Solves for the direction that zeroes the linearized constraint residuals
    /// `equality_residual` (c_e) and `slack_residual` (c_i - s)
    fn direction(
        &self,
        equality_residual: &DVector<f64>,
        slack_residual: &DVector<f64>,
    ) -> Direction {
        let n = self.dual_residual.len();
        let m = equality_residual.len();
        let centering =
            self.s.map(|si| self.mu / si) - self.z - self.sigma.component_mul(slack_residual);

        let mut rhs = DVector::zeros(n + m);
        rhs.rows_mut(0, n)
            .copy_from(&(-self.dual_residual + self.inequality_jacobian.transpose() * centering));
        rhs.rows_mut(n, m).copy_from(&(-equality_residual));
        let solution = self.kkt.solve(&rhs);

        let dx = solution.rows(0, n).into_owned();
        let dy = solution.rows(n, m).map(|v| -v);
        let ds = self.inequality_jacobian * &dx + slack_residual;
        let dz = self.s.map(|si| self.mu / si) - self.z - self.sigma.component_mul(&ds);
        Direction { dx, dy, ds, dz }
    }
}

/// the current iterate's side of the filter line search
struct LineSearch {
    theta: f64,
    phi: f64,
    phi_slope: f64,
    theta_min: f64,
    theta_max: f64,
}

impl LineSearch {
    /// Returns whether the filter should be augmented when the trial point is acceptable,
    /// `None` when it is not
    fn accepts(
        &self,
        filter: &Filter,
        alpha: f64,
        trial_theta: f64,
        trial_phi: f64,
    ) -> Option<bool> {
        if trial_theta > self.theta_max || !filter.accepts(trial_theta, trial_phi) {
            return None;
        }
        let switching = self.phi_slope < 0.
            && alpha * (-self.phi_slope).powf(SWITCHING_PHI_EXPONENT)
                > self.theta.powf(SWITCHING_THETA_EXPONENT);
        if switching && self.theta <= self.theta_min {
            if trial_phi <= self.phi + ARMIJO * alpha * self.phi_slope {
                return Some(false);
            }
        } else if trial_theta <= (1. - GAMMA_THETA) * self.theta
            || trial_phi <= self.phi - GAMMA_PHI * self.theta
        {
            return Some(true);
        }
        None
    }
}

/// A nonlinear programming backend that solves with a primal-dual interior point method
///
/// # Examples
/// ```
/// use holotraj::{Backend, InteriorPointSolver, SolverOptions};
///
/// // minimize (x - 1)^2 + (y - 2)^2 subject to x + y = 1
/// let mut solver = InteriorPointSolver::new(SolverOptions::default());
/// let x = solver.decision_variable();
/// let y = solver.decision_variable();
/// solver.minimize((&x - 1.).square() + (&y - 2.).square());
/// solver.subject_to((&x + &y).equal_to(1.));
/// let solution = solver.solve().unwrap();
/// assert!((solution.value(&x) - 0.).abs() < 1e-6);
/// assert!((solution.value(&y) - 1.).abs() < 1e-6);
/// ```
#[derive(Debug)]
pub struct InteriorPointSolver {
    options: SolverOptions,
    initial_values: Vec<f64>,
    equalities: Vec<CompiledExpr>,
    inequalities: Vec<CompiledExpr>,
    objective: Option<CompiledExpr>,
    /// largest violation among constraints that folded to constants
    constant_violation: f64,
}

impl InteriorPointSolver {
    pub fn new(options: SolverOptions) -> InteriorPointSolver {
        InteriorPointSolver {
            options,
            initial_values: Vec::new(),
            equalities: Vec::new(),
            inequalities: Vec::new(),
            objective: None,
            constant_violation: 0.,
        }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn variable_count(&self) -> usize {
        self.initial_values.len()
    }

    fn evaluate(&self, x: &DVector<f64>) -> Evaluation {
        let n = x.len();
        let values = x.as_slice();

        let mut objective_gradient = DVector::zeros(n);
        let (objective, objective_hessian) = match &self.objective {
            Some(compiled) => {
                let jet = compiled.expr.jet(values, &compiled.variables);
                for (local, &index) in compiled.variables.iter().enumerate() {
                    objective_gradient[index] = jet.gradient[local];
                }
                (jet.value, jet.hessian)
            }
            None => (0., DMatrix::zeros(0, 0)),
        };

        let (equalities, equality_jacobian, equality_hessians) =
            evaluate_constraints(&self.equalities, values, n);
        let (inequalities, inequality_jacobian, inequality_hessians) =
            evaluate_constraints(&self.inequalities, values, n);

        Evaluation {
            objective,
            objective_gradient,
            equalities,
            equality_jacobian,
            inequalities,
            inequality_jacobian,
            objective_hessian,
            equality_hessians,
            inequality_hessians,
        }
    }

    fn values(&self, x: &DVector<f64>) -> Values {
        let values = x.as_slice();
        Values {
            objective: self.objective.as_ref().map_or(0., |compiled| compiled.expr.value(values)),
            equalities: DVector::from_iterator(
                self.equalities.len(),
                self.equalities.iter().map(|c| c.expr.value(values)),
            ),
            inequalities: DVector::from_iterator(
                self.inequalities.len(),
                self.inequalities.iter().map(|c| c.expr.value(values)),
            ),
        }
    }

    /// assembles the Hessian of the Lagrangian f - y'c_e - z'c_i
    fn lagrangian_hessian(
        &self,
        evaluation: &Evaluation,
        y: &DVector<f64>,
        z: &DVector<f64>,
    ) -> DMatrix<f64> {
        let n = self.initial_values.len();
        let mut hessian = DMatrix::zeros(n, n);
        if let Some(compiled) = &self.objective {
            scatter(&mut hessian, &compiled.variables, &evaluation.objective_hessian, 1.);
        }
        for (idx, compiled) in self.equalities.iter().enumerate() {
            let local = &evaluation.equality_hessians[idx];
            scatter(&mut hessian, &compiled.variables, local, -y[idx]);
        }
        for (idx, compiled) in self.inequalities.iter().enumerate() {
            let local = &evaluation.inequality_hessians[idx];
            scatter(&mut hessian, &compiled.variables, local, -z[idx]);
        }
        hessian
    }

    fn run(&self) -> Result<Solution, SolveFailure> {
        let n = self.initial_values.len();
        let equality_count = self.equalities.len();
        let inequality_count = self.inequalities.len();
        let options = &self.options;

        info!(
            "Solving problem with {} variables, {} equality and {} inequality constraints",
            n, equality_count, inequality_count
        );

        if self.constant_violation > options.tolerance {
            let violation = self.constant_violation;
            return Err(SolveFailure::Infeasible { iterations: 0, violation });
        }

        let mut x = DVector::from_vec(self.initial_values.clone());
        let mut mu = options.initial_barrier;

        let start = self.values(&x);
        if !start.is_finite() {
            return Err(numerical_error(0, "initial guess evaluates to a non-finite value"));
        }
        let mut s = start.inequalities.map(|c| c.max(MIN_INITIAL_SLACK * c.abs().max(1.)));
        let mut z = s.map(|si| mu / si);
        let mut y = DVector::zeros(equality_count);

        let initial_theta = infeasibility(&start.equalities, &start.inequalities, &s);
        let theta_max = 1e4 * initial_theta.max(1.);
        let theta_min = 1e-4 * initial_theta.max(1.);

        let mut filter = Filter::default();
        let mut last_regularization = 0.;
        let mut acceptable_count = 0;
        let mut consecutive_fallbacks = 0;
        let mut estimate_multipliers = true;
        let mut error = f64::INFINITY;

        for iteration in 0..options.max_iterations {
            let evaluation = self.evaluate(&x);
            if !evaluation_is_finite(&evaluation) {
                return Err(numerical_error(
                    iteration,
                    "constraint or objective evaluated to a non-finite value",
                ));
            }

            let a_e = &evaluation.equality_jacobian;
            let a_i = &evaluation.inequality_jacobian;
            let c_e = &evaluation.equalities;
            let c_i = &evaluation.inequalities;

            if estimate_multipliers {
                y = least_squares_multipliers(&evaluation.objective_gradient, a_e, a_i, &z);
                estimate_multipliers = false;
            }

            let dual_residual =
                &evaluation.objective_gradient - a_e.transpose() * &y - a_i.transpose() * &z;
            let scales = error_scaling(&y, &z);
            error = kkt_error(&dual_residual, c_e, c_i, &s, &z, 0., scales);
            if error <= options.tolerance {
                info!("Solved in {} iterations (error {:e})", iteration, error);
                return Ok(Solution::new(x.iter().copied().collect(), iteration));
            }
            if error <= options.acceptable_tolerance {
                acceptable_count += 1;
                if acceptable_count >= options.acceptable_iterations {
                    info!(
                        "Solved to acceptable level in {} iterations (error {:e})",
                        iteration, error
                    );
                    return Ok(Solution::new(x.iter().copied().collect(), iteration));
                }
            } else {
                acceptable_count = 0;
            }

            let primal_infeasibility = c_e.amax().max(c_i.map(|c| (-c).max(0.)).amax());
            if primal_infeasibility > options.tolerance.sqrt() {
                // a stationary point of the infeasibility measure that is not feasible
                let infeasibility_gradient =
                    a_e.transpose() * c_e + a_i.transpose() * c_i.map(|c| c.min(0.));
                let stationary = options.tolerance * primal_infeasibility.max(1.);
                if infeasibility_gradient.amax() <= stationary {
                    warn!("Problem is locally infeasible (violation {:e})", primal_infeasibility);
                    return Err(SolveFailure::Infeasible {
                        iterations: iteration,
                        violation: primal_infeasibility,
                    });
                }
            }

            // decrease the barrier parameter while the current subproblem is solved well enough
            let min_barrier = options.tolerance / 10.;
            while mu > min_barrier
                && kkt_error(&dual_residual, c_e, c_i, &s, &z, mu, scales)
                    <= BARRIER_ERROR_FACTOR * mu
            {
                let decreased =
                    (BARRIER_LINEAR_DECREASE * mu).min(mu.powf(BARRIER_SUPERLINEAR_DECREASE));
                mu = min_barrier.max(decreased);
                filter.reset();
            }

            let sigma = z.component_div(&s);
            let hessian = self.lagrangian_hessian(&evaluation, &y, &z);
            let mut weighted_a_i = a_i.clone();
            for (row, weight) in sigma.iter().enumerate() {
                weighted_a_i.row_mut(row).scale_mut(*weight);
            }
            let condensed = hessian + a_i.transpose() * &weighted_a_i;
            let (kkt, regularization) = factor_kkt(&condensed, a_e, mu, last_regularization)
                .map_err(|reason| numerical_error(iteration, reason))?;
            if regularization > 0. {
                last_regularization = regularization;
            }

            let system = NewtonSystem {
                kkt,
                inequality_jacobian: a_i,
                dual_residual: &dual_residual,
                s: &s,
                z: &z,
                sigma,
                mu,
            };
            let slack_residual = c_i - &s;
            let direction = system.direction(c_e, &slack_residual);

            let tau = (1. - mu).max(0.99);
            let alpha_max = fraction_to_boundary(&s, &direction.ds, tau);
            let search = LineSearch {
                theta: infeasibility(c_e, c_i, &s),
                phi: barrier_objective(evaluation.objective, &s, mu),
                phi_slope: evaluation.objective_gradient.dot(&direction.dx)
                    - mu * direction.ds.component_div(&s).sum(),
                theta_min,
                theta_max,
            };

            // filter line search on (infeasibility, barrier objective)
            let mut alpha = alpha_max;
            let mut accepted_alpha = None;
            let mut correction = None;
            for backtrack in 0..MAX_BACKTRACKS {
                let trial_x = &x + &direction.dx * alpha;
                let trial_s = &s + &direction.ds * alpha;
                let trial = self.values(&trial_x);
                if trial.is_finite() {
                    let trial_theta =
                        infeasibility(&trial.equalities, &trial.inequalities, &trial_s);
                    let trial_phi = barrier_objective(trial.objective, &trial_s, mu);
                    if let Some(augment) = search.accepts(&filter, alpha, trial_theta, trial_phi) {
                        accepted_alpha = Some((alpha, augment));
                        break;
                    }
                    if backtrack == 0 && trial_theta >= search.theta {
                        correction = self.second_order_correction(
                            &system,
                            &search,
                            &filter,
                            &x,
                            (c_e, &slack_residual),
                            alpha,
                            (trial, trial_s),
                            tau,
                        );
                        if correction.is_some() {
                            break;
                        }
                    }
                }
                alpha /= 2.;
            }

            let accepted = match (correction, accepted_alpha) {
                (Some(corrected), _) => Some(corrected),
                (None, Some((alpha, augment))) => Some((direction, alpha, augment)),
                (None, None) if search.theta <= theta_min => {
                    // nearly feasible already, so restoration has nothing to work with
                    consecutive_fallbacks += 1;
                    if consecutive_fallbacks > MAX_CONSECUTIVE_FALLBACKS {
                        return Err(numerical_error(iteration, "line search failed repeatedly"));
                    }
                    warn!("Line search failed at iteration {}, taking the full step", iteration);
                    filter.reset();
                    let alpha_z = fraction_to_boundary(&z, &direction.dz, tau);
                    x += &direction.dx * alpha_max;
                    s += &direction.ds * alpha_max;
                    y += &direction.dy * alpha_max;
                    z += &direction.dz * alpha_z;
                    None
                }
                (None, None) => {
                    warn!("Line search failed at iteration {}, restoring feasibility", iteration);
                    filter.add(search.theta, search.phi);
                    x = self.restore(&x, mu, &filter, search.theta, theta_max, iteration)?;
                    s = self.values(&x).inequalities.map(|c| c.max(mu));
                    estimate_multipliers = true;
                    None
                }
            };

            let step_size = match accepted {
                Some((step, alpha, augment)) => {
                    if augment {
                        filter.add(search.theta, search.phi);
                    }
                    consecutive_fallbacks = 0;
                    let alpha_z = fraction_to_boundary(&z, &step.dz, tau);
                    x += &step.dx * alpha;
                    s += &step.ds * alpha;
                    y += &step.dy * alpha;
                    z += &step.dz * alpha_z;
                    alpha
                }
                None => alpha_max,
            };

            // keep the multipliers within a bounded factor of the central path
            for idx in 0..inequality_count {
                let central = mu / s[idx];
                z[idx] =
                    z[idx].clamp(central / MULTIPLIER_SAFEGUARD, central * MULTIPLIER_SAFEGUARD);
            }

            if x.amax() > DIVERGENCE_LIMIT {
                return Err(numerical_error(iteration, "iterates diverged"));
            }

            debug!(
                "iteration {}: error {:e}, barrier {:e}, infeasibility {:e}, step {:e}, \
                 regularization {:e}",
                iteration,
                error,
                mu,
                search.theta,
                step_size,
                regularization
            );
        }

        warn!("Solver stopped after {} iterations (error {:e})", options.max_iterations, error);
        Err(SolveFailure::IterationLimit { iterations: options.max_iterations, error })
    }

    /// Corrects a rejected full step for the curvature of the constraints, returning the
    /// corrected direction and its step size when the filter accepts it
    #[allow(clippy::too_many_arguments)]
    fn second_order_correction(
        &self,
        system: &NewtonSystem,
        search: &LineSearch,
        filter: &Filter,
        x: &DVector<f64>,
        residuals: (&DVector<f64>, &DVector<f64>),
        alpha: f64,
        trial: (Values, DVector<f64>),
        tau: f64,
    ) -> Option<(Direction, f64, bool)> {
        let mut equality_residual = residuals.0.clone();
        let mut slack_residual = residuals.1.clone();
        let (mut trial, mut trial_s) = trial;
        let mut step = alpha;
        let mut previous_theta = search.theta;

        for _ in 0..MAX_SECOND_ORDER_CORRECTIONS {
            equality_residual = equality_residual * step + &trial.equalities;
            slack_residual = slack_residual * step + (&trial.inequalities - &trial_s);
            let corrected = system.direction(&equality_residual, &slack_residual);

            step = fraction_to_boundary(system.s, &corrected.ds, tau);
            trial_s = system.s + &corrected.ds * step;
            trial = self.values(&(x + &corrected.dx * step));
            if !trial.is_finite() {
                return None;
            }
            let theta = infeasibility(&trial.equalities, &trial.inequalities, &trial_s);
            let phi = barrier_objective(trial.objective, &trial_s, system.mu);
            if let Some(augment) = search.accepts(filter, alpha, theta, phi) {
                return Some((corrected, step, augment));
            }
            if theta > SECOND_ORDER_CONTRACTION * previous_theta {
                return None;
            }
            previous_theta = theta;
        }
        None
    }

    /// Minimizes the constraint violation with damped Gauss-Newton steps until the filter
    /// accepts the point again
    fn restore(
        &self,
        x: &DVector<f64>,
        mu: f64,
        filter: &Filter,
        entry_theta: f64,
        theta_max: f64,
        iteration: usize,
    ) -> Result<DVector<f64>, SolveFailure> {
        let mut x = x.clone();
        let mut damping = FIRST_DAMPING;
        let mut violation = self.values(&x).squared_violation();

        for _ in 0..MAX_RESTORATION_ITERATIONS {
            let evaluation = self.evaluate(&x);
            let (jacobian, residual) = violated_constraints(&evaluation);
            let gradient = jacobian.transpose() * &residual;
            let remaining = residual.amax();
            if remaining <= self.options.tolerance {
                // only the slacks were off, resetting them is all that is left to do
                return Ok(x);
            }
            if gradient.amax() <= self.options.tolerance * remaining.max(1.) {
                warn!(
                    "Feasibility restoration converged to an infeasible point (violation {:e})",
                    remaining
                );
                return Err(SolveFailure::Infeasible {
                    iterations: iteration,
                    violation: remaining,
                });
            }

            let normal = jacobian.transpose() * &jacobian;
            loop {
                let mut damped = normal.clone();
                for idx in 0..damped.nrows() {
                    damped[(idx, idx)] += damping;
                }
                if let Some(cholesky) = damped.cholesky() {
                    let trial_x = &x - cholesky.solve(&gradient);
                    let trial = self.values(&trial_x);
                    if trial.is_finite() && trial.squared_violation() < violation {
                        x = trial_x;
                        violation = trial.squared_violation();
                        damping = (damping / 10.).max(MIN_DAMPING);
                        break;
                    }
                }
                damping *= 10.;
                if damping > MAX_DAMPING {
                    warn!("Feasibility restoration is stuck (violation {:e})", remaining);
                    return Err(SolveFailure::Infeasible {
                        iterations: iteration,
                        violation: remaining,
                    });
                }
            }

            let values = self.values(&x);
            let s = values.inequalities.map(|c| c.max(mu));
            let theta = infeasibility(&values.equalities, &values.inequalities, &s);
            let phi = barrier_objective(values.objective, &s, mu);
            let reduced = theta <= RESTORATION_REDUCTION * entry_theta;
            if theta <= theta_max && reduced && filter.accepts(theta, phi) {
                debug!("Restored feasibility from {:e} to {:e}", entry_theta, theta);
                return Ok(x);
            }
        }

        let remaining = self.values(&x).squared_violation();
        Err(SolveFailure::Infeasible { iterations: iteration, violation: (2. * remaining).sqrt() })
    }
}

impl Backend for InteriorPointSolver {
    fn decision_variable(&mut self) -> Expr {
        self.initial_values.push(0.);
        Expr::variable(self.initial_values.len() - 1)
    }

    fn set_initial_value(&mut self, variable: &Expr, value: f64) {
        if let Some(index) = variable.variable_index() {
            self.initial_values[index] = value;
        }
    }

    fn subject_to(&mut self, constraint: Constraint) {
        if let Some(value) = constraint.expr().constant_value() {
            // nothing to optimize, only something to check
            self.constant_violation = self.constant_violation.max(constraint.violation(&[]));
            if value.is_nan() {
                self.constant_violation = f64::INFINITY;
            }
            return;
        }
        match constraint {
            Constraint::Equality(expr) => self.equalities.push(CompiledExpr::new(expr)),
            Constraint::Inequality(expr) => self.inequalities.push(CompiledExpr::new(expr)),
        }
    }

    fn minimize(&mut self, objective: Expr) {
        self.objective = Some(CompiledExpr::new(objective));
    }

    fn solve(&mut self) -> Result<Solution, SolveFailure> {
        self.run()
    }
}

fn numerical_error(iterations: usize, reason: &str) -> SolveFailure {
    warn!("Numerical error after {} iterations: {}", iterations, reason);
    SolveFailure::NumericalError { iterations, reason: reason.to_string() }
}

/// evaluates constraint values, the dense Jacobian and each constraint's local Hessian
fn evaluate_constraints(
    constraints: &[CompiledExpr],
    values: &[f64],
    n: usize,
) -> (DVector<f64>, DMatrix<f64>, Vec<DMatrix<f64>>) {
    let mut c = DVector::zeros(constraints.len());
    let mut jacobian = DMatrix::zeros(constraints.len(), n);
    let mut hessians = Vec::with_capacity(constraints.len());
    for (row, compiled) in constraints.iter().enumerate() {
        let jet = compiled.expr.jet(values, &compiled.variables);
        c[row] = jet.value;
        for (local, &index) in compiled.variables.iter().enumerate() {
            jacobian[(row, index)] = jet.gradient[local];
        }
        hessians.push(jet.hessian);
    }
    (c, jacobian, hessians)
}

fn evaluation_is_finite(evaluation: &Evaluation) -> bool {
    evaluation.objective.is_finite()
        && evaluation.objective_gradient.iter().all(|v| v.is_finite())
        && evaluation.equalities.iter().all(|v| v.is_finite())
        && evaluation.inequalities.iter().all(|v| v.is_finite())
        && evaluation.equality_jacobian.iter().all(|v| v.is_finite())
        && evaluation.inequality_jacobian.iter().all(|v| v.is_finite())
}

/// the equality rows and the violated inequality rows, with their residuals
fn violated_constraints(evaluation: &Evaluation) -> (DMatrix<f64>, DVector<f64>) {
    let violated: Vec<usize> =
        (0..evaluation.inequalities.len()).filter(|&i| evaluation.inequalities[i] < 0.).collect();
    let equality_count = evaluation.equalities.len();
    let n = evaluation.objective_gradient.len();

    let mut jacobian = DMatrix::zeros(equality_count + violated.len(), n);
    let mut residual = DVector::zeros(equality_count + violated.len());
    jacobian.rows_mut(0, equality_count).copy_from(&evaluation.equality_jacobian);
    residual.rows_mut(0, equality_count).copy_from(&evaluation.equalities);
    for (offset, &row) in violated.iter().enumerate() {
        let gradient = evaluation.inequality_jacobian.row(row);
        jacobian.row_mut(equality_count + offset).copy_from(&gradient);
        residual[equality_count + offset] = evaluation.inequalities[row];
    }
    (jacobian, residual)
}

/// adds `weight * local` into the rows and columns of `target` named by `variables`
fn scatter(target: &mut DMatrix<f64>, variables: &[usize], local: &DMatrix<f64>, weight: f64) {
    if weight == 0. {
        return;
    }
    for (i, &row) in variables.iter().enumerate() {
        for (j, &col) in variables.iter().enumerate() {
            target[(row, col)] += weight * local[(i, j)];
        }
    }
}

/// equality multipliers that best explain the objective gradient, or zero when they come
/// out unreasonably large
fn least_squares_multipliers(
    gradient: &DVector<f64>,
    a_e: &DMatrix<f64>,
    a_i: &DMatrix<f64>,
    z: &DVector<f64>,
) -> DVector<f64> {
    let m = a_e.nrows();
    if m == 0 {
        return DVector::zeros(0);
    }
    let mut normal = a_e * a_e.transpose();
    for idx in 0..m {
        normal[(idx, idx)] += LEAST_SQUARES_REGULARIZATION;
    }
    match normal.cholesky() {
        Some(cholesky) => {
            let y = cholesky.solve(&(a_e * (gradient - a_i.transpose() * z)));
            if y.amax() <= MAX_INITIAL_MULTIPLIER {
                y
            } else {
                DVector::zeros(m)
            }
        }
        None => DVector::zeros(m),
    }
}

fn error_scaling(y: &DVector<f64>, z: &DVector<f64>) -> (f64, f64) {
    let multiplier_count = y.len() + z.len();
    let dual_scale = if multiplier_count == 0 {
        1.
    } else {
        let mean = (y.lp_norm(1) + z.lp_norm(1)) / multiplier_count as f64;
        SCALING_THRESHOLD.max(mean) / SCALING_THRESHOLD
    };
    let complementarity_scale = if z.is_empty() {
        1.
    } else {
        SCALING_THRESHOLD.max(z.lp_norm(1) / z.len() as f64) / SCALING_THRESHOLD
    };
    (dual_scale, complementarity_scale)
}

/// the scaled optimality error of the barrier problem with parameter `mu`
fn kkt_error(
    dual_residual: &DVector<f64>,
    c_e: &DVector<f64>,
    c_i: &DVector<f64>,
    s: &DVector<f64>,
    z: &DVector<f64>,
    mu: f64,
    (dual_scale, complementarity_scale): (f64, f64),
) -> f64 {
    let complementarity = s.component_mul(z).map(|v| v - mu);
    let slack_residual = c_i - s;
    (dual_residual.amax() / dual_scale)
        .max(complementarity.amax() / complementarity_scale)
        .max(c_e.amax())
        .max(slack_residual.amax())
}

/// the one-norm of the equality and slack residuals
fn infeasibility(c_e: &DVector<f64>, c_i: &DVector<f64>, s: &DVector<f64>) -> f64 {
    c_e.lp_norm(1) + (c_i - s).lp_norm(1)
}

fn barrier_objective(objective: f64, s: &DVector<f64>, mu: f64) -> f64 {
    objective - mu * s.iter().map(|si| si.ln()).sum::<f64>()
}

/// the largest step in (0, 1] that keeps `value + alpha * step >= (1 - tau) * value`
fn fraction_to_boundary(value: &DVector<f64>, step: &DVector<f64>, tau: f64) -> f64 {
    value.iter().zip(step.iter()).fold(1., |alpha, (&v, &d)| {
        if d < 0. {
            alpha.min(-tau * v / d)
        } else {
            alpha
        }
    })
}

/// Factors
///
/// ```text
/// [ K + delta I   A'           ]
/// [ A             -delta_c I   ]
/// ```
///
/// increasing `delta` until the inertia is (n, m, 0), which holds exactly when K + delta I
/// is positive definite on the null space of A. `delta_c` only becomes nonzero when A is
/// rank deficient. Returns the factors and the `delta` that was needed.
fn factor_kkt(
    k: &DMatrix<f64>,
    a: &DMatrix<f64>,
    mu: f64,
    last_regularization: f64,
) -> Result<(Ldl, f64), &'static str> {
    let (n, m) = (k.nrows(), a.nrows());
    let mut kkt = DMatrix::zeros(n + m, n + m);
    kkt.view_mut((0, 0), (n, n)).copy_from(k);
    kkt.view_mut((n, 0), (m, n)).copy_from(a);
    kkt.view_mut((0, n), (n, m)).copy_from(&a.transpose());
    if kkt.iter().any(|v| !v.is_finite()) {
        return Err("Newton system is not finite");
    }

    let mut regularization = 0.;
    let mut dual_regularization = 0.;
    loop {
        let mut regularized = kkt.clone();
        for idx in 0..n {
            regularized[(idx, idx)] += regularization;
        }
        for idx in n..n + m {
            regularized[(idx, idx)] -= dual_regularization;
        }
        let ldl = Ldl::factor(&regularized);
        let inertia = ldl.inertia();
        if inertia.positive == n && inertia.negative == m && inertia.zero == 0 {
            return Ok((ldl, regularization));
        }
        if inertia.zero > 0 && dual_regularization == 0. {
            // redundant equalities, retry before touching the Hessian
            dual_regularization = DUAL_REGULARIZATION * mu.powf(DUAL_REGULARIZATION_EXPONENT);
            continue;
        }

        regularization = if regularization == 0. {
            if last_regularization == 0. {
                FIRST_REGULARIZATION
            } else {
                (last_regularization / 3.).max(MIN_REGULARIZATION)
            }
        } else if last_regularization == 0. {
            regularization * 100.
        } else {
            regularization * 8.
        };
        if regularization > MAX_REGULARIZATION {
            return Err("Hessian could not be regularized");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert::close;

    fn solver() -> InteriorPointSolver {
        InteriorPointSolver::new(SolverOptions::default())
    }

    #[test]
    fn options_default() {
        let options = SolverOptions::default();
        assert_eq!(1e-8, options.tolerance);
        assert_eq!(1000, options.max_iterations);
    }

    #[test]
    fn unconstrained_quadratic() {
        let mut solver = solver();
        let x = solver.decision_variable();
        let y = solver.decision_variable();
        solver.minimize((&x - 3.).square() + 2. * (&y + 1.).square() + &x * &y);
        let solution = solver.solve().unwrap();
        // gradient: 2(x - 3) + y = 0, 4(y + 1) + x = 0
        close(4., solution.value(&x), 1e-6);
        close(-2., solution.value(&y), 1e-6);
    }

    #[test]
    fn equality_constrained_quadratic() {
        let mut solver = solver();
        let x = solver.decision_variable();
        let y = solver.decision_variable();
        solver.minimize(x.square() + y.square());
        solver.subject_to((&x + 2. * &y).equal_to(5.));
        let solution = solver.solve().unwrap();
        close(1., solution.value(&x), 1e-6);
        close(2., solution.value(&y), 1e-6);
    }

    #[test]
    fn active_inequality() {
        let mut solver = solver();
        let x = solver.decision_variable();
        solver.set_initial_value(&x, 5.);
        solver.minimize(x.square());
        solver.subject_to(x.at_least(1.));
        let solution = solver.solve().unwrap();
        close(1., solution.value(&x), 1e-6);
    }

    #[test]
    fn inactive_inequality() {
        let mut solver = solver();
        let x = solver.decision_variable();
        solver.minimize((&x - 0.5).square());
        solver.subject_to(x.at_most(2.));
        let solution = solver.solve().unwrap();
        close(0.5, solution.value(&x), 1e-6);
    }

    #[test]
    fn linear_program() {
        // the Hessian is zero, only the constraints pin the step down
        let mut solver = solver();
        let x = solver.decision_variable();
        let y = solver.decision_variable();
        solver.minimize(&x + &y);
        solver.subject_to(x.equal_to(&y));
        solver.subject_to(x.at_least(1.));
        let solution = solver.solve().unwrap();
        close(1., solution.value(&x), 1e-6);
        close(1., solution.value(&y), 1e-6);
    }

    #[test]
    fn nonlinear_constraint() {
        // closest point of the unit circle to (2, 2)
        let mut solver = solver();
        let x = solver.decision_variable();
        let y = solver.decision_variable();
        solver.set_initial_value(&x, 1.);
        solver.set_initial_value(&y, 0.);
        solver.minimize((&x - 2.).square() + (&y - 2.).square());
        solver.subject_to(Expr::norm_squared(&x, &y).equal_to(1.));
        let solution = solver.solve().unwrap();
        let expected = 0.5f64.sqrt();
        close(expected, solution.value(&x), 1e-6);
        close(expected, solution.value(&y), 1e-6);
    }

    #[test]
    fn redundant_equalities() {
        let mut solver = solver();
        let x = solver.decision_variable();
        let y = solver.decision_variable();
        solver.minimize(x.square() + y.square());
        solver.subject_to((&x + &y).equal_to(2.));
        solver.subject_to((2. * &x + 2. * &y).equal_to(4.));
        let solution = solver.solve().unwrap();
        close(1., solution.value(&x), 1e-6);
        close(1., solution.value(&y), 1e-6);
    }

    #[test]
    fn rosenbrock_in_disc() {
        // the disc constraint of radius sqrt(2) touches the unconstrained minimum at (1, 1)
        let mut solver = solver();
        let x = solver.decision_variable();
        let y = solver.decision_variable();
        solver.minimize((1. - &x).square() + 100. * (&y - x.square()).square());
        solver.subject_to(Expr::norm_squared(&x, &y).at_most(1.5));
        let solution = solver.solve().unwrap();
        let (sx, sy) = (solution.value(&x), solution.value(&y));
        // the constrained optimum lies on the boundary, close to (0.907, 0.823)
        close(1.5, sx * sx + sy * sy, 1e-5);
        close(0.907, sx, 1e-2);
        close(0.823, sy, 1e-2);
    }

    #[test]
    fn infeasible_constant_constraint() {
        let mut solver = solver();
        let x = solver.decision_variable();
        solver.minimize(x.square());
        solver.subject_to(Expr::constant(1.).equal_to(2.));
        match solver.solve() {
            Err(SolveFailure::Infeasible { iterations, .. }) => assert_eq!(0, iterations),
            other => panic!("expected infeasibility, got {:?}", other),
        }
    }

    #[test]
    fn contradictory_constraints_fail() {
        let options = SolverOptions { max_iterations: 200, ..SolverOptions::default() };
        let mut solver = InteriorPointSolver::new(options);
        let x = solver.decision_variable();
        solver.minimize(x.square());
        solver.subject_to(x.equal_to(3.));
        solver.subject_to(x.at_most(1.));
        assert!(solver.solve().is_err());
    }

    #[test]
    fn iteration_limit() {
        let options = SolverOptions { max_iterations: 1, ..SolverOptions::default() };
        let mut solver = InteriorPointSolver::new(options);
        let x = solver.decision_variable();
        let y = solver.decision_variable();
        solver.minimize((1. - &x).square() + 100. * (&y - x.square()).square());
        solver.subject_to(Expr::norm_squared(&x, &y).at_most(1.5));
        assert_eq!(
            Some(1),
            match solver.solve() {
                Err(SolveFailure::IterationLimit { iterations, .. }) => Some(iterations),
                _ => None,
            }
        );
    }

    #[test]
    fn fraction_to_boundary_limits_step() {
        let value = DVector::from_vec(vec![1., 2.]);
        let step = DVector::from_vec(vec![-2., 1.]);
        close(0.495, fraction_to_boundary(&value, &step, 0.99), 1e-12);
        close(1., fraction_to_boundary(&value, &DVector::from_vec(vec![1., 1.]), 0.99), 1e-12);
    }

    #[test]
    fn kkt_regularized_for_negative_curvature() {
        // K curves down along x0, which the constraint on x1 leaves free
        let k = DMatrix::from_row_slice(2, 2, &[-1., 0., 0., 2.]);
        let a = DMatrix::from_row_slice(1, 2, &[0., 1.]);
        let (kkt, regularization) = factor_kkt(&k, &a, 0.1, 0.).unwrap();
        assert!(regularization > 1.);

        let solution = kkt.solve(&DVector::from_vec(vec![1., 0., 2.]));
        close(1. / (regularization - 1.), solution[0], 1e-9);
        // the constraint row is honoured up to the tiny dual regularization
        close(2., solution[1], 1e-5);
    }

    #[test]
    fn kkt_without_regularization_when_convex_on_null_space() {
        // indefinite K, but positive along the null space of A
        let k = DMatrix::from_row_slice(2, 2, &[1., 0., 0., -2.]);
        let a = DMatrix::from_row_slice(1, 2, &[0., 1.]);
        let (kkt, regularization) = factor_kkt(&k, &a, 0.1, 0.).unwrap();
        assert_eq!(0., regularization);

        let solution = kkt.solve(&DVector::from_vec(vec![1., 0., 2.]));
        close(1., solution[0], 1e-12);
        close(2., solution[1], 1e-12);
    }

    #[test]
    fn kkt_with_redundant_rows() {
        let k = DMatrix::identity(2, 2);
        let a = DMatrix::from_row_slice(2, 2, &[1., 1., 1., 1.]);
        let (kkt, regularization) = factor_kkt(&k, &a, 0.1, 0.).unwrap();
        assert_eq!(0., regularization);

        let solution = kkt.solve(&DVector::from_vec(vec![0., 0., 1., 1.]));
        close(0.5, solution[0], 1e-6);
        close(0.5, solution[1], 1e-6);
    }

    #[test]
    fn restoration_reports_infeasibility() {
        let mut solver = solver();
        let x = solver.decision_variable();
        solver.minimize(x.square());
        solver.subject_to(x.equal_to(3.));
        solver.subject_to(x.at_most(1.));
        match solver.restore(&DVector::from_vec(vec![0.]), 0.1, &Filter::default(), 1., 1e4, 0) {
            Err(SolveFailure::Infeasible { violation, .. }) => close(1., violation, 1e-6),
            other => panic!("expected infeasibility, got {:?}", other),
        }
    }
}
