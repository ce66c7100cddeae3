//! The nonlinear programming backend the trajectory problems are written against.
//!
//! Problems only talk to the [`Backend`] trait: declare variables, add constraints, set an
//! objective and ask for a solve. [`InteriorPointSolver`] actually solves;
//! [`RecordingBackend`] only records, which makes the formulation testable on its own.

mod expr;
mod ipm;
mod ldl;

pub use expr::Expr;
pub use ipm::{InteriorPointSolver, SolverOptions};

use thiserror::Error;

use crate::set::IntervalSet1d;

/// A constraint on an expression
#[derive(Debug, Clone)]
pub enum Constraint {
    /// the expression must equal zero
    Equality(Expr),
    /// the expression must be nonnegative
    Inequality(Expr),
}

impl Constraint {
    pub fn expr(&self) -> &Expr {
        match self {
            Constraint::Equality(expr) | Constraint::Inequality(expr) => expr,
        }
    }

    /// How far the constraint is from being satisfied at the given point, zero when it is
    pub fn violation(&self, values: &[f64]) -> f64 {
        match self {
            Constraint::Equality(expr) => expr.value(values).abs(),
            Constraint::Inequality(expr) => (-expr.value(values)).max(0.),
        }
    }
}

impl Expr {
    /// Constrains `self == rhs`
    pub fn equal_to(&self, rhs: impl Into<Expr>) -> Constraint {
        Constraint::Equality(self - rhs.into())
    }

    /// Constrains `self >= rhs`
    pub fn at_least(&self, rhs: impl Into<Expr>) -> Constraint {
        Constraint::Inequality(self - rhs.into())
    }

    /// Constrains `self <= rhs`
    pub fn at_most(&self, rhs: impl Into<Expr>) -> Constraint {
        Constraint::Inequality(rhs.into() - self)
    }
}

/// Why a solve did not produce an answer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveFailure {
    #[error(
        "problem is locally infeasible after {iterations} iterations \
         (constraint violation {violation:e})"
    )]
    Infeasible { iterations: usize, violation: f64 },

    #[error("no solution within {iterations} iterations (remaining error {error:e})")]
    IterationLimit { iterations: usize, error: f64 },

    #[error("numerical breakdown after {iterations} iterations: {reason}")]
    NumericalError { iterations: usize, reason: String },
}

/// Decision variable values found by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    values: Vec<f64>,
    iterations: usize,
}

impl Solution {
    pub fn new(values: Vec<f64>, iterations: usize) -> Solution {
        Solution { values, iterations }
    }

    /// Evaluates any expression over the solved variables
    pub fn value(&self, expr: &Expr) -> f64 {
        expr.value(&self.values)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// The expression builder and solver a problem is formulated on
pub trait Backend {
    /// Declares a new, unbounded decision variable with an initial value of zero
    fn decision_variable(&mut self) -> Expr;

    /// Seeds the solver's starting point; ignored when `variable` is not a bare variable
    fn set_initial_value(&mut self, variable: &Expr, value: f64);

    fn subject_to(&mut self, constraint: Constraint);

    fn minimize(&mut self, objective: Expr);

    /// Runs the solver once
    fn solve(&mut self) -> Result<Solution, SolveFailure>;

    /// Declares a decision variable constrained to `bounds`
    fn bounded_variable(&mut self, bounds: &IntervalSet1d) -> Expr {
        let variable = self.decision_variable();
        if bounds.is_exact() {
            self.subject_to(variable.equal_to(bounds.lower));
        } else {
            if bounds.is_lower_bounded() {
                self.subject_to(variable.at_least(bounds.lower));
            }
            if bounds.is_upper_bounded() {
                self.subject_to(variable.at_most(bounds.upper));
            }
        }
        variable
    }

    /// Declares a fixed parameter
    fn parameter(&mut self, value: f64) -> Expr {
        Expr::constant(value)
    }
}

/// A backend that records the formulation instead of solving it
///
/// Solving returns the initial values unchanged, so the seeding of a problem can be
/// inspected through the same extraction path a real solve goes through.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    initial_values: Vec<f64>,
    equalities: Vec<Expr>,
    inequalities: Vec<Expr>,
    objective: Option<Expr>,
}

impl RecordingBackend {
    pub fn new() -> RecordingBackend {
        RecordingBackend::default()
    }

    pub fn variable_count(&self) -> usize {
        self.initial_values.len()
    }

    pub fn initial_values(&self) -> &[f64] {
        &self.initial_values
    }

    /// expressions constrained to equal zero
    pub fn equalities(&self) -> &[Expr] {
        &self.equalities
    }

    /// expressions constrained to be nonnegative
    pub fn inequalities(&self) -> &[Expr] {
        &self.inequalities
    }

    pub fn objective(&self) -> Option<&Expr> {
        self.objective.as_ref()
    }

    /// The largest violation of any recorded constraint at the given point
    pub fn max_violation(&self, values: &[f64]) -> f64 {
        let equalities = self.equalities.iter().map(|e| e.value(values).abs());
        let inequalities = self.inequalities.iter().map(|e| (-e.value(values)).max(0.));
        equalities.chain(inequalities).fold(0., f64::max)
    }
}

impl Backend for RecordingBackend {
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
        match constraint {
            Constraint::Equality(expr) => self.equalities.push(expr),
            Constraint::Inequality(expr) => self.inequalities.push(expr),
        }
    }

    fn minimize(&mut self, objective: Expr) {
        self.objective = Some(objective);
    }

    fn solve(&mut self) -> Result<Solution, SolveFailure> {
        Ok(Solution::new(self.initial_values.clone(), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_builders() {
        let mut backend = RecordingBackend::new();
        let x = backend.decision_variable();
        let values = [2.];

        assert_eq!(0., x.equal_to(2.).violation(&values));
        assert_eq!(1., x.equal_to(3.).violation(&values));
        assert_eq!(0., x.at_least(1.).violation(&values));
        assert_eq!(0.5, x.at_least(2.5).violation(&values));
        assert_eq!(0., x.at_most(2.).violation(&values));
        assert_eq!(1., x.at_most(1.).violation(&values));
    }

    #[test]
    fn recording_backend_records() {
        let mut backend = RecordingBackend::new();
        let x = backend.decision_variable();
        let y = backend.bounded_variable(&IntervalSet1d::new(0., 1.));
        let z = backend.bounded_variable(&IntervalSet1d::exact(4.));
        let _free = backend.bounded_variable(&IntervalSet1d::r1());
        backend.subject_to(x.equal_to(&y));
        backend.minimize(&x + &z);

        assert_eq!(4, backend.variable_count());
        assert_eq!(2, backend.equalities().len());
        assert_eq!(2, backend.inequalities().len());
        assert!(backend.objective().is_some());
    }

    #[test]
    fn recording_backend_solution_is_initial_guess() {
        let mut backend = RecordingBackend::new();
        let x = backend.decision_variable();
        let y = backend.decision_variable();
        backend.set_initial_value(&y, 3.);
        // seeding a compound expression is a no-op
        backend.set_initial_value(&(&x + &y), 10.);
        backend.subject_to(y.at_most(1.));

        let solution = backend.solve().unwrap();
        assert_eq!(0., solution.value(&x));
        assert_eq!(3., solution.value(&y));
        assert_eq!(5., solution.value(&(&x + &y + 2.)));
        assert_eq!(2., backend.max_violation(solution.values()));
    }

    #[test]
    fn backend_parameter_is_constant() {
        let mut backend = RecordingBackend::new();
        assert_eq!(Some(9.81), backend.parameter(9.81).constant_value());
        assert_eq!(0, backend.variable_count());
    }
}
