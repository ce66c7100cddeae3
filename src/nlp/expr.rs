//! Symbolic scalar expressions over decision variables.
//!
//! Expressions are immutable trees shared through `Rc`. Besides plain evaluation they can
//! be evaluated as a second order jet: value, gradient and Hessian with respect to the
//! variables the expression actually references, which is all an interior point solver
//! needs from a constraint.

use nalgebra::{DMatrix, DVector};
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Formatter;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

#[derive(Debug)]
enum Node {
    Constant(f64),
    Variable(usize),
    Add(Expr, Expr),
    Sub(Expr, Expr),
    Mul(Expr, Expr),
    Div(Expr, Expr),
    Neg(Expr),
    Sin(Expr),
    Cos(Expr),
    Sqrt(Expr),
    Max(Expr, Expr),
    Min(Expr, Expr),
}

/// A scalar expression built from constants, decision variables and elementary functions
#[derive(Debug, Clone)]
pub struct Expr(Rc<Node>);

/// Value, gradient and Hessian of an expression with respect to a local list of variables
#[derive(Debug, Clone)]
pub(crate) struct Jet {
    pub value: f64,
    pub gradient: DVector<f64>,
    pub hessian: DMatrix<f64>,
}

impl Jet {
    fn constant(value: f64, size: usize) -> Jet {
        Jet { value, gradient: DVector::zeros(size), hessian: DMatrix::zeros(size, size) }
    }

    /// applies f to this jet given f(v), f'(v) and f''(v)
    fn chain(self, value: f64, first: f64, second: f64) -> Jet {
        let outer = &self.gradient * self.gradient.transpose();
        Jet {
            value,
            hessian: self.hessian * first + outer * second,
            gradient: self.gradient * first,
        }
    }

    fn chain_linear(self, factor: f64) -> Jet {
        Jet {
            value: self.value * factor,
            gradient: self.gradient * factor,
            hessian: self.hessian * factor,
        }
    }

    fn sum(a: Jet, b: Jet) -> Jet {
        Jet {
            value: a.value + b.value,
            gradient: a.gradient + b.gradient,
            hessian: a.hessian + b.hessian,
        }
    }

    fn difference(a: Jet, b: Jet) -> Jet {
        Jet {
            value: a.value - b.value,
            gradient: a.gradient - b.gradient,
            hessian: a.hessian - b.hessian,
        }
    }

    fn product(a: Jet, b: Jet) -> Jet {
        let cross = &a.gradient * b.gradient.transpose();
        let hessian = &a.hessian * b.value + &b.hessian * a.value + &cross + cross.transpose();
        Jet {
            value: a.value * b.value,
            gradient: &a.gradient * b.value + &b.gradient * a.value,
            hessian,
        }
    }
}

impl Expr {
    /// A fixed value
    ///
    /// # Examples
    /// ```
    /// use holotraj::Expr;
    /// let c = Expr::constant(2.5);
    /// assert_eq!(Some(2.5), c.constant_value());
    /// ```
    pub fn constant(value: f64) -> Expr {
        Expr(Rc::new(Node::Constant(value)))
    }

    pub(crate) fn variable(index: usize) -> Expr {
        Expr(Rc::new(Node::Variable(index)))
    }

    /// Returns the value when the expression does not depend on any variable node
    pub fn constant_value(&self) -> Option<f64> {
        match *self.0 {
            Node::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the variable index when the expression is a bare decision variable
    pub fn variable_index(&self) -> Option<usize> {
        match *self.0 {
            Node::Variable(index) => Some(index),
            _ => None,
        }
    }

    pub fn sin(&self) -> Expr {
        match self.constant_value() {
            Some(value) => Expr::constant(value.sin()),
            None => Expr(Rc::new(Node::Sin(self.clone()))),
        }
    }

    pub fn cos(&self) -> Expr {
        match self.constant_value() {
            Some(value) => Expr::constant(value.cos()),
            None => Expr(Rc::new(Node::Cos(self.clone()))),
        }
    }

    pub fn sqrt(&self) -> Expr {
        match self.constant_value() {
            Some(value) => Expr::constant(value.sqrt()),
            None => Expr(Rc::new(Node::Sqrt(self.clone()))),
        }
    }

    pub fn square(&self) -> Expr {
        self * self
    }

    pub fn max(&self, other: &Expr) -> Expr {
        match (self.constant_value(), other.constant_value()) {
            (Some(a), Some(b)) => Expr::constant(a.max(b)),
            _ => Expr(Rc::new(Node::Max(self.clone(), other.clone()))),
        }
    }

    pub fn min(&self, other: &Expr) -> Expr {
        match (self.constant_value(), other.constant_value()) {
            (Some(a), Some(b)) => Expr::constant(a.min(b)),
            _ => Expr(Rc::new(Node::Min(self.clone(), other.clone()))),
        }
    }

    /// Limits the expression to [lower, upper]
    pub fn clamp(&self, lower: f64, upper: f64) -> Expr {
        self.max(&Expr::constant(lower)).min(&Expr::constant(upper))
    }

    /// The 2D cross product (ax * by - ay * bx)
    pub fn cross(ax: &Expr, ay: &Expr, bx: &Expr, by: &Expr) -> Expr {
        ax * by - ay * bx
    }

    /// The squared euclidean norm of a planar vector
    pub fn norm_squared(x: &Expr, y: &Expr) -> Expr {
        x.square() + y.square()
    }

    /// Evaluates the expression for the given variable values
    pub fn value(&self, values: &[f64]) -> f64 {
        match &*self.0 {
            Node::Constant(value) => *value,
            Node::Variable(index) => values[*index],
            Node::Add(a, b) => a.value(values) + b.value(values),
            Node::Sub(a, b) => a.value(values) - b.value(values),
            Node::Mul(a, b) => a.value(values) * b.value(values),
            Node::Div(a, b) => a.value(values) / b.value(values),
            Node::Neg(a) => -a.value(values),
            Node::Sin(a) => a.value(values).sin(),
            Node::Cos(a) => a.value(values).cos(),
            Node::Sqrt(a) => a.value(values).sqrt(),
            Node::Max(a, b) => a.value(values).max(b.value(values)),
            Node::Min(a, b) => a.value(values).min(b.value(values)),
        }
    }

    /// Returns the sorted, deduplicated indices of the variables the expression references
    pub fn variables(&self) -> Vec<usize> {
        let mut found = BTreeSet::new();
        self.collect_variables(&mut found);
        found.into_iter().collect()
    }

    fn collect_variables(&self, found: &mut BTreeSet<usize>) {
        match &*self.0 {
            Node::Constant(_) => {}
            Node::Variable(index) => {
                found.insert(*index);
            }
            Node::Neg(a) | Node::Sin(a) | Node::Cos(a) | Node::Sqrt(a) => {
                a.collect_variables(found)
            }
            Node::Add(a, b)
            | Node::Sub(a, b)
            | Node::Mul(a, b)
            | Node::Div(a, b)
            | Node::Max(a, b)
            | Node::Min(a, b) => {
                a.collect_variables(found);
                b.collect_variables(found);
            }
        }
    }

    /// Evaluates value, gradient and Hessian with respect to `variables`, which must be
    /// sorted and contain every variable the expression references
    pub(crate) fn jet(&self, values: &[f64], variables: &[usize]) -> Jet {
        let size = variables.len();
        match &*self.0 {
            Node::Constant(value) => Jet::constant(*value, size),
            Node::Variable(index) => {
                let mut jet = Jet::constant(values[*index], size);
                if let Ok(local) = variables.binary_search(index) {
                    jet.gradient[local] = 1.;
                }
                jet
            }
            Node::Add(a, b) => Jet::sum(a.jet(values, variables), b.jet(values, variables)),
            Node::Sub(a, b) => Jet::difference(a.jet(values, variables), b.jet(values, variables)),
            Node::Mul(a, b) => Jet::product(a.jet(values, variables), b.jet(values, variables)),
            Node::Div(a, b) => {
                let denominator = b.jet(values, variables);
                let v = denominator.value;
                let reciprocal = denominator.chain(1. / v, -1. / (v * v), 2. / (v * v * v));
                Jet::product(a.jet(values, variables), reciprocal)
            }
            Node::Neg(a) => a.jet(values, variables).chain_linear(-1.),
            Node::Sin(a) => {
                let inner = a.jet(values, variables);
                let (s, c) = inner.value.sin_cos();
                inner.chain(s, c, -s)
            }
            Node::Cos(a) => {
                let inner = a.jet(values, variables);
                let (s, c) = inner.value.sin_cos();
                inner.chain(c, -s, -c)
            }
            Node::Sqrt(a) => {
                let inner = a.jet(values, variables);
                let value = inner.value;
                let root = value.sqrt();
                inner.chain(root, 0.5 / root, -0.25 / (root * value))
            }
            Node::Max(a, b) => {
                let (a, b) = (a.jet(values, variables), b.jet(values, variables));
                if a.value >= b.value { a } else { b }
            }
            Node::Min(a, b) => {
                let (a, b) = (a.jet(values, variables), b.jet(values, variables));
                if a.value <= b.value { a } else { b }
            }
        }
    }

    fn sum(lhs: &Expr, rhs: &Expr) -> Expr {
        match (lhs.constant_value(), rhs.constant_value()) {
            (Some(a), Some(b)) => Expr::constant(a + b),
            (Some(a), None) if a == 0. => rhs.clone(),
            (None, Some(b)) if b == 0. => lhs.clone(),
            _ => Expr(Rc::new(Node::Add(lhs.clone(), rhs.clone()))),
        }
    }

    fn difference(lhs: &Expr, rhs: &Expr) -> Expr {
        match (lhs.constant_value(), rhs.constant_value()) {
            (Some(a), Some(b)) => Expr::constant(a - b),
            (Some(a), None) if a == 0. => Expr::negation(rhs),
            (None, Some(b)) if b == 0. => lhs.clone(),
            _ => Expr(Rc::new(Node::Sub(lhs.clone(), rhs.clone()))),
        }
    }

    fn product(lhs: &Expr, rhs: &Expr) -> Expr {
        match (lhs.constant_value(), rhs.constant_value()) {
            (Some(a), Some(b)) => Expr::constant(a * b),
            (Some(a), _) | (_, Some(a)) if a == 0. => Expr::constant(0.),
            (Some(a), None) if a == 1. => rhs.clone(),
            (None, Some(b)) if b == 1. => lhs.clone(),
            _ => Expr(Rc::new(Node::Mul(lhs.clone(), rhs.clone()))),
        }
    }

    fn quotient(lhs: &Expr, rhs: &Expr) -> Expr {
        match (lhs.constant_value(), rhs.constant_value()) {
            (Some(a), Some(b)) => Expr::constant(a / b),
            (Some(a), None) if a == 0. => Expr::constant(0.),
            (None, Some(b)) if b == 1. => lhs.clone(),
            _ => Expr(Rc::new(Node::Div(lhs.clone(), rhs.clone()))),
        }
    }

    fn negation(operand: &Expr) -> Expr {
        match operand.constant_value() {
            Some(value) => Expr::constant(-value),
            None => Expr(Rc::new(Node::Neg(operand.clone()))),
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Expr {
        Expr::constant(value)
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Expr {
        expr.clone()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Node::Constant(value) => write!(f, "{}", value),
            Node::Variable(index) => write!(f, "x{}", index),
            Node::Add(a, b) => write!(f, "({} + {})", a, b),
            Node::Sub(a, b) => write!(f, "({} - {})", a, b),
            Node::Mul(a, b) => write!(f, "{} * {}", a, b),
            Node::Div(a, b) => write!(f, "{} / {}", a, b),
            Node::Neg(a) => write!(f, "-{}", a),
            Node::Sin(a) => write!(f, "sin({})", a),
            Node::Cos(a) => write!(f, "cos({})", a),
            Node::Sqrt(a) => write!(f, "sqrt({})", a),
            Node::Max(a, b) => write!(f, "max({}, {})", a, b),
            Node::Min(a, b) => write!(f, "min({}, {})", a, b),
        }
    }
}

macro_rules! impl_binary_op {
    ($op:ident, $method:ident, $build:ident) => {
        impl $op<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$build(&self, &rhs)
            }
        }

        impl $op<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::$build(&self, rhs)
            }
        }

        impl $op<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$build(self, &rhs)
            }
        }

        impl $op<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::$build(self, rhs)
            }
        }

        impl $op<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::$build(&self, &Expr::constant(rhs))
            }
        }

        impl $op<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::$build(self, &Expr::constant(rhs))
            }
        }

        impl $op<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$build(&Expr::constant(self), &rhs)
            }
        }

        impl $op<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::$build(&Expr::constant(self), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, sum);
impl_binary_op!(Sub, sub, difference);
impl_binary_op!(Mul, mul, product);
impl_binary_op!(Div, div, quotient);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::negation(&self)
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::negation(self)
    }
}
