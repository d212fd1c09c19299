//! Stock task bodies.
//!
//! Deterministic bodies make compositions reproducible; `RandomBody` matches
//! the behaviour of a demo where every task produces a fresh number.

use rand::RngExt;
use std::collections::HashSet;

use super::task::{TaskBody, TaskError};
use super::types::TaskId;

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<T: Clone> TaskBody<T> for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn compute(&self, _task: TaskId, input: &T) -> Result<T, TaskError> {
        Ok(input.clone())
    }
}

/// Arithmetic that reports overflow instead of panicking or wrapping.
///
/// Floats overflow when the result is no longer finite.
pub trait CheckedArith: Sized {
    fn add_checked(&self, rhs: &Self) -> Option<Self>;
    fn mul_checked(&self, rhs: &Self) -> Option<Self>;
}

macro_rules! checked_int {
    ($($ty:ty),*) => {$(
        impl CheckedArith for $ty {
            fn add_checked(&self, rhs: &Self) -> Option<Self> {
                self.checked_add(*rhs)
            }

            fn mul_checked(&self, rhs: &Self) -> Option<Self> {
                self.checked_mul(*rhs)
            }
        }
    )*};
}

macro_rules! checked_float {
    ($($ty:ty),*) => {$(
        impl CheckedArith for $ty {
            fn add_checked(&self, rhs: &Self) -> Option<Self> {
                Some(self + rhs).filter(|sum| sum.is_finite())
            }

            fn mul_checked(&self, rhs: &Self) -> Option<Self> {
                Some(self * rhs).filter(|product| product.is_finite())
            }
        }
    )*};
}

checked_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
checked_float!(f32, f64);

fn overflow(operation: &str, task: TaskId) -> TaskError {
    TaskError::ExecutionFailed(format!("{} overflow in task {}", operation, task))
}

/// Computes `input + step`.
#[derive(Debug, Clone, Copy)]
pub struct Increment<T> {
    pub step: T,
}

impl<T> Increment<T> {
    pub fn new(step: T) -> Self {
        Self { step }
    }
}

impl<T> TaskBody<T> for Increment<T>
where
    T: CheckedArith + Send + Sync,
{
    fn name(&self) -> &str {
        "increment"
    }

    fn compute(&self, task: TaskId, input: &T) -> Result<T, TaskError> {
        input
            .add_checked(&self.step)
            .ok_or_else(|| overflow("addition", task))
    }
}

/// Computes `input * factor`.
#[derive(Debug, Clone, Copy)]
pub struct Multiply<T> {
    pub factor: T,
}

impl<T> Multiply<T> {
    pub fn new(factor: T) -> Self {
        Self { factor }
    }
}

impl<T> TaskBody<T> for Multiply<T>
where
    T: CheckedArith + Send + Sync,
{
    fn name(&self) -> &str {
        "multiply"
    }

    fn compute(&self, task: TaskId, input: &T) -> Result<T, TaskError> {
        input
            .mul_checked(&self.factor)
            .ok_or_else(|| overflow("multiplication", task))
    }
}

/// Ignores its input and draws a uniform integer from `min..=max`.
#[derive(Debug, Clone, Copy)]
pub struct RandomBody {
    min: i64,
    max: i64,
}

impl RandomBody {
    /// Create a body drawing from `min..=max`.
    ///
    /// The bounds are swapped if given in the wrong order.
    pub fn new(min: i64, max: i64) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn range(&self) -> (i64, i64) {
        (self.min, self.max)
    }
}

impl Default for RandomBody {
    fn default() -> Self {
        Self::new(1, 100)
    }
}

impl TaskBody<i64> for RandomBody {
    fn name(&self) -> &str {
        "random"
    }

    fn compute(&self, _task: TaskId, _input: &i64) -> Result<i64, TaskError> {
        Ok(rand::rng().random_range(self.min..=self.max))
    }
}

/// Always fails with the configured message.
#[derive(Debug, Clone)]
pub struct FailingBody {
    message: String,
}

impl FailingBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl<T> TaskBody<T> for FailingBody {
    fn name(&self) -> &str {
        "failing"
    }

    fn compute(&self, _task: TaskId, _input: &T) -> Result<T, TaskError> {
        Err(TaskError::ExecutionFailed(self.message.clone()))
    }
}

/// Fails for a fixed set of task ids and delegates to `inner` otherwise.
#[derive(Debug, Clone)]
pub struct FailOn<B> {
    inner: B,
    failing: HashSet<TaskId>,
}

impl<B> FailOn<B> {
    pub fn new(inner: B, failing: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            inner,
            failing: failing.into_iter().collect(),
        }
    }

    pub fn fails(&self, task: TaskId) -> bool {
        self.failing.contains(&task)
    }
}

impl<T, B> TaskBody<T> for FailOn<B>
where
    B: TaskBody<T>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn compute(&self, task: TaskId, input: &T) -> Result<T, TaskError> {
        if self.fails(task) {
            return Err(TaskError::ExecutionFailed(format!(
                "injected failure in task {}",
                task
            )));
        }
        self.inner.compute(task, input)
    }
}
