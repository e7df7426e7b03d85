//! Element types and operators supported by all-reduce.

use bytemuck::Pod;

/// The reduction applied element-wise by an all-reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    /// Folds `other` into `acc` element-wise.
    ///
    /// Both slices must have the same length.
    pub fn apply<T: Element>(self, acc: &mut [T], other: &[T]) {
        debug_assert_eq!(acc.len(), other.len());

        let f: fn(T, T) -> T = match self {
            ReduceOp::Sum => T::reduce_add,
            ReduceOp::Max => |a, b| if b > a { b } else { a },
            ReduceOp::Min => |a, b| if b < a { b } else { a },
        };

        for (a, b) in acc.iter_mut().zip(other) {
            *a = f(*a, *b);
        }
    }
}

/// A plain numeric value that can travel through a collective.
pub trait Element: Pod + PartialOrd + Send + Sync {
    /// The sum used by `ReduceOp::Sum`, integers wrap on overflow so every
    /// rank ends up with the same value instead of the hub panicking.
    fn reduce_add(self, other: Self) -> Self;
}

macro_rules! float_element {
    ($($t:ty),*) => {
        $(impl Element for $t {
            fn reduce_add(self, other: Self) -> Self {
                self + other
            }
        })*
    };
}

macro_rules! int_element {
    ($($t:ty),*) => {
        $(impl Element for $t {
            fn reduce_add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
        })*
    };
}

float_element!(f32, f64);
int_element!(i32, i64, u32, u64);
