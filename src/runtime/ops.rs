//! Elementwise operators over series and scalars.
//!
//! Every operator takes [`Operand`]s so generated code can mix `&Series`,
//! owned `Series`, `f64` and `bool` freely. The result length is the longest
//! series operand. Booleans are encoded as `1.0`/`0.0`.

use crate::runtime::Series;

pub trait Operand {
    fn value_at(&self, idx: usize) -> Option<f64>;

    /// Series length, `None` for scalars.
    fn len_hint(&self) -> Option<usize>;
}

impl Operand for f64 {
    fn value_at(&self, _idx: usize) -> Option<f64> {
        Some(*self).filter(|v| v.is_finite())
    }

    fn len_hint(&self) -> Option<usize> {
        None
    }
}

impl Operand for bool {
    fn value_at(&self, _idx: usize) -> Option<f64> {
        Some(if *self { 1.0 } else { 0.0 })
    }

    fn len_hint(&self) -> Option<usize> {
        None
    }
}

impl Operand for Series {
    fn value_at(&self, idx: usize) -> Option<f64> {
        self.get(idx)
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T: Operand + ?Sized> Operand for &T {
    fn value_at(&self, idx: usize) -> Option<f64> {
        (**self).value_at(idx)
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }
}

fn combined_len(a: &impl Operand, b: &impl Operand) -> usize {
    a.len_hint().unwrap_or(0).max(b.len_hint().unwrap_or(0))
}

fn binary(a: impl Operand, b: impl Operand, f: impl Fn(f64, f64) -> Option<f64>) -> Series {
    let len = combined_len(&a, &b);
    (0..len)
        .map(|i| match (a.value_at(i), b.value_at(i)) {
            (Some(x), Some(y)) => f(x, y),
            _ => None,
        })
        .collect()
}

fn flag(value: bool) -> Option<f64> {
    Some(if value { 1.0 } else { 0.0 })
}

pub fn add(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| Some(x + y))
}

pub fn sub(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| Some(x - y))
}

pub fn mul(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| Some(x * y))
}

/// Division by zero yields an unavailable value.
pub fn div(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| if y == 0.0 { None } else { Some(x / y) })
}

pub fn rem(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| if y == 0.0 { None } else { Some(x % y) })
}

pub fn gt(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| flag(x > y))
}

pub fn ge(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| flag(x >= y))
}

pub fn lt(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| flag(x < y))
}

pub fn le(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| flag(x <= y))
}

pub fn eq(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| flag(x == y))
}

pub fn ne(a: impl Operand, b: impl Operand) -> Series {
    binary(a, b, |x, y| flag(x != y))
}

/// Logical and; an unavailable side reads as false.
pub fn and(a: impl Operand, b: impl Operand) -> Series {
    let len = combined_len(&a, &b);
    (0..len)
        .map(|i| flag(truthy(&a, i) && truthy(&b, i)))
        .collect()
}

pub fn or(a: impl Operand, b: impl Operand) -> Series {
    let len = combined_len(&a, &b);
    (0..len)
        .map(|i| flag(truthy(&a, i) || truthy(&b, i)))
        .collect()
}

pub fn not(a: impl Operand) -> Series {
    let len = a.len_hint().unwrap_or(0);
    (0..len).map(|i| flag(!truthy(&a, i))).collect()
}

pub fn neg(a: impl Operand) -> Series {
    apply(a, |x| -x)
}

/// `cond ? a : b` evaluated bar by bar.
pub fn select(cond: impl Operand, a: impl Operand, b: impl Operand) -> Series {
    let len = cond
        .len_hint()
        .unwrap_or(0)
        .max(a.len_hint().unwrap_or(0))
        .max(b.len_hint().unwrap_or(0));
    (0..len)
        .map(|i| {
            if truthy(&cond, i) {
                a.value_at(i)
            } else {
                b.value_at(i)
            }
        })
        .collect()
}

/// Replace unavailable values with `replacement`.
pub fn nz(a: impl Operand, replacement: impl Operand) -> Series {
    let len = combined_len(&a, &replacement);
    (0..len)
        .map(|i| a.value_at(i).or_else(|| replacement.value_at(i)))
        .collect()
}

pub fn is_na(a: impl Operand) -> Series {
    let len = a.len_hint().unwrap_or(0);
    (0..len).map(|i| flag(a.value_at(i).is_none())).collect()
}

/// Broadcast an operand to a series of `len` bars.
pub fn series(a: impl Operand, len: usize) -> Series {
    (0..len).map(|i| a.value_at(i)).collect()
}

pub fn apply(a: impl Operand, f: impl Fn(f64) -> f64) -> Series {
    let len = a.len_hint().unwrap_or(0);
    (0..len).map(|i| a.value_at(i).map(&f)).collect()
}

pub fn apply2(a: impl Operand, b: impl Operand, f: impl Fn(f64, f64) -> f64) -> Series {
    binary(a, b, |x, y| Some(f(x, y)))
}

/// Sign with `sign(0) == 0`.
pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Value held by bar 0 for every bar, for `var` declarations.
pub fn hold_first(a: impl Operand) -> Series {
    let len = a.len_hint().unwrap_or(0);
    let first = a.value_at(0);
    (0..len).map(|_| first).collect()
}

pub fn value_at(a: impl Operand, idx: usize) -> Option<f64> {
    a.value_at(idx)
}

pub fn truthy(a: impl Operand, idx: usize) -> bool {
    a.value_at(idx).is_some_and(|v| v != 0.0)
}

pub trait AsLength {
    fn as_length(&self) -> usize;
}

impl AsLength for i64 {
    fn as_length(&self) -> usize {
        (*self).max(0) as usize
    }
}

impl AsLength for f64 {
    fn as_length(&self) -> usize {
        if self.is_finite() && *self > 0.0 {
            *self as usize
        } else {
            0
        }
    }
}

impl AsLength for usize {
    fn as_length(&self) -> usize {
        *self
    }
}

/// Window length from an integer input or scalar; negatives clamp to 0.
pub fn length(n: impl AsLength) -> usize {
    n.as_length()
}
