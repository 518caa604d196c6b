//! Crossing detection.
//!
//! `crossover(a, b)` is true at bar i iff `a[i-1] <= b[i-1]` and `a[i] > b[i]`.
//! `crossunder` mirrors it with `>=` and `<`; `cross` is either. Bar 0 and any
//! bar where one of the four values is unavailable yield `None`.

use crate::runtime::Series;

fn crossing(a: &Series, b: &Series, test: impl Fn(f64, f64, f64, f64) -> bool) -> Series {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let prev = i.checked_sub(1)?;
            let (ap, bp, ac, bc) = (a.get(prev)?, b.get(prev)?, a.get(i)?, b.get(i)?);
            Some(if test(ap, bp, ac, bc) { 1.0 } else { 0.0 })
        })
        .collect()
}

pub fn crossover(a: &Series, b: &Series) -> Series {
    crossing(a, b, |ap, bp, ac, bc| ap <= bp && ac > bc)
}

pub fn crossunder(a: &Series, b: &Series) -> Series {
    crossing(a, b, |ap, bp, ac, bc| ap >= bp && ac < bc)
}

pub fn cross(a: &Series, b: &Series) -> Series {
    crossing(a, b, |ap, bp, ac, bc| {
        (ap <= bp && ac > bc) || (ap >= bp && ac < bc)
    })
}
