use std::{
    cmp::Ordering,
    fmt,
    ops::{Add, AddAssign},
};

use serde::{Deserialize, Serialize};

/// Denominator used once exact arithmetic would overflow.
const APPROXIMATE_DENOMINATOR: u128 = 1 << 64;

/// Exact non-negative rational used to accumulate progress without drift.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fraction {
    numerator: u128,
    denominator: u128,
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Fraction {
    pub fn zero() -> Self {
        Self {
            numerator: 0,
            denominator: 1,
        }
    }

    pub fn one() -> Self {
        Self {
            numerator: 1,
            denominator: 1,
        }
    }

    /// A zero denominator yields zero.
    pub fn new(numerator: u64, denominator: u64) -> Self {
        if denominator == 0 {
            return Self::zero();
        }
        Self::reduced(numerator as u128, denominator as u128)
    }

    fn reduced(numerator: u128, denominator: u128) -> Self {
        if numerator == 0 {
            return Self::zero();
        }
        let divisor = gcd(numerator, denominator);
        Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        }
    }

    fn approximate(value: f64) -> Self {
        let numerator = (value.max(0.0) * APPROXIMATE_DENOMINATOR as f64).round() as u128;
        Self::reduced(numerator, APPROXIMATE_DENOMINATOR)
    }

    pub fn numerator(&self) -> u128 {
        self.numerator
    }

    pub fn denominator(&self) -> u128 {
        self.denominator
    }

    pub fn value(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    pub fn checked_mul(&self, other: &Fraction) -> Option<Fraction> {
        let numerator = self.numerator.checked_mul(other.numerator)?;
        let denominator = self.denominator.checked_mul(other.denominator)?;
        Some(Self::reduced(numerator, denominator))
    }

    /// Multiplies, falling back to an approximation on overflow.
    pub fn mul(&self, other: &Fraction) -> Fraction {
        self.checked_mul(other)
            .unwrap_or_else(|| Self::approximate(self.value() * other.value()))
    }

    /// Divides, falling back to an approximation on overflow. Division by zero yields zero.
    pub fn div(&self, other: &Fraction) -> Fraction {
        if other.is_zero() {
            return Self::zero();
        }
        let inverse = Fraction {
            numerator: other.denominator,
            denominator: other.numerator,
        };
        self.mul(&inverse)
    }

    pub fn checked_add(&self, other: &Fraction) -> Option<Fraction> {
        let divisor = gcd(self.denominator, other.denominator);
        let left_scale = other.denominator / divisor;
        let right_scale = self.denominator / divisor;
        let denominator = self.denominator.checked_mul(left_scale)?;
        let numerator = self
            .numerator
            .checked_mul(left_scale)?
            .checked_add(other.numerator.checked_mul(right_scale)?)?;
        Some(Self::reduced(numerator, denominator))
    }

    /// Never exceeds `limit`.
    pub fn saturating_add(&self, other: &Fraction, limit: &Fraction) -> Fraction {
        let sum = *self + *other;
        if sum > *limit { *limit } else { sum }
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for Fraction {
    type Output = Fraction;

    fn add(self, other: Fraction) -> Fraction {
        self.checked_add(&other)
            .unwrap_or_else(|| Self::approximate(self.value() + other.value()))
    }
}

impl AddAssign for Fraction {
    fn add_assign(&mut self, other: Fraction) {
        *self = *self + other;
    }
}

impl PartialEq for Fraction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Fraction {}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        match (
            self.numerator.checked_mul(other.denominator),
            other.numerator.checked_mul(self.denominator),
        ) {
            (Some(left), Some(right)) => left.cmp(&right),
            _ => self
                .value()
                .partial_cmp(&other.value())
                .unwrap_or(Ordering::Equal),
        }
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}
