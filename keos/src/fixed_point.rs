//! 17.14 fixed-point arithmetic.
//!
//! The kernel does not use floating point. Real quantities of the MLFQS
//! scheduler (`load_avg`, `recent_cpu`, and their coefficients) are kept as
//! signed 32-bit integers whose low 14 bits are the fraction. Products and
//! quotients of two fixed-point numbers go through a 64-bit intermediate, and
//! every division truncates toward zero.

use core::ops::{Add, AddAssign, Div, Mul, Sub};

/// Number of fraction bits.
pub const FRACTION_BITS: u32 = 14;
/// The fixed-point representation of 1.
pub const F: i32 = 1 << FRACTION_BITS;

/// A 17.14 fixed-point number.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Fixed(i32);

impl Fixed {
    /// Zero.
    pub const ZERO: Fixed = Fixed(0);

    /// Converts an integer.
    #[inline]
    pub const fn from_int(n: i32) -> Self {
        Fixed(n * F)
    }

    /// Builds a number from its raw representation.
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Fixed(raw)
    }

    /// The raw representation.
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Converts to an integer, rounding toward zero.
    #[inline]
    pub const fn to_int_trunc(self) -> i32 {
        self.0 / F
    }

    /// Converts to an integer, rounding to nearest (halves away from zero).
    #[inline]
    pub const fn to_int_round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    /// `n / d` as a fixed-point number.
    #[inline]
    pub const fn ratio(n: i32, d: i32) -> Self {
        Fixed(((n as i64 * F as i64) / d as i64) as i32)
    }
}

impl Add for Fixed {
    type Output = Fixed;
    #[inline]
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl AddAssign for Fixed {
    #[inline]
    fn add_assign(&mut self, rhs: Fixed) {
        self.0 += rhs.0;
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    #[inline]
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl Mul for Fixed {
    type Output = Fixed;
    #[inline]
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed(((self.0 as i64 * rhs.0 as i64) / F as i64) as i32)
    }
}

impl Div for Fixed {
    type Output = Fixed;
    #[inline]
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed(((self.0 as i64 * F as i64) / rhs.0 as i64) as i32)
    }
}

impl Add<i32> for Fixed {
    type Output = Fixed;
    #[inline]
    fn add(self, rhs: i32) -> Fixed {
        Fixed(self.0 + rhs * F)
    }
}

impl Sub<i32> for Fixed {
    type Output = Fixed;
    #[inline]
    fn sub(self, rhs: i32) -> Fixed {
        Fixed(self.0 - rhs * F)
    }
}

impl Mul<i32> for Fixed {
    type Output = Fixed;
    #[inline]
    fn mul(self, rhs: i32) -> Fixed {
        Fixed(self.0 * rhs)
    }
}

impl Div<i32> for Fixed {
    type Output = Fixed;
    #[inline]
    fn div(self, rhs: i32) -> Fixed {
        Fixed(self.0 / rhs)
    }
}

impl core::fmt::Display for Fixed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let hundredths = (*self * 100).to_int_round();
        let sign = if hundredths < 0 { "-" } else { "" };
        let abs = hundredths.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Fixed::from_int(3).raw(), 3 * 16384);
        assert_eq!(Fixed::from_raw(16384 + 8191).to_int_round(), 1);
        assert_eq!(Fixed::from_raw(16384 + 8192).to_int_round(), 2);
        assert_eq!(Fixed::from_raw(-(16384 + 8192)).to_int_round(), -2);
        assert_eq!(Fixed::from_raw(-(16384 + 8192)).to_int_trunc(), -1);
        assert_eq!(Fixed::from_raw(16383).to_int_trunc(), 0);
    }

    #[test]
    fn arithmetic_truncates_toward_zero() {
        // 59/60 = 0.98333.. = 16110.93.. in raw units.
        assert_eq!(Fixed::ratio(59, 60).raw(), 16110);
        assert_eq!(Fixed::ratio(1, 60).raw(), 273);
        assert_eq!(Fixed::ratio(-1, 60).raw(), -273);
        assert_eq!((Fixed::from_int(1) / Fixed::from_int(3)).raw(), 5461);
        assert_eq!((Fixed::from_raw(-5) / 2).raw(), -2);
    }

    #[test]
    fn wide_intermediate_products() {
        // 300 * 300 overflows i32 in raw units without a 64-bit accumulator.
        let big = Fixed::from_int(300);
        assert_eq!((big * big).to_int_trunc(), 90_000);
        assert_eq!((big * big / big).to_int_trunc(), 300);
        assert_eq!((Fixed::from_int(2) * 3 + 1).to_int_trunc(), 7);
        assert_eq!((Fixed::from_int(7) - 2).to_int_trunc(), 5);
    }

    #[test]
    fn display() {
        use alloc::string::ToString;
        assert_eq!(Fixed::ratio(1, 4).to_string(), "0.25");
        assert_eq!(Fixed::ratio(-3, 2).to_string(), "-1.50");
    }
}
