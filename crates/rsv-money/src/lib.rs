//! Exact integer unit conversions for money and percentages.
//!
//! # Motivation
//!
//! All monetary amounts in this system are stored as integer cents (`i64`);
//! all percentages and MOIC multiples are stored as integer basis points
//! (1 bps = 0.01 %).  Floating-point values appear only at the human edge:
//! operator input and display strings.  This crate owns the edge.
//!
//! Conversions from `f64` round half away from zero and validate bounds;
//! NaN, infinity, and values outside the `i64` range are rejected rather
//! than silently clamped.  Conversions back to `f64` are for display only
//! and are never fed into allocation arithmetic.
//!
//! # Scale
//!
//! 1 USD = 100 cents.  100 bps = 1 %.  1.0x MOIC = 10_000 bps.

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rejected conversion input.
#[derive(Clone, Debug, PartialEq)]
pub enum ConversionError {
    /// Input was NaN or infinite.
    NotFinite { what: &'static str, value: f64 },
    /// Input falls outside the representable integer range.
    OutOfRange { what: &'static str, value: f64 },
    /// Input must be non-negative but was not.
    Negative { what: &'static str, value: f64 },
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFinite { what, value } => {
                write!(f, "{what} must be finite, got {value}")
            }
            Self::OutOfRange { what, value } => {
                write!(f, "{what} {value} outside representable range")
            }
            Self::Negative { what, value } => {
                write!(f, "{what} must be >= 0, got {value}")
            }
        }
    }
}

impl std::error::Error for ConversionError {}

// ---------------------------------------------------------------------------
// Rounding core
// ---------------------------------------------------------------------------

/// Round half away from zero, then verify the result fits in `i64`.
///
/// `i64::MAX as f64` rounds up to 2^63, so the comparison uses strict
/// bounds on the unrounded product.
fn round_checked(what: &'static str, value: f64, scale: f64) -> Result<i64, ConversionError> {
    if !value.is_finite() {
        return Err(ConversionError::NotFinite { what, value });
    }
    let scaled = value * scale;
    if scaled >= i64::MAX as f64 || scaled <= i64::MIN as f64 {
        return Err(ConversionError::OutOfRange { what, value });
    }
    Ok(scaled.round() as i64)
}

// ---------------------------------------------------------------------------
// Dollars <-> cents
// ---------------------------------------------------------------------------

/// Cents per dollar.
pub const CENTS_PER_DOLLAR: i64 = 100;

/// Basis points per whole (100 %, or 1.0x MOIC).
pub const BPS_PER_WHOLE: i64 = 10_000;

/// Convert a dollar amount to integer cents, rounding to the nearest cent.
pub fn dollars_to_cents(dollars: f64) -> Result<i64, ConversionError> {
    round_checked("dollar amount", dollars, CENTS_PER_DOLLAR as f64)
}

/// Convert integer cents to a dollar amount. Display only.
pub fn cents_to_dollars(cents: i64) -> f64 {
    cents as f64 / CENTS_PER_DOLLAR as f64
}

// ---------------------------------------------------------------------------
// Percent / MOIC <-> basis points
// ---------------------------------------------------------------------------

/// Convert a percentage (e.g. `30.0` for 30 %) to integer basis points.
pub fn percent_to_bps(percent: f64) -> Result<i64, ConversionError> {
    round_checked("percentage", percent, 100.0)
}

/// Convert integer basis points to a percentage. Display only.
pub fn bps_to_percent(bps: i64) -> f64 {
    bps as f64 / 100.0
}

/// Convert a MOIC multiple (e.g. `2.5` for 2.5x) to integer basis points.
///
/// MOIC is a multiplier, never negative.
pub fn moic_to_bps(moic: f64) -> Result<i64, ConversionError> {
    if moic.is_finite() && moic < 0.0 {
        return Err(ConversionError::Negative {
            what: "MOIC",
            value: moic,
        });
    }
    round_checked("MOIC", moic, BPS_PER_WHOLE as f64)
}

/// Convert integer basis points to a MOIC multiple. Display only.
pub fn bps_to_moic(bps: i64) -> f64 {
    bps as f64 / BPS_PER_WHOLE as f64
}

// ---------------------------------------------------------------------------
// Display formatting
// ---------------------------------------------------------------------------

/// Format integer cents as a dollar string: `12345` -> `"$123.45"`.
///
/// Used for warning text and CLI output only; allocation arithmetic never
/// round-trips through this representation.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}

/// Format integer basis points as a percent string: `3000` -> `"30.00%"`.
pub fn format_bps(bps: i64) -> String {
    let sign = if bps < 0 { "-" } else { "" };
    let abs = bps.unsigned_abs();
    format!("{sign}{}.{:02}%", abs / 100, abs % 100)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollars_to_cents_exact() {
        assert_eq!(dollars_to_cents(123.45).unwrap(), 12_345);
        assert_eq!(dollars_to_cents(0.0).unwrap(), 0);
        assert_eq!(dollars_to_cents(-7.5).unwrap(), -750);
    }

    #[test]
    fn dollars_to_cents_rounds_to_nearest() {
        // 0.005 dollars = 0.5 cents -> rounds away from zero
        assert_eq!(dollars_to_cents(0.005).unwrap(), 1);
        assert_eq!(dollars_to_cents(-0.005).unwrap(), -1);
        assert_eq!(dollars_to_cents(1.004).unwrap(), 100);
    }

    #[test]
    fn dollars_to_cents_rejects_nan_and_inf() {
        assert!(matches!(
            dollars_to_cents(f64::NAN),
            Err(ConversionError::NotFinite { .. })
        ));
        assert!(matches!(
            dollars_to_cents(f64::INFINITY),
            Err(ConversionError::NotFinite { .. })
        ));
    }

    #[test]
    fn dollars_to_cents_rejects_out_of_range() {
        assert!(matches!(
            dollars_to_cents(1e18),
            Err(ConversionError::OutOfRange { .. })
        ));
        assert!(matches!(
            dollars_to_cents(-1e18),
            Err(ConversionError::OutOfRange { .. })
        ));
    }

    #[test]
    fn cents_to_dollars_roundtrip_for_display() {
        assert_eq!(cents_to_dollars(12_345), 123.45);
        assert_eq!(cents_to_dollars(-50), -0.5);
    }

    #[test]
    fn percent_bps_conversions() {
        assert_eq!(percent_to_bps(30.0).unwrap(), 3_000);
        assert_eq!(percent_to_bps(0.01).unwrap(), 1);
        assert_eq!(bps_to_percent(3_000), 30.0);
    }

    #[test]
    fn moic_bps_conversions() {
        assert_eq!(moic_to_bps(1.0).unwrap(), 10_000);
        assert_eq!(moic_to_bps(2.5).unwrap(), 25_000);
        assert_eq!(bps_to_moic(25_000), 2.5);
    }

    #[test]
    fn moic_rejects_negative() {
        assert!(matches!(
            moic_to_bps(-1.0),
            Err(ConversionError::Negative { .. })
        ));
    }

    #[test]
    fn format_cents_output() {
        assert_eq!(format_cents(12_345), "$123.45");
        assert_eq!(format_cents(5), "$0.05");
        assert_eq!(format_cents(-250), "-$2.50");
        assert_eq!(format_cents(0), "$0.00");
    }

    #[test]
    fn format_bps_output() {
        assert_eq!(format_bps(3_000), "30.00%");
        assert_eq!(format_bps(1), "0.01%");
        assert_eq!(format_bps(-50), "-0.50%");
    }

    #[test]
    fn error_display_is_non_empty() {
        let cases = vec![
            ConversionError::NotFinite {
                what: "x",
                value: f64::NAN,
            },
            ConversionError::OutOfRange {
                what: "x",
                value: 1e19,
            },
            ConversionError::Negative {
                what: "x",
                value: -1.0,
            },
        ];
        for e in cases {
            assert!(!e.to_string().is_empty(), "empty display for {e:?}");
        }
    }
}
