//! Fixed-point rendering of scaled integers
//!
//! Values arrive from the strap as integers multiplied by a power of ten.
//! They are rendered into a small fixed buffer with a chosen number of
//! fractional digits, rounding half-up when digits are dropped.

use core::fmt::Write;
use thiserror::Error;

/// Widest integer part that fits the display buffer.
pub const MAX_INTEGER_DIGITS: u8 = 5;
pub const MAX_PRECISION: u8 = 9;
/// Sign, integer part, point and fraction at their maximum widths.
pub const NUMERIC_CAPACITY: usize = 1 + MAX_INTEGER_DIGITS as usize + 1 + MAX_PRECISION as usize;

pub type Numeric = heapless::String<NUMERIC_CAPACITY>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("integer part {0} does not fit in the display width")]
    Overflow(u64),
    #[error("precision {0} exceeds the supported maximum of 9 digits")]
    PrecisionTooLarge(u8),
}

fn pow10(exp: u8) -> u64 {
    10u64.pow(u32::from(exp))
}

/// Render `value / 10^input_precision` with exactly `output_precision`
/// fractional digits.
///
/// Negative values get a leading `-`. No decimal point is written when
/// `output_precision` is zero.
pub fn format_scaled(
    value: i32,
    input_precision: u8,
    output_precision: u8,
) -> Result<Numeric, FormatError> {
    if input_precision > MAX_PRECISION {
        return Err(FormatError::PrecisionTooLarge(input_precision));
    }
    if output_precision > MAX_PRECISION {
        return Err(FormatError::PrecisionTooLarge(output_precision));
    }

    let magnitude = u64::from(value.unsigned_abs());
    let input_scale = pow10(input_precision);
    let mut integer = magnitude / input_scale;
    let mut fraction = magnitude % input_scale;

    if output_precision >= input_precision {
        fraction *= pow10(output_precision - input_precision);
    } else {
        let dropped_scale = pow10(input_precision - output_precision);
        let dropped = fraction % dropped_scale;
        fraction /= dropped_scale;
        if dropped * 2 >= dropped_scale {
            fraction += 1;
            let output_scale = pow10(output_precision);
            if fraction >= output_scale {
                integer += 1;
                fraction -= output_scale;
            }
        }
    }

    if integer >= pow10(MAX_INTEGER_DIGITS) {
        return Err(FormatError::Overflow(integer));
    }

    let sign = if value < 0 { "-" } else { "" };
    let mut out = Numeric::new();
    let written = if output_precision == 0 {
        write!(out, "{sign}{integer}")
    } else {
        write!(
            out,
            "{sign}{integer}.{fraction:0width$}",
            width = usize::from(output_precision)
        )
    };
    written.map_err(|_| FormatError::Overflow(integer))?;

    Ok(out)
}
