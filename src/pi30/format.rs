//! printf-style formatting of numeric write parameters, e.g. `%05.2f` or
//! `%03d`. Only what the write commands need is understood: an optional
//! zero flag, width, precision and the `d`, `i` and `f` conversions.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1},
    character::complete::{digit1, one_of},
    combinator::{all_consuming, map, map_res, opt},
    multi::many0,
    sequence::{preceded, tuple},
    IResult,
};

use crate::error::ProtocolError;

/// Longest parameter the device accepts after the command prefix.
pub const MAX_PARAMETER_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Conversion {
    Integer,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Spec {
    zero_pad: bool,
    width: usize,
    precision: Option<usize>,
    conversion: Conversion,
}

#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Literal(&'a str),
    Spec(Spec),
}

fn number(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

fn spec(input: &str) -> IResult<&str, Piece> {
    map(
        preceded(
            tag("%"),
            tuple((
                opt(tag("0")),
                opt(number),
                opt(preceded(tag("."), number)),
                one_of("dif"),
            )),
        ),
        |(zero, width, precision, conversion)| {
            Piece::Spec(Spec {
                zero_pad: zero.is_some(),
                width: width.unwrap_or(0),
                precision,
                conversion: match conversion {
                    'f' => Conversion::Float,
                    _ => Conversion::Integer,
                },
            })
        },
    )(input)
}

fn piece(input: &str) -> IResult<&str, Piece> {
    alt((
        map(tag("%%"), |_| Piece::Literal("%")),
        spec,
        map(take_till1(|c| c == '%'), Piece::Literal),
    ))(input)
}

fn render(spec: &Spec, value: f32) -> String {
    let body = match spec.conversion {
        Conversion::Integer => format!("{}", value.round() as i64),
        Conversion::Float => format!("{:.*}", spec.precision.unwrap_or(6), value),
    };

    if body.len() >= spec.width {
        return body;
    }

    let fill = spec.width - body.len();
    if spec.zero_pad {
        match body.strip_prefix('-') {
            Some(digits) => format!("-{}{}", "0".repeat(fill), digits),
            None => format!("{}{}", "0".repeat(fill), body),
        }
    } else {
        format!("{}{}", " ".repeat(fill), body)
    }
}

/// Format `value` with `format`. The format must hold exactly one
/// conversion and the result must fit in [`MAX_PARAMETER_LEN`] characters.
pub fn format_parameter(format: &str, value: f32) -> Result<String, ProtocolError> {
    let fail = |reason: &str| ProtocolError::Format {
        format: format.to_string(),
        value,
        reason: reason.to_string(),
    };

    if format.is_empty() {
        return Err(fail("empty format"));
    }
    if !value.is_finite() {
        return Err(fail("value is not finite"));
    }

    let (_, pieces) =
        all_consuming(many0(piece))(format).map_err(|_| fail("unsupported conversion"))?;

    let specs = pieces
        .iter()
        .filter(|p| matches!(p, Piece::Spec(_)))
        .count();
    if specs != 1 {
        return Err(fail("format needs exactly one conversion"));
    }

    // anything wider than the limit can never fit, so do not render it
    let oversized = pieces.iter().any(|p| match p {
        Piece::Spec(spec) => {
            spec.width > MAX_PARAMETER_LEN
                || spec.precision.map_or(false, |precision| precision > MAX_PARAMETER_LEN)
        }
        Piece::Literal(_) => false,
    });
    if oversized {
        return Err(fail("result too long"));
    }

    let out: String = pieces
        .iter()
        .map(|p| match p {
            Piece::Literal(s) => s.to_string(),
            Piece::Spec(spec) => render(spec, value),
        })
        .collect();

    if out.len() > MAX_PARAMETER_LEN {
        return Err(fail("result too long"));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_with_zero_padding() {
        assert_eq!(format_parameter("%05.2f", 58.4).unwrap(), "58.40");
        assert_eq!(format_parameter("%05.2f", 8.4).unwrap(), "08.40");
        assert_eq!(format_parameter("%04.1f", 48.0).unwrap(), "48.0");
        assert_eq!(format_parameter("%.1f", 5.24).unwrap(), "5.2");
    }

    #[test]
    fn integers_round_and_pad() {
        assert_eq!(format_parameter("%03d", 40.0).unwrap(), "040");
        assert_eq!(format_parameter("%03d", 9.6).unwrap(), "010");
        assert_eq!(format_parameter("%3d", 5.0).unwrap(), "  5");
        assert_eq!(format_parameter("%02i", 50.0).unwrap(), "50");
        assert_eq!(format_parameter("%04d", -5.0).unwrap(), "-005");
    }

    #[test]
    fn literals_pass_through() {
        assert_eq!(format_parameter("x%03d%%", 7.0).unwrap(), "x007%");
    }

    #[test]
    fn rejects_bad_formats() {
        for format in ["", "%s", "%d%d", "abc", "%"] {
            assert!(
                matches!(
                    format_parameter(format, 1.0),
                    Err(ProtocolError::Format { .. })
                ),
                "{:?} should be rejected",
                format
            );
        }
    }

    #[test]
    fn rejects_oversized_results() {
        assert!(format_parameter("%016d", 1.0).is_err());
        assert!(format_parameter("%.1f", 1e20).is_err());
        assert_eq!(format_parameter("%015d", 1.0).unwrap().len(), 15);
        assert!(format_parameter("%999999999d", 1.0).is_err());
        assert!(format_parameter("%.999999999f", 1.0).is_err());
    }
}
