use rust_decimal::{Decimal, RoundingStrategy};

/// Currency with two decimals and thousands separators, e.g. `1,234.50`.
pub fn money(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    group_thousands(&format!("{:.2}", rounded))
}

/// Percentage with one decimal, e.g. `12.5%`.
pub fn percent(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.1}%", rounded)
}

/// Signed percentage for growth figures, e.g. `+3.2%`.
pub fn signed_percent(value: Decimal) -> String {
    if value.is_sign_negative() {
        percent(value)
    } else {
        format!("+{}", percent(value))
    }
}

pub fn count(value: usize) -> String {
    group_thousands(&value.to_string())
}

/// Quantities drop trailing zeros, `2.500` becomes `2.5`.
pub fn quantity(value: Decimal) -> String {
    group_thousands(&value.normalize().to_string())
}

fn group_thousands(number: &str) -> String {
    let (sign, digits) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (integer, fraction) = match digits.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (digits, None),
    };

    let mut grouped = String::with_capacity(number.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_money() {
        assert_eq!(money(dec!(16)), "16.00");
        assert_eq!(money(dec!(1234567.891)), "1,234,567.89");
        assert_eq!(money(dec!(1.005)), "1.01");
        assert_eq!(money(dec!(-2500.5)), "-2,500.50");
        assert_eq!(money(dec!(999.999)), "1,000.00");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(dec!(37.5)), "37.5%");
        assert_eq!(percent(dec!(33.333333)), "33.3%");
        assert_eq!(signed_percent(dec!(15)), "+15.0%");
        assert_eq!(signed_percent(dec!(-61.7)), "-61.7%");
    }

    #[test]
    fn test_count_and_quantity() {
        assert_eq!(count(0), "0");
        assert_eq!(count(12345), "12,345");
        assert_eq!(quantity(dec!(2.500)), "2.5");
        assert_eq!(quantity(dec!(1000)), "1,000");
    }
}
