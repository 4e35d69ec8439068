use crate::errors::ServiceError;
use crate::models::order::OrderItem;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

/// Currencies charged without a fractional minor unit.
const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

/// Largest unit price accepted at checkout, in major units.
pub fn max_unit_price() -> Decimal {
    Decimal::from(1_000_000_000i64)
}

/// Number of decimal places between the major and the minor unit.
pub fn currency_exponent(currency: &str) -> u32 {
    let code = currency.to_ascii_lowercase();
    if ZERO_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        0
    } else {
        2
    }
}

/// Exact Σ(unit price × quantity).
pub fn order_total(items: &[OrderItem]) -> Decimal {
    items
        .iter()
        .map(|item| item.unit_price * Decimal::from(item.quantity))
        .sum()
}

/// True when `amount` can be charged in `currency` without rounding.
pub fn fits_minor_unit(amount: Decimal, currency: &str) -> bool {
    amount.normalize().scale() <= currency_exponent(currency)
}

/// Converts a major-unit amount into the gateway's smallest currency unit.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64, ServiceError> {
    let out_of_range =
        || ServiceError::ValidationError(format!("amount {} is out of range", amount));
    let factor = Decimal::from(10i64.pow(currency_exponent(currency)));
    amount
        .checked_mul(factor)
        .ok_or_else(out_of_range)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(out_of_range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn item(price: Decimal, quantity: u32) -> OrderItem {
        OrderItem {
            product_id: Uuid::new_v4(),
            name: "Widget".into(),
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn total_is_exact() {
        let items = vec![item(dec!(0.10), 3), item(dec!(0.20), 1)];
        assert_eq!(order_total(&items), dec!(0.50));
    }

    #[test]
    fn empty_total_is_zero() {
        assert_eq!(order_total(&[]), Decimal::ZERO);
    }

    #[test]
    fn minor_units_follow_the_currency_exponent() {
        assert_eq!(to_minor_units(dec!(100), "inr").unwrap(), 10_000);
        assert_eq!(to_minor_units(dec!(19.99), "USD").unwrap(), 1_999);
        assert_eq!(to_minor_units(dec!(500), "jpy").unwrap(), 500);
    }

    #[test]
    fn oversized_amounts_are_rejected_not_overflowed() {
        assert!(matches!(
            to_minor_units(Decimal::MAX, "inr"),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            to_minor_units(dec!(100000000000000000000), "jpy"),
            Err(ServiceError::ValidationError(_))
        ));
        assert_eq!(
            to_minor_units(max_unit_price(), "inr").unwrap(),
            100_000_000_000
        );
    }

    #[test]
    fn precision_check_uses_the_minor_unit() {
        assert!(fits_minor_unit(dec!(10.50), "inr"));
        assert!(fits_minor_unit(dec!(10.500), "inr"));
        assert!(!fits_minor_unit(dec!(10.505), "inr"));
        assert!(!fits_minor_unit(dec!(10.5), "jpy"));
    }
}
