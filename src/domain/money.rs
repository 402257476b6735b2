use rust_decimal::{Decimal, RoundingStrategy};

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub gross: Decimal,
    pub fee: Decimal,
    pub tax: Decimal,
    pub net: Decimal,
}

// 18% levy applied on fees, not on the gross amount.
pub const TAX_RATE_ON_FEES: Decimal = Decimal::from_parts(18, 0, 0, false, 2);

pub fn fee_breakdown(gross: Decimal, fee_percent: Decimal) -> FeeBreakdown {
    let fee = round2(gross * fee_percent / Decimal::ONE_HUNDRED);
    let tax = round2(fee * TAX_RATE_ON_FEES);
    let net = round2(gross - fee - tax);
    FeeBreakdown { gross, fee, tax, net }
}
