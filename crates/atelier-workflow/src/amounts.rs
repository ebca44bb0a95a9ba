use atelier_core::WorkflowError;
use rust_decimal::Decimal;

/// Total, deposit and remaining amounts with `deposit + remaining == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositSplit {
    pub total: Decimal,
    pub deposit: Decimal,
    pub remaining: Decimal,
}

/// Splits `total` into deposit and remaining parts.
///
/// Amounts are rounded to cents. Without an explicit deposit the customary
/// half of the total is used.
pub fn split_deposit(
    total: Decimal,
    deposit: Option<Decimal>,
) -> Result<DepositSplit, WorkflowError> {
    if total <= Decimal::ZERO {
        return Err(WorkflowError::validation("total_amount must be positive"));
    }
    let total = total.round_dp(2);
    let deposit = match deposit {
        Some(value) => value.round_dp(2),
        None => (total * default_deposit_ratio()).round_dp(2),
    };

    if deposit < Decimal::ZERO {
        return Err(WorkflowError::validation("deposit_amount must be non-negative"));
    }
    if deposit > total {
        return Err(WorkflowError::validation(
            "deposit_amount cannot exceed total_amount",
        ));
    }

    Ok(DepositSplit {
        total,
        deposit,
        remaining: total - deposit,
    })
}

fn default_deposit_ratio() -> Decimal {
    Decimal::new(5, 1) // 50%
}
