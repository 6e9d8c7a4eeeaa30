//! Fixed-rate conversion between the native currency and the cash asset.

use super::{Conversion, ConversionDirection, ConversionService, GatewayError};
use crate::domain::Decimal;
use async_trait::async_trait;
use tracing::debug;

/// Converts at a constant `rate` (cash units per native unit) and charges
/// `fee_bps` of the gross output.
#[derive(Debug, Clone)]
pub struct FixedRateConverter {
    rate: Decimal,
    fee_bps: u32,
    cash_scale: u32,
    native_scale: u32,
}

impl FixedRateConverter {
    pub fn new(rate: Decimal, fee_bps: u32, cash_scale: u32, native_scale: u32) -> Self {
        Self {
            rate,
            fee_bps,
            cash_scale,
            native_scale,
        }
    }
}

#[async_trait]
impl ConversionService for FixedRateConverter {
    async fn convert(
        &self,
        amount: Decimal,
        direction: ConversionDirection,
    ) -> Result<Conversion, GatewayError> {
        if !self.rate.is_positive() {
            return Err(GatewayError::Rejected(format!(
                "conversion rate must be positive, got {}",
                self.rate
            )));
        }
        if amount.is_negative() {
            return Err(GatewayError::Rejected(format!(
                "cannot convert negative amount {}",
                amount
            )));
        }

        let (gross, scale) = match direction {
            ConversionDirection::NativeToCash => {
                (amount.checked_mul(self.rate), self.cash_scale)
            }
            ConversionDirection::CashToNative => {
                (amount.checked_div(self.rate), self.native_scale)
            }
        };
        let gross = gross.ok_or_else(|| {
            GatewayError::Rejected(format!(
                "converting {} at rate {} overflows",
                amount, self.rate
            ))
        })?;
        let fee = (gross * Decimal::from_bps(self.fee_bps)).round_up_to(scale);
        let received = (gross - fee).truncate_to(scale).max(Decimal::zero());

        debug!(
            direction = ?direction,
            amount = %amount,
            received = %received,
            fee = %fee,
            "Converted"
        );
        Ok(Conversion { received, fee })
    }
}
