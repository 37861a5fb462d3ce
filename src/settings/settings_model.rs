use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, Error, Result};

/// Runtime configuration for the ledger core.
///
/// Defaults mirror the production deployment; every value can be overridden
/// through environment variables prefixed with `MICROLEND_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// How long a borrower has to fund the drawdown account after a missed
    /// automatic debit before the loan is classified as arrears.
    pub grace_period_minutes: i64,
    /// Interval between due-payment sweeps, in seconds.
    pub due_sweep_interval_secs: u64,
    /// Interval between arrears-aging passes, in seconds.
    pub arrears_aging_interval_secs: u64,
    /// Interval between reminder passes, in seconds.
    pub reminder_interval_secs: u64,
    /// Smallest external payment accepted at validation.
    pub minimum_payment_amount: Decimal,
    /// Days between installments for loans that allow partial payments.
    pub installment_period_days: i64,
    /// Re-notify borrowers in arrears every this many days, not every sweep.
    pub arrears_notice_cadence_days: i64,
    /// One-off registration fee collected into savings at onboarding.
    pub registration_fee: Decimal,
    /// Loan limit as a multiple of the savings balance.
    pub loan_limit_multiplier: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grace_period_minutes: 60,
            due_sweep_interval_secs: 60,
            arrears_aging_interval_secs: 1800,
            reminder_interval_secs: 3600,
            minimum_payment_amount: dec!(1.00),
            installment_period_days: 30,
            arrears_notice_cadence_days: 7,
            registration_fee: dec!(800.00),
            loan_limit_multiplier: 4,
        }
    }
}

impl Settings {
    /// Builds settings from the environment, falling back to defaults for any
    /// variable that is not set.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(v) = read_env_i64("MICROLEND_GRACE_PERIOD_MINUTES")? {
            settings.grace_period_minutes = v;
        }
        if let Some(v) = read_env_i64("MICROLEND_DUE_SWEEP_INTERVAL_SECS")? {
            settings.due_sweep_interval_secs = v as u64;
        }
        if let Some(v) = read_env_i64("MICROLEND_ARREARS_AGING_INTERVAL_SECS")? {
            settings.arrears_aging_interval_secs = v as u64;
        }
        if let Some(v) = read_env_i64("MICROLEND_REMINDER_INTERVAL_SECS")? {
            settings.reminder_interval_secs = v as u64;
        }
        if let Some(v) = read_env_decimal("MICROLEND_MINIMUM_PAYMENT_AMOUNT")? {
            settings.minimum_payment_amount = v;
        }
        if let Some(v) = read_env_i64("MICROLEND_INSTALLMENT_PERIOD_DAYS")? {
            settings.installment_period_days = v;
        }
        if let Some(v) = read_env_i64("MICROLEND_ARREARS_NOTICE_CADENCE_DAYS")? {
            settings.arrears_notice_cadence_days = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grace_period_minutes <= 0 {
            return Err(Error::Config(ConfigError::InvalidValue(
                "grace_period_minutes must be positive".to_string(),
            )));
        }
        if self.minimum_payment_amount <= Decimal::ZERO {
            return Err(Error::Config(ConfigError::InvalidValue(
                "minimum_payment_amount must be positive".to_string(),
            )));
        }
        if self.installment_period_days <= 0 {
            return Err(Error::Config(ConfigError::InvalidValue(
                "installment_period_days must be positive".to_string(),
            )));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::minutes(self.grace_period_minutes)
    }

    pub fn installment_period(&self) -> Duration {
        Duration::days(self.installment_period_days)
    }
}

fn read_env_i64(key: &str) -> Result<Option<i64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| {
                Error::Config(ConfigError::InvalidValue(format!(
                    "{} must be an integer, got '{}'",
                    key, raw
                )))
            }),
        Err(_) => Ok(None),
    }
}

fn read_env_decimal(key: &str) -> Result<Option<Decimal>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<Decimal>()
            .map(Some)
            .map_err(|_| {
                Error::Config(ConfigError::InvalidValue(format!(
                    "{} must be a decimal number, got '{}'",
                    key, raw
                )))
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.grace_period(), Duration::minutes(60));
    }

    #[test]
    fn zero_grace_period_is_rejected() {
        let settings = Settings {
            grace_period_minutes: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
