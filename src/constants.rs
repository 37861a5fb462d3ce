/// Number of decimal places kept when persisting monetary values.
pub const DECIMAL_PRECISION: u32 = 2;

/// Date format used for loan and payment date columns.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Prefix for generated payment numbers.
pub const PAYMENT_NUMBER_PREFIX: &str = "PAY";

/// Prefix for generated transaction numbers.
pub const TRANSACTION_NUMBER_PREFIX: &str = "TXN";

/// Prefix for provider codes generated by simulated payments.
pub const SIMULATION_CODE_PREFIX: &str = "SIM";
