pub mod queries;
pub mod volatility;
