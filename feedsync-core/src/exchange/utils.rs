// exchange/utils.rs
// Parsing helpers shared by the REST client and the stream decoders

use super::ExchangeError;
use feedsync_common::PriceLevel;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Validate symbol format for Binance spot pairs
pub fn validate_symbol(symbol: &str) -> Result<String, ExchangeError> {
    if symbol.is_empty() {
        return Err(ExchangeError::InvalidSymbol(
            "Symbol cannot be empty".to_string(),
        ));
    }

    let symbol = symbol.to_uppercase();

    if !symbol.chars().all(char::is_alphanumeric) {
        return Err(ExchangeError::InvalidSymbol(format!(
            "Symbol '{}' contains invalid characters",
            symbol
        )));
    }

    if symbol.len() < 2 || symbol.len() > 20 {
        return Err(ExchangeError::InvalidSymbol(format!(
            "Symbol '{}' has invalid length",
            symbol
        )));
    }

    Ok(symbol)
}

/// Parse price string to Decimal
pub fn parse_price(price_str: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(price_str)
        .map_err(|e| ExchangeError::ParseError(format!("Invalid price '{}': {}", price_str, e)))
}

/// Parse size/quantity string to Decimal
pub fn parse_size(size_str: &str) -> Result<Decimal, ExchangeError> {
    let size = Decimal::from_str(size_str)
        .map_err(|e| ExchangeError::ParseError(format!("Invalid size '{}': {}", size_str, e)))?;
    if size.is_sign_negative() && !size.is_zero() {
        return Err(ExchangeError::ParseError(format!(
            "Negative size '{}'",
            size_str
        )));
    }
    Ok(size)
}

/// Parse `[price, quantity]` string pairs as sent by the exchange
pub fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>, ExchangeError> {
    raw.iter()
        .map(|[price, qty]| Ok(PriceLevel::new(parse_price(price)?, parse_size(qty)?)))
        .collect()
}
