use bigdecimal::BigDecimal;

/// Token metadata (PostgreSQL)
///
/// Primary Key: symbol
/// Upserted from the last record of every ingested page, last write wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Upstream identifier (contract address), informational only
    pub address: String,

    pub symbol: String,
    pub name: String,
    pub total_supply: BigDecimal,
    /// Cumulative USD volume as reported upstream
    pub volume_usd: BigDecimal,
    pub decimals: i32,
}

impl Token {
    pub fn new(
        address: String,
        symbol: String,
        name: String,
        total_supply: BigDecimal,
        volume_usd: BigDecimal,
        decimals: i32,
    ) -> Self {
        Self {
            // Always lowercase addresses for consistent comparisons
            address: address.to_lowercase(),
            symbol,
            name,
            total_supply,
            volume_usd,
            decimals,
        }
    }
}
