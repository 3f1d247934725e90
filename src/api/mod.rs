pub mod hyperliquid;

pub use hyperliquid::HyperliquidClient;

use crate::models::InstrumentData;
use crate::Result;
use async_trait::async_trait;

/// External market data collaborator.
///
/// An `Err` means "skip this cycle"; implementations bound their own request time.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_instruments(&self) -> Result<Vec<InstrumentData>>;
}
