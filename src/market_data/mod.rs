pub mod exchange_info;
pub mod kline;

pub use exchange_info::ExchangeInfo;
pub use kline::{Candlestick, KlineInterval, KlineRecord, KlineRowFormat};
