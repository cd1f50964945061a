pub mod okx_account_ws;
pub mod okx_market_ws;
pub mod okx_rest;
pub mod traits;

pub use okx_account_ws::{AccountEvent, OkxAccountWs};
pub use okx_market_ws::OkxMarketWs;
pub use okx_rest::{
    ApiResponse, OkxRestClient, CODE_INSUFFICIENT_MARGIN, CODE_KEY_REGION_MISMATCH, CODE_OK,
    CODE_ORDER_NOT_EXIST, CODE_PARAM_ERROR,
};
pub use traits::ExchangeApi;

#[cfg(test)]
pub use traits::MockExchangeApi;
