pub mod order_lifecycle;
pub mod portfolio;
pub mod risk;

pub use order_lifecycle::OrderLifecycle;
pub use portfolio::PortfolioService;
pub use risk::RiskManager;
