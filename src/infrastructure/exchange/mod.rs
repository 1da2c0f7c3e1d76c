pub mod binance_gateway;

pub use binance_gateway::BinanceGateway;
