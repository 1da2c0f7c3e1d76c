pub mod candle_repository;
pub mod connector_repository;
pub mod database;
pub mod job_repository;
pub mod quality_repository;

pub use candle_repository::SqliteCandleRepository;
pub use connector_repository::SqliteConnectorRepository;
pub use database::Database;
pub use job_repository::SqliteJobRepository;
pub use quality_repository::SqliteQualityRepository;
