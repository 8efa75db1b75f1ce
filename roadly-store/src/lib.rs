pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod events;
pub mod memory;
pub mod payment_repo;
pub mod redis_repo;
pub mod trip_repo;
pub mod voucher_repo;

pub use booking_repo::PgBookingRepository;
pub use database::DbClient;
pub use events::LogEventPublisher;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
pub use memory::{
    MemoryBookingRepository, MemoryEventLog, MemoryPaymentRepository, MemorySeatLockStore,
    MemoryTripRepository, MemoryVoucherRepository,
};
pub use payment_repo::PgPaymentRepository;
pub use redis_repo::RedisSeatLockStore;
pub use trip_repo::PgTripRepository;
pub use voucher_repo::PgVoucherRepository;
