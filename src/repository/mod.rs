// ==========================================
// 生产智能核心 - 数据仓储层
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
// 共享句柄: Arc<Mutex<Connection>> (SQLite 统一 PRAGMA 见 db.rs)
// ==========================================

pub mod activity_log_repo;
pub mod error;
pub mod maintenance_repo;
pub mod oee_repo;
pub mod production_log_repo;
pub mod quality_repo;
pub mod telemetry_repo;
pub mod work_order_repo;

pub use activity_log_repo::ActivityLogRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use maintenance_repo::MaintenanceScoreRepository;
pub use oee_repo::OeeRepository;
pub use production_log_repo::{ProductionLogRepository, ProductionLogSource};
pub use quality_repo::{DefectCaseRepository, InspectionRepository};
pub use telemetry_repo::TelemetryRepository;
pub use work_order_repo::{CancelOutcome, LeaseAttempt, WorkOrderRepository};
