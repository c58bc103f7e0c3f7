// ==========================================
// 生产智能核心 - 领域层
// ==========================================
// 实体与类型定义,无业务逻辑、无持久化依赖
// ==========================================

pub mod activity_log;
pub mod maintenance;
pub mod production;
pub mod quality;
pub mod telemetry;
pub mod types;
pub mod work_order;

// 重导出核心实体
pub use activity_log::AgentActivityRecord;
pub use maintenance::MaintenanceScore;
pub use production::{OeeMetric, ProductionLogEntry, ShiftWindow};
pub use quality::{DefectCase, Inspection};
pub use telemetry::{Reading, RejectedReading};
pub use work_order::WorkOrder;
