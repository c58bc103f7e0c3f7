// ==========================================
// 生产智能核心 - API层
// ==========================================
// 进程内查询门面; 传输层适配 (HTTP/RPC) 在核心范围之外
// ==========================================

pub mod admin_api;
pub mod error;

pub use admin_api::{AdminApi, DefectCaseInfo, QueueStatsInfo, WorkOrderInfo};
pub use error::{ApiError, ApiResult};
