// ==========================================
// 生产智能核心 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + Tokio
// 系统定位: 车间遥测、OEE 指标与自治任务调度的后端核心
// 边界: 设备协议适配、预测模型、通知投递、外层传输均在核心之外
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 管理查询面
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ActivityStatus, DefectSeverity, DefectState, MetricStatus, RejectedReadingPolicy, ShiftType,
    WorkOrderPriority, WorkOrderState, WorkOrderType,
};

// 领域实体
pub use domain::{
    AgentActivityRecord, DefectCase, Inspection, MaintenanceScore, OeeMetric,
    ProductionLogEntry, Reading, ShiftWindow, WorkOrder,
};

// 引擎
pub use engine::{
    AgentHandler, AgentOrchestrator, Clock, CoreEvent, DefectWorkflow, EventPublisher,
    HandlerRegistry, MaintenancePredictor, OeeAggregator, ScoringModel, SystemClock,
    TelemetryIngestor, WorkQueue,
};

// 配置
pub use config::ConfigManager;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "生产智能核心";

// 数据库版本
pub const DB_VERSION: &str = "v0.1";
