// ==========================================
// 生产智能核心 - 引擎层
// ==========================================
// 业务引擎: 遥测接入、OEE 聚合、缺陷工作流、维护预测、
// 工单队列与代理编排; 仓储只管数据,决策都在这一层
// ==========================================

pub mod clock;
pub mod defect_workflow;
pub mod events;
pub mod handlers;
pub mod ingestion;
pub mod oee;
pub mod orchestrator;
pub mod predictor;
pub mod work_queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use defect_workflow::{DefectWorkflow, WorkflowError, WORKFLOW_AGENT};
pub use events::{CollectingEventPublisher, CoreEvent, EventPublisher, TracingEventPublisher};
pub use handlers::{
    MaintenanceSchedulerHandler, ProcurementRequestHandler, QualitySupervisorHandler,
};
pub use ingestion::{IngestError, IngestHandle, TelemetryIngestor};
pub use oee::{OeeAggregator, OeeError, DOWNTIME_SENSOR};
pub use orchestrator::{
    AgentHandler, AgentOrchestrator, HandlerError, HandlerRegistry, OrchestratorHandle,
    TaskContext,
};
pub use predictor::{MaintenancePredictor, Prediction, PredictorError, ScoringModel};
pub use work_queue::{QueueError, WorkQueue};
