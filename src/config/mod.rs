// ==========================================
// 生产智能核心 - 配置层
// ==========================================

pub mod config_manager;

pub use config_manager::ConfigManager;
