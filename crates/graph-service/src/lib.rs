//! 战役依赖图服务
//!
//! 从条件/变量记录构建分支级依赖图，提供环路检测、拓扑求值顺序、
//! 依赖查询，并以 single-flight 缓存按需构建的不可变图快照。

pub mod builder;
pub mod cache;
pub mod dto;
pub mod error;
pub mod graph;
pub mod models;
pub mod source;

pub use builder::{CampaignSource, GraphBuilder};
pub use cache::GraphCacheService;
pub use dto::{CycleReport, DependencyGraphView};
pub use error::GraphError;
pub use graph::{CampaignGraph, Edge, EdgeKind, GraphStatistics, Node, NodeKind};
pub use models::{
    CampaignKey, ConditionRecord, VariableRecord, VariableScope, condition_node_id,
    entity_node_id, variable_node_id,
};
pub use source::PgCampaignSource;
