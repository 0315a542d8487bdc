//! 战役依赖图
//!
//! 有向图：条件通过 READS 边指向其读取的变量，变量通过 WRITES 边
//! 指向为其赋值的条件，条件通过 DEPENDS_ON 边指向绑定的实体。
//! 节点按插入顺序存储并带哈希索引，重复节点/边为幂等空操作，
//! 这是全量重建得到确定性结果的前提。

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::GraphError;
use crate::models::{CampaignKey, condition_node_id, entity_node_id, variable_node_id};

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Variable,
    Condition,
    /// 独立效果节点。当前构建器把效果折叠进所属条件的 WRITES 边，
    /// 该类型保留给未来的独立效果实体。
    Effect,
    Entity,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Variable => "VARIABLE",
            Self::Condition => "CONDITION",
            Self::Effect => "EFFECT",
            Self::Entity => "ENTITY",
        }
    }
}

/// 边类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// 条件 -> 变量：条件读取变量
    Reads,
    /// 变量 -> 条件：变量的值由该条件的效果写入
    Writes,
    /// 条件 -> 实体：条件绑定在实体实例上
    DependsOn,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reads => "READS",
            Self::Writes => "WRITES",
            Self::DependsOn => "DEPENDS_ON",
        }
    }
}

/// 图节点
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Node {
    pub fn variable(name: &str) -> Self {
        Self {
            id: variable_node_id(name),
            kind: NodeKind::Variable,
            entity_id: None,
            metadata: Map::new(),
        }
    }

    pub fn condition(id: Uuid, name: &str, priority: i32) -> Self {
        let mut metadata = Map::new();
        metadata.insert("name".to_string(), Value::String(name.to_string()));
        metadata.insert("priority".to_string(), Value::from(priority));
        Self {
            id: condition_node_id(id),
            kind: NodeKind::Condition,
            entity_id: None,
            metadata,
        }
    }

    pub fn entity(id: Uuid, entity_type: Option<&str>) -> Self {
        let mut metadata = Map::new();
        if let Some(ty) = entity_type {
            metadata.insert("entityType".to_string(), Value::String(ty.to_string()));
        }
        Self {
            id: entity_node_id(id),
            kind: NodeKind::Entity,
            entity_id: Some(id),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// 图边
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// 图统计信息
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub edges_by_kind: BTreeMap<String, usize>,
    pub has_cycle: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// 单个战役分支的依赖图
#[derive(Debug, Clone)]
pub struct CampaignGraph {
    key: CampaignKey,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    edge_keys: HashSet<(usize, usize, EdgeKind)>,
    /// 出边邻接表（插入顺序），与 edges 同步追加
    out: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl CampaignGraph {
    pub fn new(key: CampaignKey) -> Self {
        Self {
            key,
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            edge_keys: HashSet::new(),
            out: Vec::new(),
            incoming: Vec::new(),
        }
    }

    pub fn key(&self) -> &CampaignKey {
        &self.key
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// 添加节点。已存在同 ID 节点时为空操作并返回 false
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.index.contains_key(&node.id) {
            return false;
        }
        let idx = self.nodes.len();
        self.index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        self.out.push(Vec::new());
        self.incoming.push(Vec::new());
        true
    }

    /// 添加边。两端节点必须已注册；重复边为空操作并返回 Ok(false)
    pub fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind) -> Result<bool, GraphError> {
        let (&fi, &ti) = match (self.index.get(from), self.index.get(to)) {
            (Some(f), Some(t)) => (f, t),
            _ => {
                return Err(GraphError::EdgeEndpointMissing {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        };
        if !self.edge_keys.insert((fi, ti, kind)) {
            return Ok(false);
        }
        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            metadata: Map::new(),
        });
        self.out[fi].push(ti);
        self.incoming[ti].push(fi);
        Ok(true)
    }

    /// 节点的直接依赖（出边邻居），按边插入顺序去重
    pub fn dependencies_of(&self, id: &str) -> Result<Vec<&Node>, GraphError> {
        let &idx = self
            .index
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })?;
        Ok(Self::dedup_neighbors(&self.out[idx])
            .into_iter()
            .map(|i| &self.nodes[i])
            .collect())
    }

    /// 依赖该节点的节点（入边邻居），按边插入顺序去重
    pub fn dependents_of(&self, id: &str) -> Result<Vec<&Node>, GraphError> {
        let &idx = self
            .index
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })?;
        Ok(Self::dedup_neighbors(&self.incoming[idx])
            .into_iter()
            .map(|i| &self.nodes[i])
            .collect())
    }

    fn dedup_neighbors(neighbors: &[usize]) -> Vec<usize> {
        let mut seen = HashSet::new();
        neighbors
            .iter()
            .copied()
            .filter(|i| seen.insert(*i))
            .collect()
    }

    /// 三色 DFS 检测全部环路
    ///
    /// 每条环路以闭合路径返回（首尾为同一节点 ID）。同一条环路
    /// 从不同入口发现时按最小节点索引旋转归一去重。
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut color = vec![Color::White; self.nodes.len()];
        let mut path = Vec::new();
        let mut found = Vec::new();
        let mut seen = HashSet::new();

        for start in 0..self.nodes.len() {
            if color[start] == Color::White {
                self.dfs_collect(start, &mut color, &mut path, &mut found, &mut seen);
            }
        }

        found
            .into_iter()
            .map(|cycle| {
                let mut ids: Vec<String> =
                    cycle.iter().map(|&i| self.nodes[i].id.clone()).collect();
                ids.push(self.nodes[cycle[0]].id.clone());
                ids
            })
            .collect()
    }

    fn dfs_collect(
        &self,
        u: usize,
        color: &mut [Color],
        path: &mut Vec<usize>,
        found: &mut Vec<Vec<usize>>,
        seen: &mut HashSet<Vec<usize>>,
    ) {
        color[u] = Color::Gray;
        path.push(u);

        for &v in &self.out[u] {
            match color[v] {
                Color::White => self.dfs_collect(v, color, path, found, seen),
                Color::Gray => {
                    // 灰色后继必然在当前路径上，路径尾段即环路
                    if let Some(pos) = path.iter().position(|&p| p == v) {
                        let cycle: Vec<usize> = path[pos..].to_vec();
                        if seen.insert(canonical_rotation(&cycle)) {
                            found.push(cycle);
                        }
                    }
                }
                Color::Black => {}
            }
        }

        path.pop();
        color[u] = Color::Black;
    }

    /// Kahn 拓扑排序：每条边 (u -> v) 的起点 u 先于终点 v 输出
    ///
    /// 从入度为 0 的节点开始，并列时按节点插入顺序取最小者，
    /// 保证稳定输出。
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        let mut remaining: Vec<usize> = self.incoming.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(u)) = ready.pop() {
            order.push(self.nodes[u].id.clone());
            for &v in &self.out[u] {
                remaining[v] -= 1;
                if remaining[v] == 0 {
                    ready.push(Reverse(v));
                }
            }
        }

        if order.len() < self.nodes.len() {
            return Err(GraphError::Cycle {
                cycles: self.detect_cycles(),
            });
        }
        Ok(order)
    }

    /// 预判：加入 from -> to 的边是否会形成环路
    ///
    /// 等价于 to 是否已能到达 from。供条件写入前的校验使用，
    /// 不修改图本身。
    pub fn would_create_cycle(&self, from: &str, to: &str) -> Result<bool, GraphError> {
        let &fi = self
            .index
            .get(from)
            .ok_or_else(|| GraphError::NodeNotFound {
                id: from.to_string(),
            })?;
        let &ti = self
            .index
            .get(to)
            .ok_or_else(|| GraphError::NodeNotFound { id: to.to_string() })?;
        if fi == ti {
            return Ok(true);
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![ti];
        while let Some(u) = stack.pop() {
            if u == fi {
                return Ok(true);
            }
            if visited[u] {
                continue;
            }
            visited[u] = true;
            stack.extend(self.out[u].iter().copied());
        }
        Ok(false)
    }

    pub fn statistics(&self) -> GraphStatistics {
        let mut nodes_by_kind = BTreeMap::new();
        for node in &self.nodes {
            *nodes_by_kind
                .entry(node.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        let mut edges_by_kind = BTreeMap::new();
        for edge in &self.edges {
            *edges_by_kind
                .entry(edge.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        GraphStatistics {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            nodes_by_kind,
            edges_by_kind,
            has_cycle: !self.detect_cycles().is_empty(),
        }
    }
}

/// 旋转环路使最小索引在首位，作为去重键
fn canonical_rotation(cycle: &[usize]) -> Vec<usize> {
    let min_pos = cycle
        .iter()
        .enumerate()
        .min_by_key(|&(_, &v)| v)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = Vec::with_capacity(cycle.len());
    rotated.extend_from_slice(&cycle[min_pos..]);
    rotated.extend_from_slice(&cycle[..min_pos]);
    rotated
}
