use crate::domain::model::{DependencyCondition, ServiceDefinition};
use crate::utils::error::{ComposeError, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// `from` 依賴 `to`，啟動 `from` 前需滿足 `condition`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub condition: DependencyCondition,
    /// 由 network_mode 附著推導出的隱含邊
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub implicit: bool,
}

/// 依賴圖與拓撲啟動順序
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    order: Vec<String>,
    edges: Vec<DependencyEdge>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyGraph {
    /// 由有效定義建圖：每個 `depends_on` 產生一條邊，附著的網路模式另加一條
    /// `service_started` 邊。DFS 偵測環，回傳依宣告順序的穩定拓撲序。
    pub fn build(definitions: &IndexMap<String, ServiceDefinition>) -> Result<Self> {
        let mut edges = Vec::new();
        for (name, def) in definitions {
            for (dep, condition) in def.dependencies() {
                if !definitions.contains_key(dep) {
                    return Err(ComposeError::UnknownDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                }
                edges.push(DependencyEdge {
                    from: name.clone(),
                    to: dep.clone(),
                    condition: *condition,
                    implicit: false,
                });
            }

            if let Some(target) = def.network_mode().attached_to() {
                if !definitions.contains_key(target) {
                    return Err(ComposeError::UnknownDependency {
                        service: name.clone(),
                        dependency: target.to_string(),
                    });
                }
                if !edges.iter().any(|e| e.from == *name && e.to == target) {
                    edges.push(DependencyEdge {
                        from: name.clone(),
                        to: target.to_string(),
                        condition: DependencyCondition::Started,
                        implicit: true,
                    });
                }
            }
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        let mut order = Vec::with_capacity(definitions.len());

        for name in definitions.keys() {
            Self::visit(name, &adjacency, &mut marks, &mut path, &mut order)?;
        }

        Ok(Self { order, edges })
    }

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                // 從目前路徑中第一次出現的位置截出環
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(node.to_string());
                return Err(ComposeError::DependencyCycleError { cycle });
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        path.push(node);

        if let Some(deps) = adjacency.get(node) {
            for dep in deps {
                Self::visit(*dep, adjacency, marks, path, order)?;
            }
        }

        path.pop();
        marks.insert(node, Mark::Done);
        order.push(node.to_string());
        Ok(())
    }

    /// 依賴一定排在依賴者之前
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// 啟動順序的反向：依賴者先於依賴停止
    pub fn teardown_order(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn dependencies_of<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| e.from == service)
    }

    pub fn dependents_of<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| e.to == service)
    }

    /// 直接或間接依賴 `service` 的所有服務
    pub fn transitive_dependents(&self, service: &str) -> HashSet<String> {
        let mut found = HashSet::new();
        let mut stack = vec![service.to_string()];
        while let Some(current) = stack.pop() {
            for edge in self.dependents_of(&current) {
                if found.insert(edge.from.clone()) {
                    stack.push(edge.from.clone());
                }
            }
        }
        found
    }

    /// `targets` 及其所有直接或間接依賴，依啟動順序排列
    pub fn closure(&self, targets: &[String]) -> Vec<String> {
        let mut wanted: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = targets.to_vec();
        while let Some(current) = stack.pop() {
            if wanted.insert(current.clone()) {
                for edge in self.dependencies_of(&current) {
                    stack.push(edge.to.clone());
                }
            }
        }
        self.order
            .iter()
            .filter(|name| wanted.contains(*name))
            .cloned()
            .collect()
    }

    /// 分層：同一層內的服務彼此無依賴，可並行啟動
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        for name in &self.order {
            let level = self
                .dependencies_of(name)
                .filter_map(|e| depth.get(e.to.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(name.as_str(), level);
        }

        let mut levels: Vec<Vec<String>> = Vec::new();
        for name in &self.order {
            let level = depth[name.as_str()];
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(name.clone());
        }
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::NetworkMode;

    fn service(name: &str, deps: &[(&str, DependencyCondition)]) -> ServiceDefinition {
        let mut def = ServiceDefinition::new(name);
        def.image = Some(format!("{}:latest", name));
        if !deps.is_empty() {
            def.depends_on = Some(
                deps.iter()
                    .map(|(dep, condition)| (dep.to_string(), *condition))
                    .collect(),
            );
        }
        def
    }

    fn definitions(services: Vec<ServiceDefinition>) -> IndexMap<String, ServiceDefinition> {
        services.into_iter().map(|s| (s.name.clone(), s)).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let defs = definitions(vec![
            service(
                "review",
                &[
                    ("review-db", DependencyCondition::Healthy),
                    ("placement", DependencyCondition::Started),
                ],
            ),
            service("review-db", &[]),
            service("placement", &[]),
            service("review-db-admin", &[("review-db", DependencyCondition::Started)]),
        ]);

        let graph = DependencyGraph::build(&defs).unwrap();
        let order = graph.order();
        assert_eq!(order.len(), 4);
        assert!(position(order, "review-db") < position(order, "review"));
        assert!(position(order, "placement") < position(order, "review"));
        assert!(position(order, "review-db") < position(order, "review-db-admin"));
        // 宣告順序決定同級的先後
        assert_eq!(order, &["review-db", "placement", "review", "review-db-admin"]);
    }

    #[test]
    fn test_cycle_is_rejected_with_its_path() {
        let defs = definitions(vec![
            service("review", &[("review-db", DependencyCondition::Healthy)]),
            service("review-db", &[("review", DependencyCondition::Started)]),
        ]);

        match DependencyGraph::build(&defs) {
            Err(ComposeError::DependencyCycleError { cycle }) => {
                assert_eq!(cycle, vec!["review", "review-db", "review"]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let defs = definitions(vec![service(
            "review",
            &[("review", DependencyCondition::Started)],
        )]);
        assert!(matches!(
            DependencyGraph::build(&defs),
            Err(ComposeError::DependencyCycleError { .. })
        ));
    }

    #[test]
    fn test_transitive_cycle() {
        let defs = definitions(vec![
            service("a", &[("b", DependencyCondition::Started)]),
            service("b", &[("c", DependencyCondition::Started)]),
            service("c", &[("a", DependencyCondition::Started)]),
        ]);
        match DependencyGraph::build(&defs) {
            Err(ComposeError::DependencyCycleError { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let defs = definitions(vec![service("review", &[("mongo", DependencyCondition::Started)])]);
        assert!(matches!(
            DependencyGraph::build(&defs),
            Err(ComposeError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_attach_adds_implicit_started_edge() {
        let mut sidecar = service("review-dapr", &[]);
        sidecar.network_mode = Some(NetworkMode::Attach("review".to_string()));
        let defs = definitions(vec![sidecar, service("review", &[])]);

        let graph = DependencyGraph::build(&defs).unwrap();
        assert_eq!(graph.order(), &["review", "review-dapr"]);
        let edge = graph.dependencies_of("review-dapr").next().unwrap();
        assert_eq!(edge.to, "review");
        assert_eq!(edge.condition, DependencyCondition::Started);
        assert!(edge.implicit);
    }

    #[test]
    fn test_teardown_is_reverse_of_start() {
        let defs = definitions(vec![
            service("review", &[("review-db", DependencyCondition::Healthy)]),
            service("review-db", &[]),
            service("placement", &[]),
        ]);
        let graph = DependencyGraph::build(&defs).unwrap();
        let mut reversed = graph.teardown_order();
        reversed.reverse();
        assert_eq!(reversed, graph.order());
        for edge in graph.edges() {
            let teardown = graph.teardown_order();
            assert!(position(&teardown, &edge.from) < position(&teardown, &edge.to));
        }
    }

    #[test]
    fn test_levels_closure_and_dependents() {
        let defs = definitions(vec![
            service("review-db", &[]),
            service("placement", &[]),
            service("review", &[("review-db", DependencyCondition::Healthy)]),
            service("review-dapr", &[("review", DependencyCondition::Started), ("placement", DependencyCondition::Started)]),
            service("admin", &[]),
        ]);
        let graph = DependencyGraph::build(&defs).unwrap();

        assert_eq!(
            graph.levels(),
            vec![
                vec!["review-db".to_string(), "placement".to_string(), "admin".to_string()],
                vec!["review".to_string()],
                vec!["review-dapr".to_string()],
            ]
        );
        assert_eq!(graph.closure(&["review".to_string()]), vec!["review-db", "review"]);

        let dependents = graph.transitive_dependents("review-db");
        assert!(dependents.contains("review"));
        assert!(dependents.contains("review-dapr"));
        assert!(!dependents.contains("admin"));
    }
}
