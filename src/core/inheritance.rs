use crate::domain::model::{ListAttribute, ServiceDefinition};
use std::collections::BTreeSet;

/// 將子定義合併到父定義之上，產生有效定義
///
/// - 純量屬性（image/build、restart、network_mode、command、sidecar）：子值優先
/// - environment：逐鍵合併，衝突時子值覆蓋
/// - ports、volumes：聯集；子定義以 `replace` 列出的屬性改為整個取代
/// - healthcheck、depends_on：子定義有宣告就整個取代
///
/// 結果不含 `extends`，且對同一父定義重複套用結果不變。
pub fn resolve(child: &ServiceDefinition, parent: &ServiceDefinition) -> ServiceDefinition {
    // image 與 build 視為同一個「來源」屬性，避免合併出兩者並存
    let (image, build) = if child.image.is_some() || child.build.is_some() {
        (child.image.clone(), child.build.clone())
    } else {
        (parent.image.clone(), parent.build.clone())
    };

    let mut environment = parent.environment.clone();
    environment.extend(
        child
            .environment
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    let ports = merge_list(&child.replace, ListAttribute::Ports, &child.ports, &parent.ports);
    let volumes = merge_list(&child.replace, ListAttribute::Volumes, &child.volumes, &parent.volumes);

    ServiceDefinition {
        name: child.name.clone(),
        extends: None,
        image,
        build,
        command: child.command.clone().or_else(|| parent.command.clone()),
        ports,
        environment,
        volumes,
        replace: child.replace.clone(),
        health_check: child
            .health_check
            .clone()
            .or_else(|| parent.health_check.clone()),
        depends_on: child
            .depends_on
            .clone()
            .or_else(|| parent.depends_on.clone()),
        network_mode: child
            .network_mode
            .clone()
            .or_else(|| parent.network_mode.clone()),
        restart_policy: child.restart_policy.or(parent.restart_policy),
        sidecar: child.sidecar.clone().or_else(|| parent.sidecar.clone()),
    }
}

fn merge_list<T: Ord + Clone>(
    replace: &BTreeSet<ListAttribute>,
    attribute: ListAttribute,
    child: &BTreeSet<T>,
    parent: &BTreeSet<T>,
) -> BTreeSet<T> {
    if replace.contains(&attribute) {
        return child.clone();
    }
    parent.union(child).cloned().collect()
}
