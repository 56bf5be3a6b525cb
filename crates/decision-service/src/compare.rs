//! 版本比较
//!
//! 对两个版本内容做顶层键级别的结构化 diff，供审计和回滚界面展示。
//! 纯函数，无缓存无锁。

use serde_json::{Map, Value};
use serde::Serialize;

/// 单个键的变更（旧值 -> 新值）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// 两个版本内容的结构化差异
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentDiff {
    /// 新版本新增的键及其值
    pub added: Map<String, Value>,
    /// 新版本移除的键及其旧值
    pub removed: Map<String, Value>,
    /// 两边都有但值不同的键
    pub changed: Map<String, Value>,
}

impl ContentDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// 计算两个版本内容的顶层键 diff
///
/// 非对象载荷（数组、标量）退化为整值比较：不同则记为 "value" 键的变更。
pub fn diff_contents(old: &Value, new: &Value) -> ContentDiff {
    let (Some(old_map), Some(new_map)) = (old.as_object(), new.as_object()) else {
        let mut diff = ContentDiff::default();
        if old != new {
            let change = FieldChange {
                old: old.clone(),
                new: new.clone(),
            };
            diff.changed.insert(
                "value".to_string(),
                serde_json::to_value(change).unwrap_or(Value::Null),
            );
        }
        return diff;
    };

    let mut diff = ContentDiff::default();

    for (key, new_value) in new_map {
        match old_map.get(key) {
            None => {
                diff.added.insert(key.clone(), new_value.clone());
            }
            Some(old_value) if old_value != new_value => {
                let change = FieldChange {
                    old: old_value.clone(),
                    new: new_value.clone(),
                };
                diff.changed.insert(
                    key.clone(),
                    serde_json::to_value(change).unwrap_or(Value::Null),
                );
            }
            Some(_) => {}
        }
    }

    for (key, old_value) in old_map {
        if !new_map.contains_key(key) {
            diff.removed.insert(key.clone(), old_value.clone());
        }
    }

    diff
}
