use sha2::{Digest, Sha256};

use crate::models::filter::FilterDefinition;

/// Stable 8-character version of a filter configuration. Order-independent
/// on filter id, order-sensitive on the conditions and operations inside a
/// filter. Historical data is consistent with the live configuration iff
/// the version of the snapshot it was last backfilled with matches.
pub fn compute_filter_version(filters: &[FilterDefinition]) -> String {
    let mut canonical: Vec<String> = filters.iter().map(canonical_filter).collect();
    canonical.sort();

    let mut hasher = Sha256::new();
    for entry in &canonical {
        hasher.update(entry.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    hex_prefix(&digest, 8)
}

/// Per-filter version stored on the definition itself.
pub fn filter_definition_version(filter: &FilterDefinition) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_filter(filter).as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 8)
}

fn canonical_filter(filter: &FilterDefinition) -> String {
    // Only identity and behaviour feed the hash; names, tags and UI order
    // can change without invalidating backfilled data.
    let conditions = serde_json::to_string(&filter.conditions).unwrap_or_default();
    let operations = serde_json::to_string(&filter.operations).unwrap_or_default();
    format!(
        "{}|{}|{}|{}|{}",
        filter.id, filter.enabled, filter.priority, conditions, operations
    )
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::filter::{
        ConditionOperator, FilterCondition, FilterOperation, OperationAction, SourceField,
        WritableDimension,
    };
    use chrono::Utc;

    fn filter(id: &str, value: &str) -> FilterDefinition {
        FilterDefinition {
            id: id.to_string(),
            name: "n".to_string(),
            priority: 100,
            order: 0,
            tags: vec![],
            enabled: true,
            version: String::new(),
            conditions: vec![FilterCondition {
                field: SourceField::UtmSource,
                operator: ConditionOperator::Equals,
                value: Some(value.to_string()),
            }],
            operations: vec![FilterOperation {
                dimension: WritableDimension::Channel,
                action: OperationAction::SetValue,
                value: Some("Social".to_string()),
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn eight_chars_and_stable() {
        let filters = vec![filter("a", "facebook"), filter("b", "twitter")];
        let v1 = compute_filter_version(&filters);
        let v2 = compute_filter_version(&filters);
        assert_eq!(v1.len(), 8);
        assert_eq!(v1, v2);
    }

    #[test]
    fn independent_of_list_order() {
        let a = filter("a", "facebook");
        let b = filter("b", "twitter");
        assert_eq!(
            compute_filter_version(&[a.clone(), b.clone()]),
            compute_filter_version(&[b, a])
        );
    }

    #[test]
    fn sensitive_to_condition_changes() {
        let base = vec![filter("a", "facebook")];
        let changed = vec![filter("a", "instagram")];
        assert_ne!(compute_filter_version(&base), compute_filter_version(&changed));
    }

    #[test]
    fn sensitive_to_operation_order() {
        let mut two_ops = filter("a", "facebook");
        two_ops.operations.push(FilterOperation {
            dimension: WritableDimension::ChannelGroup,
            action: OperationAction::SetValue,
            value: Some("Paid".to_string()),
        });
        let mut swapped = two_ops.clone();
        swapped.operations.reverse();
        assert_ne!(
            compute_filter_version(&[two_ops]),
            compute_filter_version(&[swapped])
        );
    }

    #[test]
    fn name_changes_do_not_bump_version() {
        let a = filter("a", "facebook");
        let mut renamed = a.clone();
        renamed.name = "renamed".to_string();
        renamed.tags = vec!["social".to_string()];
        assert_eq!(
            compute_filter_version(&[a]),
            compute_filter_version(&[renamed])
        );
    }

    #[test]
    fn per_filter_version_matches_length() {
        assert_eq!(filter_definition_version(&filter("a", "x")).len(), 8);
    }
}
