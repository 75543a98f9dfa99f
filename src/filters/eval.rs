use std::collections::BTreeMap;

use crate::models::event::TrackingEvent;
use crate::models::filter::{
    ConditionOperator, FilterCondition, FilterDefinition, OperationAction, WritableDimension,
};

/// Result of evaluating a filter list against one event: the dimension
/// overlays to write back. stm_* writes land in `custom_dimensions`, all
/// other writable dimensions in `modified_fields`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilterOutcome {
    pub custom_dimensions: BTreeMap<WritableDimension, String>,
    pub modified_fields: BTreeMap<WritableDimension, String>,
}

impl FilterOutcome {
    pub fn is_empty(&self) -> bool {
        self.custom_dimensions.is_empty() && self.modified_fields.is_empty()
    }
}

/// Filters in application order: ascending priority, declaration order
/// preserved within a tie. Applied with overwrite semantics this makes the
/// highest-priority filter win, and the later-declared filter win a tie.
pub(crate) fn application_order(filters: &[FilterDefinition]) -> Vec<&FilterDefinition> {
    let mut ordered: Vec<&FilterDefinition> = filters.iter().filter(|f| f.enabled).collect();
    ordered.sort_by_key(|f| f.priority);
    ordered
}

/// Evaluate all filters against one event. Conditions read the pristine
/// event, never the pending writes of other filters, matching what a SQL
/// UPDATE sees when its CASE predicates run against the stored row.
pub fn evaluate(filters: &[FilterDefinition], event: &TrackingEvent) -> FilterOutcome {
    let mut writes: BTreeMap<WritableDimension, String> = BTreeMap::new();

    for filter in application_order(filters) {
        if !filter
            .conditions
            .iter()
            .all(|c| condition_matches(c, event.source_value(c.field)))
        {
            continue;
        }
        for op in &filter.operations {
            let value = match op.action {
                OperationAction::SetValue => op.value.clone().unwrap_or_default(),
                OperationAction::UnsetValue => String::new(),
                OperationAction::SetDefaultValue => {
                    let current = event.dimension_value(op.dimension);
                    if current.is_empty() {
                        op.value.clone().unwrap_or_default()
                    } else {
                        current.to_string()
                    }
                }
            };
            writes.insert(op.dimension, value);
        }
    }

    // Drop writes that leave the stored value untouched.
    writes.retain(|dim, value| value.as_str() != event.dimension_value(*dim));

    let mut outcome = FilterOutcome::default();
    for (dim, value) in writes {
        if dim.is_custom_dimension() {
            outcome.custom_dimensions.insert(dim, value);
        } else {
            outcome.modified_fields.insert(dim, value);
        }
    }
    outcome
}

/// Evaluate and write the outcome back onto the event.
pub fn apply_filters(filters: &[FilterDefinition], event: &mut TrackingEvent) {
    let outcome = evaluate(filters, event);
    for (dim, value) in outcome
        .modified_fields
        .iter()
        .chain(outcome.custom_dimensions.iter())
    {
        event.set_dimension(*dim, value);
    }
}

/// One condition against the value read from the event. The negative
/// operators refuse to match an empty field so that "not X" filters don't
/// catch every row where the field is simply absent.
pub fn condition_matches(cond: &FilterCondition, test_value: &str) -> bool {
    let expected = cond.value.as_deref().unwrap_or("");
    match cond.operator {
        ConditionOperator::Equals => test_value == expected,
        ConditionOperator::NotEquals => !test_value.is_empty() && test_value != expected,
        ConditionOperator::Contains => test_value.contains(expected),
        ConditionOperator::NotContains => {
            !test_value.is_empty() && !test_value.contains(expected)
        }
        ConditionOperator::IsEmpty => test_value.is_empty(),
        ConditionOperator::IsNotEmpty => !test_value.is_empty(),
        ConditionOperator::Regex => match regex::Regex::new(expected) {
            Ok(re) => re.is_match(test_value),
            // A pattern that does not compile evaluates false; the other
            // filters still run.
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::filter::{FilterOperation, SourceField};
    use chrono::Utc;

    fn filter(
        id: &str,
        priority: u32,
        conditions: Vec<FilterCondition>,
        operations: Vec<FilterOperation>,
    ) -> FilterDefinition {
        FilterDefinition {
            id: id.to_string(),
            name: id.to_string(),
            priority,
            order: 0,
            tags: vec![],
            enabled: true,
            version: String::new(),
            conditions,
            operations,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cond(field: SourceField, operator: ConditionOperator, value: &str) -> FilterCondition {
        FilterCondition {
            field,
            operator,
            value: if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            },
        }
    }

    fn set(dimension: WritableDimension, value: &str) -> FilterOperation {
        FilterOperation {
            dimension,
            action: OperationAction::SetValue,
            value: Some(value.to_string()),
        }
    }

    #[test]
    fn operator_semantics() {
        let c = cond(SourceField::UtmSource, ConditionOperator::Equals, "x");
        assert!(condition_matches(&c, "x"));
        assert!(!condition_matches(&c, "y"));

        let c = cond(SourceField::UtmSource, ConditionOperator::NotEquals, "x");
        assert!(condition_matches(&c, "y"));
        assert!(!condition_matches(&c, "x"));
        // empty never matches the negatives
        assert!(!condition_matches(&c, ""));

        let c = cond(SourceField::Path, ConditionOperator::Contains, "doc");
        assert!(condition_matches(&c, "/docs/intro"));
        assert!(!condition_matches(&c, "/pricing"));

        let c = cond(SourceField::Path, ConditionOperator::NotContains, "doc");
        assert!(condition_matches(&c, "/pricing"));
        assert!(!condition_matches(&c, "/docs"));
        assert!(!condition_matches(&c, ""));

        let c = cond(SourceField::UtmTerm, ConditionOperator::IsEmpty, "");
        assert!(condition_matches(&c, ""));
        assert!(!condition_matches(&c, "x"));

        let c = cond(SourceField::UtmTerm, ConditionOperator::IsNotEmpty, "");
        assert!(condition_matches(&c, "x"));
        assert!(!condition_matches(&c, ""));

        let c = cond(SourceField::Path, ConditionOperator::Regex, "^/blog/[0-9]+$");
        assert!(condition_matches(&c, "/blog/42"));
        assert!(!condition_matches(&c, "/blog/x"));
    }

    #[test]
    fn bad_regex_evaluates_false() {
        let c = cond(SourceField::Path, ConditionOperator::Regex, "([unclosed");
        assert!(!condition_matches(&c, "/anything"));
    }

    #[test]
    fn higher_priority_wins_regardless_of_declaration_order() {
        let event = TrackingEvent {
            utm_source: "facebook".to_string(),
            ..Default::default()
        };
        // declared low-priority first
        let filters = vec![
            filter(
                "f1",
                90,
                vec![cond(SourceField::UtmSource, ConditionOperator::Equals, "facebook")],
                vec![set(WritableDimension::Channel, "Facebook")],
            ),
            filter(
                "f2",
                100,
                vec![cond(SourceField::UtmSource, ConditionOperator::Equals, "facebook")],
                vec![set(WritableDimension::Channel, "Google")],
            ),
        ];
        let outcome = evaluate(&filters, &event);
        assert_eq!(
            outcome.modified_fields.get(&WritableDimension::Channel),
            Some(&"Google".to_string())
        );

        // and in the reverse declaration order
        let reversed: Vec<_> = filters.into_iter().rev().collect();
        let outcome = evaluate(&reversed, &event);
        assert_eq!(
            outcome.modified_fields.get(&WritableDimension::Channel),
            Some(&"Google".to_string())
        );
    }

    #[test]
    fn equal_priority_later_declared_wins() {
        let event = TrackingEvent {
            utm_source: "facebook".to_string(),
            ..Default::default()
        };
        let filters = vec![
            filter(
                "f1",
                100,
                vec![cond(SourceField::UtmSource, ConditionOperator::Equals, "facebook")],
                vec![set(WritableDimension::Channel, "First")],
            ),
            filter(
                "f2",
                100,
                vec![cond(SourceField::UtmSource, ConditionOperator::Equals, "facebook")],
                vec![set(WritableDimension::Channel, "Second")],
            ),
        ];
        let outcome = evaluate(&filters, &event);
        assert_eq!(
            outcome.modified_fields.get(&WritableDimension::Channel),
            Some(&"Second".to_string())
        );
    }

    #[test]
    fn conditions_are_anded() {
        let event = TrackingEvent {
            utm_source: "facebook".to_string(),
            device: "mobile".to_string(),
            ..Default::default()
        };
        let f = filter(
            "f1",
            10,
            vec![
                cond(SourceField::UtmSource, ConditionOperator::Equals, "facebook"),
                cond(SourceField::Device, ConditionOperator::Equals, "desktop"),
            ],
            vec![set(WritableDimension::Channel, "Paid Social")],
        );
        assert!(evaluate(&[f], &event).is_empty());
    }

    #[test]
    fn disabled_filters_are_skipped() {
        let event = TrackingEvent {
            utm_source: "facebook".to_string(),
            ..Default::default()
        };
        let mut f = filter(
            "f1",
            10,
            vec![cond(SourceField::UtmSource, ConditionOperator::Equals, "facebook")],
            vec![set(WritableDimension::Channel, "Facebook")],
        );
        f.enabled = false;
        assert!(evaluate(&[f], &event).is_empty());
    }

    #[test]
    fn stm_writes_split_into_custom_dimensions() {
        let event = TrackingEvent {
            utm_source: "newsletter".to_string(),
            ..Default::default()
        };
        let f = filter(
            "f1",
            10,
            vec![cond(SourceField::UtmSource, ConditionOperator::Equals, "newsletter")],
            vec![
                set(WritableDimension::Stm2, "email"),
                set(WritableDimension::Channel, "Email"),
            ],
        );
        let outcome = evaluate(&[f], &event);
        assert_eq!(
            outcome.custom_dimensions.get(&WritableDimension::Stm2),
            Some(&"email".to_string())
        );
        assert_eq!(
            outcome.modified_fields.get(&WritableDimension::Channel),
            Some(&"Email".to_string())
        );
    }

    #[test]
    fn set_default_only_fills_empty() {
        let event = TrackingEvent {
            utm_source: "x".to_string(),
            channel: "Existing".to_string(),
            ..Default::default()
        };
        let f = filter(
            "f1",
            10,
            vec![cond(SourceField::UtmSource, ConditionOperator::Equals, "x")],
            vec![
                FilterOperation {
                    dimension: WritableDimension::Channel,
                    action: OperationAction::SetDefaultValue,
                    value: Some("Fallback".to_string()),
                },
                FilterOperation {
                    dimension: WritableDimension::ChannelGroup,
                    action: OperationAction::SetDefaultValue,
                    value: Some("Fallback Group".to_string()),
                },
            ],
        );
        let outcome = evaluate(&[f], &event);
        // channel already has a value, channel_group was empty
        assert!(!outcome.modified_fields.contains_key(&WritableDimension::Channel));
        assert_eq!(
            outcome.modified_fields.get(&WritableDimension::ChannelGroup),
            Some(&"Fallback Group".to_string())
        );
    }

    #[test]
    fn unset_clears_and_is_direct_coerces() {
        let mut event = TrackingEvent {
            referrer: "https://news.ycombinator.com/".to_string(),
            referrer_domain: "news.ycombinator.com".to_string(),
            ..Default::default()
        };
        let f = filter(
            "f1",
            10,
            vec![cond(
                SourceField::ReferrerDomain,
                ConditionOperator::Contains,
                "ycombinator",
            )],
            vec![
                FilterOperation {
                    dimension: WritableDimension::ReferrerDomain,
                    action: OperationAction::UnsetValue,
                    value: None,
                },
                set(WritableDimension::IsDirect, "true"),
            ],
        );
        apply_filters(&[f], &mut event);
        assert_eq!(event.referrer_domain, "");
        assert!(event.is_direct);
    }

    #[test]
    fn conditions_read_pristine_event_not_pending_writes() {
        let event = TrackingEvent {
            utm_source: "facebook".to_string(),
            ..Default::default()
        };
        // f1 rewrites utm_source; f2's condition still sees "facebook".
        let filters = vec![
            filter(
                "f1",
                50,
                vec![cond(SourceField::UtmSource, ConditionOperator::Equals, "facebook")],
                vec![set(WritableDimension::UtmSource, "meta")],
            ),
            filter(
                "f2",
                10,
                vec![cond(SourceField::UtmSource, ConditionOperator::Equals, "facebook")],
                vec![set(WritableDimension::Channel, "Social")],
            ),
        ];
        let outcome = evaluate(&filters, &event);
        assert_eq!(
            outcome.modified_fields.get(&WritableDimension::UtmSource),
            Some(&"meta".to_string())
        );
        assert_eq!(
            outcome.modified_fields.get(&WritableDimension::Channel),
            Some(&"Social".to_string())
        );
    }
}
