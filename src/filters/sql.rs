use std::collections::BTreeMap;

use crate::models::filter::{
    ConditionOperator, FilterCondition, FilterDefinition, OperationAction, SourceField,
    WritableDimension,
};

/// Filters compiled to a ClickHouse SET clause for `ALTER TABLE … UPDATE`.
/// One CASE per touched dimension; a row matched by no filter keeps its
/// existing value through the trailing `ELSE <dim> END`.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    pub set_clause: String,
    pub dimensions: Vec<&'static str>,
}

struct Branch {
    predicate: String,
    value_expr: String,
}

/// Compile the filter list. Branch order mirrors live evaluation
/// precedence: priority descending, and within a tie the later-declared
/// filter first, so the first matching WHEN is the same winner the per-row
/// evaluator picks. Returns None when nothing compiles to a branch.
pub fn compile_set_clause(filters: &[FilterDefinition]) -> Option<CompiledFilters> {
    let mut ranked: Vec<(usize, &FilterDefinition)> = filters
        .iter()
        .enumerate()
        .filter(|(_, f)| f.enabled)
        .collect();
    ranked.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ib.cmp(ia)));

    let mut cases: BTreeMap<WritableDimension, Vec<Branch>> = BTreeMap::new();

    for (_, filter) in ranked {
        let Some(predicate) = filter_predicate(&filter.conditions) else {
            continue;
        };
        for op in &filter.operations {
            let value_expr = operation_value_expr(op.dimension, op.action, op.value.as_deref());
            cases.entry(op.dimension).or_default().push(Branch {
                predicate: predicate.clone(),
                value_expr,
            });
        }
    }

    if cases.is_empty() {
        return None;
    }

    let mut parts = Vec::with_capacity(cases.len());
    let mut dimensions = Vec::with_capacity(cases.len());
    for (dim, branches) in &cases {
        let col = dim.column();
        let whens: Vec<String> = branches
            .iter()
            .map(|b| format!("WHEN {} THEN {}", b.predicate, b.value_expr))
            .collect();
        parts.push(format!("{col} = CASE {} ELSE {col} END", whens.join(" ")));
        dimensions.push(col);
    }

    Some(CompiledFilters {
        set_clause: parts.join(", "),
        dimensions,
    })
}

/// AND of all conditions, or None when the filter can never match (a regex
/// that does not compile evaluates false, which poisons the conjunction).
fn filter_predicate(conditions: &[FilterCondition]) -> Option<String> {
    let mut parts = Vec::with_capacity(conditions.len());
    for cond in conditions {
        if cond.operator == ConditionOperator::Regex
            && regex::Regex::new(cond.value.as_deref().unwrap_or("")).is_err()
        {
            return None;
        }
        parts.push(condition_sql(cond));
    }
    if parts.is_empty() {
        None
    } else {
        Some(format!("({})", parts.join(" AND ")))
    }
}

/// The tested expression for a source field. `is_direct` is a Bool column,
/// projected to 'true'/'false' so the string operators line up with the
/// live evaluator.
fn test_expr(field: SourceField) -> String {
    match field {
        SourceField::IsDirect => "if(is_direct, 'true', 'false')".to_string(),
        other => other.column().to_string(),
    }
}

fn condition_sql(cond: &FilterCondition) -> String {
    let col = test_expr(cond.field);
    let value = escape(cond.value.as_deref().unwrap_or(""));
    match cond.operator {
        ConditionOperator::Equals => format!("{col} = '{value}'"),
        ConditionOperator::NotEquals => format!("({col} != '' AND {col} != '{value}')"),
        ConditionOperator::Contains => format!("position({col}, '{value}') > 0"),
        ConditionOperator::NotContains => {
            format!("({col} != '' AND position({col}, '{value}') = 0)")
        }
        ConditionOperator::IsEmpty => format!("{col} = ''"),
        ConditionOperator::IsNotEmpty => format!("{col} != ''"),
        ConditionOperator::Regex => format!("match({col}, '{value}')"),
    }
}

fn operation_value_expr(
    dim: WritableDimension,
    action: OperationAction,
    value: Option<&str>,
) -> String {
    let col = dim.column();
    if dim == WritableDimension::IsDirect {
        // Bool column: coerce the string payload, never "default" over it.
        return match action {
            OperationAction::SetValue => {
                if value == Some("true") { "true" } else { "false" }.to_string()
            }
            OperationAction::UnsetValue => "false".to_string(),
            OperationAction::SetDefaultValue => col.to_string(),
        };
    }
    match action {
        OperationAction::SetValue => format!("'{}'", escape(value.unwrap_or(""))),
        OperationAction::UnsetValue => "''".to_string(),
        OperationAction::SetDefaultValue => {
            format!("if({col} = '', '{}', {col})", escape(value.unwrap_or("")))
        }
    }
}

/// Escape a string literal for the ClickHouse dialect. Identifiers never
/// pass through here; they come from the closed vocabularies.
pub fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}
