//! The query-string filter grammar shared by every backend: `field` for
//! equality, `field__<op>` for the extended operators. Values are parsed
//! int → float → bool → string; `__in`/`__between` parse each element
//! independently.

use percent_encoding::percent_decode_str;
use serde_json::Value;

pub const PARAM_PAGE: &str = "page";
pub const PARAM_PAGE_SIZE: &str = "page_size";
pub const PARAM_FIELDS: &str = "fields";
pub const PARAM_ORDER: &str = "order";
pub const PARAM_KEY: &str = "key";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    IContains,
    In,
    IsNull,
    Between,
}

#[derive(Clone, Debug)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    pub raw: String,
}

/// Split `age__gte` into field and operator. A bare key is equality; an
/// unknown suffix yields `None` and the parameter is ignored (it still
/// marks the request as filtered).
pub fn parse_filter_key(key: &str) -> Option<(String, FilterOp)> {
    match key.split_once("__") {
        None => Some((key.to_string(), FilterOp::Eq)),
        Some((field, suffix)) => {
            let op = match suffix {
                "ne" => FilterOp::Ne,
                "gt" => FilterOp::Gt,
                "gte" => FilterOp::Gte,
                "lt" => FilterOp::Lt,
                "lte" => FilterOp::Lte,
                "like" => FilterOp::Like,
                "icontains" => FilterOp::IContains,
                "in" => FilterOp::In,
                "isnull" => FilterOp::IsNull,
                "between" => FilterOp::Between,
                _ => return None,
            };
            Some((field.to_string(), op))
        }
    }
}

/// Conditions for the adapter from the non-reserved query parameters.
pub fn collect_conditions(filters: &[(String, String)]) -> Vec<FilterCondition> {
    filters
        .iter()
        .filter_map(|(k, v)| {
            parse_filter_key(k).map(|(field, op)| FilterCondition {
                field,
                op,
                raw: v.clone(),
            })
        })
        .collect()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "t" | "T" | "true" | "True" | "TRUE" => Some(true),
        "f" | "F" | "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

pub fn parse_filter_value(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    if let Some(b) = parse_bool(s) {
        return Value::Bool(b);
    }
    Value::String(s.to_string())
}

pub fn parse_string_list(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(',').map(|p| p.to_string()).collect()
}

pub fn parse_filter_values(s: &str) -> Vec<Value> {
    s.split(',').map(|p| parse_filter_value(p.trim())).collect()
}

/// `__like` values carry SQL wildcards that clients percent-encode; the
/// router already decoded the query string once, this undoes any second
/// layer of encoding.
pub fn normalize_like_value(s: &str) -> String {
    match percent_decode_str(s).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_key_is_equality() {
        assert_eq!(parse_filter_key("username"), Some(("username".into(), FilterOp::Eq)));
    }

    #[test]
    fn suffixes_map_to_operators() {
        assert_eq!(parse_filter_key("age__gte").unwrap().1, FilterOp::Gte);
        assert_eq!(parse_filter_key("age__lte").unwrap().1, FilterOp::Lte);
        assert_eq!(parse_filter_key("name__like").unwrap().1, FilterOp::Like);
        assert_eq!(parse_filter_key("name__icontains").unwrap().1, FilterOp::IContains);
        assert_eq!(parse_filter_key("id__in").unwrap().1, FilterOp::In);
        assert_eq!(parse_filter_key("x__isnull").unwrap().1, FilterOp::IsNull);
        assert_eq!(parse_filter_key("age__between").unwrap().1, FilterOp::Between);
        assert_eq!(parse_filter_key("x__bogus"), None);
    }

    #[test]
    fn value_parsing_order() {
        assert_eq!(parse_filter_value("42"), json!(42));
        assert_eq!(parse_filter_value("4.5"), json!(4.5));
        assert_eq!(parse_filter_value("true"), json!(true));
        assert_eq!(parse_filter_value("TRUE"), json!(true));
        assert_eq!(parse_filter_value("1"), json!(1));
        assert_eq!(parse_filter_value("alice"), json!("alice"));
    }

    #[test]
    fn list_values_parse_element_wise() {
        assert_eq!(parse_filter_values("1, 2,x"), vec![json!(1), json!(2), json!("x")]);
        assert_eq!(parse_string_list(""), Vec::<String>::new());
        assert_eq!(parse_string_list("a,b"), vec!["a".to_string(), "b".into()]);
    }

    #[test]
    fn like_values_get_second_decode() {
        assert_eq!(normalize_like_value("%25gmail.com"), "%gmail.com");
        assert_eq!(normalize_like_value("%gmail.com"), "%gmail.com");
    }

    #[test]
    fn unknown_ops_are_dropped_from_conditions() {
        let conds = collect_conditions(&[
            ("a__bogus".into(), "1".into()),
            ("b".into(), "2".into()),
        ]);
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].field, "b");
    }
}
