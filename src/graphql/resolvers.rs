//! GraphQL resolvers proxying to the gateway's own REST surface over
//! loopback HTTP. Queries push the selection set down as a `fields`
//! projection; mutations refetch the post-update state.

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, ResolverContext, TypeRef};
use async_graphql::{Error, Value as GqlValue};
use serde_json::Value;
use std::sync::OnceLock;

fn http() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(reqwest::Client::new)
}

fn to_gql(v: Value) -> Result<GqlValue, Error> {
    GqlValue::from_json(v).map_err(|e| Error::new(format!("json decode error: {}", e)))
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = if body.is_empty() { status.to_string() } else { body };
    Err(Error::new(format!("rest error: {}", message)))
}

/// Leaf names of the current selection, for single-object results.
fn leaf_fields(ctx: &ResolverContext<'_>) -> String {
    ctx.ctx
        .field()
        .selection_set()
        .map(|f| f.name().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Leaf names under the `data` subselection, for list results.
fn data_leaf_fields(ctx: &ResolverContext<'_>) -> String {
    for field in ctx.ctx.field().selection_set() {
        if field.name() == "data" {
            return field
                .selection_set()
                .map(|f| f.name().to_string())
                .collect::<Vec<_>>()
                .join(",");
        }
    }
    String::new()
}

fn arg_json(ctx: &ResolverContext<'_>, name: &str) -> Result<Value, Error> {
    ctx.args
        .try_get(name)?
        .deserialize::<Value>()
        .map_err(|e| Error::new(format!("invalid {} argument: {:?}", name, e)))
}

pub fn get_by_id(name: &str, type_name: &str, url_template: String) -> Field {
    Field::new(name, TypeRef::named(type_name), move |ctx: ResolverContext| {
        let url_template = url_template.clone();
        FieldFuture::new(async move {
            let id = ctx.args.try_get("id")?.string()?.to_string();
            let mut url = url_template.replace("{id}", &id);
            let fields = leaf_fields(&ctx);
            if !fields.is_empty() {
                url = format!("{}?fields={}", url, urlencode(&fields));
            }
            let resp = check(http().get(&url).send().await.map_err(Error::new_with_source)?).await?;
            let out: Value = resp.json().await.map_err(Error::new_with_source)?;
            Ok(Some(FieldValue::value(to_gql(out)?)))
        })
    })
    .argument(async_graphql::dynamic::InputValue::new("id", TypeRef::named(TypeRef::STRING)))
}

pub fn list(name: &str, result_type: &str, url: String) -> Field {
    let field = Field::new(name, TypeRef::named(result_type), move |ctx: ResolverContext| {
        let url = url.clone();
        FieldFuture::new(async move {
            let mut params: Vec<String> = Vec::new();
            for key in ["page", "page_size", "order", "fields"] {
                if let Some(accessor) = ctx.args.get(key) {
                    let raw = match accessor.deserialize::<Value>() {
                        Ok(Value::String(s)) => s,
                        Ok(other) => other.to_string(),
                        Err(_) => continue,
                    };
                    params.push(format!("{}={}", key, urlencode(&raw)));
                }
            }
            // no explicit fields argument: push the data subselection down
            if ctx.args.get("fields").is_none() {
                let fields = data_leaf_fields(&ctx);
                if !fields.is_empty() {
                    params.push(format!("fields={}", urlencode(&fields)));
                }
            }
            // the filter argument is an opaque query-string fragment
            if let Some(accessor) = ctx.args.get("filter") {
                if let Ok(filter) = accessor.string() {
                    for part in filter.trim_matches('&').split('&') {
                        let part = part.trim();
                        if !part.is_empty() {
                            params.push(part.to_string());
                        }
                    }
                }
            }
            let final_url = if params.is_empty() {
                url.clone()
            } else {
                format!("{}?{}", url, params.join("&"))
            };
            let resp = check(http().get(&final_url).send().await.map_err(Error::new_with_source)?).await?;
            let out: Value = resp.json().await.map_err(Error::new_with_source)?;
            Ok(Some(FieldValue::value(to_gql(out)?)))
        })
    });
    field
        .argument(async_graphql::dynamic::InputValue::new("page", TypeRef::named(TypeRef::INT)))
        .argument(async_graphql::dynamic::InputValue::new("page_size", TypeRef::named(TypeRef::INT)))
        .argument(async_graphql::dynamic::InputValue::new("order", TypeRef::named(TypeRef::STRING)))
        .argument(async_graphql::dynamic::InputValue::new("fields", TypeRef::named(TypeRef::STRING)))
        .argument(async_graphql::dynamic::InputValue::new("filter", TypeRef::named(TypeRef::STRING)))
}

pub fn batch_create(name: &str, type_name: &str, input_type: &str, url: String) -> Field {
    Field::new(name, TypeRef::named_list(type_name), move |ctx: ResolverContext| {
        let url = url.clone();
        FieldFuture::new(async move {
            let input = arg_json(&ctx, "input")?;
            let resp = check(http().post(&url).json(&input).send().await.map_err(Error::new_with_source)?).await?;
            let out: Value = resp.json().await.map_err(Error::new_with_source)?;
            Ok(Some(FieldValue::value(to_gql(out)?)))
        })
    })
    .argument(async_graphql::dynamic::InputValue::new("input", TypeRef::named_list(input_type)))
}

/// PUT then refetch by id so the resolver result reflects post-update state.
pub fn update_by_id(name: &str, type_name: &str, input_type: &str, url_template: String) -> Field {
    Field::new(name, TypeRef::named(type_name), move |ctx: ResolverContext| {
        let url_template = url_template.clone();
        FieldFuture::new(async move {
            let id = ctx.args.try_get("id")?.string()?.to_string();
            let input = arg_json(&ctx, "input")?;
            let url = url_template.replace("{id}", &id);
            check(http().put(&url).json(&input).send().await.map_err(Error::new_with_source)?).await?;

            let mut get_url = url;
            let fields = leaf_fields(&ctx);
            if !fields.is_empty() {
                get_url = format!("{}?fields={}", get_url, urlencode(&fields));
            }
            let resp = check(http().get(&get_url).send().await.map_err(Error::new_with_source)?).await?;
            let out: Value = resp.json().await.map_err(Error::new_with_source)?;
            Ok(Some(FieldValue::value(to_gql(out)?)))
        })
    })
    .argument(async_graphql::dynamic::InputValue::new("id", TypeRef::named(TypeRef::STRING)))
    .argument(async_graphql::dynamic::InputValue::new("input", TypeRef::named(input_type)))
}

/// PUT the batch, then refetch through a primary-key `__in` list built from
/// the input rows.
pub fn batch_update(name: &str, type_name: &str, input_type: &str, url: String, pk_fields: Vec<String>) -> Field {
    Field::new(name, TypeRef::named_list(type_name), move |ctx: ResolverContext| {
        let url = url.clone();
        let pk_fields = pk_fields.clone();
        FieldFuture::new(async move {
            let input = arg_json(&ctx, "input")?;
            let resp = check(http().put(&url).json(&input).send().await.map_err(Error::new_with_source)?).await?;

            let rows = input.as_array().ok_or_else(|| Error::new("batch update input must be array"))?;
            if pk_fields.is_empty() {
                let out: Value = resp.json().await.unwrap_or(Value::Array(Vec::new()));
                return Ok(Some(FieldValue::value(to_gql(out)?)));
            }
            let mut params = Vec::new();
            for pk in &pk_fields {
                let values: Vec<String> = rows
                    .iter()
                    .filter_map(|row| row.get(pk))
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                if values.is_empty() {
                    return Err(Error::new(format!("no values for primary key {} found in input", pk)));
                }
                params.push(format!("{}__in={}", pk, urlencode(&values.join(","))));
            }
            let list_url = format!("{}?{}", url, params.join("&"));
            let resp = check(http().get(&list_url).send().await.map_err(Error::new_with_source)?).await?;
            let out: Value = resp.json().await.map_err(Error::new_with_source)?;
            let data = out.get("data").cloned().unwrap_or(out);
            Ok(Some(FieldValue::value(to_gql(data)?)))
        })
    })
    .argument(async_graphql::dynamic::InputValue::new("input", TypeRef::named_list(input_type)))
}

pub fn batch_delete(name: &str, url: String) -> Field {
    Field::new(name, TypeRef::named(TypeRef::BOOLEAN), move |ctx: ResolverContext| {
        let url = url.clone();
        FieldFuture::new(async move {
            let ids = arg_json(&ctx, "ids")?;
            check(http().post(&url).json(&ids).send().await.map_err(Error::new_with_source)?).await?;
            Ok(Some(FieldValue::value(GqlValue::from(true))))
        })
    })
    .argument(async_graphql::dynamic::InputValue::new(
        "ids",
        TypeRef::named_list(TypeRef::STRING),
    ))
}

pub fn delete_by_id(name: &str, url_template: String) -> Field {
    Field::new(name, TypeRef::named(TypeRef::BOOLEAN), move |ctx: ResolverContext| {
        let url_template = url_template.clone();
        FieldFuture::new(async move {
            let id = ctx.args.try_get("id")?.string()?.to_string();
            let url = url_template.replace("{id}", &id);
            check(http().delete(&url).send().await.map_err(Error::new_with_source)?).await?;
            Ok(Some(FieldValue::value(GqlValue::from(true))))
        })
    })
    .argument(async_graphql::dynamic::InputValue::new("id", TypeRef::named(TypeRef::STRING)))
}

fn urlencode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}
