//! HTTP client for the shop admin API.
//!
//! Reads go through GraphQL (`products` listing, `product(id:)` point read).
//! Image order and variant price are written with REST `PUT`s, metafields
//! with the GraphQL `metafieldsSet` mutation. A listed product that does
//! not decode is skipped with a warning; the rest of the page still counts.
//!
//! Every response is classified into a [`RemoteError`]:
//!
//! | response | class |
//! |---|---|
//! | 429, GraphQL `THROTTLED` | `Throttled` (with `Retry-After` when sent) |
//! | 5xx, timeout, connection failure | `Transient` |
//! | other 4xx, GraphQL errors, `userErrors` | `Permanent` |

use std::time::Duration;

use async_trait::async_trait;
use remedy_core::api::{Page, RemoteApi, RemoteError, WorkItem};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::ShopConfig;
use crate::types::{GqlResponse, MetafieldsSetData, ProductData, ProductsData};
use crate::Result;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Longest error body quoted in a classified error.
const BODY_SNIPPET: usize = 300;

/// Metafields read with every product, as `namespace.key`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetafieldKeys {
    pub product: Vec<String>,
    pub variant: Vec<String>,
}

/// Product selection shared by the listing and the point read.
fn product_fields(keys: &MetafieldKeys) -> String {
    format!(
        r#"
    legacyResourceId
    title
    vendor
    images(first: 10) {{ edges {{ node {{ id }} }} }}
    {product_metafields}
    variants(first: 1) {{
      edges {{
        node {{
          id
          legacyResourceId
          title
          price
          selectedOptions {{ name value }}
          inventoryItem {{ unitCost {{ amount }} }}
          {variant_metafields}
        }}
      }}
    }}
"#,
        product_metafields = metafield_selection(&keys.product),
        variant_metafields = metafield_selection(&keys.variant),
    )
}

/// Metafields are requested by key, so an owner with many metafields cannot
/// push a wanted one off the first page.
fn metafield_selection(keys: &[String]) -> String {
    if keys.is_empty() {
        return String::new();
    }
    let list: Vec<String> = keys.iter().map(|k| Value::from(k.as_str()).to_string()).collect();
    format!(
        "metafields(first: {}, keys: [{}]) {{ edges {{ node {{ namespace key value type }} }} }}",
        keys.len(),
        list.join(", ")
    )
}

// ---------------------------------------------------------------------------
// Filter / Mutation
// ---------------------------------------------------------------------------

/// Which products to enumerate.
#[derive(Debug, Clone)]
pub struct ProductFilter {
    /// Matched server-side and re-checked case-insensitively.
    pub vendor: String,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShopMutation {
    SetImagePosition {
        product_id: u64,
        image_id: u64,
        position: u32,
    },
    SetVariantPrice {
        variant_id: u64,
        price: String,
    },
    SetMetafield {
        owner_gid: String,
        namespace: String,
        key: String,
        value: String,
        kind: String,
    },
}

impl ShopMutation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetImagePosition { .. } => "set_image_position",
            Self::SetVariantPrice { .. } => "set_variant_price",
            Self::SetMetafield { .. } => "set_metafield",
        }
    }
}

// ---------------------------------------------------------------------------
// ShopClient
// ---------------------------------------------------------------------------

pub struct ShopClient {
    http: reqwest::Client,
    config: ShopConfig,
    fields: String,
}

impl ShopClient {
    pub fn new(config: ShopConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("remedy/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config,
            fields: product_fields(&MetafieldKeys::default()),
        })
    }

    /// Also read these metafields with every product.
    pub fn with_metafields(mut self, keys: &MetafieldKeys) -> Self {
        self.fields = product_fields(keys);
        self
    }

    pub fn config(&self) -> &ShopConfig {
        &self.config
    }

    async fn send(&self, method: Method, url: &str, body: &Value) -> std::result::Result<Value, RemoteError> {
        let response = self
            .http
            .request(method, url)
            .header(ACCESS_TOKEN_HEADER, &self.config.token)
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let text = response.text().await.map_err(classify_transport)?;
        if let Some(err) = classify_status(status, retry_after, &text) {
            tracing::debug!(%status, url, "request failed");
            return Err(err);
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| RemoteError::Transient(format!("undecodable response body: {e}")))
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> std::result::Result<T, RemoteError> {
        let body = json!({ "query": query, "variables": variables });
        let value = self
            .send(Method::POST, &self.config.graphql_url(), &body)
            .await?;
        let response: GqlResponse<T> = serde_json::from_value(value)
            .map_err(|e| RemoteError::Permanent(format!("unexpected GraphQL response: {e}")))?;

        if !response.errors.is_empty() {
            let throttled = response.errors.iter().any(|e| {
                e.extensions
                    .as_ref()
                    .and_then(|x| x.code.as_deref())
                    .is_some_and(|c| c == "THROTTLED")
            });
            if throttled {
                return Err(RemoteError::Throttled { retry_after: None });
            }
            let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(RemoteError::Permanent(format!(
                "GraphQL errors: {}",
                messages.join("; ")
            )));
        }
        response
            .data
            .ok_or_else(|| RemoteError::Permanent("GraphQL response without data".into()))
    }
}

#[async_trait]
impl RemoteApi for ShopClient {
    type Filter = ProductFilter;
    type Mutation = ShopMutation;

    async fn list_page(
        &self,
        filter: &ProductFilter,
        cursor: Option<&str>,
    ) -> std::result::Result<Page, RemoteError> {
        let query = format!(
            "query Products($first: Int!, $cursor: String, $query: String) {{ \
               products(first: $first, after: $cursor, query: $query) {{ \
                 pageInfo {{ hasNextPage endCursor }} \
                 edges {{ node {{ {} }} }} \
               }} \
             }}",
            self.fields
        );
        let variables = json!({
            "first": filter.page_size,
            "cursor": cursor,
            "query": format!("vendor:\"{}\"", filter.vendor.replace('"', "\\\"")),
        });
        let data: ProductsData = self.graphql(&query, variables).await?;

        let mut items = Vec::with_capacity(data.products.edges.len());
        for edge in data.products.edges {
            if !edge.node.vendor.eq_ignore_ascii_case(&filter.vendor) {
                tracing::debug!(
                    product = %edge.node.legacy_resource_id,
                    vendor = %edge.node.vendor,
                    "vendor mismatch, skipping"
                );
                continue;
            }
            let product = edge.node.legacy_resource_id.clone();
            match edge.node.into_payload() {
                Ok(payload) => items.push(payload.into_item()),
                Err(e) => tracing::warn!(%product, error = %e, "undecodable product, skipping"),
            }
        }

        let next_cursor = data
            .products
            .page_info
            .filter(|p| p.has_next_page)
            .and_then(|p| p.end_cursor);
        Ok(Page { items, next_cursor })
    }

    async fn fetch(&self, item_id: &str) -> std::result::Result<WorkItem, RemoteError> {
        let query = format!(
            "query Product($id: ID!) {{ product(id: $id) {{ {} }} }}",
            self.fields
        );
        let variables = json!({ "id": format!("gid://shopify/Product/{item_id}") });
        let data: ProductData = self.graphql(&query, variables).await?;
        let node = data
            .product
            .ok_or_else(|| RemoteError::Permanent(format!("product {item_id} not found")))?;
        Ok(node.into_payload()?.into_item())
    }

    async fn perform_mutation(&self, mutation: &ShopMutation) -> std::result::Result<Value, RemoteError> {
        tracing::debug!(call = mutation.name(), ?mutation, "mutation");
        match mutation {
            ShopMutation::SetImagePosition {
                product_id,
                image_id,
                position,
            } => {
                let url = self
                    .config
                    .rest_url(&format!("products/{product_id}/images/{image_id}"));
                let body = json!({ "image": { "id": image_id, "position": position } });
                self.send(Method::PUT, &url, &body).await
            }
            ShopMutation::SetVariantPrice { variant_id, price } => {
                let url = self.config.rest_url(&format!("variants/{variant_id}"));
                let body = json!({ "variant": { "id": variant_id, "price": price } });
                self.send(Method::PUT, &url, &body).await
            }
            ShopMutation::SetMetafield {
                owner_gid,
                namespace,
                key,
                value,
                kind,
            } => {
                let query = "mutation SetMetafield($metafields: [MetafieldsSetInput!]!) { \
                               metafieldsSet(metafields: $metafields) { \
                                 metafields { id } \
                                 userErrors { field message } \
                               } \
                             }";
                let variables = json!({ "metafields": [{
                    "ownerId": owner_gid,
                    "namespace": namespace,
                    "key": key,
                    "value": value,
                    "type": kind,
                }] });
                let data: MetafieldsSetData = self.graphql(query, variables).await?;
                let errors = data.metafields_set.map(|p| p.user_errors).unwrap_or_default();
                if !errors.is_empty() {
                    let detail: Vec<String> = errors
                        .iter()
                        .map(|e| match &e.field {
                            Some(path) => format!("{}: {}", path.join("."), e.message),
                            None => e.message.clone(),
                        })
                        .collect();
                    return Err(RemoteError::Permanent(detail.join("; ")));
                }
                Ok(json!({ "ok": true }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn classify_transport(err: reqwest::Error) -> RemoteError {
    if err.is_builder() {
        RemoteError::Permanent(format!("invalid request: {err}"))
    } else {
        RemoteError::Transient(err.to_string())
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Option<RemoteError> {
    if status.is_success() {
        return None;
    }
    let detail = format!("{status}: {}", snippet(body));
    Some(if status == StatusCode::TOO_MANY_REQUESTS {
        RemoteError::Throttled { retry_after }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        RemoteError::Transient(detail)
    } else {
        RemoteError::Permanent(detail)
    })
}

/// `Retry-After` in seconds. Shopify sends fractional values such as `2.0`.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(BODY_SNIPPET) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
