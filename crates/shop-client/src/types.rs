//! Product payload carried in [`WorkItem::payload`] plus the GraphQL wire
//! shapes it is decoded from.

use std::collections::BTreeMap;

use remedy_core::action::StepError;
use remedy_core::api::{RemoteError, WorkItem};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The parts of a product the remediation steps look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPayload {
    pub product_id: u64,
    pub title: String,
    pub vendor: String,
    /// Image ids in display order. The first one is the lead image.
    #[serde(default)]
    pub image_ids: Vec<u64>,
    /// First variant only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<VariantPayload>,
    /// Requested product metafields, `namespace.key` → metafield.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metafields: BTreeMap<String, Metafield>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metafield {
    pub value: String,
    /// Metafield type, e.g. `single_line_text_field`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Metafield {
    pub fn new(value: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: Some(kind.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedOption {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPayload {
    pub id: u64,
    pub gid: String,
    #[serde(default)]
    pub title: String,
    pub price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_cost: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectedOption>,
    /// Requested variant metafields, `namespace.key` → metafield.
    #[serde(default)]
    pub metafields: BTreeMap<String, Metafield>,
}

impl VariantPayload {
    /// Unit cost as a number. Missing, unparsable and zero costs are all `None`.
    pub fn unit_cost(&self) -> Option<f64> {
        self.unit_cost
            .as_deref()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|c| c.is_finite() && *c > 0.0)
    }

    pub fn metafield(&self, namespace: &str, key: &str) -> Option<&str> {
        self.metafields
            .get(&metafield_key(namespace, key))
            .map(|m| m.value.as_str())
    }
}

/// Map key for a metafield, as used in GraphQL `keys:` filters.
pub fn metafield_key(namespace: &str, key: &str) -> String {
    format!("{namespace}.{key}")
}

impl ProductPayload {
    pub fn gid(&self) -> String {
        format!("gid://shopify/Product/{}", self.product_id)
    }

    pub fn metafield(&self, namespace: &str, key: &str) -> Option<&Metafield> {
        self.metafields.get(&metafield_key(namespace, key))
    }

    pub fn from_item(item: &WorkItem) -> Result<Self, StepError> {
        serde_json::from_value(item.payload.clone())
            .map_err(|e| StepError::Invalid(format!("unexpected product payload: {e}")))
    }

    pub fn into_item(self) -> WorkItem {
        let id = self.product_id.to_string();
        let title = self.title.clone();
        let payload = serde_json::to_value(&self).unwrap_or_default();
        WorkItem::new(id, title, payload)
    }
}

/// Money strings compare at cent precision: "10", "10.0" and "10.00" match.
pub fn same_amount(a: &str, b: &str) -> bool {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => format!("{x:.2}") == format!("{y:.2}"),
        _ => a.trim() == b.trim(),
    }
}

// ---------------------------------------------------------------------------
// GraphQL wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct GqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GqlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GqlError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<GqlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GqlErrorExtensions {
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Connection<T> {
    #[serde(default)]
    pub page_info: Option<PageInfo>,
    #[serde(default = "Vec::new")]
    pub edges: Vec<Edge<T>>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self {
            page_info: None,
            edges: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Edge<T> {
    pub node: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProductsData {
    pub products: Connection<ProductNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProductData {
    pub product: Option<ProductNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProductNode {
    pub legacy_resource_id: String,
    pub title: String,
    pub vendor: String,
    #[serde(default)]
    pub images: Connection<IdNode>,
    #[serde(default)]
    pub variants: Connection<VariantNode>,
    #[serde(default)]
    pub metafields: Connection<MetafieldNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IdNode {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VariantNode {
    pub id: String,
    pub legacy_resource_id: String,
    #[serde(default)]
    pub title: String,
    pub price: String,
    #[serde(default)]
    pub selected_options: Vec<SelectedOption>,
    #[serde(default)]
    pub inventory_item: Option<InventoryItem>,
    #[serde(default)]
    pub metafields: Connection<MetafieldNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InventoryItem {
    pub unit_cost: Option<Money>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Money {
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MetafieldNode {
    pub namespace: String,
    pub key: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

fn metafield_map(connection: Connection<MetafieldNode>) -> BTreeMap<String, Metafield> {
    connection
        .edges
        .into_iter()
        .map(|Edge { node }| {
            (
                metafield_key(&node.namespace, &node.key),
                Metafield {
                    value: node.value,
                    kind: node.kind,
                },
            )
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MetafieldsSetData {
    pub metafields_set: Option<UserErrorsPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserErrorsPayload {
    #[serde(default)]
    pub user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

/// Numeric id at the end of a GraphQL global id, e.g. `gid://shopify/ProductImage/42`.
pub(crate) fn numeric_id(gid: &str) -> Result<u64, RemoteError> {
    gid.rsplit('/')
        .next()
        .and_then(|tail| tail.parse().ok())
        .ok_or_else(|| RemoteError::Permanent(format!("malformed id '{gid}'")))
}

impl ProductNode {
    pub(crate) fn into_payload(self) -> Result<ProductPayload, RemoteError> {
        let product_id = numeric_id(&self.legacy_resource_id)?;
        let image_ids = self
            .images
            .edges
            .iter()
            .map(|e| numeric_id(&e.node.id))
            .collect::<Result<Vec<_>, _>>()?;
        let variant = match self.variants.edges.into_iter().next() {
            None => None,
            Some(Edge { node }) => Some(VariantPayload {
                id: numeric_id(&node.legacy_resource_id)?,
                unit_cost: node
                    .inventory_item
                    .and_then(|i| i.unit_cost)
                    .map(|m| m.amount),
                metafields: metafield_map(node.metafields),
                options: node.selected_options,
                title: node.title,
                price: node.price,
                gid: node.id,
            }),
        };
        Ok(ProductPayload {
            product_id,
            title: self.title,
            vendor: self.vendor,
            image_ids,
            variant,
            metafields: metafield_map(self.metafields),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_node_decodes_into_payload() {
        let json = r#"{
            "legacyResourceId": "101",
            "title": "Lounge chair",
            "vendor": "Venture Design",
            "images": { "edges": [
                { "node": { "id": "gid://shopify/ProductImage/7" } },
                { "node": { "id": "gid://shopify/ProductImage/8" } }
            ] },
            "metafields": { "edges": [
                { "node": { "namespace": "custom", "key": "farve", "value": "Black", "type": "single_line_text_field" } }
            ] },
            "variants": { "edges": [ { "node": {
                "id": "gid://shopify/ProductVariant/555",
                "legacyResourceId": "555",
                "title": "Oak / Black",
                "price": "199.00",
                "selectedOptions": [ { "name": "Farve", "value": "Black" } ],
                "inventoryItem": { "unitCost": { "amount": "90.5" } },
                "metafields": { "edges": [
                    { "node": { "namespace": "custom", "key": "kostpris", "value": "158.38", "type": "number_decimal" } }
                ] }
            } } ] }
        }"#;
        let node: ProductNode = serde_json::from_str(json).unwrap();
        let payload = node.into_payload().unwrap();
        assert_eq!(payload.product_id, 101);
        assert_eq!(payload.image_ids, vec![7, 8]);
        let variant = payload.variant.unwrap();
        assert_eq!(variant.id, 555);
        assert_eq!(variant.gid, "gid://shopify/ProductVariant/555");
        assert_eq!(variant.unit_cost(), Some(90.5));
        assert_eq!(variant.metafield("custom", "kostpris"), Some("158.38"));
        assert_eq!(variant.options[0].value, "Black");
        assert_eq!(
            payload.metafields["custom.farve"],
            Metafield::new("Black", "single_line_text_field")
        );
    }

    #[test]
    fn missing_cost_and_variant_are_tolerated() {
        let json = r#"{ "legacyResourceId": "1", "title": "T", "vendor": "V" }"#;
        let node: ProductNode = serde_json::from_str(json).unwrap();
        let payload = node.into_payload().unwrap();
        assert!(payload.image_ids.is_empty());
        assert!(payload.variant.is_none());
    }

    #[test]
    fn zero_cost_counts_as_missing() {
        let v = VariantPayload {
            id: 1,
            gid: "gid://shopify/ProductVariant/1".into(),
            title: String::new(),
            price: "0.00".into(),
            unit_cost: Some("0.00".into()),
            options: Vec::new(),
            metafields: BTreeMap::new(),
        };
        assert_eq!(v.unit_cost(), None);
    }

    #[test]
    fn amounts_compare_at_cent_precision() {
        assert!(same_amount("10", "10.00"));
        assert!(same_amount(" 19.9", "19.90"));
        assert!(!same_amount("19.91", "19.90"));
    }

    #[test]
    fn payload_roundtrips_through_work_item() {
        let payload = ProductPayload {
            product_id: 9,
            title: "Sofa".into(),
            vendor: "Venture Design".into(),
            image_ids: vec![1, 2],
            variant: None,
            metafields: BTreeMap::from([(
                "custom.farve".to_string(),
                Metafield::new("Sort", "single_line_text_field"),
            )]),
        };
        let item = payload.clone().into_item();
        assert_eq!(item.id, "9");
        assert_eq!(item.display_name, "Sofa");
        assert_eq!(ProductPayload::from_item(&item).unwrap(), payload);
    }

    #[test]
    fn malformed_gid_is_permanent() {
        assert!(matches!(numeric_id("gid://shopify/Product/abc"), Err(RemoteError::Permanent(_))));
    }
}
